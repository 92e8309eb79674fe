//! docweaver API Library Crate
//!
//! The HTTP service: documentation generation over REST and the realtime
//! voice relay over WebSockets. The binaries are thin wrappers around this
//! library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
