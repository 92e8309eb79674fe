//! Shared domain logic for the docweaver services.
//!
//! - `audio`: PCM16 frames and their base64 transport encoding.
//! - `realtime`: event vocabulary of the realtime voice protocol.
//! - `session_config`: the session configuration injected by the relay.
//! - `docs` / `generator`: audience-tailored documentation generation.

pub mod audio;
pub mod docs;
pub mod generator;
pub mod realtime;
pub mod session_config;
