//! Realtime voice relay.
//!
//! - `frame`: transport-neutral frames shared by both socket legs.
//! - `pair`: the explicit state record of one client/upstream pair.
//! - `relay`: the forwarding loop and its teardown.
//! - `session`: the axum upgrade handler.
//! - `provider`: connections to the upstream realtime service.

pub mod frame;
pub mod pair;
pub mod provider;
pub mod relay;
pub mod session;

pub use session::ws_handler;
