//! Client side of the realtime voice relay.
//!
//! - `bridge`: connect/disconnect and the driver task.
//! - `state`: the connection state machine exposed to callers.
//! - `capture` / `playback`: audio in and out, behind [`capture::AudioSource`]
//!   and [`capture::AudioSink`].
//! - `transcript`: the two-author transcript log.
//! - `native` (feature `native-audio`): cpal devices.

pub mod bridge;
pub mod capture;
pub mod error;
#[cfg(feature = "native-audio")]
pub mod native;
pub mod playback;
pub mod state;
pub mod transcript;

pub use bridge::VoiceBridge;
pub use error::BridgeError;
pub use state::{Activity, ConnectionState};
