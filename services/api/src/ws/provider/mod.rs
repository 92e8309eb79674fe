//! Connections to the upstream realtime voice service.

pub mod openai;

use super::{
    frame::{FrameSink, FrameStream},
    relay::RelayError,
};
use async_trait::async_trait;
use secrecy::SecretString;

pub use openai::OpenAiRealtimeConnector;

/// Opens the upstream leg of a connection pair.
///
/// The relay calls this exactly once per client connection; implementations
/// must not retry or pool connections.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    async fn connect(&self, credential: &SecretString)
    -> Result<(FrameSink, FrameStream), RelayError>;
}
