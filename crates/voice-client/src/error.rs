use docweaver_core::audio::CodecError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Microphone access denied: {0}")]
    PermissionDenied(String),
    #[error("A voice session is already running")]
    AlreadyConnected,
    #[error("Audio device error: {0}")]
    AudioDevice(String),
    #[error("Failed to open the relay socket: {0}")]
    Socket(Box<tungstenite::Error>),
    #[error("Invalid audio payload: {0}")]
    Codec(#[from] CodecError),
    #[error("Resampler error: {0}")]
    Resample(String),
}

impl From<tungstenite::Error> for BridgeError {
    fn from(err: tungstenite::Error) -> Self {
        Self::Socket(Box::new(err))
    }
}
