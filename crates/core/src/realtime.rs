//! Event vocabulary of the realtime voice protocol.
//!
//! The relay treats messages as opaque text and only peeks at the `type`
//! discriminator. The bridge parses downstream text into [`RealtimeEvent`]:
//! the relay's own notices, or an upstream [`ServerEvent`] as typed by
//! `async-openai`.

use async_openai::types::realtime::{ClientEvent, InputAudioBufferAppendEvent};
use serde::{Deserialize, Serialize};

pub use async_openai::types::realtime::ServerEvent;

pub const SESSION_CREATED: &str = "session.created";
pub const SESSION_UPDATED: &str = "session.updated";
pub const SESSION_UPDATE: &str = "session.update";
pub const INPUT_AUDIO_BUFFER_APPEND: &str = "input_audio_buffer.append";

/// Text of the generic notice sent to the client when the upstream leg fails.
pub const UPSTREAM_ERROR_TEXT: &str = "OpenAI connection error";

#[derive(Deserialize)]
struct EventHeader<'a> {
    #[serde(rename = "type", borrow)]
    kind: std::borrow::Cow<'a, str>,
}

/// Returns the `type` discriminator of a JSON envelope, if it has one.
pub fn event_type(text: &str) -> Option<String> {
    serde_json::from_str::<EventHeader>(text)
        .ok()
        .map(|header| header.kind.into_owned())
}

/// Messages the relay itself originates towards the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RelayNotice {
    /// The upstream leg is open.
    #[serde(rename = "connected")]
    Connected,
    /// The upstream leg failed. Upstream errors carry an object instead of text.
    #[serde(rename = "error")]
    Error { error: String },
}

impl RelayNotice {
    pub fn to_json(&self) -> String {
        // Unit and string variants always serialize.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// One downstream message as seen by the bridge.
#[derive(Debug, Clone)]
pub enum RealtimeEvent {
    Relay(RelayNotice),
    Server(Box<ServerEvent>),
    /// Valid envelope the bridge has no model for, or a known type with a
    /// payload it could not read. Carries the `type` discriminator.
    Unhandled(String),
}

impl RealtimeEvent {
    /// Fails only when `text` is not a JSON object with a `type`.
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        if let Ok(notice) = serde_json::from_str::<RelayNotice>(text) {
            return Ok(Self::Relay(notice));
        }
        match serde_json::from_str::<ServerEvent>(text) {
            Ok(event) => Ok(Self::Server(Box::new(event))),
            Err(err) => event_type(text).map(Self::Unhandled).ok_or(err),
        }
    }
}

/// Serializes an `input_audio_buffer.append` carrying base64 PCM16.
pub fn input_audio_append(audio: String) -> serde_json::Result<String> {
    serde_json::to_string(&ClientEvent::InputAudioBufferAppend(
        InputAudioBufferAppendEvent {
            event_id: None,
            audio,
        },
    ))
}

/// The relay's `{"type":"connected"}` notice.
pub fn connected_notice() -> String {
    RelayNotice::Connected.to_json()
}

/// The generic notice pushed to the client when the upstream leg fails.
pub fn upstream_error_notice() -> String {
    RelayNotice::Error {
        error: UPSTREAM_ERROR_TEXT.to_string(),
    }
    .to_json()
}
