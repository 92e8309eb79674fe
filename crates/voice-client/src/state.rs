//! Connection state machine of the voice bridge.
//!
//! `idle → connecting → connected → active(listening|speaking|idle) → closed`.
//! Closed is reachable from every state. Only `active` permits sending audio.

use crate::error::BridgeError;
use docweaver_core::realtime::{RealtimeEvent, ServerEvent};
use std::fmt;

/// What is happening inside an active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Idle,
    Listening,
    Speaking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    /// The socket is open; waiting for `session.updated`.
    Connected,
    Active(Activity),
    Closed,
}

impl ConnectionState {
    pub fn can_send_audio(self) -> bool {
        matches!(self, ConnectionState::Active(_))
    }

    /// Label shown to users: idle, connecting, connected, listening, speaking or closed.
    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Idle | ConnectionState::Active(Activity::Idle) => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Active(Activity::Listening) => "listening",
            ConnectionState::Active(Activity::Speaking) => "speaking",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Default)]
pub struct SessionMachine {
    state: ConnectionState,
    ever_connected: bool,
    /// Audio has been queued and not yet fully played.
    playback_pending: bool,
    /// `response.audio.done` arrived for the current response.
    response_audio_done: bool,
}

impl SessionMachine {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn can_send_audio(&self) -> bool {
        self.state.can_send_audio()
    }

    /// Idle or closed → connecting. Anything else is a session in progress.
    pub fn begin_connect(&mut self) -> Result<(), BridgeError> {
        match self.state {
            ConnectionState::Idle | ConnectionState::Closed => {
                self.state = ConnectionState::Connecting;
                Ok(())
            }
            _ => Err(BridgeError::AlreadyConnected),
        }
    }

    /// Microphone or output refused before any socket was opened.
    pub fn connect_refused(&mut self) {
        self.state = ConnectionState::Idle;
    }

    pub fn socket_opened(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Connected;
            self.ever_connected = true;
        }
    }

    /// Socket failed to open, closed, or errored.
    pub fn socket_closed(&mut self) {
        self.state = ConnectionState::Closed;
        self.playback_pending = false;
        self.response_audio_done = false;
    }

    /// Applies one downstream event. Returns true when the state changed.
    pub fn apply(&mut self, event: &RealtimeEvent) -> bool {
        let RealtimeEvent::Server(event) = event else {
            return false;
        };
        let before = self.state;
        match event.as_ref() {
            ServerEvent::SessionUpdated(_) => {
                if self.state == ConnectionState::Connected {
                    self.state = ConnectionState::Active(Activity::Idle);
                }
            }
            ServerEvent::InputAudioBufferSpeechStarted(_) => {
                if self.state.can_send_audio() {
                    self.state = ConnectionState::Active(Activity::Listening);
                }
            }
            ServerEvent::InputAudioBufferSpeechStopped(_) => {
                if self.state == ConnectionState::Active(Activity::Listening) {
                    self.state = ConnectionState::Active(Activity::Idle);
                }
            }
            ServerEvent::ResponseAudioDelta(_) => {
                self.playback_pending = true;
                self.response_audio_done = false;
                if self.state.can_send_audio() {
                    self.state = ConnectionState::Active(Activity::Speaking);
                }
            }
            ServerEvent::ResponseAudioDone(_) => {
                self.response_audio_done = true;
                self.settle_speaking();
            }
            _ => {}
        }
        self.state != before
    }

    /// The playback queue ran dry with nothing in flight.
    pub fn playback_drained(&mut self) -> bool {
        let before = self.state;
        self.playback_pending = false;
        self.settle_speaking();
        self.state != before
    }

    /// Back to rest after `disconnect()`: closed if a socket was ever open, idle otherwise.
    pub fn reset(&mut self) {
        self.state = if self.ever_connected {
            ConnectionState::Closed
        } else {
            ConnectionState::Idle
        };
        self.playback_pending = false;
        self.response_audio_done = false;
    }

    fn settle_speaking(&mut self) {
        if self.state == ConnectionState::Active(Activity::Speaking)
            && !self.playback_pending
            && self.response_audio_done
        {
            self.state = ConnectionState::Active(Activity::Idle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn server(event: serde_json::Value) -> RealtimeEvent {
        RealtimeEvent::parse(&event.to_string()).unwrap()
    }

    fn session_updated() -> RealtimeEvent {
        server(json!({"type": "session.updated", "event_id": "e", "session": {}}))
    }

    fn speech_started() -> RealtimeEvent {
        server(json!({
            "type": "input_audio_buffer.speech_started",
            "event_id": "e", "audio_start_ms": 0, "item_id": "i"
        }))
    }

    fn speech_stopped() -> RealtimeEvent {
        server(json!({
            "type": "input_audio_buffer.speech_stopped",
            "event_id": "e", "audio_end_ms": 900, "item_id": "i"
        }))
    }

    fn delta() -> RealtimeEvent {
        server(json!({
            "type": "response.audio.delta",
            "event_id": "e", "response_id": "r", "item_id": "i",
            "output_index": 0, "content_index": 0, "delta": "AAAA"
        }))
    }

    fn audio_done() -> RealtimeEvent {
        server(json!({
            "type": "response.audio.done",
            "event_id": "e", "response_id": "r", "item_id": "i",
            "output_index": 0, "content_index": 0
        }))
    }

    fn active() -> SessionMachine {
        let mut machine = SessionMachine::default();
        machine.begin_connect().unwrap();
        machine.socket_opened();
        machine.apply(&session_updated());
        machine
    }

    #[test]
    fn test_audio_only_flows_once_configured() {
        let mut machine = SessionMachine::default();
        assert!(!machine.can_send_audio());

        machine.begin_connect().unwrap();
        assert_eq!(machine.state(), ConnectionState::Connecting);
        assert!(!machine.can_send_audio());

        machine.socket_opened();
        assert_eq!(machine.state(), ConnectionState::Connected);
        assert!(!machine.can_send_audio());

        assert!(machine.apply(&session_updated()));
        assert_eq!(machine.state(), ConnectionState::Active(Activity::Idle));
        assert!(machine.can_send_audio());
    }

    #[test]
    fn test_second_connect_is_rejected_while_running() {
        let mut machine = active();
        assert!(matches!(
            machine.begin_connect(),
            Err(BridgeError::AlreadyConnected)
        ));

        machine.socket_closed();
        assert!(machine.begin_connect().is_ok());
    }

    #[test]
    fn test_speaking_clears_after_done_and_drain() {
        let mut machine = active();
        machine.apply(&delta());
        assert_eq!(machine.state(), ConnectionState::Active(Activity::Speaking));

        // Queue drained but the response is still streaming.
        assert!(!machine.playback_drained());
        machine.apply(&delta());
        machine.apply(&audio_done());
        assert_eq!(machine.state(), ConnectionState::Active(Activity::Speaking));

        assert!(machine.playback_drained());
        assert_eq!(machine.state(), ConnectionState::Active(Activity::Idle));
    }

    #[test]
    fn test_done_after_drain_clears_speaking() {
        let mut machine = active();
        machine.apply(&delta());
        machine.playback_drained();
        assert!(machine.apply(&audio_done()));
        assert_eq!(machine.state(), ConnectionState::Active(Activity::Idle));
    }

    #[test]
    fn test_voice_activity_toggles_listening() {
        let mut machine = active();
        machine.apply(&speech_started());
        assert_eq!(machine.state().label(), "listening");
        machine.apply(&speech_stopped());
        assert_eq!(machine.state().label(), "idle");
    }

    #[test]
    fn test_events_before_configuration_do_not_activate() {
        let mut machine = SessionMachine::default();
        machine.begin_connect().unwrap();
        machine.socket_opened();
        assert!(!machine.apply(&speech_started()));
        assert!(!machine.apply(&delta()));
        assert_eq!(machine.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_relay_notices_leave_state_alone() {
        let mut machine = SessionMachine::default();
        machine.begin_connect().unwrap();
        machine.socket_opened();
        assert!(!machine.apply(&server(json!({"type": "connected"}))));
        assert!(!machine.apply(&server(json!({"type": "error", "error": "OpenAI connection error"}))));
        assert_eq!(machine.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_reset_depends_on_whether_a_socket_opened() {
        let mut never = SessionMachine::default();
        never.reset();
        assert_eq!(never.state(), ConnectionState::Idle);

        let mut refused = SessionMachine::default();
        refused.begin_connect().unwrap();
        refused.connect_refused();
        refused.reset();
        assert_eq!(refused.state(), ConnectionState::Idle);

        let mut used = active();
        used.reset();
        assert_eq!(used.state(), ConnectionState::Closed);
        used.reset();
        assert_eq!(used.state(), ConnectionState::Closed);
    }
}
