//! The one-time session configuration pushed upstream after `session.created`.

use async_openai::types::realtime::{
    AudioFormat, AudioTranscription, ClientEvent, MaxResponseOutputTokens, RealtimeVoice,
    SessionResource, SessionUpdateEvent, TurnDetection,
};

const DEFAULT_INSTRUCTIONS: &str = "You are a helpful API documentation assistant. Help users understand API specifications by explaining endpoints, parameters, authentication methods, and best practices. Keep responses clear and concise.";

/// Voice, audio and behavior parameters for one realtime session.
///
/// Built once at startup and shared read-only by every connection pair.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub modalities: Vec<String>,
    pub instructions: String,
    pub voice: RealtimeVoice,
    pub input_audio_format: AudioFormat,
    pub output_audio_format: AudioFormat,
    pub transcription_model: String,
    pub turn_detection: TurnDetection,
    pub temperature: f32,
    pub max_response_output_tokens: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            modalities: vec!["text".to_string(), "audio".to_string()],
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            voice: RealtimeVoice::Alloy,
            input_audio_format: AudioFormat::PCM16,
            output_audio_format: AudioFormat::PCM16,
            transcription_model: "whisper-1".to_string(),
            turn_detection: TurnDetection::ServerVAD {
                threshold: 0.5,
                prefix_padding_ms: 300,
                silence_duration_ms: 1000,
                create_response: None,
                interrupt_response: None,
            },
            temperature: 0.8,
            max_response_output_tokens: 4096,
        }
    }
}

impl SessionConfig {
    /// The `session` object of a `session.update`. The model is chosen by the
    /// upstream URL, so it is left unset here.
    pub fn to_resource(&self) -> SessionResource {
        SessionResource {
            modalities: Some(self.modalities.clone()),
            instructions: Some(self.instructions.clone()),
            voice: Some(self.voice.clone()),
            input_audio_format: Some(self.input_audio_format.clone()),
            output_audio_format: Some(self.output_audio_format.clone()),
            input_audio_transcription: Some(AudioTranscription {
                model: Some(self.transcription_model.clone()),
                ..Default::default()
            }),
            turn_detection: Some(self.turn_detection.clone()),
            temperature: Some(self.temperature),
            max_response_output_tokens: Some(MaxResponseOutputTokens::Num(
                self.max_response_output_tokens,
            )),
            ..Default::default()
        }
    }

    /// Renders the `session.update` message sent to the upstream service.
    pub fn to_update_message(&self) -> serde_json::Result<String> {
        serde_json::to_string(&ClientEvent::SessionUpdate(SessionUpdateEvent {
            event_id: None,
            session: self.to_resource(),
        }))
    }
}
