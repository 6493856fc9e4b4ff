//! Wire-level data model for the realtime voice session.
//!
//! Mirrors the event-oriented session protocol: every frame is a JSON
//! object with a `type` field. Client events are the ones we send;
//! server events are the ones we receive and dispatch to subscribers.

use serde::{Deserialize, Serialize};

/// Fixed audio format for the entire realtime pipeline: 24 kHz mono
/// 16-bit signed little-endian PCM. Every encode/decode path reads from
/// this single constant rather than repeating the numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl AudioFormat {
    pub const REALTIME: AudioFormat = AudioFormat {
        sample_rate: 24_000,
        channels: 1,
        bits_per_sample: 16,
    };

    /// Samples per chunk at the nominal 200ms chunk size.
    pub const fn chunk_samples(&self) -> usize {
        4_800
    }
}

/// Server-side VAD configuration, sent as part of `session.update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnDetectionConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl Default for TurnDetectionConfig {
    fn default() -> Self {
        Self {
            kind: "server_vad".to_string(),
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 300,
        }
    }
}

/// Tool/function schema advertised to the remote model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Logical session configuration, mutated only via outbound
/// `session.update` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub model: String,
    pub voice: String,
    pub temperature: f32,
    pub modalities: Vec<String>,
    pub input_audio_format: String,
    pub output_audio_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetectionConfig>,
    #[serde(default)]
    pub tools: Vec<ToolSchema>,
    pub instructions: String,
}

impl SessionConfig {
    pub fn new(model: impl Into<String>, voice: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            voice: voice.into(),
            temperature: 0.8,
            modalities: vec!["text".to_string(), "audio".to_string()],
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            turn_detection: Some(TurnDetectionConfig::default()),
            tools: Vec::new(),
            instructions: instructions.into(),
        }
    }
}

/// Options passed with an outbound `response.create`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseCreateOptions {
    #[serde(default)]
    pub modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// A conversation item payload for `conversation.item.create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConversationItem {
    #[serde(rename = "message")]
    Message { role: String, content: Vec<ContentPart> },
    #[serde(rename = "function_call_output")]
    FunctionCallOutput { call_id: String, output: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "input_text")]
    InputText { text: String },
    #[serde(rename = "input_audio")]
    InputAudio {
        audio: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        transcript: Option<String>,
    },
}

/// Outbound (client → server) events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear,
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseCreateOptions>,
    },
    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

/// Inbound (server → client) events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated { session: serde_json::Value },
    #[serde(rename = "session.updated")]
    SessionUpdated { session: serde_json::Value },
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated { item: serde_json::Value },
    #[serde(rename = "response.created")]
    ResponseCreated { response_id: String },
    #[serde(rename = "response.text.delta")]
    TextDelta { response_id: String, delta: String },
    #[serde(rename = "response.text.done")]
    TextDone { response_id: String, text: String },
    #[serde(rename = "response.audio.delta")]
    AudioDelta { response_id: String, delta: String },
    #[serde(rename = "response.audio.done")]
    AudioDone { response_id: String },
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta { response_id: String, delta: String },
    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone { response_id: String, transcript: String },
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta { call_id: String, name: String, delta: String },
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone { call_id: String, name: String, arguments: String },
    #[serde(rename = "response.done")]
    ResponseDone { response_id: String },
    #[serde(rename = "error")]
    Error { message: String },
    /// Catch-all for event types this client does not yet model.
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// The wire `type` tag for this event, used to key the transport's
    /// per-type subscription registry.
    pub fn type_name(&self) -> &'static str {
        match self {
            ServerEvent::SessionCreated { .. } => "session.created",
            ServerEvent::SessionUpdated { .. } => "session.updated",
            ServerEvent::SpeechStarted => "input_audio_buffer.speech_started",
            ServerEvent::SpeechStopped => "input_audio_buffer.speech_stopped",
            ServerEvent::ConversationItemCreated { .. } => "conversation.item.created",
            ServerEvent::ResponseCreated { .. } => "response.created",
            ServerEvent::TextDelta { .. } => "response.text.delta",
            ServerEvent::TextDone { .. } => "response.text.done",
            ServerEvent::AudioDelta { .. } => "response.audio.delta",
            ServerEvent::AudioDone { .. } => "response.audio.done",
            ServerEvent::AudioTranscriptDelta { .. } => "response.audio_transcript.delta",
            ServerEvent::AudioTranscriptDone { .. } => "response.audio_transcript.done",
            ServerEvent::FunctionCallArgumentsDelta { .. } => "response.function_call_arguments.delta",
            ServerEvent::FunctionCallArgumentsDone { .. } => "response.function_call_arguments.done",
            ServerEvent::ResponseDone { .. } => "response.done",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_format_constant() {
        assert_eq!(AudioFormat::REALTIME.sample_rate, 24_000);
        assert_eq!(AudioFormat::REALTIME.channels, 1);
        assert_eq!(AudioFormat::REALTIME.bits_per_sample, 16);
        assert_eq!(AudioFormat::REALTIME.chunk_samples(), 4_800);
    }

    #[test]
    fn client_event_roundtrip() {
        let ev = ClientEvent::InputAudioBufferAppend { audio: "AAAA".to_string() };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"type\":\"input_audio_buffer.append\""));
        let back: ClientEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, ClientEvent::InputAudioBufferAppend { .. }));
    }

    #[test]
    fn server_event_unknown_type_is_dropped_not_rejected() {
        let parsed: ServerEvent = serde_json::from_str(r#"{"type":"some_future_event"}"#).unwrap();
        assert!(matches!(parsed, ServerEvent::Unknown));
    }

    #[test]
    fn server_event_parses_audio_delta() {
        let raw = r#"{"type":"response.audio.delta","response_id":"resp_1","delta":"AAE="}"#;
        let parsed: ServerEvent = serde_json::from_str(raw).unwrap();
        match parsed {
            ServerEvent::AudioDelta { response_id, delta } => {
                assert_eq!(response_id, "resp_1");
                assert_eq!(delta, "AAE=");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn session_config_defaults_to_text_and_audio() {
        let cfg = SessionConfig::new("gpt-realtime", "alloy", "be helpful");
        assert_eq!(cfg.modalities, vec!["text", "audio"]);
        assert!(cfg.turn_detection.is_some());
    }

    #[test]
    fn type_name_matches_wire_tag() {
        let ev = ServerEvent::AudioDelta { response_id: "r1".to_string(), delta: "AA==".to_string() };
        assert_eq!(ev.type_name(), "response.audio.delta");
        assert_eq!(ServerEvent::Unknown.type_name(), "unknown");
    }
}
