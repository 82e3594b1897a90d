//! # Voice-Agent Wire Protocol
//!
//! JSON message types exchanged with the conversational-AI endpoint over
//! its WebSocket.
//!
//! # Protocol Overview
//!
//! 1. Connect and immediately send `conversation_initiation` with the
//!    voice/model configuration and the free-text call context
//! 2. Stream caller audio via `audio_input` (base64 PCM16, 16 kHz)
//! 3. Receive `audio` / `transcript` / `interruption` / `error` events
//! 4. Send `conversation_end`, then close

use crate::audio::AGENT_SAMPLE_RATE;
use crate::config::AgentConfig;
use serde::{Deserialize, Serialize};

/// Messages sent to the voice-agent endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum AgentRequest {
    /// Opens the conversation; must be the first message on the socket
    #[serde(rename = "conversation_initiation")]
    ConversationInitiation {
        voice_id: String,
        model: String,
        /// Free-text context describing what the agent should accomplish
        context: String,
    },

    /// One chunk of caller audio
    #[serde(rename = "audio_input")]
    AudioInput {
        /// Base64-encoded PCM16 little-endian samples
        audio: String,
        sample_rate: u32,
        is_final: bool,
    },

    /// Side channel for non-audio input (debugging / text-only testing)
    #[serde(rename = "text_input")]
    TextInput { text: String },

    /// Keepalive
    #[serde(rename = "ping")]
    Ping,

    /// Graceful termination, sent before closing the socket
    #[serde(rename = "conversation_end")]
    ConversationEnd,
}

impl AgentRequest {
    /// Build the initiation message from the configured voice/model and the
    /// per-call context.
    pub fn initiation(config: &AgentConfig, context: &str) -> Self {
        Self::ConversationInitiation {
            voice_id: config.voice_id.clone(),
            model: config.model.clone(),
            context: context.to_string(),
        }
    }

    /// Wrap an already-encoded PCM16 payload in an `audio_input` envelope.
    /// The outbound sample rate is fixed by the agent leg's format.
    pub fn audio_input(audio: String, is_final: bool) -> Self {
        Self::AudioInput {
            audio,
            sample_rate: AGENT_SAMPLE_RATE,
            is_final,
        }
    }
}

/// Speaker attribution on transcript events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Agent,
    User,
    System,
}

impl Default for Speaker {
    fn default() -> Self {
        Speaker::Agent
    }
}

fn default_sample_rate() -> u32 {
    AGENT_SAMPLE_RATE
}

/// Messages received from the voice-agent endpoint.
///
/// Unrecognized types deserialize to [`AgentEvent::Unknown`] so protocol
/// additions never break the receive loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    /// Agent speech to be relayed to the caller
    #[serde(rename = "audio")]
    Audio {
        /// Base64-encoded PCM16 little-endian samples
        audio: String,
        #[serde(default = "default_sample_rate")]
        sample_rate: u32,
    },

    /// A line of the running conversation transcript
    #[serde(rename = "transcript")]
    Transcript {
        text: String,
        #[serde(default)]
        is_final: bool,
        #[serde(default)]
        speaker: Speaker,
    },

    /// The caller talked over the agent; conversational, not fatal
    #[serde(rename = "interruption")]
    Interruption {
        #[serde(default)]
        reason: Option<String>,
    },

    /// Error reported by the agent endpoint
    #[serde(rename = "error")]
    Error {
        error: String,
        #[serde(default)]
        code: Option<String>,
    },

    #[serde(other)]
    Unknown,
}

/// Classify one raw text frame from the agent socket.
///
/// Malformed JSON yields an [`AgentEvent::Error`] with a generic
/// parse-failure payload rather than propagating the parse error — a bad
/// frame must not kill the receive loop.
pub fn decode_message(raw: &str) -> AgentEvent {
    match serde_json::from_str::<AgentEvent>(raw) {
        Ok(event) => event,
        Err(err) => AgentEvent::Error {
            error: format!("failed to parse agent message: {}", err),
            code: Some("parse_failure".to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent_config() -> AgentConfig {
        AgentConfig {
            ws_url: "wss://agent.example/convai".to_string(),
            agent_id: "agent_123".to_string(),
            api_key: String::new(),
            voice_id: "river".to_string(),
            model: "conversational-v1".to_string(),
            connect_timeout_secs: 10,
            keepalive_interval_secs: 30,
        }
    }

    #[test]
    fn test_initiation_serialization() {
        let msg = AgentRequest::initiation(&agent_config(), "Book a table for two");
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains("\"type\":\"conversation_initiation\""));
        assert!(json.contains("\"voice_id\":\"river\""));
        assert!(json.contains("\"model\":\"conversational-v1\""));
        assert!(json.contains("\"context\":\"Book a table for two\""));
    }

    #[test]
    fn test_audio_input_serialization() {
        let msg = AgentRequest::audio_input("AAAA".to_string(), false);
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains("\"type\":\"audio_input\""));
        assert!(json.contains("\"sample_rate\":16000"));
        assert!(json.contains("\"is_final\":false"));
    }

    #[test]
    fn test_control_frames_serialization() {
        let json = serde_json::to_string(&AgentRequest::Ping).unwrap();
        assert_eq!(json, r#"{"type":"ping"}"#);

        let json = serde_json::to_string(&AgentRequest::ConversationEnd).unwrap();
        assert_eq!(json, r#"{"type":"conversation_end"}"#);
    }

    #[test]
    fn test_decode_audio_defaults_sample_rate() {
        let event = decode_message(r#"{"type":"audio","audio":"AAAA"}"#);
        match event {
            AgentEvent::Audio { audio, sample_rate } => {
                assert_eq!(audio, "AAAA");
                assert_eq!(sample_rate, 16000);
            }
            _ => panic!("Expected Audio"),
        }
    }

    #[test]
    fn test_decode_transcript() {
        let event = decode_message(
            r#"{"type":"transcript","text":"Hello","is_final":true,"speaker":"agent"}"#,
        );
        match event {
            AgentEvent::Transcript {
                text,
                is_final,
                speaker,
            } => {
                assert_eq!(text, "Hello");
                assert!(is_final);
                assert_eq!(speaker, Speaker::Agent);
            }
            _ => panic!("Expected Transcript"),
        }
    }

    #[test]
    fn test_decode_interruption_and_error() {
        let event = decode_message(r#"{"type":"interruption","reason":"user spoke"}"#);
        assert!(matches!(event, AgentEvent::Interruption { .. }));

        let event = decode_message(r#"{"type":"error","error":"overloaded","code":"E429"}"#);
        match event {
            AgentEvent::Error { error, code } => {
                assert_eq!(error, "overloaded");
                assert_eq!(code.as_deref(), Some("E429"));
            }
            _ => panic!("Expected Error"),
        }
    }

    #[test]
    fn test_decode_unknown_type() {
        let event = decode_message(r#"{"type":"some.future.event","data":1}"#);
        assert!(matches!(event, AgentEvent::Unknown));
    }

    #[test]
    fn test_decode_malformed_json_becomes_error_event() {
        let event = decode_message("{not json at all");
        match event {
            AgentEvent::Error { code, .. } => {
                assert_eq!(code.as_deref(), Some("parse_failure"));
            }
            _ => panic!("Expected Error for malformed JSON"),
        }
    }
}
