//! # Telephony Media-Stream Protocol
//!
//! JSON text frames exchanged with the telephony media-stream socket.
//!
//! ## Inbound events:
//! - `connected` — protocol banner, logged only
//! - `start` — stream and call identifiers plus media format; opens a call
//! - `media` — base64 µ-law audio chunk (8 kHz, mono)
//! - `stop` — call teardown
//!
//! ## Outbound frame:
//! `{ "event": "media", "streamSid": ..., "media": { "payload": ... } }`
//! carrying companded agent audio back to the caller.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Inbound frame from the telephony media stream.
///
/// Unrecognized events deserialize to [`TelephonyFrame::Unknown`] so a new
/// event type never breaks frame decoding.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyFrame {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
        #[serde(default)]
        version: Option<String>,
    },

    Start {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        start: StartMeta,
    },

    Media {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        media: MediaMeta,
    },

    Stop {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        #[serde(default)]
        stop: Option<StopMeta>,
    },

    #[serde(other)]
    Unknown,
}

/// Metadata carried on the `start` event.
#[derive(Debug, Clone, Deserialize)]
pub struct StartMeta {
    #[serde(rename = "callSid")]
    pub call_sid: String,

    #[serde(rename = "mediaFormat", default)]
    pub media_format: Option<MediaFormat>,

    /// Free-form parameters attached when the stream was scheduled; the
    /// conversation context for the agent rides in here.
    #[serde(rename = "customParameters", default)]
    pub custom_parameters: HashMap<String, String>,
}

impl StartMeta {
    /// Conversation context handed to the voice agent, if any was attached.
    pub fn context(&self) -> &str {
        self.custom_parameters
            .get("context")
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Declared format of the media stream.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaFormat {
    #[serde(default)]
    pub encoding: Option<String>,

    #[serde(rename = "sampleRate", default)]
    pub sample_rate: Option<u32>,

    #[serde(default)]
    pub channels: Option<u32>,
}

/// Payload container on a `media` event.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaMeta {
    /// Base64-encoded companded audio
    pub payload: String,

    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Metadata carried on the `stop` event.
#[derive(Debug, Clone, Deserialize)]
pub struct StopMeta {
    #[serde(rename = "callSid", default)]
    pub call_sid: Option<String>,
}

/// Outbound media frame carrying agent audio to the caller.
#[derive(Debug, Serialize)]
pub struct OutboundMedia<'a> {
    event: &'static str,

    #[serde(rename = "streamSid")]
    stream_sid: &'a str,

    media: OutboundPayload,
}

#[derive(Debug, Serialize)]
struct OutboundPayload {
    payload: String,
}

impl<'a> OutboundMedia<'a> {
    /// Wrap a base64 companded payload in the media envelope for
    /// `stream_sid`.
    pub fn new(stream_sid: &'a str, payload: String) -> Self {
        Self {
            event: "media",
            stream_sid,
            media: OutboundPayload { payload },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connected() {
        let json = r#"{"event":"connected","protocol":"Call","version":"1.0.0"}"#;
        let frame: TelephonyFrame = serde_json::from_str(json).unwrap();
        match frame {
            TelephonyFrame::Connected { protocol, version } => {
                assert_eq!(protocol.as_deref(), Some("Call"));
                assert_eq!(version.as_deref(), Some("1.0.0"));
            }
            _ => panic!("Wrong frame type"),
        }
    }

    #[test]
    fn test_parse_start() {
        let json = r#"{
            "event": "start",
            "streamSid": "SS100",
            "start": {
                "callSid": "CA100",
                "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1},
                "customParameters": {"context": "Table for two at seven"}
            }
        }"#;

        let frame: TelephonyFrame = serde_json::from_str(json).unwrap();
        match frame {
            TelephonyFrame::Start { stream_sid, start } => {
                assert_eq!(stream_sid, "SS100");
                assert_eq!(start.call_sid, "CA100");
                assert_eq!(start.context(), "Table for two at seven");
                let format = start.media_format.unwrap();
                assert_eq!(format.encoding.as_deref(), Some("audio/x-mulaw"));
                assert_eq!(format.sample_rate, Some(8000));
                assert_eq!(format.channels, Some(1));
            }
            _ => panic!("Wrong frame type"),
        }
    }

    #[test]
    fn test_parse_start_without_parameters() {
        let json = r#"{"event":"start","streamSid":"SS1","start":{"callSid":"CA1"}}"#;
        let frame: TelephonyFrame = serde_json::from_str(json).unwrap();
        match frame {
            TelephonyFrame::Start { start, .. } => {
                assert_eq!(start.context(), "");
                assert!(start.media_format.is_none());
            }
            _ => panic!("Wrong frame type"),
        }
    }

    #[test]
    fn test_parse_media_and_stop() {
        let json =
            r#"{"event":"media","streamSid":"SS1","media":{"payload":"//8A","timestamp":"20"}}"#;
        let frame: TelephonyFrame = serde_json::from_str(json).unwrap();
        match frame {
            TelephonyFrame::Media { media, .. } => {
                assert_eq!(media.payload, "//8A");
                assert_eq!(media.timestamp.as_deref(), Some("20"));
            }
            _ => panic!("Wrong frame type"),
        }

        let json = r#"{"event":"stop","streamSid":"SS1","stop":{"callSid":"CA1"}}"#;
        let frame: TelephonyFrame = serde_json::from_str(json).unwrap();
        match frame {
            TelephonyFrame::Stop { stream_sid, stop } => {
                assert_eq!(stream_sid.as_deref(), Some("SS1"));
                assert_eq!(stop.unwrap().call_sid.as_deref(), Some("CA1"));
            }
            _ => panic!("Wrong frame type"),
        }
    }

    #[test]
    fn test_unknown_event_does_not_fail() {
        let json = r#"{"event":"mark","streamSid":"SS1","mark":{"name":"cue"}}"#;
        let frame: TelephonyFrame = serde_json::from_str(json).unwrap();
        assert!(matches!(frame, TelephonyFrame::Unknown));
    }

    #[test]
    fn test_outbound_media_envelope() {
        let frame = OutboundMedia::new("SS100", "AAAA".to_string());
        let json = serde_json::to_string(&frame).unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["event"], "media");
        assert_eq!(value["streamSid"], "SS100");
        assert_eq!(value["media"]["payload"], "AAAA");
    }
}
