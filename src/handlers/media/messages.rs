//! Carrier media-stream wire protocol.
//!
//! Twilio-Media-Streams shaped JSON text frames: an `event` discriminator,
//! camelCase keys, base64 audio payloads, `streamSid` on every outbound
//! frame. Unknown inbound events deserialize to [`CarrierFrame::Unknown`]
//! and are ignored rather than rejected.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Inbound frames from the carrier leg.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum CarrierFrame {
    /// Socket-open acknowledgement, no payload we act on.
    Connected,
    Start {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        start: StartMeta,
    },
    Media { media: MediaPayload },
    Mark { mark: MarkPayload },
    /// Keypad digits. Tolerated, not interpreted.
    Dtmf,
    Stop,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMeta {
    pub call_sid: String,
    #[serde(default)]
    pub account_sid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MediaPayload {
    /// Base64-encoded companded audio.
    pub payload: String,
}

impl MediaPayload {
    pub fn decode(&self) -> Option<Bytes> {
        BASE64.decode(&self.payload).ok().map(Bytes::from)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

/// Outbound frames to the carrier leg.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundFrame {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkPayload,
    },
    /// Flush queued playback, used on barge-in.
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Serialize)]
pub struct OutboundMedia {
    pub payload: String,
}

impl OutboundFrame {
    pub fn media(stream_sid: &str, audio: &[u8]) -> Self {
        Self::Media {
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia {
                payload: BASE64.encode(audio),
            },
        }
    }

    pub fn mark(stream_sid: &str, name: String) -> Self {
        Self::Mark {
            stream_sid: stream_sid.to_string(),
            mark: MarkPayload { name },
        }
    }

    pub fn clear(stream_sid: &str) -> Self {
        Self::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_start_frame() {
        let frame: CarrierFrame = serde_json::from_str(
            r#"{"event":"start","sequenceNumber":"1","streamSid":"MZ123",
                "start":{"accountSid":"AC1","callSid":"CA9","tracks":["inbound"]}}"#,
        )
        .unwrap();
        match frame {
            CarrierFrame::Start { stream_sid, start } => {
                assert_eq!(stream_sid, "MZ123");
                assert_eq!(start.call_sid, "CA9");
            }
            other => panic!("expected start, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_media_frame_decodes_payload() {
        let frame: CarrierFrame = serde_json::from_str(
            r#"{"event":"media","streamSid":"MZ123","media":{"track":"inbound","payload":"//9+fg=="}}"#,
        )
        .unwrap();
        match frame {
            CarrierFrame::Media { media } => {
                assert_eq!(media.decode().unwrap().as_ref(), &[0xFF, 0xFF, 0x7E, 0x7E]);
            }
            other => panic!("expected media, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_base64_yields_none() {
        let media = MediaPayload {
            payload: "not base64!!".into(),
        };
        assert!(media.decode().is_none());
    }

    #[test]
    fn test_unknown_and_dtmf_events_tolerated() {
        let frame: CarrierFrame =
            serde_json::from_str(r#"{"event":"dtmf","dtmf":{"digit":"4"}}"#).unwrap();
        assert!(matches!(frame, CarrierFrame::Dtmf));

        let frame: CarrierFrame =
            serde_json::from_str(r#"{"event":"somethingNew","x":1}"#).unwrap();
        assert!(matches!(frame, CarrierFrame::Unknown));
    }

    #[test]
    fn test_outbound_frames_are_camel_case() {
        let media = serde_json::to_value(OutboundFrame::media("MZ123", &[0x7F, 0xFF])).unwrap();
        assert_eq!(media["event"], "media");
        assert_eq!(media["streamSid"], "MZ123");
        assert_eq!(media["media"]["payload"], json!("f/8="));

        let mark = serde_json::to_value(OutboundFrame::mark("MZ123", "turn-1".into())).unwrap();
        assert_eq!(mark["event"], "mark");
        assert_eq!(mark["mark"]["name"], "turn-1");

        let clear = serde_json::to_value(OutboundFrame::clear("MZ123")).unwrap();
        assert_eq!(clear, json!({"event": "clear", "streamSid": "MZ123"}));
    }
}
