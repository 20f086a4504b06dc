//! Relay websocket protocol definitions.
//!
//! All frames are JSON objects `{ "type": ..., "content": ... }`.
//!
//! Inbound (relay → process):
//! - `conn_success`: the relay accepted our world-alive announcement
//! - `pong`: application-level heartbeat reply
//! - anything else: a platform event carried in `content`
//!
//! Outbound (process → relay):
//! - `world_alive`: announces this process; sent on connect and as a probe

use serde::{Deserialize, Serialize};

// ── Constants ────────────────────────────────────────────────────────────────

pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 200;
pub const DEFAULT_PING_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_PROBE_INTERVAL_MS: u64 = 800;
pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 30_000;

pub mod frame_types {
    pub const CONN_SUCCESS: &str = "conn_success";
    pub const PONG: &str = "pong";
    pub const WORLD_ALIVE: &str = "world_alive";
    /// Default type used by the relay for forwarded platform events.
    pub const MESSAGE: &str = "message";
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed relay frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("relay frame of type '{frame_type}' has no content")]
    MissingContent { frame_type: String },
}

// ── Inbound ──────────────────────────────────────────────────────────────────

/// Wire shape shared by every frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFrame {
    pub r#type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<serde_json::Value>,
}

/// A decoded inbound frame, classified by its `type` tag.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    ConnSuccess,
    Pong,
    /// Platform event to forward verbatim to the message callback.
    Message {
        frame_type: String,
        content: serde_json::Value,
    },
}

impl InboundFrame {
    /// Decode and classify a text frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let raw: RawFrame = serde_json::from_str(text)?;
        match raw.r#type.as_str() {
            frame_types::CONN_SUCCESS => Ok(Self::ConnSuccess),
            frame_types::PONG => Ok(Self::Pong),
            _ => match raw.content {
                Some(content) => Ok(Self::Message {
                    frame_type: raw.r#type,
                    content,
                }),
                None => Err(FrameError::MissingContent {
                    frame_type: raw.r#type,
                }),
            },
        }
    }
}

// ── Outbound ─────────────────────────────────────────────────────────────────

/// Control frames this process sends to the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundFrame {
    WorldAlive,
}

impl OutboundFrame {
    pub fn to_raw(self) -> RawFrame {
        match self {
            Self::WorldAlive => RawFrame {
                r#type: frame_types::WORLD_ALIVE.into(),
                content: Some(serde_json::json!({
                    "id": "WORLD_ALIVE",
                    "sender_id": "world",
                })),
            },
        }
    }

    pub fn to_json(self) -> String {
        // RawFrame holds only strings and a JSON value; serialization cannot fail.
        serde_json::to_string(&self.to_raw()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use {super::*, rstest::rstest, serde_json::json};

    #[rstest]
    #[case(r#"{"type":"conn_success"}"#, InboundFrame::ConnSuccess)]
    #[case(r#"{"type":"conn_success","content":{"ignored":true}}"#, InboundFrame::ConnSuccess)]
    #[case(r#"{"type":"pong"}"#, InboundFrame::Pong)]
    fn control_frames(#[case] text: &str, #[case] expected: InboundFrame) {
        assert_eq!(InboundFrame::parse(text).unwrap(), expected);
    }

    #[test]
    fn unknown_type_is_forwarded_with_content() {
        let frame =
            InboundFrame::parse(r#"{"type":"message","content":{"update_id":7}}"#).unwrap();
        assert_eq!(frame, InboundFrame::Message {
            frame_type: "message".into(),
            content: json!({"update_id": 7}),
        });
    }

    #[test]
    fn message_without_content_is_rejected() {
        let err = InboundFrame::parse(r#"{"type":"new_packet"}"#).unwrap_err();
        assert!(matches!(err, FrameError::MissingContent { ref frame_type } if frame_type == "new_packet"));
    }

    #[rstest]
    #[case("not json")]
    #[case(r#"{"content":{}}"#)]
    #[case(r#"[1,2,3]"#)]
    fn malformed_frames(#[case] text: &str) {
        assert!(matches!(
            InboundFrame::parse(text),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn world_alive_wire_shape() {
        let value: serde_json::Value =
            serde_json::from_str(&OutboundFrame::WorldAlive.to_json()).unwrap();
        assert_eq!(
            value,
            json!({"type": "world_alive", "content": {"id": "WORLD_ALIVE", "sender_id": "world"}})
        );
    }
}
