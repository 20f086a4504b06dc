//! In-memory outbound adapter that records every send.
//!
//! Used for dry runs and as the channel behind stage and router tests.

use std::sync::{
    Mutex,
    atomic::{AtomicBool, AtomicI64, Ordering},
};

use {anyhow::Result, async_trait::async_trait, tracing::debug};

use crate::{
    message::{OutboundAction, SentMessage},
    plugin::ChannelOutbound,
};

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedSend {
    Text {
        chat_id: String,
        action: OutboundAction,
    },
    Typing {
        chat_id: String,
    },
}

#[derive(Debug, Default)]
pub struct RecordingOutbound {
    sends: Mutex<Vec<RecordedSend>>,
    next_id: AtomicI64,
    failing: AtomicBool,
}

impl RecordingOutbound {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following send fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sends(&self) -> Vec<RecordedSend> {
        self.sends.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Rendered texts sent to `chat_id`, in order.
    pub fn texts_to(&self, chat_id: &str) -> Vec<String> {
        self.sends
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter_map(|send| match send {
                RecordedSend::Text { chat_id: to, action } if to == chat_id => {
                    Some(action.rendered_text())
                },
                _ => None,
            })
            .collect()
    }

    pub fn typing_count(&self, chat_id: &str) -> usize {
        self.sends
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|send| matches!(send, RecordedSend::Typing { chat_id: to } if to == chat_id))
            .count()
    }

    fn record(&self, send: RecordedSend) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("recording outbound set to fail");
        }
        self.sends
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(send);
        Ok(())
    }
}

#[async_trait]
impl ChannelOutbound for RecordingOutbound {
    async fn send_text(&self, chat_id: &str, action: &OutboundAction) -> Result<SentMessage> {
        debug!(chat_id, text = %action.rendered_text(), "recording outbound text");
        self.record(RecordedSend::Text {
            chat_id: chat_id.to_string(),
            action: action.clone(),
        })?;
        let message_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SentMessage {
            message_id: Some(message_id),
            raw: serde_json::json!({ "message_id": message_id }),
        })
    }

    async fn send_typing(&self, chat_id: &str) -> Result<()> {
        self.record(RecordedSend::Typing {
            chat_id: chat_id.to_string(),
        })
    }
}
