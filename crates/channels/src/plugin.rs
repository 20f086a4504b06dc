use {anyhow::Result, async_trait::async_trait};

use crate::message::{OutboundAction, SentMessage};

/// Send messages to a channel.
#[async_trait]
pub trait ChannelOutbound: Send + Sync {
    /// Deliver one message to `chat_id`. Exactly one platform call, no retries.
    async fn send_text(&self, chat_id: &str, action: &OutboundAction) -> Result<SentMessage>;

    /// Send a "typing" indicator. No-op by default.
    async fn send_typing(&self, _chat_id: &str) -> Result<()> {
        Ok(())
    }
}
