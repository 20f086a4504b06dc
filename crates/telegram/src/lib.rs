//! Telegram Bot API adapter.
//!
//! Inbound: raw webhook updates forwarded by the relay are classified and
//! normalized into [`CanonicalAction`](stagehand_channels::CanonicalAction)s.
//! Outbound: a thin client over the Bot API that implements
//! [`ChannelOutbound`](stagehand_channels::ChannelOutbound).

pub mod error;
pub mod handlers;
pub mod outbound;
pub mod types;

pub use {
    error::{Error, Result},
    handlers::{InboundEvent, attachment_kind, classify, decode, normalize},
    outbound::{SendOptions, TELEGRAM_MAX_MESSAGE_LEN, TelegramOutbound},
    types::{RawChat, RawDocument, RawMessage, RawUpdate, RawUser},
};
