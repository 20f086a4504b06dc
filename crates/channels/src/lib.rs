//! Channel-neutral message types.
//!
//! Platform crates turn their raw updates into [`CanonicalAction`]s and
//! implement [`ChannelOutbound`] so participant proxies can reply without
//! knowing which platform they talk to.

pub mod message;
pub mod plugin;
pub mod recording;

pub use {
    message::{AttachmentKind, CanonicalAction, OutboundAction, SentMessage},
    plugin::ChannelOutbound,
    recording::{RecordedSend, RecordingOutbound},
};
