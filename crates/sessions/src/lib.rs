//! Participant sessions.
//!
//! Every remote human is represented by one [`ParticipantProxy`] holding a
//! deduplicating FIFO of inbound actions and a ledger of what was sent to
//! them. The [`ParticipantRegistry`] maps participant ids to live proxies
//! and the [`InboundDispatcher`] feeds decoded relay payloads into it.

pub mod dispatcher;
pub mod proxy;
pub mod queue;
pub mod registry;

pub use {
    dispatcher::{InboundDecoder, InboundDispatcher},
    proxy::{ParticipantProxy, Profile, TEXT_ONLY_NOTICE, Wait},
    queue::DedupQueue,
    registry::{Ingest, ParticipantRegistry, RegistryOptions},
};
