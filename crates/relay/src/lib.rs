//! Persistent, self-healing websocket connection to the relay endpoint.
//!
//! The [`ConnectionManager`] owns exactly one background task that connects,
//! announces this process, keeps heartbeats flowing, and reconnects after
//! every transport failure until it is stopped. Platform events carried by
//! the relay are handed to a [`FrameSink`].

pub mod connection;
pub mod error;
pub mod manager;

pub use {
    connection::{Connection, ConnectionStatus},
    error::{Error, Result},
    manager::{ConnectionManager, FrameSink, RelayOptions, relay_url_from_public},
};
