//! Shared error definitions and helpers used across all stagehand crates.

pub mod error;

pub use error::{Error, FromMessage, Result};
