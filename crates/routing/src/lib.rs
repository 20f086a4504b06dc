//! Stage routing.
//!
//! A participant walks `lobby → onboarding(kind) → task(kind)` and is then
//! terminated, or leaves the lobby for termination directly. Which stage
//! follows which is decided by the [`TransitionTable`]: each finished stage
//! reports an outcome token and `(kind, outcome)` selects the destination.
//!
//! The [`SessionRouter`] only sees stages through the [`Stage`] and
//! [`StageFactory`] interfaces registered in a [`StageRegistry`].

pub mod error;
pub mod kind;
pub mod registry;
pub mod router;
pub mod stage;
pub mod table;

pub use {
    error::{Error, Result},
    kind::{Destination, Phase, StageKind, outcomes},
    registry::StageRegistry,
    router::{
        LEAVE_COMMANDS, LEFT_NOTICE, RouterEvent, RouterOptions, SessionRouter, TIMEOUT_NOTICE,
        WAITING_NOTICE,
    },
    stage::{Stage, StageContext, StageFactory},
    table::TransitionTable,
};
