use std::{fmt, str::FromStr};

use crate::error::{Error, Result};

/// Well-known outcome tokens.
pub mod outcomes {
    pub const ADVANCE: &str = "advance";
    pub const EXIT: &str = "exit";
    pub const ABANDONED: &str = "abandoned";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    Lobby,
    Onboarding,
    Task,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lobby => "lobby",
            Self::Onboarding => "onboarding",
            Self::Task => "task",
        }
    }
}

impl FromStr for Phase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lobby" => Ok(Self::Lobby),
            "onboarding" => Ok(Self::Onboarding),
            "task" => Ok(Self::Task),
            other => Err(Error::invalid_kind(
                other,
                "phase must be lobby, onboarding or task",
            )),
        }
    }
}

/// A stage type, written `phase:variant`.
///
/// A bare phase name means the `default` variant, so `lobby` and
/// `lobby:default` are the same kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageKind {
    pub phase: Phase,
    pub variant: String,
}

impl StageKind {
    pub const DEFAULT_VARIANT: &'static str = "default";

    pub fn new(phase: Phase, variant: impl Into<String>) -> Self {
        Self {
            phase,
            variant: variant.into(),
        }
    }

    pub fn lobby() -> Self {
        Self::new(Phase::Lobby, Self::DEFAULT_VARIANT)
    }

    pub fn onboarding(variant: impl Into<String>) -> Self {
        Self::new(Phase::Onboarding, variant)
    }

    pub fn task(variant: impl Into<String>) -> Self {
        Self::new(Phase::Task, variant)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.phase.as_str(), self.variant)
    }
}

impl FromStr for StageKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (phase, variant) = match s.split_once(':') {
            Some((phase, variant)) => (phase, variant),
            None => (s, Self::DEFAULT_VARIANT),
        };
        let phase = phase
            .parse()
            .map_err(|_| Error::invalid_kind(s, "phase must be lobby, onboarding or task"))?;
        if variant.is_empty() {
            return Err(Error::invalid_kind(s, "variant is empty"));
        }
        if variant.contains(':') {
            return Err(Error::invalid_kind(s, "expected phase:variant"));
        }
        Ok(Self::new(phase, variant))
    }
}

/// Where a participant goes after a stage finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Stage(StageKind),
    Terminate,
}

impl Destination {
    pub const TERMINATE: &'static str = "terminate";
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stage(kind) => kind.fmt(f),
            Self::Terminate => f.write_str(Self::TERMINATE),
        }
    }
}

impl FromStr for Destination {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim() == Self::TERMINATE {
            return Ok(Self::Terminate);
        }
        s.parse().map(Self::Stage)
    }
}
