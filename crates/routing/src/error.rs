use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid stage kind '{kind}': {reason}")]
    InvalidKind { kind: String, reason: String },

    #[error("no stage registered for '{kind}'")]
    UnknownStage { kind: String },

    #[error("stage '{kind}' has no transition for outcome '{outcome}'")]
    MissingTransition { kind: String, outcome: String },

    #[error("stage '{kind}' emitted outcome '{outcome}' it never declared")]
    UndeclaredOutcome { kind: String, outcome: String },
}

impl Error {
    #[must_use]
    pub fn invalid_kind(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKind {
            kind: kind.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
