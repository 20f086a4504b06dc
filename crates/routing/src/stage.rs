use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    stagehand_sessions::{ParticipantProxy, Profile},
};

use crate::kind::{StageKind, outcomes};

/// Settings a factory receives when building a stage instance.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub kind: StageKind,
    /// Pause the router takes between two turns.
    pub turn_interval: Duration,
    /// Inactivity window stages pass to [`ParticipantProxy::act`].
    pub idle_timeout: Option<Duration>,
}

/// A running stage instance.
///
/// The router calls [`turn`](Self::turn) until [`is_done`](Self::is_done)
/// is true, then reads the outcome and the handoff.
#[async_trait]
pub trait Stage: Send {
    /// Advance the stage by one step.
    async fn turn(&mut self) -> anyhow::Result<()>;

    fn is_done(&self) -> bool;

    /// Outcome token once done. `None` means [`outcomes::ADVANCE`].
    fn outcome(&self) -> Option<String> {
        None
    }

    /// Profile data merged into every participant before the next stage.
    fn handoff(&self) -> Profile {
        Profile::new()
    }
}

/// Builds instances of one stage kind.
pub trait StageFactory: Send + Sync {
    /// Participants one instance needs.
    fn participants(&self) -> usize {
        1
    }

    /// Every outcome an instance may report.
    fn outcomes(&self) -> &'static [&'static str] {
        &[outcomes::ADVANCE]
    }

    /// Called once per instance before [`generate`](Self::generate).
    fn assign_roles(&self, _participants: &[Arc<ParticipantProxy>]) {}

    fn generate(
        &self,
        ctx: &StageContext,
        participants: Vec<Arc<ParticipantProxy>>,
    ) -> anyhow::Result<Box<dyn Stage>>;
}
