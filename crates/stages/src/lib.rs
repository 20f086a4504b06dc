//! Built-in demo stages.
//!
//! | kind | what it does |
//! |---|---|
//! | `lobby` | lists the demos and reports the chosen one as its outcome |
//! | `onboarding:default` / `task:default` | collects a name and a color, then repeats them |
//! | `onboarding:echo` / `task:echo` | echoes every message until `/done` |
//! | `onboarding:chat` / `task:chat` | pairs two participants under display names |

pub mod chat;
pub mod data;
pub mod echo;
pub mod lobby;

use std::sync::Arc;

use {
    stagehand_routing::{StageKind, StageRegistry},
    stagehand_sessions::ParticipantProxy,
};

/// Registry with every built-in stage, matching the default transitions.
pub fn builtin_stages() -> StageRegistry {
    let mut stages = StageRegistry::new();
    stages.register(StageKind::lobby(), Arc::new(lobby::LobbyFactory));
    stages.register(
        StageKind::onboarding("default"),
        Arc::new(data::DataOnboardingFactory),
    );
    stages.register(StageKind::task("default"), Arc::new(data::DataTaskFactory));
    stages.register(
        StageKind::onboarding("echo"),
        Arc::new(echo::EchoOnboardingFactory),
    );
    stages.register(StageKind::task("echo"), Arc::new(echo::EchoTaskFactory));
    stages.register(
        StageKind::onboarding("chat"),
        Arc::new(chat::ChatOnboardingFactory),
    );
    stages.register(StageKind::task("chat"), Arc::new(chat::ChatTaskFactory));
    stages
}

/// The participant of a single-participant stage.
fn single(participants: Vec<Arc<ParticipantProxy>>) -> anyhow::Result<Arc<ParticipantProxy>> {
    participants
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("stage started without a participant"))
}
