//! Free chat between two participants.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    serde_json::Value,
    stagehand_channels::OutboundAction,
    stagehand_routing::{Stage, StageContext, StageFactory, outcomes},
    stagehand_sessions::{ParticipantProxy, Profile},
    tracing::info,
};

use crate::echo::DONE_COMMAND;

pub const DISPLAY_NAME_KEY: &str = "display_name";
const DEFAULT_ROLE: &str = "Agent";

pub struct ChatOnboardingFactory;

impl StageFactory for ChatOnboardingFactory {
    fn generate(
        &self,
        ctx: &StageContext,
        participants: Vec<Arc<ParticipantProxy>>,
    ) -> anyhow::Result<Box<dyn Stage>> {
        Ok(Box::new(ChatOnboarding {
            proxy: crate::single(participants)?,
            idle: ctx.idle_timeout,
            asked: false,
            display_name: None,
        }))
    }
}

/// Asks for a display name used as the persona in the chat.
pub struct ChatOnboarding {
    proxy: Arc<ParticipantProxy>,
    idle: Option<Duration>,
    asked: bool,
    display_name: Option<String>,
}

#[async_trait]
impl Stage for ChatOnboarding {
    async fn turn(&mut self) -> anyhow::Result<()> {
        if !self.asked {
            self.asked = true;
            self.proxy
                .observe(
                    &OutboundAction::new(
                        "Welcome to the onboarding world free chat. Enter your display name.",
                    )
                    .with_persona("Onboarding"),
                )
                .await;
        }
        let Some(action) = self.proxy.act(self.idle).await else {
            return Ok(());
        };
        let Some(name) = action.trimmed_text() else {
            return Ok(());
        };
        self.display_name = Some(name.to_string());
        self.proxy
            .observe(
                &OutboundAction::new(
                    "You will be matched with a random person. Say /done to end the chat.",
                )
                .with_persona("Onboarding"),
            )
            .await;
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.display_name.is_some()
    }

    fn handoff(&self) -> Profile {
        let mut profile = Profile::new();
        if let Some(name) = &self.display_name {
            profile.insert(DISPLAY_NAME_KEY.into(), Value::String(name.clone()));
        }
        profile
    }
}

pub struct ChatTaskFactory;

impl StageFactory for ChatTaskFactory {
    fn participants(&self) -> usize {
        2
    }

    fn outcomes(&self) -> &'static [&'static str] {
        &[outcomes::ADVANCE]
    }

    fn assign_roles(&self, participants: &[Arc<ParticipantProxy>]) {
        for proxy in participants {
            let role = proxy
                .profile_value(DISPLAY_NAME_KEY)
                .and_then(|value| value.as_str().map(str::to_string))
                .unwrap_or_else(|| DEFAULT_ROLE.to_string());
            proxy.set_role(role);
        }
    }

    fn generate(
        &self,
        _ctx: &StageContext,
        participants: Vec<Arc<ParticipantProxy>>,
    ) -> anyhow::Result<Box<dyn Stage>> {
        let pair: [Arc<ParticipantProxy>; 2] = participants
            .try_into()
            .map_err(|p: Vec<_>| anyhow::anyhow!("chat needs 2 participants, got {}", p.len()))?;
        Ok(Box::new(ChatTask {
            pair,
            introduced: false,
            done: false,
        }))
    }
}

pub struct ChatTask {
    pair: [Arc<ParticipantProxy>; 2],
    introduced: bool,
    done: bool,
}

fn role(proxy: &ParticipantProxy) -> String {
    proxy.role().unwrap_or_else(|| DEFAULT_ROLE.to_string())
}

#[async_trait]
impl Stage for ChatTask {
    async fn turn(&mut self) -> anyhow::Result<()> {
        if !self.introduced {
            self.introduced = true;
            for (me, other) in [(0, 1), (1, 0)] {
                let intro = format!("You are now chatting with {}.", role(&self.pair[other]));
                self.pair[me]
                    .observe(&OutboundAction::new(intro).with_persona("World"))
                    .await;
            }
        }

        for (me, other) in [(0, 1), (1, 0)] {
            let Some(action) = self.pair[me].act(None).await else {
                continue;
            };
            let Some(text) = action.trimmed_text() else {
                continue;
            };
            if text.contains(DONE_COMMAND) {
                info!(participant_id = %self.pair[me].id(), "chat ended by participant");
                self.pair[other]
                    .observe(
                        &OutboundAction::new("The other participant has ended the chat.")
                            .with_persona("World"),
                    )
                    .await;
                self.done = true;
                return Ok(());
            }
            self.pair[other]
                .observe(&OutboundAction::new(text).with_persona(role(&self.pair[me])))
                .await;
        }
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.done
    }
}
