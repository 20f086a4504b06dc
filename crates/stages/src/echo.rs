//! Echo demo.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    stagehand_channels::OutboundAction,
    stagehand_routing::{Stage, StageContext, StageFactory},
    stagehand_sessions::ParticipantProxy,
};

pub const DONE_COMMAND: &str = "/done";

pub struct EchoOnboardingFactory;

impl StageFactory for EchoOnboardingFactory {
    fn generate(
        &self,
        _ctx: &StageContext,
        participants: Vec<Arc<ParticipantProxy>>,
    ) -> anyhow::Result<Box<dyn Stage>> {
        Ok(Box::new(EchoOnboarding {
            proxy: crate::single(participants)?,
            done: false,
        }))
    }
}

/// Sends the introduction and finishes.
pub struct EchoOnboarding {
    proxy: Arc<ParticipantProxy>,
    done: bool,
}

#[async_trait]
impl Stage for EchoOnboarding {
    async fn turn(&mut self) -> anyhow::Result<()> {
        self.proxy
            .observe(
                &OutboundAction::new(
                    "Welcome to the onboarding world for our echo bot. The next message you send \
                     will be echoed. Use /done to finish the chat.",
                )
                .with_persona("Onboarding"),
            )
            .await;
        self.done = true;
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.done
    }
}

pub struct EchoTaskFactory;

impl StageFactory for EchoTaskFactory {
    fn assign_roles(&self, participants: &[Arc<ParticipantProxy>]) {
        for proxy in participants {
            proxy.set_role("EchoAgent");
        }
    }

    fn generate(
        &self,
        ctx: &StageContext,
        participants: Vec<Arc<ParticipantProxy>>,
    ) -> anyhow::Result<Box<dyn Stage>> {
        Ok(Box::new(EchoTask {
            proxy: crate::single(participants)?,
            idle: ctx.idle_timeout,
            done: false,
        }))
    }
}

pub struct EchoTask {
    proxy: Arc<ParticipantProxy>,
    idle: Option<Duration>,
    done: bool,
}

#[async_trait]
impl Stage for EchoTask {
    async fn turn(&mut self) -> anyhow::Result<()> {
        let Some(action) = self.proxy.act(self.idle).await else {
            return Ok(());
        };
        let Some(text) = action.trimmed_text() else {
            return Ok(());
        };
        if text.contains(DONE_COMMAND) {
            self.done = true;
        } else {
            self.proxy
                .observe(&OutboundAction::new(text).replying_to(action.message_id))
                .await;
        }
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.done
    }
}
