//! The lobby every participant enters first.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    stagehand_channels::OutboundAction,
    stagehand_routing::{Stage, StageContext, StageFactory, outcomes},
    stagehand_sessions::ParticipantProxy,
    tracing::debug,
};

const PERSONA: &str = "Lobby";

/// Choices offered in the lobby. Each one is also the outcome it reports.
pub const CHOICES: &[&str] = &["begin", "chat", "echo", outcomes::EXIT];

fn menu(lead: &str) -> OutboundAction {
    let listing: Vec<String> = CHOICES.iter().map(|c| format!("    /{c}")).collect();
    OutboundAction::new(format!(
        "{lead} Choose one of the demos from the listed quick replies.\n\nQuick replies:\n{}",
        listing.join("\n")
    ))
    .with_quick_replies(CHOICES.iter().map(|c| format!("/{c}")))
    .with_persona(PERSONA)
}

/// `/begin` → `begin`; anything that is not a listed choice → `None`.
pub fn parse_choice(text: &str) -> Option<&'static str> {
    let choice = text.trim().strip_prefix('/')?;
    CHOICES.iter().copied().find(|c| *c == choice)
}

pub struct LobbyFactory;

impl StageFactory for LobbyFactory {
    fn outcomes(&self) -> &'static [&'static str] {
        CHOICES
    }

    fn generate(
        &self,
        ctx: &StageContext,
        participants: Vec<Arc<ParticipantProxy>>,
    ) -> anyhow::Result<Box<dyn Stage>> {
        Ok(Box::new(Lobby {
            proxy: crate::single(participants)?,
            idle: ctx.idle_timeout,
            greeted: false,
            choice: None,
        }))
    }
}

pub struct Lobby {
    proxy: Arc<ParticipantProxy>,
    idle: Option<Duration>,
    greeted: bool,
    choice: Option<&'static str>,
}

#[async_trait]
impl Stage for Lobby {
    async fn turn(&mut self) -> anyhow::Result<()> {
        if !self.greeted {
            self.greeted = true;
            self.proxy
                .observe(&menu("Welcome to the stagehand demo lobby."))
                .await;
        }
        let Some(action) = self.proxy.act(self.idle).await else {
            return Ok(());
        };
        let text = action.trimmed_text().unwrap_or_default();
        match parse_choice(text) {
            Some(choice) => {
                debug!(participant_id = %self.proxy.id(), choice, "lobby choice");
                self.proxy
                    .observe(
                        &OutboundAction::new(format!("Transferring to /{choice}"))
                            .with_persona(PERSONA),
                    )
                    .await;
                self.choice = Some(choice);
            },
            None => {
                self.proxy.observe(&menu("Invalid option.")).await;
            },
        }
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.choice.is_some()
    }

    fn outcome(&self) -> Option<String> {
        self.choice.map(str::to_string)
    }
}
