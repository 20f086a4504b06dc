//! Onboarding data demo: onboarding collects a name and a favorite color,
//! the task reads them back.

use std::{sync::Arc, time::Duration};

use {
    anyhow::Context,
    async_trait::async_trait,
    serde_json::Value,
    stagehand_channels::OutboundAction,
    stagehand_routing::{Stage, StageContext, StageFactory},
    stagehand_sessions::{ParticipantProxy, Profile},
};

pub const NAME_KEY: &str = "name";
pub const COLOR_KEY: &str = "color";

/// Steps of the data onboarding. No I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataStep {
    Name,
    Color,
    Done,
}

#[derive(Debug, Clone)]
pub struct DataState {
    pub step: DataStep,
    pub name: Option<String>,
    pub color: Option<String>,
}

impl Default for DataState {
    fn default() -> Self {
        Self::new()
    }
}

impl DataState {
    pub fn new() -> Self {
        Self {
            step: DataStep::Name,
            name: None,
            color: None,
        }
    }

    /// Question for the current step.
    pub fn prompt(&self) -> &str {
        match self.step {
            DataStep::Name => "Welcome to the onboarding data demo.\nEnter your name.",
            DataStep::Color => "Enter your favorite color.",
            DataStep::Done => "Thanks!",
        }
    }

    /// Record the answer to the current step and move on.
    pub fn advance(&mut self, input: &str) {
        match self.step {
            DataStep::Name => {
                self.name = Some(input.to_string());
                self.step = DataStep::Color;
            },
            DataStep::Color => {
                self.color = Some(input.to_string());
                self.step = DataStep::Done;
            },
            DataStep::Done => {},
        }
    }

    pub fn is_done(&self) -> bool {
        self.step == DataStep::Done
    }

    /// Answers keyed for the next stage.
    pub fn profile(&self) -> Profile {
        let mut profile = Profile::new();
        if let Some(name) = &self.name {
            profile.insert(NAME_KEY.into(), Value::String(name.clone()));
        }
        if let Some(color) = &self.color {
            profile.insert(COLOR_KEY.into(), Value::String(color.clone()));
        }
        profile
    }
}

pub struct DataOnboardingFactory;

impl StageFactory for DataOnboardingFactory {
    fn assign_roles(&self, participants: &[Arc<ParticipantProxy>]) {
        for proxy in participants {
            proxy.set_role("Agent");
        }
    }

    fn generate(
        &self,
        ctx: &StageContext,
        participants: Vec<Arc<ParticipantProxy>>,
    ) -> anyhow::Result<Box<dyn Stage>> {
        Ok(Box::new(DataOnboarding {
            proxy: crate::single(participants)?,
            idle: ctx.idle_timeout,
            state: DataState::new(),
            prompted: false,
        }))
    }
}

pub struct DataOnboarding {
    proxy: Arc<ParticipantProxy>,
    idle: Option<Duration>,
    state: DataState,
    /// The prompt for the current step was sent.
    prompted: bool,
}

#[async_trait]
impl Stage for DataOnboarding {
    async fn turn(&mut self) -> anyhow::Result<()> {
        if !self.prompted {
            self.prompted = true;
            self.proxy
                .observe(&OutboundAction::new(self.state.prompt()).with_persona("Onboarding"))
                .await;
        }
        let Some(action) = self.proxy.act(self.idle).await else {
            return Ok(());
        };
        if let Some(text) = action.trimmed_text() {
            self.state.advance(text);
            self.prompted = false;
        }
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.state.is_done()
    }

    fn handoff(&self) -> Profile {
        self.state.profile()
    }
}

pub struct DataTaskFactory;

impl StageFactory for DataTaskFactory {
    fn assign_roles(&self, participants: &[Arc<ParticipantProxy>]) {
        for proxy in participants {
            proxy.set_role("DataAgent");
        }
    }

    fn generate(
        &self,
        _ctx: &StageContext,
        participants: Vec<Arc<ParticipantProxy>>,
    ) -> anyhow::Result<Box<dyn Stage>> {
        Ok(Box::new(DataTask {
            proxy: crate::single(participants)?,
            done: false,
        }))
    }
}

pub struct DataTask {
    proxy: Arc<ParticipantProxy>,
    done: bool,
}

impl DataTask {
    fn answer(&self, key: &str) -> anyhow::Result<String> {
        self.proxy
            .profile_value(key)
            .and_then(|value| value.as_str().map(str::to_string))
            .with_context(|| format!("participant has no onboarding '{key}'"))
    }
}

#[async_trait]
impl Stage for DataTask {
    async fn turn(&mut self) -> anyhow::Result<()> {
        let name = self.answer(NAME_KEY)?;
        let color = self.answer(COLOR_KEY)?;
        self.proxy
            .observe(
                &OutboundAction::new(format!(
                    "During onboarding, you said your name was {name} and your favorite color \
                     was {color}"
                ))
                .with_persona("World"),
            )
            .await;
        self.done = true;
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.done
    }
}
