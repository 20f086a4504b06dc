//! Public endpoint provisioning.
//!
//! - **Local**: the relay already runs somewhere reachable; its URL comes
//!   from the config.
//! - **Hosted**: a configured deploy command brings the relay up and prints
//!   its URL; a destroy command tears it down.

pub mod command;
pub mod error;
pub mod local;

use {
    async_trait::async_trait,
    stagehand_config::{ProvisionConfig, ProvisionMode},
};

pub use {
    command::{CommandProvisioner, last_url_line},
    error::{Error, Result},
    local::LocalProvisioner,
};

/// Maximum length of a deployment name.
pub const MAX_APP_NAME_LEN: usize = 30;

#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Bring the endpoint up and return its public base URL.
    async fn provision(&self, name: &str, mode: ProvisionMode) -> anyhow::Result<String>;
    /// Tear down what [`provision`](Self::provision) set up.
    async fn deprovision(&self, name: &str, mode: ProvisionMode) -> anyhow::Result<()>;
}

/// Lowercase, `[a-z0-9-]` only (other characters are dropped), at most
/// [`MAX_APP_NAME_LEN`] characters and no trailing `-`.
pub fn sanitize_app_name(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .map(|c| c.to_ascii_lowercase())
        .take(MAX_APP_NAME_LEN)
        .collect();
    kept.trim_end_matches('-').to_string()
}

/// Picks the local or hosted provisioner by mode.
pub struct ConfiguredProvisioner {
    local: LocalProvisioner,
    hosted: Option<CommandProvisioner>,
}

impl ConfiguredProvisioner {
    pub fn from_config(cfg: &ProvisionConfig) -> Self {
        Self {
            local: LocalProvisioner::new(cfg.public_url.clone()),
            hosted: cfg
                .deploy_command
                .clone()
                .map(|deploy| CommandProvisioner::new(deploy, cfg.destroy_command.clone())),
        }
    }

    fn hosted(&self) -> Result<&CommandProvisioner> {
        self.hosted.as_ref().ok_or(Error::MissingSetting {
            setting: "deploy_command",
            mode: ProvisionMode::Hosted.to_string(),
        })
    }
}

#[async_trait]
impl Provisioner for ConfiguredProvisioner {
    async fn provision(&self, name: &str, mode: ProvisionMode) -> anyhow::Result<String> {
        match mode {
            ProvisionMode::Local => self.local.provision(name, mode).await,
            ProvisionMode::Hosted => self.hosted()?.provision(name, mode).await,
        }
    }

    async fn deprovision(&self, name: &str, mode: ProvisionMode) -> anyhow::Result<()> {
        match mode {
            ProvisionMode::Local => self.local.deprovision(name, mode).await,
            ProvisionMode::Hosted => self.hosted()?.deprovision(name, mode).await,
        }
    }
}
