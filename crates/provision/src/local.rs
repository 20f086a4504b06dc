use {async_trait::async_trait, stagehand_config::ProvisionMode, tracing::info};

use crate::{Error, Provisioner};

/// Returns the configured public URL; nothing to set up or tear down.
#[derive(Debug, Clone, Default)]
pub struct LocalProvisioner {
    public_url: Option<String>,
}

impl LocalProvisioner {
    pub fn new(public_url: Option<String>) -> Self {
        Self { public_url }
    }
}

#[async_trait]
impl Provisioner for LocalProvisioner {
    async fn provision(&self, name: &str, _mode: ProvisionMode) -> anyhow::Result<String> {
        let url = self
            .public_url
            .as_deref()
            .map(|url| url.trim().trim_end_matches('/'))
            .filter(|url| !url.is_empty())
            .ok_or(Error::MissingSetting {
                setting: "public_url",
                mode: ProvisionMode::Local.to_string(),
            })?;
        info!(name, url, "using local relay");
        Ok(url.to_string())
    }

    async fn deprovision(&self, _name: &str, _mode: ProvisionMode) -> anyhow::Result<()> {
        Ok(())
    }
}
