//! Hosted provisioning through shell commands.

use std::{process::Stdio, time::Duration};

use {
    async_trait::async_trait,
    stagehand_config::ProvisionMode,
    tokio::process::Command,
    tracing::{debug, info, warn},
};

use crate::{
    Provisioner, sanitize_app_name,
    error::{Context, Error, Result},
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Runs `deploy` (and later `destroy`) through `sh -c`, with `{name}`
/// replaced by the sanitized deployment name.
#[derive(Debug, Clone)]
pub struct CommandProvisioner {
    deploy: String,
    destroy: Option<String>,
    timeout: Duration,
}

impl CommandProvisioner {
    pub fn new(deploy: impl Into<String>, destroy: Option<String>) -> Self {
        Self {
            deploy: deploy.into(),
            destroy,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, template: &str, name: &str) -> Result<String> {
        let command = template.replace("{name}", &sanitize_app_name(name));
        debug!(cmd = %command, "running provision command");

        let child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context(format!("failed to spawn `{command}`"))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::Timeout {
                command: command.clone(),
                secs: self.timeout.as_secs(),
            })??;

        if !output.status.success() {
            return Err(Error::CommandFailed {
                command,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// The last non-empty line of `stdout`, if it is an `http(s)` URL.
pub fn last_url_line(stdout: &str) -> Option<&str> {
    let line = stdout.lines().map(str::trim).rfind(|l| !l.is_empty())?;
    (line.starts_with("https://") || line.starts_with("http://"))
        .then(|| line.trim_end_matches('/'))
}

#[async_trait]
impl Provisioner for CommandProvisioner {
    async fn provision(&self, name: &str, _mode: ProvisionMode) -> anyhow::Result<String> {
        let stdout = self.run(&self.deploy, name).await?;
        let url = last_url_line(&stdout).ok_or_else(|| Error::NoUrl {
            command: self.deploy.clone(),
            line: stdout.lines().last().unwrap_or_default().to_string(),
        })?;
        info!(name, url, "relay deployed");
        Ok(url.to_string())
    }

    async fn deprovision(&self, name: &str, _mode: ProvisionMode) -> anyhow::Result<()> {
        let Some(destroy) = &self.destroy else {
            warn!(name, "no destroy command configured, leaving deployment up");
            return Ok(());
        };
        self.run(destroy, name).await?;
        info!(name, "relay torn down");
        Ok(())
    }
}
