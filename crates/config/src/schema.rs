//! Config schema types (telegram, relay, provisioning, router).
use std::collections::BTreeMap;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// `stage kind → (outcome → destination)`, all as raw strings.
///
/// Parsed and checked against the registered stages by the router.
pub type TransitionMap = BTreeMap<String, BTreeMap<String, String>>;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StagehandConfig {
    pub telegram: TelegramConfig,
    pub relay: RelayConfig,
    pub provision: ProvisionConfig,
    pub router: RouterConfig,
}

/// Telegram Bot API settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token from @BotFather.
    #[serde(serialize_with = "serialize_secret")]
    pub token: Secret<String>,

    /// Base URL of the Bot API. Overridable for tests and self-hosted API servers.
    pub api_url: String,

    /// Send a typing indicator as soon as an inbound message is queued.
    pub typing_indicator: bool,

    /// HTTP timeout for a single Bot API call, in seconds.
    pub request_timeout_secs: u64,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("token", &"[REDACTED]")
            .field("api_url", &self.api_url)
            .field("typing_indicator", &self.typing_indicator)
            .finish_non_exhaustive()
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: Secret::new(String::new()),
            api_url: "https://api.telegram.org".into(),
            typing_indicator: true,
            request_timeout_secs: 30,
        }
    }
}

impl TelegramConfig {
    pub fn has_token(&self) -> bool {
        !self.token.expose_secret().trim().is_empty()
    }
}

fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

/// Relay websocket settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Explicit relay URL (`wss://…`). Derived from the public URL when unset.
    pub url: Option<String>,
    /// Fixed pause between reconnect attempts.
    pub reconnect_delay_ms: u64,
    /// Interval between websocket pings.
    pub ping_interval_ms: u64,
    /// Interval between world-alive probes while waiting for `conn_success`.
    pub probe_interval_ms: u64,
    /// How long `start` waits for the relay to acknowledge us.
    pub startup_timeout_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: None,
            reconnect_delay_ms: 200,
            ping_interval_ms: 1_000,
            probe_interval_ms: 800,
            startup_timeout_ms: 30_000,
        }
    }
}

/// Where the public HTTPS endpoint comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionMode {
    /// The relay runs next to this process; its public URL is configured.
    Local,
    /// The relay is deployed by an external command.
    #[default]
    Hosted,
}

impl ProvisionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Hosted => "hosted",
        }
    }
}

impl std::fmt::Display for ProvisionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProvisionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "hosted" => Ok(Self::Hosted),
            other => anyhow::bail!("unknown provision mode: '{other}' (expected local or hosted)"),
        }
    }
}

/// Relay endpoint provisioning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    pub mode: ProvisionMode,
    /// Deployment name; sanitized before use.
    pub name: String,
    /// Public URL of an already running relay (required in local mode).
    pub public_url: Option<String>,
    /// Shell command that deploys the relay and prints its URL last.
    /// `{name}` is replaced with the sanitized deployment name.
    pub deploy_command: Option<String>,
    /// Shell command that tears the deployment down.
    pub destroy_command: Option<String>,
    /// Path appended to the public URL for the webhook registration.
    pub webhook_path: String,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            mode: ProvisionMode::default(),
            name: "stagehand-telegram".into(),
            public_url: None,
            deploy_command: None,
            destroy_command: None,
            webhook_path: "/webhook".into(),
        }
    }
}

/// Session router settings and the stage transition table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Stage kind every new participant enters.
    pub lobby: String,
    /// Pause between two turns of the same stage.
    pub turn_interval_ms: u64,
    /// Inactivity window for stages that wait on input. `None` waits forever.
    pub idle_timeout_secs: Option<u64>,
    /// Whether image attachments reach stage logic.
    pub allow_images: bool,
    pub transitions: TransitionMap,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            lobby: "lobby".into(),
            turn_interval_ms: 100,
            idle_timeout_secs: Some(600),
            allow_images: false,
            transitions: default_transitions(),
        }
    }
}

/// Transitions for the built-in demo stages.
pub fn default_transitions() -> TransitionMap {
    let table: [(&str, &[(&str, &str)]); 7] = [
        ("lobby", &[
            ("begin", "onboarding:default"),
            ("chat", "onboarding:chat"),
            ("echo", "onboarding:echo"),
            ("exit", "terminate"),
        ]),
        ("onboarding:default", &[("advance", "task:default")]),
        ("onboarding:echo", &[("advance", "task:echo")]),
        ("onboarding:chat", &[("advance", "task:chat")]),
        ("task:default", &[("advance", "terminate")]),
        ("task:echo", &[("advance", "terminate")]),
        ("task:chat", &[("advance", "terminate"), ("abandoned", "lobby")]),
    ];
    table
        .into_iter()
        .map(|(kind, outcomes)| {
            let outcomes = outcomes
                .iter()
                .map(|(outcome, dest)| ((*outcome).to_string(), (*dest).to_string()))
                .collect();
            (kind.to_string(), outcomes)
        })
        .collect()
}
