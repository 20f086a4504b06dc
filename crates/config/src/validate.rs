//! Semantic validation of a loaded configuration.
//!
//! Stage kinds and outcomes are only checked for shape here; the router
//! checks them against the registered stages at startup.

use std::path::{Path, PathBuf};

use crate::{
    loader::load_config,
    schema::{ProvisionMode, StagehandConfig},
};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "relay.url"
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}] {}", self.severity, self.path, self.message)
    }
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(&mut self, severity: Severity, path: impl Into<String>, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Load and validate the file at `path`. Parse failures become a single
/// error diagnostic.
pub fn validate_file(path: &Path) -> ValidationResult {
    match load_config(path) {
        Ok(config) => {
            let mut result = validate_config(&config);
            result.config_path = Some(path.to_path_buf());
            result
        },
        Err(e) => {
            let mut result = ValidationResult {
                config_path: Some(path.to_path_buf()),
                ..Default::default()
            };
            result.push(Severity::Error, "", e.to_string());
            result
        },
    }
}

/// Validate an already parsed configuration.
pub fn validate_config(config: &StagehandConfig) -> ValidationResult {
    let mut result = ValidationResult::default();
    check_telegram(config, &mut result);
    check_relay(config, &mut result);
    check_provision(config, &mut result);
    check_router(config, &mut result);
    result
}

fn has_scheme(url: &str, schemes: &[&str]) -> bool {
    schemes
        .iter()
        .any(|scheme| url.strip_prefix(scheme).is_some_and(|rest| rest.starts_with("://")))
}

fn check_telegram(config: &StagehandConfig, result: &mut ValidationResult) {
    if !config.telegram.has_token() {
        result.push(
            Severity::Error,
            "telegram.token",
            "bot token is required (set it in the config or via ${TELEGRAM_TOKEN})",
        );
    }
    if !has_scheme(&config.telegram.api_url, &["http", "https"]) {
        result.push(
            Severity::Error,
            "telegram.api_url",
            format!("expected an http(s) URL, got '{}'", config.telegram.api_url),
        );
    }
    if config.telegram.request_timeout_secs == 0 {
        result.push(
            Severity::Error,
            "telegram.request_timeout_secs",
            "must be greater than zero",
        );
    }
}

fn check_relay(config: &StagehandConfig, result: &mut ValidationResult) {
    let relay = &config.relay;
    if let Some(url) = &relay.url
        && !has_scheme(url, &["ws", "wss"])
    {
        result.push(
            Severity::Error,
            "relay.url",
            format!("expected a ws(s) URL, got '{url}'"),
        );
    }
    for (path, value) in [
        ("relay.ping_interval_ms", relay.ping_interval_ms),
        ("relay.probe_interval_ms", relay.probe_interval_ms),
        ("relay.startup_timeout_ms", relay.startup_timeout_ms),
    ] {
        if value == 0 {
            result.push(Severity::Error, path, "must be greater than zero");
        }
    }
    if relay.reconnect_delay_ms == 0 {
        result.push(
            Severity::Warning,
            "relay.reconnect_delay_ms",
            "zero delay reconnects in a tight loop while the relay is down",
        );
    }
}

fn check_provision(config: &StagehandConfig, result: &mut ValidationResult) {
    let provision = &config.provision;
    match provision.mode {
        ProvisionMode::Local if provision.public_url.is_none() => result.push(
            Severity::Error,
            "provision.public_url",
            "local mode needs the public URL of the running relay",
        ),
        ProvisionMode::Hosted if provision.deploy_command.is_none() => result.push(
            Severity::Error,
            "provision.deploy_command",
            "hosted mode needs a deploy command that prints the public URL",
        ),
        _ => {},
    }
    if let Some(url) = &provision.public_url {
        if has_scheme(url, &["http"]) {
            result.push(
                Severity::Warning,
                "provision.public_url",
                "Telegram only delivers webhooks to https URLs",
            );
        } else if !has_scheme(url, &["https"]) {
            result.push(
                Severity::Error,
                "provision.public_url",
                format!("expected an https URL, got '{url}'"),
            );
        }
    }
    if provision.name.trim().is_empty() {
        result.push(Severity::Error, "provision.name", "must not be empty");
    }
    if !provision.webhook_path.starts_with('/') {
        result.push(
            Severity::Warning,
            "provision.webhook_path",
            "should start with '/'",
        );
    }
}

fn check_router(config: &StagehandConfig, result: &mut ValidationResult) {
    let router = &config.router;
    if !router.transitions.contains_key(&router.lobby)
        && !(router.lobby == "lobby:default" && router.transitions.contains_key("lobby"))
    {
        result.push(
            Severity::Error,
            "router.lobby",
            format!("lobby stage '{}' has no transitions", router.lobby),
        );
    }
    if router.idle_timeout_secs == Some(0) {
        result.push(
            Severity::Error,
            "router.idle_timeout_secs",
            "must be greater than zero (omit it to wait forever)",
        );
    }
    if router.turn_interval_ms == 0 {
        result.push(
            Severity::Warning,
            "router.turn_interval_ms",
            "zero interval makes idle stages spin",
        );
    }
    for (kind, outcomes) in &router.transitions {
        if outcomes.is_empty() {
            result.push(
                Severity::Error,
                format!("router.transitions.{kind}"),
                "stage has no outcomes mapped",
            );
        }
        for (outcome, destination) in outcomes {
            if destination.trim().is_empty() {
                result.push(
                    Severity::Error,
                    format!("router.transitions.{kind}.{outcome}"),
                    "destination must not be empty",
                );
            }
        }
    }
}
