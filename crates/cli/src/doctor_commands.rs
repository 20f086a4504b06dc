//! `stagehand doctor`: config validation and startup readiness.
//!
//! Prints a report with `[ok]`, `[warn]`, `[fail]` or `[info]` per item.

use std::path::Path;

use {
    anyhow::Result,
    stagehand_config::{
        ProvisionMode, Severity, StagehandConfig, ValidationResult, validate_config, validate_file,
    },
    stagehand_provision::sanitize_app_name,
    stagehand_relay::relay_url_from_public,
    stagehand_routing::TransitionTable,
    stagehand_stages::builtin_stages,
};

// ── ANSI helpers ────────────────────────────────────────────────────────────

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Ok,
    Warn,
    Fail,
    Info,
}

impl Status {
    fn label(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Warn => "warn",
            Self::Fail => "fail",
            Self::Info => "info",
        }
    }

    fn color(self) -> &'static str {
        match self {
            Self::Ok => GREEN,
            Self::Warn => YELLOW,
            Self::Fail => RED,
            Self::Info => CYAN,
        }
    }
}

struct CheckItem {
    status: Status,
    message: String,
}

struct Section {
    title: String,
    items: Vec<CheckItem>,
}

impl Section {
    fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            items: Vec::new(),
        }
    }

    fn push(&mut self, status: Status, message: impl Into<String>) {
        self.items.push(CheckItem {
            status,
            message: message.into(),
        });
    }

    fn count(&self, status: Status) -> usize {
        self.items.iter().filter(|i| i.status == status).count()
    }
}

fn print_report(sections: &[Section]) -> (usize, usize) {
    let mut errors = 0usize;
    let mut warnings = 0usize;

    for section in sections {
        eprintln!("{BOLD}{}{RESET}", section.title);
        for item in &section.items {
            let color = item.status.color();
            let label = item.status.label();
            eprintln!("  [{color}{label}{RESET}]  {}", item.message);
        }
        errors += section.count(Status::Fail);
        warnings += section.count(Status::Warn);
        eprintln!();
    }

    (errors, warnings)
}

pub fn handle_doctor(config_path: Option<&Path>) -> Result<()> {
    eprintln!("{BOLD}stagehand doctor{RESET}");
    eprintln!("{BOLD}================{RESET}\n");

    let path = config_path
        .map(Path::to_path_buf)
        .or_else(stagehand_config::find_config_file);
    let (result, config) = match &path {
        Some(path) => (
            validate_file(path),
            stagehand_config::load_config(path).unwrap_or_default(),
        ),
        None => {
            let config = StagehandConfig::default();
            (validate_config(&config), config)
        },
    };

    let sections = vec![
        check_config(path.as_deref(), &result),
        check_stages(&config),
        check_endpoints(&config),
    ];
    let (errors, warnings) = print_report(&sections);

    eprintln!("{BOLD}Summary:{RESET} {errors} error(s), {warnings} warning(s)");
    if errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn check_config(path: Option<&Path>, result: &ValidationResult) -> Section {
    let label = path.map_or_else(|| "defaults".to_string(), |p| p.display().to_string());
    let mut section = Section::new(format!("Config ({label})"));

    if result.diagnostics.is_empty() {
        section.push(Status::Ok, "No issues found");
    }
    for d in &result.diagnostics {
        let status = match d.severity {
            Severity::Error => Status::Fail,
            Severity::Warning => Status::Warn,
        };
        if d.path.is_empty() {
            section.push(status, d.message.clone());
        } else {
            section.push(status, format!("{}: {}", d.path, d.message));
        }
    }
    section
}

/// The transition table must cover every outcome of the built-in stages.
fn check_stages(config: &StagehandConfig) -> Section {
    let mut section = Section::new("Stages");
    let stages = builtin_stages();
    let kinds: Vec<String> = stages.list().iter().map(ToString::to_string).collect();
    section.push(Status::Info, format!("Registered: {}", kinds.join(", ")));

    match TransitionTable::from_config(&config.router.lobby, &config.router.transitions, &stages) {
        Ok(table) => section.push(
            Status::Ok,
            format!("Transition table complete (lobby {})", table.lobby()),
        ),
        Err(e) => section.push(Status::Fail, e.to_string()),
    }
    section
}

fn check_endpoints(config: &StagehandConfig) -> Section {
    let mut section = Section::new("Endpoints");
    let provision = &config.provision;
    section.push(
        Status::Info,
        format!(
            "Provision mode {} as '{}'",
            provision.mode,
            sanitize_app_name(&provision.name)
        ),
    );

    match (&config.relay.url, &provision.public_url) {
        (Some(url), _) => section.push(Status::Ok, format!("Relay URL {url}")),
        (None, Some(public)) => match relay_url_from_public(public) {
            Some(url) => section.push(Status::Ok, format!("Relay URL {url} (derived)")),
            None => section.push(
                Status::Fail,
                format!("Cannot derive a relay URL from {public}"),
            ),
        },
        (None, None) if provision.mode == ProvisionMode::Hosted => section.push(
            Status::Info,
            "Relay URL will be derived from the deployed URL",
        ),
        (None, None) => section.push(
            Status::Fail,
            "No relay.url and no provision.public_url to derive it from",
        ),
    }

    if config.telegram.has_token() {
        section.push(Status::Ok, "Bot token set");
    } else {
        section.push(Status::Fail, "Bot token missing (telegram.token)");
    }
    section
}
