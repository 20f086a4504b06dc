mod doctor_commands;
mod run;
mod webhook_commands;

use std::path::PathBuf;

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    stagehand_config::StagehandConfig,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "stagehand", about = "Stagehand: scripted conversation stages over Telegram")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (default: discovered in ./ then the user config dir).
    #[arg(long, global = true, env = "STAGEHAND_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Use `provision.public_url` instead of deploying the relay.
    #[arg(long, global = true, default_value_t = false)]
    local: bool,

    /// Skip provisioning and webhook setup; `relay.url` must be set.
    #[arg(long, global = true, default_value_t = false)]
    bypass_server_setup: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge (default when no subcommand is provided).
    Run,
    /// Config validation and startup readiness.
    Doctor,
    /// Webhook management.
    Webhook {
        #[command(subcommand)]
        action: webhook_commands::WebhookAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

pub(crate) fn require_token(config: &StagehandConfig) -> anyhow::Result<()> {
    if !config.telegram.has_token() {
        anyhow::bail!(
            "no bot token configured: set telegram.token (e.g. token = \"${{TELEGRAM_BOT_TOKEN}}\")"
        );
    }
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<StagehandConfig> {
    match &cli.config {
        Some(path) => stagehand_config::load_config(path)
            .with_context(|| format!("failed to load {}", path.display())),
        None => Ok(stagehand_config::discover_and_load()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    match cli.command {
        None | Some(Commands::Run) => {
            info!(version = env!("CARGO_PKG_VERSION"), "stagehand starting");
            let config = load_config(&cli)?;
            run::run(config, run::RunOptions {
                local: cli.local,
                bypass_server_setup: cli.bypass_server_setup,
            })
            .await
        },
        Some(Commands::Doctor) => doctor_commands::handle_doctor(cli.config.as_deref()),
        Some(Commands::Webhook { ref action }) => {
            let config = load_config(&cli)?;
            webhook_commands::handle_webhook(&config, action.clone()).await
        },
    }
}
