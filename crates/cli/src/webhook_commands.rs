//! `stagehand webhook`: manage the bot's webhook by hand.

use {
    anyhow::{Context, Result},
    clap::Subcommand,
    stagehand_config::StagehandConfig,
    stagehand_telegram::TelegramOutbound,
};

#[derive(Clone, Subcommand)]
pub enum WebhookAction {
    /// Point the bot's webhook at `url`.
    Set { url: String },
    /// Remove the bot's webhook.
    Delete,
}

pub async fn handle_webhook(config: &StagehandConfig, action: WebhookAction) -> Result<()> {
    crate::require_token(config)?;
    let client = TelegramOutbound::from_config(&config.telegram)?;

    match action {
        WebhookAction::Set { url } => {
            let accepted = client
                .register_webhook(&url)
                .await
                .with_context(|| format!("failed to set webhook to {url}"))?;
            if accepted {
                println!("Webhook set to {url}");
            } else {
                println!("Telegram did not accept the webhook {url}");
            }
        },
        WebhookAction::Delete => {
            let deleted = client
                .delete_webhook()
                .await
                .context("failed to delete webhook")?;
            if deleted {
                println!("Webhook deleted");
            } else {
                println!("Telegram reported no webhook to delete");
            }
        },
    }
    Ok(())
}
