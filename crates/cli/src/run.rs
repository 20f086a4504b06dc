//! `stagehand run`: provision, connect, route until stopped, tear down.

use std::sync::Arc;

use {
    anyhow::{Context, Result},
    serde_json::Value,
    stagehand_channels::ChannelOutbound,
    stagehand_config::{ProvisionMode, StagehandConfig},
    stagehand_provision::{ConfiguredProvisioner, Provisioner, sanitize_app_name},
    stagehand_relay::{ConnectionManager, FrameSink, RelayOptions, relay_url_from_public},
    stagehand_routing::SessionRouter,
    stagehand_sessions::{InboundDispatcher, ParticipantRegistry, RegistryOptions},
    stagehand_stages::builtin_stages,
    stagehand_telegram::TelegramOutbound,
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Use the configured public URL instead of deploying.
    pub local: bool,
    /// Skip provisioning, webhook registration and teardown.
    pub bypass_server_setup: bool,
}

/// Deployment brought up by this run.
struct Deployment {
    name: String,
    mode: ProvisionMode,
    public_url: String,
}

pub async fn run(mut config: StagehandConfig, opts: RunOptions) -> Result<()> {
    if opts.local {
        config.provision.mode = ProvisionMode::Local;
    }
    crate::require_token(&config)?;

    let outbound = Arc::new(TelegramOutbound::from_config(&config.telegram)?);
    let channel: Arc<dyn ChannelOutbound> = outbound.clone();
    let (registry, arrivals) = ParticipantRegistry::new(channel, RegistryOptions {
        allow_images: config.router.allow_images,
    });
    let registry = Arc::new(registry);
    let router = SessionRouter::from_config(&config.router, builtin_stages(), Arc::clone(&registry))
        .context("invalid router.transitions")?;

    let provisioner = ConfiguredProvisioner::from_config(&config.provision);
    let deployment = if opts.bypass_server_setup {
        info!("bypassing server setup");
        None
    } else {
        let name = sanitize_app_name(&config.provision.name);
        let mode = config.provision.mode;
        let public_url = provisioner
            .provision(&name, mode)
            .await
            .with_context(|| format!("failed to provision '{name}' ({mode})"))?;
        Some(Deployment {
            name,
            mode,
            public_url,
        })
    };

    let result = bridge(&config, &outbound, &registry, &router, arrivals, deployment.as_ref()).await;

    router.shutdown().await;
    if let Some(deployment) = &deployment
        && let Err(e) = provisioner
            .deprovision(&deployment.name, deployment.mode)
            .await
    {
        error!(name = %deployment.name, error = %e, "failed to tear down deployment");
    }
    info!("stagehand stopped");
    result
}

/// Register the webhook, connect to the relay and serve until ctrl-c or
/// until the relay connection is lost for good.
async fn bridge(
    config: &StagehandConfig,
    outbound: &TelegramOutbound,
    registry: &Arc<ParticipantRegistry>,
    router: &SessionRouter,
    arrivals: mpsc::UnboundedReceiver<Arc<stagehand_sessions::ParticipantProxy>>,
    deployment: Option<&Deployment>,
) -> Result<()> {
    let relay_url = config
        .relay
        .url
        .clone()
        .or_else(|| deployment.and_then(|d| relay_url_from_public(&d.public_url)))
        .context("relay.url is not set and there is no public URL to derive it from")?;

    if let Some(deployment) = deployment {
        let webhook = format!("{}{}", deployment.public_url, config.provision.webhook_path);
        let accepted = outbound
            .register_webhook(&webhook)
            .await
            .with_context(|| format!("failed to register webhook {webhook}"))?;
        if accepted {
            info!(url = %webhook, "webhook registered");
        } else {
            warn!(url = %webhook, "Telegram did not accept the webhook");
        }
    }

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Value>();
    let sink: Arc<dyn FrameSink> = Arc::new(move |content: Value| {
        if inbound_tx.send(content).is_err() {
            debug!("dispatcher gone, dropping relay payload");
        }
    });
    let manager = ConnectionManager::new(RelayOptions::from_config(relay_url, &config.relay), sink);

    let cancel = CancellationToken::new();
    let dispatcher = InboundDispatcher::new(Arc::clone(registry), Arc::new(stagehand_telegram::decode))
        .with_typing_indicator(config.telegram.typing_indicator);
    let dispatcher_task = tokio::spawn(dispatcher.run(inbound_rx, cancel.clone()));
    let arrivals_task = router.spawn(arrivals);

    let result = serve(&manager).await;

    manager.stop();
    cancel.cancel();
    if let Err(e) = manager.closed().await {
        debug!(error = %e, "relay connection closed");
    }
    let _ = dispatcher_task.await;
    arrivals_task.abort();
    result
}

async fn serve(manager: &ConnectionManager) -> Result<()> {
    match manager.start().await {
        Ok(()) => info!("relay connection alive"),
        Err(stagehand_relay::Error::StartupTimeout { timeout }) => {
            warn!(?timeout, "relay has not acknowledged us yet, still trying");
        },
        Err(e) => return Err(e).context("relay connection failed"),
    }
    info!("stagehand running, press ctrl-c to stop");

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            info!("shutdown requested");
            Ok(())
        },
        closed = manager.closed() => closed.context("relay connection lost"),
    }
}
