use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    stagehand_config::RelayConfig,
    stagehand_protocol::OutboundFrame,
    tokio::{sync::mpsc, task::JoinHandle},
    tracing::{debug, info},
};

use crate::{
    Error, Result,
    connection::{Connection, ConnectionStatus, connection_loop},
};

/// Receives the `content` of every non-control relay frame.
///
/// Runs on the connection task: implementations must only hand the value
/// off (e.g. push it into a channel) and return.
pub trait FrameSink: Send + Sync {
    fn deliver(&self, content: serde_json::Value);
}

impl<F> FrameSink for F
where
    F: Fn(serde_json::Value) + Send + Sync,
{
    fn deliver(&self, content: serde_json::Value) {
        self(content)
    }
}

/// Connection settings for the relay endpoint.
#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub url: String,
    pub reconnect_delay: Duration,
    pub ping_interval: Duration,
    pub probe_interval: Duration,
    pub startup_timeout: Duration,
}

impl RelayOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self::from_config(url, &RelayConfig::default())
    }

    pub fn from_config(url: impl Into<String>, config: &RelayConfig) -> Self {
        Self {
            url: url.into(),
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
            ping_interval: Duration::from_millis(config.ping_interval_ms.max(1)),
            probe_interval: Duration::from_millis(config.probe_interval_ms.max(1)),
            startup_timeout: Duration::from_millis(config.startup_timeout_ms),
        }
    }
}

/// Derive the relay websocket URL from the public HTTPS URL of the relay
/// (`https://host` → `wss://host/`, `http://host` → `ws://host/`).
pub fn relay_url_from_public(public_url: &str) -> Option<String> {
    let (scheme, rest) = if let Some(rest) = public_url.strip_prefix("https://") {
        ("wss", rest)
    } else if let Some(rest) = public_url.strip_prefix("http://") {
        ("ws", rest)
    } else {
        return None;
    };
    let host = rest.trim_end_matches('/');
    (!host.is_empty()).then(|| format!("{scheme}://{host}/"))
}

/// Owns the relay connection and its single background task.
pub struct ConnectionManager {
    options: RelayOptions,
    conn: Arc<Connection>,
    sink: Arc<dyn FrameSink>,
    write_tx: mpsc::UnboundedSender<OutboundFrame>,
    write_rx: Mutex<Option<mpsc::UnboundedReceiver<OutboundFrame>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(options: RelayOptions, sink: Arc<dyn FrameSink>) -> Self {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        Self {
            conn: Arc::new(Connection::new(options.url.clone())),
            options,
            sink,
            write_tx,
            write_rx: Mutex::new(Some(write_rx)),
            task: Mutex::new(None),
        }
    }

    /// Shared connection state.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    pub fn is_alive(&self) -> bool {
        self.conn.is_alive()
    }

    /// When the relay last answered a ping.
    pub fn last_heartbeat(&self) -> Option<std::time::Instant> {
        self.conn.last_heartbeat()
    }

    pub fn status(&self) -> tokio::sync::watch::Receiver<ConnectionStatus> {
        self.conn.subscribe()
    }

    /// Spawn the connection task and wait until the relay acknowledges us.
    ///
    /// Re-sends the world-alive probe every `probe_interval` while waiting.
    /// Fails with [`Error::StartupTimeout`] if no acknowledgment arrives in
    /// time (the task keeps trying; call [`stop`](Self::stop) to give up),
    /// or with [`Error::Refused`] if the endpoint refuses the connection.
    pub async fn start(&self) -> Result<()> {
        let write_rx = self
            .write_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(Error::AlreadyStarted)?;
        if !self.conn.is_running() {
            return Err(Error::Stopped);
        }

        let mut status = self.conn.subscribe();
        let handle = tokio::spawn(connection_loop(
            self.options.clone(),
            Arc::clone(&self.conn),
            Arc::clone(&self.sink),
            write_rx,
        ));
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        info!(endpoint = %self.options.url, "relay connection manager started");

        let deadline = tokio::time::Instant::now() + self.options.startup_timeout;
        let mut probe = tokio::time::interval(self.options.probe_interval);
        probe.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        probe.tick().await;

        loop {
            match *status.borrow_and_update() {
                ConnectionStatus::Alive => return Ok(()),
                ConnectionStatus::Refused => {
                    return Err(Error::Refused {
                        endpoint: self.options.url.clone(),
                    });
                },
                ConnectionStatus::Stopped => return Err(Error::Stopped),
                _ => {},
            }

            tokio::select! {
                changed = status.changed() => {
                    if changed.is_err() {
                        return Err(Error::Stopped);
                    }
                },
                _ = probe.tick() => {
                    if !self.conn.is_alive() {
                        self.send_alive_probe();
                    }
                },
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(Error::StartupTimeout {
                        timeout: self.options.startup_timeout,
                    });
                },
            }
        }
    }

    /// Queue a world-alive announcement on the current socket.
    pub fn send_alive_probe(&self) {
        if self.write_tx.send(OutboundFrame::WorldAlive).is_err() {
            debug!("connection task gone, dropping alive probe");
        }
    }

    /// Clear the run flag and close the socket. Idempotent; safe to call
    /// while a reconnect is pending.
    pub fn stop(&self) {
        if self.conn.clear_run_flag() {
            info!(endpoint = %self.options.url, "stopping relay connection");
        }
    }

    /// Resolve once the manager has given up for good.
    ///
    /// Returns [`Error::Refused`] if the endpoint refused the connection and
    /// `Ok(())` after a regular [`stop`](Self::stop).
    pub async fn closed(&self) -> Result<()> {
        let mut status = self.conn.subscribe();
        let terminal = match status.wait_for(|s| s.is_terminal()).await {
            Ok(status) => *status,
            Err(_) => ConnectionStatus::Stopped,
        };
        let handle = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        match terminal {
            ConnectionStatus::Refused => Err(Error::Refused {
                endpoint: self.options.url.clone(),
            }),
            _ => Ok(()),
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.conn.clear_run_flag();
    }
}
