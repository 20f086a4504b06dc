use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Instant,
};

use {
    futures::{SinkExt, StreamExt},
    stagehand_protocol::{InboundFrame, OutboundFrame},
    tokio::sync::{mpsc, watch},
    tokio_tungstenite::{connect_async, tungstenite::Message},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    Result,
    manager::{FrameSink, RelayOptions},
};

/// Lifecycle of the relay connection as seen by its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Created, `start` not called yet.
    Idle,
    /// Opening a socket or waiting for `conn_success`.
    Connecting,
    Alive,
    /// Socket lost; a reconnect is pending.
    Disconnected,
    /// The endpoint refused the connection; the manager gave up.
    Refused,
    /// Stopped by the owner.
    Stopped,
}

impl ConnectionStatus {
    /// Whether the connection will never come back.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Refused | Self::Stopped)
    }
}

/// Shared connection state. One instance per manager; the background task
/// and the owner both hold an `Arc` to it.
pub struct Connection {
    endpoint: String,
    alive: AtomicBool,
    running: AtomicBool,
    last_heartbeat: Mutex<Option<Instant>>,
    sockets_opened: AtomicU64,
    alive_transitions: AtomicU64,
    status: watch::Sender<ConnectionStatus>,
    pub(crate) shutdown: CancellationToken,
}

impl Connection {
    pub(crate) fn new(endpoint: impl Into<String>) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Idle);
        Self {
            endpoint: endpoint.into(),
            alive: AtomicBool::new(false),
            running: AtomicBool::new(true),
            last_heartbeat: Mutex::new(None),
            sockets_opened: AtomicU64::new(0),
            alive_transitions: AtomicU64::new(0),
            status,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn last_heartbeat(&self) -> Option<Instant> {
        *self
            .last_heartbeat
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Number of sockets successfully opened over the connection's lifetime.
    pub fn sockets_opened(&self) -> u64 {
        self.sockets_opened.load(Ordering::SeqCst)
    }

    /// Number of times the connection went from not alive to alive.
    pub fn alive_transitions(&self) -> u64 {
        self.alive_transitions.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Clear the run flag. Returns `true` only for the call that cleared it.
    pub(crate) fn clear_run_flag(&self) -> bool {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        if was_running {
            self.shutdown.cancel();
        }
        was_running
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_if_modified(|current| {
            // Terminal states stick.
            if current.is_terminal() || *current == status {
                return false;
            }
            *current = status;
            true
        });
    }

    fn mark_alive(&self) {
        if !self.alive.swap(true, Ordering::SeqCst) {
            self.alive_transitions.fetch_add(1, Ordering::SeqCst);
            info!(endpoint = %self.endpoint, "relay connection alive");
            self.set_status(ConnectionStatus::Alive);
        }
    }

    fn mark_disconnected(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.set_status(ConnectionStatus::Disconnected);
    }

    fn mark_refused(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        self.set_status(ConnectionStatus::Refused);
    }

    fn mark_stopped(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.set_status(ConnectionStatus::Stopped);
    }

    fn touch_heartbeat(&self) {
        let mut last = self
            .last_heartbeat
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *last = Some(Instant::now());
    }
}

/// How one socket session ended.
enum SessionEnd {
    /// The relay closed the socket.
    Closed,
    /// The run flag was cleared.
    Stopped,
}

/// Main connection loop: connect, serve, and reconnect after a fixed delay
/// until the run flag is cleared or the endpoint refuses us.
pub(crate) async fn connection_loop(
    options: RelayOptions,
    conn: Arc<Connection>,
    sink: Arc<dyn FrameSink>,
    mut write_rx: mpsc::UnboundedReceiver<OutboundFrame>,
) {
    while conn.is_running() {
        conn.set_status(ConnectionStatus::Connecting);
        debug!(endpoint = %conn.endpoint, "connecting to relay");

        match connect_and_run(&options, &conn, sink.as_ref(), &mut write_rx).await {
            Ok(SessionEnd::Stopped) => break,
            Ok(SessionEnd::Closed) => {
                info!(endpoint = %conn.endpoint, "relay closed the connection");
            },
            Err(e) if e.is_refused() => {
                warn!(endpoint = %conn.endpoint, error = %e, "relay refused connection, giving up");
                conn.mark_refused();
                return;
            },
            Err(e) => {
                warn!(endpoint = %conn.endpoint, error = %e, "relay connection error, restarting");
            },
        }

        conn.mark_disconnected();
        tokio::select! {
            _ = conn.shutdown.cancelled() => break,
            _ = tokio::time::sleep(options.reconnect_delay) => {},
        }
    }

    conn.mark_stopped();
    info!(endpoint = %conn.endpoint, "relay connection stopped");
}

/// Single socket session: connect, announce, then serve frames.
async fn connect_and_run(
    options: &RelayOptions,
    conn: &Connection,
    sink: &dyn FrameSink,
    write_rx: &mut mpsc::UnboundedReceiver<OutboundFrame>,
) -> Result<SessionEnd> {
    let (ws_stream, _response) = tokio::select! {
        _ = conn.shutdown.cancelled() => return Ok(SessionEnd::Stopped),
        connected = connect_async(options.url.as_str()) => connected?,
    };
    conn.sockets_opened.fetch_add(1, Ordering::SeqCst);
    debug!(endpoint = %conn.endpoint, "relay socket open");
    let (mut ws_sink, mut ws_reader) = ws_stream.split();

    // Probes queued while no socket was open are stale.
    while write_rx.try_recv().is_ok() {}
    ws_sink
        .send(Message::Text(OutboundFrame::WorldAlive.to_json().into()))
        .await?;

    let mut ping = tokio::time::interval(options.ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping.tick().await;

    loop {
        tokio::select! {
            _ = conn.shutdown.cancelled() => {
                let _ = ws_sink.send(Message::Close(None)).await;
                return Ok(SessionEnd::Stopped);
            },
            msg = ws_reader.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => dispatch(conn, sink, &text),
                    Some(Ok(Message::Pong(_))) => conn.touch_heartbeat(),
                    Some(Ok(Message::Ping(data))) => {
                        ws_sink.send(Message::Pong(data)).await?;
                    },
                    Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Closed),
                    Some(Ok(_)) => {},
                    Some(Err(e)) => return Err(e.into()),
                }
            },
            frame = write_rx.recv() => {
                match frame {
                    Some(frame) => {
                        ws_sink.send(Message::Text(frame.to_json().into())).await?;
                    },
                    None => {
                        let _ = ws_sink.send(Message::Close(None)).await;
                        return Ok(SessionEnd::Stopped);
                    },
                }
            },
            _ = ping.tick() => {
                ws_sink.send(Message::Ping(Vec::new().into())).await?;
            },
        }
    }
}

fn dispatch(conn: &Connection, sink: &dyn FrameSink, text: &str) {
    match InboundFrame::parse(text) {
        Ok(InboundFrame::ConnSuccess) => conn.mark_alive(),
        Ok(InboundFrame::Pong) => conn.touch_heartbeat(),
        Ok(InboundFrame::Message {
            frame_type,
            content,
        }) => {
            debug!(frame_type, "relay message received");
            sink.deliver(content);
        },
        Err(e) => warn!(endpoint = %conn.endpoint, error = %e, "dropping relay frame"),
    }
}
