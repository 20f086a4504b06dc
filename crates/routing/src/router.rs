//! The session router.
//!
//! New participants enter the lobby. Each stage instance runs on its own
//! task; when it finishes, its participants move on as the transition table
//! says. Stage failures end with the participants of that stage only.

use std::{
    any::Any,
    collections::HashMap,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    futures::{FutureExt, future::select_all},
    stagehand_channels::OutboundAction,
    stagehand_config::RouterConfig,
    stagehand_sessions::{ParticipantProxy, ParticipantRegistry, Profile, Wait},
    tokio::{
        sync::{broadcast, mpsc},
        task::{JoinHandle, JoinSet},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::{
    error::{Error, Result},
    kind::{Destination, StageKind, outcomes},
    registry::StageRegistry,
    stage::{Stage, StageContext, StageFactory},
    table::TransitionTable,
};

/// Sent to a participant disconnected for inactivity.
pub const TIMEOUT_NOTICE: &str = "You have been disconnected due to inactivity.";

/// Sent to a participant waiting for a multi-participant stage to fill up.
pub const WAITING_NOTICE: &str = "Waiting for another participant. Say /exit to leave.";

/// Sent to a waiting participant who left with one of [`LEAVE_COMMANDS`].
pub const LEFT_NOTICE: &str = "You left the waiting room. Send any message to start over.";

/// Commands that take a participant out of a stage pool.
pub const LEAVE_COMMANDS: &[&str] = &["/exit", "/done"];

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterOptions {
    pub turn_interval: Duration,
    pub idle_timeout: Option<Duration>,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self::from_config(&RouterConfig::default())
    }
}

impl RouterOptions {
    pub fn from_config(cfg: &RouterConfig) -> Self {
        Self {
            turn_interval: Duration::from_millis(cfg.turn_interval_ms),
            idle_timeout: cfg.idle_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Lifecycle notifications, mostly for tests and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    Entered {
        participant_id: String,
        kind: StageKind,
    },
    Finished {
        kind: StageKind,
        outcome: String,
        participants: Vec<String>,
    },
    Failed {
        kind: StageKind,
        participants: Vec<String>,
        error: String,
    },
    Terminated {
        participant_id: String,
    },
}

/// How a stage task ended.
enum StageEnd {
    Done { outcome: String, handoff: Profile },
    Disconnected,
    Failed(String),
    Cancelled,
}

/// A pooled participant; `stop` ends its waiter task once a stage takes it.
struct Waiter {
    proxy: Arc<ParticipantProxy>,
    stop: CancellationToken,
}

/// What a pooled participant sent.
enum PoolInput {
    Leave,
    Other,
    Nothing,
}

struct RouterInner {
    stages: StageRegistry,
    table: TransitionTable,
    registry: Arc<ParticipantRegistry>,
    options: RouterOptions,
    /// Participants waiting for a multi-participant stage to fill up.
    pools: Mutex<HashMap<StageKind, Vec<Waiter>>>,
    tasks: Mutex<JoinSet<()>>,
    cancel: CancellationToken,
    events: broadcast::Sender<RouterEvent>,
}

/// Moves participants through stages.
///
/// Cloning is cheap; every clone drives the same router.
#[derive(Clone)]
pub struct SessionRouter {
    inner: Arc<RouterInner>,
}

impl SessionRouter {
    pub fn new(
        stages: StageRegistry,
        table: TransitionTable,
        registry: Arc<ParticipantRegistry>,
        options: RouterOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(RouterInner {
                stages,
                table,
                registry,
                options,
                pools: Mutex::new(HashMap::new()),
                tasks: Mutex::new(JoinSet::new()),
                cancel: CancellationToken::new(),
                events,
            }),
        }
    }

    /// Build the transition table from `cfg` and check it against `stages`.
    pub fn from_config(
        cfg: &RouterConfig,
        stages: StageRegistry,
        registry: Arc<ParticipantRegistry>,
    ) -> Result<Self> {
        let table = TransitionTable::from_config(&cfg.lobby, &cfg.transitions, &stages)?;
        Ok(Self::new(
            stages,
            table,
            registry,
            RouterOptions::from_config(cfg),
        ))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.inner.events.subscribe()
    }

    pub fn table(&self) -> &TransitionTable {
        &self.inner.table
    }

    /// Participants waiting in the pool of `kind`.
    pub fn waiting(&self, kind: &StageKind) -> usize {
        self.pools().get(kind).map_or(0, Vec::len)
    }

    fn pools(&self) -> std::sync::MutexGuard<'_, HashMap<StageKind, Vec<Waiter>>> {
        self.inner.pools.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, JoinSet<()>> {
        self.inner.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn spawn_task(&self, task: impl Future<Output = ()> + Send + 'static) {
        let mut tasks = self.tasks();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(task);
    }

    fn emit(&self, event: RouterEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    /// Admit every participant announced on `arrivals` until the channel
    /// closes or the router shuts down.
    pub fn spawn(&self, mut arrivals: mpsc::UnboundedReceiver<Arc<ParticipantProxy>>) -> JoinHandle<()> {
        let router = self.clone();
        tokio::spawn(async move {
            info!(lobby = %router.inner.table.lobby(), "session router started");
            loop {
                let proxy = tokio::select! {
                    biased;
                    _ = router.inner.cancel.cancelled() => break,
                    proxy = arrivals.recv() => match proxy {
                        Some(proxy) => proxy,
                        None => break,
                    },
                };
                router.admit(proxy);
            }
            info!("session router stopped");
        })
    }

    /// Put a new participant in the lobby.
    pub fn admit(&self, proxy: Arc<ParticipantProxy>) {
        let lobby = self.inner.table.lobby().clone();
        self.enter(lobby, proxy);
    }

    fn enter(&self, kind: StageKind, proxy: Arc<ParticipantProxy>) {
        if self.inner.cancel.is_cancelled() {
            self.terminate(&proxy);
            return;
        }
        let Some(factory) = self.inner.stages.get(&kind) else {
            error!(stage = %kind, participant_id = %proxy.id(), "no stage registered");
            self.terminate(&proxy);
            return;
        };

        debug!(stage = %kind, participant_id = %proxy.id(), "entering stage");
        proxy.reset_idle();
        self.emit(RouterEvent::Entered {
            participant_id: proxy.id().to_string(),
            kind: kind.clone(),
        });

        let needed = factory.participants().max(1);
        let group = {
            let mut pools = self.pools();
            let pool = pools.entry(kind.clone()).or_default();
            pool.retain(|waiting| !waiting.proxy.is_disconnected());
            if pool.len() + 1 < needed {
                let stop = self.inner.cancel.child_token();
                pool.push(Waiter {
                    proxy: Arc::clone(&proxy),
                    stop: stop.clone(),
                });
                debug!(stage = %kind, waiting = pool.len(), needed, "waiting for participants");
                Err(stop)
            } else {
                let mut group: Vec<_> = pool
                    .drain(..needed - 1)
                    .map(|waiting| {
                        waiting.stop.cancel();
                        waiting.proxy
                    })
                    .collect();
                group.push(Arc::clone(&proxy));
                Ok(group)
            }
        };
        match group {
            Ok(group) => self.launch(kind, factory, group),
            Err(stop) => self.spawn_task(self.clone().wait_in_pool(kind, proxy, stop)),
        }
    }

    /// Keep a pooled participant responsive until a stage takes it: leave
    /// commands and the idle timeout end the wait, anything else gets the
    /// waiting notice again.
    async fn wait_in_pool(
        self,
        kind: StageKind,
        proxy: Arc<ParticipantProxy>,
        stop: CancellationToken,
    ) {
        if !stop.is_cancelled() {
            proxy.observe(&OutboundAction::new(WAITING_NOTICE)).await;
        }
        loop {
            let waited = tokio::select! {
                biased;
                _ = stop.cancelled() => return,
                waited = proxy.wait_for_input(self.inner.options.idle_timeout) => waited,
            };
            match waited {
                Wait::Ready => match self.take_pooled_input(&kind, &proxy) {
                    Some(PoolInput::Leave) => {
                        info!(stage = %kind, participant_id = %proxy.id(), "participant left the pool");
                        proxy.observe(&OutboundAction::new(LEFT_NOTICE)).await;
                        self.terminate(&proxy);
                        return;
                    },
                    Some(PoolInput::Other) => {
                        proxy.observe(&OutboundAction::new(WAITING_NOTICE)).await;
                    },
                    Some(PoolInput::Nothing) => {},
                    None => return,
                },
                Wait::TimedOut => {
                    if self.leave_pool(&kind, &proxy) {
                        info!(
                            stage = %kind,
                            participant_id = %proxy.id(),
                            "pooled participant inactive, disconnecting"
                        );
                        proxy.observe(&OutboundAction::new(TIMEOUT_NOTICE)).await;
                        self.terminate(&proxy);
                    }
                    return;
                },
                Wait::Disconnected => {
                    if self.leave_pool(&kind, &proxy) || !stop.is_cancelled() {
                        self.terminate(&proxy);
                    }
                    return;
                },
            }
        }
    }

    /// Pop the next action of a still-pooled participant. Taken under the
    /// pool lock so a stage launch never races the pop; a leave command
    /// removes the participant in the same critical section.
    fn take_pooled_input(
        &self,
        kind: &StageKind,
        proxy: &Arc<ParticipantProxy>,
    ) -> Option<PoolInput> {
        let mut pools = self.pools();
        let pool = pools.get_mut(kind)?;
        let position = pool.iter().position(|w| Arc::ptr_eq(&w.proxy, proxy))?;
        let Some(action) = proxy.take_next() else {
            return Some(PoolInput::Nothing);
        };
        let leaving = action.trimmed_text().is_some_and(|text| {
            LEAVE_COMMANDS
                .iter()
                .any(|command| text.eq_ignore_ascii_case(command))
        });
        if leaving {
            pool.remove(position);
            Some(PoolInput::Leave)
        } else {
            Some(PoolInput::Other)
        }
    }

    /// Remove `proxy` from the pool of `kind`; `false` if it was not there.
    fn leave_pool(&self, kind: &StageKind, proxy: &Arc<ParticipantProxy>) -> bool {
        let mut pools = self.pools();
        let Some(pool) = pools.get_mut(kind) else {
            return false;
        };
        match pool.iter().position(|w| Arc::ptr_eq(&w.proxy, proxy)) {
            Some(position) => {
                pool.remove(position);
                true
            },
            None => false,
        }
    }

    fn launch(
        &self,
        kind: StageKind,
        factory: Arc<dyn StageFactory>,
        participants: Vec<Arc<ParticipantProxy>>,
    ) {
        let ctx = StageContext {
            kind: kind.clone(),
            turn_interval: self.inner.options.turn_interval,
            idle_timeout: self.inner.options.idle_timeout,
        };
        let built = catch_unwind(AssertUnwindSafe(|| {
            factory.assign_roles(&participants);
            factory.generate(&ctx, participants.clone())
        }));
        let stage = match built {
            Ok(Ok(stage)) => stage,
            Ok(Err(e)) => return self.fail(&kind, &participants, &format!("{e:#}")),
            Err(panic) => return self.fail(&kind, &participants, &panic_message(panic.as_ref())),
        };

        for proxy in &participants {
            proxy.reset_idle();
        }
        self.spawn_task(self.clone().run_stage(kind, factory, stage, participants));
    }

    async fn run_stage(
        self,
        kind: StageKind,
        factory: Arc<dyn StageFactory>,
        mut stage: Box<dyn Stage>,
        participants: Vec<Arc<ParticipantProxy>>,
    ) {
        info!(stage = %kind, participants = ?ids(&participants), "stage started");
        let end = self.drive(&mut stage, &participants).await;
        drop(stage);

        match end {
            StageEnd::Done { outcome, handoff } => {
                let declared = factory.outcomes().contains(&outcome.as_str())
                    || (outcome == outcomes::ABANDONED && participants.len() > 1);
                if declared {
                    self.finish(&kind, &outcome, participants, handoff);
                } else {
                    let err = Error::UndeclaredOutcome {
                        kind: kind.to_string(),
                        outcome,
                    };
                    self.fail(&kind, &participants, &err.to_string());
                }
            },
            StageEnd::Disconnected => {
                let (gone, rest): (Vec<_>, Vec<_>) =
                    participants.into_iter().partition(|p| p.is_disconnected());
                info!(stage = %kind, gone = ?ids(&gone), "participant disconnected, stage abandoned");
                for proxy in &gone {
                    self.terminate(proxy);
                }
                if !rest.is_empty() {
                    self.finish(&kind, outcomes::ABANDONED, rest, Profile::new());
                }
            },
            StageEnd::Failed(error) => self.fail(&kind, &participants, &error),
            StageEnd::Cancelled => {
                debug!(stage = %kind, "stage cancelled");
                for proxy in &participants {
                    self.terminate(proxy);
                }
            },
        }
    }

    /// Turn `stage` until it is done, a participant drops out, or it fails.
    async fn drive(
        &self,
        stage: &mut Box<dyn Stage>,
        participants: &[Arc<ParticipantProxy>],
    ) -> StageEnd {
        loop {
            let finished = catch_unwind(AssertUnwindSafe(|| {
                stage
                    .is_done()
                    .then(|| (stage.outcome(), stage.handoff()))
            }));
            match finished {
                Ok(Some((outcome, handoff))) => {
                    return StageEnd::Done {
                        outcome: outcome.unwrap_or_else(|| outcomes::ADVANCE.to_string()),
                        handoff,
                    };
                },
                Ok(None) => {},
                Err(panic) => return StageEnd::Failed(panic_message(panic.as_ref())),
            }

            tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => return StageEnd::Cancelled,
                _ = any_disconnected(participants) => return StageEnd::Disconnected,
                turn = AssertUnwindSafe(stage.turn()).catch_unwind() => match turn {
                    Ok(Ok(())) => {},
                    Ok(Err(e)) => return StageEnd::Failed(format!("{e:#}")),
                    Err(panic) => return StageEnd::Failed(panic_message(panic.as_ref())),
                },
            }

            for proxy in participants {
                if proxy.is_inactive() && !proxy.is_disconnected() {
                    info!(participant_id = %proxy.id(), "participant inactive, disconnecting");
                    proxy.observe(&OutboundAction::new(TIMEOUT_NOTICE)).await;
                    proxy.disconnect();
                }
            }
            if participants.iter().any(|p| p.is_disconnected()) {
                return StageEnd::Disconnected;
            }
            match catch_unwind(AssertUnwindSafe(|| stage.is_done())) {
                Ok(true) => continue,
                Ok(false) => {},
                Err(panic) => return StageEnd::Failed(panic_message(panic.as_ref())),
            }

            tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => return StageEnd::Cancelled,
                () = tokio::time::sleep(self.inner.options.turn_interval) => {},
            }
        }
    }

    fn finish(
        &self,
        kind: &StageKind,
        outcome: &str,
        participants: Vec<Arc<ParticipantProxy>>,
        handoff: Profile,
    ) {
        info!(stage = %kind, outcome, participants = ?ids(&participants), "stage finished");
        self.emit(RouterEvent::Finished {
            kind: kind.clone(),
            outcome: outcome.to_string(),
            participants: ids(&participants),
        });
        if !handoff.is_empty() {
            for proxy in &participants {
                proxy.merge_profile(handoff.clone());
            }
        }

        match self.inner.table.next(kind, outcome) {
            Ok(Destination::Terminate) => {
                for proxy in &participants {
                    self.terminate(proxy);
                }
            },
            Ok(Destination::Stage(next)) => {
                for proxy in participants {
                    self.enter(next.clone(), proxy);
                }
            },
            Err(e) => self.fail(kind, &participants, &e.to_string()),
        }
    }

    fn fail(&self, kind: &StageKind, participants: &[Arc<ParticipantProxy>], error: &str) {
        error!(stage = %kind, participants = ?ids(participants), error = %error, "stage failed");
        self.emit(RouterEvent::Failed {
            kind: kind.clone(),
            participants: ids(participants),
            error: error.to_string(),
        });
        for proxy in participants {
            self.terminate(proxy);
        }
    }

    /// Tear a participant down. A later message from the same id starts a
    /// new participant.
    fn terminate(&self, proxy: &Arc<ParticipantProxy>) {
        proxy.disconnect();
        self.inner.registry.remove(proxy);
        info!(participant_id = %proxy.id(), "participant terminated");
        self.emit(RouterEvent::Terminated {
            participant_id: proxy.id().to_string(),
        });
    }

    /// Cancel every stage task and terminate every participant.
    pub async fn shutdown(&self) {
        info!("shutting down session router");
        self.inner.cancel.cancel();
        loop {
            let mut tasks = std::mem::take(&mut *self.tasks());
            if tasks.is_empty() {
                break;
            }
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "stage task did not finish cleanly");
                }
            }
        }
        let pooled: Vec<_> = self
            .pools()
            .drain()
            .flat_map(|(_, pool)| pool)
            .map(|waiting| waiting.proxy)
            .collect();
        for proxy in &pooled {
            self.terminate(proxy);
        }
        self.inner.registry.disconnect_all();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

async fn any_disconnected(participants: &[Arc<ParticipantProxy>]) {
    if participants.is_empty() {
        return std::future::pending().await;
    }
    select_all(participants.iter().map(|p| Box::pin(p.disconnected()))).await;
}

fn ids(participants: &[Arc<ParticipantProxy>]) -> Vec<String> {
    participants.iter().map(|p| p.id().to_string()).collect()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}
