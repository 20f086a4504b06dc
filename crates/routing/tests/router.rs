#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    serde_json::Value,
    stagehand_channels::{CanonicalAction, ChannelOutbound, OutboundAction, RecordingOutbound},
    stagehand_config::TransitionMap,
    stagehand_routing::{
        LEFT_NOTICE, RouterEvent, RouterOptions, SessionRouter, Stage, StageContext, StageFactory,
        StageKind, StageRegistry, TIMEOUT_NOTICE, TransitionTable, WAITING_NOTICE, outcomes,
    },
    stagehand_sessions::{ParticipantProxy, ParticipantRegistry, Profile, RegistryOptions},
    tokio::sync::broadcast,
};

#[derive(Clone, Copy, PartialEq)]
enum Mode {
    Normal,
    PanicOnTurn,
    PanicOnDoneCheck,
    FailGenerate,
}

/// Greets its participants, echoes plain text and finishes on `/<outcome>`.
struct Commands {
    outcomes: &'static [&'static str],
    participants: usize,
    mode: Mode,
}

impl Commands {
    fn new(outcomes: &'static [&'static str]) -> Self {
        Self {
            outcomes,
            participants: 1,
            mode: Mode::Normal,
        }
    }
}

impl StageFactory for Commands {
    fn participants(&self) -> usize {
        self.participants
    }

    fn outcomes(&self) -> &'static [&'static str] {
        self.outcomes
    }

    fn assign_roles(&self, participants: &[Arc<ParticipantProxy>]) {
        for (i, proxy) in participants.iter().enumerate() {
            proxy.set_role(format!("player{i}"));
        }
    }

    fn generate(
        &self,
        ctx: &StageContext,
        participants: Vec<Arc<ParticipantProxy>>,
    ) -> anyhow::Result<Box<dyn Stage>> {
        if self.mode == Mode::FailGenerate {
            anyhow::bail!("no stage today");
        }
        Ok(Box::new(CommandStage {
            kind: ctx.kind.clone(),
            idle: ctx.idle_timeout,
            participants,
            panic_on_turn: self.mode == Mode::PanicOnTurn,
            panic_on_done_check: self.mode == Mode::PanicOnDoneCheck,
            turns: 0,
            greeted: false,
            outcome: None,
            handoff: Profile::new(),
        }))
    }
}

struct CommandStage {
    kind: StageKind,
    idle: Option<Duration>,
    participants: Vec<Arc<ParticipantProxy>>,
    panic_on_turn: bool,
    /// Panics in `is_done` once a turn has run.
    panic_on_done_check: bool,
    turns: usize,
    greeted: bool,
    outcome: Option<String>,
    handoff: Profile,
}

#[async_trait]
impl Stage for CommandStage {
    async fn turn(&mut self) -> anyhow::Result<()> {
        assert!(!self.panic_on_turn, "stage blew up");
        self.turns += 1;
        if !self.greeted {
            self.greeted = true;
            for proxy in &self.participants {
                let greeting = match proxy.profile_value("last") {
                    Some(Value::String(last)) => format!("in {} last={last}", self.kind),
                    _ => format!("in {}", self.kind),
                };
                proxy.observe(&OutboundAction::new(greeting)).await;
            }
        }
        for proxy in &self.participants {
            let Some(action) = proxy.act(self.idle).await else {
                continue;
            };
            let text = action.trimmed_text().unwrap_or_default().to_string();
            if let Some(command) = text.strip_prefix('/') {
                self.outcome = Some(command.to_string());
                return Ok(());
            }
            self.handoff.insert("last".into(), Value::String(text.clone()));
            proxy.observe(&OutboundAction::new(format!("echo {text}"))).await;
        }
        Ok(())
    }

    fn is_done(&self) -> bool {
        assert!(
            !(self.panic_on_done_check && self.turns > 0),
            "done check blew up"
        );
        self.outcome.is_some()
    }

    fn outcome(&self) -> Option<String> {
        self.outcome.clone()
    }

    fn handoff(&self) -> Profile {
        self.handoff.clone()
    }
}

fn stages() -> StageRegistry {
    let mut stages = StageRegistry::new();
    stages.register(
        StageKind::lobby(),
        Arc::new(Commands::new(&[
            "begin", "boom", "fragile", "broken", "pair", "exit",
        ])),
    );
    stages.register(
        StageKind::onboarding("default"),
        Arc::new(Commands::new(&[outcomes::ADVANCE])),
    );
    stages.register(
        StageKind::task("default"),
        Arc::new(Commands::new(&[outcomes::ADVANCE])),
    );
    stages.register(
        StageKind::task("boom"),
        Arc::new(Commands {
            mode: Mode::PanicOnTurn,
            ..Commands::new(&[outcomes::ADVANCE])
        }),
    );
    stages.register(
        StageKind::task("fragile"),
        Arc::new(Commands {
            mode: Mode::PanicOnDoneCheck,
            ..Commands::new(&[outcomes::ADVANCE])
        }),
    );
    stages.register(
        StageKind::task("broken"),
        Arc::new(Commands {
            mode: Mode::FailGenerate,
            ..Commands::new(&[outcomes::ADVANCE])
        }),
    );
    stages.register(
        StageKind::task("pair"),
        Arc::new(Commands {
            participants: 2,
            ..Commands::new(&[outcomes::ADVANCE])
        }),
    );
    stages
}

fn transitions() -> TransitionMap {
    let table: [(&str, &[(&str, &str)]); 7] = [
        ("lobby", &[
            ("begin", "onboarding:default"),
            ("boom", "task:boom"),
            ("fragile", "task:fragile"),
            ("broken", "task:broken"),
            ("pair", "task:pair"),
            ("exit", "terminate"),
        ]),
        ("onboarding:default", &[("advance", "task:default")]),
        ("task:default", &[("advance", "terminate")]),
        ("task:boom", &[("advance", "terminate")]),
        ("task:fragile", &[("advance", "terminate")]),
        ("task:broken", &[("advance", "terminate")]),
        ("task:pair", &[("advance", "terminate"), ("abandoned", "lobby")]),
    ];
    table
        .into_iter()
        .map(|(kind, outcomes)| {
            let outcomes: BTreeMap<String, String> = outcomes
                .iter()
                .map(|(o, d)| ((*o).to_string(), (*d).to_string()))
                .collect();
            (kind.to_string(), outcomes)
        })
        .collect()
}

struct Harness {
    router: SessionRouter,
    registry: Arc<ParticipantRegistry>,
    outbound: Arc<RecordingOutbound>,
    events: broadcast::Receiver<RouterEvent>,
}

impl Harness {
    fn new(idle_timeout: Option<Duration>) -> Self {
        let outbound = Arc::new(RecordingOutbound::new());
        let channel: Arc<dyn ChannelOutbound> = outbound.clone();
        let (registry, arrivals) = ParticipantRegistry::new(channel, RegistryOptions::default());
        let registry = Arc::new(registry);

        let stages = stages();
        let table = TransitionTable::from_config("lobby", &transitions(), &stages).unwrap();
        let router = SessionRouter::new(stages, table, Arc::clone(&registry), RouterOptions {
            turn_interval: Duration::from_millis(10),
            idle_timeout,
        });
        let events = router.subscribe();
        router.spawn(arrivals);
        Self {
            router,
            registry,
            outbound,
            events,
        }
    }

    fn send(&self, participant: &str, messages: &[(i64, &str)]) {
        for (id, text) in messages {
            self.registry
                .ingest(CanonicalAction::text(*id, participant, *text));
        }
    }

    /// Collect events until `done` matches one.
    async fn until(&mut self, mut done: impl FnMut(&RouterEvent) -> bool) -> Vec<RouterEvent> {
        let mut seen = Vec::new();
        tokio::time::timeout(Duration::from_secs(60), async {
            loop {
                let event = self.events.recv().await.unwrap();
                let stop = done(&event);
                seen.push(event);
                if stop {
                    break;
                }
            }
        })
        .await
        .expect("router event");
        seen
    }

    async fn until_terminated(&mut self, participant: &str) -> Vec<RouterEvent> {
        self.until(|e| matches!(e, RouterEvent::Terminated { participant_id } if participant_id == participant))
            .await
    }
}

fn entered(events: &[RouterEvent], participant: &str) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            RouterEvent::Entered {
                participant_id,
                kind,
            } if participant_id == participant => Some(kind.to_string()),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn exit_from_lobby_terminates_without_onboarding() {
    let mut h = Harness::new(None);
    h.send("1", &[(1, "/exit")]);

    let events = h.until_terminated("1").await;
    assert_eq!(entered(&events, "1"), ["lobby:default"]);
    assert!(events.contains(&RouterEvent::Finished {
        kind: StageKind::lobby(),
        outcome: "exit".into(),
        participants: vec!["1".into()],
    }));
    assert_eq!(h.outbound.texts_to("1"), ["in lobby:default"]);
    assert!(h.registry.get("1").is_none());
}

#[tokio::test(start_paused = true)]
async fn begin_walks_onboarding_then_task_with_handoff() {
    let mut h = Harness::new(None);
    h.send("1", &[
        (1, "/begin"),
        (2, "alice"),
        (3, "/advance"),
        (4, "/advance"),
    ]);

    let events = h.until_terminated("1").await;
    assert_eq!(entered(&events, "1"), [
        "lobby:default",
        "onboarding:default",
        "task:default"
    ]);
    assert_eq!(h.outbound.texts_to("1"), [
        "in lobby:default",
        "in onboarding:default",
        "echo alice",
        "in task:default last=alice",
    ]);
}

#[tokio::test(start_paused = true)]
async fn panicking_stage_only_ends_its_participants() {
    let mut h = Harness::new(None);
    h.send("a", &[(1, "/boom")]);
    h.send("b", &[
        (1, "/begin"),
        (2, "bob"),
        (3, "/advance"),
        (4, "/advance"),
    ]);

    let mut terminated = 0;
    let events = h
        .until(|e| {
            if matches!(e, RouterEvent::Terminated { .. }) {
                terminated += 1;
            }
            terminated == 2
        })
        .await;

    let failed: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            RouterEvent::Failed {
                kind,
                participants,
                error,
            } => Some((kind.clone(), participants.clone(), error.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, StageKind::task("boom"));
    assert_eq!(failed[0].1, ["a"]);
    assert!(failed[0].2.contains("stage blew up"), "{}", failed[0].2);

    assert!(
        h.outbound
            .texts_to("b")
            .contains(&"in task:default last=bob".to_string())
    );
    assert!(h.registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn panicking_done_check_after_a_turn_terminates_participant() {
    let mut h = Harness::new(None);
    h.send("1", &[(1, "/fragile")]);

    let events = h.until_terminated("1").await;
    assert!(events.iter().any(|e| matches!(
        e,
        RouterEvent::Failed { kind, participants, error }
            if *kind == StageKind::task("fragile")
                && participants == &["1"]
                && error.contains("done check blew up")
    )));
    assert!(h.registry.get("1").is_none());
}

#[tokio::test(start_paused = true)]
async fn generate_failure_terminates_participant() {
    let mut h = Harness::new(None);
    h.send("1", &[(1, "/broken")]);

    let events = h.until_terminated("1").await;
    assert!(events.iter().any(|e| matches!(
        e,
        RouterEvent::Failed { kind, error, .. }
            if *kind == StageKind::task("broken") && error.contains("no stage today")
    )));
}

#[tokio::test(start_paused = true)]
async fn undeclared_outcome_is_a_stage_failure() {
    let mut h = Harness::new(None);
    h.send("1", &[(1, "/dance")]);

    let events = h.until_terminated("1").await;
    assert!(events.iter().any(|e| matches!(
        e,
        RouterEvent::Failed { kind, error, .. }
            if *kind == StageKind::lobby() && error.contains("never declared")
    )));
}

#[tokio::test(start_paused = true)]
async fn terminated_participant_starts_over_in_the_lobby() {
    let mut h = Harness::new(None);
    h.send("1", &[(1, "/exit")]);
    h.until_terminated("1").await;

    h.send("1", &[(1, "/exit")]);
    let events = h.until_terminated("1").await;
    assert_eq!(entered(&events, "1"), ["lobby:default"]);
    assert_eq!(h.outbound.texts_to("1"), [
        "in lobby:default",
        "in lobby:default"
    ]);
}

#[tokio::test(start_paused = true)]
async fn disconnect_abandons_a_shared_stage() {
    let mut h = Harness::new(None);
    h.send("p1", &[(1, "/pair")]);
    h.send("p2", &[(1, "/pair")]);

    let mut paired = 0;
    h.until(|e| {
        if matches!(e, RouterEvent::Entered { kind, .. } if *kind == StageKind::task("pair")) {
            paired += 1;
        }
        paired == 2
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.router.waiting(&StageKind::task("pair")), 0);
    assert!(h.registry.get("p1").unwrap().role().is_some());

    h.registry.get("p1").unwrap().disconnect();

    let events = h
        .until(|e| matches!(e, RouterEvent::Entered { participant_id, kind } if participant_id == "p2" && *kind == StageKind::lobby()))
        .await;
    assert!(events.contains(&RouterEvent::Terminated {
        participant_id: "p1".into()
    }));
    assert!(events.contains(&RouterEvent::Finished {
        kind: StageKind::task("pair"),
        outcome: outcomes::ABANDONED.into(),
        participants: vec!["p2".into()],
    }));
    assert!(h.registry.get("p2").is_some());
}

#[tokio::test(start_paused = true)]
async fn inactive_participant_is_disconnected() {
    let mut h = Harness::new(Some(Duration::from_secs(5)));
    h.send("idle", &[(1, "hello")]);

    let started = tokio::time::Instant::now();
    h.until_terminated("idle").await;
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!(h.outbound.texts_to("idle"), [
        "in lobby:default",
        "echo hello",
        TIMEOUT_NOTICE,
    ]);
}

#[tokio::test(start_paused = true)]
async fn shutdown_terminates_waiting_and_running_participants() {
    let mut h = Harness::new(None);
    h.send("alone", &[(1, "/pair")]);
    h.send("lobby", &[(1, "hi")]);
    h.until(|e| matches!(e, RouterEvent::Entered { kind, .. } if *kind == StageKind::task("pair")))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.router.waiting(&StageKind::task("pair")), 1);

    let alone = h.registry.get("alone").unwrap();
    let lobby = h.registry.get("lobby").unwrap();
    h.router.shutdown().await;

    assert!(h.router.is_shut_down());
    assert!(alone.is_disconnected());
    assert!(lobby.is_disconnected());
    assert!(h.registry.is_empty());
    assert_eq!(h.router.waiting(&StageKind::task("pair")), 0);
}

#[tokio::test(start_paused = true)]
async fn lone_pooled_participant_times_out() {
    let mut h = Harness::new(Some(Duration::from_secs(5)));
    let started = tokio::time::Instant::now();
    h.send("alone", &[(1, "/pair")]);

    let events = h.until_terminated("alone").await;
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!(entered(&events, "alone"), ["lobby:default", "task:pair"]);
    assert_eq!(h.outbound.texts_to("alone"), [
        "in lobby:default",
        WAITING_NOTICE,
        TIMEOUT_NOTICE,
    ]);
    assert_eq!(h.router.waiting(&StageKind::task("pair")), 0);
    assert!(h.registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn pooled_participant_can_leave() {
    let mut h = Harness::new(None);
    h.send("alone", &[(1, "/pair")]);
    h.until(|e| matches!(e, RouterEvent::Entered { kind, .. } if *kind == StageKind::task("pair")))
        .await;

    h.send("alone", &[(2, "anyone?"), (3, "/exit")]);
    h.until_terminated("alone").await;
    assert_eq!(h.outbound.texts_to("alone"), [
        "in lobby:default",
        WAITING_NOTICE,
        WAITING_NOTICE,
        LEFT_NOTICE,
    ]);
    assert_eq!(h.router.waiting(&StageKind::task("pair")), 0);
    assert!(h.registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn pooled_participant_left_waiting_gets_a_fresh_window_in_the_stage() {
    let mut h = Harness::new(Some(Duration::from_secs(5)));
    h.send("p1", &[(1, "/pair")]);
    h.until(|e| matches!(e, RouterEvent::Entered { kind, .. } if *kind == StageKind::task("pair")))
        .await;
    tokio::time::sleep(Duration::from_secs(4)).await;

    h.send("p2", &[(1, "/pair")]);
    let mut paired = 0;
    h.until(|e| {
        if matches!(e, RouterEvent::Entered { kind, .. } if *kind == StageKind::task("pair")) {
            paired += 1;
        }
        paired == 1
    })
    .await;
    tokio::time::sleep(Duration::from_secs(3)).await;
    // p1 waited 4s in the pool; the stage window started at launch.
    assert!(!h.registry.get("p1").unwrap().is_disconnected());
    assert!(!h.outbound.texts_to("p1").contains(&TIMEOUT_NOTICE.to_string()));
}
