use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};

use {stagehand_config::TransitionMap, tracing::debug};

use crate::{
    error::{Error, Result},
    kind::{Destination, StageKind, outcomes},
    registry::StageRegistry,
    stage::StageFactory,
};

/// `(kind, outcome) → destination`, fixed at startup.
#[derive(Debug, Clone)]
pub struct TransitionTable {
    lobby: StageKind,
    routes: HashMap<StageKind, HashMap<String, Destination>>,
}

impl TransitionTable {
    /// Parse the configured table and check it against the registered stages.
    ///
    /// Every kind named in the table must be registered. Every stage
    /// reachable from the lobby must map each outcome its factory declares,
    /// plus `abandoned` when it needs more than one participant.
    pub fn from_config(lobby: &str, map: &TransitionMap, stages: &StageRegistry) -> Result<Self> {
        let lobby: StageKind = lobby.parse()?;
        let mut routes: HashMap<StageKind, HashMap<String, Destination>> = HashMap::new();

        for (kind, outcomes) in map {
            let kind: StageKind = kind.parse()?;
            ensure_registered(stages, &kind)?;
            let entry = routes.entry(kind).or_default();
            for (outcome, destination) in outcomes {
                let destination: Destination = destination.parse()?;
                if let Destination::Stage(next) = &destination {
                    ensure_registered(stages, next)?;
                }
                entry.insert(outcome.clone(), destination);
            }
        }

        let table = Self { lobby, routes };
        table.check_reachable(stages)?;
        Ok(table)
    }

    fn check_reachable(&self, stages: &StageRegistry) -> Result<()> {
        let mut visited = HashSet::new();
        let mut pending = VecDeque::from([self.lobby.clone()]);
        while let Some(kind) = pending.pop_front() {
            if !visited.insert(kind.clone()) {
                continue;
            }
            let factory = ensure_registered(stages, &kind)?;
            let mut required: Vec<&str> = factory.outcomes().to_vec();
            if factory.participants() > 1 && !required.contains(&outcomes::ABANDONED) {
                required.push(outcomes::ABANDONED);
            }
            for outcome in required {
                if let Destination::Stage(next) = self.next(&kind, outcome)? {
                    pending.push_back(next.clone());
                }
            }
        }
        for kind in stages.list() {
            if !visited.contains(&kind) {
                debug!(stage = %kind, "stage not reachable from the lobby");
            }
        }
        Ok(())
    }

    /// Kind every new participant enters.
    pub fn lobby(&self) -> &StageKind {
        &self.lobby
    }

    pub fn next(&self, kind: &StageKind, outcome: &str) -> Result<&Destination> {
        self.routes
            .get(kind)
            .and_then(|outcomes| outcomes.get(outcome))
            .ok_or_else(|| Error::MissingTransition {
                kind: kind.to_string(),
                outcome: outcome.to_string(),
            })
    }
}

fn ensure_registered(
    stages: &StageRegistry,
    kind: &StageKind,
) -> Result<Arc<dyn StageFactory>> {
    stages.get(kind).ok_or_else(|| Error::UnknownStage {
        kind: kind.to_string(),
    })
}
