use std::{collections::HashMap, sync::Arc};

use crate::{kind::StageKind, stage::StageFactory};

/// Stage factories by kind.
#[derive(Default, Clone)]
pub struct StageRegistry {
    factories: HashMap<StageKind, Arc<dyn StageFactory>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: StageKind, factory: Arc<dyn StageFactory>) {
        self.factories.insert(kind, factory);
    }

    pub fn get(&self, kind: &StageKind) -> Option<Arc<dyn StageFactory>> {
        self.factories.get(kind).cloned()
    }

    pub fn contains(&self, kind: &StageKind) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn list(&self) -> Vec<StageKind> {
        let mut kinds: Vec<_> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRegistry")
            .field("kinds", &self.list())
            .finish()
    }
}
