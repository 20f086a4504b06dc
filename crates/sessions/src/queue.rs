use std::collections::{HashSet, VecDeque};

use stagehand_channels::CanonicalAction;

/// Per-participant inbound queue that drops re-delivered message ids.
///
/// The seen set only grows: an id that was consumed stays a duplicate for
/// the participant's lifetime.
#[derive(Debug, Default)]
pub struct DedupQueue {
    seen: HashSet<i64>,
    queue: VecDeque<CanonicalAction>,
}

impl DedupQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `action` unless its message id was already seen.
    ///
    /// Returns `false` for duplicates.
    pub fn offer(&mut self, action: CanonicalAction) -> bool {
        if !self.seen.insert(action.message_id) {
            return false;
        }
        self.queue.push_back(action);
        true
    }

    /// Oldest queued action.
    pub fn pop(&mut self) -> Option<CanonicalAction> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }
}
