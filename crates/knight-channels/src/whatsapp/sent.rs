//! Ids of messages we sent, so their echoes are not treated as inbound.

use std::collections::{HashSet, VecDeque};

/// Most ids kept. Reports to another account are never echoed back, so
/// without a cap the set would grow for the life of the process.
pub(super) const SENT_ID_CAPACITY: usize = 1024;

/// Bounded set of sent message ids; the oldest id is forgotten first.
pub(super) struct SentIds {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl SentIds {
    pub(super) fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            ids: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    pub(super) fn insert(&mut self, id: String) {
        if !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    /// Forget `id`, returning whether it was one of ours.
    pub(super) fn take(&mut self, id: &str) -> bool {
        if !self.ids.remove(id) {
            return false;
        }
        self.order.retain(|known| known != id);
        true
    }

    #[cfg(test)]
    pub(super) fn len(&self) -> usize {
        self.ids.len()
    }
}

impl Default for SentIds {
    fn default() -> Self {
        Self::new(SENT_ID_CAPACITY)
    }
}
