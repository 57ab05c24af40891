//! Bounded per-session memory of recently published command ids.

use std::collections::{HashMap, VecDeque};

use crate::domain::GripperAction;

/// What a window knows about an incoming `(id, action)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recall {
    /// The id is not in the window.
    New,
    /// The id is in the window with the same action.
    Replay,
    /// The id is in the window with a different action.
    Conflict,
}

/// Remembers the last `capacity` command ids of one session together with
/// the action each one carried.
///
/// Insertion order is tracked so the oldest id is forgotten first once
/// the window is full.
#[derive(Debug, Clone)]
pub struct DedupWindow {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashMap<String, GripperAction>,
}

impl DedupWindow {
    /// Creates an empty window holding at most `capacity` ids (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashMap::with_capacity(capacity),
        }
    }

    /// Returns `true` if `id` is still inside the window.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains_key(id)
    }

    /// Classifies `(id, action)` against the window.
    #[must_use]
    pub fn recall(&self, id: &str, action: &GripperAction) -> Recall {
        match self.seen.get(id) {
            None => Recall::New,
            Some(known) if known == action => Recall::Replay,
            Some(_) => Recall::Conflict,
        }
    }

    /// Records `id`, evicting the oldest entry when full. Recording an id
    /// already present is a no-op.
    pub fn record(&mut self, id: &str, action: GripperAction) {
        if self.seen.contains_key(id) {
            return;
        }
        if self.order.len() >= self.capacity
            && let Some(evicted) = self.order.pop_front()
        {
            self.seen.remove(&evicted);
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string(), action);
    }

    /// Forgets `id` so the next command carrying it counts as new.
    pub fn forget(&mut self, id: &str) {
        if self.seen.remove(id).is_some() {
            self.order.retain(|known| known != id);
        }
    }

    /// Number of ids currently remembered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
