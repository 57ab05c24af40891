//! Last-known gripper state with lock-free snapshot reads.
//!
//! [`StateCache`] stores an `Arc<GripperState>` behind an [`ArcSwap`].
//! Updates replace the whole snapshot atomically, so readers never see
//! a partially written state and never block the writer.

use std::sync::Arc;

use arc_swap::ArcSwap;

use super::GripperState;

/// Authoritative last-known gripper state.
///
/// Cheap to clone; all clones share the same slot. The bus client's
/// telemetry path is the only writer.
#[derive(Debug, Clone)]
pub struct StateCache {
    current: Arc<ArcSwap<GripperState>>,
}

impl StateCache {
    /// Creates a cache holding the [`GripperState::unknown`] sentinel.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(GripperState::unknown())),
        }
    }

    /// Applies `state` if its sequence is newer than the cached one.
    ///
    /// Returns the stored snapshot when accepted and `None` on a
    /// stale-drop.
    pub fn update(&self, state: GripperState) -> Option<Arc<GripperState>> {
        let candidate = Arc::new(state);
        let mut current = self.current.load();
        loop {
            if candidate.sequence <= current.sequence {
                tracing::debug!(
                    sequence = candidate.sequence,
                    cached = current.sequence,
                    "stale state dropped"
                );
                return None;
            }
            let previous = self
                .current
                .compare_and_swap(&current, Arc::clone(&candidate));
            if Arc::ptr_eq(&previous, &current) {
                return Some(candidate);
            }
            current = previous;
        }
    }

    /// Returns the current snapshot, or the unknown sentinel before the
    /// first telemetry message.
    #[must_use]
    pub fn read(&self) -> Arc<GripperState> {
        self.current.load_full()
    }

    /// Sequence of the current snapshot (0 while unknown).
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.current.load().sequence
    }
}

impl Default for StateCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GripperStatus;

    fn state(sequence: u64, position: f64) -> GripperState {
        GripperState {
            position,
            effort: 0.0,
            status: GripperStatus::Idle,
            timestamp: sequence as f64,
            sequence,
        }
    }

    #[test]
    fn starts_with_sentinel() {
        let cache = StateCache::new();
        assert!(cache.read().is_unknown());
        assert_eq!(cache.sequence(), 0);
    }

    #[test]
    fn newer_sequence_is_applied() {
        let cache = StateCache::new();
        assert!(cache.update(state(1, 0.1)).is_some());
        assert!(cache.update(state(2, 0.2)).is_some());
        assert_eq!(cache.sequence(), 2);
    }

    #[test]
    fn stale_or_equal_sequence_is_dropped() {
        let cache = StateCache::new();
        let _ = cache.update(state(5, 0.5));
        assert!(cache.update(state(5, 0.9)).is_none());
        assert!(cache.update(state(3, 0.3)).is_none());

        let current = cache.read();
        assert_eq!(current.sequence, 5);
        assert!((current.position - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn clones_share_the_slot() {
        let cache = StateCache::new();
        let reader = cache.clone();
        let _ = cache.update(state(1, 0.7));
        assert_eq!(reader.sequence(), 1);
    }

    #[test]
    fn old_snapshots_stay_valid_after_swap() {
        let cache = StateCache::new();
        let _ = cache.update(state(1, 0.1));
        let held = cache.read();
        let _ = cache.update(state(2, 0.2));
        assert_eq!(held.sequence, 1);
        assert_eq!(cache.read().sequence, 2);
    }
}
