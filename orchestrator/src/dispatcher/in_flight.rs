use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Configurations currently being executed by any tick of one orchestrator.
///
/// Overlapping ticks share this set, so a configuration is never executed
/// twice at the same time.
#[derive(Clone, Default)]
pub struct InFlight {
    ids: Arc<Mutex<HashSet<i64>>>,
}

impl InFlight {
    /// Claims `id`, or returns `None` if another dispatch already holds it.
    pub fn try_claim(&self, id: i64) -> Option<InFlightGuard> {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        if ids.insert(id) {
            Some(InFlightGuard {
                id,
                ids: Arc::clone(&self.ids),
            })
        } else {
            None
        }
    }

    pub fn contains(&self, id: i64) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }
}

/// Releases the claim when dropped.
pub struct InFlightGuard {
    id: i64,
    ids: Arc<Mutex<HashSet<i64>>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}
