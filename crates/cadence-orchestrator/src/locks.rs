use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

type LockMap = Arc<Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>>;

/// Async mutexes keyed by `schedule_id`.
///
/// An entry lives only while some task holds or waits on it, so the map
/// stays proportional to the rounds currently being mutated.
#[derive(Default)]
pub(crate) struct ScheduleLocks {
    map: LockMap,
}

impl ScheduleLocks {
    /// Wait for exclusive access to one round.
    pub(crate) async fn acquire(&self, schedule_id: Uuid) -> ScheduleGuard {
        let lock = self.map.lock().entry(schedule_id).or_default().clone();
        let guard = lock.clone().lock_owned().await;
        ScheduleGuard {
            schedule_id,
            map: self.map.clone(),
            lock,
            guard: Some(guard),
        }
    }

    /// Rounds with a live lock entry.
    pub(crate) fn len(&self) -> usize {
        self.map.lock().len()
    }
}

/// Held access to one round; dropping it releases the lock.
pub(crate) struct ScheduleGuard {
    schedule_id: Uuid,
    map: LockMap,
    lock: Arc<tokio::sync::Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ScheduleGuard {
    fn drop(&mut self) {
        let mut map = self.map.lock();
        self.guard.take();
        // Only the map and this guard still reference the mutex.
        if Arc::strong_count(&self.lock) == 2 {
            map.remove(&self.schedule_id);
        }
    }
}

/// Keys claimed by an in-flight operation.
pub(crate) struct ClaimSet<K> {
    claimed: Mutex<HashSet<K>>,
}

impl<K: Eq + Hash + Clone> ClaimSet<K> {
    pub(crate) fn new() -> Self {
        Self {
            claimed: Mutex::new(HashSet::new()),
        }
    }

    /// Claim `key`, or `None` when another caller holds it.
    pub(crate) fn try_claim(&self, key: K) -> Option<Claim<'_, K>> {
        if self.claimed.lock().insert(key.clone()) {
            Some(Claim { set: self, key })
        } else {
            None
        }
    }

    #[cfg(test)]
    fn is_claimed(&self, key: &K) -> bool {
        self.claimed.lock().contains(key)
    }
}

/// Released on drop, including when the owning future is cancelled.
pub(crate) struct Claim<'a, K: Eq + Hash> {
    set: &'a ClaimSet<K>,
    key: K,
}

impl<K: Eq + Hash> Drop for Claim<'_, K> {
    fn drop(&mut self) {
        self.set.claimed.lock().remove(&self.key);
    }
}
