use std::collections::HashSet;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::scenario::PlaybackId;

/// Ids of playbacks that have not finished yet.
#[derive(Debug, Default)]
pub(crate) struct PlaybackRegistry {
    active: Mutex<HashSet<PlaybackId>>,
    finished: Condvar,
}

impl PlaybackRegistry {
    pub fn insert(&self, id: PlaybackId) {
        self.active.lock().unwrap().insert(id);
    }

    /// Returns true if `id` was still registered.
    pub fn remove(&self, id: PlaybackId) -> bool {
        let removed = self.active.lock().unwrap().remove(&id);
        self.finished.notify_all();
        removed
    }

    pub fn clear(&self) -> Vec<PlaybackId> {
        let drained = self.active.lock().unwrap().drain().collect();
        self.finished.notify_all();
        drained
    }

    pub fn contains(&self, id: PlaybackId) -> bool {
        self.active.lock().unwrap().contains(&id)
    }

    pub fn len(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    /// Wait up to `timeout` for `id` to finish. Returns true if it did.
    pub fn wait_for(&self, id: PlaybackId, timeout: Duration) -> bool {
        let active = self.active.lock().unwrap();
        let (active, _) = self
            .finished
            .wait_timeout_while(active, timeout, |active| active.contains(&id))
            .unwrap();
        !active.contains(&id)
    }

    /// Wait up to `timeout` for every playback to finish.
    pub fn wait_for_all(&self, timeout: Duration) -> bool {
        let active = self.active.lock().unwrap();
        let (active, _) = self
            .finished
            .wait_timeout_while(active, timeout, |active| !active.is_empty())
            .unwrap();
        active.is_empty()
    }
}
