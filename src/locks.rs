use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// One async mutex per formation id.
///
/// Writes to the same formation are serialized while writes to different
/// formations proceed independently. Entries nobody holds are pruned on the
/// next acquisition.
#[derive(Debug, Clone, Default)]
pub struct FormationLocks {
    inner: Arc<Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>>,
}

impl FormationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, formation_id: i64) -> OwnedMutexGuard<()> {
        let entry = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.retain(|id, m| *id == formation_id || Arc::strong_count(m) > 1);
            map.entry(formation_id)
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        debug!(formation_id, "Waiting for formation lock");
        entry.lock_owned().await
    }

    /// Locks several formations in ascending id order, skipping duplicates.
    ///
    /// Single-id holders never wait for a second lock, so a fixed order is
    /// enough to rule out deadlock between multi-id callers.
    pub async fn lock_all(&self, formation_ids: Vec<i64>) -> Vec<OwnedMutexGuard<()>> {
        let mut ids = formation_ids;
        ids.sort_unstable();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.lock(id).await);
        }
        guards
    }

    /// Number of formations with a live lock entry.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
