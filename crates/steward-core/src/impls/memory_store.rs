use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{TaskId, TaskSnapshot};
use crate::error::Result;
use crate::ports::SnapshotStore;

/// Snapshot store kept in process memory.
///
/// Keyed by `TaskId`; ULID ordering makes `load_all` oldest-first.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: Mutex<BTreeMap<TaskId, TaskSnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.snapshots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshots.lock().await.is_empty()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, snapshot: &TaskSnapshot) -> Result<()> {
        let mut snapshots = self.snapshots.lock().await;
        if snapshots
            .get(&snapshot.id)
            .is_some_and(|held| snapshot.is_superseded_by(held))
        {
            return Ok(());
        }
        snapshots.insert(snapshot.id, snapshot.clone());
        Ok(())
    }

    async fn load(&self, id: TaskId) -> Result<Option<TaskSnapshot>> {
        Ok(self.snapshots.lock().await.get(&id).cloned())
    }

    async fn load_all(&self) -> Result<Vec<TaskSnapshot>> {
        Ok(self.snapshots.lock().await.values().cloned().collect())
    }

    async fn remove(&self, id: TaskId) -> Result<()> {
        self.snapshots.lock().await.remove(&id);
        Ok(())
    }
}
