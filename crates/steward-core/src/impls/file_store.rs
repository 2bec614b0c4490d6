//! Directory-backed snapshot store.
//!
//! Layout: `<dir>/<task-id>.json`, pretty-printed. Each write goes to its
//! own temp file and is renamed into place, so a crash never leaves a torn
//! snapshot. Saves are serialized per store and a save older than the file
//! on disk is dropped.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::domain::{TaskId, TaskSnapshot};
use crate::error::{Result, StewardError};
use crate::ports::SnapshotStore;

#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
    writes: Arc<Mutex<()>>,
}

impl FileSnapshotStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            writes: Arc::new(Mutex::new(())),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: TaskId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, snapshot: &TaskSnapshot) -> Result<()> {
        let path = self.path_for(snapshot.id);
        let tmp = self.dir.join(format!("{}.{}.tmp", snapshot.id, Ulid::new()));
        let json = snapshot.to_json()?;

        let _guard = self.writes.lock().await;
        // an unreadable file on disk is overwritten
        if let Ok(Some(held)) = self.load(snapshot.id).await
            && snapshot.is_superseded_by(&held)
        {
            debug!(
                task_id = %snapshot.id,
                revision = snapshot.revision,
                held = held.revision,
                "dropping stale snapshot"
            );
            return Ok(());
        }

        tokio::fs::write(&tmp, json).await?;
        if let Err(err) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err.into());
        }
        Ok(())
    }

    async fn load(&self, id: TaskId) -> Result<Option<TaskSnapshot>> {
        match tokio::fs::read_to_string(self.path_for(id)).await {
            Ok(json) => Ok(Some(TaskSnapshot::from_json(&json)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_all(&self) -> Result<Vec<TaskSnapshot>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut snapshots = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let json = tokio::fs::read_to_string(&path).await?;
            match TaskSnapshot::from_json(&json) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable snapshot");
                }
            }
        }

        snapshots.sort_by_key(|s| s.id);
        Ok(snapshots)
    }

    async fn remove(&self, id: TaskId) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StewardError::Store(format!("remove {id}: {e}"))),
        }
    }
}
