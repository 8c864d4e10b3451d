//! Execution archive: durable, short-TTL snapshots used only for replay.
//!
//! Write-through and bounded-retention, not permanent storage. A
//! miss during replay is a soft failure the scheduler skips over.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::context::ExecutionData;
use crate::error::{FlowError, FlowResult};
use crate::graph::FlowDefinition;
use crate::runtime::TimeProvider;

/// What replay needs: the flow as it was when the run started, plus the
/// execution data as of the last durable checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub definition: FlowDefinition,
    pub execution_data: ExecutionData,
}

#[async_trait]
pub trait ExecutionArchiveStore: Send + Sync {
    async fn put(
        &self,
        organization_code: &str,
        execute_id: &str,
        snapshot: &ExecutionSnapshot,
    ) -> FlowResult<()>;

    /// `None` after TTL/eviction, or for keys never written.
    async fn get(
        &self,
        organization_code: &str,
        execute_id: &str,
    ) -> FlowResult<Option<ExecutionSnapshot>>;
}

fn archive_key(organization_code: &str, execute_id: &str) -> String {
    format!("{organization_code}:{execute_id}")
}

/// In-memory TTL store.
pub struct MemoryArchiveStore {
    ttl: Duration,
    data: Mutex<HashMap<String, (i64, ExecutionSnapshot)>>,
    time: Arc<dyn TimeProvider>,
}

impl MemoryArchiveStore {
    pub fn new(ttl: Duration, time: Arc<dyn TimeProvider>) -> Self {
        MemoryArchiveStore {
            ttl,
            data: Mutex::new(HashMap::new()),
            time,
        }
    }
}

#[async_trait]
impl ExecutionArchiveStore for MemoryArchiveStore {
    async fn put(
        &self,
        organization_code: &str,
        execute_id: &str,
        snapshot: &ExecutionSnapshot,
    ) -> FlowResult<()> {
        let stored_at = self.time.now_timestamp();
        self.data.lock().insert(
            archive_key(organization_code, execute_id),
            (stored_at, snapshot.clone()),
        );
        Ok(())
    }

    async fn get(
        &self,
        organization_code: &str,
        execute_id: &str,
    ) -> FlowResult<Option<ExecutionSnapshot>> {
        let key = archive_key(organization_code, execute_id);
        let mut data = self.data.lock();
        match data.get(&key) {
            Some((stored_at, snapshot)) => {
                if self.time.elapsed_secs(*stored_at) >= self.ttl.as_secs() {
                    data.remove(&key);
                    Ok(None)
                } else {
                    Ok(Some(snapshot.clone()))
                }
            }
            None => Ok(None),
        }
    }
}

/// Stored-at wrapper for the file variant, so TTL does not depend on
/// filesystem mtime behavior.
#[derive(Serialize, Deserialize)]
struct StoredSnapshot {
    stored_at: i64,
    snapshot: ExecutionSnapshot,
}

/// File-backed TTL store: one JSON file per `(organization, execute id)`.
pub struct FileArchiveStore {
    dir: PathBuf,
    ttl: Duration,
    time: Arc<dyn TimeProvider>,
}

impl FileArchiveStore {
    pub fn new(
        dir: impl AsRef<Path>,
        ttl: Duration,
        time: Arc<dyn TimeProvider>,
    ) -> FlowResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| FlowError::ArchiveError(e.to_string()))?;
        Ok(FileArchiveStore { dir, ttl, time })
    }

    fn path_for(&self, organization_code: &str, execute_id: &str) -> PathBuf {
        self.dir
            .join(format!("{organization_code}__{execute_id}.archive.json"))
    }
}

#[async_trait]
impl ExecutionArchiveStore for FileArchiveStore {
    async fn put(
        &self,
        organization_code: &str,
        execute_id: &str,
        snapshot: &ExecutionSnapshot,
    ) -> FlowResult<()> {
        let stored = StoredSnapshot {
            stored_at: self.time.now_timestamp(),
            snapshot: snapshot.clone(),
        };
        let bytes =
            serde_json::to_vec(&stored).map_err(|e| FlowError::ArchiveError(e.to_string()))?;
        tokio::fs::write(self.path_for(organization_code, execute_id), bytes)
            .await
            .map_err(|e| FlowError::ArchiveError(e.to_string()))
    }

    async fn get(
        &self,
        organization_code: &str,
        execute_id: &str,
    ) -> FlowResult<Option<ExecutionSnapshot>> {
        let path = self.path_for(organization_code, execute_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(FlowError::ArchiveError(e.to_string())),
        };
        let stored: StoredSnapshot =
            serde_json::from_slice(&bytes).map_err(|e| FlowError::ArchiveError(e.to_string()))?;
        if self.time.elapsed_secs(stored.stored_at) >= self.ttl.as_secs() {
            let _ = tokio::fs::remove_file(&path).await;
            return Ok(None);
        }
        Ok(Some(stored.snapshot))
    }
}
