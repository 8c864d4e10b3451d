//! Run log: the single entity mutated under true concurrency, and therefore
//! the system of record for run status.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{FlowError, FlowResult};
use crate::runtime::TimeProvider;

/// Per-run state machine. Terminal once it leaves `Running`; a stalled run
/// is not a status of its own; it is inferred from `updated_at` age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// One row per run. Updated on every step (the heartbeat staleness detection
/// reads) and on every retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowExecuteLog {
    pub execute_id: String,
    pub organization_code: String,
    pub status: RunStatus,
    pub updated_at: DateTime<Utc>,
    pub retry_count: i32,
    /// Rehydration params for replay (organization code and friends).
    #[serde(default)]
    pub ext_params: HashMap<String, String>,
}

/// Paging window for the stall scan.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub number: usize,
    pub size: usize,
}

#[async_trait]
pub trait FlowExecuteLogRepository: Send + Sync {
    async fn create(&self, entry: &FlowExecuteLog) -> FlowResult<()>;
    async fn update(&self, entry: &FlowExecuteLog) -> FlowResult<()>;
    async fn get_by_execute_id(&self, execute_id: &str) -> FlowResult<Option<FlowExecuteLog>>;

    /// Rows still `Running` whose last update is older than
    /// `threshold_secs`, ordered by execute id for stable pagination.
    async fn get_running_timeout_list(
        &self,
        threshold_secs: u64,
        page: Page,
    ) -> FlowResult<Vec<FlowExecuteLog>>;

    /// Durable increment; returns the new count.
    async fn increment_retry_count(&self, execute_id: &str) -> FlowResult<i32>;
}

/// In-memory repository for tests and single-process deployments.
pub struct MemoryLogRepository {
    rows: Mutex<HashMap<String, FlowExecuteLog>>,
    time: Arc<dyn TimeProvider>,
}

impl MemoryLogRepository {
    pub fn new(time: Arc<dyn TimeProvider>) -> Self {
        MemoryLogRepository {
            rows: Mutex::new(HashMap::new()),
            time,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.time.now_timestamp(), 0)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

#[async_trait]
impl FlowExecuteLogRepository for MemoryLogRepository {
    async fn create(&self, entry: &FlowExecuteLog) -> FlowResult<()> {
        let mut rows = self.rows.lock();
        if rows.contains_key(&entry.execute_id) {
            return Err(FlowError::LogRepositoryError(format!(
                "Duplicate execute id: {}",
                entry.execute_id
            )));
        }
        rows.insert(entry.execute_id.clone(), entry.clone());
        Ok(())
    }

    async fn update(&self, entry: &FlowExecuteLog) -> FlowResult<()> {
        let mut rows = self.rows.lock();
        match rows.get_mut(&entry.execute_id) {
            Some(existing) => {
                *existing = entry.clone();
                Ok(())
            }
            None => Err(FlowError::LogRepositoryError(format!(
                "No log row for execute id: {}",
                entry.execute_id
            ))),
        }
    }

    async fn get_by_execute_id(&self, execute_id: &str) -> FlowResult<Option<FlowExecuteLog>> {
        Ok(self.rows.lock().get(execute_id).cloned())
    }

    async fn get_running_timeout_list(
        &self,
        threshold_secs: u64,
        page: Page,
    ) -> FlowResult<Vec<FlowExecuteLog>> {
        let cutoff = self.now() - chrono::Duration::seconds(threshold_secs as i64);
        let mut stalled: Vec<FlowExecuteLog> = self
            .rows
            .lock()
            .values()
            .filter(|row| row.status == RunStatus::Running && row.updated_at <= cutoff)
            .cloned()
            .collect();
        stalled.sort_by(|a, b| a.execute_id.cmp(&b.execute_id));
        Ok(stalled
            .into_iter()
            .skip(page.number * page.size)
            .take(page.size)
            .collect())
    }

    async fn increment_retry_count(&self, execute_id: &str) -> FlowResult<i32> {
        let mut rows = self.rows.lock();
        let row = rows.get_mut(execute_id).ok_or_else(|| {
            FlowError::LogRepositoryError(format!("No log row for execute id: {execute_id}"))
        })?;
        row.retry_count += 1;
        row.updated_at = Utc.timestamp_opt(self.time.now_timestamp(), 0)
            .single()
            .unwrap_or_else(Utc::now);
        Ok(row.retry_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::FakeTimeProvider;

    fn row(execute_id: &str, updated_at: DateTime<Utc>) -> FlowExecuteLog {
        FlowExecuteLog {
            execute_id: execute_id.to_string(),
            organization_code: "org-1".to_string(),
            status: RunStatus::Running,
            updated_at,
            retry_count: 0,
            ext_params: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_create_update_get() {
        let time = Arc::new(FakeTimeProvider::new(10_000));
        let repo = MemoryLogRepository::new(time.clone());
        let ts = Utc.timestamp_opt(10_000, 0).single().unwrap();

        repo.create(&row("exec-1", ts)).await.unwrap();
        assert!(repo.create(&row("exec-1", ts)).await.is_err());

        let mut updated = row("exec-1", ts);
        updated.status = RunStatus::Succeeded;
        repo.update(&updated).await.unwrap();

        let got = repo.get_by_execute_id("exec-1").await.unwrap().unwrap();
        assert_eq!(got.status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_running_timeout_list_filters_and_pages() {
        let time = Arc::new(FakeTimeProvider::new(10_000));
        let repo = MemoryLogRepository::new(time.clone());

        let old = Utc.timestamp_opt(9_000, 0).single().unwrap();
        let fresh = Utc.timestamp_opt(9_950, 0).single().unwrap();
        repo.create(&row("exec-a", old)).await.unwrap();
        repo.create(&row("exec-b", old)).await.unwrap();
        repo.create(&row("exec-c", fresh)).await.unwrap();

        let mut done = row("exec-d", old);
        done.status = RunStatus::Failed;
        repo.create(&done).await.unwrap();

        let page0 = repo
            .get_running_timeout_list(600, Page { number: 0, size: 1 })
            .await
            .unwrap();
        let page1 = repo
            .get_running_timeout_list(600, Page { number: 1, size: 1 })
            .await
            .unwrap();
        assert_eq!(page0[0].execute_id, "exec-a");
        assert_eq!(page1[0].execute_id, "exec-b");

        let all = repo
            .get_running_timeout_list(600, Page { number: 0, size: 10 })
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_increment_retry_count() {
        let time = Arc::new(FakeTimeProvider::new(10_000));
        let repo = MemoryLogRepository::new(time);
        let ts = Utc.timestamp_opt(9_000, 0).single().unwrap();
        repo.create(&row("exec-1", ts)).await.unwrap();

        assert_eq!(repo.increment_retry_count("exec-1").await.unwrap(), 1);
        let got = repo.get_by_execute_id("exec-1").await.unwrap().unwrap();
        assert_eq!(got.retry_count, 1);
        assert!(got.updated_at > ts);
    }
}
