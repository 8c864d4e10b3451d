//! Breakpoint retry scheduler: the only component that looks at stalled
//! runs, and the system's only real parallelism.
//!
//! Each tick pages over `Running` log rows older than the stall timeout and
//! replays each at most once, under a per-execution distributed lock. A run
//! that has already spent its one retry and is still stuck stays `Running`
//! for manual operations; the scheduler never force-fails it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::executor::FlowExecutor;
use crate::store::{
    ExecutionArchiveStore, FlowExecuteLog, FlowExecuteLogRepository, Locker, Page, RunStatus,
};

#[derive(Debug, Clone)]
pub struct RetrySchedulerConfig {
    /// Lock key prefix; lets several scheduler kinds share one locker.
    pub name: String,
    /// Wall-clock pause between ticks.
    pub tick_interval: Duration,
    /// Age of a `Running` row's last update before it counts as stalled.
    pub stall_timeout_secs: u64,
    /// Rows fetched per page of the stall scan.
    pub page_size: usize,
    /// Safety cap on pages walked in one tick.
    pub max_pages_per_tick: usize,
    /// Bound on concurrently replaying executions.
    pub max_concurrent_retries: usize,
    /// TTL on the per-execution retry lock; outlives one full replay.
    pub lock_ttl: Duration,
}

impl Default for RetrySchedulerConfig {
    fn default() -> Self {
        RetrySchedulerConfig {
            name: "flow-breakpoint-retry".to_string(),
            tick_interval: Duration::from_secs(60),
            stall_timeout_secs: 600,
            page_size: 100,
            max_pages_per_tick: 10,
            max_concurrent_retries: 50,
            lock_ttl: Duration::from_secs(600),
        }
    }
}

pub struct BreakpointRetryScheduler {
    executor: Arc<FlowExecutor>,
    log_repo: Arc<dyn FlowExecuteLogRepository>,
    archive: Arc<dyn ExecutionArchiveStore>,
    locker: Arc<dyn Locker>,
    config: RetrySchedulerConfig,
}

impl BreakpointRetryScheduler {
    pub fn new(
        executor: Arc<FlowExecutor>,
        log_repo: Arc<dyn FlowExecuteLogRepository>,
        archive: Arc<dyn ExecutionArchiveStore>,
        locker: Arc<dyn Locker>,
        config: RetrySchedulerConfig,
    ) -> Self {
        BreakpointRetryScheduler {
            executor,
            log_repo,
            archive,
            locker,
            config,
        }
    }

    /// Run the fixed-interval loop until the task is aborted.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                Arc::clone(&self).tick().await;
            }
        })
    }

    /// One scan: paginate stalled rows, dispatch each candidate into the
    /// bounded pool, wait for the batch to drain. Public so tests can drive
    /// ticks deterministically against a fake clock.
    pub async fn tick(self: Arc<Self>) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_retries));
        let mut tasks: JoinSet<()> = JoinSet::new();

        for page_number in 0..self.config.max_pages_per_tick {
            let page = Page {
                number: page_number,
                size: self.config.page_size,
            };
            let rows = match self
                .log_repo
                .get_running_timeout_list(self.config.stall_timeout_secs, page)
                .await
            {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::warn!(error = %e, "stall scan failed, ending tick");
                    break;
                }
            };
            if rows.is_empty() {
                break;
            }

            for row in rows {
                let scheduler = Arc::clone(&self);
                let semaphore = Arc::clone(&semaphore);
                tasks.spawn(async move {
                    let _permit = match semaphore.acquire().await {
                        Ok(permit) => permit,
                        Err(_) => return,
                    };
                    scheduler.retry_one(row).await;
                });
            }
        }

        while tasks.join_next().await.is_some() {}
    }

    /// Claim, re-check, replay once. The lock is released on every exit
    /// path; "not acquired" means another worker already has it and is a
    /// no-op, not an error.
    async fn retry_one(&self, row: FlowExecuteLog) {
        let key = format!("{}:{}", self.config.name, row.execute_id);
        let owner = uuid::Uuid::new_v4().to_string();

        if !self
            .locker
            .try_lock(&key, &owner, self.config.lock_ttl)
            .await
        {
            tracing::debug!(execute_id = %row.execute_id, "retry already being handled");
            return;
        }

        if let Err(e) = self.attempt_replay(&row).await {
            tracing::warn!(execute_id = %row.execute_id, error = %e, "replay attempt failed");
        }

        self.locker.release(&key, &owner).await;
    }

    async fn attempt_replay(&self, candidate: &FlowExecuteLog) -> crate::error::FlowResult<()> {
        // Re-fetch under the lock: another worker may have advanced the row
        // between the scan and the claim.
        let row = match self
            .log_repo
            .get_by_execute_id(&candidate.execute_id)
            .await?
        {
            Some(row) => row,
            None => return Ok(()),
        };
        if row.status != RunStatus::Running {
            return Ok(());
        }
        if row.retry_count >= self.executor.config().max_retry_count {
            tracing::debug!(
                execute_id = %row.execute_id,
                retry_count = row.retry_count,
                "retry budget spent, leaving run for manual ops"
            );
            return Ok(());
        }

        self.log_repo
            .increment_retry_count(&row.execute_id)
            .await?;

        let organization_code = row
            .ext_params
            .get("organization_code")
            .cloned()
            .unwrap_or_else(|| row.organization_code.clone());
        let snapshot = match self
            .archive
            .get(&organization_code, &row.execute_id)
            .await?
        {
            Some(snapshot) => snapshot,
            None => {
                // Soft failure: TTL already evicted the snapshot.
                tracing::warn!(execute_id = %row.execute_id, "archive miss, skipping replay");
                return Ok(());
            }
        };

        let mut data = snapshot.execution_data;
        data.rewind();
        let outcome = self.executor.replay(&snapshot.definition, data).await?;
        tracing::info!(
            execute_id = %outcome.execute_id,
            status = ?outcome.status,
            "replay finished"
        );
        Ok(())
    }
}
