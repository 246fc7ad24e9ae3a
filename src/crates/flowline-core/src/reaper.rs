//! Reaper and retention jobs - recovering stuck work, bounding storage
//!
//! Two independent, differently-scheduled sweeps over the store:
//!
//! - **Stuck-thread reaper** (hourly): any thread still `active` or
//!   `paused` whose `updated_at` is older than the inactivity threshold is
//!   forcibly failed with `timedOut: true` in its metadata. This bounds
//!   leakage from clients that start a thread and never resume it; it is
//!   the only place a "no response from a human" timeout is enforced - no
//!   caller ever blocks waiting for one.
//! - **Retention sweep** (daily): terminal threads older than the retention
//!   age are deleted together with their checkpoints, and operation logs
//!   older than their own, longer threshold are purged independently.
//!
//! Both sweeps log their counts and treat zero matches as success.

use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use flowline_checkpoint::{OperationLog, ThreadFilter, ThreadStatus, WorkflowStore};

use crate::error::Result;

/// Scheduling and threshold configuration for the sweeps
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// In-flight threads untouched this long are failed as timed out
    pub inactivity_threshold: Duration,
    /// How often the stuck-thread sweep runs
    pub stuck_sweep_interval: Duration,
    /// Terminal threads older than this are deleted with their checkpoints
    pub retention_age: Duration,
    /// Operation logs older than this are purged
    pub log_retention_age: Duration,
    /// How often the retention sweep runs
    pub retention_sweep_interval: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            inactivity_threshold: Duration::from_secs(2 * 60 * 60),
            stuck_sweep_interval: Duration::from_secs(60 * 60),
            retention_age: Duration::from_secs(30 * 24 * 60 * 60),
            log_retention_age: Duration::from_secs(90 * 24 * 60 * 60),
            retention_sweep_interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Counts from one retention sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    /// Terminal threads deleted (checkpoints cascade with them)
    pub threads_deleted: usize,
    /// Operation log entries purged
    pub logs_purged: usize,
}

/// Background maintenance over one store
pub struct Reaper {
    store: Arc<dyn WorkflowStore>,
    config: ReaperConfig,
}

impl Reaper {
    /// Create a reaper with the given thresholds
    pub fn new(store: Arc<dyn WorkflowStore>, config: ReaperConfig) -> Self {
        Self { store, config }
    }

    /// Fail every in-flight thread stuck past the inactivity threshold
    ///
    /// Returns the number of threads reaped. Zero matches is success.
    pub async fn sweep_stuck(&self) -> Result<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.inactivity_threshold)
                .unwrap_or_else(|_| chrono::Duration::hours(2));
        let filter = ThreadFilter::new()
            .with_statuses(vec![ThreadStatus::Active, ThreadStatus::Paused])
            .with_updated_before(cutoff);

        let stuck = self.store.list_threads(&filter).await?;
        let mut reaped = 0;
        for thread in stuck {
            let mut metadata = HashMap::new();
            metadata.insert("timedOut".to_string(), json!(true));
            self.store
                .update_thread(&thread.id, Some(ThreadStatus::Failed), metadata)
                .await?;
            self.store
                .append_log(
                    OperationLog::new(&thread.id, "thread.reaped")
                        .with_detail(json!({ "lastUpdatedAt": thread.updated_at })),
                )
                .await?;
            reaped += 1;
        }

        info!(reaped, "stuck-thread sweep finished");
        Ok(reaped)
    }

    /// Delete aged-out terminal threads and purge old operation logs
    pub async fn sweep_retention(&self) -> Result<RetentionReport> {
        let thread_cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.retention_age)
                .unwrap_or_else(|_| chrono::Duration::days(30));
        let filter = ThreadFilter::new()
            .with_statuses(vec![
                ThreadStatus::Completed,
                ThreadStatus::Failed,
                ThreadStatus::Cancelled,
            ])
            .with_updated_before(thread_cutoff);

        let expired = self.store.list_threads(&filter).await?;
        let ids: Vec<String> = expired.into_iter().map(|t| t.id).collect();
        let threads_deleted = if ids.is_empty() {
            0
        } else {
            self.store.delete_threads(&ids).await?
        };

        let log_cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.log_retention_age)
                .unwrap_or_else(|_| chrono::Duration::days(90));
        let logs_purged = self.store.purge_logs(log_cutoff).await?;

        info!(threads_deleted, logs_purged, "retention sweep finished");
        Ok(RetentionReport {
            threads_deleted,
            logs_purged,
        })
    }

    /// Spawn both sweeps on their configured schedules
    ///
    /// Each sweep runs on its own interval until the returned handles are
    /// aborted. Sweep failures are logged and the schedule continues.
    pub fn spawn(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let stuck = {
            let reaper = self.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(reaper.config.stuck_sweep_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                // The first tick fires immediately; skip it so a fresh
                // process does not sweep before anything can be stale.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if let Err(err) = reaper.sweep_stuck().await {
                        warn!(%err, "stuck-thread sweep failed");
                    }
                }
            })
        };

        let retention = {
            let reaper = self.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(reaper.config.retention_sweep_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if let Err(err) = reaper.sweep_retention().await {
                        warn!(%err, "retention sweep failed");
                    }
                }
            })
        };

        vec![stuck, retention]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_checkpoint::{InMemoryStore, Thread};
    use serde_json::Value;

    async fn thread_with_status(store: &InMemoryStore, status: ThreadStatus) -> String {
        let thread = Thread::new("user-1", "wireframe");
        let id = thread.id.clone();
        store.create_thread(thread).await.unwrap();
        if status != ThreadStatus::Active {
            store
                .update_thread(&id, Some(status), HashMap::new())
                .await
                .unwrap();
        }
        id
    }

    #[tokio::test]
    async fn test_stuck_sweep_fails_stale_threads_only() {
        let store = Arc::new(InMemoryStore::new());
        let reaper = Reaper::new(store.clone(), ReaperConfig::default());

        let stale = thread_with_status(&store, ThreadStatus::Paused).await;
        let fresh = thread_with_status(&store, ThreadStatus::Active).await;

        let old = Utc::now() - chrono::Duration::hours(3);
        store.backdate_thread(&stale, old, old).await.unwrap();
        // Touched one minute before the threshold: left alone.
        let near = Utc::now() - chrono::Duration::minutes(119);
        store.backdate_thread(&fresh, near, near).await.unwrap();

        let reaped = reaper.sweep_stuck().await.unwrap();
        assert_eq!(reaped, 1);

        let stale_thread = store.get_thread(&stale).await.unwrap();
        assert_eq!(stale_thread.status, ThreadStatus::Failed);
        assert_eq!(stale_thread.metadata["timedOut"], Value::Bool(true));

        let fresh_thread = store.get_thread(&fresh).await.unwrap();
        assert_eq!(fresh_thread.status, ThreadStatus::Active);
        assert!(!fresh_thread.metadata.contains_key("timedOut"));
    }

    #[tokio::test]
    async fn test_stuck_sweep_ignores_terminal_threads() {
        let store = Arc::new(InMemoryStore::new());
        let reaper = Reaper::new(store.clone(), ReaperConfig::default());

        let done = thread_with_status(&store, ThreadStatus::Completed).await;
        let old = Utc::now() - chrono::Duration::days(2);
        store.backdate_thread(&done, old, old).await.unwrap();

        let reaped = reaper.sweep_stuck().await.unwrap();
        assert_eq!(reaped, 0);
        assert_eq!(
            store.get_thread(&done).await.unwrap().status,
            ThreadStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_retention_deletes_aged_terminal_threads() {
        let store = Arc::new(InMemoryStore::new());
        let reaper = Reaper::new(store.clone(), ReaperConfig::default());

        let old_done = thread_with_status(&store, ThreadStatus::Completed).await;
        let recent_done = thread_with_status(&store, ThreadStatus::Completed).await;

        let aged = Utc::now() - chrono::Duration::days(31);
        store.backdate_thread(&old_done, aged, aged).await.unwrap();
        let young = Utc::now() - chrono::Duration::days(29);
        store
            .backdate_thread(&recent_done, young, young)
            .await
            .unwrap();

        let report = reaper.sweep_retention().await.unwrap();
        assert_eq!(report.threads_deleted, 1);

        assert!(store.get_thread(&old_done).await.is_err());
        assert!(store.get_thread(&recent_done).await.is_ok());
    }

    #[tokio::test]
    async fn test_retention_purges_old_logs_independently() {
        let store = Arc::new(InMemoryStore::new());
        let reaper = Reaper::new(store.clone(), ReaperConfig::default());

        let old_log = OperationLog::new("t-1", "thread.started");
        let old_id = old_log.id.clone();
        store.append_log(old_log).await.unwrap();
        store
            .append_log(OperationLog::new("t-1", "thread.completed"))
            .await
            .unwrap();
        store
            .backdate_log(&old_id, Utc::now() - chrono::Duration::days(120))
            .await
            .unwrap();

        let report = reaper.sweep_retention().await.unwrap();
        assert_eq!(report.logs_purged, 1);
        assert_eq!(store.log_count().await, 1);
    }

    #[tokio::test]
    async fn test_sweeps_with_nothing_to_do_succeed() {
        let store = Arc::new(InMemoryStore::new());
        let reaper = Reaper::new(store, ReaperConfig::default());

        assert_eq!(reaper.sweep_stuck().await.unwrap(), 0);
        assert_eq!(
            reaper.sweep_retention().await.unwrap(),
            RetentionReport::default()
        );
    }
}
