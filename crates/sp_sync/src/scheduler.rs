//! Periodic sync: one tokio task per enabled datasource.
//!
//! A supervisor task re-reads the datasource table every `refresh_interval`, starting tasks for
//! newly enabled datasources and restarting or stopping tasks whose datasource was edited,
//! disabled, or deleted. Each datasource task ticks at its own `sync_interval_seconds` and runs
//! the blocking sync on the blocking pool, so a slow provider never delays other datasources.
//! Stopping a task lets an in-flight run finish and record its result.
//!
//! A run that fails on configuration parks its task: it stops ticking until an edit to the
//! datasource restarts it.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sp_core::cache::OverviewCache;
use sp_core::db;
use sp_core::domain::Datasource;
use sp_core::error::AppError;
use sp_core::repo::datasources::{list_enabled_datasources, recover_interrupted_syncs};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::engine::{run_sync, SyncResult, SyncSettings};
use crate::provider::Connector;

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub db_path: PathBuf,
    pub settings: SyncSettings,
    pub refresh_interval: Duration,
}

struct Shared {
    config: SchedulerConfig,
    connector: Connector,
    cache: Arc<OverviewCache>,
}

/// The datasource fields a running task depends on. Any change restarts the task.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TaskSettings {
    interval_seconds: i64,
    api_key_sealed: String,
    base_url: Option<String>,
    service_ids: Vec<String>,
}

impl From<&Datasource> for TaskSettings {
    fn from(ds: &Datasource) -> Self {
        Self {
            interval_seconds: ds.sync_interval_seconds,
            api_key_sealed: ds.api_key_sealed.clone(),
            base_url: ds.base_url.clone(),
            service_ids: ds.service_ids.clone(),
        }
    }
}

struct DatasourceTask {
    settings: TaskSettings,
    cancel: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl DatasourceTask {
    /// Signal the task to stop; the returned handle completes once an in-flight run is done.
    fn cancel(self) -> JoinHandle<()> {
        let _ = self.cancel.send(true);
        self.join
    }
}

/// Handle to the running scheduler.
pub struct SchedulerHandle {
    cancel: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop scheduling and wait for in-flight runs to finish.
    pub async fn shutdown(self) {
        let _ = self.cancel.send(true);
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "scheduler supervisor panicked");
        }
    }
}

/// Recover datasources stuck in `syncing`, then spawn the supervisor. Must be called from
/// within a tokio runtime.
pub fn start(
    config: SchedulerConfig,
    connector: Connector,
    cache: Arc<OverviewCache>,
) -> Result<SchedulerHandle, AppError> {
    let conn = db::open_and_migrate(&config.db_path)?;
    let recovered = recover_interrupted_syncs(&conn)?;
    if recovered > 0 {
        tracing::warn!(recovered, "reset datasources left mid-sync by a previous process");
    }
    drop(conn);

    let shared = Arc::new(Shared {
        config,
        connector,
        cache,
    });
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let join = tokio::spawn(supervise(shared, cancel_rx));
    Ok(SchedulerHandle {
        cancel: cancel_tx,
        join,
    })
}

async fn supervise(shared: Arc<Shared>, mut cancel_rx: watch::Receiver<bool>) {
    let mut tasks: HashMap<i64, DatasourceTask> = HashMap::new();
    tracing::info!(
        refresh_secs = shared.config.refresh_interval.as_secs(),
        "sync scheduler started"
    );

    loop {
        match load_enabled(&shared).await {
            Ok(enabled) => refresh_tasks(&shared, &mut tasks, enabled).await,
            Err(e) => tracing::error!(error = %e, "failed to load datasources"),
        }

        tokio::select! {
            _ = tokio::time::sleep(shared.config.refresh_interval) => {}
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    break;
                }
            }
        }
    }

    let stopping: Vec<JoinHandle<()>> = tasks.drain().map(|(_, task)| task.cancel()).collect();
    for join in stopping {
        let _ = join.await;
    }
    tracing::info!("sync scheduler stopped");
}

async fn load_enabled(shared: &Arc<Shared>) -> Result<Vec<Datasource>, AppError> {
    let shared = Arc::clone(shared);
    tokio::task::spawn_blocking(move || {
        let conn = db::open(&shared.config.db_path)?;
        list_enabled_datasources(&conn)
    })
    .await
    .map_err(|e| {
        AppError::new("SYNC_TASK_FAILED", "Datasource listing task failed")
            .with_details(e.to_string())
    })?
}

async fn refresh_tasks(
    shared: &Arc<Shared>,
    tasks: &mut HashMap<i64, DatasourceTask>,
    enabled: Vec<Datasource>,
) {
    let wanted: HashMap<i64, TaskSettings> = enabled
        .iter()
        .map(|ds| (ds.id, TaskSettings::from(ds)))
        .collect();

    let stale: Vec<i64> = tasks
        .iter()
        .filter(|(id, task)| wanted.get(*id) != Some(&task.settings))
        .map(|(id, _)| *id)
        .collect();
    let mut stopping = Vec::with_capacity(stale.len());
    for id in stale {
        if let Some(task) = tasks.remove(&id) {
            tracing::info!(datasource_id = id, "stopping sync task");
            stopping.push(task.cancel());
        }
    }

    for (id, settings) in wanted {
        if tasks.contains_key(&id) {
            continue;
        }
        let interval_seconds = settings.interval_seconds;
        tracing::info!(datasource_id = id, interval_seconds, "starting sync task");
        let period = Duration::from_secs(interval_seconds.max(1).unsigned_abs());
        let (cancel, cancel_rx) = watch::channel(false);
        let worker = Arc::clone(shared);
        let join = tokio::spawn(datasource_loop(id, period, cancel_rx, move || {
            sync_once(Arc::clone(&worker), id)
        }));
        tasks.insert(
            id,
            DatasourceTask {
                settings,
                cancel,
                join,
            },
        );
    }

    // Joined only after replacements have started.
    for join in stopping {
        let _ = join.await;
    }
}

async fn datasource_loop<F, Fut>(
    datasource_id: i64,
    period: Duration,
    mut cancel_rx: watch::Receiver<bool>,
    mut run: F,
) where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Option<SyncResult>> + Send,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut parked = false;

    loop {
        tokio::select! {
            _ = ticker.tick(), if !parked => {
                // Not cancellable once started; the provider timeout bounds it.
                if let Some(result) = run().await {
                    if !result.is_retryable() {
                        tracing::warn!(
                            datasource_id,
                            error = result.error.as_deref().unwrap_or_default(),
                            "sync paused until the datasource is edited"
                        );
                        parked = true;
                    }
                }
            }
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    break;
                }
            }
        }
    }
}

async fn sync_once(shared: Arc<Shared>, datasource_id: i64) -> Option<SyncResult> {
    let worker = Arc::clone(&shared);
    let run = tokio::task::spawn_blocking(move || -> Result<SyncResult, AppError> {
        let mut conn = db::open(&worker.config.db_path)?;
        run_sync(&mut conn, &worker.connector, &worker.config.settings, datasource_id)
    })
    .await;

    match run {
        Ok(Ok(result)) => {
            if result.changed_incidents() {
                shared.cache.invalidate();
            }
            Some(result)
        }
        Ok(Err(e)) => {
            tracing::error!(datasource_id, code = %e.code, error = %e, "sync could not run");
            None
        }
        Err(e) => {
            tracing::error!(datasource_id, error = %e, "sync task panicked");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::SyncErrorKind;

    const PERIOD: Duration = Duration::from_secs(30);

    /// Drive a datasource loop whose every run fails with `kind`; count runs over `periods`.
    async fn runs_over(kind: SyncErrorKind, periods: u32) -> usize {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let (cancel, cancel_rx) = watch::channel(false);
        let join = tokio::spawn(datasource_loop(7, PERIOD, cancel_rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Some(SyncResult {
                error: Some("failed".to_string()),
                error_kind: Some(kind),
                ..SyncResult::default()
            }))
        }));

        tokio::time::sleep(PERIOD * periods + Duration::from_secs(1)).await;
        cancel.send(true).unwrap();
        join.await.unwrap();
        calls.load(Ordering::SeqCst)
    }

    #[tokio::test(start_paused = true)]
    async fn configuration_failure_parks_the_task() {
        assert_eq!(runs_over(SyncErrorKind::Configuration, 4).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_keeps_the_schedule() {
        // Ticks at 0s, 30s, 60s, 90s and 120s.
        assert_eq!(runs_over(SyncErrorKind::Transport, 4).await, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn parked_task_still_stops_on_cancel() {
        let (cancel, cancel_rx) = watch::channel(false);
        let join = tokio::spawn(datasource_loop(7, PERIOD, cancel_rx, || {
            std::future::ready(Some(SyncResult {
                error_kind: Some(SyncErrorKind::Configuration),
                ..SyncResult::default()
            }))
        }));
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), join)
            .await
            .expect("parked task stops")
            .unwrap();
    }

    #[test]
    fn task_settings_follow_datasource_edits() {
        let ds = Datasource {
            id: 1,
            name: "Primary".to_string(),
            provider_type: sp_core::domain::ProviderKind::Mock,
            api_key_sealed: String::new(),
            base_url: None,
            service_ids: vec![],
            enabled: true,
            sync_interval_seconds: 60,
            last_sync_at: None,
            sync_status: sp_core::domain::SyncStatus::Error,
            sync_error: Some("API key not configured".to_string()),
        };
        let before = TaskSettings::from(&ds);
        let edited = Datasource {
            api_key_sealed: "sealed".to_string(),
            ..ds.clone()
        };
        assert_ne!(TaskSettings::from(&edited), before);

        // Run bookkeeping alone does not restart the task.
        let synced = Datasource {
            last_sync_at: Some("2026-01-01T00:00:00Z".to_string()),
            ..ds
        };
        assert_eq!(TaskSettings::from(&synced), before);
    }
}
