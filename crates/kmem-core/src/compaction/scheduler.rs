//! Manual and automatic compaction triggers.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::compactor::Compactor;
use super::{CompactionRequest, CompactionResponse};
use crate::config::CompactionConfig;
use crate::error::{Error, Result};

/// Externally visible scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    #[default]
    Idle,
    Acquiring,
    Running,
    Committing,
}

impl SchedulerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Acquiring => "acquiring",
            Self::Running => "running",
            Self::Committing => "committing",
        }
    }
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Timing {
    last_run_at: Option<DateTime<Utc>>,
    next_due: Option<DateTime<Utc>>,
}

struct SchedulerInner {
    compactor: Compactor,
    config: CompactionConfig,
    workspace_id: String,
    state: watch::Sender<SchedulerState>,
    timing: StdMutex<Timing>,
}

/// Resets the state to Idle on every exit, including a dropped future.
struct IdleOnDrop<'a>(&'a watch::Sender<SchedulerState>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_replace(SchedulerState::Idle);
    }
}

impl SchedulerInner {
    fn timing(&self) -> Timing {
        *self.timing.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn execute(
        &self,
        request: &CompactionRequest,
        cancel: Option<&watch::Receiver<bool>>,
    ) -> Result<CompactionResponse> {
        let _idle = IdleOnDrop(&self.state);
        let response = self.compactor.execute(request, cancel, Some(&self.state)).await?;

        if !request.dry_run {
            self.record_completion(Utc::now());
        }
        Ok(response)
    }

    /// Mark a completed real run and push the automatic schedule out.
    fn record_completion(&self, finished_at: DateTime<Utc>) {
        let mut timing = self.timing.lock().unwrap_or_else(|e| e.into_inner());
        timing.last_run_at = Some(finished_at);
        timing.next_due = self.config.auto_interval().map(|interval| finished_at + interval);
        debug!(
            workspace_id = %self.workspace_id,
            next_due = ?timing.next_due,
            "Compaction schedule advanced"
        );
    }

    fn is_due(&self, now: DateTime<Utc>) -> bool {
        if self.config.auto_interval().is_none() {
            return false;
        }
        match self.timing().next_due {
            Some(next_due) => now >= next_due,
            None => true,
        }
    }

    async fn run_due(&self) -> Result<Option<CompactionResponse>> {
        if !self.is_due(Utc::now()) {
            return Ok(None);
        }
        let request = CompactionRequest::from_config(&self.workspace_id, &self.config);
        info!(workspace_id = %self.workspace_id, "Automatic compaction due");
        self.execute(&request, None).await.map(Some)
    }
}

/// Drives compaction for one workspace, on demand and on an interval.
///
/// Manual and automatic runs share the compactor's maintenance lock, so they
/// never overlap. A completed manual run defers the next automatic run to
/// `last_run_at + interval`.
pub struct CompactionScheduler {
    inner: Arc<SchedulerInner>,
    shutdown_tx: StdMutex<Option<mpsc::Sender<()>>>,
    task: StdMutex<Option<JoinHandle<()>>>,
}

impl CompactionScheduler {
    pub fn new(
        compactor: Compactor,
        config: CompactionConfig,
        workspace_id: impl Into<String>,
    ) -> Result<Self> {
        config.validate()?;
        let workspace_id = workspace_id.into();
        if workspace_id.trim().is_empty() {
            return Err(Error::validation("workspaceId", "cannot be empty"));
        }

        let (state, _) = watch::channel(SchedulerState::Idle);
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                compactor: compactor.with_lock_wait(config.lock_wait()),
                config,
                workspace_id,
                state,
                timing: StdMutex::new(Timing::default()),
            }),
            shutdown_tx: StdMutex::new(None),
            task: StdMutex::new(None),
        })
    }

    /// Restore the time of the last completed run, e.g. after a restart.
    pub fn with_last_run_at(self, last_run_at: DateTime<Utc>) -> Self {
        self.inner.record_completion(last_run_at);
        self
    }

    pub fn workspace_id(&self) -> &str {
        &self.inner.workspace_id
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SchedulerState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.inner.state.subscribe()
    }

    pub fn last_run_at(&self) -> Option<DateTime<Utc>> {
        self.inner.timing().last_run_at
    }

    /// Next automatic run time. `None` when automatic runs are disabled or
    /// no run has completed yet.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.inner.timing().next_due
    }

    /// Run immediately. The request's workspace must match the scheduler's.
    pub async fn run_manual(&self, request: &CompactionRequest) -> Result<CompactionResponse> {
        self.check_workspace(request)?;
        info!(
            workspace_id = %request.workspace_id,
            dry_run = request.dry_run,
            "Manual compaction requested"
        );
        self.inner.execute(request, None).await
    }

    /// Run immediately, stopping between clusters once `cancel` reads true.
    pub async fn run_manual_with_cancel(
        &self,
        request: &CompactionRequest,
        cancel: watch::Receiver<bool>,
    ) -> Result<CompactionResponse> {
        self.check_workspace(request)?;
        self.inner.execute(request, Some(&cancel)).await
    }

    /// Run the automatic pass if it is due. Returns `None` when not due.
    pub async fn run_due(&self) -> Result<Option<CompactionResponse>> {
        self.inner.run_due().await
    }

    fn check_workspace(&self, request: &CompactionRequest) -> Result<()> {
        if request.workspace_id != self.inner.workspace_id {
            return Err(Error::validation(
                "workspaceId",
                format!(
                    "scheduler serves {}, not {}",
                    self.inner.workspace_id, request.workspace_id
                ),
            ));
        }
        Ok(())
    }

    /// Start the automatic loop. Returns false if automatic runs are
    /// disabled or the loop is already running.
    pub fn start_automatic(&self) -> bool {
        if self.inner.config.auto_interval().is_none() {
            debug!(workspace_id = %self.inner.workspace_id, "Automatic compaction disabled");
            return false;
        }

        let mut shutdown = self.shutdown_tx.lock().unwrap_or_else(|e| e.into_inner());
        if shutdown.is_some() {
            return false;
        }

        let (tx, mut rx) = mpsc::channel::<()>(1);
        *shutdown = Some(tx);

        let inner = self.inner.clone();
        let poll = Duration::from_secs(inner.config.poll_interval_secs);
        info!(
            workspace_id = %inner.workspace_id,
            interval_days = inner.config.auto_interval_days,
            poll_secs = inner.config.poll_interval_secs,
            "Automatic compaction started"
        );

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = ticker.tick() => {
                        match inner.run_due().await {
                            Ok(Some(response)) => debug!(
                                workspace_id = %inner.workspace_id,
                                compacted = response.compacted_clusters,
                                "Automatic compaction completed"
                            ),
                            Ok(None) => {}
                            Err(e) if e.is_lock_failure() => debug!(
                                workspace_id = %inner.workspace_id,
                                error = %e,
                                "Automatic compaction deferred"
                            ),
                            Err(e) => warn!(
                                workspace_id = %inner.workspace_id,
                                error = %e,
                                "Automatic compaction failed"
                            ),
                        }
                    }
                }
            }
            info!(workspace_id = %inner.workspace_id, "Automatic compaction stopped");
        });

        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
        true
    }

    /// Stop the automatic loop and wait for it to exit.
    pub async fn stop_automatic(&self) {
        let tx = self.shutdown_tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(tx) = tx {
            let _ = tx.send(()).await;
        }

        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Automatic compaction task ended abnormally");
            }
        }
    }

    pub fn is_automatic_running(&self) -> bool {
        self.shutdown_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

impl Drop for CompactionScheduler {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
    }
}
