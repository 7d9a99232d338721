//! Maintenance lock coordinating compaction with the ingestion pipeline.
//!
//! The lock is workspace-scoped and held as an explicit [`LockHandle`].
//! While a handle is alive, ingestion for its workspace is paused through the
//! [`IngestionControl`] it was created with. The handle releases itself on
//! drop, so error returns and cancelled futures cannot leak the lock.
//!
//! The in-process slot only excludes callers sharing one `MaintenanceLock`.
//! With a [`LeaseStore`] attached, acquisition also takes a lease row in the
//! shared database, which excludes other processes and tells their
//! ingestion paths to hold off. Leases expire, so a crashed holder cannot
//! block a workspace forever.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::{Error, LockAcquisitionFailure, Result};

/// Cooperative pause/resume signals sent to the ingestion pipeline.
pub trait IngestionControl: Send + Sync {
    /// Stop admitting new writes for the workspace.
    fn pause(&self, workspace_id: &str);

    /// Resume admitting writes for the workspace.
    fn resume(&self, workspace_id: &str);
}

/// Ingestion control that ignores both signals.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopIngestion;

impl IngestionControl for NoopIngestion {
    fn pause(&self, _workspace_id: &str) {}
    fn resume(&self, _workspace_id: &str) {}
}

/// In-process admission gate for ingestion writers.
///
/// Writers call [`IngestionGate::wait_until_admitted`] before each write;
/// the maintenance lock flips the gate through [`IngestionControl`].
#[derive(Debug, Default, Clone)]
pub struct IngestionGate {
    flags: Arc<StdMutex<HashMap<String, watch::Sender<bool>>>>,
}

impl IngestionGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn subscribe(&self, workspace_id: &str) -> watch::Receiver<bool> {
        let mut flags = self.flags.lock().unwrap_or_else(|e| e.into_inner());
        flags
            .entry(workspace_id.to_string())
            .or_insert_with(|| watch::channel(false).0)
            .subscribe()
    }

    fn set_paused(&self, workspace_id: &str, paused: bool) {
        let mut flags = self.flags.lock().unwrap_or_else(|e| e.into_inner());
        let sender = flags
            .entry(workspace_id.to_string())
            .or_insert_with(|| watch::channel(false).0);
        sender.send_replace(paused);
    }

    /// Whether writes for the workspace are currently paused.
    pub fn is_paused(&self, workspace_id: &str) -> bool {
        let flags = self.flags.lock().unwrap_or_else(|e| e.into_inner());
        flags.get(workspace_id).is_some_and(|tx| *tx.borrow())
    }

    /// Wait until writes for the workspace are admitted.
    pub async fn wait_until_admitted(&self, workspace_id: &str) {
        let mut rx = self.subscribe(workspace_id);
        // The sender lives in the gate's map, so the channel cannot close here.
        let _ = rx.wait_for(|paused| !*paused).await;
    }
}

impl IngestionControl for IngestionGate {
    fn pause(&self, workspace_id: &str) {
        debug!(workspace_id = %workspace_id, "Pausing ingestion");
        self.set_paused(workspace_id, true);
    }

    fn resume(&self, workspace_id: &str) {
        debug!(workspace_id = %workspace_id, "Resuming ingestion");
        self.set_paused(workspace_id, false);
    }
}

/// Cross-process lease backing the maintenance lock.
///
/// Calls are synchronous so a lease can be released from `Drop`.
pub trait LeaseStore: Send + Sync {
    /// Take the workspace's lease unless another owner holds a live one.
    fn try_acquire(&self, workspace_id: &str, owner: &str, ttl: Duration) -> Result<bool>;

    /// Push the expiry of a lease this owner holds. False if it was lost.
    fn renew(&self, workspace_id: &str, owner: &str, ttl: Duration) -> Result<bool>;

    /// Drop the lease if this owner holds it.
    fn release(&self, workspace_id: &str, owner: &str) -> Result<()>;

    /// Whether any owner holds a live lease on the workspace.
    fn is_leased(&self, workspace_id: &str) -> Result<bool>;
}

/// Default lease lifetime. Runs renew it between clusters.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(900);

/// How often a bounded wait re-checks a lease held elsewhere.
const LEASE_POLL: Duration = Duration::from_millis(25);

/// Workspace-scoped mutual exclusion between compaction runs and ingestion.
#[derive(Clone)]
pub struct MaintenanceLock {
    slots: Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>,
    ingestion: Arc<dyn IngestionControl>,
    lease: Option<Arc<dyn LeaseStore>>,
    lease_ttl: Duration,
}

impl MaintenanceLock {
    /// Create a lock that pauses the given ingestion pipeline while held.
    pub fn new(ingestion: Arc<dyn IngestionControl>) -> Self {
        Self {
            slots: Arc::new(StdMutex::new(HashMap::new())),
            ingestion,
            lease: None,
            lease_ttl: DEFAULT_LEASE_TTL,
        }
    }

    /// Create a lock with no ingestion pipeline attached.
    pub fn without_ingestion() -> Self {
        Self::new(Arc::new(NoopIngestion))
    }

    /// Also hold a lease in a store shared with other processes.
    pub fn with_lease(mut self, lease: Arc<dyn LeaseStore>) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    fn slot(&self, workspace_id: &str) -> Result<Arc<Mutex<()>>> {
        let mut slots = self.slots.lock().map_err(|_| Error::LockPoisoned)?;
        Ok(slots
            .entry(workspace_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    /// Acquire the lock for a workspace.
    ///
    /// With `wait = None` a held lock fails immediately with
    /// [`LockAcquisitionFailure::Busy`]; otherwise the call waits up to `wait`
    /// and fails with [`LockAcquisitionFailure::Timeout`]. The in-process slot
    /// is taken first, then the shared lease if one is configured.
    pub async fn acquire(&self, workspace_id: &str, wait: Option<Duration>) -> Result<LockHandle> {
        let started = Instant::now();
        let slot = self.slot(workspace_id)?;

        let guard = match wait {
            None => slot.try_lock_owned().map_err(|_| busy(workspace_id))?,
            Some(wait) => tokio::time::timeout(wait, slot.lock_owned())
                .await
                .map_err(|_| timeout(workspace_id, wait))?,
        };

        let lease = match &self.lease {
            Some(store) => {
                let owner = Uuid::new_v4().to_string();
                self.acquire_lease(store.as_ref(), workspace_id, &owner, wait, started)
                    .await?;
                Some(HeldLease {
                    store: store.clone(),
                    owner,
                    ttl: self.lease_ttl,
                })
            }
            None => None,
        };

        self.ingestion.pause(workspace_id);
        info!(workspace_id = %workspace_id, leased = lease.is_some(), "Maintenance lock acquired");

        Ok(LockHandle {
            workspace_id: workspace_id.to_string(),
            guard: Some(guard),
            lease,
            ingestion: self.ingestion.clone(),
            acquired_at: Instant::now(),
        })
    }

    async fn acquire_lease(
        &self,
        store: &dyn LeaseStore,
        workspace_id: &str,
        owner: &str,
        wait: Option<Duration>,
        started: Instant,
    ) -> Result<()> {
        loop {
            if store.try_acquire(workspace_id, owner, self.lease_ttl)? {
                return Ok(());
            }
            let Some(wait) = wait else {
                return Err(busy(workspace_id).into());
            };
            let elapsed = started.elapsed();
            if elapsed >= wait {
                return Err(timeout(workspace_id, wait).into());
            }
            debug!(workspace_id = %workspace_id, "Lease held by another process, waiting");
            tokio::time::sleep(LEASE_POLL.min(wait - elapsed)).await;
        }
    }

    /// Whether some handle currently holds the workspace's lock, in this
    /// process or, with a lease store, in any process.
    pub fn is_held(&self, workspace_id: &str) -> bool {
        let local = match self.slot(workspace_id) {
            Ok(slot) => slot.try_lock().is_err(),
            Err(_) => false,
        };
        local
            || self
                .lease
                .as_ref()
                .is_some_and(|store| store.is_leased(workspace_id).unwrap_or(false))
    }
}

fn busy(workspace_id: &str) -> LockAcquisitionFailure {
    LockAcquisitionFailure::Busy {
        workspace_id: workspace_id.to_string(),
    }
}

fn timeout(workspace_id: &str, wait: Duration) -> LockAcquisitionFailure {
    LockAcquisitionFailure::Timeout {
        workspace_id: workspace_id.to_string(),
        waited_ms: wait.as_millis() as u64,
    }
}

struct HeldLease {
    store: Arc<dyn LeaseStore>,
    owner: String,
    ttl: Duration,
}

/// Proof of holding the maintenance lock for one workspace.
pub struct LockHandle {
    workspace_id: String,
    guard: Option<OwnedMutexGuard<()>>,
    lease: Option<HeldLease>,
    ingestion: Arc<dyn IngestionControl>,
    acquired_at: Instant,
}

impl LockHandle {
    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn is_released(&self) -> bool {
        self.guard.is_none()
    }

    /// Extend the shared lease. Fails if it expired and was taken over.
    pub fn renew(&self) -> Result<()> {
        let Some(lease) = &self.lease else {
            return Ok(());
        };
        if self.is_released() || !lease.store.renew(&self.workspace_id, &lease.owner, lease.ttl)? {
            return Err(Error::LeaseLost {
                workspace_id: self.workspace_id.clone(),
            });
        }
        Ok(())
    }

    /// Release the lock and resume ingestion. Safe to call more than once.
    pub fn release(&mut self) {
        if let Some(guard) = self.guard.take() {
            // Resume before unlocking so a waiting run's pause is not undone.
            self.ingestion.resume(&self.workspace_id);
            if let Some(lease) = &self.lease {
                if let Err(e) = lease.store.release(&self.workspace_id, &lease.owner) {
                    error!(
                        workspace_id = %self.workspace_id,
                        error = %e,
                        "Failed to release maintenance lease, it will expire"
                    );
                }
            }
            drop(guard);
            info!(
                workspace_id = %self.workspace_id,
                held_ms = self.acquired_at.elapsed().as_millis() as u64,
                "Maintenance lock released"
            );
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("workspace_id", &self.workspace_id)
            .field("released", &self.is_released())
            .finish()
    }
}
