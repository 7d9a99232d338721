//! Run driver for one compaction pass over a workspace.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::cluster::{Cluster, ClusterDetector};
use super::conflict::{ConflictDetector, PatternConflictDetector};
use super::merge::Merger;
use super::scheduler::SchedulerState;
use super::supersede::SupersedenceWriter;
use super::{CompactionRequest, CompactionResponse, ConflictPersistFailure};
use crate::error::{Error, Result};
use crate::hashing;
use crate::ledger::ConflictStore;
use crate::lock::{LockHandle, MaintenanceLock};
use crate::memory::RecordStore;
use crate::types::{ConflictEntry, MemoryRecord, RecordFilter, RecordStatus};

/// Consolidates eligible clusters into DecisionRecords.
#[derive(Clone)]
pub struct Compactor {
    store: Arc<dyn RecordStore>,
    ledger: Arc<dyn ConflictStore>,
    detector: Arc<dyn ConflictDetector>,
    writer: SupersedenceWriter,
    lock: MaintenanceLock,
    lock_wait: Option<Duration>,
}

impl Compactor {
    /// Create a compactor using the default pattern conflict detector.
    pub fn new(
        store: Arc<dyn RecordStore>,
        ledger: Arc<dyn ConflictStore>,
        lock: MaintenanceLock,
    ) -> Self {
        Self {
            writer: SupersedenceWriter::new(store.clone()),
            store,
            ledger,
            detector: Arc::new(PatternConflictDetector::default()),
            lock,
            lock_wait: None,
        }
    }

    /// Swap in a different conflict detector.
    pub fn with_detector(mut self, detector: Arc<dyn ConflictDetector>) -> Self {
        self.detector = detector;
        self
    }

    /// Default lock wait for requests that do not set one.
    pub fn with_lock_wait(mut self, wait: Option<Duration>) -> Self {
        self.lock_wait = wait;
        self
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn ledger(&self) -> &Arc<dyn ConflictStore> {
        &self.ledger
    }

    pub fn lock(&self) -> &MaintenanceLock {
        &self.lock
    }

    /// Run compaction for the request's workspace.
    pub async fn run(&self, request: &CompactionRequest) -> Result<CompactionResponse> {
        self.execute(request, None, None).await
    }

    /// Run compaction, stopping between clusters once `cancel` reads true.
    ///
    /// Clusters committed before the signal stay committed. The lock is
    /// released on every exit.
    pub async fn run_with_cancel(
        &self,
        request: &CompactionRequest,
        cancel: watch::Receiver<bool>,
    ) -> Result<CompactionResponse> {
        self.execute(request, Some(&cancel), None).await
    }

    pub(crate) async fn execute(
        &self,
        request: &CompactionRequest,
        cancel: Option<&watch::Receiver<bool>>,
        phase: Option<&watch::Sender<SchedulerState>>,
    ) -> Result<CompactionResponse> {
        request.validate()?;
        let workspace_id = request.workspace_id.as_str();

        set_phase(phase, SchedulerState::Acquiring);
        let wait = request.lock_wait().or(self.lock_wait);
        let mut handle = self.lock.acquire(workspace_id, wait).await?;

        set_phase(phase, SchedulerState::Running);
        let started = Instant::now();
        let now = Utc::now();
        info!(
            workspace_id = %workspace_id,
            dry_run = request.dry_run,
            min_cluster_size = request.min_cluster_size,
            min_age_days = request.min_age_days,
            "Compaction run started"
        );

        let snapshot = self.store.list_records(workspace_id, &RecordFilter::default()).await?;
        let mut response = CompactionResponse::new(request.dry_run);

        let claimed = self
            .recover(&handle, &snapshot, request.dry_run, now, cancel, phase, &mut response)
            .await?;

        let eligible: Vec<MemoryRecord> = snapshot
            .iter()
            .filter(|record| record.is_active() && !claimed.contains(&record.id))
            .cloned()
            .collect();
        let by_id: HashMap<&str, &MemoryRecord> =
            eligible.iter().map(|r| (r.id.as_str(), r)).collect();

        let clusters = ClusterDetector::new(request.policy()).detect(&eligible, now);
        debug!(workspace_id = %workspace_id, clusters = clusters.len(), "Clusters detected");

        for cluster in &clusters {
            check_cancelled(cancel, &response)?;
            handle.renew()?;

            let members: Vec<&MemoryRecord> = cluster
                .member_ids
                .iter()
                .filter_map(|id| by_id.get(id.as_str()).copied())
                .collect();
            let Some(candidate) = Merger.merge(&members, now) else {
                continue;
            };
            let sorted = Merger::sort_members(&members);
            let conflicts = self.conflict_entries(
                workspace_id,
                cluster,
                &candidate.content.decisions,
                &sorted,
                now,
            );

            if request.dry_run {
                debug!(
                    cluster_id = %cluster.id,
                    topic_id = %cluster.topic_id,
                    members = cluster.len(),
                    "Previewing cluster"
                );
                response.compacted_clusters += 1;
                response.decision_records_created += 1;
                response.superseded_summaries += cluster.len();
                for entry in &conflicts {
                    response.record_conflict(entry);
                }
                response.previews.push(self.writer.preview(workspace_id, cluster, &candidate));
                continue;
            }

            set_phase(phase, SchedulerState::Committing);
            match self.writer.commit(workspace_id, cluster, &candidate).await {
                Ok(outcome) => {
                    debug!(
                        cluster_id = %cluster.id,
                        topic_id = %cluster.topic_id,
                        decision_record_id = %outcome.decision_record_id,
                        superseded = outcome.superseded,
                        "Cluster committed"
                    );
                    response.compacted_clusters += 1;
                    if outcome.created {
                        response.decision_records_created += 1;
                    } else {
                        response.resumed_clusters += 1;
                    }
                    response.superseded_summaries += outcome.superseded;
                    self.persist_conflicts(conflicts, &mut response).await;
                }
                Err(e) => {
                    let error = Error::cluster_write(&cluster.id, &e);
                    warn!(
                        cluster_id = %cluster.id,
                        topic_id = %cluster.topic_id,
                        error = %e,
                        "Cluster write failed"
                    );
                    response.record_failure(cluster, &error);
                }
            }
            set_phase(phase, SchedulerState::Running);
        }

        handle.release();
        info!(
            workspace_id = %workspace_id,
            dry_run = request.dry_run,
            compacted = response.compacted_clusters,
            created = response.decision_records_created,
            superseded = response.superseded_summaries,
            resumed = response.resumed_clusters,
            conflicts = response.conflicts_detected,
            failed = response.failed_clusters,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Compaction run finished"
        );
        Ok(response)
    }

    /// Finish clusters whose DecisionRecord exists but whose members are
    /// still partly Active. Returns every id claimed by a DecisionRecord.
    #[allow(clippy::too_many_arguments)]
    async fn recover(
        &self,
        handle: &LockHandle,
        snapshot: &[MemoryRecord],
        dry_run: bool,
        now: DateTime<Utc>,
        cancel: Option<&watch::Receiver<bool>>,
        phase: Option<&watch::Sender<SchedulerState>>,
        response: &mut CompactionResponse,
    ) -> Result<HashSet<String>> {
        let workspace_id = handle.workspace_id();
        let by_id: HashMap<&str, &MemoryRecord> =
            snapshot.iter().map(|r| (r.id.as_str(), r)).collect();
        let mut claimed = HashSet::new();

        for decision in snapshot.iter().filter(|r| r.status == RecordStatus::DecisionRecord) {
            let Some(merged_from) = decision.merged_from.as_ref() else {
                continue;
            };
            claimed.extend(merged_from.iter().cloned());

            let pending: Vec<String> = merged_from
                .iter()
                .filter(|id| by_id.get(id.as_str()).is_some_and(|r| r.is_active()))
                .cloned()
                .collect();
            if pending.is_empty() {
                continue;
            }

            check_cancelled(cancel, response)?;
            handle.renew()?;
            let cluster = Cluster::new(decision.topic_id.clone(), merged_from.clone());
            info!(
                workspace_id = %workspace_id,
                cluster_id = %cluster.id,
                decision_record_id = %decision.id,
                pending = pending.len(),
                "Resuming interrupted cluster"
            );

            let members: Vec<&MemoryRecord> = merged_from
                .iter()
                .filter_map(|id| by_id.get(id.as_str()).copied())
                .collect();
            let sorted = Merger::sort_members(&members);
            let conflicts = self.conflict_entries(
                workspace_id,
                &cluster,
                &decision.content.decisions,
                &sorted,
                now,
            );

            if dry_run {
                response.compacted_clusters += 1;
                response.resumed_clusters += 1;
                response.superseded_summaries += pending.len();
                for entry in &conflicts {
                    response.record_conflict(entry);
                }
                continue;
            }

            set_phase(phase, SchedulerState::Committing);
            match self.writer.supersede_members(&decision.id, &pending).await {
                Ok(moved) => {
                    response.compacted_clusters += 1;
                    response.resumed_clusters += 1;
                    response.superseded_summaries += moved;
                    self.persist_conflicts(conflicts, response).await;
                }
                Err(e) => {
                    let error = Error::cluster_write(&cluster.id, &e);
                    warn!(cluster_id = %cluster.id, error = %e, "Resuming cluster failed");
                    response.record_failure(&cluster, &error);
                }
            }
            set_phase(phase, SchedulerState::Running);
        }

        Ok(claimed)
    }

    fn conflict_entries(
        &self,
        workspace_id: &str,
        cluster: &Cluster,
        decisions: &[String],
        members: &[&MemoryRecord],
        now: DateTime<Utc>,
    ) -> Vec<ConflictEntry> {
        self.detector
            .detect(decisions)
            .into_iter()
            .map(|candidate| ConflictEntry {
                id: hashing::conflict_id(&cluster.id, &candidate.first, &candidate.second),
                workspace_id: workspace_id.to_string(),
                cluster_id: cluster.id.clone(),
                topic_id: cluster.topic_id.clone(),
                summary_ids: contributors(members, &candidate.first, &candidate.second),
                conflicting_decisions: [candidate.first, candidate.second],
                resolved: false,
                resolution: None,
                detected_at: now,
            })
            .collect()
    }

    /// Report conflicts and append them to the ledger. Ledger failures are
    /// recorded and never undo the cluster's commit.
    async fn persist_conflicts(
        &self,
        entries: Vec<ConflictEntry>,
        response: &mut CompactionResponse,
    ) {
        for entry in entries {
            response.record_conflict(&entry);
            let conflict_id = entry.id.clone();
            let cluster_id = entry.cluster_id.clone();

            match self.ledger.append(entry).await {
                Ok(true) => debug!(
                    conflict_id = %conflict_id,
                    cluster_id = %cluster_id,
                    "Conflict recorded"
                ),
                Ok(false) => debug!(conflict_id = %conflict_id, "Conflict already recorded"),
                Err(e) => {
                    warn!(
                        conflict_id = %conflict_id,
                        cluster_id = %cluster_id,
                        error = %e,
                        "Failed to persist conflict"
                    );
                    response.conflict_persist_failures.push(ConflictPersistFailure {
                        conflict_id,
                        cluster_id,
                        error: e.to_string(),
                    });
                }
            }
        }
    }
}

/// Ids of members holding either statement, in member order.
fn contributors(members: &[&MemoryRecord], first: &str, second: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for statement in [first, second] {
        for member in members {
            let holds = member.content.decisions.iter().any(|d| d == statement);
            if holds && !ids.contains(&member.id) {
                ids.push(member.id.clone());
            }
        }
    }
    ids
}

fn set_phase(phase: Option<&watch::Sender<SchedulerState>>, state: SchedulerState) {
    if let Some(tx) = phase {
        tx.send_replace(state);
    }
}

fn check_cancelled(
    cancel: Option<&watch::Receiver<bool>>,
    response: &CompactionResponse,
) -> Result<()> {
    if cancel.is_some_and(|rx| *rx.borrow()) {
        info!(committed = response.compacted_clusters, "Compaction run cancelled");
        return Err(Error::Cancelled {
            committed_clusters: response.compacted_clusters,
        });
    }
    Ok(())
}
