//! Cluster detection.
//!
//! Groups a workspace snapshot into topic clusters eligible for compaction.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::hashing;
use crate::types::MemoryRecord;

/// Eligibility policy for clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterPolicy {
    /// Minimum number of Active records sharing a topic.
    pub min_cluster_size: usize,
    /// Every member must be at least this old.
    pub min_age: Duration,
}

impl ClusterPolicy {
    pub fn new(min_cluster_size: usize, min_age_days: u32) -> Self {
        Self {
            min_cluster_size,
            min_age: Duration::days(min_age_days as i64),
        }
    }
}

impl Default for ClusterPolicy {
    fn default() -> Self {
        Self::new(3, 7)
    }
}

/// An ephemeral group of Active records sharing a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    /// Derived from the member ids, stable across runs.
    pub id: String,
    pub topic_id: String,
    /// Sorted ascending.
    pub member_ids: Vec<String>,
}

impl Cluster {
    pub fn new(topic_id: impl Into<String>, mut member_ids: Vec<String>) -> Self {
        member_ids.sort();
        member_ids.dedup();
        Self {
            id: hashing::cluster_id(&member_ids),
            topic_id: topic_id.into(),
            member_ids,
        }
    }

    pub fn len(&self) -> usize {
        self.member_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.member_ids.is_empty()
    }
}

/// Scans a snapshot of records and groups eligible ones by topic.
#[derive(Debug, Clone, Default)]
pub struct ClusterDetector {
    policy: ClusterPolicy,
}

impl ClusterDetector {
    pub fn new(policy: ClusterPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ClusterPolicy {
        &self.policy
    }

    /// Detect clusters, ordered by topic id.
    ///
    /// Only Active records count. A topic forms a cluster when it has at
    /// least `min_cluster_size` Active records and every one of them is at
    /// least `min_age` old at `now`.
    pub fn detect(&self, records: &[MemoryRecord], now: DateTime<Utc>) -> Vec<Cluster> {
        let mut by_topic: BTreeMap<&str, Vec<&MemoryRecord>> = BTreeMap::new();
        for record in records.iter().filter(|r| r.is_active()) {
            by_topic.entry(record.topic_id.as_str()).or_default().push(record);
        }

        by_topic
            .into_iter()
            .filter(|(_, members)| members.len() >= self.policy.min_cluster_size)
            .filter(|(_, members)| {
                members
                    .iter()
                    .all(|record| now - record.created_at >= self.policy.min_age)
            })
            .map(|(topic_id, members)| {
                Cluster::new(topic_id, members.iter().map(|r| r.id.clone()).collect())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RecordContent, RecordStatus};

    fn record(
        id: &str,
        topic: &str,
        age_days: i64,
        status: RecordStatus,
        now: DateTime<Utc>,
    ) -> MemoryRecord {
        let created_at = now - Duration::days(age_days);
        MemoryRecord {
            id: id.to_string(),
            workspace_id: "ws".into(),
            topic_id: topic.to_string(),
            status,
            created_at,
            updated_at: created_at,
            content: RecordContent::default(),
            superseded_by: None,
            merged_from: None,
        }
    }

    #[test]
    fn test_detects_eligible_topic_with_sorted_members() {
        let now = Utc::now();
        let records = vec![
            record("c", "plan-014", 10, RecordStatus::Active, now),
            record("a", "plan-014", 12, RecordStatus::Active, now),
            record("b", "plan-014", 8, RecordStatus::Active, now),
        ];

        let clusters = ClusterDetector::default().detect(&records, now);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].topic_id, "plan-014");
        assert_eq!(clusters[0].member_ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_below_minimum_size_is_skipped() {
        let now = Utc::now();
        let records = vec![
            record("a", "t", 10, RecordStatus::Active, now),
            record("b", "t", 10, RecordStatus::Active, now),
        ];

        assert!(ClusterDetector::default().detect(&records, now).is_empty());
    }

    #[test]
    fn test_one_young_member_blocks_topic() {
        let now = Utc::now();
        let records = vec![
            record("a", "t", 30, RecordStatus::Active, now),
            record("b", "t", 30, RecordStatus::Active, now),
            record("c", "t", 30, RecordStatus::Active, now),
            record("d", "t", 2, RecordStatus::Active, now),
        ];

        assert!(ClusterDetector::default().detect(&records, now).is_empty());
    }

    #[test]
    fn test_non_active_records_are_ignored() {
        let now = Utc::now();
        let records = vec![
            record("a", "t", 10, RecordStatus::Active, now),
            record("b", "t", 10, RecordStatus::Active, now),
            record("c", "t", 10, RecordStatus::Superseded, now),
            record("d", "t", 10, RecordStatus::DecisionRecord, now),
            // Young but superseded records do not block the topic
            record("e", "t", 1, RecordStatus::Superseded, now),
        ];

        assert!(ClusterDetector::default().detect(&records, now).is_empty());

        let detector = ClusterDetector::new(ClusterPolicy::new(2, 7));
        let clusters = detector.detect(&records, now);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].member_ids, vec!["a", "b"]);
    }

    #[test]
    fn test_clusters_ordered_by_topic_and_stable() {
        let now = Utc::now();
        let records = vec![
            record("z1", "zeta", 9, RecordStatus::Active, now),
            record("a1", "alpha", 9, RecordStatus::Active, now),
        ];
        let detector = ClusterDetector::new(ClusterPolicy::new(1, 0));

        let first = detector.detect(&records, now);
        let topics: Vec<_> = first.iter().map(|c| c.topic_id.as_str()).collect();
        assert_eq!(topics, vec!["alpha", "zeta"]);

        let mut reversed = records.clone();
        reversed.reverse();
        assert_eq!(detector.detect(&reversed, now), first);
    }

    #[test]
    fn test_age_boundary_is_inclusive() {
        let now = Utc::now();
        let records = vec![record("a", "t", 7, RecordStatus::Active, now)];
        let detector = ClusterDetector::new(ClusterPolicy::new(1, 7));
        assert_eq!(detector.detect(&records, now).len(), 1);
    }
}
