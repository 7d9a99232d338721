//! Deterministic merge of a cluster into one consolidated body.
//!
//! Merging is pure: it reads the member records and returns a candidate,
//! touching no store. Members are ordered by `created_at`, ties broken by id,
//! and every list is deduplicated by exact string equality keeping the first
//! occurrence.

use std::collections::HashSet;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{MemoryRecord, RecordContent};

/// Candidate content for a decision record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeCandidate {
    pub topic_id: String,
    pub content: RecordContent,
    /// Earliest `created_at` among the members.
    pub created_at: DateTime<Utc>,
    /// Time of the compaction run.
    pub updated_at: DateTime<Utc>,
    /// Sorted member ids; the idempotency key of the cluster.
    pub merged_from: Vec<String>,
}

/// Combines cluster members into a [`MergeCandidate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Merger;

impl Merger {
    /// Order members by `created_at`, ties broken by id.
    pub fn sort_members<'a>(members: &[&'a MemoryRecord]) -> Vec<&'a MemoryRecord> {
        let mut sorted = members.to_vec();
        sorted.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        sorted
    }

    /// Merge members into a candidate. Returns `None` for an empty cluster.
    pub fn merge(&self, members: &[&MemoryRecord], now: DateTime<Utc>) -> Option<MergeCandidate> {
        let sorted = Self::sort_members(members);
        let first = sorted.first()?;

        let content = RecordContent {
            decisions: dedup_first(
                sorted.iter().flat_map(|r| r.content.decisions.iter().cloned()),
                |s| s.clone(),
            ),
            rationale: dedup_first(
                sorted.iter().flat_map(|r| r.content.rationale.iter().cloned()),
                |s| s.clone(),
            ),
            references: dedup_first(
                sorted.iter().flat_map(|r| r.content.references.iter().cloned()),
                |reference| reference.target.clone(),
            ),
            open_questions: dedup_first(
                sorted.iter().flat_map(|r| r.content.open_questions.iter().cloned()),
                |s| s.clone(),
            ),
            next_steps: dedup_first(
                sorted.iter().flat_map(|r| r.content.next_steps.iter().cloned()),
                |s| s.clone(),
            ),
        };

        let mut merged_from: Vec<String> = sorted.iter().map(|r| r.id.clone()).collect();
        merged_from.sort();
        merged_from.dedup();

        Some(MergeCandidate {
            topic_id: first.topic_id.clone(),
            content,
            created_at: first.created_at,
            updated_at: now,
            merged_from,
        })
    }
}

/// Keep the first item for each key, preserving order.
fn dedup_first<T, K, I, F>(items: I, key: F) -> Vec<T>
where
    I: IntoIterator<Item = T>,
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut seen = HashSet::new();
    items.into_iter().filter(|item| seen.insert(key(item))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Reference, RecordStatus};
    use chrono::Duration;

    fn record(id: &str, age_days: i64, content: RecordContent, now: DateTime<Utc>) -> MemoryRecord {
        let created_at = now - Duration::days(age_days);
        MemoryRecord {
            id: id.to_string(),
            workspace_id: "ws".into(),
            topic_id: "plan-014".into(),
            status: RecordStatus::Active,
            created_at,
            updated_at: created_at,
            content,
            superseded_by: None,
            merged_from: None,
        }
    }

    fn decisions(items: &[&str]) -> RecordContent {
        RecordContent {
            decisions: items.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_orders_by_creation_and_dedups() {
        let now = Utc::now();
        let newer = record("a", 8, decisions(&["use Postgres", "ship weekly"]), now);
        let older = record("b", 12, decisions(&["use React", "use Postgres"]), now);

        let merged = Merger.merge(&[&newer, &older], now).unwrap();
        assert_eq!(
            merged.content.decisions,
            vec!["use React", "use Postgres", "ship weekly"]
        );
        assert_eq!(merged.created_at, older.created_at);
        assert_eq!(merged.updated_at, now);
        assert_eq!(merged.merged_from, vec!["a", "b"]);
    }

    #[test]
    fn test_ties_broken_by_id() {
        let now = Utc::now();
        let b = record("b", 10, decisions(&["from b"]), now);
        let a = record("a", 10, decisions(&["from a"]), now);

        let merged = Merger.merge(&[&b, &a], now).unwrap();
        assert_eq!(merged.content.decisions, vec!["from a", "from b"]);
    }

    #[test]
    fn test_exact_match_only() {
        let now = Utc::now();
        let a = record("a", 10, decisions(&["Use React"]), now);
        let b = record("b", 9, decisions(&["use React", "Use React"]), now);

        let merged = Merger.merge(&[&a, &b], now).unwrap();
        assert_eq!(merged.content.decisions, vec!["Use React", "use React"]);
    }

    #[test]
    fn test_references_keyed_by_target() {
        let now = Utc::now();
        let a = record(
            "a",
            10,
            RecordContent {
                references: vec![Reference {
                    target: "https://example.com/adr/1".into(),
                    label: Some("ADR 1".into()),
                }],
                ..Default::default()
            },
            now,
        );
        let b = record(
            "b",
            9,
            RecordContent {
                references: vec![
                    Reference::new("https://example.com/adr/1"),
                    Reference::new("TICKET-42"),
                ],
                ..Default::default()
            },
            now,
        );

        let merged = Merger.merge(&[&a, &b], now).unwrap();
        assert_eq!(merged.content.references.len(), 2);
        assert_eq!(merged.content.references[0].label.as_deref(), Some("ADR 1"));
        assert_eq!(merged.content.references[1].target, "TICKET-42");
    }

    #[test]
    fn test_questions_and_next_steps_union() {
        let now = Utc::now();
        let a = record(
            "a",
            10,
            RecordContent {
                open_questions: vec!["SSR?".into()],
                next_steps: vec!["spike".into(), "review".into()],
                rationale: vec!["team knows it".into()],
                ..Default::default()
            },
            now,
        );
        let b = record(
            "b",
            9,
            RecordContent {
                open_questions: vec!["SSR?".into(), "budget?".into()],
                next_steps: vec!["review".into()],
                rationale: vec!["team knows it".into(), "ecosystem".into()],
                ..Default::default()
            },
            now,
        );

        let merged = Merger.merge(&[&a, &b], now).unwrap();
        assert_eq!(merged.content.open_questions, vec!["SSR?", "budget?"]);
        assert_eq!(merged.content.next_steps, vec!["spike", "review"]);
        assert_eq!(merged.content.rationale, vec!["team knows it", "ecosystem"]);
    }

    #[test]
    fn test_merge_is_deterministic() {
        let now = Utc::now();
        let a = record("a", 10, decisions(&["x", "y"]), now);
        let b = record("b", 11, decisions(&["y", "z"]), now);
        let c = record("c", 10, decisions(&["w"]), now);

        let first = Merger.merge(&[&a, &b, &c], now).unwrap();
        let second = Merger.merge(&[&c, &b, &a], now + Duration::seconds(5)).unwrap();
        assert_eq!(first.content, second.content);
        assert_eq!(first.merged_from, second.merged_from);
    }

    #[test]
    fn test_empty_cluster() {
        assert!(Merger.merge(&[], Utc::now()).is_none());
    }
}
