//! Hashing Utilities
//!
//! Cluster and conflict ids are derived from content so that re-detecting the
//! same cluster or contradiction always yields the same id.

use sha2::{Digest, Sha256};

/// Compute SHA-256 hash of content and return as hex string
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Stable id for a cluster, derived from its sorted member ids.
pub fn cluster_id(sorted_member_ids: &[String]) -> String {
    format!("cl-{}", &content_hash(&sorted_member_ids.join("\n"))[..16])
}

/// Stable id for a conflict between two statements within a cluster.
pub fn conflict_id(cluster_id: &str, first: &str, second: &str) -> String {
    let key = format!("{}\n{}\n{}", cluster_id, first, second);
    format!("conf-{}", &content_hash(&key)[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_hash() {
        // Known SHA-256 hash for "hello"
        assert_eq!(
            content_hash("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_cluster_id_is_stable() {
        let ids = vec!["a".to_string(), "b".to_string()];
        assert_eq!(cluster_id(&ids), cluster_id(&ids.clone()));
        assert!(cluster_id(&ids).starts_with("cl-"));
        assert_eq!(cluster_id(&ids).len(), 19);

        let other = vec!["a".to_string(), "c".to_string()];
        assert_ne!(cluster_id(&ids), cluster_id(&other));
    }

    #[test]
    fn test_conflict_id_depends_on_order() {
        let a = conflict_id("cl-1", "use React", "do not use React");
        let b = conflict_id("cl-1", "do not use React", "use React");
        assert_ne!(a, b);
        assert_eq!(a, conflict_id("cl-1", "use React", "do not use React"));
    }
}
