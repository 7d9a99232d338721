//! Conflict heuristics over merged decision statements.
//!
//! Detection is advisory: a detected conflict never blocks the merge, it is
//! surfaced to the caller and the ledger.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Which rule matched a pair of statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictRule {
    /// One statement is the negation of the other.
    Negation,
    /// The statements differ only by a pair of opposite verbs.
    OppositeVerb,
}

/// Two literal statements that contradict each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictCandidate {
    /// Earlier statement in merged order.
    pub first: String,
    pub second: String,
    pub rule: ConflictRule,
}

/// Narrow seam for conflict heuristics.
pub trait ConflictDetector: Send + Sync {
    /// Scan merged decisions for contradicting pairs.
    fn detect(&self, decisions: &[String]) -> Vec<ConflictCandidate>;
}

const NEGATIONS: &[&str] = &["not", "never", "no", "cannot", "without"];

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "to", "we", "i", "you", "they", "should", "shall", "will", "must", "do",
    "does", "did", "let", "us", "can", "wo", "ca", "please",
];

const OPPOSITE_VERBS: &[(&[&str], &[&str])] = &[
    (
        &["enable", "enables", "enabled", "enabling"],
        &["disable", "disables", "disabled", "disabling"],
    ),
    (
        &["use", "uses", "used", "using"],
        &["avoid", "avoids", "avoided", "avoiding"],
    ),
    (
        &["allow", "allows", "allowed", "allowing"],
        &[
            "forbid",
            "forbids",
            "forbade",
            "forbidden",
            "forbidding",
            "disallow",
            "disallows",
            "disallowed",
        ],
    ),
    (
        &["include", "includes", "included", "including"],
        &["exclude", "excludes", "excluded", "excluding"],
    ),
    (
        &["add", "adds", "added", "adding"],
        &["remove", "removes", "removed", "removing"],
    ),
    (
        &["start", "starts", "started", "starting"],
        &["stop", "stops", "stopped", "stopping"],
    ),
    (
        &["accept", "accepts", "accepted", "accepting"],
        &["reject", "rejects", "rejected", "rejecting"],
    ),
    (
        &["keep", "keeps", "kept", "keeping"],
        &["drop", "drops", "dropped", "dropping"],
    ),
];

/// A statement reduced to its polarity and content terms.
#[derive(Debug, PartialEq, Eq)]
struct Normalized {
    negated: bool,
    terms: BTreeSet<String>,
}

/// Pattern table detector: negation pairs and opposite-verb pairs.
///
/// Statements are compared case-insensitively with punctuation and filler
/// words ("we", "should", "the", ...) removed. Verb inflections listed in the
/// opposite table are folded to one canonical form, so "using" and "use"
/// compare equal.
#[derive(Debug, Clone)]
pub struct PatternConflictDetector {
    negations: HashSet<String>,
    stopwords: HashSet<String>,
    /// Inflected form -> canonical form.
    canonical: HashMap<String, String>,
    /// Canonical form -> canonical opposite.
    opposites: HashMap<String, String>,
}

impl Default for PatternConflictDetector {
    fn default() -> Self {
        let mut detector = Self {
            negations: NEGATIONS.iter().map(|s| s.to_string()).collect(),
            stopwords: STOPWORDS.iter().map(|s| s.to_string()).collect(),
            canonical: HashMap::new(),
            opposites: HashMap::new(),
        };
        for (left, right) in OPPOSITE_VERBS {
            detector = detector.with_opposite_pair(left, right);
        }
        detector
    }
}

impl PatternConflictDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an opposite pair. The first form of each side is canonical.
    pub fn with_opposite_pair(mut self, left: &[&str], right: &[&str]) -> Self {
        let (Some(left_canon), Some(right_canon)) = (left.first(), right.first()) else {
            return self;
        };
        for form in left {
            self.canonical.insert(form.to_string(), left_canon.to_string());
        }
        for form in right {
            self.canonical.insert(form.to_string(), right_canon.to_string());
        }
        self.opposites.insert(left_canon.to_string(), right_canon.to_string());
        self.opposites.insert(right_canon.to_string(), left_canon.to_string());
        self
    }

    fn normalize(&self, statement: &str) -> Normalized {
        let lowered = statement
            .to_lowercase()
            .replace("n't", " not")
            .replace("n\u{2019}t", " not");
        let tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        let mut negated = false;
        let mut terms = BTreeSet::new();
        let mut i = 0;
        while i < tokens.len() {
            let token = tokens[i];
            if token == "no" && tokens.get(i + 1) == Some(&"longer") {
                negated = true;
                i += 2;
                continue;
            }
            if self.negations.contains(token) {
                negated = true;
            } else if !self.stopwords.contains(token) {
                let term = self.canonical.get(token).map(String::as_str).unwrap_or(token);
                terms.insert(term.to_string());
            }
            i += 1;
        }

        Normalized { negated, terms }
    }

    fn match_pair(&self, a: &Normalized, b: &Normalized) -> Option<ConflictRule> {
        if a.terms.is_empty() || b.terms.is_empty() {
            return None;
        }

        if a.negated != b.negated {
            return (a.terms == b.terms).then_some(ConflictRule::Negation);
        }

        for term in &a.terms {
            let Some(opposite) = self.opposites.get(term) else {
                continue;
            };
            if !b.terms.contains(opposite) {
                continue;
            }
            let rest_a = a.terms.iter().filter(|t| *t != term);
            let rest_b = b.terms.iter().filter(|t| *t != opposite);
            if rest_a.eq(rest_b) {
                return Some(ConflictRule::OppositeVerb);
            }
        }
        None
    }
}

impl ConflictDetector for PatternConflictDetector {
    fn detect(&self, decisions: &[String]) -> Vec<ConflictCandidate> {
        let normalized: Vec<Normalized> = decisions.iter().map(|d| self.normalize(d)).collect();

        let mut candidates = Vec::new();
        for i in 0..decisions.len() {
            for j in (i + 1)..decisions.len() {
                if decisions[i] == decisions[j] {
                    continue;
                }
                if let Some(rule) = self.match_pair(&normalized[i], &normalized[j]) {
                    candidates.push(ConflictCandidate {
                        first: decisions[i].clone(),
                        second: decisions[j].clone(),
                        rule,
                    });
                }
            }
        }
        candidates
    }
}
