// Scoring methods: similarity score + position mapping between two traces
//
// Each method consumes two (preprocessed) traces, a set of pinned hole
// positions treated as wildcards, and an equality strategy. Scores are
// clamped to [0, 1]; inputs are never mutated.
//
// Methods:
// - JaccardCoefficient: set overlap of syscall identities
// - Tfidf: cosine similarity of identity frequency vectors weighted by
//   inverse document frequency over a corpus
// - MaximumCardinalityMatching: bipartite matching of positions, with an
//   order-preserving tie-break
// - Composite: weighted mean of other methods

mod composite;
mod jaccard;
mod matching;
mod tfidf;

pub use composite::Composite;
pub use jaccard::{JaccardCoefficient, SyscallOverlap};
pub use matching::MaximumCardinalityMatching;
pub use tfidf::{IdfTable, Tfidf};

use crate::equality::SyscallEquality;
use crate::preprocessing::HoleSet;
use crate::trace::Strace;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Result of comparing two traces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringResult {
    /// Left trace as compared (pinned holes applied)
    pub s1: Arc<Strace>,
    /// Right trace as compared
    pub s2: Arc<Strace>,
    /// Similarity in [0, 1]
    pub score: f64,
    /// `(i, j)`: position i of `s1` corresponds to position j of `s2`
    pub mapping: Vec<(usize, usize)>,
    /// Free-form details (`method`, `equality`, method-specific counts)
    pub metadata: BTreeMap<String, String>,
}

impl ScoringResult {
    pub fn new(
        s1: Arc<Strace>,
        s2: Arc<Strace>,
        score: f64,
        mapping: Vec<(usize, usize)>,
        method: &str,
        equality: &str,
    ) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("method".to_string(), method.to_string());
        metadata.insert("equality".to_string(), equality.to_string());
        ScoringResult {
            s1,
            s2,
            score: clamp_score(score),
            mapping,
            metadata,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }

    pub fn method(&self) -> Option<&str> {
        self.metadata.get("method").map(String::as_str)
    }
}

/// NaN counts as no similarity
pub(crate) fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// A similarity algorithm over two traces
pub trait ScoringMethod: Send + Sync {
    /// Method name used in reports and cache keys
    fn name(&self) -> &'static str;

    fn score(
        &self,
        s1: &Arc<Strace>,
        s2: &Arc<Strace>,
        pinned: &HoleSet,
        equality: &dyn SyscallEquality,
    ) -> ScoringResult;
}

/// Configurable choice of scoring method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    Jaccard,
    Tfidf,
    MaximumMatching,
}

impl MethodKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MethodKind::Jaccard => "jaccard",
            MethodKind::Tfidf => "tfidf",
            MethodKind::MaximumMatching => "maximum_matching",
        }
    }
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MethodKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jaccard" => Ok(MethodKind::Jaccard),
            "tfidf" => Ok(MethodKind::Tfidf),
            "maximum_matching" | "mcm" => Ok(MethodKind::MaximumMatching),
            other => Err(format!(
                "unknown scoring method '{}', expected jaccard, tfidf or maximum_matching",
                other
            )),
        }
    }
}

/// Apply pins, reusing the original `Arc` when nothing is pinned
pub(crate) fn pinned_trace(trace: &Arc<Strace>, pinned: &HoleSet) -> Arc<Strace> {
    if pinned.is_empty() {
        Arc::clone(trace)
    } else {
        Arc::new(pinned.apply(trace))
    }
}

/// Ordered distinct identities with the position of their first occurrence
pub(crate) fn first_occurrences(trace: &Strace, equality: &dyn SyscallEquality) -> HashMap<String, usize> {
    let mut seen = HashMap::new();
    for (i, call) in trace.iter().enumerate() {
        seen.entry(equality.identity(call)).or_insert(i);
    }
    seen
}

/// Pairs of first occurrences of every identity present in both traces, sorted
pub(crate) fn shared_identity_mapping(
    a: &HashMap<String, usize>,
    b: &HashMap<String, usize>,
) -> Vec<(usize, usize)> {
    let mut mapping: Vec<(usize, usize)> = a
        .iter()
        .filter_map(|(id, &i)| b.get(id).map(|&j| (i, j)))
        .collect();
    mapping.sort_unstable();
    mapping
}
