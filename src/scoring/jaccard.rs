// Jaccard coefficient over syscall identity sets, plus name overlap metrics

use super::{first_occurrences, pinned_trace, shared_identity_mapping, ScoringMethod, ScoringResult};
use crate::equality::SyscallEquality;
use crate::preprocessing::HoleSet;
use crate::trace::Strace;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// |A ∩ B| / |A ∪ B| over distinct syscall identities
///
/// Both sets empty scores 1.0; exactly one empty scores 0.0. The mapping
/// pairs the first occurrence of each shared identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct JaccardCoefficient;

impl ScoringMethod for JaccardCoefficient {
    fn name(&self) -> &'static str {
        "jaccard"
    }

    fn score(
        &self,
        s1: &Arc<Strace>,
        s2: &Arc<Strace>,
        pinned: &HoleSet,
        equality: &dyn SyscallEquality,
    ) -> ScoringResult {
        let a = pinned_trace(s1, pinned);
        let b = pinned_trace(s2, pinned);

        let first_a = first_occurrences(&a, equality);
        let first_b = first_occurrences(&b, equality);
        let intersection = first_a.keys().filter(|k| first_b.contains_key(*k)).count();
        let union = first_a.len() + first_b.len() - intersection;

        let score = if union == 0 {
            1.0
        } else {
            intersection as f64 / union as f64
        };
        let mapping = shared_identity_mapping(&first_a, &first_b);

        ScoringResult::new(a, b, score, mapping, self.name(), equality.name())
            .with_metadata("intersection", intersection)
            .with_metadata("union", union)
    }
}

/// Syscall-name overlap between two traces
///
/// Reports which syscall names both traces share and which are unique to
/// either side, e.g. to compare a build-time trace against a runtime trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyscallOverlap {
    pub common: BTreeSet<String>,
    pub source_only: BTreeSet<String>,
    pub target_only: BTreeSet<String>,
    /// |common| / |source ∪ target|, 1.0 when both are empty
    pub overlap_ratio: f64,
}

impl SyscallOverlap {
    pub fn compute(source: &Strace, target: &Strace) -> Self {
        let a: BTreeSet<String> = source.iter().map(|c| c.name.clone()).collect();
        let b: BTreeSet<String> = target.iter().map(|c| c.name.clone()).collect();

        let common: BTreeSet<String> = a.intersection(&b).cloned().collect();
        let source_only: BTreeSet<String> = a.difference(&b).cloned().collect();
        let target_only: BTreeSet<String> = b.difference(&a).cloned().collect();
        let union = common.len() + source_only.len() + target_only.len();
        let overlap_ratio = if union == 0 {
            1.0
        } else {
            common.len() as f64 / union as f64
        };

        SyscallOverlap {
            common,
            source_only,
            target_only,
            overlap_ratio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equality::NameEquality;
    use crate::trace::{Literal, Syscall};

    fn names(names: &[&str]) -> Arc<Strace> {
        Arc::new(Strace::new(
            "t",
            names
                .iter()
                .map(|n| Syscall::from_literals(*n, vec![], Literal::int(0)))
                .collect(),
        ))
    }

    fn jaccard(a: &[&str], b: &[&str]) -> ScoringResult {
        JaccardCoefficient.score(&names(a), &names(b), &HoleSet::new(), &NameEquality)
    }

    #[test]
    fn test_partial_overlap() {
        let result = jaccard(&["open", "read", "close"], &["open", "write", "close"]);
        assert!((result.score - 0.5).abs() < 1e-12);
        assert_eq!(result.mapping, vec![(0, 0), (2, 2)]);
        assert_eq!(result.metadata.get("intersection").map(String::as_str), Some("2"));
        assert_eq!(result.method(), Some("jaccard"));
    }

    #[test]
    fn test_duplicates_count_once() {
        let result = jaccard(&["read", "read", "read"], &["read"]);
        assert_eq!(result.score, 1.0);
        assert_eq!(result.mapping, vec![(0, 0)]);
    }

    #[test]
    fn test_empty_edge_cases() {
        assert_eq!(jaccard(&[], &[]).score, 1.0);
        assert_eq!(jaccard(&["open"], &[]).score, 0.0);
        assert_eq!(jaccard(&[], &["open"]).score, 0.0);
    }

    #[test]
    fn test_disjoint() {
        let result = jaccard(&["socket", "connect", "send"], &["open", "read", "close"]);
        assert_eq!(result.score, 0.0);
        assert!(result.mapping.is_empty());
    }

    #[test]
    fn test_overlap_metrics() {
        let overlap = SyscallOverlap::compute(
            &names(&["open", "read", "mmap"]),
            &names(&["open", "read", "socket"]),
        );
        assert_eq!(overlap.common.len(), 2);
        assert!(overlap.source_only.contains("mmap"));
        assert!(overlap.target_only.contains("socket"));
        assert!((overlap.overlap_ratio - 0.5).abs() < 1e-12);

        let empty = SyscallOverlap::compute(&names(&[]), &names(&[]));
        assert_eq!(empty.overlap_ratio, 1.0);
    }
}
