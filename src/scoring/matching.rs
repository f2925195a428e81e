// Maximum cardinality bipartite matching between trace positions
//
// Left vertices are positions of trace A, right vertices positions of B;
// i—j is an edge iff the equality strategy holds for A[i] and B[j].
//
// The matching is seeded with a longest order-preserving matching (LCS over
// the adjacency relation), then grown with augmenting paths (Kuhn) visiting
// left vertices and their candidates in ascending index order. When a
// monotonic maximum matching exists the seed already is one, so the result
// reads as a coherent in-order correspondence.
//
// The LCS seed needs (|A|+1)·(|B|+1) table cells. Past LCS_CELL_LIMIT the seed
// is a greedy in-order matching instead; the unordered matching is still
// maximum, the ordered one is then maximal rather than longest.

use super::{pinned_trace, ScoringMethod, ScoringResult};
use crate::equality::SyscallEquality;
use crate::preprocessing::HoleSet;
use crate::trace::Strace;
use std::sync::Arc;

/// Largest LCS table built for the seed (about 36 MiB)
const LCS_CELL_LIMIT: usize = 1 << 22;

/// Maximum cardinality matching; score = |matching| / max(|A|, |B|)
#[derive(Debug, Clone, Copy, Default)]
pub struct MaximumCardinalityMatching {
    ordered: bool,
}

impl MaximumCardinalityMatching {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only order-preserving matchings (no crossing pairs)
    pub fn ordered() -> Self {
        MaximumCardinalityMatching { ordered: true }
    }

    pub fn is_ordered(&self) -> bool {
        self.ordered
    }
}

impl ScoringMethod for MaximumCardinalityMatching {
    fn name(&self) -> &'static str {
        "maximum_matching"
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
        let (n, m) = (a.len(), b.len());

        let adjacency: Vec<Vec<usize>> = a
            .iter()
            .map(|left| {
                b.iter()
                    .enumerate()
                    .filter(|(_, right)| equality.equal(left, right))
                    .map(|(j, _)| j)
                    .collect()
            })
            .collect();

        let mapping = maximum_matching(&adjacency, m, self.ordered);
        let score = match n.max(m) {
            0 => 1.0,
            longest => mapping.len() as f64 / longest as f64,
        };

        ScoringResult::new(a, b, score, mapping, self.name(), equality.name())
            .with_metadata("ordered", self.ordered)
    }
}

/// Matching over `adjacency` (left i → ascending right candidates), sorted by i
pub(crate) fn maximum_matching(
    adjacency: &[Vec<usize>],
    right_len: usize,
    ordered: bool,
) -> Vec<(usize, usize)> {
    matching_with_seed_limit(adjacency, right_len, ordered, LCS_CELL_LIMIT)
}

fn matching_with_seed_limit(
    adjacency: &[Vec<usize>],
    right_len: usize,
    ordered: bool,
    cell_limit: usize,
) -> Vec<(usize, usize)> {
    let left_len = adjacency.len();
    let mut match_left: Vec<Option<usize>> = vec![None; left_len];
    let mut match_right: Vec<Option<usize>> = vec![None; right_len];

    for (i, j) in ordered_seed(adjacency, right_len, cell_limit) {
        match_left[i] = Some(j);
        match_right[j] = Some(i);
    }

    if !ordered {
        for i in 0..left_len {
            if match_left[i].is_none() {
                let mut visited = vec![false; right_len];
                augment(i, adjacency, &mut visited, &mut match_left, &mut match_right);
            }
        }
    }

    match_left
        .into_iter()
        .enumerate()
        .filter_map(|(i, j)| j.map(|j| (i, j)))
        .collect()
}

fn ordered_seed(adjacency: &[Vec<usize>], right_len: usize, cell_limit: usize) -> Vec<(usize, usize)> {
    let cells = (adjacency.len() + 1).saturating_mul(right_len + 1);
    if cells > cell_limit {
        tracing::debug!(cells, "Trace pair too large for LCS seed, seeding greedily");
        return greedy_ordered_matching(adjacency);
    }
    longest_ordered_matching(adjacency, right_len)
}

/// Each left vertex takes its first candidate past the previous pair
fn greedy_ordered_matching(adjacency: &[Vec<usize>]) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    let mut next = 0;
    for (i, candidates) in adjacency.iter().enumerate() {
        let k = candidates.partition_point(|&j| j < next);
        if let Some(&j) = candidates.get(k) {
            pairs.push((i, j));
            next = j + 1;
        }
    }
    pairs
}

/// LCS over the edge relation; among equal-length answers prefers earlier pairs
fn longest_ordered_matching(adjacency: &[Vec<usize>], right_len: usize) -> Vec<(usize, usize)> {
    let left_len = adjacency.len();
    if left_len == 0 || right_len == 0 {
        return Vec::new();
    }

    let mut edge = vec![vec![false; right_len]; left_len];
    for (i, candidates) in adjacency.iter().enumerate() {
        for &j in candidates {
            edge[i][j] = true;
        }
    }

    let mut dp = vec![vec![0usize; right_len + 1]; left_len + 1];
    for i in 1..=left_len {
        for j in 1..=right_len {
            dp[i][j] = if edge[i - 1][j - 1] {
                dp[i - 1][j - 1] + 1
            } else {
                dp[i - 1][j].max(dp[i][j - 1])
            };
        }
    }

    let mut pairs = Vec::with_capacity(dp[left_len][right_len]);
    let (mut i, mut j) = (left_len, right_len);
    while i > 0 && j > 0 {
        if edge[i - 1][j - 1] && dp[i][j] == dp[i - 1][j - 1] + 1 {
            pairs.push((i - 1, j - 1));
            i -= 1;
            j -= 1;
        } else if dp[i - 1][j] >= dp[i][j - 1] {
            i -= 1;
        } else {
            j -= 1;
        }
    }
    pairs.reverse();
    pairs
}

fn augment(
    i: usize,
    adjacency: &[Vec<usize>],
    visited: &mut [bool],
    match_left: &mut [Option<usize>],
    match_right: &mut [Option<usize>],
) -> bool {
    for &j in &adjacency[i] {
        if visited[j] {
            continue;
        }
        visited[j] = true;
        let free = match match_right[j] {
            None => true,
            Some(k) => augment(k, adjacency, visited, match_left, match_right),
        };
        if free {
            match_left[i] = Some(j);
            match_right[j] = Some(i);
            return true;
        }
    }
    false
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

    fn mcm(method: MaximumCardinalityMatching, a: &[&str], b: &[&str]) -> ScoringResult {
        method.score(&names(a), &names(b), &HoleSet::new(), &NameEquality)
    }

    #[test]
    fn test_identical_sequences() {
        let r = mcm(MaximumCardinalityMatching::new(), &["open", "read", "close"], &["open", "read", "close"]);
        assert_eq!(r.score, 1.0);
        assert_eq!(r.mapping, vec![(0, 0), (1, 1), (2, 2)]);
    }

    #[test]
    fn test_score_uses_longer_trace() {
        let r = mcm(MaximumCardinalityMatching::new(), &["open", "close"], &["open", "read", "write", "close"]);
        assert_eq!(r.mapping, vec![(0, 0), (1, 3)]);
        assert!((r.score - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_reordering_matched_when_unordered() {
        let r = mcm(MaximumCardinalityMatching::new(), &["read", "write"], &["write", "read"]);
        assert_eq!(r.score, 1.0);
        assert_eq!(r.mapping, vec![(0, 1), (1, 0)]);

        let ordered = mcm(MaximumCardinalityMatching::ordered(), &["read", "write"], &["write", "read"]);
        assert_eq!(ordered.mapping.len(), 1);
        assert!((ordered.score - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_prefers_monotonic_matching() {
        // Each read could pair with either read; the in-order pairing wins
        let r = mcm(MaximumCardinalityMatching::new(), &["read", "read", "close"], &["read", "read", "close"]);
        assert_eq!(r.mapping, vec![(0, 0), (1, 1), (2, 2)]);
    }

    #[test]
    fn test_augmentation_reaches_maximum() {
        // LCS = 2 (a, b) but three pairs are possible
        let r = mcm(MaximumCardinalityMatching::new(), &["c", "a", "b"], &["a", "b", "c"]);
        assert_eq!(r.mapping.len(), 3);
        assert_eq!(r.score, 1.0);
    }

    #[test]
    fn test_empty_cases() {
        assert_eq!(mcm(MaximumCardinalityMatching::new(), &[], &[]).score, 1.0);
        assert_eq!(mcm(MaximumCardinalityMatching::new(), &["open"], &[]).score, 0.0);
    }

    #[test]
    fn test_disjoint() {
        let r = mcm(MaximumCardinalityMatching::new(), &["socket", "connect", "send"], &["open", "read", "close"]);
        assert_eq!(r.score, 0.0);
        assert!(r.mapping.is_empty());
    }

    #[test]
    fn test_maximum_matching_raw() {
        // 0-{0,1}, 1-{0}: greedy would block, augmentation fixes it
        let adjacency = vec![vec![0, 1], vec![0]];
        let m = maximum_matching(&adjacency, 2, false);
        assert_eq!(m.len(), 2);
        assert!(m.contains(&(1, 0)));
    }

    #[test]
    fn test_oversized_pair_seeds_greedily() {
        // c a b / a b c: greedy takes c-c first, then nothing fits in order
        let adjacency = vec![vec![2], vec![0], vec![1]];
        assert_eq!(ordered_seed(&adjacency, 3, 0), vec![(0, 2)]);
        assert_eq!(ordered_seed(&adjacency, 3, usize::MAX), vec![(1, 0), (2, 1)]);

        // Unordered matching stays maximum without the LCS table
        let m = matching_with_seed_limit(&adjacency, 3, false, 0);
        assert_eq!(m, vec![(0, 2), (1, 0), (2, 1)]);

        let ordered = matching_with_seed_limit(&adjacency, 3, true, 0);
        for pair in ordered.windows(2) {
            assert!(pair[0].0 < pair[1].0 && pair[0].1 < pair[1].1);
        }
    }
}
