// Composite scoring: weighted mean of several methods

use super::{ScoringMethod, ScoringResult};
use crate::equality::SyscallEquality;
use crate::preprocessing::HoleSet;
use crate::trace::Strace;
use std::sync::Arc;

/// Weighted mean of component scores
///
/// The mapping comes from the first component that produced a non-empty
/// one; per-component scores are recorded as `score.<method>` metadata.
#[derive(Default)]
pub struct Composite {
    components: Vec<(Box<dyn ScoringMethod>, f64)>,
}

impl Composite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<M: ScoringMethod + 'static>(mut self, method: M, weight: f64) -> Self {
        self.components.push((Box::new(method), weight));
        self
    }

    pub fn push(&mut self, method: Box<dyn ScoringMethod>, weight: f64) {
        self.components.push((method, weight));
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

impl std::fmt::Debug for Composite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .components
            .iter()
            .map(|(m, w)| format!("{}*{}", m.name(), w))
            .collect();
        f.debug_tuple("Composite").field(&parts).finish()
    }
}

impl ScoringMethod for Composite {
    fn name(&self) -> &'static str {
        "composite"
    }

    fn score(
        &self,
        s1: &Arc<Strace>,
        s2: &Arc<Strace>,
        pinned: &HoleSet,
        equality: &dyn SyscallEquality,
    ) -> ScoringResult {
        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        let mut mapping: Option<Vec<(usize, usize)>> = None;
        let mut compared: Option<(Arc<Strace>, Arc<Strace>)> = None;
        let mut parts = Vec::with_capacity(self.components.len());

        for (method, weight) in &self.components {
            let weight = weight.max(0.0);
            let result = method.score(s1, s2, pinned, equality);
            weighted += result.score * weight;
            total_weight += weight;
            parts.push((method.name(), result.score));

            if mapping.is_none() && !result.mapping.is_empty() {
                mapping = Some(result.mapping.clone());
            }
            if compared.is_none() {
                compared = Some((result.s1, result.s2));
            }
        }

        let score = if total_weight > 0.0 {
            weighted / total_weight
        } else {
            0.0
        };
        let (a, b) = compared.unwrap_or_else(|| (Arc::clone(s1), Arc::clone(s2)));

        let mut result = ScoringResult::new(a, b, score, mapping.unwrap_or_default(), self.name(), equality.name());
        for (name, part) in parts {
            result = result.with_metadata(format!("score.{}", name), part);
        }
        result
    }
}
