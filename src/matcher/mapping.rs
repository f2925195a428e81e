// Parameter mapping and migration synthesis
//
// A confident ScoringResult pairs syscall positions of the source and target
// traces. Argument slots that were holed on both sides of a matched pair are
// the places where invocation-specific data flows; each such slot pair becomes
// a binding, named after the executable parameter whose concrete value
// produced the literal, when one can be found.

use crate::scoring::ScoringResult;
use crate::trace::{meta, ArgumentPath, ExecutableParameter, Literal, Strace, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// An argument position, optionally named by an executable parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterPath {
    pub path: ArgumentPath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
}

impl ParameterPath {
    pub fn new(path: ArgumentPath, parameter: Option<String>) -> Self {
        ParameterPath { path, parameter }
    }
}

/// One source slot feeding one target slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterBinding {
    pub source: ParameterPath,
    pub target: ParameterPath,
}

/// Ordered `(source_path, target_path)` pairs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterMapping {
    bindings: Vec<ParameterBinding>,
}

impl ParameterMapping {
    pub fn new(bindings: Vec<ParameterBinding>) -> Self {
        ParameterMapping { bindings }
    }

    pub fn bindings(&self) -> &[ParameterBinding] {
        &self.bindings
    }

    /// Raw argument path pairs
    pub fn pairs(&self) -> Vec<(ArgumentPath, ArgumentPath)> {
        self.bindings.iter().map(|b| (b.source.path, b.target.path)).collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Translate concrete source parameter values into target parameter values
    ///
    /// Only bindings named on both sides contribute; the first binding for a
    /// target parameter wins.
    pub fn apply(&self, source_values: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for binding in &self.bindings {
            let (Some(src), Some(dst)) = (&binding.source.parameter, &binding.target.parameter) else {
                continue;
            };
            if let Some(value) = source_values.get(src) {
                out.entry(dst.clone()).or_insert_with(|| value.clone());
            }
        }
        out
    }
}

/// A confident match turned into a reusable target invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Source trace after per-trace preprocessing
    pub source: Arc<Strace>,
    /// Target (template) trace after per-trace preprocessing
    pub target: Arc<Strace>,
    pub mapping: ParameterMapping,
    /// Target trace with source-specific values substituted in
    pub migration: Strace,
    pub score: f64,
    /// Corpus key of the winning entry
    pub corpus_key: String,
    /// Matched syscall positions `(source, target)`
    pub positions: Vec<(usize, usize)>,
    /// Scoring metadata of the winning comparison
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Bindings for every argument slot holed on both sides of a matched pair
///
/// `compared` carries the holed traces; `source` and `target` are the same
/// traces before hole punching, holding the literal values. Punching keeps
/// positions, so indices agree between the two forms.
pub fn derive_mapping(
    compared: &ScoringResult,
    source: &Strace,
    target: &Strace,
    source_params: &[ExecutableParameter],
    target_params: &[ExecutableParameter],
) -> ParameterMapping {
    let mut seen = BTreeSet::new();
    let mut bindings = Vec::new();

    for &(i, j) in &compared.mapping {
        let (Some(left), Some(right)) = (compared.s1.get(i), compared.s2.get(j)) else {
            continue;
        };
        let shared = left.arguments.len().min(right.arguments.len());
        for k in 0..shared {
            if !(left.arguments[k].is_hole() && right.arguments[k].is_hole()) {
                continue;
            }
            let source_path = ArgumentPath::new(i, k);
            let target_path = ArgumentPath::new(j, k);
            if !seen.insert((source_path, target_path)) {
                continue;
            }
            bindings.push(ParameterBinding {
                source: ParameterPath::new(source_path, name_for(source, source_path, source_params)),
                target: ParameterPath::new(target_path, name_for(target, target_path, target_params)),
            });
        }
    }

    ParameterMapping::new(bindings)
}

fn literal_at(trace: &Strace, path: ArgumentPath) -> Option<&Literal> {
    trace.get(path.syscall)?.argument(path.argument)?.as_literal()
}

/// Parameter whose concrete value equals the literal, else one contained in it
fn name_for(trace: &Strace, path: ArgumentPath, params: &[ExecutableParameter]) -> Option<String> {
    let text = literal_at(trace, path)?.value_text();
    let resolved: Vec<(&str, &str)> = params
        .iter()
        .filter_map(|p| p.resolve(&trace.arguments).map(|v| (p.name.as_str(), v)))
        .filter(|(_, v)| !v.is_empty())
        .collect();

    resolved
        .iter()
        .find(|(_, v)| *v == text)
        .or_else(|| resolved.iter().find(|(_, v)| text.contains(*v)))
        .map(|(name, _)| name.to_string())
}

/// Target trace with every bound slot replaced by the source literal
///
/// Top-level arguments start from the target's own and are overridden by the
/// values `mapping` carries over from the source invocation.
pub fn synthesize_migration(source: &Strace, target: &Strace, mapping: &ParameterMapping) -> Strace {
    let mut lines = target.trace_lines.clone();
    for binding in mapping.bindings() {
        let Some(value) = literal_at(source, binding.source.path) else {
            continue;
        };
        let slot = lines
            .get_mut(binding.target.path.syscall)
            .and_then(|call| call.arguments.get_mut(binding.target.path.argument));
        if let Some(slot) = slot {
            *slot = Value::Literal(value.clone());
        }
    }

    let mut migration = target.with_lines(lines);
    migration.arguments.extend(mapping.apply(&source.arguments));
    migration
        .metadata
        .insert(meta::DERIVED_FROM.to_string(), source.executable.clone());
    migration
}
