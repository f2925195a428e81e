// PunchHoles: replace volatile literals with positional holes
//
// Three sources of holes, applied in this order:
// 1. Pinned positions (HoleSet): always holed, whatever the value
// 2. Volatility rules: temp paths, timestamps, epoch-like integers, user patterns
// 3. Pairwise mode only: argument literals whose value occurs in just one of
//    the two traces being compared
//
// A hole replacing argument k is always Hole(index = k). Return values are
// never holed.

use super::Preprocessor;
use crate::trace::{Hole, Literal, Strace, Syscall, Value};
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::OnceLock;

/// Epoch seconds for 2000-01-01 and 2100-01-01
const EPOCH_2000: i64 = 946_684_800;
const EPOCH_2100: i64 = 4_102_444_800;

/// One pinned argument position: argument `index` of every syscall named
/// `syscall`, or of every syscall when `syscall` is `None`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pin {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syscall: Option<String>,
    #[serde(alias = "argument")]
    pub index: usize,
}

impl Pin {
    pub fn new(syscall: impl Into<String>, index: usize) -> Self {
        Pin {
            syscall: Some(syscall.into()),
            index,
        }
    }

    /// Pin argument `index` of every syscall
    pub fn any(index: usize) -> Self {
        Pin {
            syscall: None,
            index,
        }
    }

    fn matches(&self, name: &str, index: usize) -> bool {
        self.index == index && self.syscall.as_deref().map_or(true, |s| s == name)
    }
}

/// Argument positions that scoring treats as wildcards
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HoleSet {
    pins: BTreeSet<Pin>,
}

impl HoleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, pin: Pin) -> Self {
        self.pins.insert(pin);
        self
    }

    pub fn pin(&mut self, pin: Pin) {
        self.pins.insert(pin);
    }

    pub fn is_pinned(&self, syscall: &str, index: usize) -> bool {
        self.pins.iter().any(|p| p.matches(syscall, index))
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pin> {
        self.pins.iter()
    }

    /// Replace every pinned argument with its hole
    pub fn apply(&self, trace: &Strace) -> Strace {
        if self.is_empty() {
            return trace.clone();
        }
        trace.with_lines(trace.iter().map(|c| self.apply_syscall(c)).collect())
    }

    pub fn apply_syscall(&self, call: &Syscall) -> Syscall {
        call.map_arguments(|i, v| {
            if self.is_pinned(&call.name, i) {
                Value::Hole(Hole::new(i))
            } else {
                v.clone()
            }
        })
    }
}

impl FromIterator<Pin> for HoleSet {
    fn from_iter<I: IntoIterator<Item = Pin>>(iter: I) -> Self {
        HoleSet {
            pins: iter.into_iter().collect(),
        }
    }
}

#[allow(clippy::expect_used)] // Static regex patterns are hardcoded and valid
fn timestamp_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}").expect("valid regex"))
}

#[allow(clippy::expect_used)]
fn proc_pid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^/proc/\d+(/|$)").expect("valid regex"))
}

/// Heuristics deciding which single literals are volatile
#[derive(Debug, Clone)]
pub struct VolatilityRules {
    /// String prefixes of per-run scratch locations
    pub temp_prefixes: Vec<String>,
    /// `/proc/<pid>/...` paths
    pub proc_pid_paths: bool,
    /// ISO-8601-looking date-times inside strings
    pub timestamps: bool,
    /// Integers in the epoch second/millisecond range of years 2000-2100
    pub epoch_integers: bool,
    /// Additional user patterns matched against string values
    pub patterns: Vec<Regex>,
}

impl Default for VolatilityRules {
    fn default() -> Self {
        VolatilityRules {
            temp_prefixes: vec!["/tmp/".into(), "/var/tmp/".into(), "/dev/shm/".into()],
            proc_pid_paths: true,
            timestamps: true,
            epoch_integers: true,
            patterns: Vec::new(),
        }
    }
}

impl VolatilityRules {
    /// No single-literal rules; only pins and pairwise differences punch holes
    pub fn none() -> Self {
        VolatilityRules {
            temp_prefixes: Vec::new(),
            proc_pid_paths: false,
            timestamps: false,
            epoch_integers: false,
            patterns: Vec::new(),
        }
    }

    pub fn with_pattern(mut self, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .with_context(|| format!("Invalid volatility pattern: {}", pattern))?;
        self.patterns.push(regex);
        Ok(self)
    }

    pub fn is_volatile(&self, literal: &Literal) -> bool {
        match literal {
            Literal::String { value, .. } => {
                self.temp_prefixes.iter().any(|p| value.starts_with(p.as_str()))
                    || (self.proc_pid_paths && proc_pid_regex().is_match(value))
                    || (self.timestamps && timestamp_regex().is_match(value))
                    || self.patterns.iter().any(|p| p.is_match(value))
            }
            Literal::Number { value, .. } => {
                self.epoch_integers
                    && value.as_i64().is_some_and(|n| {
                        (EPOCH_2000..=EPOCH_2100).contains(&n)
                            || (EPOCH_2000 * 1000..=EPOCH_2100 * 1000).contains(&n)
                    })
            }
            Literal::Null { .. } | Literal::Identifier { .. } => false,
        }
    }
}

/// Hole-punching stage
///
/// As a [`Preprocessor`] it applies pins and volatility rules to a single
/// trace. [`PunchHoles::punch_pair`] additionally holes literals that only
/// one side of a comparison contains.
#[derive(Debug, Clone, Default)]
pub struct PunchHoles {
    rules: VolatilityRules,
    pinned: HoleSet,
}

impl PunchHoles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(mut self, rules: VolatilityRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_pinned(mut self, pinned: HoleSet) -> Self {
        self.pinned = pinned;
        self
    }

    pub fn pinned(&self) -> &HoleSet {
        &self.pinned
    }

    /// Pins and volatility rules over one trace
    pub fn punch(&self, trace: &Strace) -> Strace {
        self.punch_with(trace, |_| false)
    }

    /// Pairwise mode: holes literals whose value appears in only one of the traces
    pub fn punch_pair(&self, a: &Strace, b: &Strace) -> (Strace, Strace) {
        let keys_a = argument_keys(a);
        let keys_b = argument_keys(b);
        let only_a: HashSet<&String> = keys_a.difference(&keys_b).collect();
        let only_b: HashSet<&String> = keys_b.difference(&keys_a).collect();

        let out_a = self.punch_with(a, |lit| is_comparable(lit) && only_a.contains(&lit.key()));
        let out_b = self.punch_with(b, |lit| is_comparable(lit) && only_b.contains(&lit.key()));
        (out_a, out_b)
    }

    fn punch_with<F>(&self, trace: &Strace, unshared: F) -> Strace
    where
        F: Fn(&Literal) -> bool,
    {
        let lines = trace
            .iter()
            .map(|call| {
                call.map_arguments(|i, value| match value {
                    Value::Hole(_) => value.clone(),
                    Value::Literal(_) if self.pinned.is_pinned(&call.name, i) => {
                        Value::Hole(Hole::new(i))
                    }
                    Value::Literal(lit) if self.rules.is_volatile(lit) || unshared(lit) => {
                        Value::Hole(Hole::new(i))
                    }
                    Value::Literal(_) => value.clone(),
                })
            })
            .collect();
        trace.with_lines(lines)
    }
}

impl Preprocessor for PunchHoles {
    fn name(&self) -> &'static str {
        "punch_holes"
    }

    fn apply(&self, trace: &Strace) -> Strace {
        self.punch(trace)
    }
}

/// Strings and numbers take part in pairwise comparison; flags, structs and
/// `NULL` describe shape rather than data
fn is_comparable(literal: &Literal) -> bool {
    matches!(literal, Literal::String { .. } | Literal::Number { .. })
}

fn argument_keys(trace: &Strace) -> HashSet<String> {
    trace
        .iter()
        .flat_map(|call| call.arguments.iter())
        .filter_map(Value::as_literal)
        .filter(|lit| is_comparable(lit))
        .map(Literal::key)
        .collect()
}
