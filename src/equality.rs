//! Equality strategies: when two syscalls count as "the same"
//!
//! Sameness depends on the comparison context, so it is injected into the
//! scoring methods instead of living on [`Syscall`]. Every strategy is a total,
//! symmetric predicate and never fails.

use crate::preprocessing::CanonicalForm;
use crate::trace::Syscall;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// A notion of syscall equality
pub trait SyscallEquality: Send + Sync {
    /// Strategy name used in reports and cache keys
    fn name(&self) -> &'static str;

    /// Whether `a` and `b` match
    fn equal(&self, a: &Syscall, b: &Syscall) -> bool;

    /// Identity key: `equal(a, b)` implies `identity(a) == identity(b)`
    ///
    /// Set- and vector-based scoring methods count syscalls by this key.
    fn identity(&self, call: &Syscall) -> String;
}

/// Match on syscall name only
#[derive(Debug, Clone, Copy, Default)]
pub struct NameEquality;

impl SyscallEquality for NameEquality {
    fn name(&self) -> &'static str {
        "name"
    }

    fn equal(&self, a: &Syscall, b: &Syscall) -> bool {
        a.name == b.name
    }

    fn identity(&self, call: &Syscall) -> String {
        call.name.clone()
    }
}

/// Match on name, every argument and the return value
///
/// Holes only equal holes with the same index.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictEquality;

impl SyscallEquality for StrictEquality {
    fn name(&self) -> &'static str {
        "strict"
    }

    fn equal(&self, a: &Syscall, b: &Syscall) -> bool {
        a.name == b.name && a.arguments == b.arguments && a.return_value == b.return_value
    }

    fn identity(&self, call: &Syscall) -> String {
        let args: Vec<String> = call.arguments.iter().map(|v| v.key()).collect();
        format!("{}({})={}", call.name, args.join(","), call.return_value.key())
    }
}

/// Strict equality after canonicalizing both operands
#[derive(Debug, Clone, Default)]
pub struct CanonicalEquality {
    canonical: CanonicalForm,
}

impl CanonicalEquality {
    pub fn new() -> Self {
        CanonicalEquality {
            canonical: CanonicalForm::new(),
        }
    }

    pub fn with_form(canonical: CanonicalForm) -> Self {
        CanonicalEquality { canonical }
    }
}

impl SyscallEquality for CanonicalEquality {
    fn name(&self) -> &'static str {
        "canonical"
    }

    fn equal(&self, a: &Syscall, b: &Syscall) -> bool {
        if a.name != b.name {
            return false;
        }
        StrictEquality.equal(
            &self.canonical.canonicalize_syscall(a),
            &self.canonical.canonicalize_syscall(b),
        )
    }

    fn identity(&self, call: &Syscall) -> String {
        StrictEquality.identity(&self.canonical.canonicalize_syscall(call))
    }
}

/// Configurable choice of strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EqualityKind {
    Name,
    Strict,
    #[default]
    Canonical,
}

impl EqualityKind {
    pub fn build(self) -> Arc<dyn SyscallEquality> {
        match self {
            EqualityKind::Name => Arc::new(NameEquality),
            EqualityKind::Strict => Arc::new(StrictEquality),
            EqualityKind::Canonical => Arc::new(CanonicalEquality::new()),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EqualityKind::Name => "name",
            EqualityKind::Strict => "strict",
            EqualityKind::Canonical => "canonical",
        }
    }
}

impl fmt::Display for EqualityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EqualityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "name" => Ok(EqualityKind::Name),
            "strict" => Ok(EqualityKind::Strict),
            "canonical" => Ok(EqualityKind::Canonical),
            other => Err(format!(
                "unknown equality '{}', expected name, strict or canonical",
                other
            )),
        }
    }
}
