use crate::trace::syscall::Syscall;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Metadata keys written by the collectors and the matcher
pub mod meta {
    pub const SYSTEM: &str = "system";
    pub const MODULE: &str = "module";
    pub const COLLECTOR: &str = "collector";
    pub const SANDBOX: &str = "sandbox";
    pub const DERIVED_FROM: &str = "derived_from";
}

/// Ordered record of the syscalls made by one execution
///
/// Produced once by a parser or collector and read-only afterwards:
/// preprocessing returns new values via [`Strace::with_lines`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Strace {
    pub trace_lines: Vec<Syscall>,
    pub executable: String,
    /// Top-level invocation arguments (parameter name → concrete value)
    #[serde(default)]
    pub arguments: BTreeMap<String, String>,
    /// Provenance: source system, module name, derivation, sandbox flag
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Strace {
    pub fn new(executable: impl Into<String>, trace_lines: Vec<Syscall>) -> Self {
        Strace {
            trace_lines,
            executable: executable.into(),
            arguments: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_argument(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Same provenance, different syscall sequence
    pub fn with_lines(&self, trace_lines: Vec<Syscall>) -> Strace {
        Strace {
            trace_lines,
            executable: self.executable.clone(),
            arguments: self.arguments.clone(),
            metadata: self.metadata.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.trace_lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trace_lines.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Syscall> {
        self.trace_lines.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Syscall> {
        self.trace_lines.get(index)
    }

    /// Ordered syscall names
    pub fn names(&self) -> Vec<&str> {
        self.trace_lines.iter().map(|s| s.name.as_str()).collect()
    }
}

impl fmt::Display for Strace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.trace_lines {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

/// Named, possibly optional parameter of an executable or module
///
/// Used to interpret raw argument positions as named parameters when a
/// parameter mapping is derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutableParameter {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl ExecutableParameter {
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        ExecutableParameter {
            name: name.into(),
            description: description.into(),
            required: true,
            default: None,
        }
    }

    pub fn optional(
        name: impl Into<String>,
        description: impl Into<String>,
        default: Option<String>,
    ) -> Self {
        ExecutableParameter {
            name: name.into(),
            description: description.into(),
            required: false,
            default,
        }
    }

    /// Concrete value for this parameter from an invocation, falling back to the default
    pub fn resolve<'a>(&'a self, arguments: &'a BTreeMap<String, String>) -> Option<&'a str> {
        arguments
            .get(&self.name)
            .map(String::as_str)
            .or(self.default.as_deref())
    }
}
