use crate::trace::literal::{Literal, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One operating-system call: name, positional arguments, return value
///
/// `Syscall` deliberately has no `PartialEq`: whether two calls are "the
/// same" depends on the comparison context, see [`crate::equality`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Syscall {
    pub name: String,
    pub arguments: Vec<Value>,
    pub return_value: Value,
}

impl Syscall {
    pub fn new(name: impl Into<String>, arguments: Vec<Value>, return_value: Value) -> Self {
        Syscall {
            name: name.into(),
            arguments,
            return_value,
        }
    }

    /// Convenience constructor from literals
    pub fn from_literals(name: impl Into<String>, arguments: Vec<Literal>, return_value: Literal) -> Self {
        Syscall::new(
            name,
            arguments.into_iter().map(Value::Literal).collect(),
            Value::Literal(return_value),
        )
    }

    pub fn argument(&self, index: usize) -> Option<&Value> {
        self.arguments.get(index)
    }

    /// Copy of this call with each argument passed through `f`
    pub fn map_arguments<F>(&self, mut f: F) -> Syscall
    where
        F: FnMut(usize, &Value) -> Value,
    {
        Syscall {
            name: self.name.clone(),
            arguments: self
                .arguments
                .iter()
                .enumerate()
                .map(|(i, v)| f(i, v))
                .collect(),
            return_value: self.return_value.clone(),
        }
    }
}

impl fmt::Display for Syscall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self.arguments.iter().map(Value::raw_text).collect();
        write!(
            f,
            "{}({}) = {}",
            self.name,
            args.join(", "),
            self.return_value.raw_text()
        )
    }
}

/// Position of one argument inside a trace: syscall index + argument index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArgumentPath {
    pub syscall: usize,
    pub argument: usize,
}

impl ArgumentPath {
    pub fn new(syscall: usize, argument: usize) -> Self {
        ArgumentPath { syscall, argument }
    }
}

impl fmt::Display for ArgumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}].args[{}]", self.syscall, self.argument)
    }
}
