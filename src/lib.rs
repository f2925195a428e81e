//! Dozer - behavioral equivalence of configuration-management modules by syscall traces
//!
//! Two module invocations (say, an Ansible task and a Nix derivation) are
//! compared by the system calls they make rather than by a hand-written
//! mapping. This library provides the trace model, an strace parser, the
//! preprocessing pipeline that normalizes traces, pluggable equality and
//! scoring strategies, and a matcher that finds the best reference trace in
//! a corpus and derives a parameter mapping from it.
//!
//! ```
//! use dozer::equality::NameEquality;
//! use dozer::preprocessing::HoleSet;
//! use dozer::scoring::{JaccardCoefficient, ScoringMethod};
//! use dozer::parser;
//! use std::sync::Arc;
//!
//! let a = parser::parse_str("open(\"/a\", O_RDONLY) = 3\nclose(3) = 0\n", "a").trace;
//! let b = parser::parse_str("open(\"/b\", O_RDONLY) = 4\nclose(4) = 0\n", "b").trace;
//! let result = JaccardCoefficient.score(&Arc::new(a), &Arc::new(b), &HoleSet::new(), &NameEquality);
//! assert_eq!(result.score, 1.0);
//! ```

pub mod cli;
pub mod collection;
pub mod equality;
pub mod filter;
pub mod matcher;
pub mod parser;
pub mod preprocessing;
pub mod scoring;
pub mod trace;
