//! Syscall category selection
//!
//! Supports strace-compatible selector expressions:
//! - Individual syscalls: trace=open,read,write
//! - Syscall classes: trace=file, trace=network, trace=process, trace=memory
//!
//! Used by the `SelectSyscalls` preprocessing stage and to build the
//! `-e trace=` argument of the collector.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Syscall class as understood by `strace -e trace=CLASS`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyscallCategory {
    File,
    Network,
    Process,
    Memory,
}

impl SyscallCategory {
    pub const ALL: [SyscallCategory; 4] = [
        SyscallCategory::File,
        SyscallCategory::Network,
        SyscallCategory::Process,
        SyscallCategory::Memory,
    ];

    /// Syscall names belonging to this class
    pub fn syscalls(self) -> &'static [&'static str] {
        match self {
            SyscallCategory::File => &[
                "open",
                "openat",
                "openat2",
                "creat",
                "close",
                "read",
                "pread64",
                "readv",
                "write",
                "pwrite64",
                "writev",
                "lseek",
                "stat",
                "lstat",
                "fstat",
                "newfstatat",
                "statx",
                "access",
                "faccessat",
                "faccessat2",
                "mkdir",
                "mkdirat",
                "rmdir",
                "unlink",
                "unlinkat",
                "rename",
                "renameat",
                "renameat2",
                "link",
                "linkat",
                "symlink",
                "symlinkat",
                "readlink",
                "readlinkat",
                "chmod",
                "fchmod",
                "fchmodat",
                "chown",
                "fchown",
                "lchown",
                "fchownat",
                "truncate",
                "ftruncate",
                "getdents64",
                "utimensat",
                "fsync",
                "fdatasync",
                "chdir",
                "fchdir",
                "getcwd",
                "dup",
                "dup2",
                "dup3",
                "pipe",
                "pipe2",
                "fcntl",
                "ioctl",
            ],
            SyscallCategory::Network => &[
                "socket",
                "socketpair",
                "connect",
                "accept",
                "accept4",
                "bind",
                "listen",
                "send",
                "recv",
                "sendto",
                "recvfrom",
                "sendmsg",
                "recvmsg",
                "shutdown",
                "setsockopt",
                "getsockopt",
                "getsockname",
                "getpeername",
            ],
            SyscallCategory::Process => &[
                "fork",
                "vfork",
                "clone",
                "clone3",
                "execve",
                "execveat",
                "exit",
                "exit_group",
                "wait4",
                "waitid",
                "kill",
                "tkill",
                "tgkill",
                "setuid",
                "setgid",
                "setsid",
                "setpgid",
            ],
            SyscallCategory::Memory => &[
                "mmap",
                "munmap",
                "mprotect",
                "mremap",
                "madvise",
                "brk",
                "sbrk",
            ],
        }
    }

    pub fn contains(self, syscall_name: &str) -> bool {
        self.syscalls().contains(&syscall_name)
    }

    /// Class name as used in `trace=` expressions
    pub fn as_str(self) -> &'static str {
        match self {
            SyscallCategory::File => "file",
            SyscallCategory::Network => "network",
            SyscallCategory::Process => "process",
            SyscallCategory::Memory => "memory",
        }
    }
}

impl fmt::Display for SyscallCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyscallCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "file" => Ok(SyscallCategory::File),
            "network" => Ok(SyscallCategory::Network),
            "process" => Ok(SyscallCategory::Process),
            "memory" => Ok(SyscallCategory::Memory),
            other => bail!(
                "Unknown syscall category: {}. Expected one of: file, network, process, memory",
                other
            ),
        }
    }
}

/// Syscall filter that determines which syscalls are kept
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyscallFilter {
    /// Selected classes
    categories: BTreeSet<SyscallCategory>,
    /// Individually named syscalls
    names: BTreeSet<String>,
    /// No selector given: keep everything
    all: bool,
}

impl SyscallFilter {
    /// Create a filter that includes all syscalls
    pub fn all() -> Self {
        Self {
            all: true,
            ..Self::default()
        }
    }

    /// Filter keeping the union of the given classes
    pub fn from_categories<I>(categories: I) -> Self
    where
        I: IntoIterator<Item = SyscallCategory>,
    {
        Self {
            categories: categories.into_iter().collect(),
            names: BTreeSet::new(),
            all: false,
        }
    }

    /// Parse a filter expression like "trace=open,read,write" or "trace=file"
    pub fn from_expr(expr: &str) -> Result<Self> {
        if let Some(trace_spec) = expr.strip_prefix("trace=") {
            Self::from_trace_spec(trace_spec)
        } else {
            bail!(
                "Invalid filter expression: {}. Expected format: trace=SPEC",
                expr
            );
        }
    }

    /// Parse a trace specification (the part after "trace=")
    fn from_trace_spec(spec: &str) -> Result<Self> {
        let mut filter = Self::default();

        for part in spec.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match part.parse::<SyscallCategory>() {
                Ok(category) => {
                    filter.categories.insert(category);
                }
                Err(_) => {
                    filter.names.insert(part.to_string());
                }
            }
        }

        Ok(filter)
    }

    /// Check if a syscall should be kept
    pub fn should_trace(&self, syscall_name: &str) -> bool {
        if self.all {
            return true;
        }
        self.names.contains(syscall_name)
            || self.categories.iter().any(|c| c.contains(syscall_name))
    }

    pub fn is_all(&self) -> bool {
        self.all
    }

    pub fn categories(&self) -> impl Iterator<Item = SyscallCategory> + '_ {
        self.categories.iter().copied()
    }

    /// Render into a `trace=` expression for strace
    ///
    /// Classes are expanded to their syscall names: strace's own `file` class
    /// only covers calls taking a filename, ours also covers descriptor I/O.
    pub fn to_expr(&self) -> Option<String> {
        if self.all {
            return None;
        }
        let names: BTreeSet<&str> = self
            .categories
            .iter()
            .flat_map(|c| c.syscalls().iter().copied())
            .chain(self.names.iter().map(String::as_str))
            .collect();
        let parts: Vec<&str> = names.into_iter().collect();
        Some(format!("trace={}", parts.join(",")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_all_traces_everything() {
        let filter = SyscallFilter::all();
        assert!(filter.should_trace("open"));
        assert!(filter.should_trace("write"));
        assert!(filter.should_trace("anything"));
        assert!(filter.to_expr().is_none());
    }

    #[test]
    fn test_filter_individual_syscalls() {
        let filter = SyscallFilter::from_expr("trace=open,read,write").unwrap();
        assert!(filter.should_trace("open"));
        assert!(filter.should_trace("read"));
        assert!(filter.should_trace("write"));
        assert!(!filter.should_trace("close"));
    }

    #[test]
    fn test_filter_file_class() {
        let filter = SyscallFilter::from_expr("trace=file").unwrap();
        assert!(filter.should_trace("open"));
        assert!(filter.should_trace("openat"));
        assert!(filter.should_trace("read"));
        assert!(filter.should_trace("unlinkat"));
        assert!(!filter.should_trace("socket"));
    }

    #[test]
    fn test_filter_network_class() {
        let filter = SyscallFilter::from_expr("trace=network").unwrap();
        assert!(filter.should_trace("socket"));
        assert!(filter.should_trace("connect"));
        assert!(!filter.should_trace("open"));
    }

    #[test]
    fn test_filter_mixed() {
        let filter = SyscallFilter::from_expr("trace=file,socket").unwrap();
        assert!(filter.should_trace("open"));
        assert!(filter.should_trace("socket"));
        assert!(!filter.should_trace("clone"));
    }

    #[test]
    fn test_invalid_expression() {
        let result = SyscallFilter::from_expr("invalid");
        assert!(result.is_err());
    }

    #[test]
    fn test_filter_process_and_memory_classes() {
        let filter = SyscallFilter::from_categories([SyscallCategory::Process]);
        assert!(filter.should_trace("execve"));
        assert!(filter.should_trace("exit_group"));
        assert!(!filter.should_trace("mmap"));

        let filter = SyscallFilter::from_categories([SyscallCategory::Memory]);
        assert!(filter.should_trace("brk"));
        assert!(!filter.should_trace("fork"));
    }

    #[test]
    fn test_filter_empty_trace_spec() {
        // Empty spec keeps nothing
        let filter = SyscallFilter::from_expr("trace=").unwrap();
        assert!(!filter.should_trace("open"));
        assert!(!filter.is_all());
    }

    #[test]
    fn test_filter_whitespace_handling() {
        let filter = SyscallFilter::from_expr("trace=open, read , write").unwrap();
        assert!(filter.should_trace("open"));
        assert!(filter.should_trace("read"));
        assert!(filter.should_trace("write"));
        assert!(!filter.should_trace("close"));
    }

    #[test]
    fn test_to_expr_roundtrip() {
        let filter = SyscallFilter::from_expr("trace=network,file,getpid").unwrap();
        let expr = filter.to_expr().unwrap();
        let reparsed = SyscallFilter::from_expr(&expr).unwrap();
        for name in ["openat", "read", "connect", "getpid", "clone", "mmap"] {
            assert_eq!(reparsed.should_trace(name), filter.should_trace(name), "{}", name);
        }
    }

    #[test]
    fn test_to_expr_names_every_class_member() {
        let expr = SyscallFilter::from_categories([SyscallCategory::File])
            .to_expr()
            .unwrap();
        let listed: BTreeSet<&str> = expr.trim_start_matches("trace=").split(',').collect();
        for name in SyscallCategory::File.syscalls() {
            assert!(listed.contains(name), "{} missing from {}", name, expr);
        }
        // No bare class names reach strace
        assert!(!listed.contains("file"));
    }

    #[test]
    fn test_category_parse() {
        assert_eq!("file".parse::<SyscallCategory>().unwrap(), SyscallCategory::File);
        assert!("disk".parse::<SyscallCategory>().is_err());
        assert_eq!(SyscallCategory::Network.to_string(), "network");
    }

    #[test]
    fn test_category_serde_lowercase() {
        let json = serde_json::to_string(&SyscallCategory::Process).unwrap();
        assert_eq!(json, "\"process\"");
    }
}
