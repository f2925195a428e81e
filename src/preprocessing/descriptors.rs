// ReplaceFileDescriptors: trace-local canonical descriptor names
//
// Raw descriptor numbers are assigned by the kernel and differ between runs.
// Each descriptor returned by an allocating syscall is renamed fd0, fd1, ...
// in allocation order, and later arguments reusing that number are rewritten
// to the same name until the descriptor is closed.

use super::Preprocessor;
use crate::trace::{Literal, Strace, Syscall, Value};
use std::collections::HashMap;

/// Syscalls whose non-negative return value is a new descriptor
const ALLOCATORS: &[&str] = &[
    "open",
    "openat",
    "openat2",
    "creat",
    "open_by_handle_at",
    "socket",
    "accept",
    "accept4",
    "dup",
    "dup2",
    "dup3",
    "epoll_create",
    "epoll_create1",
    "eventfd",
    "eventfd2",
    "inotify_init",
    "inotify_init1",
    "signalfd",
    "signalfd4",
    "timerfd_create",
    "memfd_create",
    "pidfd_open",
    "fanotify_init",
    "userfaultfd",
];

/// Syscalls that return a descriptor pair through an array argument
fn pair_argument(name: &str) -> Option<usize> {
    match name {
        "pipe" | "pipe2" => Some(0),
        "socketpair" => Some(3),
        _ => None,
    }
}

/// Argument positions holding descriptors; `None` means "unknown syscall"
fn descriptor_positions(name: &str) -> Option<&'static [usize]> {
    let positions: &'static [usize] = match name {
        "read" | "write" | "close" | "fstat" | "lseek" | "pread64" | "pwrite64" | "readv"
        | "writev" | "fsync" | "fdatasync" | "ftruncate" | "fchmod" | "fchown" | "fchdir"
        | "getdents" | "getdents64" | "fcntl" | "ioctl" | "flock" | "fadvise64" | "fallocate"
        | "fstatfs" | "connect" | "bind" | "listen" | "accept" | "accept4" | "send" | "recv"
        | "sendto" | "recvfrom" | "sendmsg" | "recvmsg" | "shutdown" | "setsockopt"
        | "getsockopt" | "getsockname" | "getpeername" | "dup" | "epoll_wait"
        | "epoll_pwait" | "openat" | "openat2" | "mkdirat" | "unlinkat" | "newfstatat"
        | "fstatat64" | "faccessat" | "faccessat2" | "fchmodat" | "fchownat" | "readlinkat"
        | "utimensat" | "statx" | "mknodat" | "inotify_add_watch" | "syncfs" => &[0],
        "dup2" | "dup3" | "sendfile" => &[0, 1],
        "renameat" | "renameat2" | "linkat" | "epoll_ctl" | "copy_file_range" | "splice" => {
            &[0, 2]
        }
        "symlinkat" => &[1],
        "mmap" => &[4],
        "open" | "creat" | "stat" | "lstat" | "access" | "mkdir" | "rmdir" | "unlink"
        | "rename" | "link" | "symlink" | "readlink" | "chmod" | "chown" | "lchown"
        | "truncate" | "chdir" | "execve" | "socket" | "socketpair" | "pipe" | "pipe2"
        | "brk" | "munmap" | "mprotect" | "madvise" | "exit" | "exit_group" | "getpid"
        | "kill" | "wait4" | "clone" | "fork" | "vfork" => &[],
        _ => return None,
    };
    Some(positions)
}

/// Renames OS-assigned descriptor numbers to trace-local `fdN` identifiers
///
/// Rewritten values become [`Literal::Identifier`] with the original number
/// kept as raw text, so the stage is idempotent: identifiers are never
/// treated as descriptors again.
#[derive(Debug, Clone, Default)]
pub struct ReplaceFileDescriptors;

impl ReplaceFileDescriptors {
    pub fn new() -> Self {
        ReplaceFileDescriptors
    }
}

impl Preprocessor for ReplaceFileDescriptors {
    fn name(&self) -> &'static str {
        "replace_file_descriptors"
    }

    fn apply(&self, trace: &Strace) -> Strace {
        let mut table = DescriptorTable::default();
        let lines = trace.iter().map(|call| table.rewrite(call)).collect();
        trace.with_lines(lines)
    }
}

#[derive(Debug, Default)]
struct DescriptorTable {
    live: HashMap<i64, String>,
    next: usize,
}

impl DescriptorTable {
    fn allocate(&mut self, raw: i64) -> String {
        let name = format!("fd{}", self.next);
        self.next += 1;
        self.live.insert(raw, name.clone());
        name
    }

    fn rename(&self, value: &Value) -> Option<Value> {
        let lit = value.as_literal()?;
        let raw = lit.as_number()?.as_i64()?;
        let name = self.live.get(&raw)?;
        Some(Value::Literal(Literal::Identifier {
            value: name.clone(),
            raw: lit.raw().to_string(),
        }))
    }

    fn rewrite(&mut self, call: &Syscall) -> Syscall {
        let positions = descriptor_positions(&call.name);
        let closing = match (call.name.as_str(), call.arguments.first()) {
            ("close", Some(arg)) => arg.as_literal().and_then(Literal::as_number).and_then(|n| n.as_i64()),
            _ => None,
        };

        let mut out = call.map_arguments(|i, value| {
            let is_descriptor_slot = positions.map_or(true, |p| p.contains(&i));
            if is_descriptor_slot {
                self.rename(value).unwrap_or_else(|| value.clone())
            } else {
                value.clone()
            }
        });

        if let Some(index) = pair_argument(&call.name) {
            if let Some(renamed) = out.arguments.get(index).and_then(|v| self.rename_pair(v)) {
                out.arguments[index] = renamed;
            }
        }

        if ALLOCATORS.contains(&call.name.as_str()) {
            if let Some(lit) = call.return_value.as_literal() {
                if let Some(raw) = lit.as_number().and_then(|n| n.as_i64()).filter(|n| *n >= 0) {
                    let name = self.allocate(raw);
                    out.return_value = Value::Literal(Literal::Identifier {
                        value: name,
                        raw: lit.raw().to_string(),
                    });
                }
            }
        }

        if let Some(fd) = closing {
            self.live.remove(&fd);
        }

        out
    }

    /// `[3, 4]` becomes `[fd0, fd1]`
    fn rename_pair(&mut self, value: &Value) -> Option<Value> {
        let lit = value.as_literal()?;
        let Literal::Identifier { value: text, raw } = lit else {
            return None;
        };
        let inner = text.trim().strip_prefix('[')?.strip_suffix(']')?;
        let numbers: Vec<i64> = inner
            .split(',')
            .map(|p| p.trim().parse::<i64>())
            .collect::<Result<_, _>>()
            .ok()?;
        if numbers.len() != 2 || numbers.iter().any(|n| *n < 0) {
            return None;
        }
        let names: Vec<String> = numbers.into_iter().map(|n| self.allocate(n)).collect();
        Some(Value::Literal(Literal::Identifier {
            value: format!("[{}]", names.join(", ")),
            raw: raw.clone(),
        }))
    }
}
