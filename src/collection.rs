//! Trace collection: run a command under `strace` and parse what it did
//!
//! Collection blocks on an external process, so every run has a deadline and
//! can be cancelled from another thread. The traced command runs in its own
//! process group; on timeout or cancellation the whole group is killed and
//! the temporary output is discarded.
//!
//! A failed collection is an error, never an empty [`Strace`]: an empty trace
//! means the command ran and made no (selected) syscalls.

use crate::filter::SyscallFilter;
use crate::parser;
use crate::trace::{meta, Strace};
use crossbeam::channel;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::io::{self, Read};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Why a trace could not be collected
#[derive(Error, Debug)]
pub enum CollectionError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("traced command failed ({status}): {stderr}")]
    NonZeroExit { status: String, stderr: String },

    #[error("trace collection timed out after {timeout:?}")]
    TimedOut { timeout: Duration },

    #[error("trace collection was cancelled")]
    Cancelled,

    #[error("trace output {path} unreadable: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("trace output had no parseable syscall lines ({lines} lines skipped)")]
    MalformedOutput { lines: usize },
}

/// Cooperative cancellation flag shared with a running collection
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs commands under `strace -o <file>`
#[derive(Debug, Clone)]
pub struct StraceCollector {
    pub strace_path: PathBuf,
    pub timeout: Duration,
    pub filter: SyscallFilter,
    pub follow_forks: bool,
    /// How often the deadline and cancel token are checked
    pub poll_interval: Duration,
}

impl Default for StraceCollector {
    fn default() -> Self {
        StraceCollector {
            strace_path: PathBuf::from("strace"),
            timeout: Duration::from_secs(300),
            filter: SyscallFilter::all(),
            follow_forks: true,
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl StraceCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_filter(mut self, filter: SyscallFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_strace_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.strace_path = path.into();
        self
    }

    /// `strace` argument vector for tracing `command` into `output`
    pub fn strace_args(&self, output: &Path, command: &[String]) -> Vec<String> {
        let mut args = Vec::new();
        if self.follow_forks {
            args.push("-f".to_string());
        }
        if let Some(expr) = self.filter.to_expr() {
            args.push("-e".to_string());
            args.push(expr);
        }
        args.push("-o".to_string());
        args.push(output.display().to_string());
        args.push("--".to_string());
        args.extend(command.iter().cloned());
        args
    }

    /// Trace `command` to completion
    pub fn collect(&self, command: &[String], cancel: &CancelToken) -> Result<Strace, CollectionError> {
        let Some(program) = command.first() else {
            return Err(CollectionError::Spawn {
                program: String::new(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "empty command"),
            });
        };

        let workdir = tempfile::tempdir().map_err(|source| CollectionError::Unreadable {
            path: std::env::temp_dir(),
            source,
        })?;
        let output = workdir.path().join("trace.strace");

        let mut child = Command::new(&self.strace_path)
            .args(self.strace_args(&output, command))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .map_err(|source| CollectionError::Spawn {
                program: self.strace_path.display().to_string(),
                source,
            })?;
        let group = Pid::from_raw(child.id() as i32);
        tracing::debug!(pid = child.id(), command = %command.join(" "), "Started traced command");

        let stderr_reader = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut text = String::new();
                let _ = pipe.read_to_string(&mut text);
                text
            })
        });

        let (done_tx, done_rx) = channel::bounded::<io::Result<ExitStatus>>(1);
        thread::spawn(move || {
            let _ = done_tx.send(child.wait());
        });

        let status = self.wait(&done_rx, group, cancel)?;
        let stderr = stderr_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        let status = status.map_err(|source| CollectionError::Spawn {
            program: program.clone(),
            source,
        })?;
        if !status.success() {
            tracing::warn!(%status, "Traced command failed: {}", program);
            return Err(CollectionError::NonZeroExit {
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        let text = std::fs::read_to_string(&output).map_err(|source| CollectionError::Unreadable {
            path: output.clone(),
            source,
        })?;
        let report = parser::parse_str(&text, program);
        if report.is_unparseable() {
            return Err(CollectionError::MalformedOutput {
                lines: report.warnings.len(),
            });
        }
        if !report.warnings.is_empty() {
            tracing::warn!(skipped = report.warnings.len(), "Skipped unparseable trace lines");
        }

        Ok(report.trace.with_metadata(meta::COLLECTOR, "strace"))
    }

    fn wait(
        &self,
        done: &channel::Receiver<io::Result<ExitStatus>>,
        group: Pid,
        cancel: &CancelToken,
    ) -> Result<io::Result<ExitStatus>, CollectionError> {
        let deadline = Instant::now() + self.timeout;
        let ticker = channel::tick(self.poll_interval);

        loop {
            channel::select! {
                recv(done) -> status => {
                    return Ok(status.unwrap_or_else(|_| {
                        Err(io::Error::other("waiter thread vanished"))
                    }));
                }
                recv(ticker) -> _ => {
                    if cancel.is_cancelled() {
                        kill_group(group, done);
                        return Err(CollectionError::Cancelled);
                    }
                    if Instant::now() >= deadline {
                        kill_group(group, done);
                        tracing::warn!(timeout = ?self.timeout, "Trace collection timed out");
                        return Err(CollectionError::TimedOut { timeout: self.timeout });
                    }
                }
            }
        }
    }
}

/// SIGKILL the process group and reap the leader
fn kill_group(group: Pid, done: &channel::Receiver<io::Result<ExitStatus>>) {
    if let Err(e) = killpg(group, Signal::SIGKILL) {
        tracing::debug!("killpg({}) failed: {}", group, e);
    }
    let _ = done.recv_timeout(Duration::from_secs(5));
}

/// Something that can produce the trace of a module invocation
pub trait TraceSource: Send + Sync {
    fn collect(
        &self,
        module: &str,
        parameters: &BTreeMap<String, String>,
        cancel: &CancelToken,
    ) -> Result<Strace, CollectionError>;
}

/// `ansible <host> -m <module> -a "k=v ..."` under strace
#[derive(Debug, Clone)]
pub struct AnsibleModule {
    pub program: String,
    pub host: String,
    pub collector: StraceCollector,
}

impl Default for AnsibleModule {
    fn default() -> Self {
        AnsibleModule {
            program: "ansible".to_string(),
            host: "localhost".to_string(),
            collector: StraceCollector::default(),
        }
    }
}

impl AnsibleModule {
    pub fn new(collector: StraceCollector) -> Self {
        AnsibleModule {
            collector,
            ..Self::default()
        }
    }

    pub fn command(&self, module: &str, parameters: &BTreeMap<String, String>) -> Vec<String> {
        let mut command = vec![self.program.clone(), self.host.clone(), "-m".to_string(), module.to_string()];
        if !parameters.is_empty() {
            let args: Vec<String> = parameters.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            command.push("-a".to_string());
            command.push(args.join(" "));
        }
        command
    }
}

impl TraceSource for AnsibleModule {
    fn collect(
        &self,
        module: &str,
        parameters: &BTreeMap<String, String>,
        cancel: &CancelToken,
    ) -> Result<Strace, CollectionError> {
        let mut trace = self.collector.collect(&self.command(module, parameters), cancel)?;
        trace.executable = module.to_string();
        trace.arguments = parameters.clone();
        Ok(trace
            .with_metadata(meta::SYSTEM, "ansible")
            .with_metadata(meta::MODULE, module))
    }
}

/// `nix-build <expression file> --no-out-link` under strace
///
/// `module` names a file holding the Nix expression; parameters are passed
/// as `--argstr name value`.
#[derive(Debug, Clone)]
pub struct NixBuild {
    pub program: String,
    pub sandbox: bool,
    pub collector: StraceCollector,
}

impl Default for NixBuild {
    fn default() -> Self {
        NixBuild {
            program: "nix-build".to_string(),
            sandbox: true,
            collector: StraceCollector::default(),
        }
    }
}

impl NixBuild {
    pub fn command(&self, expression: &str, parameters: &BTreeMap<String, String>) -> Vec<String> {
        let mut command = vec![self.program.clone(), expression.to_string(), "--no-out-link".to_string()];
        for (name, value) in parameters {
            command.extend(["--argstr".to_string(), name.clone(), value.clone()]);
        }
        if self.sandbox {
            command.extend(["--option".to_string(), "sandbox".to_string(), "true".to_string()]);
        }
        command
    }
}

impl TraceSource for NixBuild {
    fn collect(
        &self,
        module: &str,
        parameters: &BTreeMap<String, String>,
        cancel: &CancelToken,
    ) -> Result<Strace, CollectionError> {
        let mut trace = self.collector.collect(&self.command(module, parameters), cancel)?;
        trace.executable = module.to_string();
        trace.arguments = parameters.clone();
        Ok(trace
            .with_metadata(meta::SYSTEM, "nix")
            .with_metadata(meta::MODULE, module)
            .with_metadata(meta::SANDBOX, self.sandbox.to_string()))
    }
}

/// Memoises successful collections of an inner source
///
/// Keyed by SHA-256 of the module name and its sorted parameters. Failures,
/// timeouts and cancellations are never stored.
pub struct CachedTraceSource<S> {
    inner: S,
    traces: RwLock<HashMap<String, Arc<Strace>>>,
}

impl<S: TraceSource> CachedTraceSource<S> {
    pub fn new(inner: S) -> Self {
        CachedTraceSource {
            inner,
            traces: RwLock::new(HashMap::new()),
        }
    }

    pub fn key(module: &str, parameters: &BTreeMap<String, String>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(module.as_bytes());
        for (name, value) in parameters {
            hasher.update([0u8]);
            hasher.update(name.as_bytes());
            hasher.update([b'=']);
            hasher.update(value.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    pub fn len(&self) -> usize {
        self.traces.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: TraceSource> TraceSource for CachedTraceSource<S> {
    fn collect(
        &self,
        module: &str,
        parameters: &BTreeMap<String, String>,
        cancel: &CancelToken,
    ) -> Result<Strace, CollectionError> {
        let key = Self::key(module, parameters);
        if let Some(trace) = self.traces.read().unwrap_or_else(PoisonError::into_inner).get(&key) {
            tracing::debug!(module, "Trace cache hit");
            return Ok(trace.as_ref().clone());
        }

        let trace = self.inner.collect(module, parameters, cancel)?;
        if cancel.is_cancelled() {
            return Err(CollectionError::Cancelled);
        }
        self.traces
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::new(trace.clone()));
        Ok(trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::SyscallCategory;
    use crate::trace::{Literal, Syscall};
    use std::sync::atomic::AtomicUsize;

    struct Scripted {
        calls: AtomicUsize,
        fail: bool,
    }

    impl TraceSource for Scripted {
        fn collect(
            &self,
            module: &str,
            _parameters: &BTreeMap<String, String>,
            _cancel: &CancelToken,
        ) -> Result<Strace, CollectionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CollectionError::NonZeroExit {
                    status: "exit status: 2".into(),
                    stderr: "boom".into(),
                });
            }
            Ok(Strace::new(
                module,
                vec![Syscall::from_literals("open", vec![Literal::string("/etc/motd")], Literal::int(3))],
            ))
        }
    }

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_strace_args() {
        let collector = StraceCollector::new()
            .with_filter(SyscallFilter::from_categories([SyscallCategory::File]));
        let args = collector.strace_args(Path::new("/tmp/out"), &["true".to_string()]);
        assert_eq!(args[..2], ["-f", "-e"]);
        assert!(args[2].starts_with("trace="));
        for name in ["openat", "read", "close", "fstat"] {
            assert!(args[2].split(['=', ',']).any(|n| n == name), "{}", name);
        }
        assert_eq!(args[3..], ["-o", "/tmp/out", "--", "true"]);

        let all = StraceCollector::new().strace_args(Path::new("/tmp/out"), &["ls".to_string()]);
        assert!(!all.contains(&"-e".to_string()));
    }

    #[test]
    fn test_cache_key_independent_of_insertion_order() {
        let mut a = BTreeMap::new();
        a.insert("state".to_string(), "present".to_string());
        a.insert("name".to_string(), "nginx".to_string());
        let b = params(&[("name", "nginx"), ("state", "present")]);
        assert_eq!(
            CachedTraceSource::<Scripted>::key("apt", &a),
            CachedTraceSource::<Scripted>::key("apt", &b)
        );
        assert_ne!(
            CachedTraceSource::<Scripted>::key("apt", &a),
            CachedTraceSource::<Scripted>::key("yum", &a)
        );
    }

    #[test]
    fn test_cached_source_collects_once() {
        let cached = CachedTraceSource::new(Scripted {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let p = params(&[("path", "/etc/motd")]);
        let token = CancelToken::new();
        let first = cached.collect("file", &p, &token).unwrap();
        let second = cached.collect("file", &p, &token).unwrap();
        assert_eq!(first.to_string(), second.to_string());
        assert_eq!(cached.inner().calls.load(Ordering::SeqCst), 1);
        assert_eq!(cached.len(), 1);
    }

    #[test]
    fn test_cached_source_does_not_store_failures() {
        let cached = CachedTraceSource::new(Scripted {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let token = CancelToken::new();
        assert!(cached.collect("file", &BTreeMap::new(), &token).is_err());
        assert!(cached.collect("file", &BTreeMap::new(), &token).is_err());
        assert!(cached.is_empty());
        assert_eq!(cached.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_ansible_command_line() {
        let cmd = AnsibleModule::default().command("file", &params(&[("path", "/srv"), ("state", "directory")]));
        assert_eq!(cmd, vec!["ansible", "localhost", "-m", "file", "-a", "path=/srv state=directory"]);
    }

    #[test]
    fn test_nix_build_command_line() {
        let cmd = NixBuild::default().command("dir.nix", &params(&[("path", "/srv")]));
        assert_eq!(
            cmd,
            vec!["nix-build", "dir.nix", "--no-out-link", "--argstr", "path", "/srv", "--option", "sandbox", "true"]
        );
    }

    #[test]
    fn test_empty_command_is_spawn_error() {
        let err = StraceCollector::new().collect(&[], &CancelToken::new()).unwrap_err();
        assert!(matches!(err, CollectionError::Spawn { .. }));
    }

    #[test]
    fn test_missing_strace_binary_is_spawn_error() {
        let collector = StraceCollector::new().with_strace_path("/nonexistent/strace-binary");
        let err = collector.collect(&["true".to_string()], &CancelToken::new()).unwrap_err();
        assert!(matches!(err, CollectionError::Spawn { .. }));
    }

    /// Stand-in for strace: backgrounds a sleeper in the same process group,
    /// records its pid and blocks
    fn hanging_strace(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("fake-strace");
        let pid_file = dir.join("child.pid");
        std::fs::write(
            &script,
            format!("#!/bin/sh\nsleep 30 &\necho $! > {}\nwait\n", pid_file.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    /// Gone, or a zombie nobody has reaped yet
    fn assert_group_member_killed(dir: &Path) {
        let Ok(pid) = std::fs::read_to_string(dir.join("child.pid")) else {
            return;
        };
        let stat = PathBuf::from(format!("/proc/{}/stat", pid.trim()));
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            match std::fs::read_to_string(&stat) {
                Err(_) => return,
                Ok(text) if text.contains(") Z") => return,
                Ok(_) if Instant::now() >= deadline => panic!("sleeper {} survived", pid.trim()),
                Ok(_) => thread::sleep(Duration::from_millis(20)),
            }
        }
    }

    #[test]
    fn test_timeout_kills_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let collector = StraceCollector::new()
            .with_strace_path(hanging_strace(dir.path()))
            .with_timeout(Duration::from_millis(300));

        let started = Instant::now();
        let err = collector.collect(&["true".to_string()], &CancelToken::new()).unwrap_err();
        assert!(matches!(err, CollectionError::TimedOut { timeout } if timeout == Duration::from_millis(300)));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_group_member_killed(dir.path());
    }

    #[test]
    fn test_cancel_kills_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let collector = StraceCollector::new()
            .with_strace_path(hanging_strace(dir.path()))
            .with_timeout(Duration::from_secs(60));

        let token = CancelToken::new();
        let remote = token.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            remote.cancel();
        });

        let started = Instant::now();
        let err = collector.collect(&["true".to_string()], &token).unwrap_err();
        canceller.join().unwrap();
        assert!(matches!(err, CollectionError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_group_member_killed(dir.path());
    }

    #[test]
    fn test_cached_source_skips_timed_out_and_cancelled_runs() {
        let dir = tempfile::tempdir().unwrap();
        let collector = StraceCollector::new()
            .with_strace_path(hanging_strace(dir.path()))
            .with_timeout(Duration::from_millis(200));
        let cached = CachedTraceSource::new(AnsibleModule::new(collector));
        let p = params(&[("path", "/srv")]);

        let err = cached.collect("file", &p, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, CollectionError::TimedOut { .. }));
        assert!(cached.is_empty());

        let cancelled = CancelToken::new();
        cancelled.cancel();
        let err = cached.collect("file", &p, &cancelled).unwrap_err();
        assert!(matches!(err, CollectionError::Cancelled));
        assert!(cached.is_empty());
    }

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
