//! strace text parser
//!
//! Turns `strace` output into a [`Strace`]. Parsing is lenient: a line that
//! cannot be understood is skipped and recorded as a [`ParseWarning`], it
//! never aborts the whole trace.
//!
//! Supported line shapes:
//! - `open("/etc/hosts", O_RDONLY) = 3`
//! - `1234 read(3, "...", 4096) = 12` (`-f` pid prefix, also `[pid 1234]`)
//! - `12:01:02.123456 close(3) = 0 <0.000010>` (timestamps, `-T` durations)
//! - `open("/x", O_RDONLY <unfinished ...>` + `<... open resumed>) = 3`
//! - `--- SIGCHLD {...} ---` and `+++ exited with 0 +++` are ignored

use crate::trace::{Literal, Number, Strace, Syscall, Value};
use anyhow::{Context, Result};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

/// A trace line that was skipped
#[derive(Debug, Clone, PartialEq)]
pub struct ParseWarning {
    /// 1-based line number in the input
    pub line_number: usize,
    pub line: String,
    pub reason: String,
}

/// Result of parsing a whole trace text
#[derive(Debug, Clone)]
pub struct ParseReport {
    pub trace: Strace,
    pub warnings: Vec<ParseWarning>,
    /// Signal, exit and blank lines that carry no syscall
    pub ignored_lines: usize,
}

impl ParseReport {
    /// True when the input had syscall-looking lines but none of them parsed
    pub fn is_unparseable(&self) -> bool {
        self.trace.is_empty() && !self.warnings.is_empty()
    }
}

#[allow(clippy::expect_used)] // Static regex patterns are hardcoded and valid
fn call_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<name>[A-Za-z_][A-Za-z0-9_]*)\((?P<args>.*)\)\s*=\s*(?P<ret>.*?)\s*(?:<\d+\.\d+>)?$",
        )
        .expect("valid regex")
    })
}

#[allow(clippy::expect_used)]
fn pid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:\[pid\s+(?P<bracketed>\d+)\]|(?P<bare>\d+))\s+").expect("valid regex"))
}

#[allow(clippy::expect_used)]
fn timestamp_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:\d{2}:\d{2}:\d{2}(?:\.\d+)?|\d{9,}\.\d+)\s+").expect("valid regex")
    })
}

#[allow(clippy::expect_used)]
fn resumed_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^<\.\.\.\s+(?P<name>[A-Za-z0-9_]+)\s+resumed>\s?(?P<rest>.*)$").expect("valid regex"))
}

#[allow(clippy::expect_used)]
fn int_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<num>-?(?:0[xX][0-9a-fA-F]+|0[0-7]*|[1-9][0-9]*))(?:<[^>]*>)?$")
            .expect("valid regex")
    })
}

#[allow(clippy::expect_used)]
fn float_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-?\d+\.\d+(?:[eE][-+]?\d+)?$").expect("valid regex"))
}

const UNFINISHED: &str = "<unfinished ...>";

/// Incremental parser that stitches `<unfinished ...>` / `resumed` pairs per pid
#[derive(Debug, Default)]
pub struct TraceParser {
    pending: HashMap<u32, String>,
    lines: Vec<Syscall>,
    warnings: Vec<ParseWarning>,
    ignored: usize,
    line_number: usize,
}

impl TraceParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line of strace output
    pub fn push_line(&mut self, raw_line: &str) {
        self.line_number += 1;
        let line = raw_line.trim();
        if line.is_empty() {
            self.ignored += 1;
            return;
        }

        let (pid, rest) = split_pid(line);
        let rest = match timestamp_regex().find(rest) {
            Some(m) => &rest[m.end()..],
            None => rest,
        };

        if rest.starts_with("---") || rest.starts_with("+++") {
            self.ignored += 1;
            return;
        }

        if let Some(prefix) = rest.strip_suffix(UNFINISHED) {
            self.pending.insert(pid, prefix.to_string());
            return;
        }

        let text = if let Some(caps) = resumed_regex().captures(rest) {
            match self.pending.remove(&pid) {
                Some(prefix) => format!("{}{}", prefix, &caps["rest"]),
                None => {
                    self.warn(raw_line, format!("resumed {} without unfinished call", &caps["name"]));
                    return;
                }
            }
        } else {
            rest.to_string()
        };

        match parse_line(&text) {
            Ok(call) => self.lines.push(call),
            Err(reason) => self.warn(raw_line, reason),
        }
    }

    fn warn(&mut self, line: &str, reason: String) {
        tracing::warn!(
            line_number = self.line_number,
            "Skipping trace line: {} ({})",
            reason,
            line
        );
        self.warnings.push(ParseWarning {
            line_number: self.line_number,
            line: line.to_string(),
            reason,
        });
    }

    /// Finish parsing; calls still unfinished are reported as warnings
    pub fn finish(mut self, executable: &str) -> ParseReport {
        let mut dangling: Vec<(u32, String)> = self.pending.drain().collect();
        dangling.sort();
        for (pid, prefix) in dangling {
            let reason = format!("pid {} call never resumed", pid);
            self.warn(&prefix, reason);
        }

        ParseReport {
            trace: Strace::new(executable, self.lines),
            warnings: self.warnings,
            ignored_lines: self.ignored,
        }
    }
}

fn split_pid(line: &str) -> (u32, &str) {
    match pid_regex().captures(line) {
        Some(caps) => {
            let pid = caps
                .name("bracketed")
                .or_else(|| caps.name("bare"))
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0);
            let end = caps.get(0).map(|m| m.end()).unwrap_or(0);
            (pid, &line[end..])
        }
        None => (0, line),
    }
}

/// Parse a whole strace output text
pub fn parse_str(text: &str, executable: &str) -> ParseReport {
    let mut parser = TraceParser::new();
    for line in text.lines() {
        parser.push_line(line);
    }
    parser.finish(executable)
}

/// Parse a strace output file
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<ParseReport> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read trace file: {}", path.display()))?;
    let executable = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(parse_str(&text, &executable))
}

/// Load a trace from a JSON-serialized [`Strace`] (`*.json`) or strace text
///
/// Text with syscall-looking lines but nothing parseable is an error rather
/// than an empty trace.
pub fn load_trace<P: AsRef<Path>>(path: P) -> Result<Strace> {
    let path = path.as_ref();
    if path.extension().and_then(|e| e.to_str()) == Some("json") {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read trace file: {}", path.display()))?;
        return serde_json::from_str(&text)
            .with_context(|| format!("Invalid JSON trace: {}", path.display()));
    }

    let report = parse_file(path)?;
    if report.is_unparseable() {
        anyhow::bail!(
            "No parseable syscall lines in {} ({} lines skipped)",
            path.display(),
            report.warnings.len()
        );
    }
    Ok(report.trace)
}

/// Parse one syscall line without pid, timestamp or resumption handling
pub fn parse_line(line: &str) -> std::result::Result<Syscall, String> {
    let caps = call_regex()
        .captures(line.trim())
        .ok_or_else(|| "not a syscall line".to_string())?;

    let arguments = split_arguments(&caps["args"])?
        .into_iter()
        .map(|token| Value::Literal(parse_literal(&token)))
        .collect();

    let ret = caps["ret"].trim();
    if ret.is_empty() {
        return Err("missing return value".to_string());
    }

    Ok(Syscall::new(&caps["name"], arguments, Value::Literal(parse_return(ret))))
}

/// Split an argument list on top-level commas
fn split_arguments(args: &str) -> std::result::Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escaped = false;

    for ch in args.chars() {
        if in_string {
            current.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => {
                in_string = true;
                current.push(ch);
            }
            '(' | '[' | '{' => {
                depth += 1;
                current.push(ch);
            }
            ')' | ']' | '}' => {
                depth -= 1;
                if depth < 0 {
                    return Err("unbalanced brackets in arguments".to_string());
                }
                current.push(ch);
            }
            ',' if depth == 0 => {
                tokens.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    if in_string {
        return Err("unterminated string argument".to_string());
    }
    if depth != 0 {
        return Err("unbalanced brackets in arguments".to_string());
    }

    let last = current.trim();
    if !last.is_empty() || !tokens.is_empty() {
        tokens.push(last.to_string());
    }
    Ok(tokens)
}

/// Interpret one argument token; unknown shapes become identifiers carrying the raw text
pub fn parse_literal(token: &str) -> Literal {
    let token = token.trim();

    if token.starts_with('"') {
        if let Some(value) = decode_quoted(token) {
            return Literal::String {
                value,
                raw: token.to_string(),
            };
        }
    }

    if token == "NULL" {
        return Literal::Null {
            raw: token.to_string(),
        };
    }

    if let Some(number) = parse_int(token) {
        return Literal::Number {
            value: Number::Int(number),
            raw: token.to_string(),
        };
    }

    if float_regex().is_match(token) {
        if let Ok(value) = token.parse::<f64>() {
            return Literal::Number {
                value: Number::Float(value),
                raw: token.to_string(),
            };
        }
    }

    Literal::Identifier {
        value: token.to_string(),
        raw: token.to_string(),
    }
}

fn parse_int(token: &str) -> Option<i64> {
    let caps = int_regex().captures(token)?;
    let num = caps.name("num")?.as_str();
    let (negative, digits) = match num.strip_prefix('-') {
        Some(d) => (true, d),
        None => (false, num),
    };

    let magnitude = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()?
    } else if digits.len() > 1 && digits.starts_with('0') {
        u64::from_str_radix(&digits[1..], 8).ok()?
    } else {
        digits.parse::<u64>().ok()?
    };

    // Kernel addresses and masks above i64::MAX wrap to their two's complement value
    let value = magnitude as i64;
    Some(if negative { value.wrapping_neg() } else { value })
}

fn parse_return(ret: &str) -> Literal {
    let first = ret.split_whitespace().next().unwrap_or(ret);
    match parse_literal(first) {
        Literal::Number { value, .. } => Literal::Number {
            value,
            raw: ret.to_string(),
        },
        _ => Literal::Identifier {
            value: first.to_string(),
            raw: ret.to_string(),
        },
    }
}

/// Decode a strace-quoted string, tolerating a trailing `...` truncation marker
fn decode_quoted(token: &str) -> Option<String> {
    let body = token.strip_prefix('"')?;
    let mut bytes: Vec<u8> = Vec::with_capacity(body.len());
    let mut chars = body.char_indices().peekable();
    let mut closed_at = None;

    while let Some((idx, ch)) = chars.next() {
        match ch {
            '"' => {
                closed_at = Some(idx);
                break;
            }
            '\\' => {
                let (_, esc) = chars.next()?;
                match esc {
                    'n' => bytes.push(b'\n'),
                    't' => bytes.push(b'\t'),
                    'r' => bytes.push(b'\r'),
                    'v' => bytes.push(0x0b),
                    'f' => bytes.push(0x0c),
                    '\\' => bytes.push(b'\\'),
                    '"' => bytes.push(b'"'),
                    '\'' => bytes.push(b'\''),
                    'x' => {
                        let mut hex = String::new();
                        while hex.len() < 2 {
                            match chars.peek() {
                                Some((_, c)) if c.is_ascii_hexdigit() => {
                                    hex.push(*c);
                                    chars.next();
                                }
                                _ => break,
                            }
                        }
                        bytes.push(u8::from_str_radix(&hex, 16).ok()?);
                    }
                    '0'..='7' => {
                        let mut oct = esc.to_string();
                        while oct.len() < 3 {
                            match chars.peek() {
                                Some((_, c)) if ('0'..='7').contains(c) => {
                                    oct.push(*c);
                                    chars.next();
                                }
                                _ => break,
                            }
                        }
                        bytes.push(u8::from_str_radix(&oct, 8).ok()?);
                    }
                    other => {
                        let mut buf = [0u8; 4];
                        bytes.push(b'\\');
                        bytes.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
                    }
                }
            }
            other => {
                let mut buf = [0u8; 4];
                bytes.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
            }
        }
    }

    let closed_at = closed_at?;
    let trailing = body[closed_at + 1..].trim();
    if !trailing.is_empty() && trailing != "..." {
        return None;
    }

    Some(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_open_line() {
        let call = parse_line(r#"open("/etc/hosts", O_RDONLY|O_CLOEXEC) = 3"#).unwrap();
        assert_eq!(call.name, "open");
        assert_eq!(call.arguments.len(), 2);
        assert_eq!(
            call.arguments[0].as_literal().and_then(Literal::as_str),
            Some("/etc/hosts")
        );
        assert_eq!(
            call.arguments[1],
            Value::Literal(Literal::identifier("O_RDONLY|O_CLOEXEC"))
        );
        assert_eq!(call.return_value, Value::Literal(Literal::int(3)));
    }

    #[test]
    fn test_parse_error_return() {
        let call = parse_line(r#"stat("/missing", 0x7ffd) = -1 ENOENT (No such file or directory)"#).unwrap();
        let ret = call.return_value.as_literal().unwrap();
        assert_eq!(ret.as_number(), Some(Number::Int(-1)));
        assert_eq!(ret.raw(), "-1 ENOENT (No such file or directory)");
    }

    #[test]
    fn test_parse_struct_and_array_arguments() {
        let call = parse_line(r#"fstat(3, {st_mode=S_IFREG|0644, st_size=123, ...}) = 0"#).unwrap();
        assert_eq!(call.arguments.len(), 2);
        assert!(matches!(
            call.arguments[1].as_literal(),
            Some(Literal::Identifier { .. })
        ));

        let call = parse_line("pipe2([3, 4], O_CLOEXEC) = 0").unwrap();
        assert_eq!(call.arguments.len(), 2);
        assert_eq!(call.arguments[0], Value::Literal(Literal::identifier("[3, 4]")));
    }

    #[test]
    fn test_parse_no_arguments() {
        let call = parse_line("getpid() = 4242").unwrap();
        assert!(call.arguments.is_empty());
    }

    #[test]
    fn test_parse_numbers() {
        assert_eq!(parse_literal("0x10").as_number(), Some(Number::Int(16)));
        assert_eq!(parse_literal("0644").as_number(), Some(Number::Int(0o644)));
        assert_eq!(parse_literal("-1").as_number(), Some(Number::Int(-1)));
        assert_eq!(parse_literal("0").as_number(), Some(Number::Int(0)));
        assert_eq!(parse_literal("1.5").as_number(), Some(Number::Float(1.5)));
        assert_eq!(parse_literal("3</etc/hosts>").as_number(), Some(Number::Int(3)));
        assert_eq!(parse_literal("NULL"), Literal::null());
        assert_eq!(parse_literal("AT_FDCWD"), Literal::identifier("AT_FDCWD"));
    }

    #[test]
    fn test_parse_string_escapes_and_truncation() {
        let lit = parse_literal(r#""a\tb\n\x41\101\"""#);
        assert_eq!(lit.as_str(), Some("a\tb\nAA\""));

        let lit = parse_literal(r##""#!/bin/sh\n"..."##);
        assert_eq!(lit.as_str(), Some("#!/bin/sh\n"));
        assert_eq!(lit.raw(), r##""#!/bin/sh\n"..."##);
    }

    #[test]
    fn test_parse_string_with_comma() {
        let call = parse_line(r#"write(1, "a, b", 4) = 4"#).unwrap();
        assert_eq!(call.arguments.len(), 3);
        assert_eq!(call.arguments[1].as_literal().and_then(Literal::as_str), Some("a, b"));
    }

    #[test]
    fn test_parse_str_with_pid_and_timestamps() {
        let text = "\
1234  12:00:00.000001 open(\"/a\", O_RDONLY) = 3 <0.000010>
[pid  1235] 1700000000.123456 close(3) = 0
";
        let report = parse_str(text, "test");
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        assert_eq!(report.trace.names(), vec!["open", "close"]);
    }

    #[test]
    fn test_parse_str_stitches_unfinished() {
        let text = "\
100 open(\"/a\", O_RDONLY <unfinished ...>
101 getpid() = 101
100 <... open resumed>) = 3
";
        let report = parse_str(text, "test");
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        assert_eq!(report.trace.names(), vec!["getpid", "open"]);
        assert_eq!(report.trace.trace_lines[1].arguments.len(), 2);
    }

    #[test]
    fn test_parse_str_skips_bad_lines() {
        let text = "\
open(\"/a\") = 3
this is not strace output
--- SIGCHLD {si_signo=SIGCHLD} ---
close(3) = 0
+++ exited with 0 +++
";
        let report = parse_str(text, "test");
        assert_eq!(report.trace.len(), 2);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].line_number, 2);
        assert_eq!(report.ignored_lines, 2);
        assert!(!report.is_unparseable());
    }

    #[test]
    fn test_parse_str_dangling_unfinished() {
        let report = parse_str("7 read(3, <unfinished ...>\n", "test");
        assert!(report.trace.is_empty());
        assert_eq!(report.warnings.len(), 1);
        assert!(report.is_unparseable());
    }

    #[test]
    fn test_parse_exit_group_unknown_return() {
        let call = parse_line("exit_group(0) = ?").unwrap();
        assert_eq!(call.return_value, Value::Literal(Literal::identifier("?")));
    }

    #[test]
    fn test_empty_input_is_empty_trace() {
        let report = parse_str("", "test");
        assert!(report.trace.is_empty());
        assert!(report.warnings.is_empty());
        assert!(!report.is_unparseable());
    }

    #[test]
    fn test_load_trace_text_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let text_path = dir.path().join("copy.strace");
        std::fs::write(&text_path, "open(\"/etc/motd\", O_RDONLY) = 3\nclose(3) = 0\n").unwrap();
        let trace = load_trace(&text_path).unwrap();
        assert_eq!(trace.names(), vec!["open", "close"]);
        assert_eq!(trace.executable, "copy");

        let json_path = dir.path().join("copy.json");
        std::fs::write(&json_path, serde_json::to_string(&trace).unwrap()).unwrap();
        assert_eq!(load_trace(&json_path).unwrap().to_string(), trace.to_string());
    }

    #[test]
    fn test_load_trace_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.strace");
        std::fs::write(&path, "hello world\n").unwrap();
        assert!(load_trace(&path).is_err());
        assert!(load_trace(dir.path().join("missing.strace")).is_err());
    }
}
