// CanonicalForm: path and whitespace normalization of string arguments

use super::Preprocessor;
use crate::trace::{Literal, Strace, Syscall, Value};

/// Upper bound on normalization rounds; every input settles within a few
const MAX_ROUNDS: usize = 8;

/// Normalizes path-like string arguments and free-text whitespace
///
/// Path-like strings (`/...`, `~`, `~/...`, `./...`, `../...`, or anything
/// containing `/` that is not a URL) get `.`/`..` resolved lexically,
/// duplicate separators removed, trailing separators stripped and `~`
/// expanded when a home directory is known. Other strings have whitespace
/// runs collapsed to single spaces and are trimmed.
///
/// The transform is idempotent: it is iterated to a fixed point.
///
/// # Example
/// ```
/// use dozer::preprocessing::CanonicalForm;
///
/// let canonical = CanonicalForm::new().with_home("/home/user");
/// assert_eq!(canonical.canonicalize_string("~/a//b/../c/"), "/home/user/a/c");
/// assert_eq!(canonical.canonicalize_string("  hello   world "), "hello world");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalForm {
    home: Option<String>,
    working_dir: Option<String>,
}

impl CanonicalForm {
    /// Uses `$HOME` (if set) for `~` expansion
    pub fn new() -> Self {
        CanonicalForm {
            home: std::env::var("HOME").ok().filter(|h| !h.is_empty()),
            working_dir: None,
        }
    }

    /// No `~` expansion and no working directory
    pub fn plain() -> Self {
        CanonicalForm::default()
    }

    pub fn with_home(mut self, home: impl Into<String>) -> Self {
        self.home = Some(home.into());
        self
    }

    /// Resolve relative paths against `dir`
    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Canonical form of one string value
    pub fn canonicalize_string(&self, input: &str) -> String {
        let mut current = input.to_string();
        for _ in 0..MAX_ROUNDS {
            let next = self.canonicalize_once(&current);
            if next == current {
                break;
            }
            current = next;
        }
        current
    }

    fn canonicalize_once(&self, input: &str) -> String {
        if is_path_like(input) {
            self.normalize_path(input)
        } else {
            collapse_whitespace(input)
        }
    }

    fn normalize_path(&self, path: &str) -> String {
        let mut expanded = match (&self.home, path) {
            (Some(home), "~") => home.clone(),
            (Some(home), p) if p.starts_with("~/") => format!("{}{}", home, &p[1..]),
            _ => path.to_string(),
        };

        if !expanded.starts_with('/') {
            if let Some(dir) = &self.working_dir {
                expanded = format!("{}/{}", dir, expanded);
            }
        }

        let absolute = expanded.starts_with('/');
        let mut parts: Vec<&str> = Vec::new();
        for component in expanded.split('/') {
            match component {
                "" | "." => {}
                ".." => match parts.last() {
                    Some(&last) if last != ".." => {
                        parts.pop();
                    }
                    _ if absolute => {}
                    _ => parts.push(".."),
                },
                other => parts.push(other),
            }
        }

        if absolute {
            format!("/{}", parts.join("/"))
        } else if parts.is_empty() {
            ".".to_string()
        } else {
            parts.join("/")
        }
    }

    /// String literals are canonicalized; every other shape passes through
    pub fn canonicalize_literal(&self, literal: &Literal) -> Literal {
        match literal {
            Literal::String { value, raw } => {
                let canonical = self.canonicalize_string(value);
                if &canonical == value {
                    Literal::String {
                        value: canonical,
                        raw: raw.clone(),
                    }
                } else {
                    Literal::string(canonical)
                }
            }
            other => other.clone(),
        }
    }

    pub fn canonicalize_value(&self, value: &Value) -> Value {
        match value {
            Value::Literal(lit) => Value::Literal(self.canonicalize_literal(lit)),
            Value::Hole(hole) => Value::Hole(*hole),
        }
    }

    pub fn canonicalize_syscall(&self, call: &Syscall) -> Syscall {
        let mut out = call.map_arguments(|_, v| self.canonicalize_value(v));
        out.return_value = self.canonicalize_value(&call.return_value);
        out
    }
}

impl Preprocessor for CanonicalForm {
    fn name(&self) -> &'static str {
        "canonical_form"
    }

    fn apply(&self, trace: &Strace) -> Strace {
        trace.with_lines(trace.iter().map(|c| self.canonicalize_syscall(c)).collect())
    }
}

/// Anchored strings and bare relative paths; anything with padding or
/// whitespace runs is free text, whatever slashes it contains
fn is_path_like(s: &str) -> bool {
    if s.trim() != s || s.contains("  ") || s.contains(['\t', '\n', '\r']) {
        return false;
    }
    let anchored = s.starts_with('/')
        || s == "~"
        || s.starts_with("~/")
        || s == "."
        || s == ".."
        || s.starts_with("./")
        || s.starts_with("../");
    anchored || (s.contains('/') && !s.contains("://") && !s.contains(' '))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canon() -> CanonicalForm {
        CanonicalForm::plain().with_home("/home/alice")
    }

    #[test]
    fn test_resolves_dot_segments() {
        let c = canon();
        assert_eq!(c.canonicalize_string("/etc/./nginx/../hosts"), "/etc/hosts");
        assert_eq!(c.canonicalize_string("/../etc"), "/etc");
        assert_eq!(c.canonicalize_string("a/b/../../.."), "..");
        assert_eq!(c.canonicalize_string("./"), ".");
    }

    #[test]
    fn test_strips_duplicate_and_trailing_separators() {
        let c = canon();
        assert_eq!(c.canonicalize_string("//usr///lib//"), "/usr/lib");
        assert_eq!(c.canonicalize_string("/"), "/");
    }

    #[test]
    fn test_home_expansion() {
        let c = canon();
        assert_eq!(c.canonicalize_string("~"), "/home/alice");
        assert_eq!(c.canonicalize_string("~/.ssh/config"), "/home/alice/.ssh/config");
        // Other users' homes are not expanded
        assert_eq!(c.canonicalize_string("~bob/x"), "~bob/x");
        assert_eq!(CanonicalForm::plain().canonicalize_string("~/x"), "~/x");
    }

    #[test]
    fn test_working_dir() {
        let c = CanonicalForm::plain().with_working_dir("/srv/app");
        assert_eq!(c.canonicalize_string("./conf/../app.toml"), "/srv/app/app.toml");
        assert_eq!(c.canonicalize_string("/abs"), "/abs");
    }

    #[test]
    fn test_whitespace_collapse() {
        let c = canon();
        assert_eq!(c.canonicalize_string("  install \t  nginx\n"), "install nginx");
        assert_eq!(c.canonicalize_string(""), "");
        assert_eq!(c.canonicalize_string("https://example.com//x"), "https://example.com//x");
    }

    #[test]
    fn test_free_text_with_slash_is_collapsed() {
        let c = canon();
        assert_eq!(c.canonicalize_string("  installed   nginx/stable  "), "installed nginx/stable");
        assert_eq!(c.canonicalize_string("state: present\tpath: /srv"), "state: present path: /srv");
        // Single spaces inside an anchored path are part of the name
        assert_eq!(c.canonicalize_string("/srv/My Docs//a"), "/srv/My Docs/a");
        assert_eq!(c.canonicalize_string("conf.d//site"), "conf.d/site");
    }

    #[test]
    fn test_idempotent_on_tricky_inputs() {
        let c = canon();
        for input in ["./a  b", " /a/ ", "./ ~x", " ..", "~/../..", "a//b/./", "x y/z  w"] {
            let once = c.canonicalize_string(input);
            assert_eq!(c.canonicalize_string(&once), once, "input {:?}", input);
        }
    }

    #[test]
    fn test_literal_raw_updated_only_on_change() {
        let c = canon();
        let unchanged = Literal::String {
            value: "/etc/hosts".into(),
            raw: "\"/etc/hosts\"".into(),
        };
        assert_eq!(c.canonicalize_literal(&unchanged).raw(), "\"/etc/hosts\"");

        let changed = c.canonicalize_literal(&Literal::string("/etc//hosts"));
        assert_eq!(changed.as_str(), Some("/etc/hosts"));
        assert_eq!(changed.raw(), "\"/etc/hosts\"");
    }

    #[test]
    fn test_non_string_literals_pass_through() {
        let c = canon();
        let ident = Literal::identifier("O_RDONLY|O_CLOEXEC");
        assert_eq!(c.canonicalize_literal(&ident), ident);
        assert_eq!(c.canonicalize_literal(&Literal::int(3)), Literal::int(3));
    }

    #[test]
    fn test_apply_returns_new_trace() {
        let trace = Strace::new(
            "t",
            vec![Syscall::from_literals(
                "open",
                vec![Literal::string("/a/./b")],
                Literal::int(3),
            )],
        );
        let out = canon().apply(&trace);
        assert_eq!(out.trace_lines[0].arguments[0], Value::Literal(Literal::string("/a/b")));
        assert_eq!(trace.trace_lines[0].arguments[0], Value::Literal(Literal::string("/a/./b")));
    }
}
