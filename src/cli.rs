//! CLI argument parsing for dozer

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "dozer")]
#[command(version)]
#[command(about = "Infer equivalent module invocations by comparing syscall traces", long_about = None)]
pub struct Cli {
    /// Enable debug tracing output to stderr
    #[arg(long, global = true)]
    pub debug: bool,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text", global = true)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Parse a strace output file and print the normalized trace
    Parse {
        /// strace output (or a JSON trace)
        file: PathBuf,

        /// Apply the preprocessing pipeline before printing
        #[arg(long)]
        preprocess: bool,

        /// Keep only these syscalls (e.g., -e trace=file,network)
        #[arg(short = 'e', long = "expr", value_name = "EXPR")]
        filter: Option<String>,
    },

    /// Score two traces against each other
    Compare {
        source: PathBuf,
        target: PathBuf,

        #[command(flatten)]
        matching: MatchArgs,
    },

    /// Find the best corpus match for a source trace
    Match {
        /// Source trace file
        source: PathBuf,

        /// Directory of reference traces (*.json, *.strace)
        #[arg(long, value_name = "DIR")]
        corpus: PathBuf,

        /// Source parameter as NAME=VALUE (repeatable)
        #[arg(short = 'p', long = "param", value_name = "NAME=VALUE", value_parser = parse_key_val)]
        params: Vec<(String, String)>,

        #[command(flatten)]
        matching: MatchArgs,
    },

    /// Run a command under strace and print its trace
    Collect {
        /// Syscall classes to trace (e.g., -e trace=file,process)
        #[arg(short = 'e', long = "expr", value_name = "EXPR")]
        filter: Option<String>,

        /// Give up after this many seconds
        #[arg(long, value_name = "SECS", default_value = "300")]
        timeout: u64,

        /// Write the trace here instead of stdout
        #[arg(short = 'o', long = "output", value_name = "FILE")]
        output: Option<PathBuf>,

        /// Command to trace (everything after --)
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

/// Options shared by `compare` and `match`
#[derive(Args, Debug, Clone, Default)]
pub struct MatchArgs {
    /// Matcher configuration file (TOML)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Confidence threshold override
    #[arg(long, value_name = "SCORE")]
    pub threshold: Option<f64>,

    /// Equality strategy override (name, strict, canonical)
    #[arg(long, value_name = "KIND")]
    pub equality: Option<String>,

    /// Scoring method override (jaccard, tfidf, maximum_matching; repeatable)
    #[arg(long = "method", value_name = "METHOD")]
    pub methods: Vec<String>,
}

/// Parse a NAME=VALUE pair
pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("invalid NAME=VALUE: no '=' found in '{}'", s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_subcommand() {
        let cli = Cli::parse_from(["dozer", "parse", "trace.strace"]);
        assert!(!cli.debug);
        assert_eq!(cli.format, OutputFormat::Text);
        assert!(matches!(cli.command, Command::Parse { preprocess: false, .. }));
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["dozer", "compare", "a.strace", "b.strace", "--debug", "--format", "json"]);
        assert!(cli.debug);
        assert_eq!(cli.format, OutputFormat::Json);
    }

    #[test]
    fn test_cli_match_params() {
        let cli = Cli::parse_from([
            "dozer", "match", "src.strace", "--corpus", "corpus", "-p", "path=/srv", "--param", "state=directory",
            "--threshold", "0.7", "--method", "jaccard", "--method", "mcm",
        ]);
        let Command::Match { params, matching, .. } = cli.command else {
            panic!("expected match subcommand");
        };
        assert_eq!(params, vec![("path".into(), "/srv".into()), ("state".into(), "directory".into())]);
        assert_eq!(matching.threshold, Some(0.7));
        assert_eq!(matching.methods, vec!["jaccard", "mcm"]);
    }

    #[test]
    fn test_cli_match_requires_corpus() {
        assert!(Cli::try_parse_from(["dozer", "match", "src.strace"]).is_err());
    }

    #[test]
    fn test_cli_collect_command() {
        let cli = Cli::parse_from(["dozer", "collect", "-e", "trace=file", "--", "ls", "-l"]);
        let Command::Collect { command, filter, timeout, .. } = cli.command else {
            panic!("expected collect subcommand");
        };
        assert_eq!(command, vec!["ls", "-l"]);
        assert_eq!(filter.as_deref(), Some("trace=file"));
        assert_eq!(timeout, 300);
    }

    #[test]
    fn test_parse_key_val() {
        assert_eq!(parse_key_val("a=b=c").unwrap(), ("a".into(), "b=c".into()));
        assert_eq!(parse_key_val("empty=").unwrap(), ("empty".into(), String::new()));
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
    }
}
