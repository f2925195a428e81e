use anyhow::{Context, Result};
use clap::Parser;
use dozer::cli::{Cli, Command, MatchArgs, OutputFormat};
use dozer::collection::{CancelToken, StraceCollector};
use dozer::filter::SyscallFilter;
use dozer::matcher::{DirectoryCorpus, MatchConfig, MatchOutcome, Matcher, MethodWeight};
use dozer::preprocessing::{Pipeline, Preprocessor};
use dozer::scoring::ScoringResult;
use dozer::trace::{ExecutableParameter, Strace};
use dozer::{parser, trace::meta};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Config file (or defaults) with command-line overrides applied
fn load_config(args: &MatchArgs) -> Result<MatchConfig> {
    let mut config = match &args.config {
        Some(path) => MatchConfig::from_toml(path)?,
        None => MatchConfig::default(),
    };

    if let Some(threshold) = args.threshold {
        config.threshold = threshold;
    }
    if let Some(equality) = &args.equality {
        config.equality = equality.parse().map_err(anyhow::Error::msg)?;
    }
    if !args.methods.is_empty() {
        config.methods = args
            .methods
            .iter()
            .map(|m| m.parse().map(|kind| MethodWeight::new(kind, 1.0)))
            .collect::<Result<_, String>>()
            .map_err(anyhow::Error::msg)?;
    }

    config.validate().map_err(anyhow::Error::msg)?;
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_parse(file: &Path, preprocess: bool, filter: Option<String>, format: OutputFormat) -> Result<()> {
    let mut trace = parser::load_trace(file)?;
    let filter = match filter {
        Some(expr) => SyscallFilter::from_expr(&expr)?,
        None => SyscallFilter::all(),
    };

    if preprocess {
        trace = Pipeline::standard(filter).apply(&trace);
    } else if !filter.is_all() {
        trace = trace.with_lines(
            trace
                .iter()
                .filter(|call| filter.should_trace(&call.name))
                .cloned()
                .collect(),
        );
    }

    match format {
        OutputFormat::Json => print_json(&trace),
        OutputFormat::Text => {
            print!("{}", trace);
            Ok(())
        }
    }
}

fn print_comparison(result: &ScoringResult) {
    println!("score: {:.3}", result.score);
    for (key, value) in &result.metadata {
        println!("{}: {}", key, value);
    }
    println!("mapping:");
    for &(i, j) in &result.mapping {
        let left = result.s1.get(i).map(ToString::to_string).unwrap_or_default();
        let right = result.s2.get(j).map(ToString::to_string).unwrap_or_default();
        println!("  {:>4} -> {:<4} {}  ~  {}", i, j, left, right);
    }
}

fn run_compare(source: &Path, target: &Path, args: &MatchArgs, format: OutputFormat) -> Result<()> {
    let config = load_config(args)?;
    let matcher = Matcher::new(config, Arc::new(dozer::matcher::InMemoryCorpus::new()))?;
    let result = matcher.compare(&parser::load_trace(source)?, &parser::load_trace(target)?);

    match format {
        OutputFormat::Json => print_json(&result),
        OutputFormat::Text => {
            print_comparison(&result);
            Ok(())
        }
    }
}

fn print_outcome(outcome: &MatchOutcome) {
    match outcome {
        MatchOutcome::NoMatch { best_score, best_key } => match (best_score, best_key) {
            (Some(score), Some(key)) => {
                println!("no match (best candidate {} scored {:.3})", key, score)
            }
            _ => println!("no match (no usable corpus entries)"),
        },
        MatchOutcome::Match(result) => {
            println!("match: {} (score {:.3})", result.corpus_key, result.score);
            println!("parameter mapping:");
            for binding in result.mapping.bindings() {
                println!(
                    "  {} ({}) -> {} ({})",
                    binding.source.path,
                    binding.source.parameter.as_deref().unwrap_or("-"),
                    binding.target.path,
                    binding.target.parameter.as_deref().unwrap_or("-"),
                );
            }
            if !result.migration.arguments.is_empty() {
                println!("target arguments:");
                for (name, value) in &result.migration.arguments {
                    println!("  {} = {}", name, value);
                }
            }
            println!("migration:");
            print!("{}", result.migration);
        }
    }
}

fn run_match(
    source: &Path,
    corpus: &Path,
    params: Vec<(String, String)>,
    args: &MatchArgs,
    format: OutputFormat,
) -> Result<()> {
    let config = load_config(args)?;
    let corpus = DirectoryCorpus::open(corpus)?;
    let matcher = Matcher::new(config, Arc::new(corpus))?;

    let declared: Vec<ExecutableParameter> = params
        .iter()
        .map(|(name, _)| ExecutableParameter::required(name.clone(), ""))
        .collect();
    let arguments: BTreeMap<String, String> = params.into_iter().collect();

    let mut trace: Strace = parser::load_trace(source)?;
    trace.arguments.extend(arguments);
    let outcome = matcher.find_best_match(&trace, &declared);

    match format {
        OutputFormat::Json => print_json(&outcome),
        OutputFormat::Text => {
            print_outcome(&outcome);
            Ok(())
        }
    }
}

fn run_collect(
    filter: Option<String>,
    timeout: u64,
    output: Option<&Path>,
    command: &[String],
    format: OutputFormat,
) -> Result<()> {
    let filter = match filter {
        Some(expr) => SyscallFilter::from_expr(&expr)?,
        None => SyscallFilter::all(),
    };
    let collector = StraceCollector::new()
        .with_filter(filter)
        .with_timeout(Duration::from_secs(timeout));
    let trace = collector
        .collect(command, &CancelToken::new())
        .with_context(|| format!("Failed to collect trace of: {}", command.join(" ")))?
        .with_metadata(meta::MODULE, command.join(" "));

    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(&trace)?,
        OutputFormat::Text => trace.to_string(),
    };
    match output {
        Some(path) => std::fs::write(path, rendered)
            .with_context(|| format!("Failed to write trace: {}", path.display()))?,
        None => print!("{}", rendered),
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(args.debug);

    match args.command {
        Command::Parse {
            file,
            preprocess,
            filter,
        } => run_parse(&file, preprocess, filter, args.format),
        Command::Compare {
            source,
            target,
            matching,
        } => run_compare(&source, &target, &matching, args.format),
        Command::Match {
            source,
            corpus,
            params,
            matching,
        } => run_match(&source, &corpus, params, &matching, args.format),
        Command::Collect {
            filter,
            timeout,
            output,
            command,
        } => run_collect(filter, timeout, output.as_deref(), &command, args.format),
    }
}
