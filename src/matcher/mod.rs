// Match orchestrator: best corpus candidate for a source trace
//
// Each corpus entry is run through the per-trace pipeline once per corpus
// generation. A lookup prepares the source the same way, then scores every
// candidate in parallel (pairwise hole punching + configured method), keeps
// the highest score with first-seen tie-break, and only past the confidence
// threshold turns the winner into a parameter mapping and migration trace.
//
// "No match" is a normal outcome, never a low-confidence guess. Bad corpus
// entries are skipped with a warning; they never abort a lookup.

mod cache;
mod config;
mod corpus;
mod mapping;

pub use cache::{cache_key, trace_digest, CacheKind, MemoryCache, NoCache, ScoreCache};
pub use config::{MatchConfig, MethodWeight};
pub use corpus::{
    entry_from_text, CorpusEntry, CorpusError, CorpusSlot, CorpusStore, DirectoryCorpus,
    InMemoryCorpus,
};
pub use mapping::{
    derive_mapping, synthesize_migration, MigrationResult, ParameterBinding, ParameterMapping,
    ParameterPath,
};

use crate::collection::{CancelToken, CollectionError, TraceSource};
use crate::equality::SyscallEquality;
use crate::preprocessing::{Pipeline, Preprocessor, PunchHoles};
use crate::scoring::{IdfTable, ScoringMethod, ScoringResult};
use crate::trace::{ExecutableParameter, Strace};
use anyhow::Result;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Outcome of a corpus lookup
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MatchOutcome {
    /// Best candidate cleared the threshold
    Match(Box<MigrationResult>),
    /// No candidate cleared the threshold (or the corpus had none)
    NoMatch {
        best_score: Option<f64>,
        best_key: Option<String>,
    },
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Match(_))
    }

    pub fn into_option(self) -> Option<MigrationResult> {
        match self {
            MatchOutcome::Match(result) => Some(*result),
            MatchOutcome::NoMatch { .. } => None,
        }
    }

    /// Score of the best candidate, accepted or not
    pub fn best_score(&self) -> Option<f64> {
        match self {
            MatchOutcome::Match(result) => Some(result.score),
            MatchOutcome::NoMatch { best_score, .. } => *best_score,
        }
    }
}

struct PreparedEntry {
    key: String,
    entry: Arc<CorpusEntry>,
    prepared: Arc<Strace>,
    digest: String,
}

struct PreparedCorpus {
    generation: u64,
    entries: Vec<PreparedEntry>,
    idf: Option<Arc<IdfTable>>,
    method: Box<dyn ScoringMethod>,
}

/// Finds the best reference trace for a source trace
pub struct Matcher {
    config: MatchConfig,
    corpus: Arc<dyn CorpusStore>,
    cache: Arc<dyn ScoreCache>,
    equality: Arc<dyn SyscallEquality>,
    pipeline: Pipeline,
    punch: PunchHoles,
    prepared: RwLock<Option<Arc<PreparedCorpus>>>,
    /// Hash of everything in the config that changes a score
    fingerprint: String,
}

impl Matcher {
    pub fn new(config: MatchConfig, corpus: Arc<dyn CorpusStore>) -> Result<Self> {
        config.validate().map_err(anyhow::Error::msg)?;

        let punch = PunchHoles::new()
            .with_rules(config.volatility_rules()?)
            .with_pinned(config.pins.clone());
        let fingerprint = cache_key(&[&serde_json::to_string(&config)?]);

        Ok(Matcher {
            cache: config.cache.build(),
            equality: config.equality.build(),
            pipeline: Pipeline::standard(config.filter()),
            punch,
            prepared: RwLock::new(None),
            fingerprint,
            corpus,
            config,
        })
    }

    /// Replace the score cache (e.g. share one across matchers)
    pub fn with_cache(mut self, cache: Arc<dyn ScoreCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<dyn ScoreCache> {
        &self.cache
    }

    /// Per-trace preprocessing (canonical form, descriptors, selection)
    pub fn prepare(&self, trace: &Strace) -> Strace {
        self.pipeline.apply(trace)
    }

    /// Score two already-prepared traces
    fn score_prepared(&self, method: &dyn ScoringMethod, source: &Strace, target: &Strace) -> ScoringResult {
        let (a, b) = if self.config.pairwise_holes {
            self.punch.punch_pair(source, target)
        } else {
            (self.punch.punch(source), self.punch.punch(target))
        };
        method.score(&Arc::new(a), &Arc::new(b), &self.config.pins, self.equality.as_ref())
    }

    /// Compare two raw traces with the configured pipeline and method
    pub fn compare(&self, source: &Strace, target: &Strace) -> ScoringResult {
        let method = self.config.build_method(None);
        self.score_prepared(method.as_ref(), &self.prepare(source), &self.prepare(target))
    }

    fn prepared_corpus(&self) -> Arc<PreparedCorpus> {
        let generation = self.corpus.generation();
        if let Some(current) = self.prepared.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
            if current.generation == generation {
                return Arc::clone(current);
            }
        }

        let mut guard = self.prepared.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = guard.as_ref() {
            if current.generation == generation {
                return Arc::clone(current);
            }
        }

        let fresh = Arc::new(self.build_prepared(generation));
        *guard = Some(Arc::clone(&fresh));
        fresh
    }

    fn build_prepared(&self, generation: u64) -> PreparedCorpus {
        let usable: Vec<(String, Arc<CorpusEntry>)> = self
            .corpus
            .entries()
            .into_iter()
            .filter_map(|slot| match slot.entry {
                Ok(entry) => match entry.validate(&slot.key) {
                    Ok(()) => Some((slot.key, entry)),
                    Err(e) => {
                        tracing::warn!(key = %slot.key, "Skipping corpus entry: {}", e);
                        None
                    }
                },
                Err(e) => {
                    tracing::warn!(key = %slot.key, "Skipping corpus entry: {}", e);
                    None
                }
            })
            .collect();

        let entries: Vec<PreparedEntry> = usable
            .into_par_iter()
            .map(|(key, entry)| {
                let prepared = self.pipeline.apply(&entry.trace);
                PreparedEntry {
                    digest: trace_digest(&prepared),
                    prepared: Arc::new(prepared),
                    key,
                    entry,
                }
            })
            .collect();

        // Indexed with the single-trace holes a scored candidate carries
        let idf = self.config.uses_tfidf().then(|| {
            let punched: Vec<Strace> = entries.iter().map(|e| self.punch.punch(&e.prepared)).collect();
            Arc::new(IdfTable::from_corpus(punched.iter(), self.equality.as_ref()))
        });
        tracing::debug!(generation, entries = entries.len(), "Prepared corpus");

        PreparedCorpus {
            generation,
            method: self.config.build_method(idf.as_deref()),
            idf,
            entries,
        }
    }

    /// Document frequencies of the current corpus, when TF-IDF is configured
    pub fn idf_table(&self) -> Option<Arc<IdfTable>> {
        self.prepared_corpus().idf.clone()
    }

    fn score_entry(
        &self,
        corpus: &PreparedCorpus,
        source: &Strace,
        source_digest: &str,
        candidate: &PreparedEntry,
    ) -> Arc<ScoringResult> {
        // IDF weights depend on the whole corpus, not just the pair
        let generation = if self.config.uses_tfidf() {
            corpus.generation.to_string()
        } else {
            String::new()
        };
        let key = cache_key(&[
            source_digest,
            &candidate.key,
            &candidate.digest,
            &self.fingerprint,
            &generation,
        ]);

        if let Some(hit) = self.cache.get(&key) {
            tracing::debug!(key = %candidate.key, score = hit.score, "Score cache hit");
            return hit;
        }

        let result = Arc::new(self.score_prepared(corpus.method.as_ref(), source, &candidate.prepared));
        self.cache.insert(key, Arc::clone(&result));
        result
    }

    /// Best corpus candidate for `source`, if it clears the threshold
    ///
    /// `source_params` names the source executable's parameters; its concrete
    /// values come from `source.arguments`.
    pub fn find_best_match(&self, source: &Strace, source_params: &[ExecutableParameter]) -> MatchOutcome {
        let corpus = self.prepared_corpus();
        let prepared = self.prepare(source);
        let digest = trace_digest(&prepared);

        let scored: Vec<Arc<ScoringResult>> = corpus
            .entries
            .par_iter()
            .map(|candidate| self.score_entry(&corpus, &prepared, &digest, candidate))
            .collect();

        let mut best: Option<(usize, &Arc<ScoringResult>)> = None;
        for (index, result) in scored.iter().enumerate() {
            tracing::debug!(key = %corpus.entries[index].key, score = result.score, "Scored candidate");
            if best.map_or(true, |(_, b)| result.score > b.score) {
                best = Some((index, result));
            }
        }

        let Some((index, result)) = best else {
            return MatchOutcome::NoMatch {
                best_score: None,
                best_key: None,
            };
        };
        let winner = &corpus.entries[index];

        if result.score < self.config.threshold {
            tracing::info!(
                key = %winner.key,
                score = result.score,
                threshold = self.config.threshold,
                "No candidate cleared the threshold"
            );
            return MatchOutcome::NoMatch {
                best_score: Some(result.score),
                best_key: Some(winner.key.clone()),
            };
        }

        let mapping = derive_mapping(
            result,
            &prepared,
            &winner.prepared,
            source_params,
            &winner.entry.parameters,
        );
        let migration = synthesize_migration(&prepared, &winner.prepared, &mapping);
        tracing::info!(key = %winner.key, score = result.score, bindings = mapping.len(), "Matched");

        MatchOutcome::Match(Box::new(MigrationResult {
            source: Arc::new(prepared),
            target: Arc::clone(&winner.prepared),
            mapping,
            migration,
            score: result.score,
            corpus_key: winner.key.clone(),
            positions: result.mapping.clone(),
            metadata: result.metadata.clone(),
        }))
    }

    /// Collect the trace of a module invocation, then look it up
    ///
    /// Only a failure to obtain the source trace is an error.
    pub fn match_module(
        &self,
        module: &str,
        parameters: &BTreeMap<String, String>,
        declared: &[ExecutableParameter],
        source: &dyn TraceSource,
        cancel: &CancelToken,
    ) -> Result<MatchOutcome, CollectionError> {
        let mut trace = source.collect(module, parameters, cancel)?;
        for (name, value) in parameters {
            trace.arguments.entry(name.clone()).or_insert_with(|| value.clone());
        }
        Ok(self.find_best_match(&trace, declared))
    }
}

impl std::fmt::Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matcher")
            .field("config", &self.config)
            .field("pipeline", &self.pipeline)
            .field("cached_scores", &self.cache.len())
            .finish()
    }
}
