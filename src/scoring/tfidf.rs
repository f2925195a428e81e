// TF-IDF cosine similarity over syscall identities
//
// Document = one trace. Term = the equality strategy's identity key.
//   tf(t, d) = raw count of t in d
//   idf(t)   = ln((1 + N) / (1 + df(t))) + 1
// Rare identities (ioctl, setsockopt) weigh more than ubiquitous ones
// (open, close).

use super::{first_occurrences, pinned_trace, shared_identity_mapping, ScoringMethod, ScoringResult};
use crate::equality::SyscallEquality;
use crate::preprocessing::HoleSet;
use crate::trace::{Strace, Syscall, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Document frequencies over a reference corpus
#[derive(Debug, Clone, Default)]
pub struct IdfTable {
    documents: usize,
    document_frequency: HashMap<String, usize>,
    /// One representative per distinct identity and document, by syscall name
    calls_by_name: HashMap<String, Vec<(usize, Syscall)>>,
    /// Equality strategy the identities were computed with
    equality: String,
}

impl IdfTable {
    pub fn from_corpus<'a, I>(traces: I, equality: &dyn SyscallEquality) -> Self
    where
        I: IntoIterator<Item = &'a Strace>,
    {
        let mut documents = 0;
        let mut document_frequency: HashMap<String, usize> = HashMap::new();
        let mut calls_by_name: HashMap<String, Vec<(usize, Syscall)>> = HashMap::new();
        for (document, trace) in traces.into_iter().enumerate() {
            documents += 1;
            let mut distinct: HashSet<String> = HashSet::new();
            for call in trace.iter() {
                if distinct.insert(equality.identity(call)) {
                    calls_by_name
                        .entry(call.name.clone())
                        .or_default()
                        .push((document, call.clone()));
                }
            }
            for id in distinct {
                *document_frequency.entry(id).or_insert(0) += 1;
            }
        }
        IdfTable {
            documents,
            document_frequency,
            calls_by_name,
            equality: equality.name().to_string(),
        }
    }

    pub fn documents(&self) -> usize {
        self.documents
    }

    /// Smoothed inverse document frequency; unseen identities get the maximum weight
    pub fn idf(&self, identity: &str) -> f64 {
        self.weight(self.document_frequency.get(identity).copied().unwrap_or(0))
    }

    /// Inverse document frequency of a call as a scorer sees it
    ///
    /// A hole stands for whatever value the compared trace held there, so a
    /// holed call occurs in every document with a call agreeing with it
    /// outside the holes.
    pub fn call_idf(&self, call: &Syscall, equality: &dyn SyscallEquality) -> f64 {
        let identity = equality.identity(call);
        let df = if call.arguments.iter().any(Value::is_hole) {
            self.holed_frequency(call, &identity, equality)
        } else {
            self.document_frequency.get(&identity).copied().unwrap_or(0)
        };
        self.weight(df)
    }

    fn holed_frequency(&self, call: &Syscall, identity: &str, equality: &dyn SyscallEquality) -> usize {
        let Some(candidates) = self.calls_by_name.get(&call.name) else {
            return 0;
        };
        let mut documents: HashSet<usize> = HashSet::new();
        for (document, candidate) in candidates {
            if documents.contains(document) {
                continue;
            }
            let aligned = candidate.map_arguments(|i, value| match call.arguments.get(i) {
                Some(Value::Hole(hole)) => Value::Hole(*hole),
                _ => value.clone(),
            });
            if equality.identity(&aligned) == identity {
                documents.insert(*document);
            }
        }
        documents.len()
    }

    fn weight(&self, df: usize) -> f64 {
        ((1.0 + self.documents as f64) / (1.0 + df as f64)).ln() + 1.0
    }
}

/// TF-IDF weighted cosine similarity
///
/// Without a corpus (or when the corpus was indexed under a different
/// equality strategy) the two compared traces form the corpus.
#[derive(Debug, Clone, Default)]
pub struct Tfidf {
    corpus: Option<Arc<IdfTable>>,
}

impl Tfidf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_corpus(table: IdfTable) -> Self {
        Tfidf {
            corpus: Some(Arc::new(table)),
        }
    }

    fn table_for(&self, a: &Strace, b: &Strace, equality: &dyn SyscallEquality) -> Arc<IdfTable> {
        match &self.corpus {
            Some(table) if table.equality == equality.name() => Arc::clone(table),
            Some(table) => {
                tracing::debug!(
                    indexed = %table.equality,
                    requested = equality.name(),
                    "IDF corpus indexed with another equality, using pair as corpus"
                );
                Arc::new(IdfTable::from_corpus([a, b], equality))
            }
            None => Arc::new(IdfTable::from_corpus([a, b], equality)),
        }
    }
}

fn term_counts(trace: &Strace, equality: &dyn SyscallEquality) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for call in trace.iter() {
        *counts.entry(equality.identity(call)).or_insert(0) += 1;
    }
    counts
}

impl ScoringMethod for Tfidf {
    fn name(&self) -> &'static str {
        "tfidf"
    }

    fn score(
        &self,
        s1: &Arc<Strace>,
        s2: &Arc<Strace>,
        pinned: &HoleSet,
        equality: &dyn SyscallEquality,
    ) -> ScoringResult {
        let a = pinned_trace(s1, pinned);
        let b = pinned_trace(s2, pinned);

        let score = match (a.is_empty(), b.is_empty()) {
            (true, true) => 1.0,
            (true, false) | (false, true) => 0.0,
            (false, false) => {
                let table = self.table_for(&a, &b, equality);
                let tf_a = term_counts(&a, equality);
                let tf_b = term_counts(&b, equality);

                let mut idf: HashMap<String, f64> = HashMap::new();
                for call in a.iter().chain(b.iter()) {
                    let id = equality.identity(call);
                    if !idf.contains_key(&id) {
                        let value = table.call_idf(call, equality);
                        idf.insert(id, value);
                    }
                }

                let weight = |counts: &BTreeMap<String, usize>, id: &String| {
                    counts.get(id).copied().unwrap_or(0) as f64 * idf.get(id).copied().unwrap_or(1.0)
                };

                let mut dot = 0.0;
                for id in tf_a.keys().filter(|id| tf_b.contains_key(*id)) {
                    dot += weight(&tf_a, id) * weight(&tf_b, id);
                }
                let norm_a = tf_a.keys().map(|id| weight(&tf_a, id).powi(2)).sum::<f64>().sqrt();
                let norm_b = tf_b.keys().map(|id| weight(&tf_b, id).powi(2)).sum::<f64>().sqrt();

                if norm_a == 0.0 || norm_b == 0.0 {
                    0.0
                } else {
                    dot / (norm_a * norm_b)
                }
            }
        };

        let mapping = shared_identity_mapping(
            &first_occurrences(&a, equality),
            &first_occurrences(&b, equality),
        );
        ScoringResult::new(a, b, score, mapping, self.name(), equality.name())
    }
}
