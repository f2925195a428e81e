// Reference corpus stores
//
// A corpus maps an opaque key (module/system identity) to a reference trace
// and the parameters of the executable that produced it. Entries that cannot
// be loaded stay in the store as error slots so the matcher can skip them
// with a warning instead of failing the whole search.

use crate::parser;
use crate::trace::{ExecutableParameter, Strace};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Reference trace plus the parameters of the executable that produced it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusEntry {
    pub trace: Strace,
    #[serde(default)]
    pub parameters: Vec<ExecutableParameter>,
}

impl CorpusEntry {
    pub fn new(trace: Strace, parameters: Vec<ExecutableParameter>) -> Self {
        CorpusEntry { trace, parameters }
    }

    /// Parameter names must be non-empty and unique
    pub fn validate(&self, key: &str) -> std::result::Result<(), CorpusError> {
        let mut names = std::collections::HashSet::new();
        for p in &self.parameters {
            if p.name.trim().is_empty() {
                return Err(CorpusError::Invalid {
                    key: key.to_string(),
                    reason: "parameter with empty name".to_string(),
                });
            }
            if !names.insert(p.name.as_str()) {
                return Err(CorpusError::Invalid {
                    key: key.to_string(),
                    reason: format!("duplicate parameter '{}'", p.name),
                });
            }
        }
        Ok(())
    }
}

/// Why a single corpus entry could not be used
#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("failed to read corpus entry {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in corpus entry {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("corpus entry '{key}' has no parseable trace lines ({skipped} lines skipped)")]
    Unparseable { key: String, skipped: usize },

    #[error("invalid corpus entry '{key}': {reason}")]
    Invalid { key: String, reason: String },
}

/// One keyed corpus position, loaded or failed
#[derive(Debug, Clone)]
pub struct CorpusSlot {
    pub key: String,
    pub entry: std::result::Result<Arc<CorpusEntry>, Arc<CorpusError>>,
}

impl CorpusSlot {
    pub fn ok(key: impl Into<String>, entry: CorpusEntry) -> Self {
        CorpusSlot {
            key: key.into(),
            entry: Ok(Arc::new(entry)),
        }
    }

    pub fn failed(key: impl Into<String>, error: CorpusError) -> Self {
        CorpusSlot {
            key: key.into(),
            entry: Err(Arc::new(error)),
        }
    }
}

/// Read-mostly store of reference traces
pub trait CorpusStore: Send + Sync {
    /// All slots in insertion order
    fn entries(&self) -> Vec<CorpusSlot>;

    /// Changes whenever the contents change, so prepared forms can be rebuilt
    fn generation(&self) -> u64;
}

/// Entry from raw strace text; text with lines but none parseable is an error
pub fn entry_from_text(key: &str, text: &str, parameters: Vec<ExecutableParameter>) -> std::result::Result<CorpusEntry, CorpusError> {
    let report = parser::parse_str(text, key);
    if report.is_unparseable() {
        return Err(CorpusError::Unparseable {
            key: key.to_string(),
            skipped: report.warnings.len(),
        });
    }
    Ok(CorpusEntry::new(report.trace, parameters))
}

/// Corpus held in memory; useful for tests and embedding
#[derive(Debug, Default)]
pub struct InMemoryCorpus {
    slots: RwLock<Vec<CorpusSlot>>,
    generation: AtomicU64,
}

impl InMemoryCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace (keeping the original position) a slot
    pub fn insert_slot(&self, slot: CorpusSlot) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        match slots.iter_mut().find(|s| s.key == slot.key) {
            Some(existing) => *existing = slot,
            None => slots.push(slot),
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn insert(&self, key: impl Into<String>, entry: CorpusEntry) {
        self.insert_slot(CorpusSlot::ok(key, entry));
    }

    pub fn insert_trace(&self, key: impl Into<String>, trace: Strace) {
        self.insert(key, CorpusEntry::new(trace, Vec::new()));
    }

    /// Parse strace text; an unparseable text is stored as an error slot
    pub fn insert_text(&self, key: &str, text: &str, parameters: Vec<ExecutableParameter>) {
        match entry_from_text(key, text, parameters) {
            Ok(entry) => self.insert(key, entry),
            Err(e) => self.insert_slot(CorpusSlot::failed(key, e)),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CorpusStore for InMemoryCorpus {
    fn entries(&self) -> Vec<CorpusSlot> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

/// Corpus backed by a directory of `*.json` ([`CorpusEntry`]) and `*.strace` files
///
/// Loaded lazily on first lookup; [`DirectoryCorpus::refresh`] reloads.
/// Keys are file stems, ordered by file name.
#[derive(Debug)]
pub struct DirectoryCorpus {
    dir: PathBuf,
    loaded: RwLock<Option<Arc<Vec<CorpusSlot>>>>,
    generation: AtomicU64,
}

impl DirectoryCorpus {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let meta = fs::metadata(&dir)
            .with_context(|| format!("Failed to open corpus directory: {}", dir.display()))?;
        if !meta.is_dir() {
            anyhow::bail!("Corpus path is not a directory: {}", dir.display());
        }
        Ok(DirectoryCorpus {
            dir,
            loaded: RwLock::new(None),
            generation: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reload every entry from disk
    pub fn refresh(&self) -> Result<()> {
        let slots = self.load()?;
        *self.loaded.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(slots));
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load(&self) -> Result<Vec<CorpusSlot>> {
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list corpus directory: {}", self.dir.display()))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && matches!(p.extension().and_then(|e| e.to_str()), Some("json") | Some("strace"))
            })
            .collect();
        paths.sort();

        let slots: Vec<CorpusSlot> = paths.iter().map(|p| load_slot(p)).collect();
        tracing::debug!(dir = %self.dir.display(), entries = slots.len(), "Loaded corpus directory");
        Ok(slots)
    }

    fn loaded(&self) -> Arc<Vec<CorpusSlot>> {
        if let Some(slots) = self.loaded.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
            return Arc::clone(slots);
        }

        let mut guard = self.loaded.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(slots) = guard.as_ref() {
            return Arc::clone(slots);
        }
        let slots = Arc::new(self.load().unwrap_or_else(|e| {
            tracing::warn!("Corpus directory unavailable: {:#}", e);
            Vec::new()
        }));
        *guard = Some(Arc::clone(&slots));
        slots
    }
}

fn load_slot(path: &Path) -> CorpusSlot {
    let key = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(source) => {
            return CorpusSlot::failed(
                key,
                CorpusError::Io {
                    path: path.to_path_buf(),
                    source,
                },
            )
        }
    };

    let entry = if path.extension().and_then(|e| e.to_str()) == Some("json") {
        serde_json::from_str::<CorpusEntry>(&text)
            .map_err(|source| CorpusError::Json {
                path: path.to_path_buf(),
                source,
            })
            .and_then(|entry| entry.validate(&key).map(|()| entry))
    } else {
        entry_from_text(&key, &text, Vec::new())
    };

    match entry {
        Ok(entry) => CorpusSlot::ok(key, entry),
        Err(e) => CorpusSlot::failed(key, e),
    }
}

impl CorpusStore for DirectoryCorpus {
    fn entries(&self) -> Vec<CorpusSlot> {
        self.loaded().as_ref().clone()
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}
