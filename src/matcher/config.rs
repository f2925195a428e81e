// Configuration for corpus matching
//
// Loaded from TOML; every field has a default so a partial file works.

use crate::equality::EqualityKind;
use crate::filter::{SyscallCategory, SyscallFilter};
use crate::matcher::cache::CacheKind;
use crate::preprocessing::{HoleSet, VolatilityRules};
use crate::scoring::{
    Composite, IdfTable, JaccardCoefficient, MaximumCardinalityMatching, MethodKind,
    ScoringMethod, Tfidf,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// One scoring method and its weight in the composite score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodWeight {
    pub method: MethodKind,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

impl MethodWeight {
    pub fn new(method: MethodKind, weight: f64) -> Self {
        MethodWeight { method, weight }
    }
}

/// Matcher configuration
///
/// # Example
/// ```
/// use dozer::matcher::MatchConfig;
///
/// let config = MatchConfig::default();
/// assert_eq!(config.threshold, 0.6);
/// assert!(config.validate().is_ok());
/// ```
///
/// # Example TOML
/// ```toml
/// threshold = 0.6
/// equality = "canonical"
/// categories = ["file", "network", "process"]
/// cache = "memory"
/// ordered_matching = false
///
/// [[methods]]
/// method = "maximum_matching"
/// weight = 1.0
///
/// [[pins]]
/// syscall = "open"
/// index = 0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Minimum score for a match to be accepted (accepted when score >= threshold)
    pub threshold: f64,

    /// Equality strategy used by every scoring method
    pub equality: EqualityKind,

    /// Syscall categories kept by SelectSyscalls (all syscalls when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<SyscallCategory>>,

    /// Score cache backing
    pub cache: CacheKind,

    /// Restrict maximum matching to order-preserving pairs
    pub ordered_matching: bool,

    /// Hole source and target literals that only one side contains
    pub pairwise_holes: bool,

    /// Extra regex patterns marking string literals as volatile
    pub volatile_patterns: Vec<String>,

    /// Argument positions always treated as wildcards
    pub pins: HoleSet,

    /// Scoring methods; several are combined as a weighted mean
    pub methods: Vec<MethodWeight>,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            threshold: 0.6,
            equality: EqualityKind::Canonical,
            categories: None,
            cache: CacheKind::Memory,
            ordered_matching: false,
            pairwise_holes: true,
            volatile_patterns: Vec::new(),
            pins: HoleSet::new(),
            methods: vec![MethodWeight::new(MethodKind::MaximumMatching, 1.0)],
        }
    }
}

impl MatchConfig {
    /// Fewer, more certain matches
    pub fn strict() -> Self {
        Self {
            threshold: 0.8,
            equality: EqualityKind::Strict,
            ordered_matching: true,
            ..Self::default()
        }
    }

    /// More matches, lower certainty
    pub fn permissive() -> Self {
        Self {
            threshold: 0.4,
            equality: EqualityKind::Name,
            methods: vec![
                MethodWeight::new(MethodKind::Jaccard, 1.0),
                MethodWeight::new(MethodKind::MaximumMatching, 1.0),
            ],
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read matcher config: {}", path.as_ref().display())
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: MatchConfig =
            toml::from_str(content).with_context(|| "Failed to parse TOML matcher config")?;
        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(format!("threshold must be in [0, 1], got {}", self.threshold));
        }

        if self.methods.is_empty() {
            return Err("at least one scoring method is required".to_string());
        }

        for m in &self.methods {
            if !m.weight.is_finite() || m.weight < 0.0 {
                return Err(format!(
                    "weight of method '{}' must be a non-negative number, got {}",
                    m.method, m.weight
                ));
            }
        }

        if self.methods.iter().all(|m| m.weight == 0.0) {
            return Err("at least one scoring method needs a positive weight".to_string());
        }

        for pattern in &self.volatile_patterns {
            if let Err(e) = regex::Regex::new(pattern) {
                return Err(format!("invalid volatile pattern '{}': {}", pattern, e));
            }
        }

        Ok(())
    }

    /// Selector for the SelectSyscalls stage
    pub fn filter(&self) -> SyscallFilter {
        match &self.categories {
            Some(categories) => SyscallFilter::from_categories(categories.iter().copied()),
            None => SyscallFilter::all(),
        }
    }

    pub fn volatility_rules(&self) -> Result<VolatilityRules> {
        self.volatile_patterns
            .iter()
            .try_fold(VolatilityRules::default(), |rules, p| rules.with_pattern(p))
    }

    /// Build the configured scoring method; `idf` feeds TF-IDF
    pub fn build_method(&self, idf: Option<&IdfTable>) -> Box<dyn ScoringMethod> {
        let single = |kind: MethodKind| -> Box<dyn ScoringMethod> {
            match kind {
                MethodKind::Jaccard => Box::new(JaccardCoefficient),
                MethodKind::Tfidf => match idf {
                    Some(table) => Box::new(Tfidf::with_corpus(table.clone())),
                    None => Box::new(Tfidf::new()),
                },
                MethodKind::MaximumMatching if self.ordered_matching => {
                    Box::new(MaximumCardinalityMatching::ordered())
                }
                MethodKind::MaximumMatching => Box::new(MaximumCardinalityMatching::new()),
            }
        };

        match self.methods.as_slice() {
            [only] => single(only.method),
            many => {
                let mut composite = Composite::new();
                for m in many {
                    composite.push(single(m.method), m.weight);
                }
                Box::new(composite)
            }
        }
    }

    pub fn uses_tfidf(&self) -> bool {
        self.methods.iter().any(|m| m.method == MethodKind::Tfidf)
    }
}
