//! Matcher configuration
//!
//! Loaded from a JSON file. Field names are canonicalized the same way as
//! header cells, so `"name"` in the configuration refers to the `NAME` column.

use crate::collections::Collections;
use fuzzrec_core::{canonicalize, Error, Result};
use fuzzrec_similarity::FieldWeights;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Banded MinHash parameters shared by every shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LshConfig {
    /// Jaccard similarity the banding is tuned for.
    pub threshold: f64,
    pub num_perm: usize,
    /// Seed of the permutation family; all workers must agree on it.
    pub seed: u64,
}

impl Default for LshConfig {
    fn default() -> Self {
        Self {
            threshold: 0.6,
            num_perm: 128,
            seed: 1,
        }
    }
}

fn default_delimiter() -> char {
    '\t'
}

fn default_min_domain_size() -> usize {
    2
}

fn default_max_domain_size() -> usize {
    100
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Prefix of every collection this matcher owns.
    pub name: String,
    /// Fuzzy fields, compared by the scorer.
    pub fields: Vec<String>,
    /// Exact fields, used to partition the universe into shards.
    #[serde(default)]
    pub exact: Vec<String>,
    #[serde(default)]
    pub field_weights: BTreeMap<String, f64>,
    /// Universe field -> target column holding it.
    #[serde(default)]
    pub field_rename_map: BTreeMap<String, String>,
    /// Candidates must score strictly above this.
    #[serde(default)]
    pub score_threshold: f64,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default)]
    pub universe_file: Option<PathBuf>,
    #[serde(default = "default_min_domain_size")]
    pub min_domain_size: usize,
    #[serde(default = "default_max_domain_size")]
    pub max_domain_size: usize,
    #[serde(default)]
    pub lsh: LshConfig,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Kill workers running longer than this. Unset means wait forever.
    #[serde(default)]
    pub worker_timeout_secs: Option<u64>,
}

impl MatcherConfig {
    pub fn new<S: AsRef<str>>(name: impl Into<String>, fields: &[S]) -> Self {
        Self {
            name: name.into(),
            fields: fields.iter().map(|f| f.as_ref().to_string()).collect(),
            exact: Vec::new(),
            field_weights: BTreeMap::new(),
            field_rename_map: BTreeMap::new(),
            score_threshold: 0.0,
            delimiter: default_delimiter(),
            universe_file: None,
            min_domain_size: default_min_domain_size(),
            max_domain_size: default_max_domain_size(),
            lsh: LshConfig::default(),
            worker_count: default_worker_count(),
            worker_timeout_secs: None,
        }
        .normalized()
    }

    pub fn with_exact<S: AsRef<str>>(mut self, exact: &[S]) -> Self {
        self.exact = exact.iter().map(|f| canonicalize(f.as_ref())).collect();
        self
    }

    pub fn with_weight(mut self, field: &str, weight: f64) -> Self {
        self.field_weights.insert(canonicalize(field), weight);
        self
    }

    pub fn with_rename(mut self, universe_field: &str, target_column: &str) -> Self {
        self.field_rename_map
            .insert(canonicalize(universe_field), canonicalize(target_column));
        self
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        let config = config.normalized();
        config.validate()?;
        Ok(config)
    }

    /// Canonicalize every field name.
    pub fn normalized(mut self) -> Self {
        self.fields = self.fields.iter().map(|f| canonicalize(f)).collect();
        self.exact = self.exact.iter().map(|f| canonicalize(f)).collect();
        self.field_weights = self
            .field_weights
            .into_iter()
            .map(|(f, w)| (canonicalize(&f), w))
            .collect();
        self.field_rename_map = self
            .field_rename_map
            .into_iter()
            .map(|(to, from)| (canonicalize(&to), canonicalize(&from)))
            .collect();
        self
    }

    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(Error::Configuration(msg));
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return bad(format!("invalid matcher name {:?}", self.name));
        }
        if self.fields.is_empty() || self.fields.iter().any(String::is_empty) {
            return bad("at least one non-empty fuzzy field is required".to_string());
        }
        if self.exact.iter().any(String::is_empty) {
            return bad("exact field names must not be empty".to_string());
        }
        if self.min_domain_size > self.max_domain_size {
            return bad(format!(
                "min_domain_size {} exceeds max_domain_size {}",
                self.min_domain_size, self.max_domain_size
            ));
        }
        if self.score_threshold.is_nan() || self.score_threshold < 0.0 {
            return bad(format!("score_threshold must be non-negative, got {}", self.score_threshold));
        }
        if self.worker_count == 0 {
            return bad("worker_count must be at least 1".to_string());
        }
        if self.delimiter == '\n' || self.delimiter == '\r' {
            return bad("delimiter must not be a line break".to_string());
        }
        if !(0.0..=1.0).contains(&self.lsh.threshold) || self.lsh.num_perm < 2 {
            return bad(format!("invalid LSH parameters {:?}", self.lsh));
        }
        self.field_weights().map(|_| ())
    }

    pub fn field_weights(&self) -> Result<FieldWeights> {
        FieldWeights::new(&self.fields, &self.field_weights)
    }

    pub fn collections(&self) -> Collections {
        Collections::new(&self.name)
    }

    pub fn worker_timeout(&self) -> Option<Duration> {
        self.worker_timeout_secs.map(Duration::from_secs)
    }
}
