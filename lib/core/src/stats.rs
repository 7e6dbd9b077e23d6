//! Corpus statistics over the reference universe.
//!
//! A [`StatsModel`] holds two [`CountTable`]s, one for whitespace tokens and
//! one for 3-character shingles, both keyed by field. Per-record [`Metadata`]
//! is derived from them:
//!
//! - at universe preprocessing time with exact counts, in two passes, because a
//!   token's frequency depends on the final distinct-token count of its field
//! - at query time from persisted aggregates, where unseen tokens are smoothed
//!   to a count of 1
//!
//! `frequency = global count / distinct tokens in the field`. It is a rarity
//! weight, unbounded above, and deliberately not a probability.

use crate::canonical::{shingles, tokens};
use crate::record::Record;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Occurrences within one value plus the field-level frequency.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TokenStats {
    pub count: u32,
    #[serde(rename = "freq")]
    pub frequency: f64,
}

/// Same shape as [`TokenStats`], for shingles.
pub type ShingleStats = TokenStats;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TokenEntry {
    #[serde(flatten)]
    pub stats: TokenStats,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub shingles: BTreeMap<String, ShingleStats>,
}

/// Token map for the value a record holds in one field.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldMetadata {
    pub value: String,
    pub tokens: BTreeMap<String, TokenEntry>,
}

impl FieldMetadata {
    fn counted(value: &str) -> Self {
        let mut tokens_map: BTreeMap<String, TokenEntry> = BTreeMap::new();
        for token in tokens(value) {
            let entry = tokens_map.entry(token.to_string()).or_default();
            entry.stats.count += 1;
            for gram in shingles(token) {
                entry.shingles.entry(gram).or_default().count += 1;
            }
        }
        Self {
            value: value.to_string(),
            tokens: tokens_map,
        }
    }

    pub fn get(&self, token: &str) -> Option<&TokenStats> {
        self.tokens.get(token).map(|entry| &entry.stats)
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Per-field metadata of one record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata {
    fields: BTreeMap<String, FieldMetadata>,
}

impl Metadata {
    /// Metadata for `field`, provided it was built for `value`.
    pub fn for_value(&self, field: &str, value: &str) -> Option<&FieldMetadata> {
        self.fields.get(field).filter(|meta| meta.value == value)
    }

    pub fn field(&self, field: &str) -> Option<&FieldMetadata> {
        self.fields.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, meta: FieldMetadata) {
        self.fields.insert(field.into(), meta);
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// field -> key -> global count.
#[derive(Debug, Clone, Default)]
pub struct CountTable {
    counts: AHashMap<String, AHashMap<String, u64>>,
}

impl CountTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, field: &str, key: &str) {
        *self
            .counts
            .entry(field.to_string())
            .or_default()
            .entry(key.to_string())
            .or_insert(0) += 1;
    }

    pub fn insert(&mut self, field: &str, key: &str, count: u64) {
        self.counts
            .entry(field.to_string())
            .or_default()
            .insert(key.to_string(), count);
    }

    pub fn count(&self, field: &str, key: &str) -> Option<u64> {
        self.counts.get(field).and_then(|keys| keys.get(key)).copied()
    }

    /// Number of distinct keys seen for `field`.
    pub fn distinct(&self, field: &str) -> usize {
        self.counts.get(field).map(|keys| keys.len()).unwrap_or(0)
    }

    /// Exact frequency; 0 when the key or the field is unknown.
    pub fn frequency(&self, field: &str, key: &str) -> f64 {
        match (self.count(field, key), self.distinct(field)) {
            (Some(count), distinct) if distinct > 0 => count as f64 / distinct as f64,
            _ => 0.0,
        }
    }

    /// Frequency with unseen keys counted once and an empty field treated as one
    /// distinct key, so out-of-vocabulary tokens never divide by zero.
    pub fn smoothed_frequency(&self, field: &str, key: &str) -> f64 {
        let count = self.count(field, key).unwrap_or(1);
        let distinct = self.distinct(field).max(1);
        count as f64 / distinct as f64
    }

    pub fn rows(&self) -> impl Iterator<Item = (&str, &str, u64)> {
        self.counts.iter().flat_map(|(field, keys)| {
            keys.iter()
                .map(move |(key, count)| (field.as_str(), key.as_str(), *count))
        })
    }

    pub fn len(&self) -> usize {
        self.counts.values().map(|keys| keys.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Token and shingle counts for every field of the universe.
#[derive(Debug, Clone, Default)]
pub struct StatsModel {
    pub tokens: CountTable,
    pub shingles: CountTable,
}

impl StatsModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tables(tokens: CountTable, shingles: CountTable) -> Self {
        Self { tokens, shingles }
    }

    /// Count a universe record and return its metadata with counts only.
    /// Frequencies are filled by [`StatsModel::resolve`] once every record has
    /// been observed.
    pub fn observe(&mut self, record: &Record) -> Metadata {
        let mut meta = Metadata::default();
        for (field, value) in record.fields() {
            for token in tokens(value) {
                self.tokens.increment(field, token);
                for gram in shingles(token) {
                    self.shingles.increment(field, &gram);
                }
            }
            meta.insert(field.clone(), FieldMetadata::counted(value));
        }
        meta
    }

    /// Second pass: exact frequencies from the final counts.
    pub fn resolve(&self, meta: &mut Metadata) {
        for (field, field_meta) in meta.fields.iter_mut() {
            for (token, entry) in field_meta.tokens.iter_mut() {
                entry.stats.frequency = self.tokens.frequency(field, token);
                for (gram, stats) in entry.shingles.iter_mut() {
                    stats.frequency = self.shingles.frequency(field, gram);
                }
            }
        }
    }

    /// Observe every record, then resolve and attach metadata.
    pub fn build(records: &mut [Record]) -> Self {
        let mut model = Self::new();
        let mut metas: Vec<Metadata> = records.iter().map(|r| model.observe(r)).collect();
        for (record, mut meta) in records.iter_mut().zip(metas.drain(..)) {
            model.resolve(&mut meta);
            record.meta = Some(meta);
        }
        model
    }

    /// Query-side metadata for one field value, smoothed against the aggregates.
    pub fn field_metadata(&self, field: &str, value: &str) -> FieldMetadata {
        let mut meta = FieldMetadata::counted(value);
        for (token, entry) in meta.tokens.iter_mut() {
            entry.stats.frequency = self.tokens.smoothed_frequency(field, token);
            for (gram, stats) in entry.shingles.iter_mut() {
                stats.frequency = self.shingles.smoothed_frequency(field, gram);
            }
        }
        meta
    }

    /// Query-side metadata for the `fields` present in `record`.
    pub fn target_metadata<S: AsRef<str>>(&self, record: &Record, fields: &[S]) -> Metadata {
        let mut meta = Metadata::default();
        for field in fields {
            let field = field.as_ref();
            if let Some(value) = record.get(field) {
                meta.insert(field, self.field_metadata(field, value));
            }
        }
        meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(name: &str) -> Record {
        Record::new(vec![("NAME".to_string(), name.to_string())])
    }

    #[test]
    fn test_frequency_is_count_over_distinct() {
        let mut table = CountTable::new();
        for _ in 0..3 {
            table.increment("F", "x");
        }
        table.increment("F", "y");
        assert_eq!(table.distinct("F"), 2);
        assert_eq!(table.frequency("F", "x"), 1.5);
        assert_eq!(table.frequency("F", "y"), 0.5);
        assert_eq!(table.frequency("F", "z"), 0.0);
    }

    #[test]
    fn test_smoothing_for_unseen_tokens() {
        let mut table = CountTable::new();
        table.insert("F", "x", 4);
        table.insert("F", "y", 1);
        assert_eq!(table.smoothed_frequency("F", "unseen"), 0.5);
        assert_eq!(table.smoothed_frequency("EMPTY", "anything"), 1.0);
    }

    #[test]
    fn test_two_pass_uses_final_distinct_count() {
        let mut records = vec![rec("ACME"), rec("ACME BOLT")];
        let model = StatsModel::build(&mut records);
        let first = records[0].meta.as_ref().unwrap();
        let acme = first.for_value("NAME", "ACME").unwrap().get("ACME").unwrap();
        assert_eq!(acme.count, 1);
        // 2 occurrences over 2 distinct tokens, even though only one token had
        // been seen when the first record was observed.
        assert_eq!(acme.frequency, 1.0);
        assert_eq!(model.tokens.count("NAME", "ACME"), Some(2));
    }

    #[test]
    fn test_shingle_counts_follow_token_occurrences() {
        let mut records = vec![rec("AB AB CAT")];
        let model = StatsModel::build(&mut records);
        assert_eq!(model.shingles.count("NAME", "AAB"), Some(2));
        assert_eq!(model.shingles.count("NAME", "CAT"), Some(1));
        let meta = records[0].meta.as_ref().unwrap().field("NAME").unwrap();
        let ab = &meta.tokens["AB"];
        assert_eq!(ab.stats.count, 2);
        assert_eq!(ab.shingles["ABB"].count, 2);
        assert_eq!(ab.shingles["ABB"].frequency, 2.0 / 3.0);
    }

    #[test]
    fn test_target_metadata_skips_missing_fields() {
        let mut records = vec![rec("ACME INC")];
        let model = StatsModel::build(&mut records);
        let query = Record::new(vec![("NAME".to_string(), "ACME WIDGETS".to_string())]);
        let meta = model.target_metadata(&query, &["NAME", "ADDRESS"]);
        assert_eq!(meta.len(), 1);
        let name = meta.field("NAME").unwrap();
        assert_eq!(name.get("ACME").unwrap().frequency, 0.5);
        assert_eq!(name.get("WIDGETS").unwrap().frequency, 0.5);
    }

    #[test]
    fn test_metadata_for_value_rejects_stale_value() {
        let mut records = vec![rec("ACME")];
        StatsModel::build(&mut records);
        let meta = records[0].meta.as_ref().unwrap();
        assert!(meta.for_value("NAME", "ACME").is_some());
        assert!(meta.for_value("NAME", "OTHER").is_none());
    }
}
