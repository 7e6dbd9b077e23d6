//! Bag-of-words record scorer
//!
//! For one field, both values are turned into vectors over the union `W` of
//! their whitespace tokens. A side's component for token `w` is
//! `count * (1 - frequency) * match_weight`, where the token stats come from
//! the side's own token map: `w` itself when present (match weight 1), else the
//! key closest to `w` by normalized edit distance (match weight = that
//! similarity). The field score is the cosine of the two vectors.

use crate::distance::{cosine_similarity, string_similarity};
use crate::rank::{Ranking, Scored};
use crate::schema::FieldWeights;
use ahash::AHashSet;
use fuzzrec_core::{tokens, FieldMetadata, Record, StatsModel};
use std::borrow::Cow;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Scorer {
    weights: FieldWeights,
    stats: Arc<StatsModel>,
}

impl Scorer {
    pub fn new(weights: FieldWeights, stats: Arc<StatsModel>) -> Self {
        Self { weights, stats }
    }

    pub fn weights(&self) -> &FieldWeights {
        &self.weights
    }

    /// Metadata the record carries for its current value, or one built from
    /// the aggregate counts.
    fn field_metadata<'a>(&self, field: &str, record: &'a Record) -> Cow<'a, FieldMetadata> {
        let value = record.get(field).unwrap_or("");
        match record.meta.as_ref().and_then(|m| m.for_value(field, value)) {
            Some(meta) => Cow::Borrowed(meta),
            None => Cow::Owned(self.stats.field_metadata(field, value)),
        }
    }

    /// Similarity of `r0` and `r1` on `field`, in `[0, 1]`.
    pub fn bow_sim(&self, field: &str, r0: &Record, r1: &Record) -> f64 {
        let v0 = r0.get(field).unwrap_or("");
        let v1 = r1.get(field).unwrap_or("");
        let words: AHashSet<&str> = tokens(v0).chain(tokens(v1)).collect();
        if words.is_empty() {
            return 0.0;
        }

        let m0 = self.field_metadata(field, r0);
        let m1 = self.field_metadata(field, r1);
        let mut a = Vec::with_capacity(words.len());
        let mut b = Vec::with_capacity(words.len());
        for word in words {
            a.push(component(&m0, word));
            b.push(component(&m1, word));
        }
        cosine_similarity(&a, &b)
    }

    /// Weighted sum of per-field similarities.
    pub fn score(&self, query: &Record, candidate: &Record) -> f64 {
        self.weights
            .fields()
            .iter()
            .map(|field| self.weights.share(field) * self.bow_sim(field, query, candidate))
            .sum()
    }

    /// Score every candidate and keep those strictly above `threshold`.
    pub fn rank<I>(&self, query: &Record, candidates: I, threshold: f64) -> Ranking
    where
        I: IntoIterator<Item = Record>,
    {
        candidates
            .into_iter()
            .filter_map(|record| {
                let score = self.score(query, &record);
                (score > threshold).then_some(Scored { score, record })
            })
            .collect()
    }
}

fn component(meta: &FieldMetadata, word: &str) -> f64 {
    let (entry, match_weight) = match meta.tokens.get(word) {
        Some(entry) => (entry, 1.0),
        None => {
            // first key wins ties
            let mut best: Option<(&fuzzrec_core::TokenEntry, f64)> = None;
            for (key, entry) in &meta.tokens {
                let sim = string_similarity(word, key);
                if best.map_or(true, |(_, s)| sim > s) {
                    best = Some((entry, sim));
                }
            }
            match best {
                Some(found) => found,
                None => return 0.0,
            }
        }
    };
    entry.stats.count as f64 * (1.0 - entry.stats.frequency) * match_weight
}
