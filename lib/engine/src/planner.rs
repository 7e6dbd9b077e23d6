//! Shard planning.
//!
//! The shard domain is the set of distinct value combinations of the exact
//! fields in the universe. When it has more than `max_domain_size` entries the
//! exact field with the most distinct values is dropped and the domain is
//! recomputed, until it fits or no exact field is left.

use crate::config::MatcherConfig;
use fuzzrec_core::{Error, FilterAssignment, Result};
use fuzzrec_storage::DocumentStore;
use tracing::{debug, info};

/// The exact fields kept after planning and one assignment per shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardPlan {
    pub fields: Vec<String>,
    pub filters: Vec<FilterAssignment>,
}

pub struct ShardPlanner<'a> {
    store: &'a dyn DocumentStore,
    universe: String,
    exact: Vec<String>,
    min_domain_size: usize,
    max_domain_size: usize,
}

impl<'a> ShardPlanner<'a> {
    pub fn new(store: &'a dyn DocumentStore, config: &MatcherConfig) -> Self {
        Self {
            store,
            universe: config.collections().universe,
            exact: config.exact.clone(),
            min_domain_size: config.min_domain_size,
            max_domain_size: config.max_domain_size,
        }
    }

    pub fn plan(&self) -> Result<ShardPlan> {
        if self.exact.is_empty() {
            return Ok(ShardPlan {
                fields: Vec::new(),
                filters: vec![FilterAssignment::new()],
            });
        }

        let mut cardinality = Vec::with_capacity(self.exact.len());
        for field in &self.exact {
            cardinality.push((field.clone(), self.store.distinct(&self.universe, field)?.len()));
        }

        let mut exact = self.exact.clone();
        while !exact.is_empty() {
            let domain = self.store.group_distinct(&self.universe, &exact)?;
            if domain.len() <= self.max_domain_size {
                if domain.len() < self.min_domain_size {
                    debug!(
                        "shard domain over {:?} has {} entries, below {}",
                        exact,
                        domain.len(),
                        self.min_domain_size
                    );
                }
                info!("planned {} shards over {:?}", domain.len(), exact);
                return Ok(ShardPlan {
                    fields: exact,
                    filters: domain.into_iter().map(FilterAssignment::from).collect(),
                });
            }

            // drop the remaining field with the most distinct values, first on ties
            let mut widest: Option<(usize, usize)> = None;
            for (i, field) in exact.iter().enumerate() {
                let count = cardinality
                    .iter()
                    .find(|(name, _)| name == field)
                    .map(|(_, count)| *count)
                    .unwrap_or(0);
                if widest.map_or(true, |(_, best)| count > best) {
                    widest = Some((i, count));
                }
            }
            if let Some((i, count)) = widest {
                let dropped = exact.remove(i);
                debug!(
                    "domain of {} exceeds {}, dropping {} ({} values)",
                    domain.len(),
                    self.max_domain_size,
                    dropped,
                    count
                );
            }
        }

        Err(Error::Configuration(format!(
            "too many filters: no subset of {:?} yields at most {} shards",
            self.exact, self.max_domain_size
        )))
    }
}
