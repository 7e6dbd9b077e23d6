//! Sharded LSH index.
//!
//! A shard covers the universe records selected by one [`FilterAssignment`].
//! It keeps one [`MinHashLsh`] per fuzzy field and a position -> record id
//! table. Shards are immutable: they are built once, uploaded through the
//! object broker under a name derived from their identity, and only ever
//! downloaded afterwards.

use crate::config::{LshConfig, MatcherConfig};
use fuzzrec_core::{FilterAssignment, MinHashLsh, MinHasher, Record, RecordId, Result};
use fuzzrec_storage::{DocumentStore, InsertOutcome, ObjectBroker};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use tracing::{debug, info};

/// Fuzzy field list plus filter assignment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardIdentity {
    pub fields: Vec<String>,
    pub filter: FilterAssignment,
}

impl ShardIdentity {
    pub fn new(fields: &[String], filter: FilterAssignment) -> Self {
        Self {
            fields: fields.to_vec(),
            filter,
        }
    }

    /// Broker name, e.g. `shard_NAME-ADDRESS_by_STATE=CA`.
    pub fn name(&self) -> String {
        format!("shard_{}_by_{}", self.fields.join("-"), self.filter)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ShardData {
    identity: ShardIdentity,
    lsh: LshConfig,
    positions: Vec<RecordId>,
    indexes: BTreeMap<String, MinHashLsh>,
}

#[derive(Debug)]
pub struct ShardIndex {
    data: ShardData,
    hasher: MinHasher,
}

impl ShardIndex {
    /// Index the universe records matching `identity.filter`.
    pub fn build(store: &dyn DocumentStore, universe: &str, identity: ShardIdentity, lsh: &LshConfig) -> Result<Self> {
        let start = Instant::now();
        let hasher = MinHasher::new(lsh.num_perm, lsh.seed);
        let mut indexes = BTreeMap::new();
        for field in &identity.fields {
            indexes.insert(field.clone(), MinHashLsh::new(lsh.threshold, lsh.num_perm)?);
        }

        let mut positions = Vec::new();
        let docs = store.find(universe, identity.filter.as_selector(), Some(identity.fields.as_slice()))?;
        for doc in docs {
            let record = Record::from_document(doc)?;
            let position = positions.len() as u32;
            for (field, lsh) in indexes.iter_mut() {
                match record.get(field) {
                    Some(value) if !value.is_empty() => {
                        lsh.insert(position, &hasher.value_signature(value))?
                    }
                    _ => {}
                }
            }
            positions.push(record.id);
        }

        info!(
            "built {} with {} records in {:?}",
            identity.name(),
            positions.len(),
            start.elapsed()
        );
        Ok(Self {
            data: ShardData {
                identity,
                lsh: lsh.clone(),
                positions,
                indexes,
            },
            hasher,
        })
    }

    /// Download the shard if it was already built, else build and upload it.
    /// Returns the shard and whether this call built it.
    pub fn load_or_build(
        store: &dyn DocumentStore,
        broker: &ObjectBroker,
        config: &MatcherConfig,
        filter: FilterAssignment,
    ) -> Result<(Self, bool)> {
        let identity = ShardIdentity::new(&config.fields, filter);
        let name = identity.name();
        if broker.exists(&name)? {
            let data: ShardData = broker.download(&name)?;
            debug!("loaded {}", name);
            return Ok((Self::from_data(data), false));
        }

        let shard = Self::build(store, &config.collections().universe, identity, &config.lsh)?;
        if broker.upload(&name, &shard.data)? == InsertOutcome::AlreadyPresent {
            debug!("{} was uploaded concurrently", name);
        }
        Ok((shard, true))
    }

    fn from_data(data: ShardData) -> Self {
        let hasher = MinHasher::new(data.lsh.num_perm, data.lsh.seed);
        Self { data, hasher }
    }

    pub fn identity(&self) -> &ShardIdentity {
        &self.data.identity
    }

    pub fn len(&self) -> usize {
        self.data.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.positions.is_empty()
    }

    pub fn record_id(&self, position: u32) -> Option<&RecordId> {
        self.data.positions.get(position as usize)
    }

    /// Candidate positions for one field; empty when the query lacks it.
    pub fn probe(&self, field: &str, query: &Record) -> Result<BTreeSet<u32>> {
        match (self.data.indexes.get(field), query.get(field)) {
            (Some(lsh), Some(value)) if !value.is_empty() => {
                lsh.query(&self.hasher.value_signature(value))
            }
            _ => Ok(BTreeSet::new()),
        }
    }

    /// Union of the per-field candidates.
    pub fn candidates(&self, query: &Record) -> Result<BTreeSet<u32>> {
        let mut union = BTreeSet::new();
        for field in &self.data.identity.fields {
            union.extend(self.probe(field, query)?);
        }
        Ok(union)
    }

    /// Full universe records of the candidates.
    pub fn query(&self, store: &dyn DocumentStore, universe: &str, query: &Record) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        for position in self.candidates(query)? {
            let Some(id) = self.record_id(position) else { continue };
            if let Some(doc) = store.get(universe, id.as_str())? {
                records.push(Record::from_document(doc)?);
            }
        }
        Ok(records)
    }
}
