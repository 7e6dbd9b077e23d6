//! # fuzzrec Core
//!
//! Core library for the fuzzrec record matcher.
//!
//! This crate provides the fundamental data structures and algorithms:
//!
//! - [`Record`] - An ordered field/value mapping with a content-derived identifier
//! - [`StatsModel`] - Per-field token and shingle counts over the reference universe
//! - [`MinHasher`] - Fixed-size MinHash signatures over shingle sets
//! - [`MinHashLsh`] - Banded LSH buckets for candidate retrieval
//! - [`FilterAssignment`] - Exact-field values selecting a shard of the universe
//!
//! ## Example
//!
//! ```rust
//! use fuzzrec_core::{MinHashLsh, MinHasher, Record, StatsModel};
//!
//! let mut universe = vec![
//!     Record::from_raw([("name", "Acme Inc"), ("state", "CA")]),
//!     Record::from_raw([("name", "Acme Incorporated"), ("state", "CA")]),
//! ];
//! let stats = StatsModel::build(&mut universe);
//! assert_eq!(stats.tokens.count("NAME", "ACME"), Some(2));
//!
//! let hasher = MinHasher::new(128, 1);
//! let mut lsh = MinHashLsh::new(0.6, 128).unwrap();
//! for (position, record) in universe.iter().enumerate() {
//!     let sig = hasher.value_signature(record.get("NAME").unwrap());
//!     lsh.insert(position as u32, &sig).unwrap();
//! }
//! let hits = lsh.query(&hasher.value_signature("ACME INC")).unwrap();
//! assert!(hits.contains(&0));
//! ```

pub mod background;
pub mod canonical;
pub mod error;
pub mod filter;
pub mod lsh;
pub mod minhash;
pub mod record;
pub mod stats;

pub use background::{get_background_system, BackgroundJob, BackgroundJobSystem, BackgroundJobType};
pub use canonical::{canonicalize, content_hash, name_hash, shingles, split_line, tokens};
pub use error::{Error, Result};
pub use filter::{selector_matches, FilterAssignment, Selector};
pub use lsh::{Banding, MinHashLsh};
pub use minhash::{MinHasher, Signature};
pub use record::{Record, RecordId, ID_KEY, MATCH_RATE, META_KEY};
pub use stats::{CountTable, FieldMetadata, Metadata, ShingleStats, StatsModel, TokenEntry, TokenStats};
