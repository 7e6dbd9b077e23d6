//! # fuzzrec Similarity
//!
//! Weighted bag-of-words similarity between records.
//!
//! - **Field weights**: per-field weights, unweighted fields default to 1, normalized at score time
//! - **Fuzzy token substitution**: a token missing from one side borrows the stats of the
//!   closest token by normalized edit distance, scaled by that similarity
//! - **Ranking**: candidates above a threshold, yielded best first with a deterministic tie-break
//!
//! ## Example
//!
//! ```rust
//! use fuzzrec_core::{Record, StatsModel};
//! use fuzzrec_similarity::{FieldWeights, Scorer};
//! use std::sync::Arc;
//!
//! let mut universe = vec![
//!     Record::from_raw([("name", "Acme Widgets")]),
//!     Record::from_raw([("name", "Zephyr Logistics")]),
//! ];
//! let stats = Arc::new(StatsModel::build(&mut universe));
//! let scorer = Scorer::new(FieldWeights::uniform(&["NAME"]).unwrap(), stats);
//!
//! let query = Record::from_raw([("name", "acme widget")]);
//! let mut ranking = scorer.rank(&query, universe.clone(), 0.0);
//! let best = ranking.next().unwrap();
//! assert_eq!(best.record.id, universe[0].id);
//! ```

pub mod distance;
pub mod rank;
pub mod schema;
pub mod scorer;

pub use distance::{cosine_similarity, string_similarity};
pub use rank::{Ranking, Scored};
pub use schema::{FieldWeights, DEFAULT_FIELD_WEIGHT};
pub use scorer::Scorer;
