pub mod blob;
pub mod broker;
pub mod ledger;
pub mod lmdb_storage;
pub mod memory;
pub mod spool;
pub mod store;

pub use blob::BlobStore;
pub use broker::ObjectBroker;
pub use ledger::{file_digest, IngestionLedger};
pub use lmdb_storage::{LmdbStore, StoreConfig};
pub use memory::MemoryStore;
pub use spool::ResultSpool;
pub use store::{document_id, DocumentStore, InsertOutcome, DEFAULT_INLINE_LIMIT};
