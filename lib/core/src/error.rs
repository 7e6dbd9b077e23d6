use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Unsatisfiable shard domain, unresolvable field weights, bad settings.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Zero candidates scored above the threshold; callers treat the query as unmatched.
    #[error("No candidate above threshold for record {0}")]
    NoCandidate(String),

    #[error("Worker task {task} exited with status {code}")]
    WorkerFailure { task: String, code: i32 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Per-record outcomes that a batch records as "unmatched" instead of aborting.
    pub fn is_unmatched(&self) -> bool {
        matches!(self, Error::NoCandidate(_) | Error::NotFound(_) | Error::InvalidInput(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
