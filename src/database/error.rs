use thiserror::Error;

/// Failures surfaced by any of the persistence-backed stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database pool unavailable: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
    #[error("database query failed: {0}")]
    Query(#[from] diesel::result::Error),
    #[error("unable to (de)serialize stored document: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("stored row is corrupt: {0}")]
    Corrupt(String),
    #[error("password hashing failed: {0}")]
    PasswordHash(String),
}
