use thiserror::Error;

/// Errors surfaced by tenant and key operations.
///
/// The HTTP layer maps these onto status codes: `TenantExists` -> 409,
/// `TenantNotFound` / `KeyNotFound` / `SnapshotMissing` -> 404, the rest -> 500.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("tenant already exists")]
    TenantExists,

    #[error("tenant not found")]
    TenantNotFound,

    #[error("key not found")]
    KeyNotFound,

    #[error("snapshot not found")]
    SnapshotMissing,

    #[error("snapshot io: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}
