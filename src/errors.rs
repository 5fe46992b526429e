use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("invalid checkout mode: {0:?}")]
    InvalidMode(String),

    #[error("invalid export format: {0:?}")]
    InvalidFormat(String),

    #[error("profile is busy: write lock not acquired within {waited:?}")]
    LockTimeout { waited: Duration },

    #[error("profile data corrupted beyond recovery: {0}")]
    Corrupted(String),

    #[error("filesystem operation failed after all fallbacks: {0}")]
    Exhausted(String),

    #[error("cookie database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
