//! Unified error handling for the runtime.

use crate::config::ConfigError;
use fitsync_engine::RemoteFailure;

/// Runtime error type.
///
/// Remote write failures are not errors: mutation functions report them as
/// a [`fitsync_engine::MutationOutcome`] and passes as a
/// [`fitsync_engine::PassReport`].
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Engine error: {0}")]
    Engine(#[from] fitsync_engine::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A user-initiated remote read failed
    #[error("Remote error: {0}")]
    Remote(RemoteFailure),

    #[error("You must be online to perform this action")]
    Offline,

    #[error("No owner is signed in")]
    OwnerMissing,
}

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, SyncError>;
