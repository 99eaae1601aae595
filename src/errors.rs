use thiserror::Error;

use crate::platform::PlatformError;

/// Errors that can arise while reconciling the world, moving members, or touching the store.
#[derive(Debug, Error)]
pub enum MuddError {
    /// Startup cannot proceed (no default room, no guild). Fatal.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A room, channel or record that was asked for does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The chat platform rejected or failed a call.
    #[error("external service error: {0}")]
    ExternalService(#[from] PlatformError),

    /// The world definition (or a store mutation) would break a reference.
    #[error("validation error: {0}")]
    Validation(String),

    /// A world file could not be parsed.
    #[error("{file}:{line}: {message}")]
    WorldParse {
        file: String,
        line: usize,
        message: String,
    },

    /// Wrapper around sled's error type.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around bincode serialization and deserialization errors.
    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Wrapper around IO errors (world directory, snapshots).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// UTF-8 encoding error in a stored value.
    #[error("utf-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Returned when deserializing a record with an unexpected schema version.
    #[error("schema mismatch for {entity}: expected {expected}, got {found}")]
    SchemaMismatch {
        entity: &'static str,
        expected: u8,
        found: u8,
    },
}

impl MuddError {
    /// True for the failures that must abort startup rather than be retried next tick.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MuddError::Configuration(_) | MuddError::Validation(_) | MuddError::WorldParse { .. }
        )
    }
}
