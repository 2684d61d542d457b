use thiserror::Error;

/// All the ways things can go wrong on the listings board
///
/// None of these are fatal. Callers degrade: no location means an unfiltered
/// feed, no directory means the last snapshot, no storage means empty registries.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Location error: {0}")]
    Location(#[from] LocationError),

    #[error("Feed refresh failed: {0}")]
    FeedFetch(#[from] FeedFetchError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Item {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Why a position could not be acquired. Always recoverable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("location unavailable: {0}")]
    Unavailable(String),

    #[error("location request timed out")]
    Timeout,

    #[error("no location sensor on this device")]
    Unsupported,
}

/// A refresh of the item directory failed; the previous snapshot stays
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedFetchError {
    #[error("directory request failed: {0}")]
    Request(String),

    #[error("directory request timed out")]
    Timeout,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("failed to read {key}: {reason}")]
    Read { key: String, reason: String },

    #[error("failed to write {key}: {reason}")]
    Write { key: String, reason: String },
}
