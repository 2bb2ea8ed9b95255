use crate::sync::SyncState;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("rule type is empty")]
    MissingType,
    #[error("rule of type {ptype} has {len} values, at most 6 are supported")]
    TooManyValues { ptype: String, len: usize },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("invalid rule: {0}")]
    Codec(#[from] CodecError),
    #[error("missing configuration: {0}")]
    MissingConfig(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("read role mappings: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse role mappings: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("role mappings unavailable: {0}")]
    Unavailable(String),
}

/// A synchronization pass stopped before reaching `Done`.
///
/// Storage is left in whatever state the pass reached; nothing is rolled back.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("clearing groupings for {principal} failed: {source}")]
    Clear {
        principal: String,
        #[source]
        source: casbin::Error,
    },
    #[error("applying groupings for {principal} failed after {state:?}: {source}")]
    Apply {
        principal: String,
        state: SyncState,
        #[source]
        source: casbin::Error,
    },
    #[error("role lookup for group {group} failed after {state:?}: {source}")]
    Mapping {
        group: String,
        state: SyncState,
        #[source]
        source: MappingError,
    },
    #[error("reading stored groupings failed: {0}")]
    Store(#[from] StoreError),
}

impl SyncError {
    /// Last state the pass reached before failing.
    pub fn reached(&self) -> SyncState {
        match self {
            SyncError::Clear { .. } | SyncError::Store(_) => SyncState::Start,
            SyncError::Apply { state, .. } | SyncError::Mapping { state, .. } => *state,
        }
    }
}
