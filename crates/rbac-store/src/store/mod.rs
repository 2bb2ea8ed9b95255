//! Rule storage backends.
//!
//! # Purpose
//! Defines the [`RuleStore`] contract used by the casbin adapter and the
//! grouping synchronizer, plus the factory that builds the configured backend.
//!
//! # Key invariants
//! - The whole `(ptype, v0..v5)` tuple is the primary key.
//! - `insert` is idempotent: an identical existing row is a successful no-op.
//! - `delete` of a missing row is a successful no-op.
//! - `replace_all` is atomic for concurrent readers.
//! - Degenerate (all-empty) records are never written.
//!
//! # Concurrency model
//! Every method takes `&self` and may be called concurrently from many request
//! handlers. The database enforces row-level uniqueness; no application lock
//! is held across calls.
use crate::config::{AdapterConfig, StorageBackend};
use crate::errors::{StoreError, StoreResult};
use crate::record::{RuleFilter, RuleRecord};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

pub mod memory;
pub mod postgres;
pub mod sqlite;
mod sql;

#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Every stored record, in no particular order. An empty table yields an empty vec.
    async fn load_all(&self) -> StoreResult<Vec<RuleRecord>>;
    async fn load_filtered(&self, filter: &RuleFilter) -> StoreResult<Vec<RuleRecord>>;

    async fn insert(&self, record: &RuleRecord) -> StoreResult<()>;
    /// Insert several records in one transaction.
    async fn insert_many(&self, records: &[RuleRecord]) -> StoreResult<()>;

    async fn delete(&self, record: &RuleRecord) -> StoreResult<()>;
    /// Delete several records in one transaction.
    async fn delete_many(&self, records: &[RuleRecord]) -> StoreResult<()>;
    /// Delete every record matching `filter`, returning the number of rows removed.
    async fn delete_filtered(&self, filter: &RuleFilter) -> StoreResult<u64>;

    /// Atomically replace the table contents with `records`.
    async fn replace_all(&self, records: &[RuleRecord]) -> StoreResult<()>;

    async fn health_check(&self) -> StoreResult<()>;
    fn is_durable(&self) -> bool;
    fn backend_name(&self) -> &'static str;
}

/// Build the backend selected by `config`.
///
/// # Errors
/// - [`StoreError::MissingConfig`] when a database backend has no URL.
/// - Connection or migration failures from the backend.
pub async fn open_store(config: &AdapterConfig) -> StoreResult<Arc<dyn RuleStore>> {
    let store: Arc<dyn RuleStore> = match config.storage {
        StorageBackend::Memory => Arc::new(memory::InMemoryRuleStore::new()),
        StorageBackend::Postgres => {
            let db = config
                .database
                .as_ref()
                .ok_or_else(|| StoreError::MissingConfig("postgres database url".into()))?;
            Arc::new(postgres::PostgresRuleStore::connect(db, config.run_migrations).await?)
        }
        StorageBackend::Sqlite => {
            let db = config
                .database
                .as_ref()
                .ok_or_else(|| StoreError::MissingConfig("sqlite database url".into()))?;
            Arc::new(sqlite::SqliteRuleStore::connect(db, config.run_migrations).await?)
        }
    };
    tracing::info!(backend = store.backend_name(), "rule store ready");
    Ok(store)
}

/// Distinct, non-degenerate records in a stable order.
///
/// Bulk writes go through this so a batch never trips over its own duplicates
/// and never persists an empty rule.
pub(crate) fn writable(records: &[RuleRecord]) -> Vec<&RuleRecord> {
    let mut seen = BTreeSet::new();
    records
        .iter()
        .filter(|record| {
            if record.is_degenerate() {
                tracing::warn!(ptype = %record.ptype, "skipping empty rule");
                return false;
            }
            seen.insert(*record)
        })
        .collect()
}

pub(crate) fn record_write(op: &'static str, rows: usize) {
    metrics::counter!("rbac_store_writes_total", "op" => op).increment(rows as u64);
}
