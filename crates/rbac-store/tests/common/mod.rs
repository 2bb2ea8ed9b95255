#![allow(dead_code)]

use async_trait::async_trait;
use rbac_store::config::DatabaseConfig;
use rbac_store::store::sqlite::SqliteRuleStore;
use rbac_store::{RuleFilter, RuleRecord, RuleStore, StoreError, StoreResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub async fn sqlite_store(dir: &tempfile::TempDir) -> SqliteRuleStore {
    let db = DatabaseConfig {
        url: format!("sqlite://{}", dir.path().join("rules.db").display()),
        max_connections: 4,
        acquire_timeout_ms: 5_000,
    };
    SqliteRuleStore::connect(&db, true).await.expect("sqlite store")
}

pub fn rule(ptype: &str, values: &[&str]) -> RuleRecord {
    RuleRecord::encode(ptype, values).expect("record").0
}

pub async fn sorted(store: &dyn RuleStore) -> Vec<RuleRecord> {
    let mut rows = store.load_all().await.expect("load");
    rows.sort();
    rows
}

/// Delegates to an inner store until `fail_writes` is flipped on.
pub struct FlakyStore {
    inner: Arc<dyn RuleStore>,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn RuleStore>) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl RuleStore for FlakyStore {
    async fn load_all(&self) -> StoreResult<Vec<RuleRecord>> {
        self.inner.load_all().await
    }

    async fn load_filtered(&self, filter: &RuleFilter) -> StoreResult<Vec<RuleRecord>> {
        self.inner.load_filtered(filter).await
    }

    async fn insert(&self, record: &RuleRecord) -> StoreResult<()> {
        self.check()?;
        self.inner.insert(record).await
    }

    async fn insert_many(&self, records: &[RuleRecord]) -> StoreResult<()> {
        self.check()?;
        self.inner.insert_many(records).await
    }

    async fn delete(&self, record: &RuleRecord) -> StoreResult<()> {
        self.check()?;
        self.inner.delete(record).await
    }

    async fn delete_many(&self, records: &[RuleRecord]) -> StoreResult<()> {
        self.check()?;
        self.inner.delete_many(records).await
    }

    async fn delete_filtered(&self, filter: &RuleFilter) -> StoreResult<u64> {
        self.check()?;
        self.inner.delete_filtered(filter).await
    }

    async fn replace_all(&self, records: &[RuleRecord]) -> StoreResult<()> {
        self.check()?;
        self.inner.replace_all(records).await
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.inner.health_check().await
    }

    fn is_durable(&self) -> bool {
        self.inner.is_durable()
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}
