//! SQLite-backed implementation of the rule store.
//!
//! # Purpose
//! Durable single-node backend with the same table layout and semantics as the
//! Postgres store. Useful for embedded deployments and for tests that need a
//! real SQL engine without external services.
//!
//! # Key invariants
//! - `ON CONFLICT DO NOTHING` only covers the composite primary key; any other
//!   constraint failure is surfaced as [`crate::StoreError::Database`].
//! - The database runs in WAL mode so readers are never blocked by a
//!   `replace_all` transaction and see the last committed table.
//! - `busy_timeout` makes competing writers wait instead of failing with
//!   `SQLITE_BUSY`.
use super::sql::{DELETE_RULES, DbRule, Placeholder, SELECT_RULES, bind_record, filter_clause};
use super::{RuleStore, record_write, writable};
use crate::config::DatabaseConfig;
use crate::errors::StoreResult;
use crate::record::{RuleFilter, RuleRecord};
use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

const STYLE: Placeholder = Placeholder::Question;

#[derive(Debug, Clone)]
pub struct SqliteRuleStore {
    pool: SqlitePool,
}

impl SqliteRuleStore {
    /// Open (creating if missing) the database at `db.url` and optionally
    /// apply the embedded migration.
    ///
    /// # Example
    /// ```rust,no_run
    /// use rbac_store::config::DatabaseConfig;
    /// use rbac_store::store::sqlite::SqliteRuleStore;
    ///
    /// async fn open() {
    ///     let db = DatabaseConfig {
    ///         url: "sqlite://rules.db".to_string(),
    ///         max_connections: 4,
    ///         acquire_timeout_ms: 5_000,
    ///     };
    ///     let _ = SqliteRuleStore::connect(&db, true).await;
    /// }
    /// ```
    pub async fn connect(db: &DatabaseConfig, run_migrations: bool) -> StoreResult<Self> {
        let timeout = Duration::from_millis(db.acquire_timeout_ms);
        let connect_options = SqliteConnectOptions::from_str(&db.url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(timeout);
        let pool = SqlitePoolOptions::new()
            .max_connections(db.max_connections)
            .acquire_timeout(timeout)
            .connect_with(connect_options)
            .await?;
        let store = Self { pool };
        if run_migrations {
            store.migrate().await?;
        }
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations/sqlite").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl RuleStore for SqliteRuleStore {
    async fn load_all(&self) -> StoreResult<Vec<RuleRecord>> {
        let rows = sqlx::query_as::<_, DbRule>(SELECT_RULES)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(RuleRecord::from).collect())
    }

    async fn load_filtered(&self, filter: &RuleFilter) -> StoreResult<Vec<RuleRecord>> {
        let Some((clause, binds)) = filter_clause(filter, STYLE) else {
            return Ok(Vec::new());
        };
        let sql = format!("{SELECT_RULES} {clause}");
        let mut query = sqlx::query_as::<_, DbRule>(&sql);
        for value in &binds {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(RuleRecord::from).collect())
    }

    async fn insert(&self, record: &RuleRecord) -> StoreResult<()> {
        if record.is_degenerate() {
            tracing::warn!(ptype = %record.ptype, "skipping empty rule");
            return Ok(());
        }
        let sql = STYLE.insert_rule();
        bind_record(sqlx::query(&sql), record).execute(&self.pool).await?;
        record_write("insert", 1);
        Ok(())
    }

    async fn insert_many(&self, records: &[RuleRecord]) -> StoreResult<()> {
        let records = writable(records);
        if records.is_empty() {
            return Ok(());
        }
        let sql = STYLE.insert_rule();
        let mut tx = self.pool.begin().await?;
        for record in &records {
            bind_record(sqlx::query(&sql), record).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        record_write("insert", records.len());
        Ok(())
    }

    async fn delete(&self, record: &RuleRecord) -> StoreResult<()> {
        let sql = STYLE.delete_rule();
        bind_record(sqlx::query(&sql), record).execute(&self.pool).await?;
        record_write("delete", 1);
        Ok(())
    }

    async fn delete_many(&self, records: &[RuleRecord]) -> StoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let sql = STYLE.delete_rule();
        let mut tx = self.pool.begin().await?;
        for record in records {
            bind_record(sqlx::query(&sql), record).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        record_write("delete", records.len());
        Ok(())
    }

    async fn delete_filtered(&self, filter: &RuleFilter) -> StoreResult<u64> {
        let Some((clause, binds)) = filter_clause(filter, STYLE) else {
            return Ok(0);
        };
        let sql = format!("{DELETE_RULES} {clause}");
        let mut query = sqlx::query(&sql);
        for value in &binds {
            query = query.bind(value);
        }
        let removed = query.execute(&self.pool).await?.rows_affected();
        record_write("delete", removed as usize);
        Ok(removed)
    }

    async fn replace_all(&self, records: &[RuleRecord]) -> StoreResult<()> {
        let records = writable(records);
        let sql = STYLE.insert_rule();
        let mut tx = self.pool.begin().await?;
        sqlx::query(DELETE_RULES).execute(&mut *tx).await?;
        for record in &records {
            bind_record(sqlx::query(&sql), record).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        record_write("replace", records.len());
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
