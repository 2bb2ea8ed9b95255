//! Postgres-backed implementation of the rule store.
//!
//! # What this module is
//! Implements [`RuleStore`] on a single `casbin_rule` table via `sqlx`. It is the
//! durable backend for multi-process deployments that share one database.
//!
//! # Key invariants
//! - The composite primary key over `(ptype, v0..v5)` is the only uniqueness
//!   guard. Inserts use `ON CONFLICT DO NOTHING`, so concurrent identical
//!   inserts both succeed and leave one row.
//! - `replace_all` runs in one transaction. Under the default `READ COMMITTED`
//!   isolation a concurrent `load_all` sees either the old or the new table.
//!
//! # Security notes
//! - Database URLs may contain credentials; avoid logging them.
//! - Dynamic SQL is limited to filter clauses over a fixed column allowlist.
//!
//! # Operational notes
//! - The embedded migration creates the table when `run_migrations` is set.
//! - `acquire_timeout` bounds how long a call waits for a pooled connection; a
//!   statement that hangs after acquiring one is not cancelled here.
use super::sql::{DELETE_RULES, DbRule, Placeholder, SELECT_RULES, bind_record, filter_clause};
use super::{RuleStore, record_write, writable};
use crate::config::DatabaseConfig;
use crate::errors::StoreResult;
use crate::record::{RuleFilter, RuleRecord};
use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::str::FromStr;
use std::time::Duration;

const STYLE: Placeholder = Placeholder::Numbered;

/// Durable rule store backed by Postgres.
///
/// # Example
/// ```rust,no_run
/// use rbac_store::config::DatabaseConfig;
/// use rbac_store::store::postgres::PostgresRuleStore;
///
/// async fn open(db: DatabaseConfig) {
///     let _ = PostgresRuleStore::connect(&db, true).await;
/// }
/// ```
#[derive(Debug, Clone)]
pub struct PostgresRuleStore {
    pool: PgPool,
}

impl PostgresRuleStore {
    /// Connect a pool and optionally apply the embedded migration.
    ///
    /// # Errors
    /// - URL parse, connection, or migration failures.
    pub async fn connect(db: &DatabaseConfig, run_migrations: bool) -> StoreResult<Self> {
        let connect_options = PgConnectOptions::from_str(&db.url)?;
        let pool = PgPoolOptions::new()
            .max_connections(db.max_connections)
            .acquire_timeout(Duration::from_millis(db.acquire_timeout_ms))
            .connect_with(connect_options)
            .await?;
        let store = Self { pool };
        if run_migrations {
            store.migrate().await?;
        }
        Ok(store)
    }

    /// Wrap an existing pool. The schema is assumed to exist.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations/postgres").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RuleStore for PostgresRuleStore {
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
        // Readers keep seeing the previous table until commit.
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
        "postgres"
    }
}
