//! In-memory implementation of the rule store.
//!
//! # Purpose
//! Holds rule records in a `BTreeSet` guarded by `tokio::sync::RwLock`. It exists for:
//! - local development and tests (no external dependencies)
//! - hosts that rebuild their policy from another source at startup
//!
//! # Durability and consistency
//! - **Not durable**: all state is lost on process restart.
//! - A set keyed by the full record gives the same identity rules as the SQL
//!   primary key: inserting an existing record is a no-op.
//! - `replace_all` swaps the set under one write lock, so readers observe the
//!   old or the new contents and never a mix.
use super::{RuleStore, record_write, writable};
use crate::errors::StoreResult;
use crate::record::{RuleFilter, RuleRecord};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default)]
pub struct InMemoryRuleStore {
    rules: Arc<RwLock<BTreeSet<RuleRecord>>>,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rules.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rules.read().await.is_empty()
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn load_all(&self) -> StoreResult<Vec<RuleRecord>> {
        Ok(self.rules.read().await.iter().cloned().collect())
    }

    async fn load_filtered(&self, filter: &RuleFilter) -> StoreResult<Vec<RuleRecord>> {
        let rules = self.rules.read().await;
        Ok(rules
            .iter()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect())
    }

    async fn insert(&self, record: &RuleRecord) -> StoreResult<()> {
        self.insert_many(std::slice::from_ref(record)).await
    }

    async fn insert_many(&self, records: &[RuleRecord]) -> StoreResult<()> {
        let records = writable(records);
        let mut rules = self.rules.write().await;
        for record in &records {
            rules.insert((*record).clone());
        }
        record_write("insert", records.len());
        Ok(())
    }

    async fn delete(&self, record: &RuleRecord) -> StoreResult<()> {
        self.delete_many(std::slice::from_ref(record)).await
    }

    async fn delete_many(&self, records: &[RuleRecord]) -> StoreResult<()> {
        let mut rules = self.rules.write().await;
        for record in records {
            rules.remove(record);
        }
        record_write("delete", records.len());
        Ok(())
    }

    async fn delete_filtered(&self, filter: &RuleFilter) -> StoreResult<u64> {
        let mut rules = self.rules.write().await;
        let before = rules.len();
        rules.retain(|record| !filter.matches(record));
        let removed = (before - rules.len()) as u64;
        record_write("delete", removed as usize);
        Ok(removed)
    }

    async fn replace_all(&self, records: &[RuleRecord]) -> StoreResult<()> {
        let next: BTreeSet<RuleRecord> = writable(records).into_iter().cloned().collect();
        let count = next.len();
        *self.rules.write().await = next;
        record_write("replace", count);
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
