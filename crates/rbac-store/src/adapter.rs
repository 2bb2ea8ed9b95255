//! casbin adapter backed by a [`RuleStore`].
//!
//! # Purpose and responsibility
//! Feeds stored rules into the casbin model at startup and persists every
//! model mutation casbin makes while auto-save is enabled.
//!
//! # Write-through contract
//! casbin awaits the matching adapter call for every `add_*`/`remove_*` before
//! returning to its caller, so each logical mutation is one storage round trip.
//! A storage failure is returned to that caller as
//! [`casbin::error::AdapterError`]; the in-memory model is not rolled back by
//! this adapter.
//!
//! # Key invariants
//! - Rules reach the model as value vectors decoded straight from columns;
//!   nothing is ever joined into or parsed from delimited text.
//! - Mutations report `Ok(true)` on success, including idempotent no-ops, so
//!   casbin keeps its model in step with the store.
//! - Empty rules are skipped in both directions.
use crate::errors::{CodecError, StoreError};
use crate::record::{RuleFilter, RuleRecord, TypeMatch};
use crate::store::RuleStore;
use async_trait::async_trait;
use casbin::error::AdapterError;
use casbin::{Adapter, Filter, Model, Result};
use std::sync::Arc;

/// Sections casbin stores policy lines under.
const SECTIONS: [&str; 2] = ["p", "g"];

#[derive(Clone)]
pub struct RuleAdapter {
    store: Arc<dyn RuleStore>,
    is_filtered: bool,
}

impl RuleAdapter {
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self {
            store,
            is_filtered: false,
        }
    }

    pub fn store(&self) -> &Arc<dyn RuleStore> {
        &self.store
    }
}

impl std::fmt::Debug for RuleAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleAdapter")
            .field("backend", &self.store.backend_name())
            .field("is_filtered", &self.is_filtered)
            .finish()
    }
}

fn adapter_error(err: StoreError) -> casbin::Error {
    tracing::error!(error = %err, "rule store operation failed");
    AdapterError(Box::new(err)).into()
}

fn codec_error(err: CodecError) -> casbin::Error {
    adapter_error(StoreError::Codec(err))
}

fn encode(ptype: &str, rule: &[String]) -> Result<RuleRecord> {
    RuleRecord::encode(ptype, rule)
        .map(|(record, _)| record)
        .map_err(codec_error)
}

fn encode_all(ptype: &str, rules: &[Vec<String>]) -> Result<Vec<RuleRecord>> {
    rules.iter().map(|rule| encode(ptype, rule)).collect()
}

/// Push decoded records into the model. Returns how many were accepted.
fn load_into(m: &mut dyn Model, records: Vec<RuleRecord>) -> usize {
    let mut loaded = 0;
    for record in records {
        let Some(sec) = record.section() else {
            tracing::debug!(ptype = %record.ptype, "ignoring rule outside p/g sections");
            continue;
        };
        let Some(values) = record.to_values() else {
            tracing::warn!(ptype = %record.ptype, "skipping empty stored rule");
            continue;
        };
        if m.add_policy(sec, &record.ptype, values) {
            loaded += 1;
        }
    }
    loaded
}

/// Every rule currently held by the model, encoded as records.
fn model_records(m: &dyn Model) -> Result<Vec<RuleRecord>> {
    let mut records = Vec::new();
    for sec in SECTIONS {
        let Some(assertions) = m.get_model().get(sec) else {
            continue;
        };
        for ptype in assertions.keys() {
            for rule in m.get_policy(sec, ptype) {
                let record = encode(ptype, &rule)?;
                if !record.is_degenerate() {
                    records.push(record);
                }
            }
        }
    }
    Ok(records)
}

#[async_trait]
impl Adapter for RuleAdapter {
    async fn load_policy(&mut self, m: &mut dyn Model) -> Result<()> {
        let records = self.store.load_all().await.map_err(adapter_error)?;
        let total = records.len();
        let loaded = load_into(m, records);
        metrics::gauge!("rbac_store_rules_loaded").set(loaded as f64);
        tracing::info!(
            backend = self.store.backend_name(),
            total,
            loaded,
            "loaded rules into model"
        );
        self.is_filtered = false;
        Ok(())
    }

    async fn load_filtered_policy<'a>(&mut self, m: &mut dyn Model, f: Filter<'a>) -> Result<()> {
        let mut records = Vec::new();
        for (sec, values) in [("p", &f.p), ("g", &f.g)] {
            let filter = RuleFilter::new(
                TypeMatch::Section(sec.to_string()),
                0,
                values.iter().map(|value| value.to_string()).collect(),
            );
            records.extend(
                self.store
                    .load_filtered(&filter)
                    .await
                    .map_err(adapter_error)?,
            );
        }
        let loaded = load_into(m, records);
        tracing::info!(loaded, "loaded filtered rules into model");
        self.is_filtered = true;
        Ok(())
    }

    async fn save_policy(&mut self, m: &mut dyn Model) -> Result<()> {
        if self.is_filtered {
            return Err(adapter_error(StoreError::Unexpected(anyhow::anyhow!(
                "cannot save a filtered policy over the full rule table"
            ))));
        }
        let records = model_records(m)?;
        self.store
            .replace_all(&records)
            .await
            .map_err(adapter_error)?;
        tracing::info!(rules = records.len(), "replaced stored rules from model");
        Ok(())
    }

    async fn clear_policy(&mut self) -> Result<()> {
        self.store.replace_all(&[]).await.map_err(adapter_error)?;
        self.is_filtered = false;
        Ok(())
    }

    fn is_filtered(&self) -> bool {
        self.is_filtered
    }

    async fn add_policy(&mut self, _sec: &str, ptype: &str, rule: Vec<String>) -> Result<bool> {
        let record = encode(ptype, &rule)?;
        tracing::debug!(ptype, "persisting rule");
        self.store.insert(&record).await.map_err(adapter_error)?;
        Ok(true)
    }

    async fn add_policies(
        &mut self,
        _sec: &str,
        ptype: &str,
        rules: Vec<Vec<String>>,
    ) -> Result<bool> {
        let records = encode_all(ptype, &rules)?;
        tracing::debug!(ptype, rules = records.len(), "persisting rules");
        self.store
            .insert_many(&records)
            .await
            .map_err(adapter_error)?;
        Ok(true)
    }

    async fn remove_policy(&mut self, _sec: &str, ptype: &str, rule: Vec<String>) -> Result<bool> {
        let record = encode(ptype, &rule)?;
        tracing::debug!(ptype, "removing rule");
        self.store.delete(&record).await.map_err(adapter_error)?;
        Ok(true)
    }

    async fn remove_policies(
        &mut self,
        _sec: &str,
        ptype: &str,
        rules: Vec<Vec<String>>,
    ) -> Result<bool> {
        let records = encode_all(ptype, &rules)?;
        tracing::debug!(ptype, rules = records.len(), "removing rules");
        self.store
            .delete_many(&records)
            .await
            .map_err(adapter_error)?;
        Ok(true)
    }

    async fn remove_filtered_policy(
        &mut self,
        _sec: &str,
        ptype: &str,
        field_index: usize,
        field_values: Vec<String>,
    ) -> Result<bool> {
        let filter = RuleFilter::new(TypeMatch::Exact(ptype.to_string()), field_index, field_values);
        let removed = self
            .store
            .delete_filtered(&filter)
            .await
            .map_err(adapter_error)?;
        tracing::debug!(ptype, field_index, removed, "removed filtered rules");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{build_enforcer, rbac_model};
    use crate::store::memory::InMemoryRuleStore;
    use casbin::{CoreApi, MgmtApi};

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn record(ptype: &str, values: &[&str]) -> RuleRecord {
        RuleRecord::encode(ptype, values).expect("record").0
    }

    #[tokio::test]
    async fn load_skips_empty_and_truncates_trailing_slots() {
        let store = Arc::new(InMemoryRuleStore::new());
        store
            .insert_many(&[
                record("p", &["role:reader", "doc/*", "read", "allow", "", ""]),
                record("g", &["alice", "role:reader"]),
            ])
            .await
            .expect("seed");

        let enforcer = build_enforcer(store).await.expect("enforcer");
        assert_eq!(
            enforcer.get_policy(),
            vec![strings(&["role:reader", "doc/*", "read", "allow"])]
        );
        assert_eq!(
            enforcer.get_grouping_policy(),
            vec![strings(&["alice", "role:reader"])]
        );
        assert!(enforcer.enforce(("alice", "doc/1", "read")).expect("enforce"));
    }

    #[tokio::test]
    async fn auto_save_writes_through() {
        let store = Arc::new(InMemoryRuleStore::new());
        let mut enforcer = build_enforcer(store.clone()).await.expect("enforcer");

        enforcer
            .add_policy(strings(&["role:writer", "doc/*", "write", "allow"]))
            .await
            .expect("add");
        enforcer
            .add_grouping_policy(strings(&["bob", "role:writer"]))
            .await
            .expect("add grouping");
        assert_eq!(store.len().await, 2);

        enforcer
            .remove_grouping_policy(strings(&["bob", "role:writer"]))
            .await
            .expect("remove grouping");
        assert_eq!(
            store.load_all().await.expect("load"),
            vec![record("p", &["role:writer", "doc/*", "write", "allow"])]
        );
    }

    #[tokio::test]
    async fn add_existing_rule_is_not_an_error() {
        let store = Arc::new(InMemoryRuleStore::new());
        let mut adapter = RuleAdapter::new(store.clone());
        let rule = strings(&["alice", "doc", "read", "allow"]);
        assert!(adapter.add_policy("p", "p", rule.clone()).await.expect("first"));
        assert!(adapter.add_policy("p", "p", rule).await.expect("second"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn remove_missing_rule_is_not_an_error() {
        let store = Arc::new(InMemoryRuleStore::new());
        let mut adapter = RuleAdapter::new(store);
        assert!(
            adapter
                .remove_policy("p", "p", strings(&["ghost", "doc", "read"]))
                .await
                .expect("remove")
        );
    }

    #[tokio::test]
    async fn oversized_rule_is_rejected() {
        let store = Arc::new(InMemoryRuleStore::new());
        let mut adapter = RuleAdapter::new(store.clone());
        let err = adapter
            .add_policy("p", "p", strings(&["1", "2", "3", "4", "5", "6", "7"]))
            .await
            .unwrap_err();
        let casbin::Error::AdapterError(AdapterError(inner)) = &err else {
            panic!("expected adapter error, got {err:?}");
        };
        assert!(matches!(
            inner.downcast_ref::<StoreError>(),
            Some(StoreError::Codec(CodecError::TooManyValues { len: 7, .. }))
        ));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn remove_filtered_policy_deletes_matching_rows() {
        let store = Arc::new(InMemoryRuleStore::new());
        let mut enforcer = build_enforcer(store.clone()).await.expect("enforcer");
        for rule in [["alice", "g1"], ["alice", "g2"], ["bob", "g1"]] {
            enforcer
                .add_grouping_policy(strings(&rule))
                .await
                .expect("add");
        }
        enforcer
            .remove_filtered_grouping_policy(0, strings(&["alice"]))
            .await
            .expect("remove");
        assert_eq!(
            store.load_all().await.expect("load"),
            vec![record("g", &["bob", "g1"])]
        );
    }

    #[tokio::test]
    async fn save_policy_replaces_table() {
        let store = Arc::new(InMemoryRuleStore::new());
        store
            .insert(&record("p", &["stale", "doc", "read", "allow"]))
            .await
            .expect("seed");
        let mut enforcer = build_enforcer(store.clone()).await.expect("enforcer");
        enforcer.enable_auto_save(false);
        enforcer
            .remove_policy(strings(&["stale", "doc", "read", "allow"]))
            .await
            .expect("remove");
        enforcer
            .add_policy(strings(&["fresh", "doc", "read", "allow"]))
            .await
            .expect("add");
        assert_eq!(store.len().await, 1);
        assert_eq!(
            store.load_all().await.expect("load"),
            vec![record("p", &["stale", "doc", "read", "allow"])]
        );

        enforcer.save_policy().await.expect("save");
        assert_eq!(
            store.load_all().await.expect("load"),
            vec![record("p", &["fresh", "doc", "read", "allow"])]
        );
    }

    #[tokio::test]
    async fn filtered_adapter_refuses_full_save() {
        let store = Arc::new(InMemoryRuleStore::new());
        store
            .insert_many(&[
                record("p", &["alice", "doc", "read", "allow"]),
                record("p", &["bob", "doc", "read", "allow"]),
            ])
            .await
            .expect("seed");
        let mut adapter = RuleAdapter::new(store.clone());
        let mut model = rbac_model().await.expect("model");
        adapter
            .load_filtered_policy(
                &mut model,
                Filter {
                    p: vec!["alice"],
                    g: vec![],
                },
            )
            .await
            .expect("filtered load");
        assert!(adapter.is_filtered());
        assert_eq!(model.get_policy("p", "p").len(), 1);
        assert!(adapter.save_policy(&mut model).await.is_err());
        assert_eq!(store.len().await, 2);
    }
}
