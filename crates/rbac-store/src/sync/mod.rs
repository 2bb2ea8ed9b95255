//! Claims-driven grouping synchronization.
//!
//! # Purpose and responsibility
//! On every authenticated request, reconciles the stored groupings of one
//! principal with the groups in that request's identity claims.
//!
//! # Pass structure
//! A pass moves `Start -> Cleared -> Applied -> Done`:
//! 1. **Clear** removes every grouping row whose first value is the principal,
//!    one delete per row. Rows the model holds go through the enforcer (and
//!    therefore the write-through adapter); rows only in storage are deleted
//!    from the store directly. Group -> role links derived from the mapping
//!    repository are removed too once their group has no member left and is
//!    not claimed again by this request.
//! 2. **Apply** inserts principal -> group for each claimed group and the
//!    mapped group -> role links that are not already present.
//!
//! There is no diff against the previous state; clear-then-reapply costs more
//! writes per request and keeps no per-session state.
//!
//! # Failure semantics
//! Any failure stops the pass with a [`SyncError`]. Nothing is retried or
//! compensated; storage keeps whatever the pass had reached. [`GroupingSynchronizer::authorize`]
//! denies the request in that case.
//!
//! # Concurrency
//! The enforcer write lock is held for one mutation at a time, never for a
//! whole pass, so overlapping passes for the same principal interleave at row
//! granularity unless `serialize_per_principal` is enabled.
pub mod claims;
pub mod mapping;

use crate::config::SyncConfig;
use crate::errors::{StoreError, SyncError};
use crate::model::SharedEnforcer;
use crate::record::{RuleFilter, RuleRecord, TypeMatch};
use crate::store::RuleStore;
use casbin::{CoreApi, MgmtApi};
use claims::IdentityClaims;
use dashmap::DashMap;
use mapping::RoleMappingRepository;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Grouping section of the casbin model.
const GROUPING_SECTION: &str = "g";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    Start,
    Cleared,
    Applied,
    Done,
    Failed,
}

impl SyncState {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncState::Start => "start",
            SyncState::Cleared => "cleared",
            SyncState::Applied => "applied",
            SyncState::Done => "done",
            SyncState::Failed => "failed",
        }
    }
}

/// What a completed pass changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub principal_id: String,
    pub state: SyncState,
    /// Principal-scoped grouping rows removed during Clear.
    pub cleared: usize,
    /// Derived group -> role links removed because their group emptied.
    pub pruned_role_links: usize,
    /// Principal -> group rows written during Apply.
    pub memberships: usize,
    /// Group -> role rows written during Apply.
    pub role_links_added: usize,
}

pub struct GroupingSynchronizer {
    enforcer: SharedEnforcer,
    store: Arc<dyn RuleStore>,
    mappings: Arc<dyn RoleMappingRepository>,
    config: SyncConfig,
    principal_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl GroupingSynchronizer {
    pub fn new(
        enforcer: SharedEnforcer,
        store: Arc<dyn RuleStore>,
        mappings: Arc<dyn RoleMappingRepository>,
        config: SyncConfig,
    ) -> Self {
        Self {
            enforcer,
            store,
            mappings,
            config,
            principal_locks: DashMap::new(),
        }
    }

    pub fn enforcer(&self) -> &SharedEnforcer {
        &self.enforcer
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run one Clear/Apply pass for the principal in `claims`.
    ///
    /// # Errors
    /// - [`SyncError::Store`] if the stored groupings cannot be enumerated.
    /// - [`SyncError::Clear`] / [`SyncError::Apply`] when a write-through fails.
    /// - [`SyncError::Mapping`] when the role repository lookup fails.
    pub async fn synchronize(&self, claims: &IdentityClaims) -> Result<SyncReport, SyncError> {
        let principal = claims.principal_id.as_str();
        let result = if self.config.serialize_per_principal {
            let lock = self
                .principal_locks
                .entry(principal.to_string())
                .or_default()
                .clone();
            let guard = lock.lock().await;
            let result = self.run_pass(claims).await;
            drop(guard);
            drop(lock);
            self.principal_locks
                .remove_if(principal, |_, lock| Arc::strong_count(lock) == 1);
            result
        } else {
            self.run_pass(claims).await
        };

        match &result {
            Ok(report) => {
                metrics::counter!("rbac_sync_passes_total", "outcome" => report.state.as_str())
                    .increment(1);
                tracing::info!(
                    principal,
                    cleared = report.cleared,
                    pruned = report.pruned_role_links,
                    memberships = report.memberships,
                    role_links = report.role_links_added,
                    "grouping sync complete"
                );
            }
            Err(err) => {
                metrics::counter!(
                    "rbac_sync_passes_total",
                    "outcome" => SyncState::Failed.as_str(),
                    "reached" => err.reached().as_str()
                )
                .increment(1);
                tracing::error!(
                    principal,
                    state = SyncState::Failed.as_str(),
                    reached = err.reached().as_str(),
                    error = %err,
                    "grouping sync failed"
                );
            }
        }
        result
    }

    /// Synchronize, then evaluate `(principal, object, action)`.
    ///
    /// A failed pass or an enforcement error denies: groupings that may be
    /// half-written cannot stand for the principal's entitlements.
    pub async fn authorize(&self, claims: &IdentityClaims, object: &str, action: &str) -> bool {
        if self.synchronize(claims).await.is_err() {
            tracing::warn!(principal = %claims.principal_id, "denying after failed grouping sync");
            return false;
        }
        let principal = claims.principal_id.as_str();
        let enforcer = self.enforcer.read().await;
        let decision = match self.config.domain.as_deref() {
            Some(domain) => enforcer.enforce((principal, domain, object, action)),
            None => enforcer.enforce((principal, object, action)),
        };
        decision.unwrap_or_else(|err| {
            tracing::warn!(principal, error = %err, "enforce failed; denying");
            false
        })
    }

    async fn run_pass(&self, claims: &IdentityClaims) -> Result<SyncReport, SyncError> {
        let principal = claims.principal_id.as_str();
        let claimed: Vec<&str> = claims.distinct_groups();
        let mut report = SyncReport {
            principal_id: principal.to_string(),
            state: SyncState::Start,
            cleared: 0,
            pruned_role_links: 0,
            memberships: 0,
            role_links_added: 0,
        };

        self.clear(principal, &claimed, &mut report).await?;
        report.state = SyncState::Cleared;
        tracing::debug!(principal, cleared = report.cleared, "groupings cleared");

        self.apply(principal, &claimed, &mut report).await?;
        report.state = SyncState::Applied;
        tracing::debug!(principal, memberships = report.memberships, "groupings applied");

        report.state = SyncState::Done;
        Ok(report)
    }

    /// Row values for a grouping between `member` and `target`.
    fn grouping(&self, member: &str, target: &str) -> Vec<String> {
        let mut rule = vec![member.to_string(), target.to_string()];
        if let Some(domain) = &self.config.domain {
            rule.push(domain.clone());
        }
        rule
    }

    /// Filter values selecting rows whose slot `field` equals `value`.
    fn scoped(&self, field: usize, value: &str) -> Vec<String> {
        let mut values = vec![String::new(); field];
        values.push(value.to_string());
        if let Some(domain) = &self.config.domain {
            values.resize(2, String::new());
            values.push(domain.clone());
        }
        values
    }

    async fn clear(
        &self,
        principal: &str,
        claimed: &[&str],
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        // Union of stored and in-model rows; either side may hold rows the
        // other lost to an earlier partial failure.
        let mut rows: BTreeSet<(String, Vec<String>)> = BTreeSet::new();
        let filter = RuleFilter::new(
            TypeMatch::Section(GROUPING_SECTION.to_string()),
            0,
            self.scoped(0, principal),
        );
        for record in self.store.load_filtered(&filter).await? {
            if let Some(values) = record.to_values() {
                rows.insert((record.ptype, values));
            }
        }
        {
            let enforcer = self.enforcer.read().await;
            let ptypes: Vec<String> = enforcer
                .get_model()
                .get_model()
                .get(GROUPING_SECTION)
                .map(|assertions| assertions.keys().cloned().collect())
                .unwrap_or_default();
            for ptype in ptypes {
                for rule in enforcer.get_filtered_named_grouping_policy(
                    &ptype,
                    0,
                    self.scoped(0, principal),
                ) {
                    rows.insert((ptype.clone(), rule));
                }
            }
        }

        let mut dropped_groups = BTreeSet::new();
        for (ptype, rule) in rows {
            if ptype == self.config.ptype
                && let Some(group) = rule.get(1)
                && !claimed.contains(&group.as_str())
            {
                dropped_groups.insert(group.clone());
            }
            if self.remove_grouping(principal, &ptype, rule).await? {
                report.cleared += 1;
            }
        }

        for group in dropped_groups {
            report.pruned_role_links += self.prune_role_links(principal, &group).await?;
        }
        Ok(())
    }

    /// Remove one grouping row from wherever it still lives.
    ///
    /// Rows the model does not hold (written by another pass or process after
    /// the last load) are deleted from the store directly; casbin would
    /// reject them from its role graph. Returns whether a row was present.
    async fn remove_grouping(
        &self,
        principal: &str,
        ptype: &str,
        rule: Vec<String>,
    ) -> Result<bool, SyncError> {
        let mut enforcer = self.enforcer.write().await;
        if enforcer.has_grouping_named_policy(ptype, rule.clone()) {
            return enforcer
                .remove_named_grouping_policy(ptype, rule)
                .await
                .map_err(|source| SyncError::Clear {
                    principal: principal.to_string(),
                    source,
                });
        }
        let (record, _) = RuleRecord::encode(ptype, &rule).map_err(StoreError::from)?;
        let filter = RuleFilter::new(TypeMatch::Exact(ptype.to_string()), 0, rule);
        let stored = self
            .store
            .load_filtered(&filter)
            .await?
            .into_iter()
            .any(|candidate| candidate == record);
        if stored {
            self.store.delete(&record).await?;
        }
        Ok(stored)
    }

    /// Whether `group` has any member in the store or the model.
    async fn has_members(
        &self,
        enforcer: &casbin::Enforcer,
        group: &str,
    ) -> Result<bool, SyncError> {
        let ptype = self.config.ptype.as_str();
        if !enforcer
            .get_filtered_named_grouping_policy(ptype, 0, self.scoped(1, group))
            .is_empty()
        {
            return Ok(true);
        }
        let members =
            RuleFilter::new(TypeMatch::Exact(ptype.to_string()), 0, self.scoped(1, group));
        Ok(!self.store.load_filtered(&members).await?.is_empty())
    }

    /// Remove mapped group -> role links of a group nobody belongs to anymore.
    ///
    /// Membership is re-checked under the enforcer write lock before each
    /// removal; a pass adding a member takes the same lock first.
    async fn prune_role_links(&self, principal: &str, group: &str) -> Result<usize, SyncError> {
        let ptype = self.config.ptype.as_str();
        if self.has_members(&*self.enforcer.read().await, group).await? {
            return Ok(0);
        }

        let roles = self
            .mappings
            .roles_for_group(group)
            .await
            .map_err(|source| SyncError::Mapping {
                group: group.to_string(),
                state: SyncState::Start,
                source,
            })?;
        let mut pruned = 0;
        for role in roles {
            let mut enforcer = self.enforcer.write().await;
            if self.has_members(&enforcer, group).await? {
                tracing::debug!(group, "group gained a member; keeping role links");
                break;
            }
            let link = self.grouping(group, &role);
            if !enforcer.has_grouping_named_policy(ptype, link.clone()) {
                continue;
            }
            let removed = enforcer
                .remove_named_grouping_policy(ptype, link)
                .await
                .map_err(|source| SyncError::Clear {
                    principal: principal.to_string(),
                    source,
                })?;
            if removed {
                pruned += 1;
            }
        }
        Ok(pruned)
    }

    async fn apply(
        &self,
        principal: &str,
        claimed: &[&str],
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let ptype = self.config.ptype.as_str();
        let apply_error = |source: casbin::Error| SyncError::Apply {
            principal: principal.to_string(),
            state: SyncState::Cleared,
            source,
        };
        for group in claimed {
            self.enforcer
                .write()
                .await
                .add_named_grouping_policy(ptype, self.grouping(principal, group))
                .await
                .map_err(apply_error)?;
            report.memberships += 1;

            let roles = self
                .mappings
                .roles_for_group(group)
                .await
                .map_err(|source| SyncError::Mapping {
                    group: group.to_string(),
                    state: SyncState::Cleared,
                    source,
                })?;
            for role in roles {
                let link = self.grouping(group, &role);
                let mut enforcer = self.enforcer.write().await;
                if enforcer.has_grouping_named_policy(ptype, link.clone()) {
                    continue;
                }
                if enforcer
                    .add_named_grouping_policy(ptype, link)
                    .await
                    .map_err(apply_error)?
                {
                    report.role_links_added += 1;
                }
            }
        }
        Ok(())
    }
}
