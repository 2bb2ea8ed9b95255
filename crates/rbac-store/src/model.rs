//! Embedded casbin models and enforcer construction.
//!
//! # Purpose and responsibility
//! Provides the RBAC model definitions this crate is tested against and builds
//! an [`Enforcer`] whose policy is loaded through [`RuleAdapter`].
//!
//! # Key invariants
//! - Enforcers built here have auto-save enabled, so every mutation is written
//!   through to the store before the mutating call returns.
//! - Role links are rebuilt after the initial load.
use crate::adapter::RuleAdapter;
use crate::store::RuleStore;
use casbin::{CoreApi, DefaultModel, Enforcer, Result};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Role-based model with allow/deny effects and path-style object matching.
const RBAC_MODEL: &str = r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act, eft

[role_definition]
g = _, _

[policy_effect]
e = some(where (p.eft == allow)) && !some(where (p.eft == deny))

[matchers]
m = g(r.sub, p.sub) && keyMatch2(r.obj, p.obj) && r.act == p.act
"#;

/// Domain-scoped variant: groupings carry the domain as their third value.
const DOMAIN_RBAC_MODEL: &str = r#"
[request_definition]
r = sub, dom, obj, act

[policy_definition]
p = sub, dom, obj, act, eft

[role_definition]
g = _, _, _

[policy_effect]
e = some(where (p.eft == allow)) && !some(where (p.eft == deny))

[matchers]
m = g(r.sub, p.sub, r.dom) && r.dom == p.dom && keyMatch2(r.obj, p.obj) && r.act == p.act
"#;

/// Enforcer shared between request handlers and the grouping synchronizer.
pub type SharedEnforcer = Arc<RwLock<Enforcer>>;

pub fn rbac_model_string() -> &'static str {
    RBAC_MODEL
}

pub fn domain_rbac_model_string() -> &'static str {
    DOMAIN_RBAC_MODEL
}

pub async fn rbac_model() -> Result<DefaultModel> {
    DefaultModel::from_str(RBAC_MODEL).await
}

pub async fn domain_rbac_model() -> Result<DefaultModel> {
    DefaultModel::from_str(DOMAIN_RBAC_MODEL).await
}

/// Build an enforcer over [`RBAC_MODEL`] with its policy loaded from `store`.
///
/// # Errors
/// - casbin model errors, or an adapter error if the initial load fails.
///
/// # Example
/// ```rust
/// use rbac_store::model::build_enforcer;
/// use rbac_store::store::memory::InMemoryRuleStore;
/// use std::sync::Arc;
///
/// # async fn build() -> casbin::Result<()> {
/// let enforcer = build_enforcer(Arc::new(InMemoryRuleStore::new())).await?;
/// # let _ = enforcer;
/// # Ok(())
/// # }
/// ```
pub async fn build_enforcer(store: Arc<dyn RuleStore>) -> Result<Enforcer> {
    build_enforcer_with_model(rbac_model().await?, store).await
}

/// Build an enforcer for an arbitrary model, loading its policy from `store`.
pub async fn build_enforcer_with_model(
    model: DefaultModel,
    store: Arc<dyn RuleStore>,
) -> Result<Enforcer> {
    let adapter = RuleAdapter::new(store);
    // `Enforcer::new` performs the initial load through the adapter.
    let mut enforcer = Enforcer::new(model, adapter).await?;
    enforcer.enable_auto_save(true);
    enforcer.build_role_links()?;
    Ok(enforcer)
}

/// Wrap an enforcer for sharing across tasks.
pub fn shared(enforcer: Enforcer) -> SharedEnforcer {
    Arc::new(RwLock::new(enforcer))
}
