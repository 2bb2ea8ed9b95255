//! # Purpose
//! Walk one principal through changing group claims and show how the
//! synchronizer rewrites its groupings and how decisions follow.
//!
//! # High-level flow
//! 1. Load adapter config from the environment (`RBAC_STORE_*`, `RBAC_SYNC_*`).
//!    Without a configured database the demo uses a throwaway SQLite file.
//! 2. Seed two role policies and build an enforcer with write-through enabled.
//! 3. Authorize `alice` with groups `[engineering, oncall]`, then `[oncall]`,
//!    then no groups, printing decisions and the stored groupings after each.
//! 4. Reopen the store in a fresh enforcer to show the rows survived.
use anyhow::{Context, Result};
use casbin::CoreApi;
use rbac_store::config::{AdapterConfig, DatabaseConfig, StorageBackend};
use rbac_store::model::{build_enforcer, shared};
use rbac_store::{
    ClaimMappings, GroupingSynchronizer, IdentityClaims, RoleMappingRepository, RuleRecord,
    RuleStore, StaticRoleMappings, init_observability, open_store,
};
use serde_json::json;
use std::sync::Arc;

const ISSUER: &str = "https://idp.example.test";

fn demo_mappings() -> StaticRoleMappings {
    StaticRoleMappings::new()
        .with_mapping("engineering", ["role:developer"])
        .with_mapping("oncall", ["role:operator"])
}

async fn seed(store: &dyn RuleStore) -> Result<()> {
    let policies = [
        ["role:developer", "repos/*", "push", "allow"],
        ["role:operator", "deploys/*", "approve", "allow"],
    ];
    let mut records = Vec::new();
    for policy in policies {
        records.push(RuleRecord::encode("p", &policy)?.0);
    }
    store.insert_many(&records).await?;
    Ok(())
}

async fn print_groupings(store: &dyn RuleStore, principal: &str) -> Result<()> {
    let mut rows: Vec<Vec<String>> = store
        .load_all()
        .await?
        .into_iter()
        .filter(|record| record.ptype.starts_with('g'))
        .filter_map(|record| record.to_values())
        .collect();
    rows.sort();
    for row in rows {
        let member = if row[0] == principal { "alice" } else { row[0].as_str() };
        println!("    g: {member} -> {}", row[1..].join(", "));
    }
    Ok(())
}

async fn run_demo() -> Result<()> {
    let _metrics = init_observability("claims-sync-demo");
    let mut config = AdapterConfig::from_env_or_yaml().context("load adapter config")?;

    let scratch = tempfile::tempdir().context("create scratch dir")?;
    if config.database.is_none() || config.storage == StorageBackend::Memory {
        let url = format!("sqlite://{}", scratch.path().join("rules.db").display());
        config.storage = StorageBackend::Sqlite;
        config.database = Some(DatabaseConfig {
            url,
            max_connections: 4,
            acquire_timeout_ms: 5_000,
        });
    }

    let store = open_store(&config).await?;
    seed(store.as_ref()).await?;

    let mappings: Arc<dyn RoleMappingRepository> = match &config.role_mappings_path {
        Some(path) => Arc::new(StaticRoleMappings::from_path(path)?),
        None => Arc::new(demo_mappings()),
    };
    let enforcer = shared(build_enforcer(store.clone()).await?);
    let sync = GroupingSynchronizer::new(
        enforcer.clone(),
        store.clone(),
        mappings,
        config.sync.clone(),
    );

    let claim_sets = [
        json!({"sub": "alice", "groups": ["engineering", "oncall"]}),
        json!({"sub": "alice", "groups": "oncall"}),
        json!({"sub": "alice"}),
    ];
    let claim_mappings = ClaimMappings::default();
    let mut principal = String::new();
    for raw in &claim_sets {
        let claims = IdentityClaims::from_json(ISSUER, raw, &claim_mappings)
            .context("claims without subject")?;
        principal = claims.principal_id.clone();
        println!("groups claimed: {:?}", claims.groups);
        for (object, action) in [("repos/api", "push"), ("deploys/prod", "approve")] {
            let allowed = sync.authorize(&claims, object, action).await;
            println!("  {action} {object}: {}", if allowed { "allow" } else { "deny" });
        }
        print_groupings(store.as_ref(), &principal).await?;
    }

    let reopened = open_store(&config).await?;
    let enforcer = build_enforcer(reopened).await?;
    let allowed = enforcer.enforce((principal.as_str(), "deploys/prod", "approve"))?;
    println!("after reopen, alice approve deploys/prod: {allowed}");
    tracing::info!("demo complete");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    run_demo().await
}
