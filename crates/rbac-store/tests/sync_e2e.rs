mod common;

use casbin::MgmtApi;
use common::{FlakyStore, rule, sorted, sqlite_store};
use rbac_store::model::{build_enforcer, shared};
use rbac_store::{
    GroupingSynchronizer, IdentityClaims, MappingError, RoleMappingRepository, RuleStore,
    StaticRoleMappings, SyncConfig, SyncError, SyncState,
};
use std::sync::Arc;

fn mappings() -> StaticRoleMappings {
    StaticRoleMappings::new()
        .with_mapping("g1", ["role:reader"])
        .with_mapping("g2", ["role:writer"])
}

async fn seed_policy(store: &dyn RuleStore) {
    store
        .insert_many(&[
            rule("p", &["role:reader", "docs/*", "read", "allow"]),
            rule("p", &["role:writer", "docs/*", "write", "allow"]),
        ])
        .await
        .expect("seed policy");
}

#[tokio::test]
async fn leaving_a_group_removes_membership_and_orphaned_link() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store: Arc<dyn RuleStore> = Arc::new(sqlite_store(&dir).await);
    seed_policy(store.as_ref()).await;
    let enforcer = shared(build_enforcer(store.clone()).await.expect("enforcer"));
    let sync = GroupingSynchronizer::new(
        enforcer.clone(),
        store.clone(),
        Arc::new(mappings()),
        SyncConfig::default(),
    );

    let both = IdentityClaims::for_principal("P", vec!["g1".into(), "g2".into()]);
    assert!(sync.authorize(&both, "docs/a", "read").await);
    assert!(sync.authorize(&both, "docs/a", "write").await);

    let only_g2 = IdentityClaims::for_principal("P", vec!["g2".into()]);
    let report = sync.synchronize(&only_g2).await.expect("sync");
    assert_eq!(report.state, SyncState::Done);
    assert_eq!(report.cleared, 2);
    assert_eq!(report.pruned_role_links, 1);

    let groupings: Vec<_> = sorted(store.as_ref())
        .await
        .into_iter()
        .filter(|record| record.ptype == "g")
        .collect();
    assert_eq!(
        groupings,
        vec![rule("g", &["P", "g2"]), rule("g", &["g2", "role:writer"])]
    );
    assert!(!sync.authorize(&only_g2, "docs/a", "read").await);
    assert!(sync.authorize(&only_g2, "docs/a", "write").await);
}

#[tokio::test]
async fn empty_group_claim_clears_everything() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store: Arc<dyn RuleStore> = Arc::new(sqlite_store(&dir).await);
    seed_policy(store.as_ref()).await;
    let enforcer = shared(build_enforcer(store.clone()).await.expect("enforcer"));
    let sync = GroupingSynchronizer::new(
        enforcer.clone(),
        store.clone(),
        Arc::new(mappings()),
        SyncConfig::default(),
    );

    sync.synchronize(&IdentityClaims::for_principal("P", vec!["g1".into()]))
        .await
        .expect("first");
    let report = sync
        .synchronize(&IdentityClaims::for_principal("P", vec![]))
        .await
        .expect("second");
    assert_eq!(report.memberships, 0);
    assert!(
        store
            .load_all()
            .await
            .expect("load")
            .iter()
            .all(|record| record.ptype != "g")
    );
    assert!(
        enforcer
            .read()
            .await
            .get_filtered_named_grouping_policy("g", 0, vec!["P".into()])
            .is_empty()
    );
}

#[tokio::test]
async fn storage_failure_fails_closed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sqlite: Arc<dyn RuleStore> = Arc::new(sqlite_store(&dir).await);
    seed_policy(sqlite.as_ref()).await;
    let flaky = Arc::new(FlakyStore::new(sqlite.clone()));
    let enforcer = shared(build_enforcer(flaky.clone()).await.expect("enforcer"));
    let sync = GroupingSynchronizer::new(
        enforcer,
        flaky.clone(),
        Arc::new(mappings()),
        SyncConfig::default(),
    );

    let claims = IdentityClaims::for_principal("P", vec!["g1".into()]);
    assert!(sync.authorize(&claims, "docs/a", "read").await);

    flaky.fail_writes(true);
    let err = sync.synchronize(&claims).await.unwrap_err();
    assert!(matches!(err, SyncError::Clear { .. }));
    assert_eq!(err.reached(), SyncState::Start);
    assert!(!sync.authorize(&claims, "docs/a", "read").await);

    flaky.fail_writes(false);
    assert!(sync.authorize(&claims, "docs/a", "read").await);
}

struct OfflineMappings;

#[async_trait::async_trait]
impl RoleMappingRepository for OfflineMappings {
    async fn roles_for_group(&self, _group: &str) -> Result<Vec<String>, MappingError> {
        Err(MappingError::Unavailable("directory offline".to_string()))
    }
}

#[tokio::test]
async fn mapping_failure_after_clear_denies() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store: Arc<dyn RuleStore> = Arc::new(sqlite_store(&dir).await);
    seed_policy(store.as_ref()).await;
    store
        .insert_many(&[rule("g", &["P", "g1"]), rule("g", &["g1", "role:reader"])])
        .await
        .expect("seed groupings");
    let enforcer = shared(build_enforcer(store.clone()).await.expect("enforcer"));
    let sync = GroupingSynchronizer::new(
        enforcer,
        store.clone(),
        Arc::new(OfflineMappings),
        SyncConfig::default(),
    );

    let claims = IdentityClaims::for_principal("P", vec!["g1".into()]);
    let err = sync.synchronize(&claims).await.unwrap_err();
    assert_eq!(err.reached(), SyncState::Cleared);
    assert!(!sync.authorize(&claims, "docs/a", "read").await);
    // Membership was written before the lookup failed; nothing is rolled back.
    assert!(sorted(store.as_ref()).await.contains(&rule("g", &["P", "g1"])));
}

#[tokio::test]
async fn concurrent_passes_for_distinct_principals() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store: Arc<dyn RuleStore> = Arc::new(sqlite_store(&dir).await);
    seed_policy(store.as_ref()).await;
    let enforcer = shared(build_enforcer(store.clone()).await.expect("enforcer"));
    let sync = Arc::new(GroupingSynchronizer::new(
        enforcer,
        store.clone(),
        Arc::new(mappings()),
        SyncConfig {
            serialize_per_principal: true,
            ..SyncConfig::default()
        },
    ));

    let mut tasks = Vec::new();
    for i in 0..8 {
        let sync = sync.clone();
        tasks.push(tokio::spawn(async move {
            let claims = IdentityClaims::for_principal(format!("user-{i}"), vec!["g1".into()]);
            sync.authorize(&claims, "docs/x", "read").await
        }));
    }
    for task in tasks {
        assert!(task.await.expect("join"));
    }
    let memberships = store
        .load_all()
        .await
        .expect("load")
        .into_iter()
        .filter(|record| record.ptype == "g" && record.values[1] == "g1")
        .count();
    assert_eq!(memberships, 8);
}

#[tokio::test]
async fn rows_written_after_load_do_not_fail_the_pass() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store: Arc<dyn RuleStore> = Arc::new(sqlite_store(&dir).await);
    seed_policy(store.as_ref()).await;
    let enforcer = shared(build_enforcer(store.clone()).await.expect("enforcer"));
    let sync = GroupingSynchronizer::new(
        enforcer,
        store.clone(),
        Arc::new(mappings()),
        SyncConfig::default(),
    );
    store
        .insert_many(&[rule("g", &["P", "g1"]), rule("g", &["P", "g2"])])
        .await
        .expect("written by another process");

    let claims = IdentityClaims::for_principal("P", vec!["g1".into()]);
    let report = sync.synchronize(&claims).await.expect("sync");
    assert_eq!(report.state, SyncState::Done);
    assert_eq!(report.cleared, 2);
    assert!(sync.authorize(&claims, "docs/a", "read").await);
    assert!(!sync.authorize(&claims, "docs/a", "write").await);

    let groupings: Vec<_> = sorted(store.as_ref())
        .await
        .into_iter()
        .filter(|record| record.ptype == "g")
        .collect();
    assert_eq!(
        groupings,
        vec![rule("g", &["P", "g1"]), rule("g", &["g1", "role:reader"])]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_passes_for_one_principal_converge() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store: Arc<dyn RuleStore> = Arc::new(sqlite_store(&dir).await);
    seed_policy(store.as_ref()).await;
    let enforcer = shared(build_enforcer(store.clone()).await.expect("enforcer"));
    let sync = Arc::new(GroupingSynchronizer::new(
        enforcer.clone(),
        store.clone(),
        Arc::new(mappings()),
        SyncConfig::default(),
    ));

    for _ in 0..10 {
        let mut tasks = Vec::new();
        for _ in 0..4 {
            let sync = sync.clone();
            tasks.push(tokio::spawn(async move {
                let claims = IdentityClaims::for_principal("P", vec!["g1".into(), "g2".into()]);
                sync.synchronize(&claims).await.map(|report| report.state)
            }));
        }
        for task in tasks {
            assert_eq!(task.await.expect("join").expect("pass"), SyncState::Done);
        }
    }

    let groupings: Vec<_> = sorted(store.as_ref())
        .await
        .into_iter()
        .filter(|record| record.ptype == "g")
        .collect();
    assert_eq!(
        groupings,
        vec![
            rule("g", &["P", "g1"]),
            rule("g", &["P", "g2"]),
            rule("g", &["g1", "role:reader"]),
            rule("g", &["g2", "role:writer"]),
        ]
    );
    let mut model = enforcer
        .read()
        .await
        .get_filtered_named_grouping_policy("g", 0, vec!["P".into()]);
    model.sort();
    assert_eq!(
        model,
        vec![
            vec!["P".to_string(), "g1".to_string()],
            vec!["P".to_string(), "g2".to_string()],
        ]
    );
}
