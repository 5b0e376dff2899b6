mod common;

use std::sync::{Arc, Mutex};

use common::{vpc_yaml, TestHarness};
use serde_json::{json, Value};

use fabric_gitops::db::{repository_repo, resource_repo};
use fabric_gitops::gitops::{
    ConflictStatus, ConflictStrategy, ConflictType, ResourceChangeEvent, ResourceKind,
    SyncDirectionParam,
};

const EDGE_VPC: &str = "managed/vpcs/edge-vpc.yaml";
const PROD_VPC: &str = "managed/vpcs/prod-vpc.yaml";

fn subnet(spec: &Value) -> Option<&str> {
    spec.pointer("/subnets/default/subnet").and_then(Value::as_str)
}

fn yaml_files(names: Vec<String>) -> Vec<String> {
    names.into_iter().filter(|n| n.ends_with(".yaml")).collect()
}

/// Puts a VPC manifest in the repository and pulls it in.
async fn pulled_edge_vpc(h: &TestHarness, cidr: &str) {
    h.git.put(&h.repo_path(EDGE_VPC), &vpc_yaml("edge-vpc", cidr));
    let result = h.sync(SyncDirectionParam::GithubToGui, false).await;
    assert!(result.success, "pull failed: {:?}", result.errors);
}

/// Ingests a VPC from the pending directory and pushes its managed file.
async fn pushed_prod_vpc(h: &TestHarness) {
    h.write_pending("vpc1.yaml", &vpc_yaml("prod-vpc", "10.0.1.0/24"));
    h.service.ingest_raw_directory(h.fabric_id).await;
    let result = h.sync(SyncDirectionParam::GuiToGithub, false).await;
    assert_eq!(result.stats.pushed, 1, "push failed: {:?}", result.errors);
}

fn edit_in_gui(h: &TestHarness, name: &str, cidr: &str) {
    let record = h.vpc(name);
    resource_repo::update_from_gui(
        &h.db,
        record.id,
        &json!({"subnets": {"default": {"subnet": cidr}}}),
        None,
    )
    .unwrap();
}

#[tokio::test]
async fn test_pending_manifest_becomes_record_and_managed_file() {
    let h = TestHarness::new().await;
    let source = h.write_pending("vpc1.yaml", &vpc_yaml("prod-vpc", "10.0.1.0/24"));

    let result = h.service.ingest_raw_directory(h.fabric_id).await;
    assert!(result.success, "ingestion failed: {:?}", result.errors());
    assert_eq!(result.resources_created, 1);

    let record = h.vpc("prod-vpc");
    assert_eq!(record.kind, ResourceKind::Vpc);
    assert_eq!(record.managed_file_path.as_deref(), Some("managed/vpcs/prod-vpc.yaml"));
    assert_eq!(subnet(&record.spec), Some("10.0.1.0/24"));
    assert!(h.layout.managed_dir().join("vpcs/prod-vpc.yaml").is_file());

    assert!(!source.exists());
    let processed = yaml_files(h.files_in(&h.layout.processed_dir()));
    assert_eq!(processed.len(), 1);
    assert!(processed[0].starts_with("vpc1_"));
}

#[tokio::test]
async fn test_invalid_name_is_archived_with_sidecar() {
    let h = TestHarness::new().await;
    let manifest = "apiVersion: vpc.githedgehog.com/v1beta1
kind: VPC
metadata:
  name: \"Invalid_Name!\"
spec:
  subnets: {}
";
    h.write_pending("vpc-bad.yaml", manifest);

    let result = h.service.ingest_raw_directory(h.fabric_id).await;
    assert!(!result.success);
    assert_eq!(result.resources_created, 0);
    let records = resource_repo::list(&h.db, h.fabric_id, &Default::default()).unwrap();
    assert!(records.is_empty());

    let errors = h.files_in(&h.layout.errors_dir());
    assert!(errors.contains(&"vpc-bad.yaml".to_string()), "{:?}", errors);
    assert!(errors.contains(&"vpc-bad_error.json".to_string()), "{:?}", errors);

    let sidecar: Value = serde_json::from_str(
        &std::fs::read_to_string(h.layout.errors_dir().join("vpc-bad_error.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(sidecar["source"], "raw/pending/vpc-bad.yaml");
    let violations = sidecar["documents"][0]["violations"].as_array().unwrap();
    assert!(violations
        .iter()
        .any(|v| v["violation_type"] == "naming_convention"));
}

#[tokio::test]
async fn test_record_in_conflict_is_not_pushed() {
    let h = TestHarness::new().await;
    h.write_pending("vpc1.yaml", &vpc_yaml("prod-vpc", "10.0.1.0/24"));
    h.service.ingest_raw_directory(h.fabric_id).await;
    let pushed = h.sync(SyncDirectionParam::GuiToGithub, false).await;
    assert_eq!(pushed.stats.pushed, 1);

    let record = h.vpc("prod-vpc");
    resource_repo::record_conflict(
        &h.db,
        record.id,
        &json!({"conflict_type": "external_modification"}),
    )
    .unwrap();
    resource_repo::update_from_gui(&h.db, record.id, &json!({"subnets": {}}), None).unwrap();
    let commits = h.git.commit_count();

    let result = h.sync(SyncDirectionParam::GuiToGithub, false).await;

    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.stats.skipped_in_conflict, 1);
    assert_eq!(result.stats.pushed, 0);
    assert_eq!(h.git.commit_count(), commits);
    assert_eq!(h.vpc("prod-vpc").conflict_status, ConflictStatus::Detected);
}

#[tokio::test]
async fn test_no_external_changes_at_synced_head() {
    let h = TestHarness::new().await;
    let first = h.sync(SyncDirectionParam::GithubToGui, false).await;
    assert!(first.success, "{:?}", first.errors);
    assert_eq!(h.fabric().desired_state_commit, Some(h.git.head()));

    let before = h.git.calls();
    let changes = h.service.detect_external_changes(h.fabric_id).await.unwrap();
    let after = h.git.calls();

    assert!(!changes.changes_detected);
    assert_eq!(changes.head, h.git.head());
    assert_eq!(after.diff, before.diff);
    assert_eq!(after.list, before.list);
}

#[tokio::test]
async fn test_second_bidirectional_sync_changes_nothing() {
    let h = TestHarness::new().await;
    h.write_pending("vpc1.yaml", &vpc_yaml("prod-vpc", "10.0.1.0/24"));
    h.service.ingest_raw_directory(h.fabric_id).await;

    let first = h.sync(SyncDirectionParam::Bidirectional, false).await;
    assert!(first.success, "{:?}", first.errors);
    assert_eq!(first.stats.pushed, 1);
    let record = h.vpc("prod-vpc");
    assert_eq!(record.remote_sha, h.git.blob(&h.repo_path("managed/vpcs/prod-vpc.yaml")));

    let commits = h.git.commit_count();
    let writes = h.git.calls().writes();
    let second = h.sync(SyncDirectionParam::Bidirectional, false).await;

    assert!(second.success, "{:?}", second.errors);
    assert_eq!(second.stats.pushed, 0);
    assert_eq!(second.stats.unchanged, 1);
    assert!(second.conflicts.is_empty());
    assert_eq!(h.git.commit_count(), commits);
    assert_eq!(h.git.calls().writes(), writes);
    assert_eq!(h.vpc("prod-vpc").file_hash, record.file_hash);
}

#[tokio::test]
async fn test_remote_manifest_is_pulled_and_edits_adopted() {
    let h = TestHarness::new().await;
    pulled_edge_vpc(&h, "10.0.2.0/24").await;

    let record = h.vpc("edge-vpc");
    assert_eq!(subnet(&record.spec), Some("10.0.2.0/24"));
    assert_eq!(record.remote_sha, h.git.blob(&h.repo_path(EDGE_VPC)));
    assert!(h.layout.managed_dir().join("vpcs/edge-vpc.yaml").is_file());
    assert!(yaml_files(h.files_in(&h.layout.pending_dir())).is_empty());

    h.git.put(&h.repo_path(EDGE_VPC), &vpc_yaml("edge-vpc", "10.0.3.0/24"));
    let result = h.sync(SyncDirectionParam::GithubToGui, false).await;

    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.stats.ingested, 1);
    assert!(result.conflicts.is_empty());
    let record = h.vpc("edge-vpc");
    assert_eq!(subnet(&record.spec), Some("10.0.3.0/24"));
    assert_eq!(record.conflict_status, ConflictStatus::None);
}

#[tokio::test]
async fn test_concurrent_edit_conflicts_and_gui_wins() {
    let h = TestHarness::new().await;
    pulled_edge_vpc(&h, "10.0.2.0/24").await;

    let record = h.vpc("edge-vpc");
    resource_repo::update_from_gui(
        &h.db,
        record.id,
        &json!({"subnets": {"default": {"subnet": "10.0.9.0/24"}}}),
        None,
    )
    .unwrap();
    h.git.put(&h.repo_path(EDGE_VPC), &vpc_yaml("edge-vpc", "10.0.3.0/24"));

    let result = h.sync(SyncDirectionParam::Bidirectional, false).await;

    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(result.conflicts[0].conflict_type, ConflictType::ConcurrentModification);
    assert_eq!(result.stats.pushed, 0);
    let record = h.vpc("edge-vpc");
    assert_eq!(record.conflict_status, ConflictStatus::Detected);
    assert_eq!(subnet(&record.spec), Some("10.0.9.0/24"));
    assert_eq!(record.desired_spec.as_ref().and_then(subnet), Some("10.0.3.0/24"));

    let summary = h
        .service
        .resolve_conflicts(h.fabric_id, ConflictStrategy::GuiWins, "operator")
        .await;

    assert!(summary.errors.is_empty(), "{:?}", summary.errors);
    assert_eq!(summary.resolved_count, 1);
    assert_eq!(summary.pushed_count, 1);
    let remote = h.git.content(&h.repo_path(EDGE_VPC)).unwrap();
    assert!(remote.contains("10.0.9.0/24"), "{}", remote);
    let record = h.vpc("edge-vpc");
    assert_ne!(record.conflict_status, ConflictStatus::Detected);
    assert_eq!(record.remote_sha, h.git.blob(&h.repo_path(EDGE_VPC)));
}

#[tokio::test]
async fn test_remote_delete_removes_record() {
    let h = TestHarness::new().await;
    pulled_edge_vpc(&h, "10.0.2.0/24").await;
    assert!(h.layout.managed_dir().join("vpcs/edge-vpc.yaml").is_file());

    h.git.remove(&h.repo_path(EDGE_VPC));
    let result = h.sync(SyncDirectionParam::GithubToGui, false).await;

    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.stats.deleted, 1);
    assert!(h.record(ResourceKind::Vpc, "edge-vpc").is_none());
    assert!(!h.layout.managed_dir().join("vpcs/edge-vpc.yaml").exists());
}

#[tokio::test]
async fn test_push_refused_when_direct_push_disabled() {
    let h = TestHarness::new().await;
    h.write_pending("vpc1.yaml", &vpc_yaml("prod-vpc", "10.0.1.0/24"));
    h.service.ingest_raw_directory(h.fabric_id).await;
    repository_repo::set_direct_push(&h.db, h.repository_id, false).unwrap();
    let writes = h.git.calls().writes();

    let result = h.sync(SyncDirectionParam::GuiToGithub, false).await;

    assert!(!result.success);
    assert!(result.message.contains("direct push is disabled"), "{}", result.message);
    assert_eq!(h.git.calls().writes(), writes);
}

#[tokio::test]
async fn test_raw_file_in_repository_gets_managed_file_pushed() {
    let h = TestHarness::new().await;
    h.git.put(&h.repo_path("raw/pending/vpc1.yaml"), &vpc_yaml("prod-vpc", "10.0.1.0/24"));

    let first = h.sync(SyncDirectionParam::Bidirectional, false).await;

    assert!(first.success, "{:?}", first.errors);
    assert_eq!(first.stats.ingested, 1);
    assert_eq!(first.stats.pushed, 1);
    let remote = h.git.content(&h.repo_path(PROD_VPC)).expect("managed file pushed");
    assert!(remote.contains("10.0.1.0/24"), "{}", remote);
    let record = h.vpc("prod-vpc");
    assert_eq!(record.remote_sha, h.git.blob(&h.repo_path(PROD_VPC)));

    let second = h.sync(SyncDirectionParam::Bidirectional, false).await;

    assert!(second.success, "{:?}", second.errors);
    assert_eq!(second.stats.pushed, 0);
    assert!(second.conflicts.is_empty());
}

#[tokio::test]
async fn test_pulled_raw_file_does_not_overwrite_gui_edit() {
    let h = TestHarness::new().await;
    pushed_prod_vpc(&h).await;
    edit_in_gui(&h, "prod-vpc", "10.0.7.0/24");
    let managed = std::fs::read_to_string(h.layout.managed_dir().join("vpcs/prod-vpc.yaml"))
        .unwrap();
    h.git.put(&h.repo_path("raw/new.yaml"), &vpc_yaml("prod-vpc", "10.0.5.0/24"));

    let result = h.sync(SyncDirectionParam::GithubToGui, false).await;

    assert_eq!(result.conflicts.len(), 1, "{:?}", result.errors);
    assert_eq!(result.conflicts[0].conflict_type, ConflictType::ConcurrentModification);
    let record = h.vpc("prod-vpc");
    assert_eq!(record.conflict_status, ConflictStatus::Detected);
    assert_eq!(subnet(&record.spec), Some("10.0.7.0/24"));
    assert_eq!(record.desired_spec.as_ref().and_then(subnet), Some("10.0.5.0/24"));
    assert_eq!(record.external_modifications.len(), 1);
    let after = std::fs::read_to_string(h.layout.managed_dir().join("vpcs/prod-vpc.yaml"))
        .unwrap();
    assert_eq!(after, managed);
}

#[tokio::test]
async fn test_strategy_after_sync_leaves_older_conflicts_alone() {
    let h = TestHarness::new().await;
    pushed_prod_vpc(&h).await;
    pulled_edge_vpc(&h, "10.0.2.0/24").await;
    let prod_remote = h.git.content(&h.repo_path(PROD_VPC)).unwrap();

    let prod = h.vpc("prod-vpc");
    resource_repo::record_conflict(
        &h.db,
        prod.id,
        &json!({"conflict_type": "external_modification"}),
    )
    .unwrap();
    edit_in_gui(&h, "prod-vpc", "10.0.8.0/24");
    edit_in_gui(&h, "edge-vpc", "10.0.9.0/24");
    h.git.put(&h.repo_path(EDGE_VPC), &vpc_yaml("edge-vpc", "10.0.3.0/24"));

    let result = h
        .service
        .sync(h.fabric_id, SyncDirectionParam::Bidirectional, false, ConflictStrategy::GuiWins)
        .await;

    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(result.conflicts[0].resource_id, h.vpc("edge-vpc").id);
    let edge_remote = h.git.content(&h.repo_path(EDGE_VPC)).unwrap();
    assert!(edge_remote.contains("10.0.9.0/24"), "{}", edge_remote);
    assert_ne!(h.vpc("edge-vpc").conflict_status, ConflictStatus::Detected);

    let prod = h.vpc("prod-vpc");
    assert_eq!(prod.conflict_status, ConflictStatus::Detected);
    assert_eq!(subnet(&prod.spec), Some("10.0.8.0/24"));
    assert_eq!(h.git.content(&h.repo_path(PROD_VPC)).unwrap(), prod_remote);
}

#[tokio::test]
async fn test_fabric_stays_locked_until_conflicts_are_resolved() {
    let h = TestHarness::new().await;
    pulled_edge_vpc(&h, "10.0.2.0/24").await;
    edit_in_gui(&h, "edge-vpc", "10.0.9.0/24");
    h.git.put(&h.repo_path(EDGE_VPC), &vpc_yaml("edge-vpc", "10.0.3.0/24"));

    let sync = h.service.sync_service();
    let locks = sync.locks().clone();
    let held = Arc::new(Mutex::new(Vec::new()));
    let fabric_id = h.fabric_id;
    {
        let held = Arc::clone(&held);
        let locks = locks.clone();
        h.git.on_write(move |path| {
            held.lock().unwrap().push((path.to_string(), locks.is_locked(fabric_id)));
        });
    }

    let result = h
        .service
        .sync(h.fabric_id, SyncDirectionParam::Bidirectional, false, ConflictStrategy::GuiWins)
        .await;

    assert_eq!(result.conflicts.len(), 1);
    let writes = held.lock().unwrap().clone();
    assert!(
        writes.iter().any(|(path, _)| path == &h.repo_path(EDGE_VPC)),
        "{:?}",
        writes
    );
    assert!(writes.iter().all(|(_, locked)| *locked), "{:?}", writes);
    assert!(!locks.is_locked(h.fabric_id));
}

#[tokio::test]
async fn test_scheduled_sync_publishes_synced_event() {
    let h = TestHarness::new().await;
    h.write_pending("vpc1.yaml", &vpc_yaml("prod-vpc", "10.0.1.0/24"));
    h.service.ingest_raw_directory(h.fabric_id).await;
    let id = h.vpc("prod-vpc").id;
    let mut events = h.service.subscribe();

    let run = h.service.scheduler().run_once().await.unwrap();

    assert_eq!(run.succeeded, 1);
    match events.try_recv() {
        Ok(ResourceChangeEvent::Synced {
            fabric_id,
            direction,
            resource_ids,
            ..
        }) => {
            assert_eq!(fabric_id, h.fabric_id);
            assert_eq!(direction, SyncDirectionParam::Bidirectional);
            assert_eq!(resource_ids, vec![id]);
        }
        other => panic!("expected a Synced event, got {:?}", other),
    }
}
