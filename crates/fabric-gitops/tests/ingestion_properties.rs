mod common;

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tempfile::TempDir;

use common::{switch_yaml, unsupported_yaml, vpc_yaml, TestHarness};
use fabric_gitops::config::WatcherConfig;
use fabric_gitops::db::resource_repo;
use fabric_gitops::gitops::model::ExternalModification;
use fabric_gitops::gitops::{
    ConflictDetector, ConflictType, DirectoryLayout, DriftStatus, FabricLocks, PolicyConfig,
    PolicyEngine, RawDirectoryWatcher, RawIngestor, ResourceKind, TickOutcome, ViolationType,
};
use fabric_gitops::{IngestError, IngestionResult};

fn yaml_count(h: &TestHarness, dir: PathBuf) -> usize {
    h.files_in(&dir).iter().filter(|n| n.ends_with(".yaml")).count()
}

fn sidecar(h: &TestHarness, name: &str) -> Value {
    let text = std::fs::read_to_string(h.layout.errors_dir().join(name)).unwrap();
    serde_json::from_str(&text).unwrap()
}

#[tokio::test]
async fn test_unsupported_kind_is_rejected_at_classification() {
    let h = TestHarness::new().await;
    h.write_raw("thing.yaml", &unsupported_yaml("widget"));

    let result = h.service.ingest_raw_directory(h.fabric_id).await;

    assert!(!result.success);
    assert_eq!(result.classification.failed, 1);
    assert_eq!(result.resources_created, 0);
    assert_eq!(h.files_in(&h.layout.errors_dir()), vec!["thing.yaml", "thing_error.json"]);

    let error = sidecar(&h, "thing_error.json")["documents"][0]["error"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(error.starts_with("classification:"), "{}", error);
}

#[tokio::test]
async fn test_every_intake_file_is_archived() {
    let h = TestHarness::new().await;
    h.write_raw("good.yaml", &vpc_yaml("prod-vpc", "10.0.1.0/24"));
    h.write_pending("switch.yaml", &switch_yaml("fabric-a", "leaf-01"));
    h.write_raw("thing.yaml", &unsupported_yaml("widget"));
    h.write_pending("broken.yaml", "kind: VPC\nmetadata: [unclosed\n");

    let result = h.service.ingest_raw_directory(h.fabric_id).await;

    assert_eq!(result.files.len(), 4);
    assert_eq!(yaml_count(&h, h.layout.raw_dir()), 0);
    assert_eq!(yaml_count(&h, h.layout.pending_dir()), 0);
    assert_eq!(yaml_count(&h, h.layout.processed_dir()), 2);
    assert_eq!(yaml_count(&h, h.layout.errors_dir()), 2);
    assert!(h.record(ResourceKind::Vpc, "prod-vpc").is_some());
}

#[tokio::test]
async fn test_partially_valid_file_keeps_good_documents() {
    let h = TestHarness::new().await;
    let content = format!(
        "{}---\n{}",
        vpc_yaml("prod-vpc", "10.0.1.0/24"),
        unsupported_yaml("widget")
    );
    h.write_raw("mixed.yaml", &content);

    let result = h.service.ingest_raw_directory(h.fabric_id).await;

    assert_eq!(result.resources_created, 1);
    assert!(h.record(ResourceKind::Vpc, "prod-vpc").is_some());
    assert_eq!(yaml_count(&h, h.layout.processed_dir()), 0);

    let sidecar = sidecar(&h, "mixed_error.json");
    assert_eq!(sidecar["documents"].as_array().unwrap().len(), 1);
    assert_eq!(sidecar["documents"][0]["index"], 1);
    assert_eq!(sidecar["ingested"], json!(["VPC/default/prod-vpc"]));
}

#[test]
fn test_missing_name_is_always_blocking() {
    let engine = PolicyEngine::new(PolicyConfig::default()).unwrap();
    let document = json!({
        "apiVersion": "vpc.githedgehog.com/v1beta1",
        "kind": "VPC",
        "metadata": {"labels": {"team": "network"}},
        "spec": {}
    });

    let first = engine.validate_structure(&document);
    let second = engine.validate_structure(&document);

    assert_eq!(first, second);
    assert!(first.iter().any(|v| v.violation_type == ViolationType::RequiredField
        && v.field.as_deref() == Some("metadata.name")
        && v.blocking));
}

#[tokio::test]
async fn test_external_modification_outranks_drift() {
    let h = TestHarness::new().await;
    h.write_raw("vpc.yaml", &vpc_yaml("prod-vpc", "10.0.1.0/24"));
    h.service.ingest_raw_directory(h.fabric_id).await;
    let record = h.vpc("prod-vpc");
    assert!(ConflictDetector::detect(&record).is_none());

    resource_repo::set_drift_status(&h.db, record.id, DriftStatus::SpecDrift).unwrap();
    let drifted = h.vpc("prod-vpc");
    assert_eq!(
        ConflictDetector::detect(&drifted).map(|c| c.conflict_type),
        Some(ConflictType::DriftDetected)
    );

    let modified = resource_repo::append_external_modification(
        &h.db,
        record.id,
        &ExternalModification {
            detected_at: Utc::now(),
            source: "github".into(),
            description: "edited in repository".into(),
            path: Some(h.repo_path("managed/vpcs/prod-vpc.yaml")),
            remote_sha: None,
        },
    )
    .unwrap();
    assert_eq!(
        ConflictDetector::detect(&modified).map(|c| c.conflict_type),
        Some(ConflictType::ExternalModification)
    );
}

/// Counts calls and holds the fabric for a while on each.
struct SlowIngestor {
    calls: AtomicUsize,
}

#[async_trait]
impl RawIngestor for SlowIngestor {
    async fn ingest_files(
        &self,
        _fabric_id: i64,
        files: Vec<PathBuf>,
    ) -> Result<IngestionResult, IngestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut result = IngestionResult::default();
        result.discovery.processed = files.len() as u32;
        result.finalize();
        Ok(result)
    }
}

#[tokio::test]
async fn test_one_ingestion_per_fabric_at_a_time() {
    let temp = TempDir::new().unwrap();
    let layout = DirectoryLayout::new(temp.path());
    layout.ensure_local().unwrap();
    std::fs::write(layout.raw_dir().join("vpc.yaml"), vpc_yaml("prod-vpc", "10.0.1.0/24")).unwrap();

    let config = WatcherConfig {
        scan_interval_secs: 60,
        debounce_delay_secs: 0,
        max_file_age_secs: 3600,
        stop_timeout_secs: 1,
    };
    let ingestor = Arc::new(SlowIngestor {
        calls: AtomicUsize::new(0),
    });
    let locks = FabricLocks::new();
    let first = RawDirectoryWatcher::new(1, &layout, &config, ingestor.clone(), locks.clone());
    let second = RawDirectoryWatcher::new(1, &layout, &config, ingestor.clone(), locks.clone());

    let (a, b) = tokio::join!(first.scan_now(), second.scan_now());

    let mut outcomes = vec![a, b];
    outcomes.sort_by_key(|o| matches!(o, TickOutcome::Busy));
    assert_eq!(outcomes, vec![TickOutcome::Ingested { files: 1 }, TickOutcome::Busy]);
    assert_eq!(ingestor.calls.load(Ordering::SeqCst), 1);
    assert!(!locks.is_locked(1));
}
