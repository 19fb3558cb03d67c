//! End-to-end publish scenarios against the recording backend.
//!
//! These exercise the crate through its facade: stage real payloads behind
//! carriers, drive the fulfillment workflow, and check what reached the
//! exchange.

use std::path::Path;

use exchange_publish::fulfillment::testing::{Call, RecordingBackend};
use exchange_publish::fulfillment::{FulfillmentState, TerminalOutcome};
use exchange_publish::{
    AssetId, CancellationToken, ExchangeIdentity, Level, Orchestrator, PollPolicy, PublishRequest,
    Publisher, StagingArea, StagingConfig, Transcript, WorkflowConfig,
};

fn exchange() -> ExchangeIdentity {
    ExchangeIdentity::new("ex-42", "col-7", "hub-3")
}

fn quick_config() -> WorkflowConfig {
    WorkflowConfig {
        poll: PollPolicy::new(1, Some(5)),
        ..WorkflowConfig::default()
    }
}

fn write_payload(dir: &Path, name: &str, len: usize) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, vec![0xA5u8; len]).expect("write payload");
    path
}

fn open_staging(dir: &Path) -> StagingArea {
    StagingArea::open(StagingConfig::new(dir.join("staging"))).expect("open staging area")
}

#[tokio::test]
async fn test_single_payload_reaches_completed_with_real_output() {
    let dir = tempfile::tempdir().expect("tempdir");
    let payload = write_payload(dir.path(), "g1.bin", 1024);
    let staging = open_staging(dir.path());
    let backend = RecordingBackend::new().polls_before_completion(1);
    let cancel = CancellationToken::new();

    let mut upload = staging.upload(&backend, &exchange(), &cancel);
    upload
        .stage(&AssetId::new("G1"), &payload)
        .await
        .expect("stage G1");

    let transcript = Transcript::new();
    let report = Orchestrator::new(quick_config())
        .run(&backend, &staging, &exchange(), &transcript, &CancellationToken::new())
        .await
        .expect("workflow completes");

    assert_eq!(report.outcome, Some(TerminalOutcome::Completed));
    assert_eq!(report.survivor_count, 1);

    let uploads = backend.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].len(), 1);
    assert_eq!(uploads[0][0].asset_id, AssetId::new("G1"));
    assert_eq!(uploads[0][0].output_path, payload);
    assert_ne!(uploads[0][0].source_path, payload);
    assert!(!transcript.has_fatal());
}

#[tokio::test]
async fn test_deleted_payload_is_dropped_before_upload() {
    let dir = tempfile::tempdir().expect("tempdir");
    let g1 = write_payload(dir.path(), "g1.bin", 512);
    let g2 = write_payload(dir.path(), "g2.bin", 512);
    let staging = open_staging(dir.path());
    let backend = RecordingBackend::new();

    staging
        .stage_carrier(&backend, &exchange(), &AssetId::new("G1"), &g1, &CancellationToken::new())
        .await
        .expect("stage G1");
    staging
        .stage_carrier(&backend, &exchange(), &AssetId::new("G2"), &g2, &CancellationToken::new())
        .await
        .expect("stage G2");
    std::fs::remove_file(&g2).expect("delete G2 payload");

    let report = Orchestrator::new(quick_config())
        .run(&backend, &staging, &exchange(), &Transcript::new(), &CancellationToken::new())
        .await
        .expect("workflow completes");

    assert_eq!(report.outcome, Some(TerminalOutcome::Completed));
    assert_eq!(report.survivor_count, 1);
    assert_eq!(report.dropped_count, 1);

    let uploads = backend.uploads();
    assert_eq!(uploads.len(), 1);
    let ids: Vec<_> = uploads[0].iter().map(|d| d.asset_id.clone()).collect();
    assert_eq!(ids, vec![AssetId::new("G1")]);
}

#[tokio::test]
async fn test_upload_failure_discards_the_started_fulfillment() {
    let dir = tempfile::tempdir().expect("tempdir");
    let payload = write_payload(dir.path(), "part.bin", 2048);
    let staging = open_staging(dir.path());
    let backend = RecordingBackend::new().fail_at(FulfillmentState::GeometriesUploaded);
    let request = PublishRequest::new(exchange(), &payload, "Bracket");

    let outcome = Publisher::new(quick_config())
        .publish(&backend, &staging, &request, &CancellationToken::new())
        .await;

    assert!(!outcome.success);
    assert!(outcome.has_fatal());
    assert!(outcome.element_id.is_none());
    assert!(outcome.intermediate_path.is_none());

    let report = outcome.report.as_ref().expect("workflow report");
    let started = report.fulfillment_id.clone().expect("fulfillment was opened");
    let discards: Vec<_> = backend
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::Discard(_)))
        .collect();
    assert_eq!(discards, vec![Call::Discard(started)]);
    assert_eq!(report.outcome, Some(TerminalOutcome::Discarded));

    let fatal = outcome.entries_at_least(Level::Fatal);
    assert_eq!(fatal.len(), 1);
    assert_eq!(fatal[0].state, Some(FulfillmentState::GeometriesUploaded));
}

#[tokio::test]
async fn test_optional_phase_failures_do_not_stop_the_workflow() {
    let dir = tempfile::tempdir().expect("tempdir");
    let payload = write_payload(dir.path(), "g1.bin", 128);
    let staging = open_staging(dir.path());
    let backend = RecordingBackend::new()
        .unsupported(FulfillmentState::CustomUploaded)
        .fail_at(FulfillmentState::LargePrimitivesUploaded);

    staging
        .stage_carrier(&backend, &exchange(), &AssetId::new("G1"), &payload, &CancellationToken::new())
        .await
        .expect("stage G1");

    let transcript = Transcript::new();
    let report = Orchestrator::new(quick_config())
        .run(&backend, &staging, &exchange(), &transcript, &CancellationToken::new())
        .await
        .expect("best-effort phases are not fatal");

    assert_eq!(report.outcome, Some(TerminalOutcome::Completed));
    assert!(report.skipped.contains(&FulfillmentState::CustomUploaded));
    assert_eq!(backend.discards(), 0);
    assert!(!transcript.has_fatal());
    assert!(!transcript.at_least(Level::Warning).is_empty());
}
