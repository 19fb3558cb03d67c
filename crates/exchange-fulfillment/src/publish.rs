//! Upload entry point: publish one pre-translated payload as a named element.
//!
//! Never returns an error. Every failure ends up in the transcript and
//! `success = false` on the outcome.

use std::path::PathBuf;

use exchange_bridge::{BridgeError, BridgeResult, ErrorKind};
use exchange_staging::StagingArea;
use exchange_types::{ElementId, ExchangeIdentity, GeometryDescriptor, GeometryFormat};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::backend::ExchangeBackend;
use crate::orchestrator::{Orchestrator, WorkflowConfig, WorkflowFailure, WorkflowReport};
use crate::transcript::{Level, Transcript, TranscriptEntry};

pub const DEFAULT_UNIT: &str = "kUnitType_CentiMeter";

/// What to do when several elements share the requested name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum DuplicateNamePolicy {
    /// Use the first match and note the ambiguity in the transcript.
    #[default]
    FirstMatch,
    Reject,
}

#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub exchange: ExchangeIdentity,
    /// The real, already translated payload.
    pub payload: PathBuf,
    pub element_name: String,
    /// Reuse this element instead of looking it up by name.
    pub element_id: Option<ElementId>,
    pub unit: String,
    /// Also write a protobuf-wrapped copy of the payload.
    pub emit_intermediate: bool,
    /// Append the transcript to the staging root as JSONL.
    pub persist_transcript: bool,
    pub duplicate_policy: DuplicateNamePolicy,
}

impl PublishRequest {
    pub fn new(exchange: ExchangeIdentity, payload: impl Into<PathBuf>, element_name: impl Into<String>) -> Self {
        Self {
            exchange,
            payload: payload.into(),
            element_name: element_name.into(),
            element_id: None,
            unit: DEFAULT_UNIT.to_string(),
            emit_intermediate: false,
            persist_transcript: false,
            duplicate_policy: DuplicateNamePolicy::default(),
        }
    }

    pub fn with_element_id(mut self, id: impl Into<ElementId>) -> Self {
        self.element_id = Some(id.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_intermediate(mut self, emit: bool) -> Self {
        self.emit_intermediate = emit;
        self
    }

    pub fn with_persisted_transcript(mut self, persist: bool) -> Self {
        self.persist_transcript = persist;
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicateNamePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }
}

/// Result of [`publish_geometry`]. Outputs are default-valued on failure.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PublishOutcome {
    pub element_id: Option<ElementId>,
    pub success: bool,
    pub transcript: Vec<TranscriptEntry>,
    pub intermediate_path: Option<PathBuf>,
    pub transcript_path: Option<PathBuf>,
    pub report: Option<WorkflowReport>,
    #[serde(skip)]
    pub failure_kind: Option<ErrorKind>,
}

impl PublishOutcome {
    pub fn entries_at_least(&self, level: Level) -> Vec<&TranscriptEntry> {
        self.transcript.iter().filter(|e| e.level >= level).collect()
    }

    pub fn has_fatal(&self) -> bool {
        self.transcript.iter().any(|e| e.level == Level::Fatal)
    }
}

/// Publishes through a shared [`Orchestrator`], so concurrent publishes to
/// the same exchange are refused.
#[derive(Clone, Default)]
pub struct Publisher {
    orchestrator: Orchestrator,
}

impl Publisher {
    pub fn new(config: WorkflowConfig) -> Self {
        Self {
            orchestrator: Orchestrator::new(config),
        }
    }

    /// Publisher whose in-flight guard spans the whole process.
    pub fn process_wide(config: WorkflowConfig) -> Self {
        Self {
            orchestrator: Orchestrator::process_wide(config),
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub async fn publish<B>(
        &self,
        backend: &B,
        staging: &StagingArea,
        request: &PublishRequest,
        cancel: &CancellationToken,
    ) -> PublishOutcome
    where
        B: ExchangeBackend + ?Sized,
    {
        let transcript = Transcript::new();
        let mut outcome = PublishOutcome::default();

        match self
            .publish_inner(backend, staging, request, &transcript, &mut outcome, cancel)
            .await
        {
            Ok(()) => outcome.success = true,
            Err(err) => {
                if !transcript.has_fatal() {
                    transcript.push(Level::Fatal, None, err.to_string());
                }
                outcome.failure_kind = Some(err.kind());
                outcome.element_id = None;
                outcome.intermediate_path = None;
            }
        }

        if request.persist_transcript {
            let run_id = Uuid::new_v4().to_string();
            let path = staging.layout().transcript_path(&request.exchange, &run_id);
            match transcript.persist_jsonl(&path) {
                Ok(()) => outcome.transcript_path = Some(path),
                Err(e) => transcript.warning(format!("could not persist transcript: {}", e)),
            }
        }

        info!(
            exchange = %request.exchange,
            success = outcome.success,
            entries = transcript.len(),
            "publish finished"
        );
        outcome.transcript = transcript.entries();
        outcome
    }

    async fn publish_inner<B>(
        &self,
        backend: &B,
        staging: &StagingArea,
        request: &PublishRequest,
        transcript: &Transcript,
        outcome: &mut PublishOutcome,
        cancel: &CancellationToken,
    ) -> BridgeResult<()>
    where
        B: ExchangeBackend + ?Sized,
    {
        let exchange = &request.exchange;
        validate(request)?;

        let element = match &request.element_id {
            Some(id) => {
                transcript.info(format!("using element {}", id));
                id.clone()
            }
            None => self.find_or_create_element(backend, request, transcript, cancel).await?,
        };
        outcome.element_id = Some(element.clone());

        let descriptor = GeometryDescriptor::brep(GeometryFormat::from_path(&request.payload));
        let asset = backend
            .create_geometry_asset(exchange, &element, &descriptor, cancel)
            .await?;
        transcript.info(format!(
            "created {} geometry asset {} under element {}",
            descriptor.format, asset.id, element
        ));

        if request.emit_intermediate {
            match staging.emit_intermediate(exchange, &asset.id, &request.payload) {
                Ok(path) => {
                    transcript.info(format!("wrote intermediate {}", path.display()));
                    outcome.intermediate_path = Some(path);
                }
                Err(e) => transcript.warning(format!("could not write intermediate: {}", e)),
            }
        }

        let mut upload = staging.upload(backend, exchange, cancel);
        let staged = upload.stage(&asset.id, &request.payload).await?;
        transcript.info(format!(
            "staged carrier {} for {}",
            staged.carrier.display(),
            staged.payload.display()
        ));

        match self
            .orchestrator
            .run(backend, staging, exchange, transcript, cancel)
            .await
        {
            Ok(report) => outcome.report = Some(report),
            Err(failure) => {
                let WorkflowFailure { cause, report, .. } = failure;
                outcome.report = Some(report);
                return Err(cause);
            }
        }

        match backend.asset_record(exchange, &asset.id, cancel).await {
            Ok(Some(record)) if record.is_renderable() => {
                transcript.info(format!("geometry asset {} is renderable", asset.id))
            }
            Ok(Some(_)) => transcript.warning(format!(
                "geometry asset {} has no binary reference after upload",
                asset.id
            )),
            Ok(None) => transcript.warning(format!("geometry asset {} not found after upload", asset.id)),
            Err(e) => transcript.warning(format!("could not read back asset {}: {}", asset.id, e)),
        }
        Ok(())
    }

    async fn find_or_create_element<B>(
        &self,
        backend: &B,
        request: &PublishRequest,
        transcript: &Transcript,
        cancel: &CancellationToken,
    ) -> BridgeResult<ElementId>
    where
        B: ExchangeBackend + ?Sized,
    {
        let name = &request.element_name;
        let mut matches = backend
            .find_elements_by_name(&request.exchange, name, cancel)
            .await?;
        match matches.len() {
            0 => {
                let created = backend
                    .create_element(&request.exchange, name, &request.unit, cancel)
                    .await?;
                transcript.info(format!("created element {} ({})", created.name, created.id));
                Ok(created.id)
            }
            1 => {
                let found = matches.remove(0);
                transcript.info(format!("reusing element {} ({})", found.name, found.id));
                Ok(found.id)
            }
            n => match request.duplicate_policy {
                DuplicateNamePolicy::FirstMatch => {
                    let first = matches.remove(0);
                    transcript.warning(format!(
                        "{} elements are named {:?}; using the first ({})",
                        n, name, first.id
                    ));
                    Ok(first.id)
                }
                DuplicateNamePolicy::Reject => Err(BridgeError::workflow(format!(
                    "{} elements are named {:?}",
                    n, name
                ))),
            },
        }
    }
}

fn validate(request: &PublishRequest) -> BridgeResult<()> {
    let missing = request.exchange.missing_components();
    if !missing.is_empty() {
        return Err(BridgeError::contract(format!(
            "exchange identity is missing {}",
            missing.join(", ")
        )));
    }
    if !request.payload.is_file() {
        return Err(BridgeError::contract(format!(
            "payload does not exist: {}",
            request.payload.display()
        )));
    }
    if request.element_id.is_none() && request.element_name.trim().is_empty() {
        return Err(BridgeError::contract("either an element id or an element name is required"));
    }
    Ok(())
}

/// Publish `request.payload` with a [`Publisher`] configured from the
/// environment. Calls share one in-flight registry, so a second publish to an
/// exchange that is still running is refused.
pub async fn publish_geometry<B>(
    backend: &B,
    staging: &StagingArea,
    request: &PublishRequest,
    cancel: &CancellationToken,
) -> PublishOutcome
where
    B: ExchangeBackend + ?Sized,
{
    Publisher::process_wide(WorkflowConfig::from_env())
        .publish(backend, staging, request, cancel)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, RecordingBackend};
    use exchange_staging::StagingConfig;
    use exchange_types::AssetId;

    fn exchange() -> ExchangeIdentity {
        ExchangeIdentity::new("ex-1", "col-1", "hub-1")
    }

    fn setup(dir: &std::path::Path) -> (StagingArea, PathBuf) {
        let staging = StagingArea::open(StagingConfig::new(dir.join("stage"))).unwrap();
        let payload = dir.join("part.bin");
        std::fs::write(&payload, vec![7u8; 256]).unwrap();
        (staging, payload)
    }

    #[tokio::test]
    async fn test_publish_creates_element_and_completes() {
        let dir = tempfile::tempdir().unwrap();
        let (staging, payload) = setup(dir.path());
        let backend = RecordingBackend::new();
        let request = PublishRequest::new(exchange(), &payload, "Bracket");

        let outcome = Publisher::default()
            .publish(&backend, &staging, &request, &CancellationToken::new())
            .await;

        assert!(outcome.success, "{:?}", outcome.transcript);
        assert_eq!(backend.elements().len(), 1);
        assert_eq!(outcome.element_id, Some(backend.elements()[0].id.clone()));
        assert!(outcome.entries_at_least(Level::Warning).is_empty());
    }

    #[tokio::test]
    async fn test_published_geometry_hangs_under_the_element_design() {
        let dir = tempfile::tempdir().unwrap();
        let (staging, payload) = setup(dir.path());
        let backend = RecordingBackend::new();
        let request = PublishRequest::new(exchange(), &payload, "Bracket");

        let outcome = Publisher::default()
            .publish(&backend, &staging, &request, &CancellationToken::new())
            .await;
        assert!(outcome.success, "{:?}", outcome.transcript);

        let graph = backend.graph();
        let root = graph.root().unwrap().id.clone();
        let leaves = graph.geometry_leaves(&root);
        assert_eq!(leaves.len(), 1);
        let design = AssetId::new(format!("design-{}", outcome.element_id.unwrap()));
        assert_eq!(leaves[0].parents, vec![design]);
        assert_eq!(leaves[0].binary_ref.as_ref().map(|r| r.len()), Some(256));
        assert!(graph.unrenderable().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_names_first_match_warns() {
        let dir = tempfile::tempdir().unwrap();
        let (staging, payload) = setup(dir.path());
        let backend = RecordingBackend::new()
            .with_element("el-a", "Bracket")
            .with_element("el-b", "Bracket");
        let request = PublishRequest::new(exchange(), &payload, "Bracket");

        let outcome = Publisher::default()
            .publish(&backend, &staging, &request, &CancellationToken::new())
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.element_id, Some(ElementId::new("el-a")));
        assert_eq!(outcome.entries_at_least(Level::Warning).len(), 1);
        assert_eq!(backend.count(|c| matches!(c, Call::CreateElement(_))), 0);
    }

    #[tokio::test]
    async fn test_duplicate_names_reject() {
        let dir = tempfile::tempdir().unwrap();
        let (staging, payload) = setup(dir.path());
        let backend = RecordingBackend::new()
            .with_element("el-a", "Bracket")
            .with_element("el-b", "Bracket");
        let request = PublishRequest::new(exchange(), &payload, "Bracket")
            .with_duplicate_policy(DuplicateNamePolicy::Reject);

        let outcome = Publisher::default()
            .publish(&backend, &staging, &request, &CancellationToken::new())
            .await;

        assert!(!outcome.success);
        assert!(outcome.has_fatal());
        assert_eq!(outcome.element_id, None);
        assert_eq!(backend.count(|c| matches!(c, Call::Open(_))), 0);
    }

    #[tokio::test]
    async fn test_missing_payload_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let (staging, _) = setup(dir.path());
        let backend = RecordingBackend::new();
        let request = PublishRequest::new(exchange(), dir.path().join("nope.bin"), "Bracket");

        let outcome = Publisher::default()
            .publish(&backend, &staging, &request, &CancellationToken::new())
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.failure_kind, Some(ErrorKind::ContractViolation));
        assert!(outcome.transcript[0].message.contains("nope.bin"));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_intermediate_and_transcript_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let (staging, payload) = setup(dir.path());
        let backend = RecordingBackend::new().with_element("el-1", "Bracket");
        let request = PublishRequest::new(exchange(), &payload, "Bracket")
            .with_intermediate(true)
            .with_persisted_transcript(true);

        let outcome = Publisher::default()
            .publish(&backend, &staging, &request, &CancellationToken::new())
            .await;

        assert!(outcome.success);
        let intermediate = outcome.intermediate_path.expect("intermediate written");
        assert_eq!(
            exchange_staging::unwrap_envelope_file(&intermediate).unwrap(),
            vec![7u8; 256]
        );
        let persisted = std::fs::read_to_string(outcome.transcript_path.unwrap()).unwrap();
        assert_eq!(persisted.lines().count(), outcome.transcript.len());
    }

    #[tokio::test]
    async fn test_missing_binary_reference_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let (staging, payload) = setup(dir.path());
        let backend = RecordingBackend::new().without_binary_refs();
        let request = PublishRequest::new(exchange(), &payload, "Bracket");

        let outcome = Publisher::default()
            .publish(&backend, &staging, &request, &CancellationToken::new())
            .await;

        assert!(outcome.success);
        let warnings = outcome.entries_at_least(Level::Warning);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("no binary reference"));
    }

    #[tokio::test]
    async fn test_failed_publish_leaves_outputs_unset() {
        let dir = tempfile::tempdir().unwrap();
        let (staging, payload) = setup(dir.path());
        let backend = RecordingBackend::new().fail_at(crate::FulfillmentState::GeometriesUploaded);
        let request = PublishRequest::new(exchange(), &payload, "Bracket").with_intermediate(true);

        let outcome = Publisher::default()
            .publish(&backend, &staging, &request, &CancellationToken::new())
            .await;

        assert!(!outcome.success);
        assert_eq!(backend.elements().len(), 1);
        assert_eq!(outcome.element_id, None);
        assert_eq!(outcome.intermediate_path, None);
        assert!(outcome.report.is_some());
        assert!(outcome.has_fatal());
    }

    #[tokio::test]
    async fn test_publish_geometry_refuses_a_concurrent_publish_to_the_same_exchange() {
        let dir = tempfile::tempdir().unwrap();
        let (staging, payload) = setup(dir.path());
        // One pending poll keeps the first run in flight across a poll interval.
        let backend = RecordingBackend::new().polls_before_completion(1);
        let exchange = ExchangeIdentity::new("ex-concurrent", "col-1", "hub-1");
        let request = PublishRequest::new(exchange, &payload, "Bracket");
        let cancel = CancellationToken::new();

        let (first, second) = tokio::join!(
            publish_geometry(&backend, &staging, &request, &cancel),
            publish_geometry(&backend, &staging, &request, &cancel),
        );

        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|o| o.success).count(), 1);
        let refused = outcomes.iter().find(|o| !o.success).unwrap();
        assert_eq!(refused.failure_kind, Some(ErrorKind::WorkflowFailure));
        assert_eq!(refused.element_id, None);
        assert!(refused
            .entries_at_least(Level::Fatal)
            .iter()
            .any(|e| e.message.contains("already in flight")));
        assert_eq!(backend.count(|c| matches!(c, Call::Open(_))), 1);
        assert_eq!(backend.discards(), 0);
    }
}
