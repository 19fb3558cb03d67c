//! Fulfillment workflow orchestration.
//!
//! Drives one upload through the fulfillment state machine against an
//! [`ExchangeBackend`]. Phases run in order; only the sync batches run
//! concurrently. Failure handling is partitioned by phase:
//!
//! - fatal phases abort the run; once a fulfillment is open it is discarded
//!   exactly once and the original error is returned;
//! - best-effort phases log the failure and continue, except for NotFound,
//!   ContractViolation and cancellation, which always abort.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use exchange_bridge::{BridgeError, BridgeResult, ErrorKind};
use exchange_staging::StagingArea;
use exchange_types::env_utils::env_bool_or;
use exchange_types::{ExchangeId, ExchangeIdentity, FulfillmentId, PollPolicy, RevisionId};
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::backend::{ExchangeBackend, FulfillmentStatus, PhaseOutcome};
use crate::state::{ExecutionOrder, FulfillmentSession, FulfillmentState, TerminalOutcome};
use crate::transcript::{Level, Transcript};

// ==================== Configuration ====================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowConfig {
    pub poll: PollPolicy,
    pub execution_order: ExecutionOrder,
    /// Ask for a viewable after completion.
    pub request_viewable: bool,
}

impl WorkflowConfig {
    /// Poll policy from the environment plus `EXCHANGE_REQUEST_VIEWABLE`.
    pub fn from_env() -> Self {
        Self {
            poll: PollPolicy::from_env(),
            execution_order: ExecutionOrder::InsertFirst,
            request_viewable: env_bool_or("EXCHANGE_REQUEST_VIEWABLE", true),
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            poll: PollPolicy::default(),
            execution_order: ExecutionOrder::InsertFirst,
            request_viewable: true,
        }
    }
}

// ==================== Report & failure ====================

#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    pub state: FulfillmentState,
    pub at: DateTime<Utc>,
    /// Milliseconds since the run started.
    pub elapsed_ms: u128,
}

/// What happened during one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkflowReport {
    pub fulfillment_id: Option<FulfillmentId>,
    pub transitions: Vec<Transition>,
    pub survivor_count: usize,
    pub dropped_count: usize,
    pub batch_count: usize,
    pub poll_attempts: usize,
    /// Best-effort phases that did not do their work.
    pub skipped: Vec<FulfillmentState>,
    pub revision: Option<RevisionId>,
    pub outcome: Option<TerminalOutcome>,
}

impl WorkflowReport {
    pub fn final_state(&self) -> Option<FulfillmentState> {
        self.transitions.last().map(|t| t.state)
    }

    pub fn visited(&self, state: FulfillmentState) -> bool {
        self.transitions.iter().any(|t| t.state == state)
    }
}

/// A run that did not complete.
#[derive(Debug)]
pub struct WorkflowFailure {
    /// Phase that was being attempted.
    pub state: FulfillmentState,
    pub cause: BridgeError,
    /// Whether the open fulfillment was successfully discarded.
    pub discarded: bool,
    pub report: WorkflowReport,
}

impl WorkflowFailure {
    pub fn kind(&self) -> ErrorKind {
        self.cause.kind()
    }
}

impl fmt::Display for WorkflowFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.state, self.cause)?;
        if self.discarded {
            f.write_str(" (fulfillment discarded)")?;
        }
        Ok(())
    }
}

impl std::error::Error for WorkflowFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

// ==================== In-flight guard ====================

type InFlight = Arc<Mutex<HashSet<ExchangeId>>>;

/// Marks an exchange busy until dropped.
struct InFlightGuard {
    registry: InFlight,
    exchange_id: ExchangeId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.exchange_id);
    }
}

// ==================== Run state ====================

struct Run<'t> {
    session: FulfillmentSession,
    report: WorkflowReport,
    transcript: &'t Transcript,
    started: Instant,
    attempting: FulfillmentState,
    discard_attempted: bool,
}

impl<'t> Run<'t> {
    fn new(exchange: &ExchangeIdentity, transcript: &'t Transcript) -> Self {
        let mut run = Self {
            session: FulfillmentSession::new(exchange.clone()),
            report: WorkflowReport::default(),
            transcript,
            started: Instant::now(),
            attempting: FulfillmentState::Created,
            discard_attempted: false,
        };
        run.record(FulfillmentState::Created);
        run
    }

    fn record(&mut self, state: FulfillmentState) {
        self.session.state = state;
        self.report.transitions.push(Transition {
            state,
            at: Utc::now(),
            elapsed_ms: self.started.elapsed().as_millis(),
        });
    }

    /// Begin a phase; fails if the run was cancelled.
    fn attempt(&mut self, state: FulfillmentState, cancel: &CancellationToken) -> BridgeResult<()> {
        self.attempting = state;
        if cancel.is_cancelled() {
            return Err(BridgeError::cancelled(state.to_string()));
        }
        Ok(())
    }

    fn enter(&mut self, state: FulfillmentState, message: impl Into<String>) {
        debug!(from = %self.session.state, to = %state, "fulfillment transition");
        self.record(state);
        self.transcript.push(Level::Info, Some(state), message);
    }

    /// Settle a best-effort phase. Surfacing errors are returned; anything
    /// else is logged and the phase counts as skipped.
    fn best_effort(
        &mut self,
        state: FulfillmentState,
        what: &str,
        result: BridgeResult<PhaseOutcome>,
    ) -> BridgeResult<()> {
        match result {
            Ok(PhaseOutcome::Done) => self.enter(state, format!("{} done", what)),
            Ok(PhaseOutcome::Unsupported) => {
                self.report.skipped.push(state);
                self.enter(state, format!("{}: feature not present", what));
            }
            Err(err) if err.must_surface() || err.kind() == ErrorKind::Cancelled => return Err(err),
            Err(err) => {
                self.report.skipped.push(state);
                self.transcript.push(
                    Level::Warning,
                    Some(state),
                    format!("{} failed, continuing: {}", what, err),
                );
                self.record(state);
            }
        }
        Ok(())
    }

    fn fulfillment_label(&self) -> String {
        self.session
            .fulfillment_id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "<none>".to_string())
    }

    fn fail(mut self, cause: BridgeError, discarded: bool) -> WorkflowFailure {
        let state = self.attempting;
        self.transcript.push(
            Level::Fatal,
            Some(state),
            format!("{} failed: {}", state, cause),
        );
        let outcome = if discarded {
            TerminalOutcome::Discarded
        } else {
            TerminalOutcome::Failed
        };
        self.session.outcome = Some(outcome);
        self.report.outcome = Some(outcome);
        self.report.fulfillment_id = self.session.fulfillment_id.clone();
        WorkflowFailure {
            state,
            cause,
            discarded,
            report: self.report,
        }
    }
}

// ==================== Orchestrator ====================

static PROCESS_IN_FLIGHT: OnceLock<InFlight> = OnceLock::new();

/// Runs fulfillment workflows. Clones share the in-flight registry.
#[derive(Clone)]
pub struct Orchestrator {
    config: WorkflowConfig,
    in_flight: InFlight,
}

impl Orchestrator {
    pub fn new(config: WorkflowConfig) -> Self {
        Self {
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Like [`Orchestrator::new`], but every orchestrator built this way
    /// shares one registry for the whole process.
    pub fn process_wide(config: WorkflowConfig) -> Self {
        Self {
            config,
            in_flight: PROCESS_IN_FLIGHT.get_or_init(InFlight::default).clone(),
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn is_in_flight(&self, exchange_id: &ExchangeId) -> bool {
        self.in_flight.lock().contains(exchange_id)
    }

    fn acquire(&self, exchange_id: &ExchangeId) -> Option<InFlightGuard> {
        let mut registry = self.in_flight.lock();
        if !registry.insert(exchange_id.clone()) {
            return None;
        }
        Some(InFlightGuard {
            registry: self.in_flight.clone(),
            exchange_id: exchange_id.clone(),
        })
    }

    /// Run one fulfillment for everything staged against `exchange`.
    pub async fn run<B>(
        &self,
        backend: &B,
        staging: &StagingArea,
        exchange: &ExchangeIdentity,
        transcript: &Transcript,
        cancel: &CancellationToken,
    ) -> Result<WorkflowReport, WorkflowFailure>
    where
        B: ExchangeBackend + ?Sized,
    {
        let mut run = Run::new(exchange, transcript);

        let Some(_guard) = self.acquire(&exchange.exchange_id) else {
            return Err(run.fail(
                BridgeError::workflow(format!(
                    "a fulfillment is already in flight for exchange {}",
                    exchange.exchange_id
                )),
                false,
            ));
        };
        let missing = exchange.missing_components();
        if !missing.is_empty() {
            return Err(run.fail(
                BridgeError::contract(format!(
                    "exchange identity is missing {}",
                    missing.join(", ")
                )),
                false,
            ));
        }

        // Started: fatal, nothing to roll back yet.
        if let Err(err) = self.start(backend, &mut run, cancel).await {
            return Err(run.fail(err, false));
        }

        match self.drive(backend, staging, &mut run, cancel).await {
            Ok(()) => {
                run.session.outcome = Some(TerminalOutcome::Completed);
                run.report.outcome = Some(TerminalOutcome::Completed);
                run.report.fulfillment_id = run.session.fulfillment_id.clone();
                info!(
                    exchange = %exchange,
                    fulfillment = %run.fulfillment_label(),
                    elapsed_ms = run.started.elapsed().as_millis() as u64,
                    "fulfillment completed"
                );
                Ok(run.report)
            }
            Err(err) => {
                let discarded = self.rollback(backend, &mut run, &err).await;
                Err(run.fail(err, discarded))
            }
        }
    }

    async fn start<B>(&self, backend: &B, run: &mut Run<'_>, cancel: &CancellationToken) -> BridgeResult<()>
    where
        B: ExchangeBackend + ?Sized,
    {
        run.attempt(FulfillmentState::Started, cancel)?;
        let id = backend
            .open_fulfillment(&run.session.exchange, self.config.execution_order, cancel)
            .await?;
        if id.is_empty() {
            return Err(BridgeError::workflow("service returned an empty fulfillment id"));
        }
        run.session.fulfillment_id = Some(id.clone());
        run.report.fulfillment_id = Some(id.clone());
        run.enter(
            FulfillmentState::Started,
            format!(
                "opened fulfillment {} ({})",
                id, self.config.execution_order
            ),
        );
        Ok(())
    }

    async fn drive<B>(
        &self,
        backend: &B,
        staging: &StagingArea,
        run: &mut Run<'_>,
        cancel: &CancellationToken,
    ) -> BridgeResult<()>
    where
        B: ExchangeBackend + ?Sized,
    {
        use FulfillmentState::*;

        run.attempt(StylesProcessed, cancel)?;
        let styles = backend.process_render_styles(&run.session, cancel).await;
        run.best_effort(StylesProcessed, "render-style processing", styles)?;

        run.attempt(AssetsResolved, cancel)?;
        let survivors = match staging
            .resolve_translated_outputs(backend, &run.session.exchange, cancel)
            .await
        {
            Ok(resolution) => {
                for dropped in &resolution.dropped {
                    run.transcript.push(
                        Level::Warning,
                        Some(AssetsResolved),
                        format!("dropped {} ({:?})", dropped.asset_id, dropped.reason),
                    );
                }
                run.report.survivor_count = resolution.survivors.len();
                run.report.dropped_count = resolution.dropped.len();
                run.enter(
                    AssetsResolved,
                    format!("{} descriptor(s) resolved", resolution.survivors.len()),
                );
                resolution.survivors
            }
            Err(err) if err.must_surface() || err.kind() == ErrorKind::Cancelled => return Err(err),
            Err(err) => {
                run.report.skipped.push(AssetsResolved);
                run.transcript.push(
                    Level::Warning,
                    Some(AssetsResolved),
                    format!("resolving translated outputs failed, continuing: {}", err),
                );
                run.record(AssetsResolved);
                Vec::new()
            }
        };

        run.attempt(GeometriesUploaded, cancel)?;
        backend
            .upload_geometries(&run.session, &survivors, cancel)
            .await?;
        run.enter(
            GeometriesUploaded,
            format!("uploaded {} geometr{}", survivors.len(), if survivors.len() == 1 { "y" } else { "ies" }),
        );

        run.attempt(CustomUploaded, cancel)?;
        let custom = backend.upload_custom_geometries(&run.session, cancel).await;
        run.best_effort(CustomUploaded, "custom geometry upload", custom)?;

        run.attempt(LargePrimitivesUploaded, cancel)?;
        let primitives = backend.upload_large_primitives(&run.session, cancel).await;
        run.best_effort(LargePrimitivesUploaded, "large primitive upload", primitives)?;

        run.attempt(SyncBuilt, cancel)?;
        let metadata = backend.sync_metadata(&run.session, cancel).await?;
        let request = backend
            .build_sync_request(&run.session, &metadata, cancel)
            .await?;
        run.enter(
            SyncBuilt,
            format!("built sync request ({} asset(s), schema {})", request.asset_count, metadata.schema_namespace),
        );

        run.attempt(Batched, cancel)?;
        let batches = backend
            .split_sync_request(&run.session, &request, cancel)
            .await?;
        run.session.pending_batches = batches.len();
        run.report.batch_count = batches.len();
        let snapshot = run.session.clone();
        let mut wait_set: Vec<BoxFuture<'_, BridgeResult<()>>> = batches
            .iter()
            .map(|batch| backend.sync_batch(&snapshot, batch, cancel).boxed())
            .collect();
        wait_set.push(backend.process_geometry(&snapshot, &request, cancel).boxed());
        run.enter(
            Batched,
            format!("issued {} sync batch(es) plus geometry processing", batches.len()),
        );

        run.attempt(Acknowledged, cancel)?;
        try_join_all(wait_set).await?;
        run.session.pending_batches = 0;
        run.enter(Acknowledged, "all sync calls acknowledged");

        run.attempt(Finished, cancel)?;
        backend.finish_fulfillment(&run.session, cancel).await?;
        run.enter(Finished, "fulfillment finished");

        run.attempt(Polled, cancel)?;
        self.poll_until_done(backend, run, cancel).await?;
        run.enter(
            Polled,
            format!("service reported completion after {} poll(s)", run.report.poll_attempts),
        );

        // The service has committed the fulfillment; nothing past this point
        // may discard it, cancellation included.
        run.attempting = Completed;
        let revision = match backend.complete_local(&run.session, cancel).await {
            Ok(revision) => {
                run.session.revision = Some(revision.clone());
                run.report.revision = Some(revision.clone());
                Some(revision)
            }
            Err(err) => {
                run.transcript.push(
                    Level::Warning,
                    Some(Completed),
                    format!(
                        "fulfillment {} is committed but clearing local state failed: {}",
                        run.fulfillment_label(),
                        err
                    ),
                );
                None
            }
        };
        if self.config.request_viewable {
            match backend.request_viewable(&run.session, cancel).await {
                Ok(PhaseOutcome::Done) => run.transcript.push(Level::Info, Some(Completed), "viewable requested"),
                Ok(PhaseOutcome::Unsupported) => {
                    run.transcript.push(Level::Info, Some(Completed), "viewable generation not present")
                }
                Err(err) => run.transcript.push(
                    Level::Warning,
                    Some(Completed),
                    format!("viewable request failed: {}", err),
                ),
            }
        }
        match revision {
            Some(revision) => run.enter(Completed, format!("exchange stamped with revision {}", revision)),
            None => run.enter(Completed, "fulfillment committed without a local revision"),
        }
        Ok(())
    }

    async fn poll_until_done<B>(&self, backend: &B, run: &mut Run<'_>, cancel: &CancellationToken) -> BridgeResult<()>
    where
        B: ExchangeBackend + ?Sized,
    {
        let policy = self.config.poll;
        let started = Instant::now();
        loop {
            run.report.poll_attempts += 1;
            match backend.poll_status(&run.session, cancel).await? {
                FulfillmentStatus::Completed => return Ok(()),
                FulfillmentStatus::Failed(reason) => {
                    return Err(BridgeError::workflow(format!(
                        "fulfillment {} failed on the service: {}",
                        run.fulfillment_label(),
                        reason
                    )))
                }
                FulfillmentStatus::InProgress => {}
            }
            if let Some(deadline) = policy.deadline {
                if started.elapsed() >= deadline {
                    return Err(BridgeError::workflow(format!(
                        "fulfillment {} still in progress after {:?} ({} polls)",
                        run.fulfillment_label(),
                        deadline,
                        run.report.poll_attempts
                    )));
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(BridgeError::cancelled(FulfillmentState::Polled.to_string()));
                }
                _ = tokio::time::sleep(policy.interval) => {}
            }
        }
    }

    /// Discard the open fulfillment. Runs at most once per run and ignores
    /// the caller's cancellation; a failed discard is logged, not raised.
    async fn rollback<B>(&self, backend: &B, run: &mut Run<'_>, cause: &BridgeError) -> bool
    where
        B: ExchangeBackend + ?Sized,
    {
        let Some(id) = run.session.fulfillment_id.clone() else {
            return false;
        };
        if run.discard_attempted {
            return false;
        }
        run.discard_attempted = true;
        run.enter(
            FulfillmentState::Discarding,
            format!("discarding fulfillment {} after: {}", id, cause),
        );
        let detached = CancellationToken::new();
        match backend
            .discard_fulfillment(&run.session.exchange, &id, &detached)
            .await
        {
            Ok(()) => {
                run.enter(FulfillmentState::Discarded, format!("discarded fulfillment {}", id));
                true
            }
            Err(err) => {
                run.transcript.push(
                    Level::Error,
                    Some(FulfillmentState::Discarding),
                    format!("discard of fulfillment {} failed: {}", id, err),
                );
                false
            }
        }
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(WorkflowConfig::default())
    }
}
