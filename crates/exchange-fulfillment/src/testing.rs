//! A scriptable in-memory [`ExchangeBackend`] for workflow tests.
//!
//! Every call is recorded. Failures can be injected per phase, optional
//! capabilities can be switched off, and the remote status can be made to
//! report `InProgress` for a number of polls before completing.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use exchange_bridge::{BackendFault, BridgeError, BridgeResult};
use exchange_staging::{InMemoryTranslationTable, ResolvedDescriptor, TranslationEntry, TranslationTable};
use exchange_types::{
    AssetGraph, AssetId, AssetKind, AssetRecord, BinaryReference, ElementId, ExchangeIdentity,
    FulfillmentId, GeometryDescriptor, GraphError, RevisionId,
};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backend::{
    ElementInfo, ExchangeBackend, FulfillmentStatus, PhaseOutcome, SyncBatch, SyncMetadata,
    SyncRequest,
};
use crate::state::{ExecutionOrder, FulfillmentSession, FulfillmentState};

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open(ExecutionOrder),
    RenderStyles,
    Upload(Vec<ResolvedDescriptor>),
    UploadCustom,
    UploadLargePrimitives,
    SyncMetadata,
    BuildSync,
    Split,
    SyncBatch(usize),
    ProcessGeometry,
    Finish,
    Poll,
    Discard(FulfillmentId),
    CompleteLocal,
    Viewable,
    FindElements(String),
    CreateElement(String),
    CreateGeometryAsset(ElementId),
    AssetRecord(AssetId),
}

/// Failure raised by an injected phase: an SDK fault, already unwrapped.
pub fn injected_fault(state: FulfillmentState) -> BridgeError {
    BridgeError::Invocation {
        owner: "RecordingBackend".to_string(),
        member: state.to_string(),
        fault: BackendFault::new("HttpRequestException", format!("injected failure at {}", state)),
    }
}

const ROOT_ASSET: &str = "root";

fn root_graph() -> AssetGraph {
    let mut graph = AssetGraph::new();
    graph.upsert(AssetRecord::new(ROOT_ASSET, AssetKind::Root));
    graph
}

/// Instance and design nodes for `element`, created on first use.
fn element_design(graph: &mut AssetGraph, element: &ElementId) -> Result<AssetId, GraphError> {
    let instance = AssetId::new(format!("inst-{}", element));
    let design = AssetId::new(format!("design-{}", element));
    if !graph.contains(&design) {
        graph.insert(AssetRecord::new(instance.clone(), AssetKind::Instance))?;
        graph.insert(AssetRecord::new(design.clone(), AssetKind::Design))?;
        graph.link(&AssetId::new(ROOT_ASSET), &instance)?;
        graph.link(&instance, &design)?;
    }
    Ok(design)
}

fn graph_fault(err: GraphError) -> BridgeError {
    BridgeError::contract(err.to_string())
}

pub struct RecordingBackend {
    table: InMemoryTranslationTable,
    calls: Mutex<Vec<Call>>,
    failures: Mutex<HashMap<FulfillmentState, BridgeError>>,
    unsupported: Mutex<HashSet<FulfillmentState>>,
    polls_before_completion: AtomicUsize,
    remote_failure: Mutex<Option<String>>,
    batch_size: usize,
    discard_fails: bool,
    write_binary_refs: bool,
    uploaded: AtomicUsize,
    elements: Mutex<Vec<ElementInfo>>,
    assets: Mutex<AssetGraph>,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            table: InMemoryTranslationTable::new(),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            unsupported: Mutex::new(HashSet::new()),
            polls_before_completion: AtomicUsize::new(0),
            remote_failure: Mutex::new(None),
            batch_size: 100,
            discard_fails: false,
            write_binary_refs: true,
            uploaded: AtomicUsize::new(0),
            elements: Mutex::new(Vec::new()),
            assets: Mutex::new(root_graph()),
        }
    }

    // ==================== Scripting ====================

    /// Fail the call that drives `state` with an SDK fault.
    pub fn fail_at(self, state: FulfillmentState) -> Self {
        self.fail_at_with(state, injected_fault(state))
    }

    pub fn fail_at_with(self, state: FulfillmentState, error: BridgeError) -> Self {
        self.failures.lock().insert(state, error);
        self
    }

    /// Report the optional capability behind `state` as absent.
    pub fn unsupported(self, state: FulfillmentState) -> Self {
        self.unsupported.lock().insert(state);
        self
    }

    pub fn polls_before_completion(self, polls: usize) -> Self {
        self.polls_before_completion.store(polls, Ordering::SeqCst);
        self
    }

    /// Poll status reports `Failed(reason)`.
    pub fn remote_failure(self, reason: &str) -> Self {
        *self.remote_failure.lock() = Some(reason.to_string());
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn discard_fails(mut self) -> Self {
        self.discard_fails = true;
        self
    }

    /// Uploads succeed but leave binary references unset.
    pub fn without_binary_refs(mut self) -> Self {
        self.write_binary_refs = false;
        self
    }

    /// Pre-existing element.
    pub fn with_element(self, id: &str, name: &str) -> Self {
        self.elements.lock().push(ElementInfo {
            id: ElementId::new(id),
            name: name.to_string(),
        });
        self
    }

    // ==================== Inspection ====================

    pub fn table(&self) -> &InMemoryTranslationTable {
        &self.table
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    pub fn discards(&self) -> usize {
        self.count(|c| matches!(c, Call::Discard(_)))
    }

    pub fn uploads(&self) -> Vec<Vec<ResolvedDescriptor>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::Upload(descriptors) => Some(descriptors.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn elements(&self) -> Vec<ElementInfo> {
        self.elements.lock().clone()
    }

    pub fn asset(&self, id: &AssetId) -> Option<AssetRecord> {
        self.assets.lock().get(id).cloned()
    }

    /// Snapshot of the remote asset graph.
    pub fn graph(&self) -> AssetGraph {
        self.assets.lock().clone()
    }

    // ==================== Helpers ====================

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn check(&self, state: FulfillmentState) -> BridgeResult<()> {
        match self.failures.lock().get(&state) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn optional(&self, state: FulfillmentState) -> BridgeResult<PhaseOutcome> {
        self.check(state)?;
        if self.unsupported.lock().contains(&state) {
            return Ok(PhaseOutcome::Unsupported);
        }
        Ok(PhaseOutcome::Done)
    }

    fn live(cancel: &CancellationToken, during: &str) -> BridgeResult<()> {
        if cancel.is_cancelled() {
            return Err(BridgeError::cancelled(during));
        }
        Ok(())
    }
}

#[async_trait]
impl TranslationTable for RecordingBackend {
    async fn register_pending(
        &self,
        exchange: &ExchangeIdentity,
        entry: TranslationEntry,
        cancel: &CancellationToken,
    ) -> BridgeResult<()> {
        self.table.register_pending(exchange, entry, cancel).await
    }

    async fn pending_entries(
        &self,
        exchange: &ExchangeIdentity,
        cancel: &CancellationToken,
    ) -> BridgeResult<Vec<TranslationEntry>> {
        self.check(FulfillmentState::AssetsResolved)?;
        self.table.pending_entries(exchange, cancel).await
    }
}

#[async_trait]
impl ExchangeBackend for RecordingBackend {
    async fn open_fulfillment(
        &self,
        _exchange: &ExchangeIdentity,
        order: ExecutionOrder,
        cancel: &CancellationToken,
    ) -> BridgeResult<FulfillmentId> {
        Self::live(cancel, "open")?;
        self.record(Call::Open(order));
        self.check(FulfillmentState::Started)?;
        Ok(FulfillmentId::new(Uuid::new_v4().to_string()))
    }

    async fn process_render_styles(
        &self,
        _session: &FulfillmentSession,
        _cancel: &CancellationToken,
    ) -> BridgeResult<PhaseOutcome> {
        self.record(Call::RenderStyles);
        self.optional(FulfillmentState::StylesProcessed)
    }

    async fn upload_geometries(
        &self,
        session: &FulfillmentSession,
        descriptors: &[ResolvedDescriptor],
        cancel: &CancellationToken,
    ) -> BridgeResult<()> {
        Self::live(cancel, "upload")?;
        self.record(Call::Upload(descriptors.to_vec()));
        self.check(FulfillmentState::GeometriesUploaded)?;

        let blob = format!("blob-{}", session.fulfillment_str());
        let mut offset = 0u64;
        for descriptor in descriptors {
            let len = std::fs::metadata(&descriptor.output_path)
                .map(|m| m.len())
                .map_err(|e| BridgeError::Io {
                    message: format!("{}: {}", descriptor.output_path.display(), e),
                })?;
            if self.write_binary_refs {
                if let Some(asset) = self.assets.lock().get_mut(&descriptor.asset_id) {
                    asset.binary_ref = Some(BinaryReference::new(&blob, offset, offset + len));
                    asset.geometry = Some(descriptor.geometry.clone());
                }
            }
            offset += len;
            self.table
                .register_pending(&session.exchange, descriptor.to_entry(), cancel)
                .await?;
        }
        self.uploaded.fetch_add(descriptors.len(), Ordering::SeqCst);
        Ok(())
    }

    async fn upload_custom_geometries(
        &self,
        _session: &FulfillmentSession,
        _cancel: &CancellationToken,
    ) -> BridgeResult<PhaseOutcome> {
        self.record(Call::UploadCustom);
        self.optional(FulfillmentState::CustomUploaded)
    }

    async fn upload_large_primitives(
        &self,
        _session: &FulfillmentSession,
        _cancel: &CancellationToken,
    ) -> BridgeResult<PhaseOutcome> {
        self.record(Call::UploadLargePrimitives);
        self.optional(FulfillmentState::LargePrimitivesUploaded)
    }

    async fn sync_metadata(
        &self,
        _session: &FulfillmentSession,
        _cancel: &CancellationToken,
    ) -> BridgeResult<SyncMetadata> {
        self.record(Call::SyncMetadata);
        self.check(FulfillmentState::SyncBuilt)?;
        Ok(SyncMetadata {
            schema_namespace: "exchange.test".to_string(),
        })
    }

    async fn build_sync_request(
        &self,
        _session: &FulfillmentSession,
        metadata: &SyncMetadata,
        _cancel: &CancellationToken,
    ) -> BridgeResult<SyncRequest> {
        self.record(Call::BuildSync);
        Ok(SyncRequest {
            schema_namespace: metadata.schema_namespace.clone(),
            asset_count: self.uploaded.load(Ordering::SeqCst),
            handle: None,
        })
    }

    async fn split_sync_request(
        &self,
        _session: &FulfillmentSession,
        request: &SyncRequest,
        _cancel: &CancellationToken,
    ) -> BridgeResult<Vec<SyncBatch>> {
        self.record(Call::Split);
        self.check(FulfillmentState::Batched)?;
        let mut batches = Vec::new();
        let mut remaining = request.asset_count;
        while remaining > 0 {
            let take = remaining.min(self.batch_size);
            batches.push(SyncBatch {
                index: batches.len(),
                asset_count: take,
                handle: None,
            });
            remaining -= take;
        }
        Ok(batches)
    }

    async fn sync_batch(
        &self,
        _session: &FulfillmentSession,
        batch: &SyncBatch,
        cancel: &CancellationToken,
    ) -> BridgeResult<()> {
        Self::live(cancel, "sync batch")?;
        self.record(Call::SyncBatch(batch.index));
        tokio::task::yield_now().await;
        self.check(FulfillmentState::Acknowledged)
    }

    async fn process_geometry(
        &self,
        _session: &FulfillmentSession,
        _request: &SyncRequest,
        _cancel: &CancellationToken,
    ) -> BridgeResult<()> {
        self.record(Call::ProcessGeometry);
        Ok(())
    }

    async fn finish_fulfillment(
        &self,
        _session: &FulfillmentSession,
        _cancel: &CancellationToken,
    ) -> BridgeResult<()> {
        self.record(Call::Finish);
        self.check(FulfillmentState::Finished)
    }

    async fn poll_status(
        &self,
        _session: &FulfillmentSession,
        cancel: &CancellationToken,
    ) -> BridgeResult<FulfillmentStatus> {
        Self::live(cancel, "poll")?;
        self.record(Call::Poll);
        self.check(FulfillmentState::Polled)?;
        if let Some(reason) = self.remote_failure.lock().clone() {
            return Ok(FulfillmentStatus::Failed(reason));
        }
        let remaining = self.polls_before_completion.load(Ordering::SeqCst);
        if remaining > 0 {
            self.polls_before_completion.store(remaining - 1, Ordering::SeqCst);
            return Ok(FulfillmentStatus::InProgress);
        }
        Ok(FulfillmentStatus::Completed)
    }

    async fn discard_fulfillment(
        &self,
        _exchange: &ExchangeIdentity,
        fulfillment_id: &FulfillmentId,
        _cancel: &CancellationToken,
    ) -> BridgeResult<()> {
        self.record(Call::Discard(fulfillment_id.clone()));
        if self.discard_fails {
            return Err(injected_fault(FulfillmentState::Discarding));
        }
        Ok(())
    }

    /// Clears the exchange's pending translations, like the SDK does once a
    /// fulfillment is committed.
    async fn complete_local(
        &self,
        session: &FulfillmentSession,
        _cancel: &CancellationToken,
    ) -> BridgeResult<RevisionId> {
        self.record(Call::CompleteLocal);
        self.check(FulfillmentState::Completed)?;
        self.table.clear(&session.exchange);
        Ok(RevisionId::new(Uuid::new_v4().to_string()))
    }

    async fn request_viewable(
        &self,
        _session: &FulfillmentSession,
        _cancel: &CancellationToken,
    ) -> BridgeResult<PhaseOutcome> {
        self.record(Call::Viewable);
        Ok(PhaseOutcome::Done)
    }

    async fn find_elements_by_name(
        &self,
        _exchange: &ExchangeIdentity,
        name: &str,
        _cancel: &CancellationToken,
    ) -> BridgeResult<Vec<ElementInfo>> {
        self.record(Call::FindElements(name.to_string()));
        Ok(self
            .elements
            .lock()
            .iter()
            .filter(|e| e.name == name)
            .cloned()
            .collect())
    }

    async fn create_element(
        &self,
        _exchange: &ExchangeIdentity,
        name: &str,
        _unit: &str,
        _cancel: &CancellationToken,
    ) -> BridgeResult<ElementInfo> {
        self.record(Call::CreateElement(name.to_string()));
        let element = ElementInfo {
            id: ElementId::new(format!("el-{}", Uuid::new_v4().simple())),
            name: name.to_string(),
        };
        self.elements.lock().push(element.clone());
        Ok(element)
    }

    async fn create_geometry_asset(
        &self,
        _exchange: &ExchangeIdentity,
        element: &ElementId,
        descriptor: &GeometryDescriptor,
        _cancel: &CancellationToken,
    ) -> BridgeResult<AssetRecord> {
        self.record(Call::CreateGeometryAsset(element.clone()));
        if !self.elements.lock().iter().any(|e| &e.id == element) {
            return Err(BridgeError::not_found("Element", element.to_string()));
        }
        let mut graph = self.assets.lock();
        let design = element_design(&mut graph, element).map_err(graph_fault)?;
        let geometry = AssetId::new(format!("geo-{}", Uuid::new_v4().simple()));
        graph
            .insert(AssetRecord::geometry(geometry.clone(), descriptor.clone()))
            .map_err(graph_fault)?;
        graph.link(&design, &geometry).map_err(graph_fault)?;
        graph
            .get(&geometry)
            .cloned()
            .ok_or_else(|| BridgeError::not_found("Asset", geometry.to_string()))
    }

    async fn asset_record(
        &self,
        _exchange: &ExchangeIdentity,
        asset: &AssetId,
        _cancel: &CancellationToken,
    ) -> BridgeResult<Option<AssetRecord>> {
        self.record(Call::AssetRecord(asset.clone()));
        Ok(self.assets.lock().get(asset).cloned())
    }
}
