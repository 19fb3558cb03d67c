//! The capability surface the workflow drives.
//!
//! The orchestrator never touches the SDK directly: it only sees
//! [`ExchangeBackend`]. [`DynamicExchangeBackend`](crate::DynamicExchangeBackend)
//! implements it over the runtime-resolved SDK; tests use
//! [`RecordingBackend`](crate::testing::RecordingBackend).

use async_trait::async_trait;
use exchange_bridge::{BridgeResult, Instance};
use exchange_staging::{ResolvedDescriptor, TranslationTable};
use exchange_types::{
    AssetId, AssetRecord, ElementId, ExchangeIdentity, FulfillmentId, GeometryDescriptor,
    RevisionId,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::state::{ExecutionOrder, FulfillmentSession};

/// Result of an optional phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseOutcome {
    Done,
    /// The backend does not offer this capability.
    Unsupported,
}

/// Remote status of a finished fulfillment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FulfillmentStatus {
    InProgress,
    Completed,
    Failed(String),
}

/// Schema information needed to build a sync request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    pub schema_namespace: String,
}

/// A built sync request. `handle` is the backend's own object, if any.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub schema_namespace: String,
    pub asset_count: usize,
    pub handle: Option<Instance>,
}

/// One slice of a sync request, as split by the backend.
#[derive(Debug, Clone)]
pub struct SyncBatch {
    pub index: usize,
    pub asset_count: usize,
    pub handle: Option<Instance>,
}

/// A user-facing element in an exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementInfo {
    pub id: ElementId,
    pub name: String,
}

/// Everything the fulfillment workflow and the publish entry point need
/// from an exchange.
///
/// The pending-translation table comes from [`TranslationTable`]. Every
/// remote call takes the run's cancellation token.
#[async_trait]
pub trait ExchangeBackend: TranslationTable {
    // ==================== Fulfillment lifecycle ====================

    /// Open a fulfillment and return its server id.
    async fn open_fulfillment(
        &self,
        exchange: &ExchangeIdentity,
        order: ExecutionOrder,
        cancel: &CancellationToken,
    ) -> BridgeResult<FulfillmentId>;

    async fn process_render_styles(
        &self,
        session: &FulfillmentSession,
        cancel: &CancellationToken,
    ) -> BridgeResult<PhaseOutcome>;

    async fn upload_geometries(
        &self,
        session: &FulfillmentSession,
        descriptors: &[ResolvedDescriptor],
        cancel: &CancellationToken,
    ) -> BridgeResult<()>;

    async fn upload_custom_geometries(
        &self,
        session: &FulfillmentSession,
        cancel: &CancellationToken,
    ) -> BridgeResult<PhaseOutcome>;

    async fn upload_large_primitives(
        &self,
        session: &FulfillmentSession,
        cancel: &CancellationToken,
    ) -> BridgeResult<PhaseOutcome>;

    async fn sync_metadata(
        &self,
        session: &FulfillmentSession,
        cancel: &CancellationToken,
    ) -> BridgeResult<SyncMetadata>;

    async fn build_sync_request(
        &self,
        session: &FulfillmentSession,
        metadata: &SyncMetadata,
        cancel: &CancellationToken,
    ) -> BridgeResult<SyncRequest>;

    /// Split per the backend's own batching policy.
    async fn split_sync_request(
        &self,
        session: &FulfillmentSession,
        request: &SyncRequest,
        cancel: &CancellationToken,
    ) -> BridgeResult<Vec<SyncBatch>>;

    async fn sync_batch(
        &self,
        session: &FulfillmentSession,
        batch: &SyncBatch,
        cancel: &CancellationToken,
    ) -> BridgeResult<()>;

    async fn process_geometry(
        &self,
        session: &FulfillmentSession,
        request: &SyncRequest,
        cancel: &CancellationToken,
    ) -> BridgeResult<()>;

    async fn finish_fulfillment(
        &self,
        session: &FulfillmentSession,
        cancel: &CancellationToken,
    ) -> BridgeResult<()>;

    async fn poll_status(
        &self,
        session: &FulfillmentSession,
        cancel: &CancellationToken,
    ) -> BridgeResult<FulfillmentStatus>;

    async fn discard_fulfillment(
        &self,
        exchange: &ExchangeIdentity,
        fulfillment_id: &FulfillmentId,
        cancel: &CancellationToken,
    ) -> BridgeResult<()>;

    /// Clear local SDK state for the exchange and stamp the new revision.
    ///
    /// Afterwards the exchange has no pending translations left, so the
    /// next fulfillment only sees what is staged for it.
    async fn complete_local(
        &self,
        session: &FulfillmentSession,
        cancel: &CancellationToken,
    ) -> BridgeResult<RevisionId>;

    async fn request_viewable(
        &self,
        session: &FulfillmentSession,
        cancel: &CancellationToken,
    ) -> BridgeResult<PhaseOutcome>;

    // ==================== Elements & asset graph ====================

    async fn find_elements_by_name(
        &self,
        exchange: &ExchangeIdentity,
        name: &str,
        cancel: &CancellationToken,
    ) -> BridgeResult<Vec<ElementInfo>>;

    async fn create_element(
        &self,
        exchange: &ExchangeIdentity,
        name: &str,
        unit: &str,
        cancel: &CancellationToken,
    ) -> BridgeResult<ElementInfo>;

    /// Create the instance → geometry chain under an element's design and
    /// return the new geometry leaf.
    async fn create_geometry_asset(
        &self,
        exchange: &ExchangeIdentity,
        element: &ElementId,
        descriptor: &GeometryDescriptor,
        cancel: &CancellationToken,
    ) -> BridgeResult<AssetRecord>;

    /// Current record of one asset, with binary reference and links.
    async fn asset_record(
        &self,
        exchange: &ExchangeIdentity,
        asset: &AssetId,
        cancel: &CancellationToken,
    ) -> BridgeResult<Option<AssetRecord>>;
}
