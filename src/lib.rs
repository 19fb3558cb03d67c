//! Exchange Publish
//!
//! Publishes already-translated binary geometry into a remote exchange whose
//! SDK only ingests source documents and translates them itself:
//!
//! - **Dynamic bridge**: resolve and invoke SDK members by name at runtime,
//!   await asynchronous members, normalize result envelopes
//!   ([`exchange_bridge`]);
//! - **Carrier staging**: register placeholder source documents and map them
//!   to the real payloads, so the SDK uploads the payload untranslated
//!   ([`exchange_staging`]);
//! - **Fulfillment**: drive the SDK's open/upload/sync/poll lifecycle with
//!   fatal/best-effort failure handling and rollback
//!   ([`exchange_fulfillment`]).
//!
//! The usual entry point is [`publish_geometry`]:
//!
//! ```ignore
//! let staging = StagingArea::from_env()?;
//! let backend = DynamicExchangeBackend::from_model(model, ResolverConfig::from_env(), client, SdkProfile::default())?;
//! let request = PublishRequest::new(ExchangeIdentity::new(ex, col, hub), "part.bin", "Bracket");
//! let outcome = publish_geometry(&backend, &staging, &request, &CancellationToken::new()).await;
//! ```

pub use exchange_bridge as bridge;
pub use exchange_fulfillment as fulfillment;
pub use exchange_staging as staging;
pub use exchange_types as types;

pub use exchange_bridge::{
    AsyncBridge, BridgeError, BridgeResult, DynValue, ErrorKind, Instance, MemberResolver,
    Normalizer, ObjectModel, ResolverConfig,
};
pub use exchange_fulfillment::{
    publish_geometry, DuplicateNamePolicy, DynamicExchangeBackend, ExchangeBackend, Level,
    Orchestrator, PublishOutcome, PublishRequest, Publisher, SdkProfile, Transcript,
    TranscriptEntry, WorkflowConfig, WorkflowFailure, WorkflowReport,
};
pub use exchange_staging::{PreTranslatedUpload, Resolution, StagingArea, StagingConfig};
pub use exchange_types::{AssetId, ElementId, ExchangeIdentity, FulfillmentId, PollPolicy};
pub use tokio_util::sync::CancellationToken;
