//! Fulfillment workflow for publishing pre-translated geometry.
//!
//! - [`backend`]: the [`ExchangeBackend`] capability trait the workflow drives;
//! - [`orchestrator`]: the fulfillment state machine with rollback;
//! - [`publish`]: the upload entry point;
//! - [`dynamic`]: the backend implemented over the runtime-resolved SDK;
//! - [`transcript`]: leveled diagnostics returned to the caller;
//! - [`testing`]: a recording backend for workflow tests.

pub mod backend;
pub mod dynamic;
pub mod orchestrator;
pub mod publish;
pub mod state;
pub mod testing;
pub mod transcript;

pub use backend::{
    ElementInfo, ExchangeBackend, FulfillmentStatus, PhaseOutcome, SyncBatch, SyncMetadata,
    SyncRequest,
};
pub use dynamic::{DynamicExchangeBackend, SdkProfile};
pub use orchestrator::{Orchestrator, Transition, WorkflowConfig, WorkflowFailure, WorkflowReport};
pub use publish::{
    publish_geometry, DuplicateNamePolicy, PublishOutcome, PublishRequest, Publisher, DEFAULT_UNIT,
};
pub use state::{ExecutionOrder, FulfillmentSession, FulfillmentState, TerminalOutcome};
pub use transcript::{Level, Transcript, TranscriptEntry};
