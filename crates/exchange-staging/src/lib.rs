//! Carrier staging for pre-translated geometry.
//!
//! - [`carrier`]: the placeholder STEP document;
//! - [`mapping`]: `(exchange, asset) → payload` side table;
//! - [`translation`]: the SDK's pending-translation table seen as a trait;
//! - [`adapter`]: staging, output resolution and the stage/commit surface;
//! - [`envelope`]: protobuf-wrapped intermediate artifacts;
//! - [`paths`]: on-disk layout and atomic writes.

pub mod adapter;
pub mod carrier;
pub mod envelope;
pub mod mapping;
pub mod paths;
pub mod translation;

pub use adapter::{
    DropReason, DroppedEntry, PreTranslatedUpload, Resolution, ResolvedDescriptor, StagedCarrier,
    StagingArea,
};
pub use envelope::{unwrap_envelope_file, wrap_payload_file, GeometryEnvelope};
pub use mapping::{CarrierMapping, MappingRecord};
pub use paths::{StagingConfig, StagingLayout};
pub use translation::{InMemoryTranslationTable, TranslationEntry, TranslationTable};
