//! Dynamic bridge to the exchange SDK.
//!
//! The SDK's object model is not a stable compile-time contract, so every
//! type and member is found by name at runtime:
//!
//! - [`resolver`]: finds types and members, memoizing hits;
//! - [`normalize`]: turns result envelopes and bare values into Rust types;
//! - [`bridge`]: awaits asynchronous members with cancellation;
//! - [`testing`]: an in-memory object model for tests.

pub mod bridge;
pub mod error;
pub mod model;
pub mod normalize;
pub mod resolver;
pub mod testing;
pub mod value;

pub use bridge::AsyncBridge;
pub use error::{BackendFault, BridgeError, BridgeResult, ErrorKind};
pub use model::{
    BindingScope, DataHandle, DataKind, MethodHandle, ModuleInfo, ObjectModel, Receiver,
    TypeHandle, TypeInfo, Visibility,
};
pub use normalize::{EnvelopeShape, FromDyn, Normalizer};
pub use resolver::{MemberKey, MemberResolver, ResolverConfig, ResolverStatsSnapshot};
pub use value::{Awaitable, DynValue, Instance};
