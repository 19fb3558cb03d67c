//! Shared types for the exchange-publish workspace.
//!
//! This crate is the leaf of the dependency graph: identities, asset records,
//! the asset graph, and the environment-driven configuration helpers used by
//! every other crate.

pub mod asset;
pub mod env_utils;
pub mod graph;
pub mod identity;

pub use asset::{
    AssetKind, AssetRecord, BinaryReference, GeometryDescriptor, GeometryFormat, GeometryKind,
};
pub use env_utils::{env_bool, env_bool_or, env_string_or, env_var, env_var_or};
pub use graph::{AssetGraph, GraphError};
pub use identity::{
    AssetId, CollectionId, ElementId, ExchangeId, ExchangeIdentity, FulfillmentId, HubId,
    RevisionId,
};

use std::time::Duration;

/// How long and how often to poll a fulfillment for completion.
///
/// The remote service offers no completion callback, so the workflow polls.
/// `deadline` bounds the whole poll phase; `None` means poll until the
/// service answers or the caller cancels.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between status checks.
    pub interval: Duration,
    /// Upper bound on the total time spent polling.
    pub deadline: Option<Duration>,
}

impl PollPolicy {
    pub fn new(interval_ms: u64, deadline_secs: Option<u64>) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms),
            deadline: deadline_secs.map(Duration::from_secs),
        }
    }

    /// Read `EXCHANGE_POLL_INTERVAL_MS` / `EXCHANGE_POLL_DEADLINE_SECS`.
    ///
    /// A deadline of `0` disables the bound.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let interval = env_utils::env_millis_or(
            "EXCHANGE_POLL_INTERVAL_MS",
            defaults.interval.as_millis() as u64,
        );
        let deadline_secs: u64 = env_var_or(
            "EXCHANGE_POLL_DEADLINE_SECS",
            defaults.deadline.map(|d| d.as_secs()).unwrap_or(0),
        );
        Self {
            interval,
            deadline: (deadline_secs > 0).then(|| Duration::from_secs(deadline_secs)),
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2000),
            deadline: Some(Duration::from_secs(30 * 60)),
        }
    }
}
