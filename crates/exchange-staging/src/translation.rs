//! The SDK's pending-translation table.
//!
//! Every source document handed to the SDK for ingestion gets an entry here;
//! at upload time the SDK reads each entry's output path to find the
//! translated payload.

use std::path::PathBuf;

use async_trait::async_trait;
use exchange_bridge::{BridgeError, BridgeResult};
use exchange_types::{AssetId, ExchangeIdentity, GeometryDescriptor, GeometryFormat};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// One row of the pending-translation table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationEntry {
    pub asset_id: AssetId,
    /// Nominal source document (a carrier, for staged uploads).
    pub source_path: PathBuf,
    /// Where the translated payload is, once known.
    pub output_path: Option<PathBuf>,
    pub geometry: GeometryDescriptor,
}

impl TranslationEntry {
    /// A fresh entry for a STEP source with no output yet.
    pub fn pending(asset_id: AssetId, source_path: PathBuf) -> Self {
        Self {
            asset_id,
            source_path,
            output_path: None,
            geometry: GeometryDescriptor::brep(GeometryFormat::Step),
        }
    }
}

/// Access to the pending-translation table of one backend.
///
/// Both calls may reach the remote SDK, so both take the caller's token.
#[async_trait]
pub trait TranslationTable: Send + Sync {
    /// Add (or replace, by asset id) an entry.
    async fn register_pending(
        &self,
        exchange: &ExchangeIdentity,
        entry: TranslationEntry,
        cancel: &CancellationToken,
    ) -> BridgeResult<()>;

    /// Entries currently pending for `exchange`, in registration order.
    async fn pending_entries(
        &self,
        exchange: &ExchangeIdentity,
        cancel: &CancellationToken,
    ) -> BridgeResult<Vec<TranslationEntry>>;
}

/// In-memory table, for tests and offline staging.
#[derive(Debug, Default)]
pub struct InMemoryTranslationTable {
    entries: parking_lot::Mutex<Vec<(ExchangeIdentity, TranslationEntry)>>,
}

impl InMemoryTranslationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop every entry of `exchange`; returns how many were removed.
    pub fn clear(&self, exchange: &ExchangeIdentity) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(ex, _)| ex != exchange);
        before - entries.len()
    }
}

fn live(cancel: &CancellationToken, during: &str) -> BridgeResult<()> {
    if cancel.is_cancelled() {
        return Err(BridgeError::cancelled(during));
    }
    Ok(())
}

#[async_trait]
impl TranslationTable for InMemoryTranslationTable {
    async fn register_pending(
        &self,
        exchange: &ExchangeIdentity,
        entry: TranslationEntry,
        cancel: &CancellationToken,
    ) -> BridgeResult<()> {
        live(cancel, "register pending translation")?;
        let mut entries = self.entries.lock();
        entries.retain(|(ex, e)| !(ex == exchange && e.asset_id == entry.asset_id));
        entries.push((exchange.clone(), entry));
        Ok(())
    }

    async fn pending_entries(
        &self,
        exchange: &ExchangeIdentity,
        cancel: &CancellationToken,
    ) -> BridgeResult<Vec<TranslationEntry>> {
        live(cancel, "read pending translations")?;
        Ok(self
            .entries
            .lock()
            .iter()
            .filter(|(ex, _)| ex == exchange)
            .map(|(_, e)| e.clone())
            .collect())
    }
}
