//! Side table from staged carrier to real payload.
//!
//! Keyed by `(exchange_id, asset_id)`. Entries are added when a payload is
//! staged and only ever replaced by a later staging of the same key; nothing
//! clears the table automatically.
//!
//! # Example
//!
//! ```ignore
//! let mapping = CarrierMapping::with_storage(layout.mappings_path())?;
//! mapping.record(&exchange_id, &asset_id, "/out/g1.bin");
//! mapping.flush()?;
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use exchange_types::{AssetId, ExchangeId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::paths::replace_staged_json;

/// One persisted mapping row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRecord {
    pub exchange_id: ExchangeId,
    pub asset_id: AssetId,
    pub payload: PathBuf,
}

/// Thread-safe via internal RwLock. Can optionally persist to disk.
#[derive(Debug, Default)]
pub struct CarrierMapping {
    entries: RwLock<HashMap<(ExchangeId, AssetId), PathBuf>>,
    /// Optional persistence file.
    storage_file: Option<PathBuf>,
}

impl CarrierMapping {
    /// Create an in-memory mapping (no persistence).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mapping persisted at `storage_file`, loading existing rows.
    pub fn with_storage(storage_file: impl AsRef<Path>) -> Result<Self> {
        let mut mapping = Self {
            entries: RwLock::new(HashMap::new()),
            storage_file: Some(storage_file.as_ref().to_path_buf()),
        };
        mapping.load_from_disk()?;
        Ok(mapping)
    }

    // ==================== Entries ====================

    /// Record the payload for a key. Returns the superseded path, if any.
    pub fn record(
        &self,
        exchange_id: &ExchangeId,
        asset_id: &AssetId,
        payload: impl Into<PathBuf>,
    ) -> Option<PathBuf> {
        let payload = payload.into();
        let previous = self
            .entries
            .write()
            .insert((exchange_id.clone(), asset_id.clone()), payload.clone());
        if let Some(prev) = &previous {
            if prev != &payload {
                debug!(
                    exchange = %exchange_id,
                    asset = %asset_id,
                    superseded = %prev.display(),
                    "carrier mapping superseded"
                );
            }
        }
        previous
    }

    pub fn get(&self, exchange_id: &ExchangeId, asset_id: &AssetId) -> Option<PathBuf> {
        self.entries
            .read()
            .get(&(exchange_id.clone(), asset_id.clone()))
            .cloned()
    }

    pub fn contains(&self, exchange_id: &ExchangeId, asset_id: &AssetId) -> bool {
        self.get(exchange_id, asset_id).is_some()
    }

    /// All rows for one exchange, ordered by asset id.
    pub fn entries_for(&self, exchange_id: &ExchangeId) -> Vec<MappingRecord> {
        let mut rows: Vec<MappingRecord> = self
            .entries
            .read()
            .iter()
            .filter(|((ex, _), _)| ex == exchange_id)
            .map(|((ex, asset), payload)| MappingRecord {
                exchange_id: ex.clone(),
                asset_id: asset.clone(),
                payload: payload.clone(),
            })
            .collect();
        rows.sort_by(|a, b| a.asset_id.cmp(&b.asset_id));
        rows
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    // ==================== Persistence ====================

    /// Flush rows to disk (if storage is enabled).
    pub fn flush(&self) -> Result<()> {
        let Some(ref storage_file) = self.storage_file else {
            return Ok(());
        };
        let mut rows: Vec<MappingRecord> = self
            .entries
            .read()
            .iter()
            .map(|((ex, asset), payload)| MappingRecord {
                exchange_id: ex.clone(),
                asset_id: asset.clone(),
                payload: payload.clone(),
            })
            .collect();
        rows.sort_by(|a, b| {
            (&a.exchange_id, &a.asset_id).cmp(&(&b.exchange_id, &b.asset_id))
        });
        replace_staged_json(storage_file, &rows)
    }

    fn load_from_disk(&mut self) -> Result<()> {
        let Some(ref storage_file) = self.storage_file else {
            return Ok(());
        };
        if !storage_file.exists() {
            return Ok(());
        }
        let json = std::fs::read_to_string(storage_file)
            .map_err(|e| anyhow!("Failed to read {}: {}", storage_file.display(), e))?;
        let rows: Vec<MappingRecord> = serde_json::from_str(&json)
            .map_err(|e| anyhow!("Failed to parse {}: {}", storage_file.display(), e))?;
        let mut entries = self.entries.write();
        for row in rows {
            entries.insert((row.exchange_id, row.asset_id), row.payload);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_supersede() {
        let mapping = CarrierMapping::new();
        let ex = ExchangeId::new("ex-1");
        let g1 = AssetId::new("G1");

        assert_eq!(mapping.record(&ex, &g1, "/a/g1.bin"), None);
        assert_eq!(
            mapping.record(&ex, &g1, "/b/g1.bin"),
            Some(PathBuf::from("/a/g1.bin"))
        );
        assert_eq!(mapping.get(&ex, &g1), Some(PathBuf::from("/b/g1.bin")));
        assert_eq!(mapping.len(), 1);
    }

    #[test]
    fn test_keys_are_scoped_by_exchange() {
        let mapping = CarrierMapping::new();
        let g1 = AssetId::new("G1");
        mapping.record(&ExchangeId::new("ex-1"), &g1, "/one.bin");
        mapping.record(&ExchangeId::new("ex-2"), &g1, "/two.bin");

        assert_eq!(mapping.entries_for(&ExchangeId::new("ex-1")).len(), 1);
        assert!(!mapping.contains(&ExchangeId::new("ex-3"), &g1));
    }

    #[test]
    fn test_flush_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("mappings.json");
        let ex = ExchangeId::new("ex-1");

        let mapping = CarrierMapping::with_storage(&file).unwrap();
        mapping.record(&ex, &AssetId::new("G2"), "/g2.bin");
        mapping.record(&ex, &AssetId::new("G1"), "/g1.bin");
        mapping.flush().unwrap();

        let reloaded = CarrierMapping::with_storage(&file).unwrap();
        let rows = reloaded.entries_for(&ex);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].asset_id, AssetId::new("G1"));
        assert_eq!(rows[1].payload, PathBuf::from("/g2.bin"));
    }

    #[test]
    fn test_in_memory_flush_is_noop() {
        CarrierMapping::new().flush().unwrap();
    }
}
