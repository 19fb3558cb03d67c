//! Staging carriers and resolving translated outputs.
//!
//! The SDK only ingests source documents and expects to translate them
//! itself. To publish a payload that is already translated, a carrier is
//! registered as the nominal source and the real payload is remembered in
//! [`CarrierMapping`]. Before upload, every pending entry gets its output
//! path pointed at the real payload; entries that cannot be resolved are
//! dropped, never forwarded.

use std::path::{Path, PathBuf};

use anyhow::Result;
use exchange_bridge::{BridgeError, BridgeResult};
use exchange_types::{AssetId, ExchangeIdentity, GeometryDescriptor, GeometryFormat};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::carrier::{is_carrier, write_carrier};
use crate::envelope::wrap_payload_file;
use crate::mapping::CarrierMapping;
use crate::paths::{StagingConfig, StagingLayout};
use crate::translation::{TranslationEntry, TranslationTable};

// ==================== Resolution results ====================

/// A pending entry whose output now points at an existing real payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDescriptor {
    pub asset_id: AssetId,
    /// Still the carrier.
    pub source_path: PathBuf,
    /// The real payload.
    pub output_path: PathBuf,
    pub geometry: GeometryDescriptor,
}

impl ResolvedDescriptor {
    pub fn to_entry(&self) -> TranslationEntry {
        TranslationEntry {
            asset_id: self.asset_id.clone(),
            source_path: self.source_path.clone(),
            output_path: Some(self.output_path.clone()),
            geometry: self.geometry.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
    /// The carrier file no longer exists.
    CarrierMissing,
    /// No mapping for the asset.
    Unmapped,
    /// Mapped payload file no longer exists.
    PayloadMissing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedEntry {
    pub asset_id: AssetId,
    pub reason: DropReason,
}

/// Outcome of resolving one exchange's pending entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub survivors: Vec<ResolvedDescriptor>,
    pub dropped: Vec<DroppedEntry>,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.survivors.is_empty()
    }
}

/// A carrier staged by [`PreTranslatedUpload::stage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedCarrier {
    pub asset_id: AssetId,
    pub carrier: PathBuf,
    pub payload: PathBuf,
}

// ==================== Staging area ====================

/// Staging root plus the carrier mapping that lives in it.
#[derive(Debug)]
pub struct StagingArea {
    config: StagingConfig,
    layout: StagingLayout,
    mapping: CarrierMapping,
}

impl StagingArea {
    /// Open the staging root, loading persisted mappings when enabled.
    pub fn open(config: StagingConfig) -> Result<Self> {
        let layout = config.layout();
        let mapping = if config.persist_mappings {
            CarrierMapping::with_storage(layout.mappings_path())?
        } else {
            CarrierMapping::new()
        };
        Ok(Self {
            config,
            layout,
            mapping,
        })
    }

    /// Staging root from `EXCHANGE_PUBLISH_HOME`.
    pub fn from_env() -> Result<Self> {
        Self::open(StagingConfig::from_env())
    }

    pub fn config(&self) -> &StagingConfig {
        &self.config
    }

    pub fn layout(&self) -> &StagingLayout {
        &self.layout
    }

    pub fn mapping(&self) -> &CarrierMapping {
        &self.mapping
    }

    /// Start a staged upload for one exchange. Every table call it makes
    /// observes `cancel`.
    pub fn upload<'a, T>(
        &'a self,
        table: &'a T,
        exchange: &ExchangeIdentity,
        cancel: &CancellationToken,
    ) -> PreTranslatedUpload<'a, T>
    where
        T: TranslationTable + ?Sized,
    {
        PreTranslatedUpload {
            area: self,
            table,
            exchange: exchange.clone(),
            cancel: cancel.clone(),
            staged: Vec::new(),
        }
    }

    /// Write a carrier for `asset_id`, register it as pending, and map it to
    /// `payload`. Returns the carrier path.
    pub async fn stage_carrier<T>(
        &self,
        table: &T,
        exchange: &ExchangeIdentity,
        asset_id: &AssetId,
        payload: &Path,
        cancel: &CancellationToken,
    ) -> BridgeResult<PathBuf>
    where
        T: TranslationTable + ?Sized,
    {
        if cancel.is_cancelled() {
            return Err(BridgeError::cancelled(format!("staging asset {}", asset_id)));
        }
        if asset_id.is_empty() {
            return Err(BridgeError::contract("cannot stage a payload without an asset id"));
        }
        if !payload.is_file() {
            return Err(BridgeError::contract(format!(
                "real payload for asset {} does not exist: {}",
                asset_id,
                payload.display()
            )));
        }
        if is_carrier(payload) {
            return Err(BridgeError::contract(format!(
                "payload for asset {} is itself a carrier: {}",
                asset_id,
                payload.display()
            )));
        }

        let carrier = self.layout.carrier_path(exchange, asset_id);
        write_carrier(&carrier, asset_id.as_str())?;
        table
            .register_pending(
                exchange,
                TranslationEntry::pending(asset_id.clone(), carrier.clone()),
                cancel,
            )
            .await?;
        self.mapping.record(&exchange.exchange_id, asset_id, payload);
        if self.config.persist_mappings {
            self.mapping.flush()?;
        }

        debug!(
            exchange = %exchange,
            asset = %asset_id,
            carrier = %carrier.display(),
            payload = %payload.display(),
            "staged carrier"
        );
        Ok(carrier)
    }

    /// Point every resolvable pending entry at its real payload.
    ///
    /// Entries whose carrier is gone, that have no mapping, or whose mapped
    /// payload is gone are dropped. Zero survivors is a valid result.
    pub async fn resolve_translated_outputs<T>(
        &self,
        table: &T,
        exchange: &ExchangeIdentity,
        cancel: &CancellationToken,
    ) -> BridgeResult<Resolution>
    where
        T: TranslationTable + ?Sized,
    {
        let mut resolution = Resolution::default();
        for entry in table.pending_entries(exchange, cancel).await? {
            if entry.asset_id.is_empty() {
                return Err(BridgeError::contract(format!(
                    "pending entry without asset id (source {})",
                    entry.source_path.display()
                )));
            }
            let reason = if !entry.source_path.exists() {
                Some(DropReason::CarrierMissing)
            } else {
                match self.mapping.get(&exchange.exchange_id, &entry.asset_id) {
                    None => Some(DropReason::Unmapped),
                    Some(payload) if !payload.is_file() => Some(DropReason::PayloadMissing),
                    Some(payload) => {
                        if is_carrier(&payload) {
                            return Err(BridgeError::contract(format!(
                                "mapping for asset {} points at a carrier: {}",
                                entry.asset_id,
                                payload.display()
                            )));
                        }
                        resolution.survivors.push(ResolvedDescriptor {
                            geometry: GeometryDescriptor {
                                kind: entry.geometry.kind,
                                format: GeometryFormat::from_path(&payload),
                            },
                            asset_id: entry.asset_id.clone(),
                            source_path: entry.source_path.clone(),
                            output_path: payload,
                        });
                        None
                    }
                }
            };
            if let Some(reason) = reason {
                warn!(asset = %entry.asset_id, ?reason, "dropping pending entry");
                resolution.dropped.push(DroppedEntry {
                    asset_id: entry.asset_id,
                    reason,
                });
            }
        }
        info!(
            exchange = %exchange,
            survivors = resolution.survivors.len(),
            dropped = resolution.dropped.len(),
            "resolved translated outputs"
        );
        Ok(resolution)
    }

    /// Write the protobuf-wrapped copy of `payload` for `asset_id`.
    pub fn emit_intermediate(
        &self,
        exchange: &ExchangeIdentity,
        asset_id: &AssetId,
        payload: &Path,
    ) -> BridgeResult<PathBuf> {
        let out = self.layout.intermediate_path(exchange, asset_id);
        wrap_payload_file(payload, &out)?;
        Ok(out)
    }
}

// ==================== Staged upload ====================

/// Stage-then-commit surface over [`StagingArea`] for one exchange.
pub struct PreTranslatedUpload<'a, T: ?Sized> {
    area: &'a StagingArea,
    table: &'a T,
    exchange: ExchangeIdentity,
    cancel: CancellationToken,
    staged: Vec<StagedCarrier>,
}

impl<'a, T> PreTranslatedUpload<'a, T>
where
    T: TranslationTable + ?Sized,
{
    pub fn exchange(&self) -> &ExchangeIdentity {
        &self.exchange
    }

    pub fn staged(&self) -> &[StagedCarrier] {
        &self.staged
    }

    pub async fn stage(&mut self, asset_id: &AssetId, payload: &Path) -> BridgeResult<&StagedCarrier> {
        let carrier = self
            .area
            .stage_carrier(self.table, &self.exchange, asset_id, payload, &self.cancel)
            .await?;
        self.staged.retain(|s| &s.asset_id != asset_id);
        self.staged.push(StagedCarrier {
            asset_id: asset_id.clone(),
            carrier,
            payload: payload.to_path_buf(),
        });
        let last = self.staged.len() - 1;
        Ok(&self.staged[last])
    }

    pub async fn commit(&self) -> BridgeResult<Resolution> {
        self.area
            .resolve_translated_outputs(self.table, &self.exchange, &self.cancel)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translation::InMemoryTranslationTable;

    fn area(dir: &Path) -> StagingArea {
        StagingArea::open(StagingConfig::new(dir.join("stage"))).unwrap()
    }

    fn exchange() -> ExchangeIdentity {
        ExchangeIdentity::new("ex-1", "col-1", "hub-1")
    }

    fn live() -> CancellationToken {
        CancellationToken::new()
    }

    fn payload(dir: &Path, name: &str, len: usize) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, vec![0xABu8; len]).unwrap();
        path
    }

    #[tokio::test]
    async fn test_stage_registers_and_maps() {
        let dir = tempfile::tempdir().unwrap();
        let area = area(dir.path());
        let table = InMemoryTranslationTable::new();
        let g1 = payload(dir.path(), "g1.bin", 1024);

        let carrier = area
            .stage_carrier(&table, &exchange(), &AssetId::new("G1"), &g1, &live())
            .await
            .unwrap();

        assert!(is_carrier(&carrier));
        assert_eq!(table.len(), 1);
        assert_eq!(
            area.mapping().get(&exchange().exchange_id, &AssetId::new("G1")),
            Some(g1)
        );
        assert!(area.layout().mappings_path().exists());
    }

    #[tokio::test]
    async fn test_missing_payload_is_contract_violation() {
        let dir = tempfile::tempdir().unwrap();
        let area = area(dir.path());
        let table = InMemoryTranslationTable::new();
        let err = area
            .stage_carrier(&table, &exchange(), &AssetId::new("G1"), &dir.path().join("nope.bin"), &live())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ContractViolation { .. }));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_staging_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let area = area(dir.path());
        let table = InMemoryTranslationTable::new();
        let g1 = payload(dir.path(), "g1.bin", 32);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = area
            .stage_carrier(&table, &exchange(), &AssetId::new("G1"), &g1, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), exchange_bridge::ErrorKind::Cancelled);
        assert!(table.is_empty());
        assert!(area.mapping().get(&exchange().exchange_id, &AssetId::new("G1")).is_none());
        assert!(!area.layout().carrier_path(&exchange(), &AssetId::new("G1")).exists());

        let err = area
            .resolve_translated_outputs(&table, &exchange(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), exchange_bridge::ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_resolution_overwrites_output_keeps_source() {
        let dir = tempfile::tempdir().unwrap();
        let area = area(dir.path());
        let table = InMemoryTranslationTable::new();
        let g1 = payload(dir.path(), "g1.bin", 1024);
        let mut upload = area.upload(&table, &exchange(), &live());
        let carrier = upload.stage(&AssetId::new("G1"), &g1).await.unwrap().carrier.clone();

        let resolution = upload.commit().await.unwrap();
        assert_eq!(resolution.survivors.len(), 1);
        let d = &resolution.survivors[0];
        assert_eq!(d.output_path, g1);
        assert_eq!(d.source_path, carrier);
        assert_eq!(d.geometry.format, GeometryFormat::Smb);
        assert_eq!(d.to_entry().output_path, Some(g1.clone()));
    }

    #[tokio::test]
    async fn test_unresolvable_entries_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let area = area(dir.path());
        let table = InMemoryTranslationTable::new();
        let ex = exchange();

        let g1 = payload(dir.path(), "g1.bin", 8);
        let g2 = payload(dir.path(), "g2.bin", 8);
        let g3 = payload(dir.path(), "g3.bin", 8);
        area.stage_carrier(&table, &ex, &AssetId::new("G1"), &g1, &live()).await.unwrap();
        area.stage_carrier(&table, &ex, &AssetId::new("G2"), &g2, &live()).await.unwrap();
        let c3 = area.stage_carrier(&table, &ex, &AssetId::new("G3"), &g3, &live()).await.unwrap();

        // A pending entry nobody staged through the mapping.
        let stray = dir.path().join("stray.stp");
        write_carrier(&stray, "G4").unwrap();
        table
            .register_pending(&ex, TranslationEntry::pending(AssetId::new("G4"), stray), &live())
            .await
            .unwrap();

        std::fs::remove_file(&g2).unwrap();
        std::fs::remove_file(&c3).unwrap();

        let resolution = area.resolve_translated_outputs(&table, &ex, &live()).await.unwrap();
        let survivors: Vec<_> = resolution.survivors.iter().map(|d| d.asset_id.as_str()).collect();
        assert_eq!(survivors, vec!["G1"]);
        let reasons: Vec<_> = resolution.dropped.iter().map(|d| (d.asset_id.as_str(), d.reason)).collect();
        assert_eq!(
            reasons,
            vec![
                ("G2", DropReason::PayloadMissing),
                ("G3", DropReason::CarrierMissing),
                ("G4", DropReason::Unmapped),
            ]
        );
        assert!(resolution.survivors.iter().all(|d| d.output_path.is_file()));
    }

    #[tokio::test]
    async fn test_zero_survivors_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let area = area(dir.path());
        let table = InMemoryTranslationTable::new();
        let resolution = area.resolve_translated_outputs(&table, &exchange(), &live()).await.unwrap();
        assert!(resolution.is_empty());
    }

    #[tokio::test]
    async fn test_restaging_supersedes_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let area = area(dir.path());
        let table = InMemoryTranslationTable::new();
        let old = payload(dir.path(), "old.bin", 4);
        let new = payload(dir.path(), "new.bin", 4);
        area.stage_carrier(&table, &exchange(), &AssetId::new("G1"), &old, &live()).await.unwrap();
        area.stage_carrier(&table, &exchange(), &AssetId::new("G1"), &new, &live()).await.unwrap();

        assert_eq!(table.len(), 1);
        let resolution = area.resolve_translated_outputs(&table, &exchange(), &live()).await.unwrap();
        assert_eq!(resolution.survivors[0].output_path, new);
    }

    #[test]
    fn test_emit_intermediate() {
        let dir = tempfile::tempdir().unwrap();
        let area = area(dir.path());
        let g1 = payload(dir.path(), "g1.bin", 64);
        let out = area.emit_intermediate(&exchange(), &AssetId::new("G1"), &g1).unwrap();
        assert_eq!(crate::envelope::unwrap_envelope_file(&out).unwrap(), vec![0xABu8; 64]);
    }
}
