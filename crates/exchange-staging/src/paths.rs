//! Staging layout on disk.
//!
//! ```text
//! <root>/
//!   mappings.json
//!   exchanges/<aa>/<exchange-hash>/
//!     carriers/<asset>.stp
//!     intermediate/<asset>.pb
//!     transcripts/<run>.jsonl
//! ```
//!
//! `<exchange-hash>` is the first 16 hex chars of SHA-256 over the full
//! exchange address; `<aa>` is its first two chars.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{anyhow, Context, Result};
use exchange_types::env_utils::{env_bool_or, publish_home_dir};
use exchange_types::{AssetId, ExchangeIdentity};
use sha2::{Digest, Sha256};

/// Staging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingConfig {
    pub root: PathBuf,
    /// Write `mappings.json` after every staging call.
    pub persist_mappings: bool,
}

impl StagingConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            persist_mappings: true,
        }
    }

    /// Read `EXCHANGE_PUBLISH_HOME` and `EXCHANGE_PERSIST_MAPPINGS`.
    pub fn from_env() -> Self {
        Self {
            root: publish_home_dir(),
            persist_mappings: env_bool_or("EXCHANGE_PERSIST_MAPPINGS", true),
        }
    }

    pub fn layout(&self) -> StagingLayout {
        StagingLayout::new(&self.root)
    }
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Resolves staging file paths under a root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingLayout {
    root: PathBuf,
}

impl StagingLayout {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mappings_path(&self) -> PathBuf {
        self.root.join("mappings.json")
    }

    pub fn exchange_dir(&self, exchange: &ExchangeIdentity) -> PathBuf {
        let hash = exchange_hash(exchange);
        self.root.join("exchanges").join(&hash[0..2]).join(&hash)
    }

    pub fn carrier_path(&self, exchange: &ExchangeIdentity, asset: &AssetId) -> PathBuf {
        self.exchange_dir(exchange)
            .join("carriers")
            .join(format!("{}.stp", file_stem(asset.as_str())))
    }

    pub fn intermediate_path(&self, exchange: &ExchangeIdentity, asset: &AssetId) -> PathBuf {
        self.exchange_dir(exchange)
            .join("intermediate")
            .join(format!("{}.pb", file_stem(asset.as_str())))
    }

    pub fn transcript_path(&self, exchange: &ExchangeIdentity, run: &str) -> PathBuf {
        self.exchange_dir(exchange)
            .join("transcripts")
            .join(format!("{}.jsonl", file_stem(run)))
    }
}

/// 16 lowercase hex chars identifying an exchange on disk.
pub fn exchange_hash(exchange: &ExchangeIdentity) -> String {
    let digest = Sha256::digest(exchange.to_string().as_bytes());
    hex::encode(&digest[..8])
}

/// Filesystem-safe file stem for an id. Ids that had to be rewritten get a
/// short hash suffix so distinct ids never collide.
pub fn file_stem(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned == id && !id.is_empty() {
        return cleaned;
    }
    let digest = Sha256::digest(id.as_bytes());
    format!("{}-{}", cleaned, hex::encode(&digest[..4]))
}

static PARTIAL_SEQ: AtomicU64 = AtomicU64::new(0);

/// Replace the staged file at `path` with `contents` in a single rename.
///
/// Each call writes its own hidden sibling first, so two stagings of the
/// same asset never share a partial file. A failed write leaves the old
/// file in place.
pub fn replace_staged_file(path: &Path, contents: &[u8]) -> Result<()> {
    let (dir, name) = match (path.parent(), path.file_name()) {
        (Some(dir), Some(name)) => (dir, name.to_string_lossy()),
        _ => return Err(anyhow!("not a staged file path: {}", path.display())),
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating staging directory {}", dir.display()))?;

    let seq = PARTIAL_SEQ.fetch_add(1, Ordering::Relaxed);
    let partial = dir.join(format!(".{}.{}-{}.partial", name, std::process::id(), seq));
    let written = std::fs::write(&partial, contents).and_then(|()| std::fs::rename(&partial, path));
    if let Err(e) = written {
        let _ = std::fs::remove_file(&partial);
        return Err(anyhow!("staging {} failed: {}", path.display(), e));
    }
    Ok(())
}

/// [`replace_staged_file`] with a pretty JSON body.
pub fn replace_staged_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)
        .with_context(|| format!("serializing {}", path.display()))?;
    replace_staged_file(path, &json)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange() -> ExchangeIdentity {
        ExchangeIdentity::new("ex-1", "col-1", "hub-1")
    }

    #[test]
    fn test_exchange_dir_is_sharded() {
        let layout = StagingLayout::new("/stage");
        let hash = exchange_hash(&exchange());
        assert_eq!(hash.len(), 16);
        assert_eq!(
            layout.exchange_dir(&exchange()),
            PathBuf::from("/stage/exchanges").join(&hash[0..2]).join(&hash)
        );
    }

    #[test]
    fn test_file_stem_keeps_plain_ids() {
        assert_eq!(file_stem("G1"), "G1");
        let odd = file_stem("asset/with:colons");
        assert!(odd.starts_with("asset_with_colons-"));
        assert_ne!(file_stem("a/b"), file_stem("a:b"));
    }

    #[test]
    fn test_carrier_path_extension() {
        let layout = StagingLayout::new("/stage");
        let path = layout.carrier_path(&exchange(), &AssetId::new("G1"));
        assert_eq!(path.file_name().unwrap(), "G1.stp");
        assert!(path.starts_with(layout.exchange_dir(&exchange())));
    }

    #[test]
    fn test_replace_staged_json_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/mappings.json");
        replace_staged_json(&path, &vec![1, 2, 3]).unwrap();
        let back: Vec<u32> = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(back, vec![1, 2, 3]);
    }

    #[test]
    fn test_concurrent_replacements_leave_one_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("carriers/G1.stp");
        let bodies: Vec<Vec<u8>> = (0..8u8).map(|i| vec![i; 4096]).collect();

        std::thread::scope(|scope| {
            for body in &bodies {
                let path = &path;
                scope.spawn(move || replace_staged_file(path, body).unwrap());
            }
        });

        let written = std::fs::read(&path).unwrap();
        assert!(bodies.contains(&written));
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|n| n != "G1.stp")
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }
}
