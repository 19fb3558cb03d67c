//! Asset records: the uploadable units of an exchange model.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::identity::AssetId;

/// Byte range locating a geometry payload inside a larger remote blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryReference {
    /// Id of the remote blob holding the bytes.
    pub blob_id: String,
    /// Inclusive start offset.
    pub start: u64,
    /// Exclusive end offset.
    pub end: u64,
}

impl BinaryReference {
    pub fn new(blob_id: impl Into<String>, start: u64, end: u64) -> Self {
        Self {
            blob_id: blob_id.into(),
            start,
            end,
        }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A reference is usable once it names a blob and has a forward range.
    pub fn is_valid(&self) -> bool {
        !self.blob_id.trim().is_empty() && self.start <= self.end
    }
}

/// Geometry encodings the exchange understands.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryFormat {
    /// ISO 10303-21 source documents.
    Step,
    /// Opaque solid-modeling binary produced by translation.
    Smb,
    /// Tessellated mesh.
    Mesh,
    Unknown(String),
}

impl GeometryFormat {
    /// Infer the format from a file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "stp" | "step" | "p21" => GeometryFormat::Step,
            "smb" | "bin" => GeometryFormat::Smb,
            "obj" | "mesh" | "glb" => GeometryFormat::Mesh,
            other => GeometryFormat::Unknown(other.to_string()),
        }
    }

    pub fn extension(&self) -> &str {
        match self {
            GeometryFormat::Step => "stp",
            GeometryFormat::Smb => "smb",
            GeometryFormat::Mesh => "mesh",
            GeometryFormat::Unknown(ext) => ext.as_str(),
        }
    }
}

impl fmt::Display for GeometryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeometryFormat::Step => f.write_str("STEP"),
            GeometryFormat::Smb => f.write_str("SMB"),
            GeometryFormat::Mesh => f.write_str("Mesh"),
            GeometryFormat::Unknown(ext) => write!(f, "Unknown({})", ext),
        }
    }
}

/// What kind of geometry an asset carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryKind {
    /// Boundary-representation solid.
    BRep,
    Mesh,
    /// Analytic primitives stored outside the blob (planes, lines).
    Primitive,
}

/// Type and format of the geometry held by an asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeometryDescriptor {
    pub kind: GeometryKind,
    pub format: GeometryFormat,
}

impl GeometryDescriptor {
    pub fn brep(format: GeometryFormat) -> Self {
        Self {
            kind: GeometryKind::BRep,
            format,
        }
    }
}

/// Role of a node in the asset graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetKind {
    /// The single root of an exchange model.
    Root,
    /// Reusable definition (the "element" side of the graph).
    Design,
    /// Placement of a design under its parent.
    Instance,
    /// Leaf carrying a binary payload.
    Geometry,
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssetKind::Root => "root",
            AssetKind::Design => "design",
            AssetKind::Instance => "instance",
            AssetKind::Geometry => "geometry",
        };
        f.write_str(name)
    }
}

/// One uploadable unit of an exchange model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub id: AssetId,
    pub kind: AssetKind,
    /// Set once the payload bytes have been uploaded.
    pub binary_ref: Option<BinaryReference>,
    /// Present on geometry leaves only.
    pub geometry: Option<GeometryDescriptor>,
    pub parents: Vec<AssetId>,
    pub children: Vec<AssetId>,
}

impl AssetRecord {
    pub fn new(id: impl Into<AssetId>, kind: AssetKind) -> Self {
        Self {
            id: id.into(),
            kind,
            binary_ref: None,
            geometry: None,
            parents: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn geometry(id: impl Into<AssetId>, descriptor: GeometryDescriptor) -> Self {
        Self {
            geometry: Some(descriptor),
            ..Self::new(id, AssetKind::Geometry)
        }
    }

    /// Geometry leaves render only once their binary reference is set.
    pub fn is_renderable(&self) -> bool {
        match self.kind {
            AssetKind::Geometry => self
                .binary_ref
                .as_ref()
                .map(BinaryReference::is_valid)
                .unwrap_or(false),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_binary_reference_len_and_validity() {
        let r = BinaryReference::new("blob-1", 128, 1152);
        assert_eq!(r.len(), 1024);
        assert!(r.is_valid());

        let backwards = BinaryReference::new("blob-1", 10, 5);
        assert_eq!(backwards.len(), 0);
        assert!(!backwards.is_valid());

        assert!(!BinaryReference::new("", 0, 1).is_valid());
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            GeometryFormat::from_path(&PathBuf::from("part.STEP")),
            GeometryFormat::Step
        );
        assert_eq!(
            GeometryFormat::from_path(&PathBuf::from("g1.bin")),
            GeometryFormat::Smb
        );
        assert_eq!(
            GeometryFormat::from_path(&PathBuf::from("noext")),
            GeometryFormat::Unknown(String::new())
        );
    }

    #[test]
    fn test_geometry_leaf_needs_binary_ref() {
        let mut leaf = AssetRecord::geometry("G1", GeometryDescriptor::brep(GeometryFormat::Smb));
        assert!(!leaf.is_renderable());
        leaf.binary_ref = Some(BinaryReference::new("blob", 0, 1024));
        assert!(leaf.is_renderable());

        assert!(AssetRecord::new("D1", AssetKind::Design).is_renderable());
    }
}
