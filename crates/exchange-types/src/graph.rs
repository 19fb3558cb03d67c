//! Asset graph: the DAG of root, design, instance and geometry nodes.
//!
//! Links are stored on both ends (`parents` and `children` of each
//! [`AssetRecord`]) and kept consistent by [`AssetGraph::link`], which also
//! rejects any edge that would close a cycle.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::asset::{AssetKind, AssetRecord};
use crate::identity::AssetId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    UnknownAsset(AssetId),
    DuplicateAsset(AssetId),
    /// Adding `parent -> child` would create a cycle.
    Cycle { parent: AssetId, child: AssetId },
    /// Root nodes cannot have parents.
    RootAsChild(AssetId),
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::UnknownAsset(id) => write!(f, "asset {} is not in the graph", id),
            GraphError::DuplicateAsset(id) => write!(f, "asset {} already exists", id),
            GraphError::Cycle { parent, child } => {
                write!(f, "linking {} -> {} would create a cycle", parent, child)
            }
            GraphError::RootAsChild(id) => write!(f, "root asset {} cannot have a parent", id),
        }
    }
}

impl std::error::Error for GraphError {}

/// In-memory asset graph keyed by asset id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetGraph {
    assets: BTreeMap<AssetId, AssetRecord>,
}

impl AssetGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: AssetRecord) -> Result<(), GraphError> {
        if self.assets.contains_key(&record.id) {
            return Err(GraphError::DuplicateAsset(record.id));
        }
        self.assets.insert(record.id.clone(), record);
        Ok(())
    }

    /// Replace an existing record, keeping its links.
    pub fn upsert(&mut self, mut record: AssetRecord) {
        if let Some(existing) = self.assets.get(&record.id) {
            record.parents = existing.parents.clone();
            record.children = existing.children.clone();
        }
        self.assets.insert(record.id.clone(), record);
    }

    pub fn get(&self, id: &AssetId) -> Option<&AssetRecord> {
        self.assets.get(id)
    }

    pub fn get_mut(&mut self, id: &AssetId) -> Option<&mut AssetRecord> {
        self.assets.get_mut(id)
    }

    pub fn contains(&self, id: &AssetId) -> bool {
        self.assets.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &AssetRecord> {
        self.assets.values()
    }

    /// First root node, if any.
    pub fn root(&self) -> Option<&AssetRecord> {
        self.assets.values().find(|a| a.kind == AssetKind::Root)
    }

    /// Add a `parent -> child` edge. Idempotent for an existing edge.
    pub fn link(&mut self, parent: &AssetId, child: &AssetId) -> Result<(), GraphError> {
        if !self.assets.contains_key(parent) {
            return Err(GraphError::UnknownAsset(parent.clone()));
        }
        let child_kind = match self.assets.get(child) {
            Some(c) => c.kind,
            None => return Err(GraphError::UnknownAsset(child.clone())),
        };
        if child_kind == AssetKind::Root {
            return Err(GraphError::RootAsChild(child.clone()));
        }
        if parent == child || self.descendants(child).contains(parent) {
            return Err(GraphError::Cycle {
                parent: parent.clone(),
                child: child.clone(),
            });
        }

        if let Some(p) = self.assets.get_mut(parent) {
            if !p.children.contains(child) {
                p.children.push(child.clone());
            }
        }
        if let Some(c) = self.assets.get_mut(child) {
            if !c.parents.contains(parent) {
                c.parents.push(parent.clone());
            }
        }
        Ok(())
    }

    /// Remove an edge if present.
    pub fn unlink(&mut self, parent: &AssetId, child: &AssetId) {
        if let Some(p) = self.assets.get_mut(parent) {
            p.children.retain(|c| c != child);
        }
        if let Some(c) = self.assets.get_mut(child) {
            c.parents.retain(|p| p != parent);
        }
    }

    /// Every node reachable from `id` (excluding `id`), breadth-first.
    pub fn descendants(&self, id: &AssetId) -> Vec<AssetId> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<&AssetId> = VecDeque::new();
        if let Some(start) = self.assets.get(id) {
            queue.extend(start.children.iter());
        }
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.clone()) {
                continue;
            }
            order.push(next.clone());
            if let Some(record) = self.assets.get(next) {
                queue.extend(record.children.iter());
            }
        }
        order
    }

    /// Geometry leaves reachable from `id`.
    pub fn geometry_leaves(&self, id: &AssetId) -> Vec<&AssetRecord> {
        self.descendants(id)
            .iter()
            .filter_map(|d| self.assets.get(d))
            .filter(|r| r.kind == AssetKind::Geometry)
            .collect()
    }

    /// Geometry leaves that still lack a valid binary reference.
    pub fn unrenderable(&self) -> Vec<&AssetRecord> {
        self.assets
            .values()
            .filter(|a| !a.is_renderable())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{GeometryDescriptor, GeometryFormat};

    fn chain() -> AssetGraph {
        let mut g = AssetGraph::new();
        g.insert(AssetRecord::new("root", AssetKind::Root)).unwrap();
        g.insert(AssetRecord::new("inst", AssetKind::Instance)).unwrap();
        g.insert(AssetRecord::new("design", AssetKind::Design)).unwrap();
        g.insert(AssetRecord::geometry(
            "geo",
            GeometryDescriptor::brep(GeometryFormat::Smb),
        ))
        .unwrap();
        g.link(&"root".into(), &"inst".into()).unwrap();
        g.link(&"inst".into(), &"design".into()).unwrap();
        g.link(&"design".into(), &"geo".into()).unwrap();
        g
    }

    #[test]
    fn test_link_is_bidirectional_and_idempotent() {
        let mut g = chain();
        g.link(&"root".into(), &"inst".into()).unwrap();
        let root = g.get(&"root".into()).unwrap();
        assert_eq!(root.children, vec![AssetId::from("inst")]);
        let inst = g.get(&"inst".into()).unwrap();
        assert_eq!(inst.parents, vec![AssetId::from("root")]);
    }

    #[test]
    fn test_cycle_rejected() {
        let mut g = chain();
        let err = g.link(&"geo".into(), &"inst".into()).unwrap_err();
        assert!(matches!(err, GraphError::Cycle { .. }));
        assert!(matches!(
            g.link(&"design".into(), &"design".into()),
            Err(GraphError::Cycle { .. })
        ));
    }

    #[test]
    fn test_root_cannot_be_child() {
        let mut g = chain();
        assert_eq!(
            g.link(&"design".into(), &"root".into()),
            Err(GraphError::RootAsChild("root".into()))
        );
    }

    #[test]
    fn test_descendants_and_leaves() {
        let g = chain();
        assert_eq!(g.descendants(&"root".into()).len(), 3);
        let leaves = g.geometry_leaves(&"root".into());
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].id, AssetId::from("geo"));
        assert_eq!(g.unrenderable().len(), 1);
        assert_eq!(g.root().map(|r| r.id.as_str()), Some("root"));
    }

    #[test]
    fn test_upsert_keeps_links_and_unlink() {
        let mut g = chain();
        let mut replacement = AssetRecord::geometry("geo", GeometryDescriptor::brep(GeometryFormat::Smb));
        replacement.binary_ref = Some(crate::asset::BinaryReference::new("b", 0, 4));
        g.upsert(replacement);
        assert_eq!(g.get(&"geo".into()).unwrap().parents.len(), 1);
        assert!(g.unrenderable().is_empty());

        g.unlink(&"design".into(), &"geo".into());
        assert!(g.geometry_leaves(&"root".into()).is_empty());
    }
}
