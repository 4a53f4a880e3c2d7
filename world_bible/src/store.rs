//! Store interfaces the narrative pipeline reads and mutates through.
//!
//! [`WorldTree`] and [`CharacterRoster`] are the in-memory implementations. Other
//! backends only need the required methods; the provided ones are derived.

use crate::characters::{CharacterId, CharacterProfile, CharacterRecord, CharacterRoster};
use crate::error::{Result, StoreError};
use crate::world_tree::{mount_points, MountPoint, NodeId, NodeRole, WorldNode, WorldSnapshot, WorldTree};

/// Hierarchical world-setting store.
pub trait TreeStore {
    fn view(&self, id: &str) -> Result<WorldNode>;

    fn children(&self, id: &str) -> Result<Vec<WorldNode>>;

    /// Create a child of `parent`; the store chooses the identifier.
    fn add(&mut self, parent: &str, key: &str) -> Result<NodeId>;

    fn update(&mut self, id: &str, value: &str) -> Result<()>;

    fn rename(&mut self, id: &str, key: &str) -> Result<()>;

    /// Delete a node and its subtree, returning every removed identifier.
    fn remove(&mut self, id: &str) -> Result<Vec<NodeId>>;

    fn snapshot(&self) -> WorldSnapshot;

    /// Every node, in identifier order.
    fn nodes(&self) -> Vec<WorldNode>;

    fn contains(&self, id: &str) -> bool {
        self.view(id).is_ok()
    }

    fn mount_points(&self) -> Vec<MountPoint> {
        mount_points(&self.nodes())
    }

    /// The nearest node with `role` on the path from `id` up to the root.
    fn enclosing(&self, id: &str, role: NodeRole) -> Option<WorldNode> {
        let mut current = self.view(id).ok();
        while let Some(node) = current {
            if node.role == role {
                return Some(node);
            }
            current = node.parent.as_ref().and_then(|p| self.view(p.as_str()).ok());
        }
        None
    }
}

/// Flat character record store.
pub trait RecordStore {
    fn list(&self) -> Vec<CharacterRecord>;

    fn get(&self, id: &str) -> Result<CharacterRecord>;

    fn add(
        &mut self,
        profile: CharacterProfile,
        region_id: Option<NodeId>,
        polity_id: Option<NodeId>,
    ) -> Result<CharacterId>;

    fn update(&mut self, id: &str, profile: CharacterProfile) -> Result<()>;

    /// Move a character to a different region/polity anchor.
    fn rebind(
        &mut self,
        id: &str,
        region_id: Option<NodeId>,
        polity_id: Option<NodeId>,
    ) -> Result<()>;
}

impl TreeStore for WorldTree {
    fn view(&self, id: &str) -> Result<WorldNode> {
        self.node(id).cloned()
    }

    fn children(&self, id: &str) -> Result<Vec<WorldNode>> {
        Ok(self.children_of(id)?.into_iter().cloned().collect())
    }

    fn add(&mut self, parent: &str, key: &str) -> Result<NodeId> {
        self.add_child(parent, key)
    }

    fn update(&mut self, id: &str, value: &str) -> Result<()> {
        self.set_value(id, value)
    }

    fn rename(&mut self, id: &str, key: &str) -> Result<()> {
        self.set_key(id, key)
    }

    fn remove(&mut self, id: &str) -> Result<Vec<NodeId>> {
        self.remove_subtree(id)
    }

    fn snapshot(&self) -> WorldSnapshot {
        WorldTree::snapshot(self)
    }

    fn nodes(&self) -> Vec<WorldNode> {
        WorldTree::nodes(self).cloned().collect()
    }

    fn contains(&self, id: &str) -> bool {
        WorldTree::contains(self, id)
    }
}

impl RecordStore for CharacterRoster {
    fn list(&self) -> Vec<CharacterRecord> {
        self.records().to_vec()
    }

    fn get(&self, id: &str) -> Result<CharacterRecord> {
        CharacterRoster::get(self, id)
            .cloned()
            .ok_or_else(|| StoreError::CharacterNotFound(id.to_string()))
    }

    fn add(
        &mut self,
        profile: CharacterProfile,
        region_id: Option<NodeId>,
        polity_id: Option<NodeId>,
    ) -> Result<CharacterId> {
        self.insert(profile, region_id, polity_id)
    }

    fn update(&mut self, id: &str, profile: CharacterProfile) -> Result<()> {
        self.replace_profile(id, profile)
    }

    fn rebind(
        &mut self,
        id: &str,
        region_id: Option<NodeId>,
        polity_id: Option<NodeId>,
    ) -> Result<()> {
        self.set_binding(id, region_id, polity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world_tree::MICRO_ID;

    #[test]
    fn test_tree_store_through_trait_object() {
        let mut tree = WorldTree::new();
        let store: &mut dyn TreeStore = &mut tree;

        let region = store.add(MICRO_ID, "Ashreach").unwrap();
        let polity = store.add(region.as_str(), "Free Cantons").unwrap();
        store.update(polity.as_str(), "Mountain league").unwrap();

        assert_eq!(store.view(polity.as_str()).unwrap().value, "Mountain league");
        assert_eq!(store.children(polity.as_str()).unwrap().len(), 7);
        assert_eq!(
            store
                .enclosing("micro.r1.p1.culture", NodeRole::Region)
                .map(|n| n.id),
            Some(region)
        );
        assert_eq!(store.mount_points().len(), 1);
        assert!(matches!(
            store.view("micro.r9"),
            Err(StoreError::NodeNotFound(_))
        ));
    }

    #[test]
    fn test_record_store_through_trait_object() {
        let mut roster = CharacterRoster::new();
        let store: &mut dyn RecordStore = &mut roster;

        let id = store
            .add(CharacterProfile::named("Ilsa"), Some(NodeId::new("micro.r1")), None)
            .unwrap();
        store
            .rebind(id.as_str(), Some(NodeId::new("micro.r2")), Some(NodeId::new("micro.r2.p1")))
            .unwrap();

        let record = store.get(id.as_str()).unwrap();
        assert_eq!(record.region_id, Some(NodeId::new("micro.r2")));
        assert_eq!(record.polity_id, Some(NodeId::new("micro.r2.p1")));
        assert!(store.update("c40", CharacterProfile::default()).is_err());
    }
}
