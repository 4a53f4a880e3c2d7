//! Mount points - the micro-subtree anchors new characters are attached to.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{NodeId, NodeRole, WorldNode, WorldTree};

/// A region, optionally narrowed to one of its polities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountPoint {
    pub region_id: NodeId,
    pub region_key: String,
    pub polity_id: Option<NodeId>,
    pub polity_key: Option<String>,
}

impl MountPoint {
    /// The most specific node this mount point anchors to.
    pub fn anchor(&self) -> &NodeId {
        self.polity_id.as_ref().unwrap_or(&self.region_id)
    }

    pub fn display_key(&self) -> String {
        match &self.polity_key {
            Some(polity) => format!("{} / {}", self.region_key, polity),
            None => self.region_key.clone(),
        }
    }
}

/// Derive mount points from a node set.
///
/// Every polity yields one mount point. A region without polities degrades to a
/// single region-only anchor.
pub fn mount_points<'a>(nodes: impl IntoIterator<Item = &'a WorldNode>) -> Vec<MountPoint> {
    let by_id: BTreeMap<&NodeId, &WorldNode> = nodes.into_iter().map(|n| (&n.id, n)).collect();
    let mut regions: Vec<&WorldNode> = by_id
        .values()
        .copied()
        .filter(|n| n.role == NodeRole::Region)
        .collect();
    regions.sort_by(|a, b| a.id.natural_cmp(&b.id));
    let mut points = Vec::new();

    for region in regions {
        let polities: Vec<&WorldNode> = region
            .children
            .iter()
            .filter_map(|c| by_id.get(c).copied())
            .filter(|n| n.role == NodeRole::Polity)
            .collect();

        if polities.is_empty() {
            points.push(MountPoint {
                region_id: region.id.clone(),
                region_key: region.key.clone(),
                polity_id: None,
                polity_key: None,
            });
            continue;
        }

        for polity in polities {
            points.push(MountPoint {
                region_id: region.id.clone(),
                region_key: region.key.clone(),
                polity_id: Some(polity.id.clone()),
                polity_key: Some(polity.key.clone()),
            });
        }
    }

    points
}

impl WorldTree {
    pub fn mount_points(&self) -> Vec<MountPoint> {
        mount_points(self.nodes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world_tree::MICRO_ID;

    #[test]
    fn test_region_without_polity_is_region_only() {
        let mut tree = WorldTree::new();
        tree.add_child(MICRO_ID, "Ashreach").unwrap();

        let points = tree.mount_points();
        assert_eq!(points.len(), 1);
        assert!(points[0].polity_id.is_none());
        assert_eq!(points[0].anchor(), &NodeId::new("micro.r1"));
        assert_eq!(points[0].display_key(), "Ashreach");
    }

    #[test]
    fn test_one_mount_point_per_polity() {
        let mut tree = WorldTree::new();
        let region = tree.add_child(MICRO_ID, "Ashreach").unwrap();
        tree.add_child(region.as_str(), "Free Cantons").unwrap();
        tree.add_child(region.as_str(), "Ember Court").unwrap();
        tree.add_child(MICRO_ID, "Glasswater").unwrap();

        let points = tree.mount_points();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].display_key(), "Ashreach / Free Cantons");
        assert_eq!(points[1].anchor(), &NodeId::new("micro.r1.p2"));
        assert!(points[2].polity_id.is_none());
    }
}
