//! World tree - the hierarchical setting every narrative update reasons over.
//!
//! The root `world` holds exactly two subtrees:
//! - **macro**: cosmology, history and the other setting-wide topics. Its shape is
//!   fixed when the world is built from an outline; afterwards only values change.
//! - **micro**: regions, the polities inside them, and the seven aspects every
//!   polity owns. Narratives create and destroy structure only here.

mod mount;
mod outline;

pub use mount::*;
pub use outline::*;

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use tracing::warn;

use crate::error::{Result, StoreError};

pub const ROOT_ID: &str = "world";
pub const MACRO_ID: &str = "macro";
pub const MICRO_ID: &str = "micro";

/// Fixed attribute children of every polity, as (identifier segment, key).
pub const POLITY_ASPECTS: [(&str, &str); 7] = [
    ("culture", "Culture"),
    ("economy", "Economy"),
    ("politics", "Politics"),
    ("population", "Population"),
    ("geography", "Geography"),
    ("technology", "Technology"),
    ("resources", "Resources"),
];

/// Dot-delimited node identifier, e.g. `micro.r1.p2.economy`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn root() -> Self {
        Self::new(ROOT_ID)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The last dot-separated segment.
    pub fn segment(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }

    /// Identifier of a child carrying the given segment.
    pub fn child(&self, segment: &str) -> Self {
        Self(format!("{}.{}", self.0, segment))
    }

    /// Listing order: segment by segment, with trailing serials compared as
    /// numbers, so `micro.r2` comes before `micro.r10` and `1.2` before `1.10`.
    ///
    /// `Ord` stays plain string order, which map lookups by `&str` rely on.
    pub fn natural_cmp(&self, other: &Self) -> Ordering {
        let mut left = self.0.split('.');
        let mut right = other.0.split('.');
        loop {
            match (left.next(), right.next()) {
                (None, None) => return Ordering::Equal,
                (None, Some(_)) => return Ordering::Less,
                (Some(_), None) => return Ordering::Greater,
                (Some(a), Some(b)) => match segment_cmp(a, b) {
                    Ordering::Equal => continue,
                    order => return order,
                },
            }
        }
    }
}

fn segment_cmp(a: &str, b: &str) -> Ordering {
    let split = |s: &str| -> (usize, usize) {
        let head = s.trim_end_matches(|c: char| c.is_ascii_digit()).len();
        let zeros = s[head..].len() - s[head..].trim_start_matches('0').len();
        (head, head + zeros)
    };
    let (a_head, a_digits) = split(a);
    let (b_head, b_digits) = split(b);
    a[..a_head]
        .cmp(&b[..b_head])
        .then_with(|| a[a_digits..].len().cmp(&b[b_digits..].len()))
        .then_with(|| a[a_digits..].cmp(&b[b_digits..]))
        .then_with(|| a.cmp(b))
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl PartialEq<&str> for NodeId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Structural role of a node, fixed at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    Root,
    MacroRoot,
    Macro,
    MicroRoot,
    Region,
    Polity,
    Aspect,
}

impl NodeRole {
    pub fn is_macro(self) -> bool {
        matches!(self, Self::MacroRoot | Self::Macro)
    }

    pub fn is_micro(self) -> bool {
        matches!(
            self,
            Self::MicroRoot | Self::Region | Self::Polity | Self::Aspect
        )
    }

    /// Whether new children may be attached below a node of this role.
    pub fn accepts_children(self) -> bool {
        matches!(self, Self::MicroRoot | Self::Region)
    }

    /// Whether the node may be deleted together with its subtree.
    pub fn is_removable(self) -> bool {
        matches!(self, Self::Region | Self::Polity)
    }

    /// Whether the node's key may change. Fixed-shape nodes keep their titles.
    pub fn is_renamable(self) -> bool {
        matches!(self, Self::Region | Self::Polity)
    }

    fn child_role(self) -> Option<NodeRole> {
        match self {
            Self::MacroRoot | Self::Macro => Some(Self::Macro),
            Self::MicroRoot => Some(Self::Region),
            Self::Region => Some(Self::Polity),
            Self::Polity => Some(Self::Aspect),
            Self::Root | Self::Aspect => None,
        }
    }
}

/// A single node of the world tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldNode {
    pub id: NodeId,
    /// Title of the node.
    pub key: String,
    /// Free-text content.
    pub value: String,
    pub role: NodeRole,
    pub parent: Option<NodeId>,
    /// Child identifiers in [`NodeId::natural_cmp`] order.
    pub children: Vec<NodeId>,
}

impl WorldNode {
    fn new(id: NodeId, key: impl Into<String>, role: NodeRole, parent: Option<NodeId>) -> Self {
        Self {
            id,
            key: key.into(),
            value: String::new(),
            role,
            parent,
            children: Vec::new(),
        }
    }

    fn insert_child(&mut self, child: NodeId) {
        if let Err(at) = self.children.binary_search_by(|c| c.natural_cmp(&child)) {
            self.children.insert(at, child);
        }
    }

    fn remove_child(&mut self, child: &str) {
        self.children.retain(|c| c.as_str() != child);
    }
}

/// One entry of a world snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotNode {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub children: Vec<String>,
}

/// Flat `{identifier: {key, value, children}}` view of the whole tree.
pub type WorldSnapshot = BTreeMap<String, SnapshotNode>;

/// The world tree. Listings follow [`NodeId::natural_cmp`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldTree {
    nodes: BTreeMap<NodeId, WorldNode>,
}

impl Default for WorldTree {
    fn default() -> Self {
        Self::new()
    }
}

impl WorldTree {
    /// Create a tree holding only the root and the two empty subtrees.
    pub fn new() -> Self {
        let root_id = NodeId::root();
        let macro_id = NodeId::new(MACRO_ID);
        let micro_id = NodeId::new(MICRO_ID);

        let mut root = WorldNode::new(root_id.clone(), "World", NodeRole::Root, None);
        root.insert_child(macro_id.clone());
        root.insert_child(micro_id.clone());

        let mut nodes = BTreeMap::new();
        nodes.insert(
            macro_id.clone(),
            WorldNode::new(macro_id, "Macro Setting", NodeRole::MacroRoot, Some(root_id.clone())),
        );
        nodes.insert(
            micro_id.clone(),
            WorldNode::new(micro_id, "Micro Setting", NodeRole::MicroRoot, Some(root_id.clone())),
        );
        nodes.insert(root_id, root);

        Self { nodes }
    }

    /// Build a tree whose macro subtree follows the given outline.
    ///
    /// Entry numbers become macro identifiers (`1`, `1.2`, ...). Each entry's parent
    /// must appear earlier in the outline.
    pub fn from_outline(outline: &MacroOutline) -> Result<Self> {
        let mut tree = Self::new();

        for entry in outline.entries() {
            let id = NodeId::new(entry.number.clone());
            let parent = match entry.number.rsplit_once('.') {
                Some((head, _)) => NodeId::new(head),
                None => NodeId::new(MACRO_ID),
            };

            if tree.nodes.contains_key(&id) {
                return Err(StoreError::InvalidOutline(format!("duplicate entry {}", id)));
            }
            if !tree.nodes.contains_key(&parent) {
                return Err(StoreError::InvalidOutline(format!(
                    "entry {} has no parent {}",
                    id, parent
                )));
            }

            let mut node = WorldNode::new(id, entry.title.clone(), NodeRole::Macro, Some(parent));
            node.value = entry.hint.clone();
            tree.insert_node(node);
        }

        Ok(tree)
    }

    pub fn get(&self, id: &str) -> Option<&WorldNode> {
        self.nodes.get(id)
    }

    /// Get a node, failing with [`StoreError::NodeNotFound`].
    pub fn node(&self, id: &str) -> Result<&WorldNode> {
        self.get(id)
            .ok_or_else(|| StoreError::NodeNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate over every node in listing order.
    pub fn nodes(&self) -> impl Iterator<Item = &WorldNode> {
        let mut all: Vec<&WorldNode> = self.nodes.values().collect();
        all.sort_by(|a, b| a.id.natural_cmp(&b.id));
        all.into_iter()
    }

    pub fn role(&self, id: &str) -> Option<NodeRole> {
        self.get(id).map(|n| n.role)
    }

    pub fn children_of(&self, id: &str) -> Result<Vec<&WorldNode>> {
        let node = self.node(id)?;
        Ok(node
            .children
            .iter()
            .filter_map(|c| self.nodes.get(c))
            .collect())
    }

    /// Attach a new child under `parent` and return its synthesized identifier.
    ///
    /// Under `micro` the child is a region (`micro.r<N>`); under a region it is a
    /// polity (`<region>.p<N>`) and immediately receives its seven aspects.
    pub fn add_child(&mut self, parent: &str, key: &str) -> Result<NodeId> {
        let parent_node = self.node(parent)?;
        if !parent_node.role.accepts_children() {
            return Err(StoreError::FrozenStructure(parent.to_string()));
        }

        let (role, prefix) = match parent_node.role {
            NodeRole::MicroRoot => (NodeRole::Region, "r"),
            _ => (NodeRole::Polity, "p"),
        };
        let serial = next_serial(parent_node, prefix)?;
        let id = parent_node.id.child(&format!("{}{}", prefix, serial));
        let parent_id = parent_node.id.clone();

        self.insert_node(WorldNode::new(id.clone(), key, role, Some(parent_id)));
        if role == NodeRole::Polity {
            self.attach_aspects(&id);
        }

        Ok(id)
    }

    pub fn set_value(&mut self, id: &str, value: impl Into<String>) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| StoreError::NodeNotFound(id.to_string()))?;
        node.value = value.into();
        Ok(())
    }

    pub fn set_key(&mut self, id: &str, key: impl Into<String>) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| StoreError::NodeNotFound(id.to_string()))?;
        if !node.role.is_renamable() {
            return Err(StoreError::FrozenStructure(id.to_string()));
        }
        node.key = key.into();
        Ok(())
    }

    /// Remove a region or polity together with its subtree.
    ///
    /// Returns the removed identifiers, the target first.
    pub fn remove_subtree(&mut self, id: &str) -> Result<Vec<NodeId>> {
        let node = self.node(id)?;
        if !node.role.is_removable() {
            return Err(if node.role.is_macro() {
                StoreError::FrozenStructure(id.to_string())
            } else {
                StoreError::ForbiddenRemoval(id.to_string())
            });
        }

        let parent = node.parent.clone();
        let removed = self.subtree(id);

        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.remove_child(id);
        }
        for node_id in &removed {
            self.nodes.remove(node_id);
        }

        Ok(removed)
    }

    /// Identifiers of `id` and all of its descendants, pre-order.
    pub fn subtree(&self, id: &str) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<&NodeId> = self.get(id).map(|n| &n.id).into_iter().collect();

        while let Some(current) = stack.pop() {
            out.push(current.clone());
            if let Some(node) = self.nodes.get(current) {
                stack.extend(node.children.iter().rev());
            }
        }

        out
    }

    /// Walk from `id` toward the root and return the first node with `role`.
    pub fn ancestor_with_role(&self, id: &str, role: NodeRole) -> Option<&WorldNode> {
        let mut current = self.get(id);
        while let Some(node) = current {
            if node.role == role {
                return Some(node);
            }
            current = node.parent.as_ref().and_then(|p| self.nodes.get(p));
        }
        None
    }

    pub fn regions(&self) -> Vec<&WorldNode> {
        self.nodes_with_role(NodeRole::Region)
    }

    pub fn polities(&self) -> Vec<&WorldNode> {
        self.nodes_with_role(NodeRole::Polity)
    }

    fn nodes_with_role(&self, role: NodeRole) -> Vec<&WorldNode> {
        self.nodes().filter(|n| n.role == role).collect()
    }

    /// Polities lacking at least one fixed aspect. Always empty for a healthy tree.
    pub fn polities_missing_aspects(&self) -> Vec<NodeId> {
        self.polities()
            .into_iter()
            .filter(|p| {
                POLITY_ASPECTS
                    .iter()
                    .any(|(segment, _)| !p.children.contains(&p.id.child(segment)))
            })
            .map(|p| p.id.clone())
            .collect()
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        self.nodes
            .values()
            .map(|node| {
                (
                    node.id.to_string(),
                    SnapshotNode {
                        key: node.key.clone(),
                        value: node.value.clone(),
                        children: node.children.iter().map(|c| c.to_string()).collect(),
                    },
                )
            })
            .collect()
    }

    /// Rebuild a tree from a snapshot.
    ///
    /// Roles and parent links are derived by walking down from the root. Nodes not
    /// reachable from the root are skipped; polities missing aspects get them back
    /// with empty content.
    pub fn from_snapshot(snapshot: &WorldSnapshot) -> Result<Self> {
        for required in [ROOT_ID, MACRO_ID, MICRO_ID] {
            if !snapshot.contains_key(required) {
                return Err(StoreError::InvalidSnapshot(format!(
                    "missing {} node",
                    required
                )));
            }
        }

        let mut nodes: BTreeMap<NodeId, WorldNode> = BTreeMap::new();
        let mut queue = VecDeque::from([(NodeId::root(), NodeRole::Root, None::<NodeId>)]);

        while let Some((id, role, parent)) = queue.pop_front() {
            let entry = snapshot.get(id.as_str()).ok_or_else(|| {
                StoreError::InvalidSnapshot(format!("node {} is listed but missing", id))
            })?;
            if nodes.contains_key(&id) {
                return Err(StoreError::InvalidSnapshot(format!("node {} appears twice", id)));
            }

            let mut node = WorldNode::new(id.clone(), entry.key.clone(), role, parent);
            node.value = entry.value.clone();

            for child in &entry.children {
                let child_role = match role {
                    NodeRole::Root => match child.as_str() {
                        MACRO_ID => NodeRole::MacroRoot,
                        MICRO_ID => NodeRole::MicroRoot,
                        other => {
                            return Err(StoreError::InvalidSnapshot(format!(
                                "unexpected root child {}",
                                other
                            )))
                        }
                    },
                    other => other.child_role().ok_or_else(|| {
                        StoreError::InvalidSnapshot(format!("node {} cannot have children", id))
                    })?,
                };

                let child_id = NodeId::new(child.clone());
                if child_role == NodeRole::Aspect
                    && !POLITY_ASPECTS.iter().any(|(s, _)| *s == child_id.segment())
                {
                    return Err(StoreError::InvalidSnapshot(format!(
                        "polity {} has unknown child {}",
                        id, child_id
                    )));
                }

                node.insert_child(child_id.clone());
                queue.push_back((child_id, child_role, Some(id.clone())));
            }

            nodes.insert(id, node);
        }

        if nodes.len() < snapshot.len() {
            warn!(
                skipped = snapshot.len() - nodes.len(),
                "Snapshot contains nodes unreachable from the root"
            );
        }

        let mut tree = Self { nodes };
        let polities: Vec<NodeId> = tree.polities().into_iter().map(|p| p.id.clone()).collect();
        for polity in polities {
            let restored = tree.attach_aspects(&polity);
            if restored > 0 {
                warn!(polity = %polity, restored, "Restored missing polity aspects");
            }
        }

        Ok(tree)
    }

    /// Add any missing fixed aspects below a polity. Returns how many were added.
    fn attach_aspects(&mut self, polity: &NodeId) -> usize {
        let mut added = 0;
        for (segment, key) in POLITY_ASPECTS {
            let id = polity.child(segment);
            if !self.nodes.contains_key(&id) {
                self.insert_node(WorldNode::new(id, key, NodeRole::Aspect, Some(polity.clone())));
                added += 1;
            }
        }
        added
    }

    fn insert_node(&mut self, node: WorldNode) {
        if let Some(parent) = node.parent.as_ref().and_then(|p| self.nodes.get_mut(p)) {
            parent.insert_child(node.id.clone());
        }
        self.nodes.insert(node.id.clone(), node);
    }
}

/// One more than the largest `<prefix><N>` segment among the node's children.
fn next_serial(parent: &WorldNode, prefix: &str) -> Result<u32> {
    parent
        .children
        .iter()
        .filter_map(|c| c.segment().strip_prefix(prefix)?.parse::<u32>().ok())
        .max()
        .unwrap_or(0)
        .checked_add(1)
        .ok_or_else(|| StoreError::IdentifierExhausted(parent.id.child(prefix).to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with_polity() -> (WorldTree, NodeId, NodeId) {
        let mut tree = WorldTree::new();
        let region = tree.add_child(MICRO_ID, "Ashreach").unwrap();
        let polity = tree.add_child(region.as_str(), "Free Cantons").unwrap();
        (tree, region, polity)
    }

    #[test]
    fn test_new_tree_layout() {
        let tree = WorldTree::new();
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.role(ROOT_ID), Some(NodeRole::Root));
        assert_eq!(tree.role(MACRO_ID), Some(NodeRole::MacroRoot));
        assert_eq!(tree.role(MICRO_ID), Some(NodeRole::MicroRoot));
        assert_eq!(tree.children_of(ROOT_ID).unwrap().len(), 2);
    }

    #[test]
    fn test_region_and_polity_identifiers() {
        let (mut tree, region, polity) = tree_with_polity();
        assert_eq!(region, "micro.r1");
        assert_eq!(polity, "micro.r1.p1");

        let second = tree.add_child(MICRO_ID, "Glasswater").unwrap();
        assert_eq!(second, "micro.r2");
        assert_eq!(tree.role(second.as_str()), Some(NodeRole::Region));
    }

    #[test]
    fn test_polity_receives_aspects() {
        let (tree, _, polity) = tree_with_polity();
        let children = tree.children_of(polity.as_str()).unwrap();
        assert_eq!(children.len(), POLITY_ASPECTS.len());
        assert!(children.iter().all(|c| c.role == NodeRole::Aspect));
        assert!(tree.get("micro.r1.p1.economy").is_some());
        assert!(tree.polities_missing_aspects().is_empty());
    }

    #[test]
    fn test_frozen_parents_reject_children() {
        let (mut tree, _, polity) = tree_with_polity();
        assert!(matches!(
            tree.add_child(MACRO_ID, "New Topic"),
            Err(StoreError::FrozenStructure(_))
        ));
        assert!(matches!(
            tree.add_child(polity.as_str(), "Harbor District"),
            Err(StoreError::FrozenStructure(_))
        ));
        assert!(matches!(
            tree.add_child(ROOT_ID, "Third Subtree"),
            Err(StoreError::FrozenStructure(_))
        ));
    }

    #[test]
    fn test_forbidden_removals() {
        let (mut tree, _, _) = tree_with_polity();
        assert!(matches!(
            tree.remove_subtree(ROOT_ID),
            Err(StoreError::ForbiddenRemoval(_))
        ));
        assert!(matches!(
            tree.remove_subtree(MICRO_ID),
            Err(StoreError::ForbiddenRemoval(_))
        ));
        assert!(matches!(
            tree.remove_subtree("micro.r1.p1.culture"),
            Err(StoreError::ForbiddenRemoval(_))
        ));
        assert!(tree.polities_missing_aspects().is_empty());
    }

    #[test]
    fn test_remove_polity_subtree() {
        let (mut tree, region, polity) = tree_with_polity();
        let before = tree.len();

        let removed = tree.remove_subtree(polity.as_str()).unwrap();
        assert_eq!(removed.len(), 8);
        assert_eq!(removed[0], polity);
        assert_eq!(tree.len(), before - 8);
        assert!(tree.node(region.as_str()).unwrap().children.is_empty());
    }

    #[test]
    fn test_set_key_respects_fixed_titles() {
        let (mut tree, region, _) = tree_with_polity();
        tree.set_key(region.as_str(), "Ashreach Marches").unwrap();
        assert_eq!(tree.node(region.as_str()).unwrap().key, "Ashreach Marches");
        assert!(tree.set_key("micro.r1.p1.economy", "Trade").is_err());
        assert!(tree.set_key(MACRO_ID, "Everything").is_err());
    }

    #[test]
    fn test_ancestor_with_role() {
        let (tree, region, polity) = tree_with_polity();
        let found = tree
            .ancestor_with_role("micro.r1.p1.politics", NodeRole::Polity)
            .unwrap();
        assert_eq!(found.id, polity);
        let found = tree
            .ancestor_with_role(polity.as_str(), NodeRole::Region)
            .unwrap();
        assert_eq!(found.id, region);
        assert!(tree.ancestor_with_role(MACRO_ID, NodeRole::Region).is_none());
    }

    #[test]
    fn test_snapshot_restores_structure() {
        let (mut tree, _, polity) = tree_with_polity();
        tree.set_value(polity.as_str(), "A league of mountain towns").unwrap();

        let rebuilt = WorldTree::from_snapshot(&tree.snapshot()).unwrap();
        assert_eq!(rebuilt.len(), tree.len());
        assert_eq!(rebuilt.role(polity.as_str()), Some(NodeRole::Polity));
        assert_eq!(
            rebuilt.node(polity.as_str()).unwrap().value,
            "A league of mountain towns"
        );
    }

    #[test]
    fn test_snapshot_restores_missing_aspects() {
        let (tree, _, _) = tree_with_polity();
        let mut snapshot = tree.snapshot();
        snapshot.remove("micro.r1.p1.economy");
        snapshot
            .get_mut("micro.r1.p1")
            .unwrap()
            .children
            .retain(|c| c != "micro.r1.p1.economy");

        let rebuilt = WorldTree::from_snapshot(&snapshot).unwrap();
        assert!(rebuilt.get("micro.r1.p1.economy").is_some());
        assert!(rebuilt.polities_missing_aspects().is_empty());
    }

    #[test]
    fn test_snapshot_without_micro_is_invalid() {
        let mut snapshot = WorldTree::new().snapshot();
        snapshot.remove(MICRO_ID);
        assert!(matches!(
            WorldTree::from_snapshot(&snapshot),
            Err(StoreError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn test_siblings_list_in_numeric_order() {
        let mut tree = WorldTree::new();
        for n in 1..=11 {
            tree.add_child(MICRO_ID, &format!("Region {}", n)).unwrap();
        }

        let listed: Vec<String> = tree
            .children_of(MICRO_ID)
            .unwrap()
            .iter()
            .map(|n| n.id.segment().to_string())
            .collect();
        assert_eq!(listed[1], "r2");
        assert_eq!(listed[9], "r10");
        assert_eq!(listed[10], "r11");

        let regions: Vec<&str> = tree.regions().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(regions[..3], ["micro.r1", "micro.r2", "micro.r3"]);
        assert_eq!(tree.snapshot()[MICRO_ID].children[2], "micro.r3");
        assert_eq!(tree.get("micro.r10").unwrap().key, "Region 10");
    }

    #[test]
    fn test_natural_order_of_identifiers() {
        let id = |s: &str| NodeId::new(s);
        assert_eq!(id("micro.r2").natural_cmp(&id("micro.r10")), Ordering::Less);
        assert_eq!(id("1.10").natural_cmp(&id("1.2")), Ordering::Greater);
        assert_eq!(id("micro").natural_cmp(&id("micro.r1")), Ordering::Less);
        assert_eq!(id("micro.r1.p1.culture").natural_cmp(&id("micro.r1.p1.economy")), Ordering::Less);
        assert_eq!(id("macro").natural_cmp(&id("micro")), Ordering::Less);
    }

    #[test]
    fn test_serial_overflow_is_an_error() {
        let mut snapshot = WorldTree::new().snapshot();
        let last = format!("micro.r{}", u32::MAX);
        snapshot.get_mut(MICRO_ID).unwrap().children.push(last.clone());
        snapshot.insert(
            last.clone(),
            SnapshotNode {
                key: "Edge of the Map".into(),
                value: String::new(),
                children: Vec::new(),
            },
        );
        let mut tree = WorldTree::from_snapshot(&snapshot).unwrap();
        assert!(tree.contains(&last));

        assert!(matches!(
            tree.add_child(MICRO_ID, "Beyond"),
            Err(StoreError::IdentifierExhausted(_))
        ));
        assert_eq!(tree.children_of(MICRO_ID).unwrap().len(), 1);
    }

    #[test]
    fn test_from_default_outline() {
        let tree = WorldTree::from_outline(&MacroOutline::default()).unwrap();
        let macro_nodes = tree.nodes().filter(|n| n.role == NodeRole::Macro).count();
        assert_eq!(macro_nodes, 24);
        assert_eq!(tree.children_of(MACRO_ID).unwrap().len(), 6);
        assert_eq!(tree.node("2.1").unwrap().parent.as_ref().unwrap(), &NodeId::new("2"));
    }
}
