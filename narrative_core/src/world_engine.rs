//! World tree mutation engine.
//!
//! Planning turns a narrative into resolved [`ActionDecision`]s without touching
//! the tree. Applying commits them under the structural rules of the tree:
//!
//! - ADD names a parent only; children and their identifiers are synthesized here.
//!   An ADD whose parent cannot hold children becomes an UPDATE of that parent.
//! - UPDATE on a micro node moves to a more specific node the narrative names.
//! - REMOVE deletes a region or polity with its whole subtree, nothing else.
//! - A new polity always gets its seven aspects, each with generated content.
//!
//! [`WorldEngine::generate_world`] fills a freshly outlined tree from a premise.

use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};
use world_bible::{NodeId, NodeRole, TreeStore, WorldNode, MICRO_ID, ROOT_ID};

use crate::completion::ModelChannel;
use crate::config::{GenerationConfig, HeuristicConfig};
use crate::context_assembler::scan_narrative;
use crate::decision::keyword_hit;
use crate::error::Result;
use crate::grammar::{
    parse_children_flag, parse_key_value, parse_name_list, parse_polity_intent, parse_world_actions,
    resolve_node,
    ActionDecision, ActionFlag, KeyValue, PolityIntent, Target, Unresolved, WorldIntent,
};
use crate::prompts::{self, Stage};

/// One committed world action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedWorldAction {
    pub flag: ActionFlag,
    /// The node written (UPDATE), the parent (ADD) or the removed node (REMOVE).
    pub target: NodeId,
    pub created: Vec<NodeId>,
    pub removed: Vec<NodeId>,
    pub note: Option<String>,
}

impl AppliedWorldAction {
    fn new(flag: ActionFlag, target: NodeId) -> Self {
        Self {
            flag,
            target,
            created: Vec::new(),
            removed: Vec::new(),
            note: None,
        }
    }
}

/// Everything a batch of world actions changed.
#[derive(Debug, Clone, Default)]
pub struct WorldOutcome {
    pub applied: Vec<AppliedWorldAction>,
    /// Every removed identifier, subtrees included.
    pub removed: BTreeSet<NodeId>,
    /// Polities created or rewritten, directly or through an aspect.
    pub touched_polities: BTreeSet<NodeId>,
}

/// What initial world generation produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorldGeneration {
    /// Nodes whose content was written, in writing order.
    pub written: Vec<NodeId>,
    pub regions: Vec<NodeId>,
    pub polities: Vec<NodeId>,
}

/// Macro topics as `id title: content` lines.
pub fn macro_summary(nodes: &[WorldNode]) -> String {
    let lines: Vec<String> = nodes
        .iter()
        .filter(|n| n.role == NodeRole::Macro && !n.value.trim().is_empty())
        .map(|n| format!("{} {}: {}", n.id, n.key, prompts::clip(&n.value, 160)))
        .collect();
    if lines.is_empty() {
        "none".to_string()
    } else {
        lines.join("\n")
    }
}

/// Regions and polities as an indented outline.
pub fn micro_outline(nodes: &[WorldNode]) -> String {
    let mut out = String::new();
    for region in nodes.iter().filter(|n| n.role == NodeRole::Region) {
        out.push_str(&format!("- {} {}\n", region.id, region.key));
        for polity in nodes
            .iter()
            .filter(|n| n.role == NodeRole::Polity && region.children.contains(&n.id))
        {
            out.push_str(&format!("  - {} {}\n", polity.id, polity.key));
        }
    }
    if out.is_empty() {
        out.push_str("(no regions yet)\n");
    }
    out
}

/// One line per planned action, for validation prompts.
pub fn summarize(actions: &[ActionDecision]) -> String {
    actions
        .iter()
        .map(|action| match &action.intent {
            WorldIntent::Add { parent, levels } => {
                let names: Vec<&str> = levels
                    .iter()
                    .map(|l| l.as_deref().unwrap_or("(to be named)"))
                    .collect();
                format!("ADD under {}: {}", parent, names.join(" > "))
            }
            WorldIntent::Update { target } => format!("UPDATE {}", target),
            WorldIntent::Remove { target } => format!("REMOVE {}", target),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_descendant(id: &NodeId, ancestor: &NodeId) -> bool {
    id.as_str()
        .strip_prefix(ancestor.as_str())
        .is_some_and(|rest| rest.starts_with('.'))
}

/// Read a key/value reply; an unreadable reply becomes the value as a whole.
pub fn read_key_value(reply: &str) -> KeyValue {
    match parse_key_value(reply) {
        Some(parsed) => parsed.value,
        None => {
            let text = reply.trim();
            KeyValue {
                key: None,
                value: (!text.is_empty()).then(|| text.to_string()),
            }
        }
    }
}

pub struct WorldEngine<'a> {
    channel: &'a ModelChannel<'a>,
    heuristics: &'a HeuristicConfig,
}

impl<'a> WorldEngine<'a> {
    pub fn new(channel: &'a ModelChannel<'a>, heuristics: &'a HeuristicConfig) -> Self {
        Self {
            channel,
            heuristics,
        }
    }

    /// Propose world actions for a narrative. Every returned action is resolved.
    pub fn plan(&self, tree: &dyn TreeStore, narrative: &str, context: &str) -> Vec<ActionDecision> {
        let nodes = tree.nodes();
        let body = prompts::plan_world(narrative, context, &micro_outline(&nodes));
        let reply = self.channel.ask(Stage::PlanWorld, &body);

        let mut actions = match parse_world_actions(&reply) {
            Some(parsed) => {
                debug!(layer = ?parsed.layer, count = parsed.value.len(), "World actions parsed");
                parsed.value
            }
            None => {
                let mentioned = scan_narrative(narrative, &nodes, &[]).world;
                info!(
                    count = mentioned.len(),
                    "World plan unreadable, updating nodes the narrative names"
                );
                mentioned
                    .into_iter()
                    .map(|id| ActionDecision::update(id, reply.trim()))
                    .collect()
            }
        };

        actions.retain_mut(|action| {
            let Target::Unresolved(reference) = action.index() else {
                return true;
            };
            match resolve_node(reference, &nodes) {
                Ok(id) => {
                    *action.index_mut() = Target::Resolved(id);
                    true
                }
                Err(reason) => {
                    warn!(flag = action.flag().label(), %reason, "Dropping world action");
                    false
                }
            }
        });

        if keyword_hit(&narrative.to_lowercase(), &self.heuristics.polity_keywords).is_some() {
            let polity_actions = self.polity_actions(narrative, &nodes);
            if !polity_actions.is_empty() {
                let named_parents: Vec<Target<NodeId>> = polity_actions
                    .iter()
                    .filter(|a| a.flag() == ActionFlag::Add)
                    .map(|a| a.index().clone())
                    .collect();
                actions.retain(|a| match &a.intent {
                    WorldIntent::Add { parent, levels } => {
                        !(named_parents.contains(parent) && levels.iter().all(Option::is_none))
                    }
                    _ => true,
                });
                actions.extend(polity_actions);
            }
        }

        let mut unique: Vec<ActionDecision> = Vec::new();
        for action in actions {
            if !unique.iter().any(|u| u.intent == action.intent) {
                unique.push(action);
            }
        }
        unique
    }

    /// Founding or dissolving a polity, read by a dedicated question.
    fn polity_actions(&self, narrative: &str, nodes: &[WorldNode]) -> Vec<ActionDecision> {
        let body = prompts::polity_intent(narrative, &micro_outline(nodes));
        let reply = self.channel.ask(Stage::PolityIntent, &body);
        let Some(intent) = parse_polity_intent(&reply).and_then(|p| p.value) else {
            return Vec::new();
        };

        let regions: Vec<WorldNode> = nodes
            .iter()
            .filter(|n| n.role == NodeRole::Region)
            .cloned()
            .collect();
        let polities: Vec<WorldNode> = nodes
            .iter()
            .filter(|n| n.role == NodeRole::Polity)
            .cloned()
            .collect();

        let intent_action = match intent {
            PolityIntent::Found { region, name } => {
                if resolve_node(&name, &polities).is_ok() {
                    debug!(%name, "Polity already exists");
                    return Vec::new();
                }
                let (parent, levels) = match resolve_node(&region, &regions) {
                    Ok(id) => (id, vec![Some(name)]),
                    Err(Unresolved::NotFound(_)) => {
                        info!(%region, "Region does not exist yet, creating it first");
                        (NodeId::new(MICRO_ID), vec![Some(region), Some(name)])
                    }
                    Err(reason) => {
                        warn!(%reason, "Cannot place new polity");
                        return Vec::new();
                    }
                };
                WorldIntent::Add {
                    parent: Target::Resolved(parent),
                    levels,
                }
            }
            PolityIntent::Dissolve { polity } => match resolve_node(&polity, &polities) {
                Ok(id) => WorldIntent::Remove {
                    target: Target::Resolved(id),
                },
                Err(reason) => {
                    warn!(%reason, "Cannot dissolve polity");
                    return Vec::new();
                }
            },
        };

        vec![ActionDecision {
            intent: intent_action,
            raw: reply.trim().to_string(),
        }]
    }

    /// Commit resolved actions in order. Unresolved actions are skipped.
    pub fn apply(
        &self,
        tree: &mut dyn TreeStore,
        narrative: &str,
        actions: &[ActionDecision],
    ) -> Result<WorldOutcome> {
        let mut outcome = WorldOutcome::default();
        let mut updated_regions: Vec<NodeId> = Vec::new();

        for action in actions {
            let Some(index) = action.index().resolved() else {
                continue;
            };
            if !tree.contains(index.as_str()) {
                info!(%index, flag = action.flag().label(), "Target no longer exists, skipping");
                continue;
            }

            match &action.intent {
                WorldIntent::Add { levels, .. } => {
                    let parent = tree.view(index.as_str())?;
                    if !parent.role.accepts_children() {
                        warn!(%index, role = ?parent.role, "ADD under fixed structure, updating instead");
                        let written = self.update_node(tree, narrative, index, &mut outcome)?;
                        if written.role == NodeRole::Region {
                            updated_regions.push(written.id.clone());
                        }
                        let mut applied = AppliedWorldAction::new(ActionFlag::Update, written.id);
                        applied.note = Some("downgraded from ADD".to_string());
                        outcome.applied.push(applied);
                        continue;
                    }
                    let created = self.add_levels(tree, narrative, parent, levels, &mut outcome)?;
                    let mut applied = AppliedWorldAction::new(ActionFlag::Add, index.clone());
                    applied.created = created;
                    outcome.applied.push(applied);
                }
                WorldIntent::Update { .. } => {
                    let written = self.update_node(tree, narrative, index, &mut outcome)?;
                    if written.role == NodeRole::Region {
                        updated_regions.push(written.id.clone());
                    }
                    let mut applied = AppliedWorldAction::new(ActionFlag::Update, written.id.clone());
                    if &written.id != index {
                        applied.note = Some(format!("redirected from {}", index));
                    }
                    outcome.applied.push(applied);
                }
                WorldIntent::Remove { .. } => {
                    let node = tree.view(index.as_str())?;
                    if !node.role.is_removable() {
                        warn!(%index, role = ?node.role, "Removal forbidden, skipping");
                        continue;
                    }
                    let removed = tree.remove(index.as_str())?;
                    info!(%index, count = removed.len(), "Removed subtree");
                    outcome.touched_polities.retain(|p| !removed.contains(p));
                    outcome.removed.extend(removed.iter().cloned());
                    let mut applied = AppliedWorldAction::new(ActionFlag::Remove, index.clone());
                    applied.removed = removed;
                    outcome.applied.push(applied);
                }
            }
        }

        for region in updated_regions {
            self.cascade_region(tree, narrative, &region, &mut outcome)?;
        }

        Ok(outcome)
    }

    /// Create one node per level, each under the previous one.
    fn add_levels(
        &self,
        tree: &mut dyn TreeStore,
        narrative: &str,
        parent: WorldNode,
        levels: &[Option<String>],
        outcome: &mut WorldOutcome,
    ) -> Result<Vec<NodeId>> {
        let mut created = Vec::new();
        let mut parent = parent;

        for level in levels {
            if !parent.role.accepts_children() {
                warn!(parent = %parent.id, "Dropping ADD levels below a polity");
                break;
            }
            let kind = match parent.role {
                NodeRole::MicroRoot => "region",
                _ => "polity",
            };
            let siblings: Vec<String> = tree
                .children(parent.id.as_str())?
                .into_iter()
                .map(|c| c.key)
                .collect();

            let body = prompts::node_add(narrative, &parent, &siblings, kind, level.as_deref());
            let content = read_key_value(&self.channel.ask(Stage::NodeContent, &body));
            let key = level
                .clone()
                .or(content.key)
                .unwrap_or_else(|| format!("New {}", capitalized(kind)));

            let id = tree.add(parent.id.as_str(), &key)?;
            if let Some(value) = content.value {
                tree.update(id.as_str(), &value)?;
            }
            info!(%id, %key, "Created node");

            let node = tree.view(id.as_str())?;
            if node.role == NodeRole::Polity {
                self.fill_aspects(tree, narrative, &node)?;
                outcome.touched_polities.insert(id.clone());
            }
            created.push(id);
            parent = node;
        }

        Ok(created)
    }

    /// Generate content for every aspect of a polity.
    pub fn fill_aspects(&self, tree: &mut dyn TreeStore, narrative: &str, polity: &WorldNode) -> Result<()> {
        for aspect in self.aspect_contents(tree, narrative, polity)? {
            tree.update(aspect.0.as_str(), &aspect.1)?;
        }
        Ok(())
    }

    /// Aspect content for a polity, generated but not written.
    pub fn aspect_contents(
        &self,
        tree: &dyn TreeStore,
        narrative: &str,
        polity: &WorldNode,
    ) -> Result<Vec<(NodeId, String)>> {
        let mut out = Vec::new();
        for aspect in tree.children(polity.id.as_str())? {
            if aspect.role != NodeRole::Aspect {
                continue;
            }
            let body = prompts::aspect(narrative, polity, &aspect.key, &aspect.value);
            if let Some(value) = read_key_value(&self.channel.ask(Stage::AspectContent, &body)).value {
                out.push((aspect.id, value));
            }
        }
        Ok(out)
    }

    /// Fill a freshly outlined world from a premise.
    ///
    /// The root takes the premise and every macro topic is written, its outline
    /// hint serving as guidance. An empty micro subtree gets regions and polities
    /// named by the model. Finally every region, polity and aspect still without
    /// content is written. Existing micro structure is never replaced.
    pub fn generate_world(
        &self,
        tree: &mut dyn TreeStore,
        premise: &str,
        config: &GenerationConfig,
    ) -> Result<WorldGeneration> {
        let mut report = WorldGeneration::default();
        tree.update(ROOT_ID, premise)?;

        let topics: Vec<WorldNode> = tree
            .nodes()
            .into_iter()
            .filter(|n| n.role == NodeRole::Macro)
            .collect();
        for topic in &topics {
            let parent = self.parent_key(tree, topic);
            let body = prompts::macro_content(premise, topic, &parent, &topic.value);
            match read_key_value(&self.channel.ask(Stage::MacroContent, &body)).value {
                Some(value) => {
                    tree.update(topic.id.as_str(), &value)?;
                    report.written.push(topic.id.clone());
                }
                None => warn!(id = %topic.id, "No content for macro topic"),
            }
        }
        let summary = macro_summary(&tree.nodes());

        if tree.children(MICRO_ID)?.is_empty() {
            self.generate_micro_structure(tree, premise, &summary, config, &mut report)?;
        } else {
            debug!("Micro structure already present");
        }

        for node in tree.nodes() {
            if !matches!(node.role, NodeRole::Region | NodeRole::Polity) || !node.value.trim().is_empty() {
                continue;
            }
            let parent = self.parent_key(tree, &node);
            let body = prompts::micro_content(premise, &node, &parent, &summary);
            if let Some(value) = read_key_value(&self.channel.ask(Stage::NodeContent, &body)).value {
                tree.update(node.id.as_str(), &value)?;
                report.written.push(node.id.clone());
            }

            if node.role == NodeRole::Polity {
                let polity = tree.view(node.id.as_str())?;
                for aspect in tree.children(polity.id.as_str())? {
                    if aspect.role != NodeRole::Aspect || !aspect.value.trim().is_empty() {
                        continue;
                    }
                    let body = prompts::aspect(premise, &polity, &aspect.key, "");
                    if let Some(value) = read_key_value(&self.channel.ask(Stage::AspectContent, &body)).value {
                        tree.update(aspect.id.as_str(), &value)?;
                        report.written.push(aspect.id);
                    }
                }
            }
        }

        info!(
            written = report.written.len(),
            regions = report.regions.len(),
            polities = report.polities.len(),
            "World generated"
        );
        Ok(report)
    }

    fn generate_micro_structure(
        &self,
        tree: &mut dyn TreeStore,
        premise: &str,
        summary: &str,
        config: &GenerationConfig,
        report: &mut WorldGeneration,
    ) -> Result<()> {
        let regions = self.name_list(Stage::RegionNames, config, |note| {
            prompts::region_names(premise, summary, config.min_names, config.max_names, note)
        });

        for region_name in &regions {
            let region = tree.add(MICRO_ID, region_name)?;
            let polities = self.name_list(Stage::PolityNames, config, |note| {
                prompts::polity_names(
                    premise,
                    summary,
                    region_name,
                    &regions,
                    config.min_names,
                    config.max_names,
                    note,
                )
            });
            for polity_name in &polities {
                report.polities.push(tree.add(region.as_str(), polity_name)?);
            }
            debug!(%region, polities = polities.len(), "Region generated");
            report.regions.push(region);
        }
        Ok(())
    }

    /// Ask for a list of names until it holds at least `min_names`. When no
    /// attempt gets there, the longest readable list wins.
    fn name_list(
        &self,
        stage: Stage,
        config: &GenerationConfig,
        body: impl Fn(Option<&str>) -> String,
    ) -> Vec<String> {
        let mut note: Option<String> = None;
        let mut best: Vec<String> = Vec::new();

        for attempt in 0..=config.name_retries {
            let reply = self.channel.ask(stage, &body(note.as_deref()));
            let Some(parsed) = parse_name_list(&reply) else {
                debug!(stage = stage.label(), attempt, "Name list unreadable");
                note = Some("no list of names found".to_string());
                continue;
            };
            let mut names = parsed.value;
            names.truncate(config.max_names);
            if names.len() >= config.min_names {
                return names;
            }
            debug!(stage = stage.label(), attempt, count = names.len(), "Name list too short");
            note = Some(format!("only {} names", names.len()));
            if names.len() > best.len() {
                best = names;
            }
        }

        if best.is_empty() {
            warn!(stage = stage.label(), "No usable name list");
        }
        best
    }

    fn parent_key(&self, tree: &dyn TreeStore, node: &WorldNode) -> String {
        node.parent
            .as_ref()
            .and_then(|p| tree.view(p.as_str()).ok())
            .map(|p| p.key)
            .unwrap_or_default()
    }

    /// The node an UPDATE should actually write, preferring a more specific node
    /// the narrative names.
    fn redirect(&self, tree: &dyn TreeStore, narrative: &str, target: &WorldNode) -> WorldNode {
        if !target.role.is_micro() {
            return target.clone();
        }
        let nodes = tree.nodes();
        let deeper: Vec<NodeId> = scan_narrative(narrative, &nodes, &[])
            .world
            .into_iter()
            .filter(|id| is_descendant(id, &target.id))
            .collect();
        match deeper.as_slice() {
            [only] => match tree.view(only.as_str()) {
                Ok(node) => {
                    debug!(from = %target.id, to = %node.id, "Redirecting UPDATE");
                    node
                }
                Err(_) => target.clone(),
            },
            _ => target.clone(),
        }
    }

    /// Rewrite a node's content. Returns the node as it was before writing,
    /// after any redirect.
    fn update_node(
        &self,
        tree: &mut dyn TreeStore,
        narrative: &str,
        target: &NodeId,
        outcome: &mut WorldOutcome,
    ) -> Result<WorldNode> {
        let requested = tree.view(target.as_str())?;
        let node = self.redirect(tree, narrative, &requested);
        let parent_key = node
            .parent
            .as_ref()
            .and_then(|p| tree.view(p.as_str()).ok())
            .map(|p| p.key)
            .unwrap_or_default();

        let body = prompts::node_update(narrative, &node, &parent_key);
        let content = read_key_value(&self.channel.ask(Stage::NodeContent, &body));
        self.write_content(tree, &node, content)?;

        match node.role {
            NodeRole::Polity => {
                outcome.touched_polities.insert(node.id.clone());
            }
            NodeRole::Aspect => {
                if let Some(polity) = tree.enclosing(node.id.as_str(), NodeRole::Polity) {
                    outcome.touched_polities.insert(polity.id);
                }
            }
            _ => {}
        }
        Ok(node)
    }

    /// Write generated content. A missing value keeps the old one; a new key is
    /// only taken by nodes whose titles may change.
    pub fn write_content(&self, tree: &mut dyn TreeStore, node: &WorldNode, content: KeyValue) -> Result<()> {
        if let Some(key) = content.key.filter(|k| *k != node.key) {
            if node.role.is_renamable() {
                tree.rename(node.id.as_str(), &key)?;
            } else {
                debug!(id = %node.id, "Keeping fixed title");
            }
        }
        match content.value {
            Some(value) => tree.update(node.id.as_str(), &value)?,
            None => info!(id = %node.id, "No content generated, keeping current value"),
        }
        Ok(())
    }

    /// Ask whether a rewritten region's polities need rewriting too.
    fn cascade_region(
        &self,
        tree: &mut dyn TreeStore,
        narrative: &str,
        region_id: &NodeId,
        outcome: &mut WorldOutcome,
    ) -> Result<()> {
        let Ok(region) = tree.view(region_id.as_str()) else {
            return Ok(());
        };
        let polities: Vec<WorldNode> = tree
            .children(region_id.as_str())?
            .into_iter()
            .filter(|c| c.role == NodeRole::Polity)
            .collect();
        if polities.is_empty() {
            return Ok(());
        }

        let keys: Vec<String> = polities.iter().map(|p| format!("{} {}", p.id, p.key)).collect();
        let body = prompts::region_cascade(narrative, &region, &keys);
        let cascade = parse_children_flag(&self.channel.ask(Stage::RegionCascade, &body))
            .map(|p| p.value)
            .unwrap_or(false);
        if !cascade {
            return Ok(());
        }

        info!(region = %region_id, count = polities.len(), "Rewriting polities of updated region");
        for polity in polities {
            let body = prompts::node_update(narrative, &polity, &region.key);
            let content = read_key_value(&self.channel.ask(Stage::NodeContent, &body));
            self.write_content(tree, &polity, content)?;
            outcome.touched_polities.insert(polity.id.clone());
            outcome.applied.push(AppliedWorldAction {
                note: Some(format!("follows region {}", region_id)),
                ..AppliedWorldAction::new(ActionFlag::Update, polity.id)
            });
        }
        Ok(())
    }
}

fn capitalized(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
