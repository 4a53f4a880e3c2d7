//! Context Assembler - Builds the working context for a narrative with a bounded
//! search/read loop.
//!
//! Each round works as follows:
//! 1. **Present**: Show the model the unread nodes and records, packed into
//!    length-capped lines, plus what has been read already
//! 2. **Pick**: Parse the model's picks and resolve them to identifiers
//! 3. **Fallback**: If nothing resolves, scan the narrative for keys, ids and names
//! 4. **Read**: Add at most `per_round_limit` new nodes and records to the context
//! 5. **Continue?**: Ask whether more reading is needed
//!
//! The loop stops when the model declines, a round adds nothing, nothing is left
//! unread, or the round cap is reached.

mod search_context;

pub use search_context::*;

use tracing::{debug, info, warn};
use world_bible::{
    CharacterId, CharacterRecord, NodeId, NodeRole, RecordStore, TreeStore, WorldNode,
};

use crate::completion::ModelChannel;
use crate::config::SearchConfig;
use crate::grammar::{parse_continue, parse_search_pick, resolve_character, resolve_node};
use crate::prompts::{self, clip, Stage};

/// Why an accumulation pass stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStop {
    EmptyNarrative,
    NothingUnread,
    NoNewItems,
    Declined,
    RoundCap,
}

/// What one accumulation pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccumulationReport {
    pub rounds: u32,
    pub world_added: usize,
    pub characters_added: usize,
    pub stop: SearchStop,
}

/// Identifiers the narrative text mentions directly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mentions {
    /// Micro nodes first, then macro nodes. Structural roots and aspects are skipped.
    pub world: Vec<NodeId>,
    pub characters: Vec<CharacterId>,
}

impl Mentions {
    pub fn is_empty(&self) -> bool {
        self.world.is_empty() && self.characters.is_empty()
    }
}

/// The context assembler runs the search/read loop.
pub struct ContextAssembler {
    config: SearchConfig,
}

impl ContextAssembler {
    /// Create a new context assembler with the given configuration.
    pub fn new(config: SearchConfig) -> Self {
        Self { config }
    }

    /// Create a context assembler with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(SearchConfig::default())
    }

    /// Grow `ctx` with the nodes and records relevant to `narrative`.
    ///
    /// `hint` is typically a rejection reason from validation; it is shown to the
    /// model in every round of this pass.
    pub fn accumulate(
        &self,
        channel: &ModelChannel<'_>,
        tree: &dyn TreeStore,
        roster: &dyn RecordStore,
        narrative: &str,
        ctx: &mut SearchContext,
        hint: Option<&str>,
    ) -> AccumulationReport {
        let mut report = AccumulationReport {
            rounds: 0,
            world_added: 0,
            characters_added: 0,
            stop: SearchStop::RoundCap,
        };

        if narrative.trim().is_empty() {
            report.stop = SearchStop::EmptyNarrative;
            return report;
        }

        let nodes = tree.nodes();
        let records = roster.list();
        let limit = self.config.per_round_limit;

        for round in 0..self.config.max_rounds {
            let unread_nodes: Vec<&WorldNode> = search_order(&nodes)
                .into_iter()
                .filter(|n| !ctx.has_node(n.id.as_str()))
                .collect();
            let unread_records: Vec<&CharacterRecord> = records
                .iter()
                .filter(|r| !ctx.has_character(r.identifier.as_str()))
                .collect();

            if unread_nodes.is_empty() && unread_records.is_empty() {
                report.stop = SearchStop::NothingUnread;
                break;
            }

            let lines = self.candidate_lines(&unread_nodes, &unread_records);
            let body = prompts::search(narrative, &lines, &ctx.read_summary(), hint, limit);
            let reply = channel.ask(Stage::Search, &body);

            let (mut world, mut characters) = match parse_search_pick(&reply) {
                Some(parsed) => {
                    debug!(round, layer = ?parsed.layer, "Search picks parsed");
                    (
                        resolve_picks(&parsed.value.world, |r| resolve_node(r, &nodes)),
                        resolve_picks(&parsed.value.characters, |r| {
                            resolve_character(r, &records)
                        }),
                    )
                }
                None => (Vec::new(), Vec::new()),
            };
            world.retain(|id| !ctx.has_node(id.as_str()));
            characters.retain(|id| !ctx.has_character(id.as_str()));

            if world.is_empty() && characters.is_empty() {
                let mentions = scan_narrative(narrative, &nodes, &records);
                debug!(
                    round,
                    world = mentions.world.len(),
                    characters = mentions.characters.len(),
                    "No usable picks, scanning narrative"
                );
                world = mentions.world;
                characters = mentions.characters;
                world.retain(|id| !ctx.has_node(id.as_str()));
                characters.retain(|id| !ctx.has_character(id.as_str()));
            }

            world.truncate(limit);
            characters.truncate(limit);

            let mut added = 0;
            for id in &world {
                if let Ok(node) = tree.view(id.as_str()) {
                    if ctx.insert_node(node) {
                        report.world_added += 1;
                        added += 1;
                    }
                }
            }
            for id in &characters {
                if let Ok(record) = roster.get(id.as_str()) {
                    if ctx.insert_character(record) {
                        report.characters_added += 1;
                        added += 1;
                    }
                }
            }

            ctx.finish_round();
            report.rounds += 1;

            if added == 0 {
                report.stop = SearchStop::NoNewItems;
                break;
            }
            if round + 1 == self.config.max_rounds {
                report.stop = SearchStop::RoundCap;
                break;
            }

            let body = prompts::continue_search(narrative, &ctx.read_summary());
            let wants_more = parse_continue(&channel.ask(Stage::ContinueSearch, &body))
                .map(|p| p.value)
                .unwrap_or(false);
            if !wants_more {
                report.stop = SearchStop::Declined;
                break;
            }
        }

        info!(
            rounds = report.rounds,
            world_added = report.world_added,
            characters_added = report.characters_added,
            stop = ?report.stop,
            "Context accumulation finished"
        );
        report
    }

    /// Pack candidates into numbered lines no longer than `line_limit`.
    fn candidate_lines(&self, nodes: &[&WorldNode], records: &[&CharacterRecord]) -> Vec<String> {
        let node_entries = nodes.iter().map(|n| format!("{}/{}", n.id, n.key));
        let record_entries = records
            .iter()
            .map(|r| format!("{}/{}", r.identifier, r.name()));

        let mut lines = pack_entries("World", node_entries, self.config.line_limit);
        lines.extend(pack_entries(
            "Characters",
            record_entries,
            self.config.line_limit,
        ));
        lines
    }
}

fn pack_entries(label: &str, entries: impl Iterator<Item = String>, line_limit: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut width = 0;

    for entry in entries {
        let entry = clip(&entry, line_limit);
        let extra = entry.chars().count() + 3;
        if !current.is_empty() && width + extra > line_limit {
            lines.push(current.join(" | "));
            current.clear();
            width = 0;
        }
        width += extra;
        current.push(entry);
    }
    if !current.is_empty() {
        lines.push(current.join(" | "));
    }

    let total = lines.len();
    lines
        .into_iter()
        .enumerate()
        .map(|(i, line)| format!("{} {}/{}: {}", label, i + 1, total, line))
        .collect()
}

fn resolve_picks<Id: PartialEq>(
    references: &[String],
    resolve: impl Fn(&str) -> Result<Id, crate::grammar::Unresolved>,
) -> Vec<Id> {
    let mut out = Vec::new();
    for reference in references {
        match resolve(reference) {
            Ok(id) if !out.contains(&id) => out.push(id),
            Ok(_) => {}
            Err(reason) => warn!(%reason, "Dropping search pick"),
        }
    }
    out
}

/// Nodes worth reading: micro first, then macro, without structural roots.
fn search_order(nodes: &[WorldNode]) -> Vec<&WorldNode> {
    let readable = |n: &&WorldNode| {
        !matches!(
            n.role,
            NodeRole::Root | NodeRole::MacroRoot | NodeRole::MicroRoot
        )
    };
    let micro = nodes.iter().filter(readable).filter(|n| n.role.is_micro());
    let macro_nodes = nodes.iter().filter(readable).filter(|n| n.role.is_macro());
    micro.chain(macro_nodes).collect()
}

/// Whether `term` occurs in `haystack` (both lower-cased) as a whole word.
///
/// Word edges are only enforced on ASCII alphanumeric boundaries, so terms in
/// scripts without spaces still match as substrings.
pub fn contains_term(haystack: &str, term: &str) -> bool {
    let term = term.trim();
    if term.is_empty() {
        return false;
    }
    let is_word = |c: char| c.is_ascii_alphanumeric() || c == '_';
    let first_is_word = term.chars().next().is_some_and(is_word);
    let last_is_word = term.chars().next_back().is_some_and(is_word);

    haystack.match_indices(term).any(|(start, matched)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + matched.len()..].chars().next();
        !(first_is_word && before.is_some_and(is_word))
            && !(last_is_word && after.is_some_and(is_word))
    })
}

/// Heuristic scan of the narrative for node keys, character ids and names.
pub fn scan_narrative(narrative: &str, nodes: &[WorldNode], records: &[CharacterRecord]) -> Mentions {
    let text = narrative.to_lowercase();
    let mut mentions = Mentions::default();

    for node in search_order(nodes) {
        if node.role == NodeRole::Aspect {
            continue;
        }
        if contains_term(&text, &node.key.to_lowercase()) {
            mentions.world.push(node.id.clone());
        }
    }

    for record in records {
        let by_id = contains_term(&text, &record.identifier.as_str().to_lowercase());
        let by_name = contains_term(&text, &record.name().to_lowercase());
        if by_id || by_name {
            mentions.characters.push(record.identifier.clone());
        }
    }

    mentions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedCompletion;
    use world_bible::{CharacterProfile, CharacterRoster, WorldTree, MICRO_ID};

    fn sample_world() -> (WorldTree, CharacterRoster) {
        let mut tree = WorldTree::new();
        let r1 = tree.add_child(MICRO_ID, "Ashreach").unwrap();
        let veyra = tree.add_child(r1.as_str(), "Kingdom of Veyra").unwrap();
        let r2 = tree.add_child(MICRO_ID, "Thornwood").unwrap();
        tree.add_child(r2.as_str(), "Thornwood Confederacy").unwrap();

        let mut roster = CharacterRoster::new();
        roster.insert(CharacterProfile::named("Ilsa"), Some(r1), Some(veyra)).unwrap();
        roster.insert(CharacterProfile::named("Oren"), None, None).unwrap();
        (tree, roster)
    }

    #[test]
    fn test_contains_term_respects_word_edges() {
        assert!(contains_term("ilsa rides to ashreach.", "ashreach"));
        assert!(!contains_term("the c12 file", "c1"));
        assert!(contains_term("ask c1, then leave", "c1"));
        assert!(contains_term("维拉王国被吞并", "维拉王国"));
        assert!(!contains_term("anything", ""));
    }

    #[test]
    fn test_scan_narrative_finds_keys_ids_and_names() {
        let (tree, roster) = sample_world();
        let nodes = TreeStore::nodes(&tree);
        let mentions = scan_narrative(
            "Oren leaves the Kingdom of Veyra for Thornwood.",
            &nodes,
            roster.records(),
        );
        assert_eq!(
            mentions.world,
            vec![NodeId::new("micro.r1.p1"), NodeId::new("micro.r2")]
        );
        assert_eq!(mentions.characters, vec![CharacterId::new("c2")]);
    }

    #[test]
    fn test_picks_are_read_and_model_declines() {
        let (tree, roster) = sample_world();
        let service = ScriptedCompletion::new()
            .reply(Stage::Search, "WORLD=micro.r1, Thornwood; CHARACTER=Ilsa")
            .reply(Stage::ContinueSearch, "CONTINUE=NO");
        let channel = ModelChannel::new(&service, 0);

        let mut ctx = SearchContext::new();
        let report = ContextAssembler::with_defaults().accumulate(
            &channel,
            &tree,
            &roster,
            "Ilsa crosses into Thornwood.",
            &mut ctx,
            None,
        );

        assert_eq!(report.stop, SearchStop::Declined);
        assert_eq!(report.rounds, 1);
        assert!(ctx.has_node("micro.r1"));
        assert!(ctx.has_node("micro.r2"));
        assert!(ctx.has_character("c1"));
    }

    #[test]
    fn test_unparseable_picks_fall_back_to_scan() {
        let (tree, roster) = sample_world();
        let service = ScriptedCompletion::new()
            .reply(Stage::Search, "hmm, hard to say")
            .reply(Stage::ContinueSearch, "CONTINUE=NO");
        let channel = ModelChannel::new(&service, 0);

        let mut ctx = SearchContext::new();
        ContextAssembler::with_defaults().accumulate(
            &channel,
            &tree,
            &roster,
            "Oren reaches Ashreach.",
            &mut ctx,
            None,
        );

        assert!(ctx.has_node("micro.r1"));
        assert!(ctx.has_character("c2"));
    }

    #[test]
    fn test_bounds_hold_under_always_continue() {
        let mut tree = WorldTree::new();
        for i in 0..12 {
            tree.add_child(MICRO_ID, &format!("Region {}", i)).unwrap();
        }
        let roster = CharacterRoster::new();
        let every_region = (1..=12)
            .map(|i| format!("micro.r{}", i))
            .collect::<Vec<_>>()
            .join(",");
        let service = ScriptedCompletion::new()
            .reply(Stage::Search, &format!("WORLD={}", every_region))
            .reply(Stage::ContinueSearch, "CONTINUE=YES");
        let channel = ModelChannel::new(&service, 0);

        let mut ctx = SearchContext::new();
        let report = ContextAssembler::with_defaults().accumulate(
            &channel,
            &tree,
            &roster,
            "Every region stirs.",
            &mut ctx,
            Some("look wider"),
        );

        assert_eq!(report.rounds, 2);
        assert_eq!(report.stop, SearchStop::RoundCap);
        assert_eq!(report.world_added, 8);
        assert_eq!(ctx.world().count(), 8);
        assert_eq!(service.call_count(Stage::Search), 2);
        assert!(service.calls_for(Stage::Search)[0].contains("look wider"));
    }

    #[test]
    fn test_round_without_new_items_stops() {
        let (tree, roster) = sample_world();
        let service = ScriptedCompletion::new()
            .reply(Stage::Search, "WORLD=NONE; CHARACTER=NONE")
            .reply(Stage::ContinueSearch, "CONTINUE=YES");
        let channel = ModelChannel::new(&service, 0);

        let mut ctx = SearchContext::new();
        let report = ContextAssembler::with_defaults().accumulate(
            &channel,
            &tree,
            &roster,
            "Nothing anyone knows about happens.",
            &mut ctx,
            None,
        );

        assert_eq!(report.stop, SearchStop::NoNewItems);
        assert!(ctx.is_empty());
        assert_eq!(ctx.rounds(), 1);
    }

    #[test]
    fn test_candidate_lines_are_capped() {
        let assembler = ContextAssembler::new(SearchConfig {
            line_limit: 40,
            ..SearchConfig::default()
        });
        let (tree, _) = sample_world();
        let nodes = TreeStore::nodes(&tree);
        let order = search_order(&nodes);
        let lines = assembler.candidate_lines(&order, &[]);
        assert!(lines.len() > 1);
        for line in &lines {
            let (_, body) = line.split_once(": ").unwrap();
            assert!(body.chars().count() <= 40, "{}", line);
        }
    }
}
