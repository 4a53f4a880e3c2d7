//! Prompt stages and prompt bodies.
//!
//! Every prompt starts with a `[TASK] <stage>` header line, added by
//! [`crate::completion::ModelChannel`]. Bodies always ask for a compact tag line
//! first and an optional JSON object second, matching what [`crate::grammar`] parses.

use world_bible::{CharacterRecord, WorldNode};

const HEADER_PREFIX: &str = "[TASK] ";

/// The point in the pipeline a prompt belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Search,
    ContinueSearch,
    Scope,
    PlanWorld,
    PlanCharacters,
    PolityIntent,
    Validate,
    NodeContent,
    AspectContent,
    RegionCascade,
    CharacterProfile,
    CharacterRevision,
    PolityCharacters,
    MergeSurvivor,
    MacroContent,
    RegionNames,
    PolityNames,
    HistorySummary,
}

impl Stage {
    pub const ALL: [Stage; 18] = [
        Stage::Search,
        Stage::ContinueSearch,
        Stage::Scope,
        Stage::PlanWorld,
        Stage::PlanCharacters,
        Stage::PolityIntent,
        Stage::Validate,
        Stage::NodeContent,
        Stage::AspectContent,
        Stage::RegionCascade,
        Stage::CharacterProfile,
        Stage::CharacterRevision,
        Stage::PolityCharacters,
        Stage::MergeSurvivor,
        Stage::MacroContent,
        Stage::RegionNames,
        Stage::PolityNames,
        Stage::HistorySummary,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Stage::Search => "search",
            Stage::ContinueSearch => "continue-search",
            Stage::Scope => "scope",
            Stage::PlanWorld => "plan-world",
            Stage::PlanCharacters => "plan-characters",
            Stage::PolityIntent => "polity-intent",
            Stage::Validate => "validate",
            Stage::NodeContent => "node-content",
            Stage::AspectContent => "aspect-content",
            Stage::RegionCascade => "region-cascade",
            Stage::CharacterProfile => "character-profile",
            Stage::CharacterRevision => "character-revision",
            Stage::PolityCharacters => "polity-characters",
            Stage::MergeSurvivor => "merge-survivor",
            Stage::MacroContent => "macro-content",
            Stage::RegionNames => "region-names",
            Stage::PolityNames => "polity-names",
            Stage::HistorySummary => "history-summary",
        }
    }

    pub fn header(self) -> String {
        format!("{}{}", HEADER_PREFIX, self.label())
    }

    /// Recover the stage from a full prompt's header line.
    pub fn of_prompt(prompt: &str) -> Option<Stage> {
        let label = prompt.lines().next()?.strip_prefix(HEADER_PREFIX)?.trim();
        Stage::ALL.into_iter().find(|s| s.label() == label)
    }
}

/// Single-line, length-capped rendering of free text.
pub fn clip(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut out: String = flat.chars().take(max_chars.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

fn hint_section(hint: Option<&str>) -> String {
    match hint.map(str::trim).filter(|h| !h.is_empty()) {
        Some(h) => format!("\n## Focus\nA previous plan was rejected: {}\n", h),
        None => String::new(),
    }
}

pub fn search(narrative: &str, candidates: &[String], read: &str, hint: Option<&str>, limit: usize) -> String {
    format!(
        "## Narrative\n{narrative}\n\n## Already Read\n{read}\n\n## Unread Candidates\n{candidates}\n{hint}\n\
         Pick at most {limit} world nodes and {limit} characters worth reading next.\n\
         Answer with one line: WORLD=<id>,<id>; CHARACTER=<id>,<id> (use NONE for an empty list).\n\
         Optionally follow with JSON: {{\"world\":[...],\"characters\":[...]}}",
        candidates = candidates.join("\n"),
        hint = hint_section(hint),
    )
}

pub fn continue_search(narrative: &str, read: &str) -> String {
    format!(
        "## Narrative\n{narrative}\n\n## Already Read\n{read}\n\n\
         Is more context needed before deciding what to change?\n\
         Answer CONTINUE=YES or CONTINUE=NO. Optionally follow with JSON: {{\"continue\":true}}"
    )
}

pub fn scope(narrative: &str, context: &str) -> String {
    format!(
        "## Narrative\n{narrative}\n\n## Context\n{context}\n\n\
         Does this narrative change the world setting, the characters, or both?\n\
         Answer with one line: WORLD=YES|NO; CHARACTER=YES|NO\n\
         Then JSON: {{\"update_world\":bool,\"update_characters\":bool,\"reason\":\"...\"}}"
    )
}

pub fn plan_world(narrative: &str, context: &str, micro_outline: &str) -> String {
    format!(
        "## Narrative\n{narrative}\n\n## Context\n{context}\n\n## Regions and Polities\n{micro_outline}\n\n\
         List the world tree changes this narrative requires, one per line:\n\
         <|ADD_NODE|>:<parent id>   (new children are named by the engine; use \
         micro>Region Name>Polity Name to create several levels)\n\
         <|UPDATE_NODE|>:<node id>\n\
         <|REMOVE_NODE|>:<node id>\n\
         Answer NONE if nothing changes. Optionally follow with a JSON array of \
         {{\"action\":\"ADD_NODE\",\"index\":\"micro\"}} objects."
    )
}

pub fn plan_characters(narrative: &str, context: &str, roster: &str) -> String {
    format!(
        "## Narrative\n{narrative}\n\n## Context\n{context}\n\n## Characters\n{roster}\n\n\
         List the character changes this narrative requires, one per line:\n\
         <|ADD_CHARACTER|>:<short description of the newcomer>\n\
         <|UPDATE_CHARACTER|>:<character id>\n\
         Answer NONE if nothing changes. Optionally follow with a JSON array of \
         {{\"action\":\"UPDATE_CHARACTER\",\"identifier\":\"c1\"}} objects."
    )
}

pub fn polity_intent(narrative: &str, regions: &str) -> String {
    format!(
        "## Narrative\n{narrative}\n\n## Regions and Polities\n{regions}\n\n\
         Does the narrative found or dissolve a polity?\n\
         Answer with one line: POLITY=ADD|REMOVE|NONE; REGION=<region>; NAME=<polity>\n\
         Optionally follow with JSON: {{\"polity\":\"add\",\"region\":\"...\",\"name\":\"...\"}}"
    )
}

pub fn validate(narrative: &str, context: &str, plan: &str) -> String {
    format!(
        "## Narrative\n{narrative}\n\n## Context\n{context}\n\n## Proposed Changes\n{plan}\n\n\
         Are these changes consistent with the narrative and the context?\n\
         Answer VALID=YES or VALID=NO; REASON=<what is wrong or missing>\n\
         Optionally follow with JSON: {{\"valid\":bool,\"reason\":\"...\"}}"
    )
}

const KEY_VALUE_FORMAT: &str = "Answer with exactly two lines:\n<|KEY|>:<title>\n<|VALUE|>:<content>";

pub fn node_add(narrative: &str, parent: &WorldNode, siblings: &[String], kind: &str, key_hint: Option<&str>) -> String {
    let naming = match key_hint {
        Some(key) => format!("The new {kind} is called \"{key}\".\n"),
        None => String::new(),
    };
    format!(
        "## Narrative\n{narrative}\n\n## Parent\n{} ({})\n{}\n\n## Existing Siblings\n{}\n\n\
         Write the new {kind} created under this parent.\n{naming}{KEY_VALUE_FORMAT}",
        parent.key,
        parent.id,
        parent.value,
        if siblings.is_empty() { "none".to_string() } else { siblings.join(", ") },
    )
}

pub fn node_update(narrative: &str, node: &WorldNode, parent_key: &str) -> String {
    format!(
        "## Narrative\n{narrative}\n\n## Node\n{} ({}), under {parent_key}\n{}\n\n\
         Rewrite this node so it reflects the narrative. Keep what is still true.\n{KEY_VALUE_FORMAT}",
        node.key, node.id, node.value,
    )
}

pub fn merge_update(narrative: &str, survivor: &WorldNode, absorbed: &[String]) -> String {
    format!(
        "## Narrative\n{narrative}\n\n## Surviving Polity\n{} ({})\n{}\n\n## Absorbed\n{}\n\n\
         Rewrite the surviving polity after absorbing the others.\n{KEY_VALUE_FORMAT}",
        survivor.key,
        survivor.id,
        survivor.value,
        absorbed.join(", "),
    )
}

pub fn aspect(narrative: &str, polity: &WorldNode, aspect_key: &str, current: &str) -> String {
    format!(
        "## Narrative\n{narrative}\n\n## Polity\n{} ({})\n{}\n\n## Aspect: {aspect_key}\n{}\n\n\
         Write the {aspect_key} of this polity.\n<|VALUE|>:<content>",
        polity.key,
        polity.id,
        polity.value,
        if current.is_empty() { "(empty)" } else { current },
    )
}

pub fn region_cascade(narrative: &str, region: &WorldNode, polities: &[String]) -> String {
    format!(
        "## Narrative\n{narrative}\n\n## Updated Region\n{} ({})\n{}\n\n## Its Polities\n{}\n\n\
         Do the polities of this region need rewriting too?\n\
         Answer CHILDREN=YES or CHILDREN=NO. Optionally follow with JSON: {{\"update_children\":bool}}",
        region.key,
        region.id,
        region.value,
        polities.join(", "),
    )
}

fn profile_schema() -> String {
    let fields = world_bible::PROFILE_FIELDS
        .iter()
        .map(|f| format!("\"{}\":\"...\"", f))
        .collect::<Vec<_>>()
        .join(",");
    format!("Answer with a single JSON object: {{{}}}", fields)
}

pub fn character_profile(narrative: &str, mount: Option<&str>, pitch: Option<&str>, outline: &str) -> String {
    format!(
        "## Narrative\n{narrative}\n\n## World Outline\n{outline}\n\n## Home\n{}\n\n## Pitch\n{}\n\n\
         Create the character this narrative introduces.\n{}",
        mount.unwrap_or("unanchored"),
        pitch.unwrap_or("none"),
        profile_schema(),
    )
}

pub fn character_revision(narrative: &str, record: &CharacterRecord, home: &str, reason: &str) -> String {
    let current = serde_json::Value::Object(record.profile.to_fields());
    format!(
        "## Narrative\n{narrative}\n\n## Why\n{reason}\n\n## Character {} (home: {home})\n{}\n\n\
         Revise the profile. Fields you leave out keep their current value.\n{}",
        record.identifier,
        current,
        profile_schema(),
    )
}

pub fn polity_characters(narrative: &str, polity: &WorldNode, candidates: &[String]) -> String {
    format!(
        "## Narrative\n{narrative}\n\n## Changed Polity\n{} ({})\n{}\n\n## Characters Bound Here\n{}\n\n\
         Which of these characters need their profile revised?\n\
         Answer UPDATE=<id>,<id> or UPDATE=NONE. Optionally follow with JSON: {{\"update\":[...]}}",
        polity.key,
        polity.id,
        polity.value,
        candidates.join("\n"),
    )
}

pub fn merge_survivor(narrative: &str, candidates: &[String]) -> String {
    format!(
        "## Narrative\n{narrative}\n\n## Polities Involved\n{}\n\n\
         Which single polity survives the merger, and which of the others does it absorb?\n\
         Polities that are only mentioned stay as they are.\n\
         Answer KEEP=<id>; REMOVE=<id>,<id>, or MERGE=NO if this is not a merger. \
         Optionally follow with JSON: {{\"keep\":\"...\",\"remove\":[\"...\"]}}",
        candidates.join("\n"),
    )
}

pub fn macro_content(premise: &str, node: &WorldNode, parent: &str, guidance: &str) -> String {
    format!(
        "## Premise\n{premise}\n\n## Topic\n{} ({}), under {parent}\n\n## Guidance\n{}\n\n\
         Write this topic of the world setting so it fits the premise.\n<|VALUE|>:<content>",
        node.key,
        node.id,
        if guidance.trim().is_empty() { "none" } else { guidance },
    )
}

fn name_range(min: usize, max: usize, retry_note: Option<&str>) -> String {
    let retry = match retry_note {
        Some(note) => format!("\nYour previous answer could not be used: {}\n", note),
        None => String::new(),
    };
    format!(
        "{retry}Give between {min} and {max} distinct names.\n\
         Answer NAMES=<name>, <name>, or a JSON array of strings."
    )
}

pub fn region_names(premise: &str, macro_summary: &str, min: usize, max: usize, retry_note: Option<&str>) -> String {
    format!(
        "## Premise\n{premise}\n\n## Setting\n{macro_summary}\n\n\
         Name the regions of this world.\n{}",
        name_range(min, max, retry_note),
    )
}

pub fn polity_names(
    premise: &str,
    macro_summary: &str,
    region: &str,
    all_regions: &[String],
    min: usize,
    max: usize,
    retry_note: Option<&str>,
) -> String {
    format!(
        "## Premise\n{premise}\n\n## Setting\n{macro_summary}\n\n## All Regions\n{}\n\n\
         Name the polities that rule in the region {region}.\n{}",
        all_regions.join(", "),
        name_range(min, max, retry_note),
    )
}

pub fn micro_content(premise: &str, node: &WorldNode, parent: &str, macro_summary: &str) -> String {
    format!(
        "## Premise\n{premise}\n\n## Setting\n{macro_summary}\n\n## Node\n{} ({}), in {parent}\n\n\
         Describe this place and who holds it.\n<|VALUE|>:<content>",
        node.key, node.id,
    )
}

pub fn history_summary(log: &str) -> String {
    format!(
        "## Change Log\n{log}\n\n\
         Summarize the following change log in 2-4 sentences. Answer with plain text."
    )
}
