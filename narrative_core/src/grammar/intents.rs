//! Typed action intents parsed from planning replies.

use serde::Serialize;
use serde_json::{Map, Value};
use world_bible::{CharacterId, NodeId};

use super::{
    clean_reference, declares_nothing, field, interpret, objects, tag_lines, value_text, Parsed,
};

/// A reference to a stored entity, either still raw model text or resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target<Id> {
    Unresolved(String),
    Resolved(Id),
}

impl<Id> Target<Id> {
    pub fn resolved(&self) -> Option<&Id> {
        match self {
            Target::Resolved(id) => Some(id),
            Target::Unresolved(_) => None,
        }
    }
}

impl<Id: std::fmt::Display> std::fmt::Display for Target<Id> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Resolved(id) => write!(f, "{}", id),
            Target::Unresolved(raw) => write!(f, "?{}", raw),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActionFlag {
    Add,
    Update,
    Remove,
}

impl ActionFlag {
    pub fn label(self) -> &'static str {
        match self {
            ActionFlag::Add => "ADD",
            ActionFlag::Update => "UPDATE",
            ActionFlag::Remove => "REMOVE",
        }
    }

    fn from_action(text: &str) -> Option<Self> {
        match normalize_action(text).as_str() {
            "ADD_NODE" | "ADD" | "CREATE_NODE" | "CREATE" => Some(ActionFlag::Add),
            "UPDATE_NODE" | "UPDATE" | "MODIFY" | "EDIT" => Some(ActionFlag::Update),
            "REMOVE_NODE" | "REMOVE" | "DELETE_NODE" | "DELETE" => Some(ActionFlag::Remove),
            _ => None,
        }
    }
}

/// What a world action asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum WorldIntent {
    /// Create one child per level below `parent`, each level nesting under the
    /// previous one. A `Some` level presets the new node's key.
    Add {
        parent: Target<NodeId>,
        levels: Vec<Option<String>>,
    },
    Update {
        target: Target<NodeId>,
    },
    Remove {
        target: Target<NodeId>,
    },
}

/// A world action as proposed by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionDecision {
    pub intent: WorldIntent,
    /// The model text this action was read from.
    pub raw: String,
}

impl ActionDecision {
    pub fn flag(&self) -> ActionFlag {
        match self.intent {
            WorldIntent::Add { .. } => ActionFlag::Add,
            WorldIntent::Update { .. } => ActionFlag::Update,
            WorldIntent::Remove { .. } => ActionFlag::Remove,
        }
    }

    /// The parent (for ADD) or target node.
    pub fn index(&self) -> &Target<NodeId> {
        match &self.intent {
            WorldIntent::Add { parent, .. } => parent,
            WorldIntent::Update { target } | WorldIntent::Remove { target } => target,
        }
    }

    pub fn index_mut(&mut self) -> &mut Target<NodeId> {
        match &mut self.intent {
            WorldIntent::Add { parent, .. } => parent,
            WorldIntent::Update { target } | WorldIntent::Remove { target } => target,
        }
    }

    pub fn update(target: NodeId, raw: impl Into<String>) -> Self {
        Self {
            intent: WorldIntent::Update {
                target: Target::Resolved(target),
            },
            raw: raw.into(),
        }
    }

    fn parse(flag: ActionFlag, reference: &str, levels: Vec<Option<String>>, raw: String) -> Self {
        let mut parts = reference.split('>');
        let head = clean_reference(parts.next().unwrap_or_default());

        let intent = match flag {
            ActionFlag::Add => {
                let mut levels = levels;
                if levels.is_empty() {
                    levels = parts
                        .map(clean_reference)
                        .filter(|p| !p.is_empty())
                        .map(Some)
                        .collect();
                }
                if levels.is_empty() {
                    levels.push(None);
                }
                WorldIntent::Add {
                    parent: Target::Unresolved(head),
                    levels,
                }
            }
            ActionFlag::Update => WorldIntent::Update {
                target: Target::Unresolved(head),
            },
            ActionFlag::Remove => WorldIntent::Remove {
                target: Target::Unresolved(head),
            },
        };

        Self { intent, raw }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CharacterFlag {
    Add,
    Update,
}

impl CharacterFlag {
    pub fn label(self) -> &'static str {
        match self {
            CharacterFlag::Add => "ADD",
            CharacterFlag::Update => "UPDATE",
        }
    }

    fn from_action(text: &str) -> Option<Self> {
        match normalize_action(text).as_str() {
            "ADD_CHARACTER" | "ADD" | "CREATE_CHARACTER" | "CREATE" | "NEW" => {
                Some(CharacterFlag::Add)
            }
            "UPDATE_CHARACTER" | "UPDATE" | "MODIFY" | "EDIT" => Some(CharacterFlag::Update),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CharacterIntent {
    /// Introduce a new character; `pitch` is the model's short description.
    Add { pitch: Option<String> },
    Update { target: Target<CharacterId> },
}

/// A character action as proposed by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct CharacterActionDecision {
    pub intent: CharacterIntent,
    pub raw: String,
}

impl CharacterActionDecision {
    pub fn flag(&self) -> CharacterFlag {
        match self.intent {
            CharacterIntent::Add { .. } => CharacterFlag::Add,
            CharacterIntent::Update { .. } => CharacterFlag::Update,
        }
    }

    pub fn update(target: CharacterId, raw: impl Into<String>) -> Self {
        Self {
            intent: CharacterIntent::Update {
                target: Target::Resolved(target),
            },
            raw: raw.into(),
        }
    }
}

fn normalize_action(text: &str) -> String {
    text.trim()
        .trim_start_matches("<|")
        .trim_end_matches("|>")
        .trim()
        .to_ascii_uppercase()
        .replace(|c: char| c == ' ' || c == '-', "_")
}

/// Parse world actions. `Some(empty)` means the model explicitly proposed nothing.
pub fn parse_world_actions(reply: &str) -> Option<Parsed<Vec<ActionDecision>>> {
    interpret(reply, strict_world_actions, structured_world_actions)
}

fn strict_world_actions(reply: &str) -> Option<Vec<ActionDecision>> {
    let tags = tag_lines(reply);
    let actions: Vec<ActionDecision> = tags
        .iter()
        .filter_map(|t| {
            let flag = ActionFlag::from_action(&t.tag)?;
            let raw = format!("<|{}|>:{}", t.tag, t.argument);
            Some(ActionDecision::parse(flag, &t.argument, Vec::new(), raw))
        })
        .collect();

    if !actions.is_empty() {
        Some(actions)
    } else if tags.iter().any(|t| t.tag == "NONE") || declares_nothing(reply) {
        Some(Vec::new())
    } else {
        None
    }
}

fn structured_world_actions(fragments: &[Value]) -> Option<Vec<ActionDecision>> {
    let actions: Vec<ActionDecision> = objects(fragments)
        .into_iter()
        .filter_map(|object| {
            let flag = field(object, &["action", "flag", "type"])
                .and_then(Value::as_str)
                .and_then(ActionFlag::from_action)?;
            let reference = field(object, &["index", "identifier", "id", "target", "parent"])
                .and_then(value_text)
                .unwrap_or_default();
            let raw = Value::Object(object.clone()).to_string();
            Some(ActionDecision::parse(flag, &reference, structured_levels(object), raw))
        })
        .collect();

    structured_result(actions, fragments)
}

fn structured_levels(object: &Map<String, Value>) -> Vec<Option<String>> {
    if let Some(Value::Array(names)) = object.get("levels") {
        return names
            .iter()
            .filter_map(value_text)
            .map(|n| (!n.is_empty()).then_some(n))
            .collect();
    }
    let depth = object.get("depth").and_then(Value::as_u64).unwrap_or(0);
    (0..depth).map(|_| None).collect()
}

/// Parse character actions. `Some(empty)` means the model explicitly proposed nothing.
pub fn parse_character_actions(reply: &str) -> Option<Parsed<Vec<CharacterActionDecision>>> {
    interpret(reply, strict_character_actions, structured_character_actions)
}

fn character_action(flag: CharacterFlag, reference: &str, raw: String) -> CharacterActionDecision {
    let reference = clean_reference(reference);
    let intent = match flag {
        CharacterFlag::Add => CharacterIntent::Add {
            pitch: (!reference.is_empty()).then_some(reference),
        },
        CharacterFlag::Update => CharacterIntent::Update {
            target: Target::Unresolved(reference),
        },
    };
    CharacterActionDecision { intent, raw }
}

fn strict_character_actions(reply: &str) -> Option<Vec<CharacterActionDecision>> {
    let tags = tag_lines(reply);
    let actions: Vec<CharacterActionDecision> = tags
        .iter()
        .filter_map(|t| {
            let flag = CharacterFlag::from_action(&t.tag)?;
            let raw = format!("<|{}|>:{}", t.tag, t.argument);
            Some(character_action(flag, &t.argument, raw))
        })
        .collect();

    if !actions.is_empty() {
        Some(actions)
    } else if tags.iter().any(|t| t.tag == "NONE") || declares_nothing(reply) {
        Some(Vec::new())
    } else {
        None
    }
}

fn structured_character_actions(fragments: &[Value]) -> Option<Vec<CharacterActionDecision>> {
    let actions: Vec<CharacterActionDecision> = objects(fragments)
        .into_iter()
        .filter_map(|object| {
            let flag = field(object, &["action", "flag", "type"])
                .and_then(Value::as_str)
                .and_then(CharacterFlag::from_action)?;
            let names: &[&str] = match flag {
                CharacterFlag::Add => &["pitch", "description", "summary", "name"],
                CharacterFlag::Update => &["identifier", "id", "character", "name"],
            };
            let reference = field(object, names).and_then(value_text).unwrap_or_default();
            let raw = Value::Object(object.clone()).to_string();
            Some(character_action(flag, &reference, raw))
        })
        .collect();

    structured_result(actions, fragments)
}

fn structured_result<T>(actions: Vec<T>, fragments: &[Value]) -> Option<Vec<T>> {
    let explicit_empty = fragments
        .iter()
        .any(|f| matches!(f, Value::Array(items) if items.is_empty()));
    (!actions.is_empty() || explicit_empty).then_some(actions)
}
