//! Character records - flat list of characters anchored into the micro subtree.

mod roster;

pub use roster::*;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Borrow;

use crate::world_tree::NodeId;

/// Every profile field, in presentation order.
pub const PROFILE_FIELDS: [&str; 13] = [
    "name",
    "summary",
    "background",
    "motivation",
    "conflict",
    "abilities",
    "weaknesses",
    "relationships",
    "hooks",
    "faction",
    "profession",
    "species",
    "tier",
];

/// Character identifier of the form `c<N>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterId(String);

impl CharacterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn from_serial(serial: u32) -> Self {
        Self(format!("c{}", serial))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The numeric part of a well-formed identifier.
    pub fn serial(&self) -> Option<u32> {
        self.0.strip_prefix('c')?.parse().ok()
    }
}

impl std::fmt::Display for CharacterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Borrow<str> for CharacterId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CharacterId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl PartialEq<&str> for CharacterId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Fixed-schema character profile. Every field is always present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterProfile {
    pub name: String,
    pub summary: String,
    pub background: String,
    pub motivation: String,
    pub conflict: String,
    pub abilities: String,
    pub weaknesses: String,
    pub relationships: String,
    pub hooks: String,
    pub faction: String,
    pub profession: String,
    pub species: String,
    pub tier: String,
}

impl CharacterProfile {
    /// Create a profile with only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Build a profile from a structured object, leaving absent fields empty.
    pub fn from_fields(fields: &Map<String, Value>) -> Self {
        let mut profile = Self::default();
        profile.merge_fields(fields);
        profile
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        let value = match name {
            "name" => &self.name,
            "summary" => &self.summary,
            "background" => &self.background,
            "motivation" => &self.motivation,
            "conflict" => &self.conflict,
            "abilities" => &self.abilities,
            "weaknesses" => &self.weaknesses,
            "relationships" => &self.relationships,
            "hooks" => &self.hooks,
            "faction" => &self.faction,
            "profession" => &self.profession,
            "species" => &self.species,
            "tier" => &self.tier,
            _ => return None,
        };
        Some(value)
    }

    fn field_mut(&mut self, name: &str) -> Option<&mut String> {
        let value = match name {
            "name" => &mut self.name,
            "summary" => &mut self.summary,
            "background" => &mut self.background,
            "motivation" => &mut self.motivation,
            "conflict" => &mut self.conflict,
            "abilities" => &mut self.abilities,
            "weaknesses" => &mut self.weaknesses,
            "relationships" => &mut self.relationships,
            "hooks" => &mut self.hooks,
            "faction" => &mut self.faction,
            "profession" => &mut self.profession,
            "species" => &mut self.species,
            "tier" => &mut self.tier,
            _ => return None,
        };
        Some(value)
    }

    /// Overwrite fields with the non-empty values found in `fields`.
    ///
    /// Unknown keys, nulls and blank strings are ignored, so a field never goes
    /// from filled to empty. Lists are joined with `, `; nested objects are kept
    /// as compact JSON. Returns how many fields were written.
    pub fn merge_fields(&mut self, fields: &Map<String, Value>) -> usize {
        let mut written = 0;
        for (name, value) in fields {
            let Some(text) = field_text(value) else {
                continue;
            };
            if let Some(slot) = self.field_mut(name.trim()) {
                *slot = text;
                written += 1;
            }
        }
        written
    }

    /// Render the profile as a JSON object with every field present.
    pub fn to_fields(&self) -> Map<String, Value> {
        PROFILE_FIELDS
            .iter()
            .map(|name| {
                let value = self.field(name).unwrap_or_default();
                (name.to_string(), Value::String(value.to_string()))
            })
            .collect()
    }
}

fn field_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(field_text)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Object(_) => value.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

/// A character and the place it is anchored to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterRecord {
    #[serde(rename = "id")]
    pub identifier: CharacterId,
    pub region_id: Option<NodeId>,
    pub polity_id: Option<NodeId>,
    pub profile: CharacterProfile,
}

impl CharacterRecord {
    pub fn name(&self) -> &str {
        &self.profile.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_character_id_serial() {
        assert_eq!(CharacterId::from_serial(7), "c7");
        assert_eq!(CharacterId::new("c12").serial(), Some(12));
        assert_eq!(CharacterId::new("hero").serial(), None);
    }

    #[test]
    fn test_merge_keeps_prior_values() {
        let mut profile = CharacterProfile::named("Ilsa Maren");
        profile.tier = "veteran".to_string();

        let written = profile.merge_fields(&object(json!({
            "summary": "A smuggler turned envoy",
            "tier": "",
            "faction": null,
            "unknown": "ignored"
        })));

        assert_eq!(written, 1);
        assert_eq!(profile.name, "Ilsa Maren");
        assert_eq!(profile.summary, "A smuggler turned envoy");
        assert_eq!(profile.tier, "veteran");
    }

    #[test]
    fn test_merge_with_empty_delta_is_identity() {
        let mut profile = CharacterProfile::named("Ilsa Maren");
        profile.hooks = "Owes the harbor guild".to_string();
        let before = profile.clone();

        assert_eq!(profile.merge_fields(&Map::new()), 0);
        assert_eq!(profile, before);
    }

    #[test]
    fn test_list_and_number_values() {
        let profile = CharacterProfile::from_fields(&object(json!({
            "abilities": ["knife work", "forgery"],
            "tier": 3
        })));
        assert_eq!(profile.abilities, "knife work, forgery");
        assert_eq!(profile.tier, "3");
    }

    #[test]
    fn test_to_fields_has_every_field() {
        let fields = CharacterProfile::named("Ilsa").to_fields();
        assert_eq!(fields.len(), PROFILE_FIELDS.len());
        assert_eq!(fields["name"], json!("Ilsa"));
        assert_eq!(fields["species"], json!(""));
    }

    #[test]
    fn test_record_serializes_with_id_key() {
        let record = CharacterRecord {
            identifier: CharacterId::new("c1"),
            region_id: Some(NodeId::new("micro.r1")),
            polity_id: None,
            profile: CharacterProfile::named("Ilsa"),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["id"], json!("c1"));
        assert_eq!(value["region_id"], json!("micro.r1"));
        assert!(value["polity_id"].is_null());
    }
}
