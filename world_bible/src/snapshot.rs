//! JSON snapshot files for the world tree and the character roster.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::characters::{CharacterRecord, CharacterRoster};
use crate::error::Result;
use crate::world_tree::{WorldSnapshot, WorldTree};

/// On-disk shape of a character snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterSnapshot {
    #[serde(default)]
    pub generated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_serial: Option<u32>,
    #[serde(default)]
    pub characters: Vec<CharacterRecord>,
}

impl RosterSnapshot {
    pub fn capture(roster: &CharacterRoster) -> Self {
        Self {
            generated_at: Some(Utc::now()),
            next_serial: Some(roster.next_serial()),
            characters: roster.records().to_vec(),
        }
    }

    pub fn into_roster(self) -> Result<CharacterRoster> {
        CharacterRoster::from_records(self.characters, self.next_serial)
    }
}

pub fn save_world(tree: &WorldTree, path: &Path) -> Result<()> {
    write_json(path, &tree.snapshot())?;
    debug!(path = %path.display(), nodes = tree.len(), "Saved world snapshot");
    Ok(())
}

pub fn load_world(path: &Path) -> Result<WorldTree> {
    let content = fs::read_to_string(path)?;
    let snapshot: WorldSnapshot = serde_json::from_str(&content)?;
    WorldTree::from_snapshot(&snapshot)
}

pub fn save_roster(roster: &CharacterRoster, path: &Path) -> Result<()> {
    write_json(path, &RosterSnapshot::capture(roster))?;
    debug!(path = %path.display(), characters = roster.len(), "Saved character snapshot");
    Ok(())
}

pub fn load_roster(path: &Path) -> Result<CharacterRoster> {
    let content = fs::read_to_string(path)?;
    let snapshot: RosterSnapshot = serde_json::from_str(&content)?;
    snapshot.into_roster()
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}
