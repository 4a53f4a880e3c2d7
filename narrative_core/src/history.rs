//! Change records and the history journal.
//!
//! Every pipeline run diffs the stores before and after it ran. A
//! [`HistoryJournal`] keeps one [`HistoryEntry`] per run, optionally appended to a
//! JSON-lines file, and can summarize its most recent entries.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;
use world_bible::{CharacterRecord, WorldSnapshot};

use crate::completion::ModelChannel;
use crate::decision::GameUpdateDecision;
use crate::error::Result;
use crate::prompts::{self, clip, Stage};

/// What [`HistoryJournal::summarize_recent`] returns for an empty journal.
pub const NO_HISTORY: &str = "No history recorded.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    World,
    Character,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Added,
    Updated,
    Removed,
}

impl ChangeAction {
    pub fn label(self) -> &'static str {
        match self {
            ChangeAction::Added => "ADD",
            ChangeAction::Updated => "UPDATE",
            ChangeAction::Removed => "REMOVE",
        }
    }
}

/// One identifier's state before and after a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub kind: ChangeKind,
    pub action: ChangeAction,
    pub identifier: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

fn diff_maps(kind: ChangeKind, before: BTreeMap<String, Value>, mut after: BTreeMap<String, Value>) -> Vec<ChangeRecord> {
    let mut changes = Vec::new();

    for (identifier, old) in before {
        match after.remove(&identifier) {
            Some(new) if new == old => {}
            Some(new) => changes.push(ChangeRecord {
                kind,
                action: ChangeAction::Updated,
                identifier,
                before: Some(old),
                after: Some(new),
            }),
            None => changes.push(ChangeRecord {
                kind,
                action: ChangeAction::Removed,
                identifier,
                before: Some(old),
                after: None,
            }),
        }
    }
    for (identifier, new) in after {
        changes.push(ChangeRecord {
            kind,
            action: ChangeAction::Added,
            identifier,
            before: None,
            after: Some(new),
        });
    }

    changes
}

/// Node-level changes. Only key and value count; a new child is not an update
/// of its parent.
pub fn diff_world(before: &WorldSnapshot, after: &WorldSnapshot) -> Vec<ChangeRecord> {
    let content = |snapshot: &WorldSnapshot| {
        snapshot
            .iter()
            .map(|(id, node)| {
                let value = serde_json::json!({ "key": node.key, "value": node.value });
                (id.clone(), value)
            })
            .collect::<BTreeMap<_, _>>()
    };
    diff_maps(ChangeKind::World, content(before), content(after))
}

pub fn diff_characters(before: &[CharacterRecord], after: &[CharacterRecord]) -> Vec<ChangeRecord> {
    let by_id = |records: &[CharacterRecord]| {
        records
            .iter()
            .filter_map(|r| {
                let value = serde_json::to_value(r).ok()?;
                Some((r.identifier.to_string(), value))
            })
            .collect::<BTreeMap<_, _>>()
    };
    diff_maps(ChangeKind::Character, by_id(before), by_id(after))
}

/// `world: ADD micro.r1, ...; characters: UPDATE c1` or `no changes`.
pub fn summarize_changes(world: &[ChangeRecord], characters: &[ChangeRecord]) -> String {
    let part = |label: &str, changes: &[ChangeRecord]| {
        let items: Vec<String> = changes
            .iter()
            .map(|c| format!("{} {}", c.action.label(), c.identifier))
            .collect();
        format!("{}: {}", label, items.join(", "))
    };

    let mut parts = Vec::new();
    if !world.is_empty() {
        parts.push(part("world", world));
    }
    if !characters.is_empty() {
        parts.push(part("characters", characters));
    }
    if parts.is_empty() {
        "no changes".to_string()
    } else {
        parts.join("; ")
    }
}

/// One narrative run as recorded in the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub entry_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub narrative: String,
    pub decision: GameUpdateDecision,
    pub world_changes: Vec<ChangeRecord>,
    pub character_changes: Vec<ChangeRecord>,
    pub summary: String,
}

impl HistoryEntry {
    pub fn new(
        narrative: impl Into<String>,
        decision: GameUpdateDecision,
        world_changes: Vec<ChangeRecord>,
        character_changes: Vec<ChangeRecord>,
    ) -> Self {
        let summary = summarize_changes(&world_changes, &character_changes);
        Self {
            entry_id: Uuid::new_v4(),
            created_at: Utc::now(),
            narrative: narrative.into(),
            decision,
            world_changes,
            character_changes,
            summary,
        }
    }

    /// `<created_at> <entry_id>: <summary>`
    pub fn line(&self) -> String {
        format!(
            "{} {}: {}",
            self.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.entry_id,
            self.summary
        )
    }

    fn log_block(&self) -> String {
        let mut block = format!("Story: {}", clip(&self.narrative, 400));
        let changes = |label: &str, changes: &[ChangeRecord]| {
            let items: Vec<String> = changes
                .iter()
                .map(|c| format!("{} {}", c.action.label(), c.identifier))
                .collect();
            format!("\n{}: {}", label, items.join(", "))
        };
        if !self.world_changes.is_empty() {
            block.push_str(&changes("World changes", &self.world_changes));
        }
        if !self.character_changes.is_empty() {
            block.push_str(&changes("Character changes", &self.character_changes));
        }
        block
    }
}

/// Ordered log of pipeline runs.
#[derive(Debug, Default)]
pub struct HistoryJournal {
    entries: Vec<HistoryEntry>,
    path: Option<PathBuf>,
}

impl HistoryJournal {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// A journal that appends every recorded entry to `path`.
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            entries: Vec::new(),
            path: Some(path.into()),
        }
    }

    /// Read an existing journal file and keep appending to it.
    pub fn load(path: &Path) -> Result<Self> {
        let mut journal = Self::with_file(path);
        if !path.exists() {
            return Ok(journal);
        }
        for line in fs::read_to_string(path)?.lines() {
            if line.trim().is_empty() {
                continue;
            }
            journal.entries.push(serde_json::from_str(line)?);
        }
        debug!(path = %path.display(), entries = journal.entries.len(), "Loaded history");
        Ok(journal)
    }

    pub fn record(&mut self, entry: HistoryEntry) -> Result<()> {
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let mut line = serde_json::to_string(&entry)?;
            line.push('\n');
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            file.write_all(line.as_bytes())?;
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// The last `limit` entries; every entry when `limit` is zero.
    pub fn recent(&self, limit: usize) -> &[HistoryEntry] {
        let start = match limit {
            0 => 0,
            n => self.entries.len().saturating_sub(n),
        };
        &self.entries[start..]
    }

    /// One [`HistoryEntry::line`] per recent entry.
    pub fn summarize_recent(&self, limit: usize) -> String {
        let recent = self.recent(limit);
        if recent.is_empty() {
            return NO_HISTORY.to_string();
        }
        recent
            .iter()
            .map(HistoryEntry::line)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// A few sentences from the model about the recent entries, or the plain
    /// [`Self::summarize_recent`] listing when the model gives nothing back.
    pub fn summarize_recent_with(&self, channel: &ModelChannel<'_>, limit: usize) -> String {
        let recent = self.recent(limit);
        if recent.is_empty() {
            return NO_HISTORY.to_string();
        }

        let log = recent
            .iter()
            .map(HistoryEntry::log_block)
            .collect::<Vec<_>>()
            .join("\n\n");
        let reply = channel.ask(Stage::HistorySummary, &prompts::history_summary(&log));
        let summary = reply.trim();
        if summary.is_empty() {
            warn!(entries = recent.len(), "No history summary from the model");
            return self.summarize_recent(limit);
        }
        summary.to_string()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
