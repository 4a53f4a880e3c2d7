//! Character roster - the in-memory record list with monotonic identifiers.

use serde::{Deserialize, Serialize};

use super::{CharacterId, CharacterProfile, CharacterRecord};
use crate::error::{Result, StoreError};
use crate::world_tree::NodeId;

/// Ordered list of character records.
///
/// `next_serial` is a high-water mark: identifiers are never handed out twice,
/// even after the record holding one is removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterRoster {
    records: Vec<CharacterRecord>,
    next_serial: u32,
}

impl Default for CharacterRoster {
    fn default() -> Self {
        Self::new()
    }
}

impl CharacterRoster {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            next_serial: 1,
        }
    }

    /// Build a roster from existing records.
    ///
    /// The high-water mark is at least one past the largest `c<N>` present. A
    /// record holding the largest representable serial leaves no room for one.
    pub fn from_records(records: Vec<CharacterRecord>, next_serial: Option<u32>) -> Result<Self> {
        let observed = match records.iter().filter_map(|r| r.identifier.serial()).max() {
            Some(max) => max
                .checked_add(1)
                .ok_or_else(|| StoreError::IdentifierExhausted(CharacterId::from_serial(max).to_string()))?,
            None => 1,
        };
        Ok(Self {
            records,
            next_serial: next_serial.unwrap_or(1).max(observed),
        })
    }

    pub fn records(&self) -> &[CharacterRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn next_serial(&self) -> u32 {
        self.next_serial
    }

    pub fn get(&self, id: &str) -> Option<&CharacterRecord> {
        self.records.iter().find(|r| r.identifier.as_str() == id)
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut CharacterRecord> {
        self.records
            .iter_mut()
            .find(|r| r.identifier.as_str() == id)
            .ok_or_else(|| StoreError::CharacterNotFound(id.to_string()))
    }

    /// Append a record under the next unused identifier.
    pub fn insert(
        &mut self,
        profile: CharacterProfile,
        region_id: Option<NodeId>,
        polity_id: Option<NodeId>,
    ) -> Result<CharacterId> {
        let identifier = self.allocate_id()?;
        self.records.push(CharacterRecord {
            identifier: identifier.clone(),
            region_id,
            polity_id,
            profile,
        });
        Ok(identifier)
    }

    pub fn replace_profile(&mut self, id: &str, profile: CharacterProfile) -> Result<()> {
        self.get_mut(id)?.profile = profile;
        Ok(())
    }

    pub fn set_binding(
        &mut self,
        id: &str,
        region_id: Option<NodeId>,
        polity_id: Option<NodeId>,
    ) -> Result<()> {
        let record = self.get_mut(id)?;
        record.region_id = region_id;
        record.polity_id = polity_id;
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Option<CharacterRecord> {
        let index = self.records.iter().position(|r| r.identifier.as_str() == id)?;
        Some(self.records.remove(index))
    }

    /// The serial after the handed-out one must exist, or the high-water mark
    /// could not move past it.
    fn allocate_id(&mut self) -> Result<CharacterId> {
        loop {
            let candidate = CharacterId::from_serial(self.next_serial);
            self.next_serial = self
                .next_serial
                .checked_add(1)
                .ok_or_else(|| StoreError::IdentifierExhausted(candidate.to_string()))?;
            if self.get(candidate.as_str()).is_none() {
                return Ok(candidate);
            }
        }
    }
}
