//! Room to device-id table.
//!
//! The table is configuration data: base rooms list the light ids they contain and
//! composite rooms ("whole house", "bedrooms") name base rooms. Composites are
//! flattened once when the table is built.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::warn;

#[derive(Debug, Default, Deserialize)]
struct RoomTableFile {
    #[serde(default)]
    rooms: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    composites: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct RoomTable {
    rooms: HashMap<String, BTreeSet<String>>,
}

impl RoomTable {
    pub fn new(
        base: impl IntoIterator<Item = (String, Vec<String>)>,
        composites: impl IntoIterator<Item = (String, Vec<String>)>,
    ) -> Self {
        let mut rooms: HashMap<String, BTreeSet<String>> = base
            .into_iter()
            .map(|(name, ids)| (name, ids.into_iter().collect()))
            .collect();

        let mut flattened = Vec::new();
        for (name, members) in composites {
            if rooms.contains_key(&name) {
                warn!(room = %name, "composite room shadows a base room, ignoring composite");
                continue;
            }
            let mut ids = BTreeSet::new();
            for member in &members {
                match rooms.get(member) {
                    Some(devices) => ids.extend(devices.iter().cloned()),
                    None => warn!(room = %name, member = %member, "composite member is not a base room"),
                }
            }
            flattened.push((name, ids));
        }
        rooms.extend(flattened);

        Self { rooms }
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let file: RoomTableFile = serde_json::from_str(raw)?;
        Ok(Self::new(file.rooms, file.composites))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read room table {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("invalid room table {}", path.display()))
    }

    pub fn contains(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }

    /// Union of the devices of every known room. Unknown names contribute nothing.
    pub fn resolve<S: AsRef<str>>(&self, rooms: &[S]) -> BTreeSet<String> {
        rooms
            .iter()
            .filter_map(|r| self.rooms.get(r.as_ref()))
            .flat_map(|ids| ids.iter().cloned())
            .collect()
    }
}
