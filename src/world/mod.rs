//! World definition: zones and rooms as authored in `.rec` files.
//!
//! The definition is authoritative. The reconciler mirrors it into the store
//! and onto the chat platform; nothing here is ever mutated by players.

pub mod loader;
pub mod map;
pub mod recfile;

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::errors::MuddError;
use crate::platform::normalize_name;

pub use loader::{load_world, load_world_file};

/// A named group of rooms; maps to a platform category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl Zone {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// True if a platform category called `category_name` belongs to this zone.
    ///
    /// Categories are created from the display name, so both the id and the
    /// normalized display name are accepted.
    pub fn matches_category(&self, category_name: &str) -> bool {
        let normalized = normalize_name(category_name);
        normalized == self.id || normalized == normalize_name(&self.name)
    }
}

/// A named location; maps to a text channel (and optionally a voice channel).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: String,
    /// Used verbatim as the channel topic.
    pub description: String,
    pub zone_id: String,
    #[serde(default)]
    pub has_voice: bool,
    #[serde(default)]
    pub is_default: bool,
}

impl Room {
    pub fn new(id: &str, name: &str, description: &str, zone_id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            zone_id: zone_id.to_string(),
            has_voice: false,
            is_default: false,
        }
    }

    pub fn with_voice(mut self) -> Self {
        self.has_voice = true;
        self
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }
}

/// Where a zone or room id was defined, for duplicate reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub file: String,
}

/// All zones and rooms from every world file.
#[derive(Debug, Clone, Default)]
pub struct WorldDefinition {
    pub zones: Vec<Zone>,
    pub rooms: Vec<Room>,
    zone_origins: Vec<Origin>,
    room_origins: Vec<Origin>,
}

impl WorldDefinition {
    pub fn new(zones: Vec<Zone>, rooms: Vec<Room>) -> Self {
        let zone_origins = vec![Origin { file: "<memory>".into() }; zones.len()];
        let room_origins = vec![Origin { file: "<memory>".into() }; rooms.len()];
        Self {
            zones,
            rooms,
            zone_origins,
            room_origins,
        }
    }

    pub(crate) fn push_zone(&mut self, zone: Zone, file: &str) {
        self.zones.push(zone);
        self.zone_origins.push(Origin { file: file.to_string() });
    }

    pub(crate) fn push_room(&mut self, room: Room, file: &str) {
        self.rooms.push(room);
        self.room_origins.push(Origin { file: file.to_string() });
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn zone_ids(&self) -> HashSet<String> {
        self.zones.iter().map(|z| z.id.clone()).collect()
    }

    pub fn room_ids(&self) -> HashSet<String> {
        self.rooms.iter().map(|r| r.id.clone()).collect()
    }

    pub fn room(&self, id: &str) -> Option<&Room> {
        self.rooms.iter().find(|r| r.id == id)
    }

    /// The single room flagged `IsDefault`.
    pub fn default_room(&self) -> Result<&Room, MuddError> {
        let defaults: Vec<&Room> = self.rooms.iter().filter(|r| r.is_default).collect();
        match defaults.as_slice() {
            [room] => Ok(room),
            [] => Err(MuddError::Validation(
                "No default room found (mark exactly one room with IsDefault: yes)".into(),
            )),
            many => Err(MuddError::Validation(format!(
                "Multiple default rooms found: {}",
                many.iter().map(|r| r.id.as_str()).collect::<Vec<_>>().join(", ")
            ))),
        }
    }

    /// Every problem that makes the definition unsafe to apply.
    ///
    /// Duplicate ids name each file they appear in, e.g.
    /// `Duplicate Room Id 'foyer' in: a.rec (1x), b.rec (1x)`.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        problems.extend(duplicates(
            "Zone",
            self.zones.iter().map(|z| z.id.as_str()).zip(self.zone_origins.iter()),
        ));
        problems.extend(duplicates(
            "Room",
            self.rooms.iter().map(|r| r.id.as_str()).zip(self.room_origins.iter()),
        ));

        let zone_ids = self.zone_ids();
        for room in &self.rooms {
            if !zone_ids.contains(&room.zone_id) {
                problems.push(format!(
                    "Room {} references unknown zone {}",
                    room.id, room.zone_id
                ));
            }
        }
        if !self.rooms.is_empty() {
            if let Err(MuddError::Validation(msg)) = self.default_room() {
                problems.push(msg);
            }
        }
        problems
    }

    /// [`problems`](Self::problems) as a single `Validation` error.
    pub fn validate(&self) -> Result<(), MuddError> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(MuddError::Validation(problems.join("; ")))
        }
    }
}

fn duplicates<'a>(
    kind: &str,
    ids: impl Iterator<Item = (&'a str, &'a Origin)>,
) -> Vec<String> {
    let mut by_id: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (id, origin) in ids {
        by_id.entry(id).or_default().push(origin.file.as_str());
    }
    by_id
        .into_iter()
        .filter(|(_, files)| files.len() > 1)
        .map(|(id, files)| {
            let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
            for f in files {
                *counts.entry(f).or_default() += 1;
            }
            let locations = counts
                .iter()
                .map(|(f, n)| format!("{} ({}x)", f, n))
                .collect::<Vec<_>>()
                .join(", ");
            format!("Duplicate {} Id '{}' in: {}", kind, id, locations)
        })
        .collect()
}
