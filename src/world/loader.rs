//! Load zones and rooms from a directory of `.rec` files.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use super::recfile::{self, Record};
use super::{Room, WorldDefinition, Zone};
use crate::errors::MuddError;

/// `yes`, `true` and `1` (any case) are true; anything else is false.
pub fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "yes" | "true" | "1")
}

fn required<'a>(record: &'a Record, file: &str, field: &str) -> Result<&'a str, MuddError> {
    record.get(field).ok_or_else(|| MuddError::WorldParse {
        file: file.to_string(),
        line: record.line,
        message: format!("{} record is missing '{}'", record.rec_type.as_deref().unwrap_or("untyped"), field),
    })
}

fn zone_from_record(record: &Record, file: &str) -> Result<Zone, MuddError> {
    Ok(Zone {
        id: required(record, file, "Id")?.to_string(),
        name: required(record, file, "Name")?.to_string(),
        description: record
            .get("Description")
            .filter(|d| !d.is_empty())
            .map(str::to_string),
    })
}

fn room_from_record(record: &Record, file: &str) -> Result<Room, MuddError> {
    Ok(Room {
        id: required(record, file, "Id")?.to_string(),
        name: required(record, file, "Name")?.to_string(),
        description: required(record, file, "Description")?.to_string(),
        zone_id: required(record, file, "Zone")?.to_string(),
        has_voice: record.get("HasVoice").map(parse_bool).unwrap_or(false),
        is_default: record.get("IsDefault").map(parse_bool).unwrap_or(false),
    })
}

/// Parse a single world file into `world`.
pub fn load_world_file(path: &Path, world: &mut WorldDefinition) -> Result<(), MuddError> {
    let label = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let contents = fs::read_to_string(path)?;
    let parsed = recfile::parse(&label, &contents)?;

    let mut zones = 0;
    let mut rooms = 0;
    for record in parsed.of_type("Zone") {
        world.push_zone(zone_from_record(record, &label)?, &label);
        zones += 1;
    }
    for record in parsed.of_type("Room") {
        world.push_room(room_from_record(record, &label)?, &label);
        rooms += 1;
    }
    debug!("{}: {} zones, {} rooms", label, zones, rooms);
    Ok(())
}

fn rec_files(dir: &Path) -> Result<Vec<PathBuf>, MuddError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("rec") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Load every `*.rec` file in `dir`, in file-name order.
///
/// A missing directory or one without world files yields an empty definition;
/// the reconciler skips empty definitions rather than wiping the store.
pub fn load_world(dir: &Path) -> Result<WorldDefinition, MuddError> {
    let mut world = WorldDefinition::default();
    if !dir.is_dir() {
        warn!("World directory {} does not exist", dir.display());
        return Ok(world);
    }
    let files = rec_files(dir)?;
    if files.is_empty() {
        warn!("No .rec files found in {}", dir.display());
        return Ok(world);
    }
    for file in &files {
        load_world_file(file, &mut world)?;
    }
    debug!(
        "Loaded {} zones and {} rooms from {}",
        world.zones.len(),
        world.rooms.len(),
        dir.display()
    );
    Ok(world)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ZONES: &str = "%rec: Zone\n%key: Id\n\nId: floor-1\nName: Floor 1\n";
    const ROOMS: &str = "\
%rec: Room
%mandatory: Id Name Description Zone

Id: foyer
Name: Foyer
Description: Entrance. #office
Zone: floor-1
IsDefault: Yes

Id: office
Name: Office
Description: Desk. #foyer
Zone: floor-1
HasVoice: true
";

    #[test]
    fn loads_all_files_in_order() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("a-zones.rec"), ZONES).unwrap();
        fs::write(dir.path().join("b-rooms.rec"), ROOMS).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let world = load_world(dir.path()).expect("load");
        assert_eq!(world.zones.len(), 1);
        assert_eq!(world.rooms.len(), 2);
        assert!(world.rooms[0].is_default);
        assert!(world.rooms[1].has_voice);
        assert!(!world.rooms[1].is_default);
        assert_eq!(world.default_room().unwrap().id, "foyer");
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = TempDir::new().expect("tempdir");
        let world = load_world(&dir.path().join("nope")).expect("load");
        assert!(world.is_empty());
    }

    #[test]
    fn empty_directory_is_empty() {
        let dir = TempDir::new().expect("tempdir");
        assert!(load_world(dir.path()).expect("load").is_empty());
    }

    #[test]
    fn room_without_description_is_fatal() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(
            dir.path().join("bad.rec"),
            "%rec: Room\n\nId: attic\nName: Attic\nZone: floor-1\n",
        )
        .unwrap();
        match load_world(dir.path()) {
            Err(MuddError::WorldParse { file, line, .. }) => {
                assert_eq!(file, "bad.rec");
                assert_eq!(line, 3);
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn duplicates_across_files_are_reported_with_files() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("a.rec"), ZONES).unwrap();
        fs::write(dir.path().join("b.rec"), ZONES).unwrap();
        let world = load_world(dir.path()).expect("load");
        assert!(world
            .problems()
            .iter()
            .any(|p| p == "Duplicate Zone Id 'floor-1' in: a.rec (1x), b.rec (1x)"));
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("yes"));
        assert!(parse_bool("TRUE"));
        assert!(parse_bool("1"));
        assert!(!parse_bool("no"));
        assert!(!parse_bool(""));
    }
}
