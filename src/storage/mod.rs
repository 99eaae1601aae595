//! # Storage Module - World and Location Persistence
//!
//! The persistent store keeps three kinds of records in a single sled tree:
//!
//! ```text
//! zones:<zone-id>   ← Zone mirrored from the world files
//! rooms:<room-id>   ← Room mirrored from the world files
//! users:<user-id>   ← the room a member currently occupies
//! ```
//!
//! Keeping them in one tree lets every multi-record mutation (relocating
//! members out of a deleted room, pruning rooms before zones, upserting the
//! new definition) commit as a single sled transaction.
//!
//! Records are bincode encoded inside an envelope that carries a schema
//! version; reading a record written by a different version yields
//! [`MuddError::SchemaMismatch`] rather than garbage.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};

use crate::errors::MuddError;
use crate::platform::UserId;
use crate::world::{Room, WorldDefinition, Zone};

const TREE_PRIMARY: &str = "mudd";

const ZONE_PREFIX: &str = "zones:";
const ROOM_PREFIX: &str = "rooms:";
const USER_PREFIX: &str = "users:";

pub const ZONE_SCHEMA_VERSION: u8 = 1;
pub const ROOM_SCHEMA_VERSION: u8 = 1;
pub const LOCATION_SCHEMA_VERSION: u8 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    schema_version: u8,
    record: T,
}

/// Where a member currently is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLocation {
    pub user_id: UserId,
    pub room_id: String,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of [`WorldStore::apply_world`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub zones: usize,
    pub rooms: usize,
    pub zones_deleted: usize,
    pub rooms_deleted: usize,
    pub users_relocated: usize,
}

/// Record counts, for `mudd status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub zones: usize,
    pub rooms: usize,
    pub users: usize,
}

type TxResult<T> = Result<T, ConflictableTransactionError<MuddError>>;

fn zone_key(id: &str) -> Vec<u8> {
    format!("{}{}", ZONE_PREFIX, id).into_bytes()
}

fn room_key(id: &str) -> Vec<u8> {
    format!("{}{}", ROOM_PREFIX, id).into_bytes()
}

fn user_key(user: UserId) -> Vec<u8> {
    format!("{}{}", USER_PREFIX, user.get()).into_bytes()
}

fn encode<T: Serialize>(schema_version: u8, record: &T) -> Result<Vec<u8>, MuddError> {
    Ok(bincode::serialize(&Envelope {
        schema_version,
        record,
    })?)
}

fn decode<T: DeserializeOwned>(
    entity: &'static str,
    expected: u8,
    bytes: &[u8],
) -> Result<T, MuddError> {
    let envelope: Envelope<T> = bincode::deserialize(bytes)?;
    if envelope.schema_version != expected {
        return Err(MuddError::SchemaMismatch {
            entity,
            expected,
            found: envelope.schema_version,
        });
    }
    Ok(envelope.record)
}

fn abort<T>(err: MuddError) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(err))
}

fn unwrap_tx<T>(result: Result<T, TransactionError<MuddError>>) -> Result<T, MuddError> {
    result.map_err(|e| match e {
        TransactionError::Abort(inner) => inner,
        TransactionError::Storage(inner) => MuddError::Sled(inner),
    })
}

fn tx_put_location(
    tx: &TransactionalTree,
    user: UserId,
    room_id: &str,
) -> TxResult<()> {
    let location = UserLocation {
        user_id: user,
        room_id: room_id.to_string(),
        updated_at: Utc::now(),
    };
    let bytes = match encode(LOCATION_SCHEMA_VERSION, &location) {
        Ok(bytes) => bytes,
        Err(e) => return abort(e),
    };
    tx.insert(user_key(user), bytes)?;
    Ok(())
}

/// Sled-backed persistence for zones, rooms and member locations.
pub struct WorldStore {
    db: sled::Db,
    primary: sled::Tree,
}

impl WorldStore {
    /// Open (or create) the store rooted at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, MuddError> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        let db = sled::open(path)?;
        let primary = db.open_tree(TREE_PRIMARY)?;
        Ok(Self { db, primary })
    }

    pub fn flush(&self) -> Result<(), MuddError> {
        self.primary.flush()?;
        self.db.flush()?;
        Ok(())
    }

    fn scan<T: DeserializeOwned>(
        &self,
        prefix: &str,
        entity: &'static str,
        version: u8,
    ) -> Result<Vec<T>, MuddError> {
        let mut out = Vec::new();
        for entry in self.primary.scan_prefix(prefix.as_bytes()) {
            let (_, value) = entry?;
            out.push(decode(entity, version, &value)?);
        }
        Ok(out)
    }

    fn scan_ids(&self, prefix: &str) -> Result<Vec<String>, MuddError> {
        let mut ids = Vec::new();
        for entry in self.primary.scan_prefix(prefix.as_bytes()) {
            let (key, _) = entry?;
            let text = std::str::from_utf8(&key)?;
            if let Some(id) = text.strip_prefix(prefix) {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }

    // ---- locations ----

    /// The stored location record for `user`, if any.
    pub fn get_user_location(&self, user: UserId) -> Result<Option<UserLocation>, MuddError> {
        match self.primary.get(user_key(user))? {
            Some(bytes) => Ok(Some(decode("location", LOCATION_SCHEMA_VERSION, &bytes)?)),
            None => Ok(None),
        }
    }

    /// The room id `user` is in, if any.
    pub fn get_location(&self, user: UserId) -> Result<Option<String>, MuddError> {
        Ok(self.get_user_location(user)?.map(|l| l.room_id))
    }

    /// Put `user` in `room_id`. The room must exist.
    pub fn set_location(&self, user: UserId, room_id: &str) -> Result<(), MuddError> {
        let result = self.primary.transaction(|tx| -> TxResult<()> {
            if tx.get(room_key(room_id))?.is_none() {
                return abort(MuddError::NotFound(format!("room: {}", room_id)));
            }
            tx_put_location(tx, user, room_id)
        });
        unwrap_tx(result)?;
        self.primary.flush()?;
        Ok(())
    }

    /// Forget where `user` is. Returns whether a location was stored.
    pub fn delete_location(&self, user: UserId) -> Result<bool, MuddError> {
        let existed = self.primary.remove(user_key(user))?.is_some();
        self.primary.flush()?;
        Ok(existed)
    }

    pub fn list_locations(&self) -> Result<Vec<UserLocation>, MuddError> {
        self.scan(USER_PREFIX, "location", LOCATION_SCHEMA_VERSION)
    }

    /// Members whose stored location is `room_id`.
    pub fn users_in_room(&self, room_id: &str) -> Result<Vec<UserId>, MuddError> {
        Ok(self
            .list_locations()?
            .into_iter()
            .filter(|l| l.room_id == room_id)
            .map(|l| l.user_id)
            .collect())
    }

    // ---- zones and rooms ----

    pub fn list_zones(&self) -> Result<Vec<Zone>, MuddError> {
        self.scan(ZONE_PREFIX, "zone", ZONE_SCHEMA_VERSION)
    }

    pub fn list_rooms(&self) -> Result<Vec<Room>, MuddError> {
        self.scan(ROOM_PREFIX, "room", ROOM_SCHEMA_VERSION)
    }

    pub fn get_room(&self, room_id: &str) -> Result<Option<Room>, MuddError> {
        match self.primary.get(room_key(room_id))? {
            Some(bytes) => Ok(Some(decode("room", ROOM_SCHEMA_VERSION, &bytes)?)),
            None => Ok(None),
        }
    }

    pub fn upsert_zone(&self, zone: &Zone) -> Result<(), MuddError> {
        let bytes = encode(ZONE_SCHEMA_VERSION, zone)?;
        self.primary.insert(zone_key(&zone.id), bytes)?;
        self.primary.flush()?;
        Ok(())
    }

    /// Insert or update `room`. Its zone must already be stored.
    pub fn upsert_room(&self, room: &Room) -> Result<(), MuddError> {
        let bytes = encode(ROOM_SCHEMA_VERSION, room)?;
        let result = self.primary.transaction(|tx| -> TxResult<()> {
            if tx.get(zone_key(&room.zone_id))?.is_none() {
                return abort(MuddError::Validation(format!(
                    "room {} references unknown zone {}",
                    room.id, room.zone_id
                )));
            }
            tx.insert(room_key(&room.id), bytes.clone())?;
            Ok(())
        });
        unwrap_tx(result)?;
        self.primary.flush()?;
        Ok(())
    }

    /// Delete every stored room not in `keep`; returns the deleted ids.
    ///
    /// Members left pointing at a deleted room are repaired by
    /// [`reassign_users_from_deleted_rooms`](Self::reassign_users_from_deleted_rooms).
    pub fn delete_rooms_not_in(&self, keep: &HashSet<String>) -> Result<Vec<String>, MuddError> {
        let stale: Vec<String> = self
            .scan_ids(ROOM_PREFIX)?
            .into_iter()
            .filter(|id| !keep.contains(id))
            .collect();
        let result = self.primary.transaction(|tx| -> TxResult<()> {
            for id in &stale {
                tx.remove(room_key(id))?;
            }
            Ok(())
        });
        unwrap_tx(result)?;
        self.primary.flush()?;
        Ok(stale)
    }

    /// Delete every stored zone not in `keep`; fails if a stored room still uses one.
    pub fn delete_zones_not_in(&self, keep: &HashSet<String>) -> Result<Vec<String>, MuddError> {
        let stale: Vec<String> = self
            .scan_ids(ZONE_PREFIX)?
            .into_iter()
            .filter(|id| !keep.contains(id))
            .collect();
        if let Some(room) = self
            .list_rooms()?
            .into_iter()
            .find(|r| stale.contains(&r.zone_id))
        {
            return Err(MuddError::Validation(format!(
                "zone {} is still referenced by room {}",
                room.zone_id, room.id
            )));
        }
        let result = self.primary.transaction(|tx| -> TxResult<()> {
            for id in &stale {
                tx.remove(zone_key(id))?;
            }
            Ok(())
        });
        unwrap_tx(result)?;
        self.primary.flush()?;
        Ok(stale)
    }

    /// Move every member whose room no longer exists to `default_room`.
    pub fn reassign_users_from_deleted_rooms(&self, default_room: &str) -> Result<usize, MuddError> {
        let rooms: HashSet<String> = self.scan_ids(ROOM_PREFIX)?.into_iter().collect();
        let stranded: Vec<UserId> = self
            .list_locations()?
            .into_iter()
            .filter(|l| !rooms.contains(&l.room_id))
            .map(|l| l.user_id)
            .collect();
        if stranded.is_empty() {
            return Ok(0);
        }

        let result = self.primary.transaction(|tx| -> TxResult<usize> {
            if tx.get(room_key(default_room))?.is_none() {
                return abort(MuddError::NotFound(format!("default room: {}", default_room)));
            }
            let mut moved = 0;
            for user in &stranded {
                let Some(bytes) = tx.get(user_key(*user))? else {
                    continue;
                };
                let location: UserLocation =
                    match decode("location", LOCATION_SCHEMA_VERSION, &bytes) {
                        Ok(l) => l,
                        Err(e) => return abort(e),
                    };
                if tx.get(room_key(&location.room_id))?.is_none() {
                    tx_put_location(tx, *user, default_room)?;
                    moved += 1;
                }
            }
            Ok(moved)
        });
        let moved = unwrap_tx(result)?;
        self.primary.flush()?;
        if moved > 0 {
            info!("Relocated {} users from deleted rooms to {}", moved, default_room);
        }
        Ok(moved)
    }

    /// Mirror `world` into the store in one transaction.
    ///
    /// Members in rooms that disappear are moved to `default_room`, stale rooms
    /// are deleted before stale zones, then every zone and room is upserted.
    pub fn apply_world(&self, world: &WorldDefinition, default_room: &str) -> Result<ApplyStats, MuddError> {
        let zone_ids = world.zone_ids();
        let room_ids = world.room_ids();
        if !room_ids.contains(default_room) {
            let mut available: Vec<&String> = room_ids.iter().collect();
            available.sort();
            return Err(MuddError::Validation(format!(
                "default room '{}' not found in rooms; available rooms: {:?}",
                default_room, available
            )));
        }
        if let Some(room) = world.rooms.iter().find(|r| !zone_ids.contains(&r.zone_id)) {
            return Err(MuddError::Validation(format!(
                "room {} references unknown zone {}",
                room.id, room.zone_id
            )));
        }

        let stale_rooms: Vec<String> = self
            .scan_ids(ROOM_PREFIX)?
            .into_iter()
            .filter(|id| !room_ids.contains(id))
            .collect();
        let stale_zones: Vec<String> = self
            .scan_ids(ZONE_PREFIX)?
            .into_iter()
            .filter(|id| !zone_ids.contains(id))
            .collect();
        let stranded: Vec<UserId> = self
            .list_locations()?
            .into_iter()
            .filter(|l| !room_ids.contains(&l.room_id))
            .map(|l| l.user_id)
            .collect();

        let mut encoded_zones = Vec::with_capacity(world.zones.len());
        for zone in &world.zones {
            encoded_zones.push((zone_key(&zone.id), encode(ZONE_SCHEMA_VERSION, zone)?));
        }
        let mut encoded_rooms = Vec::with_capacity(world.rooms.len());
        for room in &world.rooms {
            encoded_rooms.push((room_key(&room.id), encode(ROOM_SCHEMA_VERSION, room)?));
        }

        let result = self.primary.transaction(|tx| -> TxResult<usize> {
            let mut relocated = 0;
            for user in &stranded {
                let Some(bytes) = tx.get(user_key(*user))? else {
                    continue;
                };
                let location: UserLocation =
                    match decode("location", LOCATION_SCHEMA_VERSION, &bytes) {
                        Ok(l) => l,
                        Err(e) => return abort(e),
                    };
                if !room_ids.contains(&location.room_id) {
                    tx_put_location(tx, *user, default_room)?;
                    relocated += 1;
                }
            }
            for id in &stale_rooms {
                tx.remove(room_key(id))?;
            }
            for id in &stale_zones {
                tx.remove(zone_key(id))?;
            }
            for (key, bytes) in &encoded_zones {
                tx.insert(key.as_slice(), bytes.as_slice())?;
            }
            for (key, bytes) in &encoded_rooms {
                tx.insert(key.as_slice(), bytes.as_slice())?;
            }
            Ok(relocated)
        });
        let mut relocated = unwrap_tx(result)?;

        // A move that committed between the scan and the transaction can still
        // point at a room that was just deleted.
        relocated += self.reassign_users_from_deleted_rooms(default_room)?;
        self.primary.flush()?;

        if relocated > 0 {
            info!("Relocated {} users from deleted rooms", relocated);
        }
        if !stale_rooms.is_empty() || !stale_zones.is_empty() {
            warn!(
                "Deleted {} rooms and {} zones no longer in the world files",
                stale_rooms.len(),
                stale_zones.len()
            );
        }
        debug!(
            "Synced {} zones and {} rooms to the store",
            world.zones.len(),
            world.rooms.len()
        );

        Ok(ApplyStats {
            zones: world.zones.len(),
            rooms: world.rooms.len(),
            zones_deleted: stale_zones.len(),
            rooms_deleted: stale_rooms.len(),
            users_relocated: relocated,
        })
    }

    pub fn counts(&self) -> Result<StoreCounts, MuddError> {
        let count = |prefix: &str| -> Result<usize, MuddError> {
            let mut n = 0;
            for entry in self.primary.scan_prefix(prefix.as_bytes()) {
                entry?;
                n += 1;
            }
            Ok(n)
        };
        Ok(StoreCounts {
            zones: count(ZONE_PREFIX)?,
            rooms: count(ROOM_PREFIX)?,
            users: count(USER_PREFIX)?,
        })
    }

    /// Raw access for tests that need to plant records from another schema.
    #[cfg(test)]
    fn insert_raw(&self, key: &[u8], value: &[u8]) -> Result<(), MuddError> {
        self.primary.insert(key, value)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn world(rooms: &[&str]) -> WorldDefinition {
        let mut defs = Vec::new();
        for (i, id) in rooms.iter().enumerate() {
            let room = Room::new(id, id, &format!("The {}.", id), "floor-1");
            defs.push(if i == 0 { room.as_default() } else { room });
        }
        WorldDefinition::new(vec![Zone::new("floor-1", "Floor 1")], defs)
    }

    fn open(dir: &TempDir) -> WorldStore {
        WorldStore::open(dir.path().join("db")).expect("store")
    }

    #[test]
    fn location_round_trip() {
        let dir = TempDir::new().expect("tempdir");
        let store = open(&dir);
        store.apply_world(&world(&["foyer", "office"]), "foyer").expect("apply");

        let alice = UserId(7);
        assert_eq!(store.get_location(alice).unwrap(), None);
        store.set_location(alice, "office").expect("set");
        assert_eq!(store.get_location(alice).unwrap().as_deref(), Some("office"));
        assert_eq!(store.users_in_room("office").unwrap(), vec![alice]);
        assert!(store.delete_location(alice).unwrap());
        assert!(!store.delete_location(alice).unwrap());
        assert_eq!(store.get_location(alice).unwrap(), None);
    }

    #[test]
    fn set_location_rejects_unknown_room() {
        let dir = TempDir::new().expect("tempdir");
        let store = open(&dir);
        store.apply_world(&world(&["foyer"]), "foyer").expect("apply");
        let err = store.set_location(UserId(1), "attic").unwrap_err();
        assert!(matches!(err, MuddError::NotFound(_)));
        assert_eq!(store.get_location(UserId(1)).unwrap(), None);
    }

    #[test]
    fn apply_world_relocates_users_from_deleted_rooms() {
        let dir = TempDir::new().expect("tempdir");
        let store = open(&dir);
        store
            .apply_world(&world(&["foyer", "office", "library"]), "foyer")
            .expect("apply");
        store.set_location(UserId(1), "office").unwrap();
        store.set_location(UserId(2), "library").unwrap();

        let stats = store.apply_world(&world(&["foyer", "library"]), "foyer").expect("apply");
        assert_eq!(stats.rooms_deleted, 1);
        assert_eq!(stats.users_relocated, 1);
        assert_eq!(store.get_location(UserId(1)).unwrap().as_deref(), Some("foyer"));
        assert_eq!(store.get_location(UserId(2)).unwrap().as_deref(), Some("library"));
        assert!(store.get_room("office").unwrap().is_none());
    }

    #[test]
    fn apply_world_requires_default_in_rooms() {
        let dir = TempDir::new().expect("tempdir");
        let store = open(&dir);
        let err = store.apply_world(&world(&["foyer"]), "lobby").unwrap_err();
        assert!(matches!(err, MuddError::Validation(_)));
        assert_eq!(store.counts().unwrap(), StoreCounts::default());
    }

    #[test]
    fn apply_world_is_idempotent() {
        let dir = TempDir::new().expect("tempdir");
        let store = open(&dir);
        let def = world(&["foyer", "office"]);
        store.apply_world(&def, "foyer").expect("first");
        let second = store.apply_world(&def, "foyer").expect("second");
        assert_eq!(second.rooms_deleted, 0);
        assert_eq!(second.users_relocated, 0);
        assert_eq!(
            store.counts().unwrap(),
            StoreCounts {
                zones: 1,
                rooms: 2,
                users: 0
            }
        );
    }

    #[test]
    fn zones_in_use_cannot_be_deleted() {
        let dir = TempDir::new().expect("tempdir");
        let store = open(&dir);
        store.apply_world(&world(&["foyer"]), "foyer").expect("apply");
        let err = store.delete_zones_not_in(&HashSet::new()).unwrap_err();
        assert!(matches!(err, MuddError::Validation(_)));

        store.delete_rooms_not_in(&HashSet::new()).expect("rooms");
        let deleted = store.delete_zones_not_in(&HashSet::new()).expect("zones");
        assert_eq!(deleted, vec!["floor-1".to_string()]);
    }

    #[test]
    fn upsert_room_requires_zone() {
        let dir = TempDir::new().expect("tempdir");
        let store = open(&dir);
        let room = Room::new("attic", "Attic", "Dusty.", "floor-9");
        assert!(matches!(store.upsert_room(&room), Err(MuddError::Validation(_))));
        store.upsert_zone(&Zone::new("floor-9", "Floor 9")).unwrap();
        store.upsert_room(&room).expect("upsert");
        assert_eq!(store.list_rooms().unwrap(), vec![room]);
    }

    #[test]
    fn reassign_repairs_dangling_locations() {
        let dir = TempDir::new().expect("tempdir");
        let store = open(&dir);
        store.apply_world(&world(&["foyer", "office"]), "foyer").expect("apply");
        store.set_location(UserId(3), "office").unwrap();
        store
            .delete_rooms_not_in(&["foyer".to_string()].into_iter().collect())
            .unwrap();
        assert_eq!(store.reassign_users_from_deleted_rooms("foyer").unwrap(), 1);
        assert_eq!(store.get_location(UserId(3)).unwrap().as_deref(), Some("foyer"));
        assert_eq!(store.reassign_users_from_deleted_rooms("foyer").unwrap(), 0);
    }

    #[test]
    fn schema_mismatch_is_reported() {
        let dir = TempDir::new().expect("tempdir");
        let store = open(&dir);
        let stale = bincode::serialize(&Envelope {
            schema_version: 0u8,
            record: Zone::new("old", "Old"),
        })
        .unwrap();
        store.insert_raw(&zone_key("old"), &stale).unwrap();
        match store.list_zones() {
            Err(MuddError::SchemaMismatch { entity, found, .. }) => {
                assert_eq!(entity, "zone");
                assert_eq!(found, 0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
