//! Snapshot mapping rooms to channels and zones to categories for one guild.

use std::collections::HashMap;

use crate::platform::{paired_voice, Channel, ChannelId};
use crate::world::{Room, Zone};

/// Immutable room/channel lookup tables built from one look at the guild.
///
/// A new snapshot replaces the old one wholesale; nothing mutates a built
/// cache, so readers never observe a half-updated mapping.
#[derive(Debug, Default, Clone)]
pub struct RoomCache {
    room_to_channel: HashMap<String, ChannelId>,
    channel_to_room: HashMap<ChannelId, String>,
    zone_to_category: HashMap<String, ChannelId>,
    category_to_zone: HashMap<ChannelId, String>,
    room_to_zone: HashMap<String, String>,
    /// Every text channel inside a zone category, recognized room or not.
    managed: Vec<ChannelId>,
    /// Text channel to the voice channel of the same name in the same category.
    voice: HashMap<ChannelId, ChannelId>,
}

impl RoomCache {
    /// Match `channels` against the stored `zones` and `rooms`.
    ///
    /// A category belongs to a zone when its normalized name equals the zone id
    /// (or the zone's normalized display name). A text channel is a room's
    /// location when it sits in the category of that room's zone and its name
    /// is the room id.
    pub fn build(zones: &[Zone], rooms: &[Room], channels: &[Channel]) -> Self {
        let mut cache = RoomCache::default();

        for category in channels.iter().filter_map(Channel::as_category) {
            let Some(zone) = zones.iter().find(|z| z.matches_category(&category.name)) else {
                continue;
            };
            if cache.zone_to_category.contains_key(&zone.id) {
                log::debug!(
                    "Zone {} already matched a category; ignoring {}",
                    zone.id,
                    category.id
                );
                continue;
            }
            cache.zone_to_category.insert(zone.id.clone(), category.id);
            cache.category_to_zone.insert(category.id, zone.id.clone());
        }

        for room in rooms {
            cache.room_to_zone.insert(room.id.clone(), room.zone_id.clone());
        }

        for text in channels.iter().filter_map(Channel::as_text) {
            let Some(zone_id) = text
                .category_id
                .and_then(|c| cache.category_to_zone.get(&c))
                .cloned()
            else {
                continue;
            };
            cache.managed.push(text.id);
            if let Some(voice) = paired_voice(channels, text) {
                cache.voice.insert(text.id, voice.id);
            }
            let owns = cache
                .room_to_zone
                .get(&text.name)
                .map(|z| *z == zone_id)
                .unwrap_or(false);
            if owns && !cache.room_to_channel.contains_key(&text.name) {
                cache.room_to_channel.insert(text.name.clone(), text.id);
                cache.channel_to_room.insert(text.id, text.name.clone());
            }
        }

        cache
    }

    pub fn channel_for_room(&self, room_id: &str) -> Option<ChannelId> {
        self.room_to_channel.get(room_id).copied()
    }

    pub fn room_for_channel(&self, channel: ChannelId) -> Option<&str> {
        self.channel_to_room.get(&channel).map(String::as_str)
    }

    /// True if `channel` is the text channel of a defined room.
    pub fn is_location_channel(&self, channel: ChannelId) -> bool {
        self.channel_to_room.contains_key(&channel)
    }

    pub fn category_for_zone(&self, zone_id: &str) -> Option<ChannelId> {
        self.zone_to_category.get(zone_id).copied()
    }

    pub fn zone_for_category(&self, category: ChannelId) -> Option<&str> {
        self.category_to_zone.get(&category).map(String::as_str)
    }

    pub fn zone_for_room(&self, room_id: &str) -> Option<&str> {
        self.room_to_zone.get(room_id).map(String::as_str)
    }

    /// Text channels whose member overwrites this crate owns.
    pub fn managed_channels(&self) -> &[ChannelId] {
        &self.managed
    }

    /// The voice channel paired with a managed text channel.
    pub fn voice_for(&self, text_channel: ChannelId) -> Option<ChannelId> {
        self.voice.get(&text_channel).copied()
    }

    pub fn room_count(&self) -> usize {
        self.room_to_channel.len()
    }

    pub fn zone_count(&self) -> usize {
        self.zone_to_category.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{CategoryChannel, TextChannel, VoiceChannel};

    fn category(id: u64, name: &str) -> Channel {
        Channel::Category(CategoryChannel {
            id: ChannelId(id),
            name: name.into(),
        })
    }

    fn text(id: u64, category: Option<u64>, name: &str) -> Channel {
        Channel::Text(TextChannel {
            id: ChannelId(id),
            name: name.into(),
            category_id: category.map(ChannelId),
            topic: None,
        })
    }

    fn voice(id: u64, category: u64, name: &str) -> Channel {
        Channel::Voice(VoiceChannel {
            id: ChannelId(id),
            name: name.into(),
            category_id: Some(ChannelId(category)),
        })
    }

    fn world() -> (Vec<Zone>, Vec<Room>) {
        (
            vec![Zone::new("floor-1", "Floor 1"), Zone::new("cellar", "Cellar")],
            vec![
                Room::new("foyer", "Foyer", "", "floor-1").as_default(),
                Room::new("office", "Office", "", "floor-1").with_voice(),
                Room::new("wine", "Wine", "", "cellar"),
            ],
        )
    }

    #[test]
    fn matches_rooms_inside_zone_categories() {
        let (zones, rooms) = world();
        let channels = vec![
            category(1, "Floor 1"),
            text(10, Some(1), "foyer"),
            text(11, Some(1), "office"),
            voice(12, 1, "office"),
            text(13, Some(1), "broom-closet"),
            text(20, None, "general"),
        ];
        let cache = RoomCache::build(&zones, &rooms, &channels);

        assert_eq!(cache.category_for_zone("floor-1"), Some(ChannelId(1)));
        assert_eq!(cache.channel_for_room("foyer"), Some(ChannelId(10)));
        assert_eq!(cache.room_for_channel(ChannelId(11)), Some("office"));
        assert!(!cache.is_location_channel(ChannelId(13)));
        assert!(!cache.is_location_channel(ChannelId(20)));
        assert_eq!(
            cache.managed_channels(),
            &[ChannelId(10), ChannelId(11), ChannelId(13)]
        );
        assert_eq!(cache.voice_for(ChannelId(11)), Some(ChannelId(12)));
        assert_eq!(cache.voice_for(ChannelId(10)), None);
        assert_eq!(cache.zone_for_room("wine"), Some("cellar"));
        assert_eq!(cache.room_count(), 2);
    }

    #[test]
    fn room_channel_in_wrong_zone_is_not_a_location() {
        let (zones, rooms) = world();
        let channels = vec![
            category(1, "floor-1"),
            category(2, "cellar"),
            text(10, Some(2), "foyer"),
        ];
        let cache = RoomCache::build(&zones, &rooms, &channels);
        assert_eq!(cache.channel_for_room("foyer"), None);
        assert_eq!(cache.managed_channels(), &[ChannelId(10)]);
    }

    #[test]
    fn unknown_categories_are_ignored() {
        let (zones, rooms) = world();
        let channels = vec![category(5, "Lobby"), text(50, Some(5), "foyer")];
        let cache = RoomCache::build(&zones, &rooms, &channels);
        assert_eq!(cache.zone_count(), 0);
        assert!(cache.managed_channels().is_empty());
    }
}
