//! # Zone/Room Reconciler
//!
//! Mirrors the world definition into the store and onto a guild:
//!
//! 1. store: relocate members out of deleted rooms, prune rooms then zones,
//!    upsert everything (one transaction, see [`WorldStore::apply_world`]);
//! 2. platform: create a fog-of-war category per zone, a text channel per
//!    room (topic = description) and a voice channel for rooms that want one,
//!    and fix topics that drifted;
//! 3. report channels in zone categories that no room accounts for, once.
//!
//! An empty definition is skipped untouched so an unreadable world directory
//! can never wipe the store.

pub mod orphans;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::errors::MuddError;
use crate::logutil::escape_log;
use crate::metrics;
use crate::platform::{
    CategoryChannel, Channel, ChannelPlatform, GuildId, PermissionOverwrite,
};
use crate::storage::WorldStore;
use crate::world::WorldDefinition;

pub use orphans::{orphan_report, Orphan, OrphanTracker};

/// Counters for one reconciliation of one guild.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    pub zones: usize,
    pub rooms: usize,
    pub users_relocated: usize,
    pub categories_created: usize,
    pub channels_created: usize,
    pub voice_channels_created: usize,
    pub topics_updated: usize,
    pub orphans_found: usize,
    pub orphans_reported: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub stats: ReconcileStats,
    /// The definition's default room; `None` when the sync was skipped.
    pub default_room: Option<String>,
    /// Every orphan found this pass, reported or not.
    pub orphans: Vec<Orphan>,
}

pub struct ZoneReconciler {
    store: Arc<WorldStore>,
    platform: Arc<dyn ChannelPlatform>,
    console_channel: String,
    orphans: OrphanTracker,
}

impl ZoneReconciler {
    pub fn new(store: Arc<WorldStore>, platform: Arc<dyn ChannelPlatform>, console_channel: &str) -> Self {
        Self {
            store,
            platform,
            console_channel: console_channel.to_string(),
            orphans: OrphanTracker::new(),
        }
    }

    pub fn console_channel(&self) -> &str {
        &self.console_channel
    }

    pub fn orphan_tracker(&self) -> &OrphanTracker {
        &self.orphans
    }

    /// Reconcile `world` into the store and onto `guild`.
    pub async fn sync(&self, world: &WorldDefinition, guild: GuildId) -> Result<ReconcileOutcome, MuddError> {
        if world.is_empty() {
            warn!("No zones found in world files - skipping sync for {}", guild);
            return Ok(ReconcileOutcome::default());
        }
        world.validate()?;
        let default_room = world.default_room()?.id.clone();

        let applied = self.store.apply_world(world, &default_room)?;
        let mut stats = ReconcileStats {
            zones: applied.zones,
            rooms: applied.rooms,
            users_relocated: applied.users_relocated,
            ..ReconcileStats::default()
        };

        let mut channels = self.platform.channels(guild).await?;

        let mut categories: HashMap<String, CategoryChannel> = HashMap::new();
        for category in channels.iter().filter_map(Channel::as_category) {
            if let Some(zone) = world.zones.iter().find(|z| z.matches_category(&category.name)) {
                categories
                    .entry(zone.id.clone())
                    .or_insert_with(|| category.clone());
            }
        }

        for zone in &world.zones {
            if categories.contains_key(&zone.id) {
                continue;
            }
            let category = self
                .platform
                .create_category(guild, &zone.name, PermissionOverwrite::deny_view())
                .await?;
            info!("Created category: {}", escape_log(&zone.name));
            channels.push(Channel::Category(category.clone()));
            categories.insert(zone.id.clone(), category);
            stats.categories_created += 1;
        }

        for room in &world.rooms {
            let Some(category) = categories.get(&room.zone_id) else {
                warn!("No category found for room {} in zone {}", room.id, room.zone_id);
                continue;
            };

            let existing = channels
                .iter()
                .filter_map(Channel::as_text)
                .find(|t| t.category_id == Some(category.id) && t.name == room.id)
                .cloned();
            match existing {
                None => {
                    let created = self
                        .platform
                        .create_text_channel(guild, category.id, &room.id, &room.description)
                        .await?;
                    info!("Created channel: #{} in {}", room.id, escape_log(&category.name));
                    channels.push(Channel::Text(created));
                    stats.channels_created += 1;
                }
                Some(text) if text.topic.as_deref().unwrap_or("") != room.description => {
                    self.platform.edit_topic(text.id, &room.description).await?;
                    debug!(
                        "Updated topic for #{}: {}",
                        room.id,
                        escape_log(&room.description)
                    );
                    stats.topics_updated += 1;
                }
                Some(_) => {}
            }

            if room.has_voice {
                let has_voice = channels
                    .iter()
                    .filter_map(Channel::as_voice)
                    .any(|v| v.category_id == Some(category.id) && v.name == room.id);
                if !has_voice {
                    let created = self
                        .platform
                        .create_voice_channel(guild, category.id, &room.id)
                        .await?;
                    info!("Created voice channel: {} in {}", room.id, escape_log(&category.name));
                    channels.push(Channel::Voice(created));
                    stats.voice_channels_created += 1;
                }
            }
        }

        let orphans = find_orphans(world, &categories, &channels);
        stats.orphans_found = orphans.len();
        let fresh = self.orphans.unseen(guild, &orphans);
        let delivered = if fresh.is_empty() {
            true
        } else {
            match self.report_orphans(guild, &channels, &fresh).await {
                Some(reported) => {
                    stats.orphans_reported = reported;
                    true
                }
                None => false,
            }
        };
        if delivered {
            self.orphans.remember(guild, &orphans);
        } else {
            // Retry the unsent ones next pass.
            let kept: Vec<Orphan> = orphans
                .iter()
                .filter(|o| !fresh.contains(o))
                .cloned()
                .collect();
            self.orphans.remember(guild, &kept);
        }

        info!(
            "Discord sync complete: {} categories, {} channels, {} voice channels, \
             {} topics updated, {} orphans",
            stats.categories_created,
            stats.channels_created,
            stats.voice_channels_created,
            stats.topics_updated,
            stats.orphans_found
        );

        Ok(ReconcileOutcome {
            stats,
            default_room: Some(default_room),
            orphans,
        })
    }

    /// Post `fresh` to the console channel; returns how many were reported.
    ///
    /// A missing console channel counts as handled (`Some(0)`); a failed send
    /// returns `None` so the orphans are offered again next pass.
    async fn report_orphans(&self, guild: GuildId, channels: &[Channel], fresh: &[Orphan]) -> Option<usize> {
        let Some(console) = channels
            .iter()
            .filter_map(Channel::as_text)
            .find(|t| t.name == self.console_channel)
        else {
            warn!(
                "Console channel #{} not found - cannot report {} orphan channels",
                self.console_channel,
                fresh.len()
            );
            return Some(0);
        };
        match self.platform.send_message(console.id, &orphan_report(fresh)).await {
            Ok(()) => {
                info!("Reported {} orphan channels to #{}", fresh.len(), self.console_channel);
                metrics::record_orphans_reported(guild, fresh.len() as u64);
                Some(fresh.len())
            }
            Err(e) => {
                warn!("Failed to report orphan channels to #{}: {}", self.console_channel, e);
                None
            }
        }
    }
}

fn find_orphans(
    world: &WorldDefinition,
    categories: &HashMap<String, CategoryChannel>,
    channels: &[Channel],
) -> Vec<Orphan> {
    let room_ids = world.room_ids();
    let mut seen = HashSet::new();
    let mut orphans = Vec::new();
    for zone in &world.zones {
        let Some(category) = categories.get(&zone.id) else {
            continue;
        };
        for channel in channels {
            if channel.category_id() != Some(category.id) || room_ids.contains(channel.name()) {
                continue;
            }
            let orphan = Orphan {
                channel: channel.name().to_string(),
                category: category.name.clone(),
            };
            if seen.insert(orphan.clone()) {
                orphans.push(orphan);
            }
        }
    }
    orphans
}
