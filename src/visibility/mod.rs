//! # Visibility Engine
//!
//! Owns "who can see which room". A member's location is stored as a room id;
//! the engine derives the channel from the guild's [`RoomCache`] and keeps the
//! member's per-channel overwrites consistent with it:
//!
//! - the current room's text channel (and paired voice channel) carries an
//!   explicit grant;
//! - every other text channel in a zone category carries no member overwrite,
//!   so the category's closed-by-default permissions apply.
//!
//! Moves persist the new location first, then revoke the old room, then grant
//! the new one. A crash part way leaves the store right and the next
//! [`VisibilityEngine::sync_guild`] repairs the permissions.

pub mod cache;
pub mod gate;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, error, info, warn};

use crate::errors::MuddError;
use crate::metrics;
use crate::platform::{ChannelId, ChannelPlatform, GuildId, Member, PermissionOverwrite, UserId};
use crate::storage::WorldStore;

pub use cache::RoomCache;
pub use gate::{GateState, StartupGate};

const REASON_SYNC: &str = "MUDD visibility sync";
const REASON_LEAVING: &str = "MUDD movement - leaving";
const REASON_ENTERING: &str = "MUDD movement - entering";

/// Result of one [`VisibilityEngine::sync_guild`] pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    /// Members whose stored location was valid and whose permissions were pushed.
    pub synced: usize,
    /// Members placed in the default room (no location, or a vanished one).
    pub assigned_default: usize,
    pub errors: usize,
}

pub struct VisibilityEngine {
    store: Arc<WorldStore>,
    platform: Arc<dyn ChannelPlatform>,
    default_room: RwLock<String>,
    caches: RwLock<HashMap<GuildId, Arc<RoomCache>>>,
    gate: StartupGate,
    synced_guilds: tokio::sync::Mutex<HashSet<GuildId>>,
}

impl VisibilityEngine {
    pub fn new(store: Arc<WorldStore>, platform: Arc<dyn ChannelPlatform>, default_room: &str) -> Self {
        Self {
            store,
            platform,
            default_room: RwLock::new(default_room.to_string()),
            caches: RwLock::new(HashMap::new()),
            gate: StartupGate::new(),
            synced_guilds: tokio::sync::Mutex::new(HashSet::new()),
        }
    }

    pub fn store(&self) -> &Arc<WorldStore> {
        &self.store
    }

    pub fn platform(&self) -> &Arc<dyn ChannelPlatform> {
        &self.platform
    }

    pub fn default_room(&self) -> String {
        self.default_room
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_default_room(&self, room_id: &str) {
        let mut guard = self.default_room.write().unwrap_or_else(PoisonError::into_inner);
        if *guard != room_id {
            info!("Default room is now {}", room_id);
            *guard = room_id.to_string();
        }
    }

    // ---- room cache ----

    /// The last snapshot built for `guild` (empty before the first sync).
    pub fn cache(&self, guild: GuildId) -> Arc<RoomCache> {
        self.caches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&guild)
            .cloned()
            .unwrap_or_default()
    }

    /// Re-read the store and the guild's channels and swap in a fresh snapshot.
    pub async fn rebuild_cache(&self, guild: GuildId) -> Result<Arc<RoomCache>, MuddError> {
        let zones = self.store.list_zones()?;
        let rooms = self.store.list_rooms()?;
        let channels = self.platform.channels(guild).await?;
        let cache = Arc::new(RoomCache::build(&zones, &rooms, &channels));
        info!(
            "Built room cache for {} with {} rooms across {} zones",
            guild,
            cache.room_count(),
            cache.zone_count()
        );
        self.caches
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(guild, Arc::clone(&cache));
        Ok(cache)
    }

    pub fn channel_for_room(&self, guild: GuildId, room_id: &str) -> Option<ChannelId> {
        self.cache(guild).channel_for_room(room_id)
    }

    pub fn room_for_channel(&self, guild: GuildId, channel: ChannelId) -> Option<String> {
        self.cache(guild).room_for_channel(channel).map(str::to_string)
    }

    pub fn is_location_channel(&self, guild: GuildId, channel: ChannelId) -> bool {
        self.cache(guild).is_location_channel(channel)
    }

    pub fn default_channel(&self, guild: GuildId) -> Option<ChannelId> {
        self.channel_for_room(guild, &self.default_room())
    }

    // ---- locations ----

    /// The room id `user` is assigned to.
    pub fn get_user_room(&self, user: UserId) -> Result<Option<String>, MuddError> {
        self.store.get_location(user)
    }

    /// The channel of the room `member` is assigned to, if that room has one.
    pub fn get_user_location(&self, member: &Member) -> Result<Option<ChannelId>, MuddError> {
        let cache = self.cache(member.guild_id);
        Ok(self
            .store
            .get_location(member.id)?
            .and_then(|room| cache.channel_for_room(&room)))
    }

    /// Move `member` to the room whose channel is `target`.
    ///
    /// Returns `Ok(false)` without side effects when the member is already there.
    /// Text permission failures propagate; voice permission failures are logged.
    pub async fn move_user_to_channel(&self, member: &Member, target: ChannelId) -> Result<bool, MuddError> {
        let cache = self.cache(member.guild_id);
        let Some(target_room) = cache.room_for_channel(target) else {
            return Err(MuddError::NotFound(format!("no room for {}", target)));
        };

        let current_room = self.store.get_location(member.id)?;
        let current = current_room
            .as_deref()
            .and_then(|room| cache.channel_for_room(room));
        if current == Some(target) {
            return Ok(false);
        }

        self.store.set_location(member.id, target_room)?;

        if let Some(old) = current {
            self.set_text(old, member, None, REASON_LEAVING).await?;
            self.set_voice(&cache, old, member, None, REASON_LEAVING, true).await;
        }

        self.set_text(target, member, Some(PermissionOverwrite::text_grant()), REASON_ENTERING)
            .await?;
        self.set_voice(
            &cache,
            target,
            member,
            Some(PermissionOverwrite::voice_grant()),
            REASON_ENTERING,
            false,
        )
        .await;

        metrics::record_move(member.guild_id);
        info!(
            "Moved user {} from {} to {}",
            member.id,
            current_room.as_deref().unwrap_or("nowhere"),
            target_room
        );
        Ok(true)
    }

    /// Make `member`'s overwrites match `current`: grant there, clear everywhere else.
    pub async fn sync_user_to_discord(&self, member: &Member, current: Option<ChannelId>) -> Result<(), MuddError> {
        let cache = self.cache(member.guild_id);
        self.sync_member_permissions(&cache, member, current).await
    }

    async fn sync_member_permissions(
        &self,
        cache: &RoomCache,
        member: &Member,
        current: Option<ChannelId>,
    ) -> Result<(), MuddError> {
        for &channel in cache.managed_channels() {
            if Some(channel) == current {
                self.set_text(channel, member, Some(PermissionOverwrite::text_grant()), REASON_SYNC)
                    .await?;
                self.set_voice(
                    cache,
                    channel,
                    member,
                    Some(PermissionOverwrite::voice_grant()),
                    REASON_SYNC,
                    false,
                )
                .await;
            } else {
                self.set_text(channel, member, None, REASON_SYNC).await?;
                self.set_voice(cache, channel, member, None, REASON_SYNC, true).await;
            }
        }
        Ok(())
    }

    async fn set_text(
        &self,
        channel: ChannelId,
        member: &Member,
        overwrite: Option<PermissionOverwrite>,
        reason: &str,
    ) -> Result<(), MuddError> {
        match self
            .platform
            .set_member_overwrite(channel, member.id, overwrite, reason)
            .await
        {
            Ok(()) => {
                metrics::inc_permission_write();
                Ok(())
            }
            Err(e) => {
                metrics::inc_permission_failure();
                error!("Failed to set permissions for {} on {}: {}", member.id, channel, e);
                Err(e.into())
            }
        }
    }

    /// Best effort: voice is supplementary to the text channel.
    async fn set_voice(
        &self,
        cache: &RoomCache,
        text_channel: ChannelId,
        member: &Member,
        overwrite: Option<PermissionOverwrite>,
        reason: &str,
        disconnect_if_leaving: bool,
    ) {
        let Some(voice) = cache.voice_for(text_channel) else {
            return;
        };
        if disconnect_if_leaving && overwrite.is_none() && member.voice_channel == Some(voice) {
            if let Err(e) = self.platform.disconnect_voice(member.guild_id, member.id).await {
                warn!("Failed to disconnect {} from voice channel {}: {}", member.id, voice, e);
            }
        }
        match self
            .platform
            .set_member_overwrite(voice, member.id, overwrite, reason)
            .await
        {
            Ok(()) => metrics::inc_permission_write(),
            Err(e) => {
                metrics::inc_permission_failure();
                error!(
                    "Failed to set voice channel {} permissions for {}: {}",
                    voice, member.id, e
                );
            }
        }
    }

    /// Put `member` in the default room and push permissions.
    ///
    /// Returns the default channel, or `None` when the guild has none yet.
    pub async fn assign_default(&self, member: &Member) -> Result<Option<ChannelId>, MuddError> {
        let cache = self.cache(member.guild_id);
        let default_room = self.default_room();
        let Some(channel) = cache.channel_for_room(&default_room) else {
            warn!("Default room {} has no channel in {}", default_room, member.guild_id);
            return Ok(None);
        };
        self.store.set_location(member.id, &default_room)?;
        self.sync_member_permissions(&cache, member, Some(channel)).await?;
        Ok(Some(channel))
    }

    /// Forget a member who left the guild.
    pub fn forget_user(&self, user: UserId) -> Result<bool, MuddError> {
        self.store.delete_location(user)
    }

    // ---- guild sync ----

    /// Rebuild the cache and push every non-bot member's permissions.
    ///
    /// Members without a location, or whose room no longer has a channel, go
    /// to the default room. One member's failure is counted, not propagated.
    pub async fn sync_guild(&self, guild: GuildId) -> Result<SyncStats, MuddError> {
        let cache = self.rebuild_cache(guild).await?;
        let default_room = self.default_room();
        let Some(default_channel) = cache.channel_for_room(&default_room) else {
            error!("Default room '{}' not found in any zone category of {}", default_room, guild);
            return Ok(SyncStats::default());
        };

        let mut stats = SyncStats::default();
        for member in self.platform.members(guild).await? {
            if member.bot {
                continue;
            }
            match self
                .sync_member(&cache, &member, &default_room, default_channel)
                .await
            {
                Ok(true) => stats.assigned_default += 1,
                Ok(false) => stats.synced += 1,
                Err(e) => {
                    error!("Failed to sync user {}: {}", member.id, e);
                    stats.errors += 1;
                }
            }
        }

        metrics::record_sync_pass(guild, stats.assigned_default as u64, stats.errors as u64);
        info!("Guild sync complete for {}: {:?}", guild, stats);
        Ok(stats)
    }

    /// Returns whether the member was (re)assigned to the default room.
    async fn sync_member(
        &self,
        cache: &RoomCache,
        member: &Member,
        default_room: &str,
        default_channel: ChannelId,
    ) -> Result<bool, MuddError> {
        let room = self.store.get_location(member.id)?;
        if let Some(channel) = room.as_deref().and_then(|r| cache.channel_for_room(r)) {
            self.sync_member_permissions(cache, member, Some(channel)).await?;
            return Ok(false);
        }
        match room {
            None => info!("New member {}; placing in {}", member.id, default_room),
            Some(stale) => warn!(
                "Member {} was in {} which has no channel; placing in {}",
                member.id, stale, default_room
            ),
        }
        self.store.set_location(member.id, default_room)?;
        self.sync_member_permissions(cache, member, Some(default_channel))
            .await?;
        Ok(true)
    }

    /// [`sync_guild`](Self::sync_guild) at most once per guild for the life of the engine.
    ///
    /// Concurrent callers serialize on the synced set; the loser sees the
    /// guild already synced and gets `Ok(None)`.
    pub async fn startup_sync(&self, guild: GuildId) -> Result<Option<SyncStats>, MuddError> {
        let mut synced = self.synced_guilds.lock().await;
        if synced.contains(&guild) {
            debug!("Startup sync for {} already done", guild);
            return Ok(None);
        }
        let stats = self.sync_guild(guild).await?;
        synced.insert(guild);
        Ok(Some(stats))
    }

    // ---- startup gate ----

    pub fn gate(&self) -> &StartupGate {
        &self.gate
    }

    pub fn mark_startup_complete(&self) {
        self.gate.complete();
    }

    pub fn is_startup_complete(&self) -> bool {
        self.gate.is_complete()
    }

    pub async fn wait_for_startup(&self) {
        self.gate.wait().await;
    }
}
