//! In-process [`ChannelPlatform`] used by the tests and by offline runs.
//!
//! State is a plain [`PlatformSnapshot`] behind a mutex so it can be loaded from
//! and saved to JSON between runs of `mudd start`.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::{
    CategoryChannel, Channel, ChannelId, ChannelPlatform, GuildId, GuildInfo, Member,
    PermissionOverwrite, PlatformError, TextChannel, UserId, VoiceChannel,
};
use crate::errors::MuddError;

const FIRST_ID: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberOverwrite {
    pub channel: ChannelId,
    pub user: UserId,
    pub overwrite: PermissionOverwrite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleOverwrite {
    pub channel: ChannelId,
    pub overwrite: PermissionOverwrite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub channel: ChannelId,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildState {
    pub info: GuildInfo,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub member_overwrites: Vec<MemberOverwrite>,
    /// Everyone-role overwrites, one per channel at most.
    #[serde(default)]
    pub everyone_overwrites: Vec<RoleOverwrite>,
    #[serde(default)]
    pub messages: Vec<SentMessage>,
}

impl GuildState {
    fn has_channel(&self, channel: ChannelId) -> bool {
        self.channels.iter().any(|c| c.id() == channel)
    }
}

/// Serializable platform state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformSnapshot {
    pub next_id: u64,
    #[serde(default)]
    pub guilds: Vec<GuildState>,
}

impl Default for PlatformSnapshot {
    fn default() -> Self {
        Self {
            next_id: FIRST_ID,
            guilds: Vec::new(),
        }
    }
}

impl PlatformSnapshot {
    fn allocate(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn guild_mut(&mut self, guild: GuildId) -> Result<&mut GuildState, PlatformError> {
        self.guilds
            .iter_mut()
            .find(|g| g.info.id == guild)
            .ok_or(PlatformError::UnknownGuild(guild))
    }

    fn guild(&self, guild: GuildId) -> Result<&GuildState, PlatformError> {
        self.guilds
            .iter()
            .find(|g| g.info.id == guild)
            .ok_or(PlatformError::UnknownGuild(guild))
    }

    fn guild_of_channel_mut(&mut self, channel: ChannelId) -> Result<&mut GuildState, PlatformError> {
        self.guilds
            .iter_mut()
            .find(|g| g.has_channel(channel))
            .ok_or(PlatformError::UnknownChannel(channel))
    }
}

/// Mutex-guarded in-memory guilds with optional failure injection.
pub struct MemoryPlatform {
    state: Mutex<PlatformSnapshot>,
    failing_users: Mutex<HashSet<UserId>>,
    failing_sends: Mutex<usize>,
    ready: watch::Sender<bool>,
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPlatform {
    /// Empty platform that reports ready immediately.
    pub fn new() -> Self {
        Self::from_snapshot(PlatformSnapshot::default())
    }

    pub fn from_snapshot(snapshot: PlatformSnapshot) -> Self {
        let (ready, _) = watch::channel(true);
        Self {
            state: Mutex::new(snapshot),
            failing_users: Mutex::new(HashSet::new()),
            failing_sends: Mutex::new(0),
            ready,
        }
    }

    /// Load a JSON snapshot written by [`MemoryPlatform::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, MuddError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let snapshot: PlatformSnapshot = serde_json::from_str(&contents).map_err(|e| {
            MuddError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Failed to parse {}: {}", path.display(), e),
            ))
        })?;
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), MuddError> {
        let json = serde_json::to_string_pretty(&*self.lock()).map_err(|e| {
            MuddError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn snapshot(&self) -> PlatformSnapshot {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, PlatformSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Flip readiness; `wait_until_ready` callers resume once it is true.
    pub fn set_ready(&self, ready: bool) {
        self.ready.send_replace(ready);
    }

    pub fn add_guild(&self, name: &str) -> GuildId {
        let mut state = self.lock();
        let id = GuildId(state.allocate());
        state.guilds.push(GuildState {
            info: GuildInfo {
                id,
                name: name.to_string(),
            },
            channels: Vec::new(),
            members: Vec::new(),
            member_overwrites: Vec::new(),
            everyone_overwrites: Vec::new(),
            messages: Vec::new(),
        });
        id
    }

    pub fn add_member(&self, guild: GuildId, display_name: &str, bot: bool) -> Member {
        let mut state = self.lock();
        let id = UserId(state.allocate());
        let member = Member {
            id,
            guild_id: guild,
            display_name: display_name.to_string(),
            bot,
            voice_channel: None,
        };
        if let Ok(g) = state.guild_mut(guild) {
            g.members.push(member.clone());
        }
        member
    }

    pub fn remove_member(&self, guild: GuildId, user: UserId) {
        let mut state = self.lock();
        if let Ok(g) = state.guild_mut(guild) {
            g.members.retain(|m| m.id != user);
        }
    }

    /// Current view of a member, including voice state.
    pub fn member(&self, guild: GuildId, user: UserId) -> Option<Member> {
        let state = self.lock();
        state
            .guild(guild)
            .ok()
            .and_then(|g| g.members.iter().find(|m| m.id == user).cloned())
    }

    /// Insert a category with no overwrites (a channel created out-of-band).
    pub fn add_category(&self, guild: GuildId, name: &str) -> ChannelId {
        let mut state = self.lock();
        let id = ChannelId(state.allocate());
        if let Ok(g) = state.guild_mut(guild) {
            g.channels.push(Channel::Category(CategoryChannel {
                id,
                name: name.to_string(),
            }));
        }
        id
    }

    pub fn add_text_channel(
        &self,
        guild: GuildId,
        category: Option<ChannelId>,
        name: &str,
        topic: Option<&str>,
    ) -> ChannelId {
        let mut state = self.lock();
        let id = ChannelId(state.allocate());
        if let Ok(g) = state.guild_mut(guild) {
            g.channels.push(Channel::Text(TextChannel {
                id,
                name: name.to_string(),
                category_id: category,
                topic: topic.map(str::to_string),
            }));
        }
        id
    }

    pub fn add_voice_channel(&self, guild: GuildId, category: Option<ChannelId>, name: &str) -> ChannelId {
        let mut state = self.lock();
        let id = ChannelId(state.allocate());
        if let Ok(g) = state.guild_mut(guild) {
            g.channels.push(Channel::Voice(VoiceChannel {
                id,
                name: name.to_string(),
                category_id: category,
            }));
        }
        id
    }

    /// Delete a channel and every overwrite attached to it.
    pub fn remove_channel(&self, channel: ChannelId) {
        let mut state = self.lock();
        if let Ok(g) = state.guild_of_channel_mut(channel) {
            g.channels.retain(|c| c.id() != channel);
            g.member_overwrites.retain(|o| o.channel != channel);
            g.everyone_overwrites.retain(|o| o.channel != channel);
        }
    }

    pub fn rename_channel(&self, channel: ChannelId, name: &str) {
        let mut state = self.lock();
        if let Ok(g) = state.guild_of_channel_mut(channel) {
            for c in g.channels.iter_mut().filter(|c| c.id() == channel) {
                match c {
                    Channel::Category(x) => x.name = name.to_string(),
                    Channel::Text(x) => x.name = name.to_string(),
                    Channel::Voice(x) => x.name = name.to_string(),
                }
            }
        }
    }

    pub fn set_voice_state(&self, guild: GuildId, user: UserId, channel: Option<ChannelId>) {
        let mut state = self.lock();
        if let Ok(g) = state.guild_mut(guild) {
            if let Some(m) = g.members.iter_mut().find(|m| m.id == user) {
                m.voice_channel = channel;
            }
        }
    }

    /// Find a channel by exact name (first match).
    pub fn find_channel(&self, guild: GuildId, name: &str) -> Option<Channel> {
        let state = self.lock();
        state
            .guild(guild)
            .ok()
            .and_then(|g| g.channels.iter().find(|c| c.name() == name).cloned())
    }

    pub fn member_overwrite(&self, channel: ChannelId, user: UserId) -> Option<PermissionOverwrite> {
        let state = self.lock();
        state
            .guilds
            .iter()
            .flat_map(|g| g.member_overwrites.iter())
            .find(|o| o.channel == channel && o.user == user)
            .map(|o| o.overwrite)
    }

    pub fn everyone_overwrite(&self, channel: ChannelId) -> Option<PermissionOverwrite> {
        let state = self.lock();
        state
            .guilds
            .iter()
            .flat_map(|g| g.everyone_overwrites.iter())
            .find(|o| o.channel == channel)
            .map(|o| o.overwrite)
    }

    /// Text channels on which `user` holds an explicit view grant.
    pub fn granted_text_channels(&self, guild: GuildId, user: UserId) -> Vec<ChannelId> {
        let state = self.lock();
        let Ok(g) = state.guild(guild) else {
            return Vec::new();
        };
        g.member_overwrites
            .iter()
            .filter(|o| o.user == user && o.overwrite.grants_view())
            .filter(|o| {
                g.channels
                    .iter()
                    .any(|c| c.id() == o.channel && c.as_text().is_some())
            })
            .map(|o| o.channel)
            .collect()
    }

    pub fn messages(&self, channel: ChannelId) -> Vec<String> {
        let state = self.lock();
        state
            .guilds
            .iter()
            .flat_map(|g| g.messages.iter())
            .filter(|m| m.channel == channel)
            .map(|m| m.content.clone())
            .collect()
    }

    /// Make every overwrite write for `user` fail with a 403 until healed.
    pub fn fail_overwrites_for(&self, user: UserId) {
        self.failing_users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user);
    }

    pub fn heal_overwrites_for(&self, user: UserId) {
        self.failing_users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&user);
    }

    /// Make the next `count` message sends fail as unavailable.
    pub fn fail_next_sends(&self, count: usize) {
        *self
            .failing_sends
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = count;
    }

    fn take_send_failure(&self) -> bool {
        let mut remaining = self
            .failing_sends
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *remaining == 0 {
            return false;
        }
        *remaining -= 1;
        true
    }

    fn is_failing(&self, user: UserId) -> bool {
        self.failing_users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&user)
    }
}

#[async_trait]
impl ChannelPlatform for MemoryPlatform {
    async fn wait_until_ready(&self) {
        let mut rx = self.ready.subscribe();
        // The sender lives as long as `self`, so this only ends once ready.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    async fn guilds(&self) -> Result<Vec<GuildInfo>, PlatformError> {
        Ok(self.lock().guilds.iter().map(|g| g.info.clone()).collect())
    }

    async fn channels(&self, guild: GuildId) -> Result<Vec<Channel>, PlatformError> {
        Ok(self.lock().guild(guild)?.channels.clone())
    }

    async fn members(&self, guild: GuildId) -> Result<Vec<Member>, PlatformError> {
        Ok(self.lock().guild(guild)?.members.clone())
    }

    async fn create_category(
        &self,
        guild: GuildId,
        name: &str,
        everyone: PermissionOverwrite,
    ) -> Result<CategoryChannel, PlatformError> {
        let mut state = self.lock();
        let id = ChannelId(state.allocate());
        let category = CategoryChannel {
            id,
            name: name.to_string(),
        };
        let g = state.guild_mut(guild)?;
        g.channels.push(Channel::Category(category.clone()));
        g.everyone_overwrites.push(RoleOverwrite {
            channel: id,
            overwrite: everyone,
        });
        debug!("memory platform: created category {} ({})", name, id);
        Ok(category)
    }

    async fn create_text_channel(
        &self,
        guild: GuildId,
        category: ChannelId,
        name: &str,
        topic: &str,
    ) -> Result<TextChannel, PlatformError> {
        let mut state = self.lock();
        let id = ChannelId(state.allocate());
        let g = state.guild_mut(guild)?;
        if !g.has_channel(category) {
            return Err(PlatformError::UnknownChannel(category));
        }
        let channel = TextChannel {
            id,
            name: name.to_string(),
            category_id: Some(category),
            topic: Some(topic.to_string()),
        };
        g.channels.push(Channel::Text(channel.clone()));
        Ok(channel)
    }

    async fn create_voice_channel(
        &self,
        guild: GuildId,
        category: ChannelId,
        name: &str,
    ) -> Result<VoiceChannel, PlatformError> {
        let mut state = self.lock();
        let id = ChannelId(state.allocate());
        let g = state.guild_mut(guild)?;
        if !g.has_channel(category) {
            return Err(PlatformError::UnknownChannel(category));
        }
        let channel = VoiceChannel {
            id,
            name: name.to_string(),
            category_id: Some(category),
        };
        g.channels.push(Channel::Voice(channel.clone()));
        Ok(channel)
    }

    async fn edit_topic(&self, channel: ChannelId, topic: &str) -> Result<(), PlatformError> {
        let mut state = self.lock();
        let g = state.guild_of_channel_mut(channel)?;
        for c in g.channels.iter_mut() {
            if let Channel::Text(text) = c {
                if text.id == channel {
                    text.topic = Some(topic.to_string());
                    return Ok(());
                }
            }
        }
        Err(PlatformError::Http {
            status: 400,
            message: format!("{} has no topic", channel),
        })
    }

    async fn set_member_overwrite(
        &self,
        channel: ChannelId,
        user: UserId,
        overwrite: Option<PermissionOverwrite>,
        _reason: &str,
    ) -> Result<(), PlatformError> {
        if self.is_failing(user) {
            return Err(PlatformError::Http {
                status: 403,
                message: format!("missing permissions to edit {} for {}", channel, user),
            });
        }
        let mut state = self.lock();
        let g = state.guild_of_channel_mut(channel)?;
        g.member_overwrites
            .retain(|o| !(o.channel == channel && o.user == user));
        if let Some(overwrite) = overwrite {
            g.member_overwrites.push(MemberOverwrite {
                channel,
                user,
                overwrite,
            });
        }
        Ok(())
    }

    async fn disconnect_voice(&self, guild: GuildId, user: UserId) -> Result<(), PlatformError> {
        let mut state = self.lock();
        let g = state.guild_mut(guild)?;
        let member = g
            .members
            .iter_mut()
            .find(|m| m.id == user)
            .ok_or(PlatformError::UnknownMember(user))?;
        member.voice_channel = None;
        Ok(())
    }

    async fn send_message(&self, channel: ChannelId, content: &str) -> Result<(), PlatformError> {
        if self.take_send_failure() {
            return Err(PlatformError::Unavailable(format!("send to {} dropped", channel)));
        }
        let mut state = self.lock();
        let g = state.guild_of_channel_mut(channel)?;
        g.messages.push(SentMessage {
            channel,
            content: content.to_string(),
        });
        Ok(())
    }
}
