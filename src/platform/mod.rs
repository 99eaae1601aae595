//! # Channel Platform Adapter
//!
//! The chat platform (guilds, categories, text and voice channels, members and
//! per-member permission overwrites) is an external collaborator. This module
//! defines the vocabulary the rest of the crate speaks and the
//! [`ChannelPlatform`] trait any concrete client implements.
//!
//! Channels are modelled as a sum type ([`Channel`]) so kind-specific fields
//! such as a text channel's topic are only reachable after narrowing with
//! [`Channel::as_text`] and friends.
//!
//! [`memory::MemoryPlatform`] is an in-process implementation used by the
//! tests and by the offline `mudd start` mode.

pub mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryPlatform;

macro_rules! snowflake_id {
    ($name:ident, $label:literal) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}:{}", $label, self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }
    };
}

snowflake_id!(GuildId, "guild");
snowflake_id!(ChannelId, "channel");
snowflake_id!(UserId, "user");

/// Errors surfaced by a platform client.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The platform answered with a failure status.
    #[error("platform request failed ({status}): {message}")]
    Http { status: u16, message: String },

    #[error("unknown {0}")]
    UnknownGuild(GuildId),

    #[error("unknown {0}")]
    UnknownChannel(ChannelId),

    #[error("unknown {0}")]
    UnknownMember(UserId),

    /// The client is not connected or is shutting down.
    #[error("platform unavailable: {0}")]
    Unavailable(String),
}

/// Minimal guild descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildInfo {
    pub id: GuildId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryChannel {
    pub id: ChannelId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChannel {
    pub id: ChannelId,
    pub name: String,
    pub category_id: Option<ChannelId>,
    #[serde(default)]
    pub topic: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceChannel {
    pub id: ChannelId,
    pub name: String,
    pub category_id: Option<ChannelId>,
}

/// Every channel kind the core cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Channel {
    Category(CategoryChannel),
    Text(TextChannel),
    Voice(VoiceChannel),
}

impl Channel {
    pub fn id(&self) -> ChannelId {
        match self {
            Channel::Category(c) => c.id,
            Channel::Text(c) => c.id,
            Channel::Voice(c) => c.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Channel::Category(c) => &c.name,
            Channel::Text(c) => &c.name,
            Channel::Voice(c) => &c.name,
        }
    }

    /// Parent category; categories themselves have none.
    pub fn category_id(&self) -> Option<ChannelId> {
        match self {
            Channel::Category(_) => None,
            Channel::Text(c) => c.category_id,
            Channel::Voice(c) => c.category_id,
        }
    }

    pub fn as_category(&self) -> Option<&CategoryChannel> {
        match self {
            Channel::Category(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&TextChannel> {
        match self {
            Channel::Text(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_voice(&self) -> Option<&VoiceChannel> {
        match self {
            Channel::Voice(c) => Some(c),
            _ => None,
        }
    }
}

/// A guild member as seen at the time the platform was queried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: UserId,
    pub guild_id: GuildId,
    pub display_name: String,
    #[serde(default)]
    pub bot: bool,
    /// Voice channel the member is connected to, if any.
    #[serde(default)]
    pub voice_channel: Option<ChannelId>,
}

impl Member {
    /// Platform mention markup.
    pub fn mention(&self) -> String {
        format!("<@{}>", self.id.0)
    }
}

/// Tri-state permission overwrite: `None` leaves the permission to the parent/role,
/// `Some(true)` grants, `Some(false)` denies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionOverwrite {
    #[serde(default)]
    pub view_channel: Option<bool>,
    #[serde(default)]
    pub connect: Option<bool>,
    #[serde(default)]
    pub speak: Option<bool>,
}

impl PermissionOverwrite {
    /// Visibility on a room's text channel.
    pub fn text_grant() -> Self {
        Self {
            view_channel: Some(true),
            ..Self::default()
        }
    }

    /// Visibility plus voice rights on a room's paired voice channel.
    pub fn voice_grant() -> Self {
        Self {
            view_channel: Some(true),
            connect: Some(true),
            speak: Some(true),
        }
    }

    /// Fog of war for the everyone role on a zone category.
    pub fn deny_view() -> Self {
        Self {
            view_channel: Some(false),
            ..Self::default()
        }
    }

    pub fn grants_view(&self) -> bool {
        self.view_channel == Some(true)
    }
}

/// Operations the visibility engine and reconciler need from the chat platform.
///
/// Every call may suspend; none is retried by the caller.
#[async_trait]
pub trait ChannelPlatform: Send + Sync {
    /// Resolves once the client is connected and guild state is available.
    async fn wait_until_ready(&self);

    async fn guilds(&self) -> Result<Vec<GuildInfo>, PlatformError>;

    /// Categories, text and voice channels of a guild.
    async fn channels(&self, guild: GuildId) -> Result<Vec<Channel>, PlatformError>;

    async fn members(&self, guild: GuildId) -> Result<Vec<Member>, PlatformError>;

    /// Create a category whose everyone-role overwrite is `everyone`.
    async fn create_category(
        &self,
        guild: GuildId,
        name: &str,
        everyone: PermissionOverwrite,
    ) -> Result<CategoryChannel, PlatformError>;

    async fn create_text_channel(
        &self,
        guild: GuildId,
        category: ChannelId,
        name: &str,
        topic: &str,
    ) -> Result<TextChannel, PlatformError>;

    async fn create_voice_channel(
        &self,
        guild: GuildId,
        category: ChannelId,
        name: &str,
    ) -> Result<VoiceChannel, PlatformError>;

    async fn edit_topic(&self, channel: ChannelId, topic: &str) -> Result<(), PlatformError>;

    /// Set (`Some`) or remove (`None`) the member-specific overwrite on a channel.
    async fn set_member_overwrite(
        &self,
        channel: ChannelId,
        user: UserId,
        overwrite: Option<PermissionOverwrite>,
        reason: &str,
    ) -> Result<(), PlatformError>;

    /// Disconnect a member from whatever voice channel they are in.
    async fn disconnect_voice(&self, guild: GuildId, user: UserId) -> Result<(), PlatformError>;

    async fn send_message(&self, channel: ChannelId, content: &str) -> Result<(), PlatformError>;
}

/// Zone/category names compare lowercase with spaces turned into hyphens.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "-")
}

/// The voice channel paired with `text`: same name, same category.
pub fn paired_voice<'a>(channels: &'a [Channel], text: &TextChannel) -> Option<&'a VoiceChannel> {
    channels
        .iter()
        .filter_map(Channel::as_voice)
        .find(|v| v.name == text.name && v.category_id == text.category_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_matches_zone_ids() {
        assert_eq!(normalize_name("Floor 1"), "floor-1");
        assert_eq!(normalize_name("  Upper Deck "), "upper-deck");
        assert_eq!(normalize_name("floor-1"), "floor-1");
    }

    #[test]
    fn paired_voice_requires_same_category() {
        let text = TextChannel {
            id: ChannelId(10),
            name: "office".into(),
            category_id: Some(ChannelId(1)),
            topic: None,
        };
        let channels = vec![
            Channel::Voice(VoiceChannel {
                id: ChannelId(11),
                name: "office".into(),
                category_id: Some(ChannelId(2)),
            }),
            Channel::Voice(VoiceChannel {
                id: ChannelId(12),
                name: "office".into(),
                category_id: Some(ChannelId(1)),
            }),
        ];
        assert_eq!(paired_voice(&channels, &text).map(|v| v.id), Some(ChannelId(12)));
    }

    #[test]
    fn channel_serializes_with_kind_tag() {
        let ch = Channel::Text(TextChannel {
            id: ChannelId(5),
            name: "foyer".into(),
            category_id: None,
            topic: Some("Hello".into()),
        });
        let json = serde_json::to_string(&ch).unwrap();
        assert!(json.contains("\"kind\":\"text\""));
        let back: Channel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ch);
    }
}
