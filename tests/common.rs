//! Test utilities & fixtures.
//! Builds a service over a temp world dir, a temp sled store and an in-memory guild.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mudd::platform::{ChannelId, ChannelPlatform, GuildId, MemoryPlatform};
use mudd::service::{MuddService, ServiceOptions};
use mudd::storage::WorldStore;
use tempfile::TempDir;

/// The world shipped in `data/worlds`.
#[allow(dead_code)]
pub const SAMPLE_WORLD: &str = include_str!("../data/worlds/mansion.rec");

pub struct Harness {
    pub dir: TempDir,
    pub platform: Arc<MemoryPlatform>,
    pub guild: GuildId,
    pub console: ChannelId,
    pub service: MuddService,
}

pub fn world_dir(root: &Path) -> PathBuf {
    root.join("worlds")
}

/// Replace the world with a single file holding `contents`.
pub fn write_world(root: &Path, contents: &str) {
    let dir = world_dir(root);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("world.rec"), contents).unwrap();
}

pub fn build_service(root: &Path, platform: Arc<MemoryPlatform>) -> MuddService {
    let store = Arc::new(WorldStore::open(root.join("db")).expect("store"));
    let options = ServiceOptions {
        world_dir: world_dir(root),
        ..ServiceOptions::default()
    };
    let platform: Arc<dyn ChannelPlatform> = platform;
    MuddService::new(options, store, platform).expect("service")
}

/// One guild named "Mansion" with an uncategorized `#console` channel.
pub fn harness(world: &str) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    write_world(dir.path(), world);
    let platform = Arc::new(MemoryPlatform::new());
    let guild = platform.add_guild("Mansion");
    let console = platform.add_text_channel(guild, None, "console", None);
    let service = build_service(dir.path(), platform.clone());
    Harness {
        dir,
        platform,
        guild,
        console,
        service,
    }
}

#[allow(dead_code)]
pub fn text_channel(platform: &MemoryPlatform, guild: GuildId, name: &str) -> ChannelId {
    platform
        .find_channel(guild, name)
        .and_then(|c| c.as_text().map(|t| t.id))
        .unwrap_or_else(|| panic!("no text channel #{name}"))
}

#[allow(dead_code)]
pub fn voice_channel(platform: &MemoryPlatform, guild: GuildId, name: &str) -> ChannelId {
    let snapshot = platform.snapshot();
    snapshot
        .guilds
        .iter()
        .filter(|g| g.info.id == guild)
        .flat_map(|g| g.channels.iter())
        .find_map(|c| c.as_voice().filter(|v| v.name == name).map(|v| v.id))
        .unwrap_or_else(|| panic!("no voice channel {name}"))
}
