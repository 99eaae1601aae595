//! Process-local counters for moves, permission writes and sync passes.
//!
//! Nothing is exported over the network; `mudd status` and the periodic sync
//! log read a [`snapshot`].
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

use crate::platform::GuildId;

static MOVES: AtomicU64 = AtomicU64::new(0);
static PERMISSION_WRITES: AtomicU64 = AtomicU64::new(0);
static PERMISSION_FAILURES: AtomicU64 = AtomicU64::new(0);
static SYNC_PASSES: AtomicU64 = AtomicU64::new(0);

static GUILD_COUNTERS: OnceLock<Mutex<HashMap<GuildId, GuildCounter>>> = OnceLock::new();

pub fn inc_permission_write() {
    PERMISSION_WRITES.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_permission_failure() {
    PERMISSION_FAILURES.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GuildCounter {
    pub moves: u64,
    pub sync_passes: u64,
    pub members_assigned_default: u64,
    pub member_sync_errors: u64,
    pub orphans_reported: u64,
}

fn guild_counter_lock() -> &'static Mutex<HashMap<GuildId, GuildCounter>> {
    GUILD_COUNTERS.get_or_init(|| Mutex::new(HashMap::new()))
}

fn with_guild<F: FnOnce(&mut GuildCounter)>(guild: GuildId, f: F) -> GuildCounter {
    let mut guard = guild_counter_lock()
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    let counter = guard.entry(guild).or_default();
    f(counter);
    *counter
}

pub fn record_move(guild: GuildId) -> GuildCounter {
    MOVES.fetch_add(1, Ordering::Relaxed);
    with_guild(guild, |c| c.moves = c.moves.saturating_add(1))
}

pub fn record_sync_pass(guild: GuildId, assigned_default: u64, errors: u64) -> GuildCounter {
    SYNC_PASSES.fetch_add(1, Ordering::Relaxed);
    with_guild(guild, |c| {
        c.sync_passes = c.sync_passes.saturating_add(1);
        c.members_assigned_default = c.members_assigned_default.saturating_add(assigned_default);
        c.member_sync_errors = c.member_sync_errors.saturating_add(errors);
    })
}

pub fn record_orphans_reported(guild: GuildId, count: u64) -> GuildCounter {
    with_guild(guild, |c| {
        c.orphans_reported = c.orphans_reported.saturating_add(count)
    })
}

pub fn guild_counters_snapshot() -> HashMap<GuildId, GuildCounter> {
    guild_counter_lock()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    pub moves: u64,
    pub permission_writes: u64,
    pub permission_failures: u64,
    pub sync_passes: u64,
    pub guilds: HashMap<GuildId, GuildCounter>,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        moves: MOVES.load(Ordering::Relaxed),
        permission_writes: PERMISSION_WRITES.load(Ordering::Relaxed),
        permission_failures: PERMISSION_FAILURES.load(Ordering::Relaxed),
        sync_passes: SYNC_PASSES.load(Ordering::Relaxed),
        guilds: guild_counters_snapshot(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Counters are process-global and other tests bump them, so only assert
    // on a guild id nothing else uses and on monotonic growth.
    #[test]
    fn guild_counters_accumulate() {
        let guild = GuildId(u64::MAX - 7);
        let before = snapshot();

        record_move(guild);
        record_move(guild);
        record_sync_pass(guild, 3, 1);
        let after = record_orphans_reported(guild, 2);

        assert_eq!(after.moves, 2);
        assert_eq!(after.sync_passes, 1);
        assert_eq!(after.members_assigned_default, 3);
        assert_eq!(after.member_sync_errors, 1);
        assert_eq!(after.orphans_reported, 2);

        let snap = snapshot();
        assert!(snap.moves >= before.moves + 2);
        assert!(snap.sync_passes > before.sync_passes);
        assert_eq!(snap.guilds.get(&guild), Some(&after));
    }
}
