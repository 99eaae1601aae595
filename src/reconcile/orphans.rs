//! Remember which orphan channels have been announced.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Mutex, PoisonError};

use crate::platform::GuildId;

/// A channel inside a zone category that no defined room accounts for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Orphan {
    pub channel: String,
    pub category: String,
}

impl fmt::Display for Orphan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} in {}", self.channel, self.category)
    }
}

/// Per-guild memory of the orphans already announced.
///
/// Only orphans absent from the remembered set are "new". An orphan that goes
/// away and later comes back counts as new again.
#[derive(Debug, Default)]
pub struct OrphanTracker {
    seen: Mutex<HashMap<GuildId, HashSet<Orphan>>>,
}

impl OrphanTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The orphans in `current` not yet remembered for this guild.
    pub fn unseen(&self, guild: GuildId, current: &[Orphan]) -> Vec<Orphan> {
        let seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = seen.get(&guild);
        current
            .iter()
            .filter(|o| !previous.is_some_and(|p| p.contains(*o)))
            .cloned()
            .collect()
    }

    /// Replace this guild's remembered set with `current`.
    pub fn remember(&self, guild: GuildId, current: &[Orphan]) {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        seen.insert(guild, current.iter().cloned().collect());
    }

    pub fn seen(&self, guild: GuildId) -> Vec<Orphan> {
        let seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<Orphan> = seen
            .get(&guild)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        out.sort();
        out
    }
}

/// The consolidated console notice for `orphans`.
pub fn orphan_report(orphans: &[Orphan]) -> String {
    let list = orphans
        .iter()
        .map(|o| format!("- {}", o))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "**Orphan channels detected** (not in .rec files):\n{}\n\n\
         Consider deleting these channels or adding them to the world file.",
        list
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orphan(name: &str) -> Orphan {
        Orphan {
            channel: name.into(),
            category: "Floor 1".into(),
        }
    }

    #[test]
    fn only_new_orphans_are_returned() {
        let tracker = OrphanTracker::new();
        let guild = GuildId(1);
        assert_eq!(tracker.unseen(guild, &[orphan("a")]), vec![orphan("a")]);
        tracker.remember(guild, &[orphan("a")]);
        assert!(tracker.unseen(guild, &[orphan("a")]).is_empty());
        assert_eq!(
            tracker.unseen(guild, &[orphan("a"), orphan("b")]),
            vec![orphan("b")]
        );
        tracker.remember(guild, &[orphan("a"), orphan("b")]);
        assert_eq!(tracker.seen(guild), vec![orphan("a"), orphan("b")]);
    }

    #[test]
    fn unremembered_orphans_stay_new() {
        let tracker = OrphanTracker::new();
        let guild = GuildId(1);
        assert_eq!(tracker.unseen(guild, &[orphan("a")]), vec![orphan("a")]);
        assert_eq!(tracker.unseen(guild, &[orphan("a")]), vec![orphan("a")]);
    }

    #[test]
    fn orphans_that_return_are_new_again() {
        let tracker = OrphanTracker::new();
        let guild = GuildId(1);
        tracker.remember(guild, &[orphan("a")]);
        tracker.remember(guild, &[]);
        assert_eq!(tracker.unseen(guild, &[orphan("a")]), vec![orphan("a")]);
    }

    #[test]
    fn guilds_are_tracked_separately() {
        let tracker = OrphanTracker::new();
        tracker.remember(GuildId(1), &[orphan("a")]);
        assert_eq!(tracker.unseen(GuildId(2), &[orphan("a")]), vec![orphan("a")]);
    }

    #[test]
    fn report_lists_every_orphan() {
        let text = orphan_report(&[orphan("a"), orphan("b")]);
        assert!(text.starts_with("**Orphan channels detected**"));
        assert!(text.contains("- #a in Floor 1\n- #b in Floor 1"));
    }
}
