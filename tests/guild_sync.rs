mod common;

use common::{harness, text_channel, write_world, SAMPLE_WORLD};
use mudd::platform::{ChannelPlatform, PermissionOverwrite};

const SMALL_WORLD: &str = "\
%rec: Zone

Id: floor-1
Name: Floor 1

%rec: Room

Id: foyer
Name: Foyer
Description: Entrance. Exits: #library
Zone: floor-1
IsDefault: yes

Id: library
Name: Library
Description: Books. Exits: #foyer
Zone: floor-1
HasVoice: yes
";

const SMALLER_WORLD: &str = "\
%rec: Zone

Id: floor-1
Name: Floor 1

%rec: Room

Id: foyer
Name: Foyer
Description: Entrance.
Zone: floor-1
IsDefault: yes
";

#[tokio::test]
async fn initial_sync_builds_the_sample_world() {
    let h = harness(SAMPLE_WORLD);
    let alice = h.platform.add_member(h.guild, "alice", false);
    let bob = h.platform.add_member(h.guild, "bob", false);
    let bot = h.platform.add_member(h.guild, "helper", true);

    let report = h.service.full_sync().await.expect("initial sync");
    assert!(report.initial);
    let stats = report.guilds[0].reconcile;
    assert_eq!(stats.zones, 2);
    assert_eq!(stats.rooms, 7);
    assert_eq!(stats.categories_created, 2);
    assert_eq!(stats.channels_created, 7);
    assert_eq!(stats.voice_channels_created, 2);
    assert_eq!(stats.orphans_found, 0);

    let visibility = report.guilds[0].visibility.expect("startup sync ran");
    assert_eq!(visibility.assigned_default, 2);
    assert_eq!(visibility.synced, 0);

    let foyer = text_channel(&h.platform, h.guild, "foyer");
    for member in [&alice, &bob] {
        assert_eq!(h.platform.granted_text_channels(h.guild, member.id), vec![foyer]);
    }
    assert!(h.platform.granted_text_channels(h.guild, bot.id).is_empty());
    assert!(h.service.store().get_location(bot.id).unwrap().is_none());

    let category = h
        .platform
        .find_channel(h.guild, "Floor 1")
        .expect("category");
    assert_eq!(
        h.platform.everyone_overwrite(category.id()),
        Some(PermissionOverwrite::deny_view())
    );
}

#[tokio::test]
async fn repeated_syncs_converge() {
    let h = harness(SAMPLE_WORLD);
    let alice = h.platform.add_member(h.guild, "alice", false);
    h.platform.add_member(h.guild, "bob", false);
    h.service.full_sync().await.expect("initial sync");
    let snapshot = h.platform.snapshot();

    for _ in 0..2 {
        let report = h.service.full_sync().await.expect("periodic sync");
        assert!(!report.initial);
        let entry = &report.guilds[0];
        assert_eq!(entry.error, None);
        assert_eq!(entry.reconcile.categories_created, 0);
        assert_eq!(entry.reconcile.channels_created, 0);
        assert_eq!(entry.reconcile.topics_updated, 0);
        let stats = entry.visibility.expect("sync ran");
        assert_eq!(stats.synced, 2);
        assert_eq!(stats.assigned_default, 0);
    }

    let after = h.platform.snapshot();
    assert_eq!(
        snapshot.guilds[0].member_overwrites,
        after.guilds[0].member_overwrites
    );
    assert_eq!(snapshot.guilds[0].channels.len(), after.guilds[0].channels.len());
    assert_eq!(
        h.service.store().get_location(alice.id).unwrap().as_deref(),
        Some("foyer")
    );
}

#[tokio::test]
async fn drifted_topic_is_restored() {
    let h = harness(SAMPLE_WORLD);
    h.service.full_sync().await.expect("initial sync");
    let foyer = text_channel(&h.platform, h.guild, "foyer");

    h.platform.edit_topic(foyer, "vandalised").await.unwrap();

    let report = h.service.full_sync().await.expect("periodic sync");
    assert_eq!(report.guilds[0].reconcile.topics_updated, 1);
    let look = h.service.handle_look(h.guild, foyer).await.unwrap();
    assert!(look.starts_with("A marble entrance hall"));
}

#[tokio::test]
async fn removed_room_relocates_members_and_is_reported_once() {
    let h = harness(SMALL_WORLD);
    let alice = h.platform.add_member(h.guild, "alice", false);
    h.service.full_sync().await.expect("initial sync");
    let foyer = text_channel(&h.platform, h.guild, "foyer");
    let library = text_channel(&h.platform, h.guild, "library");
    h.service.handle_move(&alice, foyer, "#library").await.unwrap();
    assert_eq!(h.platform.granted_text_channels(h.guild, alice.id), vec![library]);

    write_world(h.dir.path(), SMALLER_WORLD);
    let report = h.service.full_sync().await.expect("periodic sync");
    let entry = &report.guilds[0];
    assert_eq!(entry.reconcile.users_relocated, 1);
    assert_eq!(entry.reconcile.orphans_found, 1);
    assert_eq!(entry.reconcile.orphans_reported, 1);
    assert_eq!(entry.visibility.map(|s| s.synced), Some(1));

    assert_eq!(
        h.service.store().get_location(alice.id).unwrap().as_deref(),
        Some("foyer")
    );
    assert_eq!(h.service.store().get_room("library").unwrap(), None);
    assert_eq!(h.platform.granted_text_channels(h.guild, alice.id), vec![foyer]);

    let reports = h.platform.messages(h.console);
    assert_eq!(reports.len(), 1);
    assert!(reports[0].contains("- #library in Floor 1"));

    h.service.full_sync().await.expect("periodic sync");
    assert_eq!(h.platform.messages(h.console).len(), 1);
}

#[tokio::test]
async fn one_failing_member_does_not_stop_the_guild() {
    let h = harness(SAMPLE_WORLD);
    let alice = h.platform.add_member(h.guild, "alice", false);
    let bob = h.platform.add_member(h.guild, "bob", false);
    h.service.full_sync().await.expect("initial sync");

    h.platform.fail_overwrites_for(bob.id);
    let report = h.service.full_sync().await.expect("periodic sync");
    let stats = report.guilds[0].visibility.expect("sync ran");
    assert_eq!(stats.synced, 1);
    assert_eq!(stats.errors, 1);
    assert_eq!(report.guilds[0].error, None);

    let foyer = text_channel(&h.platform, h.guild, "foyer");
    assert_eq!(h.platform.granted_text_channels(h.guild, alice.id), vec![foyer]);

    h.platform.heal_overwrites_for(bob.id);
    let report = h.service.full_sync().await.expect("periodic sync");
    assert_eq!(report.guilds[0].visibility.map(|s| s.errors), Some(0));
}

#[tokio::test]
async fn members_joining_and_leaving() {
    let h = harness(SAMPLE_WORLD);
    h.service.full_sync().await.expect("initial sync");
    let foyer = text_channel(&h.platform, h.guild, "foyer");

    let carol = h.platform.add_member(h.guild, "carol", false);
    assert_eq!(h.service.on_member_join(&carol).await.unwrap(), Some(foyer));
    assert_eq!(h.platform.granted_text_channels(h.guild, carol.id), vec![foyer]);

    h.platform.remove_member(h.guild, carol.id);
    h.service.on_member_leave(carol.id).await.unwrap();
    assert!(h.service.store().get_location(carol.id).unwrap().is_none());

    let report = h.service.full_sync().await.expect("periodic sync");
    let stats = report.guilds[0].visibility.expect("sync ran");
    assert_eq!(stats.synced + stats.assigned_default, 0);
}
