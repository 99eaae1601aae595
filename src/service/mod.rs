//! # Service - the sync task and the command/event surface
//!
//! [`MuddService`] wires the world files, the store, the reconciler and the
//! visibility engine together:
//!
//! - the first [`full_sync`](MuddService::full_sync) reconciles every guild,
//!   runs the startup permission sync and opens the startup gate;
//! - later passes reconcile and re-sync each guild, logging a failing guild
//!   and moving on to the next;
//! - [`run`](MuddService::run) drives those passes on a timer until shutdown.
//!
//! Commands (`handle_move`, `handle_look`) and member events wait for the
//! startup gate before touching locations.

pub mod movement;
pub mod schedule;

use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::time::MissedTickBehavior;

use crate::errors::MuddError;
use crate::platform::{ChannelId, ChannelPlatform, GuildId, Member, UserId};
use crate::reconcile::{ReconcileStats, ZoneReconciler};
use crate::storage::WorldStore;
use crate::visibility::{GateState, SyncStats, VisibilityEngine};
use crate::world::{load_world, WorldDefinition};

pub use movement::{MoveOutcome, MOVE_FAILED_REPLY, NO_TOPIC_REPLY};
pub use schedule::{SyncFrequency, SyncStatus};

/// Settings the service needs, resolved from the config file and environment.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub world_dir: PathBuf,
    pub console_channel: String,
    pub frequency: SyncFrequency,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            world_dir: PathBuf::from("data/worlds"),
            console_channel: "console".to_string(),
            frequency: SyncFrequency::default(),
        }
    }
}

/// What one full sync did to one guild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildReport {
    pub guild: GuildId,
    pub reconcile: ReconcileStats,
    /// `None` when the startup sync for this guild had already run.
    pub visibility: Option<SyncStats>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub initial: bool,
    pub guilds: Vec<GuildReport>,
}

pub struct MuddService {
    options: ServiceOptions,
    store: Arc<WorldStore>,
    platform: Arc<dyn ChannelPlatform>,
    engine: Arc<VisibilityEngine>,
    reconciler: ZoneReconciler,
    status: Mutex<SyncStatus>,
}

impl MuddService {
    /// Load the world and build the engine around its default room.
    ///
    /// A world without exactly one default room is a configuration error.
    pub fn new(
        options: ServiceOptions,
        store: Arc<WorldStore>,
        platform: Arc<dyn ChannelPlatform>,
    ) -> Result<Self, MuddError> {
        let world = load_world(&options.world_dir)?;
        let default_room = world
            .default_room()
            .map_err(|e| MuddError::Configuration(format!("{} in {}", e, options.world_dir.display())))?
            .id
            .clone();
        info!(
            "Loaded {} zones and {} rooms; default room is {}",
            world.zones.len(),
            world.rooms.len(),
            default_room
        );

        let engine = Arc::new(VisibilityEngine::new(
            Arc::clone(&store),
            Arc::clone(&platform),
            &default_room,
        ));
        let reconciler = ZoneReconciler::new(
            Arc::clone(&store),
            Arc::clone(&platform),
            &options.console_channel,
        );
        Ok(Self {
            options,
            store,
            platform,
            engine,
            reconciler,
            status: Mutex::new(SyncStatus::default()),
        })
    }

    pub fn engine(&self) -> &Arc<VisibilityEngine> {
        &self.engine
    }

    pub fn reconciler(&self) -> &ZoneReconciler {
        &self.reconciler
    }

    pub fn store(&self) -> &Arc<WorldStore> {
        &self.store
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    pub fn status(&self) -> SyncStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn load_world(&self) -> Result<WorldDefinition, MuddError> {
        load_world(&self.options.world_dir)
    }

    // ---- sync ----

    /// One sync pass over every guild.
    ///
    /// The first call performs the initial sync and opens the startup gate; a
    /// concurrent first call waits for it instead of syncing twice.
    pub async fn full_sync(&self) -> Result<SyncReport, MuddError> {
        let gate = self.engine.gate();
        if gate.is_complete() {
            return self.periodic_sync().await;
        }
        if !gate.begin() {
            debug!("Initial sync already running; waiting for it");
            if gate.wait_settled().await != GateState::Complete {
                warn!("Initial sync in another task failed; this pass did nothing");
            }
            return Ok(SyncReport::default());
        }
        match self.initial_sync().await {
            Ok(report) => {
                self.engine.mark_startup_complete();
                info!("Initial sync complete - ready for commands");
                Ok(report)
            }
            Err(e) => {
                gate.fail();
                Err(e)
            }
        }
    }

    async fn initial_sync(&self) -> Result<SyncReport, MuddError> {
        info!("Starting initial sync (first run)");
        let world = self.load_world()?;
        let guilds = self.platform.guilds().await?;
        if guilds.is_empty() {
            return Err(MuddError::Configuration(
                "No guilds found - cannot start".into(),
            ));
        }

        let mut report = SyncReport {
            initial: true,
            guilds: Vec::new(),
        };
        for guild in &guilds {
            let outcome = self.reconciler.sync(&world, guild.id).await.map_err(|e| {
                error!("Failed initial zone sync for {}: {}", guild.name, e);
                e
            })?;
            if let Some(room) = &outcome.default_room {
                self.engine.set_default_room(room);
            }
            info!("Initial zone sync for {}: {:?}", guild.name, outcome.stats);
            report.guilds.push(GuildReport {
                guild: guild.id,
                reconcile: outcome.stats,
                visibility: None,
                error: None,
            });
        }

        for entry in report.guilds.iter_mut() {
            let stats = self.engine.startup_sync(entry.guild).await.map_err(|e| {
                error!("Failed initial visibility sync for {}: {}", entry.guild, e);
                e
            })?;
            entry.visibility = stats;
        }
        Ok(report)
    }

    async fn periodic_sync(&self) -> Result<SyncReport, MuddError> {
        self.engine.wait_for_startup().await;
        let world = self.load_world()?;
        let guilds = self.platform.guilds().await?;

        let mut report = SyncReport::default();
        for guild in guilds {
            info!("Starting periodic sync for {}", guild.name);
            let mut entry = GuildReport {
                guild: guild.id,
                reconcile: ReconcileStats::default(),
                visibility: None,
                error: None,
            };
            let result = async {
                let outcome = self.reconciler.sync(&world, guild.id).await?;
                if let Some(room) = &outcome.default_room {
                    self.engine.set_default_room(room);
                }
                entry.reconcile = outcome.stats;
                info!("Zone sync for {}: {:?}", guild.name, outcome.stats);
                let stats = self.engine.sync_guild(guild.id).await?;
                info!("Permission sync for {}: {:?}", guild.name, stats);
                entry.visibility = Some(stats);
                Ok::<(), MuddError>(())
            }
            .await;
            if let Err(e) = result {
                error!("Periodic sync failed for {}: {}", guild.name, e);
                entry.error = Some(e.to_string());
            }
            report.guilds.push(entry);
        }
        Ok(report)
    }

    fn record(&self, result: &Result<SyncReport, MuddError>) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        match result {
            Ok(_) => status.record_success(),
            Err(e) => status.record_failure(&e.to_string()),
        }
    }

    /// Drive [`full_sync`](Self::full_sync) until `shutdown` resolves, then flush the store.
    ///
    /// Waits for the platform first and syncs immediately, then once per
    /// configured period. A fatal error before startup completes ends the loop.
    pub async fn run<F>(&self, shutdown: F) -> Result<(), MuddError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        tokio::select! {
            _ = self.platform.wait_until_ready() => {}
            _ = &mut shutdown => {
                info!("Shutdown requested before the platform was ready");
                return self.store.flush();
            }
        }
        info!(
            "Sync task ready - starting first sync ({})",
            self.options.frequency.description()
        );

        // With periodic syncs off, a failed initial sync still retries at the default pace.
        let period = self
            .options
            .frequency
            .interval()
            .or_else(|| SyncFrequency::default().interval())
            .unwrap_or(Duration::from_secs(900));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.engine.is_startup_complete() && self.options.frequency.interval().is_none() {
                // Periodic syncs are off; idle until shutdown.
                (&mut shutdown).await;
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                _ = &mut shutdown => break,
            }
            let result = tokio::select! {
                result = self.full_sync() => result,
                _ = &mut shutdown => break,
            };
            self.record(&result);
            if let Err(e) = result {
                if e.is_fatal() && !self.engine.is_startup_complete() {
                    error!("Initial sync failed: {}", e);
                    self.store.flush()?;
                    return Err(e);
                }
                warn!("Sync pass failed, retrying next tick: {}", e);
            }
        }

        self.store.flush()?;
        info!("Sync task stopped");
        Ok(())
    }

    // ---- member events ----

    /// Place a new member in the default room.
    pub async fn on_member_join(&self, member: &Member) -> Result<Option<ChannelId>, MuddError> {
        if member.bot {
            return Ok(None);
        }
        self.engine.wait_for_startup().await;
        let channel = self.engine.assign_default(member).await?;
        info!("Member {} joined; placed in {}", member.id, self.engine.default_room());
        Ok(channel)
    }

    pub async fn on_member_leave(&self, user: UserId) -> Result<(), MuddError> {
        if self.engine.forget_user(user)? {
            info!("Member {} left; location removed", user);
        }
        Ok(())
    }

    // ---- commands ----

    /// `/move destination` issued by `member` in `from_channel`.
    ///
    /// Engine failures are returned as errors; callers answer them with
    /// [`MOVE_FAILED_REPLY`].
    pub async fn handle_move(
        &self,
        member: &Member,
        from_channel: ChannelId,
        destination: &str,
    ) -> Result<MoveOutcome, MuddError> {
        self.engine.wait_for_startup().await;
        let channels = self.platform.channels(member.guild_id).await?;
        let topic = channels
            .iter()
            .filter_map(|c| c.as_text())
            .find(|t| t.id == from_channel)
            .and_then(|t| t.topic.as_deref());

        let exits = movement::extract_exits_from_topic(topic, &channels);
        if exits.is_empty() {
            return Ok(MoveOutcome::NoExits);
        }
        let Some(target) = movement::find_exit_in_input(destination, &exits).cloned() else {
            return Ok(MoveOutcome::UnknownExit { exits });
        };

        let old = self.engine.get_user_location(member)?;
        let moved = match self.engine.move_user_to_channel(member, target.id).await {
            Ok(moved) => moved,
            Err(e) => {
                error!("Move of {} to #{} failed: {}", member.id, target.name, e);
                return Err(e);
            }
        };
        if !moved {
            return Ok(MoveOutcome::AlreadyThere);
        }

        if let Some(old) = old {
            self.announce(old, &format!("{} has left", member.mention())).await;
        }
        self.announce(target.id, &format!("{} entered", member.mention()))
            .await;
        Ok(MoveOutcome::Moved { channel: target })
    }

    async fn announce(&self, channel: ChannelId, content: &str) {
        if let Err(e) = self.platform.send_message(channel, content).await {
            warn!("Failed to announce in {}: {}", channel, e);
        }
    }

    /// `/look` in `channel`: the room description, or a placeholder.
    pub async fn handle_look(&self, guild: GuildId, channel: ChannelId) -> Result<String, MuddError> {
        self.engine.wait_for_startup().await;
        let channels = self.platform.channels(guild).await?;
        Ok(channels
            .iter()
            .filter_map(|c| c.as_text())
            .find(|t| t.id == channel)
            .and_then(|t| t.topic.clone())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| NO_TOPIC_REPLY.to_string()))
    }
}
