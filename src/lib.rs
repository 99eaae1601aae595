//! # mudd - location and visibility for a text-adventure chat guild
//!
//! mudd turns a chat guild into a map: every room of a world definition is a
//! text channel (optionally paired with a voice channel), every zone a
//! category, and each member can see exactly one room at a time.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use mudd::config::Config;
//! use mudd::platform::MemoryPlatform;
//! use mudd::service::MuddService;
//! use mudd::storage::WorldStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let store = Arc::new(WorldStore::open(config.storage.db_path())?);
//!     let platform = Arc::new(MemoryPlatform::load(&config.platform.snapshot)?);
//!
//!     let service = MuddService::new(config.service_options(), store, platform)?;
//!     service.run(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`world`] - `.rec` world files, validation and the exit map
//! - [`storage`] - sled-backed zones, rooms and member locations
//! - [`platform`] - the chat platform seam and its in-memory adapter
//! - [`reconcile`] - make the guild's categories and channels match the world
//! - [`visibility`] - per-member permission overwrites and the startup gate
//! - [`service`] - the sync task, member events and the move/look commands
//! - [`config`] - TOML configuration and environment overrides
//!
//! ```text
//! ┌─────────────────┐
//! │   MuddService   │ ← sync task, commands, member events
//! └─────────────────┘
//!     │         │
//! ┌────────┐ ┌────────────┐
//! │Reconcile│ │ Visibility │ ← channels / per-member overwrites
//! └────────┘ └────────────┘
//!     │         │
//! ┌─────────────────┐
//! │  WorldStore     │ ← sled
//! └─────────────────┘
//! ```

pub mod config;
pub mod errors;
pub mod logutil;
pub mod metrics;
pub mod platform;
pub mod reconcile;
pub mod service;
pub mod storage;
pub mod visibility;
pub mod world;
