//! Binary entrypoint for the mudd CLI.
//!
//! Commands:
//! - `init` - write a starter `config.toml`, a sample world and an empty guild snapshot
//! - `start` - run the sync service against the offline guild snapshot until Ctrl-C
//! - `validate` - check the world files and exit 1 on any problem
//! - `map` - print a Mermaid map of the room exits
//! - `status` - print store counts and metrics
//!
//! See the library crate docs for module-level details: `mudd::`.
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{error, info};

use mudd::config::Config;
use mudd::platform::{ChannelPlatform, MemoryPlatform};
use mudd::service::MuddService;
use mudd::storage::WorldStore;
use mudd::world::{load_world, map::world_map};

const SAMPLE_WORLD: &str = include_str!("../data/worlds/mansion.rec");

#[derive(Parser)]
#[command(name = "mudd")]
#[command(about = "Room-by-room channel visibility for a text-adventure chat guild")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Directory of `.rec` world files (overrides config and MUDD_WORLD_DIR)
    #[arg(long, global = true)]
    world_dir: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter configuration, sample world and guild snapshot
    Init,
    /// Run the sync service until Ctrl-C
    Start {
        /// Channel for orphan reports (overrides config and MUDD_CONSOLE_CHANNEL)
        #[arg(long)]
        console_channel: Option<String>,
    },
    /// Check the world files for problems
    Validate,
    /// Print a Mermaid diagram of the room exits
    Map,
    /// Show store counts and metrics
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match cli.command {
        Commands::Init => Config::default(),
        _ => Config::load(&cli.config).await.unwrap_or_else(|e| {
            eprintln!("{} (using defaults)", e);
            let mut config = Config::default();
            config.apply_overrides(|key| std::env::var(key).ok());
            config
        }),
    };
    if let Some(dir) = &cli.world_dir {
        config.world.dir = dir.clone();
    }
    init_logging(&config, cli.verbose);

    match cli.command {
        Commands::Init => init(&cli.config, &config).await?,
        Commands::Start { console_channel } => {
            if let Some(channel) = console_channel {
                config.bot.console_channel = channel;
            }
            start(config).await?;
        }
        Commands::Validate => {
            if !validate(&config) {
                std::process::exit(1);
            }
        }
        Commands::Map => {
            let world = load_world(Path::new(&config.world.dir))?;
            println!("{}", world_map(&world)?);
        }
        Commands::Status => status(&config)?,
    }

    Ok(())
}

async fn init(config_path: &str, config: &Config) -> Result<()> {
    info!("Initializing new mudd configuration");
    if Path::new(config_path).exists() {
        info!("{} already exists; leaving it alone", config_path);
    } else {
        Config::create_default(config_path).await?;
        info!("Configuration file created at {}", config_path);
    }

    tokio::fs::create_dir_all(&config.world.dir).await?;
    let world_file = Path::new(&config.world.dir).join("mansion.rec");
    if !world_file.exists() {
        tokio::fs::write(&world_file, SAMPLE_WORLD).await?;
        info!("Sample world written to {}", world_file.display());
    }

    tokio::fs::create_dir_all(&config.storage.data_dir).await?;
    let snapshot = Path::new(&config.platform.snapshot);
    if !snapshot.exists() {
        if let Some(parent) = snapshot.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let platform = MemoryPlatform::new();
        platform.add_guild(&config.bot.name);
        platform.save(snapshot)?;
        info!("Empty guild snapshot written to {}", snapshot.display());
    }
    Ok(())
}

async fn start(config: Config) -> Result<()> {
    info!("Starting mudd v{}", env!("CARGO_PKG_VERSION"));
    let snapshot = config.platform.snapshot.clone();
    let platform = Arc::new(MemoryPlatform::load(&snapshot).map_err(|e| {
        anyhow!(
            "Failed to load guild snapshot {}: {} (run `mudd init` first)",
            snapshot,
            e
        )
    })?);
    let store = Arc::new(WorldStore::open(config.storage.db_path())?);

    let dyn_platform: Arc<dyn ChannelPlatform> = platform.clone();
    let service = MuddService::new(config.service_options(), store, dyn_platform)?;

    let result = service
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("Shutdown requested");
        })
        .await;

    platform.save(&snapshot)?;
    info!("Guild snapshot saved to {}", snapshot);
    result?;
    Ok(())
}

fn validate(config: &Config) -> bool {
    let world = match load_world(Path::new(&config.world.dir)) {
        Ok(world) => world,
        Err(e) => {
            eprintln!("Error: {}", e);
            return false;
        }
    };
    let problems = world.problems();
    if world.is_empty() {
        println!("No world files found in {}", config.world.dir);
        return false;
    }
    if problems.is_empty() {
        println!(
            "World OK: {} zones, {} rooms",
            world.zones.len(),
            world.rooms.len()
        );
        return true;
    }
    for problem in &problems {
        println!("Error: {}", problem);
    }
    false
}

fn status(config: &Config) -> Result<()> {
    let store = WorldStore::open(config.storage.db_path())?;
    let counts = store.counts()?;
    println!("mudd status");
    println!("  World dir:    {}", config.world.dir);
    println!("  Database:     {}", config.storage.db_path().display());
    println!("  Sync:         {}", config.sync.frequency().description());
    println!("  Zones:        {}", counts.zones);
    println!("  Rooms:        {}", counts.rooms);
    println!("  Locations:    {}", counts.users);

    let metrics = mudd::metrics::snapshot();
    println!("  Moves:        {}", metrics.moves);
    println!("  Perm writes:  {}", metrics.permission_writes);
    println!("  Perm fails:   {}", metrics.permission_failures);
    println!("  Sync passes:  {}", metrics.sync_passes);
    Ok(())
}

fn init_logging(config: &Config, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // Base level from CLI verbosity overrides config
    let base_level = match verbosity {
        0 => config
            .logging
            .level
            .parse()
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let file = config.logging.file.as_ref().and_then(|path| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });
    match file {
        Some(f) => {
            let write_mutex = Arc::new(std::sync::Mutex::new(f));
            // Foreground runs also echo to the console.
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(|fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
            });
        }
    }
    let _ = builder.try_init();
}
