//! Playtime tracker - player session playtime from Minecraft server logs.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use playtime_tracker::config::{ConfigLoader, TrackerConfig};
use playtime_tracker::display;
use playtime_tracker::ingest::{
    backfill, BackfillOptions, IngestDriver, IngestError, IngestObserver, IngestState,
    IngestedFiles,
};
use playtime_tracker::playtime::PresenceStatus;
use playtime_tracker::watcher::base_name;

#[derive(Parser)]
#[command(
    name = "playtime-tracker",
    about = "Player session playtime from Minecraft server logs",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file to use instead of the default search paths.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log directory (overrides the config file).
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// IANA time zone of the log timestamps (overrides the config file).
    #[arg(long, global = true)]
    timezone: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read every log and print total playtime per player.
    Report {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Read every log and print who is online right now.
    Players,
    /// Follow the live log until interrupted, then print the report.
    Watch,
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(cli: &Cli) -> Result<TrackerConfig, Box<dyn std::error::Error>> {
    let loader = match &cli.config {
        Some(path) => ConfigLoader::with_path(path.clone()),
        None => ConfigLoader::new(),
    };
    let mut config = loader.load()?;
    if let Some(dir) = &cli.log_dir {
        config.log_dir.clone_from(dir);
    }
    if let Some(tz) = &cli.timezone {
        config.timezone.clone_from(tz);
    }
    config.validate()?;
    Ok(config)
}

/// Prints presence changes and rotations while watching.
struct WatchObserver {
    status: PresenceStatus,
    files: IngestedFiles,
    live: bool,
}

impl IngestObserver for WatchObserver {
    fn file_completed(&mut self, path: &Path, compressed: bool) {
        self.files.file_completed(path, compressed);
        if self.live {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                display::print_rotation(base_name(name));
            }
        }
    }

    fn presence_changed(&mut self, online: usize) {
        if let Some(status) = self.status.update(online) {
            tracing::info!(online, status = %status, "Presence changed");
            if self.live {
                display::print_status(&status);
            }
        }
    }
}

async fn report(config: &TrackerConfig, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut state = IngestState::new();
    let options = BackfillOptions {
        include_live: true,
        preserve_context: false,
    };
    backfill(config, &mut state, options, &mut ()).await?;

    let summaries = state.store.summaries();
    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else {
        display::print_report(&summaries, &config.time_zone()?);
    }
    Ok(())
}

async fn players(config: &TrackerConfig) -> Result<(), IngestError> {
    let mut state = IngestState::new();
    let options = BackfillOptions {
        include_live: true,
        preserve_context: true,
    };
    backfill(config, &mut state, options, &mut ()).await?;
    display::print_online(
        &state.context.online_players(),
        Utc::now(),
        &config.time_zone()?,
    );
    Ok(())
}

async fn watch(config: TrackerConfig) -> Result<(), IngestError> {
    let tz = config.time_zone()?;
    let observer = WatchObserver {
        status: PresenceStatus::new(config.status.clone()),
        files: IngestedFiles::new(),
        live: false,
    };
    let mut driver = IngestDriver::start(config, observer).await?;
    driver.observer_mut().live = true;
    let shared = driver.shared();
    tracing::info!(
        online = shared.online_count().await,
        archives = driver.observer().files.names().len(),
        "Watching live log"
    );

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, shutting down");
        }
        ctrl_c.cancel();
    });

    let result = driver.run(&shutdown).await;

    let state = shared.lock().await;
    let store = state.with_in_progress_sessions(Utc::now());
    display::print_report(&store.summaries(), &tz);
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let result: Result<(), Box<dyn std::error::Error>> = match cli.command {
        Commands::Report { json } => report(&config, json).await,
        Commands::Players => players(&config).await.map_err(Into::into),
        Commands::Watch => watch(config).await.map_err(Into::into),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Playtime tracker failed");
            ExitCode::FAILURE
        }
    }
}
