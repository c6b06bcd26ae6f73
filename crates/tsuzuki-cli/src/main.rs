mod app;
mod logging;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use tsuzuki_core::config::AppConfig;
use tsuzuki_core::error::TsuzukiError;
use tsuzuki_core::models::{config_keys, LOCAL_TRACKER};
use tsuzuki_core::storage::BackupCounts;
use tsuzuki_sync::{
    PassError, SyncDirection, SyncError, SyncReport, SyncScheduler, SyncStats, Tracker,
    TrackerError,
};

use crate::app::App;

#[derive(Parser)]
#[command(name = "tsuzuki")]
#[command(version, about = "Keep a local anime watch ledger in sync with AniList and MyAnimeList")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile the local ledger with remote trackers
    Sync {
        #[arg(short, long, value_enum, default_value = "both")]
        direction: DirectionArg,

        /// Only sync this tracker
        #[arg(short, long)]
        tracker: Option<String>,
    },

    /// Run the periodic sync until interrupted
    Daemon,

    /// Manage trackers
    Tracker {
        #[command(subcommand)]
        command: TrackerCommand,
    },

    /// Record a watched episode and push it to every tracker of the anime
    Progress { anime_id: i64, episode: f64 },

    /// Search a tracker (the active one by default)
    Search {
        query: String,

        #[arg(short, long)]
        tracker: Option<String>,

        #[arg(short, long, default_value_t = 10)]
        limit: u32,
    },

    /// List anime currently being watched
    Watching,

    /// Read or write runtime settings stored in the database
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Write the ledger to a JSON file (tokens are left out)
    Export { path: PathBuf },

    /// Merge a JSON export into the ledger
    Import { path: PathBuf },
}

#[derive(Subcommand)]
enum TrackerCommand {
    /// Show registered trackers and their login state
    List,
    /// Make a tracker the active one
    Use { name: String },
    /// Log in to a remote tracker
    Login { name: String },
    /// Forget a remote tracker's stored token
    Logout { name: String },
}

#[derive(Subcommand)]
enum ConfigCommand {
    Get { key: String },
    Set { key: String, value: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum DirectionArg {
    Pull,
    Push,
    Both,
}

impl From<DirectionArg> for SyncDirection {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Pull => SyncDirection::Pull,
            DirectionArg::Push => SyncDirection::Push,
            DirectionArg::Both => SyncDirection::Both,
        }
    }
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] TsuzukiError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Pass(#[from] PassError),

    #[error("could not encode output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Usage(String),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = if matches!(cli.command, Command::Daemon) {
        Some(logging::init_with_file(
            cli.verbose,
            &AppConfig::data_dir().join("logs"),
        ))
    } else {
        logging::init(cli.verbose);
        None
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let app = App::open()?;
    let out = Output {
        json: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Command::Sync { direction, tracker } => sync(&app, out, direction.into(), tracker).await,
        Command::Daemon => daemon(&app).await,
        Command::Tracker { command } => tracker(&app, out, command).await,
        Command::Progress { anime_id, episode } => progress(&app, out, anime_id, episode).await,
        Command::Search {
            query,
            tracker,
            limit,
        } => search(&app, out, &query, tracker, limit).await,
        Command::Watching => watching(&app, out).await,
        Command::Config { command } => config(&app, command).await,
        Command::Export { path } => {
            let counts = app.db.export_json(&path).await?;
            out.backup("Exported", &path, counts)
        }
        Command::Import { path } => {
            let counts = app.db.import_json(&path).await?;
            out.backup("Imported", &path, counts)
        }
    }
}

/// A token cancelled on the first Ctrl+C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, cancelling");
            token.cancel();
        }
    });
    cancel
}

#[derive(Clone, Copy)]
struct Output {
    json: bool,
    verbose: bool,
}

impl Output {
    fn print_json<T: Serialize>(&self, value: &T) -> Result<(), CliError> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    fn stats(&self, label: &str, stats: &SyncStats) {
        println!("{label}: {stats}");
        if self.verbose {
            for detail in &stats.details {
                println!("  {detail}");
            }
        }
    }

    fn backup(&self, verb: &str, path: &Path, counts: BackupCounts) -> Result<(), CliError> {
        if self.json {
            return self.print_json(&counts);
        }
        println!("{verb} {counts} ({})", path.display());
        Ok(())
    }

    fn report(&self, report: &SyncReport) -> Result<(), CliError> {
        if self.json {
            return self.print_json(report);
        }
        for (name, stats) in &report.stats {
            self.stats(name, stats);
        }
        for (name, error) in &report.failures {
            println!("{name}: failed: {error}");
        }
        for name in &report.unauthenticated {
            println!("{name}: skipped, not logged in");
        }
        Ok(())
    }
}

async fn sync(
    app: &App,
    out: Output,
    direction: SyncDirection,
    tracker: Option<String>,
) -> Result<(), CliError> {
    let cancel = cancel_on_ctrl_c();
    let report = match tracker {
        Some(name) => app.registry.sync_one(&name, direction, &cancel).await?,
        None => app.registry.sync_all(direction, &cancel).await,
    };

    out.report(&report)?;
    report.into_result()?;
    Ok(())
}

async fn daemon(app: &App) -> Result<(), CliError> {
    let auto_sync = app.db.get_config(config_keys::AUTO_SYNC).await?;
    if auto_sync.as_deref() != Some("true") {
        tracing::warn!(
            "{} is not \"true\", ticks will be skipped until it is enabled",
            config_keys::AUTO_SYNC
        );
    }

    let scheduler = SyncScheduler::new(app.registry.clone(), app.config.sync.clone());
    scheduler.start();
    tracing::info!("daemon running, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    scheduler.stop().await;
    app.db.shutdown();
    Ok(())
}

#[derive(Serialize)]
struct TrackerRow<'a> {
    name: &'a str,
    authenticated: bool,
    active: bool,
}

async fn tracker(app: &App, out: Output, command: TrackerCommand) -> Result<(), CliError> {
    let registry = &app.registry;
    let remote = |name: &str| match registry.get(name) {
        Some(tracker) if !tracker.is_local() => Ok(tracker),
        Some(_) => Err(CliError::Usage(format!("{name} does not need a login"))),
        None => Err(TrackerError::UnknownTracker(name.to_string()).into()),
    };

    match command {
        TrackerCommand::List => {
            let active = registry.active_tracker().await?;
            let mut rows = Vec::new();
            for name in registry.names() {
                let Some(tracker) = registry.get(name) else {
                    continue;
                };
                rows.push(TrackerRow {
                    name,
                    authenticated: tracker.is_authenticated().await,
                    active: name == active.name(),
                });
            }

            if out.json {
                return out.print_json(&rows);
            }
            for row in rows {
                let marker = if row.active { "*" } else { " " };
                let state = if row.name == LOCAL_TRACKER {
                    ""
                } else if row.authenticated {
                    " (logged in)"
                } else {
                    " (not logged in)"
                };
                println!("{marker} {}{state}", row.name);
            }
        }
        TrackerCommand::Use { name } => {
            registry.set_active_tracker(&name).await?;
            println!("Active tracker is now {name}");
        }
        TrackerCommand::Login { name } => {
            let tracker = remote(&name)?;
            tracker.authenticate(&cancel_on_ctrl_c()).await?;
            println!("Logged in to {name}");
        }
        TrackerCommand::Logout { name } => {
            remote(&name)?.logout().await?;
            println!("Logged out of {name}");
        }
    }
    Ok(())
}

async fn progress(app: &App, out: Output, anime_id: i64, episode: f64) -> Result<(), CliError> {
    let scheduler = SyncScheduler::new(app.registry.clone(), app.config.sync.clone());
    let result = scheduler
        .push_episode_progress(anime_id, episode, &cancel_on_ctrl_c())
        .await;

    let stats = match &result {
        Ok(stats) | Err(PassError { stats, .. }) => stats,
    };
    if out.json {
        out.print_json(stats)?;
    } else {
        out.stats(&format!("anime {anime_id}"), stats);
    }
    result?;
    Ok(())
}

async fn search(
    app: &App,
    out: Output,
    query: &str,
    tracker: Option<String>,
    limit: u32,
) -> Result<(), CliError> {
    let tracker = match tracker {
        Some(name) => app
            .registry
            .get(&name)
            .ok_or(TrackerError::UnknownTracker(name))?,
        None => app.registry.active_tracker().await?,
    };

    let results = tracker.search_anime(query, limit).await?;
    if out.json {
        return out.print_json(&results);
    }
    if results.is_empty() {
        println!("No results on {}", tracker.name());
    }
    for info in results {
        match info.total_episodes {
            Some(eps) => println!("{:>8}  {} ({eps} eps)", info.external_id, info.title),
            None => println!("{:>8}  {}", info.external_id, info.title),
        }
    }
    Ok(())
}

async fn watching(app: &App, out: Output) -> Result<(), CliError> {
    let anime = app.db.currently_watching().await?;
    if out.json {
        return out.print_json(&anime);
    }
    for a in anime {
        println!("{:>6}  {}", a.id, a.display_title());
    }
    Ok(())
}

async fn config(app: &App, command: ConfigCommand) -> Result<(), CliError> {
    match command {
        ConfigCommand::Get { key } => match app.db.get_config(&key).await? {
            Some(value) => println!("{value}"),
            None => println!("{key} is not set"),
        },
        ConfigCommand::Set { key, value } => {
            app.db.set_config(&key, &value).await?;
            tracing::info!(key = %key, value = %value, "config updated");
        }
    }
    Ok(())
}
