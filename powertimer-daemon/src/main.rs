//! powertimerd: power timer daemon for set-top boxes.
//!
//! Runs the power timer scheduler against the local system, or edits the
//! timer file offline.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use tokio::sync::{mpsc, Mutex};

mod commands;
mod config;
mod host;
mod logging;
mod scheduler;
mod status;

use config::{load_config, CliOverrides, ConfigFile, Settings, DEFAULT_CONFIG_FILE};
use host::SystemHost;
use powertimer_core::{LoadReport, TimerQueue, TimerStore};
use scheduler::{PowerScheduler, SchedulerCommand};
use status::StatusWatcher;

/// powertimerd - power timer scheduler
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// Path to the timer file
    #[arg(short, long)]
    timer_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Directory where log files are stored
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Number of days to keep log files
    #[arg(long)]
    log_retention_days: Option<u64>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler (default)
    Run,
    /// List all timers in the timer file
    List,
    /// Add a timer to the timer file
    Add(commands::AddArgs),
    /// Remove a timer from the timer file by id (as shown by `list`)
    Remove {
        id: u64,
    },
}

fn build_queue(settings: &Settings, host: SystemHost) -> TimerQueue<SystemHost> {
    TimerQueue::new(host)
        .with_store(TimerStore::new(&settings.timer_file))
        .with_retention(settings.retention)
        .with_save_logs(settings.save_logs)
}

fn report_load(report: &LoadReport) {
    if let Some(e) = &report.corrupt {
        match &report.quarantined_to {
            Some(path) => warn!("Timer file was corrupt ({}); moved to {:?}", e, path),
            None => warn!("Timer file was corrupt ({}); starting empty", e),
        }
    }
    if !report.rejected.is_empty() {
        warn!("{} timer record(s) could not be loaded", report.rejected.len());
    }
    if let Some(overlap) = &report.overlap {
        warn!("Timer overlap in timer file: {:?}", overlap.ids());
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Explicit path > auto-detect > default
    let config_path = args.config.clone().or_else(|| {
        let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
        default_path.exists().then_some(default_path)
    });
    let file_config = match &config_path {
        Some(path) => match load_config(path) {
            Ok(c) => {
                eprintln!("Loaded config from: {}", path.display());
                c
            }
            Err(e) => {
                eprintln!("Failed to load config file: {}", e);
                return Err(e);
            }
        },
        None => ConfigFile::default(),
    };

    let overrides = CliOverrides {
        timer_file: args.timer_file.clone(),
        log_dir: args.log_dir.clone(),
        log_retention_days: args.log_retention_days,
    };
    let settings = Settings::resolve(&overrides, file_config);

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(settings, args.verbose).await,
        command => {
            logging::init_console_logging(args.verbose)?;
            let mut queue = build_queue(&settings, SystemHost::new(settings.commands.clone()));
            report_load(&queue.load()?);

            let mut out = std::io::stdout();
            match command {
                Command::List => commands::list(&queue, &mut out)?,
                Command::Add(add) => {
                    commands::add(&mut queue, &add, &mut out)?;
                }
                Command::Remove { id } => commands::remove(&mut queue, id, &mut out)?,
                Command::Run => {}
            }
            Ok(())
        }
    }
}

async fn run(settings: Settings, verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging(
        &settings.log_dir,
        settings.log_retention_days,
        verbose,
        settings.log_level.as_deref(),
    )?;

    info!("powertimerd starting...");
    info!("  Timer file: {:?}", settings.timer_file);
    info!("  Log directory: {:?}", settings.log_dir);

    let (tx, rx) = mpsc::unbounded_channel::<SchedulerCommand>();
    let host = SystemHost::new(settings.commands.clone())
        .with_timer_wakeup_flag(settings.timer_wakeup_flag.clone())
        .with_answer_channel(tx.clone());

    let mut queue = build_queue(&settings, host);
    match queue.load() {
        Ok(report) => {
            report_load(&report);
            info!(
                "  Loaded {} timer(s), {} pending",
                report.loaded,
                queue.pending().len()
            );
        }
        Err(e) => {
            error!("Failed to load timers: {}", e);
            return Err(e.into());
        }
    }

    let queue = Arc::new(Mutex::new(queue));
    let scheduler = Arc::new(PowerScheduler::new(queue, settings.scheduler.clone(), tx.clone()));
    let scheduler_handle = Arc::clone(&scheduler).start(rx);

    match &settings.status_file {
        Some(path) => {
            let watcher = StatusWatcher::new(path.clone(), settings.status_poll_secs);
            tokio::spawn(watcher.run(tx.clone()));
        }
        None => warn!("No status file configured; recording guards and key presses are inactive"),
    }

    let shutdown_scheduler = Arc::clone(&scheduler);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                shutdown_scheduler.stop().await;
            }
            Err(e) => error!("Failed to listen for interrupt: {}", e),
        }
    });

    scheduler_handle.await?;
    info!("powertimerd stopped");
    Ok(())
}
