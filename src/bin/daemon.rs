//! Cloudmask daemon for periodic incremental updates.
//!
//! Every `schedule.interval_hours` the daemon searches the catalog for
//! scenes published in the last `schedule.days_back` days and merges the
//! new ones into the Parquet tables. Cycles outside the configured hours of
//! operation are skipped.
//!
//! ## Usage
//!
//! ```bash
//! cloudmask-daemon              # Run in foreground
//! cloudmask-daemon --once       # Run one update and exit
//! ```
//!
//! ## systemd Service
//!
//! ```bash
//! sudo cp cloudmask.service /etc/systemd/system/
//! sudo systemctl enable --now cloudmask
//! ```

use anyhow::Result;
use chrono::Utc;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{error, info};

use cloudmask::catalog::StacClient;
use cloudmask::config::Config;
use cloudmask::logging;
use cloudmask::raster::HttpRasterSource;
use cloudmask::{schedule, update};

/// Daemon command line options
#[derive(Default)]
struct DaemonArgs {
    /// Run once and exit
    once: bool,
    /// Interval override in hours
    interval_hours: Option<u64>,
    /// Config path override
    config_path: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = parse_args();

    let _ = logging::init(Some(Config::config_dir().join("logs")));

    info!("Cloudmask daemon starting...");

    let mut config = match args.config_path {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(hours) = args.interval_hours {
        config.schedule.interval_hours = hours;
    }
    info!(
        "Config loaded: {} at {}, data in {:?}",
        config.stac.collection, config.stac.url, config.storage.data_dir
    );

    if args.once {
        info!("Running in single-shot mode");
        run_cycle(&config)?;
    } else {
        info!(
            "Running in daemon mode, updating every {} hours",
            config.schedule.interval_hours
        );
        run_daemon_loop(&config);
    }

    info!("Cloudmask daemon stopped");
    Ok(())
}

fn parse_args() -> DaemonArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut daemon_args = DaemonArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--once" | "-1" => {
                daemon_args.once = true;
            }
            "--interval" | "-i" => {
                if i + 1 < args.len() {
                    if let Ok(hours) = args[i + 1].parse() {
                        daemon_args.interval_hours = Some(hours);
                    }
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    daemon_args.config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    daemon_args
}

fn print_help() {
    println!(
        r#"cloudmask-daemon - Periodic cloud-mask updates

USAGE:
    cloudmask-daemon [OPTIONS]

OPTIONS:
    --once, -1          Run one update and exit
    --interval, -i N    Hours between updates (default: 24)
    --config, -c PATH   Path to config file
    --help, -h          Show this help message

ENVIRONMENT:
    CLOUDMASK_CONFIG    Path to config file (overrides default location)
    CLOUDMASK_LOG       Log level (trace, debug, info, warn, error)
    STAC_URL            STAC API base URL
    COLLECTION_ID       STAC collection id

Install as systemd service:
    sudo cp cloudmask.service /etc/systemd/system/
    sudo systemctl enable --now cloudmask
"#
    );
}

fn run_cycle(config: &Config) -> Result<()> {
    let client = StacClient::from_config(&config.stac);
    let source = HttpRasterSource::new(
        Duration::from_secs(config.stac.timeout_secs),
        config.tiling.max_raster_bytes(),
    );

    let report = update::daily_update(config, &client, &source, Utc::now())?;
    info!(
        "Cycle finished: {} added, {} failed, {} already known",
        report.added_scenes,
        report.failed.len(),
        report.skipped_existing
    );
    Ok(())
}

fn run_daemon_loop(config: &Config) {
    loop {
        if schedule::should_run_now(&config.schedule) {
            if let Err(e) = run_cycle(config) {
                error!("Error running update: {:#}", e);
            }
        } else {
            info!("Outside hours of operation, skipping this cycle");
        }

        thread::sleep(schedule::interval(&config.schedule));
    }
}
