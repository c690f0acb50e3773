use anyhow::Result;
use chrono::Utc;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

use cloudmask::catalog::StacClient;
use cloudmask::config::Config;
use cloudmask::db::DatabaseStats;
use cloudmask::export::export_scenes_csv;
use cloudmask::raster::HttpRasterSource;
use cloudmask::update::{self, UpdateReport};
use cloudmask::{columnar, logging};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Init,
    Update,
    Csv,
    Stats,
}

struct Args {
    command: Command,
    config_path: Option<PathBuf>,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut command = None;
    let mut config_path = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("cloudmask {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "init" if command.is_none() => command = Some(Command::Init),
            "update" if command.is_none() => command = Some(Command::Update),
            "csv" if command.is_none() => command = Some(Command::Csv),
            "stats" if command.is_none() => command = Some(Command::Stats),
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    match command {
        Some(command) => Args { command, config_path },
        None => {
            eprintln!("Error: missing command");
            print_help();
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        r#"cloudmask - Cloud-mask statistics for Sentinel-2 scenes

USAGE:
    cloudmask [OPTIONS] <COMMAND>

COMMANDS:
    init                Scrape the whole collection and build the tables
    update              Add scenes published in the last days
    csv                 Write scenes.csv from scenes.parquet
    stats               Print a summary of the scene table

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    CLOUDMASK_CONFIG    Path to config file (overrides default location)
    CLOUDMASK_LOG       Log level (trace, debug, info, warn, error)
    STAC_URL            STAC API base URL
    COLLECTION_ID       STAC collection id

Config file location: $XDG_CONFIG_HOME/cloudmask/config.toml

See also: cloudmask-daemon --help"#
    );
}

fn print_report(report: &UpdateReport) {
    println!(
        "Processed {} scenes: {} added ({} tiles), {} failed, {} already known",
        report.processed,
        report.added_scenes,
        report.added_tiles,
        report.failed.len(),
        report.skipped_existing
    );
    if !report.failed.is_empty() {
        println!("Failed: {}", report.failed.join(", "));
    }
    if let Some(ref stats) = report.stats {
        print_stats(stats);
    }
}

fn print_stats(stats: &DatabaseStats) {
    println!("Scenes:     {}", stats.total_scenes);
    match (stats.earliest, stats.latest) {
        (Some(earliest), Some(latest)) => println!("Date range: {} to {}", earliest, latest),
        _ => println!("Date range: -"),
    }
    println!("Avg cloud:  {:.1}%", stats.avg_cloud.unwrap_or(0.0));
    println!("Tiles:      {}", stats.total_tiles);
}

/// Summarise the Parquet tables without touching them.
fn stats_from_files(config: &Config) -> Result<DatabaseStats> {
    let scenes = columnar::read_scenes(&config.storage.scenes_path())?;
    let tiles = columnar::read_tiles(&config.storage.tiles_dir())?;

    let avg_cloud = if scenes.is_empty() {
        None
    } else {
        Some(scenes.iter().map(|s| s.avg_cloud_pct as f64).sum::<f64>() / scenes.len() as f64)
    };

    Ok(DatabaseStats {
        total_scenes: scenes.len() as i64,
        earliest: scenes.iter().map(|s| s.date).min(),
        latest: scenes.iter().map(|s| s.date).max(),
        avg_cloud,
        total_tiles: tiles.len() as i64,
    })
}

fn run(args: &Args, config: &Config) -> Result<()> {
    let client = StacClient::from_config(&config.stac);
    let source = HttpRasterSource::new(
        Duration::from_secs(config.stac.timeout_secs),
        config.tiling.max_raster_bytes(),
    );

    match args.command {
        Command::Init => {
            info!("Initial scrape of {}", config.stac.collection);
            let report = update::initial_scrape(config, &client, &source)?;
            print_report(&report);
        }
        Command::Update => {
            info!("Updating from the last {} days", config.schedule.days_back);
            let report = update::daily_update(config, &client, &source, Utc::now())?;
            print_report(&report);
        }
        Command::Csv => {
            let summary =
                export_scenes_csv(&config.storage.scenes_path(), &config.storage.csv_path())?;
            println!(
                "Wrote {} rows ({:.1} KB) to {}",
                summary.rows,
                summary.bytes as f64 / 1024.0,
                summary.path.display()
            );
        }
        Command::Stats => {
            let scenes_path = config.storage.scenes_path();
            if !scenes_path.exists() {
                anyhow::bail!("{} not found. Run `cloudmask init` first.", scenes_path.display());
            }
            print_stats(&stats_from_files(config)?);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = parse_args();

    let _ = logging::init_stderr();

    let config = match args.config_path {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    if let Err(e) = run(&args, &config) {
        error!("{:#}", e);
        std::process::exit(1);
    }
    Ok(())
}
