//! Lines-collect: betting-line snapshot collector.
//!
//! Usage:
//!   lines-collect [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>       Config file path (default: config/collect.toml)
//!   --kinds <KINDS>           Comma-separated data kinds (overrides config)
//!   --store-dir <DIR>         Snapshot directory (overrides config)
//!   --season <SEASON>         Single season to refresh (overrides config)
//!   --current-week <WEEK>     Canonical week currently in progress

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use lines_collect::config::CollectConfig;
use lines_collect::schedule::ScheduleDriver;

/// CLI arguments for lines-collect.
#[derive(Parser, Debug)]
#[command(name = "lines-collect")]
#[command(about = "Betting-line snapshot collector")]
#[command(version)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config/collect.toml")]
    config: PathBuf,

    /// Comma-separated data kinds to run (e.g. "game_lines,player_props")
    #[arg(long, value_delimiter = ',')]
    kinds: Option<Vec<String>>,

    /// Snapshot directory (overrides config file)
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// Single season to refresh (overrides the configured range)
    #[arg(long)]
    season: Option<u16>,

    /// Canonical week currently in progress for the newest season
    #[arg(long)]
    current_week: Option<u8>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = if args.config.exists() {
        match CollectConfig::from_file(&args.config) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config {:?}: {:#}", args.config, e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        CollectConfig::default()
    };

    config.apply_overrides(args.kinds, args.store_dir, args.season, args.current_week);

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    info!("lines-collect v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "League: {}, kinds: {:?}, seasons {}..={}",
        config.league, config.kinds, config.start_season, config.end_season
    );
    info!("Snapshot directory: {:?}", config.store_dir);
    if config.feed.access_token.is_none() {
        warn!("No provider access token found; requests may be rate limited");
    }

    let driver = match ScheduleDriver::new(config) {
        Ok(driver) => driver,
        Err(e) => {
            error!("Failed to initialize feed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match driver.run().await {
        Ok(stats) => {
            info!("Collection complete:\n{}", stats);
            if stats.weeks_failed > 0 {
                warn!("{} weeks failed to refresh", stats.weeks_failed);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Collection failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
