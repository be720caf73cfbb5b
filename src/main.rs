mod nbb_controllers;
mod nbb_models;
mod nbb_views;

use clap::Parser;
use nbb_controllers::BoardConfig;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Terminal board showing upcoming bus arrivals for a tracked stop.
#[derive(Parser, Debug)]
#[command(name = "nbb", version, about)]
struct Args {
    /// Base URL of the arrivals API; falls back to NBB_BASE_URL.
    #[arg(long)]
    base_url: Option<String>,

    /// Stop tracked at startup.
    #[arg(long, default_value_t = 42)]
    stop: u32,

    /// Seconds between network refreshes of the snapshot.
    #[arg(long, default_value_t = 180)]
    api_refresh_secs: u64,

    /// Seconds between local re-renders of the aged snapshot.
    #[arg(long, default_value_t = 60)]
    ui_refresh_secs: u64,

    /// Maximum number of stops fetched for the search catalog.
    #[arg(long, default_value_t = 400)]
    stops_limit: usize,

    /// Render the outbound/inbound indicator for the tracked stop.
    #[arg(long)]
    show_direction: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let base_url = args
        .base_url
        .or_else(|| std::env::var("NBB_BASE_URL").ok())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

    let config = BoardConfig {
        base_url,
        initial_stop: args.stop,
        api_refresh: Duration::from_secs(args.api_refresh_secs),
        ui_refresh: Duration::from_secs(args.ui_refresh_secs),
        stops_limit: args.stops_limit,
        show_direction: args.show_direction,
    };

    nbb_controllers::run(config).await
}
