//! Simulated TDX quotation server.
//!
//! ```bash
//! tdx_sim --bind 127.0.0.1:7709 --securities 3000 --bars 2400 --silent stock-kline
//! ```
use std::time::Duration;

use clap::Parser;
use log::error;
use tdx_common::net::DEFAULT_PORT;
use tdx_common::protocol::MessageType;
use tdx_sim::{SimConfig, SimServer};

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Address to listen on.
    #[clap(long, default_value_t = format!("0.0.0.0:{}", DEFAULT_PORT))]
    bind: String,

    /// Securities listed per exchange.
    #[clap(long, default_value_t = 1500)]
    securities: u16,

    /// Tick trades in the current session.
    #[clap(long, default_value_t = 2500)]
    trades: usize,

    /// Tick trades in each past session.
    #[clap(long, default_value_t = 4500)]
    history_trades: usize,

    /// Candlesticks per security and period.
    #[clap(long, default_value_t = 2000)]
    bars: usize,

    /// Compress payloads longer than this many bytes.
    #[clap(long, default_value_t = 1024)]
    compress_over: usize,

    /// Message types to leave unanswered; repeatable.
    #[clap(long, value_enum)]
    silent: Vec<MessageType>,

    /// Disconnect clients idle for this many seconds.
    #[clap(long)]
    idle_timeout: Option<u64>,
}

fn main() {
    init_logger();
    let args = Args::parse();

    let mut config = SimConfig::default()
        .securities(args.securities)
        .trades(args.trades)
        .history_trades(args.history_trades)
        .bars(args.bars)
        .compress_over(args.compress_over);
    for kind in args.silent {
        config = config.silent(kind);
    }
    if let Some(secs) = args.idle_timeout {
        config = config.idle_timeout(Duration::from_secs(secs));
    }

    if let Err(e) = SimServer::bind(&args.bind, config).and_then(SimServer::run) {
        error!("Simulator failed: {}", e);
        std::process::exit(1);
    }
}

fn init_logger() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}
