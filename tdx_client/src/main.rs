//! Quotation client CLI: fetches one data category from a TDX server and
//! prints it as JSON.
//!
//! ```bash
//! tdx_client --server 119.147.212.81 kline sz000001 --period week --all
//! tdx_client watch sh600000 sz000001 --interval-ms 1000
//! ```
mod args;

use std::time::Duration;

use clap::Parser;
use crossbeam_channel::select;
use log::{error, info, warn};
use serde::Serialize;
use tdx_client::{Cancel, Client, ClientConfig};
use tdx_common::{Result, Security};

use crate::args::{Args, Command};

fn main() {
    init_logger();
    let args = Args::parse();
    if let Err(e) = run(args) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let config = ClientConfig::default()
        .request_timeout(Duration::from_millis(args.timeout_ms))
        .redial(args.redial)
        .debug(args.debug);
    let client = Client::connect_with(&args.server, config)?;

    match args.command {
        Command::Count { exchange } => print(&client.stock_count(exchange)?),
        Command::List { exchange, start, all } => {
            if all {
                print(&client.stock_all(exchange)?)
            } else {
                print(&client.stock_list(exchange, start)?)
            }
        }
        Command::Quote { securities } => print(&client.stock_quotes(&securities)?),
        Command::Minute { security } => {
            print(&client.stock_minute(security.exchange, &security.code)?)
        }
        Command::Trades { security, page } => {
            let (exchange, code) = (security.exchange, &security.code);
            if page.all {
                print(&client.stock_minute_trade_all(exchange, code)?)
            } else {
                print(&client.stock_minute_trade(exchange, code, page.start, page.count)?)
            }
        }
        Command::History { security, date, page } => {
            let (exchange, code) = (security.exchange, &security.code);
            if page.all {
                print(&client.stock_history_minute_trade_all(date, exchange, code)?)
            } else {
                print(&client.stock_history_minute_trade(date, exchange, code, page.start, page.count)?)
            }
        }
        Command::Kline { security, period, page } => {
            let (exchange, code) = (security.exchange, &security.code);
            if page.all {
                print(&client.stock_kline_all(period, exchange, code)?)
            } else {
                print(&client.stock_kline(period, exchange, code, page.start, page.count)?)
            }
        }
        Command::Watch { securities, interval_ms } => {
            watch(&client, &securities, Duration::from_millis(interval_ms))
        }
    }
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Prints a quote snapshot every `interval` until Ctrl+C.
fn watch(client: &Client, securities: &[Security], interval: Duration) -> Result<()> {
    let cancel = Cancel::new();
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            info!("Ctrl+C received. Stopping...");
            cancel.cancel();
        }) {
            warn!("Ctrl+C handler not installed: {}", e);
        }
    }

    let stop = cancel.signal();
    info!("Watching {} securities. Press Ctrl+C to exit.", securities.len());
    while !cancel.is_cancelled() {
        for quote in client.stock_quotes(securities)? {
            println!("{}", serde_json::to_string(&quote)?);
        }
        select! {
            recv(stop) -> _ => break,
            default(interval) => {}
        }
    }
    Ok(())
}

fn init_logger() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}
