//! Command-line arguments for the quotation client.
use chrono::NaiveDate;
use clap::{Args as ClapArgs, Parser, Subcommand};
use tdx_common::{Exchange, KlinePeriod, Security};

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Server address, `host` or `host:port`; the port defaults to 7709.
    #[clap(long, default_value = "119.147.212.81")]
    pub server: String,

    /// Per-request timeout in milliseconds.
    #[clap(long, default_value_t = 2000)]
    pub timeout_ms: u64,

    /// Re-dial when the connection drops.
    #[clap(long)]
    pub redial: bool,

    /// Dump every frame in hex at debug level.
    #[clap(long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// What to fetch.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Number of securities on an exchange.
    Count {
        #[clap(long, value_enum)]
        exchange: Exchange,
    },
    /// Security list, one page or all of it.
    List {
        #[clap(long, value_enum)]
        exchange: Exchange,
        #[clap(long, default_value_t = 0)]
        start: u16,
        /// Page through the whole list.
        #[clap(long)]
        all: bool,
    },
    /// Real-time quotes, e.g. `quote sz000001 sh600000`.
    Quote {
        #[clap(required = true)]
        securities: Vec<Security>,
    },
    /// Intraday price line.
    Minute { security: Security },
    /// Tick trades of the current session.
    Trades {
        security: Security,
        #[command(flatten)]
        page: Page,
    },
    /// Tick trades of an earlier session.
    History {
        security: Security,
        /// Session date, `YYYY-MM-DD`.
        #[clap(long)]
        date: NaiveDate,
        #[command(flatten)]
        page: Page,
    },
    /// Candlesticks.
    Kline {
        security: Security,
        #[clap(long, value_enum, default_value_t = KlinePeriod::Day)]
        period: KlinePeriod,
        #[command(flatten)]
        page: Page,
    },
    /// Poll quotes until Ctrl+C.
    Watch {
        #[clap(required = true)]
        securities: Vec<Security>,
        /// Pause between polls in milliseconds.
        #[clap(long, default_value_t = 3000)]
        interval_ms: u64,
    },
}

/// Paging options shared by the series commands.
#[derive(Debug, ClapArgs)]
pub struct Page {
    /// Entries to skip, counted back from the latest.
    #[clap(long, default_value_t = 0)]
    pub start: u16,
    /// Entries to fetch.
    #[clap(long, default_value_t = 100)]
    pub count: u16,
    /// Fetch every page.
    #[clap(long)]
    pub all: bool,
}
