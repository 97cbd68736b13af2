//! Simulator settings.
use std::time::Duration;

use tdx_common::protocol::MessageType;

/// Sizes of the synthetic data set and behaviour switches.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Securities listed per exchange.
    pub securities: u16,
    /// Tick trades in the current session of every security.
    pub trades: usize,
    /// Tick trades in each past session.
    pub history_trades: usize,
    /// Candlesticks available per security and period.
    pub bars: usize,
    /// Payloads longer than this are zlib-compressed.
    pub compress_over: usize,
    /// Message types that are read but never answered.
    pub silent: Vec<MessageType>,
    /// Clients idle for longer than this are disconnected.
    pub idle_timeout: Option<Duration>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            securities: 1500,
            trades: 2500,
            history_trades: 4500,
            bars: 2000,
            compress_over: 1024,
            silent: Vec::new(),
            idle_timeout: None,
        }
    }
}

impl SimConfig {
    /// Securities listed per exchange.
    #[must_use]
    pub fn securities(mut self, count: u16) -> Self {
        self.securities = count;
        self
    }

    /// Trade ticks per security today.
    #[must_use]
    pub fn trades(mut self, count: usize) -> Self {
        self.trades = count;
        self
    }

    /// Trade ticks per security on a past day.
    #[must_use]
    pub fn history_trades(mut self, count: usize) -> Self {
        self.history_trades = count;
        self
    }

    /// Candlesticks per security and period.
    #[must_use]
    pub fn bars(mut self, count: usize) -> Self {
        self.bars = count;
        self
    }

    /// Payloads longer than this are sent zlib-compressed.
    #[must_use]
    pub fn compress_over(mut self, bytes: usize) -> Self {
        self.compress_over = bytes;
        self
    }

    /// Stop answering `kind`.
    #[must_use]
    pub fn silent(mut self, kind: MessageType) -> Self {
        self.silent.push(kind);
        self
    }

    /// Drop clients that stay silent this long.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }
}
