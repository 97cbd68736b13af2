//! Typed results decoded from server responses.
//!
//! All types derive `Serialize` so callers (and the CLI) can emit them as JSON.
use std::fmt;
use std::ops::Sub;

use chrono::{NaiveDateTime, NaiveTime};
use serde::Serialize;

use crate::error::TdxError;
use crate::market::Exchange;
use crate::result::Result;

/// Price in thousandths of the quote currency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Price(pub i64);

impl Price {
    /// Converts a wire delta to thousandths. Stocks are priced in hundredths
    /// on the wire, funds already in thousandths. Fails with a decode error
    /// when the scaled value does not fit.
    pub fn from_wire(raw: i64, fund: bool) -> Result<Self> {
        if fund {
            return Ok(Price(raw));
        }
        raw.checked_mul(10)
            .map(Price)
            .ok_or_else(|| TdxError::decode(format!("price delta {} out of range", raw)))
    }

    /// Applies a delta, failing with a decode error on overflow.
    pub fn checked_add(self, delta: Price) -> Result<Price> {
        self.0
            .checked_add(delta.0)
            .map(Price)
            .ok_or_else(|| TdxError::decode(format!("price {} + {} out of range", self.0, delta.0)))
    }

    /// Inverse of [`Price::from_wire`].
    pub fn to_wire(self, fund: bool) -> i64 {
        if fund { self.0 } else { self.0 / 10 }
    }

    /// Value in currency units.
    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 1000.0
    }
}

impl Sub for Price {
    type Output = Price;

    fn sub(self, rhs: Price) -> Price {
        Price(self.0 - rhs.0)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:03}", sign, abs / 1000, abs % 1000)
    }
}

/// Number of securities listed on an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StockCount {
    pub count: u16,
}

/// One entry of the security list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stock {
    /// Six-digit code.
    pub code: String,
    /// Display name.
    pub name: String,
    /// Shares per lot.
    pub multiple: u16,
    /// Number of price decimals.
    pub decimal: i8,
    /// Previous close.
    pub last_price: f64,
}

/// One page (or the aggregate) of the security list.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StockListResp {
    pub count: u16,
    pub list: Vec<Stock>,
}

/// One level of the order book.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PriceLevel {
    pub price: Price,
    pub number: i64,
}

/// Real-time snapshot of one security.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub exchange: Exchange,
    pub code: String,
    pub active1: u16,
    /// Previous close.
    pub last: Price,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    /// Latest price.
    pub close: Price,
    /// Server clock as sent, an opaque integer.
    pub server_time: i64,
    /// Total volume in lots.
    pub total_hand: i64,
    /// Volume of the latest trade.
    pub intuition: i64,
    /// Turnover.
    pub amount: f64,
    /// Volume traded at the bid.
    pub inside_dish: i64,
    /// Volume traded at the ask.
    pub outer_disc: i64,
    pub buy_level: [PriceLevel; 5],
    pub sell_level: [PriceLevel; 5],
    /// Speed of change, percent.
    pub rate: f64,
    pub active2: u16,
}

/// One minute of the intraday price line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MinutePrice {
    pub time: NaiveTime,
    pub price: Price,
    pub number: i64,
}

/// Intraday price line of the current session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MinuteResp {
    pub count: u16,
    pub list: Vec<MinutePrice>,
}

/// Aggressor side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Buy,
    Sell,
    Neutral,
}

impl TradeStatus {
    /// Maps the wire flag; anything but 0 or 1 is neutral.
    pub fn from_wire(value: i64) -> Self {
        match value {
            0 => TradeStatus::Buy,
            1 => TradeStatus::Sell,
            _ => TradeStatus::Neutral,
        }
    }

    /// Inverse of [`TradeStatus::from_wire`].
    pub fn to_wire(self) -> i64 {
        match self {
            TradeStatus::Buy => 0,
            TradeStatus::Sell => 1,
            TradeStatus::Neutral => 2,
        }
    }
}

/// One tick-level trade.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    pub time: NaiveTime,
    pub price: Price,
    /// Volume in lots.
    pub volume: i64,
    /// Number of orders; zero for history trades, which do not carry it.
    pub number: i64,
    pub status: TradeStatus,
}

/// One page (or the aggregate) of tick trades.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TradeResp {
    pub count: u16,
    pub list: Vec<Trade>,
}

/// One candlestick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Kline {
    /// Close of the preceding bar. Zero for the first bar of a page until
    /// the next older page has been fetched.
    pub last: Price,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: f64,
    pub amount: f64,
    pub time: NaiveDateTime,
}

/// One page (or the aggregate) of candlesticks, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KlineResp {
    pub count: u16,
    pub list: Vec<Kline>,
}
