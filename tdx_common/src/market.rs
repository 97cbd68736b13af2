//! Exchanges, security codes and candlestick periods shared by client and simulator.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::error::TdxError;

/// Market a security is listed on; the discriminant is the wire value.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    ValueEnum,
    Display,
    EnumString,
    EnumIter,
    Hash,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
)]
#[clap(rename_all = "lower")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    /// Shenzhen.
    Sz = 0,
    /// Shanghai.
    Sh = 1,
    /// Beijing.
    Bj = 2,
}

impl Exchange {
    /// Wire value of the exchange.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Inverse of [`Exchange::as_u8`].
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Exchange::Sz),
            1 => Some(Exchange::Sh),
            2 => Some(Exchange::Bj),
            _ => None,
        }
    }
}

/// Length of a bare security code on the wire.
pub const CODE_LEN: usize = 6;

/// Checks that `code` is a bare six-digit security code.
pub fn validate_code(code: &str) -> Result<(), TdxError> {
    if code.len() == CODE_LEN && code.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(TdxError::validation(format!(
            "security code must be {} ASCII digits, got {:?}",
            CODE_LEN, code
        )))
    }
}

/// Splits a prefixed code such as `sz000001` into its exchange and bare code.
pub fn split_code(full: &str) -> Result<(Exchange, String), TdxError> {
    let full = full.trim().to_ascii_lowercase();
    if full.len() != CODE_LEN + 2 {
        return Err(TdxError::validation(format!(
            "expected an exchange-prefixed code like sz000001, got {:?}",
            full
        )));
    }
    let (prefix, code) = full.split_at(2);
    let exchange = prefix
        .parse::<Exchange>()
        .map_err(|_| TdxError::validation(format!("unknown exchange prefix {:?}", prefix)))?;
    validate_code(code)?;
    Ok((exchange, code.to_string()))
}

/// A security on a given exchange; the out-of-band context some trade
/// responses need to be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Security {
    /// Listing exchange.
    pub exchange: Exchange,
    /// Bare six-digit code.
    pub code: String,
}

impl Security {
    /// Validates `code` and pairs it with `exchange`.
    pub fn new(exchange: Exchange, code: &str) -> Result<Self, TdxError> {
        validate_code(code)?;
        Ok(Self {
            exchange,
            code: code.to_string(),
        })
    }

    /// Whether prices of this security are carried in thousandths.
    pub fn is_fund(&self) -> bool {
        is_fund(self.exchange, &self.code)
    }
}

impl std::fmt::Display for Security {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.exchange, self.code)
    }
}

impl std::str::FromStr for Security {
    type Err = TdxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (exchange, code) = split_code(s)?;
        Ok(Self { exchange, code })
    }
}

/// Funds and ETFs quote in thousandths on the wire, everything else in hundredths.
pub fn is_fund(exchange: Exchange, code: &str) -> bool {
    match exchange {
        Exchange::Sh => code.starts_with("50") || code.starts_with("51") || code.starts_with("56") || code.starts_with("58"),
        Exchange::Sz => code.starts_with("15") || code.starts_with("16"),
        Exchange::Bj => false,
    }
}

/// Candlestick resolution; the discriminant is the wire value.
#[allow(missing_docs)]
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    ValueEnum,
    Display,
    EnumString,
    EnumIter,
    Hash,
    Eq,
    PartialEq,
)]
#[clap(rename_all = "lower")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum KlinePeriod {
    #[strum(serialize = "5minute")]
    #[value(name = "5minute")]
    FiveMinute = 0,
    #[strum(serialize = "15minute")]
    #[value(name = "15minute")]
    FifteenMinute = 1,
    #[strum(serialize = "30minute")]
    #[value(name = "30minute")]
    ThirtyMinute = 2,
    Hour = 3,
    Week = 5,
    Month = 6,
    Minute = 7,
    Day = 9,
    Quarter = 10,
    Year = 11,
}

impl KlinePeriod {
    /// Wire value of the period.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Inverse of [`KlinePeriod::as_u16`].
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            0 => KlinePeriod::FiveMinute,
            1 => KlinePeriod::FifteenMinute,
            2 => KlinePeriod::ThirtyMinute,
            3 => KlinePeriod::Hour,
            5 => KlinePeriod::Week,
            6 => KlinePeriod::Month,
            7 => KlinePeriod::Minute,
            9 => KlinePeriod::Day,
            10 => KlinePeriod::Quarter,
            11 => KlinePeriod::Year,
            _ => return None,
        })
    }

    /// Intraday bars carry a packed date plus minute-of-day instead of `YYYYMMDD`.
    pub fn is_intraday(self) -> bool {
        matches!(
            self,
            KlinePeriod::Minute
                | KlinePeriod::FiveMinute
                | KlinePeriod::FifteenMinute
                | KlinePeriod::ThirtyMinute
                | KlinePeriod::Hour
        )
    }
}
