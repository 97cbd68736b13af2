//! Wire protocol of the quotation server.
//!
//! - `frame`: envelope layout, frame encoding and stream deframing.
//! - `codec`: payload primitives (variable-length prices, float volumes, GBK names, dates).
//! - `message`: per-type request encoders and response decoders.
use clap::ValueEnum;
use strum_macros::{Display, EnumIter, IntoStaticStr};

pub mod codec;
pub mod frame;
pub mod message;

pub use frame::{Envelope, FrameReader};
pub use message::Request;

/// Closed set of message types understood by this client.
///
/// Adding a payload type means adding a variant here, which makes every
/// dispatch `match` fail to compile until it handles the new type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr, ValueEnum)]
#[clap(rename_all = "kebab-case")]
#[repr(u16)]
pub enum MessageType {
    /// Handshake sent right after the TCP connection is established.
    Connect = 0x000D,
    /// Keepalive frame written on an idle connection.
    Heartbeat = 0x0004,
    /// Number of securities listed on an exchange.
    StockCount = 0x044E,
    /// One page of the security list.
    StockList = 0x0450,
    /// Real-time five-level quotes for a batch of securities.
    StockQuote = 0x053E,
    /// Intraday minute prices for the current session.
    StockMinute = 0x051D,
    /// Tick trades of the current session.
    StockMinuteTrade = 0x0FC5,
    /// Tick trades of an earlier trading day.
    StockHistoryMinuteTrade = 0x0FB5,
    /// Candlestick bars at a given period.
    StockKline = 0x052D,
}

impl MessageType {
    /// Wire tag of the message type.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Maps a wire tag back to its message type, `None` for unknown tags.
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            0x000D => MessageType::Connect,
            0x0004 => MessageType::Heartbeat,
            0x044E => MessageType::StockCount,
            0x0450 => MessageType::StockList,
            0x053E => MessageType::StockQuote,
            0x051D => MessageType::StockMinute,
            0x0FC5 => MessageType::StockMinuteTrade,
            0x0FB5 => MessageType::StockHistoryMinuteTrade,
            0x052D => MessageType::StockKline,
            _ => return None,
        })
    }
}
