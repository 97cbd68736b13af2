//! Typed outcome of one request, and the context some decoders need.
use strum::IntoStaticStr;
use tdx_common::model::{KlineResp, MinuteResp, Quote, StockCount, StockListResp, TradeResp};
use tdx_common::protocol::MessageType;
use tdx_common::protocol::message::{
    HistoryTradeMsg, KlineMsg, MinuteMsg, MinuteTradeMsg, QuoteMsg, StockCountMsg, StockListMsg,
};
use tdx_common::{KlinePeriod, Result, Security, TdxError};

/// Out-of-band information supplied at send time and needed to interpret the
/// response, which does not carry it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeContext {
    /// Trade prices are scaled per security.
    Security(Security),
    /// Candlestick timestamps are laid out per period.
    Period(KlinePeriod),
}

/// Decoded value of one response.
#[derive(Debug, Clone, PartialEq, IntoStaticStr)]
pub enum Response {
    /// Number of securities on an exchange.
    StockCount(StockCount),
    /// One page of the security list.
    StockList(StockListResp),
    /// Snapshots with a five-level book, one per requested security.
    Quotes(Vec<Quote>),
    /// Today's minute line.
    Minute(MinuteResp),
    /// One page of today's trade ticks.
    MinuteTrade(TradeResp),
    /// One page of a past day's trade ticks.
    HistoryTrade(TradeResp),
    /// One page of candlesticks.
    Kline(KlineResp),
}

macro_rules! into_variant {
    ($($method:ident => $variant:ident($ty:ty)),* $(,)?) => {
        impl Response {
            $(
                #[doc = concat!("Unwraps a [`Response::", stringify!($variant), "`].")]
                pub fn $method(self) -> Result<$ty> {
                    match self {
                        Response::$variant(value) => Ok(value),
                        other => Err(TdxError::UnexpectedResponse {
                            expected: stringify!($variant),
                            actual: other.name(),
                        }),
                    }
                }
            )*
        }
    };
}

into_variant! {
    into_stock_count => StockCount(StockCount),
    into_stock_list => StockList(StockListResp),
    into_quotes => Quotes(Vec<Quote>),
    into_minute => Minute(MinuteResp),
    into_minute_trade => MinuteTrade(TradeResp),
    into_history_trade => HistoryTrade(TradeResp),
    into_kline => Kline(KlineResp),
}

impl Response {
    /// Variant name, for diagnostics.
    pub fn name(&self) -> &'static str {
        self.into()
    }
}

/// Decodes `payload` as a response of type `kind`.
///
/// Acknowledgement types carry no value and yield `Ok(None)`. The match is
/// exhaustive on purpose: a new [`MessageType`] does not compile until it is
/// handled here.
pub fn decode_payload(
    kind: MessageType,
    payload: &[u8],
    context: Option<&DecodeContext>,
) -> Result<Option<Response>> {
    let response = match kind {
        MessageType::Connect | MessageType::Heartbeat => return Ok(None),
        MessageType::StockCount => Response::StockCount(StockCountMsg::decode(payload)?),
        MessageType::StockList => Response::StockList(StockListMsg::decode(payload)?),
        MessageType::StockQuote => Response::Quotes(QuoteMsg::decode(payload)?),
        MessageType::StockMinute => Response::Minute(MinuteMsg::decode(payload)?),
        MessageType::StockMinuteTrade => {
            Response::MinuteTrade(MinuteTradeMsg::decode(payload, security(kind, context)?)?)
        }
        MessageType::StockHistoryMinuteTrade => {
            Response::HistoryTrade(HistoryTradeMsg::decode(payload, security(kind, context)?)?)
        }
        MessageType::StockKline => Response::Kline(KlineMsg::decode(payload, period(kind, context)?)?),
    };
    Ok(Some(response))
}

fn security(kind: MessageType, context: Option<&DecodeContext>) -> Result<&Security> {
    match context {
        Some(DecodeContext::Security(security)) => Ok(security),
        other => Err(TdxError::decode(format!(
            "{} needs a security context, got {:?}",
            kind, other
        ))),
    }
}

fn period(kind: MessageType, context: Option<&DecodeContext>) -> Result<KlinePeriod> {
    match context {
        Some(DecodeContext::Period(period)) => Ok(*period),
        other => Err(TdxError::decode(format!(
            "{} needs a period context, got {:?}",
            kind, other
        ))),
    }
}
