//! Per-type request encoders and response decoders.
//!
//! Each message type is a unit struct with a `request` constructor producing
//! a [`Request`] and a `decode` function turning a response payload into its
//! typed value. Two decoders need context the response does not carry: trade
//! decoders need the [`Security`] (price scale), the candlestick decoder needs
//! the [`KlinePeriod`] (timestamp layout).
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{NaiveDate, NaiveTime};

use super::MessageType;
use super::codec::{PayloadReader, date_to_u32};
use crate::error::TdxError;
use crate::market::{CODE_LEN, Exchange, KlinePeriod, Security, is_fund, validate_code};
use crate::model::{
    Kline, KlineResp, MinutePrice, MinuteResp, Price, PriceLevel, Quote, Stock, StockCount,
    StockListResp, Trade, TradeResp, TradeStatus,
};
use crate::result::Result;

/// Securities returned per security-list page; not negotiable.
pub const STOCK_LIST_PAGE: u16 = 1000;
/// Largest minute-trade page the server answers.
pub const MAX_MINUTE_TRADE: u16 = 1800;
/// Largest history-trade page the server answers.
pub const MAX_HISTORY_TRADE: u16 = 2000;
/// Largest candlestick page the server answers.
pub const MAX_KLINE: u16 = 800;
/// Largest batch of securities in one quote request.
pub const MAX_QUOTE_BATCH: usize = 80;

/// Width of a security record in a list response.
const STOCK_RECORD_LEN: usize = 29;
/// Minutes in the morning session of the intraday price line.
const MORNING_MINUTES: u16 = 120;

/// A request ready to be stamped with an id and framed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Message type of the request and of its response.
    pub msg_type: MessageType,
    /// Encoded request payload.
    pub payload: Bytes,
}

impl Request {
    fn new(msg_type: MessageType, payload: BytesMut) -> Self {
        Self {
            msg_type,
            payload: payload.freeze(),
        }
    }
}

fn check_page(what: &str, count: u16, max: u16) -> Result<()> {
    if count > max {
        return Err(TdxError::validation(format!(
            "{} page size {} exceeds the server maximum of {}",
            what, count, max
        )));
    }
    Ok(())
}

fn put_security(dst: &mut BytesMut, exchange: Exchange, code: &str) -> Result<()> {
    validate_code(code)?;
    dst.put_u16_le(exchange.as_u8() as u16);
    dst.put_slice(code.as_bytes());
    Ok(())
}

/// Handshake written once per connection.
pub struct Connect;

impl Connect {
    pub fn request() -> Request {
        Request::new(MessageType::Connect, BytesMut::from(&[0x01u8][..]))
    }
}

/// Keepalive written on an idle connection.
pub struct Heartbeat;

impl Heartbeat {
    pub fn request() -> Request {
        Request::new(MessageType::Heartbeat, BytesMut::new())
    }
}

/// Number of securities on an exchange.
pub struct StockCountMsg;

impl StockCountMsg {
    pub fn request(exchange: Exchange) -> Request {
        let mut buf = BytesMut::with_capacity(6);
        buf.put_u16_le(exchange.as_u8() as u16);
        buf.put_slice(&[0x75, 0xC7, 0x33, 0x01]);
        Request::new(MessageType::StockCount, buf)
    }

    pub fn decode(payload: &[u8]) -> Result<StockCount> {
        let count = PayloadReader::new(payload).u16()?;
        Ok(StockCount { count })
    }
}

/// Security list, [`STOCK_LIST_PAGE`] entries per page from `start`.
pub struct StockListMsg;

impl StockListMsg {
    pub fn request(exchange: Exchange, start: u16) -> Request {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_u16_le(exchange.as_u8() as u16);
        buf.put_u16_le(start);
        Request::new(MessageType::StockList, buf)
    }

    pub fn decode(payload: &[u8]) -> Result<StockListResp> {
        let mut r = PayloadReader::new(payload);
        let count = r.u16()?;
        if r.remaining() < count as usize * STOCK_RECORD_LEN {
            return Err(TdxError::decode(format!(
                "security list announces {} records but carries {} bytes",
                count,
                r.remaining()
            )));
        }
        let mut list = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let code = r.ascii(CODE_LEN)?;
            let multiple = r.u16()?;
            let name = r.gbk(8)?;
            r.skip(4)?;
            let decimal = r.u8()? as i8;
            let last_price = r.volume()?;
            r.skip(4)?;
            list.push(Stock {
                code,
                name,
                multiple,
                decimal,
                last_price,
            });
        }
        Ok(StockListResp { count, list })
    }
}

/// Real-time five-level quotes for a batch of securities.
pub struct QuoteMsg;

impl QuoteMsg {
    pub fn request(securities: &[Security]) -> Result<Request> {
        if securities.is_empty() {
            return Err(TdxError::validation("quote request needs at least one security"));
        }
        if securities.len() > MAX_QUOTE_BATCH {
            return Err(TdxError::validation(format!(
                "quote batch of {} exceeds the maximum of {}",
                securities.len(),
                MAX_QUOTE_BATCH
            )));
        }
        let mut buf = BytesMut::with_capacity(10 + securities.len() * 7);
        buf.put_slice(&[0x05, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        buf.put_u16_le(securities.len() as u16);
        for security in securities {
            validate_code(&security.code)?;
            buf.put_u8(security.exchange.as_u8());
            buf.put_slice(security.code.as_bytes());
        }
        Ok(Request::new(MessageType::StockQuote, buf))
    }

    pub fn decode(payload: &[u8]) -> Result<Vec<Quote>> {
        let mut r = PayloadReader::new(payload);
        r.skip(2)?;
        let count = r.u16()?;
        let mut quotes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let raw_exchange = r.u8()?;
            let exchange = Exchange::from_u8(raw_exchange)
                .ok_or_else(|| TdxError::decode(format!("invalid exchange {}", raw_exchange)))?;
            let code = r.ascii(CODE_LEN)?;
            let fund = is_fund(exchange, &code);
            let active1 = r.u16()?;

            let close = Price::from_wire(r.varint()?, fund)?;
            let relative = |r: &mut PayloadReader<'_>| -> Result<Price> {
                close.checked_add(Price::from_wire(r.varint()?, fund)?)
            };
            let last = relative(&mut r)?;
            let open = relative(&mut r)?;
            let high = relative(&mut r)?;
            let low = relative(&mut r)?;
            let server_time = r.varint()?;
            r.varint()?;
            let total_hand = r.varint()?;
            let intuition = r.varint()?;
            let amount = r.volume()?;
            let inside_dish = r.varint()?;
            let outer_disc = r.varint()?;
            r.varint()?;
            r.varint()?;

            let mut buy_level = [PriceLevel::default(); 5];
            let mut sell_level = [PriceLevel::default(); 5];
            for (buy, sell) in buy_level.iter_mut().zip(sell_level.iter_mut()) {
                buy.price = relative(&mut r)?;
                sell.price = relative(&mut r)?;
                buy.number = r.varint()?;
                sell.number = r.varint()?;
            }

            r.skip(2)?;
            for _ in 0..4 {
                r.varint()?;
            }
            let rate = r.i16()? as f64 / 100.0;
            let active2 = r.u16()?;

            quotes.push(Quote {
                exchange,
                code,
                active1,
                last,
                open,
                high,
                low,
                close,
                server_time,
                total_hand,
                intuition,
                amount,
                inside_dish,
                outer_disc,
                buy_level,
                sell_level,
                rate,
                active2,
            });
        }
        Ok(quotes)
    }
}

/// Intraday price line of the current session.
pub struct MinuteMsg;

impl MinuteMsg {
    pub fn request(exchange: Exchange, code: &str) -> Result<Request> {
        let mut buf = BytesMut::with_capacity(12);
        put_security(&mut buf, exchange, code)?;
        buf.put_u32_le(0);
        Ok(Request::new(MessageType::StockMinute, buf))
    }

    pub fn decode(payload: &[u8]) -> Result<MinuteResp> {
        let mut r = PayloadReader::new(payload);
        let count = r.u16()?;
        r.skip(2)?;
        let mut list = Vec::with_capacity(count as usize);
        let mut price = Price(0);
        for i in 0..count {
            price = price.checked_add(Price::from_wire(r.varint()?, false)?)?;
            r.varint()?;
            let number = r.varint()?;
            list.push(MinutePrice {
                time: minute_slot(i),
                price,
                number,
            });
        }
        Ok(MinuteResp { count, list })
    }
}

/// Clock time of the `index`-th minute of the trading day: 09:31..=11:30
/// for the morning session, then 13:01 onwards.
pub fn minute_slot(index: u16) -> NaiveTime {
    let minutes = if index < MORNING_MINUTES {
        9 * 60 + 30 + index as u32 + 1
    } else {
        11 * 60 + index as u32 + 1
    };
    NaiveTime::from_hms_opt((minutes / 60) % 24, minutes % 60, 0).unwrap_or(NaiveTime::MIN)
}

/// Tick trades of the current session, counted back from the latest.
pub struct MinuteTradeMsg;

impl MinuteTradeMsg {
    pub fn request(exchange: Exchange, code: &str, start: u16, count: u16) -> Result<Request> {
        check_page("minute trade", count, MAX_MINUTE_TRADE)?;
        let mut buf = BytesMut::with_capacity(12);
        put_security(&mut buf, exchange, code)?;
        buf.put_u16_le(start);
        buf.put_u16_le(count);
        Ok(Request::new(MessageType::StockMinuteTrade, buf))
    }

    pub fn decode(payload: &[u8], security: &Security) -> Result<TradeResp> {
        let fund = security.is_fund();
        let mut r = PayloadReader::new(payload);
        let count = r.u16()?;
        let mut list = Vec::with_capacity(count as usize);
        let mut price = Price(0);
        for _ in 0..count {
            let time = r.minute_of_day()?;
            price = price.checked_add(Price::from_wire(r.varint()?, fund)?)?;
            let volume = r.varint()?;
            let number = r.varint()?;
            let status = TradeStatus::from_wire(r.varint()?);
            r.varint()?;
            list.push(Trade {
                time,
                price,
                volume,
                number,
                status,
            });
        }
        Ok(TradeResp { count, list })
    }
}

/// Tick trades of an earlier trading day.
///
/// The server only keeps history for days strictly before the current
/// trading day; asking for today yields an empty page.
pub struct HistoryTradeMsg;

impl HistoryTradeMsg {
    pub fn request(
        date: NaiveDate,
        exchange: Exchange,
        code: &str,
        start: u16,
        count: u16,
    ) -> Result<Request> {
        check_page("history trade", count, MAX_HISTORY_TRADE)?;
        let mut buf = BytesMut::with_capacity(16);
        buf.put_u32_le(date_to_u32(date));
        put_security(&mut buf, exchange, code)?;
        buf.put_u16_le(start);
        buf.put_u16_le(count);
        Ok(Request::new(MessageType::StockHistoryMinuteTrade, buf))
    }

    pub fn decode(payload: &[u8], security: &Security) -> Result<TradeResp> {
        let fund = security.is_fund();
        let mut r = PayloadReader::new(payload);
        let count = r.u16()?;
        r.skip(4)?;
        let mut list = Vec::with_capacity(count as usize);
        let mut price = Price(0);
        for _ in 0..count {
            let time = r.minute_of_day()?;
            price = price.checked_add(Price::from_wire(r.varint()?, fund)?)?;
            let volume = r.varint()?;
            let status = TradeStatus::from_wire(r.varint()?);
            r.varint()?;
            list.push(Trade {
                time,
                price,
                volume,
                number: 0,
                status,
            });
        }
        Ok(TradeResp { count, list })
    }
}

/// Candlesticks at a period, counted back from the latest bar.
pub struct KlineMsg;

impl KlineMsg {
    pub fn request(
        period: KlinePeriod,
        exchange: Exchange,
        code: &str,
        start: u16,
        count: u16,
    ) -> Result<Request> {
        check_page("kline", count, MAX_KLINE)?;
        let mut buf = BytesMut::with_capacity(26);
        put_security(&mut buf, exchange, code)?;
        buf.put_u16_le(period.as_u16());
        buf.put_u16_le(1);
        buf.put_u16_le(start);
        buf.put_u16_le(count);
        buf.put_bytes(0, 10);
        Ok(Request::new(MessageType::StockKline, buf))
    }

    /// Bars arrive oldest first with prices in thousandths, each relative to
    /// the previous bar's close. The first bar's `last` stays zero: its
    /// predecessor belongs to the next older page.
    pub fn decode(payload: &[u8], period: KlinePeriod) -> Result<KlineResp> {
        let mut r = PayloadReader::new(payload);
        let count = r.u16()?;
        let mut list = Vec::with_capacity(count as usize);
        let mut base = Price(0);
        for _ in 0..count {
            let time = r.kline_time(period)?;
            let open = base.checked_add(Price(r.varint()?))?;
            let close = open.checked_add(Price(r.varint()?))?;
            let high = open.checked_add(Price(r.varint()?))?;
            let low = open.checked_add(Price(r.varint()?))?;
            let volume = r.volume()?;
            let amount = r.volume()?;
            list.push(Kline {
                last: base,
                open,
                high,
                low,
                close,
                volume,
                amount,
                time,
            });
            base = close;
        }
        Ok(KlineResp { count, list })
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::protocol::codec::{put_gbk, put_kline_time, put_varint, put_volume};

    fn sz(code: &str) -> Security {
        Security::new(Exchange::Sz, code).unwrap()
    }

    #[test]
    fn stock_count_request_bytes() {
        let req = StockCountMsg::request(Exchange::Sh);
        assert_eq!(req.msg_type, MessageType::StockCount);
        assert_eq!(req.payload.as_ref(), &[0x01, 0x00, 0x75, 0xC7, 0x33, 0x01]);
        assert_eq!(StockCountMsg::decode(&[0x2C, 0x01]).unwrap().count, 300);
    }

    #[test]
    fn kline_request_layout() {
        let req = KlineMsg::request(KlinePeriod::Day, Exchange::Sz, "000001", 800, 800).unwrap();
        assert_eq!(req.payload.len(), 26);
        assert_eq!(&req.payload[..8], b"\x00\x00000001");
        assert_eq!(&req.payload[8..16], &[9, 0, 1, 0, 0x20, 0x03, 0x20, 0x03]);
    }

    #[test]
    fn page_sizes_above_the_ceiling_are_rejected() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        assert!(matches!(
            HistoryTradeMsg::request(day, Exchange::Sz, "000001", 0, 2500),
            Err(TdxError::Validation(_))
        ));
        assert!(MinuteTradeMsg::request(Exchange::Sz, "000001", 0, 1801).is_err());
        assert!(KlineMsg::request(KlinePeriod::Day, Exchange::Sz, "000001", 0, 801).is_err());
        assert!(HistoryTradeMsg::request(day, Exchange::Sz, "000001", 0, 2000).is_ok());
    }

    #[test]
    fn malformed_codes_are_rejected_before_encoding() {
        assert!(matches!(MinuteMsg::request(Exchange::Sz, "12"), Err(TdxError::Validation(_))));
        assert!(QuoteMsg::request(&[]).is_err());
    }

    #[test]
    fn stock_list_decodes_records() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(2);
        for (code, name) in [("000001", "平安银行"), ("000002", "万科A")] {
            buf.put_slice(code.as_bytes());
            buf.put_u16_le(100);
            put_gbk(&mut buf, name, 8);
            buf.put_bytes(0, 4);
            buf.put_u8(2);
            put_volume(&mut buf, 10.5);
            buf.put_bytes(0, 4);
        }
        let resp = StockListMsg::decode(&buf).unwrap();
        assert_eq!(resp.count, 2);
        assert_eq!(resp.list[0].name, "平安银行");
        assert_eq!(resp.list[1].code, "000002");
        assert_eq!(resp.list[1].last_price, 10.5);
    }

    #[test]
    fn truncated_stock_list_is_a_decode_error() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(3);
        buf.put_bytes(0, 29);
        assert!(matches!(StockListMsg::decode(&buf), Err(TdxError::Decode(_))));
    }

    #[test]
    fn kline_prices_accumulate_and_first_bar_lacks_last() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(2);
        let day1 = NaiveDate::from_ymd_opt(2024, 1, 4).unwrap().and_hms_opt(15, 0, 0).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap().and_hms_opt(15, 0, 0).unwrap();
        for (at, open, close, high, low) in [(day1, 10_000, 200, 300, -100), (day2, -100, 50, 80, -20)] {
            put_kline_time(&mut buf, KlinePeriod::Day, at).unwrap();
            for v in [open, close, high, low] {
                put_varint(&mut buf, v);
            }
            put_volume(&mut buf, 1000.0);
            put_volume(&mut buf, 2000.0);
        }

        let resp = KlineMsg::decode(&buf, KlinePeriod::Day).unwrap();
        let (a, b) = (&resp.list[0], &resp.list[1]);
        assert_eq!((a.last, a.open, a.close, a.high, a.low), (Price(0), Price(10_000), Price(10_200), Price(10_300), Price(9_900)));
        assert_eq!(b.last, a.close);
        assert_eq!((b.open, b.close), (Price(10_100), Price(10_150)));
        assert_eq!(b.time, day2);
    }

    #[test]
    fn trade_prices_scale_with_the_security() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(1);
        buf.put_u16_le(9 * 60 + 31);
        for v in [1234, 5, 2, 1, 0] {
            put_varint(&mut buf, v);
        }
        let stock = MinuteTradeMsg::decode(&buf, &sz("000001")).unwrap();
        let fund = MinuteTradeMsg::decode(&buf, &sz("159915")).unwrap();
        assert_eq!(stock.list[0].price, Price(12_340));
        assert_eq!(fund.list[0].price, Price(1_234));
        assert_eq!(stock.list[0].status, TradeStatus::Sell);
        assert_eq!(stock.list[0].time.to_string(), "09:31:00");
    }

    #[test]
    fn out_of_range_trade_price_is_a_decode_error() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(1);
        buf.put_u16_le(9 * 60 + 31);
        buf.put_u8(0xBF);
        buf.put_bytes(0xFF, 8);
        buf.put_u8(0x00);
        buf.put_bytes(0, 4);
        let err = MinuteTradeMsg::decode(&buf, &sz("000001")).unwrap_err();
        assert!(matches!(err, TdxError::Decode(_)), "{err:?}");
    }

    #[test]
    fn kline_price_overflow_is_a_decode_error() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(2);
        let at = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap().and_hms_opt(15, 0, 0).unwrap();
        for _ in 0..2 {
            put_kline_time(&mut buf, KlinePeriod::Day, at).unwrap();
            for v in [i64::MAX, 0, 0, 0] {
                put_varint(&mut buf, v);
            }
            put_volume(&mut buf, 1.0);
            put_volume(&mut buf, 1.0);
        }
        let err = KlineMsg::decode(&buf, KlinePeriod::Day).unwrap_err();
        assert!(matches!(err, TdxError::Decode(_)), "{err:?}");
    }

    #[test]
    fn history_trades_skip_the_header_gap() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(2);
        buf.put_bytes(0, 4);
        for (t, p, v, s) in [(570u16, 1000i64, 3i64, 0i64), (571, -2, 4, 1)] {
            buf.put_u16_le(t);
            for x in [p, v, s, 0] {
                put_varint(&mut buf, x);
            }
        }
        let resp = HistoryTradeMsg::decode(&buf, &sz("000001")).unwrap();
        assert_eq!(resp.count, 2);
        assert_eq!(resp.list[1].price, Price(9_980));
        assert_eq!(resp.list[1].number, 0);
    }

    #[test]
    fn minute_slots_skip_the_lunch_break() {
        assert_eq!(minute_slot(0).to_string(), "09:31:00");
        assert_eq!(minute_slot(119).to_string(), "11:30:00");
        assert_eq!(minute_slot(120).to_string(), "13:01:00");
        assert_eq!(minute_slot(239).to_string(), "15:00:00");
    }
}
