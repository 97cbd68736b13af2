//! Response payload encoders, the inverse of the client's decoders.
//!
//! Prices are written as deltas in the same chains the decoders unwind: the
//! quote fields against the latest price, the price line and trades against
//! their predecessor, candlesticks against the previous close within a page.
use bytes::{BufMut, Bytes, BytesMut};
use chrono::Timelike;
use tdx_common::KlinePeriod;
use tdx_common::market::{CODE_LEN, is_fund};
use tdx_common::model::{Kline, MinutePrice, Price, Quote, Stock, Trade};
use tdx_common::protocol::codec::{put_gbk, put_kline_time, put_varint, put_volume};
use tdx_common::Result;

fn put_code(dst: &mut BytesMut, code: &str) {
    let raw = code.as_bytes();
    let n = raw.len().min(CODE_LEN);
    dst.put_slice(&raw[..n]);
    dst.put_bytes(0, CODE_LEN - n);
}

fn put_minute_of_day(dst: &mut BytesMut, time: chrono::NaiveTime) {
    dst.put_u16_le((time.hour() * 60 + time.minute()) as u16);
}

fn len_u16(len: usize) -> u16 {
    u16::try_from(len).unwrap_or(u16::MAX)
}

/// StockCount body.
pub fn stock_count(count: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(2);
    buf.put_u16_le(count);
    buf.freeze()
}

/// StockList page body.
pub fn stock_list(stocks: &[Stock]) -> Bytes {
    let mut buf = BytesMut::with_capacity(2 + stocks.len() * 29);
    buf.put_u16_le(len_u16(stocks.len()));
    for stock in stocks {
        put_code(&mut buf, &stock.code);
        buf.put_u16_le(stock.multiple);
        put_gbk(&mut buf, &stock.name, 8);
        buf.put_bytes(0, 4);
        buf.put_u8(stock.decimal as u8);
        put_volume(&mut buf, stock.last_price);
        buf.put_bytes(0, 4);
    }
    buf.freeze()
}

/// StockQuote body.
pub fn quotes(quotes: &[Quote]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + quotes.len() * 160);
    buf.put_u16_le(0);
    buf.put_u16_le(len_u16(quotes.len()));
    for q in quotes {
        let fund = is_fund(q.exchange, &q.code);
        let rel = |p: Price| (p - q.close).to_wire(fund);
        buf.put_u8(q.exchange.as_u8());
        put_code(&mut buf, &q.code);
        buf.put_u16_le(q.active1);
        put_varint(&mut buf, q.close.to_wire(fund));
        put_varint(&mut buf, rel(q.last));
        put_varint(&mut buf, rel(q.open));
        put_varint(&mut buf, rel(q.high));
        put_varint(&mut buf, rel(q.low));
        put_varint(&mut buf, q.server_time);
        put_varint(&mut buf, 0);
        put_varint(&mut buf, q.total_hand);
        put_varint(&mut buf, q.intuition);
        put_volume(&mut buf, q.amount);
        put_varint(&mut buf, q.inside_dish);
        put_varint(&mut buf, q.outer_disc);
        put_varint(&mut buf, 0);
        put_varint(&mut buf, 0);
        for (buy, sell) in q.buy_level.iter().zip(q.sell_level.iter()) {
            put_varint(&mut buf, rel(buy.price));
            put_varint(&mut buf, rel(sell.price));
            put_varint(&mut buf, buy.number);
            put_varint(&mut buf, sell.number);
        }
        buf.put_u16_le(0);
        for _ in 0..4 {
            put_varint(&mut buf, 0);
        }
        buf.put_i16_le((q.rate * 100.0).round() as i16);
        buf.put_u16_le(q.active2);
    }
    buf.freeze()
}

/// StockMinute body; prices are deltas from the previous point.
pub fn minute(points: &[MinutePrice]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + points.len() * 6);
    buf.put_u16_le(len_u16(points.len()));
    buf.put_u16_le(0);
    let mut previous = Price(0);
    for point in points {
        put_varint(&mut buf, (point.price - previous).to_wire(false));
        put_varint(&mut buf, 0);
        put_varint(&mut buf, point.number);
        previous = point.price;
    }
    buf.freeze()
}

/// StockMinuteTrade page body.
pub fn minute_trades(trades: &[Trade], fund: bool) -> Bytes {
    let mut buf = BytesMut::with_capacity(2 + trades.len() * 10);
    buf.put_u16_le(len_u16(trades.len()));
    let mut previous = Price(0);
    for trade in trades {
        put_minute_of_day(&mut buf, trade.time);
        put_varint(&mut buf, (trade.price - previous).to_wire(fund));
        put_varint(&mut buf, trade.volume);
        put_varint(&mut buf, trade.number);
        put_varint(&mut buf, trade.status.to_wire());
        put_varint(&mut buf, 0);
        previous = trade.price;
    }
    buf.freeze()
}

/// StockHistoryMinuteTrade page body.
pub fn history_trades(trades: &[Trade], fund: bool) -> Bytes {
    let mut buf = BytesMut::with_capacity(6 + trades.len() * 10);
    buf.put_u16_le(len_u16(trades.len()));
    buf.put_bytes(0, 4);
    let mut previous = Price(0);
    for trade in trades {
        put_minute_of_day(&mut buf, trade.time);
        put_varint(&mut buf, (trade.price - previous).to_wire(fund));
        put_varint(&mut buf, trade.volume);
        put_varint(&mut buf, trade.status.to_wire());
        put_varint(&mut buf, 0);
        previous = trade.price;
    }
    buf.freeze()
}

/// Candlestick page. The first bar's open is written against zero, since
/// its predecessor is not part of the page.
pub fn klines(bars: &[Kline], period: KlinePeriod) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(2 + bars.len() * 24);
    buf.put_u16_le(len_u16(bars.len()));
    let mut base = Price(0);
    for bar in bars {
        put_kline_time(&mut buf, period, bar.time)?;
        put_varint(&mut buf, (bar.open - base).0);
        put_varint(&mut buf, (bar.close - bar.open).0);
        put_varint(&mut buf, (bar.high - bar.open).0);
        put_varint(&mut buf, (bar.low - bar.open).0);
        put_volume(&mut buf, bar.volume);
        put_volume(&mut buf, bar.amount);
        base = bar.close;
    }
    Ok(buf.freeze())
}
