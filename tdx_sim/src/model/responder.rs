//! Turns one request payload into the payload of its answer.
use bytes::Bytes;
use tdx_common::market::CODE_LEN;
use tdx_common::protocol::MessageType;
use tdx_common::protocol::codec::{PayloadReader, date_from_u32};
use tdx_common::protocol::message::STOCK_LIST_PAGE;
use tdx_common::{Exchange, KlinePeriod, Result, Security, TdxError};

use super::encode;
use super::generator::{MarketGenerator, tail_page};

/// Greeting returned for the handshake.
const WELCOME: &[u8] = b"tdx_sim ready";

fn exchange(raw: u16) -> Result<Exchange> {
    u8::try_from(raw)
        .ok()
        .and_then(Exchange::from_u8)
        .ok_or_else(|| TdxError::validation(format!("unknown exchange {}", raw)))
}

fn security(r: &mut PayloadReader<'_>) -> Result<Security> {
    let exchange = exchange(r.u16()?)?;
    Security::new(exchange, &r.ascii(CODE_LEN)?)
}

/// Builds the answer to a `kind` request carrying `payload`.
pub fn respond(kind: MessageType, payload: &[u8], market: &MarketGenerator) -> Result<Bytes> {
    let mut r = PayloadReader::new(payload);
    let body = match kind {
        MessageType::Connect => Bytes::from_static(WELCOME),
        MessageType::Heartbeat => Bytes::new(),
        MessageType::StockCount => {
            exchange(r.u16()?)?;
            encode::stock_count(market.stock_count())
        }
        MessageType::StockList => {
            let exchange = exchange(r.u16()?)?;
            let start = r.u16()?;
            encode::stock_list(&market.stocks(exchange, start, STOCK_LIST_PAGE))
        }
        MessageType::StockQuote => {
            r.skip(8)?;
            let count = r.u16()?;
            let mut quotes = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let raw = r.u8()?;
                let exchange = exchange(raw as u16)?;
                let security = Security::new(exchange, &r.ascii(CODE_LEN)?)?;
                quotes.push(market.quote(&security));
            }
            encode::quotes(&quotes)
        }
        MessageType::StockMinute => {
            let security = security(&mut r)?;
            encode::minute(&market.minute(&security))
        }
        MessageType::StockMinuteTrade => {
            let security = security(&mut r)?;
            let (start, count) = (r.u16()?, r.u16()?);
            let page = tail_page(&market.trades(&security), start, count);
            encode::minute_trades(&page, security.is_fund())
        }
        MessageType::StockHistoryMinuteTrade => {
            let date = date_from_u32(r.u32()?)?;
            let security = security(&mut r)?;
            let (start, count) = (r.u16()?, r.u16()?);
            let page = tail_page(&market.history_trades(&security, date), start, count);
            encode::history_trades(&page, security.is_fund())
        }
        MessageType::StockKline => {
            let security = security(&mut r)?;
            let raw_period = r.u16()?;
            let period = KlinePeriod::from_u16(raw_period)
                .ok_or_else(|| TdxError::validation(format!("unknown period {}", raw_period)))?;
            r.skip(2)?;
            let (start, count) = (r.u16()?, r.u16()?);
            let page = tail_page(&market.klines(&security, period), start, count);
            encode::klines(&page, period)?
        }
    };
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use chrono::{Duration, Local};
    use tdx_common::protocol::message::{
        HistoryTradeMsg, KlineMsg, MinuteTradeMsg, QuoteMsg, StockCountMsg, StockListMsg,
    };

    fn market() -> MarketGenerator {
        MarketGenerator::new(SimConfig::default().securities(1200).trades(30).bars(50))
    }

    #[test]
    fn stock_list_pages_forward() {
        let market = market();
        let req = StockListMsg::request(Exchange::Sz, 1000);
        let resp = StockListMsg::decode(&respond(req.msg_type, &req.payload, &market).unwrap())
            .unwrap();
        assert_eq!(resp.count, 200);
        assert_eq!(resp.list[0].code, "001001");

        let req = StockCountMsg::request(Exchange::Sz);
        let body = respond(req.msg_type, &req.payload, &market).unwrap();
        assert_eq!(StockCountMsg::decode(&body).unwrap().count, 1200);
    }

    #[test]
    fn trade_pages_count_back_from_the_latest() {
        let market = market();
        let sec = Security::new(Exchange::Sz, "000001").unwrap();
        let req = MinuteTradeMsg::request(Exchange::Sz, "000001", 0, 10).unwrap();
        let newest = MinuteTradeMsg::decode(&respond(req.msg_type, &req.payload, &market).unwrap(), &sec)
            .unwrap();
        assert_eq!(newest.list, market.trades(&sec)[20..]);

        let yesterday = Local::now().date_naive() - Duration::days(1);
        let req = HistoryTradeMsg::request(yesterday, Exchange::Sz, "000001", 0, 2000).unwrap();
        let body = respond(req.msg_type, &req.payload, &market).unwrap();
        assert_eq!(HistoryTradeMsg::decode(&body, &sec).unwrap().count, 2000);
    }

    #[test]
    fn kline_request_fields_are_honoured() {
        let market = market();
        let sec = Security::new(Exchange::Sh, "600000").unwrap();
        let req = KlineMsg::request(KlinePeriod::Week, Exchange::Sh, "600000", 45, 10).unwrap();
        let body = respond(req.msg_type, &req.payload, &market).unwrap();
        let page = KlineMsg::decode(&body, KlinePeriod::Week).unwrap();
        let all = market.klines(&sec, KlinePeriod::Week);
        assert_eq!(page.count, 5);
        assert_eq!(page.list[1..], all[1..5]);
    }

    #[test]
    fn quotes_answer_every_requested_security() {
        let market = market();
        let wanted = vec![
            Security::new(Exchange::Sz, "000001").unwrap(),
            Security::new(Exchange::Sh, "510300").unwrap(),
        ];
        let req = QuoteMsg::request(&wanted).unwrap();
        let quotes = QuoteMsg::decode(&respond(req.msg_type, &req.payload, &market).unwrap()).unwrap();
        let codes: Vec<_> = quotes.iter().map(|q| q.code.as_str()).collect();
        assert_eq!(codes, vec!["000001", "510300"]);
    }

    #[test]
    fn malformed_requests_are_errors() {
        let market = market();
        assert!(respond(MessageType::StockList, &[9, 0, 0, 0], &market).is_err());
        assert!(respond(MessageType::StockMinute, &[0], &market).is_err());
    }
}
