//! Caller-facing API: one method per data category.
//!
//! Every method blocks the calling thread until its response arrives or the
//! request times out; any number of threads may call into one [`Client`]
//! at the same time. The `*_all` methods page through an endpoint until a
//! short page comes back, and have `*_all_with` forms taking an [`Abort`].
use std::sync::Arc;

use chrono::NaiveDate;
use log::info;
use tdx_common::model::{
    Kline, KlineResp, MinuteResp, Quote, Stock, StockCount, StockListResp, Trade, TradeResp,
};
use tdx_common::net::with_default_port;
use tdx_common::protocol::message::{
    HistoryTradeMsg, KlineMsg, MAX_HISTORY_TRADE, MAX_KLINE, MAX_MINUTE_TRADE, MinuteMsg,
    MinuteTradeMsg, QuoteMsg, STOCK_LIST_PAGE, StockCountMsg, StockListMsg,
};
use tdx_common::{Exchange, KlinePeriod, Request, Result, Security};

use crate::cancel::Abort;
use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::correlator::{Correlator, FrameSink};
use crate::dispatch::Dispatcher;
use crate::paging::{Accumulate, Paginator, no_stitch, saturating_count};
use crate::pending::PendingTable;
use crate::response::{DecodeContext, Response};

/// Session with one quotation server.
pub struct Client {
    correlator: Correlator,
}

impl Client {
    /// Connects to `addr` with default settings. A missing port means 7709.
    pub fn connect(addr: &str) -> Result<Self> {
        Self::connect_with(addr, ClientConfig::default())
    }

    /// Connects to `addr` with `config`.
    pub fn connect_with(addr: &str, config: ClientConfig) -> Result<Self> {
        let addr = with_default_port(addr);
        let pending = Arc::new(PendingTable::new());
        let dispatcher = Dispatcher::new(pending.clone(), config.debug);
        let connection = Connection::open(&addr, config.clone(), dispatcher)?;
        info!("Client ready on {}", connection.addr());
        Ok(Self::with_sink(Arc::new(connection), pending, &config))
    }

    /// Builds a client over a custom transport. The transport must feed every
    /// inbound envelope to a [`Dispatcher`] sharing `pending`.
    pub fn with_sink(sink: Arc<dyn FrameSink>, pending: Arc<PendingTable>, config: &ClientConfig) -> Self {
        let correlator =
            Correlator::new(sink, pending, config.request_timeout).with_debug(config.debug);
        Self { correlator }
    }

    /// Requests currently waiting for a response.
    pub fn in_flight(&self) -> usize {
        self.correlator.pending().len()
    }

    /// `true` after [`Client::close`], or once the connection was lost with
    /// redial disabled. Every request fails with `ConnectionClosed` from then on.
    pub fn is_closed(&self) -> bool {
        self.correlator.is_closed()
    }

    /// Closes the connection; waiting callers get `ConnectionClosed`.
    pub fn close(&self) {
        self.correlator.close("client closed");
    }

    fn call(&self, request: Request, context: Option<DecodeContext>, abort: &Abort) -> Result<Response> {
        self.correlator.send(request, context, abort)
    }

    /// Number of securities listed on `exchange`.
    pub fn stock_count(&self, exchange: Exchange) -> Result<StockCount> {
        self.call(StockCountMsg::request(exchange), None, &Abort::none())?
            .into_stock_count()
    }

    /// One page of the security list, starting at `start`.
    pub fn stock_list(&self, exchange: Exchange, start: u16) -> Result<StockListResp> {
        self.stock_list_page(exchange, start, &Abort::none())
    }

    fn stock_list_page(&self, exchange: Exchange, start: u16, abort: &Abort) -> Result<StockListResp> {
        self.call(StockListMsg::request(exchange, start), None, abort)?
            .into_stock_list()
    }

    /// The whole security list of `exchange`.
    pub fn stock_all(&self, exchange: Exchange) -> Result<Vec<Stock>> {
        self.stock_all_with(exchange, &Abort::none())
    }

    /// [`Client::stock_all`] under `abort`.
    pub fn stock_all_with(&self, exchange: Exchange, abort: &Abort) -> Result<Vec<Stock>> {
        Paginator::new(STOCK_LIST_PAGE, Accumulate::Append).run(
            abort,
            |start, _| Ok(self.stock_list_page(exchange, start, abort)?.list),
            no_stitch,
        )
    }

    /// Real-time quotes, at most 80 securities per call.
    pub fn stock_quotes(&self, securities: &[Security]) -> Result<Vec<Quote>> {
        self.call(QuoteMsg::request(securities)?, None, &Abort::none())?
            .into_quotes()
    }

    /// Intraday price line of the current session.
    pub fn stock_minute(&self, exchange: Exchange, code: &str) -> Result<MinuteResp> {
        self.call(MinuteMsg::request(exchange, code)?, None, &Abort::none())?
            .into_minute()
    }

    /// Tick trades of the current session, `count` (at most 1800) of them
    /// ending `start` trades before the latest.
    pub fn stock_minute_trade(
        &self,
        exchange: Exchange,
        code: &str,
        start: u16,
        count: u16,
    ) -> Result<TradeResp> {
        self.minute_trade_page(exchange, code, start, count, &Abort::none())
    }

    fn minute_trade_page(
        &self,
        exchange: Exchange,
        code: &str,
        start: u16,
        count: u16,
        abort: &Abort,
    ) -> Result<TradeResp> {
        let request = MinuteTradeMsg::request(exchange, code, start, count)?;
        let context = DecodeContext::Security(Security::new(exchange, code)?);
        self.call(request, Some(context), abort)?.into_minute_trade()
    }

    /// Every tick trade of the current session, oldest first.
    ///
    /// Trades printed while the pages are being fetched may be missed or
    /// counted twice.
    pub fn stock_minute_trade_all(&self, exchange: Exchange, code: &str) -> Result<TradeResp> {
        self.stock_minute_trade_all_with(exchange, code, &Abort::none())
    }

    /// [`Client::stock_minute_trade_all`] under `abort`.
    pub fn stock_minute_trade_all_with(
        &self,
        exchange: Exchange,
        code: &str,
        abort: &Abort,
    ) -> Result<TradeResp> {
        let list = Paginator::new(MAX_MINUTE_TRADE, Accumulate::Prepend).run(
            abort,
            |start, count| Ok(self.minute_trade_page(exchange, code, start, count, abort)?.list),
            no_stitch,
        )?;
        Ok(trade_resp(list))
    }

    /// Tick trades of the session on `date`, which must be before the
    /// current trading day. At most 2000 per call.
    pub fn stock_history_minute_trade(
        &self,
        date: NaiveDate,
        exchange: Exchange,
        code: &str,
        start: u16,
        count: u16,
    ) -> Result<TradeResp> {
        self.history_trade_page(date, exchange, code, start, count, &Abort::none())
    }

    fn history_trade_page(
        &self,
        date: NaiveDate,
        exchange: Exchange,
        code: &str,
        start: u16,
        count: u16,
        abort: &Abort,
    ) -> Result<TradeResp> {
        let request = HistoryTradeMsg::request(date, exchange, code, start, count)?;
        let context = DecodeContext::Security(Security::new(exchange, code)?);
        self.call(request, Some(context), abort)?.into_history_trade()
    }

    /// Every tick trade of the session on `date`.
    ///
    /// Pages are appended in request order, so the result runs newest page
    /// first, each page oldest first.
    pub fn stock_history_minute_trade_all(
        &self,
        date: NaiveDate,
        exchange: Exchange,
        code: &str,
    ) -> Result<TradeResp> {
        self.stock_history_minute_trade_all_with(date, exchange, code, &Abort::none())
    }

    /// [`Client::stock_history_minute_trade_all`] under `abort`.
    pub fn stock_history_minute_trade_all_with(
        &self,
        date: NaiveDate,
        exchange: Exchange,
        code: &str,
        abort: &Abort,
    ) -> Result<TradeResp> {
        let list = Paginator::new(MAX_HISTORY_TRADE, Accumulate::Append).run(
            abort,
            |start, count| {
                Ok(self
                    .history_trade_page(date, exchange, code, start, count, abort)?
                    .list)
            },
            no_stitch,
        )?;
        Ok(trade_resp(list))
    }

    /// `count` (at most 800) candlesticks at `period`, ending `start` bars
    /// before the latest, oldest first.
    pub fn stock_kline(
        &self,
        period: KlinePeriod,
        exchange: Exchange,
        code: &str,
        start: u16,
        count: u16,
    ) -> Result<KlineResp> {
        self.kline_page(period, exchange, code, start, count, &Abort::none())
    }

    fn kline_page(
        &self,
        period: KlinePeriod,
        exchange: Exchange,
        code: &str,
        start: u16,
        count: u16,
        abort: &Abort,
    ) -> Result<KlineResp> {
        let request = KlineMsg::request(period, exchange, code, start, count)?;
        self.call(request, Some(DecodeContext::Period(period)), abort)?
            .into_kline()
    }

    /// Every candlestick at `period`, oldest first, with `last` filled in
    /// across page boundaries. The oldest bar keeps a zero `last`.
    pub fn stock_kline_all(&self, period: KlinePeriod, exchange: Exchange, code: &str) -> Result<KlineResp> {
        self.stock_kline_all_with(period, exchange, code, &Abort::none())
    }

    /// [`Client::stock_kline_all`] under `abort`.
    pub fn stock_kline_all_with(
        &self,
        period: KlinePeriod,
        exchange: Exchange,
        code: &str,
        abort: &Abort,
    ) -> Result<KlineResp> {
        let list = Paginator::new(MAX_KLINE, Accumulate::Prepend).run(
            abort,
            |start, count| Ok(self.kline_page(period, exchange, code, start, count, abort)?.list),
            link_kline_pages,
        )?;
        Ok(KlineResp {
            count: saturating_count(list.len()),
            list,
        })
    }
}

/// The oldest bar of the newer page takes its `last` from the close of the
/// newest bar of the older page.
fn link_kline_pages(newer: &mut [Kline], older: &[Kline]) {
    if let (Some(first), Some(previous)) = (newer.first_mut(), older.last()) {
        first.last = previous.close;
    }
}

fn trade_resp(list: Vec<Trade>) -> TradeResp {
    TradeResp {
        count: saturating_count(list.len()),
        list,
    }
}

macro_rules! kline_periods {
    ($($period:ident => $page:ident, $all:ident;)*) => {
        impl Client {
            $(
                #[doc = concat!("[`Client::stock_kline`] at [`KlinePeriod::", stringify!($period), "`].")]
                pub fn $page(&self, exchange: Exchange, code: &str, start: u16, count: u16) -> Result<KlineResp> {
                    self.stock_kline(KlinePeriod::$period, exchange, code, start, count)
                }

                #[doc = concat!("[`Client::stock_kline_all`] at [`KlinePeriod::", stringify!($period), "`].")]
                pub fn $all(&self, exchange: Exchange, code: &str) -> Result<KlineResp> {
                    self.stock_kline_all(KlinePeriod::$period, exchange, code)
                }
            )*
        }
    };
}

kline_periods! {
    Minute => stock_kline_minute, stock_kline_minute_all;
    FiveMinute => stock_kline_5minute, stock_kline_5minute_all;
    FifteenMinute => stock_kline_15minute, stock_kline_15minute_all;
    ThirtyMinute => stock_kline_30minute, stock_kline_30minute_all;
    Hour => stock_kline_hour, stock_kline_hour_all;
    Day => stock_kline_day, stock_kline_day_all;
    Week => stock_kline_week, stock_kline_week_all;
    Month => stock_kline_month, stock_kline_month_all;
    Quarter => stock_kline_quarter, stock_kline_quarter_all;
    Year => stock_kline_year, stock_kline_year_all;
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}
