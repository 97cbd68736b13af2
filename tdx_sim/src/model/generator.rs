//! Synthetic market data.
//!
//! Every series is a random walk drawn from an RNG seeded by the security
//! and the series it belongs to, so repeated page requests see the same
//! underlying data and a paginating client can stitch it back together.
//! Live quotes are the exception: they keep walking from the last price on
//! every request, shared by all clients, like the original quote generator.
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use chrono::{Duration, Local, Months, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tdx_common::model::{Kline, MinutePrice, Price, PriceLevel, Quote, Stock, Trade, TradeStatus};
use tdx_common::protocol::codec::session_close;
use tdx_common::protocol::message::minute_slot;
use tdx_common::{Exchange, KlinePeriod, Security};

use crate::config::SimConfig;

/// Minutes in one trading session.
const SESSION_MINUTES: usize = 240;

fn rng_for(security: &Security, series: &str) -> StdRng {
    let mut hasher = DefaultHasher::new();
    security.hash(&mut hasher);
    series.hash(&mut hasher);
    StdRng::seed_from_u64(hasher.finish())
}

/// Smallest price step: one hundredth for stocks, one thousandth for funds.
fn tick(security: &Security) -> i64 {
    if security.is_fund() { 1 } else { 10 }
}

fn opening_price(security: &Security) -> Price {
    let mut rng = rng_for(security, "open");
    Price(rng.random_range(500..5_000) * 10)
}

fn walk(rng: &mut StdRng, price: Price, step: i64) -> Price {
    let next = price.0 + step * rng.random_range(-2..=2);
    Price(next.max(step * 100))
}

/// Code of the `index`-th listed security.
pub fn listed_code(exchange: Exchange, index: u16) -> String {
    let base = match exchange {
        Exchange::Sz => 1,
        Exchange::Sh => 600_000,
        Exchange::Bj => 830_000,
    };
    format!("{:06}", base + index as u32)
}

/// `count` entries of `all` counted back from its end, skipping the newest
/// `start`. The page itself stays in ascending order.
pub fn tail_page<T: Clone>(all: &[T], start: u16, count: u16) -> Vec<T> {
    let end = all.len().saturating_sub(start as usize);
    let begin = end.saturating_sub(count as usize);
    all[begin..end].to_vec()
}

/// Source of every answer the simulator gives.
pub struct MarketGenerator {
    config: SimConfig,
    live: Mutex<HashMap<Security, Price>>,
}

impl MarketGenerator {
    /// Market sized by `config`.
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            live: Mutex::new(HashMap::new()),
        }
    }

    /// Sizes this market was built with.
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Listed securities per exchange.
    pub fn stock_count(&self) -> u16 {
        self.config.securities
    }

    /// Listing entry `index` of `exchange`.
    pub fn stock(&self, exchange: Exchange, index: u16) -> Stock {
        let code = listed_code(exchange, index);
        let last_price = match Security::new(exchange, &code) {
            Ok(security) => opening_price(&security).as_f64(),
            Err(_) => 0.0,
        };
        Stock {
            code,
            name: format!("模拟{:04}", index % 10_000),
            multiple: 100,
            decimal: 2,
            last_price,
        }
    }

    /// Up to `count` listing entries from `start`.
    pub fn stocks(&self, exchange: Exchange, start: u16, count: u16) -> Vec<Stock> {
        let end = start.saturating_add(count).min(self.config.securities);
        (start.min(end)..end).map(|i| self.stock(exchange, i)).collect()
    }

    /// Next tick of the live quote for `security`.
    pub fn quote(&self, security: &Security) -> Quote {
        let step = tick(security);
        let mut rng = rand::rng();
        let open = opening_price(security);
        let close = {
            let mut live = match self.live.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let price = live.entry(security.clone()).or_insert(open);
            *price = Price((price.0 + step * rng.random_range(-3..=3)).max(step * 100));
            *price
        };
        let high = Price(open.0.max(close.0) + step * rng.random_range(0..5));
        let low = Price(open.0.min(close.0) - step * rng.random_range(0..5));
        let level = |depth: i64, side: i64, rng: &mut rand::rngs::ThreadRng| PriceLevel {
            price: Price(close.0 + side * step * depth),
            number: rng.random_range(1..2_000),
        };
        let mut buy_level = [PriceLevel::default(); 5];
        let mut sell_level = [PriceLevel::default(); 5];
        for depth in 0..5 {
            buy_level[depth] = level(depth as i64 + 1, -1, &mut rng);
            sell_level[depth] = level(depth as i64 + 1, 1, &mut rng);
        }
        let total_hand = rng.random_range(10_000..1_000_000);
        let inside_dish = total_hand / 2;
        let now = Local::now().time();
        Quote {
            exchange: security.exchange,
            code: security.code.clone(),
            active1: 1,
            last: open,
            open,
            high,
            low,
            close,
            server_time: (now.hour() * 10_000_000 + now.minute() * 100_000 + now.second() * 1_000)
                as i64,
            total_hand,
            intuition: rng.random_range(1..500),
            amount: (total_hand * 100) as f64,
            inside_dish,
            outer_disc: total_hand - inside_dish,
            buy_level,
            sell_level,
            rate: rng.random_range(-100..100) as f64 / 100.0,
            active2: 1,
        }
    }

    /// Intraday price line of the current session.
    pub fn minute(&self, security: &Security) -> Vec<MinutePrice> {
        let mut rng = rng_for(security, "minute");
        let mut price = opening_price(security);
        (0..SESSION_MINUTES)
            .map(|i| {
                price = walk(&mut rng, price, 10);
                MinutePrice {
                    time: minute_slot(i as u16),
                    price,
                    number: rng.random_range(1..5_000),
                }
            })
            .collect()
    }

    /// Every tick of the current session, oldest first.
    pub fn trades(&self, security: &Security) -> Vec<Trade> {
        let mut rng = rng_for(security, "trades");
        self.tick_series(security, &mut rng, self.config.trades, true)
    }

    /// Every tick of the session on `date`, oldest first. Empty for the
    /// current day and later.
    pub fn history_trades(&self, security: &Security, date: NaiveDate) -> Vec<Trade> {
        if date >= Local::now().date_naive() {
            return Vec::new();
        }
        let mut rng = rng_for(security, &format!("history-{}", date));
        self.tick_series(security, &mut rng, self.config.history_trades, false)
    }

    fn tick_series(
        &self,
        security: &Security,
        rng: &mut StdRng,
        count: usize,
        with_orders: bool,
    ) -> Vec<Trade> {
        let step = tick(security);
        let mut price = opening_price(security);
        (0..count)
            .map(|i| {
                price = walk(rng, price, step);
                Trade {
                    time: minute_slot((i * SESSION_MINUTES / count.max(1)) as u16),
                    price,
                    volume: rng.random_range(1..500),
                    number: if with_orders { rng.random_range(1..20) } else { 0 },
                    status: TradeStatus::from_wire(rng.random_range(0..3)),
                }
            })
            .collect()
    }

    /// Every candlestick at `period`, oldest first, with `last` filled in
    /// from the preceding bar.
    pub fn klines(&self, security: &Security, period: KlinePeriod) -> Vec<Kline> {
        let mut rng = rng_for(security, &format!("kline-{}", period));
        let mut previous = Price(0);
        let mut close = opening_price(security);
        (0..self.config.bars)
            .filter_map(|i| {
                let time = bar_time(period, i)?;
                let open = walk(&mut rng, close, 10);
                close = walk(&mut rng, open, 10);
                let high = Price(open.0.max(close.0) + 10 * rng.random_range(0..5));
                let low = Price(open.0.min(close.0) - 10 * rng.random_range(0..5));
                let volume: i64 = rng.random_range(1_000..50_000);
                let bar = Kline {
                    last: previous,
                    open,
                    high,
                    low,
                    close,
                    volume: volume as f64,
                    amount: (volume * close.0 / 1_000) as f64,
                    time,
                };
                previous = close;
                Some(bar)
            })
            .collect()
    }
}

/// Timestamp of the `index`-th bar at `period`.
fn bar_time(period: KlinePeriod, index: usize) -> Option<NaiveDateTime> {
    let first_day = NaiveDate::from_ymd_opt(2016, 1, 4)?;
    let step_minutes = match period {
        KlinePeriod::Minute => 1,
        KlinePeriod::FiveMinute => 5,
        KlinePeriod::FifteenMinute => 15,
        KlinePeriod::ThirtyMinute => 30,
        KlinePeriod::Hour => 60,
        KlinePeriod::Day => {
            return Some((first_day + Duration::days(index as i64)).and_time(session_close()));
        }
        KlinePeriod::Week => {
            return Some((first_day + Duration::weeks(index as i64)).and_time(session_close()));
        }
        KlinePeriod::Month => return months_after(first_day, index),
        KlinePeriod::Quarter => return months_after(first_day, index * 3),
        KlinePeriod::Year => return months_after(first_day, index * 12),
    };
    let open = first_day.and_time(NaiveTime::from_hms_opt(9, 30, 0)?);
    Some(open + Duration::minutes((index as i64 + 1) * step_minutes))
}

fn months_after(first_day: NaiveDate, months: usize) -> Option<NaiveDateTime> {
    let date = first_day.checked_add_months(Months::new(u32::try_from(months).ok()?))?;
    Some(date.and_time(session_close()))
}
