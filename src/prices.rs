//! Append-only market price store with nearest-forward lookup.

use std::collections::BTreeMap;
use std::io::Read;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use log::debug;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::base::{is_fiat_currency, Event, MarketPrice};
use crate::error::Error;

/// Width of the forward lookup window. Most sources publish daily closes; a
/// 48-hour window absorbs weekends and late ingest without back-dating. This
/// cap is a hard invariant and must never silently widen.
pub const PRICE_WINDOW_HOURS: i64 = 48;

/// Time-indexed mapping `(currency, base_currency, time) -> price`.
#[derive(Debug, Default)]
pub struct PriceBook {
    prices: BTreeMap<(String, String), Vec<MarketPrice>>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends price points, keeping each `(currency, base_currency)` series
    /// ordered by time. Points at or before the latest stored time of their
    /// series are skipped; history is never rewritten.
    pub fn append(&mut self, mut prices: Vec<MarketPrice>) {
        prices.sort_by(|a, b| {
            (a.currency.as_str(), a.base_currency.as_str(), a.time)
                .cmp(&(b.currency.as_str(), b.base_currency.as_str(), b.time))
        });
        for price in prices {
            let series = self
                .prices
                .entry((price.currency.clone(), price.base_currency.clone()))
                .or_default();
            if series.last().is_some_and(|latest| price.time <= latest.time) {
                debug!(
                    "skipping {}/{} price at {}: not after latest",
                    price.currency, price.base_currency, price.time
                );
                continue;
            }
            series.push(price);
        }
    }

    pub fn latest(&self, currency: &str, base_currency: &str) -> Option<&MarketPrice> {
        self.prices
            .get(&(currency.to_owned(), base_currency.to_owned()))
            .and_then(|series| series.last())
    }

    /// The earliest record with `time >= t` within the lookup window.
    pub fn lookup(
        &self,
        currency: &str,
        base_currency: &str,
        time: DateTime<Utc>,
    ) -> crate::error::Result<&MarketPrice> {
        let unavailable = || Error::PriceUnavailable {
            currency: currency.to_owned(),
            base_currency: base_currency.to_owned(),
            time,
        };

        let series = self
            .prices
            .get(&(currency.to_owned(), base_currency.to_owned()))
            .ok_or_else(unavailable)?;
        let index = series.partition_point(|p| p.time < time);
        let price = series.get(index).ok_or_else(unavailable)?;
        if price.time >= time + Duration::hours(PRICE_WINDOW_HOURS) {
            return Err(unavailable());
        }
        Ok(price)
    }

    /// Fiat value of an event: the event's own base quantity when it is
    /// already denominated in `fiat`, otherwise base quantity times the
    /// looked-up `base_currency -> fiat` price at the event time.
    pub fn fiat_value(&self, event: &Event, fiat: &str) -> crate::error::Result<Decimal> {
        if event.base_currency == fiat {
            return Ok(event.base_quantity);
        }
        let price = self.lookup(&event.base_currency, fiat, event.time)?;
        Ok(price.price * event.base_quantity)
    }
}

// Date,Open,High,Low,Close,Adj Close,Volume
#[derive(Debug, Deserialize)]
struct DailyCloseRecord {
    #[serde(rename = "Date")]
    date: String,
    // #[serde(rename = "Open")]
    // open: String,
    // #[serde(rename = "High")]
    // high: String,
    // #[serde(rename = "Low")]
    // low: String,
    #[serde(rename = "Close")]
    close: String,
    // #[serde(rename = "Adj Close")]
    // adj_close: String,
    // #[serde(rename = "Volume")]
    // volume: String,
}

/// Loads a daily-close history CSV into price points for one currency pair.
///
/// Rows with a `null` close are skipped. Fiat/fiat pairs close at the end of
/// the New York trading day; crypto pairs close just before midnight UTC.
pub fn load_daily_close_csv(
    reader: impl Read,
    source: &str,
    currency: &str,
    base_currency: &str,
) -> Result<Vec<MarketPrice>> {
    let records: Vec<DailyCloseRecord> = crate::csvutil::read_records(reader)?;

    let close_time = if is_fiat_currency(currency) && is_fiat_currency(base_currency) {
        NaiveTime::from_hms_opt(21, 59, 59).unwrap() // 16:59:59 EST
    } else {
        NaiveTime::from_hms_opt(23, 59, 56).unwrap()
    };

    let mut prices = Vec::new();
    for record in records {
        if record.close == "null" {
            debug!("skipping {} {}: no close", currency, record.date);
            continue;
        }
        let date = NaiveDate::parse_from_str(&record.date, "%Y-%m-%d")
            .with_context(|| format!("invalid date {:?}", record.date))?;
        let time = date.and_time(close_time).and_utc();
        let price = Decimal::from_str(&record.close)
            .with_context(|| format!("invalid price {:?}", record.close))?;
        prices.push(MarketPrice {
            source: source.to_owned(),
            currency: currency.to_owned(),
            time,
            base_currency: base_currency.to_owned(),
            price,
        });
    }
    Ok(prices)
}
