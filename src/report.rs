//! Report writers for calculated balances and stamped entries.

use std::error::Error;
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::base::{Balance, Entry};
use crate::ledger::Ledger;

fn rounded_for_display(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn format_local<Tz: TimeZone>(time: DateTime<Utc>, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    time.with_timezone(tz).format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn save_balances_to_csv(balances: &[Balance], output_path: &Path) -> Result<(), Box<dyn Error>> {
    let mut wtr = csv::Writer::from_path(output_path)?;

    #[derive(Serialize)]
    struct CsvBalance<'a> {
        #[serde(rename = "Year")]
        year: i32,
        #[serde(rename = "Currency")]
        currency: &'a str,
        #[serde(rename = "Beginning Quantity")]
        beginning_quantity: Decimal,
        #[serde(rename = "Open Quantity")]
        open_quantity: Decimal,
        #[serde(rename = "Close Quantity")]
        close_quantity: Decimal,
        #[serde(rename = "Price")]
        price: Decimal,
        #[serde(rename = "Quantity")]
        quantity: Decimal,
        #[serde(rename = "Profit")]
        profit: Decimal,
    }

    for balance in balances {
        wtr.serialize(CsvBalance {
            year: balance.year,
            currency: &balance.currency,
            beginning_quantity: balance.beginning_quantity,
            open_quantity: balance.open_quantity,
            close_quantity: balance.close_quantity,
            price: rounded_for_display(balance.price),
            quantity: balance.quantity,
            profit: rounded_for_display(balance.profit),
        })?;
    }

    Ok(())
}

pub fn save_entries_to_csv<Tz: TimeZone>(
    entries: &[Entry],
    tz: &Tz,
    output_path: &Path,
) -> Result<(), Box<dyn Error>>
where
    Tz::Offset: std::fmt::Display,
{
    let mut wtr = csv::Writer::from_path(output_path)?;

    #[derive(Serialize)]
    struct CsvEntry<'a> {
        #[serde(rename = "Time")]
        time: String,
        #[serde(rename = "Type")]
        entry_type: &'a str,
        #[serde(rename = "Currency")]
        currency: &'a str,
        #[serde(rename = "Quantity")]
        quantity: Decimal,
        #[serde(rename = "Position")]
        position: Decimal,
        #[serde(rename = "Fiat Currency")]
        fiat_currency: &'a str,
        #[serde(rename = "Fiat Quantity")]
        fiat_quantity: Decimal,
        #[serde(rename = "Price")]
        price: Option<Decimal>,
        #[serde(rename = "Commission")]
        commission: Option<Decimal>,
    }

    for entry in entries {
        wtr.serialize(CsvEntry {
            time: format_local(entry.time, tz),
            entry_type: match entry.entry_type {
                crate::base::EntryType::Open => "open",
                crate::base::EntryType::Close => "close",
            },
            currency: &entry.currency,
            quantity: entry.quantity,
            position: entry.position,
            fiat_currency: &entry.fiat_currency,
            fiat_quantity: rounded_for_display(entry.fiat_quantity),
            price: entry.price.map(rounded_for_display),
            commission: entry.commission.map(rounded_for_display),
        })?;
    }

    Ok(())
}

/// Serializes the whole ledger (transactions, events, entries, balances).
pub fn ledger_to_json(ledger: &Ledger) -> serde_json::Result<String> {
    serde_json::to_string_pretty(ledger)
}
