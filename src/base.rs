use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{Error, Result};

/// Atomic quantity change of one currency inside a transaction.
///
/// Direction is encoded by the type, never by the sign of the quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// Position of `currency` increases by `quantity`.
    Buy,
    /// Position decreases by `quantity`.
    Sell,
    /// Position increases; no counterparty accounting.
    Deposit,
    /// Position decreases; no counterparty accounting.
    Withdraw,
    /// Informational: the fee amount the exchange booked. Already reflected
    /// in the surrounding buy/sell magnitudes.
    Commission,
    /// Position decreases by `quantity`; an expense without offsetting buy.
    Fee,
}

/// Cost-basis projection side of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Open,
    Close,
}

/// Cost calculation method applied to a year's entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CostMethod {
    /// Weighted average: one yearly unit price from carry-in plus acquisitions.
    Wam,
    /// Moving average: unit price recomputed on every acquisition.
    Mam,
}

impl CostMethod {
    /// Parses one of the stable identifiers `"wam"` / `"mam"`.
    pub fn parse(s: &str) -> Result<Self> {
        s.parse().map_err(|_| Error::Config {
            reason: format!("unknown cost method {:?}", s),
        })
    }
}

/// A group of events sharing origin and timestamp, representing the effect of
/// one source record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub time: DateTime<Utc>,
    pub wallet_code: String,
    pub wallet_tid: i64,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub transaction_id: i64,
    pub time: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub currency: String,
    pub quantity: Decimal,
    /// Payment currency of the counterparty side of this event.
    pub base_currency: String,
    /// Cost in the payment currency; zero for unpaid events like deposits.
    pub base_quantity: Decimal,
}

/// A cost-basis projection of an event, carrying the fiat magnitude and the
/// running position of its currency immediately after the entry.
///
/// `price` is null until a calculator stamps it; null is distinct from zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: i64,
    pub transaction_id: i64,
    pub time: DateTime<Utc>,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub currency: String,
    pub quantity: Decimal,
    pub position: Decimal,
    pub fiat_currency: String,
    pub fiat_quantity: Decimal,
    pub price: Option<Decimal>,
    pub commission: Option<Decimal>,
}

/// Year-scoped summary per currency of inventory movement, unit price and
/// realized profit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub year: i32,
    pub currency: String,
    pub beginning_quantity: Decimal,
    pub open_quantity: Decimal,
    pub close_quantity: Decimal,
    pub price: Decimal,
    pub quantity: Decimal,
    pub profit: Decimal,
}

/// One point of a market price series, quoted as `base_currency` per unit of
/// `currency`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketPrice {
    pub source: String,
    pub currency: String,
    pub time: DateTime<Utc>,
    pub base_currency: String,
    pub price: Decimal,
}

/// Per-year calculation settings. The most recent config at or before a year
/// applies to that year.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YearConfig {
    pub year: i32,
    pub cost_method: CostMethod,
    /// Overrides the driver's default fiat for this year when set.
    pub fiat: Option<String>,
}

/// An event emitted by a translator, before ids and the transaction timestamp
/// are assigned by the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub event_type: EventType,
    pub currency: String,
    pub quantity: Decimal,
    pub base_currency: String,
    pub base_quantity: Decimal,
}

impl EventDraft {
    pub fn new(
        event_type: EventType,
        currency: impl Into<String>,
        quantity: Decimal,
        base_currency: impl Into<String>,
        base_quantity: Decimal,
    ) -> Self {
        Self {
            event_type,
            currency: currency.into(),
            quantity,
            base_currency: base_currency.into(),
            base_quantity,
        }
    }

    pub fn buy(
        currency: impl Into<String>,
        quantity: Decimal,
        base_currency: impl Into<String>,
        base_quantity: Decimal,
    ) -> Self {
        Self::new(EventType::Buy, currency, quantity, base_currency, base_quantity)
    }

    pub fn sell(
        currency: impl Into<String>,
        quantity: Decimal,
        base_currency: impl Into<String>,
        base_quantity: Decimal,
    ) -> Self {
        Self::new(EventType::Sell, currency, quantity, base_currency, base_quantity)
    }

    pub fn deposit(
        currency: impl Into<String>,
        quantity: Decimal,
        base_currency: impl Into<String>,
    ) -> Self {
        Self::new(EventType::Deposit, currency, quantity, base_currency, Decimal::ZERO)
    }

    pub fn withdraw(
        currency: impl Into<String>,
        quantity: Decimal,
        base_currency: impl Into<String>,
    ) -> Self {
        Self::new(EventType::Withdraw, currency, quantity, base_currency, Decimal::ZERO)
    }

    pub fn commission(
        currency: impl Into<String>,
        quantity: Decimal,
        base_currency: impl Into<String>,
        base_quantity: Decimal,
    ) -> Self {
        Self::new(EventType::Commission, currency, quantity, base_currency, base_quantity)
    }

    pub fn fee(
        currency: impl Into<String>,
        quantity: Decimal,
        base_currency: impl Into<String>,
        base_quantity: Decimal,
    ) -> Self {
        Self::new(EventType::Fee, currency, quantity, base_currency, base_quantity)
    }
}

/// A source record mapped to the canonical taxonomy: an ordered list of event
/// drafts plus the transaction description.
#[derive(Debug, Clone)]
pub struct TranslatedRecord {
    pub time: DateTime<Utc>,
    pub description: String,
    pub events: Vec<EventDraft>,
}

impl TranslatedRecord {
    pub fn new(time: DateTime<Utc>, description: impl Into<String>, events: Vec<EventDraft>) -> Self {
        Self {
            time,
            description: description.into(),
            events,
        }
    }
}

pub(crate) fn is_fiat_currency(currency: &str) -> bool {
    matches!(currency, "USD" | "EUR" | "JPY")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_strings() {
        assert_eq!(EventType::Buy.to_string(), "buy");
        assert_eq!(EventType::Sell.to_string(), "sell");
        assert_eq!(EventType::Deposit.to_string(), "deposit");
        assert_eq!(EventType::Withdraw.to_string(), "withdraw");
        assert_eq!(EventType::Commission.to_string(), "commission");
        assert_eq!(EventType::Fee.to_string(), "fee");
        assert_eq!(EntryType::Open.to_string(), "open");
        assert_eq!(EntryType::Close.to_string(), "close");
    }

    #[test]
    fn test_cost_method_parse() {
        assert_eq!(CostMethod::parse("wam").unwrap(), CostMethod::Wam);
        assert_eq!(CostMethod::parse("mam").unwrap(), CostMethod::Mam);
        assert!(matches!(CostMethod::parse("fifo"), Err(Error::Config { .. })));
    }
}
