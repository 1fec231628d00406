use std::io::Read;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};

use crate::base::{EventDraft, TranslatedRecord};
use crate::csvutil::{deserialize_decimal, read_records};
use crate::error::{Error, Result};
use crate::ledger::Ledger;

pub const WALLET_CODE: &str = "POLONIEX";

// deserialize function for reading the exports' UTC timestamps
fn deserialize_date_time<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<DateTime<Utc>, D::Error> {
    let raw: String = Deserialize::deserialize(d)?;
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
enum TradeType {
    Buy,
    Sell,
}

// Date,Market,Category,Type,Price,Amount,Total,Fee,Order Number,
// Base Total Less Fee,Quote Total Less Fee,Fee Currency,Fee Total
#[derive(Debug, Deserialize)]
pub struct PoloniexTrade {
    #[serde(rename = "Date", deserialize_with = "deserialize_date_time")]
    date: DateTime<Utc>,
    /// Pair in `TRADING/PAYMENT` form, e.g. `ETH/BTC`.
    #[serde(rename = "Market")]
    market: String,
    // #[serde(rename = "Category")]
    // category: String,
    #[serde(rename = "Type")]
    trade_type: TradeType,
    #[serde(rename = "Price", deserialize_with = "deserialize_decimal")]
    price: Decimal,
    /// Trading-currency quantity.
    #[serde(rename = "Amount", deserialize_with = "deserialize_decimal")]
    amount: Decimal,
    /// Payment-currency quantity.
    #[serde(rename = "Total", deserialize_with = "deserialize_decimal")]
    total: Decimal,
    // #[serde(rename = "Fee")]
    // fee: String, // percentage
    // #[serde(rename = "Order Number")]
    // order_number: String,
    #[serde(rename = "Base Total Less Fee", deserialize_with = "deserialize_decimal")]
    base_total_less_fee: Decimal,
    #[serde(rename = "Quote Total Less Fee", deserialize_with = "deserialize_decimal")]
    quote_total_less_fee: Decimal,
    #[serde(rename = "Fee Currency")]
    fee_currency: String,
    // #[serde(rename = "Fee Total")]
    // fee_total: String,
}

// Date,Currency,Amount,Address,Status
#[derive(Debug, Deserialize)]
pub struct PoloniexDeposit {
    #[serde(rename = "Date", deserialize_with = "deserialize_date_time")]
    date: DateTime<Utc>,
    #[serde(rename = "Currency")]
    currency: String,
    #[serde(rename = "Amount", deserialize_with = "deserialize_decimal")]
    amount: Decimal,
}

// Date,Currency,Amount,Fee Deducted,Amount - Fee,Address,Status
#[derive(Debug, Deserialize)]
pub struct PoloniexWithdrawal {
    #[serde(rename = "Date", deserialize_with = "deserialize_date_time")]
    date: DateTime<Utc>,
    #[serde(rename = "Currency")]
    currency: String,
    #[serde(rename = "Fee Deducted", deserialize_with = "deserialize_decimal")]
    fee_deducted: Decimal,
    #[serde(rename = "Amount - Fee", deserialize_with = "deserialize_decimal")]
    amount_minus_fee: Decimal,
}

// date,currency,amount,wallet
#[derive(Debug, Deserialize)]
pub struct PoloniexDistribution {
    #[serde(rename = "date", deserialize_with = "deserialize_date_time")]
    date: DateTime<Utc>,
    #[serde(rename = "currency")]
    currency: String,
    #[serde(rename = "amount", deserialize_with = "deserialize_decimal")]
    amount: Decimal,
}

/// Maps one trade row to canonical events.
///
/// The "Base Total Less Fee" and "Quote Total Less Fee" column names are
/// suspected to be swapped upstream: "quote" holds the trading-currency
/// delta and "base" the payment-currency delta. The compensation below is
/// deliberate; see the regression test before changing it.
pub fn translate_trade(record: &PoloniexTrade) -> Result<TranslatedRecord> {
    let mut split = record.market.split('/');
    let (trading, payment) = match (split.next(), split.next()) {
        (Some(trading), Some(payment)) => (trading, payment),
        _ => {
            return Err(Error::structural(
                record,
                format!("invalid market field {:?}", record.market),
            ))
        }
    };

    let trading_quantity = record.amount;
    let payment_quantity = record.total;

    let commission_currency = record.fee_currency.as_str();
    let (commission_quantity, payment_commission_quantity) = if commission_currency == trading {
        let commission = trading_quantity - record.quote_total_less_fee.abs();
        (commission, record.price * commission)
    } else if commission_currency == payment {
        let commission = payment_quantity - record.base_total_less_fee.abs();
        (commission, commission)
    } else {
        return Err(Error::structural(
            record,
            format!(
                "fee currency {} is neither {} nor {}",
                commission_currency, trading, payment
            ),
        ));
    };

    let mut events = Vec::new();
    let description = match record.trade_type {
        TradeType::Buy => {
            let trading_received = record.quote_total_less_fee.abs();
            let cost = payment_quantity;
            events.push(EventDraft::sell(payment, payment_quantity, payment, cost));
            events.push(EventDraft::buy(trading, trading_received, payment, cost));
            events.push(EventDraft::commission(
                commission_currency,
                commission_quantity,
                payment,
                payment_commission_quantity,
            ));
            format!(
                "buy {}/{} w/ {} {}",
                trading, payment, commission_quantity, commission_currency
            )
        }
        TradeType::Sell => {
            let payment_received = record.base_total_less_fee.abs();
            let cost = payment_quantity;
            events.push(EventDraft::sell(trading, trading_quantity, payment, cost));
            events.push(EventDraft::buy(payment, payment_received, payment, cost));
            events.push(EventDraft::commission(
                commission_currency,
                commission_quantity,
                payment,
                payment_commission_quantity,
            ));
            format!(
                "sell {}/{} w/ {} {}",
                trading, payment, commission_quantity, commission_currency
            )
        }
    };

    Ok(TranslatedRecord::new(record.date, description, events))
}

pub fn translate_deposit(record: &PoloniexDeposit, fiat: &str) -> TranslatedRecord {
    TranslatedRecord::new(
        record.date,
        format!("deposit {}", record.currency),
        vec![EventDraft::deposit(&record.currency, record.amount, fiat)],
    )
}

pub fn translate_withdrawal(record: &PoloniexWithdrawal, fiat: &str) -> TranslatedRecord {
    TranslatedRecord::new(
        record.date,
        format!("withdraw {}", record.currency),
        vec![
            EventDraft::withdraw(&record.currency, record.amount_minus_fee, fiat),
            EventDraft::fee(&record.currency, record.fee_deducted, fiat, Decimal::ZERO),
        ],
    )
}

/// Distributions (airdrops and the like) are zero-cost acquisitions.
pub fn translate_distribution(record: &PoloniexDistribution, fiat: &str) -> TranslatedRecord {
    TranslatedRecord::new(
        record.date,
        format!("distribution {}", record.currency),
        vec![EventDraft::buy(
            &record.currency,
            record.amount,
            fiat,
            Decimal::ZERO,
        )],
    )
}

/// Loads a Poloniex trade-history CSV.
pub fn load_poloniex_trades_csv(input_path: &Path) -> anyhow::Result<Vec<PoloniexTrade>> {
    let file = std::fs::File::open(input_path)
        .with_context(|| format!("failed to open {}", input_path.display()))?;
    Ok(read_records(file)?)
}

pub fn import_poloniex_trades(ledger: &mut Ledger, reader: impl Read) -> Result<()> {
    for (index, record) in read_records::<PoloniexTrade>(reader)?.iter().enumerate() {
        ledger.record(WALLET_CODE, index as i64, translate_trade(record)?)?;
    }
    Ok(())
}

pub fn import_poloniex_deposits(ledger: &mut Ledger, reader: impl Read, fiat: &str) -> Result<()> {
    for (index, record) in read_records::<PoloniexDeposit>(reader)?.iter().enumerate() {
        let code = format!("{}_D", WALLET_CODE);
        ledger.record(&code, index as i64, translate_deposit(record, fiat))?;
    }
    Ok(())
}

pub fn import_poloniex_withdrawals(
    ledger: &mut Ledger,
    reader: impl Read,
    fiat: &str,
) -> Result<()> {
    for (index, record) in read_records::<PoloniexWithdrawal>(reader)?.iter().enumerate() {
        let code = format!("{}_W", WALLET_CODE);
        ledger.record(&code, index as i64, translate_withdrawal(record, fiat))?;
    }
    Ok(())
}

pub fn import_poloniex_distributions(
    ledger: &mut Ledger,
    reader: impl Read,
    fiat: &str,
) -> Result<()> {
    for (index, record) in read_records::<PoloniexDistribution>(reader)?.iter().enumerate() {
        let code = format!("{}_A", WALLET_CODE);
        ledger.record(&code, index as i64, translate_distribution(record, fiat))?;
    }
    Ok(())
}
