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

pub const WALLET_CODE: &str = "BITTREX";

// deserialize function for reading the US-style timestamps of the exports
fn deserialize_date_time<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<DateTime<Utc>, D::Error> {
    let raw: String = Deserialize::deserialize(d)?;
    NaiveDateTime::parse_from_str(&raw, "%m/%d/%Y %I:%M:%S %p")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
enum OrderType {
    #[serde(rename = "LIMIT_BUY")]
    LimitBuy,
    #[serde(rename = "LIMIT_SELL")]
    LimitSell,
}

// Uuid,Exchange,TimeStamp,OrderType,Limit,Quantity,QuantityRemaining,Commission,
// Price,PricePerUnit,IsConditional,Condition,ConditionTarget,ImmediateOrCancel,
// Closed,TimeInForceTypeId,TimeInForce
#[derive(Debug, Deserialize)]
pub struct BittrexOrder {
    // #[serde(rename = "Uuid")]
    // uuid: String,
    /// Market in `QUOTE-BASE` form, e.g. `BTC-ETH`.
    #[serde(rename = "Exchange")]
    exchange: String,
    // #[serde(rename = "TimeStamp", deserialize_with = "deserialize_date_time")]
    // timestamp: DateTime<Utc>,
    #[serde(rename = "OrderType")]
    order_type: OrderType,
    #[serde(rename = "Quantity", deserialize_with = "deserialize_decimal")]
    quantity: Decimal,
    /// Commission, booked in the payment currency.
    #[serde(rename = "Commission", deserialize_with = "deserialize_decimal")]
    commission: Decimal,
    /// Total in the payment currency, excluding commission.
    #[serde(rename = "Price", deserialize_with = "deserialize_decimal")]
    price: Decimal,
    #[serde(rename = "Closed", deserialize_with = "deserialize_date_time")]
    closed: DateTime<Utc>,
}

// Id,Amount,Currency,Confirmations,LastUpdated,TxId,CryptoAddress
#[derive(Debug, Deserialize)]
pub struct BittrexDeposit {
    #[serde(rename = "Amount", deserialize_with = "deserialize_decimal")]
    amount: Decimal,
    #[serde(rename = "Currency")]
    currency: String,
    #[serde(rename = "LastUpdated", deserialize_with = "deserialize_date_time")]
    last_updated: DateTime<Utc>,
}

// PaymentUuid,Currency,Amount,Address,Opened,Authorized,PendingPayment,TxCost,TxId,Canceled
#[derive(Debug, Deserialize)]
pub struct BittrexWithdrawal {
    #[serde(rename = "Currency")]
    currency: String,
    #[serde(rename = "Amount", deserialize_with = "deserialize_decimal")]
    amount: Decimal,
    #[serde(rename = "Opened", deserialize_with = "deserialize_date_time")]
    opened: DateTime<Utc>,
    #[serde(rename = "TxCost", deserialize_with = "deserialize_decimal")]
    tx_cost: Decimal,
}

/// Maps one order-history row to canonical events.
pub fn translate_order(record: &BittrexOrder) -> Result<TranslatedRecord> {
    let mut split = record.exchange.split('-');
    let (payment, trading) = match (split.next(), split.next()) {
        (Some(payment), Some(trading)) => (payment, trading),
        _ => {
            return Err(Error::structural(
                record,
                format!("invalid exchange field {:?}", record.exchange),
            ))
        }
    };

    let mut events = Vec::new();
    let description = match record.order_type {
        OrderType::LimitBuy => {
            let trading_quantity = record.quantity;
            let payment_quantity = record.price + record.commission;
            let cost = payment_quantity;
            let fee = record.commission;
            events.push(EventDraft::sell(payment, payment_quantity, payment, cost));
            events.push(EventDraft::buy(trading, trading_quantity, payment, cost));
            events.push(EventDraft::commission(payment, fee, payment, fee));
            format!("buy {}/{}", trading, payment)
        }
        OrderType::LimitSell => {
            let trading_quantity = record.quantity;
            let payment_quantity = record.price - record.commission;
            let cost = record.price;
            let fee = record.commission;
            events.push(EventDraft::sell(trading, trading_quantity, payment, cost));
            events.push(EventDraft::buy(payment, payment_quantity, payment, cost));
            events.push(EventDraft::commission(payment, fee, payment, fee));
            format!("sell {}/{}", trading, payment)
        }
    };

    Ok(TranslatedRecord::new(record.closed, description, events))
}

/// Transfers carry no counterparty cost; they are denominated in `fiat` at
/// zero so the pricer never needs a lookup for them.
pub fn translate_deposit(record: &BittrexDeposit, fiat: &str) -> TranslatedRecord {
    TranslatedRecord::new(
        record.last_updated,
        format!("deposit {}", record.currency),
        vec![EventDraft::deposit(&record.currency, record.amount, fiat)],
    )
}

pub fn translate_withdrawal(record: &BittrexWithdrawal, fiat: &str) -> TranslatedRecord {
    TranslatedRecord::new(
        record.opened,
        format!("withdraw {}", record.currency),
        vec![
            EventDraft::withdraw(&record.currency, record.amount, fiat),
            EventDraft::fee(&record.currency, record.tx_cost, fiat, Decimal::ZERO),
        ],
    )
}

/// Loads a Bittrex order-history CSV.
pub fn load_bittrex_order_history_csv(input_path: &Path) -> anyhow::Result<Vec<BittrexOrder>> {
    let file = std::fs::File::open(input_path)
        .with_context(|| format!("failed to open {}", input_path.display()))?;
    Ok(read_records(file)?)
}

pub fn import_bittrex_orders(ledger: &mut Ledger, reader: impl Read) -> Result<()> {
    for (index, record) in read_records::<BittrexOrder>(reader)?.iter().enumerate() {
        ledger.record(WALLET_CODE, index as i64, translate_order(record)?)?;
    }
    Ok(())
}

pub fn import_bittrex_deposits(ledger: &mut Ledger, reader: impl Read, fiat: &str) -> Result<()> {
    for (index, record) in read_records::<BittrexDeposit>(reader)?.iter().enumerate() {
        let code = format!("{}_D", WALLET_CODE);
        ledger.record(&code, index as i64, translate_deposit(record, fiat))?;
    }
    Ok(())
}

pub fn import_bittrex_withdrawals(ledger: &mut Ledger, reader: impl Read, fiat: &str) -> Result<()> {
    for (index, record) in read_records::<BittrexWithdrawal>(reader)?.iter().enumerate() {
        let code = format!("{}_W", WALLET_CODE);
        ledger.record(&code, index as i64, translate_withdrawal(record, fiat))?;
    }
    Ok(())
}
