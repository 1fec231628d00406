//! Importer for hand-maintained activity rows covering exchanges without a
//! dedicated dialect: one row per action with an explicit price column.

use std::io::Read;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};

use crate::base::{EventDraft, TranslatedRecord};
use crate::csvutil::{deserialize_decimal, deserialize_opt_decimal, read_records};
use crate::error::{Error, Result};
use crate::ledger::Ledger;

pub const WALLET_CODE: &str = "CUSTOM";

fn deserialize_date_time<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<DateTime<Utc>, D::Error> {
    let raw: String = Deserialize::deserialize(d)?;
    NaiveDateTime::parse_from_str(&raw, "%Y/%m/%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S"))
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
enum Action {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
    #[serde(rename = "PAY")]
    Pay,
    #[serde(rename = "MINING")]
    Mining,
    #[serde(rename = "SENDFEE")]
    SendFee,
    #[serde(rename = "TIP")]
    Tip,
    #[serde(rename = "REDUCE")]
    Reduce,
    #[serde(rename = "BONUS")]
    Bonus,
    #[serde(rename = "LENDING")]
    Lending,
    #[serde(rename = "STAKING")]
    Staking,
}

// Timestamp,Action,Source,Base,Volume,Price,Counter,Fee,FeeCcy,Comment
#[derive(Debug, Deserialize)]
pub struct CustomRecord {
    #[serde(rename = "Timestamp", deserialize_with = "deserialize_date_time")]
    timestamp: DateTime<Utc>,
    #[serde(rename = "Action")]
    action: Action,
    // #[serde(rename = "Source")]
    // source: String,
    /// Traded currency.
    #[serde(rename = "Base")]
    base: String,
    #[serde(rename = "Volume", deserialize_with = "deserialize_decimal")]
    volume: Decimal,
    /// Payment per traded unit; empty when the trade price is unknown.
    #[serde(rename = "Price", deserialize_with = "deserialize_opt_decimal")]
    price: Option<Decimal>,
    /// Payment currency.
    #[serde(rename = "Counter")]
    counter: String,
    #[serde(rename = "Fee", deserialize_with = "deserialize_decimal")]
    fee: Decimal,
    #[serde(rename = "FeeCcy")]
    fee_currency: String,
    // #[serde(rename = "Comment")]
    // comment: String,
}

/// Maps one custom row to canonical events.
pub fn translate(record: &CustomRecord) -> Result<TranslatedRecord> {
    let trading_currency = record.base.as_str();
    let trading_quantity = record.volume;
    let payment_currency = record.counter.as_str();
    let payment_quantity = record
        .price
        .map_or(Decimal::ZERO, |price| price * trading_quantity);
    let fee_currency = record.fee_currency.as_str();
    let fee_quantity = record.fee;

    let mut events = Vec::new();
    let mut description = String::new();

    match record.action {
        Action::Buy => {
            if fee_currency == payment_currency {
                let trading = trading_quantity;
                let payment = payment_quantity + fee_quantity;
                let cost = payment_quantity + fee_quantity;
                events.push(EventDraft::sell(payment_currency, payment, payment_currency, cost));
                events.push(EventDraft::buy(trading_currency, trading, payment_currency, cost));
                events.push(EventDraft::commission(
                    fee_currency,
                    fee_quantity,
                    payment_currency,
                    fee_quantity,
                ));
            } else if fee_currency == trading_currency {
                let trading = trading_quantity - fee_quantity;
                let payment = payment_quantity;
                let cost = payment_quantity;
                let price = record.price.ok_or_else(|| {
                    Error::structural(record, "price is not specified")
                })?;
                events.push(EventDraft::sell(payment_currency, payment, payment_currency, cost));
                events.push(EventDraft::buy(trading_currency, trading, payment_currency, cost));
                events.push(EventDraft::commission(
                    fee_currency,
                    fee_quantity,
                    payment_currency,
                    price * fee_quantity,
                ));
            } else {
                return Err(Error::structural(
                    record,
                    format!(
                        "fee currency is neither {} nor {}",
                        payment_currency, trading_currency
                    ),
                ));
            }
            description = format!("buy {}/{}", trading_currency, payment_currency);
        }
        Action::Sell => {
            if fee_currency == payment_currency {
                let trading = trading_quantity;
                let payment = payment_quantity - fee_quantity;
                let price = record.price.ok_or_else(|| {
                    Error::structural(record, "price is not specified")
                })?;
                let cost = price * trading_quantity;
                events.push(EventDraft::sell(trading_currency, trading, payment_currency, cost));
                events.push(EventDraft::buy(payment_currency, payment, payment_currency, cost));
                events.push(EventDraft::commission(
                    fee_currency,
                    fee_quantity,
                    payment_currency,
                    fee_quantity,
                ));
            } else if fee_currency == trading_currency {
                let price = record.price.ok_or_else(|| {
                    Error::structural(record, "price is not specified")
                })?;
                let trading = trading_quantity + fee_quantity;
                let payment = payment_quantity;
                let cost = price * trading;
                events.push(EventDraft::sell(trading_currency, trading, payment_currency, cost));
                events.push(EventDraft::buy(payment_currency, payment, payment_currency, cost));
                events.push(EventDraft::commission(
                    fee_currency,
                    fee_quantity,
                    payment_currency,
                    price * fee_quantity,
                ));
            } else {
                return Err(Error::structural(
                    record,
                    format!(
                        "fee currency is neither {} nor {}",
                        payment_currency, trading_currency
                    ),
                ));
            }
            description = format!("sell {}/{} w/ {}", trading_currency, payment_currency, fee_currency);
        }
        Action::Pay => {
            if fee_currency != payment_currency {
                return Err(Error::structural(
                    record,
                    format!(
                        "fee currency should be {} but {} is specified",
                        payment_currency, fee_currency
                    ),
                ));
            }
            match record.price {
                None => {
                    // no exchange rate known, pay in the spent currency itself
                    events.push(EventDraft::fee(
                        trading_currency,
                        trading_quantity,
                        trading_currency,
                        trading_quantity,
                    ));
                }
                Some(_) => {
                    events.push(EventDraft::fee(
                        trading_currency,
                        trading_quantity,
                        payment_currency,
                        payment_quantity,
                    ));
                }
            }
            events.push(EventDraft::fee(fee_currency, fee_quantity, fee_currency, fee_quantity));
        }
        Action::Mining => {
            if fee_currency != payment_currency {
                return Err(Error::structural(
                    record,
                    format!(
                        "fee currency should be {} but {} is specified",
                        payment_currency, fee_currency
                    ),
                ));
            }
            // the mined coins are acquired at the cost of the mining expense,
            // then realized and reacquired to recognize the income
            let trading = trading_quantity;
            let mining_cost = fee_quantity;
            events.push(EventDraft::buy(trading_currency, trading, fee_currency, mining_cost));
            events.push(EventDraft::fee(fee_currency, mining_cost, fee_currency, mining_cost));
            match record.price {
                None => {
                    events.push(EventDraft::sell(
                        trading_currency,
                        trading,
                        trading_currency,
                        trading_quantity,
                    ));
                    events.push(EventDraft::buy(
                        trading_currency,
                        trading,
                        trading_currency,
                        trading_quantity,
                    ));
                }
                Some(_) => {
                    events.push(EventDraft::sell(
                        trading_currency,
                        trading,
                        payment_currency,
                        payment_quantity,
                    ));
                    events.push(EventDraft::buy(
                        trading_currency,
                        trading,
                        payment_currency,
                        payment_quantity,
                    ));
                }
            }
            description = format!("mining {}", trading_currency);
        }
        Action::SendFee => {
            if fee_currency != trading_currency {
                description += "(invalid fee currency)";
            }
            if !fee_quantity.is_zero() {
                return Err(Error::structural(
                    record,
                    format!("fee should be 0 but {} is specified", fee_quantity),
                ));
            }
            match record.price {
                None => {
                    events.push(EventDraft::fee(
                        trading_currency,
                        trading_quantity,
                        trading_currency,
                        trading_quantity,
                    ));
                }
                Some(_) => {
                    events.push(EventDraft::fee(
                        trading_currency,
                        trading_quantity,
                        payment_currency,
                        payment_quantity,
                    ));
                }
            }
        }
        Action::Bonus | Action::Lending => {
            // payment quantity is zero when no price is known: the income is
            // then recognized at zero fiat cost
            events.push(EventDraft::buy(
                trading_currency,
                trading_quantity,
                payment_currency,
                payment_quantity,
            ));
        }
        Action::Tip | Action::Reduce | Action::Staking => {
            return Err(Error::structural(
                record,
                format!("unsupported action {:?}", record.action),
            ));
        }
    }

    Ok(TranslatedRecord::new(record.timestamp, description, events))
}

/// Loads a custom activity CSV.
pub fn load_custom_csv(input_path: &Path) -> anyhow::Result<Vec<CustomRecord>> {
    let file = std::fs::File::open(input_path)
        .with_context(|| format!("failed to open {}", input_path.display()))?;
    Ok(read_records(file)?)
}

/// Translates a custom activity CSV into ledger transactions.
pub fn import_custom(ledger: &mut Ledger, reader: impl Read) -> Result<()> {
    for (index, record) in read_records::<CustomRecord>(reader)?.iter().enumerate() {
        ledger.record(WALLET_CODE, index as i64, translate(record)?)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::EventType;
    use rust_decimal_macros::dec;

    const HEADER: &str = "Timestamp,Action,Source,Base,Volume,Price,Counter,Fee,FeeCcy,Comment";

    fn record(row: &str) -> CustomRecord {
        let csv = format!("{}\n{}\n", HEADER, row);
        read_records(csv.as_bytes()).unwrap().remove(0)
    }

    #[test]
    fn test_buy_with_fee_in_payment_currency() {
        // buy 1 ETH for 0.05 BTC with a 0.001 BTC fee
        let r = record("2020/01/02 12:00:00,BUY,gdax,ETH,1,0.05,BTC,0.001,BTC,");
        let translated = translate(&r).unwrap();

        assert_eq!(translated.description, "buy ETH/BTC");
        let sell = &translated.events[0];
        assert_eq!(sell.event_type, EventType::Sell);
        assert_eq!(sell.currency, "BTC");
        assert_eq!(sell.quantity, dec!(0.051));
        assert_eq!(sell.base_quantity, dec!(0.051));
        let buy = &translated.events[1];
        assert_eq!(buy.currency, "ETH");
        assert_eq!(buy.quantity, dec!(1));
        assert_eq!(buy.base_currency, "BTC");
        assert_eq!(buy.base_quantity, dec!(0.051));
        let commission = &translated.events[2];
        assert_eq!(commission.currency, "BTC");
        assert_eq!(commission.quantity, dec!(0.001));
        assert_eq!(commission.base_quantity, dec!(0.001));
    }

    #[test]
    fn test_buy_with_fee_in_trading_currency() {
        let r = record("2020/01/02 12:00:00,BUY,gdax,ETH,1,0.05,BTC,0.01,ETH,");
        let translated = translate(&r).unwrap();

        let buy = &translated.events[1];
        assert_eq!(buy.quantity, dec!(0.99));
        let commission = &translated.events[2];
        assert_eq!(commission.currency, "ETH");
        assert_eq!(commission.base_quantity, dec!(0.05) * dec!(0.01));
    }

    #[test]
    fn test_sell_with_fee_in_trading_currency_adds_fee_to_disposal() {
        let r = record("2020/03/02 12:00:00,SELL,gdax,ETH,2,0.05,BTC,0.01,ETH,");
        let translated = translate(&r).unwrap();

        let sell = &translated.events[0];
        assert_eq!(sell.currency, "ETH");
        assert_eq!(sell.quantity, dec!(2.01));
        assert_eq!(sell.base_quantity, dec!(0.05) * dec!(2.01));
        let buy = &translated.events[1];
        assert_eq!(buy.currency, "BTC");
        assert_eq!(buy.quantity, dec!(0.1));
    }

    #[test]
    fn test_mining_with_price_realizes_income() {
        let r = record("2020/05/01 00:00:00,MINING,pool,XMR,10,5000,JPY,1000,JPY,");
        let translated = translate(&r).unwrap();

        assert_eq!(translated.description, "mining XMR");
        let types: Vec<EventType> = translated.events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            [EventType::Buy, EventType::Fee, EventType::Sell, EventType::Buy]
        );
        // acquisition at the mining cost
        assert_eq!(translated.events[0].base_quantity, dec!(1000));
        // realize-then-reacquire at market value
        assert_eq!(translated.events[2].base_quantity, dec!(50000));
        assert_eq!(translated.events[3].base_quantity, dec!(50000));
    }

    #[test]
    fn test_mining_without_price_values_income_in_kind() {
        let r = record("2020/05/01 00:00:00,MINING,pool,XMR,10,,JPY,1000,JPY,");
        let translated = translate(&r).unwrap();

        let sell = &translated.events[2];
        assert_eq!(sell.base_currency, "XMR");
        assert_eq!(sell.base_quantity, dec!(10));
    }

    #[test]
    fn test_bonus_without_price_is_zero_cost() {
        let r = record("2020/06/01 00:00:00,BONUS,exchange,XLM,25,,JPY,0,JPY,");
        let translated = translate(&r).unwrap();
        assert_eq!(translated.events.len(), 1);
        let buy = &translated.events[0];
        assert_eq!(buy.event_type, EventType::Buy);
        assert_eq!(buy.base_quantity, dec!(0));
    }

    #[test]
    fn test_send_fee_requires_zero_fee_column() {
        let r = record("2020/07/01 00:00:00,SENDFEE,wallet,BTC,0.0005,,JPY,0.1,BTC,");
        assert!(matches!(translate(&r).unwrap_err(), Error::Structural { .. }));

        let ok = record("2020/07/01 00:00:00,SENDFEE,wallet,BTC,0.0005,,JPY,0,BTC,");
        let translated = translate(&ok).unwrap();
        assert_eq!(translated.events.len(), 1);
        assert_eq!(translated.events[0].event_type, EventType::Fee);
        assert_eq!(translated.events[0].base_currency, "BTC");
    }

    #[test]
    fn test_unrelated_fee_currency_is_structural() {
        let r = record("2020/01/02 12:00:00,BUY,gdax,ETH,1,0.05,BTC,0.001,XRP,");
        assert!(matches!(translate(&r).unwrap_err(), Error::Structural { .. }));
    }

    #[test]
    fn test_unexpressible_actions_are_structural() {
        for action in ["TIP", "REDUCE", "STAKING"] {
            let r = record(&format!(
                "2020/01/02 12:00:00,{},src,BTC,1,,JPY,0,JPY,",
                action
            ));
            assert!(
                matches!(translate(&r).unwrap_err(), Error::Structural { .. }),
                "{action}"
            );
        }
    }
}
