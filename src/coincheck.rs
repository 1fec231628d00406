use std::io::Read;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};

use crate::base::{EventDraft, TranslatedRecord};
use crate::csvutil::{deserialize_opt_decimal, read_records};
use crate::error::{Error, Result};
use crate::ledger::Ledger;

pub const WALLET_CODE: &str = "COINCHECK";
const FIAT_CODE: &str = "JPY";

// timestamps carry an explicit offset, e.g. "2018-01-05 11:22:33 +0900"
fn deserialize_date_time<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<DateTime<Utc>, D::Error> {
    let raw: String = Deserialize::deserialize(d)?;
    DateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S %z")
        .map(|t| t.with_timezone(&Utc))
        .map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
enum Operation {
    Received,
    #[serde(rename = "Limit Order")]
    LimitOrder,
    #[serde(rename = "Completed trading contracts")]
    CompletedTradingContracts,
    Sent,
    #[serde(rename = "Bank Withdrawal")]
    BankWithdrawal,
    #[serde(rename = "Cancel Limit Order")]
    CancelLimitOrder,
}

// id,time,operation,amount,trading_currency,price,original_currency,fee,comment
#[derive(Debug, Deserialize)]
pub struct CoincheckRecord {
    // #[serde(rename = "id")]
    // id: String,
    #[serde(rename = "time", deserialize_with = "deserialize_date_time")]
    time: DateTime<Utc>,
    #[serde(rename = "operation")]
    operation: Operation,
    #[serde(rename = "amount", deserialize_with = "deserialize_opt_decimal")]
    amount: Option<Decimal>,
    #[serde(rename = "trading_currency")]
    trading_currency: String,
    // #[serde(rename = "price", deserialize_with = "deserialize_opt_decimal")]
    // price: Option<Decimal>,
    // #[serde(rename = "original_currency")]
    // original_currency: String,
    #[serde(rename = "fee", deserialize_with = "deserialize_opt_decimal")]
    fee: Option<Decimal>,
    #[serde(rename = "comment")]
    comment: String,
}

static TRADE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Rate: ([0-9]+\.[0-9]+), Pair: ([0-9a-z]+)_([0-9a-z]+)").unwrap());
static SENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new("Address: ([0-9a-zA-Z]+)").unwrap());

// "Rate: 1000000.0, Pair: btc_jpy" -> (rate, trading, payment)
fn parse_trade_comment(comment: &str) -> Option<(Decimal, String, String)> {
    let captures = TRADE_RE.captures(comment)?;
    let rate = captures[1].parse().ok()?;
    Some((
        rate,
        captures[2].to_uppercase(),
        captures[3].to_uppercase(),
    ))
}

fn parse_sent_comment(comment: &str) -> Option<&str> {
    SENT_RE
        .captures(comment)
        .map(|captures| captures.get(1).unwrap().as_str())
}

/// Maps one history row to canonical events.
///
/// Order placements and cancellations change no position and translate to an
/// empty event list.
pub fn translate(record: &CoincheckRecord) -> Result<TranslatedRecord> {
    let fiat = FIAT_CODE;
    let target_currency = record.trading_currency.as_str();
    let target_quantity = record.amount.unwrap_or_default();
    let fee_quantity = record.fee.unwrap_or_default();

    let mut events = Vec::new();
    let mut description = String::new();

    match record.operation {
        Operation::LimitOrder | Operation::CancelLimitOrder => {
            debug!("skipping no-op coincheck operation {:?}", record.operation);
        }
        Operation::CompletedTradingContracts => {
            let (rate, trading_currency, payment_currency) =
                parse_trade_comment(&record.comment).ok_or_else(|| {
                    Error::structural(
                        record,
                        format!("failed to parse comment {:?}", record.comment),
                    )
                })?;
            if fee_quantity > Decimal::ZERO {
                return Err(Error::structural(record, "fee is not supported yet"));
            }
            if target_currency == trading_currency {
                // bought the trading currency, e.g. BTC of btc_jpy
                let trading = target_quantity;
                let payment = rate * target_quantity;
                let cost = payment;
                events.push(EventDraft::buy(&trading_currency, trading, &payment_currency, cost));
                events.push(EventDraft::sell(&payment_currency, payment, &payment_currency, cost));
                description = format!("buy {}/{}", trading_currency, payment_currency);
            } else if target_currency == payment_currency {
                // bought the payment currency, i.e. sold the trading side
                let trading = target_quantity.checked_div(rate).ok_or_else(|| {
                    Error::structural(record, "zero rate in trade comment")
                })?;
                let payment = target_quantity;
                let cost = payment;
                events.push(EventDraft::sell(&trading_currency, trading, &payment_currency, cost));
                events.push(EventDraft::buy(&payment_currency, payment, &payment_currency, cost));
                description = format!("sell {}/{}", trading_currency, payment_currency);
            } else {
                return Err(Error::structural(
                    record,
                    format!(
                        "invalid trading currency {} for {}-{}",
                        target_currency, trading_currency, payment_currency
                    ),
                ));
            }
        }
        Operation::Received => {
            events.push(EventDraft::deposit(target_currency, target_quantity, fiat));
            description = format!("received {}", target_currency);
        }
        Operation::Sent => {
            events.push(EventDraft::withdraw(
                target_currency,
                target_quantity - fee_quantity,
                fiat,
            ));
            if !fee_quantity.is_zero() {
                events.push(EventDraft::fee(target_currency, fee_quantity, fiat, Decimal::ZERO));
            }
            description = match parse_sent_comment(&record.comment) {
                Some(address) => format!("sent {} to {:.7}", target_currency, address),
                None => format!("sent {}", target_currency),
            };
            if !fee_quantity.is_zero() {
                description += &format!(" with {}", target_currency);
            }
        }
        Operation::BankWithdrawal => {
            events.push(EventDraft::withdraw(
                target_currency,
                target_quantity - fee_quantity,
                fiat,
            ));
            if !fee_quantity.is_zero() {
                events.push(EventDraft::fee(
                    target_currency,
                    fee_quantity,
                    fiat,
                    fee_quantity,
                ));
            }
            description = format!("withdraw {} to bank", target_currency);
        }
    }

    Ok(TranslatedRecord::new(record.time, description, events))
}

/// Loads a Coincheck history CSV.
pub fn load_coincheck_csv(input_path: &Path) -> anyhow::Result<Vec<CoincheckRecord>> {
    let file = std::fs::File::open(input_path)
        .with_context(|| format!("failed to open {}", input_path.display()))?;
    Ok(read_records(file)?)
}

/// Translates a Coincheck history CSV into ledger transactions.
pub fn import_coincheck(ledger: &mut Ledger, reader: impl Read) -> Result<()> {
    for (index, record) in read_records::<CoincheckRecord>(reader)?.iter().enumerate() {
        ledger.record(WALLET_CODE, index as i64, translate(record)?)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::EventType;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    const HEADER: &str = "id,time,operation,amount,trading_currency,price,original_currency,fee,comment";

    fn record(row: &str) -> CoincheckRecord {
        let csv = format!("{}\n{}\n", HEADER, row);
        read_records(csv.as_bytes()).unwrap().remove(0)
    }

    #[test]
    fn test_parse_trade_comment() {
        let (rate, trading, payment) =
            parse_trade_comment("Rate: 1000000.0, Pair: btc_jpy").unwrap();
        assert_eq!(rate, dec!(1000000.0));
        assert_eq!(trading, "BTC");
        assert_eq!(payment, "JPY");
        assert!(parse_trade_comment("Bought BTC").is_none());
    }

    #[test]
    fn test_translate_buy() {
        let r = record(r#"123,2018-01-05 11:22:33 +0900,Completed trading contracts,0.1,BTC,,,,"Rate: 1000000.0, Pair: btc_jpy""#);
        assert_eq!(
            r.time,
            Utc.with_ymd_and_hms(2018, 1, 5, 2, 22, 33).unwrap()
        );

        let translated = translate(&r).unwrap();
        assert_eq!(translated.description, "buy BTC/JPY");
        // buy leads, then the payment-side sell
        let buy = &translated.events[0];
        assert_eq!(buy.event_type, EventType::Buy);
        assert_eq!(buy.currency, "BTC");
        assert_eq!(buy.quantity, dec!(0.1));
        assert_eq!(buy.base_quantity, dec!(100000.00));
        let sell = &translated.events[1];
        assert_eq!(sell.event_type, EventType::Sell);
        assert_eq!(sell.currency, "JPY");
        assert_eq!(sell.quantity, dec!(100000.00));
    }

    #[test]
    fn test_translate_sell_divides_by_rate() {
        let r = record(r#"124,2018-01-06 10:00:00 +0900,Completed trading contracts,200000,JPY,,,,"Rate: 1000000.0, Pair: btc_jpy""#);
        let translated = translate(&r).unwrap();
        assert_eq!(translated.description, "sell BTC/JPY");
        let sell = &translated.events[0];
        assert_eq!(sell.currency, "BTC");
        assert_eq!(sell.quantity, dec!(0.2));
        let buy = &translated.events[1];
        assert_eq!(buy.currency, "JPY");
        assert_eq!(buy.quantity, dec!(200000));
    }

    #[test]
    fn test_trade_with_fee_is_structural() {
        let r = record(r#"125,2018-01-06 10:00:00 +0900,Completed trading contracts,0.1,BTC,,,0.001,"Rate: 1000000.0, Pair: btc_jpy""#);
        assert!(matches!(
            translate(&r).unwrap_err(),
            Error::Structural { .. }
        ));
    }

    #[test]
    fn test_translate_sent_with_fee() {
        let r = record(
            "126,2018-02-01 09:00:00 +0900,Sent,0.5001,BTC,,,0.0001,Address: 1BoatSLRHtKNngkdXEeobR76b53LETtpyT",
        );
        let translated = translate(&r).unwrap();
        assert!(translated.description.starts_with("sent BTC to 1BoatSL"));
        let withdraw = &translated.events[0];
        assert_eq!(withdraw.event_type, EventType::Withdraw);
        assert_eq!(withdraw.quantity, dec!(0.5));
        let fee = &translated.events[1];
        assert_eq!(fee.event_type, EventType::Fee);
        assert_eq!(fee.quantity, dec!(0.0001));
    }

    #[test]
    fn test_bank_withdrawal_fee_has_fiat_cost() {
        let r = record("127,2018-03-01 09:00:00 +0900,Bank Withdrawal,50400,JPY,,,400,");
        let translated = translate(&r).unwrap();
        let withdraw = &translated.events[0];
        assert_eq!(withdraw.quantity, dec!(50000));
        let fee = &translated.events[1];
        assert_eq!(fee.base_quantity, dec!(400));
    }

    #[test]
    fn test_noop_operations_emit_no_events() {
        for op in ["Limit Order", "Cancel Limit Order"] {
            let r = record(&format!(
                r#"128,2018-01-05 11:22:33 +0900,{},0.1,BTC,,,,"Rate: 1000000.0, Pair: btc_jpy""#,
                op
            ));
            let translated = translate(&r).unwrap();
            assert!(translated.events.is_empty(), "{op}");
        }
    }
}
