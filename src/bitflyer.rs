use std::io::Read;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};

use crate::base::{EventDraft, TranslatedRecord};
use crate::csvutil::{deserialize_decimal, read_records};
use crate::error::Result;
use crate::ledger::Ledger;

pub const WALLET_CODE: &str = "BF";
const FIAT_CODE: &str = "JPY";

// trade dates are local to the exchange (UTC+09:00)
fn deserialize_jst_date_time<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<DateTime<Utc>, D::Error> {
    let raw: String = Deserialize::deserialize(d)?;
    let naive = NaiveDateTime::parse_from_str(&raw, "%Y/%m/%d %H:%M:%S")
        .map_err(serde::de::Error::custom)?;
    let jst = FixedOffset::east_opt(9 * 60 * 60).unwrap();
    Ok(naive
        .and_local_timezone(jst)
        .single()
        .ok_or_else(|| serde::de::Error::custom("ambiguous local time"))?
        .with_timezone(&Utc))
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
enum TradeType {
    #[serde(rename = "買い", alias = "Buy")]
    Buy,
    #[serde(rename = "売り", alias = "Sell")]
    Sell,
    #[serde(rename = "受取", alias = "Receive")]
    Receive,
    #[serde(rename = "入金", alias = "Deposit")]
    Deposit,
    #[serde(rename = "外部送付", alias = "Transfer")]
    Transfer,
    #[serde(rename = "手数料", alias = "Fee")]
    Fee,
}

// struct for storing the following CSV columns (English or Japanese headers):
// "Trade Date","Product","Trade Type","Traded Price","Currency 1","Amount (Currency 1)",
// "Fee","JPY Rate (Currency 1)","Currency 2","Amount (Currency 2)","Counter Party","Order ID","Details"
#[derive(Debug, Deserialize)]
pub struct BitflyerRecord {
    #[serde(
        rename = "Trade Date",
        alias = "取引日時",
        deserialize_with = "deserialize_jst_date_time"
    )]
    pub trade_date: DateTime<Utc>,
    // #[serde(rename = "Product", alias = "通貨")]
    // product: String,
    #[serde(rename = "Trade Type", alias = "取引種別")]
    trade_type: TradeType,
    // #[serde(rename = "Traded Price", alias = "取引価格")]
    // traded_price: Decimal,
    #[serde(rename = "Currency 1", alias = "通貨1")]
    currency1: String,
    #[serde(
        rename = "Amount (Currency 1)",
        alias = "通貨1数量",
        deserialize_with = "deserialize_decimal"
    )]
    currency1_quantity: Decimal,
    /// Negative for amounts the exchange took.
    #[serde(rename = "Fee", alias = "手数料", deserialize_with = "deserialize_decimal")]
    fee: Decimal,
    #[serde(
        rename = "JPY Rate (Currency 1)",
        alias = "通貨1の対円レート",
        deserialize_with = "deserialize_decimal"
    )]
    currency1_jpy_rate: Decimal,
    #[serde(rename = "Currency 2", alias = "通貨2")]
    currency2: String,
    #[serde(
        rename = "Amount (Currency 2)",
        alias = "通貨2数量",
        deserialize_with = "deserialize_decimal"
    )]
    currency2_quantity: Decimal,
    // #[serde(rename = "Counter Party", alias = "自己・媒介")]
    // counter_party: String,
    // #[serde(rename = "Order ID", alias = "注文 ID")]
    // order_id: String,
    // #[serde(rename = "Details", alias = "備考")]
    // remarks: String,
}

/// Maps one trade-history row to canonical events.
///
/// Amounts and fees are signed in the export; emitted quantities are
/// normalized to the non-negative convention.
pub fn translate(record: &BitflyerRecord) -> Result<TranslatedRecord> {
    let jpy = FIAT_CODE;
    let trading = record.currency1.as_str();
    let payment = record.currency2.as_str();
    let rate = record.currency1_jpy_rate; // jpy / trading

    let mut events = Vec::new();
    let description = match record.trade_type {
        TradeType::Buy => {
            let received = record.currency1_quantity + record.fee; // fee is negative
            let paid = -record.currency2_quantity;
            let fee = -record.fee;
            let cost = rate * record.currency1_quantity; // jpy equivalent of the lost payment
            events.push(EventDraft::sell(payment, paid, payment, cost));
            events.push(EventDraft::buy(trading, received, payment, cost));
            events.push(EventDraft::commission(trading, fee, jpy, rate * fee));
            format!("buy {}/{}", trading, payment)
        }
        TradeType::Sell => {
            let sold = -(record.currency1_quantity + record.fee);
            let received = record.currency2_quantity;
            let fee = -record.fee;
            let cost = rate * sold;
            events.push(EventDraft::sell(trading, sold, jpy, cost));
            events.push(EventDraft::buy(payment, received, jpy, cost));
            events.push(EventDraft::commission(trading, fee, jpy, rate * fee));
            format!("sell {}/{}", trading, payment)
        }
        TradeType::Receive => {
            // income is booked as a zero-cost acquisition
            let fee = -record.fee;
            events.push(EventDraft::buy(
                trading,
                record.currency1_quantity,
                jpy,
                Decimal::ZERO,
            ));
            events.push(EventDraft::fee(trading, fee, jpy, rate * fee));
            format!("receive {}", trading)
        }
        TradeType::Transfer => {
            let fee = -record.fee;
            events.push(EventDraft::fee(trading, fee, jpy, rate * fee));
            events.push(EventDraft::withdraw(trading, -record.currency1_quantity, jpy));
            format!("transfer {}", trading)
        }
        TradeType::Deposit => {
            events.push(EventDraft::deposit(trading, record.currency1_quantity, jpy));
            format!("deposit {}", trading)
        }
        TradeType::Fee => {
            let fee = -record.currency1_quantity;
            events.push(EventDraft::fee(trading, fee, jpy, rate * fee));
            format!("fee {}", trading)
        }
    };

    Ok(TranslatedRecord::new(record.trade_date, description, events))
}

/// Loads a bitFlyer trade-history CSV (English or Japanese headers).
pub fn load_bitflyer_csv(input_path: &Path) -> anyhow::Result<Vec<BitflyerRecord>> {
    let file = std::fs::File::open(input_path)
        .with_context(|| format!("failed to open {}", input_path.display()))?;
    Ok(read_records(file)?)
}

/// Translates a bitFlyer trade-history CSV into ledger transactions.
pub fn import_bitflyer(ledger: &mut Ledger, reader: impl Read) -> Result<()> {
    for (index, record) in read_records::<BitflyerRecord>(reader)?.iter().enumerate() {
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

    const JP_CSV: &str = r#""取引日時","通貨","取引種別","取引価格","通貨1","通貨1数量","手数料","通貨1の対円レート","通貨2","通貨2数量","自己・媒介","注文 ID","備考"
"2017/08/16 23:46:37","BTC/JPY","買い","454,359","BTC","0.009","-0.0000135","454,359","JPY","-4,089","媒介","JOR20170816-000006-000001",""
"2017/07/24 14:07:52","JPY","入金","0","JPY","100,000","0","0","","0","","MDP20170724-000002-000001",""
"#;

    #[test]
    fn test_japanese_headers_parse() {
        let records: Vec<BitflyerRecord> = read_records(JP_CSV.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].trade_type, TradeType::Buy);
        assert_eq!(records[0].currency1_quantity, dec!(0.009));
        assert_eq!(records[0].fee, dec!(-0.0000135));
        assert_eq!(records[0].currency2_quantity, dec!(-4089));
        // 23:46:37 JST is 14:46:37 UTC
        assert_eq!(
            records[0].trade_date,
            Utc.with_ymd_and_hms(2017, 8, 16, 14, 46, 37).unwrap()
        );
    }

    #[test]
    fn test_translate_buy_with_fee_in_trading_currency() {
        let records: Vec<BitflyerRecord> = read_records(JP_CSV.as_bytes()).unwrap();
        let translated = translate(&records[0]).unwrap();

        assert_eq!(translated.description, "buy BTC/JPY");
        let cost = dec!(454359) * dec!(0.009);
        assert_eq!(translated.events.len(), 3);
        let sell = &translated.events[0];
        assert_eq!(sell.event_type, EventType::Sell);
        assert_eq!(sell.currency, "JPY");
        assert_eq!(sell.quantity, dec!(4089));
        assert_eq!(sell.base_quantity, cost);
        let buy = &translated.events[1];
        assert_eq!(buy.event_type, EventType::Buy);
        assert_eq!(buy.currency, "BTC");
        assert_eq!(buy.quantity, dec!(0.009) - dec!(0.0000135));
        assert_eq!(buy.base_quantity, cost);
        let commission = &translated.events[2];
        assert_eq!(commission.event_type, EventType::Commission);
        assert_eq!(commission.quantity, dec!(0.0000135));
        assert_eq!(commission.base_quantity, dec!(454359) * dec!(0.0000135));
    }

    #[test]
    fn test_translate_sell() {
        let csv = r#""Trade Date","Product","Trade Type","Traded Price","Currency 1","Amount (Currency 1)","Fee","JPY Rate (Currency 1)","Currency 2","Amount (Currency 2)","Counter Party","Order ID","Details"
"2018/01/10 10:00:00","BTC/JPY","Sell","1,500,000","BTC","-0.1","-0.0001","1,500,000","JPY","150,000","","JOR20180110-000001-000001",""
"#;
        let records: Vec<BitflyerRecord> = read_records(csv.as_bytes()).unwrap();
        let translated = translate(&records[0]).unwrap();

        assert_eq!(translated.description, "sell BTC/JPY");
        let sell = &translated.events[0];
        assert_eq!(sell.currency, "BTC");
        assert_eq!(sell.quantity, dec!(0.1001));
        assert_eq!(sell.base_currency, "JPY");
        assert_eq!(sell.base_quantity, dec!(1500000) * dec!(0.1001));
        let buy = &translated.events[1];
        assert_eq!(buy.currency, "JPY");
        assert_eq!(buy.quantity, dec!(150000));
    }

    #[test]
    fn test_deposit_and_import() {
        let mut ledger = Ledger::new();
        import_bitflyer(&mut ledger, JP_CSV.as_bytes()).unwrap();

        assert_eq!(ledger.transactions().len(), 2);
        assert_eq!(ledger.transactions()[1].description, "deposit JPY");
        let deposit = ledger
            .events()
            .iter()
            .find(|e| e.event_type == EventType::Deposit)
            .unwrap();
        assert_eq!(deposit.currency, "JPY");
        assert_eq!(deposit.quantity, dec!(100000));
        assert_eq!(deposit.base_quantity, dec!(0));
    }

    #[test]
    fn test_transfer_emits_fee_then_withdraw() {
        let csv = r#""取引日時","通貨","取引種別","取引価格","通貨1","通貨1数量","手数料","通貨1の対円レート","通貨2","通貨2数量","自己・媒介","注文 ID","備考"
"2018/03/01 09:00:00","BTC","外部送付","0","BTC","-0.5","-0.0004","1,000,000","","0","","WTX20180301-000001-000001",""
"#;
        let records: Vec<BitflyerRecord> = read_records(csv.as_bytes()).unwrap();
        let translated = translate(&records[0]).unwrap();

        assert_eq!(translated.events.len(), 2);
        assert_eq!(translated.events[0].event_type, EventType::Fee);
        assert_eq!(translated.events[0].quantity, dec!(0.0004));
        assert_eq!(translated.events[0].base_quantity, dec!(1000000) * dec!(0.0004));
        assert_eq!(translated.events[1].event_type, EventType::Withdraw);
        assert_eq!(translated.events[1].quantity, dec!(0.5));
    }

    #[test]
    fn test_unknown_trade_type_is_a_parse_error() {
        let csv = r#""取引日時","通貨","取引種別","取引価格","通貨1","通貨1数量","手数料","通貨1の対円レート","通貨2","通貨2数量","自己・媒介","注文 ID","備考"
"2018/03/01 09:00:00","BTC","謎の操作","0","BTC","1","0","0","","0","","X",""
"#;
        let err = read_records::<BitflyerRecord>(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, crate::error::Error::Parse { line: 2, .. }));
    }
}
