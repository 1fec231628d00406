//! Moving average method: the unit price is recomputed on every acquisition
//! and disposals realize profit at the then-current running average.

use std::collections::BTreeMap;

use log::{debug, warn};
use rust_decimal::Decimal;

use crate::base::{Balance, Entry, EntryType};
use crate::calculate::{Calculator, Options};
use crate::error::Result;

#[derive(Debug)]
struct AggregationContext {
    price: Decimal,
    beginning: Decimal,
    quantity: Decimal,
    profit: Decimal,

    close_amount: Decimal,
    close_quantity: Decimal,
    open_amount: Decimal,
    open_quantity: Decimal,

    /// Set when a running-average recomputation hit a zero denominator and
    /// the price was reset to zero.
    price_reset: bool,
}

impl AggregationContext {
    fn new(price: Decimal, quantity: Decimal) -> Self {
        Self {
            price,
            beginning: quantity,
            quantity,
            profit: Decimal::ZERO,
            close_amount: Decimal::ZERO,
            close_quantity: Decimal::ZERO,
            open_amount: Decimal::ZERO,
            open_quantity: Decimal::ZERO,
            price_reset: false,
        }
    }

    fn process_open(&mut self, quantity: Decimal, fiat_amount: Decimal) {
        // price = ((quantity * price) + fiat amount) / (quantity + buy quantity)
        let new_quantity = self.quantity + quantity;
        self.price = match (self.quantity * self.price + fiat_amount).checked_div(new_quantity) {
            Some(price) => price,
            None => {
                self.price_reset = true;
                Decimal::ZERO
            }
        };
        self.quantity = new_quantity;
        self.open_amount += fiat_amount;
        self.open_quantity += quantity;
    }

    fn process_close(&mut self, quantity: Decimal, fiat_amount: Decimal) {
        // profit += fiat amount - (price * sell quantity); price unchanged
        self.quantity -= quantity;
        self.profit += fiat_amount - self.price * quantity;
        self.close_amount += fiat_amount;
        self.close_quantity += quantity;
    }
}

pub struct MamCalculator;

impl Calculator for MamCalculator {
    fn calculate_balance(
        &self,
        beginning_balances: &[Balance],
        entries: &mut [Entry],
        year: i32,
        options: &Options,
    ) -> Result<Vec<Balance>> {
        let mut aggregation: BTreeMap<String, AggregationContext> = BTreeMap::new();

        for balance in beginning_balances {
            aggregation.insert(
                balance.currency.clone(),
                AggregationContext::new(balance.price, balance.quantity),
            );
        }

        for entry in entries.iter_mut() {
            let ac = aggregation
                .entry(entry.currency.clone())
                .or_insert_with(|| AggregationContext::new(Decimal::ZERO, Decimal::ZERO));
            match entry.entry_type {
                EntryType::Open => ac.process_open(entry.quantity, entry.fiat_quantity),
                EntryType::Close => ac.process_close(entry.quantity, entry.fiat_quantity),
            }
            entry.price = Some(ac.price);
        }

        let mut balances = Vec::new();
        for (currency, ac) in &aggregation {
            if ac.price_reset {
                warn!("mam: {} {} price reset on empty inventory", year, currency);
            }
            let balance = Balance {
                year,
                currency: currency.clone(),
                beginning_quantity: ac.beginning,
                open_quantity: ac.open_quantity,
                close_quantity: ac.close_quantity,
                price: ac.price,
                quantity: ac.quantity,
                profit: ac.profit,
            };
            if options.debug {
                debug!(
                    "mam: {} {} beginning={} open={} close={} price={} quantity={} profit={}",
                    balance.year,
                    balance.currency,
                    balance.beginning_quantity,
                    balance.open_quantity,
                    balance.close_quantity,
                    balance.price,
                    balance.quantity,
                    balance.profit
                );
            }
            balances.push(balance);
        }
        Ok(balances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn entry(id: i64, entry_type: EntryType, currency: &str, quantity: Decimal, fiat: Decimal) -> Entry {
        Entry {
            id,
            transaction_id: id,
            time: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::hours(id),
            entry_type,
            currency: currency.to_owned(),
            quantity,
            position: Decimal::ZERO,
            fiat_currency: "JPY".to_owned(),
            fiat_quantity: fiat,
            price: None,
            commission: None,
        }
    }

    fn beginning(currency: &str, quantity: Decimal, price: Decimal) -> Balance {
        Balance {
            year: 2019,
            currency: currency.to_owned(),
            beginning_quantity: Decimal::ZERO,
            open_quantity: Decimal::ZERO,
            close_quantity: Decimal::ZERO,
            price,
            quantity,
            profit: Decimal::ZERO,
        }
    }

    #[test]
    fn test_buy_then_sell_single_currency() {
        // S1
        let mut entries = vec![
            entry(1, EntryType::Open, "BTC", dec!(1.0), dec!(1000000)),
            entry(2, EntryType::Close, "BTC", dec!(0.5), dec!(800000)),
        ];
        let balances = MamCalculator
            .calculate_balance(&[], &mut entries, 2020, &Options::default())
            .unwrap();

        assert_eq!(balances.len(), 1);
        let b = &balances[0];
        assert_eq!(b.currency, "BTC");
        assert_eq!(b.beginning_quantity, dec!(0));
        assert_eq!(b.open_quantity, dec!(1.0));
        assert_eq!(b.close_quantity, dec!(0.5));
        assert_eq!(b.quantity, dec!(0.5));
        assert_eq!(b.price, dec!(1000000));
        assert_eq!(b.profit, dec!(300000));
    }

    #[test]
    fn test_two_buys_then_sell_moves_the_average() {
        // S2
        let mut entries = vec![
            entry(1, EntryType::Open, "ETH", dec!(2), dec!(200000)),
            entry(2, EntryType::Open, "ETH", dec!(2), dec!(600000)),
            entry(3, EntryType::Close, "ETH", dec!(1), dec!(300000)),
        ];
        let balances = MamCalculator
            .calculate_balance(&[], &mut entries, 2020, &Options::default())
            .unwrap();

        let b = &balances[0];
        assert_eq!(b.price, dec!(200000));
        assert_eq!(b.profit, dec!(100000));
        assert_eq!(b.quantity, dec!(3));
        // entries carry the running average at their step
        assert_eq!(entries[0].price, Some(dec!(100000)));
        assert_eq!(entries[1].price, Some(dec!(200000)));
        assert_eq!(entries[2].price, Some(dec!(200000)));
    }

    #[test]
    fn test_open_preserves_cost_and_close_preserves_price() {
        // property 3: after Open(q, a): Q' = Q + q and Q' * P' = Q * P + a;
        // after Close(q, a): Q' = Q - q, profit' = profit + (a - P * q)
        let mut ac = AggregationContext::new(dec!(250), dec!(4));
        ac.process_open(dec!(2), dec!(800));
        assert_eq!(ac.quantity, dec!(6));
        assert_eq!(ac.quantity * ac.price, dec!(4) * dec!(250) + dec!(800));

        let price_before = ac.price;
        ac.process_close(dec!(3), dec!(1200));
        assert_eq!(ac.quantity, dec!(3));
        assert_eq!(ac.price, price_before);
        assert_eq!(ac.profit, dec!(1200) - price_before * dec!(3));
    }

    #[test]
    fn test_carry_in_prices_disposals() {
        // S4
        let mut entries = vec![entry(1, EntryType::Close, "BTC", dec!(1), dec!(700000))];
        let balances = MamCalculator
            .calculate_balance(
                &[beginning("BTC", dec!(1), dec!(500000))],
                &mut entries,
                2020,
                &Options::default(),
            )
            .unwrap();

        let b = &balances[0];
        assert_eq!(b.beginning_quantity, dec!(1));
        assert_eq!(b.profit, dec!(200000));
        assert_eq!(b.quantity, dec!(0));
        assert_eq!(b.price, dec!(500000));
    }

    #[test]
    fn test_zero_inventory_open_resets_price() {
        // sell everything, then open a zero-quantity position: the average
        // has no denominator and collapses to zero until the next open
        let mut ac = AggregationContext::new(dec!(100), dec!(1));
        ac.process_close(dec!(1), dec!(150));
        ac.process_open(dec!(0), dec!(0));
        assert_eq!(ac.price, Decimal::ZERO);
        assert!(ac.price_reset);

        ac.process_open(dec!(2), dec!(500));
        assert_eq!(ac.price, dec!(250));
    }

    #[test]
    fn test_zero_fiat_income_contributes_quantity_only() {
        // income recognized at zero cost dilutes the average
        let mut entries = vec![
            entry(1, EntryType::Open, "XEM", dec!(1), dec!(100)),
            entry(2, EntryType::Open, "XEM", dec!(1), dec!(0)),
        ];
        let balances = MamCalculator
            .calculate_balance(&[], &mut entries, 2020, &Options::default())
            .unwrap();
        assert_eq!(balances[0].quantity, dec!(2));
        assert_eq!(balances[0].price, dec!(50));
        assert_eq!(balances[0].profit, dec!(0));
    }

    #[test]
    fn test_balances_are_sorted_by_currency() {
        let mut entries = vec![
            entry(1, EntryType::Open, "ETH", dec!(1), dec!(1)),
            entry(2, EntryType::Open, "BTC", dec!(1), dec!(1)),
            entry(3, EntryType::Open, "XRP", dec!(1), dec!(1)),
        ];
        let balances = MamCalculator
            .calculate_balance(&[], &mut entries, 2020, &Options::default())
            .unwrap();
        let currencies: Vec<&str> = balances.iter().map(|b| b.currency.as_str()).collect();
        assert_eq!(currencies, ["BTC", "ETH", "XRP"]);
    }
}
