//! Weighted average method: one yearly unit price computed from the carry-in
//! inventory plus the year's acquisitions, used to value every disposal.

use std::collections::BTreeMap;

use log::debug;
use rust_decimal::Decimal;

use crate::base::{Balance, Entry, EntryType};
use crate::calculate::{Calculator, Options, PositionContext};
use crate::error::Result;

pub struct WamCalculator;

impl Calculator for WamCalculator {
    fn calculate_balance(
        &self,
        beginning_balances: &[Balance],
        entries: &mut [Entry],
        year: i32,
        options: &Options,
    ) -> Result<Vec<Balance>> {
        let mut positions = PositionContext::new();
        let mut amounts = PositionContext::new();

        for balance in beginning_balances {
            positions.init_position(&balance.currency, balance.quantity);
            amounts.init_position(&balance.currency, balance.price * balance.quantity);
        }

        for entry in entries.iter() {
            match entry.entry_type {
                EntryType::Open => {
                    let position = positions.position(&entry.currency);
                    positions.open_position(&entry.currency, entry.quantity);
                    if options.debug {
                        debug!(
                            "wam: {} {} = {} + {}",
                            entry.currency,
                            positions.position(&entry.currency),
                            position,
                            entry.quantity
                        );
                    }
                    amounts.open_position(&entry.currency, entry.fiat_quantity);
                }
                EntryType::Close => {
                    let position = positions.position(&entry.currency);
                    positions.close_position(&entry.currency, entry.quantity);
                    if options.debug {
                        debug!(
                            "wam: {} {} = {} - {}",
                            entry.currency,
                            positions.position(&entry.currency),
                            position,
                            entry.quantity
                        );
                    }
                    amounts.close_position(&entry.currency, entry.fiat_quantity);
                }
            }
        }

        let mut balances: BTreeMap<String, Balance> = BTreeMap::new();
        for (currency, position) in positions.iter() {
            let amount = amounts.balance(currency).copied().unwrap_or_default();

            // weighted price = (inventory amount + buy amount) / (inventory quantity + buy quantity)
            let total_amount = amount.init + amount.open;
            let total_quantity = position.init + position.open;
            let weighted_price = if total_quantity > Decimal::ZERO {
                total_amount / total_quantity
            } else {
                Decimal::ZERO
            };

            // cost amount = sell quantity * weighted price
            let cost_amount = position.close * weighted_price;
            // profit amount = sell amount - cost amount
            let profit = amount.close - cost_amount;
            // quantity = total quantity - sell quantity
            let quantity = total_quantity - position.close;

            let balance = Balance {
                year,
                currency: currency.clone(),
                beginning_quantity: position.init,
                open_quantity: position.open,
                close_quantity: position.close,
                price: weighted_price,
                quantity,
                profit,
            };
            if options.debug {
                debug!(
                    "wam: {} {} beginning={} open={} close={} price={} quantity={} profit={}",
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
            balances.insert(currency.clone(), balance);
        }

        // every entry of a currency carries the single yearly price
        for entry in entries.iter_mut() {
            if let Some(balance) = balances.get(&entry.currency) {
                entry.price = Some(balance.price);
            }
        }

        Ok(balances.into_values().collect())
    }
}
