//! Entry building and the per-year calculation driver.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::TimeZone;
use log::debug;
use rust_decimal::Decimal;
use slice_group_by::GroupBy;

use crate::base::{Balance, CostMethod, Entry, EntryType, Event, EventType, YearConfig};
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::mam::MamCalculator;
use crate::prices::PriceBook;
use crate::wam::WamCalculator;

/// Options consumed by the calculators.
#[derive(Debug, Default, Clone, Copy)]
pub struct Options {
    /// Emit per-step debug logging.
    pub debug: bool,
}

/// A cost-basis strategy: consumes one year's entries plus the previous
/// year's ending balances, produces the year's balances and stamps every
/// entry's unit price.
pub trait Calculator {
    fn calculate_balance(
        &self,
        beginning_balances: &[Balance],
        entries: &mut [Entry],
        year: i32,
        options: &Options,
    ) -> Result<Vec<Balance>>;
}

/// Per-year configuration: the most recent config at or before a year wins.
#[derive(Debug, Default)]
pub struct ConfigBook {
    configs: Vec<YearConfig>,
}

impl ConfigBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, config: YearConfig) {
        self.configs.retain(|c| c.year != config.year);
        self.configs.push(config);
        self.configs.sort_by_key(|c| c.year);
    }

    pub fn for_year(&self, year: i32) -> Option<&YearConfig> {
        self.configs.iter().rev().find(|c| c.year <= year)
    }

    pub fn method_for(&self, year: i32) -> CostMethod {
        self.for_year(year)
            .map_or(CostMethod::Wam, |c| c.cost_method)
    }
}

/// Running per-currency balances: the carried-in quantity, the year's opened
/// and closed totals, and the current position.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct PositionBalance {
    pub init: Decimal,
    pub open: Decimal,
    pub close: Decimal,
    pub position: Decimal,
}

#[derive(Debug, Default)]
pub(crate) struct PositionContext {
    balances: BTreeMap<String, PositionBalance>,
}

impl PositionContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, currency: &str) -> &mut PositionBalance {
        self.balances.entry(currency.to_owned()).or_default()
    }

    pub fn init_position(&mut self, currency: &str, quantity: Decimal) {
        let b = self.entry(currency);
        b.position += quantity;
        b.init = quantity;
    }

    pub fn open_position(&mut self, currency: &str, quantity: Decimal) {
        let b = self.entry(currency);
        b.position += quantity;
        b.open += quantity;
    }

    pub fn close_position(&mut self, currency: &str, quantity: Decimal) {
        let b = self.entry(currency);
        b.position -= quantity;
        b.close += quantity;
    }

    /// Position change without open/close accounting (deposits, withdrawals).
    pub fn transfer(&mut self, currency: &str, quantity: Decimal) {
        self.entry(currency).position += quantity;
    }

    pub fn position(&self, currency: &str) -> Decimal {
        self.balances.get(currency).map_or(Decimal::ZERO, |b| b.position)
    }

    pub fn balance(&self, currency: &str) -> Option<&PositionBalance> {
        self.balances.get(currency)
    }

    /// Per-currency balances in currency order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &PositionBalance)> {
        self.balances.iter()
    }
}

/// Projects one year's priced events into open/close entries.
///
/// The running position is seeded from the previous year's ending balances;
/// the position stamped on an entry is the value after the entry's own delta.
/// Commission events emit no entry but write their fiat amount into the
/// commission field of the surrounding entry.
pub fn build_entries(
    events: &[Event],
    prices: &PriceBook,
    fiat: &str,
    beginning_balances: &[Balance],
    cancel: &AtomicBool,
) -> Result<Vec<Entry>> {
    let mut cctx = PositionContext::new();
    for balance in beginning_balances {
        cctx.init_position(&balance.currency, balance.quantity);
    }

    let mut entries: Vec<Entry> = Vec::new();

    for transaction in events.linear_group_by(|a, b| a.transaction_id == b.transaction_id) {
        if cancel.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }

        let mut open: Option<usize> = None;
        let mut close: Option<usize> = None;

        for event in transaction {
            let new_entry = |entry_type: EntryType, fiat_quantity: Decimal, position: Decimal| Entry {
                id: event.id,
                transaction_id: event.transaction_id,
                time: event.time,
                entry_type,
                currency: event.currency.clone(),
                quantity: event.quantity,
                position,
                fiat_currency: fiat.to_owned(),
                fiat_quantity,
                price: None,
                commission: None,
            };

            let fiat_quantity = prices.fiat_value(event, fiat)?;
            match event.event_type {
                EventType::Buy => {
                    cctx.open_position(&event.currency, event.quantity);
                    entries.push(new_entry(
                        EntryType::Open,
                        fiat_quantity,
                        cctx.position(&event.currency),
                    ));
                    open = Some(entries.len() - 1);
                }
                EventType::Sell => {
                    cctx.close_position(&event.currency, event.quantity);
                    entries.push(new_entry(
                        EntryType::Close,
                        fiat_quantity,
                        cctx.position(&event.currency),
                    ));
                    close = Some(entries.len() - 1);
                }
                EventType::Commission => {
                    // The fee lands on the open entry in both branches; when
                    // the commission follows a close, the close is consumed
                    // but the amount still goes to the open side.
                    if open.is_some_and(|i| entries[i].currency == event.currency) {
                        entries[open.unwrap()].commission = Some(fiat_quantity);
                        open = None;
                    } else if close.is_some_and(|i| entries[i].currency == event.currency) {
                        let target = open.ok_or_else(|| {
                            Error::invariant("commission without surrounding open entry")
                        })?;
                        entries[target].commission = Some(fiat_quantity);
                        close = None;
                    } else {
                        return Err(Error::invariant(
                            "commission without matching open or close entry",
                        ));
                    }
                }
                EventType::Fee => {
                    cctx.close_position(&event.currency, event.quantity);
                    entries.push(new_entry(
                        EntryType::Close,
                        fiat_quantity,
                        cctx.position(&event.currency),
                    ));
                }
                EventType::Deposit => {
                    cctx.transfer(&event.currency, event.quantity);
                }
                EventType::Withdraw => {
                    cctx.transfer(&event.currency, -event.quantity);
                }
            }
        }
    }

    Ok(entries)
}

fn calculator_for(method: CostMethod) -> &'static dyn Calculator {
    match method {
        CostMethod::Wam => &WamCalculator,
        CostMethod::Mam => &MamCalculator,
    }
}

/// Calculates one year and commits its entries and balances to the ledger.
///
/// All results are staged; on any error the ledger is left untouched.
/// Balance rows for the fiat currency itself are skipped: the accounting
/// currency is not inventoried.
#[allow(clippy::too_many_arguments)]
pub fn update_balance_by_year<Tz: TimeZone>(
    ledger: &mut Ledger,
    prices: &PriceBook,
    year: i32,
    tz: &Tz,
    fiat: &str,
    calculator: &dyn Calculator,
    options: &Options,
    cancel: &AtomicBool,
) -> Result<()> {
    let beginning_balances = ledger.balances_for(year - 1).to_vec();
    let events = ledger.events_in_year(year, tz)?;

    let mut entries = build_entries(&events, prices, fiat, &beginning_balances, cancel)?;
    let balances = calculator.calculate_balance(&beginning_balances, &mut entries, year, options)?;
    let balances: Vec<Balance> = balances.into_iter().filter(|b| b.currency != fiat).collect();

    ledger.commit_year(year, tz, entries, balances)
}

/// Runs the calculation for the given years in ascending order.
///
/// Each year commits independently, so a later year's failure leaves earlier
/// completed years in place. The per-year cost method comes from the config
/// book unless `method` overrides it. A year config may also override the
/// default fiat currency.
#[allow(clippy::too_many_arguments)]
pub fn calculate<Tz: TimeZone>(
    ledger: &mut Ledger,
    prices: &PriceBook,
    configs: &ConfigBook,
    years: &[i32],
    tz: &Tz,
    fiat: &str,
    method: Option<CostMethod>,
    options: &Options,
    cancel: &AtomicBool,
) -> Result<()> {
    let mut years = years.to_vec();
    years.sort_unstable();
    years.dedup();

    for year in years {
        if cancel.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }

        let config = configs.for_year(year);
        let year_method = method
            .or(config.map(|c| c.cost_method))
            .unwrap_or(CostMethod::Wam);
        let year_fiat = config.and_then(|c| c.fiat.as_deref()).unwrap_or(fiat);

        debug!("calculate {} using {}", year, year_method);
        update_balance_by_year(
            ledger,
            prices,
            year,
            tz,
            year_fiat,
            calculator_for(year_method),
            options,
            cancel,
        )?;
    }
    Ok(())
}
