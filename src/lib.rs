//! Cost-basis and tax balance engine for cryptocurrency exchange activity.
//!
//! Per-exchange CSV exports are translated into a canonical ledger of
//! value-exchange events, projected into fiat-priced open/close entries, and
//! aggregated into per-year balances with realized profit or loss. Two cost
//! methods are provided: moving average and yearly weighted average.
//!
//! The engine is synchronous and works over in-memory stores; downloading
//! price data and persisting results are the caller's concern.

mod base;
pub mod bitflyer;
pub mod bittrex;
mod calculate;
pub mod coincheck;
mod csvutil;
pub mod custom;
mod error;
mod ledger;
mod mam;
pub mod poloniex;
mod prices;
pub mod report;
mod time;
mod wam;

pub use base::{
    Balance, CostMethod, Entry, EntryType, Event, EventDraft, EventType, MarketPrice,
    TranslatedRecord, Transaction, YearConfig,
};
pub use calculate::{
    build_entries, calculate, update_balance_by_year, Calculator, ConfigBook, Options,
};
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use mam::MamCalculator;
pub use prices::{load_daily_close_csv, PriceBook, PRICE_WINDOW_HOURS};
pub use time::year_range;
pub use wam::WamCalculator;
