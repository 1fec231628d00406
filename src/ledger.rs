use std::collections::BTreeMap;

use chrono::TimeZone;
use serde::Serialize;

use crate::base::{Balance, Entry, Event, TranslatedRecord, Transaction};
use crate::error::{Error, Result};
use crate::time::year_range;

/// In-memory event ledger: transactions and their events, plus the stamped
/// entries and per-year balances the calculation driver commits.
///
/// Transactions and events are immutable once recorded. Entries and balances
/// of a year are replaced wholesale whenever that year is recalculated.
#[derive(Debug, Default, Serialize)]
pub struct Ledger {
    transactions: Vec<Transaction>,
    events: Vec<Event>,
    entries: Vec<Entry>,
    balances: BTreeMap<i32, Vec<Balance>>,
    #[serde(skip)]
    next_transaction_id: i64,
    #[serde(skip)]
    next_event_id: i64,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one translated source record as a transaction with its events.
    ///
    /// Zero-quantity events are dropped. A negative quantity is a translator
    /// bug: direction lives in the event type.
    pub fn record(
        &mut self,
        wallet_code: &str,
        wallet_tid: i64,
        translated: TranslatedRecord,
    ) -> Result<i64> {
        let TranslatedRecord {
            time,
            description,
            events,
        } = translated;

        for draft in &events {
            if draft.quantity.is_sign_negative() && !draft.quantity.is_zero() {
                return Err(Error::invariant(format!(
                    "negative quantity {} {} in {} event from {}",
                    draft.quantity, draft.currency, draft.event_type, wallet_code
                )));
            }
        }

        self.next_transaction_id += 1;
        let transaction_id = self.next_transaction_id;
        self.transactions.push(Transaction {
            id: transaction_id,
            time,
            wallet_code: wallet_code.to_owned(),
            wallet_tid,
            description,
        });

        for draft in events {
            if draft.quantity.is_zero() {
                continue;
            }
            self.next_event_id += 1;
            self.events.push(Event {
                id: self.next_event_id,
                transaction_id,
                time,
                event_type: draft.event_type,
                currency: draft.currency,
                quantity: draft.quantity,
                base_currency: draft.base_currency,
                base_quantity: draft.base_quantity,
            });
        }

        Ok(transaction_id)
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Balance rows of a year; empty when the year has not been calculated.
    pub fn balances_for(&self, year: i32) -> &[Balance] {
        self.balances.get(&year).map_or(&[], Vec::as_slice)
    }

    /// The year's events ordered by `(time, transaction_id, event_id)`.
    ///
    /// Events of one transaction share its timestamp, so the ordering keeps
    /// transactions contiguous and preserves the translator-emitted order
    /// inside each of them.
    pub fn events_in_year<Tz: TimeZone>(&self, year: i32, tz: &Tz) -> Result<Vec<Event>> {
        let (start, end) = year_range(year, tz)?;
        let mut events: Vec<Event> = self
            .events
            .iter()
            .filter(|e| e.time >= start && e.time < end)
            .cloned()
            .collect();
        events.sort_by(|a, b| {
            a.time
                .cmp(&b.time)
                .then(a.transaction_id.cmp(&b.transaction_id))
                .then(a.id.cmp(&b.id))
        });
        Ok(events)
    }

    /// Commits one calculated year: replaces its stamped entries and balance
    /// rows wholesale, making recalculation idempotent.
    pub fn commit_year<Tz: TimeZone>(
        &mut self,
        year: i32,
        tz: &Tz,
        entries: Vec<Entry>,
        balances: Vec<Balance>,
    ) -> Result<()> {
        let (start, end) = year_range(year, tz)?;
        self.entries.retain(|e| e.time < start || e.time >= end);
        self.entries.extend(entries);
        self.entries
            .sort_by(|a, b| a.time.cmp(&b.time).then(a.id.cmp(&b.id)));
        self.balances.insert(year, balances);
        Ok(())
    }
}
