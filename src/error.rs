use chrono::{DateTime, Utc};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Engine error kinds, propagated up unchanged.
#[derive(Debug, Error)]
pub enum Error {
    /// A raw record could not be decoded.
    #[error("parse error at line {line}, column {column}: {message}")]
    Parse {
        line: u64,
        column: String,
        message: String,
    },

    /// A record cannot be expressed in the event taxonomy.
    #[error("cannot translate record {record}: {reason}")]
    Structural { record: String, reason: String },

    /// No market price inside the forward lookup window.
    #[error("no market price found for {currency}/{base_currency} at {time}")]
    PriceUnavailable {
        currency: String,
        base_currency: String,
        time: DateTime<Utc>,
    },

    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    /// A post-condition of the entry builder or a calculator failed. Guards
    /// against bugs; should never fire on well-formed inputs.
    #[error("invariant violation: {detail}")]
    InvariantViolation { detail: String },

    /// The caller raised the cancellation flag; the current year's staged
    /// results were discarded.
    #[error("calculation cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn structural(record: impl std::fmt::Debug, reason: impl Into<String>) -> Self {
        Error::Structural {
            record: format!("{:?}", record),
            reason: reason.into(),
        }
    }

    pub(crate) fn invariant(detail: impl Into<String>) -> Self {
        Error::InvariantViolation {
            detail: detail.into(),
        }
    }
}
