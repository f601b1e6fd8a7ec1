//! Engine Error Taxonomy
//!
//! Three failure classes with very different blast radii:
//!
//! - `MissingData`: a required price point is absent. Recoverable: the
//!   runner's data-error policy decides between skipping the day and
//!   aborting the run.
//! - `InvalidIntent`: the position invariant would be violated. A logic
//!   fault, never recoverable; the run aborts because continuing after a
//!   corrupted position state produces unusable results.
//! - `Configuration`: malformed run configuration, rejected before the
//!   daily loop starts.

use crate::engine::store::{Instrument, PriceField};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// All errors surfaced by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineError {
    /// A price field is absent for the requested instrument/date.
    MissingData {
        instrument: Instrument,
        field: PriceField,
        date: NaiveDate,
    },

    /// An intent would break the position invariant. Fatal.
    InvalidIntent { date: NaiveDate, detail: String },

    /// Run configuration rejected before the loop starts. Fatal.
    Configuration { detail: String },
}

impl EngineError {
    pub fn missing_data(instrument: Instrument, field: PriceField, date: NaiveDate) -> Self {
        Self::MissingData {
            instrument,
            field,
            date,
        }
    }

    pub fn invalid_intent(date: NaiveDate, detail: impl Into<String>) -> Self {
        Self::InvalidIntent {
            date,
            detail: detail.into(),
        }
    }

    pub fn configuration(detail: impl Into<String>) -> Self {
        Self::Configuration {
            detail: detail.into(),
        }
    }

    /// Whether the per-day error policy may absorb this error.
    /// Only data gaps qualify; logic and configuration faults never do.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::MissingData { .. })
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingData {
                instrument,
                field,
                date,
            } => write!(f, "missing {} {} price on {}", instrument, field, date),
            Self::InvalidIntent { date, detail } => {
                write!(f, "invalid intent on {}: {}", date, detail)
            }
            Self::Configuration { detail } => write!(f, "configuration error: {}", detail),
        }
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_missing_data_is_recoverable() {
        let date = NaiveDate::from_ymd_opt(2019, 6, 3).unwrap();

        let missing = EngineError::missing_data(Instrument::VixFuture, PriceField::Open, date);
        assert!(missing.is_recoverable());

        let invalid = EngineError::invalid_intent(date, "second VIX-leg position");
        assert!(!invalid.is_recoverable());

        let config = EngineError::configuration("start after end");
        assert!(!config.is_recoverable());
    }

    #[test]
    fn display_names_the_gap() {
        let date = NaiveDate::from_ymd_opt(2019, 6, 3).unwrap();
        let err = EngineError::missing_data(Instrument::VixSpot, PriceField::Open, date);
        assert_eq!(err.to_string(), "missing VIX open price on 2019-06-03");
    }
}
