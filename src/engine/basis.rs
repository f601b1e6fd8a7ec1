//! Basis Indicator
//!
//! Computes the daily term-structure basis from the VIX front-month
//! future and spot opens:
//!
//! ```text
//! basis_t = future_open(t) / spot_open(t) - 1
//! ```
//!
//! The sign classifies the regime: positive basis means the future trades
//! above spot (contango), negative means below (backwardation). A basis
//! of exactly zero is classified as contango.
//!
//! `compute_basis` is a pure function of the two opens: no internal
//! state, no smoothing, deterministic, and it propagates `MissingData`
//! from the store untouched.

use crate::engine::errors::EngineError;
use crate::engine::store::{Instrument, PriceStore};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// =============================================================================
// REGIME
// =============================================================================

/// Term-structure regime implied by the basis sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Regime {
    /// Future at or above spot (basis >= 0).
    Contango,
    /// Future below spot (basis < 0).
    Backwardation,
}

impl Regime {
    /// Classify a basis value. Zero counts as contango.
    pub fn from_basis(value: f64) -> Self {
        if value < 0.0 {
            Regime::Backwardation
        } else {
            Regime::Contango
        }
    }
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Regime::Contango => write!(f, "contango"),
            Regime::Backwardation => write!(f, "backwardation"),
        }
    }
}

// =============================================================================
// BASIS VALUE
// =============================================================================

/// One day's basis observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BasisValue {
    pub date: NaiveDate,
    pub value: f64,
}

impl BasisValue {
    pub fn regime(&self) -> Regime {
        Regime::from_basis(self.value)
    }

    pub fn bps(&self) -> f64 {
        self.value * 10_000.0
    }
}

/// Compute the basis for one day from the two index opens.
pub fn compute_basis(store: &PriceStore, date: NaiveDate) -> Result<BasisValue, EngineError> {
    let future_open = store.open(Instrument::VixFuture, date)?;
    let spot_open = store.open(Instrument::VixSpot, date)?;
    Ok(BasisValue {
        date,
        value: future_open / spot_open - 1.0,
    })
}

// =============================================================================
// BASIS STATISTICS
// =============================================================================

/// Summary statistics over a run's basis series. Reporting only; the
/// trading decision consumes the raw daily sign, never these aggregates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BasisStats {
    /// Number of observations.
    pub count: usize,
    /// Mean basis.
    pub mean: f64,
    /// Sample standard deviation of the basis.
    pub std_dev: f64,
    /// Minimum basis observed.
    pub min: f64,
    /// Maximum basis observed.
    pub max: f64,
    /// Days classified contango.
    pub contango_days: usize,
    /// Days classified backwardation.
    pub backwardation_days: usize,
    /// Regime changes between consecutive observations.
    pub regime_flips: usize,
}

impl BasisStats {
    pub fn from_values(values: &[BasisValue]) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        let n = values.len();
        let mean = values.iter().map(|v| v.value).sum::<f64>() / n as f64;
        let variance = if n > 1 {
            values
                .iter()
                .map(|v| (v.value - mean).powi(2))
                .sum::<f64>()
                / (n - 1) as f64
        } else {
            0.0
        };

        let min = values.iter().map(|v| v.value).fold(f64::INFINITY, f64::min);
        let max = values
            .iter()
            .map(|v| v.value)
            .fold(f64::NEG_INFINITY, f64::max);

        let contango_days = values
            .iter()
            .filter(|v| v.regime() == Regime::Contango)
            .count();

        let regime_flips = values
            .windows(2)
            .filter(|w| w[0].regime() != w[1].regime())
            .count();

        Self {
            count: n,
            mean,
            std_dev: variance.sqrt(),
            min,
            max,
            contango_days,
            backwardation_days: n - contango_days,
            regime_flips,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::store::{PricePoint, PriceSeries};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2019, 6, day).unwrap()
    }

    fn store(spot: f64, future: f64) -> PriceStore {
        PriceStore::from_series([
            PriceSeries::new(Instrument::VixSpot, vec![PricePoint::new(d(3), spot)]).unwrap(),
            PriceSeries::new(Instrument::VixFuture, vec![PricePoint::new(d(3), future)]).unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn basis_from_opens() {
        let basis = compute_basis(&store(20.0, 21.0), d(3)).unwrap();
        assert!((basis.value - 0.05).abs() < 1e-12);
        assert_eq!(basis.regime(), Regime::Contango);

        let basis = compute_basis(&store(20.0, 19.0), d(3)).unwrap();
        assert!((basis.value + 0.05).abs() < 1e-12);
        assert_eq!(basis.regime(), Regime::Backwardation);
    }

    #[test]
    fn zero_basis_counts_as_contango() {
        let basis = compute_basis(&store(20.0, 20.0), d(3)).unwrap();
        assert_eq!(basis.value, 0.0);
        assert_eq!(basis.regime(), Regime::Contango);
    }

    #[test]
    fn missing_future_open_propagates() {
        let store = PriceStore::from_series([PriceSeries::new(
            Instrument::VixSpot,
            vec![PricePoint::new(d(3), 20.0)],
        )
        .unwrap()])
        .unwrap();

        assert!(compute_basis(&store, d(3)).unwrap_err().is_recoverable());
    }

    #[test]
    fn stats_count_regimes_and_flips() {
        let values = vec![
            BasisValue { date: d(3), value: 0.05 },
            BasisValue { date: d(4), value: -0.05 },
            BasisValue { date: d(5), value: -0.02 },
            BasisValue { date: d(6), value: 0.01 },
        ];
        let stats = BasisStats::from_values(&values);

        assert_eq!(stats.count, 4);
        assert_eq!(stats.contango_days, 2);
        assert_eq!(stats.backwardation_days, 2);
        assert_eq!(stats.regime_flips, 2);
        assert!((stats.min + 0.05).abs() < 1e-12);
        assert!((stats.max - 0.05).abs() < 1e-12);
        assert!(stats.std_dev > 0.0);
    }
}
