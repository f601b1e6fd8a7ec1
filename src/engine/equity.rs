//! Date-Indexed Equity Curve
//!
//! Reproducible equity series derived from the daily ledger snapshots.
//!
//! # Design Principles
//!
//! 1. **Ledger-derived**: every point comes from a `LedgerSnapshot`; the
//!    curve never accumulates PnL on its own.
//! 2. **Strictly ordered**: points are strictly increasing by date.
//! 3. **Deterministic**: identical runs produce identical curves and an
//!    identical rolling-hash fingerprint, hashed over fixed-point values
//!    so two runs can be compared without float-formatting noise.

use crate::engine::ledger::{to_amount, LedgerSnapshot};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

// =============================================================================
// EQUITY POINT
// =============================================================================

/// A single observation on the equity curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    /// Cash plus marked position value.
    pub equity: f64,
    pub cash: f64,
    pub position_value: f64,
    /// Distance below the running peak.
    pub drawdown: f64,
    /// Drawdown as basis points of the peak (500 = 5.00%).
    pub drawdown_bps: i64,
}

// =============================================================================
// EQUITY CURVE
// =============================================================================

/// Ordered equity observations with running peak/drawdown tracking and a
/// deterministic fingerprint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EquityCurve {
    points: Vec<EquityPoint>,
    peak_equity: f64,
    rolling_hash: u64,
}

impl EquityCurve {
    /// Seed for the rolling hash.
    const HASH_SEED: u64 = 0xEC11_EC11_EC11_EC11;

    pub fn new() -> Self {
        Self {
            points: Vec::new(),
            peak_equity: 0.0,
            rolling_hash: Self::HASH_SEED,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
            peak_equity: 0.0,
            rolling_hash: Self::HASH_SEED,
        }
    }

    /// Build the whole curve from a run's snapshot sequence.
    pub fn from_snapshots(snapshots: &[LedgerSnapshot]) -> Self {
        let mut curve = Self::with_capacity(snapshots.len());
        for snap in snapshots {
            curve.record(snap.date, snap.equity, snap.cash, snap.market_value);
        }
        curve
    }

    /// Record one observation.
    ///
    /// # Panics
    ///
    /// Panics if `date` is not strictly after the last recorded date;
    /// the runner produces at most one snapshot per trading day, so a
    /// violation here is a harness fault.
    pub fn record(&mut self, date: NaiveDate, equity: f64, cash: f64, position_value: f64) {
        if let Some(last) = self.points.last() {
            assert!(
                date > last.date,
                "equity curve dates must be strictly increasing: {} <= {}",
                date,
                last.date
            );
        }

        if self.points.is_empty() || equity > self.peak_equity {
            self.peak_equity = equity;
        }
        let drawdown = self.peak_equity - equity;
        let drawdown_bps = if self.peak_equity > 0.0 {
            ((drawdown / self.peak_equity) * 10_000.0).round() as i64
        } else {
            0
        };

        let point = EquityPoint {
            date,
            equity,
            cash,
            position_value,
            drawdown,
            drawdown_bps,
        };
        self.update_hash(&point);
        self.points.push(point);
    }

    fn update_hash(&mut self, point: &EquityPoint) {
        let mut hasher = DefaultHasher::new();
        self.rolling_hash.hash(&mut hasher);
        point.date.num_days_from_ce().hash(&mut hasher);
        to_amount(point.equity).hash(&mut hasher);
        to_amount(point.cash).hash(&mut hasher);
        self.rolling_hash = hasher.finish();
    }

    pub fn points(&self) -> &[EquityPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&EquityPoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&EquityPoint> {
        self.points.last()
    }

    pub fn peak_equity(&self) -> f64 {
        if self.points.is_empty() {
            0.0
        } else {
            self.peak_equity
        }
    }

    pub fn max_drawdown(&self) -> f64 {
        self.points
            .iter()
            .map(|p| p.drawdown)
            .fold(0.0, f64::max)
    }

    pub fn max_drawdown_bps(&self) -> i64 {
        self.points.iter().map(|p| p.drawdown_bps).max().unwrap_or(0)
    }

    /// Deterministic fingerprint of the whole curve.
    pub fn rolling_hash(&self) -> u64 {
        self.rolling_hash
    }

    pub fn verify_monotonicity(&self) -> bool {
        self.points.windows(2).all(|w| w[0].date < w[1].date)
    }

    /// Point-to-point simple returns.
    pub fn returns(&self) -> Vec<f64> {
        self.points
            .windows(2)
            .map(|w| {
                if w[0].equity.abs() > 1e-10 {
                    (w[1].equity - w[0].equity) / w[0].equity
                } else {
                    0.0
                }
            })
            .collect()
    }
}

// =============================================================================
// SUMMARY
// =============================================================================

/// Headline numbers for one run's curve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EquitySummary {
    pub point_count: usize,
    pub initial_equity: f64,
    pub final_equity: f64,
    pub peak_equity: f64,
    /// final / initial - 1.
    pub total_return: f64,
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub rolling_hash: u64,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl EquitySummary {
    pub fn from_curve(curve: &EquityCurve) -> Self {
        let initial = curve.first().map(|p| p.equity).unwrap_or(0.0);
        let final_eq = curve.last().map(|p| p.equity).unwrap_or(0.0);
        let total_return = if initial.abs() > 1e-10 {
            final_eq / initial - 1.0
        } else {
            0.0
        };

        Self {
            point_count: curve.len(),
            initial_equity: initial,
            final_equity: final_eq,
            peak_equity: curve.peak_equity(),
            total_return,
            max_drawdown: curve.max_drawdown(),
            max_drawdown_pct: curve.max_drawdown_bps() as f64 / 10_000.0,
            rolling_hash: curve.rolling_hash(),
            start_date: curve.first().map(|p| p.date),
            end_date: curve.last().map(|p| p.date),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
