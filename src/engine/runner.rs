//! Backtest Runner
//!
//! Drives the daily loop for one strategy run: basis signal → state
//! machine → execution → fee accrual → mark-to-market → snapshot.
//!
//! # Ownership
//!
//! The runner owns the loop and is the sole writer of the snapshot
//! history. The state machine owns only its resting leg states and emits
//! intents; the execution model prices them; the ledger books them.
//!
//! # Day Atomicity & Error Policy
//!
//! Each date either completes fully or leaves no trace: the basis, every
//! fill price, and every valuation mark are resolved before any state
//! mutates, so a data gap rolls the day back to nothing. What happens
//! next is policy: `SkipAndLog` (default) records the day and moves on,
//! `Abort` fails the run. Position-invariant faults (`InvalidIntent`)
//! always abort regardless of policy, and every completed run reports its
//! skipped days for audit.
//!
//! The loop is inherently sequential along the date axis and is never
//! parallelized internally. Parallelism exists only across independent
//! runs (`run_parallel`), each with its own ledger and machine.

use crate::engine::basis::{compute_basis, BasisStats, BasisValue};
use crate::engine::calendar::TradingCalendar;
use crate::engine::equity::{EquityCurve, EquitySummary};
use crate::engine::errors::EngineError;
use crate::engine::execution::{ExecutionModel, FeeSchedule};
use crate::engine::ledger::{FeeTotals, LedgerSnapshot, PortfolioLedger, Trade};
use crate::engine::store::{Instrument, PriceStore};
use crate::engine::strategy::{DayPlan, StrategyMachine, StrategyVariant};
use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// What to do when a required price point is absent for a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DataErrorPolicy {
    /// Record the day in the skip log and continue. A gap in one series
    /// should not invalidate a multi-year run.
    #[default]
    SkipAndLog,
    /// Fail the whole run on the first gap.
    Abort,
}

/// Configuration for one strategy run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub variant: StrategyVariant,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub starting_capital: f64,
    pub fees: FeeSchedule,
    pub on_data_error: DataErrorPolicy,
}

impl BacktestConfig {
    pub fn new(variant: StrategyVariant, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            variant,
            start_date,
            end_date,
            starting_capital: 100_000.0,
            fees: FeeSchedule::default(),
            on_data_error: DataErrorPolicy::default(),
        }
    }

    /// Fail fast before the loop starts.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.start_date > self.end_date {
            return Err(EngineError::configuration(format!(
                "start date {} is after end date {}",
                self.start_date, self.end_date
            )));
        }
        if !(self.starting_capital.is_finite() && self.starting_capital > 0.0) {
            return Err(EngineError::configuration(format!(
                "starting capital must be positive, got {}",
                self.starting_capital
            )));
        }
        self.fees.validate()
    }
}

// =============================================================================
// RESULTS
// =============================================================================

/// A day the runner could not process, with the reason it was skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedDay {
    pub date: NaiveDate,
    pub reason: String,
}

/// Everything a completed run produces. Snapshots and the trade log are
/// the primary outputs; the rest is derived reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResults {
    pub variant: StrategyVariant,
    pub snapshots: Vec<LedgerSnapshot>,
    pub trades: Vec<Trade>,
    pub skipped_days: Vec<SkippedDay>,
    pub equity: EquitySummary,
    pub curve: EquityCurve,
    pub basis: BasisStats,
    pub fee_totals: FeeTotals,
}

impl BacktestResults {
    pub fn final_equity(&self) -> f64 {
        self.equity.final_equity
    }

    pub fn days_processed(&self) -> usize {
        self.snapshots.len()
    }
}

// =============================================================================
// RUNNER
// =============================================================================

/// Single-run driver. Borrows the store and calendar immutably so any
/// number of runners can share them across threads.
pub struct BacktestRunner<'a> {
    config: BacktestConfig,
    store: &'a PriceStore,
    calendar: &'a TradingCalendar,
}

impl<'a> BacktestRunner<'a> {
    pub fn new(
        config: BacktestConfig,
        store: &'a PriceStore,
        calendar: &'a TradingCalendar,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        for instrument in config.variant.instruments() {
            if !store.has(instrument) {
                return Err(EngineError::configuration(format!(
                    "{} requires a {} series but none is loaded",
                    config.variant, instrument
                )));
            }
        }
        Ok(Self {
            config,
            store,
            calendar,
        })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Run the full window and produce the performance series.
    pub fn run(&self) -> Result<BacktestResults, EngineError> {
        let window = self
            .calendar
            .clipped(self.config.start_date, self.config.end_date);
        if window.is_empty() {
            return Err(EngineError::configuration(format!(
                "no trading days between {} and {}",
                self.config.start_date, self.config.end_date
            )));
        }

        let exec = ExecutionModel::new(self.config.fees)?;
        let mut machine = StrategyMachine::new(self.config.variant);
        let mut ledger = PortfolioLedger::new(self.config.starting_capital);

        let mut snapshots: Vec<LedgerSnapshot> = Vec::with_capacity(window.len());
        let mut basis_values: Vec<BasisValue> = Vec::with_capacity(window.len());
        let mut skipped: Vec<SkippedDay> = Vec::new();

        info!(
            variant = %self.config.variant,
            start = %window.first().unwrap_or(self.config.start_date),
            end = %window.last().unwrap_or(self.config.end_date),
            days = window.len(),
            capital = self.config.starting_capital,
            "starting backtest"
        );

        for &date in window.dates() {
            match self.step_day(date, &exec, &mut machine, &mut ledger) {
                Ok((basis, snapshot)) => {
                    basis_values.push(basis);
                    snapshots.push(snapshot);
                }
                Err(err) if err.is_recoverable() => match self.config.on_data_error {
                    DataErrorPolicy::SkipAndLog => {
                        warn!(variant = %self.config.variant, %date, %err, "skipping day");
                        skipped.push(SkippedDay {
                            date,
                            reason: err.to_string(),
                        });
                    }
                    DataErrorPolicy::Abort => return Err(err),
                },
                Err(err) => return Err(err),
            }
        }

        let curve = EquityCurve::from_snapshots(&snapshots);
        let equity = EquitySummary::from_curve(&curve);
        let results = BacktestResults {
            variant: self.config.variant,
            trades: ledger.trades().to_vec(),
            fee_totals: ledger.fee_totals(),
            basis: BasisStats::from_values(&basis_values),
            snapshots,
            skipped_days: skipped,
            equity,
            curve,
        };

        info!(
            variant = %self.config.variant,
            days = results.days_processed(),
            trades = results.trades.len(),
            skipped = results.skipped_days.len(),
            final_equity = results.equity.final_equity,
            total_return = results.equity.total_return,
            "backtest complete"
        );
        Ok(results)
    }

    /// Process one trading day. Resolves the signal, the fill prices, and
    /// the valuation marks before mutating anything, so an `Err` return
    /// means the day left no trace.
    fn step_day(
        &self,
        date: NaiveDate,
        exec: &ExecutionModel,
        machine: &mut StrategyMachine,
        ledger: &mut PortfolioLedger,
    ) -> Result<(BasisValue, LedgerSnapshot), EngineError> {
        let basis = compute_basis(self.store, date)?;
        let plan = machine.plan(basis.regime());
        let marks = self.collect_marks(date, ledger, &plan)?;

        let intents = plan.ordered_intents();
        if !intents.is_empty() {
            debug!(%date, regime = %basis.regime(), intents = intents.len(), "rebalancing");
        }
        exec.execute_day(self.store, date, &intents, ledger)?;
        machine.commit(&plan);

        ledger.accrue_management(date, &marks, exec.fees().daily_management_rate())?;
        ledger.validate_exclusivity(date)?;
        let snapshot = ledger.mark_to_market(date, &marks)?;
        Ok((basis, snapshot))
    }

    /// Valuation marks for every instrument the day can touch: currently
    /// held plus every plan target. Fetched up front for day atomicity.
    fn collect_marks(
        &self,
        date: NaiveDate,
        ledger: &PortfolioLedger,
        plan: &DayPlan,
    ) -> Result<BTreeMap<Instrument, f64>, EngineError> {
        let mut instruments: BTreeSet<Instrument> =
            ledger.positions().map(|p| p.instrument).collect();
        for intent in plan.ordered_intents() {
            if intent.instrument.is_tradable() {
                instruments.insert(intent.instrument);
            }
        }

        let mut marks = BTreeMap::new();
        for instrument in instruments {
            marks.insert(instrument, self.store.mark(instrument, date)?);
        }
        Ok(marks)
    }
}

/// Run several independent configurations concurrently. Each run owns an
/// isolated ledger and machine; the shared store and calendar are
/// read-only, so nothing is communicated between runs and results merge
/// only after completion.
pub fn run_parallel(
    store: &PriceStore,
    calendar: &TradingCalendar,
    configs: Vec<BacktestConfig>,
) -> Vec<Result<BacktestResults, EngineError>> {
    configs
        .into_par_iter()
        .map(|config| BacktestRunner::new(config, store, calendar).and_then(|r| r.run()))
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================
