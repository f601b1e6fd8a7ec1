//! Backtesting Engine
//!
//! Deterministic daily backtesting engine for VIX term-structure
//! strategies (LSV, HLSV, LSLV).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      BacktestRunner                         │
//! │   (owns the daily loop, sole writer of snapshot history)    │
//! └─────────────────────────────────────────────────────────────┘
//!          │                  │                    │
//!          ▼                  ▼                    ▼
//! ┌────────────────┐ ┌─────────────────┐ ┌─────────────────────┐
//! │ BasisIndicator │ │ StrategyMachine │ │  TradingCalendar    │
//! │ (future/spot)  │ │ (VIX × hedge)   │ │  (immutable, shared)│
//! └───────┬────────┘ └────────┬────────┘ └─────────────────────┘
//!         │                   │ intents
//!         │                   ▼
//!         │          ┌─────────────────┐
//!         │          │ ExecutionModel  │
//!         │          │ (fills + costs) │
//!         │          └────────┬────────┘
//!         │                   ▼
//!         │          ┌─────────────────┐       ┌───────────────┐
//!         └─────────▶│ PortfolioLedger │──────▶│  EquityCurve  │
//!    (prices from    │ (cash/positions)│       │  (reporting)  │
//!     PriceStore)    └─────────────────┘       └───────────────┘
//! ```
//!
//! # Determinism Guarantees
//!
//! - All time comes from the explicit `TradingCalendar`; nothing reads
//!   the system clock.
//! - Transitions are pure functions of (state, signal); identical runs
//!   produce identical trade logs and equity fingerprints.
//! - The daily loop is strictly sequential; concurrency exists only
//!   across independent runs with no shared mutable state.

pub mod basis;
pub mod calendar;
pub mod data;
pub mod equity;
pub mod errors;
pub mod execution;
pub mod ledger;
pub mod runner;
pub mod store;
pub mod strategy;

// Re-exports for convenience
pub use basis::{compute_basis, BasisStats, BasisValue, Regime};
pub use calendar::TradingCalendar;
pub use data::{load_series, load_store};
pub use equity::{EquityCurve, EquityPoint, EquitySummary};
pub use errors::EngineError;
pub use execution::{quantize_shares, ExecutionModel, FeeSchedule};
pub use ledger::{
    from_amount, to_amount, Amount, FeeTotals, LedgerSnapshot, PortfolioLedger, Position, Trade,
    TradeFees, TradeSide, AMOUNT_SCALE,
};
pub use runner::{
    run_parallel, BacktestConfig, BacktestResults, BacktestRunner, DataErrorPolicy, SkippedDay,
};
pub use store::{Instrument, PriceField, PricePoint, PriceSeries, PriceStore};
pub use strategy::{
    step_leg, DayPlan, Exposure, Intent, IntentKind, LegSpec, LegState, LegTransition, Side,
    StrategyMachine, StrategyVariant,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        let calendar = TradingCalendar::from_dates(Vec::new());
        assert!(calendar.is_empty());

        let machine = StrategyMachine::new(StrategyVariant::Lsv);
        assert_eq!(machine.variant(), StrategyVariant::Lsv);
    }
}
