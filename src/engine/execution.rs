//! Execution & Cost Model
//!
//! Converts a day's intents into simulated fills at that day's open
//! prices, with transaction costs applied.
//!
//! # Cost Mechanics
//!
//! - Brokerage: 15 bps of notional per fill, explicit fee line.
//! - Slippage: 4 bps of notional per fill, **modeled as an explicit fee
//!   line rather than an adverse price shift**: fills are recorded at
//!   the quoted open and the charge sits next to brokerage in the trade
//!   record, which keeps gross prices reconcilable against the input
//!   series.
//! - Management: 85 bps annualized, accrued daily against the ledger for
//!   every held position (`PortfolioLedger::accrue_management`), never
//!   attached to fills.
//!
//! # Day Atomicity
//!
//! Every fill price for the day is resolved before any fill is applied,
//! so a missing quote fails the whole day with the ledger untouched and
//! the runner's skip policy can treat the day as if it never happened.
//!
//! # Sizing
//!
//! Entries compete for the post-unwind cash pro rata by intent weight,
//! and share counts are floored to two decimals. The fee factor is baked
//! into the divisor so an entry can never overdraw cash:
//!
//! ```text
//! qty = floor(alloc / (open * (1 + brokerage_rate + slippage_rate)) * 100) / 100
//! ```

use crate::engine::errors::EngineError;
use crate::engine::ledger::{PortfolioLedger, Trade, TradeFees, TradeSide};
use crate::engine::store::{Instrument, PriceStore};
use crate::engine::strategy::{Intent, IntentKind, Side};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// FEE SCHEDULE
// =============================================================================

/// Transaction-cost assumptions, in basis points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Per-fill brokerage, bps of notional.
    pub brokerage_bps: f64,
    /// Per-fill slippage, bps of notional.
    pub slippage_bps: f64,
    /// Annualized management drag, bps, accrued daily over 365 days.
    pub annual_management_bps: f64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            brokerage_bps: 15.0,
            slippage_bps: 4.0,
            annual_management_bps: 85.0,
        }
    }
}

impl FeeSchedule {
    pub fn validate(&self) -> Result<(), EngineError> {
        for (name, value) in [
            ("brokerage_bps", self.brokerage_bps),
            ("slippage_bps", self.slippage_bps),
            ("annual_management_bps", self.annual_management_bps),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(EngineError::configuration(format!(
                    "{name} must be a non-negative rate, got {value}"
                )));
            }
        }
        Ok(())
    }

    pub fn brokerage_rate(&self) -> f64 {
        self.brokerage_bps / 10_000.0
    }

    pub fn slippage_rate(&self) -> f64 {
        self.slippage_bps / 10_000.0
    }

    /// Combined per-fill cost rate applied to entries when sizing.
    pub fn fill_cost_rate(&self) -> f64 {
        self.brokerage_rate() + self.slippage_rate()
    }

    /// Daily management accrual rate.
    pub fn daily_management_rate(&self) -> f64 {
        self.annual_management_bps / 10_000.0 / 365.0
    }
}

/// Two-decimal share quantization, floored.
pub fn quantize_shares(raw: f64) -> f64 {
    (raw * 100.0).floor() / 100.0
}

// =============================================================================
// EXECUTION MODEL
// =============================================================================

#[derive(Debug, Clone)]
pub struct ExecutionModel {
    fees: FeeSchedule,
}

impl ExecutionModel {
    pub fn new(fees: FeeSchedule) -> Result<Self, EngineError> {
        fees.validate()?;
        Ok(Self { fees })
    }

    pub fn fees(&self) -> &FeeSchedule {
        &self.fees
    }

    /// Execute one day's intents, in order, against the ledger.
    ///
    /// Closes and trims are expected ahead of entries (the state machine
    /// emits them that way); entries split the post-unwind cash pro rata
    /// by weight. Fails with `MissingData` before any state change if a
    /// quote is absent, and with `InvalidIntent` if an intent conflicts
    /// with the held book; the latter is an assertion boundary that is
    /// unreachable when fed by a correct state machine.
    pub fn execute_day(
        &self,
        store: &PriceStore,
        date: NaiveDate,
        intents: &[Intent],
        ledger: &mut PortfolioLedger,
    ) -> Result<Vec<Trade>, EngineError> {
        if intents.is_empty() {
            return Ok(Vec::new());
        }

        // Resolve every fill price up front; nothing mutates on failure.
        let mut opens: BTreeMap<Instrument, f64> = BTreeMap::new();
        for intent in intents {
            if !opens.contains_key(&intent.instrument) {
                opens.insert(intent.instrument, store.open(intent.instrument, date)?);
            }
        }

        let mut fills = Vec::with_capacity(intents.len());

        // Unwinds first: they free the capital the entries will split.
        for intent in intents.iter().filter(|i| i.is_closing()) {
            let open = opens[&intent.instrument];
            let trade = self.fill_close(date, intent, open, ledger)?;
            ledger.apply_trade(trade.clone())?;
            fills.push(trade);
        }

        let total_weight: f64 = intents
            .iter()
            .filter_map(|i| match i.kind {
                IntentKind::Enter { weight, .. } => Some(weight),
                _ => None,
            })
            .sum();
        let investable = ledger.cash();

        for intent in intents.iter().filter(|i| !i.is_closing()) {
            let IntentKind::Enter { side, weight } = intent.kind else {
                continue;
            };
            let open = opens[&intent.instrument];
            let alloc = investable * weight / total_weight;
            let trade = self.fill_entry(date, intent.instrument, side, alloc, open, ledger)?;
            ledger.apply_trade(trade.clone())?;
            fills.push(trade);
        }

        Ok(fills)
    }

    fn fill_fees(&self, notional: f64) -> TradeFees {
        TradeFees {
            brokerage: notional * self.fees.brokerage_rate(),
            slippage: notional * self.fees.slippage_rate(),
            management_accrued: 0.0,
        }
    }

    fn fill_close(
        &self,
        date: NaiveDate,
        intent: &Intent,
        open: f64,
        ledger: &PortfolioLedger,
    ) -> Result<Trade, EngineError> {
        let pos = ledger.position(intent.instrument).ok_or_else(|| {
            EngineError::invalid_intent(
                date,
                format!("close of {} but no position held", intent.instrument),
            )
        })?;

        let quantity = match intent.kind {
            IntentKind::Exit => pos.quantity.abs(),
            IntentKind::Trim { fraction } => {
                if !(fraction > 0.0 && fraction < 1.0) {
                    return Err(EngineError::invalid_intent(
                        date,
                        format!("trim fraction {fraction} outside (0, 1)"),
                    ));
                }
                if pos.is_short() {
                    return Err(EngineError::invalid_intent(
                        date,
                        format!("trim of {} short is not supported", intent.instrument),
                    ));
                }
                quantize_shares(pos.quantity * fraction)
            }
            IntentKind::Enter { .. } => unreachable!("entry routed to fill_close"),
        };

        let notional = quantity * open;
        let fees = self.fill_fees(notional);
        let (side, net_cash_flow) = if pos.is_short() {
            // Cover: pay notional plus costs.
            (TradeSide::Buy, -(notional + fees.brokerage + fees.slippage))
        } else {
            (TradeSide::Sell, notional - fees.brokerage - fees.slippage)
        };

        Ok(Trade {
            date,
            instrument: intent.instrument,
            side,
            quantity,
            gross_price: open,
            fees,
            net_cash_flow,
        })
    }

    fn fill_entry(
        &self,
        date: NaiveDate,
        instrument: Instrument,
        side: Side,
        alloc: f64,
        open: f64,
        ledger: &PortfolioLedger,
    ) -> Result<Trade, EngineError> {
        if !instrument.is_tradable() {
            return Err(EngineError::invalid_intent(
                date,
                format!("{instrument} is observable only, not tradable"),
            ));
        }

        // The VIX-leg exclusivity invariant, re-checked at the fill
        // boundary so a defective plan cannot corrupt the book.
        let rival = match instrument {
            Instrument::Vixy => Some(Instrument::Svxy),
            Instrument::Svxy => Some(Instrument::Vixy),
            _ => None,
        };
        if let Some(rival) = rival {
            if ledger.holds(rival) {
                return Err(EngineError::invalid_intent(
                    date,
                    format!("entering {instrument} while {rival} is still held"),
                ));
            }
        }
        if let Some(pos) = ledger.position(instrument) {
            let held_side = if pos.is_short() { Side::Short } else { Side::Long };
            if held_side != side {
                return Err(EngineError::invalid_intent(
                    date,
                    format!("entering {instrument} {side} against a held {held_side} position"),
                ));
            }
        }

        let quantity = quantize_shares(alloc / (open * (1.0 + self.fees.fill_cost_rate())));
        if quantity <= 0.0 {
            return Err(EngineError::invalid_intent(
                date,
                format!(
                    "{instrument} allocation {alloc:.2} cannot buy a hundredth of a share at {open:.2}"
                ),
            ));
        }

        let notional = quantity * open;
        let fees = self.fill_fees(notional);
        let (trade_side, net_cash_flow) = match side {
            Side::Long => (TradeSide::Buy, -(notional + fees.brokerage + fees.slippage)),
            Side::Short => (TradeSide::Sell, notional - fees.brokerage - fees.slippage),
        };

        Ok(Trade {
            date,
            instrument,
            side: trade_side,
            quantity,
            gross_price: open,
            fees,
            net_cash_flow,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
