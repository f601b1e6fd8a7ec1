//! Portfolio Ledger
//!
//! Tracks cash, open positions, and the immutable trade log for one
//! strategy run, and produces the daily mark-to-market snapshot that is
//! the backtest's primary output.
//!
//! # Accounting
//!
//! Cash and fee totals are kept in fixed point (`Amount`, 8 decimal
//! places) so that repeated small fee postings stay exact; prices and
//! share quantities remain f64. Cash decreases on buys by notional plus
//! fees and increases on sells by notional minus fees. The trade log is
//! append-only; records are never mutated after posting.
//!
//! # Returns
//!
//! Daily return compounds from the configured starting capital:
//!
//! ```text
//! cum_t = cum_{t-1} * (1 + (equity_t - equity_{t-1}) / equity_{t-1})
//! ```
//!
//! with `equity_0` = starting capital and `cumulative_return = cum - 1`.

use crate::engine::errors::EngineError;
use crate::engine::store::{Instrument, PriceField};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// FIXED-POINT AMOUNT
// =============================================================================

/// Fixed-point cash amount with 8 decimal places.
pub type Amount = i128;

/// Conversion factor: 1.0 in currency = 100_000_000 units.
pub const AMOUNT_SCALE: i128 = 100_000_000;

/// Convert f64 to fixed-point Amount.
#[inline]
pub fn to_amount(value: f64) -> Amount {
    (value * AMOUNT_SCALE as f64).round() as Amount
}

/// Convert fixed-point Amount to f64.
#[inline]
pub fn from_amount(amount: Amount) -> f64 {
    amount as f64 / AMOUNT_SCALE as f64
}

/// Quantities below this are treated as a closed position.
const QTY_EPS: f64 = 1e-9;

// =============================================================================
// POSITIONS AND TRADES
// =============================================================================

/// An open holding. Quantity is signed: negative for shorts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub instrument: Instrument,
    pub quantity: f64,
    pub entry_price: f64,
    pub entry_date: NaiveDate,
}

impl Position {
    pub fn is_short(&self) -> bool {
        self.quantity < 0.0
    }

    /// Unsigned exposure at `price`.
    pub fn notional(&self, price: f64) -> f64 {
        self.quantity.abs() * price
    }

    /// Signed value at `price` (negative for shorts).
    pub fn market_value(&self, price: f64) -> f64 {
        self.quantity * price
    }
}

/// Cash direction of a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "buy"),
            TradeSide::Sell => write!(f, "sell"),
        }
    }
}

/// Explicit fee lines attached to a fill. Management fee accrues daily
/// against the ledger rather than per fill, so it is zero on entry and
/// exit records and reported through the run's fee totals instead.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TradeFees {
    pub brokerage: f64,
    pub slippage: f64,
    pub management_accrued: f64,
}

impl TradeFees {
    pub fn total(&self) -> f64 {
        self.brokerage + self.slippage + self.management_accrued
    }
}

/// One simulated fill. Immutable once posted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub date: NaiveDate,
    pub instrument: Instrument,
    pub side: TradeSide,
    /// Unsigned share count.
    pub quantity: f64,
    /// Fill price before fees (slippage is a fee line, not a price shift).
    pub gross_price: f64,
    pub fees: TradeFees,
    /// Signed cash impact: negative for buys, positive for sells.
    pub net_cash_flow: f64,
}

impl Trade {
    pub fn notional(&self) -> f64 {
        self.quantity * self.gross_price
    }
}

/// End-of-day state, one record per trading day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub date: NaiveDate,
    pub cash: f64,
    pub open_positions: Vec<Position>,
    /// Signed mark-to-market value of the open positions.
    pub market_value: f64,
    /// Cash plus market value.
    pub equity: f64,
    pub daily_return: f64,
    /// Compounded since inception; 0.0 means flat.
    pub cumulative_return: f64,
}

/// Accumulated fee drag over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeeTotals {
    pub brokerage: f64,
    pub slippage: f64,
    pub management: f64,
}

impl FeeTotals {
    pub fn total(&self) -> f64 {
        self.brokerage + self.slippage + self.management
    }
}

// =============================================================================
// LEDGER
// =============================================================================

/// Cash, positions, and trade history for a single strategy run.
#[derive(Debug, Clone)]
pub struct PortfolioLedger {
    starting_capital: f64,
    cash: Amount,
    positions: BTreeMap<Instrument, Position>,
    trades: Vec<Trade>,
    total_brokerage: Amount,
    total_slippage: Amount,
    total_management: Amount,
    prev_equity: f64,
    cum_growth: f64,
}

impl PortfolioLedger {
    pub fn new(starting_capital: f64) -> Self {
        Self {
            starting_capital,
            cash: to_amount(starting_capital),
            positions: BTreeMap::new(),
            trades: Vec::new(),
            total_brokerage: 0,
            total_slippage: 0,
            total_management: 0,
            prev_equity: starting_capital,
            cum_growth: 1.0,
        }
    }

    pub fn starting_capital(&self) -> f64 {
        self.starting_capital
    }

    pub fn cash(&self) -> f64 {
        from_amount(self.cash)
    }

    pub fn holds(&self, instrument: Instrument) -> bool {
        self.positions.contains_key(&instrument)
    }

    pub fn position(&self, instrument: Instrument) -> Option<&Position> {
        self.positions.get(&instrument)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn fee_totals(&self) -> FeeTotals {
        FeeTotals {
            brokerage: from_amount(self.total_brokerage),
            slippage: from_amount(self.total_slippage),
            management: from_amount(self.total_management),
        }
    }

    /// Post a fill: update the position book and cash, append to the log.
    ///
    /// Position arithmetic is derived from the held state and the trade
    /// side; a fill that would oversell a long, over-cover a short, or
    /// scale an open short is rejected as an `InvalidIntent` fault.
    pub fn apply_trade(&mut self, trade: Trade) -> Result<(), EngineError> {
        if !(trade.quantity > 0.0 && trade.quantity.is_finite()) {
            return Err(EngineError::invalid_intent(
                trade.date,
                format!("non-positive fill quantity {}", trade.quantity),
            ));
        }

        let signed_delta = match trade.side {
            TradeSide::Buy => trade.quantity,
            TradeSide::Sell => -trade.quantity,
        };

        match self.positions.get(&trade.instrument).copied() {
            None => {
                self.positions.insert(
                    trade.instrument,
                    Position {
                        instrument: trade.instrument,
                        quantity: signed_delta,
                        entry_price: trade.gross_price,
                        entry_date: trade.date,
                    },
                );
            }
            Some(pos) => {
                let new_qty = pos.quantity + signed_delta;
                match (pos.quantity > 0.0, trade.side) {
                    (true, TradeSide::Buy) => {
                        // Scale up a long: average the entry price in.
                        let entry_price = (pos.entry_price * pos.quantity
                            + trade.gross_price * trade.quantity)
                            / new_qty;
                        self.positions.insert(
                            trade.instrument,
                            Position {
                                quantity: new_qty,
                                entry_price,
                                ..pos
                            },
                        );
                    }
                    (true, TradeSide::Sell) => {
                        if new_qty < -QTY_EPS {
                            return Err(EngineError::invalid_intent(
                                trade.date,
                                format!(
                                    "sell of {} {} exceeds held {}",
                                    trade.quantity, trade.instrument, pos.quantity
                                ),
                            ));
                        }
                        if new_qty.abs() <= QTY_EPS {
                            self.positions.remove(&trade.instrument);
                        } else {
                            self.positions.insert(
                                trade.instrument,
                                Position {
                                    quantity: new_qty,
                                    ..pos
                                },
                            );
                        }
                    }
                    (false, TradeSide::Buy) => {
                        // Covering a short; flipping through zero is a fault.
                        if new_qty > QTY_EPS {
                            return Err(EngineError::invalid_intent(
                                trade.date,
                                format!(
                                    "cover of {} {} exceeds short {}",
                                    trade.quantity, trade.instrument, pos.quantity
                                ),
                            ));
                        }
                        if new_qty.abs() <= QTY_EPS {
                            self.positions.remove(&trade.instrument);
                        } else {
                            self.positions.insert(
                                trade.instrument,
                                Position {
                                    quantity: new_qty,
                                    ..pos
                                },
                            );
                        }
                    }
                    (false, TradeSide::Sell) => {
                        return Err(EngineError::invalid_intent(
                            trade.date,
                            format!("scaling an open {} short is not supported", trade.instrument),
                        ));
                    }
                }
            }
        }

        self.cash += to_amount(trade.net_cash_flow);
        self.total_brokerage += to_amount(trade.fees.brokerage);
        self.total_slippage += to_amount(trade.fees.slippage);
        self.total_management += to_amount(trade.fees.management_accrued);
        self.trades.push(trade);
        Ok(())
    }

    /// Charge the daily management accrual on every held position:
    /// `|quantity| * mark * daily_rate`, against cash. Returns the total
    /// charged for the day.
    pub fn accrue_management(
        &mut self,
        date: NaiveDate,
        marks: &BTreeMap<Instrument, f64>,
        daily_rate: f64,
    ) -> Result<f64, EngineError> {
        if daily_rate == 0.0 || self.positions.is_empty() {
            return Ok(0.0);
        }

        let mut total = 0.0;
        for pos in self.positions.values() {
            let mark = marks.get(&pos.instrument).copied().ok_or_else(|| {
                EngineError::missing_data(pos.instrument, PriceField::Close, date)
            })?;
            total += pos.notional(mark) * daily_rate;
        }

        let charged = to_amount(total);
        self.cash -= charged;
        self.total_management += charged;
        Ok(from_amount(charged))
    }

    /// Value the book at the day's marks and roll the return series.
    pub fn mark_to_market(
        &mut self,
        date: NaiveDate,
        marks: &BTreeMap<Instrument, f64>,
    ) -> Result<LedgerSnapshot, EngineError> {
        let mut market_value = 0.0;
        for pos in self.positions.values() {
            let mark = marks.get(&pos.instrument).copied().ok_or_else(|| {
                EngineError::missing_data(pos.instrument, PriceField::Close, date)
            })?;
            market_value += pos.market_value(mark);
        }

        let cash = from_amount(self.cash);
        let equity = cash + market_value;
        let daily_return = if self.prev_equity.abs() > f64::EPSILON {
            (equity - self.prev_equity) / self.prev_equity
        } else {
            0.0
        };
        self.cum_growth *= 1.0 + daily_return;
        self.prev_equity = equity;

        Ok(LedgerSnapshot {
            date,
            cash,
            open_positions: self.positions.values().cloned().collect(),
            market_value,
            equity,
            daily_return,
            cumulative_return: self.cum_growth - 1.0,
        })
    }

    /// The resting-state exclusivity check: a run must never hold the
    /// long-vol and short-vol ETF at the same time.
    pub fn validate_exclusivity(&self, date: NaiveDate) -> Result<(), EngineError> {
        if self.holds(Instrument::Vixy) && self.holds(Instrument::Svxy) {
            return Err(EngineError::invalid_intent(
                date,
                "resting long VIXY and long SVXY simultaneously",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2019, 6, day).unwrap()
    }

    fn buy(instrument: Instrument, qty: f64, price: f64) -> Trade {
        let notional = qty * price;
        Trade {
            date: d(3),
            instrument,
            side: TradeSide::Buy,
            quantity: qty,
            gross_price: price,
            fees: TradeFees::default(),
            net_cash_flow: -notional,
        }
    }

    fn sell(instrument: Instrument, qty: f64, price: f64) -> Trade {
        let notional = qty * price;
        Trade {
            date: d(4),
            instrument,
            side: TradeSide::Sell,
            quantity: qty,
            gross_price: price,
            fees: TradeFees::default(),
            net_cash_flow: notional,
        }
    }

    #[test]
    fn buy_then_sell_round_trip() {
        let mut ledger = PortfolioLedger::new(10_000.0);

        ledger.apply_trade(buy(Instrument::Svxy, 100.0, 50.0)).unwrap();
        assert!((ledger.cash() - 5_000.0).abs() < 1e-9);
        assert_eq!(ledger.position(Instrument::Svxy).unwrap().quantity, 100.0);

        ledger.apply_trade(sell(Instrument::Svxy, 100.0, 55.0)).unwrap();
        assert!((ledger.cash() - 10_500.0).abs() < 1e-9);
        assert!(!ledger.holds(Instrument::Svxy));
        assert_eq!(ledger.trades().len(), 2);
    }

    #[test]
    fn fees_reduce_cash_on_both_sides() {
        let mut ledger = PortfolioLedger::new(10_000.0);

        let mut trade = buy(Instrument::Vixy, 100.0, 50.0);
        trade.fees = TradeFees {
            brokerage: 7.5,
            slippage: 2.0,
            management_accrued: 0.0,
        };
        trade.net_cash_flow = -(5_000.0 + trade.fees.total());
        ledger.apply_trade(trade).unwrap();

        assert!((ledger.cash() - (10_000.0 - 5_009.5)).abs() < 1e-9);
        let totals = ledger.fee_totals();
        assert!((totals.brokerage - 7.5).abs() < 1e-9);
        assert!((totals.slippage - 2.0).abs() < 1e-9);
    }

    #[test]
    fn add_on_buy_averages_entry_price() {
        let mut ledger = PortfolioLedger::new(100_000.0);

        ledger.apply_trade(buy(Instrument::Spy, 100.0, 280.0)).unwrap();
        ledger.apply_trade(buy(Instrument::Spy, 100.0, 290.0)).unwrap();

        let pos = ledger.position(Instrument::Spy).unwrap();
        assert_eq!(pos.quantity, 200.0);
        assert!((pos.entry_price - 285.0).abs() < 1e-9);
        assert_eq!(pos.entry_date, d(3));
    }

    #[test]
    fn short_open_and_cover() {
        let mut ledger = PortfolioLedger::new(10_000.0);

        // Opening short credits the proceeds.
        ledger.apply_trade(sell(Instrument::Spy, 10.0, 280.0)).unwrap();
        assert!((ledger.cash() - 12_800.0).abs() < 1e-9);
        assert!(ledger.position(Instrument::Spy).unwrap().is_short());

        // Cover debits them back.
        ledger.apply_trade(buy(Instrument::Spy, 10.0, 290.0)).unwrap();
        assert!((ledger.cash() - 9_900.0).abs() < 1e-9);
        assert!(!ledger.holds(Instrument::Spy));
    }

    #[test]
    fn overselling_is_a_fault() {
        let mut ledger = PortfolioLedger::new(10_000.0);
        ledger.apply_trade(buy(Instrument::Vixy, 10.0, 20.0)).unwrap();

        let err = ledger
            .apply_trade(sell(Instrument::Vixy, 20.0, 20.0))
            .unwrap_err();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn management_accrual_matches_schedule() {
        let mut ledger = PortfolioLedger::new(20_000.0);
        ledger.apply_trade(buy(Instrument::Vixy, 100.0, 100.0)).unwrap();

        // 10_000 notional at 0.85% annual, one day's accrual.
        let daily_rate = 0.0085 / 365.0;
        let marks = BTreeMap::from([(Instrument::Vixy, 100.0)]);
        let charged = ledger.accrue_management(d(4), &marks, daily_rate).unwrap();

        assert!((charged - 10_000.0 * 0.0085 / 365.0).abs() < 1e-6);
        assert!((charged - 0.2329).abs() < 1e-4);
        assert!((ledger.fee_totals().management - charged).abs() < 1e-9);
    }

    #[test]
    fn returns_compound_daily() {
        let mut ledger = PortfolioLedger::new(10_000.0);
        ledger.apply_trade(buy(Instrument::Svxy, 100.0, 100.0)).unwrap();

        let snap1 = ledger
            .mark_to_market(d(3), &BTreeMap::from([(Instrument::Svxy, 101.0)]))
            .unwrap();
        assert!((snap1.equity - 10_100.0).abs() < 1e-9);
        assert!((snap1.daily_return - 0.01).abs() < 1e-9);
        assert!((snap1.cumulative_return - 0.01).abs() < 1e-9);

        let snap2 = ledger
            .mark_to_market(d(4), &BTreeMap::from([(Instrument::Svxy, 102.01)]))
            .unwrap();
        assert!((snap2.daily_return - 0.01).abs() < 1e-6);
        assert!((snap2.cumulative_return - 0.0201).abs() < 1e-6);
    }

    #[test]
    fn exclusivity_violation_detected() {
        let mut ledger = PortfolioLedger::new(100_000.0);
        ledger.apply_trade(buy(Instrument::Vixy, 10.0, 20.0)).unwrap();
        assert!(ledger.validate_exclusivity(d(3)).is_ok());

        ledger.apply_trade(buy(Instrument::Svxy, 10.0, 50.0)).unwrap();
        assert!(ledger.validate_exclusivity(d(3)).is_err());
    }

    #[test]
    fn missing_mark_is_missing_data() {
        let mut ledger = PortfolioLedger::new(10_000.0);
        ledger.apply_trade(buy(Instrument::Vixy, 10.0, 20.0)).unwrap();

        let err = ledger.mark_to_market(d(3), &BTreeMap::new()).unwrap_err();
        assert!(err.is_recoverable());
    }
}
