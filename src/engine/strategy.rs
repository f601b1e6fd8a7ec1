//! Strategy State Machines
//!
//! Daily position targeting for the term-structure strategies. A strategy
//! is a composite of up to two legs, the VIX leg and an equity hedge leg, and
//! every leg runs the same transition contract:
//!
//! ```text
//! step_leg(spec, state, regime) -> (next_state, closes, opens)
//! ```
//!
//! # Transition Rules
//!
//! 1. **Pure and deterministic**: identical (state, signal) pairs produce
//!    identical transitions. Planning never mutates the machine; the new
//!    state is committed only after the day's fills succeed, so a failed
//!    day leaves the machine exactly where it was.
//! 2. **Close before open**: within a leg, exits and trims always precede
//!    entries. Legs may interleave at the day level, but the combined
//!    ordering still places every close ahead of every open so sale
//!    proceeds fund the entries.
//! 3. **No churn**: a leg already at its target holds; repeated signals
//!    in the same regime produce zero intents after the first entry.
//! 4. **Exclusivity**: the VIX leg targets at most one of VIXY/SVXY per
//!    regime, so the machine can never rest long both.

use crate::engine::basis::Regime;
use crate::engine::store::Instrument;
use serde::{Deserialize, Serialize};

/// Weights are discrete configuration constants; this tolerance only
/// absorbs representation noise, never economic differences.
const WEIGHT_EPS: f64 = 1e-9;

// =============================================================================
// EXPOSURE
// =============================================================================

/// Direction of an exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

/// One leg's holding: an instrument, a direction, and the share of
/// portfolio capital the leg commands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Exposure {
    pub instrument: Instrument,
    pub side: Side,
    pub weight: f64,
}

impl Exposure {
    pub fn long(instrument: Instrument, weight: f64) -> Self {
        Self {
            instrument,
            side: Side::Long,
            weight,
        }
    }

    pub fn short(instrument: Instrument, weight: f64) -> Self {
        Self {
            instrument,
            side: Side::Short,
            weight,
        }
    }

    /// Same instrument and direction (weight may differ).
    fn same_book(&self, other: &Exposure) -> bool {
        self.instrument == other.instrument && self.side == other.side
    }
}

// =============================================================================
// INTENTS
// =============================================================================

/// What a strategy asks the execution model to do. Intents carry no
/// prices and no fees; they are sized and costed downstream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum IntentKind {
    /// Open or scale up an exposure. `weight` is the slice of the day's
    /// investable cash this entry competes for.
    Enter { side: Side, weight: f64 },
    /// Close the full position.
    Exit,
    /// Sell `fraction` of the current quantity, keep the rest.
    Trim { fraction: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub instrument: Instrument,
    pub kind: IntentKind,
}

impl Intent {
    pub fn enter(instrument: Instrument, side: Side, weight: f64) -> Self {
        Self {
            instrument,
            kind: IntentKind::Enter { side, weight },
        }
    }

    pub fn exit(instrument: Instrument) -> Self {
        Self {
            instrument,
            kind: IntentKind::Exit,
        }
    }

    pub fn trim(instrument: Instrument, fraction: f64) -> Self {
        Self {
            instrument,
            kind: IntentKind::Trim { fraction },
        }
    }

    /// Exits and trims free capital; entries consume it.
    pub fn is_closing(&self) -> bool {
        matches!(self.kind, IntentKind::Exit | IntentKind::Trim { .. })
    }
}

// =============================================================================
// SINGLE-LEG MACHINE
// =============================================================================

/// What one leg should hold in each regime. `None` means stay flat.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LegSpec {
    pub contango: Option<Exposure>,
    pub backwardation: Option<Exposure>,
}

impl LegSpec {
    pub fn target(&self, regime: Regime) -> Option<Exposure> {
        match regime {
            Regime::Contango => self.contango,
            Regime::Backwardation => self.backwardation,
        }
    }
}

/// Resting state of a single leg: flat, or holding one exposure.
pub type LegState = Option<Exposure>;

/// The outcome of stepping one leg: the state it will rest in once the
/// day's fills are applied, and the intents to get there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegTransition {
    pub next: LegState,
    pub closes: Vec<Intent>,
    pub opens: Vec<Intent>,
}

impl LegTransition {
    fn hold(state: LegState) -> Self {
        Self {
            next: state,
            closes: Vec::new(),
            opens: Vec::new(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.closes.is_empty() && self.opens.is_empty()
    }
}

/// Pure single-leg transition: move `state` to the spec's target for
/// `regime`, emitting closes strictly before opens.
pub fn step_leg(spec: &LegSpec, state: &LegState, regime: Regime) -> LegTransition {
    let target = spec.target(regime);

    match (*state, target) {
        // Flat and staying flat.
        (None, None) => LegTransition::hold(None),

        // Fresh entry.
        (None, Some(t)) => LegTransition {
            next: Some(t),
            closes: Vec::new(),
            opens: vec![Intent::enter(t.instrument, t.side, t.weight)],
        },

        // Full unwind to flat.
        (Some(held), None) => LegTransition {
            next: None,
            closes: vec![Intent::exit(held.instrument)],
            opens: Vec::new(),
        },

        (Some(held), Some(t)) => {
            if held.same_book(&t) {
                let delta = t.weight - held.weight;
                if delta.abs() <= WEIGHT_EPS {
                    // Already at target; repeated signals are no-ops.
                    LegTransition::hold(Some(held))
                } else if delta < 0.0 {
                    // Scale down: sell the excess fraction of the holding.
                    LegTransition {
                        next: Some(t),
                        closes: vec![Intent::trim(held.instrument, -delta / held.weight)],
                        opens: Vec::new(),
                    }
                } else {
                    // Scale up: buy more of the same book with the freed cash.
                    LegTransition {
                        next: Some(t),
                        closes: Vec::new(),
                        opens: vec![Intent::enter(t.instrument, t.side, delta)],
                    }
                }
            } else {
                // Different instrument or direction: unwind first, then enter.
                LegTransition {
                    next: Some(t),
                    closes: vec![Intent::exit(held.instrument)],
                    opens: vec![Intent::enter(t.instrument, t.side, t.weight)],
                }
            }
        }
    }
}

// =============================================================================
// STRATEGY VARIANTS
// =============================================================================

/// The strategy family. All variants trade the same daily basis signal;
/// they differ in leg composition and capital split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyVariant {
    /// Long-Short Volatility: all capital rotates between SVXY (contango)
    /// and VIXY (backwardation).
    Lsv,
    /// Hedged Long-Short Volatility: half the capital runs LSV, the other
    /// half holds SPY: long in backwardation, short in contango.
    Hlsv,
    /// Long-Short Low Volatility: 100% SPY in contango; in backwardation
    /// a quarter of the book moves into VIXY, leaving 75% SPY.
    Lslv,
}

impl StrategyVariant {
    pub const ALL: [StrategyVariant; 3] = [
        StrategyVariant::Lsv,
        StrategyVariant::Hlsv,
        StrategyVariant::Lslv,
    ];

    pub fn vix_leg(&self) -> LegSpec {
        match self {
            StrategyVariant::Lsv => LegSpec {
                contango: Some(Exposure::long(Instrument::Svxy, 1.0)),
                backwardation: Some(Exposure::long(Instrument::Vixy, 1.0)),
            },
            StrategyVariant::Hlsv => LegSpec {
                contango: Some(Exposure::long(Instrument::Svxy, 0.5)),
                backwardation: Some(Exposure::long(Instrument::Vixy, 0.5)),
            },
            StrategyVariant::Lslv => LegSpec {
                contango: None,
                backwardation: Some(Exposure::long(Instrument::Vixy, 0.25)),
            },
        }
    }

    pub fn hedge_leg(&self) -> Option<LegSpec> {
        match self {
            StrategyVariant::Lsv => None,
            StrategyVariant::Hlsv => Some(LegSpec {
                contango: Some(Exposure::short(Instrument::Spy, 0.5)),
                backwardation: Some(Exposure::long(Instrument::Spy, 0.5)),
            }),
            StrategyVariant::Lslv => Some(LegSpec {
                contango: Some(Exposure::long(Instrument::Spy, 1.0)),
                backwardation: Some(Exposure::long(Instrument::Spy, 0.75)),
            }),
        }
    }

    /// Every instrument a run of this variant needs loaded.
    pub fn instruments(&self) -> Vec<Instrument> {
        let mut out = vec![Instrument::VixSpot, Instrument::VixFuture];
        let legs = [Some(self.vix_leg()), self.hedge_leg()];
        for spec in legs.into_iter().flatten() {
            for exposure in [spec.contango, spec.backwardation].into_iter().flatten() {
                if !out.contains(&exposure.instrument) {
                    out.push(exposure.instrument);
                }
            }
        }
        out
    }
}

impl std::fmt::Display for StrategyVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyVariant::Lsv => write!(f, "LSV"),
            StrategyVariant::Hlsv => write!(f, "HLSV"),
            StrategyVariant::Lslv => write!(f, "LSLV"),
        }
    }
}

impl std::str::FromStr for StrategyVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lsv" => Ok(StrategyVariant::Lsv),
            "hlsv" => Ok(StrategyVariant::Hlsv),
            "lslv" => Ok(StrategyVariant::Lslv),
            other => Err(format!("unknown strategy variant: {other}")),
        }
    }
}

// =============================================================================
// COMPOSITE MACHINE
// =============================================================================

/// One day's planned transitions across both legs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayPlan {
    pub vix: LegTransition,
    pub hedge: Option<LegTransition>,
}

impl DayPlan {
    /// Combined intent order for execution: every close/trim across both
    /// legs first (VIX leg ahead of hedge), then every entry in the same
    /// leg order. Per-leg close-before-open is preserved by construction.
    pub fn ordered_intents(&self) -> Vec<Intent> {
        let mut out = Vec::new();
        out.extend(self.vix.closes.iter().copied());
        if let Some(hedge) = &self.hedge {
            out.extend(hedge.closes.iter().copied());
        }
        out.extend(self.vix.opens.iter().copied());
        if let Some(hedge) = &self.hedge {
            out.extend(hedge.opens.iter().copied());
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.vix.is_noop() && self.hedge.as_ref().map_or(true, |h| h.is_noop())
    }
}

/// Composite state machine for one strategy run: primary VIX leg plus an
/// optional hedge leg, combined only at the intent-ordering stage. For
/// these variants both legs consume the daily basis regime as their
/// signal; the leg machinery itself is signal-agnostic.
#[derive(Debug, Clone)]
pub struct StrategyMachine {
    variant: StrategyVariant,
    vix_spec: LegSpec,
    hedge_spec: Option<LegSpec>,
    vix_state: LegState,
    hedge_state: LegState,
}

impl StrategyMachine {
    pub fn new(variant: StrategyVariant) -> Self {
        Self {
            variant,
            vix_spec: variant.vix_leg(),
            hedge_spec: variant.hedge_leg(),
            vix_state: None,
            hedge_state: None,
        }
    }

    pub fn variant(&self) -> StrategyVariant {
        self.variant
    }

    pub fn vix_state(&self) -> &LegState {
        &self.vix_state
    }

    pub fn hedge_state(&self) -> &LegState {
        &self.hedge_state
    }

    /// Plan the day's transitions. Pure: the machine is not mutated, so a
    /// day that fails downstream (missing price) discards the plan and
    /// leaves the resting state untouched.
    pub fn plan(&self, regime: Regime) -> DayPlan {
        DayPlan {
            vix: step_leg(&self.vix_spec, &self.vix_state, regime),
            hedge: self
                .hedge_spec
                .as_ref()
                .map(|spec| step_leg(spec, &self.hedge_state, regime)),
        }
    }

    /// Adopt the planned resting states after the day's fills applied.
    pub fn commit(&mut self, plan: &DayPlan) {
        self.vix_state = plan.vix.next;
        if let Some(hedge) = &plan.hedge {
            self.hedge_state = hedge.next;
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lsv_enters_svxy_on_contango_from_flat() {
        let machine = StrategyMachine::new(StrategyVariant::Lsv);
        let plan = machine.plan(Regime::Contango);

        assert_eq!(
            plan.ordered_intents(),
            vec![Intent::enter(Instrument::Svxy, Side::Long, 1.0)]
        );
        assert_eq!(plan.vix.next, Some(Exposure::long(Instrument::Svxy, 1.0)));
    }

    #[test]
    fn lsv_flip_unwinds_before_entering() {
        let mut machine = StrategyMachine::new(StrategyVariant::Lsv);
        let entry = machine.plan(Regime::Backwardation);
        machine.commit(&entry);

        let flip = machine.plan(Regime::Contango);
        assert_eq!(
            flip.ordered_intents(),
            vec![
                Intent::exit(Instrument::Vixy),
                Intent::enter(Instrument::Svxy, Side::Long, 1.0),
            ]
        );
    }

    #[test]
    fn repeated_regime_is_a_noop() {
        let mut machine = StrategyMachine::new(StrategyVariant::Lsv);
        let entry = machine.plan(Regime::Contango);
        machine.commit(&entry);

        for _ in 0..5 {
            let plan = machine.plan(Regime::Contango);
            assert!(plan.is_empty());
            machine.commit(&plan);
        }
        assert_eq!(machine.vix_state(), &Some(Exposure::long(Instrument::Svxy, 1.0)));
    }

    #[test]
    fn planning_does_not_mutate_state() {
        let machine = StrategyMachine::new(StrategyVariant::Lsv);
        let first = machine.plan(Regime::Contango);
        let second = machine.plan(Regime::Contango);

        // Identical (state, signal) pairs produce identical plans.
        assert_eq!(first, second);
        assert_eq!(machine.vix_state(), &None);
    }

    #[test]
    fn hlsv_splits_capital_and_shorts_the_hedge_in_contango() {
        let machine = StrategyMachine::new(StrategyVariant::Hlsv);
        let plan = machine.plan(Regime::Contango);

        assert_eq!(
            plan.ordered_intents(),
            vec![
                Intent::enter(Instrument::Svxy, Side::Long, 0.5),
                Intent::enter(Instrument::Spy, Side::Short, 0.5),
            ]
        );
    }

    #[test]
    fn hlsv_flip_closes_both_legs_before_reentering() {
        let mut machine = StrategyMachine::new(StrategyVariant::Hlsv);
        let entry = machine.plan(Regime::Contango);
        machine.commit(&entry);

        let flip = machine.plan(Regime::Backwardation);
        assert_eq!(
            flip.ordered_intents(),
            vec![
                Intent::exit(Instrument::Svxy),
                Intent::exit(Instrument::Spy),
                Intent::enter(Instrument::Vixy, Side::Long, 0.5),
                Intent::enter(Instrument::Spy, Side::Long, 0.5),
            ]
        );
    }

    #[test]
    fn lslv_trims_the_hedge_into_backwardation() {
        let mut machine = StrategyMachine::new(StrategyVariant::Lslv);
        let entry = machine.plan(Regime::Contango);
        assert_eq!(
            entry.ordered_intents(),
            vec![Intent::enter(Instrument::Spy, Side::Long, 1.0)]
        );
        machine.commit(&entry);

        let flip = machine.plan(Regime::Backwardation);
        let intents = flip.ordered_intents();
        assert_eq!(intents.len(), 2);
        assert_eq!(intents[1], Intent::enter(Instrument::Vixy, Side::Long, 0.25));
        match intents[0] {
            Intent {
                instrument: Instrument::Spy,
                kind: IntentKind::Trim { fraction },
            } => assert!((fraction - 0.25).abs() < 1e-12),
            other => panic!("expected SPY trim, got {other:?}"),
        }
    }

    #[test]
    fn lslv_tops_the_hedge_back_up_in_contango() {
        let mut machine = StrategyMachine::new(StrategyVariant::Lslv);
        for regime in [Regime::Contango, Regime::Backwardation] {
            let plan = machine.plan(regime);
            machine.commit(&plan);
        }

        let back = machine.plan(Regime::Contango);
        assert_eq!(
            back.ordered_intents(),
            vec![
                Intent::exit(Instrument::Vixy),
                Intent::enter(Instrument::Spy, Side::Long, 0.25),
            ]
        );
        machine.commit(&back);
        assert_eq!(machine.hedge_state(), &Some(Exposure::long(Instrument::Spy, 1.0)));
    }

    #[test]
    fn vix_leg_never_targets_both_etfs() {
        for variant in StrategyVariant::ALL {
            let spec = variant.vix_leg();
            for target in [spec.contango, spec.backwardation].into_iter().flatten() {
                assert!(matches!(
                    target.instrument,
                    Instrument::Vixy | Instrument::Svxy
                ));
            }
            // A single target per regime by construction; flipping regimes
            // swaps the instrument rather than stacking a second one.
            if let (Some(c), Some(b)) = (spec.contango, spec.backwardation) {
                assert_ne!(c.instrument, b.instrument);
            }
        }
    }

    #[test]
    fn variant_instrument_requirements() {
        assert_eq!(
            StrategyVariant::Lsv.instruments(),
            vec![
                Instrument::VixSpot,
                Instrument::VixFuture,
                Instrument::Svxy,
                Instrument::Vixy,
            ]
        );
        assert!(StrategyVariant::Hlsv.instruments().contains(&Instrument::Spy));
        assert!(!StrategyVariant::Lslv.instruments().contains(&Instrument::Svxy));
    }

    #[test]
    fn variant_parses_case_insensitively() {
        assert_eq!("lsv".parse::<StrategyVariant>().unwrap(), StrategyVariant::Lsv);
        assert_eq!("HLSV".parse::<StrategyVariant>().unwrap(), StrategyVariant::Hlsv);
        assert!("xyz".parse::<StrategyVariant>().is_err());
    }
}
