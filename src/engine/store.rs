//! Price Series Store
//!
//! Immutable, time-indexed open/close price data per instrument. The store
//! is loaded once up front and then only read; it is the leaf dependency
//! for the signal, execution, and valuation layers.
//!
//! # Contract
//!
//! - Series are strictly increasing by date with no duplicates, validated
//!   at construction. A series that fails validation is never stored.
//! - Lookups never interpolate or forward-fill. A missing field is a
//!   `MissingData` error, and the caller decides what a gap means.
//! - Index instruments (VIX spot, VIX front-month future) carry opens
//!   only; the ETF legs carry opens and closes.

use crate::engine::errors::EngineError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

// =============================================================================
// INSTRUMENTS
// =============================================================================

/// The tradable and observable instruments the engine knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Instrument {
    /// VIX spot index (observable only, open only).
    VixSpot,
    /// VIX front-month future (observable only, open only).
    VixFuture,
    /// Long-volatility ETF leg.
    Vixy,
    /// Short-volatility ETF leg.
    Svxy,
    /// Equity hedge leg.
    Spy,
}

impl Instrument {
    pub const ALL: [Instrument; 5] = [
        Instrument::VixSpot,
        Instrument::VixFuture,
        Instrument::Vixy,
        Instrument::Svxy,
        Instrument::Spy,
    ];

    pub fn ticker(&self) -> &'static str {
        match self {
            Instrument::VixSpot => "VIX",
            Instrument::VixFuture => "VX",
            Instrument::Vixy => "VIXY",
            Instrument::Svxy => "SVXY",
            Instrument::Spy => "SPY",
        }
    }

    /// Whether this instrument's series carries a close column.
    pub fn has_close(&self) -> bool {
        matches!(self, Instrument::Vixy | Instrument::Svxy | Instrument::Spy)
    }

    /// Whether the instrument can actually be held (the index inputs cannot).
    pub fn is_tradable(&self) -> bool {
        self.has_close()
    }
}

impl std::fmt::Display for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.ticker())
    }
}

/// Which price field a lookup asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceField {
    Open,
    Close,
}

impl std::fmt::Display for PriceField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriceField::Open => write!(f, "open"),
            PriceField::Close => write!(f, "close"),
        }
    }
}

// =============================================================================
// PRICE POINTS AND SERIES
// =============================================================================

/// One day of prices for one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub open: f64,
    pub close: Option<f64>,
}

impl PricePoint {
    pub fn new(date: NaiveDate, open: f64) -> Self {
        Self {
            date,
            open,
            close: None,
        }
    }

    pub fn with_close(date: NaiveDate, open: f64, close: f64) -> Self {
        Self {
            date,
            open,
            close: Some(close),
        }
    }
}

/// An ordered, validated price history for one instrument.
///
/// Immutable once constructed; all accessors are read-only.
#[derive(Debug, Clone)]
pub struct PriceSeries {
    instrument: Instrument,
    points: Vec<PricePoint>,
    by_date: HashMap<NaiveDate, usize>,
}

impl PriceSeries {
    /// Validate and freeze a series.
    ///
    /// Rejects empty input, out-of-order or duplicate dates, non-positive
    /// or non-finite prices, and close values on open-only instruments.
    pub fn new(instrument: Instrument, points: Vec<PricePoint>) -> Result<Self, EngineError> {
        if points.is_empty() {
            return Err(EngineError::configuration(format!(
                "{} series is empty",
                instrument
            )));
        }

        let mut by_date = HashMap::with_capacity(points.len());
        let mut prev: Option<NaiveDate> = None;
        for (idx, point) in points.iter().enumerate() {
            if let Some(prev_date) = prev {
                if point.date <= prev_date {
                    return Err(EngineError::configuration(format!(
                        "{} series not strictly increasing at {} (follows {})",
                        instrument, point.date, prev_date
                    )));
                }
            }
            if !(point.open.is_finite() && point.open > 0.0) {
                return Err(EngineError::configuration(format!(
                    "{} open on {} is not a positive price: {}",
                    instrument, point.date, point.open
                )));
            }
            match point.close {
                Some(close) if !instrument.has_close() => {
                    return Err(EngineError::configuration(format!(
                        "{} is open-only but has a close on {} ({})",
                        instrument, point.date, close
                    )));
                }
                Some(close) if !(close.is_finite() && close > 0.0) => {
                    return Err(EngineError::configuration(format!(
                        "{} close on {} is not a positive price: {}",
                        instrument, point.date, close
                    )));
                }
                _ => {}
            }
            by_date.insert(point.date, idx);
            prev = Some(point.date);
        }

        Ok(Self {
            instrument,
            points,
            by_date,
        })
    }

    pub fn instrument(&self) -> Instrument {
        self.instrument
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first_date(&self) -> NaiveDate {
        self.points[0].date
    }

    pub fn last_date(&self) -> NaiveDate {
        self.points[self.points.len() - 1].date
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.points.iter().map(|p| p.date)
    }

    fn point(&self, date: NaiveDate) -> Option<&PricePoint> {
        self.by_date.get(&date).map(|&idx| &self.points[idx])
    }

    pub fn open(&self, date: NaiveDate) -> Result<f64, EngineError> {
        self.point(date)
            .map(|p| p.open)
            .ok_or_else(|| EngineError::missing_data(self.instrument, PriceField::Open, date))
    }

    pub fn close(&self, date: NaiveDate) -> Result<f64, EngineError> {
        self.point(date)
            .and_then(|p| p.close)
            .ok_or_else(|| EngineError::missing_data(self.instrument, PriceField::Close, date))
    }
}

// =============================================================================
// STORE
// =============================================================================

/// Read-only collection of price series keyed by instrument.
#[derive(Debug, Clone, Default)]
pub struct PriceStore {
    series: BTreeMap<Instrument, PriceSeries>,
}

impl PriceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a series. Each instrument may be loaded at most once.
    pub fn insert(&mut self, series: PriceSeries) -> Result<(), EngineError> {
        let instrument = series.instrument();
        if self.series.contains_key(&instrument) {
            return Err(EngineError::configuration(format!(
                "{} series loaded twice",
                instrument
            )));
        }
        self.series.insert(instrument, series);
        Ok(())
    }

    pub fn from_series(
        series: impl IntoIterator<Item = PriceSeries>,
    ) -> Result<Self, EngineError> {
        let mut store = Self::new();
        for s in series {
            store.insert(s)?;
        }
        Ok(store)
    }

    pub fn series(&self, instrument: Instrument) -> Option<&PriceSeries> {
        self.series.get(&instrument)
    }

    pub fn has(&self, instrument: Instrument) -> bool {
        self.series.contains_key(&instrument)
    }

    pub fn instruments(&self) -> impl Iterator<Item = Instrument> + '_ {
        self.series.keys().copied()
    }

    pub fn open(&self, instrument: Instrument, date: NaiveDate) -> Result<f64, EngineError> {
        self.series
            .get(&instrument)
            .ok_or_else(|| EngineError::missing_data(instrument, PriceField::Open, date))?
            .open(date)
    }

    pub fn close(&self, instrument: Instrument, date: NaiveDate) -> Result<f64, EngineError> {
        self.series
            .get(&instrument)
            .ok_or_else(|| EngineError::missing_data(instrument, PriceField::Close, date))?
            .close(date)
    }

    /// Valuation price: close where present, else the same day's open.
    pub fn mark(&self, instrument: Instrument, date: NaiveDate) -> Result<f64, EngineError> {
        let series = self
            .series
            .get(&instrument)
            .ok_or_else(|| EngineError::missing_data(instrument, PriceField::Open, date))?;
        match series.close(date) {
            Ok(close) => Ok(close),
            Err(_) => series.open(date),
        }
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

    #[test]
    fn open_round_trips_exactly() {
        let points = vec![
            PricePoint::new(d(3), 15.25),
            PricePoint::new(d(4), 16.5),
            PricePoint::new(d(5), 14.875),
        ];
        let series = PriceSeries::new(Instrument::VixSpot, points.clone()).unwrap();

        for p in &points {
            assert_eq!(series.open(p.date).unwrap(), p.open);
        }
    }

    #[test]
    fn missing_date_is_an_error_not_a_fill() {
        let series =
            PriceSeries::new(Instrument::VixSpot, vec![PricePoint::new(d(3), 15.0)]).unwrap();

        let err = series.open(d(4)).unwrap_err();
        assert_eq!(
            err,
            EngineError::missing_data(Instrument::VixSpot, PriceField::Open, d(4))
        );
    }

    #[test]
    fn out_of_order_dates_rejected() {
        let points = vec![PricePoint::new(d(4), 15.0), PricePoint::new(d(3), 16.0)];
        assert!(PriceSeries::new(Instrument::VixSpot, points).is_err());
    }

    #[test]
    fn duplicate_dates_rejected() {
        let points = vec![PricePoint::new(d(3), 15.0), PricePoint::new(d(3), 16.0)];
        assert!(PriceSeries::new(Instrument::VixSpot, points).is_err());
    }

    #[test]
    fn close_on_open_only_instrument_rejected() {
        let points = vec![PricePoint::with_close(d(3), 15.0, 15.5)];
        assert!(PriceSeries::new(Instrument::VixFuture, points).is_err());
    }

    #[test]
    fn close_lookup_on_open_only_point_errors() {
        let series = PriceSeries::new(
            Instrument::Vixy,
            vec![PricePoint::new(d(3), 22.0), PricePoint::with_close(d(4), 22.5, 23.0)],
        )
        .unwrap();

        assert!(series.close(d(3)).is_err());
        assert_eq!(series.close(d(4)).unwrap(), 23.0);
    }

    #[test]
    fn mark_prefers_close_then_open() {
        let mut store = PriceStore::new();
        store
            .insert(
                PriceSeries::new(
                    Instrument::Vixy,
                    vec![
                        PricePoint::with_close(d(3), 22.0, 23.0),
                        PricePoint::new(d(4), 24.0),
                    ],
                )
                .unwrap(),
            )
            .unwrap();

        assert_eq!(store.mark(Instrument::Vixy, d(3)).unwrap(), 23.0);
        assert_eq!(store.mark(Instrument::Vixy, d(4)).unwrap(), 24.0);
    }

    #[test]
    fn double_load_rejected() {
        let series_a =
            PriceSeries::new(Instrument::Spy, vec![PricePoint::with_close(d(3), 280.0, 281.0)])
                .unwrap();
        let series_b =
            PriceSeries::new(Instrument::Spy, vec![PricePoint::with_close(d(4), 282.0, 283.0)])
                .unwrap();

        let mut store = PriceStore::new();
        store.insert(series_a).unwrap();
        assert!(store.insert(series_b).is_err());
    }
}
