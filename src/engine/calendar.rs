//! Trading Calendar
//!
//! Explicit, immutable set of trading days. Built once from the loaded
//! price series and passed by shared reference into every run; there is
//! no ambient global calendar, so concurrent runs never contend on it.
//!
//! The calendar is the union of all loaded series' dates: a day on which
//! any instrument printed is a candidate trading day, and instruments
//! that did not print surface as per-day `MissingData` during the loop
//! rather than being silently dropped from the window.

use crate::engine::store::PriceStore;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Ordered, de-duplicated trading days.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingCalendar {
    dates: Vec<NaiveDate>,
}

impl TradingCalendar {
    /// Build from explicit dates; sorts and de-duplicates.
    pub fn from_dates(mut dates: Vec<NaiveDate>) -> Self {
        dates.sort_unstable();
        dates.dedup();
        Self { dates }
    }

    /// Union of every loaded series' dates.
    pub fn from_store(store: &PriceStore) -> Self {
        let mut dates = Vec::new();
        for instrument in store.instruments() {
            if let Some(series) = store.series(instrument) {
                dates.extend(series.dates());
            }
        }
        Self::from_dates(dates)
    }

    /// The calendar restricted to `[start, end]` inclusive.
    pub fn clipped(&self, start: NaiveDate, end: NaiveDate) -> Self {
        let dates = self
            .dates
            .iter()
            .copied()
            .filter(|d| *d >= start && *d <= end)
            .collect();
        Self { dates }
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn first(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.dates.binary_search(&date).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::store::{Instrument, PricePoint, PriceSeries};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2019, 6, day).unwrap()
    }

    #[test]
    fn from_dates_sorts_and_dedups() {
        let cal = TradingCalendar::from_dates(vec![d(5), d(3), d(4), d(3)]);
        assert_eq!(cal.dates(), &[d(3), d(4), d(5)]);
    }

    #[test]
    fn union_of_series_dates() {
        let spot =
            PriceSeries::new(Instrument::VixSpot, vec![PricePoint::new(d(3), 15.0)]).unwrap();
        let future = PriceSeries::new(
            Instrument::VixFuture,
            vec![PricePoint::new(d(3), 16.0), PricePoint::new(d(4), 16.2)],
        )
        .unwrap();
        let store = PriceStore::from_series([spot, future]).unwrap();

        let cal = TradingCalendar::from_store(&store);
        assert_eq!(cal.dates(), &[d(3), d(4)]);
        assert!(cal.contains(d(4)));
        assert!(!cal.contains(d(5)));
    }

    #[test]
    fn clipping_is_inclusive() {
        let cal = TradingCalendar::from_dates(vec![d(3), d(4), d(5), d(6)]);
        let clipped = cal.clipped(d(4), d(5));
        assert_eq!(clipped.dates(), &[d(4), d(5)]);
        assert_eq!(clipped.first(), Some(d(4)));
        assert_eq!(clipped.last(), Some(d(5)));
    }
}
