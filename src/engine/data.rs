//! CSV Price-History Adapter
//!
//! Boundary loader for daily price files with the manual-upload shape
//! `Date,Open[,Close]`. Rows may arrive unsorted (hand-exported files
//! often do); they are sorted before series validation. Serialization is
//! owned by this adapter; the engine core only ever sees validated
//! in-memory `PriceSeries`.

use crate::engine::store::{Instrument, PricePoint, PriceSeries, PriceStore};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

#[derive(Debug, Deserialize)]
struct PriceRow {
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "Open")]
    open: f64,
    #[serde(rename = "Close", default)]
    close: Option<f64>,
}

/// Load one instrument's history from a CSV file.
///
/// For open-only instruments any Close column in the file is ignored
/// rather than rejected; index downloads usually carry one, but only
/// the open participates in the basis.
pub fn load_series(path: impl AsRef<Path>, instrument: Instrument) -> Result<PriceSeries> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening price file {}", path.display()))?;

    let mut points = Vec::new();
    for (idx, row) in reader.deserialize::<PriceRow>().enumerate() {
        let row = row.with_context(|| format!("row {} of {}", idx + 2, path.display()))?;
        let date = NaiveDate::parse_from_str(&row.date, "%Y-%m-%d")
            .with_context(|| format!("bad date {:?} in {}", row.date, path.display()))?;
        let close = if instrument.has_close() {
            row.close
        } else {
            None
        };
        points.push(PricePoint { date, open: row.open, close });
    }
    points.sort_by_key(|p| p.date);

    let series = PriceSeries::new(instrument, points)
        .with_context(|| format!("validating {} series from {}", instrument, path.display()))?;
    info!(
        instrument = %instrument,
        rows = series.len(),
        first = %series.first_date(),
        last = %series.last_date(),
        "loaded price series"
    );
    Ok(series)
}

/// Load a full store from (instrument, path) pairs.
pub fn load_store<P: AsRef<Path>>(sources: &[(Instrument, P)]) -> Result<PriceStore> {
    let mut store = PriceStore::new();
    for (instrument, path) in sources {
        let series = load_series(path, *instrument)?;
        store.insert(series)?;
    }
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn loads_open_and_close() {
        let file = write_csv("Date,Open,Close\n2019-06-03,22.10,22.50\n2019-06-04,22.60,22.40\n");
        let series = load_series(file.path(), Instrument::Vixy).unwrap();

        assert_eq!(series.len(), 2);
        let d = NaiveDate::from_ymd_opt(2019, 6, 4).unwrap();
        assert_eq!(series.open(d).unwrap(), 22.60);
        assert_eq!(series.close(d).unwrap(), 22.40);
    }

    #[test]
    fn open_only_file_without_close_column() {
        let file = write_csv("Date,Open\n2019-06-03,15.25\n");
        let series = load_series(file.path(), Instrument::VixSpot).unwrap();

        let d = NaiveDate::from_ymd_opt(2019, 6, 3).unwrap();
        assert_eq!(series.open(d).unwrap(), 15.25);
        assert!(series.close(d).is_err());
    }

    #[test]
    fn close_ignored_for_index_instruments() {
        let file = write_csv("Date,Open,Close\n2019-06-03,15.25,15.90\n");
        let series = load_series(file.path(), Instrument::VixFuture).unwrap();

        let d = NaiveDate::from_ymd_opt(2019, 6, 3).unwrap();
        assert!(series.close(d).is_err());
    }

    #[test]
    fn unsorted_rows_are_sorted() {
        let file = write_csv("Date,Open\n2019-06-05,16.00\n2019-06-03,15.00\n2019-06-04,15.50\n");
        let series = load_series(file.path(), Instrument::VixSpot).unwrap();

        assert_eq!(series.first_date(), NaiveDate::from_ymd_opt(2019, 6, 3).unwrap());
        assert_eq!(series.last_date(), NaiveDate::from_ymd_opt(2019, 6, 5).unwrap());
    }

    #[test]
    fn bad_date_is_a_load_error() {
        let file = write_csv("Date,Open\n06/03/2019,15.25\n");
        assert!(load_series(file.path(), Instrument::VixSpot).is_err());
    }
}
