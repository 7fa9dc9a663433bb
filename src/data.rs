//! Data loading
//!
//! Reads OHLCV bars from CSV files with a `datetime,open,high,low,close,volume`
//! header. Rows must parse into valid bars and timestamps must strictly increase.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use crate::{validate_series, Bar, Symbol};

/// Parse RFC 3339, `%Y-%m-%d %H:%M:%S` or a bare `%Y-%m-%d` date, all as UTC
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    s.parse::<DateTime<Utc>>()
        .or_else(|_| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
        })
        .or_else(|_| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d").map(|d| {
                DateTime::<Utc>::from_naive_utc_and_offset(d.and_time(chrono::NaiveTime::MIN), Utc)
            })
        })
        .with_context(|| format!("Failed to parse datetime: {}", s))
}

fn field(record: &csv::StringRecord, idx: usize, name: &str) -> Result<f64> {
    record
        .get(idx)
        .with_context(|| format!("Missing {} column", name))?
        .trim()
        .parse()
        .with_context(|| format!("Failed to parse {}", name))
}

/// Load OHLCV bars from a CSV file
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Bar>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let mut bars = Vec::new();

    for (row_idx, result) in reader.records().enumerate() {
        let row = row_idx + 1;
        let record = result.with_context(|| format!("Failed to read row {}", row))?;

        let dt_str = record.get(0).context("Missing datetime column")?;
        let datetime = parse_datetime(dt_str)?;

        let bar = Bar::new(
            datetime,
            field(&record, 1, "open")?,
            field(&record, 2, "high")?,
            field(&record, 3, "low")?,
            field(&record, 4, "close")?,
            field(&record, 5, "volume")?,
        )
        .with_context(|| format!("Invalid bar at row {}", row))?;

        bars.push(bar);
    }

    validate_series(&bars).with_context(|| format!("Bad bar series in {}", path.display()))?;

    Ok(bars)
}

/// Load data for multiple symbols from `{data_dir}/{symbol}_{timeframe}.csv`.
/// Missing files are skipped with a warning.
pub fn load_multi_symbol(
    data_dir: impl AsRef<Path>,
    symbols: &[Symbol],
    timeframe: &str,
) -> Result<HashMap<Symbol, Vec<Bar>>> {
    let mut data = HashMap::new();

    for symbol in symbols {
        let filename = format!("{}_{}.csv", symbol.as_str(), timeframe);
        let path = data_dir.as_ref().join(&filename);

        if !path.exists() {
            warn!("Data file not found: {}", path.display());
            continue;
        }

        let bars = load_csv(&path).with_context(|| format!("Failed to load data for {}", symbol))?;

        info!("Loaded {} bars for {}", bars.len(), symbol);
        data.insert(symbol.clone(), bars);
    }

    if data.is_empty() {
        anyhow::bail!("No data loaded for any symbol");
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("regime_engine_{}_{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    const HEADER: &str = "datetime,open,high,low,close,volume\n";

    #[test]
    fn test_parse_datetime_formats() {
        let a = parse_datetime("2024-01-02T00:00:00Z").unwrap();
        let b = parse_datetime("2024-01-02 00:00:00").unwrap();
        let c = parse_datetime("2024-01-02").unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert!(parse_datetime("yesterday").is_err());
    }

    #[test]
    fn test_load_csv() {
        let dir = temp_dir("load");
        let path = dir.join("BTCUSDT_1d.csv");
        fs::write(
            &path,
            format!(
                "{}2024-01-01,100,105,95,102,10\n2024-01-02,102,108,101,107,12\n",
                HEADER
            ),
        )
        .unwrap();

        let bars = load_csv(&path).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[1].close, 107.0);

        let data = load_multi_symbol(&dir, &[Symbol::new("BTCUSDT"), Symbol::new("NOPE")], "1d").unwrap();
        assert_eq!(data.len(), 1);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_rejects_invalid_rows_and_order() {
        let dir = temp_dir("invalid");

        let bad_bar = dir.join("bad.csv");
        fs::write(&bad_bar, format!("{}2024-01-01,100,90,95,102,10\n", HEADER)).unwrap();
        let err = load_csv(&bad_bar).unwrap_err();
        assert!(format!("{:#}", err).contains("row 1"));

        let unordered = dir.join("unordered.csv");
        fs::write(
            &unordered,
            format!(
                "{}2024-01-02,100,105,95,102,10\n2024-01-01,100,105,95,102,10\n",
                HEADER
            ),
        )
        .unwrap();
        assert!(load_csv(&unordered).is_err());

        fs::remove_dir_all(&dir).ok();
    }
}
