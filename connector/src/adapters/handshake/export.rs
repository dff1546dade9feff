use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use csv::{ReaderBuilder, StringRecord, Trim};
use mdkit::Bar;
use serde::Deserialize;
use tracing::warn;

use crate::error::ConnectorError;

/// Row of an agent export. Headers are matched case-insensitively; empty
/// or missing numeric cells count as 0.
#[derive(Debug, Deserialize)]
struct ExportRow {
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    open: Option<f64>,
    #[serde(default)]
    high: Option<f64>,
    #[serde(default)]
    low: Option<f64>,
    #[serde(default)]
    close: Option<f64>,
    #[serde(default)]
    volume: Option<f64>,
}

pub fn parse_export(path: &Path, instrument: &str, timeframe: &str) -> Result<Vec<Bar>, ConnectorError> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_path(path)?;
    let headers = reader
        .headers()?
        .iter()
        .map(|header| header.to_ascii_lowercase())
        .collect::<StringRecord>();

    let mut bars = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let row = match record.deserialize::<ExportRow>(Some(&headers)) {
            Ok(row) => row,
            Err(err) => {
                warn!(path = %path.display(), line = line + 2, error = %err, "skipping malformed export row");
                continue;
            }
        };
        let Some(raw_date) = row.date.as_deref().filter(|value| !value.is_empty()) else {
            continue;
        };
        let Some(datetime) = parse_date(raw_date) else {
            warn!(path = %path.display(), date = raw_date, "skipping export row with unparsable date");
            continue;
        };

        bars.push(Bar {
            instrument: instrument.to_string(),
            timeframe: timeframe.to_string(),
            datetime,
            open_price: row.open.unwrap_or(0.0),
            high_price: row.high.unwrap_or(0.0),
            low_price: row.low.unwrap_or(0.0),
            close_price: row.close.unwrap_or(0.0),
            volume: row.volume.unwrap_or(0.0) as i64,
        });
    }

    if bars.is_empty() {
        warn!(path = %path.display(), "export contained no bars");
    }
    Ok(bars)
}

/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD[T ]HH:MM:SS` and RFC 3339; naive
/// values are taken as UTC.
fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(datetime) = DateTime::parse_from_rfc3339(value) {
        return Some(datetime.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    use super::{parse_date, parse_export};

    fn write(dir: &TempDir, body: &str) -> std::path::PathBuf {
        let path = dir.path().join("export.csv");
        fs::write(&path, body).expect("write export");
        path
    }

    #[test]
    fn parses_rows_with_capitalized_headers() {
        let dir = TempDir::new().expect("tempdir");
        let path = write(
            &dir,
            "Date,Open,High,Low,Close,Volume\n2025-01-02,10.5,11,10,10.75,1200\n2025-01-03,10.75,12,10.5,11.5,900.7\n",
        );

        let bars = parse_export(&path, "ES", "1D").expect("export should parse");
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].datetime, Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap());
        assert_eq!(bars[0].open_price, 10.5);
        assert_eq!(bars[0].close_price, 10.75);
        assert_eq!(bars[1].volume, 900);
        assert!(bars.iter().all(|bar| bar.instrument == "ES" && bar.timeframe == "1D"));
    }

    #[test]
    fn lowercase_headers_and_missing_numbers() {
        let dir = TempDir::new().expect("tempdir");
        let path = write(&dir, "date,open,high,low,close\n2025-01-02T00:00:00,1,2,,1.5\n");

        let bars = parse_export(&path, "ES", "1D").expect("export should parse");
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].low_price, 0.0);
        assert_eq!(bars[0].volume, 0);
    }

    #[test]
    fn rows_without_usable_date_are_skipped() {
        let dir = TempDir::new().expect("tempdir");
        let path = write(
            &dir,
            "Date,Open,High,Low,Close,Volume\n,1,2,0.5,1.5,10\nnot-a-date,1,2,0.5,1.5,10\n2025-01-02,1,2,0.5,1.5,10\n",
        );

        let bars = parse_export(&path, "ES", "1D").expect("export should parse");
        assert_eq!(bars.len(), 1);
    }

    #[test]
    fn header_only_export_is_empty() {
        let dir = TempDir::new().expect("tempdir");
        let path = write(&dir, "Date,Open,High,Low,Close,Volume\n");
        let bars = parse_export(&path, "ES", "1D").expect("export should parse");
        assert!(bars.is_empty());
    }

    #[test]
    fn date_formats() {
        let expected = Utc.with_ymd_and_hms(2025, 3, 4, 0, 0, 0).unwrap();
        assert_eq!(parse_date("2025-03-04"), Some(expected));
        assert_eq!(parse_date("2025-03-04 00:00:00"), Some(expected));
        assert_eq!(parse_date("2025-03-04T00:00:00Z"), Some(expected));
        assert_eq!(parse_date("04/03/2025"), None);
    }
}
