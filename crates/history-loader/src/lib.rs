//! Historical OHLCV loading for backtests: UTC-indexed CSV with header
//! detection fallback, reindexing onto the timeframe grid, and bounded gap
//! repair.

use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use tracing::{info, warn};

use flow_core::{Bar, EngineError, LoaderConfig, Timeframe};

/// Column order assumed for headerless files.
const DEFAULT_COLUMNS: [&str; 6] = ["timestamp", "open", "high", "low", "close", "volume"];

/// Load a CSV of historical bars, repair gaps onto the timeframe grid, and
/// enforce the loader's gap budget.
pub fn load_csv(
    path: impl AsRef<Path>,
    timeframe: Timeframe,
    config: &LoaderConfig,
) -> Result<Vec<Bar>, EngineError> {
    let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
        EngineError::InvalidInput(format!("cannot read {}: {e}", path.as_ref().display()))
    })?;
    let bars = parse_csv(&raw)?;
    let repaired = reindex_to_grid(bars, timeframe, config)?;
    info!(
        file = %path.as_ref().display(),
        bars = repaired.len(),
        tf = timeframe.label(),
        "historical data loaded"
    );
    Ok(repaired)
}

/// Parse CSV text into raw bars. A header row is detected by attempting to
/// parse the first field as a timestamp; failure means the row is a header.
pub fn parse_csv(raw: &str) -> Result<Vec<Bar>, EngineError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(raw.as_bytes());

    let mut rows: Vec<csv::StringRecord> = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| EngineError::InvalidInput(format!("CSV parse error: {e}")))?;
        if !record.is_empty() {
            rows.push(record);
        }
    }
    if rows.is_empty() {
        return Err(EngineError::InsufficientData("empty CSV".to_string()));
    }

    // Header detection fallback: a first row whose first cell is no
    // timestamp is a header; map named columns, else assume the default
    // order.
    let mut column_index: Vec<usize> = (0..DEFAULT_COLUMNS.len()).collect();
    let mut start_row = 0;
    if parse_timestamp(rows[0].get(0).unwrap_or_default()).is_none() {
        start_row = 1;
        let header: Vec<String> = rows[0]
            .iter()
            .map(|h| h.trim().to_lowercase())
            .collect();
        for (slot, name) in DEFAULT_COLUMNS.iter().enumerate() {
            if let Some(found) = header.iter().position(|h| {
                h == name
                    || (*name == "timestamp" && (h == "time" || h == "date" || h == "datetime"))
                    || (*name == "volume" && (h == "vol" || h == "tick_volume"))
            }) {
                column_index[slot] = found;
            }
        }
    }

    let mut bars = Vec::with_capacity(rows.len() - start_row);
    for (line, row) in rows.iter().enumerate().skip(start_row) {
        let cell = |slot: usize| row.get(column_index[slot]).unwrap_or_default().trim();
        let timestamp = parse_timestamp(cell(0)).ok_or_else(|| {
            EngineError::InvalidInput(format!("row {line}: bad timestamp '{}'", cell(0)))
        })?;
        let number = |slot: usize| -> f64 { cell(slot).parse::<f64>().unwrap_or(f64::NAN) };

        let open = number(1);
        let close = number(4);
        let mut volume = number(5);
        if volume.is_nan() {
            volume = 0.0;
        }
        // Widen high/low over open/close per the repair contract
        let high = number(2).max(open).max(close);
        let low = number(3).min(open).min(close);

        if [open, high, low, close].iter().any(|v| !v.is_finite()) {
            warn!(line, "dropping row with non-finite prices");
            continue;
        }
        bars.push(Bar::new(timestamp, open, high, low, close, volume.max(0.0)));
    }
    if bars.is_empty() {
        return Err(EngineError::InsufficientData(
            "no parseable rows in CSV".to_string(),
        ));
    }

    // Sort and drop duplicate timestamps (keep the first occurrence)
    bars.sort_by_key(|b| b.timestamp);
    bars.dedup_by_key(|b| b.timestamp);
    Ok(bars)
}

/// Reindex bars onto the timeframe grid. Missing grid points are filled
/// flat from the previous close with zero volume. Fails when the gap
/// fraction exceeds the configured budget.
pub fn reindex_to_grid(
    bars: Vec<Bar>,
    timeframe: Timeframe,
    config: &LoaderConfig,
) -> Result<Vec<Bar>, EngineError> {
    if bars.len() < 2 {
        return Ok(bars);
    }
    let step = chrono::Duration::minutes(timeframe.to_minutes());
    let first = bars[0].timestamp;
    let last = bars[bars.len() - 1].timestamp;

    let mut out = Vec::new();
    let mut src = bars.iter().peekable();
    let mut cursor = first;
    let mut prev_close = bars[0].open;
    let mut missing = 0usize;
    let mut total = 0usize;

    while cursor <= last {
        total += 1;
        // Advance the source past any off-grid rows before the cursor
        while let Some(bar) = src.peek() {
            if bar.timestamp < cursor {
                prev_close = bar.close;
                src.next();
            } else {
                break;
            }
        }
        match src.peek() {
            Some(bar) if bar.timestamp == cursor => {
                let mut bar = (*bar).clone();
                // Missing open falls back to the previous close
                if !bar.open.is_finite() {
                    bar.open = prev_close;
                }
                prev_close = bar.close;
                out.push(bar);
                src.next();
            }
            _ => {
                missing += 1;
                out.push(Bar::new(cursor, prev_close, prev_close, prev_close, prev_close, 0.0));
            }
        }
        cursor += step;
    }

    let gap_fraction = 100.0 * missing as f64 / total as f64;
    if gap_fraction > config.gap_repair_max_perc {
        return Err(EngineError::InvalidInput(format!(
            "gap fraction {:.1}% exceeds budget {:.1}%",
            gap_fraction, config.gap_repair_max_perc
        )));
    }
    if missing > 0 {
        warn!(missing, total, "repaired gaps onto timeframe grid");
    }
    Ok(out)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if raw.is_empty() {
        return None;
    }
    if let Ok(secs) = raw.parse::<i64>() {
        // Epoch seconds are plausibly in [2000-01-01, 2100-01-01)
        if (946_684_800..4_102_444_800).contains(&secs) {
            return Utc.timestamp_opt(secs, 0).single();
        }
        return None;
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y.%m.%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_headers() {
        let raw = "\
datetime,open,high,low,close,volume
2024-03-01 00:00:00,1.0850,1.0860,1.0840,1.0855,1200
2024-03-01 01:00:00,1.0855,1.0870,1.0850,1.0865,900
";
        let bars = parse_csv(raw).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 1.0855);
        assert_eq!(bars[1].volume, 900.0);
    }

    #[test]
    fn test_parse_headerless_fallback() {
        let raw = "\
2024-03-01 00:00:00,1.0850,1.0860,1.0840,1.0855,1200
2024-03-01 01:00:00,1.0855,1.0870,1.0850,1.0865,900
";
        let bars = parse_csv(raw).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].open, 1.0850);
    }

    #[test]
    fn test_high_low_widening_and_volume_repair() {
        // High below close, low above open, missing volume
        let raw = "\
timestamp,open,high,low,close,volume
2024-03-01 00:00:00,1.0850,1.0851,1.0849,1.0860,
";
        let bars = parse_csv(raw).unwrap();
        assert_eq!(bars[0].high, 1.0860);
        assert_eq!(bars[0].low, 1.0849);
        assert_eq!(bars[0].volume, 0.0);
        assert!(bars[0].check_invariants().is_ok());
    }

    #[test]
    fn test_unsorted_rows_sorted_and_deduped() {
        let raw = "\
2024-03-01 02:00:00,1.0870,1.0880,1.0860,1.0875,100
2024-03-01 00:00:00,1.0850,1.0860,1.0840,1.0855,100
2024-03-01 00:00:00,9.0,9.0,9.0,9.0,100
2024-03-01 01:00:00,1.0855,1.0870,1.0850,1.0865,100
";
        let bars = parse_csv(raw).unwrap();
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].close, 1.0855);
        assert!(bars.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn test_gap_reindexing_fills_flat_bars() {
        // Hourly grid with one missing hour at 01:00
        let raw = "\
2024-03-01 00:00:00,1.0850,1.0860,1.0840,1.0855,100
2024-03-01 02:00:00,1.0855,1.0870,1.0850,1.0865,100
2024-03-01 03:00:00,1.0865,1.0880,1.0860,1.0875,100
";
        let bars = parse_csv(raw).unwrap();
        let repaired = reindex_to_grid(bars, Timeframe::H1, &LoaderConfig::default()).unwrap();
        assert_eq!(repaired.len(), 4);
        // The synthesized 01:00 bar is flat at the previous close, volume 0
        assert_eq!(repaired[1].open, 1.0855);
        assert_eq!(repaired[1].close, 1.0855);
        assert_eq!(repaired[1].volume, 0.0);
        assert!(repaired[1].check_invariants().is_ok());
    }

    #[test]
    fn test_gap_budget_rejects_sparse_file() {
        // Two bars a week apart on a 1h grid: almost everything is missing
        let raw = "\
2024-03-01 00:00:00,1.0850,1.0860,1.0840,1.0855,100
2024-03-08 00:00:00,1.0855,1.0870,1.0850,1.0865,100
";
        let bars = parse_csv(raw).unwrap();
        let err = reindex_to_grid(bars, Timeframe::H1, &LoaderConfig::default()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn test_epoch_and_date_formats() {
        let raw = "\
1709251200,1.0850,1.0860,1.0840,1.0855,100
";
        let bars = parse_csv(raw).unwrap();
        assert_eq!(
            bars[0].timestamp,
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );

        let raw = "2024-03-01,1.0850,1.0860,1.0840,1.0855,100\n";
        let bars = parse_csv(raw).unwrap();
        assert_eq!(bars[0].timestamp.date_naive().to_string(), "2024-03-01");
    }

    #[test]
    fn test_empty_csv_rejected() {
        assert!(matches!(
            parse_csv(""),
            Err(EngineError::InsufficientData(_))
        ));
    }
}
