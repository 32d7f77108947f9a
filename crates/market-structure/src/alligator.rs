use flow_core::Bar;
use quant_kernel::{normalized_slope, smma};
use serde::{Deserialize, Serialize};

/// Alligator mouth state from the jaw/teeth/lips triplet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlligatorState {
    /// Lines intertwined, no separation.
    Sleeping,
    /// Lines separating but not yet ordered.
    Awakening,
    /// Lips > teeth > jaw, all rising.
    FeedingUp,
    /// Lips < teeth < jaw, all falling.
    FeedingDown,
}

/// Current triplet values (shift-adjusted) plus the mouth state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AlligatorRead {
    pub jaw: f64,
    pub teeth: f64,
    pub lips: f64,
    pub state: AlligatorState,
    /// Mean normalized slope of the three lines.
    pub slope: f64,
}

/// Compute the Alligator read on median prices. Periods and shifts follow
/// the jaw/teeth/lips order. Returns None below the longest warmup.
pub fn alligator(bars: &[Bar], periods: [usize; 3], shifts: [usize; 3]) -> Option<AlligatorRead> {
    let longest = periods.iter().max().copied().unwrap_or(0) + shifts.iter().max().copied().unwrap_or(0);
    if bars.len() < longest + 2 {
        return None;
    }

    let median: Vec<f64> = bars.iter().map(|b| (b.high + b.low) / 2.0).collect();
    let mut lines = [0.0_f64; 3];
    let mut slopes = [0.0_f64; 3];
    for i in 0..3 {
        let series = smma(&median, periods[i]);
        // Forward shift: the value governing the current bar was computed
        // `shift` bars ago.
        let idx = series.len().checked_sub(1 + shifts[i])?;
        lines[i] = series[idx];
        let tail_start = idx.saturating_sub(5);
        slopes[i] = normalized_slope(&series[tail_start..=idx]);
    }
    let [jaw, teeth, lips] = lines;
    let slope = (slopes[0] + slopes[1] + slopes[2]) / 3.0;

    // Separation measured against the price level
    let level = median.last().copied().unwrap_or(1.0).abs().max(f64::EPSILON);
    let spread = ((lips - teeth).abs() + (teeth - jaw).abs()) / level;

    let state = if lips > teeth && teeth > jaw {
        if spread < 1e-4 {
            AlligatorState::Awakening
        } else {
            AlligatorState::FeedingUp
        }
    } else if lips < teeth && teeth < jaw {
        if spread < 1e-4 {
            AlligatorState::Awakening
        } else {
            AlligatorState::FeedingDown
        }
    } else if spread < 5e-4 {
        AlligatorState::Sleeping
    } else {
        AlligatorState::Awakening
    };

    Some(AlligatorRead {
        jaw,
        teeth,
        lips,
        state,
        slope,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn trending_bars(n: usize, slope: f64) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let c = 100.0 + i as f64 * slope;
                Bar::new(
                    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                        + Duration::minutes(i as i64),
                    c,
                    c + 0.2,
                    c - 0.2,
                    c,
                    1000.0,
                )
            })
            .collect()
    }

    #[test]
    fn test_feeding_up_in_strong_uptrend() {
        let bars = trending_bars(100, 0.5);
        let read = alligator(&bars, [13, 8, 5], [8, 5, 3]).unwrap();
        assert_eq!(read.state, AlligatorState::FeedingUp);
        assert!(read.slope > 0.0);
        assert!(read.lips > read.teeth && read.teeth > read.jaw);
    }

    #[test]
    fn test_feeding_down_in_strong_downtrend() {
        let bars = trending_bars(100, -0.5);
        let read = alligator(&bars, [13, 8, 5], [8, 5, 3]).unwrap();
        assert_eq!(read.state, AlligatorState::FeedingDown);
        assert!(read.slope < 0.0);
    }

    #[test]
    fn test_sleeping_in_flat_market() {
        let bars = trending_bars(100, 0.0);
        let read = alligator(&bars, [13, 8, 5], [8, 5, 3]).unwrap();
        assert_eq!(read.state, AlligatorState::Sleeping);
    }

    #[test]
    fn test_insufficient_bars() {
        let bars = trending_bars(15, 0.5);
        assert!(alligator(&bars, [13, 8, 5], [8, 5, 3]).is_none());
    }
}
