use flow_core::Bar;
use serde::{Deserialize, Serialize};

/// Fibonacci retracement levels between the lookback swing extremes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FibonacciLevels {
    pub level_236: f64,
    pub level_382: f64,
    pub level_500: f64,
    pub level_618: f64,
    pub level_786: f64,
    pub swing_high: f64,
    pub swing_low: f64,
}

impl FibonacciLevels {
    fn levels(&self) -> [(f64, f64); 5] {
        [
            (0.236, self.level_236),
            (0.382, self.level_382),
            (0.500, self.level_500),
            (0.618, self.level_618),
            (0.786, self.level_786),
        ]
    }
}

/// Compute retracement levels over the lookback window.
pub fn fibonacci_levels(bars: &[Bar], lookback: usize) -> Option<FibonacciLevels> {
    if bars.len() < lookback.min(10) {
        return None;
    }
    let window = if bars.len() > lookback {
        &bars[bars.len() - lookback..]
    } else {
        bars
    };

    let swing_high = window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
    let swing_low = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    let diff = swing_high - swing_low;
    if !(diff.is_finite() && diff > 0.0) {
        return None;
    }

    Some(FibonacciLevels {
        level_236: swing_high - diff * 0.236,
        level_382: swing_high - diff * 0.382,
        level_500: swing_high - diff * 0.500,
        level_618: swing_high - diff * 0.618,
        level_786: swing_high - diff * 0.786,
        swing_high,
        swing_low,
    })
}

/// The retracement ratio whose level sits within `tolerance` of the price.
pub fn active_fib_level(levels: &FibonacciLevels, price: f64, tolerance: f64) -> Option<f64> {
    levels
        .levels()
        .iter()
        .filter(|(_, level)| (price - level).abs() <= tolerance)
        .min_by(|a, b| {
            (price - a.1)
                .abs()
                .partial_cmp(&(price - b.1).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(ratio, _)| *ratio)
}

/// Alternating swing pivots (index, price, is_high) over the window.
fn swing_pivots(bars: &[Bar], strength: usize) -> Vec<(usize, f64, bool)> {
    let mut pivots = Vec::new();
    if bars.len() < 2 * strength + 1 {
        return pivots;
    }
    for i in strength..bars.len() - strength {
        let is_high = (i - strength..i + strength + 1)
            .all(|j| bars[j].high <= bars[i].high);
        let is_low = (i - strength..i + strength + 1)
            .all(|j| bars[j].low >= bars[i].low);
        if is_high {
            pivots.push((i, bars[i].high, true));
        } else if is_low {
            pivots.push((i, bars[i].low, false));
        }
    }
    // Collapse consecutive same-side pivots to the more extreme one
    let mut out: Vec<(usize, f64, bool)> = Vec::new();
    for p in pivots {
        match out.last_mut() {
            Some(last) if last.2 == p.2 => {
                let better = if p.2 { p.1 > last.1 } else { p.1 < last.1 };
                if better {
                    *last = p;
                }
            }
            _ => out.push(p),
        }
    }
    out
}

fn ratio_near(value: f64, target: f64, tolerance: f64) -> bool {
    (value - target).abs() <= tolerance
}

/// Check the last five alternating pivots (X-A-B-C-D) against the Gartley
/// and Bat retracement ratio sets. Returns the pattern name when one fits.
pub fn active_harmonic(bars: &[Bar]) -> Option<&'static str> {
    let pivots = swing_pivots(bars, 3);
    if pivots.len() < 5 {
        return None;
    }
    let tail = &pivots[pivots.len() - 5..];
    let xa = (tail[1].1 - tail[0].1).abs();
    let ab = (tail[2].1 - tail[1].1).abs();
    let bc = (tail[3].1 - tail[2].1).abs();
    let cd = (tail[4].1 - tail[3].1).abs();
    if xa <= 0.0 || ab <= 0.0 || bc <= 0.0 || cd <= 0.0 {
        return None;
    }

    let ab_xa = ab / xa;
    let bc_ab = bc / ab;
    let cd_bc = cd / bc;

    if ratio_near(ab_xa, 0.618, 0.08)
        && (0.382..=0.886).contains(&bc_ab)
        && (1.13..=1.618).contains(&cd_bc)
    {
        return Some("gartley");
    }
    if ratio_near(ab_xa, 0.50, 0.12)
        && (0.382..=0.886).contains(&bc_ab)
        && (1.618..=2.618).contains(&cd_bc)
    {
        return Some("bat");
    }
    None
}
