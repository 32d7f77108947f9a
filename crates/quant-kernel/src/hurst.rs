use serde::{Deserialize, Serialize};

use crate::rolling::{cumulative_sum, log_returns, mean, std_dev};

/// Long-memory interpretation of a Hurst estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HurstInterpretation {
    Trending,
    MeanReverting,
    Random,
}

impl HurstInterpretation {
    pub fn classify(h: f64, upper: f64, lower: f64) -> Self {
        if h > upper {
            HurstInterpretation::Trending
        } else if h < lower {
            HurstInterpretation::MeanReverting
        } else {
            HurstInterpretation::Random
        }
    }
}

/// Rescaled range of one segment of demeaned returns.
fn rescaled_range(segment: &[f64]) -> Option<f64> {
    let sd = std_dev(segment);
    if sd < f64::EPSILON {
        return None;
    }
    let m = mean(segment);
    let demeaned: Vec<f64> = segment.iter().map(|r| r - m).collect();
    let z = cumulative_sum(&demeaned);
    let max_z = z.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let min_z = z.iter().cloned().fold(f64::INFINITY, f64::min);
    Some((max_z - min_z) / sd)
}

/// Hurst exponent by multi-scale R/S analysis: average the rescaled range
/// over non-overlapping segments at log-spaced sizes, then regress
/// ln(R/S) on ln(size). Needs at least 100 prices; returns None below that
/// or when the series is degenerate.
pub fn hurst_exponent(prices: &[f64]) -> Option<f64> {
    if prices.len() < 100 {
        return None;
    }
    let returns = log_returns(prices);
    let n = returns.len();

    // Log-spaced segment sizes from 10 up to half the series
    let mut sizes = Vec::new();
    let mut size = 10usize;
    while size <= n / 2 {
        sizes.push(size);
        let next = (size as f64 * 1.5).ceil() as usize;
        size = next.max(size + 1);
    }
    if sizes.len() < 3 {
        return None;
    }

    let mut log_sizes = Vec::new();
    let mut log_rs = Vec::new();
    for &s in &sizes {
        let segments = n / s;
        let mut acc = 0.0;
        let mut count = 0usize;
        for k in 0..segments {
            if let Some(rs) = rescaled_range(&returns[k * s..(k + 1) * s]) {
                acc += rs;
                count += 1;
            }
        }
        if count > 0 {
            let avg = acc / count as f64;
            if avg > 0.0 {
                log_sizes.push((s as f64).ln());
                log_rs.push(avg.ln());
            }
        }
    }
    if log_sizes.len() < 3 {
        return None;
    }

    // OLS slope of ln(R/S) on ln(size)
    let mx = mean(&log_sizes);
    let my = mean(&log_rs);
    let mut num = 0.0;
    let mut den = 0.0;
    for i in 0..log_sizes.len() {
        num += (log_sizes[i] - mx) * (log_rs[i] - my);
        den += (log_sizes[i] - mx).powi(2);
    }
    if den < f64::EPSILON {
        return None;
    }
    let h = num / den;
    if h.is_finite() {
        Some(h.clamp(0.0, 1.0))
    } else {
        None
    }
}
