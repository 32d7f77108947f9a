use serde::{Deserialize, Serialize};

use crate::rolling::mean;

/// Dominant spectral cycle of a detrended close series.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DominantCycle {
    /// Cycle length in bars (1 / frequency).
    pub period_bars: f64,
    /// Power of the dominant bin as a fraction of total spectral power.
    pub power: f64,
}

/// Detrend mode before the spectrum scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detrend {
    /// First differences.
    Difference,
    /// Subtract a centered moving-average level.
    MeanSubtract,
}

fn detrended(series: &[f64], mode: Detrend) -> Vec<f64> {
    match mode {
        Detrend::Difference => series.windows(2).map(|w| w[1] - w[0]).collect(),
        Detrend::MeanSubtract => {
            let m = mean(series);
            series.iter().map(|v| v - m).collect()
        }
    }
}

/// Scan the power spectrum of the detrended series and report the dominant
/// period when its normalized power clears `power_threshold`. The window is
/// bounded by the ring capacity, so a direct DFT is used.
pub fn dominant_cycle(
    series: &[f64],
    mode: Detrend,
    power_threshold: f64,
) -> Option<DominantCycle> {
    if series.len() < 32 {
        return None;
    }
    let data = detrended(series, mode);
    let n = data.len();
    if n < 16 || data.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let nf = n as f64;
    let half = n / 2;
    let mut total_power = 0.0;
    let mut best: Option<(usize, f64)> = None;

    // k = 0 (DC) excluded; k up to Nyquist
    for k in 1..=half {
        let mut re = 0.0;
        let mut im = 0.0;
        let w = -2.0 * std::f64::consts::PI * k as f64 / nf;
        for (t, &v) in data.iter().enumerate() {
            let angle = w * t as f64;
            re += v * angle.cos();
            im += v * angle.sin();
        }
        let power = re * re + im * im;
        total_power += power;
        if best.map(|(_, bp)| power > bp).unwrap_or(true) {
            best = Some((k, power));
        }
    }

    let (k, power) = best?;
    // A near-zero spectrum (flat or purely linear input) has no cycle to
    // report, only rounding noise.
    if total_power <= 1e-12 {
        return None;
    }
    let normalized = power / total_power;
    if normalized < power_threshold {
        return None;
    }
    Some(DominantCycle {
        period_bars: nf / k as f64,
        power: normalized,
    })
}
