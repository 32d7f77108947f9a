use serde::{Deserialize, Serialize};

/// Smoothing constant added to every bin before renormalizing.
const HIST_EPSILON: f64 = 1e-10;

/// Interpretation bands for the flow-divergence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DivergenceBand {
    Normal,
    Diverging,
    StronglyDiverging,
    /// Degenerate inputs (empty window or zero-width range).
    NoVariation,
}

impl DivergenceBand {
    pub fn classify(score: f64, threshold: f64) -> Self {
        if score >= 1.5 * threshold {
            DivergenceBand::StronglyDiverging
        } else if score >= threshold {
            DivergenceBand::Diverging
        } else {
            DivergenceBand::Normal
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DivergenceBand::Normal => "normal",
            DivergenceBand::Diverging => "diverging",
            DivergenceBand::StronglyDiverging => "strongly_diverging",
            DivergenceBand::NoVariation => "no_variation",
        }
    }
}

/// Flow-divergence result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DivergenceScore {
    pub score: f64,
    pub band: DivergenceBand,
}

/// Histogram counts over `bins` equal-width bins spanning [lo, hi).
/// Left-closed right-open; values at or beyond the upper edge land in the
/// last bin. Returns None for an empty series or a zero-width range.
pub fn histogram(data: &[f64], lo: f64, hi: f64, bins: usize) -> Option<Vec<f64>> {
    if data.is_empty() || bins == 0 || !(hi > lo) {
        return None;
    }
    let width = (hi - lo) / bins as f64;
    let mut counts = vec![0.0; bins];
    for &v in data {
        if !v.is_finite() {
            continue;
        }
        let idx = if v >= hi {
            bins - 1
        } else if v < lo {
            0
        } else {
            (((v - lo) / width) as usize).min(bins - 1)
        };
        counts[idx] += 1.0;
    }
    Some(counts)
}

/// Epsilon-smooth and renormalize counts into a density vector summing to 1.
pub fn normalize_density(counts: &[f64]) -> Vec<f64> {
    let smoothed: Vec<f64> = counts.iter().map(|c| c + HIST_EPSILON).collect();
    let total: f64 = smoothed.iter().sum();
    smoothed.into_iter().map(|c| c / total).collect()
}

/// Kullback-Leibler divergence in bits. Inputs must be same-length densities.
pub fn kl_divergence(p: &[f64], q: &[f64]) -> f64 {
    p.iter()
        .zip(q.iter())
        .filter(|(pi, qi)| **pi > 0.0 && **qi > 0.0)
        .map(|(pi, qi)| pi * (pi / qi).log2())
        .sum()
}

/// Jensen-Shannon divergence, log base 2, in [0, 1].
pub fn jensen_shannon_divergence(p: &[f64], q: &[f64]) -> f64 {
    let m: Vec<f64> = p
        .iter()
        .zip(q.iter())
        .map(|(pi, qi)| 0.5 * (pi + qi))
        .collect();
    let jsd = 0.5 * kl_divergence(p, &m) + 0.5 * kl_divergence(q, &m);
    jsd.clamp(0.0, 1.0)
}

/// Score the divergence of a recent delta window against a baseline window.
/// The common bin range is the baseline's min/max; both windows are binned,
/// smoothed, and compared with base-2 JSD.
pub fn flow_divergence(
    recent: &[f64],
    baseline: &[f64],
    bins: usize,
    threshold: f64,
) -> DivergenceScore {
    let no_variation = DivergenceScore {
        score: 0.0,
        band: DivergenceBand::NoVariation,
    };
    if recent.is_empty() || baseline.is_empty() {
        return no_variation;
    }

    let lo = baseline.iter().cloned().fold(f64::INFINITY, f64::min);
    let hi = baseline.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !(lo.is_finite() && hi.is_finite() && hi > lo) {
        return no_variation;
    }

    let (recent_counts, baseline_counts) =
        match (histogram(recent, lo, hi, bins), histogram(baseline, lo, hi, bins)) {
            (Some(r), Some(b)) => (r, b),
            _ => return no_variation,
        };

    let p = normalize_density(&recent_counts);
    let q = normalize_density(&baseline_counts);
    let score = jensen_shannon_divergence(&p, &q);

    DivergenceScore {
        score,
        band: DivergenceBand::classify(score, threshold),
    }
}
