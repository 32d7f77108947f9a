/// Rolling statistics helpers shared by the analyzers. All pure functions;
/// thresholds derived from these are self-calibrating rather than hardcoded.

/// Return val if it is finite, otherwise return default.
#[inline]
pub fn finite_or(val: f64, default: f64) -> f64 {
    if val.is_finite() {
        val
    } else {
        default
    }
}

/// Compute the mean of a data slice.
pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Compute sample standard deviation.
pub fn std_dev(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let m = mean(data);
    let variance = data.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (data.len() - 1) as f64;
    variance.sqrt()
}

/// Compute the z-score of `value` relative to `data`.
/// Returns 0.0 if data has insufficient variance.
pub fn z_score_of(value: f64, data: &[f64]) -> f64 {
    let sd = std_dev(data);
    if sd < f64::EPSILON {
        return 0.0;
    }
    (value - mean(data)) / sd
}

/// Natural-log returns of a price series; non-positive prices yield 0.0.
pub fn log_returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .map(|w| {
            if w[0] > 0.0 && w[1] > 0.0 {
                (w[1] / w[0]).ln()
            } else {
                0.0
            }
        })
        .collect()
}

/// Simple percentage returns.
pub fn pct_returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .map(|w| if w[0] != 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

/// Running cumulative sum.
pub fn cumulative_sum(data: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(data.len());
    let mut acc = 0.0;
    for v in data {
        acc += v;
        out.push(acc);
    }
    out
}

/// Least-squares slope of `data` against its index, normalized by the mean
/// level so series at different price scales compare.
pub fn normalized_slope(data: &[f64]) -> f64 {
    let n = data.len();
    if n < 2 {
        return 0.0;
    }
    let nf = n as f64;
    let sum_x: f64 = (0..n).map(|i| i as f64).sum();
    let sum_y: f64 = data.iter().sum();
    let sum_xy: f64 = data.iter().enumerate().map(|(i, y)| i as f64 * y).sum();
    let sum_x2: f64 = (0..n).map(|i| (i * i) as f64).sum();

    let denom = nf * sum_x2 - sum_x * sum_x;
    if denom.abs() < f64::EPSILON {
        return 0.0;
    }
    let slope = (nf * sum_xy - sum_x * sum_y) / denom;
    let level = sum_y / nf;
    if level.abs() < f64::EPSILON {
        return 0.0;
    }
    finite_or(slope / level, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mean_and_std() {
        let data = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_relative_eq!(mean(&data), 5.0);
        assert_relative_eq!(std_dev(&data), (32.0_f64 / 7.0).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_log_returns_length() {
        let prices = vec![100.0, 101.0, 102.0];
        let r = log_returns(&prices);
        assert_eq!(r.len(), 2);
        assert_relative_eq!(r[0], (101.0_f64 / 100.0).ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_normalized_slope_sign() {
        let up: Vec<f64> = (0..50).map(|i| 100.0 + i as f64).collect();
        let down: Vec<f64> = (0..50).map(|i| 100.0 - i as f64 * 0.5).collect();
        assert!(normalized_slope(&up) > 0.0);
        assert!(normalized_slope(&down) < 0.0);
        let flat = vec![5.0; 50];
        assert_relative_eq!(normalized_slope(&flat), 0.0, epsilon = 1e-12);
    }
}
