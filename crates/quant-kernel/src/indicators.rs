use flow_core::Bar;

use crate::rolling::finite_or;

/// ATR floor; keeps downstream range/ATR ratios finite on dead bars.
pub const ATR_EPSILON: f64 = 1e-10;

/// Simple Moving Average
pub fn sma(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return vec![];
    }

    let mut result = Vec::with_capacity(data.len() - period + 1);
    for i in period - 1..data.len() {
        let sum: f64 = data[i + 1 - period..=i].iter().sum();
        result.push(finite_or(sum / period as f64, 0.0));
    }
    result
}

/// Exponential Moving Average, SMA-seeded; output length matches input.
pub fn ema(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.is_empty() {
        return vec![];
    }

    let mut result = Vec::with_capacity(data.len());
    let multiplier = 2.0 / (period as f64 + 1.0);

    if data.len() < period {
        let avg = data.iter().sum::<f64>() / data.len() as f64;
        return vec![finite_or(avg, 0.0)];
    }

    let seed: f64 = data[..period].iter().sum::<f64>() / period as f64;
    let seed = finite_or(seed, 0.0);
    for _ in 0..period {
        result.push(seed);
    }

    for i in period..data.len() {
        let prev = result[i - 1];
        let val = (data[i] - prev) * multiplier + prev;
        result.push(finite_or(val, prev));
    }

    result
}

/// Smoothed Moving Average (Wilder). The Alligator jaw/teeth/lips use this.
/// Output length matches input; the first `period` slots hold the SMA seed.
pub fn smma(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.is_empty() {
        return vec![];
    }

    if data.len() < period {
        let avg = data.iter().sum::<f64>() / data.len() as f64;
        return vec![finite_or(avg, 0.0)];
    }

    let mut result = Vec::with_capacity(data.len());
    let seed: f64 = data[..period].iter().sum::<f64>() / period as f64;
    let seed = finite_or(seed, 0.0);
    for _ in 0..period {
        result.push(seed);
    }

    for i in period..data.len() {
        let prev = result[i - 1];
        let val = (prev * (period as f64 - 1.0) + data[i]) / period as f64;
        result.push(finite_or(val, prev));
    }

    result
}

/// True range series: tr[0] = high-low, tr[i] = max(h-l, |h-pc|, |l-pc|).
pub fn true_range(bars: &[Bar]) -> Vec<f64> {
    if bars.is_empty() {
        return vec![];
    }

    let mut out = Vec::with_capacity(bars.len());
    out.push(bars[0].high - bars[0].low);
    for i in 1..bars.len() {
        let high = bars[i].high;
        let low = bars[i].low;
        let prev_close = bars[i - 1].close;
        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());
        out.push(tr);
    }
    out
}

/// Wilder-smoothed ATR aligned to the input bars. Leading slots (before the
/// first full window) are back-filled with the first smoothed value, and
/// every value is floored to a small positive epsilon.
pub fn atr(bars: &[Bar], period: usize) -> Vec<f64> {
    if period == 0 || bars.is_empty() {
        return vec![];
    }

    let tr = true_range(bars);
    if bars.len() < period {
        let avg = tr.iter().sum::<f64>() / tr.len() as f64;
        return vec![finite_or(avg, ATR_EPSILON).max(ATR_EPSILON); bars.len()];
    }

    let mut out = vec![0.0; bars.len()];
    let seed: f64 = tr[..period].iter().sum::<f64>() / period as f64;
    let seed = finite_or(seed, ATR_EPSILON).max(ATR_EPSILON);
    for slot in out.iter_mut().take(period) {
        *slot = seed;
    }
    for i in period..bars.len() {
        let prev = out[i - 1];
        let val = (prev * (period as f64 - 1.0) + tr[i]) / period as f64;
        out[i] = finite_or(val, prev).max(ATR_EPSILON);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                Bar::new(
                    Utc::now() + chrono::Duration::minutes(i as i64),
                    c,
                    c + 1.0,
                    c - 1.0,
                    c,
                    1000.0,
                )
            })
            .collect()
    }

    #[test]
    fn test_sma_basic() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let result = sma(&data, 3);
        assert_eq!(result.len(), 3);
        assert!((result[0] - 2.0).abs() < 1e-9);
        assert!((result[2] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_smma_length_and_seed() {
        let data: Vec<f64> = (1..=20).map(|i| i as f64).collect();
        let result = smma(&data, 5);
        assert_eq!(result.len(), 20);
        // First 5 slots carry the SMA seed of the first window
        assert!((result[0] - 3.0).abs() < 1e-9);
        assert!((result[4] - 3.0).abs() < 1e-9);
        // Smoothed values trail a rising series
        assert!(result[19] < 20.0);
        assert!(result[19] > result[10]);
    }

    #[test]
    fn test_atr_positive_and_aligned() {
        let bars = bars_from_closes(&(0..30).map(|i| 100.0 + i as f64).collect::<Vec<_>>());
        let values = atr(&bars, 14);
        assert_eq!(values.len(), bars.len());
        assert!(values.iter().all(|v| *v >= ATR_EPSILON));
        // Leading back-fill equals the first smoothed value
        assert_eq!(values[0], values[13]);
    }

    #[test]
    fn test_atr_floor_on_flat_bars() {
        let mut bars = bars_from_closes(&vec![100.0; 20]);
        for b in &mut bars {
            b.high = 100.0;
            b.low = 100.0;
            b.open = 100.0;
            b.close = 100.0;
        }
        let values = atr(&bars, 14);
        assert!(values.iter().all(|v| *v == ATR_EPSILON));
    }
}
