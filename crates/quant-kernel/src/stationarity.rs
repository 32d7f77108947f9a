use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Unit-root / stationarity test outcome.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StatTest {
    pub statistic: f64,
    pub p_value: f64,
}

/// Combined read of ADF and KPSS against a shared p-value threshold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StationaritySummary {
    pub adf: Option<StatTest>,
    pub kpss: Option<StatTest>,
    /// ADF rejects the unit root AND KPSS fails to reject stationarity.
    pub is_stationary: bool,
}

/// Minimum points for either test; below this the tests return None.
const MIN_POINTS: usize = 20;

/// Approximate p-value for the ADF t-statistic (constant-only regression),
/// interpolated over the large-sample critical table.
fn adf_p_value(stat: f64) -> f64 {
    // (statistic, p) pairs, statistic ascending
    const TABLE: [(f64, f64); 7] = [
        (-5.0, 0.0001),
        (-3.96, 0.002),
        (-3.43, 0.01),
        (-2.86, 0.05),
        (-2.57, 0.10),
        (-1.94, 0.30),
        (0.0, 0.95),
    ];
    interpolate(&TABLE, stat).clamp(0.0001, 0.999)
}

/// Approximate p-value for the KPSS level statistic; saturates outside the
/// tabulated range.
fn kpss_p_value(stat: f64) -> f64 {
    // (statistic, p) pairs, statistic ascending, p descending
    const TABLE: [(f64, f64); 4] = [
        (0.347, 0.10),
        (0.463, 0.05),
        (0.574, 0.025),
        (0.739, 0.01),
    ];
    interpolate(&TABLE, stat).clamp(0.01, 0.10)
}

fn interpolate(table: &[(f64, f64)], x: f64) -> f64 {
    if x <= table[0].0 {
        return table[0].1;
    }
    if x >= table[table.len() - 1].0 {
        return table[table.len() - 1].1;
    }
    for w in table.windows(2) {
        let (x0, y0) = w[0];
        let (x1, y1) = w[1];
        if x <= x1 {
            let t = (x - x0) / (x1 - x0);
            return y0 + t * (y1 - y0);
        }
    }
    table[table.len() - 1].1
}

/// OLS via SVD; returns (coefficients, residuals) or None on a singular fit.
fn ols(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<(DVector<f64>, DVector<f64>)> {
    let svd = x.clone().svd(true, true);
    let beta = svd.solve(y, 1e-12).ok()?;
    let residuals = y - x * &beta;
    Some((beta, residuals))
}

/// Augmented Dickey-Fuller test with constant. Lag order follows the
/// Schwert rule, capped so the regression keeps degrees of freedom.
pub fn adf_test(series: &[f64]) -> Option<StatTest> {
    let n = series.len();
    if n < MIN_POINTS || series.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let diffs: Vec<f64> = series.windows(2).map(|w| w[1] - w[0]).collect();
    let max_lag = ((12.0 * (n as f64 / 100.0).powf(0.25)) as usize).min(n / 2 - 2);
    let lags = max_lag.min(diffs.len().saturating_sub(8));

    let rows = diffs.len() - lags;
    if rows < 8 {
        return None;
    }
    let cols = 2 + lags; // constant, y_{t-1}, lagged diffs

    let mut x = DMatrix::zeros(rows, cols);
    let mut y = DVector::zeros(rows);
    for i in 0..rows {
        let t = i + lags; // index into diffs
        y[i] = diffs[t];
        x[(i, 0)] = 1.0;
        x[(i, 1)] = series[t]; // y_{t-1} relative to diffs[t]
        for j in 0..lags {
            x[(i, 2 + j)] = diffs[t - 1 - j];
        }
    }

    let (beta, residuals) = ols(&x, &y)?;
    let dof = rows.checked_sub(cols)?;
    if dof == 0 {
        return None;
    }
    let s2 = residuals.iter().map(|r| r * r).sum::<f64>() / dof as f64;

    // Var(beta) = s^2 (X'X)^-1; need the [1,1] entry for the gamma term
    let xtx = x.transpose() * &x;
    let xtx_inv = xtx.try_inverse()?;
    let se = (s2 * xtx_inv[(1, 1)]).sqrt();
    if !(se.is_finite() && se > 0.0) {
        return None;
    }

    let stat = beta[1] / se;
    if !stat.is_finite() {
        return None;
    }
    Some(StatTest {
        statistic: stat,
        p_value: adf_p_value(stat),
    })
}

/// KPSS level-stationarity test with a Bartlett-kernel long-run variance.
pub fn kpss_test(series: &[f64]) -> Option<StatTest> {
    let n = series.len();
    if n < MIN_POINTS || series.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let nf = n as f64;
    let m = series.iter().sum::<f64>() / nf;
    let e: Vec<f64> = series.iter().map(|v| v - m).collect();

    let mut s = 0.0;
    let mut sum_s2 = 0.0;
    for v in &e {
        s += v;
        sum_s2 += s * s;
    }

    // Newey-West long-run variance with Bartlett weights
    let bandwidth = (4.0 * (nf / 100.0).powf(0.25)) as usize;
    let mut lrv = e.iter().map(|v| v * v).sum::<f64>() / nf;
    for lag in 1..=bandwidth.min(n - 1) {
        let w = 1.0 - lag as f64 / (bandwidth as f64 + 1.0);
        let gamma: f64 = e[lag..]
            .iter()
            .zip(e.iter())
            .map(|(a, b)| a * b)
            .sum::<f64>()
            / nf;
        lrv += 2.0 * w * gamma;
    }
    if !(lrv.is_finite() && lrv > 0.0) {
        return None;
    }

    let stat = sum_s2 / (nf * nf * lrv);
    if !stat.is_finite() {
        return None;
    }
    Some(StatTest {
        statistic: stat,
        p_value: kpss_p_value(stat),
    })
}

/// Run both tests on a close series and combine the verdicts.
pub fn stationarity_summary(series: &[f64], p_threshold: f64) -> StationaritySummary {
    let adf = adf_test(series);
    let kpss = kpss_test(series);
    let is_stationary = match (adf, kpss) {
        (Some(a), Some(k)) => a.p_value < p_threshold && k.p_value > p_threshold,
        (Some(a), None) => a.p_value < p_threshold,
        _ => false,
    };
    StationaritySummary {
        adf,
        kpss,
        is_stationary,
    }
}
