use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use flow_core::{EngineError, GarchConfig};

const LOG_2PI: f64 = 1.837_877_066_409_345_5;
/// Stationarity bound on alpha + beta.
const MAX_ALPHA_BETA_SUM: f64 = 0.999;

/// Fitted GARCH(1,1) parameters under variance targeting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GarchParams {
    pub omega: f64,
    pub alpha: f64,
    pub beta: f64,
    pub log_likelihood: f64,
}

/// Fit result: parameters plus the one-step-ahead variance forecast in the
/// units of the input returns (percent^2 per bar for 100x log-returns).
#[derive(Debug, Clone, Copy)]
pub struct GarchFit {
    pub params: GarchParams,
    pub variance_forecast: f64,
}

impl GarchFit {
    /// Annualized volatility forecast: sqrt(variance x scaling), where
    /// scaling is the timeframe's bars-per-year.
    pub fn annualized_volatility(&self, scaling: f64) -> Option<f64> {
        let v = self.variance_forecast * scaling;
        if v > 0.0 && v.is_finite() {
            Some(v.sqrt())
        } else {
            None
        }
    }
}

/// Per-slot GARCH cache. The analyzer refreshes it on the retrain cadence
/// and invalidates it on solver failure or deadline overrun.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GarchCache {
    pub fitted: Option<GarchParams>,
    pub last_fit: Option<DateTime<Utc>>,
    pub last_forecast: Option<f64>,
    pub last_forecast_at: Option<DateTime<Utc>>,
}

impl GarchCache {
    pub fn needs_refit(&self, now: DateTime<Utc>, retrain_interval_secs: i64) -> bool {
        match self.last_fit {
            None => true,
            Some(t) => (now - t).num_seconds() >= retrain_interval_secs,
        }
    }

    pub fn install(&mut self, fit: &GarchFit, annualized: f64, now: DateTime<Utc>) {
        self.fitted = Some(fit.params);
        self.last_fit = Some(now);
        self.last_forecast = Some(annualized);
        self.last_forecast_at = Some(now);
    }

    pub fn invalidate(&mut self) {
        self.fitted = None;
        self.last_fit = None;
        self.last_forecast = None;
        self.last_forecast_at = None;
    }

    /// Invalidate the forecast but keep the fit timestamp, so a failed or
    /// deadline-overrun fit is not retried until the next retrain window.
    pub fn mark_failed(&mut self, now: DateTime<Utc>) {
        self.fitted = None;
        self.last_fit = Some(now);
        self.last_forecast = None;
        self.last_forecast_at = None;
    }
}

fn garch_loglik(returns: &[f64], alpha: f64, beta: f64, var0: f64) -> Option<(f64, f64)> {
    if alpha < 0.0 || beta < 0.0 || alpha + beta >= MAX_ALPHA_BETA_SUM {
        return None;
    }

    let omega = var0 * (1.0 - alpha - beta);
    if omega <= 0.0 {
        return None;
    }

    let mut sigma2 = var0.max(1e-12);
    let mut loglik = 0.0;
    for &r in returns {
        if sigma2 <= 0.0 || !sigma2.is_finite() {
            return None;
        }
        loglik += -0.5 * (LOG_2PI + sigma2.ln() + (r * r) / sigma2);
        sigma2 = omega + alpha * (r * r) + beta * sigma2;
    }

    if loglik.is_finite() {
        Some((loglik, sigma2))
    } else {
        None
    }
}

/// Fit GARCH(1,1) on percent returns (100 x log-returns) by grid-search MLE
/// with local refinement. Higher (p, q) orders in the configuration fall back
/// to the (1,1) core.
///
/// Errors: `InsufficientData` below `min_data` finite returns, `Numerics`
/// when no admissible parameter point exists or the forecast is non-positive.
pub fn fit_garch(returns_pct: &[f64], config: &GarchConfig) -> Result<GarchFit, EngineError> {
    let finite: Vec<f64> = returns_pct.iter().copied().filter(|r| r.is_finite()).collect();
    if finite.len() < config.min_data {
        return Err(EngineError::InsufficientData(format!(
            "GARCH fit needs {} finite returns, have {}",
            config.min_data,
            finite.len()
        )));
    }

    let var0 = finite.iter().map(|r| r * r).sum::<f64>() / finite.len() as f64;
    if !var0.is_finite() || var0 <= 0.0 {
        return Err(EngineError::Numerics(
            "non-positive unconditional variance".to_string(),
        ));
    }

    // Coarse grid over (alpha, beta), one rayon task per alpha row
    let best = (0..=25)
        .into_par_iter()
        .map(|i| {
            let alpha = i as f64 * 0.02;
            let mut row_best: Option<(f64, f64, f64, f64)> = None;
            for beta in (0..=49).map(|j| j as f64 * 0.02) {
                if alpha + beta >= MAX_ALPHA_BETA_SUM {
                    continue;
                }
                if let Some((ll, sigma2_next)) = garch_loglik(&finite, alpha, beta, var0) {
                    if row_best.map(|(b, ..)| ll > b).unwrap_or(true) {
                        row_best = Some((ll, alpha, beta, sigma2_next));
                    }
                }
            }
            row_best
        })
        .reduce(
            || None,
            |a, b| match (a, b) {
                (Some(x), Some(y)) => Some(if x.0 >= y.0 { x } else { y }),
                (x, None) => x,
                (None, y) => y,
            },
        );

    let (mut best_ll, mut best_alpha, mut best_beta, mut best_sigma2) =
        best.ok_or_else(|| EngineError::Numerics("GARCH grid search found no admissible point".to_string()))?;

    // Local refinement around the grid optimum
    let refine = [-0.02, -0.01, -0.005, 0.0, 0.005, 0.01, 0.02];
    for da in refine.iter() {
        for db in refine.iter() {
            let alpha = (best_alpha + da).max(0.0);
            let beta = (best_beta + db).max(0.0);
            if alpha + beta >= MAX_ALPHA_BETA_SUM {
                continue;
            }
            if let Some((ll, sigma2_next)) = garch_loglik(&finite, alpha, beta, var0) {
                if ll > best_ll {
                    best_ll = ll;
                    best_alpha = alpha;
                    best_beta = beta;
                    best_sigma2 = sigma2_next;
                }
            }
        }
    }

    if !(best_sigma2.is_finite() && best_sigma2 > 0.0) {
        return Err(EngineError::Numerics(
            "non-positive GARCH variance forecast".to_string(),
        ));
    }

    Ok(GarchFit {
        params: GarchParams {
            omega: var0 * (1.0 - best_alpha - best_beta),
            alpha: best_alpha,
            beta: best_beta,
            log_likelihood: best_ll,
        },
        variance_forecast: best_sigma2,
    })
}

/// Percent returns (100 x log-return) from a close series, as the fit expects.
pub fn percent_log_returns(closes: &[f64]) -> Vec<f64> {
    crate::rolling::log_returns(closes)
        .into_iter()
        .map(|r| r * 100.0)
        .collect()
}

/// Sample variance of the percent-return series, used as the historical
/// baseline when normalizing the volatility forecast.
pub fn baseline_variance(returns_pct: &[f64]) -> Option<f64> {
    if returns_pct.len() < 2 {
        return None;
    }
    let v = returns_pct.iter().copied().variance();
    if v.is_finite() && v > 0.0 {
        Some(v)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn config_with_min(min_data: usize) -> GarchConfig {
        GarchConfig {
            min_data,
            ..GarchConfig::default()
        }
    }

    /// Deterministic pseudo-returns with volatility clustering: two regimes
    /// of different amplitude, sign alternating on a co-prime cycle.
    fn clustered_returns(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| {
                let amp = if (i / 50) % 2 == 0 { 0.4 } else { 1.2 };
                let sign = if (i * 7) % 13 < 6 { 1.0 } else { -1.0 };
                sign * amp * (1.0 + ((i * 3) % 5) as f64 * 0.1)
            })
            .collect()
    }

    #[test]
    fn test_refuses_below_min_data() {
        let returns = clustered_returns(200);
        let err = fit_garch(&returns, &config_with_min(252)).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientData(_)));
    }

    #[test]
    fn test_fit_produces_positive_forecast() {
        let returns = clustered_returns(400);
        let fit = fit_garch(&returns, &config_with_min(252)).unwrap();
        assert!(fit.variance_forecast > 0.0);
        assert!(fit.params.alpha >= 0.0);
        assert!(fit.params.beta >= 0.0);
        assert!(fit.params.alpha + fit.params.beta < 1.0);
        assert!(fit.params.omega > 0.0);
    }

    #[test]
    fn test_annualized_volatility() {
        let fit = GarchFit {
            params: GarchParams {
                omega: 0.01,
                alpha: 0.1,
                beta: 0.8,
                log_likelihood: 0.0,
            },
            variance_forecast: 1.0,
        };
        let vol = fit.annualized_volatility(252.0).unwrap();
        assert!((vol - 252.0_f64.sqrt()).abs() < 1e-12);
        let bad = GarchFit {
            variance_forecast: -1.0,
            ..fit
        };
        assert!(bad.annualized_volatility(252.0).is_none());
    }

    #[test]
    fn test_nan_returns_are_filtered() {
        let mut returns = clustered_returns(400);
        returns[10] = f64::NAN;
        returns[20] = f64::INFINITY;
        assert!(fit_garch(&returns, &config_with_min(252)).is_ok());
    }

    #[test]
    fn test_cache_refit_cadence() {
        let mut cache = GarchCache::default();
        let t0 = Utc::now();
        assert!(cache.needs_refit(t0, 86_400));
        cache.install(
            &GarchFit {
                params: GarchParams {
                    omega: 0.01,
                    alpha: 0.1,
                    beta: 0.8,
                    log_likelihood: 0.0,
                },
                variance_forecast: 1.0,
            },
            15.0,
            t0,
        );
        assert!(!cache.needs_refit(t0 + Duration::seconds(100), 86_400));
        assert!(cache.needs_refit(t0 + Duration::seconds(86_400), 86_400));
        cache.invalidate();
        assert!(cache.needs_refit(t0, 86_400));
        assert!(cache.last_forecast.is_none());
    }
}
