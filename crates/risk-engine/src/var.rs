use statrs::distribution::{ContinuousCDF, Normal};

use crate::correlation::CorrelationMatrix;

/// One open exposure feeding the portfolio VaR: symbol, dollar exposure,
/// and per-day fractional volatility.
#[derive(Debug, Clone)]
pub struct Exposure {
    pub symbol: String,
    pub value: f64,
    pub daily_vol: f64,
}

/// Parametric 1-day portfolio VaR at the given confidence level.
///
/// sigma_p^2 = sum_i sum_j v_i v_j s_i s_j rho_ij, VaR = z x sigma_p.
/// Unknown pairs fall back to a conservative correlation of 1.
pub fn parametric_var(
    exposures: &[Exposure],
    correlations: &CorrelationMatrix,
    confidence_level: f64,
) -> Option<f64> {
    if exposures.is_empty() {
        return Some(0.0);
    }
    if !(0.5..1.0).contains(&confidence_level) {
        return None;
    }

    let mut variance = 0.0;
    for (i, a) in exposures.iter().enumerate() {
        for (j, b) in exposures.iter().enumerate() {
            let rho = if i == j {
                1.0
            } else {
                correlations
                    .correlation(&a.symbol, &b.symbol)
                    .unwrap_or(1.0)
            };
            variance += a.value * b.value * a.daily_vol * b.daily_vol * rho;
        }
    }
    if !variance.is_finite() || variance < 0.0 {
        return None;
    }

    let normal = Normal::new(0.0, 1.0).ok()?;
    let z = normal.inverse_cdf(confidence_level);
    Some(z * variance.sqrt())
}
