use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use flow_core::ThresholdConfig;
use quant_kernel::mean;

/// Normal-normal Bayesian estimator for a threshold level. The prior is set
/// at construction; observations accumulate in a capped buffer and the
/// posterior mean shrinks toward the prior when evidence is thin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BayesianEstimator {
    pub prior_mean: f64,
    pub prior_variance: f64,
    observations: VecDeque<f64>,
    cap: usize,
}

impl BayesianEstimator {
    pub fn new(prior_mean: f64, prior_variance: f64, cap: usize) -> Self {
        Self {
            prior_mean,
            prior_variance: prior_variance.max(1e-12),
            observations: VecDeque::with_capacity(cap),
            cap: cap.max(1),
        }
    }

    pub fn observe(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        if self.observations.len() == self.cap {
            self.observations.pop_front();
        }
        self.observations.push_back(value);
    }

    pub fn observation_count(&self) -> usize {
        self.observations.len()
    }

    /// Posterior mean under a normal likelihood with the sample variance.
    pub fn posterior_mean(&self) -> f64 {
        let n = self.observations.len();
        if n == 0 {
            return self.prior_mean;
        }
        let data: Vec<f64> = self.observations.iter().copied().collect();
        let sample_mean = mean(&data);
        let sample_var = {
            let v = quant_kernel::std_dev(&data).powi(2);
            if v > 1e-12 {
                v
            } else {
                self.prior_variance
            }
        };
        let prior_precision = 1.0 / self.prior_variance;
        let data_precision = n as f64 / sample_var;
        (self.prior_mean * prior_precision + sample_mean * data_precision)
            / (prior_precision + data_precision)
    }
}

/// Which volatility source scaled the delta threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolBasis {
    Garch,
    Atr,
    None,
}

/// Per-slot dynamic thresholds, refreshed on a cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicThresholds {
    pub delta: f64,
    pub imbalance: f64,
    pub absorption: f64,
    pub last_update: Option<DateTime<Utc>>,
    pub vol_basis: VolBasis,
}

impl DynamicThresholds {
    pub fn new(delta: f64, imbalance: f64, absorption: f64) -> Self {
        Self {
            delta,
            imbalance,
            absorption,
            last_update: None,
            vol_basis: VolBasis::None,
        }
    }

    pub fn due(&self, now: DateTime<Utc>, interval_secs: i64) -> bool {
        match self.last_update {
            None => true,
            Some(t) => (now - t).num_seconds() >= interval_secs,
        }
    }

    /// Blend the Bayesian posteriors into the running thresholds and scale
    /// the delta threshold linearly with the volatility ratio.
    ///
    /// `vol_ratio` is current volatility over its historical baseline
    /// (GARCH-based when available, ATR-based otherwise).
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        delta_estimator: &BayesianEstimator,
        imbalance_estimator: &BayesianEstimator,
        vol_ratio: f64,
        vol_basis: VolBasis,
        now: DateTime<Utc>,
        config: &ThresholdConfig,
    ) {
        let blend = config.bayes_update_blend_factor;
        let blended_delta =
            blend * delta_estimator.posterior_mean() + (1.0 - blend) * self.delta;
        let blended_imbalance =
            blend * imbalance_estimator.posterior_mean() + (1.0 - blend) * self.imbalance;

        let scale = (1.0 + config.volatility_multiplier * (vol_ratio - 1.0)).max(0.1);
        self.delta = (blended_delta * scale).abs();
        self.imbalance = blended_imbalance.clamp(0.05, 0.95);
        self.last_update = Some(now);
        self.vol_basis = vol_basis;
    }
}
