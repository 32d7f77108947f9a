use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use flow_core::{Bar, FlowConfig, FlowDirection, GarchConfig, StoreConfig, TickSnapshot, Timeframe};
use quant_kernel::{
    baseline_variance, fit_garch, flow_divergence, mean, percent_log_returns, std_dev,
    DivergenceBand, GarchCache,
};

use crate::delta::{analyze_delta, bar_delta, DeltaAnalysis, DeltaHistory};
use crate::impact::{ImpactHistory, MarketImpactEstimate};
use crate::inventory::InventoryModel;
use crate::thresholds::{BayesianEstimator, DynamicThresholds, VolBasis};
use crate::vsa::{detect_vsa, VsaRead};

/// Minimum ring depth before the analyzer reports a valid read.
const MIN_BARS: usize = 30;

/// Per-slot order-flow state, owned by the orchestrator slot.
#[derive(Debug, Clone)]
pub struct FlowState {
    pub deltas: DeltaHistory,
    pub thresholds: DynamicThresholds,
    pub bayes_delta: BayesianEstimator,
    pub bayes_imbalance: BayesianEstimator,
    pub garch: GarchCache,
    pub impact: ImpactHistory,
    pub inventory: InventoryModel,
    /// Timestamp guard so one completed bar feeds the history exactly once.
    last_bar_seen: Option<DateTime<Utc>>,
}

impl FlowState {
    pub fn new(store: &StoreConfig, flow: &FlowConfig) -> Self {
        Self {
            deltas: DeltaHistory::new(store.delta_history),
            thresholds: DynamicThresholds::new(0.0, 0.3, flow.absorption_ratio),
            bayes_delta: BayesianEstimator::new(0.0, 1e12, flow.thresholds.bayes_observation_cap),
            bayes_imbalance: BayesianEstimator::new(
                0.3,
                0.25,
                flow.thresholds.bayes_observation_cap,
            ),
            garch: GarchCache::default(),
            impact: ImpactHistory::new(store.impact_history),
            inventory: InventoryModel::new(&flow.inventory),
            last_bar_seen: None,
        }
    }
}

/// Order-flow analysis output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowAnalysis {
    pub valid: bool,
    #[serde(default)]
    pub reason: Option<String>,
    pub direction: FlowDirection,
    /// Weighted composite in [0, 10], inventory-adjusted.
    pub flow_score: f64,
    pub delta: DeltaAnalysis,
    /// Depth imbalance in [-1, 1]; None without depth data.
    pub bid_ask_imbalance: Option<f64>,
    pub imbalance_significant: bool,
    /// Absorption direction when detected: +1 buying, -1 selling.
    pub absorption: Option<i32>,
    pub vsa: Option<VsaRead>,
    pub flow_divergence_score: f64,
    pub flow_divergence_interpretation: DivergenceBand,
    /// Annualized volatility forecast in percent; None when the model is
    /// unavailable (callers fall back to ATR).
    pub garch_volatility_forecast: Option<f64>,
    pub market_impact: Option<MarketImpactEstimate>,
    pub inventory_adjustment: f64,
    pub dynamic_thresholds: DynamicThresholds,
    /// Raw component strengths behind the score.
    pub flow_score_components: serde_json::Value,
}

impl FlowAnalysis {
    fn invalid(reason: impl Into<String>, thresholds: DynamicThresholds) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
            direction: FlowDirection::Neutral,
            flow_score: 0.0,
            delta: DeltaAnalysis {
                last: 0.0,
                cumulative: 0.0,
                consistency: 0.0,
                strength: 0.0,
                direction: 0,
            },
            bid_ask_imbalance: None,
            imbalance_significant: false,
            absorption: None,
            vsa: None,
            flow_divergence_score: 0.0,
            flow_divergence_interpretation: DivergenceBand::NoVariation,
            garch_volatility_forecast: None,
            market_impact: None,
            inventory_adjustment: 0.0,
            dynamic_thresholds: thresholds,
            flow_score_components: serde_json::Value::Null,
        }
    }
}

pub struct OrderFlowAnalyzer {
    config: FlowConfig,
    garch_config: GarchConfig,
}

impl OrderFlowAnalyzer {
    pub fn new(config: FlowConfig, garch_config: GarchConfig) -> Self {
        Self {
            config,
            garch_config,
        }
    }

    /// Refresh the slot's GARCH cache on the retrain cadence. Solver failure
    /// invalidates the cache so downstream sizing falls back to ATR.
    pub fn refresh_garch(
        &self,
        cache: &mut GarchCache,
        closes: &[f64],
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) {
        if !cache.needs_refit(now, self.garch_config.retrain_interval) {
            return;
        }
        let returns = percent_log_returns(closes);
        match fit_garch(&returns, &self.garch_config) {
            Ok(fit) => match fit.annualized_volatility(timeframe.bars_per_year()) {
                Some(vol) => cache.install(&fit, vol, now),
                None => {
                    warn!("non-positive GARCH forecast, invalidating cache");
                    cache.invalidate();
                }
            },
            Err(e) if e.is_transient() => {
                debug!(error = %e, "GARCH fit unavailable");
                cache.invalidate();
            }
            Err(e) => {
                warn!(error = %e, "GARCH fit failed, invalidating cache");
                cache.invalidate();
            }
        }
    }

    /// Analyze a frozen snapshot on a completed bar, advancing the slot state.
    pub fn analyze(
        &self,
        state: &mut FlowState,
        bars: &[Bar],
        tick: Option<&TickSnapshot>,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> FlowAnalysis {
        if bars.len() < MIN_BARS {
            return FlowAnalysis::invalid(
                format!("need at least {MIN_BARS} bars, have {}", bars.len()),
                state.thresholds.clone(),
            );
        }
        let last = bars.last().expect("non-empty");
        let atr = match last.atr {
            Some(a) if a > 0.0 => a,
            _ => return FlowAnalysis::invalid("missing ATR on latest bar", state.thresholds.clone()),
        };
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        if closes.iter().any(|c| !c.is_finite()) {
            return FlowAnalysis::invalid("non-finite close in series", state.thresholds.clone());
        }

        // Feed per-bar state exactly once per completed bar
        if state.last_bar_seen != Some(last.timestamp) {
            let d = bar_delta(last);
            state.deltas.push(d);
            state.bayes_delta.observe(d.abs());
            let spread = tick.map(|t| t.relative_spread()).unwrap_or_else(|| {
                if last.close > 0.0 {
                    last.range() / last.close
                } else {
                    0.0
                }
            });
            state.impact.push(last.volume, spread);
            state.last_bar_seen = Some(last.timestamp);
        }

        // Volatility model
        self.refresh_garch(&mut state.garch, &closes, timeframe, now);
        let garch_vol = state.garch.last_forecast;

        // Volatility ratio for threshold scaling: GARCH forecast over its
        // historical baseline when available, ATR over its mean otherwise.
        let returns = percent_log_returns(&closes);
        let scaling = timeframe.bars_per_year();
        let (vol_ratio, vol_basis) = match (garch_vol, baseline_variance(&returns)) {
            (Some(vol), Some(base_var)) => {
                let base = (base_var * scaling).sqrt();
                if base > 0.0 {
                    (vol / base, VolBasis::Garch)
                } else {
                    (1.0, VolBasis::Garch)
                }
            }
            _ => {
                let atrs: Vec<f64> = bars.iter().filter_map(|b| b.atr).collect();
                let avg_atr = mean(&atrs);
                if avg_atr > 0.0 {
                    (atr / avg_atr, VolBasis::Atr)
                } else {
                    (1.0, VolBasis::None)
                }
            }
        };

        // Depth imbalance
        let imbalance = tick.and_then(|t| t.depth.as_ref()).and_then(|d| {
            let bid = d.bid_size();
            let ask = d.ask_size();
            let total = bid + ask;
            if total > 0.0 {
                Some((bid - ask) / total)
            } else {
                None
            }
        });
        if let Some(imb) = imbalance {
            state.bayes_imbalance.observe(imb.abs());
        }

        // Threshold refresh on its cadence
        if state.thresholds.due(now, self.config.thresholds.update_interval) {
            let (bayes_delta, bayes_imbalance) =
                (state.bayes_delta.clone(), state.bayes_imbalance.clone());
            state.thresholds.update(
                &bayes_delta,
                &bayes_imbalance,
                vol_ratio,
                vol_basis,
                now,
                &self.config.thresholds,
            );
        }

        let delta = analyze_delta(&state.deltas, self.config.delta_consistency_window);
        let delta_significant =
            state.thresholds.delta > 0.0 && delta.cumulative.abs() > state.thresholds.delta;
        let imbalance_significant = imbalance
            .map(|i| i.abs() > state.thresholds.imbalance)
            .unwrap_or(false);

        // Absorption: heavy volume refusing to move price
        let vsa_window = &bars[bars.len() - 1 - self.config.vsa.volume_avg_period.min(bars.len() - 1)
            ..bars.len() - 1];
        let avg_volume = mean(&vsa_window.iter().map(|b| b.volume).collect::<Vec<_>>());
        let absorption = if avg_volume > 0.0
            && last.range() / atr < 0.5
            && last.volume > self.config.absorption_ratio * avg_volume
        {
            Some(if last.close_position() >= 0.5 { 1 } else { -1 })
        } else {
            None
        };

        // VSA pattern on the last bar
        let vsa = detect_vsa(bars, atr, &self.config.vsa);

        // Flow distribution divergence
        let div_cfg = &self.config.divergence;
        let recent = state.deltas.tail(div_cfg.window);
        let baseline = state.deltas.baseline(div_cfg.baseline_window, div_cfg.window);
        let divergence = flow_divergence(&recent, &baseline, div_cfg.bins, div_cfg.threshold);

        // Effort vs result on the last bar
        let effort = if avg_volume > 0.0 { last.volume / avg_volume } else { 0.0 };
        let result = (last.close - last.open).abs() / atr;
        let effort_result_value = if effort > 1.5 && result < 0.3 {
            0.0 // effort with no result: anomaly, not conviction
        } else if effort > 1.0 && result > 0.5 {
            1.0
        } else {
            0.5
        };

        // Institutional activity: heavy directional bars in the recent window
        let inst_window = &bars[bars.len().saturating_sub(self.config.delta_consistency_window)..];
        let mut inst_count = 0usize;
        let mut inst_signed = 0.0;
        for b in inst_window {
            if avg_volume > 0.0 && b.volume > 2.0 * avg_volume && b.range() > 0.0 {
                inst_count += 1;
                inst_signed += bar_delta(b);
            }
        }
        let institutional_value = (inst_count as f64 / inst_window.len() as f64).min(1.0);
        let institutional_direction = if inst_signed > 0.0 {
            1
        } else if inst_signed < 0.0 {
            -1
        } else {
            0
        };

        // Intensity: last volume z-score against the window
        let window_vols: Vec<f64> = vsa_window.iter().map(|b| b.volume).collect();
        let vol_sd = std_dev(&window_vols);
        let intensity_value = if vol_sd > 0.0 {
            (((last.volume - avg_volume) / vol_sd).abs() / 3.0).min(1.0)
        } else {
            0.0
        };

        // Liquidity: spreads tight relative to the ATR fraction of price
        let market_impact = state.impact.estimate(
            last.volume,
            if last.close > 0.0 { atr / last.close } else { 0.0 },
        );
        let liquidity_value = market_impact
            .map(|m| {
                let atr_frac = if last.close > 0.0 { atr / last.close } else { 0.0 };
                if atr_frac > 0.0 {
                    (1.0 - (m.avg_spread / atr_frac).min(1.0)).clamp(0.0, 1.0)
                } else {
                    0.0
                }
            })
            .unwrap_or(0.0);

        // Volume profile: recent volume concentrated near the current price
        let near_volume: f64 = inst_window
            .iter()
            .filter(|b| (b.close - last.close).abs() <= atr)
            .map(|b| b.volume)
            .sum();
        let total_volume: f64 = inst_window.iter().map(|b| b.volume).sum();
        let volume_profile_value = if total_volume > 0.0 {
            near_volume / total_volume
        } else {
            0.0
        };

        // Component strengths in [0, 1]
        let delta_value = (delta.strength * delta.consistency
            * if delta_significant { 1.0 } else { 0.6 })
        .min(1.0);
        let bid_ask_value = imbalance
            .map(|i| i.abs() * if imbalance_significant { 1.0 } else { 0.5 })
            .unwrap_or(0.0);
        let absorption_value = if absorption.is_some() { 1.0 } else { 0.0 };
        let divergence_value = match divergence.band {
            DivergenceBand::NoVariation => 0.0,
            _ => (divergence.score / (1.5 * div_cfg.threshold)).min(1.0),
        };
        let vsa_value = vsa.map(|v| v.confidence).unwrap_or(0.0);

        let w = &self.config.weights;
        let weighted = [
            (w.delta, delta_value),
            (w.bid_ask, bid_ask_value),
            (w.liquidity, liquidity_value),
            (w.volume_profile, volume_profile_value),
            (w.absorption, absorption_value),
            (w.effort_result, effort_result_value),
            (w.institutional, institutional_value),
            (w.intensity, intensity_value),
            (w.divergence, divergence_value),
            (w.vsa, vsa_value),
        ];
        let total_weight: f64 = weighted.iter().filter(|(w, _)| *w > 0.0).map(|(w, _)| w).sum();
        let base_score = if total_weight > 0.0 {
            (weighted.iter().map(|(w, v)| w * v).sum::<f64>() / total_weight * 10.0)
                .clamp(0.0, 10.0)
        } else {
            0.0
        };

        // Inventory adjustment lands after normalization
        let inventory_adjustment = state.inventory.score_adjustment();
        let flow_score = (base_score + inventory_adjustment).clamp(0.0, 10.0);

        // Direction: majority of the dominant components' signs
        let signs = [
            delta.direction,
            imbalance
                .filter(|_| imbalance_significant)
                .map(|i| if i > 0.0 { 1 } else { -1 })
                .unwrap_or(0),
            absorption.unwrap_or(0),
            institutional_direction,
        ];
        let vote: i32 = signs.iter().sum();
        let positive = signs.iter().filter(|s| **s > 0).count();
        let negative = signs.iter().filter(|s| **s < 0).count();
        let direction = if vote > 0 && positive > negative {
            FlowDirection::Up
        } else if vote < 0 && negative > positive {
            FlowDirection::Down
        } else {
            FlowDirection::Neutral
        };

        debug!(
            direction = ?direction,
            score = flow_score,
            delta = delta.cumulative,
            divergence = divergence.score,
            "order flow analysis"
        );

        FlowAnalysis {
            valid: true,
            reason: None,
            direction,
            flow_score,
            delta,
            bid_ask_imbalance: imbalance,
            imbalance_significant,
            absorption,
            vsa,
            flow_divergence_score: divergence.score,
            flow_divergence_interpretation: divergence.band,
            garch_volatility_forecast: garch_vol,
            market_impact,
            inventory_adjustment,
            dynamic_thresholds: state.thresholds.clone(),
            flow_score_components: json!({
                "delta": delta_value,
                "bid_ask": bid_ask_value,
                "liquidity": liquidity_value,
                "volume_profile": volume_profile_value,
                "absorption": absorption_value,
                "effort_result": effort_result_value,
                "institutional": institutional_value,
                "intensity": intensity_value,
                "divergence": divergence_value,
                "vsa": vsa_value,
                "delta_significant": delta_significant,
                "vol_ratio": vol_ratio,
            }),
        }
    }
}
