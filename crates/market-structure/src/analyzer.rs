use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use flow_core::{Bar, StructureConfig, TrendDirection};
use quant_kernel::{
    dominant_cycle, hurst_exponent, normalized_slope, stationarity_summary, Detrend,
    HurstInterpretation,
};

use crate::alligator::{alligator, AlligatorState};
use crate::fibonacci::{active_fib_level, active_harmonic, fibonacci_levels};
use crate::wyckoff::{WyckoffEvent, WyckoffPhase, WyckoffState};
use crate::zones::{nearest_demand, nearest_supply, update_zones, Zone};

/// Minimum ring depth before the analyzer reports a valid read.
const MIN_BARS: usize = 50;

/// Per-slot market-structure state, owned by the orchestrator slot and
/// mutated only under its lock.
#[derive(Debug, Clone, Default)]
pub struct StructureState {
    pub wyckoff: WyckoffState,
    pub supply: Vec<Zone>,
    pub demand: Vec<Zone>,
}

/// Market-structure analysis output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureAnalysis {
    pub valid: bool,
    #[serde(default)]
    pub reason: Option<String>,
    pub direction: TrendDirection,
    /// Weighted composite in [0, 10].
    pub structure_score: f64,
    /// Volatility regime tag: normal / high_volatility / low_volatility.
    pub regime: String,
    pub hurst: Option<f64>,
    pub hurst_interpretation: Option<HurstInterpretation>,
    pub wyckoff_phase: WyckoffPhase,
    pub wyckoff_confidence: f64,
    pub wyckoff_last_event: Option<WyckoffEvent>,
    pub price_in_demand_zone: bool,
    pub price_in_supply_zone: bool,
    pub nearest_supply: Option<Zone>,
    pub nearest_demand: Option<Zone>,
    pub dominant_cycle_period: Option<f64>,
    pub dominant_cycle_power: Option<f64>,
    pub is_stationary: bool,
    pub active_fib_level: Option<f64>,
    pub active_harmonic: Option<String>,
    pub atr: f64,
    /// Raw factor values behind the score.
    pub components: serde_json::Value,
}

impl StructureAnalysis {
    fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
            direction: TrendDirection::Sideways,
            structure_score: 0.0,
            regime: "unknown".to_string(),
            hurst: None,
            hurst_interpretation: None,
            wyckoff_phase: WyckoffPhase::Undefined,
            wyckoff_confidence: 0.0,
            wyckoff_last_event: None,
            price_in_demand_zone: false,
            price_in_supply_zone: false,
            nearest_supply: None,
            nearest_demand: None,
            dominant_cycle_period: None,
            dominant_cycle_power: None,
            is_stationary: false,
            active_fib_level: None,
            active_harmonic: None,
            atr: 0.0,
            components: serde_json::Value::Null,
        }
    }
}

pub struct MarketStructureAnalyzer {
    config: StructureConfig,
}

impl MarketStructureAnalyzer {
    pub fn new(config: StructureConfig) -> Self {
        Self { config }
    }

    /// Volatility regime from the recent-vs-full realized volatility ratio.
    fn detect_regime(&self, closes: &[f64]) -> String {
        if closes.len() < 30 {
            return "unknown".to_string();
        }
        let returns: Vec<f64> = closes
            .windows(2)
            .map(|w| if w[0] != 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
            .collect();

        let full_vol = quant_kernel::std_dev(&returns);
        let recent = &returns[returns.len().saturating_sub(10)..];
        let recent_vol = quant_kernel::std_dev(recent);

        if full_vol <= 0.0 {
            return "normal".to_string();
        }
        let ratio = recent_vol / full_vol;
        if ratio > 1.5 {
            "high_volatility".to_string()
        } else if ratio < 0.6 {
            "low_volatility".to_string()
        } else {
            "normal".to_string()
        }
    }

    /// Analyze a frozen bar snapshot, advancing the slot state.
    pub fn analyze(&self, state: &mut StructureState, bars: &[Bar]) -> StructureAnalysis {
        if bars.len() < MIN_BARS {
            return StructureAnalysis::invalid(format!(
                "need at least {MIN_BARS} bars, have {}",
                bars.len()
            ));
        }
        let last = bars.last().expect("non-empty");
        let atr = match last.atr {
            Some(a) if a > 0.0 => a,
            _ => return StructureAnalysis::invalid("missing ATR on latest bar"),
        };
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        if closes.iter().any(|c| !c.is_finite()) {
            return StructureAnalysis::invalid("non-finite close in series");
        }
        let price = last.close;

        // Alligator + trend composition
        let gator = alligator(bars, self.config.alligator_periods, self.config.alligator_shifts);
        let mut trend_votes = 0i32;
        if let Some(read) = &gator {
            match read.state {
                AlligatorState::FeedingUp => trend_votes += 1,
                AlligatorState::FeedingDown => trend_votes -= 1,
                _ => {}
            }
            if read.slope > 1e-5 {
                trend_votes += 1;
            } else if read.slope < -1e-5 {
                trend_votes -= 1;
            }
            if price > read.lips && price > read.teeth && price > read.jaw {
                trend_votes += 1;
            } else if price < read.lips && price < read.teeth && price < read.jaw {
                trend_votes -= 1;
            }
        } else {
            let slope = normalized_slope(&closes[closes.len() - 20..]);
            if slope > 1e-5 {
                trend_votes += 1;
            } else if slope < -1e-5 {
                trend_votes -= 1;
            }
        }
        let trend = if trend_votes >= 2 {
            TrendDirection::Uptrend
        } else if trend_votes <= -2 {
            TrendDirection::Downtrend
        } else {
            TrendDirection::Sideways
        };

        // Supply/demand zones
        update_zones(&mut state.supply, &mut state.demand, bars, atr, &self.config.zones);
        let near_supply = nearest_supply(&state.supply, price).cloned();
        let near_demand = nearest_demand(&state.demand, price).cloned();
        let in_supply = state
            .supply
            .iter()
            .any(|z| !z.invalidated && z.contains(price));
        let in_demand = state
            .demand
            .iter()
            .any(|z| !z.invalidated && z.contains(price));

        // Wyckoff FSM
        state
            .wyckoff
            .step(bars, &state.demand, &state.supply, &self.config.wyckoff);
        let phase = state.wyckoff.phase(self.config.wyckoff.phase_conf_threshold);
        let wyckoff_confidence = state.wyckoff.confidence();

        // Long-memory, stationarity, cycles
        let hurst = if closes.len() >= self.config.hurst_window {
            hurst_exponent(&closes)
        } else {
            None
        };
        let hurst_interpretation = hurst.map(|h| {
            HurstInterpretation::classify(h, self.config.hurst_upper, self.config.hurst_lower)
        });
        let stationarity =
            stationarity_summary(&closes, self.config.stationarity_p_threshold);
        let cycle = dominant_cycle(
            &closes,
            Detrend::Difference,
            self.config.fft_dominant_cycle_threshold,
        );

        // Cycle bias: slope over the last quarter period
        let cycle_bias = cycle
            .map(|c| {
                let quarter = (c.period_bars / 4.0).round() as usize;
                let start = closes.len().saturating_sub(quarter.max(3));
                let slope = normalized_slope(&closes[start..]);
                if slope > 1e-5 {
                    1
                } else if slope < -1e-5 {
                    -1
                } else {
                    0
                }
            })
            .unwrap_or(0);

        // Fibonacci / harmonics
        let fib = fibonacci_levels(bars, self.config.zones.lookback);
        let active_fib = fib.and_then(|f| active_fib_level(&f, price, 0.25 * atr));
        let harmonic = active_harmonic(bars).map(str::to_string);

        // Final direction: majority vote of trend, Wyckoff bias, cycle bias
        let vote = trend.sign() + phase.bias() + cycle_bias;
        let direction = if vote > 0 {
            TrendDirection::Uptrend
        } else if vote < 0 {
            TrendDirection::Downtrend
        } else {
            TrendDirection::Sideways
        };

        // Weighted structure score: factor values in [0, 1]
        let w = &self.config.weights;
        let trend_value = (trend_votes.abs() as f64 / 3.0).min(1.0);
        let alligator_value = match gator.map(|g| g.state) {
            Some(AlligatorState::FeedingUp) | Some(AlligatorState::FeedingDown) => 1.0,
            Some(AlligatorState::Awakening) => 0.5,
            _ => 0.0,
        };
        let wyckoff_value = if phase != WyckoffPhase::Undefined {
            wyckoff_confidence
        } else {
            0.0
        };
        let zone_value = match direction {
            TrendDirection::Uptrend if in_demand => 1.0,
            TrendDirection::Downtrend if in_supply => 1.0,
            TrendDirection::Uptrend => near_demand
                .as_ref()
                .map(|z| (1.0 - (price - z.price_high).abs() / (5.0 * atr)).clamp(0.0, 1.0))
                .unwrap_or(0.0),
            TrendDirection::Downtrend => near_supply
                .as_ref()
                .map(|z| (1.0 - (z.price_low - price).abs() / (5.0 * atr)).clamp(0.0, 1.0))
                .unwrap_or(0.0),
            TrendDirection::Sideways => 0.0,
        };
        let cycle_value = cycle.map(|c| c.power.min(1.0)).unwrap_or(0.0);
        let hurst_value = match (hurst, hurst_interpretation, direction) {
            (Some(h), Some(HurstInterpretation::Trending), TrendDirection::Uptrend)
            | (Some(h), Some(HurstInterpretation::Trending), TrendDirection::Downtrend) => {
                ((h - 0.5).abs() * 2.0).min(1.0)
            }
            (Some(h), Some(HurstInterpretation::MeanReverting), TrendDirection::Sideways) => {
                ((h - 0.5).abs() * 2.0).min(1.0)
            }
            _ => 0.0,
        };
        let stationarity_value = match direction {
            TrendDirection::Sideways if stationarity.is_stationary => 1.0,
            TrendDirection::Uptrend | TrendDirection::Downtrend
                if !stationarity.is_stationary =>
            {
                0.5
            }
            _ => 0.0,
        };
        let fib_value = if harmonic.is_some() {
            1.0
        } else if active_fib.is_some() {
            0.5
        } else {
            0.0
        };

        let weighted = [
            (w.trend, trend_value),
            (w.alligator, alligator_value),
            (w.wyckoff, wyckoff_value),
            (w.zones, zone_value),
            (w.cycle, cycle_value),
            (w.hurst, hurst_value),
            (w.stationarity, stationarity_value),
            (w.fibonacci, fib_value),
        ];
        let total_weight: f64 = weighted.iter().filter(|(w, _)| *w > 0.0).map(|(w, _)| w).sum();
        let structure_score = if total_weight > 0.0 {
            (weighted.iter().map(|(w, v)| w * v).sum::<f64>() / total_weight * 10.0)
                .clamp(0.0, 10.0)
        } else {
            0.0
        };

        let regime = self.detect_regime(&closes);
        debug!(
            direction = ?direction,
            score = structure_score,
            phase = phase.label(),
            regime = %regime,
            "structure analysis"
        );

        StructureAnalysis {
            valid: true,
            reason: None,
            direction,
            structure_score,
            regime,
            hurst,
            hurst_interpretation,
            wyckoff_phase: phase,
            wyckoff_confidence,
            wyckoff_last_event: state.wyckoff.last_event,
            price_in_demand_zone: in_demand,
            price_in_supply_zone: in_supply,
            nearest_supply: near_supply,
            nearest_demand: near_demand,
            dominant_cycle_period: cycle.map(|c| c.period_bars),
            dominant_cycle_power: cycle.map(|c| c.power),
            is_stationary: stationarity.is_stationary,
            active_fib_level: active_fib,
            active_harmonic: harmonic,
            atr,
            components: json!({
                "trend_votes": trend_votes,
                "trend": trend_value,
                "alligator": alligator_value,
                "wyckoff": wyckoff_value,
                "zones": zone_value,
                "cycle": cycle_value,
                "hurst": hurst_value,
                "stationarity": stationarity_value,
                "fibonacci": fib_value,
                "vote": vote,
            }),
        }
    }
}
