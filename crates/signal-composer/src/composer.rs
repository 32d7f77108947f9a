use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use flow_core::{
    ComposerConfig, ComposerMode, FlowDirection, Predictor, TradeAction, TradeSignal,
    TrendDirection, Timeframe,
};
use market_structure::StructureAnalysis;
use order_flow::FlowAnalysis;

use crate::confluence::ConfluenceGraph;
use crate::levels::{build_levels, confidence_modifier};

/// Namespace for deterministic signal ids: replaying the same event log
/// reproduces identical signals byte for byte.
const SIGNAL_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6f, 0x1c, 0x2a, 0x9e, 0x41, 0xd3, 0x4b, 0x7a, 0x8c, 0x05, 0x3e, 0x92, 0x17, 0x66, 0xab,
    0x44,
]);

/// Composer outcome: a signal or the reason none was produced.
#[derive(Debug, Clone)]
pub enum Decision {
    Signal(TradeSignal),
    Suppressed(String),
}

impl Decision {
    pub fn signal(&self) -> Option<&TradeSignal> {
        match self {
            Decision::Signal(s) => Some(s),
            Decision::Suppressed(_) => None,
        }
    }

    pub fn suppression_reason(&self) -> Option<&str> {
        match self {
            Decision::Signal(_) => None,
            Decision::Suppressed(r) => Some(r),
        }
    }
}

pub struct SignalComposer {
    config: ComposerConfig,
    predictor: Option<Arc<dyn Predictor>>,
}

impl SignalComposer {
    pub fn new(config: ComposerConfig) -> Self {
        Self {
            config,
            predictor: None,
        }
    }

    /// Attach the pluggable predictor used by `ComposerMode::Predictor`.
    pub fn with_predictor(mut self, predictor: Arc<dyn Predictor>) -> Self {
        self.predictor = Some(predictor);
        self
    }

    /// Fuse the two analyses into a decision at the current price.
    pub fn compose(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        timestamp: DateTime<Utc>,
        price: f64,
        structure: &StructureAnalysis,
        flow: &FlowAnalysis,
    ) -> Decision {
        if !structure.valid {
            return Decision::Suppressed(format!(
                "structure analysis invalid: {}",
                structure.reason.as_deref().unwrap_or("unknown")
            ));
        }
        if !flow.valid {
            return Decision::Suppressed(format!(
                "flow analysis invalid: {}",
                flow.reason.as_deref().unwrap_or("unknown")
            ));
        }
        if !(price.is_finite() && price > 0.0) {
            return Decision::Suppressed("non-positive price".to_string());
        }

        let (action, score) = match self.config.mode {
            ComposerMode::RuleBased => match self.rule_based(structure, flow) {
                Ok(pair) => pair,
                Err(reason) => return Decision::Suppressed(reason),
            },
            ComposerMode::Predictor => match self.predictor_based(structure, flow) {
                Ok(pair) => pair,
                Err(reason) => return Decision::Suppressed(reason),
            },
            ComposerMode::GraphConfluence => match self.graph_based(structure, flow) {
                Ok(pair) => pair,
                Err(reason) => return Decision::Suppressed(reason),
            },
        };

        let levels = build_levels(action, price, structure.atr, structure, &self.config);
        let signal = TradeSignal {
            id: Uuid::new_v5(
                &SIGNAL_NAMESPACE,
                format!(
                    "{symbol}|{}|{}|{}",
                    timeframe.label(),
                    timestamp.timestamp(),
                    action.label()
                )
                .as_bytes(),
            ),
            symbol: symbol.to_string(),
            timeframe,
            timestamp,
            action,
            entry_price: price,
            stop_loss: levels.stop_loss,
            take_profit: levels.take_profit,
            score,
            confidence_modifier: confidence_modifier(score),
            volume: 0.0,
            metadata: json!({
                "mode": format!("{:?}", self.config.mode),
                "structure_direction": structure.direction,
                "structure_score": structure.structure_score,
                "flow_direction": flow.direction,
                "flow_score": flow.flow_score,
                "wyckoff_phase": structure.wyckoff_phase.label(),
                "vsa_signal": flow.vsa.map(|v| v.signal.label()),
                "nearest_supply": structure.nearest_supply.as_ref().map(|z| z.price_low),
                "nearest_demand": structure.nearest_demand.as_ref().map(|z| z.price_low),
                "regime": structure.regime,
                "garch_volatility_forecast": flow.garch_volatility_forecast,
                "sl_reason": levels.sl_reason,
                "tp_reason": levels.tp_reason,
            }),
        };

        if let Err(e) = signal.check_invariants() {
            return Decision::Suppressed(format!("degenerate SL/TP geometry: {e}"));
        }
        info!(
            symbol = %symbol,
            action = action.label(),
            score,
            entry = price,
            sl = signal.stop_loss,
            tp = signal.take_profit,
            "signal composed"
        );
        Decision::Signal(signal)
    }

    /// Default mode: weighted fusion with agreement gating. Thresholds move
    /// up under a volatile regime.
    fn rule_based(
        &self,
        structure: &StructureAnalysis,
        flow: &FlowAnalysis,
    ) -> Result<(TradeAction, f64), String> {
        let total = self.config.structure_weight + self.config.flow_weight;
        let combined = (self.config.structure_weight * structure.structure_score
            + self.config.flow_weight * flow.flow_score)
            / total;

        let bump = if structure.regime == "high_volatility" {
            self.config.volatile_threshold_bump
        } else {
            0.0
        };
        let buy_threshold = self.config.buy_threshold + bump;
        let sell_threshold = self.config.sell_threshold + bump;

        let agree_up = structure.direction == TrendDirection::Uptrend
            && flow.direction == FlowDirection::Up;
        let agree_down = structure.direction == TrendDirection::Downtrend
            && flow.direction == FlowDirection::Down;

        if agree_up {
            if combined >= buy_threshold {
                return Ok((TradeAction::Buy, combined.clamp(0.0, 10.0)));
            }
            return Err(format!(
                "Score < {:.1} (combined {:.2})",
                buy_threshold, combined
            ));
        }
        if agree_down {
            if combined >= sell_threshold {
                return Ok((TradeAction::Sell, combined.clamp(0.0, 10.0)));
            }
            return Err(format!(
                "Score < {:.1} (combined {:.2})",
                sell_threshold, combined
            ));
        }
        Err(format!(
            "direction disagreement: structure {:?}, flow {:?}",
            structure.direction, flow.direction
        ))
    }

    /// Predictor mode: P(up) from the pluggable capability.
    fn predictor_based(
        &self,
        structure: &StructureAnalysis,
        flow: &FlowAnalysis,
    ) -> Result<(TradeAction, f64), String> {
        let predictor = self
            .predictor
            .as_ref()
            .ok_or_else(|| "predictor mode selected but no predictor attached".to_string())?;

        let features = feature_vector(structure, flow);
        let p_up = predictor
            .predict(&features)
            .map_err(|e| format!("predictor failed: {e}"))?;
        if !(0.0..=1.0).contains(&p_up) {
            return Err(format!("predictor returned out-of-range probability {p_up}"));
        }

        let threshold = self.config.ml_probability_threshold;
        debug!(p_up, threshold, "predictor output");
        if p_up > threshold {
            Ok((TradeAction::Buy, (10.0 * p_up).clamp(0.0, 10.0)))
        } else if 1.0 - p_up > threshold {
            Ok((TradeAction::Sell, (10.0 * (1.0 - p_up)).clamp(0.0, 10.0)))
        } else {
            Err(format!(
                "probability {:.3} below threshold {:.2} both ways",
                p_up, threshold
            ))
        }
    }

    /// Graph-confluence mode: strongest sign-consistent evidence path.
    fn graph_based(
        &self,
        structure: &StructureAnalysis,
        flow: &FlowAnalysis,
    ) -> Result<(TradeAction, f64), String> {
        let graph = ConfluenceGraph::from_analyses(structure, flow);
        let path = graph
            .strongest_path()
            .ok_or_else(|| "no directional facts in confluence graph".to_string())?;

        let threshold = self.config.buy_threshold.min(self.config.sell_threshold);
        if path.magnitude < threshold {
            return Err(format!(
                "Score < {:.1} (confluence {:.2}, {} facts)",
                threshold, path.magnitude, path.length
            ));
        }
        if path.sign > 0 {
            Ok((TradeAction::Buy, path.magnitude))
        } else {
            Ok((TradeAction::Sell, path.magnitude))
        }
    }
}

/// Feature vector handed to the predictor capability. Order is part of the
/// contract with pre-trained models.
pub fn feature_vector(structure: &StructureAnalysis, flow: &FlowAnalysis) -> Vec<f64> {
    vec![
        structure.structure_score / 10.0,
        structure.direction.sign() as f64,
        structure.wyckoff_confidence,
        structure.wyckoff_phase.bias() as f64,
        structure.hurst.unwrap_or(0.5),
        if structure.is_stationary { 1.0 } else { 0.0 },
        flow.flow_score / 10.0,
        flow.direction.sign() as f64,
        flow.delta.strength * flow.delta.direction as f64,
        flow.delta.consistency,
        flow.bid_ask_imbalance.unwrap_or(0.0),
        flow.flow_divergence_score,
        flow.garch_volatility_forecast.unwrap_or(0.0),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::TimeZone;
    use flow_core::EngineError;
    use market_structure::Zone;
    use order_flow::DeltaAnalysis;
    use quant_kernel::DivergenceBand;

    fn structure(direction: TrendDirection, score: f64) -> StructureAnalysis {
        StructureAnalysis {
            valid: true,
            reason: None,
            direction,
            structure_score: score,
            regime: "normal".to_string(),
            hurst: Some(0.55),
            hurst_interpretation: None,
            wyckoff_phase: market_structure::WyckoffPhase::Undefined,
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
            atr: 0.0010,
            components: serde_json::Value::Null,
        }
    }

    fn flow(direction: FlowDirection, score: f64) -> FlowAnalysis {
        FlowAnalysis {
            valid: true,
            reason: None,
            direction,
            flow_score: score,
            delta: DeltaAnalysis {
                last: 100.0,
                cumulative: 500.0,
                consistency: 0.8,
                strength: 0.6,
                direction: direction.sign(),
            },
            bid_ask_imbalance: None,
            imbalance_significant: false,
            absorption: None,
            vsa: None,
            flow_divergence_score: 0.02,
            flow_divergence_interpretation: DivergenceBand::Normal,
            garch_volatility_forecast: None,
            market_impact: None,
            inventory_adjustment: 0.0,
            dynamic_thresholds: order_flow::DynamicThresholds::new(0.0, 0.3, 1.5),
            flow_score_components: serde_json::Value::Null,
        }
    }

    fn composer() -> SignalComposer {
        SignalComposer::new(ComposerConfig::default())
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_no_signal_below_threshold() {
        // Both agree up at score 6.0: combined 6.0 < 7.0
        let decision = composer().compose(
            "EURUSD",
            Timeframe::H1,
            at(),
            1.0850,
            &structure(TrendDirection::Uptrend, 6.0),
            &flow(FlowDirection::Up, 6.0),
        );
        let reason = decision.suppression_reason().unwrap();
        assert!(reason.contains("Score < 7.0"), "reason = {reason}");
    }

    #[test]
    fn test_rule_buy_with_zone_levels() {
        // Demand at 1.0800, supply at 1.0900, ATR 0.0010, entry 1.0850
        let mut s = structure(TrendDirection::Uptrend, 8.0);
        s.nearest_demand = Some(Zone {
            price_low: 1.0800,
            price_high: 1.0815,
            strength: 2.0,
            last_touch: at(),
            invalidated: false,
        });
        s.nearest_supply = Some(Zone {
            price_low: 1.0900,
            price_high: 1.0915,
            strength: 2.0,
            last_touch: at(),
            invalidated: false,
        });
        let decision = composer().compose(
            "EURUSD",
            Timeframe::H1,
            at(),
            1.0850,
            &s,
            &flow(FlowDirection::Up, 8.0),
        );
        let signal = decision.signal().expect("buy signal");
        assert_eq!(signal.action, TradeAction::Buy);
        assert_relative_eq!(signal.score, 8.0, epsilon = 1e-12);
        assert_relative_eq!(signal.stop_loss, 1.0798, epsilon = 1e-9);
        assert_relative_eq!(signal.take_profit, 1.0898, epsilon = 1e-9);
        assert!(signal.stop_loss < signal.entry_price);
        assert!(signal.entry_price < signal.take_profit);
        assert_eq!(signal.metadata["sl_reason"].as_str().unwrap().contains("demand"), true);
    }

    #[test]
    fn test_direction_disagreement_suppressed() {
        let decision = composer().compose(
            "EURUSD",
            Timeframe::H1,
            at(),
            1.0850,
            &structure(TrendDirection::Uptrend, 9.0),
            &flow(FlowDirection::Down, 9.0),
        );
        assert!(decision
            .suppression_reason()
            .unwrap()
            .contains("disagreement"));
    }

    #[test]
    fn test_volatile_regime_raises_threshold() {
        let mut s = structure(TrendDirection::Uptrend, 7.2);
        s.regime = "high_volatility".to_string();
        // 7.2 clears the normal 7.0 threshold but not 7.5 under volatility
        let decision = composer().compose(
            "EURUSD",
            Timeframe::H1,
            at(),
            1.0850,
            &s,
            &flow(FlowDirection::Up, 7.2),
        );
        assert!(decision.suppression_reason().unwrap().contains("Score < 7.5"));
    }

    #[test]
    fn test_invalid_analysis_suppressed() {
        let mut s = structure(TrendDirection::Uptrend, 8.0);
        s.valid = false;
        s.reason = Some("missing ATR".to_string());
        let decision = composer().compose(
            "EURUSD",
            Timeframe::H1,
            at(),
            1.0850,
            &s,
            &flow(FlowDirection::Up, 8.0),
        );
        assert!(decision.suppression_reason().unwrap().contains("missing ATR"));
    }

    struct FixedPredictor(f64);
    impl Predictor for FixedPredictor {
        fn predict(&self, _features: &[f64]) -> Result<f64, EngineError> {
            Ok(self.0)
        }
    }

    #[test]
    fn test_predictor_mode() {
        let config = ComposerConfig {
            mode: ComposerMode::Predictor,
            ..ComposerConfig::default()
        };
        let composer =
            SignalComposer::new(config).with_predictor(Arc::new(FixedPredictor(0.8)));
        let decision = composer.compose(
            "EURUSD",
            Timeframe::H1,
            at(),
            1.0850,
            &structure(TrendDirection::Uptrend, 5.0),
            &flow(FlowDirection::Up, 5.0),
        );
        let signal = decision.signal().expect("predictor buy");
        assert_eq!(signal.action, TradeAction::Buy);
        assert_relative_eq!(signal.score, 8.0, epsilon = 1e-12);

        let composer2 = SignalComposer::new(ComposerConfig {
            mode: ComposerMode::Predictor,
            ..ComposerConfig::default()
        })
        .with_predictor(Arc::new(FixedPredictor(0.5)));
        let decision = composer2.compose(
            "EURUSD",
            Timeframe::H1,
            at(),
            1.0850,
            &structure(TrendDirection::Uptrend, 5.0),
            &flow(FlowDirection::Up, 5.0),
        );
        assert!(decision.suppression_reason().is_some());
    }

    #[test]
    fn test_graph_mode_confluence() {
        let config = ComposerConfig {
            mode: ComposerMode::GraphConfluence,
            ..ComposerConfig::default()
        };
        let composer = SignalComposer::new(config);

        // Many aligned bullish facts: trend, wyckoff, zone, flow, delta
        let mut s = structure(TrendDirection::Uptrend, 9.0);
        s.wyckoff_phase = market_structure::WyckoffPhase::Markup;
        s.wyckoff_confidence = 0.9;
        s.price_in_demand_zone = true;
        let f = flow(FlowDirection::Up, 9.0);
        let decision = composer.compose("EURUSD", Timeframe::H1, at(), 1.0850, &s, &f);
        let signal = decision.signal().expect("confluence buy");
        assert_eq!(signal.action, TradeAction::Buy);
        assert!(signal.score <= 10.0);

        // A lone weak fact stays below threshold
        let decision = composer.compose(
            "EURUSD",
            Timeframe::H1,
            at(),
            1.0850,
            &structure(TrendDirection::Sideways, 2.0),
            &flow(FlowDirection::Neutral, 2.0),
        );
        assert!(decision.suppression_reason().is_some());
    }

    #[test]
    fn test_signal_id_deterministic() {
        let s = structure(TrendDirection::Uptrend, 8.0);
        let f = flow(FlowDirection::Up, 8.0);
        let a = composer().compose("EURUSD", Timeframe::H1, at(), 1.0850, &s, &f);
        let b = composer().compose("EURUSD", Timeframe::H1, at(), 1.0850, &s, &f);
        assert_eq!(a.signal().unwrap().id, b.signal().unwrap().id);
    }

    #[test]
    fn test_confidence_modifier_in_range() {
        let s = structure(TrendDirection::Uptrend, 8.0);
        let f = flow(FlowDirection::Up, 8.0);
        let decision = composer().compose("EURUSD", Timeframe::H1, at(), 1.0850, &s, &f);
        let m = decision.signal().unwrap().confidence_modifier;
        assert!((0.5..=1.2).contains(&m));
    }
}
