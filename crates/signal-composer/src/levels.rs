use flow_core::{ComposerConfig, TradeAction};
use market_structure::StructureAnalysis;

/// Stop-loss / take-profit pair with audit reasons.
#[derive(Debug, Clone)]
pub struct RiskLevels {
    pub stop_loss: f64,
    pub take_profit: f64,
    pub sl_reason: String,
    pub tp_reason: String,
}

/// Build SL/TP from the nearest supply/demand zones, falling back to ATR
/// multiples (SL) and the risk:reward ratio (TP) when no usable zone exists
/// or a zone-derived level would break the ordering invariant.
pub fn build_levels(
    action: TradeAction,
    entry: f64,
    atr: f64,
    structure: &StructureAnalysis,
    config: &ComposerConfig,
) -> RiskLevels {
    let buffer = config.sl_buffer_atr * atr;

    match action {
        TradeAction::Buy => {
            let (stop_loss, sl_reason) = match &structure.nearest_demand {
                Some(zone) if zone.price_low - buffer < entry => (
                    zone.price_low - buffer,
                    format!("demand zone low {:.5} - {:.1} ATR buffer", zone.price_low, config.sl_buffer_atr),
                ),
                _ => (
                    entry - config.atr_multiple_for_sl * atr,
                    format!("ATR fallback: entry - {:.1} x ATR", config.atr_multiple_for_sl),
                ),
            };
            let risk = entry - stop_loss;
            let (take_profit, tp_reason) = match &structure.nearest_supply {
                Some(zone) if zone.price_low - buffer > entry => (
                    zone.price_low - buffer,
                    format!("supply zone low {:.5} - {:.1} ATR buffer", zone.price_low, config.sl_buffer_atr),
                ),
                _ if config.atr_multiple_for_tp > 0.0 => (
                    entry + config.atr_multiple_for_tp * atr,
                    format!("ATR fallback: entry + {:.1} x ATR", config.atr_multiple_for_tp),
                ),
                _ => (
                    entry + risk * config.risk_reward_ratio,
                    format!("risk:reward fallback {:.1}R", config.risk_reward_ratio),
                ),
            };
            RiskLevels {
                stop_loss,
                take_profit,
                sl_reason,
                tp_reason,
            }
        }
        TradeAction::Sell => {
            let (stop_loss, sl_reason) = match &structure.nearest_supply {
                Some(zone) if zone.price_high + buffer > entry => (
                    zone.price_high + buffer,
                    format!("supply zone high {:.5} + {:.1} ATR buffer", zone.price_high, config.sl_buffer_atr),
                ),
                _ => (
                    entry + config.atr_multiple_for_sl * atr,
                    format!("ATR fallback: entry + {:.1} x ATR", config.atr_multiple_for_sl),
                ),
            };
            let risk = stop_loss - entry;
            let (take_profit, tp_reason) = match &structure.nearest_demand {
                Some(zone) if zone.price_high + buffer < entry => (
                    zone.price_high + buffer,
                    format!("demand zone high {:.5} + {:.1} ATR buffer", zone.price_high, config.sl_buffer_atr),
                ),
                _ if config.atr_multiple_for_tp > 0.0 => (
                    entry - config.atr_multiple_for_tp * atr,
                    format!("ATR fallback: entry - {:.1} x ATR", config.atr_multiple_for_tp),
                ),
                _ => (
                    entry - risk * config.risk_reward_ratio,
                    format!("risk:reward fallback {:.1}R", config.risk_reward_ratio),
                ),
            };
            RiskLevels {
                stop_loss,
                take_profit,
                sl_reason,
                tp_reason,
            }
        }
    }
}

/// Sizing confidence modifier: clamp(0.5 + 0.7 x score / 10, 0.5, 1.2).
pub fn confidence_modifier(score: f64) -> f64 {
    (0.5 + 0.7 * score / 10.0).clamp(0.5, 1.2)
}
