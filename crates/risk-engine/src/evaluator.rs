use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};

use flow_core::{AccountStatus, OpenPosition, RiskConfig, TradeSignal};

use crate::correlation::CorrelationMatrix;
use crate::state::RiskState;
use crate::var::{parametric_var, Exposure};

/// Volatility inputs for the sizing adjustment. GARCH wins when both the
/// forecast and its baseline are present; the ATR ratio is the fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct VolatilityContext {
    pub garch_forecast: Option<f64>,
    pub garch_baseline: Option<f64>,
    pub atr: Option<f64>,
    pub atr_baseline: Option<f64>,
    /// Per-day fractional volatility used for parametric VaR.
    pub daily_vol: Option<f64>,
}

impl VolatilityContext {
    /// Current-to-baseline volatility ratio; 1.0 when nothing is available.
    fn ratio(&self) -> f64 {
        match (self.garch_forecast, self.garch_baseline) {
            (Some(f), Some(b)) if b > 0.0 => f / b,
            _ => match (self.atr, self.atr_baseline) {
                (Some(a), Some(b)) if b > 0.0 => a / b,
                _ => 1.0,
            },
        }
    }
}

/// Evaluation outcome; an accepted verdict carries the sized signal.
#[derive(Debug, Clone)]
pub struct RiskVerdict {
    pub accepted: bool,
    pub reason: String,
    pub adjusted_signal: Option<TradeSignal>,
}

impl RiskVerdict {
    fn reject(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        warn!(reason = %reason, "signal rejected");
        Self {
            accepted: false,
            reason,
            adjusted_signal: None,
        }
    }
}

#[derive(Debug)]
pub struct RiskEvaluator {
    config: RiskConfig,
}

impl RiskEvaluator {
    /// Build an evaluator over a risk configuration. The limits feed
    /// denominators in sizing, so a degenerate configuration is refused
    /// here rather than surfacing as NaN volumes later.
    pub fn new(config: RiskConfig) -> Result<Self> {
        if config.max_drawdown <= 0.0 || config.max_drawdown >= 1.0 {
            bail!("max_drawdown must be between 0 and 1");
        }
        if config.risk_per_trade <= 0.0 || config.risk_per_trade >= 1.0 {
            bail!("risk_per_trade must be between 0 and 1");
        }
        if config.volume_step <= 0.0 {
            bail!("volume_step must be positive");
        }
        if config.min_volume < config.volume_step {
            bail!("min_volume must be >= volume_step");
        }
        if config.min_volume > config.max_position_size {
            bail!("min_volume must be <= max_position_size");
        }
        if config.point_size <= 0.0 || config.pip_value <= 0.0 {
            bail!("point_size and pip_value must be positive");
        }
        if config.max_correlation_exposure <= 0.0 {
            bail!("max_correlation_exposure must be positive");
        }
        if config.kelly_fraction < 0.0 || config.kelly_fraction > 1.0 {
            bail!("kelly_fraction must be between 0 and 1");
        }
        if !(0.5..1.0).contains(&config.var_confidence_level) {
            bail!("var_confidence_level must be in [0.5, 1)");
        }
        if config.risk_level <= 0.0 {
            bail!("risk_level must be positive");
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Run the ordered risk checks and size the position.
    pub fn evaluate(
        &self,
        signal: &TradeSignal,
        account: &AccountStatus,
        state: &mut RiskState,
        correlations: &CorrelationMatrix,
        volatility: &VolatilityContext,
        now: DateTime<Utc>,
    ) -> RiskVerdict {
        state.roll_day(now);
        state.observe_equity(account.equity);

        // 1. Rolling drawdown against the equity peak
        let drawdown = state.rolling_drawdown(account.equity);
        if drawdown >= self.config.max_drawdown {
            return RiskVerdict::reject(format!(
                "Max Rolling Drawdown breached: {:.2}% >= {:.2}%",
                drawdown * 100.0,
                self.config.max_drawdown * 100.0
            ));
        }

        // 2. Daily loss / profit caps
        if self.config.max_daily_loss > 0.0
            && state.daily_pnl <= -self.config.max_daily_loss * state.daily_start_balance
        {
            return RiskVerdict::reject(format!(
                "daily loss limit reached: {:.2} <= -{:.2}% of day start",
                state.daily_pnl,
                self.config.max_daily_loss * 100.0
            ));
        }
        if self.config.max_daily_profit > 0.0
            && state.daily_pnl >= self.config.max_daily_profit * state.daily_start_balance
        {
            return RiskVerdict::reject("daily profit target reached, standing down".to_string());
        }

        // 3. Trade count and loss streak caps
        if state.daily_trades >= self.config.max_trades_per_day {
            return RiskVerdict::reject(format!(
                "max trades per day reached ({})",
                self.config.max_trades_per_day
            ));
        }
        if state.consecutive_losses >= self.config.max_consecutive_losses {
            return RiskVerdict::reject(format!(
                "max consecutive losses reached ({})",
                state.consecutive_losses
            ));
        }

        // 4. Optional parametric portfolio VaR
        if self.config.use_var_check {
            let daily_vol = volatility.daily_vol.unwrap_or(0.01);
            let notional_per_volume = self.config.pip_value / self.config.point_size;
            let mut exposures: Vec<Exposure> = state
                .open_positions
                .values()
                .map(|p| Exposure {
                    symbol: p.symbol.clone(),
                    value: p.volume * notional_per_volume,
                    daily_vol,
                })
                .collect();
            exposures.push(Exposure {
                symbol: signal.symbol.clone(),
                value: self.config.min_volume * notional_per_volume,
                daily_vol,
            });
            if let Some(var) = parametric_var(
                &exposures,
                correlations,
                self.config.var_confidence_level,
            ) {
                let limit = self.config.max_portfolio_var_ratio * account.balance;
                if var > limit {
                    return RiskVerdict::reject(format!(
                        "portfolio VaR {:.0} exceeds limit {:.0}",
                        var, limit
                    ));
                }
            }
        }

        // 5. Per-symbol cooldown
        if state.cooldown_active(&signal.symbol, now) {
            return RiskVerdict::reject(format!(
                "cooldown active for {} until {}",
                signal.symbol,
                state
                    .cooldown_until(&signal.symbol)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default()
            ));
        }

        self.size_position(signal, account, state, correlations, volatility)
    }

    /// Fixed-fractional sizing with the Kelly override when enabled and
    /// enough closed trades exist.
    fn size_position(
        &self,
        signal: &TradeSignal,
        account: &AccountStatus,
        state: &RiskState,
        correlations: &CorrelationMatrix,
        volatility: &VolatilityContext,
    ) -> RiskVerdict {
        let sl_distance = (signal.entry_price - signal.stop_loss).abs();
        if sl_distance <= 0.0 || self.config.point_size <= 0.0 {
            return RiskVerdict::reject("degenerate stop distance".to_string());
        }
        let sl_points = sl_distance / self.config.point_size;

        // Correlation exposure factor
        let mut exposure = 0.0;
        for open in state.open_positions.values() {
            let rho = correlations
                .correlation(&signal.symbol, &open.symbol)
                .unwrap_or(0.5)
                .abs();
            let budget_units = if account.balance > 0.0 && self.config.risk_per_trade > 0.0 {
                open.risk_amount / (account.balance * self.config.risk_per_trade)
            } else {
                0.0
            };
            exposure += rho * budget_units;
        }
        let correlation_factor =
            (1.0 - exposure / self.config.max_correlation_exposure).max(0.1);

        // Volatility factor: richer vol shrinks size
        let vol_ratio = volatility.ratio();
        let volatility_factor = (1.0 / vol_ratio.max(1e-6)).clamp(0.5, 1.5);

        // Kelly gate
        let kelly = if self.config.use_kelly_sizing
            && state.trade_count() >= self.config.min_trades_for_kelly
        {
            state.win_loss_ratio().map(|r| {
                let w = state.win_rate();
                let f_star = w - (1.0 - w) / r;
                (self.config.kelly_fraction * f_star.max(0.0)).clamp(0.0, 1.0)
            })
        } else {
            None
        };

        let (sizing_method, risk_fraction) = match kelly {
            Some(f) if f > 0.0 => ("Kelly", f * correlation_factor * volatility_factor),
            _ => {
                let dynamic_factor = if self.config.dynamic_risk_enabled
                    && state.trade_count() >= 10
                {
                    (0.5 + state.win_rate()).clamp(0.5, 1.5)
                } else {
                    1.0
                };
                (
                    "Fixed Fractional",
                    self.config.risk_per_trade
                        * dynamic_factor
                        * self.config.risk_level
                        * correlation_factor
                        * volatility_factor,
                )
            }
        };

        let risk_amount = account.balance * risk_fraction;
        let raw_volume = risk_amount / (sl_points * self.config.pip_value);
        let stepped = (raw_volume / self.config.volume_step).floor() * self.config.volume_step;
        let volume = stepped.min(self.config.max_position_size);

        if volume < self.config.min_volume {
            return RiskVerdict::reject(format!(
                "computed volume {:.4} below minimum {:.2}",
                volume, self.config.min_volume
            ));
        }

        let mut adjusted = signal.clone();
        adjusted.volume = volume;
        if let Some(bag) = adjusted.metadata.as_object_mut() {
            bag.insert(
                "sizing".to_string(),
                json!({
                    "method": sizing_method,
                    "risk_fraction": risk_fraction,
                    "risk_amount": risk_amount,
                    "sl_points": sl_points,
                    "correlation_factor": correlation_factor,
                    "volatility_factor": volatility_factor,
                    "kelly_fraction_applied": kelly,
                }),
            );
        } else {
            adjusted.metadata = json!({
                "sizing": { "method": sizing_method, "risk_fraction": risk_fraction }
            });
        }

        info!(
            symbol = %signal.symbol,
            method = sizing_method,
            volume,
            risk_amount,
            "signal accepted"
        );
        RiskVerdict {
            accepted: true,
            reason: format!("accepted ({sizing_method})"),
            adjusted_signal: Some(adjusted),
        }
    }

    /// Open-position bookkeeping for an accepted, submitted signal.
    pub fn register_open(
        &self,
        state: &mut RiskState,
        signal: &TradeSignal,
        ticket: u64,
        now: DateTime<Utc>,
    ) {
        let risk_amount =
            (signal.entry_price - signal.stop_loss).abs() / self.config.point_size
                * self.config.pip_value
                * signal.volume;
        state.record_open(
            OpenPosition {
                ticket,
                symbol: signal.symbol.clone(),
                side: signal.action,
                volume: signal.volume,
                entry_price: signal.entry_price,
                risk_amount,
            },
            now,
        );
    }
}
