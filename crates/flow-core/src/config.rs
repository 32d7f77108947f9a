//! Engine configuration.
//!
//! Every recognized option is an explicit field with the engine default;
//! unknown keys are rejected at load via `deny_unknown_fields`. The whole
//! snapshot is immutable once validated — components receive clones or
//! references at construction and never mutate it. Validation failures are
//! fatal at init and bail with the offending option.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::{EngineError, Timeframe};

/// Bounded-ring capacities for per-slot state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StoreConfig {
    /// Bar ring length per (symbol, timeframe); max lookback across analyzers.
    pub ring_capacity: usize,
    /// Signed trade-delta history length.
    pub delta_history: usize,
    /// Market-impact rings (recent volumes / relative spreads).
    pub impact_history: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 500,
            delta_history: 1000,
            impact_history: 100,
        }
    }
}

/// GARCH volatility model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GarchConfig {
    pub p: usize,
    pub q: usize,
    /// Seconds between refits.
    pub retrain_interval: i64,
    /// Minimum finite returns required to attempt a fit.
    pub min_data: usize,
    pub vol_model: String,
    pub dist: String,
}

impl Default for GarchConfig {
    fn default() -> Self {
        Self {
            p: 1,
            q: 1,
            retrain_interval: 86_400,
            min_data: 252,
            vol_model: "garch".to_string(),
            dist: "normal".to_string(),
        }
    }
}

/// Jensen-Shannon flow-divergence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FlowDivergenceConfig {
    /// Recent window length.
    pub window: usize,
    /// Baseline window length (also defines the common bin range).
    pub baseline_window: usize,
    pub bins: usize,
    /// Divergence band threshold; strongly diverging at 1.5x.
    pub threshold: f64,
}

impl Default for FlowDivergenceConfig {
    fn default() -> Self {
        Self {
            window: 50,
            baseline_window: 200,
            bins: 10,
            threshold: 0.1,
        }
    }
}

/// Volume Spread Analysis rule settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct VsaConfig {
    pub volume_avg_period: usize,
    /// High-volume multiple of the average (Upthrust, StoppingVolume).
    pub vol_factor_high: f64,
    /// Low-volume multiple of the average (NoDemand, NoSupply).
    pub vol_factor_low: f64,
    /// Wide-spread multiple of ATR (StoppingVolume).
    pub spread_factor: f64,
}

impl Default for VsaConfig {
    fn default() -> Self {
        Self {
            volume_avg_period: 20,
            vol_factor_high: 2.0,
            vol_factor_low: 0.5,
            spread_factor: 1.5,
        }
    }
}

/// Dynamic threshold adaptation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ThresholdConfig {
    /// Seconds between threshold updates.
    pub update_interval: i64,
    /// Weight of the Bayesian posterior when blending with the running value.
    pub bayes_update_blend_factor: f64,
    /// Observation buffer cap per estimator.
    pub bayes_observation_cap: usize,
    /// Linear volatility scaling applied to the delta threshold.
    pub volatility_multiplier: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            update_interval: 300,
            bayes_update_blend_factor: 0.8,
            bayes_observation_cap: 100,
            volatility_multiplier: 1.0,
        }
    }
}

/// Inventory model settings (per symbol).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct InventoryConfig {
    pub neutral_level: f64,
    pub max_position: f64,
    pub risk_aversion: f64,
    pub mean_reversion_rate: f64,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            neutral_level: 0.0,
            max_position: 1.0,
            risk_aversion: 0.1,
            mean_reversion_rate: 0.1,
        }
    }
}

/// Order-flow component weights. Raw component values are in [0, 1]; the
/// flow score is the weighted mean scaled to [0, 10].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FlowWeights {
    pub delta: f64,
    pub bid_ask: f64,
    pub liquidity: f64,
    pub volume_profile: f64,
    pub absorption: f64,
    pub effort_result: f64,
    pub institutional: f64,
    pub intensity: f64,
    pub divergence: f64,
    pub vsa: f64,
}

impl Default for FlowWeights {
    fn default() -> Self {
        Self {
            delta: 2.0,
            bid_ask: 1.5,
            liquidity: 1.0,
            volume_profile: 1.0,
            absorption: 1.5,
            effort_result: 1.0,
            institutional: 1.5,
            intensity: 0.5,
            divergence: 1.0,
            vsa: 1.0,
        }
    }
}

/// Order-flow analyzer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FlowConfig {
    pub vsa: VsaConfig,
    pub divergence: FlowDivergenceConfig,
    pub thresholds: ThresholdConfig,
    pub inventory: InventoryConfig,
    pub weights: FlowWeights,
    /// Absorption: volume above this multiple of average with range/ATR < 0.5.
    pub absorption_ratio: f64,
    /// Bars considered for delta consistency.
    pub delta_consistency_window: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            vsa: VsaConfig::default(),
            divergence: FlowDivergenceConfig::default(),
            thresholds: ThresholdConfig::default(),
            inventory: InventoryConfig::default(),
            weights: FlowWeights::default(),
            absorption_ratio: 1.5,
            delta_consistency_window: 10,
        }
    }
}

/// Supply/demand zone detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ZoneConfig {
    /// Pivot prominence as a multiple of ATR.
    pub pivot_prominence_atr_factor: f64,
    /// Cluster epsilon as a multiple of ATR.
    pub cluster_eps_atr_factor: f64,
    /// Density-cluster minimum pivot count.
    pub cluster_min_samples: usize,
    /// A close this many ATRs beyond the far edge invalidates the zone.
    pub invalidation_atr_factor: f64,
    /// Pivot lookback window in bars.
    pub lookback: usize,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            pivot_prominence_atr_factor: 1.0,
            cluster_eps_atr_factor: 0.5,
            cluster_min_samples: 2,
            invalidation_atr_factor: 1.0,
            lookback: 200,
        }
    }
}

/// Wyckoff phase state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct WyckoffConfig {
    /// Volume spike multiple of average volume.
    pub vol_spike_factor: f64,
    /// Minimum accumulated event score before a phase is emitted.
    pub phase_conf_threshold: f64,
    /// Bars of history the event detectors look back over.
    pub event_lookback: usize,
}

impl Default for WyckoffConfig {
    fn default() -> Self {
        Self {
            vol_spike_factor: 2.0,
            phase_conf_threshold: 7.0,
            event_lookback: 20,
        }
    }
}

/// Market-structure component weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StructureWeights {
    pub trend: f64,
    pub alligator: f64,
    pub wyckoff: f64,
    pub zones: f64,
    pub cycle: f64,
    pub hurst: f64,
    pub stationarity: f64,
    pub fibonacci: f64,
}

impl Default for StructureWeights {
    fn default() -> Self {
        Self {
            trend: 2.0,
            alligator: 1.5,
            wyckoff: 2.0,
            zones: 1.5,
            cycle: 1.0,
            hurst: 1.0,
            stationarity: 0.5,
            fibonacci: 0.5,
        }
    }
}

/// Market-structure analyzer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StructureConfig {
    pub zones: ZoneConfig,
    pub wyckoff: WyckoffConfig,
    pub weights: StructureWeights,
    /// Alligator jaw/teeth/lips periods.
    pub alligator_periods: [usize; 3],
    /// Alligator jaw/teeth/lips forward shifts.
    pub alligator_shifts: [usize; 3],
    /// Hurst window; analysis skips the interpretation below this.
    pub hurst_window: usize,
    /// H above this reads as trending.
    pub hurst_upper: f64,
    /// H below this reads as mean-reverting.
    pub hurst_lower: f64,
    /// p-value threshold shared by ADF and KPSS.
    pub stationarity_p_threshold: f64,
    /// Minimum normalized spectral power for a dominant cycle.
    pub fft_dominant_cycle_threshold: f64,
}

impl Default for StructureConfig {
    fn default() -> Self {
        Self {
            zones: ZoneConfig::default(),
            wyckoff: WyckoffConfig::default(),
            weights: StructureWeights::default(),
            alligator_periods: [13, 8, 5],
            alligator_shifts: [8, 5, 3],
            hurst_window: 100,
            hurst_upper: 0.55,
            hurst_lower: 0.45,
            stationarity_p_threshold: 0.05,
            fft_dominant_cycle_threshold: 0.1,
        }
    }
}

/// Signal fusion mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComposerMode {
    RuleBased,
    Predictor,
    GraphConfluence,
}

/// Signal composer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ComposerConfig {
    pub mode: ComposerMode,
    pub structure_weight: f64,
    pub flow_weight: f64,
    pub buy_threshold: f64,
    pub sell_threshold: f64,
    /// Added to both thresholds under a volatile regime.
    pub volatile_threshold_bump: f64,
    pub ml_probability_threshold: f64,
    /// SL buffer beyond the zone edge, in ATRs.
    pub sl_buffer_atr: f64,
    /// ATR multiple for the SL fallback when no zone exists.
    pub atr_multiple_for_sl: f64,
    /// ATR multiple for the TP fallback (0 = use risk:reward instead).
    pub atr_multiple_for_tp: f64,
    pub risk_reward_ratio: f64,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            mode: ComposerMode::RuleBased,
            structure_weight: 0.6,
            flow_weight: 0.4,
            buy_threshold: 7.0,
            sell_threshold: 7.0,
            volatile_threshold_bump: 0.5,
            ml_probability_threshold: 0.65,
            sl_buffer_atr: 0.2,
            atr_multiple_for_sl: 2.0,
            atr_multiple_for_tp: 0.0,
            risk_reward_ratio: 1.5,
        }
    }
}

/// Risk evaluator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RiskConfig {
    /// Rolling drawdown limit as a fraction of peak equity.
    pub max_drawdown: f64,
    /// Daily loss cap as a fraction of the day's starting balance.
    pub max_daily_loss: f64,
    /// Daily profit cap (0 disables).
    pub max_daily_profit: f64,
    /// Base risk per trade as a fraction of balance.
    pub risk_per_trade: f64,
    pub max_trades_per_day: u32,
    pub max_consecutive_losses: u32,
    /// Hard cap on a single position's volume.
    pub max_position_size: f64,
    pub min_volume: f64,
    pub volume_step: f64,
    /// Price increment of one point (e.g. 0.0001 for 4-decimal FX quotes).
    pub point_size: f64,
    /// Dollar value of one point of SL distance per unit volume.
    pub pip_value: f64,
    /// Correlation-weighted exposure budget.
    pub max_correlation_exposure: f64,
    pub use_kelly_sizing: bool,
    pub kelly_fraction: f64,
    pub min_trades_for_kelly: usize,
    /// Closed-trade ring used for rolling win rate / win-loss ratio.
    pub trade_history_len: usize,
    pub use_var_check: bool,
    pub var_confidence_level: f64,
    /// Reject when parametric 1-day VaR exceeds this fraction of balance.
    pub max_portfolio_var_ratio: f64,
    pub trade_cooldown_minutes: i64,
    /// Cooldown multiplier applied after a losing trade.
    pub loss_cooldown_multiplier: f64,
    pub dynamic_risk_enabled: bool,
    /// Discretionary risk-level multiplier.
    pub risk_level: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_drawdown: 0.04,
            max_daily_loss: 0.02,
            max_daily_profit: 0.0,
            risk_per_trade: 0.01,
            max_trades_per_day: 10,
            max_consecutive_losses: 3,
            max_position_size: 10.0,
            min_volume: 0.01,
            volume_step: 0.01,
            point_size: 0.0001,
            pip_value: 10.0,
            max_correlation_exposure: 2.0,
            use_kelly_sizing: false,
            kelly_fraction: 0.5,
            min_trades_for_kelly: 50,
            trade_history_len: 200,
            use_var_check: false,
            var_confidence_level: 0.99,
            max_portfolio_var_ratio: 0.05,
            trade_cooldown_minutes: 15,
            loss_cooldown_multiplier: 2.0,
            dynamic_risk_enabled: false,
            risk_level: 1.0,
        }
    }
}

/// Historical CSV loader settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoaderConfig {
    /// Reject a file when the reindexed-gap fraction exceeds this percentage.
    pub gap_repair_max_perc: f64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            gap_repair_max_perc: 50.0,
        }
    }
}

/// Immutable engine configuration snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EngineConfig {
    /// Timeframe labels; see `Timeframe::parse`.
    pub timeframes: Vec<String>,
    pub store: StoreConfig,
    pub garch: GarchConfig,
    pub structure: StructureConfig,
    pub flow: FlowConfig,
    pub composer: ComposerConfig,
    pub risk: RiskConfig,
    pub loader: LoaderConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeframes: vec!["5min".to_string(), "1h".to_string()],
            store: StoreConfig::default(),
            garch: GarchConfig::default(),
            structure: StructureConfig::default(),
            flow: FlowConfig::default(),
            composer: ComposerConfig::default(),
            risk: RiskConfig::default(),
            loader: LoaderConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document. Unknown keys anywhere in the tree fail the load.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_json::from_str(raw).context("config parse failed")?;
        config.validate()?;
        Ok(config)
    }

    /// Parsed timeframes in declaration order.
    pub fn parsed_timeframes(&self) -> Result<Vec<Timeframe>, EngineError> {
        self.timeframes.iter().map(|s| Timeframe::parse(s)).collect()
    }

    /// Validate cross-field constraints. Failures here are fatal at init.
    pub fn validate(&self) -> Result<()> {
        self.parsed_timeframes()?;
        if self.timeframes.is_empty() {
            bail!("timeframes must not be empty");
        }
        if self.store.ring_capacity < self.structure.hurst_window {
            bail!(
                "ring_capacity {} below hurst_window {}",
                self.store.ring_capacity,
                self.structure.hurst_window
            );
        }
        if !(0.0..1.0).contains(&self.risk.max_drawdown) || self.risk.max_drawdown <= 0.0 {
            bail!("max_drawdown must be in (0, 1)");
        }
        if self.risk.risk_per_trade <= 0.0 || self.risk.risk_per_trade >= 1.0 {
            bail!("risk_per_trade must be in (0, 1)");
        }
        if self.risk.volume_step <= 0.0 || self.risk.min_volume < self.risk.volume_step {
            bail!("volume_step must be positive and min_volume >= volume_step");
        }
        if self.risk.min_volume > self.risk.max_position_size {
            bail!("min_volume exceeds max_position_size");
        }
        if !(0.0..=1.0).contains(&self.risk.kelly_fraction) {
            bail!("kelly_fraction must be between 0 and 1");
        }
        if !(0.5..1.0).contains(&self.risk.var_confidence_level) {
            bail!("var_confidence_level must be in [0.5, 1)");
        }
        if self.composer.structure_weight < 0.0
            || self.composer.flow_weight < 0.0
            || self.composer.structure_weight + self.composer.flow_weight <= 0.0
        {
            bail!("structure_weight/flow_weight must be non-negative and sum positive");
        }
        if !(0.5..1.0).contains(&self.composer.ml_probability_threshold) {
            bail!("ml_probability_threshold must be in [0.5, 1)");
        }
        if self.flow.divergence.bins == 0 || self.flow.divergence.window == 0 {
            bail!("flow divergence bins/window must be positive");
        }
        if !(0.0..=1.0).contains(&self.flow.thresholds.bayes_update_blend_factor) {
            bail!("bayes_update_blend_factor must be between 0 and 1");
        }
        if self.garch.min_data < 20 {
            bail!("garch min_data must be >= 20");
        }
        if self.loader.gap_repair_max_perc < 0.0 || self.loader.gap_repair_max_perc > 100.0 {
            bail!("gap_repair_max_perc must be in [0, 100]");
        }
        Ok(())
    }
}
