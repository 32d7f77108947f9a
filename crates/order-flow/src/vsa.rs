use serde::{Deserialize, Serialize};

use flow_core::{Bar, VsaConfig};

/// Volume Spread Analysis pattern on the last bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VsaSignal {
    NoDemand,
    NoSupply,
    UpthrustPotential,
    StoppingVolume,
}

impl VsaSignal {
    pub fn label(&self) -> &'static str {
        match self {
            VsaSignal::NoDemand => "NoDemand",
            VsaSignal::NoSupply => "NoSupply",
            VsaSignal::UpthrustPotential => "UpthrustPotential",
            VsaSignal::StoppingVolume => "StoppingVolume",
        }
    }

    /// Directional read: NoSupply and StoppingVolume lean bullish,
    /// NoDemand and UpthrustPotential bearish.
    pub fn bias(&self) -> i32 {
        match self {
            VsaSignal::NoSupply | VsaSignal::StoppingVolume => 1,
            VsaSignal::NoDemand | VsaSignal::UpthrustPotential => -1,
        }
    }
}

/// VSA detection result with its fixed rule confidence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VsaRead {
    pub signal: VsaSignal,
    pub confidence: f64,
}

/// Run the fixed VSA rule set on the last bar against the average volume of
/// the preceding window and the current ATR.
pub fn detect_vsa(bars: &[Bar], atr: f64, config: &VsaConfig) -> Option<VsaRead> {
    if bars.len() < config.volume_avg_period + 2 || atr <= 0.0 {
        return None;
    }
    let last = &bars[bars.len() - 1];
    let prev = &bars[bars.len() - 2];
    let window = &bars[bars.len() - 1 - config.volume_avg_period..bars.len() - 1];
    let avg_volume = window.iter().map(|b| b.volume).sum::<f64>() / window.len() as f64;
    if avg_volume <= 0.0 {
        return None;
    }

    let spread_ratio = last.range() / atr;
    let vol_ratio = last.volume / avg_volume;
    let close_pos = last.close_position();

    // NoDemand: up-bar on a narrow spread and dried-up volume, closing soft.
    if last.is_up()
        && spread_ratio < 0.5
        && vol_ratio < config.vol_factor_low
        && last.close < prev.close
    {
        return Some(VsaRead {
            signal: VsaSignal::NoDemand,
            confidence: 0.7,
        });
    }

    // NoSupply: the symmetric down-bar.
    if last.is_down()
        && spread_ratio < 0.5
        && vol_ratio < config.vol_factor_low
        && last.close > prev.close
    {
        return Some(VsaRead {
            signal: VsaSignal::NoSupply,
            confidence: 0.7,
        });
    }

    // UpthrustPotential: up-bar closing in the lower third on heavy volume.
    if last.is_up() && close_pos < 0.33 && vol_ratio > config.vol_factor_high {
        return Some(VsaRead {
            signal: VsaSignal::UpthrustPotential,
            confidence: 0.6,
        });
    }

    // StoppingVolume: wide spread, heavy volume, mid-range close.
    if spread_ratio > config.spread_factor
        && vol_ratio > config.vol_factor_high
        && (0.33..=0.66).contains(&close_pos)
    {
        return Some(VsaRead {
            signal: VsaSignal::StoppingVolume,
            confidence: 0.65,
        });
    }

    None
}
