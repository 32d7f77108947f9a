use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use flow_core::InventoryConfig;

/// Per-symbol inventory model. Accumulated position exerts a mean-reverting
/// pull toward the neutral level; the signed adjustment is added to the flow
/// score after normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryModel {
    pub position: f64,
    pub neutral_level: f64,
    pub max_position: f64,
    pub risk_aversion: f64,
    pub mean_reversion_rate: f64,
    pub last_update: Option<DateTime<Utc>>,
}

impl InventoryModel {
    pub fn new(config: &InventoryConfig) -> Self {
        Self {
            position: 0.0,
            neutral_level: config.neutral_level,
            max_position: config.max_position.max(1e-9),
            risk_aversion: config.risk_aversion,
            mean_reversion_rate: config.mean_reversion_rate,
            last_update: None,
        }
    }

    /// Apply a fill: positive volume for buys, negative for sells.
    pub fn on_fill(&mut self, signed_volume: f64, at: DateTime<Utc>) {
        if !signed_volume.is_finite() {
            return;
        }
        self.position = (self.position + signed_volume)
            .clamp(-self.max_position, self.max_position);
        self.last_update = Some(at);
    }

    /// Normalized displacement from neutral, in [-1, 1].
    pub fn displacement(&self) -> f64 {
        ((self.position - self.neutral_level) / self.max_position).clamp(-1.0, 1.0)
    }

    /// Signed score adjustment: long inventory pushes the score down (the
    /// model wants to sell back to neutral), short inventory pushes it up.
    /// Scaled by the mean-reversion rate and risk aversion.
    pub fn score_adjustment(&self) -> f64 {
        -self.displacement() * self.mean_reversion_rate * (1.0 + self.risk_aversion) * 10.0
    }

    /// Decay the position toward neutral, simulating passive unwind between
    /// updates.
    pub fn decay(&mut self, at: DateTime<Utc>) {
        let pull = (self.position - self.neutral_level) * self.mean_reversion_rate;
        self.position -= pull;
        self.last_update = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn model() -> InventoryModel {
        InventoryModel::new(&InventoryConfig {
            neutral_level: 0.0,
            max_position: 10.0,
            risk_aversion: 0.1,
            mean_reversion_rate: 0.1,
        })
    }

    #[test]
    fn test_neutral_inventory_no_adjustment() {
        let m = model();
        assert_relative_eq!(m.score_adjustment(), 0.0);
    }

    #[test]
    fn test_long_inventory_pushes_score_down() {
        let mut m = model();
        m.on_fill(5.0, Utc::now());
        assert!(m.score_adjustment() < 0.0);
        // Displacement 0.5 x rate 0.1 x (1 + 0.1) x 10
        assert_relative_eq!(m.score_adjustment(), -0.55, epsilon = 1e-12);
    }

    #[test]
    fn test_short_inventory_pushes_score_up() {
        let mut m = model();
        m.on_fill(-10.0, Utc::now());
        assert!(m.score_adjustment() > 0.0);
    }

    #[test]
    fn test_position_clamped_at_max() {
        let mut m = model();
        m.on_fill(50.0, Utc::now());
        assert_relative_eq!(m.position, 10.0);
        assert_relative_eq!(m.displacement(), 1.0);
    }

    #[test]
    fn test_decay_pulls_toward_neutral() {
        let mut m = model();
        m.on_fill(10.0, Utc::now());
        for _ in 0..50 {
            m.decay(Utc::now());
        }
        assert!(m.position.abs() < 0.1);
    }
}
