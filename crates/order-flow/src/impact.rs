use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use quant_kernel::mean;

/// Bounded rings of recent bar volumes and relative spreads, feeding the
/// square-root market-impact estimate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactHistory {
    volumes: VecDeque<f64>,
    spreads: VecDeque<f64>,
    capacity: usize,
}

/// Square-root model estimate for a hypothetical order of the recent bar's
/// size: Impact = volatility x gamma x sqrt(participation).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarketImpactEstimate {
    /// Order size over average volume.
    pub participation_rate: f64,
    /// Price impact as a fraction of price.
    pub impact: f64,
    /// Mean relative spread over the ring.
    pub avg_spread: f64,
}

/// Market impact coefficient for moderately liquid instruments.
const GAMMA: f64 = 0.2;

impl ImpactHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            volumes: VecDeque::with_capacity(capacity),
            spreads: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, volume: f64, relative_spread: f64) {
        if volume.is_finite() && volume >= 0.0 {
            if self.volumes.len() == self.capacity {
                self.volumes.pop_front();
            }
            self.volumes.push_back(volume);
        }
        if relative_spread.is_finite() && relative_spread >= 0.0 {
            if self.spreads.len() == self.capacity {
                self.spreads.pop_front();
            }
            self.spreads.push_back(relative_spread);
        }
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    /// Estimate impact for an order of `order_volume` given `volatility`
    /// (a per-bar fractional volatility proxy). None below 5 samples.
    pub fn estimate(&self, order_volume: f64, volatility: f64) -> Option<MarketImpactEstimate> {
        if self.volumes.len() < 5 || order_volume <= 0.0 {
            return None;
        }
        let vols: Vec<f64> = self.volumes.iter().copied().collect();
        let avg_volume = mean(&vols);
        if avg_volume <= 0.0 {
            return None;
        }
        let participation = order_volume / avg_volume;
        let impact = volatility.abs() * GAMMA * participation.sqrt();
        let spreads: Vec<f64> = self.spreads.iter().copied().collect();
        Some(MarketImpactEstimate {
            participation_rate: participation,
            impact,
            avg_spread: if spreads.is_empty() { 0.0 } else { mean(&spreads) },
        })
    }
}
