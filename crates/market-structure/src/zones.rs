use chrono::{DateTime, Utc};
use find_peaks::PeakFinder;
use serde::{Deserialize, Serialize};

use flow_core::{Bar, ZoneConfig};

/// A supply or demand zone: a price band where historical flow absorbed moves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub price_low: f64,
    pub price_high: f64,
    /// Pivot count behind the zone, the clustering weight.
    pub strength: f64,
    pub last_touch: DateTime<Utc>,
    pub invalidated: bool,
}

impl Zone {
    pub fn contains(&self, price: f64) -> bool {
        price >= self.price_low && price <= self.price_high
    }

    pub fn mid(&self) -> f64 {
        (self.price_low + self.price_high) / 2.0
    }
}

/// Zone side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneKind {
    Supply,
    Demand,
}

/// Significant pivots: highs for supply, lows for demand, by prominence.
fn significant_pivots(bars: &[Bar], kind: ZoneKind, min_prominence: f64) -> Vec<(usize, f64)> {
    let series: Vec<f64> = match kind {
        ZoneKind::Supply => bars.iter().map(|b| b.high).collect(),
        // Negate lows so troughs become peaks
        ZoneKind::Demand => bars.iter().map(|b| -b.low).collect(),
    };
    let mut finder = PeakFinder::new(&series);
    finder.with_min_prominence(min_prominence);
    finder
        .find_peaks()
        .into_iter()
        .map(|p| {
            let idx = p.middle_position();
            let price = match kind {
                ZoneKind::Supply => bars[idx].high,
                ZoneKind::Demand => bars[idx].low,
            };
            (idx, price)
        })
        .collect()
}

/// 1-D density clustering of pivot prices: sorted prices chain into a
/// cluster while consecutive gaps stay within eps; clusters below
/// min_samples are discarded. Overlapping clusters merge into one zone.
fn cluster_pivots(
    mut pivots: Vec<(usize, f64)>,
    bars: &[Bar],
    eps: f64,
    min_samples: usize,
) -> Vec<Zone> {
    if pivots.len() < min_samples {
        return vec![];
    }
    pivots.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut zones: Vec<Zone> = Vec::new();
    let mut cluster: Vec<(usize, f64)> = vec![pivots[0]];

    let flush = |cluster: &Vec<(usize, f64)>, zones: &mut Vec<Zone>| {
        if cluster.len() < min_samples {
            return;
        }
        let low = cluster.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
        let high = cluster.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
        let last_idx = cluster.iter().map(|p| p.0).max().unwrap_or(0);
        let zone = Zone {
            price_low: low,
            price_high: high,
            strength: cluster.len() as f64,
            last_touch: bars[last_idx].timestamp,
            invalidated: false,
        };
        // Merge with the previous zone when the bands overlap
        if let Some(prev) = zones.last_mut() {
            if zone.price_low <= prev.price_high {
                prev.price_high = prev.price_high.max(zone.price_high);
                prev.price_low = prev.price_low.min(zone.price_low);
                prev.strength += zone.strength;
                prev.last_touch = prev.last_touch.max(zone.last_touch);
                return;
            }
        }
        zones.push(zone);
    };

    for &pivot in &pivots[1..] {
        let gap = pivot.1 - cluster.last().unwrap().1;
        if gap <= eps {
            cluster.push(pivot);
        } else {
            flush(&cluster, &mut zones);
            cluster = vec![pivot];
        }
    }
    flush(&cluster, &mut zones);
    zones
}

/// Detect supply and demand zones over the lookback window.
pub fn detect_zones(bars: &[Bar], atr: f64, config: &ZoneConfig) -> (Vec<Zone>, Vec<Zone>) {
    let window = if bars.len() > config.lookback {
        &bars[bars.len() - config.lookback..]
    } else {
        bars
    };
    if window.len() < 10 || atr <= 0.0 {
        return (vec![], vec![]);
    }

    let prominence = config.pivot_prominence_atr_factor * atr;
    let eps = config.cluster_eps_atr_factor * atr;

    let supply_pivots = significant_pivots(window, ZoneKind::Supply, prominence);
    let demand_pivots = significant_pivots(window, ZoneKind::Demand, prominence);

    let supply = cluster_pivots(supply_pivots, window, eps, config.cluster_min_samples);
    let demand = cluster_pivots(demand_pivots, window, eps, config.cluster_min_samples);
    (supply, demand)
}

/// Refresh a slot's zone lists: re-detect, carry invalidation flags from
/// overlapping old zones, then apply the close-through invalidation rule.
pub fn update_zones(
    supply: &mut Vec<Zone>,
    demand: &mut Vec<Zone>,
    bars: &[Bar],
    atr: f64,
    config: &ZoneConfig,
) {
    let (mut new_supply, mut new_demand) = detect_zones(bars, atr, config);

    let carry = |fresh: &mut Vec<Zone>, old: &[Zone]| {
        for zone in fresh.iter_mut() {
            if old
                .iter()
                .any(|o| o.invalidated && o.price_low <= zone.price_high && zone.price_low <= o.price_high)
            {
                zone.invalidated = true;
            }
        }
    };
    carry(&mut new_supply, supply);
    carry(&mut new_demand, demand);

    if let Some(last) = bars.last() {
        let margin = config.invalidation_atr_factor * atr;
        for zone in new_supply.iter_mut() {
            // Price closing well beyond the far (upper) edge breaks supply
            if last.close > zone.price_high + margin {
                zone.invalidated = true;
            } else if zone.contains(last.close) {
                zone.last_touch = last.timestamp;
            }
        }
        for zone in new_demand.iter_mut() {
            if last.close < zone.price_low - margin {
                zone.invalidated = true;
            } else if zone.contains(last.close) {
                zone.last_touch = last.timestamp;
            }
        }
    }

    *supply = new_supply;
    *demand = new_demand;
}

/// Closest live supply zone at or above the price.
pub fn nearest_supply(zones: &[Zone], price: f64) -> Option<&Zone> {
    zones
        .iter()
        .filter(|z| !z.invalidated && z.price_high >= price)
        .min_by(|a, b| {
            let da = a.price_low - price;
            let db = b.price_low - price;
            da.abs().partial_cmp(&db.abs()).unwrap_or(std::cmp::Ordering::Equal)
        })
}

/// Closest live demand zone at or below the price.
pub fn nearest_demand(zones: &[Zone], price: f64) -> Option<&Zone> {
    zones
        .iter()
        .filter(|z| !z.invalidated && z.price_low <= price)
        .min_by(|a, b| {
            let da = price - a.price_high;
            let db = price - b.price_high;
            da.abs().partial_cmp(&db.abs()).unwrap_or(std::cmp::Ordering::Equal)
        })
}
