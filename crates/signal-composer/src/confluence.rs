use flow_core::{FlowDirection, TrendDirection};
use market_structure::{StructureAnalysis, WyckoffPhase};
use order_flow::FlowAnalysis;

/// A structured fact feeding the confluence graph: a signed observation with
/// a magnitude in [0, 1].
#[derive(Debug, Clone)]
pub struct Fact {
    pub name: &'static str,
    /// +1 bullish, -1 bearish.
    pub sign: i32,
    pub magnitude: f64,
}

/// Weighted digraph over facts. Edges run from each fact to every later
/// same-signed fact; an edge's weight is the geometric mean of the two fact
/// magnitudes, so chains of mutually confirming evidence accumulate.
#[derive(Debug)]
pub struct ConfluenceGraph {
    facts: Vec<Fact>,
}

/// Strongest sign-consistent path through the graph.
#[derive(Debug, Clone, Copy)]
pub struct StrongestPath {
    pub sign: i32,
    /// Path weight, already squashed to [0, 10].
    pub magnitude: f64,
    pub length: usize,
}

impl ConfluenceGraph {
    /// Extract facts from the two analyses.
    pub fn from_analyses(structure: &StructureAnalysis, flow: &FlowAnalysis) -> Self {
        let mut facts = Vec::new();

        let trend_sign = structure.direction.sign();
        if trend_sign != 0 {
            facts.push(Fact {
                name: "trend",
                sign: trend_sign,
                magnitude: structure.structure_score / 10.0,
            });
        }
        let phase_bias = structure.wyckoff_phase.bias();
        if structure.wyckoff_phase != WyckoffPhase::Undefined && phase_bias != 0 {
            facts.push(Fact {
                name: "wyckoff",
                sign: phase_bias,
                magnitude: structure.wyckoff_confidence,
            });
        }
        if structure.price_in_demand_zone {
            facts.push(Fact {
                name: "demand_zone",
                sign: 1,
                magnitude: 0.7,
            });
        }
        if structure.price_in_supply_zone {
            facts.push(Fact {
                name: "supply_zone",
                sign: -1,
                magnitude: 0.7,
            });
        }

        let flow_sign = match flow.direction {
            FlowDirection::Up => 1,
            FlowDirection::Down => -1,
            FlowDirection::Neutral => 0,
        };
        if flow_sign != 0 {
            facts.push(Fact {
                name: "flow",
                sign: flow_sign,
                magnitude: flow.flow_score / 10.0,
            });
        }
        if flow.delta.direction != 0 {
            facts.push(Fact {
                name: "delta",
                sign: flow.delta.direction,
                magnitude: flow.delta.strength,
            });
        }
        if let Some(vsa) = &flow.vsa {
            facts.push(Fact {
                name: "vsa",
                sign: vsa.signal.bias(),
                magnitude: vsa.confidence,
            });
        }
        if let Some(direction) = flow.absorption {
            facts.push(Fact {
                name: "absorption",
                sign: direction,
                magnitude: 0.6,
            });
        }

        Self { facts }
    }

    pub fn facts(&self) -> &[Fact] {
        &self.facts
    }

    /// Longest-path DP over the implicit DAG (facts in insertion order,
    /// edges only between same-signed facts). Returns None when no fact
    /// carries a usable sign.
    pub fn strongest_path(&self) -> Option<StrongestPath> {
        let n = self.facts.len();
        if n == 0 {
            return None;
        }

        // best[i] = (accumulated weight ending at i, path length)
        let mut best: Vec<(f64, usize)> = self
            .facts
            .iter()
            .map(|f| (f.magnitude, 1))
            .collect();

        for i in 0..n {
            for j in 0..i {
                if self.facts[j].sign == self.facts[i].sign {
                    let edge = (self.facts[j].magnitude * self.facts[i].magnitude).sqrt();
                    let candidate = best[j].0 + edge;
                    if candidate > best[i].0 {
                        best[i] = (candidate, best[j].1 + 1);
                    }
                }
            }
        }

        let (idx, &(weight, length)) = best
            .iter()
            .enumerate()
            .max_by(|a, b| a.1 .0.partial_cmp(&b.1 .0).unwrap_or(std::cmp::Ordering::Equal))?;

        let sign = self.facts[idx].sign;
        if sign == 0 {
            return None;
        }
        // Squash: each confirming hop is worth up to ~2.5 points
        let magnitude = (weight * 2.5).clamp(0.0, 10.0);
        Some(StrongestPath {
            sign,
            magnitude,
            length,
        })
    }
}

/// Convenience: direction implied by the strongest path.
pub fn path_direction(path: &StrongestPath) -> TrendDirection {
    if path.sign > 0 {
        TrendDirection::Uptrend
    } else if path.sign < 0 {
        TrendDirection::Downtrend
    } else {
        TrendDirection::Sideways
    }
}
