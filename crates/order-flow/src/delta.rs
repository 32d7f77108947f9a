use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use flow_core::Bar;
use quant_kernel::std_dev;

/// Signed trade delta of one bar: the close-open sign weighted by volume.
pub fn bar_delta(bar: &Bar) -> f64 {
    if bar.close > bar.open {
        bar.volume
    } else if bar.close < bar.open {
        -bar.volume
    } else {
        0.0
    }
}

/// Bounded history of signed bar deltas for one slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaHistory {
    deltas: VecDeque<f64>,
    capacity: usize,
}

impl DeltaHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            deltas: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, delta: f64) {
        if self.deltas.len() == self.capacity {
            self.deltas.pop_front();
        }
        self.deltas.push_back(delta);
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    /// Chronological copy of the history.
    pub fn to_vec(&self) -> Vec<f64> {
        self.deltas.iter().copied().collect()
    }

    /// Last `n` deltas, chronological.
    pub fn tail(&self, n: usize) -> Vec<f64> {
        self.deltas
            .iter()
            .skip(self.deltas.len().saturating_sub(n))
            .copied()
            .collect()
    }

    /// Baseline window of `n` deltas ending where the recent window of
    /// `recent` deltas begins. Falls back to whatever older history exists.
    pub fn baseline(&self, n: usize, recent: usize) -> Vec<f64> {
        let len = self.deltas.len();
        let end = len.saturating_sub(recent);
        let start = end.saturating_sub(n);
        self.deltas.iter().skip(start).take(end - start).copied().collect()
    }
}

/// Delta read over the recent window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DeltaAnalysis {
    /// Last bar's signed delta.
    pub last: f64,
    /// Sum of the recent window.
    pub cumulative: f64,
    /// Fraction of recent bars agreeing with the majority sign, in [0, 1].
    pub consistency: f64,
    /// |cumulative| normalized by the historical std of a window-sum,
    /// squashed to [0, 1].
    pub strength: f64,
    /// +1 / -1 / 0.
    pub direction: i32,
}

/// Analyze the delta history over a consistency window.
pub fn analyze_delta(history: &DeltaHistory, window: usize) -> DeltaAnalysis {
    let recent = history.tail(window);
    if recent.is_empty() {
        return DeltaAnalysis {
            last: 0.0,
            cumulative: 0.0,
            consistency: 0.0,
            strength: 0.0,
            direction: 0,
        };
    }

    let last = *recent.last().unwrap();
    let cumulative: f64 = recent.iter().sum();
    let positives = recent.iter().filter(|d| **d > 0.0).count();
    let negatives = recent.iter().filter(|d| **d < 0.0).count();
    let consistency = positives.max(negatives) as f64 / recent.len() as f64;

    let all = history.to_vec();
    let sd = std_dev(&all);
    let strength = if sd > 0.0 {
        let normalized = cumulative.abs() / (sd * (recent.len() as f64).sqrt());
        (normalized / 3.0).min(1.0)
    } else {
        0.0
    };

    let direction = if cumulative > 0.0 {
        1
    } else if cumulative < 0.0 {
        -1
    } else {
        0
    };

    DeltaAnalysis {
        last,
        cumulative,
        consistency,
        strength,
        direction,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_bar_delta_sign() {
        let up = Bar::new(Utc::now(), 1.0, 1.2, 0.9, 1.1, 500.0);
        let down = Bar::new(Utc::now(), 1.1, 1.2, 0.9, 1.0, 500.0);
        let flat = Bar::new(Utc::now(), 1.0, 1.2, 0.9, 1.0, 500.0);
        assert_eq!(bar_delta(&up), 500.0);
        assert_eq!(bar_delta(&down), -500.0);
        assert_eq!(bar_delta(&flat), 0.0);
    }

    #[test]
    fn test_history_bounded() {
        let mut h = DeltaHistory::new(5);
        for i in 0..10 {
            h.push(i as f64);
        }
        assert_eq!(h.len(), 5);
        assert_eq!(h.to_vec(), vec![5.0, 6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_baseline_excludes_recent() {
        let mut h = DeltaHistory::new(100);
        for i in 0..50 {
            h.push(i as f64);
        }
        let baseline = h.baseline(20, 10);
        assert_eq!(baseline.len(), 20);
        assert_eq!(*baseline.last().unwrap(), 39.0);
    }

    #[test]
    fn test_consistent_buying_reads_up() {
        let mut h = DeltaHistory::new(1000);
        // Noise history then a strong one-sided run
        for i in 0..100 {
            h.push(if i % 2 == 0 { 100.0 } else { -100.0 });
        }
        for _ in 0..10 {
            h.push(800.0);
        }
        let analysis = analyze_delta(&h, 10);
        assert_eq!(analysis.direction, 1);
        assert_eq!(analysis.consistency, 1.0);
        assert!(analysis.strength > 0.5);
    }

    #[test]
    fn test_empty_history_neutral() {
        let h = DeltaHistory::new(10);
        let analysis = analyze_delta(&h, 10);
        assert_eq!(analysis.direction, 0);
        assert_eq!(analysis.strength, 0.0);
    }
}
