use std::collections::VecDeque;

use flow_core::{Bar, EngineError};
use quant_kernel::ATR_EPSILON;

/// ATR smoothing window used for the derived field on pushed bars.
const ATR_PERIOD: usize = 14;

/// Append-only bounded ring of bars for one (symbol, timeframe) slot.
/// Push validates the OHLC invariants and strict timestamp monotonicity,
/// fills the derived ATR/log-return fields, and evicts the oldest bar on
/// overflow. O(1) push and evict.
#[derive(Debug, Clone)]
pub struct BarRing {
    bars: VecDeque<Bar>,
    capacity: usize,
    /// Wilder ATR running state: seed accumulator until the window fills.
    tr_seed: Vec<f64>,
    current_atr: Option<f64>,
    prev_close: Option<f64>,
}

impl BarRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            bars: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            tr_seed: Vec::with_capacity(ATR_PERIOD),
            current_atr: None,
            prev_close: None,
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&Bar> {
        self.bars.back()
    }

    /// Read-only snapshot in chronological order.
    pub fn to_vec(&self) -> Vec<Bar> {
        self.bars.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bar> {
        self.bars.iter()
    }

    /// Validate and append one bar, filling derived fields.
    /// Rejects non-monotonic timestamps with `InvalidInput`.
    pub fn push(&mut self, mut bar: Bar) -> Result<(), EngineError> {
        bar.check_invariants()?;
        if let Some(last) = self.bars.back() {
            if bar.timestamp <= last.timestamp {
                return Err(EngineError::InvalidInput(format!(
                    "non-monotonic bar timestamp {} (last {})",
                    bar.timestamp, last.timestamp
                )));
            }
        }

        // Derived log-return
        bar.log_return = match self.prev_close {
            Some(pc) if pc > 0.0 && bar.close > 0.0 => Some((bar.close / pc).ln()),
            _ => None,
        };

        // Derived ATR: Wilder recursion once the seed window fills
        let tr = match self.prev_close {
            Some(pc) => (bar.high - bar.low)
                .max((bar.high - pc).abs())
                .max((bar.low - pc).abs()),
            None => bar.high - bar.low,
        };
        let atr = match self.current_atr {
            Some(prev) => {
                let next = (prev * (ATR_PERIOD as f64 - 1.0) + tr) / ATR_PERIOD as f64;
                self.current_atr = Some(next.max(ATR_EPSILON));
                self.current_atr
            }
            None => {
                self.tr_seed.push(tr);
                if self.tr_seed.len() >= ATR_PERIOD {
                    let seed =
                        self.tr_seed.iter().sum::<f64>() / self.tr_seed.len() as f64;
                    self.current_atr = Some(seed.max(ATR_EPSILON));
                }
                self.current_atr
            }
        };
        bar.atr = atr;

        self.prev_close = Some(bar.close);
        if self.bars.len() == self.capacity {
            self.bars.pop_front();
        }
        self.bars.push_back(bar);
        Ok(())
    }

    /// Verify the stored sequence still honors the ring invariants. A breach
    /// here means memory corruption and is fatal to the process.
    pub fn check_integrity(&self) -> Result<(), EngineError> {
        let mut prev: Option<&Bar> = None;
        for bar in &self.bars {
            bar.check_invariants()
                .map_err(|e| EngineError::Corruption(format!("ring invariant broken: {e}")))?;
            if let Some(p) = prev {
                if bar.timestamp <= p.timestamp {
                    return Err(EngineError::Corruption(format!(
                        "ring ordering broken at {}",
                        bar.timestamp
                    )));
                }
            }
            prev = Some(bar);
        }
        Ok(())
    }
}
