use dashmap::DashMap;

use flow_core::{Bar, EngineError, Timeframe};

use crate::ring::BarRing;

/// Per-(symbol, timeframe) bar storage. The orchestrator serializes writers
/// per slot; the map itself only guards concurrent access across slots.
pub struct BarStore {
    rings: DashMap<(String, Timeframe), BarRing>,
    ring_capacity: usize,
}

impl BarStore {
    pub fn new(ring_capacity: usize) -> Self {
        Self {
            rings: DashMap::new(),
            ring_capacity,
        }
    }

    /// Append a completed bar; creates the ring at first observation.
    pub fn push_bar(&self, symbol: &str, timeframe: Timeframe, bar: Bar) -> Result<(), EngineError> {
        let mut entry = self
            .rings
            .entry((symbol.to_string(), timeframe))
            .or_insert_with(|| BarRing::new(self.ring_capacity));
        entry.push(bar)
    }

    /// Frozen snapshot of a slot's bars, chronological order.
    pub fn snapshot(&self, symbol: &str, timeframe: Timeframe) -> Option<Vec<Bar>> {
        self.rings
            .get(&(symbol.to_string(), timeframe))
            .map(|r| r.to_vec())
    }

    /// Timestamp of the most recent bar in a slot.
    pub fn last_timestamp(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Option<chrono::DateTime<chrono::Utc>> {
        self.rings
            .get(&(symbol.to_string(), timeframe))
            .and_then(|r| r.latest().map(|b| b.timestamp))
    }

    pub fn len(&self, symbol: &str, timeframe: Timeframe) -> usize {
        self.rings
            .get(&(symbol.to_string(), timeframe))
            .map(|r| r.len())
            .unwrap_or(0)
    }

    /// Integrity sweep across all rings; a failure is fatal.
    pub fn check_integrity(&self) -> Result<(), EngineError> {
        for entry in self.rings.iter() {
            entry.value().check_integrity()?;
        }
        Ok(())
    }
}
