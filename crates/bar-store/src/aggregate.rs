use chrono::{DateTime, TimeZone, Utc};
use tracing::warn;

use flow_core::{Bar, EngineError, TickSnapshot, Timeframe};

/// Floor a timestamp to the start of its timeframe-aligned bar.
pub fn bar_boundary(ts: DateTime<Utc>, timeframe: Timeframe) -> DateTime<Utc> {
    let step = timeframe.to_minutes() * 60;
    let secs = ts.timestamp();
    let floored = secs - secs.rem_euclid(step);
    Utc.timestamp_opt(floored, 0).unwrap()
}

/// Rolls ticks into timeframe-aligned bars for one (symbol, timeframe) slot.
/// A tick at or past the next boundary completes the current bar and starts
/// a new one. Crossed quotes and stale ticks are dropped with a warning.
#[derive(Debug, Clone)]
pub struct TickAggregator {
    symbol: String,
    timeframe: Timeframe,
    current: Option<PartialBar>,
    last_tick_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct PartialBar {
    start: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl PartialBar {
    fn into_bar(self) -> Bar {
        Bar::new(self.start, self.open, self.high, self.low, self.close, self.volume)
    }
}

impl TickAggregator {
    pub fn new(symbol: &str, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe,
            current: None,
            last_tick_at: None,
        }
    }

    /// Feed one tick. Returns the completed bar when the tick rolls the
    /// current one. Invalid ticks (crossed quotes, non-monotonic timestamps,
    /// non-finite prices) are dropped.
    pub fn on_tick(&mut self, tick: &TickSnapshot) -> Result<Option<Bar>, EngineError> {
        if !tick.last.is_finite() || !tick.bid.is_finite() || !tick.ask.is_finite() {
            return Err(EngineError::InvalidInput(format!(
                "{}: non-finite tick at {}",
                self.symbol, tick.timestamp
            )));
        }
        if tick.bid > tick.ask {
            warn!(
                symbol = %self.symbol,
                bid = tick.bid,
                ask = tick.ask,
                "crossed quote dropped"
            );
            return Ok(None);
        }
        if let Some(last) = self.last_tick_at {
            if tick.timestamp < last {
                warn!(
                    symbol = %self.symbol,
                    at = %tick.timestamp,
                    "out-of-order tick dropped"
                );
                return Ok(None);
            }
        }
        self.last_tick_at = Some(tick.timestamp);

        let boundary = bar_boundary(tick.timestamp, self.timeframe);
        let mut completed = None;

        match &mut self.current {
            Some(partial) if boundary > partial.start => {
                completed = self.current.take().map(PartialBar::into_bar);
            }
            _ => {}
        }

        match &mut self.current {
            Some(partial) => {
                partial.high = partial.high.max(tick.last);
                partial.low = partial.low.min(tick.last);
                partial.close = tick.last;
                partial.volume += tick.last_volume.max(0.0);
            }
            None => {
                self.current = Some(PartialBar {
                    start: boundary,
                    open: tick.last,
                    high: tick.last,
                    low: tick.last,
                    close: tick.last,
                    volume: tick.last_volume.max(0.0),
                });
            }
        }

        Ok(completed)
    }

    /// Current in-progress bar, if any (for within-bar analysis).
    pub fn working_bar(&self) -> Option<Bar> {
        self.current.clone().map(PartialBar::into_bar)
    }
}
