use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::EngineError;

/// OHLCV bar data with derived fields filled in by the bar store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Wilder-smoothed average true range at this bar (set on push).
    #[serde(default)]
    pub atr: Option<f64>,
    /// ln(close / prev_close) (set on push, None for the first bar).
    #[serde(default)]
    pub log_return: Option<f64>,
}

impl Bar {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            atr: None,
            log_return: None,
        }
    }

    /// Check the OHLC sanity invariants: high covers open/close, low is covered,
    /// volume non-negative, all fields finite.
    pub fn check_invariants(&self) -> Result<(), EngineError> {
        let fields = [self.open, self.high, self.low, self.close, self.volume];
        if fields.iter().any(|v| !v.is_finite()) {
            return Err(EngineError::InvalidInput(format!(
                "non-finite field in bar at {}",
                self.timestamp
            )));
        }
        if self.high < self.open.max(self.close) {
            return Err(EngineError::InvalidInput(format!(
                "bar at {}: high {} below body",
                self.timestamp, self.high
            )));
        }
        if self.low > self.open.min(self.close) {
            return Err(EngineError::InvalidInput(format!(
                "bar at {}: low {} above body",
                self.timestamp, self.low
            )));
        }
        if self.volume < 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "bar at {}: negative volume",
                self.timestamp
            )));
        }
        Ok(())
    }

    /// Bar range (high - low).
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Position of the close within the bar range, 0.0 (low) to 1.0 (high).
    /// Returns 0.5 for zero-range bars.
    pub fn close_position(&self) -> f64 {
        let range = self.range();
        if range <= 0.0 {
            return 0.5;
        }
        (self.close - self.low) / range
    }

    pub fn is_up(&self) -> bool {
        self.close > self.open
    }

    pub fn is_down(&self) -> bool {
        self.close < self.open
    }
}

/// One price level of a depth-of-market snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: f64,
    pub size: f64,
}

/// Depth-of-market snapshot, best levels first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DepthSnapshot {
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
}

impl DepthSnapshot {
    pub fn bid_size(&self) -> f64 {
        self.bids.iter().map(|l| l.size).sum()
    }

    pub fn ask_size(&self) -> f64 {
        self.asks.iter().map(|l| l.size).sum()
    }
}

/// Live tick snapshot from the quote feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickSnapshot {
    pub timestamp: DateTime<Utc>,
    pub last: f64,
    pub bid: f64,
    pub ask: f64,
    pub last_volume: f64,
    #[serde(default)]
    pub depth: Option<DepthSnapshot>,
}

impl TickSnapshot {
    /// Relative spread (ask - bid) / mid. Zero when the mid is degenerate.
    pub fn relative_spread(&self) -> f64 {
        let mid = (self.bid + self.ask) / 2.0;
        if mid <= 0.0 {
            return 0.0;
        }
        (self.ask - self.bid) / mid
    }
}

/// Timeframe for analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    Daily,
}

impl Timeframe {
    pub fn to_minutes(&self) -> i64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::Daily => 1440,
        }
    }

    /// Duration of one bar at this timeframe.
    pub fn step(&self) -> Duration {
        Duration::minutes(self.to_minutes())
    }

    /// Bars per trading year, used to annualize GARCH variance forecasts.
    /// 252 trading days; intraday timeframes assume a 24h session.
    pub fn bars_per_year(&self) -> f64 {
        match self {
            Timeframe::Daily => 252.0,
            tf => 252.0 * 1440.0 / tf.to_minutes() as f64,
        }
    }

    /// Parse the configuration-file spelling ("1min", "4h", "daily", ...).
    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s {
            "1min" => Ok(Timeframe::M1),
            "5min" => Ok(Timeframe::M5),
            "15min" => Ok(Timeframe::M15),
            "30min" => Ok(Timeframe::M30),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "daily" => Ok(Timeframe::Daily),
            other => Err(EngineError::Config(format!("unknown timeframe: {other}"))),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1min",
            Timeframe::M5 => "5min",
            Timeframe::M15 => "15min",
            Timeframe::M30 => "30min",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::Daily => "daily",
        }
    }
}

/// Directional read of market structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendDirection {
    Uptrend,
    Downtrend,
    Sideways,
}

impl TrendDirection {
    pub fn sign(&self) -> i32 {
        match self {
            TrendDirection::Uptrend => 1,
            TrendDirection::Downtrend => -1,
            TrendDirection::Sideways => 0,
        }
    }
}

/// Directional read of order flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowDirection {
    Up,
    Down,
    Neutral,
}

impl FlowDirection {
    pub fn sign(&self) -> i32 {
        match self {
            FlowDirection::Up => 1,
            FlowDirection::Down => -1,
            FlowDirection::Neutral => 0,
        }
    }
}

/// Trade side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl TradeAction {
    pub fn label(&self) -> &'static str {
        match self {
            TradeAction::Buy => "buy",
            TradeAction::Sell => "sell",
        }
    }
}

/// Emitted trade signal with attached risk parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSignal {
    pub id: Uuid,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
    pub action: TradeAction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Combined score in [0, 10].
    pub score: f64,
    /// Sizing modifier in [0.5, 1.2].
    pub confidence_modifier: f64,
    /// Volume filled in by the risk evaluator; zero until sized.
    #[serde(default)]
    pub volume: f64,
    /// Audit bag: per-engine directions/scores, Wyckoff phase, nearest S/D,
    /// VSA signal, sl_reason, tp_reason.
    pub metadata: serde_json::Value,
}

impl TradeSignal {
    /// BUY needs SL < entry < TP, SELL the mirror image.
    pub fn check_invariants(&self) -> Result<(), EngineError> {
        let ok = match self.action {
            TradeAction::Buy => self.stop_loss < self.entry_price && self.entry_price < self.take_profit,
            TradeAction::Sell => self.stop_loss > self.entry_price && self.entry_price > self.take_profit,
        };
        if !ok {
            return Err(EngineError::InvalidInput(format!(
                "signal {}: inconsistent SL/entry/TP ({} / {} / {})",
                self.id, self.stop_loss, self.entry_price, self.take_profit
            )));
        }
        Ok(())
    }
}

/// Account snapshot from the execution side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountStatus {
    pub balance: f64,
    pub equity: f64,
    pub margin_free: f64,
    pub currency: String,
}

/// An open position tracked by the risk evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPosition {
    pub ticket: u64,
    pub symbol: String,
    pub side: TradeAction,
    pub volume: f64,
    pub entry_price: f64,
    /// Dollar risk budget committed at entry (entry-to-SL distance x volume).
    pub risk_amount: f64,
}

/// Fill status reported by the execution adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillStatus {
    Filled,
    Partial,
    Rejected,
}

/// Execution report fed back into the core. The timestamp is optional in
/// the wire contract; replay feeds supply it so accounting stays
/// deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillEvent {
    pub ticket: u64,
    pub symbol: String,
    pub side: TradeAction,
    pub volume: f64,
    pub price: f64,
    #[serde(default)]
    pub pnl: Option<f64>,
    pub status: FillStatus,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bar_invariants_accept_valid() {
        let bar = Bar::new(Utc::now(), 1.0, 1.2, 0.9, 1.1, 100.0);
        assert!(bar.check_invariants().is_ok());
    }

    #[test]
    fn test_bar_invariants_reject_bad_high() {
        let bar = Bar::new(Utc::now(), 1.0, 0.95, 0.9, 1.1, 100.0);
        assert!(bar.check_invariants().is_err());
    }

    #[test]
    fn test_bar_invariants_reject_nan() {
        let bar = Bar::new(Utc::now(), f64::NAN, 1.2, 0.9, 1.1, 100.0);
        assert!(bar.check_invariants().is_err());
    }

    #[test]
    fn test_close_position_in_range() {
        let bar = Bar::new(Utc::now(), 1.0, 2.0, 1.0, 1.5, 10.0);
        assert!((bar.close_position() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_timeframe_parse_round_trip() {
        for s in ["1min", "5min", "15min", "30min", "1h", "4h", "daily"] {
            let tf = Timeframe::parse(s).unwrap();
            assert_eq!(tf.label(), s);
        }
        assert!(Timeframe::parse("2min").is_err());
    }

    #[test]
    fn test_bars_per_year_daily() {
        assert_eq!(Timeframe::Daily.bars_per_year(), 252.0);
        // 1h bars: 252 days x 24 bars
        assert_eq!(Timeframe::H1.bars_per_year(), 252.0 * 24.0);
    }

    #[test]
    fn test_signal_invariants() {
        let mut sig = TradeSignal {
            id: Uuid::new_v4(),
            symbol: "EURUSD".into(),
            timeframe: Timeframe::H1,
            timestamp: Utc::now(),
            action: TradeAction::Buy,
            entry_price: 1.0850,
            stop_loss: 1.0798,
            take_profit: 1.0898,
            score: 8.0,
            confidence_modifier: 1.0,
            volume: 0.0,
            metadata: serde_json::Value::Null,
        };
        assert!(sig.check_invariants().is_ok());
        sig.stop_loss = 1.0900;
        assert!(sig.check_invariants().is_err());
    }
}
