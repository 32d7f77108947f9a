use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use flow_core::{OpenPosition, RiskConfig};

/// One closed trade kept in the rolling performance ring.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub pnl: f64,
    pub closed_at: DateTime<Utc>,
}

/// Single-writer risk state. The orchestrator serializes all mutation
/// through the risk evaluator; readers get snapshots.
#[derive(Debug, Clone)]
pub struct RiskState {
    pub current_balance: f64,
    pub peak_equity: f64,
    /// Balance at the UTC-midnight rollover, the base for daily caps.
    pub daily_start_balance: f64,
    pub daily_pnl: f64,
    pub daily_trades: u32,
    pub consecutive_losses: u32,
    current_day: Option<NaiveDate>,
    pub open_positions: HashMap<String, OpenPosition>,
    trade_history: VecDeque<TradeOutcome>,
    history_cap: usize,
    /// Per-symbol cooldown expiry.
    cooldowns: HashMap<String, DateTime<Utc>>,
}

impl RiskState {
    pub fn new(initial_balance: f64, history_cap: usize) -> Self {
        Self {
            current_balance: initial_balance,
            peak_equity: initial_balance,
            daily_start_balance: initial_balance,
            daily_pnl: 0.0,
            daily_trades: 0,
            consecutive_losses: 0,
            current_day: None,
            open_positions: HashMap::new(),
            trade_history: VecDeque::with_capacity(history_cap),
            history_cap: history_cap.max(1),
            cooldowns: HashMap::new(),
        }
    }

    /// Reset daily counters when the UTC day changes.
    pub fn roll_day(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if self.current_day != Some(today) {
            self.current_day = Some(today);
            self.daily_pnl = 0.0;
            self.daily_trades = 0;
            self.daily_start_balance = self.current_balance;
        }
    }

    /// Track the equity peak. Never decreases.
    pub fn observe_equity(&mut self, equity: f64) {
        if equity.is_finite() && equity > self.peak_equity {
            self.peak_equity = equity;
        }
    }

    /// Rolling drawdown fraction against the observed peak.
    pub fn rolling_drawdown(&self, equity: f64) -> f64 {
        if self.peak_equity <= 0.0 {
            return 0.0;
        }
        ((self.peak_equity - equity) / self.peak_equity).max(0.0)
    }

    /// Record a closed trade: balance, daily P&L, loss streak, the rolling
    /// performance ring, and the symbol's cooldown (extended after a loss).
    pub fn record_trade_outcome(
        &mut self,
        symbol: &str,
        pnl: f64,
        now: DateTime<Utc>,
        config: &RiskConfig,
    ) {
        if !pnl.is_finite() {
            return;
        }
        self.roll_day(now);
        self.current_balance += pnl;
        self.daily_pnl += pnl;
        if pnl < 0.0 {
            self.consecutive_losses += 1;
        } else if pnl > 0.0 {
            self.consecutive_losses = 0;
        }

        if self.trade_history.len() == self.history_cap {
            self.trade_history.pop_front();
        }
        self.trade_history.push_back(TradeOutcome {
            pnl,
            closed_at: now,
        });

        let minutes = if pnl < 0.0 {
            (config.trade_cooldown_minutes as f64 * config.loss_cooldown_multiplier) as i64
        } else {
            config.trade_cooldown_minutes
        };
        if minutes > 0 {
            self.cooldowns
                .insert(symbol.to_string(), now + Duration::minutes(minutes));
        }
        self.open_positions.remove(symbol);
    }

    /// Register a newly opened position and count it against the day.
    pub fn record_open(&mut self, position: OpenPosition, now: DateTime<Utc>) {
        self.roll_day(now);
        self.daily_trades += 1;
        self.open_positions.insert(position.symbol.clone(), position);
    }

    pub fn cooldown_active(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        self.cooldowns
            .get(symbol)
            .map(|until| now < *until)
            .unwrap_or(false)
    }

    pub fn cooldown_until(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.cooldowns.get(symbol).copied()
    }

    pub fn trade_count(&self) -> usize {
        self.trade_history.len()
    }

    /// Rolling win rate over the performance ring; 0.5 when empty.
    pub fn win_rate(&self) -> f64 {
        if self.trade_history.is_empty() {
            return 0.5;
        }
        let wins = self.trade_history.iter().filter(|t| t.pnl > 0.0).count();
        wins as f64 / self.trade_history.len() as f64
    }

    /// Mean winning PnL over the ring.
    pub fn avg_win(&self) -> Option<f64> {
        let wins: Vec<f64> = self
            .trade_history
            .iter()
            .filter(|t| t.pnl > 0.0)
            .map(|t| t.pnl)
            .collect();
        if wins.is_empty() {
            None
        } else {
            Some(wins.iter().sum::<f64>() / wins.len() as f64)
        }
    }

    /// Mean absolute losing PnL over the ring.
    pub fn avg_loss(&self) -> Option<f64> {
        let losses: Vec<f64> = self
            .trade_history
            .iter()
            .filter(|t| t.pnl < 0.0)
            .map(|t| t.pnl.abs())
            .collect();
        if losses.is_empty() {
            None
        } else {
            Some(losses.iter().sum::<f64>() / losses.len() as f64)
        }
    }

    /// Rolling win/loss ratio: mean win over mean |loss|.
    pub fn win_loss_ratio(&self) -> Option<f64> {
        match (self.avg_win(), self.avg_loss()) {
            (Some(w), Some(l)) if l > 0.0 => Some(w / l),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use flow_core::TradeAction;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_peak_equity_non_decreasing() {
        let mut state = RiskState::new(100_000.0, 100);
        state.observe_equity(101_000.0);
        assert_eq!(state.peak_equity, 101_000.0);
        state.observe_equity(99_000.0);
        assert_eq!(state.peak_equity, 101_000.0);
        state.observe_equity(f64::NAN);
        assert_eq!(state.peak_equity, 101_000.0);
    }

    #[test]
    fn test_daily_reset_at_utc_midnight() {
        let config = RiskConfig::default();
        let mut state = RiskState::new(100_000.0, 100);
        state.record_trade_outcome("EURUSD", -500.0, at(1, 10), &config);
        assert_eq!(state.daily_pnl, -500.0);

        state.roll_day(at(2, 0));
        assert_eq!(state.daily_pnl, 0.0);
        assert_eq!(state.daily_trades, 0);
        assert_eq!(state.daily_start_balance, 99_500.0);
    }

    #[test]
    fn test_consecutive_losses_and_reset() {
        let config = RiskConfig::default();
        let mut state = RiskState::new(100_000.0, 100);
        state.record_trade_outcome("EURUSD", -100.0, at(1, 1), &config);
        state.record_trade_outcome("EURUSD", -100.0, at(1, 2), &config);
        assert_eq!(state.consecutive_losses, 2);
        state.record_trade_outcome("EURUSD", 300.0, at(1, 3), &config);
        assert_eq!(state.consecutive_losses, 0);
    }

    #[test]
    fn test_loss_extends_cooldown() {
        let config = RiskConfig::default();
        let mut state = RiskState::new(100_000.0, 100);
        state.record_trade_outcome("EURUSD", 100.0, at(1, 1), &config);
        let win_until = state.cooldown_until("EURUSD").unwrap();
        state.record_trade_outcome("GBPUSD", -100.0, at(1, 1), &config);
        let loss_until = state.cooldown_until("GBPUSD").unwrap();
        assert!(loss_until > win_until);
        assert!(state.cooldown_active("EURUSD", at(1, 1)));
    }

    #[test]
    fn test_rolling_performance_ring() {
        let config = RiskConfig::default();
        let mut state = RiskState::new(100_000.0, 4);
        for (i, pnl) in [100.0, 200.0, -50.0, -150.0, 300.0].iter().enumerate() {
            state.record_trade_outcome("EURUSD", *pnl, at(1, i as u32 + 1), &config);
        }
        // Ring keeps the last 4: 200, -50, -150, 300
        assert_eq!(state.trade_count(), 4);
        assert_eq!(state.win_rate(), 0.5);
        assert_eq!(state.avg_win().unwrap(), 250.0);
        assert_eq!(state.avg_loss().unwrap(), 100.0);
        assert_eq!(state.win_loss_ratio().unwrap(), 2.5);
    }

    #[test]
    fn test_open_position_counts_against_day() {
        let mut state = RiskState::new(100_000.0, 100);
        state.record_open(
            OpenPosition {
                ticket: 1,
                symbol: "EURUSD".to_string(),
                side: TradeAction::Buy,
                volume: 0.1,
                entry_price: 1.0850,
                risk_amount: 100.0,
            },
            at(1, 1),
        );
        assert_eq!(state.daily_trades, 1);
        assert!(state.open_positions.contains_key("EURUSD"));
    }
}
