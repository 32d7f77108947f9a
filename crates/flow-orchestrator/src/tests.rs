use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::Mutex as TokioMutex;

use flow_core::{
    AccountStatus, Bar, EngineConfig, EngineError, ExecutionAdapter, FillEvent, FillStatus,
    OpenPosition, TickSnapshot, TradeAction, TradeSignal, Timeframe,
};

use crate::{EngineEvent, EngineOrchestrator, PipelineOutcome};

struct MockExecution {
    submitted: TokioMutex<Vec<TradeSignal>>,
}

impl MockExecution {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            submitted: TokioMutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ExecutionAdapter for MockExecution {
    async fn submit(&self, signal: &TradeSignal) -> Result<(), EngineError> {
        self.submitted.lock().await.push(signal.clone());
        Ok(())
    }

    async fn modify(&self, _: u64, _: Option<f64>, _: Option<f64>) -> Result<(), EngineError> {
        Ok(())
    }

    async fn cancel(&self, _: u64) -> Result<(), EngineError> {
        Ok(())
    }

    async fn positions(&self) -> Result<Vec<OpenPosition>, EngineError> {
        Ok(vec![])
    }

    async fn account_status(&self) -> Result<AccountStatus, EngineError> {
        Ok(AccountStatus {
            balance: 100_000.0,
            equity: 100_000.0,
            margin_free: 100_000.0,
            currency: "USD".to_string(),
        })
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.timeframes = vec!["5min".to_string()];
    config
}

fn orchestrator() -> EngineOrchestrator {
    EngineOrchestrator::new(config(), MockExecution::new(), 100_000.0).unwrap()
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
}

fn bar_at(i: usize, close: f64, volume: f64) -> Bar {
    Bar::new(
        t0() + Duration::minutes(i as i64 * 5),
        close - 0.0002,
        close + 0.0004,
        close - 0.0006,
        close,
        volume,
    )
}

/// Deterministic oscillating event log.
fn bar_log(n: usize) -> Vec<Bar> {
    (0..n)
        .map(|i| {
            let phase = (i % 24) as f64 / 24.0 * std::f64::consts::PI * 2.0;
            let close = 1.0850 + 0.0040 * phase.sin();
            bar_at(i, close, 1000.0 + ((i * 13) % 7) as f64 * 100.0)
        })
        .collect()
}

fn outcome_fingerprint(outcomes: &[PipelineOutcome]) -> String {
    outcomes
        .iter()
        .map(|o| {
            let signal = o
                .signal
                .as_ref()
                .map(|s| {
                    format!(
                        "{}|{}|{:.6}|{:.6}|{:.6}|{:.4}|{:.2}",
                        s.id, s.action.label(), s.entry_price, s.stop_loss, s.take_profit,
                        s.volume, s.score
                    )
                })
                .unwrap_or_default();
            format!(
                "{}:{}:{}:{}",
                o.symbol,
                o.timeframe.label(),
                signal,
                o.suppression.as_deref().unwrap_or("")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[tokio::test]
async fn test_stale_bar_rejected() {
    init_tracing();
    let orch = orchestrator();
    orch.on_bar("EURUSD", Timeframe::M5, bar_at(10, 1.0850, 1000.0))
        .await
        .unwrap();
    let err = orch
        .on_bar("EURUSD", Timeframe::M5, bar_at(10, 1.0851, 1000.0))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
    let err = orch
        .on_bar("EURUSD", Timeframe::M5, bar_at(5, 1.0851, 1000.0))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
}

#[tokio::test]
async fn test_warmup_bars_are_suppressed_not_errors() {
    let orch = orchestrator();
    let outcome = orch
        .on_bar("EURUSD", Timeframe::M5, bar_at(0, 1.0850, 1000.0))
        .await
        .unwrap();
    assert!(outcome.signal.is_none());
    assert!(outcome.suppression.unwrap().contains("invalid"));
}

#[tokio::test]
async fn test_tick_aggregation_rolls_bars() {
    let orch = orchestrator();
    // Ticks 90 seconds apart: the 4th tick crosses the 5-minute boundary
    let mut outcomes = Vec::new();
    for i in 0..8 {
        let ts = t0() + Duration::seconds(i * 90);
        let tick = TickSnapshot {
            timestamp: ts,
            last: 1.0850 + i as f64 * 0.0001,
            bid: 1.0849,
            ask: 1.0851,
            last_volume: 10.0,
            depth: None,
        };
        outcomes.extend(orch.on_tick("EURUSD", tick).await.unwrap());
    }
    // Two boundaries crossed (at 300s and 600s): two completed bars
    assert_eq!(outcomes.len(), 2);
    assert_eq!(orch.store().len("EURUSD", Timeframe::M5), 2);
}

#[tokio::test]
async fn test_crossed_quote_is_dropped() {
    let orch = orchestrator();
    let tick = TickSnapshot {
        timestamp: t0(),
        last: 1.0850,
        bid: 1.0855,
        ask: 1.0845,
        last_volume: 10.0,
        depth: None,
    };
    let outcomes = orch.on_tick("EURUSD", tick).await.unwrap();
    assert!(outcomes.is_empty());
    assert_eq!(orch.store().len("EURUSD", Timeframe::M5), 0);
}

#[tokio::test]
async fn test_replay_determinism() {
    let log = bar_log(120);

    let mut fingerprints = Vec::new();
    for _ in 0..2 {
        let orch = orchestrator();
        let mut outcomes = Vec::new();
        for bar in &log {
            let outcome = orch
                .on_bar("EURUSD", Timeframe::M5, bar.clone())
                .await
                .unwrap();
            outcomes.push(outcome);
        }
        fingerprints.push(outcome_fingerprint(&outcomes));
    }
    assert_eq!(fingerprints[0], fingerprints[1]);
}

#[tokio::test]
async fn test_dispatch_routes_events() {
    let orch = orchestrator();
    let outcomes = orch
        .dispatch(EngineEvent::Bar {
            symbol: "EURUSD".to_string(),
            timeframe: Timeframe::M5,
            bar: bar_at(0, 1.0850, 1000.0),
        })
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 1);

    let outcomes = orch
        .dispatch(EngineEvent::MarketStateChange {
            symbol: "EURUSD".to_string(),
            note: "news spike".to_string(),
        })
        .await
        .unwrap();
    assert!(outcomes.is_empty());
}

#[tokio::test]
async fn test_fill_updates_risk_state() {
    let orch = orchestrator();
    orch.on_fill(FillEvent {
        ticket: 7,
        symbol: "EURUSD".to_string(),
        side: TradeAction::Buy,
        volume: 0.1,
        price: 1.0850,
        pnl: Some(-250.0),
        status: FillStatus::Filled,
        timestamp: Some(t0()),
    })
    .await;

    let state = orch.risk_snapshot().await;
    assert_eq!(state.current_balance, 99_750.0);
    assert_eq!(state.consecutive_losses, 1);
    assert_eq!(state.trade_count(), 1);
    assert!(state.cooldown_active("EURUSD", t0()));
}

#[tokio::test]
async fn test_rejected_fill_clears_position() {
    let orch = orchestrator();
    orch.on_fill(FillEvent {
        ticket: 7,
        symbol: "EURUSD".to_string(),
        side: TradeAction::Buy,
        volume: 0.1,
        price: 1.0850,
        pnl: None,
        status: FillStatus::Rejected,
        timestamp: Some(t0()),
    })
    .await;
    let state = orch.risk_snapshot().await;
    assert!(state.open_positions.is_empty());
    assert_eq!(state.current_balance, 100_000.0);
}

#[tokio::test]
async fn test_correlation_recompute_installs_matrix() {
    let orch = orchestrator();
    let log_a = bar_log(60);
    for bar in &log_a {
        orch.on_bar("EURUSD", Timeframe::M5, bar.clone()).await.unwrap();
    }
    for (i, bar) in log_a.iter().enumerate() {
        let mut b = bar.clone();
        // A loosely related series
        b.close += (i % 5) as f64 * 0.0001;
        b.high = b.high.max(b.close);
        b.low = b.low.min(b.close);
        orch.on_bar("GBPUSD", Timeframe::M5, b).await.unwrap();
    }

    orch.recompute_correlations(t0() + Duration::days(1));
    // Both symbols have enough return history to be tracked
    let correlations = orch.correlations_snapshot();
    assert_eq!(correlations.symbols().len(), 2);
    assert_eq!(correlations.correlation("EURUSD", "EURUSD"), Some(1.0));
}

#[tokio::test]
async fn test_parallel_symbols_do_not_interfere() {
    let orch = Arc::new(orchestrator());
    let log = bar_log(80);

    let mut handles = Vec::new();
    for symbol in ["EURUSD", "GBPUSD", "USDJPY"] {
        let orch = orch.clone();
        let log = log.clone();
        handles.push(tokio::spawn(async move {
            for bar in log {
                orch.on_bar(symbol, Timeframe::M5, bar).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    for symbol in ["EURUSD", "GBPUSD", "USDJPY"] {
        assert_eq!(orch.store().len(symbol, Timeframe::M5), 80);
    }
}
