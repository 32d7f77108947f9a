//! Event orchestration: routes ticks and bars into the per-slot analyzers,
//! fuses their outputs, and walks accepted signals through risk evaluation
//! and on to the execution adapter.
//!
//! Concurrency model: symbols evaluate in parallel, but each
//! (symbol, timeframe) slot is guarded by its own async mutex so events for
//! one slot serialize. The slot lock is released before any await on the
//! execution adapter. Analysis time is always the event timestamp; no wall
//! clock enters a logic path.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use bar_store::{BarStore, TickAggregator};
use flow_core::{
    Bar, EngineConfig, EngineError, ExecutionAdapter, FillEvent, FillStatus, Predictor,
    TickSnapshot, TradeAction, TradeSignal, Timeframe,
};
use market_structure::{MarketStructureAnalyzer, StructureState};
use order_flow::{FlowState, OrderFlowAnalyzer};
use quant_kernel::{baseline_variance, fit_garch, percent_log_returns};
use risk_engine::{
    CorrelationMatrix, RiskEvaluator, RiskState, RiskVerdict, SharedCorrelations,
    VolatilityContext,
};
use signal_composer::{Decision, SignalComposer};

/// Inbound engine event.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Tick {
        symbol: String,
        tick: TickSnapshot,
    },
    Bar {
        symbol: String,
        timeframe: Timeframe,
        bar: Bar,
    },
    /// External regime notification; flushes volatility caches for a symbol.
    MarketStateChange {
        symbol: String,
        note: String,
    },
}

/// Result of one slot evaluation: either an accepted and submitted signal,
/// or the reason the pipeline stopped.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub signal: Option<TradeSignal>,
    pub suppression: Option<String>,
}

struct Slot {
    structure: StructureState,
    flow: FlowState,
    aggregator: TickAggregator,
    last_tick: Option<TickSnapshot>,
    last_bar_ts: Option<DateTime<Utc>>,
}

impl Slot {
    fn new(symbol: &str, timeframe: Timeframe, config: &EngineConfig) -> Self {
        Self {
            structure: StructureState::default(),
            flow: FlowState::new(&config.store, &config.flow),
            aggregator: TickAggregator::new(symbol, timeframe),
            last_tick: None,
            last_bar_ts: None,
        }
    }
}

pub struct EngineOrchestrator {
    config: EngineConfig,
    timeframes: Vec<Timeframe>,
    store: BarStore,
    structure_analyzer: MarketStructureAnalyzer,
    flow_analyzer: OrderFlowAnalyzer,
    composer: SignalComposer,
    risk: RiskEvaluator,
    risk_state: Mutex<RiskState>,
    correlations: SharedCorrelations,
    slots: DashMap<(String, Timeframe), Arc<Mutex<Slot>>>,
    execution: Arc<dyn ExecutionAdapter>,
}

impl EngineOrchestrator {
    pub fn new(
        config: EngineConfig,
        execution: Arc<dyn ExecutionAdapter>,
        initial_balance: f64,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let timeframes = config.parsed_timeframes()?;
        Ok(Self {
            store: BarStore::new(config.store.ring_capacity),
            structure_analyzer: MarketStructureAnalyzer::new(config.structure.clone()),
            flow_analyzer: OrderFlowAnalyzer::new(config.flow.clone(), config.garch.clone()),
            composer: SignalComposer::new(config.composer.clone()),
            risk: RiskEvaluator::new(config.risk.clone())?,
            risk_state: Mutex::new(RiskState::new(
                initial_balance,
                config.risk.trade_history_len,
            )),
            correlations: SharedCorrelations::new(Arc::new(CorrelationMatrix::empty(
                DateTime::<Utc>::MIN_UTC,
            ))),
            slots: DashMap::new(),
            timeframes,
            execution,
            config,
        })
    }

    /// Attach a predictor for `ComposerMode::Predictor`.
    pub fn with_predictor(mut self, predictor: Arc<dyn Predictor>) -> Self {
        self.composer = SignalComposer::new(self.config.composer.clone()).with_predictor(predictor);
        self
    }

    fn slot(&self, symbol: &str, timeframe: Timeframe) -> Arc<Mutex<Slot>> {
        self.slots
            .entry((symbol.to_string(), timeframe))
            .or_insert_with(|| {
                Arc::new(Mutex::new(Slot::new(symbol, timeframe, &self.config)))
            })
            .clone()
    }

    /// Route one event.
    pub async fn dispatch(&self, event: EngineEvent) -> Result<Vec<PipelineOutcome>, EngineError> {
        match event {
            EngineEvent::Tick { symbol, tick } => self.on_tick(&symbol, tick).await,
            EngineEvent::Bar {
                symbol,
                timeframe,
                bar,
            } => self
                .on_bar(&symbol, timeframe, bar)
                .await
                .map(|o| vec![o]),
            EngineEvent::MarketStateChange { symbol, note } => {
                self.on_market_state_change(&symbol, &note).await;
                Ok(vec![])
            }
        }
    }

    /// Tick callback: updates every timeframe aggregator for the symbol;
    /// a tick that rolls a bar triggers the full pipeline for that slot.
    pub async fn on_tick(
        &self,
        symbol: &str,
        tick: TickSnapshot,
    ) -> Result<Vec<PipelineOutcome>, EngineError> {
        if tick.bid > tick.ask {
            warn!(symbol, bid = tick.bid, ask = tick.ask, "crossed quote dropped");
            return Ok(vec![]);
        }
        let mut outcomes = Vec::new();
        for &timeframe in &self.timeframes {
            let slot = self.slot(symbol, timeframe);
            let completed = {
                let mut guard = slot.lock().await;
                guard.last_tick = Some(tick.clone());
                guard.aggregator.on_tick(&tick)?
            };
            if let Some(bar) = completed {
                debug!(symbol, tf = timeframe.label(), at = %bar.timestamp, "tick rolled bar");
                outcomes.push(self.on_bar(symbol, timeframe, bar).await?);
            }
        }
        Ok(outcomes)
    }

    /// Completed-bar callback: append to the ring and re-run the analyzers
    /// against the frozen snapshot.
    pub async fn on_bar(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bar: Bar,
    ) -> Result<PipelineOutcome, EngineError> {
        let slot = self.slot(symbol, timeframe);
        let analysis_time = bar.timestamp;

        // Everything under the slot lock is synchronous except the GARCH
        // offload, which installs atomically before analysis resumes.
        let decision = {
            let mut guard = slot.lock().await;
            if let Some(last) = guard.last_bar_ts {
                if bar.timestamp <= last {
                    return Err(EngineError::InvalidInput(format!(
                        "stale bar for {symbol}/{}: {} <= {last}",
                        timeframe.label(),
                        bar.timestamp
                    )));
                }
            }
            self.store.push_bar(symbol, timeframe, bar)?;
            guard.last_bar_ts = Some(analysis_time);

            let bars = self
                .store
                .snapshot(symbol, timeframe)
                .ok_or_else(|| EngineError::Corruption("ring vanished after push".to_string()))?;

            self.refresh_garch_offloaded(&mut guard, &bars, timeframe, analysis_time)
                .await;

            let structure = self
                .structure_analyzer
                .analyze(&mut guard.structure, &bars);
            let tick = guard.last_tick.clone();
            let flow = self.flow_analyzer.analyze(
                &mut guard.flow,
                &bars,
                tick.as_ref(),
                timeframe,
                analysis_time,
            );

            let price = tick
                .as_ref()
                .filter(|t| t.timestamp >= analysis_time)
                .map(|t| t.last)
                .unwrap_or_else(|| bars.last().map(|b| b.close).unwrap_or(0.0));

            let decision = self.composer.compose(
                symbol,
                timeframe,
                analysis_time,
                price,
                &structure,
                &flow,
            );
            (decision, volatility_context(&flow, &bars, timeframe))
        };
        let (decision, vol_context) = decision;

        // Risk evaluation and submission happen outside the slot lock.
        match decision {
            Decision::Suppressed(reason) => {
                debug!(symbol, tf = timeframe.label(), reason = %reason, "suppressed");
                Ok(PipelineOutcome {
                    symbol: symbol.to_string(),
                    timeframe,
                    signal: None,
                    suppression: Some(reason),
                })
            }
            Decision::Signal(signal) => {
                self.evaluate_and_submit(signal, vol_context, analysis_time, timeframe)
                    .await
            }
        }
    }

    async fn evaluate_and_submit(
        &self,
        signal: TradeSignal,
        vol_context: VolatilityContext,
        now: DateTime<Utc>,
        timeframe: Timeframe,
    ) -> Result<PipelineOutcome, EngineError> {
        let account = self.execution.account_status().await?;
        let correlations = self.correlations.read().expect("correlations lock").clone();

        let verdict: RiskVerdict = {
            let mut risk_state = self.risk_state.lock().await;
            let verdict = self.risk.evaluate(
                &signal,
                &account,
                &mut risk_state,
                &correlations,
                &vol_context,
                now,
            );
            if let Some(adjusted) = &verdict.adjusted_signal {
                // Ticket assigned on fill; the id keys idempotency until then
                self.risk
                    .register_open(&mut risk_state, adjusted, adjusted.id.as_u128() as u64, now);
            }
            verdict
        };

        if !verdict.accepted {
            return Ok(PipelineOutcome {
                symbol: signal.symbol,
                timeframe,
                signal: None,
                suppression: Some(verdict.reason),
            });
        }

        let adjusted = verdict.adjusted_signal.expect("accepted verdict has signal");
        if let Err(e) = self.execution.submit(&adjusted).await {
            // No core-level retry; the failure comes back via on_fill
            error!(id = %adjusted.id, error = %e, "submit failed");
            return Ok(PipelineOutcome {
                symbol: adjusted.symbol.clone(),
                timeframe,
                signal: None,
                suppression: Some(format!("execution error: {e}")),
            });
        }
        info!(id = %adjusted.id, symbol = %adjusted.symbol, "signal submitted");
        Ok(PipelineOutcome {
            symbol: adjusted.symbol.clone(),
            timeframe,
            signal: Some(adjusted),
            suppression: None,
        })
    }

    /// Fill feedback: closed-trade accounting and inventory updates.
    pub async fn on_fill(&self, fill: FillEvent) {
        if fill.status == FillStatus::Rejected {
            warn!(ticket = fill.ticket, symbol = %fill.symbol, "order rejected by execution");
            let mut risk_state = self.risk_state.lock().await;
            risk_state.open_positions.remove(&fill.symbol);
            return;
        }

        let at = fill.timestamp.unwrap_or_else(Utc::now);
        if let Some(pnl) = fill.pnl {
            let mut risk_state = self.risk_state.lock().await;
            risk_state.record_trade_outcome(&fill.symbol, pnl, at, &self.config.risk);
            let equity = risk_state.current_balance;
            risk_state.observe_equity(equity);
        }

        // Inventory: signed fill volume per symbol across its slots
        let signed = match fill.side {
            TradeAction::Buy => fill.volume,
            TradeAction::Sell => -fill.volume,
        };
        for &timeframe in &self.timeframes {
            let slot = self
                .slots
                .get(&(fill.symbol.clone(), timeframe))
                .map(|r| r.clone());
            if let Some(slot) = slot {
                let mut guard = slot.lock().await;
                guard.flow.inventory.on_fill(signed, at);
            }
        }
    }

    /// Regime notification: flush per-slot volatility caches for the symbol.
    pub async fn on_market_state_change(&self, symbol: &str, note: &str) {
        info!(symbol, note, "market state change");
        for &timeframe in &self.timeframes {
            let slot = self
                .slots
                .get(&(symbol.to_string(), timeframe))
                .map(|r| r.clone());
            if let Some(slot) = slot {
                let mut guard = slot.lock().await;
                guard.flow.garch.invalidate();
            }
        }
    }

    /// Recompute the correlation matrix from the stored return series and
    /// install it atomically. The process supervisor calls this on a timer.
    pub fn recompute_correlations(&self, now: DateTime<Utc>) {
        let timeframe = match self.timeframes.last() {
            Some(tf) => *tf,
            None => return,
        };
        let mut returns: HashMap<String, Vec<f64>> = HashMap::new();
        for entry in self.slots.iter() {
            let (symbol, tf) = entry.key();
            if *tf != timeframe {
                continue;
            }
            if let Some(bars) = self.store.snapshot(symbol, timeframe) {
                let series: Vec<f64> = bars.iter().filter_map(|b| b.log_return).collect();
                if !series.is_empty() {
                    returns.insert(symbol.clone(), series);
                }
            }
        }
        let fresh = Arc::new(CorrelationMatrix::compute(&returns, now));
        *self.correlations.write().expect("correlations lock") = fresh;
        debug!("correlation matrix reinstalled");
    }

    /// Snapshot accessor for dashboards and tests.
    pub async fn risk_snapshot(&self) -> RiskState {
        self.risk_state.lock().await.clone()
    }

    pub fn store(&self) -> &BarStore {
        &self.store
    }

    /// Current correlation matrix snapshot.
    pub fn correlations_snapshot(&self) -> Arc<CorrelationMatrix> {
        self.correlations.read().expect("correlations lock").clone()
    }

    /// GARCH refit on the worker pool with a deadline of a tenth of the
    /// retrain interval. Overruns and failures mark the cache invalid until
    /// the next retrain window; the slot itself is never left half-updated.
    async fn refresh_garch_offloaded(
        &self,
        slot: &mut Slot,
        bars: &[Bar],
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) {
        if !slot
            .flow
            .garch
            .needs_refit(now, self.config.garch.retrain_interval)
        {
            return;
        }
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let returns = percent_log_returns(&closes);
        if returns.len() < self.config.garch.min_data {
            // Cheap refusal; no need to burn a worker
            slot.flow.garch.invalidate();
            return;
        }
        let garch_config = self.config.garch.clone();
        let deadline =
            std::time::Duration::from_secs((self.config.garch.retrain_interval as u64 / 10).max(1));

        let fit = tokio::time::timeout(
            deadline,
            tokio::task::spawn_blocking(move || fit_garch(&returns, &garch_config)),
        )
        .await;

        match fit {
            Ok(Ok(Ok(fit))) => match fit.annualized_volatility(timeframe.bars_per_year()) {
                Some(vol) => slot.flow.garch.install(&fit, vol, now),
                None => slot.flow.garch.mark_failed(now),
            },
            Ok(Ok(Err(e))) => {
                debug!(error = %e, "GARCH fit failed");
                slot.flow.garch.mark_failed(now);
            }
            Ok(Err(join_err)) => {
                error!(error = %join_err, "GARCH worker panicked");
                slot.flow.garch.mark_failed(now);
            }
            Err(_) => {
                warn!(deadline = ?deadline, "GARCH fit deadline exceeded");
                slot.flow.garch.mark_failed(now);
            }
        }
    }
}

/// Build the risk-side volatility context from the flow analysis and bars.
fn volatility_context(
    flow: &order_flow::FlowAnalysis,
    bars: &[Bar],
    timeframe: Timeframe,
) -> VolatilityContext {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let garch_baseline = baseline_variance(&percent_log_returns(&closes))
        .map(|v| (v * timeframe.bars_per_year()).sqrt());

    let atrs: Vec<f64> = bars.iter().filter_map(|b| b.atr).collect();
    let atr = bars.last().and_then(|b| b.atr);
    let atr_baseline = if atrs.is_empty() {
        None
    } else {
        Some(quant_kernel::mean(&atrs))
    };

    let daily_vol = match (atr, bars.last()) {
        (Some(a), Some(last)) if last.close > 0.0 => {
            let per_bar = a / last.close;
            let bars_per_day = (1440.0 / timeframe.to_minutes() as f64).max(1.0);
            Some(per_bar * bars_per_day.sqrt())
        }
        _ => None,
    };

    VolatilityContext {
        garch_forecast: flow.garch_volatility_forecast,
        garch_baseline,
        atr,
        atr_baseline,
        daily_vol,
    }
}

#[cfg(test)]
mod tests;
