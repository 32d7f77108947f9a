use chrono::{Duration, TimeZone, Utc};

use flow_core::{Bar, StructureConfig, TrendDirection};

use crate::analyzer::{MarketStructureAnalyzer, StructureState};

/// Bars with derived ATR filled the way the bar store does it.
fn with_atr(mut bars: Vec<Bar>) -> Vec<Bar> {
    let atrs = quant_kernel::atr(&bars, 14);
    for (bar, a) in bars.iter_mut().zip(atrs) {
        bar.atr = Some(a);
    }
    bars
}

fn bar_at(i: usize, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Bar {
    Bar::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(i as i64 * 5),
        open,
        high,
        low,
        close,
        volume,
    )
}

fn trending_bars(n: usize, step: f64) -> Vec<Bar> {
    with_atr(
        (0..n)
            .map(|i| {
                let c = 100.0 + i as f64 * step;
                bar_at(i, c - step * 0.8, c + 0.3, c - 0.3, c, 1000.0)
            })
            .collect(),
    )
}

fn ranging_bars(n: usize) -> Vec<Bar> {
    with_atr(
        (0..n)
            .map(|i| {
                let phase = (i % 24) as f64 / 24.0 * std::f64::consts::PI * 2.0;
                let c = 105.0 + 4.0 * phase.sin();
                bar_at(i, c, c + 0.4, c - 0.4, c, 1000.0)
            })
            .collect(),
    )
}

#[test]
fn test_uptrend_detected() {
    let analyzer = MarketStructureAnalyzer::new(StructureConfig::default());
    let mut state = StructureState::default();
    let result = analyzer.analyze(&mut state, &trending_bars(200, 0.4));

    assert!(result.valid);
    assert_eq!(result.direction, TrendDirection::Uptrend);
    assert!(result.structure_score >= 0.0 && result.structure_score <= 10.0);
    assert!(result.atr > 0.0);
}

#[test]
fn test_downtrend_detected() {
    let analyzer = MarketStructureAnalyzer::new(StructureConfig::default());
    let mut state = StructureState::default();
    let result = analyzer.analyze(&mut state, &trending_bars(200, -0.4));

    assert!(result.valid);
    assert_eq!(result.direction, TrendDirection::Downtrend);
}

#[test]
fn test_range_produces_zones_and_cycle() {
    let analyzer = MarketStructureAnalyzer::new(StructureConfig::default());
    let mut state = StructureState::default();
    let result = analyzer.analyze(&mut state, &ranging_bars(300));

    assert!(result.valid);
    assert!(!state.supply.is_empty());
    assert!(!state.demand.is_empty());
    // A clean 24-bar oscillation should surface as the dominant cycle
    let period = result.dominant_cycle_period.expect("dominant cycle");
    assert!((period - 24.0).abs() < 4.0, "period = {period}");
}

#[test]
fn test_insufficient_bars_invalid() {
    let analyzer = MarketStructureAnalyzer::new(StructureConfig::default());
    let mut state = StructureState::default();
    let result = analyzer.analyze(&mut state, &trending_bars(20, 0.4));

    assert!(!result.valid);
    assert!(result.reason.unwrap().contains("bars"));
    assert_eq!(result.structure_score, 0.0);
}

#[test]
fn test_missing_atr_invalid() {
    let analyzer = MarketStructureAnalyzer::new(StructureConfig::default());
    let mut state = StructureState::default();
    // Raw bars without the derived ATR field
    let bars: Vec<Bar> = (0..100)
        .map(|i| bar_at(i, 100.0, 100.5, 99.5, 100.0, 1000.0))
        .collect();
    let result = analyzer.analyze(&mut state, &bars);

    assert!(!result.valid);
    assert!(result.reason.unwrap().contains("ATR"));
}

#[test]
fn test_score_bounds_across_inputs() {
    let analyzer = MarketStructureAnalyzer::new(StructureConfig::default());
    for bars in [
        trending_bars(200, 0.8),
        trending_bars(200, -0.8),
        ranging_bars(200),
        trending_bars(60, 0.01),
    ] {
        let mut state = StructureState::default();
        let result = analyzer.analyze(&mut state, &bars);
        if result.valid {
            assert!(result.structure_score >= 0.0 && result.structure_score <= 10.0);
            assert!(result.wyckoff_confidence >= 0.0 && result.wyckoff_confidence <= 1.0);
        }
    }
}

#[test]
fn test_state_persists_across_bars() {
    let analyzer = MarketStructureAnalyzer::new(StructureConfig::default());
    let mut state = StructureState::default();
    let bars = ranging_bars(300);

    // Replay bar-by-bar over the tail; zone lists should persist in state
    for end in 250..300 {
        let _ = analyzer.analyze(&mut state, &bars[..end]);
    }
    assert!(!state.supply.is_empty());
    assert!(!state.demand.is_empty());
}
