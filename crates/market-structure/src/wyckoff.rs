use serde::{Deserialize, Serialize};
use serde_json::json;

use flow_core::{Bar, WyckoffConfig};

use crate::zones::Zone;

/// Wyckoff market phase. Spring and Upthrust are the transitional test
/// states between ranges and trends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WyckoffPhase {
    Undefined,
    Accumulation,
    Spring,
    Markup,
    Distribution,
    Upthrust,
    Markdown,
}

impl WyckoffPhase {
    /// Directional bias: +1 bullish phases, -1 bearish, 0 undefined.
    pub fn bias(&self) -> i32 {
        match self {
            WyckoffPhase::Accumulation | WyckoffPhase::Spring | WyckoffPhase::Markup => 1,
            WyckoffPhase::Distribution | WyckoffPhase::Upthrust | WyckoffPhase::Markdown => -1,
            WyckoffPhase::Undefined => 0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            WyckoffPhase::Undefined => "undefined",
            WyckoffPhase::Accumulation => "accumulation",
            WyckoffPhase::Spring => "spring",
            WyckoffPhase::Markup => "markup",
            WyckoffPhase::Distribution => "distribution",
            WyckoffPhase::Upthrust => "upthrust",
            WyckoffPhase::Markdown => "markdown",
        }
    }
}

/// Events driving phase transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WyckoffEvent {
    SellingClimax,
    BuyingClimax,
    Spring,
    Upthrust,
    SignOfStrength,
    SignOfWeakness,
}

/// Per-slot Wyckoff state machine. The candidate phase accumulates event
/// confidence; the public phase is emitted only once the score clears the
/// configured threshold. Score decays each bar so stale evidence fades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WyckoffState {
    candidate: WyckoffPhase,
    pub score: f64,
    pub last_event: Option<WyckoffEvent>,
    pub detail: serde_json::Value,
}

impl Default for WyckoffState {
    fn default() -> Self {
        Self {
            candidate: WyckoffPhase::Undefined,
            score: 0.0,
            last_event: None,
            detail: serde_json::Value::Null,
        }
    }
}

const SCORE_DECAY: f64 = 0.9;
const SCORE_CAP: f64 = 10.0;
/// Climax events demand this multiple of the plain spike threshold.
const CLIMAX_FACTOR: f64 = 1.5;

impl WyckoffState {
    /// Phase visible to downstream consumers; gated on the score threshold.
    pub fn phase(&self, threshold: f64) -> WyckoffPhase {
        if self.score >= threshold {
            self.candidate
        } else {
            WyckoffPhase::Undefined
        }
    }

    /// Ungated candidate phase the machine is building evidence for.
    pub fn candidate(&self) -> WyckoffPhase {
        self.candidate
    }

    /// Confidence in [0, 1].
    pub fn confidence(&self) -> f64 {
        (self.score / SCORE_CAP).clamp(0.0, 1.0)
    }

    /// Advance the machine on a completed bar.
    pub fn step(
        &mut self,
        bars: &[Bar],
        demand: &[Zone],
        supply: &[Zone],
        config: &WyckoffConfig,
    ) {
        self.score *= SCORE_DECAY;

        let lookback = config.event_lookback;
        if bars.len() < lookback + 2 {
            return;
        }
        let last = &bars[bars.len() - 1];
        let window = &bars[bars.len() - 1 - lookback..bars.len() - 1];

        let avg_volume = window.iter().map(|b| b.volume).sum::<f64>() / window.len() as f64;
        let volume_spike = avg_volume > 0.0 && last.volume >= config.vol_spike_factor * avg_volume;
        let climax_volume =
            avg_volume > 0.0 && last.volume >= CLIMAX_FACTOR * config.vol_spike_factor * avg_volume;

        let range_high = window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
        let range_low = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);

        let live_demand = demand.iter().find(|z| !z.invalidated && last.low <= z.price_high);
        let live_supply = supply.iter().find(|z| !z.invalidated && last.high >= z.price_low);

        let mut events: Vec<(WyckoffEvent, f64)> = Vec::new();

        // Climaxes: exhaustion volume at a directional extreme.
        if climax_volume && last.close <= range_low && last.is_down() {
            events.push((WyckoffEvent::SellingClimax, 2.5));
        }
        if climax_volume && last.close >= range_high && last.is_up() {
            events.push((WyckoffEvent::BuyingClimax, 2.5));
        }

        // Spring: a poke below a demand zone (or the range low) that closes
        // back above it, with conviction volume. Zone-anchored pokes score
        // higher than bare range tests.
        if let Some(zone) = live_demand {
            if last.low < zone.price_low && last.close > zone.price_low && volume_spike {
                events.push((WyckoffEvent::Spring, 3.0));
            }
        }
        if !events.iter().any(|(e, _)| *e == WyckoffEvent::Spring)
            && last.low < range_low
            && last.close > range_low
            && volume_spike
        {
            events.push((WyckoffEvent::Spring, 2.0));
        }

        // Upthrust: a poke above supply (or the range high) rejected back below.
        if let Some(zone) = live_supply {
            if last.high > zone.price_high && last.close < zone.price_high && volume_spike {
                events.push((WyckoffEvent::Upthrust, 3.0));
            }
        }
        if !events.iter().any(|(e, _)| *e == WyckoffEvent::Upthrust)
            && last.high > range_high
            && last.close < range_high
            && volume_spike
        {
            events.push((WyckoffEvent::Upthrust, 2.0));
        }

        // Signs of strength/weakness: decisive closes beyond the range.
        if last.close > range_high && last.is_up() {
            events.push((WyckoffEvent::SignOfStrength, if volume_spike { 2.5 } else { 1.5 }));
        }
        if last.close < range_low && last.is_down() {
            events.push((WyckoffEvent::SignOfWeakness, if volume_spike { 2.5 } else { 1.5 }));
        }

        for (event, confidence) in events {
            self.apply(event, confidence);
        }

        self.detail = json!({
            "candidate": self.candidate.label(),
            "score": self.score,
            "avg_volume": avg_volume,
            "volume_spike": volume_spike,
            "range_high": range_high,
            "range_low": range_low,
        });
    }

    fn apply(&mut self, event: WyckoffEvent, confidence: f64) {
        use WyckoffEvent::*;
        use WyckoffPhase::*;

        let next = match (self.candidate, event) {
            // Base building after a climax
            (Undefined | Markdown, SellingClimax) => Accumulation,
            (Undefined | Markup, BuyingClimax) => Distribution,

            // Range tests
            (Accumulation | Undefined, WyckoffEvent::Spring) => WyckoffPhase::Spring,
            (Distribution | Undefined, WyckoffEvent::Upthrust) => WyckoffPhase::Upthrust,

            // Breakouts confirm the trend phases
            (WyckoffPhase::Spring | Accumulation, SignOfStrength) => Markup,
            (WyckoffPhase::Upthrust | Distribution, SignOfWeakness) => Markdown,
            (Markup, SignOfStrength) => Markup,
            (Markdown, SignOfWeakness) => Markdown,

            // A failed test against the opposite side flips the bias
            (Markup, WyckoffEvent::Upthrust) => Distribution,
            (Markdown, WyckoffEvent::Spring) => Accumulation,

            _ => self.candidate,
        };

        if next != self.candidate {
            // Re-anchoring on a new phase keeps half the old evidence
            self.score = (self.score * 0.5 + confidence).min(SCORE_CAP);
            self.candidate = next;
        } else {
            self.score = (self.score + confidence).min(SCORE_CAP);
        }
        self.last_event = Some(event);
    }
}
