//! Signal generation.
//!
//! [`SignalGenerator`] walks the bars in order and, at bar t, evaluates each
//! strategy rule on a [`HistoryView`] ending at t. A rule emits a signal on
//! the rising edge of its truth value and only once every indicator it
//! references is past warm-up.
//!
//! At most one signal is emitted per bar. Rules are computed in the order
//! enter-long, enter-short, exit; when more than one fires on the same bar the
//! first one wins and the rest are recorded as [`SignalDiagnostic`]s.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::indicator::IndicatorType;
use crate::domain::ohlcv::Bar;
use crate::domain::rule::Rule;
use crate::domain::rule_eval::{evaluate, strength, HistoryView, IndicatorTable};
use crate::domain::strategy::StrategyConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    EnterLong,
    EnterShort,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub timestamp: NaiveDateTime,
    pub bar_index: usize,
    pub kind: SignalKind,
    pub strength: Option<f64>,
}

/// A signal dropped because another direction fired first on the same bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDiagnostic {
    pub timestamp: NaiveDateTime,
    pub bar_index: usize,
    pub kept: SignalKind,
    pub discarded: SignalKind,
}

struct RuleSlot<'a> {
    kind: SignalKind,
    rule: &'a Rule,
    indicators: Vec<IndicatorType>,
    was_true: bool,
}

pub struct SignalGenerator<'a> {
    bars: &'a [Bar],
    indicators: &'a IndicatorTable,
    slots: Vec<RuleSlot<'a>>,
    next_bar: usize,
    diagnostics: Vec<SignalDiagnostic>,
}

impl<'a> SignalGenerator<'a> {
    pub fn new(strategy: &'a StrategyConfig, bars: &'a [Bar], indicators: &'a IndicatorTable) -> Self {
        let kinds = [
            (SignalKind::EnterLong, &strategy.entry_long),
            (SignalKind::EnterShort, &strategy.entry_short),
            (SignalKind::Exit, &strategy.exit),
        ];
        let slots = kinds
            .into_iter()
            .filter_map(|(kind, rule)| {
                rule.as_ref().map(|rule| RuleSlot {
                    kind,
                    rule,
                    indicators: rule.indicators(),
                    was_true: false,
                })
            })
            .collect();

        Self {
            bars,
            indicators,
            slots,
            next_bar: 0,
            diagnostics: Vec::new(),
        }
    }

    pub fn diagnostics(&self) -> &[SignalDiagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<SignalDiagnostic> {
        self.diagnostics
    }

    fn evaluate_bar(&mut self, t: usize) -> Option<Signal> {
        let view = HistoryView::prefix(self.bars, self.indicators, t)?;
        let timestamp = view.bar(t)?.timestamp;
        let mut chosen: Option<Signal> = None;

        for slot in &mut self.slots {
            if !view.ready(&slot.indicators) {
                slot.was_true = false;
                continue;
            }
            let now = evaluate(slot.rule, &view);
            let rising = now && !slot.was_true;
            slot.was_true = now;
            if !rising {
                continue;
            }

            match &chosen {
                None => {
                    chosen = Some(Signal {
                        timestamp,
                        bar_index: t,
                        kind: slot.kind,
                        strength: strength(slot.rule, &view),
                    });
                }
                Some(kept) => {
                    warn!(
                        bar = t,
                        %timestamp,
                        kept = ?kept.kind,
                        discarded = ?slot.kind,
                        "conflicting signals on one bar, keeping the first"
                    );
                    self.diagnostics.push(SignalDiagnostic {
                        timestamp,
                        bar_index: t,
                        kept: kept.kind,
                        discarded: slot.kind,
                    });
                }
            }
        }
        chosen
    }
}

impl Iterator for SignalGenerator<'_> {
    type Item = Signal;

    fn next(&mut self) -> Option<Signal> {
        while self.next_bar < self.bars.len() {
            let t = self.next_bar;
            self.next_bar += 1;
            if let Some(signal) = self.evaluate_bar(t) {
                return Some(signal);
            }
        }
        None
    }
}

/// Run the generator to completion.
pub fn generate_signals(
    strategy: &StrategyConfig,
    bars: &[Bar],
    indicators: &IndicatorTable,
) -> (Vec<Signal>, Vec<SignalDiagnostic>) {
    let mut generator = SignalGenerator::new(strategy, bars, indicators);
    let signals: Vec<Signal> = generator.by_ref().collect();
    (signals, generator.into_diagnostics())
}
