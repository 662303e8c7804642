//! Transaction cost model.
//!
//! Three independent, non-negative components charged on every fill, entry
//! and exit alike. All rates are in percent units (`0.03` = 0.03 %).
//!
//! - commission: `notional * commission_pct / 100`
//! - slippage: the fill is moved against the trader by `slippage_pct`; the
//!   difference `notional * slippage_pct / 100` is booked as a cost and the
//!   trade's gross P&L stays on market prices
//! - impact: `max(notional - impact_threshold, 0) * impact_pct / 100`

use serde::{Deserialize, Serialize};
use std::ops::Add;

use crate::domain::error::BacktestError;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CostModel {
    pub commission_pct: f64,
    pub slippage_pct: f64,
    pub impact_pct: f64,
    pub impact_threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub commission: f64,
    pub slippage: f64,
    pub impact: f64,
}

impl CostBreakdown {
    pub fn total(&self) -> f64 {
        self.commission + self.slippage + self.impact
    }
}

impl Add for CostBreakdown {
    type Output = CostBreakdown;

    fn add(self, rhs: CostBreakdown) -> CostBreakdown {
        CostBreakdown {
            commission: self.commission + rhs.commission,
            slippage: self.slippage + rhs.slippage,
            impact: self.impact + rhs.impact,
        }
    }
}

/// Whether a fill buys or sells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl CostModel {
    pub fn validate(&self) -> Result<(), BacktestError> {
        let fields = [
            ("commission_pct", self.commission_pct),
            ("slippage_pct", self.slippage_pct),
            ("impact_pct", self.impact_pct),
            ("impact_threshold", self.impact_threshold),
        ];
        for (key, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(BacktestError::ConfigInvalid {
                    section: "backtest".into(),
                    key: key.into(),
                    reason: format!("must be a non-negative number, got {}", value),
                });
            }
        }
        Ok(())
    }

    pub fn commission(&self, notional: f64) -> f64 {
        notional.abs() * self.commission_pct / 100.0
    }

    pub fn slippage(&self, notional: f64) -> f64 {
        notional.abs() * self.slippage_pct / 100.0
    }

    pub fn impact(&self, notional: f64) -> f64 {
        (notional.abs() - self.impact_threshold).max(0.0) * self.impact_pct / 100.0
    }

    /// Costs of one fill of the given market notional.
    pub fn costs(&self, notional: f64) -> CostBreakdown {
        CostBreakdown {
            commission: self.commission(notional),
            slippage: self.slippage(notional),
            impact: self.impact(notional),
        }
    }

    /// Price actually paid or received after slippage.
    pub fn fill_price(&self, market_price: f64, side: Side) -> f64 {
        match side {
            Side::Buy => market_price * (1.0 + self.slippage_pct / 100.0),
            Side::Sell => market_price * (1.0 - self.slippage_pct / 100.0),
        }
    }

    /// Largest notional whose entry (notional plus costs) fits in `cash`.
    pub fn affordable_notional(&self, cash: f64) -> f64 {
        if cash <= 0.0 {
            return 0.0;
        }
        let rate = (self.commission_pct + self.slippage_pct) / 100.0;
        let impact_rate = self.impact_pct / 100.0;
        let threshold = self.impact_threshold;

        if impact_rate == 0.0 || cash <= threshold * (1.0 + rate) {
            cash / (1.0 + rate)
        } else {
            (cash + threshold * impact_rate) / (1.0 + rate + impact_rate)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn model() -> CostModel {
        CostModel {
            commission_pct: 0.03,
            slippage_pct: 0.02,
            impact_pct: 0.0,
            impact_threshold: 0.0,
        }
    }

    #[test]
    fn commission_and_slippage_are_percent_of_notional() {
        let c = model().costs(100_000.0);
        assert_relative_eq!(c.commission, 30.0, epsilon = 1e-9);
        assert_relative_eq!(c.slippage, 20.0, epsilon = 1e-9);
        assert_relative_eq!(c.impact, 0.0);
        assert_relative_eq!(c.total(), 50.0, epsilon = 1e-9);
    }

    #[test]
    fn impact_applies_above_threshold_only() {
        let m = CostModel {
            impact_pct: 0.1,
            impact_threshold: 50_000.0,
            ..model()
        };
        assert_relative_eq!(m.impact(40_000.0), 0.0);
        assert_relative_eq!(m.impact(150_000.0), 100.0, epsilon = 1e-9);
    }

    #[test]
    fn fill_price_moves_against_trader() {
        let m = model();
        assert!(m.fill_price(100.0, Side::Buy) > 100.0);
        assert!(m.fill_price(100.0, Side::Sell) < 100.0);
        assert_relative_eq!(m.fill_price(100.0, Side::Buy), 100.02, epsilon = 1e-12);
    }

    #[test]
    fn breakdowns_add_componentwise() {
        let a = model().costs(1_000.0);
        let sum = a + a;
        assert_relative_eq!(sum.commission, 0.6, epsilon = 1e-12);
        assert_relative_eq!(sum.total(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn affordable_notional_fits_cash_exactly() {
        let m = CostModel {
            impact_pct: 0.5,
            impact_threshold: 10_000.0,
            ..model()
        };
        for cash in [5_000.0, 10_004.0, 25_000.0, 1_000_000.0] {
            let n = m.affordable_notional(cash);
            assert_relative_eq!(n + m.costs(n).total(), cash, epsilon = 1e-6);
        }
        assert_eq!(m.affordable_notional(-1.0), 0.0);
    }

    #[test]
    fn validate_rejects_negative_rates() {
        assert!(model().validate().is_ok());
        let bad = CostModel {
            slippage_pct: -0.1,
            ..model()
        };
        assert!(matches!(
            bad.validate(),
            Err(BacktestError::ConfigInvalid { .. })
        ));
    }
}
