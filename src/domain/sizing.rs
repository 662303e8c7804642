//! Position sizing.
//!
//! Every method produces a target notional which is then clipped to what the
//! available cash can pay for, costs included. Clipping is reported back so
//! the simulator can count it; it never fails the run.

use crate::domain::costs::CostModel;
use crate::domain::strategy::SizingMethod;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingInput {
    pub equity: f64,
    pub cash: f64,
    pub price: f64,
    /// ATR known at signal time, if the method needs it.
    pub atr: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeDecision {
    pub units: f64,
    pub notional: f64,
    pub clamped: bool,
}

/// Why no position could be sized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizingSkip {
    NoVolatility,
    NoCapital,
}

pub fn target_notional(method: &SizingMethod, input: &SizingInput) -> Result<f64, SizingSkip> {
    match *method {
        SizingMethod::FixedNotional(v) => Ok(v),
        SizingMethod::FixedFraction(f) => Ok(f * input.equity),
        SizingMethod::VolatilityScaled {
            risk_budget,
            atr_multiplier,
            ..
        } => {
            let atr = input.atr.filter(|a| a.is_finite() && *a > 0.0);
            let atr = atr.ok_or(SizingSkip::NoVolatility)?;
            let units = risk_budget / (atr * atr_multiplier);
            Ok(units * input.price)
        }
    }
}

pub fn size_position(
    method: &SizingMethod,
    input: &SizingInput,
    costs: &CostModel,
) -> Result<SizeDecision, SizingSkip> {
    let target = target_notional(method, input)?;
    let affordable = costs.affordable_notional(input.cash);
    if !(target > 0.0) || !(affordable > 0.0) || !(input.price > 0.0) {
        return Err(SizingSkip::NoCapital);
    }

    let (notional, clamped) = if target > affordable {
        (affordable, true)
    } else {
        (target, false)
    };
    Ok(SizeDecision {
        units: notional / input.price,
        notional,
        clamped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn input(cash: f64) -> SizingInput {
        SizingInput {
            equity: cash,
            cash,
            price: 50.0,
            atr: Some(2.0),
        }
    }

    #[test]
    fn fixed_notional_within_cash() {
        let d = size_position(
            &SizingMethod::FixedNotional(10_000.0),
            &input(100_000.0),
            &CostModel::default(),
        )
        .unwrap();
        assert_relative_eq!(d.notional, 10_000.0);
        assert_relative_eq!(d.units, 200.0);
        assert!(!d.clamped);
    }

    #[test]
    fn fixed_fraction_of_equity() {
        let d = size_position(
            &SizingMethod::FixedFraction(0.25),
            &input(40_000.0),
            &CostModel::default(),
        )
        .unwrap();
        assert_relative_eq!(d.notional, 10_000.0);
    }

    #[test]
    fn volatility_scaled_units() {
        let method = SizingMethod::VolatilityScaled {
            risk_budget: 1_000.0,
            atr_period: 14,
            atr_multiplier: 2.0,
        };
        let d = size_position(&method, &input(1_000_000.0), &CostModel::default()).unwrap();
        // 1000 / (2 * 2) = 250 units at 50
        assert_relative_eq!(d.units, 250.0);
        assert_relative_eq!(d.notional, 12_500.0);
    }

    #[test]
    fn volatility_scaled_without_atr_is_skipped() {
        let method = SizingMethod::VolatilityScaled {
            risk_budget: 1_000.0,
            atr_period: 14,
            atr_multiplier: 2.0,
        };
        let mut inp = input(10_000.0);
        inp.atr = None;
        assert_eq!(
            size_position(&method, &inp, &CostModel::default()),
            Err(SizingSkip::NoVolatility)
        );
        inp.atr = Some(0.0);
        assert_eq!(
            size_position(&method, &inp, &CostModel::default()),
            Err(SizingSkip::NoVolatility)
        );
    }

    #[test]
    fn oversized_target_is_clamped_to_affordable() {
        let costs = CostModel {
            commission_pct: 0.1,
            ..Default::default()
        };
        let d = size_position(&SizingMethod::FixedNotional(50_000.0), &input(10_000.0), &costs)
            .unwrap();
        assert!(d.clamped);
        assert_relative_eq!(d.notional + costs.costs(d.notional).total(), 10_000.0, epsilon = 1e-6);
    }

    #[test]
    fn no_cash_is_skipped() {
        assert_eq!(
            size_position(
                &SizingMethod::FixedFraction(1.0),
                &input(0.0),
                &CostModel::default()
            ),
            Err(SizingSkip::NoCapital)
        );
    }
}
