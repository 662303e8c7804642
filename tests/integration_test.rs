//! End-to-end tests of the backtest pipeline through the public API.
//!
//! Tests cover:
//! - Crossover strategy producing exactly one round trip
//! - Cost accounting on a zero-movement round trip
//! - Walk-forward window layout and capital chaining
//! - Metrics edge cases (no trades)
//! - Properties: no lookahead, one position at a time, costs never help

mod common;

use approx::assert_relative_eq;
use common::*;
use proptest::prelude::*;
use stratforge::adapters::file_config_adapter::IniConfigParser;
use stratforge::domain::backtest::{run_backtest, BacktestConfig, Params};
use stratforge::domain::costs::CostModel;
use stratforge::domain::error::BacktestError;
use stratforge::domain::indicator::compute_indicators;
use stratforge::domain::position::ExitReason;
use stratforge::domain::signal::{generate_signals, SignalKind};
use stratforge::optimize::grid::{ParamGrid, StrategyTemplate};
use stratforge::optimize::harness::Optimizer;
use stratforge::optimize::ranking::{best, rank, RankingConfig};
use stratforge::optimize::walk_forward::{windows, WalkForward, WalkForwardConfig};

const CROSSOVER: &str = "[strategy]\n\
    name = SMA Crossover\n\
    entry_long = CROSS_ABOVE(SMA(5), SMA(20))\n\
    exit = CROSS_BELOW(SMA(5), SMA(20))\n";

mod crossover_scenario {
    use super::*;

    #[test]
    fn one_entry_and_one_exit_signal() {
        let strategy = strategy_from_ini(CROSSOVER);
        let bars = flat_bars(&up_then_down_prices());
        let table = compute_indicators(&bars, &strategy.required_indicators()).unwrap();
        let (signals, diagnostics) = generate_signals(&strategy, &bars, &table);

        let kinds: Vec<(usize, SignalKind)> =
            signals.iter().map(|s| (s.bar_index, s.kind)).collect();
        assert_eq!(
            kinds,
            vec![(20, SignalKind::EnterLong), (37, SignalKind::Exit)]
        );
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn single_profitable_trade() {
        let strategy = strategy_from_ini(CROSSOVER);
        let series = daily_series("UPDN", flat_bars(&up_then_down_prices()));
        let result = run_backtest(&series, &strategy, &frictionless()).unwrap();

        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!((trade.entry_index, trade.exit_index), (21, 38));
        assert_relative_eq!(trade.entry_price, 103.0);
        assert_relative_eq!(trade.exit_price, 106.0);
        assert_eq!(trade.exit_reason, ExitReason::Signal);
        assert!(trade.gross_pnl > 0.0);
        assert_relative_eq!(trade.net_pnl, trade.gross_pnl);
        assert_eq!(result.metrics.total_trades, 1);
        assert_relative_eq!(result.metrics.win_rate, 1.0);
        assert_eq!(result.equity_curve.len(), 40);
    }
}

mod cost_accounting {
    use super::*;

    #[test]
    fn flat_round_trip_loses_exactly_the_costs() {
        // Opens stay at 100 while closes cross 99.5 up and back down.
        let closes = [99.0, 100.0, 100.0, 100.0, 99.0, 99.0, 99.0];
        let bars: Vec<Bar> = flat_bars(&closes)
            .into_iter()
            .map(|b| Bar {
                open: 100.0,
                high: 100.5,
                low: 98.5,
                ..b
            })
            .collect();
        let series = daily_series("FLAT", bars);
        let strategy = strategy_from_ini(
            "[strategy]\n\
             entry_long = CROSS_ABOVE(close, 99.5)\n\
             exit = CROSS_BELOW(close, 99.5)\n\
             [sizing]\n\
             method = fixed_notional\n\
             notional = 100000\n",
        );
        let config = BacktestConfig {
            initial_capital: 1_000_000.0,
            costs: CostModel {
                commission_pct: 0.03,
                slippage_pct: 0.02,
                ..Default::default()
            },
            ..Default::default()
        };

        let result = run_backtest(&series, &strategy, &config).unwrap();
        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!((trade.entry_index, trade.exit_index), (2, 5));
        assert_relative_eq!(trade.gross_pnl, 0.0, epsilon = 1e-9);
        assert_relative_eq!(trade.total_costs(), 100.0, epsilon = 1e-6);
        assert_relative_eq!(trade.net_pnl, -100.0, epsilon = 1e-6);
        assert_relative_eq!(result.final_equity(), 999_900.0, epsilon = 1e-6);
        assert_relative_eq!(result.metrics.total_costs, 100.0, epsilon = 1e-6);
    }
}

mod metrics_edge_cases {
    use super::*;

    #[test]
    fn no_trades_gives_undefined_win_rate() {
        let strategy = strategy_from_ini("[strategy]\nentry_long = ABOVE(close, 1000000)\n");
        let series = daily_series("IDLE", bars_from_closes(&up_then_down_prices()));
        let result = run_backtest(&series, &strategy, &BacktestConfig::default()).unwrap();

        assert!(result.trades.is_empty());
        assert!(result.metrics.win_rate.is_nan());
        assert_relative_eq!(result.metrics.total_return, 0.0);
        assert_relative_eq!(result.metrics.max_drawdown, 0.0);
        assert!(result.is_insufficient());
    }

    #[test]
    fn out_of_order_bars_are_rejected() {
        let mut bars = bars_from_closes(&[10.0, 11.0, 12.0]);
        bars.swap(0, 2);
        let strategy = strategy_from_ini("[strategy]\nentry_long = ABOVE(close, 1)\n");
        let err = run_backtest(&daily_series("BAD", bars), &strategy, &frictionless()).unwrap_err();
        assert!(matches!(err, BacktestError::DataQuality { .. }));
    }
}

mod walk_forward {
    use super::*;

    const TEMPLATE: &str = "[strategy]\n\
        name = fast {fast}\n\
        entry_long = CROSS_ABOVE(SMA({fast}), SMA(6))\n\
        exit = CROSS_BELOW(SMA({fast}), SMA(6))\n";

    fn zigzag(len: usize) -> Vec<f64> {
        (0..len)
            .map(|i| 100.0 + 8.0 * ((i as f64) * 0.7).sin() + i as f64 * 0.2)
            .collect()
    }

    #[test]
    fn twelve_three_over_thirty_bars_gives_six_windows() {
        let cfg = WalkForwardConfig {
            train_bars: 12,
            test_bars: 3,
            step_bars: None,
        };
        let specs = windows(30, &cfg);
        let starts: Vec<usize> = specs.iter().map(|w| w.test_start).collect();
        assert_eq!(starts, vec![12, 15, 18, 21, 24, 27]);
        assert_eq!(specs.last().unwrap().test_end, 30);
        for pair in specs.windows(2) {
            assert_eq!(pair[0].test_end, pair[1].test_start);
        }
    }

    #[test]
    fn run_chains_capital_across_windows() {
        let template = StrategyTemplate::new(TEMPLATE, IniConfigParser);
        let grid = ParamGrid::new().with_axis("fast", [2.0, 3.0]);
        let backtest = frictionless();
        let cfg = WalkForwardConfig {
            train_bars: 12,
            test_bars: 3,
            step_bars: None,
        };
        let series = daily_series("WF", bars_from_closes(&zigzag(30)));

        let report = WalkForward::new(&template, &grid, &backtest, cfg)
            .run(&series)
            .unwrap();

        assert_eq!(report.windows.len(), 6);
        assert_relative_eq!(report.windows[0].starting_capital, backtest.initial_capital);
        for pair in report.windows.windows(2) {
            assert_relative_eq!(pair[1].starting_capital, pair[0].ending_capital);
        }
        assert_relative_eq!(
            report.final_equity(),
            report.windows.last().unwrap().ending_capital
        );
        for trade in &report.trades {
            assert!(trade.entry_index >= 12);
        }
    }
}

mod optimization {
    use super::*;

    #[test]
    fn grid_search_picks_a_winner_with_its_params() {
        let template = StrategyTemplate::new(
            "[strategy]\n\
             entry_long = CROSS_ABOVE(SMA({fast}), SMA({slow}))\n\
             exit = CROSS_BELOW(SMA({fast}), SMA({slow}))\n",
            IniConfigParser,
        );
        let grid = ParamGrid::new()
            .with_axis("fast", [3.0, 5.0, 20.0])
            .with_axis("slow", [10.0, 20.0])
            .with_constraint("fast", "slow");
        let backtest = frictionless();
        let series = daily_series("OPT", flat_bars(&up_then_down_prices()));

        let report = Optimizer::new(&template, &grid, &backtest)
            .run(&series)
            .unwrap();
        assert_eq!(report.records.len(), 4);
        assert!(report.records.iter().all(|r| r.params["fast"] < r.params["slow"]));

        let ranked = rank(&report, &RankingConfig::default());
        let winner = best(&ranked).unwrap();
        let expected: Params = report.records[winner.index].params.clone();
        assert_eq!(winner.params, expected);
    }
}

fn random_walk() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-0.04f64..0.04, 30..90).prop_map(|steps| {
        let mut price = 100.0;
        steps
            .into_iter()
            .map(|r| {
                price *= 1.0 + r;
                price
            })
            .collect()
    })
}

const PROPERTY_STRATEGY: &str = "[strategy]\n\
    entry_long = CROSS_ABOVE(SMA(3), SMA(8))\n\
    exit = CROSS_BELOW(SMA(3), SMA(8))\n\
    [exits]\n\
    stop_loss_pct = 4\n";

fn costly() -> BacktestConfig {
    BacktestConfig {
        costs: CostModel {
            commission_pct: 0.05,
            slippage_pct: 0.02,
            ..Default::default()
        },
        min_trades: 0,
        ..Default::default()
    }
}

proptest! {
    #[test]
    fn future_bars_do_not_change_the_past(prices in random_walk(), cut in 10usize..30) {
        let strategy = strategy_from_ini(PROPERTY_STRATEGY);
        let bars = bars_from_closes(&prices);
        let cut = cut.min(bars.len() - 1);

        let full = run_backtest(&daily_series("P", bars.clone()), &strategy, &costly()).unwrap();
        let prefix = run_backtest(
            &daily_series("P", bars[..cut].to_vec()),
            &strategy,
            &costly(),
        )
        .unwrap();

        // The prefix liquidates on its last bar, so compare everything before it.
        let n = prefix.equity_curve.len() - 1;
        prop_assert_eq!(&prefix.equity_curve[..n], &full.equity_curve[..n]);
        for trade in prefix.trades.iter().filter(|t| t.exit_index < cut - 1) {
            prop_assert!(full.trades.contains(trade));
        }
    }

    #[test]
    fn at_most_one_position_at_a_time(prices in random_walk()) {
        let strategy = strategy_from_ini(PROPERTY_STRATEGY);
        let result = run_backtest(
            &daily_series("P", bars_from_closes(&prices)),
            &strategy,
            &costly(),
        )
        .unwrap();
        for pair in result.trades.windows(2) {
            prop_assert!(pair[0].exit_index <= pair[1].entry_index);
        }
        for trade in &result.trades {
            prop_assert!(trade.entry_index <= trade.exit_index);
            prop_assert!(trade.size > 0.0);
        }
    }

    #[test]
    fn net_pnl_never_exceeds_gross(prices in random_walk()) {
        let strategy = strategy_from_ini(PROPERTY_STRATEGY);
        let result = run_backtest(
            &daily_series("P", bars_from_closes(&prices)),
            &strategy,
            &costly(),
        )
        .unwrap();
        for trade in &result.trades {
            prop_assert!(trade.net_pnl <= trade.gross_pnl + 1e-9);
            prop_assert!(trade.total_costs() >= 0.0);
        }
        prop_assert!(result.metrics.net_pnl <= result.metrics.gross_pnl + 1e-9);
    }
}
