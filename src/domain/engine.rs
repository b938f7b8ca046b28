//! Time-stepped simulation driver.
//!
//! Each step marks the portfolio to the new candle, asks the indicator
//! provider and then the strategy for decisions, and applies the resulting
//! signals in order. The strategy and provider only ever see candles up to
//! and including the current one.

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::candle::{validate_candles, validate_next, Candle};
use super::error::{SimError, ValidationError};
use super::execution::{execute_signal, ExecutionConfig, Fill};
use super::indicator::IndicatorProvider;
use super::metrics::Metrics;
use super::portfolio::{EquityPoint, Portfolio, PortfolioSnapshot};
use super::position::Trade;
use super::signal::{Signal, SignalAction, SkippedSignal};
use super::strategy::{StepContext, Strategy};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationResult {
    pub symbol: String,
    pub strategy: String,
    pub initial_capital: f64,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub final_portfolio: PortfolioSnapshot,
    pub metrics: Metrics,
    pub skipped_signals: Vec<SkippedSignal>,
    pub steps_processed: usize,
}

/// One run in progress. Feed candles with [`step`](Simulation::step) and
/// call [`finish`](Simulation::finish) whenever the feed ends; the result
/// covers every processed step.
///
/// After each step the equity curve holds exactly one point per processed
/// candle. An end-of-run force close rewrites the final point.
pub struct Simulation<S, P> {
    strategy: S,
    provider: P,
    config: ExecutionConfig,
    periods_per_year: Option<f64>,
    portfolio: Portfolio,
    history: Vec<Candle>,
    skipped: Vec<SkippedSignal>,
    peak_equity: f64,
    halted: bool,
}

impl<S: Strategy, P: IndicatorProvider> Simulation<S, P> {
    pub fn new(
        strategy: S,
        provider: P,
        initial_capital: f64,
        config: ExecutionConfig,
    ) -> Result<Self, SimError> {
        config.validate()?;
        if !initial_capital.is_finite() || initial_capital <= 0.0 {
            return Err(SimError::config_invalid(
                "backtest",
                "initial_capital",
                format!("must be a positive number, got {}", initial_capital),
            ));
        }

        info!(
            strategy = strategy.name(),
            initial_capital,
            commission_model = %config.commission_model,
            slippage_model = %config.slippage_model,
            "simulation started"
        );

        Ok(Simulation {
            strategy,
            provider,
            config,
            periods_per_year: None,
            portfolio: Portfolio::new(initial_capital),
            history: Vec::new(),
            skipped: Vec::new(),
            peak_equity: initial_capital,
            halted: false,
        })
    }

    /// Override the annualization factor derived from the candle interval.
    pub fn with_periods_per_year(mut self, periods_per_year: f64) -> Result<Self, SimError> {
        if !periods_per_year.is_finite() || periods_per_year <= 0.0 {
            return Err(SimError::config_invalid(
                "backtest",
                "periods_per_year",
                format!("must be a positive number, got {}", periods_per_year),
            ));
        }
        self.periods_per_year = Some(periods_per_year);
        Ok(self)
    }

    pub fn steps_processed(&self) -> usize {
        self.history.len()
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn skipped_signals(&self) -> &[SkippedSignal] {
        &self.skipped
    }

    /// True once the drawdown limit has been breached; opens are refused
    /// from then on.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Process one candle. A returned error is fatal: the simulation must
    /// be dropped, not stepped further or finished.
    pub fn step(&mut self, candle: Candle) -> Result<(), SimError> {
        let index = self.history.len();
        validate_next(self.history.last(), &candle, index)?;

        self.history.push(candle);
        self.mark(index);
        self.peak_equity = self.peak_equity.max(self.portfolio.equity());
        self.enforce_risk_limits(index);

        let candle = &self.history[index];
        let indicators = self.provider.snapshot(&self.history);
        let ctx = StepContext {
            step: index,
            candle,
            history: &self.history,
            indicators: &indicators,
            portfolio: self.portfolio.view(),
        };

        let signals = match self.strategy.decide(&ctx) {
            Ok(signals) => signals,
            Err(source) => {
                error!(
                    step = index,
                    timestamp = %candle.timestamp,
                    strategy = self.strategy.name(),
                    error = %source,
                    "strategy failed"
                );
                return Err(SimError::Strategy {
                    step: index,
                    candle: Box::new(candle.clone()),
                    source,
                });
            }
        };

        for signal in signals {
            self.apply(index, signal);
        }

        let timestamp = self.history[index].timestamp;
        let equity = self.portfolio.record_equity(timestamp).total_equity;
        self.peak_equity = self.peak_equity.max(equity);
        Ok(())
    }

    fn mark(&mut self, step: usize) {
        let candle = &self.history[step];
        let price = self.config.reference_price.of(candle);
        self.portfolio.mark_to_market([(candle.symbol.as_str(), price)]);
    }

    /// Stop-loss, take-profit and drawdown exits, checked against the
    /// fresh marks before the strategy runs.
    fn enforce_risk_limits(&mut self, step: usize) {
        if let Some(limit) = self.config.max_drawdown_pct {
            let drawdown_pct =
                (self.peak_equity - self.portfolio.equity()) / self.peak_equity * 100.0;
            if !self.halted && drawdown_pct >= limit {
                warn!(step, drawdown_pct, limit, "max drawdown breached, trading halted");
                self.halted = true;
                let symbols: Vec<String> =
                    self.portfolio.positions().map(|p| p.symbol.clone()).collect();
                for symbol in symbols {
                    self.apply(step, Signal::close(symbol));
                }
                return;
            }
        }

        let config = &self.config;
        let exits: Vec<(String, &'static str)> = self
            .portfolio
            .positions()
            .filter_map(|pos| {
                if config.stop_loss_pct.is_some_and(|pct| pos.should_stop_loss(pct)) {
                    Some((pos.symbol.clone(), "stop loss"))
                } else if config
                    .take_profit_pct
                    .is_some_and(|pct| pos.should_take_profit(pct))
                {
                    Some((pos.symbol.clone(), "take profit"))
                } else {
                    None
                }
            })
            .collect();
        for (symbol, trigger) in exits {
            info!(step, %symbol, trigger, "risk exit");
            self.apply(step, Signal::close(symbol));
        }
    }

    fn apply(&mut self, step: usize, signal: Signal) {
        let candle = &self.history[step];
        let opening = matches!(signal.action, SignalAction::OpenLong | SignalAction::OpenShort);
        let fill = if self.halted && opening {
            Err(ValidationError::TradingHalted)
        } else {
            execute_signal(&mut self.portfolio, &signal, candle, &self.config)
        };
        if fill.is_ok() {
            // Fills carry slippage; equity is always valued at the reference.
            self.mark(step);
        }
        let candle = &self.history[step];
        match fill {
            Ok(Fill::Opened {
                side,
                quantity,
                price,
                fee,
            }) => {
                debug!(step, symbol = %signal.symbol, %side, quantity, price, fee, "opened");
            }
            Ok(Fill::Closed(trade)) => {
                debug!(
                    step,
                    symbol = %trade.symbol,
                    side = %trade.side,
                    quantity = trade.quantity,
                    price = trade.exit_price,
                    realized_pnl = trade.realized_pnl,
                    "closed"
                );
            }
            Err(reason) => {
                warn!(
                    step,
                    symbol = %signal.symbol,
                    action = %signal.action,
                    %reason,
                    "signal skipped"
                );
                self.skipped.push(SkippedSignal {
                    step,
                    timestamp: candle.timestamp,
                    signal,
                    reason,
                });
            }
        }
    }

    /// Close out the run: force-close if configured, rewriting the final
    /// equity point, and compute metrics.
    pub fn finish(mut self) -> SimulationResult {
        if let Some(last) = self.history.len().checked_sub(1) {
            if self.config.force_close_at_end && self.portfolio.position_count() > 0 {
                let symbols: Vec<String> =
                    self.portfolio.positions().map(|p| p.symbol.clone()).collect();
                for symbol in symbols {
                    debug!(step = last, %symbol, "force closing at end of run");
                    self.apply(last, Signal::close(symbol));
                }
                self.portfolio.rerecord_last_equity();
            }
        }

        let periods_per_year = self.periods_per_year.unwrap_or_else(|| {
            self.history
                .first()
                .map_or(365.0, |c| c.interval.periods_per_year())
        });
        let metrics = Metrics::compute(
            self.portfolio.equity_curve(),
            self.portfolio.trades(),
            periods_per_year,
        );

        let final_portfolio = self.portfolio.snapshot();
        let initial_capital = self.portfolio.initial_capital;
        let steps_processed = self.history.len();
        let symbol = self
            .history
            .first()
            .map(|c| c.symbol.clone())
            .unwrap_or_default();
        let strategy = self.strategy.name().to_string();
        let (trades, equity_curve) = self.portfolio.into_parts();

        info!(
            %symbol,
            steps = steps_processed,
            trades = trades.len(),
            skipped = self.skipped.len(),
            final_equity = final_portfolio.total_equity,
            "simulation finished"
        );

        SimulationResult {
            symbol,
            strategy,
            initial_capital,
            trades,
            equity_curve,
            final_portfolio,
            metrics,
            skipped_signals: self.skipped,
            steps_processed,
        }
    }
}

/// Replay `candles` through `strategy`. The whole feed is validated before
/// the first step runs.
pub fn run<S: Strategy, P: IndicatorProvider>(
    candles: &[Candle],
    strategy: S,
    provider: P,
    initial_capital: f64,
    config: ExecutionConfig,
) -> Result<SimulationResult, SimError> {
    let sim = Simulation::new(strategy, provider, initial_capital, config)?;
    run_simulation(sim, candles)
}

/// Drive an already configured simulation over `candles`.
pub fn run_simulation<S: Strategy, P: IndicatorProvider>(
    mut sim: Simulation<S, P>,
    candles: &[Candle],
) -> Result<SimulationResult, SimError> {
    validate_candles(candles)?;
    for candle in candles {
        sim.step(candle.clone())?;
    }
    Ok(sim.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::Interval;
    use crate::domain::error::{StrategyError, ValidationError};
    use crate::domain::indicator::NoIndicators;
    use crate::domain::signal::SignalSize;
    use approx::assert_relative_eq;
    use chrono::{Duration, NaiveDate};

    fn candles(prices: &[f64]) -> Vec<Candle> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        prices
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                symbol: "BTCUSDT".into(),
                timestamp: start + Duration::days(i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1.0,
                interval: Interval::D1,
            })
            .collect()
    }

    /// Emits fixed signals at fixed steps.
    struct Scripted(Vec<(usize, Signal)>);

    impl Strategy for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn decide(&mut self, ctx: &StepContext<'_>) -> Result<Vec<Signal>, StrategyError> {
            Ok(self
                .0
                .iter()
                .filter(|(step, _)| *step == ctx.step)
                .map(|(_, s)| s.clone())
                .collect())
        }
    }

    struct Failing;

    impl Strategy for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn decide(&mut self, ctx: &StepContext<'_>) -> Result<Vec<Signal>, StrategyError> {
            if ctx.step == 2 {
                Err(StrategyError::new("boom"))
            } else {
                Ok(Vec::new())
            }
        }
    }

    fn no_force_close() -> ExecutionConfig {
        ExecutionConfig {
            force_close_at_end: false,
            ..Default::default()
        }
    }

    #[test]
    fn buy_and_sell_round_trip() {
        let strategy = Scripted(vec![
            (0, Signal::open_long("BTCUSDT", SignalSize::Quantity(10.0))),
            (5, Signal::close("BTCUSDT")),
        ]);
        let data = candles(&[100.0, 101.0, 102.0, 103.0, 104.0, 120.0]);
        let result = run(&data, strategy, NoIndicators, 10_000.0, no_force_close()).unwrap();

        assert_eq!(result.trades.len(), 1);
        assert_relative_eq!(result.trades[0].realized_pnl, 200.0);
        assert_relative_eq!(result.final_portfolio.cash, 11_200.0);
        assert_eq!(result.equity_curve.len(), 6);
        assert_relative_eq!(result.equity_curve[5].total_equity, 11_200.0);
        assert_relative_eq!(result.equity_curve[2].total_equity, 10_020.0);
        assert_eq!(result.steps_processed, 6);
        assert_eq!(result.strategy, "scripted");
    }

    #[test]
    fn equity_timestamps_match_candles() {
        let data = candles(&[1.0, 2.0, 3.0]);
        let result = run(&data, Scripted(Vec::new()), NoIndicators, 100.0, no_force_close()).unwrap();
        for (point, candle) in result.equity_curve.iter().zip(&data) {
            assert_eq!(point.timestamp, candle.timestamp);
        }
    }

    #[test]
    fn force_close_lands_in_final_point() {
        let strategy = Scripted(vec![(
            0,
            Signal::open_long("BTCUSDT", SignalSize::Quantity(10.0)),
        )]);
        let data = candles(&[100.0, 110.0]);
        let result = run(&data, strategy, NoIndicators, 10_000.0, ExecutionConfig::default()).unwrap();

        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].exit_time, data[1].timestamp);
        assert!(result.final_portfolio.positions.is_empty());
        let last = result.equity_curve.last().unwrap();
        assert_relative_eq!(last.cash, 10_100.0);
        assert_relative_eq!(last.positions_market_value, 0.0);
    }

    #[test]
    fn skipped_signal_does_not_abort() {
        let strategy = Scripted(vec![(1, Signal::close("BTCUSDT"))]);
        let data = candles(&[1.0, 2.0, 3.0]);
        let result = run(&data, strategy, NoIndicators, 100.0, no_force_close()).unwrap();

        assert_eq!(result.skipped_signals.len(), 1);
        let skipped = &result.skipped_signals[0];
        assert_eq!(skipped.step, 1);
        assert!(matches!(skipped.reason, ValidationError::UnknownPosition { .. }));
        assert_eq!(result.equity_curve.len(), 3);
    }

    #[test]
    fn strategy_error_is_fatal() {
        let data = candles(&[1.0, 2.0, 3.0, 4.0]);
        let err = run(&data, Failing, NoIndicators, 100.0, no_force_close()).unwrap_err();
        match err {
            SimError::Strategy { step, candle, .. } => {
                assert_eq!(step, 2);
                assert_eq!(candle.timestamp, data[2].timestamp);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn bad_feed_rejected_before_any_step() {
        let mut data = candles(&[1.0, 2.0, 3.0]);
        data.swap(1, 2);
        let err = run(&data, Failing, NoIndicators, 100.0, no_force_close()).unwrap_err();
        assert!(matches!(err, SimError::Data { index: 2, .. }));
    }

    #[test]
    fn invalid_capital_rejected() {
        let err = Simulation::new(Scripted(Vec::new()), NoIndicators, 0.0, no_force_close())
            .err()
            .unwrap();
        assert!(matches!(err, SimError::ConfigInvalid { ref key, .. } if key == "initial_capital"));
    }

    #[test]
    fn stepwise_stop_early() {
        let data = candles(&[1.0, 2.0, 3.0, 4.0]);
        let mut sim =
            Simulation::new(Scripted(Vec::new()), NoIndicators, 100.0, no_force_close()).unwrap();
        sim.step(data[0].clone()).unwrap();
        assert_eq!(sim.portfolio().equity_curve().len(), 1);
        sim.step(data[1].clone()).unwrap();
        assert_eq!(sim.steps_processed(), 2);
        assert_eq!(sim.portfolio().equity_curve().len(), 2);

        let result = sim.finish();
        assert_eq!(result.equity_curve.len(), 2);
        assert_eq!(result.steps_processed, 2);
    }

    #[test]
    fn periods_per_year_validated() {
        let sim =
            Simulation::new(Scripted(Vec::new()), NoIndicators, 100.0, no_force_close()).unwrap();
        let err = sim.with_periods_per_year(0.0).err().unwrap();
        assert!(matches!(err, SimError::ConfigInvalid { ref key, .. } if key == "periods_per_year"));

        let sim =
            Simulation::new(Scripted(Vec::new()), NoIndicators, 100.0, no_force_close()).unwrap();
        assert!(sim.with_periods_per_year(252.0).is_ok());
    }

    #[test]
    fn stepwise_rejects_out_of_order() {
        let data = candles(&[1.0, 2.0]);
        let mut sim =
            Simulation::new(Scripted(Vec::new()), NoIndicators, 100.0, no_force_close()).unwrap();
        sim.step(data[1].clone()).unwrap();
        let err = sim.step(data[0].clone()).unwrap_err();
        assert!(matches!(err, SimError::Data { index: 1, .. }));
    }

    #[test]
    fn empty_feed_finishes_cleanly() {
        let result = run(&[], Scripted(Vec::new()), NoIndicators, 100.0, no_force_close()).unwrap();
        assert!(result.equity_curve.is_empty());
        assert_eq!(result.steps_processed, 0);
        assert_eq!(result.symbol, "");
    }
}
