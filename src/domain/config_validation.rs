//! Configuration validation.
//!
//! Turns raw `[backtest]`, `[execution]` and `[strategy]` sections into typed
//! settings, rejecting every bad key before a run starts.

use crate::domain::candle::Interval;
use crate::domain::error::SimError;
use crate::domain::execution::{CommissionModel, ExecutionConfig, ReferencePrice, SlippageModel};
use crate::domain::indicator::{check_psar_factors, IndicatorType};
use crate::domain::strategy::{
    BuiltinStrategy, CrossoverStrategy, ParabolicSarStrategy, ThresholdStrategy,
};
use crate::ports::config_port::ConfigPort;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestSettings {
    pub symbol: String,
    pub interval: Interval,
    pub initial_capital: f64,
    /// Overrides the interval's default annualization factor.
    pub periods_per_year: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub backtest: BacktestSettings,
    pub execution: ExecutionConfig,
    pub strategy: BuiltinStrategy,
}

pub fn load_run_config(config: &dyn ConfigPort) -> Result<RunConfig, SimError> {
    Ok(RunConfig {
        backtest: validate_backtest_config(config)?,
        execution: validate_execution_config(config)?,
        strategy: validate_strategy_config(config)?,
    })
}

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<BacktestSettings, SimError> {
    let symbol = required(config, "backtest", "symbol")?;
    let interval = parse_required(config, "backtest", "interval")?;

    let initial_capital = required_f64(config, "backtest", "initial_capital")?;
    if initial_capital <= 0.0 {
        return Err(SimError::config_invalid(
            "backtest",
            "initial_capital",
            "initial_capital must be positive",
        ));
    }

    let periods_per_year = optional_f64(config, "backtest", "periods_per_year")?;
    if periods_per_year.is_some_and(|p| p <= 0.0) {
        return Err(SimError::config_invalid(
            "backtest",
            "periods_per_year",
            "periods_per_year must be positive",
        ));
    }

    Ok(BacktestSettings {
        symbol,
        interval,
        initial_capital,
        periods_per_year,
    })
}

pub fn validate_execution_config(config: &dyn ConfigPort) -> Result<ExecutionConfig, SimError> {
    let defaults = ExecutionConfig::default();
    let execution = ExecutionConfig {
        commission_model: parse_or::<CommissionModel>(
            config,
            "execution",
            "commission_model",
            defaults.commission_model,
        )?,
        commission_rate: optional_f64(config, "execution", "commission_rate")?
            .unwrap_or(defaults.commission_rate),
        slippage_model: parse_or::<SlippageModel>(
            config,
            "execution",
            "slippage_model",
            defaults.slippage_model,
        )?,
        slippage_rate: optional_f64(config, "execution", "slippage_rate")?
            .unwrap_or(defaults.slippage_rate),
        force_close_at_end: bool_or(
            config,
            "execution",
            "force_close_at_end",
            defaults.force_close_at_end,
        )?,
        reference_price: parse_or::<ReferencePrice>(
            config,
            "execution",
            "reference_price",
            defaults.reference_price,
        )?,
        max_position_size: optional_f64(config, "execution", "max_position_size")?,
        stop_loss_pct: optional_f64(config, "execution", "stop_loss_pct")?,
        take_profit_pct: optional_f64(config, "execution", "take_profit_pct")?,
        max_drawdown_pct: optional_f64(config, "execution", "max_drawdown_pct")?,
    };
    execution.validate()?;
    Ok(execution)
}

pub fn validate_strategy_config(config: &dyn ConfigPort) -> Result<BuiltinStrategy, SimError> {
    let kind = required(config, "strategy", "kind")?;
    let fraction = validate_fraction(config)?;

    match kind.to_lowercase().as_str() {
        "crossover" => {
            let fast: IndicatorType = parse_required(config, "strategy", "fast")?;
            let slow: IndicatorType = parse_required(config, "strategy", "slow")?;
            if fast == slow {
                return Err(SimError::config_invalid(
                    "strategy",
                    "slow",
                    "fast and slow indicators must differ",
                ));
            }
            let allow_short = bool_or(config, "strategy", "allow_short", false)?;
            Ok(BuiltinStrategy::Crossover(CrossoverStrategy::new(
                fast,
                slow,
                fraction,
                allow_short,
            )))
        }
        "threshold" => {
            let indicator: IndicatorType = parse_required(config, "strategy", "indicator")?;
            let lower = optional_f64(config, "strategy", "lower")?.unwrap_or(30.0);
            let upper = optional_f64(config, "strategy", "upper")?.unwrap_or(70.0);
            if lower >= upper {
                return Err(SimError::config_invalid(
                    "strategy",
                    "upper",
                    format!("upper ({}) must be above lower ({})", upper, lower),
                ));
            }
            Ok(BuiltinStrategy::Threshold(ThresholdStrategy {
                indicator,
                lower,
                upper,
                fraction,
            }))
        }
        "psar" => {
            let acceleration = optional_f64(config, "strategy", "acceleration")?.unwrap_or(0.02);
            let maximum = optional_f64(config, "strategy", "maximum")?.unwrap_or(0.2);
            if let Err((key, reason)) = check_psar_factors(acceleration, maximum) {
                return Err(SimError::config_invalid("strategy", key, reason));
            }
            let allow_short = bool_or(config, "strategy", "allow_short", false)?;
            Ok(BuiltinStrategy::ParabolicSar(ParabolicSarStrategy::new(
                acceleration,
                maximum,
                fraction,
                allow_short,
            )))
        }
        other => Err(SimError::config_invalid(
            "strategy",
            "kind",
            format!("unknown strategy '{}' (expected crossover, threshold or psar)", other),
        )),
    }
}

fn validate_fraction(config: &dyn ConfigPort) -> Result<f64, SimError> {
    let fraction = optional_f64(config, "strategy", "fraction")?.unwrap_or(1.0);
    if fraction <= 0.0 || fraction > 1.0 {
        return Err(SimError::config_invalid(
            "strategy",
            "fraction",
            "fraction must be in (0, 1]",
        ));
    }
    Ok(fraction)
}

fn lookup(config: &dyn ConfigPort, section: &str, key: &str) -> Option<String> {
    config
        .get_string(section, key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(config: &dyn ConfigPort, section: &str, key: &str) -> Result<String, SimError> {
    lookup(config, section, key).ok_or_else(|| SimError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    })
}

fn parse_value<T>(section: &str, key: &str, raw: &str) -> Result<T, SimError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| SimError::config_invalid(section, key, e.to_string()))
}

fn parse_required<T>(config: &dyn ConfigPort, section: &str, key: &str) -> Result<T, SimError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_value(section, key, &required(config, section, key)?)
}

fn parse_or<T>(config: &dyn ConfigPort, section: &str, key: &str, default: T) -> Result<T, SimError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(config, section, key) {
        Some(raw) => parse_value(section, key, &raw),
        None => Ok(default),
    }
}

fn parse_f64(section: &str, key: &str, raw: &str) -> Result<f64, SimError> {
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(SimError::config_invalid(
            section,
            key,
            format!("'{}' is not a finite number", raw),
        )),
    }
}

fn required_f64(config: &dyn ConfigPort, section: &str, key: &str) -> Result<f64, SimError> {
    parse_f64(section, key, &required(config, section, key)?)
}

fn optional_f64(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<f64>, SimError> {
    lookup(config, section, key)
        .map(|raw| parse_f64(section, key, &raw))
        .transpose()
}

fn bool_or(config: &dyn ConfigPort, section: &str, key: &str, default: bool) -> Result<bool, SimError> {
    let Some(raw) = lookup(config, section, key) else {
        return Ok(default);
    };
    match raw.to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(SimError::config_invalid(
            section,
            key,
            format!("'{}' is not a boolean", raw),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;
    use crate::domain::strategy::Strategy;

    fn make_config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    const BACKTEST: &str = "[backtest]\nsymbol = BTCUSDT\ninterval = 1h\ninitial_capital = 10000\n";

    fn with_backtest(rest: &str) -> FileConfigAdapter {
        make_config(&format!("{}{}", BACKTEST, rest))
    }

    fn assert_invalid(err: SimError, expected_section: &str, expected_key: &str) {
        match err {
            SimError::ConfigInvalid { section, key, .. } => {
                assert_eq!(section, expected_section);
                assert_eq!(key, expected_key);
            }
            other => panic!("expected ConfigInvalid, got {:?}", other),
        }
    }

    #[test]
    fn valid_full_config_passes() {
        let config = make_config(
            r#"
[backtest]
symbol = BTCUSDT
interval = 1h
initial_capital = 10000
periods_per_year = 8760

[execution]
commission_model = bps
commission_rate = 10
slippage_model = fixed_bps
slippage_rate = 5
force_close_at_end = true
reference_price = close

[strategy]
kind = crossover
fast = EMA(12)
slow = EMA(26)
fraction = 1.0
allow_short = false
"#,
        );
        let run = load_run_config(&config).unwrap();
        assert_eq!(run.backtest.symbol, "BTCUSDT");
        assert_eq!(run.backtest.interval, Interval::H1);
        assert_eq!(run.backtest.initial_capital, 10_000.0);
        assert_eq!(run.backtest.periods_per_year, Some(8760.0));
        assert_eq!(run.execution.commission_model, CommissionModel::Bps);
        assert_eq!(run.execution.commission_rate, 10.0);
        assert_eq!(run.execution.slippage_model, SlippageModel::FixedBps);
        assert_eq!(run.execution.slippage_rate, 5.0);
        assert!(run.execution.force_close_at_end);
        assert_eq!(
            run.strategy.indicators(),
            vec![IndicatorType::Ema(12), IndicatorType::Ema(26)]
        );
    }

    #[test]
    fn execution_section_is_optional() {
        let config = with_backtest("[strategy]\nkind = psar\n");
        let run = load_run_config(&config).unwrap();
        assert_eq!(run.execution, ExecutionConfig::default());
        assert_eq!(run.backtest.periods_per_year, None);
        assert_eq!(run.strategy.name(), "psar");
    }

    #[test]
    fn missing_symbol_fails() {
        let config = make_config("[backtest]\ninterval = 1h\ninitial_capital = 100\n");
        let err = validate_backtest_config(&config).unwrap_err();
        assert!(matches!(err, SimError::ConfigMissing { key, .. } if key == "symbol"));
    }

    #[test]
    fn unknown_interval_fails() {
        let config = make_config("[backtest]\nsymbol = X\ninterval = 2h\ninitial_capital = 100\n");
        assert_invalid(validate_backtest_config(&config).unwrap_err(), "backtest", "interval");
    }

    #[test]
    fn initial_capital_must_be_positive() {
        for capital in ["0", "-100", "abc", "inf"] {
            let config = make_config(&format!(
                "[backtest]\nsymbol = X\ninterval = 1d\ninitial_capital = {}\n",
                capital
            ));
            assert_invalid(
                validate_backtest_config(&config).unwrap_err(),
                "backtest",
                "initial_capital",
            );
        }
    }

    #[test]
    fn periods_per_year_must_be_positive() {
        let config = with_backtest("periods_per_year = 0\n");
        assert_invalid(
            validate_backtest_config(&config).unwrap_err(),
            "backtest",
            "periods_per_year",
        );
    }

    #[test]
    fn unknown_commission_model_fails() {
        let config = with_backtest("[execution]\ncommission_model = percent\n");
        assert_invalid(
            validate_execution_config(&config).unwrap_err(),
            "execution",
            "commission_model",
        );
    }

    #[test]
    fn negative_commission_fails() {
        let config = with_backtest("[execution]\ncommission_rate = -1\n");
        assert_invalid(
            validate_execution_config(&config).unwrap_err(),
            "execution",
            "commission_rate",
        );
    }

    #[test]
    fn slippage_at_full_price_fails() {
        let config = with_backtest("[execution]\nslippage_model = fixed_bps\nslippage_rate = 10000\n");
        assert_invalid(
            validate_execution_config(&config).unwrap_err(),
            "execution",
            "slippage_rate",
        );
    }

    #[test]
    fn bad_bool_fails() {
        let config = with_backtest("[execution]\nforce_close_at_end = maybe\n");
        assert_invalid(
            validate_execution_config(&config).unwrap_err(),
            "execution",
            "force_close_at_end",
        );
    }

    #[test]
    fn fixed_commission_and_open_reference() {
        let config = with_backtest(
            "[execution]\ncommission_model = fixed\ncommission_rate = 2.5\nreference_price = open\nforce_close_at_end = no\n",
        );
        let execution = validate_execution_config(&config).unwrap();
        assert_eq!(execution.commission_model, CommissionModel::Fixed);
        assert_eq!(execution.commission_rate, 2.5);
        assert_eq!(execution.reference_price, ReferencePrice::Open);
        assert!(!execution.force_close_at_end);
    }

    #[test]
    fn risk_limits_parsed() {
        let config = with_backtest(
            "[execution]\nmax_position_size = 2500\nstop_loss_pct = 5\ntake_profit_pct = 12.5\nmax_drawdown_pct = 20\n",
        );
        let execution = validate_execution_config(&config).unwrap();
        assert_eq!(execution.max_position_size, Some(2500.0));
        assert_eq!(execution.stop_loss_pct, Some(5.0));
        assert_eq!(execution.take_profit_pct, Some(12.5));
        assert_eq!(execution.max_drawdown_pct, Some(20.0));
    }

    #[test]
    fn bad_risk_limits_fail() {
        let config = with_backtest("[execution]\nstop_loss_pct = -5\n");
        assert_invalid(
            validate_execution_config(&config).unwrap_err(),
            "execution",
            "stop_loss_pct",
        );

        let config = with_backtest("[execution]\nmax_drawdown_pct = 120\n");
        assert_invalid(
            validate_execution_config(&config).unwrap_err(),
            "execution",
            "max_drawdown_pct",
        );

        let config = with_backtest("[execution]\nmax_position_size = lots\n");
        assert_invalid(
            validate_execution_config(&config).unwrap_err(),
            "execution",
            "max_position_size",
        );
    }

    #[test]
    fn missing_strategy_kind_fails() {
        let config = with_backtest("[strategy]\nfast = EMA(5)\n");
        let err = validate_strategy_config(&config).unwrap_err();
        assert!(matches!(err, SimError::ConfigMissing { section, key } if section == "strategy" && key == "kind"));
    }

    #[test]
    fn unknown_strategy_kind_fails() {
        let config = with_backtest("[strategy]\nkind = martingale\n");
        assert_invalid(validate_strategy_config(&config).unwrap_err(), "strategy", "kind");
    }

    #[test]
    fn crossover_requires_indicators() {
        let config = with_backtest("[strategy]\nkind = crossover\nfast = EMA(5)\n");
        let err = validate_strategy_config(&config).unwrap_err();
        assert!(matches!(err, SimError::ConfigMissing { key, .. } if key == "slow"));
    }

    #[test]
    fn crossover_rejects_bad_indicator() {
        let config = with_backtest("[strategy]\nkind = crossover\nfast = EMA(0)\nslow = EMA(10)\n");
        assert_invalid(validate_strategy_config(&config).unwrap_err(), "strategy", "fast");
    }

    #[test]
    fn crossover_rejects_identical_indicators() {
        let config = with_backtest("[strategy]\nkind = crossover\nfast = SMA(5)\nslow = SMA(5)\n");
        assert_invalid(validate_strategy_config(&config).unwrap_err(), "strategy", "slow");
    }

    #[test]
    fn fraction_out_of_range_fails() {
        for fraction in ["0", "1.5", "-0.1"] {
            let config = with_backtest(&format!(
                "[strategy]\nkind = psar\nfraction = {}\n",
                fraction
            ));
            assert_invalid(validate_strategy_config(&config).unwrap_err(), "strategy", "fraction");
        }
    }

    #[test]
    fn threshold_defaults_and_bounds() {
        let config = with_backtest("[strategy]\nkind = threshold\nindicator = RSI(14)\n");
        match validate_strategy_config(&config).unwrap() {
            BuiltinStrategy::Threshold(t) => {
                assert_eq!(t.indicator, IndicatorType::Rsi(14));
                assert_eq!(t.lower, 30.0);
                assert_eq!(t.upper, 70.0);
            }
            other => panic!("unexpected strategy {:?}", other),
        }

        let config = with_backtest(
            "[strategy]\nkind = threshold\nindicator = RSI(14)\nlower = 80\nupper = 20\n",
        );
        assert_invalid(validate_strategy_config(&config).unwrap_err(), "strategy", "upper");
    }

    #[test]
    fn psar_factors_validated() {
        let config = with_backtest("[strategy]\nkind = psar\nacceleration = 0.3\nmaximum = 0.2\n");
        assert_invalid(validate_strategy_config(&config).unwrap_err(), "strategy", "maximum");

        let config = with_backtest("[strategy]\nkind = psar\nacceleration = 0\n");
        assert_invalid(
            validate_strategy_config(&config).unwrap_err(),
            "strategy",
            "acceleration",
        );

        let config = with_backtest("[strategy]\nkind = psar\nacceleration = 0.0004\n");
        let err = validate_strategy_config(&config).unwrap_err();
        assert!(err.to_string().contains("at least 0.001"), "{}", err);
        assert_invalid(err, "strategy", "acceleration");

        let config = with_backtest(
            "[strategy]\nkind = psar\nacceleration = 0.01\nmaximum = 0.1\nallow_short = true\n",
        );
        assert_eq!(
            validate_strategy_config(&config).unwrap().indicators(),
            vec![IndicatorType::psar(0.01, 0.1)]
        );
    }
}
