//! Strategy interface and built-in strategies.
//!
//! The engine only knows the [`Strategy`] trait. Built-ins are collected in
//! [`BuiltinStrategy`] so configuration can pick one by name.

use serde::Serialize;

use super::candle::Candle;
use super::error::StrategyError;
use super::indicator::{IndicatorSnapshot, IndicatorType};
use super::portfolio::PortfolioView;
use super::signal::{Signal, SignalSize};

/// Everything a strategy may look at during one step. `history` ends at
/// `candle`.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub step: usize,
    pub candle: &'a Candle,
    pub history: &'a [Candle],
    pub indicators: &'a IndicatorSnapshot,
    pub portfolio: PortfolioView<'a>,
}

pub trait Strategy {
    fn name(&self) -> &str;

    /// Indicators this strategy reads from the snapshot.
    fn indicators(&self) -> Vec<IndicatorType> {
        Vec::new()
    }

    fn decide(&mut self, ctx: &StepContext<'_>) -> Result<Vec<Signal>, StrategyError>;
}

impl<S: Strategy + ?Sized> Strategy for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn indicators(&self) -> Vec<IndicatorType> {
        (**self).indicators()
    }

    fn decide(&mut self, ctx: &StepContext<'_>) -> Result<Vec<Signal>, StrategyError> {
        (**self).decide(ctx)
    }
}

fn read(ctx: &StepContext<'_>, indicator: &IndicatorType) -> Result<Option<f64>, StrategyError> {
    match ctx.indicators.get(indicator) {
        Some(v) if !v.is_finite() => Err(StrategyError::new(format!(
            "{} is not finite at step {}",
            indicator, ctx.step
        ))),
        other => Ok(other),
    }
}

/// Signals that leave the book on `bullish` side: cover any short and go
/// long, or sell any long and optionally go short.
fn reverse_into(
    ctx: &StepContext<'_>,
    bullish: bool,
    fraction: f64,
    allow_short: bool,
) -> Vec<Signal> {
    let symbol = &ctx.candle.symbol;
    let position = ctx.portfolio.position(symbol);
    let mut signals = Vec::new();

    if bullish {
        match position {
            Some(p) if p.is_long() => return signals,
            Some(_) => signals.push(Signal::close(symbol.as_str())),
            None => {}
        }
        signals.push(Signal::open_long(symbol.as_str(), SignalSize::Fraction(fraction)));
    } else {
        match position {
            Some(p) if p.is_short() => return signals,
            Some(_) => signals.push(Signal::close(symbol.as_str())),
            None => {}
        }
        if allow_short {
            signals.push(Signal::open_short(symbol.as_str(), SignalSize::Fraction(fraction)));
        }
    }
    signals
}

/// Goes long when `fast` crosses above `slow` and exits (or reverses to
/// short) when it crosses below.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossoverStrategy {
    pub fast: IndicatorType,
    pub slow: IndicatorType,
    pub fraction: f64,
    pub allow_short: bool,
    #[serde(skip)]
    prev_diff: Option<f64>,
}

impl CrossoverStrategy {
    pub fn new(fast: IndicatorType, slow: IndicatorType, fraction: f64, allow_short: bool) -> Self {
        CrossoverStrategy {
            fast,
            slow,
            fraction,
            allow_short,
            prev_diff: None,
        }
    }
}

impl Strategy for CrossoverStrategy {
    fn name(&self) -> &str {
        "crossover"
    }

    fn indicators(&self) -> Vec<IndicatorType> {
        vec![self.fast.clone(), self.slow.clone()]
    }

    fn decide(&mut self, ctx: &StepContext<'_>) -> Result<Vec<Signal>, StrategyError> {
        let (Some(fast), Some(slow)) = (read(ctx, &self.fast)?, read(ctx, &self.slow)?) else {
            return Ok(Vec::new());
        };
        let diff = fast - slow;
        let prev = self.prev_diff.replace(diff);

        let signals = match prev {
            Some(p) if p <= 0.0 && diff > 0.0 => {
                reverse_into(ctx, true, self.fraction, self.allow_short)
            }
            Some(p) if p >= 0.0 && diff < 0.0 => {
                reverse_into(ctx, false, self.fraction, self.allow_short)
            }
            _ => Vec::new(),
        };
        Ok(signals)
    }
}

/// Buys when the indicator drops below `lower` and sells the position when
/// it rises above `upper` (RSI-style mean reversion).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdStrategy {
    pub indicator: IndicatorType,
    pub lower: f64,
    pub upper: f64,
    pub fraction: f64,
}

impl Strategy for ThresholdStrategy {
    fn name(&self) -> &str {
        "threshold"
    }

    fn indicators(&self) -> Vec<IndicatorType> {
        vec![self.indicator.clone()]
    }

    fn decide(&mut self, ctx: &StepContext<'_>) -> Result<Vec<Signal>, StrategyError> {
        let Some(value) = read(ctx, &self.indicator)? else {
            return Ok(Vec::new());
        };
        let symbol = ctx.candle.symbol.as_str();
        let holding = ctx.portfolio.position(symbol).is_some();

        let signals = if !holding && value < self.lower {
            vec![Signal::open_long(symbol, SignalSize::Fraction(self.fraction))]
        } else if holding && value > self.upper {
            vec![Signal::close(symbol)]
        } else {
            Vec::new()
        };
        Ok(signals)
    }
}

/// Follows the Parabolic SAR trend: long while the close is above the SAR,
/// flat or short while below. Acts only when the trend flips.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParabolicSarStrategy {
    pub indicator: IndicatorType,
    pub fraction: f64,
    pub allow_short: bool,
    #[serde(skip)]
    prev_bullish: Option<bool>,
}

impl ParabolicSarStrategy {
    pub fn new(acceleration: f64, maximum: f64, fraction: f64, allow_short: bool) -> Self {
        ParabolicSarStrategy {
            indicator: IndicatorType::psar(acceleration, maximum),
            fraction,
            allow_short,
            prev_bullish: None,
        }
    }
}

impl Strategy for ParabolicSarStrategy {
    fn name(&self) -> &str {
        "psar"
    }

    fn indicators(&self) -> Vec<IndicatorType> {
        vec![self.indicator.clone()]
    }

    fn decide(&mut self, ctx: &StepContext<'_>) -> Result<Vec<Signal>, StrategyError> {
        let Some(sar) = read(ctx, &self.indicator)? else {
            return Ok(Vec::new());
        };
        let bullish = ctx.candle.close > sar;
        let prev = self.prev_bullish.replace(bullish);

        if prev.is_some_and(|p| p != bullish) {
            Ok(reverse_into(ctx, bullish, self.fraction, self.allow_short))
        } else {
            Ok(Vec::new())
        }
    }
}

/// Strategies selectable from configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuiltinStrategy {
    Crossover(CrossoverStrategy),
    Threshold(ThresholdStrategy),
    #[serde(rename = "psar")]
    ParabolicSar(ParabolicSarStrategy),
}

impl Strategy for BuiltinStrategy {
    fn name(&self) -> &str {
        match self {
            BuiltinStrategy::Crossover(s) => s.name(),
            BuiltinStrategy::Threshold(s) => s.name(),
            BuiltinStrategy::ParabolicSar(s) => s.name(),
        }
    }

    fn indicators(&self) -> Vec<IndicatorType> {
        match self {
            BuiltinStrategy::Crossover(s) => s.indicators(),
            BuiltinStrategy::Threshold(s) => s.indicators(),
            BuiltinStrategy::ParabolicSar(s) => s.indicators(),
        }
    }

    fn decide(&mut self, ctx: &StepContext<'_>) -> Result<Vec<Signal>, StrategyError> {
        match self {
            BuiltinStrategy::Crossover(s) => s.decide(ctx),
            BuiltinStrategy::Threshold(s) => s.decide(ctx),
            BuiltinStrategy::ParabolicSar(s) => s.decide(ctx),
        }
    }
}
