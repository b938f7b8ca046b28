//! Performance metrics derived from an equity curve and trade ledger.
//!
//! Pure functions of their inputs. Ratios that have no meaningful value
//! for the run (no trades, zero volatility, no drawdown) report a
//! [`MetricValue`] sentinel rather than failing.

use serde::{Serialize, Serializer};
use std::fmt;

use super::portfolio::EquityPoint;
use super::position::Trade;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Value(f64),
    /// No meaningful value for this run. Serialized as `null`, shown as `N/A`.
    Undefined,
    /// Serialized as `"inf"`.
    Infinite,
}

impl MetricValue {
    /// Maps infinities to `Infinite` and NaN to `Undefined`.
    pub fn from_f64(v: f64) -> Self {
        if v.is_nan() {
            MetricValue::Undefined
        } else if v.is_infinite() {
            MetricValue::Infinite
        } else {
            MetricValue::Value(v)
        }
    }

    pub fn value(self) -> Option<f64> {
        match self {
            MetricValue::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_undefined(self) -> bool {
        self == MetricValue::Undefined
    }

    pub fn is_infinite(self) -> bool {
        self == MetricValue::Infinite
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Value(v) => match f.precision() {
                Some(p) => write!(f, "{:.*}", p, v),
                None => write!(f, "{}", v),
            },
            MetricValue::Undefined => f.write_str("N/A"),
            MetricValue::Infinite => f.write_str("inf"),
        }
    }
}

impl Serialize for MetricValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MetricValue::Value(v) => serializer.serialize_f64(*v),
            MetricValue::Undefined => serializer.serialize_none(),
            MetricValue::Infinite => serializer.serialize_str("inf"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub total_return: MetricValue,
    pub cagr: MetricValue,
    /// Most negative (equity - running peak) / running peak, in [-1, 0].
    pub max_drawdown: f64,
    /// Longest run of periods spent below a previous peak.
    pub max_drawdown_duration: usize,
    pub sharpe_ratio: MetricValue,
    pub sortino_ratio: MetricValue,
    pub calmar_ratio: MetricValue,
    pub annualized_volatility: MetricValue,
    pub total_trades: usize,
    pub trades_won: usize,
    pub trades_lost: usize,
    pub trades_breakeven: usize,
    pub win_rate: MetricValue,
    pub profit_factor: MetricValue,
    pub avg_win: MetricValue,
    pub avg_loss: MetricValue,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub expectancy: MetricValue,
    pub max_consecutive_wins: usize,
    pub max_consecutive_losses: usize,
    pub avg_trade_duration_secs: MetricValue,
    /// Fees attributed to closed trades.
    pub total_fees: f64,
    pub final_equity: MetricValue,
}

impl Metrics {
    pub fn compute(equity_curve: &[EquityPoint], trades: &[Trade], periods_per_year: f64) -> Self {
        let equity: Vec<f64> = equity_curve.iter().map(|p| p.total_equity).collect();

        let total_return = total_return(&equity);
        let cagr = cagr(&equity, total_return, periods_per_year);
        let (max_drawdown, max_drawdown_duration) = drawdown(&equity);

        let returns = period_returns(&equity);
        let sharpe_ratio = sharpe(&returns, periods_per_year);
        let sortino_ratio = sortino(&returns, periods_per_year);
        let calmar_ratio = match cagr {
            MetricValue::Value(c) if max_drawdown != 0.0 => {
                MetricValue::from_f64(c / max_drawdown.abs())
            }
            _ => MetricValue::Undefined,
        };
        let annualized_volatility = match population_stddev(&returns) {
            Some(sd) => MetricValue::Value(sd * periods_per_year.sqrt()),
            None => MetricValue::Undefined,
        };

        let stats = TradeStats::from_trades(trades);
        let final_equity = equity
            .last()
            .map_or(MetricValue::Undefined, |&e| MetricValue::Value(e));

        Metrics {
            total_return,
            cagr,
            max_drawdown,
            max_drawdown_duration,
            sharpe_ratio,
            sortino_ratio,
            calmar_ratio,
            annualized_volatility,
            total_trades: trades.len(),
            trades_won: stats.won,
            trades_lost: stats.lost,
            trades_breakeven: stats.breakeven,
            win_rate: stats.win_rate(),
            profit_factor: stats.profit_factor(),
            avg_win: ratio(stats.gross_win, stats.won),
            avg_loss: ratio(-stats.gross_loss, stats.lost),
            largest_win: stats.largest_win,
            largest_loss: stats.largest_loss,
            expectancy: ratio(stats.gross_win - stats.gross_loss, trades.len()),
            max_consecutive_wins: stats.max_consecutive_wins,
            max_consecutive_losses: stats.max_consecutive_losses,
            avg_trade_duration_secs: ratio(stats.total_duration_secs as f64, trades.len()),
            total_fees: stats.total_fees,
            final_equity,
        }
    }
}

fn ratio(total: f64, count: usize) -> MetricValue {
    if count == 0 {
        MetricValue::Undefined
    } else {
        MetricValue::Value(total / count as f64)
    }
}

fn total_return(equity: &[f64]) -> MetricValue {
    match (equity.first(), equity.last()) {
        (Some(&first), Some(&last)) if equity.len() >= 2 && first > 0.0 => {
            MetricValue::Value(last / first - 1.0)
        }
        _ => MetricValue::Undefined,
    }
}

fn cagr(equity: &[f64], total_return: MetricValue, periods_per_year: f64) -> MetricValue {
    let elapsed = equity.len().saturating_sub(1);
    if elapsed == 0 {
        return MetricValue::Value(0.0);
    }
    let Some(r) = total_return.value() else {
        return MetricValue::Undefined;
    };
    if 1.0 + r <= 0.0 {
        return MetricValue::Value(-1.0);
    }
    MetricValue::from_f64((1.0 + r).powf(periods_per_year / elapsed as f64) - 1.0)
}

fn drawdown(equity: &[f64]) -> (f64, usize) {
    let Some(&first) = equity.first() else {
        return (0.0, 0);
    };

    let mut peak = first;
    let mut max_dd = 0.0_f64;
    let mut current_duration = 0usize;
    let mut max_duration = 0usize;

    for &e in equity {
        if e >= peak {
            peak = e;
            current_duration = 0;
            continue;
        }
        current_duration += 1;
        max_duration = max_duration.max(current_duration);
        if peak > 0.0 {
            max_dd = max_dd.min((e - peak) / peak);
        }
    }

    (max_dd.max(-1.0), max_duration)
}

fn period_returns(equity: &[f64]) -> Vec<f64> {
    equity
        .windows(2)
        .map(|w| if w[0] > 0.0 { w[1] / w[0] - 1.0 } else { 0.0 })
        .collect()
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn population_stddev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let variance = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

fn sharpe(returns: &[f64], periods_per_year: f64) -> MetricValue {
    match (mean(returns), population_stddev(returns)) {
        (Some(m), Some(sd)) if sd > 0.0 => MetricValue::from_f64(m / sd * periods_per_year.sqrt()),
        _ => MetricValue::Undefined,
    }
}

fn sortino(returns: &[f64], periods_per_year: f64) -> MetricValue {
    let negative: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    match (mean(returns), population_stddev(&negative)) {
        (Some(m), Some(sd)) if sd > 0.0 => MetricValue::from_f64(m / sd * periods_per_year.sqrt()),
        _ => MetricValue::Undefined,
    }
}

#[derive(Debug, Default)]
struct TradeStats {
    won: usize,
    lost: usize,
    breakeven: usize,
    gross_win: f64,
    /// Absolute value of the summed losses.
    gross_loss: f64,
    largest_win: f64,
    largest_loss: f64,
    max_consecutive_wins: usize,
    max_consecutive_losses: usize,
    total_duration_secs: i64,
    total_fees: f64,
}

impl TradeStats {
    fn from_trades(trades: &[Trade]) -> Self {
        let mut stats = TradeStats::default();
        let mut win_streak = 0usize;
        let mut loss_streak = 0usize;

        for trade in trades {
            let pnl = trade.realized_pnl;
            if pnl > 0.0 {
                stats.won += 1;
                stats.gross_win += pnl;
                stats.largest_win = stats.largest_win.max(pnl);
                win_streak += 1;
                loss_streak = 0;
            } else if pnl < 0.0 {
                stats.lost += 1;
                stats.gross_loss += -pnl;
                stats.largest_loss = stats.largest_loss.min(pnl);
                loss_streak += 1;
                win_streak = 0;
            } else {
                stats.breakeven += 1;
                win_streak = 0;
                loss_streak = 0;
            }
            stats.max_consecutive_wins = stats.max_consecutive_wins.max(win_streak);
            stats.max_consecutive_losses = stats.max_consecutive_losses.max(loss_streak);
            stats.total_duration_secs += trade.duration_seconds();
            stats.total_fees += trade.fees;
        }
        stats
    }

    fn total(&self) -> usize {
        self.won + self.lost + self.breakeven
    }

    fn win_rate(&self) -> MetricValue {
        ratio(self.won as f64, self.total())
    }

    fn profit_factor(&self) -> MetricValue {
        if self.lost > 0 {
            MetricValue::from_f64(self.gross_win / self.gross_loss)
        } else if self.won > 0 {
            MetricValue::Infinite
        } else {
            MetricValue::Undefined
        }
    }
}
