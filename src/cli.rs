//! CLI definition and dispatch.

use clap::{Parser, Subcommand, ValueEnum};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::json_report_adapter::JsonReportAdapter;
use crate::domain::config_validation::{load_run_config, RunConfig};
use crate::domain::engine::{run_simulation, Simulation, SimulationResult};
use crate::domain::error::SimError;
use crate::domain::indicator::IndicatorGraph;
use crate::domain::metrics::MetricValue;
use crate::domain::strategy::Strategy;
use crate::ports::data_port::DataPort;
use crate::ports::report_port::ReportPort;

#[derive(Parser, Debug)]
#[command(name = "tradesim", about = "Deterministic strategy backtesting simulator")]
pub struct Cli {
    /// Default tracing filter; `TRADESIM_LOG` takes precedence.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay a candle file through the configured strategy
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// CSV file, or a directory of `<SYMBOL>_<interval>.csv` files
        #[arg(long)]
        candles: PathBuf,
        /// Write the full result as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check a configuration file without running anything
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

/// Install the global tracing subscriber. Logs go to stderr.
pub fn init_tracing(log_level: &str, log_format: LogFormat) -> Result<(), String> {
    let filter = std::env::var("TRADESIM_LOG").unwrap_or_else(|_| log_level.to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_new(filter)
        .map_err(|err| format!("invalid log filter: {err}"))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);
    let installed = match log_format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    installed.map_err(|err| format!("failed to install tracing subscriber: {err}"))
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest {
            config,
            candles,
            output,
        } => run_backtest(&config, &candles, output.as_deref()),
        Command::Validate { config } => run_validate(&config),
    }
}

fn fail(err: SimError) -> ExitCode {
    eprintln!("error: {err}");
    (&err).into()
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::load(path).map_err(fail)
}

fn run_backtest(config_path: &Path, candles_path: &Path, output_path: Option<&Path>) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    let run_config = match load_run_config(&adapter) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };

    let data = CsvAdapter::new(candles_path.to_path_buf());
    run_backtest_pipeline(&data, &run_config, output_path)
}

/// Fetch candles, run one simulation, print the summary and optionally
/// write the JSON result.
pub fn run_backtest_pipeline(
    data_port: &dyn DataPort,
    run_config: &RunConfig,
    output_path: Option<&Path>,
) -> ExitCode {
    match execute(data_port, run_config) {
        Ok(result) => {
            eprint!("{}", format_summary(&result));
            if let Some(path) = output_path {
                if let Err(e) = JsonReportAdapter::new().write(&result, path) {
                    return fail(e);
                }
                eprintln!("\nResult written to: {}", path.display());
            }
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}

/// Load the feed and run the configured strategy over it.
pub fn execute(data_port: &dyn DataPort, run_config: &RunConfig) -> Result<SimulationResult, SimError> {
    let backtest = &run_config.backtest;
    let candles = data_port.fetch_candles(&backtest.symbol, backtest.interval)?;
    eprintln!(
        "Running {} on {} {}: {} candles",
        run_config.strategy.name(),
        backtest.symbol,
        backtest.interval,
        candles.len()
    );

    let provider = IndicatorGraph::with_indicators(&run_config.strategy.indicators())?;
    let mut sim = Simulation::new(
        run_config.strategy.clone(),
        provider,
        backtest.initial_capital,
        run_config.execution.clone(),
    )?;
    if let Some(ppy) = backtest.periods_per_year {
        sim = sim.with_periods_per_year(ppy)?;
    }
    run_simulation(sim, &candles)
}

fn pct(value: MetricValue) -> String {
    match value {
        MetricValue::Value(v) => format!("{:.2}%", v * 100.0),
        other => other.to_string(),
    }
}

/// Console summary of a finished run.
pub fn format_summary(result: &SimulationResult) -> String {
    let m = &result.metrics;
    let mut out = String::new();
    let _ = writeln!(out, "\n=== Results: {} on {} ===", result.strategy, result.symbol);
    let _ = writeln!(out, "Steps:            {}", result.steps_processed);
    let _ = writeln!(out, "Initial Capital:  {:.2}", result.initial_capital);
    let _ = writeln!(out, "Final Equity:     {:.2}", result.final_portfolio.total_equity);
    let _ = writeln!(out, "Total Return:     {}", pct(m.total_return));
    let _ = writeln!(out, "CAGR:             {}", pct(m.cagr));
    let _ = writeln!(out, "Volatility:       {}", pct(m.annualized_volatility));
    let _ = writeln!(out, "Sharpe Ratio:     {:.2}", m.sharpe_ratio);
    let _ = writeln!(out, "Sortino Ratio:    {:.2}", m.sortino_ratio);
    let _ = writeln!(out, "Calmar Ratio:     {:.2}", m.calmar_ratio);
    let _ = writeln!(
        out,
        "Max Drawdown:     {:.2}% ({} steps)",
        m.max_drawdown * 100.0,
        m.max_drawdown_duration
    );
    let _ = writeln!(
        out,
        "Total Trades:     {} ({} won, {} lost, {} flat)",
        m.total_trades, m.trades_won, m.trades_lost, m.trades_breakeven
    );
    let _ = writeln!(out, "Win Rate:         {}", pct(m.win_rate));
    let _ = writeln!(out, "Profit Factor:    {:.2}", m.profit_factor);
    let _ = writeln!(out, "Expectancy:       {:.2}", m.expectancy);
    let _ = writeln!(out, "Total Fees:       {:.2}", m.total_fees);
    if !result.skipped_signals.is_empty() {
        let _ = writeln!(out, "Skipped Signals:  {}", result.skipped_signals.len());
    }
    out
}

fn run_validate(config_path: &Path) -> ExitCode {
    eprintln!("Validating config: {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    let run_config = match load_run_config(&adapter) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };
    if let Err(e) = IndicatorGraph::with_indicators(&run_config.strategy.indicators()) {
        return fail(e);
    }

    let backtest = &run_config.backtest;
    let execution = &run_config.execution;
    eprintln!("\nBacktest:");
    eprintln!("  symbol:          {}", backtest.symbol);
    eprintln!("  interval:        {}", backtest.interval);
    eprintln!("  initial_capital: {:.2}", backtest.initial_capital);
    eprintln!(
        "  periods/year:    {}",
        backtest
            .periods_per_year
            .unwrap_or_else(|| backtest.interval.periods_per_year())
    );

    eprintln!("\nExecution:");
    eprintln!(
        "  commission:      {} {}",
        execution.commission_model, execution.commission_rate
    );
    eprintln!(
        "  slippage:        {} {}",
        execution.slippage_model, execution.slippage_rate
    );
    eprintln!("  reference_price: {}", execution.reference_price);
    eprintln!("  force_close:     {}", execution.force_close_at_end);
    let limits = [
        ("max_position:    ", execution.max_position_size),
        ("stop_loss_pct:   ", execution.stop_loss_pct),
        ("take_profit_pct: ", execution.take_profit_pct),
        ("max_drawdown_pct:", execution.max_drawdown_pct),
    ];
    for (label, value) in limits {
        if let Some(value) = value {
            eprintln!("  {} {}", label, value);
        }
    }

    eprintln!("\nStrategy: {}", run_config.strategy.name());
    for indicator in run_config.strategy.indicators() {
        eprintln!("  {}", indicator);
    }

    eprintln!("\nConfiguration is valid.");
    ExitCode::SUCCESS
}
