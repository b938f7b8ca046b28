//! Parallel parameter sweeps.
//!
//! Every plan becomes an isolated run with its own strategy clone, indicator
//! provider and portfolio. Only the candle slice is shared, read-only.
//! Results come back in plan order whatever order the workers finish in.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use tracing::{debug, info};

use super::candle::{validate_candles, Candle};
use super::engine::{run_simulation, Simulation, SimulationResult};
use super::error::SimError;
use super::execution::ExecutionConfig;
use super::indicator::{IndicatorGraph, IndicatorProvider};
use super::strategy::Strategy;

#[derive(Debug, Clone, Serialize)]
pub struct SweepPlan<S> {
    pub label: String,
    pub strategy: S,
    pub initial_capital: f64,
    pub config: ExecutionConfig,
    pub periods_per_year: Option<f64>,
}

#[derive(Debug)]
pub struct SweepEntry {
    pub label: String,
    pub result: Result<SimulationResult, SimError>,
}

/// Indicator graph holding exactly what `strategy` declares.
pub fn indicator_graph_for<S: Strategy>(strategy: &S) -> Result<IndicatorGraph, SimError> {
    IndicatorGraph::with_indicators(&strategy.indicators())
}

/// Run every plan over `candles` on up to `parallelism` scoped threads.
///
/// A failing run is reported in its entry and does not stop the others. An
/// invalid candle feed fails the whole sweep before any run starts.
pub fn run_sweep<S, P, F>(
    candles: &[Candle],
    plans: &[SweepPlan<S>],
    parallelism: usize,
    provider_for: F,
) -> Result<Vec<SweepEntry>, SimError>
where
    S: Strategy + Clone + Sync,
    P: IndicatorProvider,
    F: Fn(&S) -> Result<P, SimError> + Sync,
{
    validate_candles(candles)?;
    let worker_count = parallelism.max(1).min(plans.len());
    info!(runs = plans.len(), workers = worker_count, "sweep started");

    if worker_count <= 1 {
        return Ok(plans
            .iter()
            .map(|plan| execute_plan(plan, candles, &provider_for))
            .collect());
    }

    let next_index = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel::<(usize, SweepEntry)>();

    let mut entries: Vec<(usize, SweepEntry)> = std::thread::scope(|scope| {
        for _ in 0..worker_count {
            let tx = tx.clone();
            let next_index_ref = &next_index;
            let provider_for = &provider_for;
            scope.spawn(move || loop {
                let idx = next_index_ref.fetch_add(1, Ordering::Relaxed);
                if idx >= plans.len() {
                    break;
                }
                let entry = execute_plan(&plans[idx], candles, provider_for);
                if tx.send((idx, entry)).is_err() {
                    break;
                }
            });
        }
        drop(tx);
        rx.iter().collect()
    });

    entries.sort_by_key(|(idx, _)| *idx);
    Ok(entries.into_iter().map(|(_, entry)| entry).collect())
}

fn execute_plan<S, P, F>(plan: &SweepPlan<S>, candles: &[Candle], provider_for: &F) -> SweepEntry
where
    S: Strategy + Clone,
    P: IndicatorProvider,
    F: Fn(&S) -> Result<P, SimError>,
{
    debug!(label = %plan.label, "sweep run started");
    let result = provider_for(&plan.strategy).and_then(|provider| {
        let mut sim = Simulation::new(
            plan.strategy.clone(),
            provider,
            plan.initial_capital,
            plan.config.clone(),
        )?;
        if let Some(ppy) = plan.periods_per_year {
            sim = sim.with_periods_per_year(ppy)?;
        }
        run_simulation(sim, candles)
    });
    SweepEntry {
        label: plan.label.clone(),
        result,
    }
}
