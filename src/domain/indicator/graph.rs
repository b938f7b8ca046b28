//! Dependency-aware indicator evaluation.
//!
//! Indicators are nodes in a DAG (MACD depends on two EMAs, the histogram
//! on the line and signal). Registration inserts dependencies first, so the
//! node list is already in topological order and shared nodes exist once.
//! Each symbol keeps its own memoized series; a snapshot only evaluates the
//! candles appended since the previous call.

use chrono::NaiveDateTime;
use std::collections::{BTreeMap, HashMap};
use tracing::trace;

use super::atr::AtrState;
use super::ema::EmaState;
use super::macd::{self, SignalState};
use super::psar::PsarState;
use super::rsi::RsiState;
use super::stddev::{sma_at, stddev_at};
use super::{IndicatorProvider, IndicatorSnapshot, IndicatorType};
use crate::domain::candle::Candle;
use crate::domain::error::SimError;

#[derive(Debug, Clone)]
struct Node {
    kind: IndicatorType,
    deps: Vec<usize>,
}

#[derive(Debug, Clone)]
enum NodeState {
    Window,
    Ema(EmaState),
    Rsi(RsiState),
    Atr(AtrState),
    MacdLine,
    MacdSignal(SignalState),
    MacdHistogram,
    Psar(PsarState),
}

impl NodeState {
    fn for_kind(kind: &IndicatorType) -> Self {
        match *kind {
            IndicatorType::Sma(_) | IndicatorType::Stddev(_) => NodeState::Window,
            IndicatorType::Ema(n) => NodeState::Ema(EmaState::new(n)),
            IndicatorType::Rsi(n) => NodeState::Rsi(RsiState::new(n)),
            IndicatorType::Atr(n) => NodeState::Atr(AtrState::new(n)),
            IndicatorType::Macd { .. } => NodeState::MacdLine,
            IndicatorType::MacdSignal { signal, .. } => {
                NodeState::MacdSignal(SignalState::new(signal))
            }
            IndicatorType::MacdHistogram { .. } => NodeState::MacdHistogram,
            IndicatorType::ParabolicSar {
                acceleration_x1000,
                maximum_x1000,
            } => NodeState::Psar(PsarState::new(
                acceleration_x1000 as f64 / 1000.0,
                maximum_x1000 as f64 / 1000.0,
            )),
        }
    }
}

/// Memoized series and recurrence state for one symbol.
#[derive(Debug, Clone)]
struct SymbolCache {
    last_timestamp: Option<NaiveDateTime>,
    states: Vec<NodeState>,
    series: Vec<Vec<Option<f64>>>,
}

impl SymbolCache {
    fn new(nodes: &[Node]) -> Self {
        SymbolCache {
            last_timestamp: None,
            states: nodes.iter().map(|n| NodeState::for_kind(&n.kind)).collect(),
            series: vec![Vec::new(); nodes.len()],
        }
    }

    fn seen(&self) -> usize {
        self.series.first().map_or(0, Vec::len)
    }

    /// True when `history` extends what this cache has already consumed.
    fn continues(&self, history: &[Candle]) -> bool {
        let seen = self.seen();
        if seen == 0 {
            return true;
        }
        history.len() >= seen && Some(history[seen - 1].timestamp) == self.last_timestamp
    }
}

#[derive(Debug, Clone, Default)]
pub struct IndicatorGraph {
    nodes: Vec<Node>,
    index: HashMap<IndicatorType, usize>,
    outputs: Vec<usize>,
    caches: BTreeMap<String, SymbolCache>,
    evaluations: u64,
}

impl IndicatorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_indicators(indicators: &[IndicatorType]) -> Result<Self, SimError> {
        let mut graph = Self::new();
        for indicator in indicators {
            graph.register(indicator.clone())?;
        }
        Ok(graph)
    }

    /// Add an indicator to the snapshot output, inserting its dependencies.
    /// Clears any memoized series.
    pub fn register(&mut self, indicator: IndicatorType) -> Result<(), SimError> {
        indicator
            .validate()
            .map_err(|reason| SimError::config_invalid("strategy", "indicators", reason))?;
        let idx = self.insert_node(indicator);
        if !self.outputs.contains(&idx) {
            self.outputs.push(idx);
        }
        self.caches.clear();
        Ok(())
    }

    fn insert_node(&mut self, kind: IndicatorType) -> usize {
        if let Some(&idx) = self.index.get(&kind) {
            return idx;
        }
        let deps = kind
            .dependencies()
            .into_iter()
            .map(|dep| self.insert_node(dep))
            .collect();
        let idx = self.nodes.len();
        self.index.insert(kind.clone(), idx);
        self.nodes.push(Node { kind, deps });
        idx
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Total node evaluations performed, across all symbols.
    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    /// Memoized values of `indicator` for `symbol`, one per consumed candle.
    pub fn series(&self, symbol: &str, indicator: &IndicatorType) -> Option<&[Option<f64>]> {
        let idx = *self.index.get(indicator)?;
        self.caches
            .get(symbol)
            .map(|cache| cache.series[idx].as_slice())
    }

    fn catch_up(&mut self, history: &[Candle]) -> Option<&SymbolCache> {
        let last = history.last()?;
        let nodes = &self.nodes;
        let cache = self
            .caches
            .entry(last.symbol.clone())
            .or_insert_with(|| SymbolCache::new(nodes));

        if !cache.continues(history) {
            trace!(symbol = %last.symbol, "indicator history diverged, recomputing");
            *cache = SymbolCache::new(nodes);
        }

        for i in cache.seen()..history.len() {
            let window = &history[..=i];
            for (j, node) in nodes.iter().enumerate() {
                let value = evaluate(node, &mut cache.states[j], &cache.series, window);
                cache.series[j].push(value);
                self.evaluations += 1;
            }
        }
        cache.last_timestamp = Some(last.timestamp);
        Some(cache)
    }
}

/// Value of `node` at the last candle of `window`. Dependencies have
/// already been extended to this index.
fn evaluate(
    node: &Node,
    state: &mut NodeState,
    series: &[Vec<Option<f64>>],
    window: &[Candle],
) -> Option<f64> {
    let i = window.len() - 1;
    let candle = &window[i];
    let dep = |k: usize| node.deps.get(k).and_then(|&d| series[d].get(i).copied().flatten());

    match (state, &node.kind) {
        (NodeState::Window, IndicatorType::Sma(n)) => sma_at(window, *n),
        (NodeState::Window, IndicatorType::Stddev(n)) => stddev_at(window, *n),
        (NodeState::Ema(ema), _) => ema.update(candle.close),
        (NodeState::Rsi(rsi), _) => rsi.update(candle.close),
        (NodeState::Atr(atr), _) => atr.update(candle),
        (NodeState::MacdLine, _) => macd::line(dep(0), dep(1)),
        (NodeState::MacdSignal(signal), _) => signal.update(dep(0)),
        (NodeState::MacdHistogram, _) => macd::histogram(dep(0), dep(1)),
        (NodeState::Psar(psar), _) => Some(psar.update(candle.high, candle.low)),
        (NodeState::Window, _) => None,
    }
}

impl IndicatorProvider for IndicatorGraph {
    fn snapshot(&mut self, history: &[Candle]) -> IndicatorSnapshot {
        let mut snapshot = IndicatorSnapshot::new();
        let outputs = self.outputs.clone();
        let names: Vec<String> = outputs
            .iter()
            .map(|&idx| self.nodes[idx].kind.to_string())
            .collect();

        if let Some(cache) = self.catch_up(history) {
            for (&idx, name) in outputs.iter().zip(names) {
                if let Some(Some(value)) = cache.series[idx].last() {
                    snapshot.insert(name, *value);
                }
            }
        }
        snapshot
    }
}
