//! Read-only results handed to whatever reports on a solve.

use serde::Serialize;

use crate::components::ReturnCode;
use crate::info::{MarketStatus, SolverInfoSet};
use crate::iteration::IterationInfo;
use crate::market::MarketId;
use crate::marketplace::MarketSet;

/// Whether a period cleared.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SolveStatus {
    Solved,
    /// Every configured component was exhausted; prices are best effort.
    Failed,
}

/// One invocation of a solver component.
#[derive(Clone, Debug, Serialize)]
pub struct ComponentRun {
    /// Pass through the component sequence, starting at zero.
    pub pass: usize,
    pub method: &'static str,
    pub code: ReturnCode,
    /// Calculation passes the invocation used.
    pub calcs: u64,
    /// Unsolved markets left afterwards.
    pub unsolved: usize,
    pub iterations: Vec<IterationInfo>,
}

/// Final state of one market.
#[derive(Clone, Debug, Serialize)]
pub struct MarketSnapshot {
    pub id: MarketId,
    pub status: MarketStatus,
    pub price: f64,
    pub supply: f64,
    pub demand: f64,
}

/// Outcome of solving one period.
#[derive(Clone, Debug, Serialize)]
pub struct PeriodReport {
    pub period: usize,
    pub status: SolveStatus,
    /// Calculation passes used by the period.
    pub calcs: u64,
    /// Worst absolute relative excess demand over the solvable markets.
    pub worst_red: f64,
    pub runs: Vec<ComponentRun>,
    pub markets: Vec<MarketSnapshot>,
}

impl PeriodReport {
    pub(crate) fn snapshot(markets: &MarketSet, info_set: &SolverInfoSet) -> Vec<MarketSnapshot> {
        markets
            .iter()
            .enumerate()
            .map(|(index, market)| MarketSnapshot {
                id: market.id().clone(),
                status: info_set.status(index),
                price: market.price(),
                supply: market.supply(),
                demand: market.demand(),
            })
            .collect()
    }

    pub fn is_solved(&self) -> bool {
        self.status == SolveStatus::Solved
    }

    /// Snapshot of the named market, if it exists.
    pub fn market(&self, id: &MarketId) -> Option<&MarketSnapshot> {
        self.markets.iter().find(|snapshot| &snapshot.id == id)
    }

    /// Return codes of every component run, in order.
    pub fn codes(&self) -> Vec<ReturnCode> {
        self.runs.iter().map(|run| run.code).collect()
    }
}
