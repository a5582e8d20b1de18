//! The calculation contract between the solver and the model it clears.
//!
//! A [`CalculationGraph`] turns the prices currently held in a [`MarketSet`]
//! into supply and demand for every market. The solver treats it as an
//! expensive, blocking black box; [`World`] is the only call site, so the
//! [`CalcCounter`] it maintains sees every pass.

use std::collections::HashMap;

use log::trace;

use crate::error::{Result, SolveError};
use crate::marketplace::{MarketRef, MarketSet};

/// Anything that can compute supply and demand from market prices.
///
/// Implementations must be pure in the prices: two calls with the same prices
/// and period must produce the same flows.
pub trait CalculationGraph {
    /// Adds the supply and demand implied by the prices in `prices` to `flows`.
    fn calc(&self, period: usize, prices: &MarketSet, flows: &mut Flows) -> Result<()>;
}

impl<F> CalculationGraph for F
where
    F: Fn(usize, &MarketSet, &mut Flows) -> Result<()>,
{
    fn calc(&self, period: usize, prices: &MarketSet, flows: &mut Flows) -> Result<()> {
        self(period, prices, flows)
    }
}

/// Supply and demand accumulated over one calculation pass, indexed like the [`MarketSet`].
#[derive(Clone, Debug, PartialEq)]
pub struct Flows {
    supply: Vec<f64>,
    demand: Vec<f64>,
}

impl Flows {
    pub fn zeros(len: usize) -> Self {
        Self {
            supply: vec![0.0; len],
            demand: vec![0.0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.supply.len()
    }

    pub fn is_empty(&self) -> bool {
        self.supply.is_empty()
    }

    pub fn add_supply(&mut self, market: &MarketRef, quantity: f64) {
        self.supply[market.index()] += quantity;
    }

    pub fn add_demand(&mut self, market: &MarketRef, quantity: f64) {
        self.demand[market.index()] += quantity;
    }

    pub fn supply(&self, index: usize) -> f64 {
        self.supply[index]
    }

    pub fn demand(&self, index: usize) -> f64 {
        self.demand[index]
    }

    /// Adds another pass's flows into this one.
    pub fn merge(&mut self, other: &Flows) {
        for (total, value) in self.supply.iter_mut().zip(&other.supply) {
            *total += value;
        }
        for (total, value) in self.demand.iter_mut().zip(&other.demand) {
            *total += value;
        }
    }

    fn check_finite(&self, markets: &MarketSet) -> Result<()> {
        for (index, market) in markets.iter().enumerate() {
            let quantity = if !self.supply[index].is_finite() {
                "supply"
            } else if !self.demand[index].is_finite() {
                "demand"
            } else {
                continue;
            };
            return Err(SolveError::NonFiniteFlow {
                market: market.id().clone(),
                quantity,
            });
        }
        Ok(())
    }
}

/// Counts full calculation passes, in total and per solver method.
#[derive(Clone, Debug, Default)]
pub struct CalcCounter {
    total: u64,
    method: Option<String>,
    per_method: HashMap<String, u64>,
}

impl CalcCounter {
    /// Total passes since the counter was created.
    pub fn count(&self) -> u64 {
        self.total
    }

    /// Passes attributed to the named method.
    pub fn method_count(&self, name: &str) -> u64 {
        self.per_method.get(name).copied().unwrap_or(0)
    }

    /// Attributes subsequent passes to `name`.
    pub fn start_method(&mut self, name: &str) {
        self.method = Some(name.to_string());
    }

    fn increment(&mut self) {
        self.total += 1;
        if let Some(method) = &self.method {
            *self.per_method.entry(method.clone()).or_insert(0) += 1;
        }
    }
}

/// Markets plus the graph that computes their flows.
///
/// All price changes made by solver components go through here, and
/// [`World::calc`] is the single place the graph is invoked.
#[derive(Debug)]
pub struct World<G> {
    markets: MarketSet,
    graph: G,
    counter: CalcCounter,
}

impl<G: CalculationGraph> World<G> {
    pub fn new(markets: MarketSet, graph: G) -> Self {
        Self {
            markets,
            graph,
            counter: CalcCounter::default(),
        }
    }

    pub fn markets(&self) -> &MarketSet {
        &self.markets
    }

    pub fn markets_mut(&mut self) -> &mut MarketSet {
        &mut self.markets
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    pub fn counter(&self) -> &CalcCounter {
        &self.counter
    }

    pub fn calc_count(&self) -> u64 {
        self.counter.count()
    }

    pub(crate) fn start_method(&mut self, name: &str) {
        self.counter.start_method(name);
    }

    /// Runs one full pass of the graph and stores the resulting flows.
    ///
    /// A pass that yields any non-finite quantity is rejected and the markets
    /// keep their previous supply and demand.
    pub fn calc(&mut self, period: usize) -> Result<()> {
        let mut flows = Flows::zeros(self.markets.len());
        self.graph.calc(period, &self.markets, &mut flows)?;
        self.counter.increment();
        flows.check_finite(&self.markets)?;

        for index in 0..self.markets.len() {
            self.markets
                .market_mut(index)
                .set_flows(flows.supply(index), flows.demand(index));
        }
        trace!("calc pass {} for period {period}", self.counter.count());
        Ok(())
    }

    /// Consumes the world, returning its markets and graph.
    pub fn into_parts(self) -> (MarketSet, G) {
        (self.markets, self.graph)
    }
}
