//! Per-period solving status for every market.

use nalgebra::DVector;
use serde::Serialize;

use crate::error::{Result, SolveError};
use crate::marketplace::MarketSet;

/// Where a market stands in the current solve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketStatus {
    Unsolved,
    Solved,
    /// Price is set by policy; no component may touch it.
    FixedOutsideSolver,
}

/// Status of one market within a [`SolverInfoSet`].
#[derive(Clone, Debug)]
pub struct SolverInfo {
    index: usize,
    status: MarketStatus,
}

impl SolverInfo {
    /// Position of the market in the [`MarketSet`].
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn status(&self) -> MarketStatus {
        self.status
    }
}

/// Partition of the markets into unsolved, solved and fixed, rebuilt every period.
#[derive(Clone, Debug)]
pub struct SolverInfoSet {
    infos: Vec<SolverInfo>,
    tolerance: f64,
    ed_floor: f64,
}

impl SolverInfoSet {
    /// Builds the set with every solvable market marked unsolved.
    ///
    /// Call [`SolverInfoSet::update_solvable`] after a calculation pass to
    /// sort out which are already cleared.
    pub fn new(markets: &MarketSet, tolerance: f64, ed_floor: f64) -> Self {
        let infos = markets
            .iter()
            .enumerate()
            .map(|(index, market)| SolverInfo {
                index,
                status: if market.is_solvable() {
                    MarketStatus::Unsolved
                } else {
                    MarketStatus::FixedOutsideSolver
                },
            })
            .collect();
        Self {
            infos,
            tolerance,
            ed_floor,
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn ed_floor(&self) -> f64 {
        self.ed_floor
    }

    pub fn infos(&self) -> &[SolverInfo] {
        &self.infos
    }

    pub fn status(&self, index: usize) -> MarketStatus {
        self.infos[index].status
    }

    /// Re-partitions solvable markets against their current supply and demand.
    ///
    /// Returns the number of markets that were solved and are now unsolved again.
    pub fn update_solvable(&mut self, markets: &MarketSet) -> usize {
        let mut reopened = 0;
        for info in &mut self.infos {
            if info.status == MarketStatus::FixedOutsideSolver {
                continue;
            }
            let solved = markets
                .market(info.index)
                .is_solved(self.tolerance, self.ed_floor);
            if !solved && info.status == MarketStatus::Solved {
                reopened += 1;
            }
            info.status = if solved {
                MarketStatus::Solved
            } else {
                MarketStatus::Unsolved
            };
        }
        reopened
    }

    pub fn all_solved(&self) -> bool {
        self.unsolved().next().is_none()
    }

    pub fn unsolved(&self) -> impl Iterator<Item = &SolverInfo> {
        self.infos
            .iter()
            .filter(|info| info.status == MarketStatus::Unsolved)
    }

    pub fn unsolved_count(&self) -> usize {
        self.unsolved().count()
    }

    /// Market positions of the unsolved markets, in market order.
    pub fn unsolved_indices(&self) -> Vec<usize> {
        self.unsolved().map(SolverInfo::index).collect()
    }

    /// Number of markets the solver is responsible for.
    pub fn solvable_count(&self) -> usize {
        self.infos
            .iter()
            .filter(|info| info.status != MarketStatus::FixedOutsideSolver)
            .count()
    }

    /// Prices of the unsolved markets.
    pub fn price_vector(&self, markets: &MarketSet) -> DVector<f64> {
        let prices: Vec<f64> = self
            .unsolved()
            .map(|info| markets.market(info.index).price())
            .collect();
        DVector::from_vec(prices)
    }

    /// Excess demand of the unsolved markets.
    pub fn excess_demand_vector(&self, markets: &MarketSet) -> DVector<f64> {
        let eds: Vec<f64> = self
            .unsolved()
            .map(|info| markets.market(info.index).excess_demand())
            .collect();
        DVector::from_vec(eds)
    }

    /// Moves every unsolved market to the corresponding entry of `prices`.
    pub fn set_price_vector(&self, markets: &mut MarketSet, prices: &DVector<f64>) -> Result<()> {
        let indices = self.unsolved_indices();
        if indices.len() != prices.len() {
            return Err(SolveError::dimension_mismatch(
                "unsolved price vector",
                indices.len(),
                prices.len(),
            ));
        }
        if prices.iter().any(|price| !price.is_finite()) {
            return Err(SolveError::NumericalError {
                context: "proposed price vector",
            });
        }
        for (index, price) in indices.into_iter().zip(prices.iter()) {
            markets.market_mut(index).set_price(*price);
        }
        Ok(())
    }

    /// Sets one unsolved market's price. Markets in any other state are left alone.
    pub fn set_price(&self, markets: &mut MarketSet, index: usize, price: f64) -> bool {
        if self.infos[index].status != MarketStatus::Unsolved || !price.is_finite() {
            return false;
        }
        markets.market_mut(index).set_price(price);
        true
    }

    /// Worst absolute relative excess demand over the solvable markets and where it occurs.
    pub fn worst_market(&self, markets: &MarketSet) -> Option<(usize, f64)> {
        self.infos
            .iter()
            .filter(|info| info.status != MarketStatus::FixedOutsideSolver)
            .map(|info| {
                let red = markets.market(info.index).relative_excess_demand(self.ed_floor);
                (info.index, red.abs())
            })
            .fold(None, |worst, candidate| match worst {
                Some((_, red)) if red >= candidate.1 => worst,
                _ => Some(candidate),
            })
    }

    /// Worst unsolved market by absolute relative excess demand.
    pub fn worst_unsolved(&self, markets: &MarketSet) -> Option<usize> {
        self.unsolved()
            .map(|info| {
                let red = markets.market(info.index).relative_excess_demand(self.ed_floor);
                (info.index, red.abs())
            })
            .fold(None, |worst: Option<(usize, f64)>, candidate| match worst {
                Some((_, red)) if red >= candidate.1 => worst,
                _ => Some(candidate),
            })
            .map(|(index, _)| index)
    }

    pub fn max_relative_excess_demand(&self, markets: &MarketSet) -> f64 {
        self.worst_market(markets).map_or(0.0, |(_, red)| red)
    }
}
