//! Simultaneous bisection of every unsolved market.

use std::collections::HashMap;

use log::debug;

use super::bracket::{bracket_markets, Bracket};
use super::{ReturnCode, SolveParams};
use crate::calc::{CalculationGraph, World};
use crate::error::Result;
use crate::info::SolverInfoSet;
use crate::iteration::IterationLog;
use crate::options::BisectionOptions;

/// Brackets each unsolved market and bisects all of them together, one
/// calculation pass per iteration.
///
/// Slow but robust: given a valid bracket it cannot diverge, so it is the
/// usual fallback after the derivative methods, and the method of choice for
/// markets with kinked supply curves.
#[derive(Clone, Debug)]
pub struct BisectAll {
    options: BisectionOptions,
    brackets: HashMap<usize, Bracket>,
    iterations: IterationLog,
}

impl BisectAll {
    pub const NAME: &'static str = "BisectAll";

    pub fn new(options: BisectionOptions) -> Self {
        Self {
            options,
            brackets: HashMap::new(),
            iterations: IterationLog::new(),
        }
    }

    pub fn init(&mut self) {
        self.brackets.clear();
    }

    pub fn iterations(&self) -> &IterationLog {
        &self.iterations
    }

    /// Current bracket for the market at `index`, if one has been found.
    pub fn bracket(&self, index: usize) -> Option<&Bracket> {
        self.brackets.get(&index)
    }

    pub fn solve<G: CalculationGraph>(
        &mut self,
        params: &SolveParams,
        world: &mut World<G>,
        info_set: &mut SolverInfoSet,
    ) -> Result<ReturnCode> {
        self.iterations.start_method();
        info_set.update_solvable(world.markets());
        if info_set.all_solved() {
            return Ok(ReturnCode::OriginalState);
        }

        for iteration in 0..params.max_iterations {
            let unbracketed: Vec<usize> = info_set
                .unsolved()
                .map(|info| info.index())
                .filter(|index| !self.brackets.contains_key(index))
                .collect();
            if !unbracketed.is_empty() {
                let search =
                    bracket_markets(world, info_set, &unbracketed, &self.options, params)?;
                if let Some(index) = search.wrong_direction {
                    debug!(
                        "{} abandoned: {} cannot be bracketed",
                        Self::NAME,
                        world.markets().market(index).id()
                    );
                    return Ok(ReturnCode::FailureWrongDirection);
                }
                self.brackets.extend(search.brackets);
                info_set.update_solvable(world.markets());
                if info_set.all_solved() {
                    return Ok(ReturnCode::Success);
                }
                if search.exhausted {
                    debug!("{}: calculation budget spent while bracketing", Self::NAME);
                    return Ok(ReturnCode::FailureIterMaxReached);
                }
            }
            if !params.can_afford(world, 1) {
                debug!("{}: calculation budget spent", Self::NAME);
                return Ok(ReturnCode::FailureIterMaxReached);
            }

            let midpoints: Vec<(usize, f64)> = info_set
                .unsolved()
                .filter_map(|info| {
                    self.brackets
                        .get(&info.index())
                        .map(|bracket| (info.index(), bracket.midpoint()))
                })
                .collect();
            // The market may clamp the midpoint, so the bracket is updated at
            // the price actually set.
            let mut targets = Vec::with_capacity(midpoints.len());
            for (index, midpoint) in midpoints {
                if info_set.set_price(world.markets_mut(), index, midpoint) {
                    targets.push((index, world.markets().market(index).price()));
                }
            }
            if targets.is_empty() {
                debug!("{}: no unsolved market could be bracketed", Self::NAME);
                return Ok(ReturnCode::FailureIterMaxReached);
            }
            world.calc(params.period)?;

            for &(index, price) in &targets {
                let ed = world.markets().market(index).excess_demand();
                if let Some(bracket) = self.brackets.get_mut(&index) {
                    bracket.update(price, ed);
                }
            }

            info_set.update_solvable(world.markets());
            let max_red = info_set.max_relative_excess_demand(world.markets());
            self.iterations.add_iteration(Self::NAME, max_red);
            debug!(
                "{} iteration {iteration}: {} unsolved, max RED {max_red:.3e}",
                Self::NAME,
                info_set.unsolved_count()
            );
            if info_set.all_solved() {
                return Ok(ReturnCode::Success);
            }
            if !self.iterations.is_improving(self.options.improvement_window) {
                debug!("{} stalled at max RED {max_red:.3e}", Self::NAME);
                return Ok(ReturnCode::FailureIterMaxReached);
            }

            // Coupling with other markets can move a root outside its bracket.
            let collapsed: Vec<usize> = info_set
                .unsolved()
                .map(|info| info.index())
                .filter(|index| {
                    self.brackets
                        .get(index)
                        .is_some_and(|bracket| bracket.is_collapsed(self.options.min_bracket_width))
                })
                .collect();
            for index in collapsed {
                self.brackets.remove(&index);
            }
        }

        Ok(ReturnCode::FailureIterMaxReached)
    }
}
