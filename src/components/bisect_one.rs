//! Brute-force sweep that bisects the worst market on its own.

use log::debug;

use super::bracket::{bracket_markets, Bracket};
use super::{ReturnCode, SolveParams};
use crate::calc::{CalculationGraph, World};
use crate::error::Result;
use crate::info::{MarketStatus, SolverInfoSet};
use crate::iteration::IterationLog;
use crate::options::BisectionOptions;

/// Picks the unsolved market with the largest relative excess demand, brackets
/// and bisects it while every other price stays put, then moves on to the next
/// worst. Useful for shaking loose a single stubborn market.
#[derive(Clone, Debug)]
pub struct BisectOne {
    options: BisectionOptions,
    iterations: IterationLog,
}

impl BisectOne {
    pub const NAME: &'static str = "BisectOne";

    pub fn new(options: BisectionOptions) -> Self {
        Self {
            options,
            iterations: IterationLog::new(),
        }
    }

    pub fn init(&mut self) {}

    pub fn iterations(&self) -> &IterationLog {
        &self.iterations
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

        let mut iteration = 0;
        while iteration < params.max_iterations {
            let Some(target) = info_set.worst_unsolved(world.markets()) else {
                return Ok(ReturnCode::Success);
            };

            let search = bracket_markets(world, info_set, &[target], &self.options, params)?;
            if search.wrong_direction.is_some() {
                return Ok(ReturnCode::FailureWrongDirection);
            }
            info_set.update_solvable(world.markets());
            if search.exhausted {
                debug!("{}: calculation budget spent while bracketing", Self::NAME);
                return Ok(ReturnCode::FailureIterMaxReached);
            }
            let Some(mut bracket) = search.brackets.first().map(|(_, bracket)| *bracket) else {
                if info_set.all_solved() {
                    return Ok(ReturnCode::Success);
                }
                debug!(
                    "{}: could not bracket {}",
                    Self::NAME,
                    world.markets().market(target).id()
                );
                return Ok(ReturnCode::FailureIterMaxReached);
            };

            let progressing =
                self.bisect(&mut bracket, target, &mut iteration, params, world, info_set)?;
            if info_set.all_solved() {
                return Ok(ReturnCode::Success);
            }
            if !progressing {
                return Ok(ReturnCode::FailureIterMaxReached);
            }
        }

        Ok(ReturnCode::FailureIterMaxReached)
    }

    /// Bisects `target` alone. Returns `false` when its imbalance stalled or
    /// the calculation budget ran out.
    fn bisect<G: CalculationGraph>(
        &mut self,
        bracket: &mut Bracket,
        target: usize,
        iteration: &mut usize,
        params: &SolveParams,
        world: &mut World<G>,
        info_set: &mut SolverInfoSet,
    ) -> Result<bool> {
        let mut trail = IterationLog::new();
        let mut progressing = true;
        for _ in 0..self.options.max_single_market_iterations {
            if *iteration >= params.max_iterations {
                break;
            }
            if !params.can_afford(world, 1) {
                debug!("{}: calculation budget spent", Self::NAME);
                progressing = false;
                break;
            }
            if !info_set.set_price(world.markets_mut(), target, bracket.midpoint()) {
                break;
            }
            let midpoint = world.markets().market(target).price();
            world.calc(params.period)?;
            *iteration += 1;

            let market = world.markets().market(target);
            bracket.update(midpoint, market.excess_demand());
            trail.add_iteration(Self::NAME, market.relative_excess_demand(info_set.ed_floor()));
            info_set.update_solvable(world.markets());
            let max_red = info_set.max_relative_excess_demand(world.markets());
            self.iterations.add_iteration(Self::NAME, max_red);

            if info_set.status(target) != MarketStatus::Unsolved
                || bracket.is_collapsed(self.options.min_bracket_width)
            {
                break;
            }
            if !trail.is_improving(self.options.improvement_window) {
                debug!("{}: {} stalled", Self::NAME, world.markets().market(target).id());
                progressing = false;
                break;
            }
        }
        debug!(
            "{}: {} left with RED {:.3e}",
            Self::NAME,
            world.markets().market(target).id(),
            world
                .markets()
                .market(target)
                .relative_excess_demand(info_set.ed_floor())
        );
        Ok(progressing)
    }
}
