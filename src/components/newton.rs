//! Newton-Raphson on a finite-difference Jacobian of excess demand.

use log::debug;
use nalgebra::{DMatrix, DVector};

use super::{ReturnCode, SolveParams};
use crate::calc::{CalculationGraph, World};
use crate::error::Result;
use crate::info::SolverInfoSet;
use crate::iteration::IterationLog;
use crate::marketplace::MarketSet;
use crate::options::NewtonOptions;

/// Coordinates in which prices are stepped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepSpace {
    /// Step prices directly.
    Linear,
    /// Step `ln p` for strictly positive, non-negative markets; other markets step linearly.
    Log,
}

/// Simultaneous price update for every unsolved market from `J Δx = −ED`.
///
/// Each iteration costs one calculation pass per unsolved market to build the
/// Jacobian (cross-market terms included) plus one to evaluate the step.
#[derive(Clone, Debug)]
pub struct NewtonRaphson {
    space: StepSpace,
    options: NewtonOptions,
    iterations: IterationLog,
}

#[derive(Clone, Copy, Debug)]
enum Coordinate {
    Linear,
    Log,
}

impl NewtonRaphson {
    pub const LINEAR_NAME: &'static str = "NewtonRaphson";
    pub const LOG_NAME: &'static str = "LogNewtonRaphson";

    pub fn new(space: StepSpace, options: NewtonOptions) -> Self {
        Self {
            space,
            options,
            iterations: IterationLog::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self.space {
            StepSpace::Linear => Self::LINEAR_NAME,
            StepSpace::Log => Self::LOG_NAME,
        }
    }

    pub fn space(&self) -> StepSpace {
        self.space
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
        let name = self.name();
        self.iterations.start_method();
        info_set.update_solvable(world.markets());
        if info_set.all_solved() {
            return Ok(ReturnCode::OriginalState);
        }

        let mut size = info_set.unsolved_count();
        let mut last_red = info_set.max_relative_excess_demand(world.markets());
        let mut worse_streak = 0;

        for iteration in 0..params.max_iterations {
            let active = info_set.unsolved_indices();
            if active.len() > size {
                debug!(
                    "{name}: unsolved set grew from {size} to {} markets",
                    active.len()
                );
                return Ok(ReturnCode::FailureSolutionSizeChanged);
            }
            size = active.len();
            if !params.can_afford(world, size as u64 + 1) {
                debug!("{name}: calculation budget spent");
                return Ok(ReturnCode::FailureIterMaxReached);
            }

            let prices = info_set.price_vector(world.markets());
            let ed = info_set.excess_demand_vector(world.markets());
            let coordinates = self.coordinates(world.markets(), &active);

            let jacobian =
                self.jacobian(world, info_set, &active, &coordinates, &ed, params.period)?;
            let tolerance = self.options.singular_tolerance;
            let Some(step) = jacobian.and_then(|j| newton_step(&j, &ed, tolerance)) else {
                debug!("{name}: Jacobian over {size} markets is singular");
                // Perturbations left the flows out of step with the prices.
                world.calc(params.period)?;
                return Ok(ReturnCode::FailureSingularMatrix);
            };

            let proposed = self.damped_prices(&prices, &step, &coordinates);
            info_set.set_price_vector(world.markets_mut(), &proposed)?;
            world.calc(params.period)?;

            info_set.update_solvable(world.markets());
            let max_red = info_set.max_relative_excess_demand(world.markets());
            self.iterations.add_iteration(name, max_red);
            debug!(
                "{name} iteration {iteration}: {} unsolved, max RED {max_red:.3e}",
                info_set.unsolved_count()
            );
            if info_set.all_solved() {
                return Ok(ReturnCode::Success);
            }

            if max_red > last_red {
                worse_streak += 1;
                if worse_streak >= 2 {
                    return Ok(ReturnCode::FailureWrongDirection);
                }
            } else {
                worse_streak = 0;
            }
            last_red = max_red;

            if !self.iterations.is_improving(self.options.improvement_window) {
                debug!("{name}: stalled at max RED {max_red:.3e}");
                return Ok(ReturnCode::FailureIterMaxReached);
            }
        }

        Ok(ReturnCode::FailureIterMaxReached)
    }

    fn coordinates(&self, markets: &MarketSet, active: &[usize]) -> Vec<Coordinate> {
        active
            .iter()
            .map(|&index| {
                let market = markets.market(index);
                match self.space {
                    StepSpace::Log if !market.allows_negative_price() && market.price() > 0.0 => {
                        Coordinate::Log
                    }
                    _ => Coordinate::Linear,
                }
            })
            .collect()
    }

    /// Finite-difference derivatives of excess demand with respect to each
    /// active market's coordinate. Prices are restored afterwards but flows
    /// are left at the last perturbation.
    ///
    /// Returns `None` if any derivative is non-finite.
    fn jacobian<G: CalculationGraph>(
        &self,
        world: &mut World<G>,
        info_set: &SolverInfoSet,
        active: &[usize],
        coordinates: &[Coordinate],
        base_ed: &DVector<f64>,
        period: usize,
    ) -> Result<Option<DMatrix<f64>>> {
        let n = active.len();
        let delta = self.options.derivative_delta;
        let mut jacobian = DMatrix::zeros(n, n);

        for (column, (&index, coordinate)) in active.iter().zip(coordinates).enumerate() {
            let price = world.markets().market(index).price();
            let trial = match coordinate {
                Coordinate::Linear => price + delta * price.abs().max(1.0),
                Coordinate::Log => price * delta.exp(),
            };
            info_set.set_price(world.markets_mut(), index, trial);
            let realized = world.markets().market(index).price();
            let change = match coordinate {
                Coordinate::Linear => realized - price,
                Coordinate::Log => (realized / price).ln(),
            };

            world.calc(period)?;
            for (row, &affected) in active.iter().enumerate() {
                let ed = world.markets().market(affected).excess_demand();
                jacobian[(row, column)] = (ed - base_ed[row]) / change;
            }
            info_set.set_price(world.markets_mut(), index, price);
        }

        Ok(jacobian.iter().all(|value| value.is_finite()).then_some(jacobian))
    }

    fn damped_prices(
        &self,
        prices: &DVector<f64>,
        step: &DVector<f64>,
        coordinates: &[Coordinate],
    ) -> DVector<f64> {
        let max_step = self.options.max_relative_step;
        let log_cap = max_step.ln_1p();
        let largest = step
            .iter()
            .zip(prices.iter())
            .zip(coordinates)
            .map(|((dx, price), coordinate)| match coordinate {
                Coordinate::Linear => dx.abs() / price.abs().max(self.options.step_price_floor),
                Coordinate::Log => dx.abs() / log_cap * max_step,
            })
            .fold(0.0, f64::max);
        let factor = if largest > max_step {
            max_step / largest
        } else {
            1.0
        };

        DVector::from_iterator(
            prices.len(),
            step.iter()
                .zip(prices.iter())
                .zip(coordinates)
                .map(|((dx, price), coordinate)| match coordinate {
                    Coordinate::Linear => price + factor * dx,
                    Coordinate::Log => price * (factor * dx).exp(),
                }),
        )
    }
}

/// Solves `J Δx = −ED`, refusing ill-conditioned or non-finite systems.
fn newton_step(
    jacobian: &DMatrix<f64>,
    ed: &DVector<f64>,
    singular_tolerance: f64,
) -> Option<DVector<f64>> {
    let singular_values = jacobian.singular_values();
    let largest = singular_values.max();
    if !(largest > 0.0) || singular_values.min() / largest < singular_tolerance {
        return None;
    }
    let rhs = ed.map(|value| -value);
    let step = jacobian.clone().lu().solve(&rhs)?;
    step.iter().all(|value| value.is_finite()).then_some(step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::Flows;
    use crate::market::{MarketId, MarketKind};
    use approx::assert_relative_eq;

    fn single_market_world(initial: f64) -> World<impl CalculationGraph> {
        let mut markets = MarketSet::new();
        let good = markets
            .add_market(MarketId::new("good", "r"), MarketKind::Normal, initial)
            .unwrap();
        let graph = move |_: usize, prices: &MarketSet, flows: &mut Flows| -> Result<()> {
            let p = prices.market(good.index()).price();
            flows.add_supply(&good, p);
            flows.add_demand(&good, 10.0 - p);
            Ok(())
        };
        World::new(markets, graph)
    }

    #[test]
    fn newton_step_rejects_dependent_rows() {
        let jacobian = DMatrix::from_row_slice(2, 2, &[-2.0, -2.0, -2.0, -2.0]);
        let ed = DVector::from_vec(vec![1.0, 1.0]);
        assert!(newton_step(&jacobian, &ed, 1e-8).is_none());

        let jacobian = DMatrix::from_row_slice(2, 2, &[-3.0, 0.5, 0.0, -2.0]);
        let step = newton_step(&jacobian, &ed, 1e-8).unwrap();
        assert_relative_eq!(step[1], 0.5);
        assert_relative_eq!(step[0], 5.0 / 12.0, epsilon = 1e-12);
    }

    #[test]
    fn damping_caps_relative_price_change() {
        let newton = NewtonRaphson::new(StepSpace::Linear, NewtonOptions::default());
        let prices = DVector::from_vec(vec![1.0, 4.0]);
        let step = DVector::from_vec(vec![3.0, 1.0]);
        let damped =
            newton.damped_prices(&prices, &step, &[Coordinate::Linear, Coordinate::Linear]);
        // Largest relative move is 300%, scaled down to 50%.
        assert_relative_eq!(damped[0], 1.5, epsilon = 1e-12);
        assert_relative_eq!(damped[1], 4.0 + 1.0 / 6.0, epsilon = 1e-12);
    }

    #[test]
    fn log_newton_converges_on_single_market() {
        let mut world = single_market_world(1.0);
        world.calc(0).unwrap();
        let mut info_set = SolverInfoSet::new(world.markets(), 1e-8, 1e-6);
        let mut newton = NewtonRaphson::new(StepSpace::Log, NewtonOptions::default());
        let params = SolveParams::new(50, 0);

        let code = newton.solve(&params, &mut world, &mut info_set).unwrap();
        assert_eq!(code, ReturnCode::Success);
        assert_relative_eq!(world.markets().market(0).price(), 5.0, epsilon = 1e-6);
        assert!(newton.iterations().len() < 15);
    }

    #[test]
    fn overshooting_twice_is_wrong_direction() {
        // Excess demand cbrt(5 - p): every step lands further from balance on the other side.
        let mut markets = MarketSet::new();
        let good = markets
            .add_market(MarketId::new("good", "r"), MarketKind::Normal, 4.0)
            .unwrap();
        let graph = move |_: usize, prices: &MarketSet, flows: &mut Flows| -> Result<()> {
            let p = prices.market(good.index()).price();
            flows.add_supply(&good, 10.0);
            flows.add_demand(&good, 10.0 + (5.0 - p).cbrt());
            Ok(())
        };
        let mut world = World::new(markets, graph);
        world.calc(0).unwrap();
        let mut info_set = SolverInfoSet::new(world.markets(), 1e-6, 1e-6);
        let mut newton = NewtonRaphson::new(StepSpace::Linear, NewtonOptions::default());

        let code = newton
            .solve(&SolveParams::new(50, 0), &mut world, &mut info_set)
            .unwrap();
        assert_eq!(code, ReturnCode::FailureWrongDirection);
        let trail: Vec<f64> = newton.iterations().entries().iter().map(|i| i.max_red).collect();
        assert_eq!(trail.len(), 2);
        assert!(trail[0] > 1.0 / 11.0 && trail[1] > trail[0]);
    }

    #[test]
    fn reopened_market_changes_solution_size() {
        // Copper starts cleared, but its demand follows the tin price.
        let mut markets = MarketSet::new();
        let copper = markets
            .add_market(MarketId::new("copper", "r"), MarketKind::Normal, 5.0)
            .unwrap();
        let tin = markets
            .add_market(MarketId::new("tin", "r"), MarketKind::Normal, 1.0)
            .unwrap();
        let graph = move |_: usize, prices: &MarketSet, flows: &mut Flows| -> Result<()> {
            let pc = prices.market(copper.index()).price();
            let pt = prices.market(tin.index()).price();
            flows.add_supply(&copper, pc);
            flows.add_demand(&copper, 4.0 + pt);
            flows.add_supply(&tin, pt);
            flows.add_demand(&tin, 3.0);
            Ok(())
        };
        let mut world = World::new(markets, graph);
        world.calc(0).unwrap();
        let mut info_set = SolverInfoSet::new(world.markets(), 1e-3, 1e-4);
        info_set.update_solvable(world.markets());
        assert_eq!(info_set.unsolved_indices(), vec![1]);

        let mut newton = NewtonRaphson::new(StepSpace::Linear, NewtonOptions::default());
        let code = newton
            .solve(&SolveParams::new(50, 0), &mut world, &mut info_set)
            .unwrap();
        assert_eq!(code, ReturnCode::FailureSolutionSizeChanged);
        // The damped step moved tin from 1 to 1.5 and left copper alone.
        assert_relative_eq!(world.markets().market(1).price(), 1.5, epsilon = 1e-6);
        assert_relative_eq!(world.markets().market(0).price(), 5.0);
        assert_eq!(info_set.unsolved_count(), 2);
    }

    #[test]
    fn stops_before_exceeding_calculation_budget() {
        let mut world = single_market_world(1.0);
        world.calc(0).unwrap();
        let mut info_set = SolverInfoSet::new(world.markets(), 1e-12, 1e-12);
        let mut newton = NewtonRaphson::new(StepSpace::Linear, NewtonOptions::default());
        // Room for exactly one iteration: a derivative pass and a step pass.
        let params = SolveParams::new(50, 0).with_calc_limit(world.calc_count() + 2);

        let code = newton.solve(&params, &mut world, &mut info_set).unwrap();
        assert_eq!(code, ReturnCode::FailureIterMaxReached);
        assert_eq!(world.calc_count(), 3);
        assert_eq!(newton.iterations().len(), 1);
    }
}
