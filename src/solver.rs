//! The per-period orchestrator.

use log::{debug, info, warn};
use nalgebra::DVector;

use crate::calc::{CalculationGraph, World};
use crate::components::{ReturnCode, SolveParams, SolverComponent};
use crate::error::Result;
use crate::info::SolverInfoSet;
use crate::options::SolverOptions;
use crate::report::{ComponentRun, PeriodReport, SolveStatus};

/// Runs the configured components, in order and for several passes, until
/// every solvable market clears or the period's budget is spent.
///
/// A failing component is logged and the next one tried; a period only fails
/// once every pass is exhausted, and even then the prices it reached are kept.
#[derive(Clone, Debug)]
pub struct Solver {
    options: SolverOptions,
    components: Vec<SolverComponent>,
}

impl Solver {
    /// Validates the options and builds the component sequence.
    pub fn new(options: SolverOptions) -> Result<Self> {
        options.validate()?;
        let components = options
            .components
            .iter()
            .map(SolverComponent::from_config)
            .collect();
        Ok(Self {
            options,
            components,
        })
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    pub fn components(&self) -> &[SolverComponent] {
        &self.components
    }

    /// Clears the markets for `period`, starting from their current prices.
    ///
    /// Errors are reserved for failures that are not numerical in nature,
    /// such as a graph that cannot find a market.
    pub fn solve_period<G: CalculationGraph>(
        &mut self,
        world: &mut World<G>,
        period: usize,
    ) -> Result<PeriodReport> {
        let start_calcs = world.calc_count();
        world.start_method("Solver");
        world.calc(period)?;

        let mut info_set = SolverInfoSet::new(
            world.markets(),
            self.options.solution_tolerance,
            self.options.ed_solution_floor,
        );
        info_set.update_solvable(world.markets());
        debug!(
            "period {period}: {} of {} solvable markets unsolved at start",
            info_set.unsolved_count(),
            info_set.solvable_count()
        );

        // One pass stays in reserve so a failed component can always be undone.
        let calc_limit = start_calcs + self.options.max_calcs_per_period.saturating_sub(1);
        let params =
            SolveParams::new(self.options.max_iterations, period).with_calc_limit(calc_limit);
        let mut runs = Vec::new();

        'passes: for pass in 0..self.options.max_passes {
            for component in &mut self.components {
                if info_set.all_solved() {
                    break 'passes;
                }
                if world.calc_count() - start_calcs >= self.options.max_calcs_per_period {
                    warn!(
                        "period {period}: calculation budget of {} passes exhausted",
                        self.options.max_calcs_per_period
                    );
                    break 'passes;
                }

                let snapshot = world.markets().prices();
                let red_before = info_set.max_relative_excess_demand(world.markets());
                let calcs_before = world.calc_count();
                world.start_method(component.name());
                component.init();

                let code = match component.solve(&params, world, &mut info_set) {
                    Ok(code) => code,
                    Err(err) if err.is_numerical() => {
                        warn!(
                            "period {period}: {} hit a numerical error: {err}",
                            component.name()
                        );
                        restore(world, &mut info_set, &snapshot, period)?;
                        ReturnCode::FailureWrongDirection
                    }
                    Err(err) => return Err(err),
                };

                if code.is_failure() {
                    warn!(
                        "period {period}: {} returned {code} with {} markets unsolved",
                        component.name(),
                        info_set.unsolved_count()
                    );
                    let red_after = info_set.max_relative_excess_demand(world.markets());
                    if red_after > red_before {
                        restore(world, &mut info_set, &snapshot, period)?;
                    }
                }
                info_set.update_solvable(world.markets());

                runs.push(ComponentRun {
                    pass,
                    method: component.name(),
                    code,
                    calcs: world.calc_count() - calcs_before,
                    unsolved: info_set.unsolved_count(),
                    iterations: component.iterations().entries().to_vec(),
                });
            }
        }

        let status = if info_set.all_solved() {
            SolveStatus::Solved
        } else {
            SolveStatus::Failed
        };
        let worst_red = info_set.max_relative_excess_demand(world.markets());
        let calcs = world.calc_count() - start_calcs;
        match status {
            SolveStatus::Solved => info!(
                "period {period} solved in {calcs} calculations, max RED {worst_red:.3e}"
            ),
            SolveStatus::Failed => warn!(
                "period {period} failed to solve after {calcs} calculations; {} markets unsolved, max RED {worst_red:.3e}",
                info_set.unsolved_count()
            ),
        }

        Ok(PeriodReport {
            period,
            status,
            calcs,
            worst_red,
            runs,
            markets: PeriodReport::snapshot(world.markets(), &info_set),
        })
    }
}

/// Puts every price back to `snapshot` and brings the flows in line with them.
fn restore<G: CalculationGraph>(
    world: &mut World<G>,
    info_set: &mut SolverInfoSet,
    snapshot: &DVector<f64>,
    period: usize,
) -> Result<()> {
    world.markets_mut().restore_prices(snapshot)?;
    world.calc(period)?;
    info_set.update_solvable(world.markets());
    Ok(())
}
