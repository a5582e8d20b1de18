//! Multi-period driver.

use std::ops::Range;

use log::{info, warn};

use crate::calc::{CalculationGraph, World};
use crate::error::{Result, SolveError};
use crate::report::PeriodReport;
use crate::solver::Solver;

/// Solves a sequence of periods, each starting from the prices the previous
/// one reached.
#[derive(Debug)]
pub struct Scenario<G> {
    world: World<G>,
    solver: Solver,
    reports: Vec<PeriodReport>,
}

impl<G: CalculationGraph> Scenario<G> {
    pub fn new(world: World<G>, solver: Solver) -> Self {
        Self {
            world,
            solver,
            reports: Vec::new(),
        }
    }

    /// Solves every period in `periods` in order.
    ///
    /// An unsolved period is reported and the run continues, unless the solver
    /// was configured with `halt_on_failure`, in which case the run stops with
    /// [`SolveError::PeriodFailed`] after recording that period's report.
    pub fn run(&mut self, periods: Range<usize>) -> Result<&[PeriodReport]> {
        let first = self.reports.len();
        for period in periods {
            let report = self.solver.solve_period(&mut self.world, period)?;
            let failed = (!report.is_solved()).then_some(report.worst_red);
            self.reports.push(report);

            if let Some(worst_red) = failed {
                if self.solver.options().halt_on_failure {
                    return Err(SolveError::PeriodFailed { period, worst_red });
                }
                warn!("continuing past unsolved period {period}");
            }
        }
        info!(
            "scenario finished {} periods, {} calculations in total",
            self.reports.len() - first,
            self.world.calc_count()
        );
        Ok(&self.reports[first..])
    }

    /// Reports of every period solved so far.
    pub fn reports(&self) -> &[PeriodReport] {
        &self.reports
    }

    pub fn world(&self) -> &World<G> {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World<G> {
        &mut self.world
    }

    pub fn into_world(self) -> World<G> {
        self.world
    }
}
