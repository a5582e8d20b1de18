//! Pluggable price-adjustment methods.
//!
//! Each [`SolverComponent`] takes the current [`SolverInfoSet`] and tries to
//! clear every unsolved market within a bounded number of iterations. A
//! component never calls another component; sequencing and fallback are the
//! job of the [`Solver`](crate::Solver). The outcome is reported only through
//! a [`ReturnCode`] and the component's [`IterationLog`].

use std::fmt;

use serde::Serialize;

use crate::calc::{CalculationGraph, World};
use crate::error::{Result, SolveError};
use crate::info::SolverInfoSet;
use crate::iteration::IterationLog;
use crate::options::{BisectionOptions, ComponentConfig, NewtonOptions};

mod bisect_all;
mod bisect_one;
mod bracket;
mod newton;

pub use bisect_all::BisectAll;
pub use bisect_one::BisectOne;
pub use bracket::Bracket;
pub use newton::{NewtonRaphson, StepSpace};

/// Result of one [`SolverComponent::solve`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnCode {
    /// The component found nothing to solve and changed nothing.
    OriginalState,
    Success,
    FailureIterMaxReached,
    FailureWrongDirection,
    FailureSolutionSizeChanged,
    FailureSingularMatrix,
}

impl ReturnCode {
    pub fn is_failure(self) -> bool {
        !matches!(self, Self::OriginalState | Self::Success)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OriginalState => "ORIGINAL_STATE",
            Self::Success => "SUCCESS",
            Self::FailureIterMaxReached => "FAILURE_ITER_MAX_REACHED",
            Self::FailureWrongDirection => "FAILURE_WRONG_DIRECTION",
            Self::FailureSolutionSizeChanged => "FAILURE_SOLUTION_SIZE_CHANGED",
            Self::FailureSingularMatrix => "FAILURE_SINGULAR_MATRIX",
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-invocation limits handed to a component by the orchestrator.
#[derive(Clone, Copy, Debug)]
pub struct SolveParams {
    /// Maximum number of iterations the component may run.
    pub max_iterations: usize,
    /// Model period being solved; forwarded to every calculation pass.
    pub period: usize,
    /// Value of the world's calc counter the component must not exceed.
    pub calc_limit: u64,
}

impl SolveParams {
    /// Limits with no calculation budget.
    pub fn new(max_iterations: usize, period: usize) -> Self {
        Self {
            max_iterations,
            period,
            calc_limit: u64::MAX,
        }
    }

    pub fn with_calc_limit(mut self, calc_limit: u64) -> Self {
        self.calc_limit = calc_limit;
        self
    }

    /// Whether `passes` more calculation passes fit in the budget.
    pub fn can_afford<G: CalculationGraph>(&self, world: &World<G>, passes: u64) -> bool {
        world.calc_count().saturating_add(passes) <= self.calc_limit
    }
}

/// The closed set of solving methods, selected by configuration.
#[derive(Clone, Debug)]
pub enum SolverComponent {
    BisectAll(BisectAll),
    BisectOne(BisectOne),
    Newton(NewtonRaphson),
}

impl SolverComponent {
    /// Builds a component from its configuration entry.
    pub fn from_config(config: &ComponentConfig) -> Self {
        match config {
            ComponentConfig::BisectAll(options) => Self::BisectAll(BisectAll::new(options.clone())),
            ComponentConfig::BisectOne(options) => Self::BisectOne(BisectOne::new(options.clone())),
            ComponentConfig::NewtonRaphson(options) => {
                Self::Newton(NewtonRaphson::new(StepSpace::Linear, options.clone()))
            }
            ComponentConfig::LogNewtonRaphson(options) => {
                Self::Newton(NewtonRaphson::new(StepSpace::Log, options.clone()))
            }
        }
    }

    /// Builds a component with default options from its configured name.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            BisectAll::NAME => Ok(Self::BisectAll(BisectAll::new(BisectionOptions::default()))),
            BisectOne::NAME => Ok(Self::BisectOne(BisectOne::new(BisectionOptions::default()))),
            NewtonRaphson::LINEAR_NAME => Ok(Self::Newton(NewtonRaphson::new(
                StepSpace::Linear,
                NewtonOptions::default(),
            ))),
            NewtonRaphson::LOG_NAME => Ok(Self::Newton(NewtonRaphson::new(
                StepSpace::Log,
                NewtonOptions::default(),
            ))),
            other => Err(SolveError::UnknownComponent {
                name: other.to_string(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::BisectAll(_) => BisectAll::NAME,
            Self::BisectOne(_) => BisectOne::NAME,
            Self::Newton(newton) => newton.name(),
        }
    }

    /// Resets per-run caches such as brackets.
    pub fn init(&mut self) {
        match self {
            Self::BisectAll(component) => component.init(),
            Self::BisectOne(component) => component.init(),
            Self::Newton(component) => component.init(),
        }
    }

    /// Attempts to clear every unsolved market in `info_set`.
    ///
    /// Errors are reserved for failures of the calculation graph itself; all
    /// numerical trouble inside the method is reported as a failure code.
    pub fn solve<G: CalculationGraph>(
        &mut self,
        params: &SolveParams,
        world: &mut World<G>,
        info_set: &mut SolverInfoSet,
    ) -> Result<ReturnCode> {
        match self {
            Self::BisectAll(component) => component.solve(params, world, info_set),
            Self::BisectOne(component) => component.solve(params, world, info_set),
            Self::Newton(component) => component.solve(params, world, info_set),
        }
    }

    /// Iteration trail of the most recent invocation.
    pub fn iterations(&self) -> &IterationLog {
        match self {
            Self::BisectAll(component) => component.iterations(),
            Self::BisectOne(component) => component.iterations(),
            Self::Newton(component) => component.iterations(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn components_are_built_from_names() {
        for name in ["BisectAll", "BisectOne", "NewtonRaphson", "LogNewtonRaphson"] {
            let component = SolverComponent::from_name(name).unwrap();
            assert_eq!(component.name(), name);
        }
        assert!(matches!(
            SolverComponent::from_name("Bisect-All"),
            Err(SolveError::UnknownComponent { .. })
        ));
    }

    #[test]
    fn only_failures_report_failure() {
        assert!(!ReturnCode::Success.is_failure());
        assert!(!ReturnCode::OriginalState.is_failure());
        assert!(ReturnCode::FailureSingularMatrix.is_failure());
        assert_eq!(
            ReturnCode::FailureIterMaxReached.to_string(),
            "FAILURE_ITER_MAX_REACHED"
        );
    }
}
