//! Solver configuration. Every struct deserializes with `serde` so an external
//! loader can supply it in any format; missing fields take their defaults.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SolveError};

/// Settings shared by the bisection methods.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BisectionOptions {
    /// Relative price change per step while searching for a bracket.
    pub bracket_interval: f64,
    /// Maximum calculation passes spent searching for a bracket.
    pub max_bracket_iterations: usize,
    /// Absolute step used when expanding away from a zero price.
    pub min_price_step: f64,
    /// Relative width below which a bracket around an unsolved market is rebuilt.
    pub min_bracket_width: f64,
    /// Passes spent on one market before the single-market sweep moves on.
    pub max_single_market_iterations: usize,
    /// Number of bisection steps compared by the stagnation check.
    pub improvement_window: usize,
}

impl Default for BisectionOptions {
    fn default() -> Self {
        Self {
            bracket_interval: 0.5,
            max_bracket_iterations: 40,
            min_price_step: 1e-2,
            min_bracket_width: 1e-12,
            max_single_market_iterations: 30,
            improvement_window: 10,
        }
    }
}

impl BisectionOptions {
    pub fn with_bracket_interval(mut self, interval: f64) -> Self {
        self.bracket_interval = interval;
        self
    }

    pub fn with_max_bracket_iterations(mut self, iterations: usize) -> Self {
        self.max_bracket_iterations = iterations;
        self
    }

    pub fn with_max_single_market_iterations(mut self, iterations: usize) -> Self {
        self.max_single_market_iterations = iterations.max(1);
        self
    }

    /// Zero disables the stagnation check.
    pub fn with_improvement_window(mut self, window: usize) -> Self {
        self.improvement_window = window;
        self
    }

    fn validate(&self) -> Result<()> {
        if !(self.bracket_interval.is_finite() && self.bracket_interval > 0.0) {
            return Err(SolveError::invalid_option(
                "bracket_interval",
                "must be finite and positive",
            ));
        }
        if !(self.min_price_step.is_finite() && self.min_price_step > 0.0) {
            return Err(SolveError::invalid_option(
                "min_price_step",
                "must be finite and positive",
            ));
        }
        if !(self.min_bracket_width.is_finite() && self.min_bracket_width >= 0.0) {
            return Err(SolveError::invalid_option(
                "min_bracket_width",
                "must be finite and non-negative",
            ));
        }
        Ok(())
    }
}

/// Settings shared by the Newton-Raphson methods.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonOptions {
    /// Relative perturbation used for finite-difference derivatives.
    pub derivative_delta: f64,
    /// Largest relative price change a single step may make; larger steps are damped.
    pub max_relative_step: f64,
    /// Price magnitude below which step sizes are measured against this value instead.
    pub step_price_floor: f64,
    /// Reciprocal condition number below which the Jacobian is treated as singular.
    pub singular_tolerance: f64,
    /// Number of iterations compared by the stagnation check.
    pub improvement_window: usize,
}

impl Default for NewtonOptions {
    fn default() -> Self {
        Self {
            derivative_delta: 1e-5,
            max_relative_step: 0.5,
            step_price_floor: 0.1,
            singular_tolerance: 1e-8,
            improvement_window: 5,
        }
    }
}

impl NewtonOptions {
    pub fn with_max_relative_step(mut self, step: f64) -> Self {
        self.max_relative_step = step;
        self
    }

    pub fn with_derivative_delta(mut self, delta: f64) -> Self {
        self.derivative_delta = delta;
        self
    }

    pub fn with_singular_tolerance(mut self, tolerance: f64) -> Self {
        self.singular_tolerance = tolerance;
        self
    }

    fn validate(&self) -> Result<()> {
        if !(self.derivative_delta.is_finite()
            && self.derivative_delta > 0.0
            && self.derivative_delta < 1.0)
        {
            return Err(SolveError::invalid_option(
                "derivative_delta",
                "must lie in (0, 1)",
            ));
        }
        if !(self.max_relative_step.is_finite() && self.max_relative_step > 0.0) {
            return Err(SolveError::invalid_option(
                "max_relative_step",
                "must be finite and positive",
            ));
        }
        if !(self.step_price_floor.is_finite() && self.step_price_floor > 0.0) {
            return Err(SolveError::invalid_option(
                "step_price_floor",
                "must be finite and positive",
            ));
        }
        if !(self.singular_tolerance.is_finite() && self.singular_tolerance >= 0.0) {
            return Err(SolveError::invalid_option(
                "singular_tolerance",
                "must be finite and non-negative",
            ));
        }
        Ok(())
    }
}

/// One entry in the configured component sequence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum ComponentConfig {
    BisectAll(BisectionOptions),
    BisectOne(BisectionOptions),
    NewtonRaphson(NewtonOptions),
    LogNewtonRaphson(NewtonOptions),
}

impl ComponentConfig {
    fn validate(&self) -> Result<()> {
        match self {
            Self::BisectAll(options) | Self::BisectOne(options) => options.validate(),
            Self::NewtonRaphson(options) | Self::LogNewtonRaphson(options) => options.validate(),
        }
    }
}

/// Configuration of the per-period orchestrator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Largest relative excess demand at which a market counts as cleared.
    pub solution_tolerance: f64,
    /// Demand floor for relative excess demand and absolute tolerance for tiny markets.
    pub ed_solution_floor: f64,
    /// Iteration limit handed to each component invocation.
    pub max_iterations: usize,
    /// Number of times the whole component sequence may be retried.
    pub max_passes: usize,
    /// Calculation passes allowed per period before giving up.
    pub max_calcs_per_period: u64,
    /// Whether a scenario stops at the first period that fails to clear.
    pub halt_on_failure: bool,
    /// Components run in order on every pass.
    pub components: Vec<ComponentConfig>,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            solution_tolerance: 1e-3,
            ed_solution_floor: 1e-4,
            max_iterations: 100,
            max_passes: 3,
            max_calcs_per_period: 5_000,
            halt_on_failure: false,
            components: vec![
                ComponentConfig::LogNewtonRaphson(NewtonOptions::default()),
                ComponentConfig::BisectAll(BisectionOptions::default()),
            ],
        }
    }
}

impl SolverOptions {
    pub fn with_solution_tolerance(mut self, tolerance: f64) -> Self {
        self.solution_tolerance = tolerance;
        self
    }

    pub fn with_ed_solution_floor(mut self, floor: f64) -> Self {
        self.ed_solution_floor = floor;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_max_passes(mut self, passes: usize) -> Self {
        self.max_passes = passes;
        self
    }

    pub fn with_max_calcs_per_period(mut self, max_calcs: u64) -> Self {
        self.max_calcs_per_period = max_calcs;
        self
    }

    pub fn with_halt_on_failure(mut self, halt: bool) -> Self {
        self.halt_on_failure = halt;
        self
    }

    /// Replaces the component sequence.
    pub fn with_components(mut self, components: Vec<ComponentConfig>) -> Self {
        self.components = components;
        self
    }

    /// Checks every setting; invalid tolerances are fatal at startup.
    pub fn validate(&self) -> Result<()> {
        SolveError::check_tolerance("solution_tolerance", self.solution_tolerance)?;
        SolveError::check_tolerance("ed_solution_floor", self.ed_solution_floor)?;
        if self.max_iterations == 0 {
            return Err(SolveError::invalid_option(
                "max_iterations",
                "must be at least one",
            ));
        }
        if self.max_passes == 0 {
            return Err(SolveError::invalid_option("max_passes", "must be at least one"));
        }
        if self.max_calcs_per_period < 2 {
            return Err(SolveError::invalid_option(
                "max_calcs_per_period",
                "must allow at least two calculation passes",
            ));
        }
        if self.components.is_empty() {
            return Err(SolveError::invalid_option(
                "components",
                "at least one solver component is required",
            ));
        }
        self.components.iter().try_for_each(ComponentConfig::validate)
    }
}
