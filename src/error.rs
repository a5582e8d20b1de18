use thiserror::Error;

use crate::market::MarketId;

/// Unified error type for `equilibria` operations.
#[derive(Debug, Error)]
pub enum SolveError {
    /// Raised when a market is requested by a `(good, region)` key that was never registered.
    #[error("market `{market}` does not exist")]
    MarketNotFound { market: MarketId },

    /// Raised when the same `(good, region)` key is registered twice.
    #[error("market `{market}` is already registered")]
    DuplicateMarket { market: MarketId },

    /// Raised when a solution tolerance or excess demand floor is unusable.
    #[error("{name} must be finite and strictly positive, found {value}")]
    InvalidTolerance {
        /// Name of the offending setting.
        name: &'static str,
        /// The value that was supplied.
        value: f64,
    },

    /// Raised when a solver option is outside its admissible range.
    #[error("invalid option `{name}`: {reason}")]
    InvalidOption {
        name: &'static str,
        reason: &'static str,
    },

    /// Raised when a configured solver component name is not recognised.
    #[error("unknown solver component `{name}`")]
    UnknownComponent { name: String },

    /// Raised when vectors passed across the solver boundary have incompatible lengths.
    #[error("dimension mismatch in {context}: expected {expected} but found {found}")]
    DimensionMismatch {
        /// Human-readable context describing the operation.
        context: &'static str,
        /// The required dimension.
        expected: usize,
        /// The dimension that was actually supplied.
        found: usize,
    },

    /// Raised when a supply curve is empty or not sorted by price.
    #[error("supply curve for `{market}` is invalid: {reason}")]
    InvalidCurve {
        market: MarketId,
        reason: &'static str,
    },

    /// Raised when a calculation pass produced NaN or an infinite quantity for a market.
    #[error("calculation produced a non-finite {quantity} for market `{market}`")]
    NonFiniteFlow {
        market: MarketId,
        quantity: &'static str,
    },

    /// Raised when numerical routines produce NaN or infinity.
    #[error("encountered a non-finite value during {context}")]
    NumericalError { context: &'static str },

    /// Raised by a scenario configured to halt when a period does not clear.
    #[error("period {period} did not clear; worst relative excess demand {worst_red}")]
    PeriodFailed { period: usize, worst_red: f64 },
}

impl SolveError {
    /// Helper to format a [`DimensionMismatch`](SolveError::DimensionMismatch) error.
    pub fn dimension_mismatch(context: &'static str, expected: usize, found: usize) -> Self {
        Self::DimensionMismatch {
            context,
            expected,
            found,
        }
    }

    /// Helper for a missing market lookup.
    pub fn not_found(market: &MarketId) -> Self {
        Self::MarketNotFound {
            market: market.clone(),
        }
    }

    /// Helper for option validation failures.
    pub fn invalid_option(name: &'static str, reason: &'static str) -> Self {
        Self::InvalidOption { name, reason }
    }

    /// Checks that a tolerance-like value is finite and strictly positive.
    pub fn check_tolerance(name: &'static str, value: f64) -> Result<f64> {
        if value.is_finite() && value > 0.0 {
            Ok(value)
        } else {
            Err(Self::InvalidTolerance { name, value })
        }
    }

    /// Whether the error stems from corrupted numbers rather than configuration.
    ///
    /// The orchestrator recovers from these by abandoning the active component.
    pub fn is_numerical(&self) -> bool {
        matches!(
            self,
            Self::NumericalError { .. } | Self::NonFiniteFlow { .. }
        )
    }
}

/// Type alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, SolveError>;
