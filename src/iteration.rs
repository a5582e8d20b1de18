//! Convergence-trend diagnostics kept by each solver component.

use serde::Serialize;

/// Worst imbalance observed in one iteration of a solver method.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IterationInfo {
    /// Name of the method active in the iteration.
    pub method: String,
    /// Maximum absolute relative excess demand over the solvable markets.
    pub max_red: f64,
}

/// Append-only trail of [`IterationInfo`] for one component invocation.
#[derive(Clone, Debug, Default, Serialize)]
pub struct IterationLog {
    entries: Vec<IterationInfo>,
}

impl IterationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the trail at the start of a method run.
    pub fn start_method(&mut self) {
        self.entries.clear();
    }

    pub fn add_iteration(&mut self, method: &str, max_red: f64) {
        self.entries.push(IterationInfo {
            method: method.to_string(),
            max_red,
        });
    }

    pub fn entries(&self) -> &[IterationInfo] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&IterationInfo> {
        self.entries.last()
    }

    /// Whether the worst imbalance over the last `window` iterations is
    /// strictly below the worst over the `window` iterations before them.
    ///
    /// With fewer than `2 * window` recorded iterations there is not enough
    /// history to judge, and the method is given the benefit of the doubt.
    pub fn is_improving(&self, window: usize) -> bool {
        let len = self.entries.len();
        if window == 0 || len < 2 * window {
            return true;
        }
        let recent = window_max(&self.entries[len - window..]);
        let prior = window_max(&self.entries[len - 2 * window..len - window]);
        recent < prior
    }
}

fn window_max(entries: &[IterationInfo]) -> f64 {
    entries
        .iter()
        .map(|info| info.max_red.abs())
        .fold(0.0, f64::max)
}
