//! Market-clearing solver for partial-equilibrium economy and energy models.
//!
//! A model registers its markets in a [`MarketSet`] and supplies a
//! [`CalculationGraph`] that turns prices into supply and demand. Each period
//! the [`Solver`] runs a configured sequence of solver components (bracketing
//! bisection, Newton-Raphson in linear or log prices, single-market bisection)
//! until the relative excess demand of every solvable market is within
//! tolerance. The crate provides
//!
//! - markets and their lookup (`market`, `marketplace` modules),
//! - the calculation contract and pass counting (`calc` module),
//! - a sector, subsector and technology cascade usable as a graph (`cascade` module),
//! - solver components and their orchestration (`components`, `solver` modules), and
//! - a multi-period driver (`scenario` module).
//!
//! # Quick start
//!
//! ```no_run
//! use equilibria::calc::{Flows, World};
//! use equilibria::market::{MarketId, MarketKind};
//! use equilibria::marketplace::MarketSet;
//! use equilibria::{Solver, SolverOptions};
//!
//! let mut markets = MarketSet::new();
//! let oil = markets
//!     .add_market(MarketId::new("oil", "usa"), MarketKind::Normal, 1.0)
//!     .expect("new market");
//!
//! let graph = move |_period: usize, prices: &MarketSet, flows: &mut Flows| -> equilibria::Result<()> {
//!     let p = prices.price_of(&oil);
//!     flows.add_supply(&oil, 2.0 * p);
//!     flows.add_demand(&oil, 30.0 - p);
//!     Ok(())
//! };
//!
//! let mut world = World::new(markets, graph);
//! let mut solver = Solver::new(SolverOptions::default()).expect("valid options");
//! let report = solver.solve_period(&mut world, 0).expect("no fatal error");
//! println!("solved: {}, price {}", report.is_solved(), world.markets().market(0).price());
//! ```

pub mod calc;
pub mod cascade;
pub mod components;
pub mod error;
pub mod info;
pub mod iteration;
pub mod market;
pub mod marketplace;
pub mod options;
pub mod report;
pub mod scenario;
pub mod solver;

pub use calc::{CalcCounter, CalculationGraph, Flows, World};
pub use components::{ReturnCode, SolverComponent};
pub use error::{Result, SolveError};
pub use market::{MarketId, MarketKind};
pub use marketplace::{MarketRef, MarketSet};
pub use options::{BisectionOptions, ComponentConfig, NewtonOptions, SolverOptions};
pub use report::{PeriodReport, SolveStatus};
pub use scenario::Scenario;
pub use solver::Solver;
