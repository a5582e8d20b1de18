//! Price brackets and the search that establishes them.

use log::debug;

use super::SolveParams;
use crate::calc::{CalculationGraph, World};
use crate::error::Result;
use crate::info::SolverInfoSet;
use crate::options::BisectionOptions;

/// A price interval whose endpoints have excess demand of opposite sign.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bracket {
    low: f64,
    high: f64,
    ed_low: f64,
    ed_high: f64,
}

impl Bracket {
    /// Creates a bracket, or `None` if the interval is empty or does not straddle a sign change.
    pub fn new(low: f64, high: f64, ed_low: f64, ed_high: f64) -> Option<Self> {
        let bracket = Self {
            low,
            high,
            ed_low,
            ed_high,
        };
        (low < high && bracket.straddles_root()).then_some(bracket)
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn ed_low(&self) -> f64 {
        self.ed_low
    }

    pub fn ed_high(&self) -> f64 {
        self.ed_high
    }

    pub fn width(&self) -> f64 {
        self.high - self.low
    }

    pub fn midpoint(&self) -> f64 {
        0.5 * (self.low + self.high)
    }

    /// Excess demand differs in sign between the endpoints.
    pub fn straddles_root(&self) -> bool {
        self.ed_low * self.ed_high <= 0.0
    }

    /// Replaces the endpoint whose excess demand has the same sign as `ed`.
    pub fn update(&mut self, price: f64, ed: f64) {
        if ed * self.ed_low > 0.0 {
            self.low = price;
            self.ed_low = ed;
        } else {
            self.high = price;
            self.ed_high = ed;
        }
    }

    /// Whether the bracket has shrunk to nothing relative to its prices.
    pub fn is_collapsed(&self, relative_width: f64) -> bool {
        let scale = self.low.abs().max(self.high.abs()).max(1.0);
        self.width() <= relative_width * scale
    }
}

/// Outcome of a bracket search over several markets at once.
#[derive(Debug, Default)]
pub(crate) struct BracketSearch {
    pub brackets: Vec<(usize, Bracket)>,
    /// A market whose imbalance grew twice in a row while moving toward balance.
    pub wrong_direction: Option<usize>,
    /// The calculation budget ran out before every market was bracketed.
    pub exhausted: bool,
}

struct Expansion {
    index: usize,
    allows_negative: bool,
    raising: bool,
    anchor_price: f64,
    anchor_ed: f64,
    start_abs_ed: f64,
    worse_streak: u32,
}

impl Expansion {
    fn next_price(&self, options: &BisectionOptions) -> Option<f64> {
        let price = self.anchor_price;
        let step = (price.abs() * options.bracket_interval).max(options.min_price_step);
        if self.raising {
            return Some(if price > 0.0 {
                price * (1.0 + options.bracket_interval)
            } else {
                price + step
            });
        }
        if self.allows_negative || price <= 0.0 {
            // Non-negative markets stuck at zero have nowhere further to go.
            return (self.allows_negative).then_some(price - step);
        }
        let lowered = price / (1.0 + options.bracket_interval);
        Some(if lowered < options.min_price_step {
            0.0
        } else {
            lowered
        })
    }
}

/// Finds a bracket for every market in `indices`, moving them simultaneously.
///
/// Markets with a configured hint try it first; the rest step their price in
/// the direction their excess demand points until its sign flips.
pub(crate) fn bracket_markets<G: CalculationGraph>(
    world: &mut World<G>,
    info_set: &SolverInfoSet,
    indices: &[usize],
    options: &BisectionOptions,
    params: &SolveParams,
) -> Result<BracketSearch> {
    let mut search = BracketSearch::default();
    let mut remaining = try_hints(world, info_set, indices, params, &mut search)?;
    if remaining.is_empty() || search.exhausted {
        return Ok(search);
    }

    let mut expansions: Vec<Expansion> = remaining
        .drain(..)
        .filter_map(|index| {
            let market = world.markets().market(index);
            let ed = market.excess_demand();
            (ed != 0.0).then(|| Expansion {
                index,
                allows_negative: market.allows_negative_price(),
                raising: ed > 0.0,
                anchor_price: market.price(),
                anchor_ed: ed,
                start_abs_ed: ed.abs(),
                worse_streak: 0,
            })
        })
        .collect();

    for _ in 0..options.max_bracket_iterations {
        if expansions.is_empty() {
            break;
        }
        if !params.can_afford(world, 1) {
            search.exhausted = true;
            break;
        }
        expansions.retain(|expansion| {
            expansion
                .next_price(options)
                .map(|price| info_set.set_price(world.markets_mut(), expansion.index, price))
                .unwrap_or(false)
        });
        if expansions.is_empty() {
            break;
        }
        world.calc(params.period)?;

        let mut still_searching = Vec::with_capacity(expansions.len());
        for mut expansion in expansions {
            let market = world.markets().market(expansion.index);
            let (price, ed) = (market.price(), market.excess_demand());
            if ed * expansion.anchor_ed <= 0.0 {
                let bracket = if expansion.raising {
                    Bracket::new(expansion.anchor_price, price, expansion.anchor_ed, ed)
                } else {
                    Bracket::new(price, expansion.anchor_price, ed, expansion.anchor_ed)
                };
                if let Some(bracket) = bracket {
                    search.brackets.push((expansion.index, bracket));
                }
                continue;
            }

            if ed.abs() > expansion.start_abs_ed {
                expansion.worse_streak += 1;
                if expansion.worse_streak >= 2 {
                    debug!(
                        "market {} moves away from balance while bracketing",
                        market.id()
                    );
                    search.wrong_direction = Some(expansion.index);
                    return Ok(search);
                }
            } else {
                expansion.worse_streak = 0;
            }
            expansion.anchor_price = price;
            expansion.anchor_ed = ed;
            still_searching.push(expansion);
        }
        expansions = still_searching;
    }

    Ok(search)
}

/// Evaluates configured hints at both ends. Returns markets still needing a bracket.
fn try_hints<G: CalculationGraph>(
    world: &mut World<G>,
    info_set: &SolverInfoSet,
    indices: &[usize],
    params: &SolveParams,
    search: &mut BracketSearch,
) -> Result<Vec<usize>> {
    let hinted: Vec<(usize, f64, f64, f64)> = indices
        .iter()
        .filter_map(|&index| {
            let market = world.markets().market(index);
            market
                .bracket_hint()
                .map(|(low, high)| (index, low, high, market.price()))
        })
        .collect();
    let mut remaining: Vec<usize> = indices
        .iter()
        .copied()
        .filter(|index| !hinted.iter().any(|(candidate, ..)| candidate == index))
        .collect();
    if hinted.is_empty() {
        return Ok(remaining);
    }
    // Low end, high end, and possibly a pass to undo failed hints.
    if !params.can_afford(world, 3) {
        search.exhausted = true;
        return Ok(remaining);
    }

    for &(index, low, ..) in &hinted {
        info_set.set_price(world.markets_mut(), index, low);
    }
    world.calc(params.period)?;
    let ed_lows: Vec<f64> = hinted
        .iter()
        .map(|&(index, ..)| world.markets().market(index).excess_demand())
        .collect();

    for &(index, _, high, _) in &hinted {
        info_set.set_price(world.markets_mut(), index, high);
    }
    world.calc(params.period)?;

    let mut restore = false;
    for (&(index, low, high, original), ed_low) in hinted.iter().zip(ed_lows) {
        let ed_high = world.markets().market(index).excess_demand();
        match Bracket::new(low, high, ed_low, ed_high) {
            Some(bracket) => search.brackets.push((index, bracket)),
            None => {
                debug!(
                    "bracket hint for {} does not straddle a root",
                    world.markets().market(index).id()
                );
                info_set.set_price(world.markets_mut(), index, original);
                remaining.push(index);
                restore = true;
            }
        }
    }
    if restore {
        world.calc(params.period)?;
    }
    Ok(remaining)
}
