//! A single commodity market and its identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a market: the traded good and the region it clears in.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MarketId {
    good: String,
    region: String,
}

impl MarketId {
    /// Creates an identifier from any string-like good and region names.
    pub fn new<G: Into<String>, R: Into<String>>(good: G, region: R) -> Self {
        Self {
            good: good.into(),
            region: region.into(),
        }
    }

    /// Name of the traded good.
    pub fn good(&self) -> &str {
        &self.good
    }

    /// Name of the region.
    pub fn region(&self) -> &str {
        &self.region
    }
}

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.region, self.good)
    }
}

/// How a market participates in solving.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarketKind {
    /// Physical commodity; price is kept non-negative.
    #[default]
    Normal,
    /// Tax or subsidy market (e.g. an emissions constraint); negative prices are allowed.
    Tax,
    /// Price set by policy outside the solver. Never perturbed.
    Fixed,
}

/// Price, supply and demand of one good in one region.
#[derive(Clone, Debug, Serialize)]
pub struct Market {
    id: MarketId,
    kind: MarketKind,
    price: f64,
    supply: f64,
    demand: f64,
    tolerance: Option<f64>,
    bracket_hint: Option<(f64, f64)>,
}

impl Market {
    pub(crate) fn new(id: MarketId, kind: MarketKind, price: f64) -> Self {
        let mut market = Self {
            id,
            kind,
            price: 0.0,
            supply: 0.0,
            demand: 0.0,
            tolerance: None,
            bracket_hint: None,
        };
        market.set_price(price);
        market
    }

    pub fn id(&self) -> &MarketId {
        &self.id
    }

    pub fn kind(&self) -> MarketKind {
        self.kind
    }

    pub fn price(&self) -> f64 {
        self.price
    }

    pub fn supply(&self) -> f64 {
        self.supply
    }

    pub fn demand(&self) -> f64 {
        self.demand
    }

    /// Whether the price may go below zero.
    pub fn allows_negative_price(&self) -> bool {
        self.kind == MarketKind::Tax
    }

    /// Whether the solver is allowed to move this market's price.
    pub fn is_solvable(&self) -> bool {
        self.kind != MarketKind::Fixed
    }

    /// Market-specific solution tolerance, if one was configured.
    pub fn tolerance(&self) -> Option<f64> {
        self.tolerance
    }

    /// Configured initial bisection bracket, if any.
    pub fn bracket_hint(&self) -> Option<(f64, f64)> {
        self.bracket_hint
    }

    /// Sets the price. Non-finite values are ignored and non-negative markets
    /// clamp at zero. Does not recalculate supply or demand.
    pub fn set_price(&mut self, price: f64) {
        if !price.is_finite() {
            return;
        }
        self.price = if self.allows_negative_price() {
            price
        } else {
            price.max(0.0)
        };
    }

    pub(crate) fn set_flows(&mut self, supply: f64, demand: f64) {
        self.supply = supply;
        self.demand = demand;
    }

    pub(crate) fn set_tolerance(&mut self, tolerance: f64) {
        self.tolerance = Some(tolerance);
    }

    pub(crate) fn set_bracket_hint(&mut self, low: f64, high: f64) {
        self.bracket_hint = Some((low, high));
    }

    /// Demand minus supply.
    pub fn excess_demand(&self) -> f64 {
        self.demand - self.supply
    }

    /// Excess demand normalised by demand, with `floor` guarding small or zero demand.
    pub fn relative_excess_demand(&self, floor: f64) -> f64 {
        let denominator = self.demand.abs().max(floor).max(f64::MIN_POSITIVE);
        self.excess_demand() / denominator
    }

    /// Whether the market clears: relative excess demand within `tolerance`
    /// and absolute excess demand within `ed_floor`, both at once.
    ///
    /// A non-negative market sitting at a zero price with excess supply is a
    /// free good and counts as cleared.
    pub fn is_solved(&self, tolerance: f64, ed_floor: f64) -> bool {
        let tolerance = self.tolerance.unwrap_or(tolerance);
        let ed = self.excess_demand();
        if !self.allows_negative_price() && self.price == 0.0 && ed <= 0.0 {
            return true;
        }
        self.relative_excess_demand(ed_floor).abs() <= tolerance && ed.abs() <= ed_floor
    }
}
