//! The sector → subsector → technology cascade that turns prices into flows.
//!
//! Costs aggregate bottom-up: a technology prices its inputs, a subsector
//! shares its technologies by a logit over their costs and reports the
//! share-weighted cost, and a sector does the same over its subsectors. The
//! sector's output is then set from its price (final demand) or from the
//! ratio of its market price to its cost (supply), and that output is split
//! top-down along the same shares into input demands.
//!
//! Every node is owned by its parent and holds only resolved [`MarketRef`]s,
//! so a pass never fails on a missing market; those are caught when the model
//! is built.

use rayon::prelude::*;

use crate::calc::{CalculationGraph, Flows};
use crate::error::{Result, SolveError};
use crate::marketplace::{MarketRef, MarketSet};

/// Smallest cost used in logit sharing; zero or negative costs are raised to it.
const MIN_COST: f64 = 1e-6;

/// Shared capability of the cascade's node kinds.
pub trait CascadeNode {
    /// Cost of one unit of output at the given prices.
    fn cost(&self, prices: &MarketSet) -> f64;

    /// Splits `output` down to the leaves and records the inputs it requires.
    fn distribute(&self, output: f64, prices: &MarketSet, flows: &mut Flows);
}

/// Logit shares `w c^λ / Σ w c^λ`. All-zero weights give all-zero shares.
pub fn logit_shares(weights_and_costs: &[(f64, f64)], exponent: f64) -> Vec<f64> {
    let raw: Vec<f64> = weights_and_costs
        .iter()
        .map(|&(weight, cost)| weight * cost.max(MIN_COST).powf(exponent))
        .collect();
    let total: f64 = raw.iter().sum();
    if total > 0.0 {
        raw.into_iter().map(|value| value / total).collect()
    } else {
        vec![0.0; raw.len()]
    }
}

/// Shares of a group of options and the share-weighted cost they add up to.
#[derive(Clone, Debug)]
struct Pricing {
    shares: Vec<f64>,
    cost: f64,
}

impl Pricing {
    fn from_costs(weights_and_costs: &[(f64, f64)], exponent: f64) -> Self {
        let shares = logit_shares(weights_and_costs, exponent);
        let cost = shares
            .iter()
            .zip(weights_and_costs)
            .map(|(share, (_, cost))| share * cost)
            .sum();
        Self { shares, cost }
    }
}

/// A market consumed per unit of output.
#[derive(Clone, Debug)]
struct Input {
    market: MarketRef,
    coefficient: f64,
}

/// A leaf that converts inputs into its sector's good.
#[derive(Clone, Debug)]
pub struct Technology {
    name: String,
    share_weight: f64,
    non_energy_cost: f64,
    inputs: Vec<Input>,
    emissions: Vec<Input>,
}

impl Technology {
    pub fn new<S: Into<String>>(name: S, non_energy_cost: f64) -> Self {
        Self {
            name: name.into(),
            share_weight: 1.0,
            non_energy_cost,
            inputs: Vec::new(),
            emissions: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_share_weight(mut self, share_weight: f64) -> Self {
        self.share_weight = share_weight;
        self
    }

    /// Consumes `coefficient` units of `market` per unit of output.
    pub fn with_input(mut self, market: MarketRef, coefficient: f64) -> Self {
        self.inputs.push(Input {
            market,
            coefficient,
        });
        self
    }

    /// Emits `coefficient` units per unit of output, paying the permit market's price.
    pub fn with_emission(mut self, market: MarketRef, coefficient: f64) -> Self {
        self.emissions.push(Input {
            market,
            coefficient,
        });
        self
    }
}

impl CascadeNode for Technology {
    fn cost(&self, prices: &MarketSet) -> f64 {
        self.inputs
            .iter()
            .chain(&self.emissions)
            .map(|input| input.coefficient * prices.price_of(&input.market))
            .sum::<f64>()
            + self.non_energy_cost
    }

    fn distribute(&self, output: f64, _prices: &MarketSet, flows: &mut Flows) {
        for input in self.inputs.iter().chain(&self.emissions) {
            flows.add_demand(&input.market, output * input.coefficient);
        }
    }
}

/// A group of competing technologies.
#[derive(Clone, Debug)]
pub struct Subsector {
    name: String,
    share_weight: f64,
    logit_exponent: f64,
    technologies: Vec<Technology>,
}

impl Subsector {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            share_weight: 1.0,
            logit_exponent: -3.0,
            technologies: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_share_weight(mut self, share_weight: f64) -> Self {
        self.share_weight = share_weight;
        self
    }

    pub fn with_logit_exponent(mut self, exponent: f64) -> Self {
        self.logit_exponent = exponent;
        self
    }

    pub fn with_technology(mut self, technology: Technology) -> Self {
        self.technologies.push(technology);
        self
    }

    /// Technology shares at the given prices.
    pub fn shares(&self, prices: &MarketSet) -> Vec<f64> {
        self.pricing(prices).shares
    }

    fn pricing(&self, prices: &MarketSet) -> Pricing {
        let weights_and_costs: Vec<(f64, f64)> = self
            .technologies
            .iter()
            .map(|tech| (tech.share_weight, tech.cost(prices)))
            .collect();
        Pricing::from_costs(&weights_and_costs, self.logit_exponent)
    }

    fn distribute_by(&self, output: f64, shares: &[f64], prices: &MarketSet, flows: &mut Flows) {
        for (share, tech) in shares.iter().zip(&self.technologies) {
            tech.distribute(output * share, prices, flows);
        }
    }
}

impl CascadeNode for Subsector {
    fn cost(&self, prices: &MarketSet) -> f64 {
        self.pricing(prices).cost
    }

    fn distribute(&self, output: f64, prices: &MarketSet, flows: &mut Flows) {
        let pricing = self.pricing(prices);
        self.distribute_by(output, &pricing.shares, prices, flows);
    }
}

/// How a sector decides how much to produce.
#[derive(Clone, Debug)]
pub enum SectorOutput {
    /// Supplies its own market, expanding as the market price rises above cost:
    /// `base_output × (price / cost)^elasticity`.
    Supply {
        market: MarketRef,
        base_output: f64,
        elasticity: f64,
    },
    /// End-use service demand:
    /// `base_service × (1 + growth)^period × (cost / base_price)^elasticity`.
    FinalDemand {
        base_service: f64,
        base_price: f64,
        elasticity: f64,
        growth: f64,
    },
}

/// Top of the cascade within a region.
#[derive(Clone, Debug)]
pub struct Sector {
    name: String,
    logit_exponent: f64,
    output: SectorOutput,
    subsectors: Vec<Subsector>,
}

impl Sector {
    /// A sector producing `market`'s good.
    pub fn supply<S: Into<String>>(
        name: S,
        market: MarketRef,
        base_output: f64,
        elasticity: f64,
    ) -> Self {
        Self::with_output(
            name,
            SectorOutput::Supply {
                market,
                base_output,
                elasticity,
            },
        )
    }

    /// An end-use sector whose service demand responds to its own price.
    ///
    /// `base_price` divides the sector's cost, so it must be finite and positive.
    pub fn final_demand<S: Into<String>>(
        name: S,
        base_service: f64,
        base_price: f64,
        elasticity: f64,
    ) -> Result<Self> {
        if !(base_price.is_finite() && base_price > 0.0) {
            return Err(SolveError::invalid_option(
                "base_price",
                "must be finite and strictly positive",
            ));
        }
        Ok(Self::with_output(
            name,
            SectorOutput::FinalDemand {
                base_service,
                base_price,
                elasticity,
                growth: 0.0,
            },
        ))
    }

    fn with_output<S: Into<String>>(name: S, output: SectorOutput) -> Self {
        Self {
            name: name.into(),
            logit_exponent: -3.0,
            output,
            subsectors: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Per-period growth of final service demand. Ignored by supply sectors.
    pub fn with_growth(mut self, rate: f64) -> Self {
        if let SectorOutput::FinalDemand { growth, .. } = &mut self.output {
            *growth = rate;
        }
        self
    }

    pub fn with_logit_exponent(mut self, exponent: f64) -> Self {
        self.logit_exponent = exponent;
        self
    }

    pub fn with_subsector(mut self, subsector: Subsector) -> Self {
        self.subsectors.push(subsector);
        self
    }

    /// Subsector shares at the given prices.
    pub fn shares(&self, prices: &MarketSet) -> Vec<f64> {
        self.pricing(prices).sector.shares
    }

    fn pricing(&self, prices: &MarketSet) -> SectorPricing {
        let subsectors: Vec<Pricing> = self
            .subsectors
            .iter()
            .map(|subsector| subsector.pricing(prices))
            .collect();
        let weights_and_costs: Vec<(f64, f64)> = self
            .subsectors
            .iter()
            .zip(&subsectors)
            .map(|(subsector, pricing)| (subsector.share_weight, pricing.cost))
            .collect();
        SectorPricing {
            sector: Pricing::from_costs(&weights_and_costs, self.logit_exponent),
            subsectors,
        }
    }

    fn distribute_by(
        &self,
        output: f64,
        pricing: &SectorPricing,
        prices: &MarketSet,
        flows: &mut Flows,
    ) {
        for ((share, subsector), inner) in pricing
            .sector
            .shares
            .iter()
            .zip(&self.subsectors)
            .zip(&pricing.subsectors)
        {
            subsector.distribute_by(output * share, &inner.shares, prices, flows);
        }
    }

    /// Output the sector produces in `period` at the given prices.
    pub fn output(&self, period: usize, prices: &MarketSet) -> f64 {
        self.output_at(period, prices, self.pricing(prices).sector.cost)
    }

    fn output_at(&self, period: usize, prices: &MarketSet, cost: f64) -> f64 {
        let cost = cost.max(MIN_COST);
        match &self.output {
            SectorOutput::Supply {
                market,
                base_output,
                elasticity,
            } => base_output * (prices.price_of(market).max(0.0) / cost).powf(*elasticity),
            SectorOutput::FinalDemand {
                base_service,
                base_price,
                elasticity,
                growth,
            } => {
                base_service
                    * (1.0 + growth).powi(period as i32)
                    * (cost / base_price).powf(*elasticity)
            }
        }
    }

    /// Adds this sector's supply and input demands for `period`.
    ///
    /// Every technology is priced once; the same shares set the cost and
    /// split the output.
    pub fn calc(&self, period: usize, prices: &MarketSet, flows: &mut Flows) {
        let pricing = self.pricing(prices);
        let output = self.output_at(period, prices, pricing.sector.cost);
        if let SectorOutput::Supply { market, .. } = &self.output {
            flows.add_supply(market, output);
        }
        self.distribute_by(output, &pricing, prices, flows);
    }
}

/// Pricing of a sector and of each of its subsectors.
struct SectorPricing {
    sector: Pricing,
    subsectors: Vec<Pricing>,
}

impl CascadeNode for Sector {
    fn cost(&self, prices: &MarketSet) -> f64 {
        self.pricing(prices).sector.cost
    }

    fn distribute(&self, output: f64, prices: &MarketSet, flows: &mut Flows) {
        let pricing = self.pricing(prices);
        self.distribute_by(output, &pricing, prices, flows);
    }
}

/// A graded resource: cumulative quantity available at each price,
/// interpolated linearly and flat beyond the end points.
#[derive(Clone, Debug)]
pub struct Resource {
    market: MarketRef,
    curve: Vec<(f64, f64)>,
}

impl Resource {
    /// Builds a resource from `(price, quantity)` points sorted by strictly increasing price.
    pub fn new(market: MarketRef, curve: Vec<(f64, f64)>) -> Result<Self> {
        let invalid = |reason| SolveError::InvalidCurve {
            market: market.id().clone(),
            reason,
        };
        if curve.is_empty() {
            return Err(invalid("no points"));
        }
        if curve.iter().any(|(p, q)| !p.is_finite() || !q.is_finite()) {
            return Err(invalid("non-finite point"));
        }
        if curve.windows(2).any(|pair| pair[1].0 <= pair[0].0) {
            return Err(invalid("prices must be strictly increasing"));
        }
        Ok(Self { market, curve })
    }

    /// Quantity supplied at `price`.
    pub fn quantity(&self, price: f64) -> f64 {
        let (first, last) = (self.curve[0], self.curve[self.curve.len() - 1]);
        if price <= first.0 {
            return first.1;
        }
        if price >= last.0 {
            return last.1;
        }
        let upper = self.curve.partition_point(|&(p, _)| p < price);
        let (p0, q0) = self.curve[upper - 1];
        let (p1, q1) = self.curve[upper];
        q0 + (q1 - q0) * (price - p0) / (p1 - p0)
    }

    pub fn calc(&self, prices: &MarketSet, flows: &mut Flows) {
        flows.add_supply(&self.market, self.quantity(prices.price_of(&self.market)));
    }
}

/// Exogenous supply of a policy market, such as an emissions cap, per period.
/// Periods past the end of the schedule use its last value.
#[derive(Clone, Debug)]
pub struct Constraint {
    market: MarketRef,
    schedule: Vec<f64>,
}

impl Constraint {
    pub fn new(market: MarketRef, schedule: Vec<f64>) -> Result<Self> {
        if schedule.is_empty() || schedule.iter().any(|value| !value.is_finite()) {
            return Err(SolveError::InvalidCurve {
                market: market.id().clone(),
                reason: "constraint schedule must be non-empty and finite",
            });
        }
        Ok(Self { market, schedule })
    }

    pub fn quantity(&self, period: usize) -> f64 {
        self.schedule[period.min(self.schedule.len() - 1)]
    }

    pub fn calc(&self, period: usize, flows: &mut Flows) {
        flows.add_supply(&self.market, self.quantity(period));
    }
}

/// Everything computed for one region.
#[derive(Clone, Debug)]
pub struct Region {
    name: String,
    sectors: Vec<Sector>,
    resources: Vec<Resource>,
    constraints: Vec<Constraint>,
}

impl Region {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            sectors: Vec::new(),
            resources: Vec::new(),
            constraints: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_sector(mut self, sector: Sector) -> Self {
        self.sectors.push(sector);
        self
    }

    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn calc(&self, period: usize, prices: &MarketSet, flows: &mut Flows) {
        for resource in &self.resources {
            resource.calc(prices, flows);
        }
        for constraint in &self.constraints {
            constraint.calc(period, flows);
        }
        for sector in &self.sectors {
            sector.calc(period, prices, flows);
        }
    }
}

/// All regions; the calculation graph for a full model.
///
/// Regions are evaluated in parallel and their flows summed in region order,
/// so results do not depend on thread scheduling.
#[derive(Clone, Debug, Default)]
pub struct Economy {
    regions: Vec<Region>,
}

impl Economy {
    pub fn new(regions: Vec<Region>) -> Self {
        Self { regions }
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }
}

impl CalculationGraph for Economy {
    fn calc(&self, period: usize, prices: &MarketSet, flows: &mut Flows) -> Result<()> {
        let regional: Vec<Flows> = self
            .regions
            .par_iter()
            .map(|region| {
                let mut region_flows = Flows::zeros(prices.len());
                region.calc(period, prices, &mut region_flows);
                region_flows
            })
            .collect();
        for region_flows in &regional {
            flows.merge(region_flows);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{MarketId, MarketKind};
    use approx::assert_relative_eq;

    fn markets() -> (MarketSet, MarketRef, MarketRef, MarketRef) {
        let mut markets = MarketSet::new();
        let coal = markets
            .add_market(MarketId::new("coal", "r"), MarketKind::Normal, 1.0)
            .unwrap();
        let gas = markets
            .add_market(MarketId::new("gas", "r"), MarketKind::Normal, 2.0)
            .unwrap();
        let co2 = markets
            .add_market(MarketId::new("CO2", "r"), MarketKind::Tax, 0.5)
            .unwrap();
        (markets, coal, gas, co2)
    }

    #[test]
    fn logit_shares_favour_cheaper_options() {
        let shares = logit_shares(&[(1.0, 1.0), (1.0, 2.0)], -2.0);
        assert_relative_eq!(shares[0], 0.8, epsilon = 1e-12);
        assert_relative_eq!(shares[1], 0.2, epsilon = 1e-12);

        let none = logit_shares(&[(0.0, 1.0), (0.0, 2.0)], -2.0);
        assert_eq!(none, vec![0.0, 0.0]);
    }

    #[test]
    fn technology_prices_inputs_and_emissions() {
        let (markets, coal, _, co2) = markets();
        let tech = Technology::new("coal plant", 0.5)
            .with_input(coal.clone(), 2.0)
            .with_emission(co2.clone(), 1.0);
        assert_relative_eq!(tech.cost(&markets), 0.5 + 2.0 * 1.0 + 0.5);

        let mut flows = Flows::zeros(markets.len());
        tech.distribute(3.0, &markets, &mut flows);
        assert_relative_eq!(flows.demand(coal.index()), 6.0);
        assert_relative_eq!(flows.demand(co2.index()), 3.0);
    }

    #[test]
    fn final_demand_cascades_to_inputs() {
        let (markets, coal, gas, _) = markets();
        let sector = Sector::final_demand("electricity", 10.0, 3.0, -0.5)
            .unwrap()
            .with_subsector(
                Subsector::new("thermal")
                    .with_logit_exponent(-2.0)
                    .with_technology(Technology::new("coal", 0.0).with_input(coal.clone(), 1.0))
                    .with_technology(Technology::new("gas", 0.0).with_input(gas.clone(), 1.0)),
            );

        // Costs 1 and 2 share 0.8 / 0.2, so the sector price is 1.2.
        assert_relative_eq!(sector.cost(&markets), 1.2, epsilon = 1e-12);
        let output = sector.output(0, &markets);
        assert_relative_eq!(output, 10.0 * (1.2_f64 / 3.0).powf(-0.5), epsilon = 1e-12);

        let mut flows = Flows::zeros(markets.len());
        sector.calc(0, &markets, &mut flows);
        assert_relative_eq!(flows.demand(coal.index()), 0.8 * output, epsilon = 1e-12);
        assert_relative_eq!(flows.demand(gas.index()), 0.2 * output, epsilon = 1e-12);

        let grown = sector.clone().with_growth(0.1).output(2, &markets);
        assert_relative_eq!(grown, output * 1.21, epsilon = 1e-12);
    }

    #[test]
    fn supply_sector_supplies_its_market() {
        let (markets, coal, gas, _) = markets();
        let sector = Sector::supply("gas processing", gas.clone(), 5.0, 2.0).with_subsector(
            Subsector::new("processing")
                .with_technology(Technology::new("plant", 0.5).with_input(coal.clone(), 0.5)),
        );
        let mut flows = Flows::zeros(markets.len());
        sector.calc(0, &markets, &mut flows);

        // Price is twice the cost, so elasticity 2 gives four times the base output.
        assert_relative_eq!(flows.supply(gas.index()), 20.0, epsilon = 1e-12);
        assert_relative_eq!(flows.demand(coal.index()), 10.0, epsilon = 1e-12);
    }

    #[test]
    fn resource_curve_interpolates_and_validates() {
        let (_, coal, _, _) = markets();
        let resource =
            Resource::new(coal.clone(), vec![(0.0, 0.0), (5.0, 100.0), (20.0, 200.0)]).unwrap();
        assert_relative_eq!(resource.quantity(-1.0), 0.0);
        assert_relative_eq!(resource.quantity(2.5), 50.0);
        assert_relative_eq!(resource.quantity(5.0), 100.0);
        assert_relative_eq!(resource.quantity(12.5), 150.0);
        assert_relative_eq!(resource.quantity(50.0), 200.0);

        let unsorted = Resource::new(coal, vec![(5.0, 1.0), (5.0, 2.0)]);
        assert!(matches!(unsorted, Err(SolveError::InvalidCurve { .. })));
    }

    #[test]
    fn final_demand_requires_positive_base_price() {
        for base_price in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                Sector::final_demand("heat", 3.0, base_price, -1.0),
                Err(SolveError::InvalidOption { name: "base_price", .. })
            ));
        }
        assert!(Sector::final_demand("heat", 3.0, 1e-3, -1.0).is_ok());
    }

    #[test]
    fn nested_pricing_agrees_with_node_costs() {
        let (markets, coal, gas, co2) = markets();
        let thermal = Subsector::new("thermal")
            .with_logit_exponent(-2.0)
            .with_technology(Technology::new("coal", 0.0).with_input(coal.clone(), 1.0))
            .with_technology(
                Technology::new("gas", 0.2)
                    .with_input(gas.clone(), 1.0)
                    .with_emission(co2.clone(), 0.5),
            );
        let hydro = Subsector::new("hydro")
            .with_share_weight(0.5)
            .with_technology(Technology::new("dam", 1.5));
        let sector = Sector::supply("electricity", gas.clone(), 4.0, 1.0)
            .with_logit_exponent(-1.0)
            .with_subsector(thermal.clone())
            .with_subsector(hydro.clone());

        // Thermal: costs 1 and 2.45 share by c^-2; the sector then shares thermal
        // against hydro by weighted c^-1.
        let thermal_cost = thermal.cost(&markets);
        let raw = [1.0, 1.0 / (2.45_f64 * 2.45)];
        let expected_thermal = (raw[0] * 1.0 + raw[1] * 2.45) / (raw[0] + raw[1]);
        assert_relative_eq!(thermal_cost, expected_thermal, epsilon = 1e-12);

        let shares = sector.shares(&markets);
        let weights = [1.0 / thermal_cost, 0.5 / 1.5];
        assert_relative_eq!(shares[0], weights[0] / (weights[0] + weights[1]), epsilon = 1e-12);
        let cost = shares[0] * thermal_cost + shares[1] * 1.5;
        assert_relative_eq!(sector.cost(&markets), cost, epsilon = 1e-12);

        let mut flows = Flows::zeros(markets.len());
        sector.calc(0, &markets, &mut flows);
        let output = 4.0 * 2.0 / cost;
        assert_relative_eq!(flows.supply(gas.index()), output, epsilon = 1e-12);
        let thermal_shares = thermal.shares(&markets);
        assert_relative_eq!(
            flows.demand(coal.index()),
            output * shares[0] * thermal_shares[0],
            epsilon = 1e-12
        );
        assert_relative_eq!(
            flows.demand(co2.index()),
            0.5 * output * shares[0] * thermal_shares[1],
            epsilon = 1e-12
        );
    }

    #[test]
    fn economy_sums_regions_deterministically() {
        let (markets, coal, gas, co2) = markets();
        let region = |name: &str| {
            Region::new(name)
                .with_resource(Resource::new(coal.clone(), vec![(0.0, 0.0), (4.0, 40.0)]).unwrap())
                .with_constraint(Constraint::new(co2.clone(), vec![7.0, 5.0]).unwrap())
                .with_sector(
                    Sector::final_demand("heat", 3.0, 2.0, -1.0)
                        .unwrap()
                        .with_subsector(Subsector::new("boilers").with_technology(
                            Technology::new("gas", 0.0).with_input(gas.clone(), 1.0),
                        )),
                )
        };
        let economy = Economy::new(vec![region("north"), region("south")]);

        let mut first = Flows::zeros(markets.len());
        economy.calc(1, &markets, &mut first).unwrap();
        let mut second = Flows::zeros(markets.len());
        economy.calc(1, &markets, &mut second).unwrap();

        assert_eq!(first, second);
        assert_relative_eq!(first.supply(coal.index()), 20.0);
        assert_relative_eq!(first.supply(co2.index()), 10.0);
        assert_relative_eq!(first.demand(gas.index()), 6.0);
    }
}
