//! The set of all markets, addressable by `(good, region)` or by position.

use std::collections::HashMap;

use nalgebra::DVector;
use serde::Serialize;

use crate::error::{Result, SolveError};
use crate::market::{Market, MarketId, MarketKind};

/// A resolved handle to a market: its identity plus its position in the [`MarketSet`].
///
/// Cascade nodes hold these so that every calculation pass indexes markets
/// directly rather than hashing names.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MarketRef {
    id: MarketId,
    index: usize,
}

impl MarketRef {
    pub fn id(&self) -> &MarketId {
        &self.id
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

/// Every market in the model, in registration order.
#[derive(Clone, Debug, Default)]
pub struct MarketSet {
    markets: Vec<Market>,
    lookup: HashMap<MarketId, usize>,
}

impl MarketSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a market and returns a handle to it.
    pub fn add_market(
        &mut self,
        id: MarketId,
        kind: MarketKind,
        initial_price: f64,
    ) -> Result<MarketRef> {
        if self.lookup.contains_key(&id) {
            return Err(SolveError::DuplicateMarket { market: id });
        }
        if !initial_price.is_finite() {
            return Err(SolveError::NumericalError {
                context: "initial market price",
            });
        }
        let index = self.markets.len();
        self.lookup.insert(id.clone(), index);
        self.markets
            .push(Market::new(id.clone(), kind, initial_price));
        Ok(MarketRef { id, index })
    }

    /// Number of registered markets.
    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }

    pub fn contains(&self, id: &MarketId) -> bool {
        self.lookup.contains_key(id)
    }

    /// Resolves a `(good, region)` key into a handle, failing on unknown markets.
    pub fn resolve(&self, id: &MarketId) -> Result<MarketRef> {
        let index = self.index_of(id)?;
        Ok(MarketRef {
            id: id.clone(),
            index,
        })
    }

    pub fn index_of(&self, id: &MarketId) -> Result<usize> {
        self.lookup
            .get(id)
            .copied()
            .ok_or_else(|| SolveError::not_found(id))
    }

    pub fn get(&self, id: &MarketId) -> Result<&Market> {
        let index = self.index_of(id)?;
        Ok(&self.markets[index])
    }

    /// Market at a position previously obtained from [`MarketSet::resolve`].
    pub fn market(&self, index: usize) -> &Market {
        &self.markets[index]
    }

    /// Price of a resolved market.
    pub fn price_of(&self, market: &MarketRef) -> f64 {
        self.markets[market.index].price()
    }

    pub(crate) fn market_mut(&mut self, index: usize) -> &mut Market {
        &mut self.markets[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Market> {
        self.markets.iter()
    }

    pub fn price(&self, id: &MarketId) -> Result<f64> {
        Ok(self.get(id)?.price())
    }

    /// Sets a price by name. Does not recalculate.
    pub fn set_price(&mut self, id: &MarketId, price: f64) -> Result<()> {
        if !price.is_finite() {
            return Err(SolveError::NumericalError {
                context: "market price",
            });
        }
        let index = self.index_of(id)?;
        self.markets[index].set_price(price);
        Ok(())
    }

    /// Overrides the global solution tolerance for one market.
    pub fn set_tolerance(&mut self, id: &MarketId, tolerance: f64) -> Result<()> {
        let tolerance = SolveError::check_tolerance("market tolerance", tolerance)?;
        let index = self.index_of(id)?;
        self.markets[index].set_tolerance(tolerance);
        Ok(())
    }

    /// Supplies an initial bisection bracket for one market.
    pub fn set_bracket_hint(&mut self, id: &MarketId, low: f64, high: f64) -> Result<()> {
        if !(low.is_finite() && high.is_finite() && low < high) {
            return Err(SolveError::invalid_option(
                "bracket hint",
                "bounds must be finite with low < high",
            ));
        }
        let index = self.index_of(id)?;
        if low < 0.0 && !self.markets[index].allows_negative_price() {
            return Err(SolveError::invalid_option(
                "bracket hint",
                "only tax markets may have a negative lower bound",
            ));
        }
        self.markets[index].set_bracket_hint(low, high);
        Ok(())
    }

    /// Prices of every market in registration order.
    pub fn prices(&self) -> DVector<f64> {
        DVector::from_iterator(self.markets.len(), self.markets.iter().map(Market::price))
    }

    /// Restores every price from a vector produced by [`MarketSet::prices`].
    pub fn restore_prices(&mut self, prices: &DVector<f64>) -> Result<()> {
        if prices.len() != self.markets.len() {
            return Err(SolveError::dimension_mismatch(
                "price restore",
                self.markets.len(),
                prices.len(),
            ));
        }
        if prices.iter().any(|price| !price.is_finite()) {
            return Err(SolveError::NumericalError {
                context: "price restore",
            });
        }
        for (market, price) in self.markets.iter_mut().zip(prices.iter()) {
            market.set_price(*price);
        }
        Ok(())
    }
}
