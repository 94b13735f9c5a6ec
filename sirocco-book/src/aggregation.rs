//! Price aggregation onto a tick grid.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use sirocco_core::types::TickSize;

/// Buckets raw price levels into a grid of the current tick size.
///
/// Bids are floored and asks are ceiled onto the grid, so the published
/// best bid never exceeds the true best bid and the published best ask
/// never falls below the true best ask. One aggregator is shared by all
/// published books; the tick is behind its own lock so publish-path reads
/// stay cheap.
///
/// # Examples
///
/// ```
/// use sirocco_book::Aggregator;
/// use sirocco_core::types::TickSize;
/// use rust_decimal_macros::dec;
///
/// let aggregator = Aggregator::new(TickSize::T10);
/// let bids = aggregator.aggregate_bids(&[(dec!(50007), dec!(1)), (dec!(50003), dec!(2))]);
/// assert_eq!(bids.get(&dec!(50000)), Some(&dec!(3)));
/// ```
#[derive(Debug)]
pub struct Aggregator {
    tick: RwLock<TickSize>,
}

impl Aggregator {
    /// Creates an aggregator with the given initial tick size.
    #[must_use]
    pub fn new(tick: TickSize) -> Self {
        Self {
            tick: RwLock::new(tick),
        }
    }

    /// Replaces the current tick size.
    pub fn set_tick(&self, tick: TickSize) {
        *self.tick.write() = tick;
    }

    /// Returns the current tick size.
    #[must_use]
    pub fn tick(&self) -> TickSize {
        *self.tick.read()
    }

    /// Aggregates bid levels, flooring each price onto the grid and
    /// summing quantities that land in the same bucket.
    #[must_use]
    pub fn aggregate_bids(&self, levels: &[(Decimal, Decimal)]) -> BTreeMap<Decimal, Decimal> {
        let tick = self.tick().as_decimal();
        bucket(levels, |price| (price / tick).floor() * tick)
    }

    /// Aggregates ask levels, ceiling each price onto the grid and
    /// summing quantities that land in the same bucket.
    #[must_use]
    pub fn aggregate_asks(&self, levels: &[(Decimal, Decimal)]) -> BTreeMap<Decimal, Decimal> {
        let tick = self.tick().as_decimal();
        bucket(levels, |price| (price / tick).ceil() * tick)
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(TickSize::default())
    }
}

fn bucket(
    levels: &[(Decimal, Decimal)],
    round: impl Fn(Decimal) -> Decimal,
) -> BTreeMap<Decimal, Decimal> {
    let mut buckets: BTreeMap<Decimal, Decimal> = BTreeMap::new();
    for (price, qty) in levels {
        *buckets.entry(round(*price)).or_insert(Decimal::ZERO) += *qty;
    }
    buckets
}

/// Drops bid levels priced implausibly far from the best ask.
///
/// Wide venue snapshots occasionally carry residual bids orders of
/// magnitude away from the market; anything outside
/// `[0.2 x best_ask, 2 x best_ask]` is removed before aggregation. With a
/// zero best ask the levels pass through unchanged.
#[must_use]
pub fn filter_bid_outliers(
    levels: Vec<(Decimal, Decimal)>,
    best_ask: Decimal,
) -> Vec<(Decimal, Decimal)> {
    if best_ask.is_zero() {
        return levels;
    }

    let max_price = best_ask * dec!(2.0);
    let min_price = best_ask * dec!(0.2);

    levels
        .into_iter()
        .filter(|(price, _)| *price >= min_price && *price <= max_price)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(pairs: &[(Decimal, Decimal)]) -> Vec<(Decimal, Decimal)> {
        pairs.to_vec()
    }

    #[test]
    fn test_bid_bucketing_floors() {
        let agg = Aggregator::new(TickSize::T10);
        let bids = agg.aggregate_bids(&levels(&[
            (dec!(50001), dec!(1)),
            (dec!(50005), dec!(1.5)),
            (dec!(50009), dec!(2)),
        ]));

        assert_eq!(bids.len(), 1);
        assert_eq!(bids.get(&dec!(50000)), Some(&dec!(4.5)));
    }

    #[test]
    fn test_ask_bucketing_ceils() {
        let agg = Aggregator::new(TickSize::T10);
        let asks = agg.aggregate_asks(&levels(&[(dec!(50001), dec!(1)), (dec!(50009), dec!(2))]));

        assert_eq!(asks.len(), 1);
        assert_eq!(asks.get(&dec!(50010)), Some(&dec!(3)));
    }

    #[test]
    fn test_exact_grid_price_keeps_bucket() {
        let agg = Aggregator::new(TickSize::T10);
        let bids = agg.aggregate_bids(&levels(&[(dec!(50000), dec!(2))]));
        let asks = agg.aggregate_asks(&levels(&[(dec!(50010), dec!(1))]));

        assert_eq!(bids.get(&dec!(50000)), Some(&dec!(2)));
        assert_eq!(asks.get(&dec!(50010)), Some(&dec!(1)));
    }

    #[test]
    fn test_fractional_tick() {
        let agg = Aggregator::new(TickSize::T01);
        let bids = agg.aggregate_bids(&levels(&[
            (dec!(50000.17), dec!(1)),
            (dec!(50000.11), dec!(2)),
        ]));

        assert_eq!(bids.len(), 1);
        assert_eq!(bids.get(&dec!(50000.1)), Some(&dec!(3)));
    }

    #[test]
    fn test_aggregation_idempotent_at_same_tick() {
        let agg = Aggregator::new(TickSize::T50);
        let raw = levels(&[
            (dec!(50012), dec!(1)),
            (dec!(50049), dec!(2)),
            (dec!(50051), dec!(3)),
        ]);

        let once = agg.aggregate_bids(&raw);
        let once_vec: Vec<(Decimal, Decimal)> = once.iter().map(|(p, q)| (*p, *q)).collect();
        let twice = agg.aggregate_bids(&once_vec);

        assert_eq!(once, twice);
    }

    #[test]
    fn test_spread_invariant_preserved() {
        // Published best bid <= true best bid, published best ask >= true
        // best ask, at every tick size.
        let bids = levels(&[(dec!(50007.3), dec!(1)), (dec!(49991), dec!(2))]);
        let asks = levels(&[(dec!(50012.8), dec!(1)), (dec!(50040), dec!(2))]);
        let true_best_bid = dec!(50007.3);
        let true_best_ask = dec!(50012.8);

        for tick in TickSize::ALL {
            let agg = Aggregator::new(tick);
            let agg_bids = agg.aggregate_bids(&bids);
            let agg_asks = agg.aggregate_asks(&asks);

            let published_bid = *agg_bids.last_key_value().unwrap().0;
            let published_ask = *agg_asks.first_key_value().unwrap().0;
            assert!(published_bid <= true_best_bid, "tick {tick}");
            assert!(published_ask >= true_best_ask, "tick {tick}");
        }
    }

    #[test]
    fn test_empty_levels() {
        let agg = Aggregator::default();
        assert!(agg.aggregate_bids(&[]).is_empty());
        assert!(agg.aggregate_asks(&[]).is_empty());
    }

    #[test]
    fn test_set_tick_changes_grid() {
        let agg = Aggregator::new(TickSize::T1);
        agg.set_tick(TickSize::T100);
        assert_eq!(agg.tick(), TickSize::T100);

        let bids = agg.aggregate_bids(&levels(&[(dec!(50099), dec!(1))]));
        assert_eq!(bids.get(&dec!(50000)), Some(&dec!(1)));
    }

    #[test]
    fn test_filter_bid_outliers() {
        let filtered = filter_bid_outliers(
            levels(&[
                (dec!(50000), dec!(1)),
                (dec!(9000), dec!(5)),
                (dec!(120000), dec!(2)),
            ]),
            dec!(50010),
        );

        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].0, dec!(50000));
    }

    #[test]
    fn test_filter_bid_outliers_no_best_ask() {
        let raw = levels(&[(dec!(50000), dec!(1)), (dec!(9000), dec!(5))]);
        let filtered = filter_bid_outliers(raw.clone(), Decimal::ZERO);
        assert_eq!(filtered, raw);
    }
}
