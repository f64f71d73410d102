//! Offer Store - Route-partitioned, snapshot-isolated offer cache
//!
//! Each route owns one partition: an immutable, sorted vector of offers behind
//! an `Arc`. Writers build the next version of a partition outside any lock
//! and publish it with a pointer compare-and-swap, so a lock is only ever held
//! for the duration of an `Arc` clone or swap. Readers capture the `Arc`s they
//! need and iterate them without coordination; later puts and evictions never
//! change what an in-flight query sees.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

use crate::types::{DateRange, FlightOffer, RouteKey};

/// Immutable version of one route's offers, sorted by
/// `(travel_date, airline, observed_at)`
#[derive(Debug, Default)]
pub struct Partition {
    offers: Vec<FlightOffer>,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.offers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }

    /// Index bounds of the offers whose travel date falls in `range`
    fn range_bounds(&self, range: Option<DateRange>) -> (usize, usize) {
        match range {
            None => (0, self.offers.len()),
            Some(range) => {
                let start = self.offers.partition_point(|o| o.travel_date < range.from);
                let end = self.offers.partition_point(|o| o.travel_date <= range.to);
                (start, end.max(start))
            }
        }
    }

    /// Offers whose travel date falls in `range`, in partition order
    pub fn in_range(&self, range: Option<DateRange>) -> &[FlightOffer] {
        let (start, end) = self.range_bounds(range);
        &self.offers[start..end]
    }

    fn merged(&self, batch: &[FlightOffer], stats: &mut PutStats) -> Option<Partition> {
        let mut offers = self.offers.clone();
        let mut changed = false;
        for offer in batch {
            match offers.binary_search_by(|o| o.partition_key().cmp(&offer.partition_key())) {
                Ok(idx) => {
                    if offers[idx] == *offer {
                        stats.duplicates += 1;
                    } else {
                        // Stored offers are immutable; the first version wins.
                        stats.conflicts += 1;
                    }
                }
                Err(idx) => {
                    offers.insert(idx, offer.clone());
                    stats.inserted += 1;
                    changed = true;
                }
            }
        }
        changed.then_some(Partition { offers })
    }

    fn without_observed_before(&self, cutoff: DateTime<Utc>) -> Option<(Partition, usize)> {
        let kept: Vec<FlightOffer> = self
            .offers
            .iter()
            .filter(|o| o.observed_at >= cutoff)
            .cloned()
            .collect();
        let removed = self.offers.len() - kept.len();
        (removed > 0).then_some((Partition { offers: kept }, removed))
    }
}

#[derive(Debug, Default)]
struct PartitionSlot {
    current: RwLock<Arc<Partition>>,
}

impl PartitionSlot {
    fn load(&self) -> Arc<Partition> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Publish `next` only if the slot still holds `base`
    fn compare_and_swap(&self, base: &Arc<Partition>, next: Partition) -> bool {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if Arc::ptr_eq(&guard, base) {
            *guard = Arc::new(next);
            true
        } else {
            false
        }
    }
}

/// Counters returned by [`OfferStore::put`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PutStats {
    /// New offers stored
    pub inserted: usize,
    /// Identical offers already present (no-op)
    pub duplicates: usize,
    /// Offers whose identity was already stored with different content
    pub conflicts: usize,
}

/// Route-partitioned offer store
#[derive(Debug, Default)]
pub struct OfferStore {
    partitions: RwLock<HashMap<RouteKey, Arc<PartitionSlot>>>,
}

impl OfferStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, route: &RouteKey) -> Arc<PartitionSlot> {
        if let Some(slot) = self
            .partitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(route)
        {
            return slot.clone();
        }
        self.partitions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(route.clone())
            .or_default()
            .clone()
    }

    fn existing_slot(&self, route: &RouteKey) -> Option<Arc<PartitionSlot>> {
        self.partitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(route)
            .cloned()
    }

    fn all_slots(&self) -> Vec<(RouteKey, Arc<PartitionSlot>)> {
        let mut slots: Vec<(RouteKey, Arc<PartitionSlot>)> = self
            .partitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(route, slot)| (route.clone(), slot.clone()))
            .collect();
        slots.sort_by(|a, b| a.0.cmp(&b.0));
        slots
    }

    /// Insert offers. Re-inserting an identical offer is a no-op.
    pub fn put<I>(&self, offers: I) -> PutStats
    where
        I: IntoIterator<Item = FlightOffer>,
    {
        let mut by_route: BTreeMap<RouteKey, Vec<FlightOffer>> = BTreeMap::new();
        for offer in offers {
            by_route.entry(offer.route.clone()).or_default().push(offer);
        }

        let mut total = PutStats::default();
        for (route, batch) in by_route {
            let slot = self.slot(&route);
            let stats = loop {
                let base = slot.load();
                let mut stats = PutStats::default();
                match base.merged(&batch, &mut stats) {
                    None => break stats,
                    Some(next) => {
                        if slot.compare_and_swap(&base, next) {
                            break stats;
                        }
                        debug!(route = %route, "Partition changed during put, retrying");
                    }
                }
            };
            total.inserted += stats.inserted;
            total.duplicates += stats.duplicates;
            total.conflicts += stats.conflicts;
        }
        total
    }

    /// Lazy sequence of offers, optionally restricted to one route and a
    /// travel-date range. The set of offers is fixed at call time.
    pub fn query(&self, route: Option<&RouteKey>, range: Option<DateRange>) -> OfferCursor {
        let snapshot = match route {
            Some(route) => self.snapshot_route(route),
            None => self.snapshot_all(),
        };
        snapshot.into_cursor(range)
    }

    /// Point-in-time view of the partitions whose route matches `filter`
    pub fn snapshot<F>(&self, filter: F) -> StoreSnapshot
    where
        F: Fn(&RouteKey) -> bool,
    {
        let partitions = self
            .all_slots()
            .into_iter()
            .filter(|(route, _)| filter(route))
            .map(|(route, slot)| (route, slot.load()))
            .filter(|(_, partition)| !partition.is_empty())
            .collect();
        StoreSnapshot {
            partitions,
            taken_at: Utc::now(),
        }
    }

    pub fn snapshot_all(&self) -> StoreSnapshot {
        self.snapshot(|_| true)
    }

    pub fn snapshot_route(&self, route: &RouteKey) -> StoreSnapshot {
        let partitions = self
            .existing_slot(route)
            .map(|slot| slot.load())
            .filter(|partition| !partition.is_empty())
            .map(|partition| vec![(route.clone(), partition)])
            .unwrap_or_default();
        StoreSnapshot {
            partitions,
            taken_at: Utc::now(),
        }
    }

    /// Drop offers observed before `cutoff`. Queries already running keep
    /// their snapshot.
    pub fn evict_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut evicted = 0usize;
        for (route, slot) in self.all_slots() {
            loop {
                let base = slot.load();
                match base.without_observed_before(cutoff) {
                    None => break,
                    Some((next, removed)) => {
                        if slot.compare_and_swap(&base, next) {
                            evicted += removed;
                            break;
                        }
                        debug!(route = %route, "Partition changed during eviction, retrying");
                    }
                }
            }
        }
        if evicted > 0 {
            info!(evicted, cutoff = %cutoff, "Evicted expired offers");
        }
        evicted
    }

    /// Number of stored offers
    pub fn len(&self) -> usize {
        self.all_slots()
            .iter()
            .map(|(_, slot)| slot.load().len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Routes holding at least one offer, sorted
    pub fn routes(&self) -> Vec<RouteKey> {
        self.snapshot_all()
            .partitions
            .into_iter()
            .map(|(route, _)| route)
            .collect()
    }
}

/// Point-in-time set of partitions
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    partitions: Vec<(RouteKey, Arc<Partition>)>,
    taken_at: DateTime<Utc>,
}

impl StoreSnapshot {
    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn routes(&self) -> impl Iterator<Item = &RouteKey> {
        self.partitions.iter().map(|(route, _)| route)
    }

    pub fn len(&self) -> usize {
        self.partitions.iter().map(|(_, p)| p.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrowing iterator over offers in route order, then partition order
    pub fn iter(&self, range: Option<DateRange>) -> impl Iterator<Item = &FlightOffer> {
        self.partitions
            .iter()
            .flat_map(move |(_, partition)| partition.in_range(range).iter())
    }

    /// Offers for one route contained in this snapshot
    pub fn route_offers<'a>(
        &'a self,
        route: &'a RouteKey,
        range: Option<DateRange>,
    ) -> impl Iterator<Item = &'a FlightOffer> + 'a {
        self.partitions
            .iter()
            .filter(move |(r, _)| r == route)
            .flat_map(move |(_, partition)| partition.in_range(range).iter())
    }

    pub fn into_cursor(self, range: Option<DateRange>) -> OfferCursor {
        OfferCursor {
            partitions: self.partitions.into_iter().map(|(_, p)| p).collect(),
            partition_idx: 0,
            pos: 0,
            end: None,
            range,
        }
    }
}

/// Owning, lazy iterator over a store snapshot
#[derive(Debug)]
pub struct OfferCursor {
    partitions: Vec<Arc<Partition>>,
    partition_idx: usize,
    pos: usize,
    end: Option<usize>,
    range: Option<DateRange>,
}

impl Iterator for OfferCursor {
    type Item = FlightOffer;

    fn next(&mut self) -> Option<FlightOffer> {
        loop {
            let partition = self.partitions.get(self.partition_idx)?;
            let end = match self.end {
                Some(end) => end,
                None => {
                    let (start, end) = partition.range_bounds(self.range);
                    self.pos = start;
                    self.end = Some(end);
                    end
                }
            };
            if self.pos < end {
                let offer = partition.offers[self.pos].clone();
                self.pos += 1;
                return Some(offer);
            }
            self.partition_idx += 1;
            self.end = None;
        }
    }
}

/// Earliest and latest travel date in a set of offers
pub fn travel_date_span<'a, I>(offers: I) -> Option<(NaiveDate, NaiveDate)>
where
    I: IntoIterator<Item = &'a FlightOffer>,
{
    offers.into_iter().fold(None, |acc, o| match acc {
        None => Some((o.travel_date, o.travel_date)),
        Some((lo, hi)) => Some((lo.min(o.travel_date), hi.max(o.travel_date))),
    })
}
