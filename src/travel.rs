//! Troop and merchant movement.
//!
//! The [`TravelScheduler`] owns every [`DispatchOrder`] between departure and
//! arrival. Orders sit in a min-heap keyed by `(arrives_at, id)`; the engine
//! pops them one at a time once the clock has passed their arrival, so each
//! order is handed out exactly once and never early, and orders scheduled
//! during resolution (return trips) still come out in timestamp order.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::config::Ruleset;
use crate::error::{CoreError, CoreResult};
use crate::game::{AccountId, Coord, Resources, Troops, VillageId};

/// Absorbs representation error before rounding travel times up.
const ROUNDING_EPSILON: f64 = 1e-9;

/// Dispatch order identifier. Ids are handed out in increasing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(u64);

impl OrderId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why something is on the road.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    /// Fight; conquest-capable survivors lower loyalty.
    Attack,
    /// Fight for plunder only.
    Raid,
    /// Join the garrison of a village of the same account.
    Reinforce,
    /// Deliver resources.
    Trade,
    /// Settle an empty coordinate.
    FoundVillage,
    /// Travel back to the origin village.
    Return,
}

impl Purpose {
    /// Whether the order may be called back while in flight.
    #[must_use]
    pub const fn is_cancellable(self) -> bool {
        !matches!(self, Self::Return)
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Attack => "attack",
            Self::Raid => "raid",
            Self::Reinforce => "reinforce",
            Self::Trade => "trade",
            Self::FoundVillage => "found village",
            Self::Return => "return",
        };
        f.write_str(name)
    }
}

/// The immutable payload of a dispatch, before the scheduler stamps it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDraft {
    /// Village the troops or merchants belong to.
    pub origin: VillageId,
    /// Account that sent them.
    pub owner: AccountId,
    /// Departure coordinate.
    pub from: Coord,
    /// Destination coordinate.
    pub target: Coord,
    /// Units on the move.
    pub troops: Troops,
    /// Resources carried (trade cargo or plunder).
    pub cargo: Resources,
    /// What happens on arrival.
    pub purpose: Purpose,
}

/// Units or merchants in transit.
///
/// Everything needed to resolve the arrival is carried in the order, so
/// resolution never has to read the origin village.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchOrder {
    /// Order id.
    pub id: OrderId,
    /// Village the troops or merchants belong to.
    pub origin: VillageId,
    /// Account that sent them.
    pub owner: AccountId,
    /// Departure coordinate.
    pub from: Coord,
    /// Destination coordinate.
    pub target: Coord,
    /// Units on the move.
    pub troops: Troops,
    /// Resources carried.
    pub cargo: Resources,
    /// What happens on arrival.
    pub purpose: Purpose,
    /// Departure instant.
    pub departed_at: Timestamp,
    /// Arrival instant, never before departure.
    pub arrives_at: Timestamp,
    /// Set once the order has been handed out for resolution.
    pub resolved: bool,
}

impl DispatchOrder {
    /// Seconds between departure and arrival.
    #[must_use]
    pub const fn travel_secs(&self) -> u64 {
        self.arrives_at.secs_since(self.departed_at)
    }

    /// The draft for the trip back home, carrying `troops` and `cargo`.
    #[must_use]
    pub fn homeward(&self, troops: Troops, cargo: Resources) -> OrderDraft {
        OrderDraft {
            origin: self.origin,
            owner: self.owner,
            from: self.target,
            target: self.from,
            troops,
            cargo,
            purpose: Purpose::Return,
        }
    }
}

/// Canonical travel distance between two coordinates.
#[must_use]
pub const fn distance(a: Coord, b: Coord) -> u32 {
    a.distance(b)
}

/// Travel time in whole seconds, rounded up.
///
/// `speed` is in fields per hour, `secs_per_field` converts a speed-1 field
/// crossing into seconds and `world_speed` divides the result. Non-positive
/// speeds are treated as 1.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn duration(distance: u32, speed: f64, secs_per_field: u64, world_speed: f64) -> u64 {
    let speed = if speed > 0.0 { speed } else { 1.0 };
    let world_speed = if world_speed > 0.0 { world_speed } else { 1.0 };
    let raw = f64::from(distance) * secs_per_field as f64 / (speed * world_speed);
    (raw - ROUNDING_EPSILON).ceil().max(0.0) as u64
}

/// Speed of the slowest unit type with a non-zero quantity.
///
/// # Errors
///
/// [`CoreError::UnknownUnit`] for types missing from the ruleset and
/// [`CoreError::EmptyOrder`] when no unit has a non-zero quantity.
pub fn slowest_speed(troops: &Troops, rules: &Ruleset) -> CoreResult<f64> {
    let mut slowest: Option<f64> = None;
    for (name, _) in troops.iter().filter(|(_, n)| **n > 0) {
        let unit = rules
            .unit(name)
            .ok_or_else(|| CoreError::UnknownUnit(name.clone()))?;
        slowest = Some(slowest.map_or(unit.speed, |s| s.min(unit.speed)));
    }
    slowest.ok_or(CoreError::EmptyOrder)
}

/// Min-heap of outstanding dispatch orders.
#[derive(Debug, Clone, Default)]
pub struct TravelScheduler {
    heap: BinaryHeap<Reverse<(Timestamp, OrderId)>>,
    orders: BTreeMap<OrderId, DispatchOrder>,
    next_id: u64,
}

impl TravelScheduler {
    /// An empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a scheduler from persisted orders.
    ///
    /// New ids continue after the largest of `next_id` and the restored ids.
    #[must_use]
    pub fn restore(orders: impl IntoIterator<Item = DispatchOrder>, next_id: u64) -> Self {
        let mut scheduler = Self {
            next_id,
            ..Self::default()
        };
        for order in orders.into_iter().filter(|o| !o.resolved) {
            scheduler.next_id = scheduler.next_id.max(order.id.0 + 1);
            scheduler.heap.push(Reverse((order.arrives_at, order.id)));
            scheduler.orders.insert(order.id, order);
        }
        scheduler
    }

    /// Id the next scheduled order will get.
    #[must_use]
    pub const fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Number of outstanding orders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    /// Whether nothing is in transit.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Outstanding orders in id order.
    pub fn orders(&self) -> impl Iterator<Item = &DispatchOrder> {
        self.orders.values()
    }

    /// Look up an outstanding order.
    #[must_use]
    pub fn get(&self, id: OrderId) -> Option<&DispatchOrder> {
        self.orders.get(&id)
    }

    /// Earliest pending arrival.
    #[must_use]
    pub fn next_arrival(&self) -> Option<Timestamp> {
        self.orders.values().map(|o| o.arrives_at).min()
    }

    /// Schedule `draft` departing at `now` and moving at `speed` fields/hour.
    pub fn schedule(&mut self, draft: OrderDraft, speed: f64, now: Timestamp, rules: &Ruleset) -> DispatchOrder {
        let secs = duration(
            distance(draft.from, draft.target),
            speed,
            rules.secs_per_field,
            rules.world_speed,
        );
        self.schedule_after(draft, now, secs)
    }

    /// Schedule `draft` departing at `now` and arriving `secs` later.
    pub fn schedule_after(&mut self, draft: OrderDraft, now: Timestamp, secs: u64) -> DispatchOrder {
        let id = OrderId(self.next_id);
        self.next_id += 1;
        let order = DispatchOrder {
            id,
            origin: draft.origin,
            owner: draft.owner,
            from: draft.from,
            target: draft.target,
            troops: draft.troops,
            cargo: draft.cargo,
            purpose: draft.purpose,
            departed_at: now,
            arrives_at: now.plus_secs(secs),
            resolved: false,
        };
        self.heap.push(Reverse((order.arrives_at, id)));
        self.orders.insert(id, order.clone());
        order
    }

    /// Pop the earliest order arriving at or before `now`, marked resolved.
    ///
    /// Cancelled orders leave stale heap entries behind; they are skipped here.
    pub fn pop_due(&mut self, now: Timestamp) -> Option<DispatchOrder> {
        while let Some(Reverse((at, id))) = self.heap.peek().copied() {
            if at > now {
                return None;
            }
            self.heap.pop();
            if let Some(mut order) = self.orders.remove(&id) {
                order.resolved = true;
                return Some(order);
            }
        }
        None
    }

    /// Every order due at or before `now`, in arrival order.
    pub fn drain_due(&mut self, now: Timestamp) -> Vec<DispatchOrder> {
        std::iter::from_fn(|| self.pop_due(now)).collect()
    }

    /// Remove an in-flight order within `window_secs` of its departure.
    ///
    /// Returns the removed order; scheduling the trip home is up to the
    /// caller, in the same critical section.
    ///
    /// # Errors
    ///
    /// [`CoreError::AlreadyResolved`] for orders that arrived or were
    /// cancelled, [`CoreError::InvalidTarget`] for ids never issued or
    /// return trips, [`CoreError::CancelWindowClosed`] past the window.
    pub fn cancel(&mut self, id: OrderId, now: Timestamp, window_secs: u64) -> CoreResult<DispatchOrder> {
        let Some(order) = self.orders.get(&id) else {
            if id.0 < self.next_id {
                return Err(CoreError::AlreadyResolved(id));
            }
            return Err(CoreError::InvalidTarget(format!("no order {id}")));
        };
        if !order.purpose.is_cancellable() {
            return Err(CoreError::InvalidTarget("return trips cannot be recalled".into()));
        }
        if now.secs_since(order.departed_at) > window_secs {
            return Err(CoreError::CancelWindowClosed(id));
        }
        let mut order = self
            .orders
            .remove(&id)
            .ok_or(CoreError::AlreadyResolved(id))?;
        order.resolved = true;
        Ok(order)
    }
}
