//! The progression engine: intents in, events out.
//!
//! Villages live behind one mutex each, so all mutation of a village's
//! ledger, queue, loyalty and garrison is serialized while different
//! villages proceed in parallel. Dispatch orders live in a single
//! [`TravelScheduler`] behind its own mutex.
//!
//! Lock order is world map, then one village, then the scheduler, then the
//! event bus. No code path holds two village locks at once: an arrival
//! touches only its destination, and anything owed to the origin travels
//! back as a new order.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, Timestamp};
use crate::combat::{carry_capacity, conquest_strength, Battle, CombatResolver, StrengthModel};
use crate::config::{CelebrationKind, Ruleset};
use crate::error::{ConfigError, CoreError, CoreResult};
use crate::events::{ArrivalOutcome, Event, EventBus, EventKind};
use crate::game::{
    check_village, invariants, AccountId, Celebration, ConquestOutcome, Coord, InvariantViolation,
    PendingUpgrade, Resources, SlotIndex, TrainingOrder, Troops, Village, VillageChange, VillageId,
};
use crate::snapshot::WorldSnapshot;
use crate::travel::{distance, duration, slowest_speed, DispatchOrder, OrderDraft, OrderId, Purpose, TravelScheduler};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

type VillageHandle = Arc<Mutex<Village>>;

#[derive(Debug, Default)]
struct World {
    villages: BTreeMap<VillageId, VillageHandle>,
    by_coord: BTreeMap<Coord, VillageId>,
    next_id: u32,
}

/// Cargo one trade order may carry: the merchant load times the number of
/// merchants, which is the level of the merchant building (at least one).
fn merchant_capacity(village: &Village, rules: &Ruleset) -> u64 {
    let merchants = rules
        .merchant
        .building
        .as_deref()
        .map_or(1, |building| village.queue().level_of(building).max(1));
    rules.merchant.capacity.saturating_mul(u64::from(merchants))
}

/// Summary of one [`Engine::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// Instant the world was advanced to.
    pub now: Timestamp,
    /// Dispatch orders resolved.
    pub arrivals: usize,
    /// Events published while catching villages up.
    pub events: usize,
}

/// Village progression and event-scheduling engine.
pub struct Engine<C: Clock> {
    rules: Arc<Ruleset>,
    clock: C,
    world: RwLock<World>,
    scheduler: Mutex<TravelScheduler>,
    bus: EventBus,
    resolver: Box<dyn CombatResolver>,
}

impl<C: Clock> fmt::Debug for Engine<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("villages", &read(&self.world).villages.len())
            .field("in_transit", &lock(&self.scheduler).len())
            .finish_non_exhaustive()
    }
}

impl<C: Clock> Engine<C> {
    /// An empty world under `rules`, driven by `clock`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the ruleset fails validation.
    pub fn new(rules: Ruleset, clock: C) -> Result<Self, ConfigError> {
        rules.validate()?;
        Ok(Self {
            rules: Arc::new(rules),
            clock,
            world: RwLock::new(World::default()),
            scheduler: Mutex::new(TravelScheduler::new()),
            bus: EventBus::new(),
            resolver: Box::new(StrengthModel::default()),
        })
    }

    /// Rebuild an engine from a snapshot.
    ///
    /// The clock should not be earlier than `snapshot.taken_at`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the ruleset fails validation or
    /// two villages share an id or a coordinate.
    pub fn restore(rules: Ruleset, clock: C, snapshot: WorldSnapshot) -> Result<Self, ConfigError> {
        let engine = Self::new(rules, clock)?;
        {
            let mut world = write(&engine.world);
            for village in snapshot.villages {
                let id = village.id();
                if world.by_coord.insert(village.coord(), id).is_some()
                    || world.villages.insert(id, Arc::new(Mutex::new(village))).is_some()
                {
                    return Err(ConfigError::Invalid(format!("duplicate village {id} in snapshot")));
                }
                world.next_id = world.next_id.max(id.get());
            }
            world.next_id = world.next_id.max(snapshot.next_village_id);
        }
        *lock(&engine.scheduler) = TravelScheduler::restore(snapshot.orders, snapshot.next_order_id);
        Ok(engine)
    }

    /// Replace the battle resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: impl CombatResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    /// The ruleset.
    #[must_use]
    pub fn rules(&self) -> &Ruleset {
        &self.rules
    }

    /// The clock.
    #[must_use]
    pub const fn clock(&self) -> &C {
        &self.clock
    }

    /// Current instant according to the clock.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> Receiver<Event> {
        self.bus.subscribe()
    }

    /// Ids of every village, ascending.
    #[must_use]
    pub fn village_ids(&self) -> Vec<VillageId> {
        read(&self.world).villages.keys().copied().collect()
    }

    /// The village standing on `coord`, if any.
    #[must_use]
    pub fn village_at(&self, coord: Coord) -> Option<VillageId> {
        read(&self.world).by_coord.get(&coord).copied()
    }

    /// Outstanding dispatch orders in id order.
    #[must_use]
    pub fn orders_in_transit(&self) -> Vec<DispatchOrder> {
        lock(&self.scheduler).orders().cloned().collect()
    }

    fn handle(&self, id: VillageId) -> CoreResult<VillageHandle> {
        read(&self.world)
            .villages
            .get(&id)
            .cloned()
            .ok_or(CoreError::UnknownVillage(id))
    }

    fn publish(&self, village: &mut Village, at: Timestamp, kind: EventKind) {
        let seq = village.next_seq();
        self.bus.publish(&Event {
            village: village.id(),
            seq,
            at,
            kind,
        });
    }

    fn publish_resources(&self, village: &mut Village, at: Timestamp) {
        let resources = village.ledger().snapshot();
        self.publish(village, at, EventKind::ResourcesUpdated { resources });
    }

    /// Bring `village` up to `now` and publish what changed.
    fn catch_up(&self, village: &mut Village, now: Timestamp) -> usize {
        let changes = village.advance_to(now, &self.rules);
        if changes.is_empty() {
            return 0;
        }
        let count = changes.len() + 1;
        for change in changes {
            let (at, kind) = match change {
                VillageChange::SlotCompleted {
                    at,
                    slot,
                    building,
                    level,
                } => {
                    tracing::debug!(village = %village.id(), slot, %building, level, "construction finished");
                    (at, EventKind::SlotCompleted { slot, building, level })
                }
                VillageChange::UnitsTrained { at, unit, count } => (at, EventKind::UnitsTrained { unit, count }),
                VillageChange::CelebrationCompleted { at, kind, loyalty } => {
                    (at, EventKind::CelebrationCompleted { kind, loyalty })
                }
                VillageChange::Starvation { at, deficit } => (at, EventKind::Starvation { deficit }),
            };
            self.publish(village, at, kind);
        }
        self.publish_resources(village, now);
        count
    }

    /// Run `f` in the village's critical section after catching up.
    fn with_village<T>(
        &self,
        id: VillageId,
        intent: &'static str,
        f: impl FnOnce(&mut Village, &Ruleset, Timestamp) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let now = self.now();
        self.resolve_arrivals(now);
        let handle = self.handle(id)?;
        let mut village = lock(&handle);
        self.catch_up(&mut village, now);
        let result = f(&mut village, &self.rules, now);
        match &result {
            Ok(_) => {
                tracing::debug!(village = %id, intent, "intent admitted");
                self.publish_resources(&mut village, now);
            }
            Err(err) => tracing::debug!(village = %id, intent, error = %err, "intent rejected"),
        }
        result
    }

    /// Found a village for `owner` at `coord` right now.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidTarget`] if the coordinate is off the map or taken.
    pub fn add_village(&self, owner: AccountId, coord: Coord, is_capital: bool) -> CoreResult<VillageId> {
        self.found_at(owner, coord, is_capital, self.now())
    }

    fn found_at(&self, owner: AccountId, coord: Coord, is_capital: bool, at: Timestamp) -> CoreResult<VillageId> {
        if !coord.within(self.rules.map_radius) {
            return Err(CoreError::InvalidTarget(format!("{coord} is off the map")));
        }
        let mut world = write(&self.world);
        if world.by_coord.contains_key(&coord) {
            return Err(CoreError::InvalidTarget(format!("{coord} is already settled")));
        }
        world.next_id += 1;
        let id = VillageId::new(world.next_id);
        let village = Village::found(id, owner, coord, is_capital, &self.rules, at);
        world.by_coord.insert(coord, id);
        world.villages.insert(id, Arc::new(Mutex::new(village)));
        tracing::info!(village = %id, %owner, %coord, is_capital, "village founded");
        Ok(id)
    }

    /// Grant troops and resources to a village outside normal play, for
    /// scenario setup and administration. Resources above capacity are lost.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownVillage`] or [`CoreError::UnknownUnit`].
    pub fn provision(&self, village: VillageId, troops: &Troops, resources: &Resources) -> CoreResult<()> {
        if let Some(unknown) = troops.keys().find(|name| self.rules.unit(name).is_none()) {
            return Err(CoreError::UnknownUnit(unknown.clone()));
        }
        self.with_village(village, "provision", |v, rules, _| {
            v.add_troops(troops, rules);
            v.ledger_mut().credit(resources);
            Ok(())
        })
    }

    /// Current state of a village, caught up to now.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownVillage`].
    pub fn village(&self, id: VillageId) -> CoreResult<Village> {
        let now = self.now();
        self.resolve_arrivals(now);
        let handle = self.handle(id)?;
        let mut village = lock(&handle);
        self.catch_up(&mut village, now);
        Ok(village.clone())
    }

    /// Upgrade the resource field on `slot`.
    ///
    /// # Errors
    ///
    /// [`CoreError::QueueOccupied`], [`CoreError::InsufficientResources`],
    /// [`CoreError::InvalidLevel`] and the slot errors of
    /// [`crate::game::ProgressionQueue::admit_upgrade`].
    pub fn upgrade_field(&self, village: VillageId, slot: SlotIndex) -> CoreResult<PendingUpgrade> {
        self.with_village(village, "upgrade_field", |v, rules, now| {
            v.upgrade(slot, true, None, rules, now)
        })
    }

    /// Upgrade or construct the building on `slot`. `building` is required
    /// when the slot is empty.
    ///
    /// # Errors
    ///
    /// As [`Engine::upgrade_field`].
    pub fn upgrade_building(
        &self,
        village: VillageId,
        slot: SlotIndex,
        building: Option<&str>,
    ) -> CoreResult<PendingUpgrade> {
        self.with_village(village, "upgrade_building", |v, rules, now| {
            v.upgrade(slot, false, building, rules, now)
        })
    }

    /// Train `quantity` units of type `unit`.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownUnit`], [`CoreError::QueueOccupied`],
    /// [`CoreError::MissingBuilding`], [`CoreError::EmptyOrder`] or
    /// [`CoreError::InsufficientResources`].
    pub fn train_units(&self, village: VillageId, unit: &str, quantity: u32) -> CoreResult<TrainingOrder> {
        self.with_village(village, "train_units", |v, rules, now| {
            v.train(unit, quantity, rules, now)
        })
    }

    /// Start a celebration.
    ///
    /// # Errors
    ///
    /// [`CoreError::CelebrationInProgress`] or
    /// [`CoreError::InsufficientResources`].
    pub fn start_celebration(&self, village: VillageId, kind: CelebrationKind) -> CoreResult<Celebration> {
        self.with_village(village, "start_celebration", |v, rules, now| {
            v.start_celebration(kind, rules, now)
        })
    }

    /// Cancel the pending upgrade on `slot`; returns the refund.
    ///
    /// # Errors
    ///
    /// [`CoreError::NothingPending`] or [`CoreError::UnknownSlot`].
    pub fn cancel_construction(&self, village: VillageId, slot: SlotIndex) -> CoreResult<Resources> {
        self.with_village(village, "cancel_construction", |v, rules, _| {
            v.cancel_construction(slot, rules)
        })
    }

    /// Send troops or merchants from `village` to `target`.
    ///
    /// Trade orders carry `cargo` and no troops; every other purpose carries
    /// troops and no cargo. Troops (or cargo) leave the village immediately.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidTarget`] when the destination contradicts the
    /// purpose, [`CoreError::CargoTooLarge`], [`CoreError::EmptyOrder`],
    /// [`CoreError::UnknownUnit`],
    /// [`CoreError::InsufficientTroops`] or
    /// [`CoreError::InsufficientResources`].
    pub fn dispatch(
        &self,
        village: VillageId,
        target: Coord,
        troops: Troops,
        cargo: Resources,
        purpose: Purpose,
    ) -> CoreResult<DispatchOrder> {
        let now = self.now();
        self.resolve_arrivals(now);
        let result = self.admit_dispatch(village, target, troops, cargo, purpose, now);
        match &result {
            Ok(order) => tracing::debug!(
                village = %village,
                order = %order.id,
                %purpose,
                arrives_at = %order.arrives_at,
                "dispatch admitted"
            ),
            Err(err) => tracing::debug!(village = %village, %purpose, error = %err, "dispatch rejected"),
        }
        result
    }

    fn admit_dispatch(
        &self,
        id: VillageId,
        target: Coord,
        troops: Troops,
        cargo: Resources,
        purpose: Purpose,
        now: Timestamp,
    ) -> CoreResult<DispatchOrder> {
        let invalid = |msg: &str| Err(CoreError::InvalidTarget(msg.to_string()));
        let rules = &*self.rules;

        if purpose == Purpose::Return {
            return invalid("return trips are scheduled by the engine");
        }
        if !target.within(rules.map_radius) {
            return invalid("destination is off the map");
        }
        let handle = self.handle(id)?;
        let sender = lock(&handle).owner();

        let destination = self.village_at(target);
        if destination == Some(id) {
            return invalid("a village cannot send to itself");
        }
        // read the destination owner without holding the sender's lock
        let destination_owner = match destination {
            Some(dest) => {
                let handle = self.handle(dest)?;
                let owner = lock(&handle).owner();
                Some(owner)
            }
            None => None,
        };

        let speed = if purpose == Purpose::Trade {
            if troops.values().any(|n| *n > 0) {
                return invalid("merchants do not escort troops");
            }
            if cargo.is_zero() {
                return Err(CoreError::EmptyOrder);
            }
            rules.merchant.speed
        } else {
            if !cargo.is_zero() {
                return invalid("only merchants carry cargo");
            }
            slowest_speed(&troops, rules)?
        };

        match (purpose, destination_owner) {
            (Purpose::Attack | Purpose::Raid, None) => return invalid("no village to attack there"),
            (Purpose::Attack | Purpose::Raid, Some(owner)) if owner == sender => {
                return invalid("cannot attack your own village");
            }
            (Purpose::Reinforce, None) => return invalid("no village to reinforce there"),
            (Purpose::Reinforce, Some(owner)) if owner != sender => {
                return invalid("reinforcements only go to your own villages");
            }
            (Purpose::Trade, None) => return invalid("no village to deliver to there"),
            (Purpose::FoundVillage, Some(_)) => return invalid("coordinate is already settled"),
            (Purpose::FoundVillage, None) => {
                let settlers: u32 = troops
                    .iter()
                    .filter(|(name, _)| rules.unit(name).is_some_and(|u| u.settler))
                    .map(|(_, n)| *n)
                    .sum();
                if settlers < rules.settlers_required {
                    return Err(CoreError::InvalidTarget(format!(
                        "founding needs {} settlers, got {settlers}",
                        rules.settlers_required
                    )));
                }
            }
            _ => {}
        }

        let mut village = lock(&handle);
        self.catch_up(&mut village, now);
        if village.owner() != sender {
            return invalid("village changed hands");
        }
        if purpose == Purpose::Trade {
            let capacity = merchant_capacity(&village, rules);
            if cargo.total() > capacity {
                return Err(CoreError::CargoTooLarge {
                    cargo: cargo.total(),
                    capacity,
                });
            }
            village.ledger_mut().debit(&cargo)?;
        } else {
            village.take_troops(&troops, rules)?;
        }
        let draft = OrderDraft {
            origin: id,
            owner: sender,
            from: village.coord(),
            target,
            troops,
            cargo,
            purpose,
        };
        let order = lock(&self.scheduler).schedule(draft, speed, now, rules);
        self.publish_resources(&mut village, now);
        Ok(order)
    }

    /// Call back an order within the cancellation window. The units turn
    /// around at once and need as long to get home as they have been away.
    ///
    /// Returns the return order.
    ///
    /// # Errors
    ///
    /// [`CoreError::AlreadyResolved`], [`CoreError::CancelWindowClosed`] or
    /// [`CoreError::InvalidTarget`].
    pub fn cancel_dispatch(&self, order: OrderId) -> CoreResult<DispatchOrder> {
        let now = self.now();
        self.resolve_arrivals(now);
        let mut scheduler = lock(&self.scheduler);
        let cancelled = scheduler.cancel(order, now, self.rules.dispatch_cancel_window_secs)?;
        let elapsed = now.secs_since(cancelled.departed_at);
        let draft = cancelled.homeward(cancelled.troops.clone(), cancelled.cargo);
        let home = scheduler.schedule_after(draft, now, elapsed);
        tracing::debug!(order = %order, home = %home.id, "dispatch recalled");
        Ok(home)
    }

    /// Resolve due arrivals and bring every village up to the clock.
    pub fn tick(&self) -> TickReport {
        let now = self.now();
        let arrivals = self.resolve_arrivals(now);
        let handles: Vec<VillageHandle> = read(&self.world).villages.values().cloned().collect();
        let events = handles
            .par_iter()
            .map(|handle| self.catch_up(&mut lock(handle), now))
            .sum();
        TickReport { now, arrivals, events }
    }

    /// Resolve every order arriving at or before `now`, earliest first.
    fn resolve_arrivals(&self, now: Timestamp) -> usize {
        let mut resolved = 0;
        loop {
            let Some(order) = lock(&self.scheduler).pop_due(now) else {
                break;
            };
            self.resolve(order);
            resolved += 1;
        }
        resolved
    }

    fn resolve(&self, order: DispatchOrder) {
        tracing::debug!(order = %order.id, purpose = %order.purpose, at = %order.arrives_at, "resolving arrival");
        let homeward = match order.purpose {
            Purpose::Return => {
                self.resolve_return(&order);
                None
            }
            Purpose::Attack | Purpose::Raid => self.resolve_battle(&order),
            Purpose::Reinforce => self.resolve_reinforcement(&order),
            Purpose::Trade => self.resolve_trade(&order),
            Purpose::FoundVillage => self.resolve_founding(&order),
        };
        if let Some(draft) = homeward {
            let secs = slowest_speed(&draft.troops, &self.rules).map_or(order.travel_secs(), |speed| {
                duration(
                    distance(draft.from, draft.target),
                    speed,
                    self.rules.secs_per_field,
                    self.rules.world_speed,
                )
            });
            lock(&self.scheduler).schedule_after(draft, order.arrives_at, secs);
        }
    }

    /// Destination lookup for an arriving order.
    fn destination(&self, order: &DispatchOrder) -> Option<VillageHandle> {
        self.village_at(order.target).and_then(|id| self.handle(id).ok())
    }

    /// Fallback for orders that cannot be carried out: report to the origin
    /// and send everything home.
    fn bounce(&self, order: &DispatchOrder, reason: &str) -> Option<OrderDraft> {
        tracing::warn!(order = %order.id, purpose = %order.purpose, reason, "arrival bounced");
        if let Ok(handle) = self.handle(order.origin) {
            let mut origin = lock(&handle);
            self.catch_up(&mut origin, order.arrives_at);
            self.publish(
                &mut origin,
                order.arrives_at,
                EventKind::DispatchArrived {
                    order: order.id,
                    purpose: order.purpose,
                    outcome: ArrivalOutcome::Bounced {
                        reason: reason.to_string(),
                    },
                },
            );
        }
        let has_troops = order.troops.values().any(|n| *n > 0);
        (has_troops || !order.cargo.is_zero()).then(|| order.homeward(order.troops.clone(), order.cargo))
    }

    fn resolve_return(&self, order: &DispatchOrder) {
        let Ok(handle) = self.handle(order.origin) else {
            tracing::warn!(order = %order.id, village = %order.origin, "origin vanished, returning troops disband");
            return;
        };
        let at = order.arrives_at;
        let mut village = lock(&handle);
        self.catch_up(&mut village, at);
        let outcome = if village.owner() == order.owner {
            village.add_troops(&order.troops, &self.rules);
            village.ledger_mut().credit(&order.cargo);
            ArrivalOutcome::Returned {
                troops: order.troops.clone(),
                cargo: order.cargo,
            }
        } else {
            tracing::warn!(order = %order.id, village = %order.origin, "home village changed hands, returning troops disband");
            ArrivalOutcome::Bounced {
                reason: "home village changed hands".into(),
            }
        };
        self.publish(
            &mut village,
            at,
            EventKind::DispatchArrived {
                order: order.id,
                purpose: order.purpose,
                outcome,
            },
        );
        self.publish_resources(&mut village, at);
    }

    fn resolve_battle(&self, order: &DispatchOrder) -> Option<OrderDraft> {
        let Some(handle) = self.destination(order) else {
            return self.bounce(order, "no village at the destination");
        };
        let rules = &*self.rules;
        let at = order.arrives_at;
        let mut village = lock(&handle);
        self.catch_up(&mut village, at);
        if village.owner() == order.owner {
            drop(village);
            return self.bounce(order, "destination belongs to the sender");
        }

        let report = self.resolver.resolve(&Battle {
            purpose: order.purpose,
            attackers: &order.troops,
            defenders: village.garrison(),
            rules,
        });
        village.set_garrison(report.defender_survivors.clone(), rules);

        let mut plunder = Resources::ZERO;
        let mut loyalty = None;
        let mut transfer = None;
        let mut blocked = false;
        if report.attacker_won {
            let carry = carry_capacity(&report.attacker_survivors, rules);
            plunder = village.ledger_mut().debit_up_to(&Resources::splat(carry / 4));

            let strength = conquest_strength(&report.attacker_survivors, rules);
            if order.purpose == Purpose::Attack && strength > 0.0 {
                let previous = village.owner();
                match village.conquer(order.owner, strength, rules) {
                    Ok(ConquestOutcome::Reduced { loyalty: l }) => loyalty = Some(l),
                    Ok(ConquestOutcome::Transferred { loyalty: l }) => {
                        loyalty = Some(l);
                        transfer = Some(previous);
                    }
                    Err(err) => {
                        tracing::info!(village = %village.id(), attacker = %order.owner, error = %err, "conquest attempt blocked");
                        blocked = true;
                    }
                }
            }
        }

        self.publish(
            &mut village,
            at,
            EventKind::DispatchArrived {
                order: order.id,
                purpose: order.purpose,
                outcome: ArrivalOutcome::Battle {
                    attacker_won: report.attacker_won,
                    plunder,
                },
            },
        );
        if let Some(l) = loyalty {
            self.publish(&mut village, at, EventKind::LoyaltyChanged { loyalty: l });
        }
        if blocked {
            self.publish(&mut village, at, EventKind::ConquestBlocked { attacker: order.owner });
        }
        if let Some(from) = transfer {
            tracing::info!(village = %village.id(), %from, to = %order.owner, "village changed hands");
            self.publish(
                &mut village,
                at,
                EventKind::OwnershipChanged {
                    from,
                    to: order.owner,
                },
            );
        }
        self.publish_resources(&mut village, at);
        drop(village);

        (!report.attacker_survivors.is_empty()).then(|| order.homeward(report.attacker_survivors, plunder))
    }

    fn resolve_reinforcement(&self, order: &DispatchOrder) -> Option<OrderDraft> {
        let Some(handle) = self.destination(order) else {
            return self.bounce(order, "no village at the destination");
        };
        let at = order.arrives_at;
        let mut village = lock(&handle);
        self.catch_up(&mut village, at);
        if village.owner() != order.owner {
            drop(village);
            return self.bounce(order, "destination no longer belongs to the sender");
        }
        village.add_troops(&order.troops, &self.rules);
        self.publish(
            &mut village,
            at,
            EventKind::DispatchArrived {
                order: order.id,
                purpose: order.purpose,
                outcome: ArrivalOutcome::Reinforced {
                    troops: order.troops.clone(),
                },
            },
        );
        None
    }

    fn resolve_trade(&self, order: &DispatchOrder) -> Option<OrderDraft> {
        let Some(handle) = self.destination(order) else {
            return self.bounce(order, "no village at the destination");
        };
        let at = order.arrives_at;
        let mut village = lock(&handle);
        self.catch_up(&mut village, at);
        let overflow = village.ledger_mut().credit(&order.cargo);
        let delivered = Resources::from_fn(|kind| order.cargo.get(kind).saturating_sub(overflow.get(kind)));
        self.publish(
            &mut village,
            at,
            EventKind::DispatchArrived {
                order: order.id,
                purpose: order.purpose,
                outcome: ArrivalOutcome::Delivered {
                    cargo: delivered,
                    overflow,
                },
            },
        );
        self.publish_resources(&mut village, at);
        None
    }

    fn resolve_founding(&self, order: &DispatchOrder) -> Option<OrderDraft> {
        let rules = &*self.rules;
        let id = match self.found_at(order.owner, order.target, false, order.arrives_at) {
            Ok(id) => id,
            Err(err) => return self.bounce(order, &err.to_string()),
        };

        let mut needed = rules.settlers_required;
        let mut rest = Troops::new();
        for (name, count) in &order.troops {
            let is_settler = rules.unit(name).is_some_and(|u| u.settler);
            let used = if is_settler { needed.min(*count) } else { 0 };
            needed -= used;
            if count - used > 0 {
                rest.insert(name.clone(), count - used);
            }
        }

        if let Ok(handle) = self.handle(id) {
            let mut village = lock(&handle);
            self.publish(
                &mut village,
                order.arrives_at,
                EventKind::DispatchArrived {
                    order: order.id,
                    purpose: order.purpose,
                    outcome: ArrivalOutcome::Founded { founded: id },
                },
            );
        }
        (!rest.is_empty()).then(|| order.homeward(rest, Resources::ZERO))
    }

    /// Persistable state of the whole world, caught up to now.
    #[must_use]
    pub fn snapshot(&self) -> WorldSnapshot {
        let report = self.tick();
        let world = read(&self.world);
        let villages = world.villages.values().map(|h| lock(h).clone()).collect();
        let scheduler = lock(&self.scheduler);
        WorldSnapshot {
            taken_at: report.now,
            next_village_id: world.next_id,
            next_order_id: scheduler.next_id(),
            villages,
            orders: scheduler.orders().cloned().collect(),
        }
    }

    /// Run every sanity check over the world.
    #[must_use]
    pub fn check_invariants(&self) -> Vec<InvariantViolation> {
        let handles: Vec<VillageHandle> = read(&self.world).villages.values().cloned().collect();
        let mut violations: Vec<InvariantViolation> = handles
            .iter()
            .flat_map(|h| check_village(&lock(h), &self.rules))
            .collect();
        violations.extend(invariants::check_orders(lock(&self.scheduler).orders()));
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SECONDS_PER_HOUR};
    use crate::events::VillageView;
    use crate::game::ResourceKind;

    fn troops(entries: &[(&str, u32)]) -> Troops {
        entries.iter().map(|(n, c)| ((*n).to_string(), *c)).collect()
    }

    fn engine() -> (Engine<ManualClock>, ManualClock) {
        let clock = ManualClock::new(Timestamp::ZERO);
        let engine = Engine::new(Ruleset::default(), clock.clone()).unwrap();
        (engine, clock)
    }

    fn station(engine: &Engine<ManualClock>, village: VillageId, force: &Troops) {
        engine.provision(village, force, &Resources::ZERO).unwrap();
    }

    #[test]
    fn test_busy_village_reports_queue_occupied() {
        let (engine, _) = engine();
        let v = engine.add_village(AccountId::new(1), Coord::new(0, 0), true).unwrap();
        engine.upgrade_field(v, 1).unwrap();
        assert_eq!(engine.upgrade_field(v, 2), Err(CoreError::QueueOccupied(v)));
        assert_eq!(
            engine.upgrade_building(v, 25, Some("warehouse")),
            Err(CoreError::QueueOccupied(v))
        );
        assert_eq!(engine.train_units(v, "legionnaire", 1), Err(CoreError::QueueOccupied(v)));
    }

    #[test]
    fn test_completion_releases_the_lock() {
        let (engine, clock) = engine();
        let v = engine.add_village(AccountId::new(1), Coord::new(0, 0), true).unwrap();
        let order = engine.upgrade_field(v, 1).unwrap();
        clock.set(order.ends_at);
        engine.tick();
        let village = engine.village(v).unwrap();
        assert_eq!(village.queue().slot(1).map(|s| s.level), Some(1));
        assert!(engine.upgrade_field(v, 2).is_ok());
    }

    #[test]
    fn test_unknown_village() {
        let (engine, _) = engine();
        let ghost = VillageId::new(42);
        assert_eq!(engine.upgrade_field(ghost, 1), Err(CoreError::UnknownVillage(ghost)));
    }

    #[test]
    fn test_dispatch_target_rules() {
        let (engine, _) = engine();
        let a = engine.add_village(AccountId::new(1), Coord::new(0, 0), true).unwrap();
        engine.add_village(AccountId::new(1), Coord::new(5, 0), false).unwrap();
        engine.add_village(AccountId::new(2), Coord::new(9, 9), true).unwrap();
        station(&engine, a, &troops(&[("legionnaire", 10)]));
        let force = troops(&[("legionnaire", 2)]);

        let reinforce_foreign = engine.dispatch(a, Coord::new(9, 9), force.clone(), Resources::ZERO, Purpose::Reinforce);
        assert!(matches!(reinforce_foreign, Err(CoreError::InvalidTarget(_))));
        let attack_own = engine.dispatch(a, Coord::new(5, 0), force.clone(), Resources::ZERO, Purpose::Attack);
        assert!(matches!(attack_own, Err(CoreError::InvalidTarget(_))));
        let attack_empty = engine.dispatch(a, Coord::new(1, 1), force.clone(), Resources::ZERO, Purpose::Attack);
        assert!(matches!(attack_empty, Err(CoreError::InvalidTarget(_))));
        let off_map = engine.dispatch(a, Coord::new(999, 0), force.clone(), Resources::ZERO, Purpose::Raid);
        assert!(matches!(off_map, Err(CoreError::InvalidTarget(_))));

        let order = engine
            .dispatch(a, Coord::new(5, 0), force, Resources::ZERO, Purpose::Reinforce)
            .unwrap();
        assert_eq!(order.arrives_at, Timestamp::from_secs(3000));
        assert_eq!(engine.village(a).unwrap().garrison().get("legionnaire"), Some(&8));
    }

    #[test]
    fn test_late_tick_resolves_reinforcement_once() {
        let (engine, clock) = engine();
        let a = engine.add_village(AccountId::new(1), Coord::new(0, 0), true).unwrap();
        let b = engine.add_village(AccountId::new(1), Coord::new(5, 0), false).unwrap();
        station(&engine, a, &troops(&[("legionnaire", 10)]));
        engine
            .dispatch(a, Coord::new(5, 0), troops(&[("legionnaire", 4)]), Resources::ZERO, Purpose::Reinforce)
            .unwrap();

        clock.set(Timestamp::from_secs(2999));
        assert_eq!(engine.tick().arrivals, 0);
        clock.set(Timestamp::from_hours(50));
        assert_eq!(engine.tick().arrivals, 1);
        assert_eq!(engine.tick().arrivals, 0);
        assert_eq!(engine.village(b).unwrap().garrison().get("legionnaire"), Some(&4));
    }

    #[test]
    fn test_trade_credits_destination_clamped() {
        let (engine, clock) = engine();
        let a = engine.add_village(AccountId::new(1), Coord::new(0, 0), true).unwrap();
        let b = engine.add_village(AccountId::new(2), Coord::new(16, 0), true).unwrap();
        let order = engine
            .dispatch(a, Coord::new(16, 0), Troops::new(), Resources::new(100, 0, 0, 0), Purpose::Trade)
            .unwrap();
        assert_eq!(order.arrives_at, Timestamp::from_secs(SECONDS_PER_HOUR));
        assert_eq!(engine.village(a).unwrap().ledger().snapshot().lumber, 650);

        clock.set(order.arrives_at);
        engine.tick();
        let stock = engine.village(b).unwrap().ledger().stored(ResourceKind::Lumber);
        assert!((stock - 800.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cancel_dispatch_turns_troops_around() {
        let (engine, clock) = engine();
        let a = engine.add_village(AccountId::new(1), Coord::new(0, 0), true).unwrap();
        engine.add_village(AccountId::new(2), Coord::new(30, 0), true).unwrap();
        station(&engine, a, &troops(&[("imperian", 5)]));
        let order = engine
            .dispatch(a, Coord::new(30, 0), troops(&[("imperian", 5)]), Resources::ZERO, Purpose::Raid)
            .unwrap();

        clock.advance(60);
        let home = engine.cancel_dispatch(order.id).unwrap();
        assert_eq!(home.purpose, Purpose::Return);
        assert_eq!(home.arrives_at, Timestamp::from_secs(120));
        assert_eq!(engine.cancel_dispatch(order.id), Err(CoreError::AlreadyResolved(order.id)));

        clock.set(home.arrives_at);
        engine.tick();
        assert_eq!(engine.village(a).unwrap().garrison().get("imperian"), Some(&5));
    }

    #[test]
    fn test_cancel_window_closes() {
        let (engine, clock) = engine();
        let a = engine.add_village(AccountId::new(1), Coord::new(0, 0), true).unwrap();
        engine.add_village(AccountId::new(2), Coord::new(30, 0), true).unwrap();
        station(&engine, a, &troops(&[("imperian", 5)]));
        let order = engine
            .dispatch(a, Coord::new(30, 0), troops(&[("imperian", 5)]), Resources::ZERO, Purpose::Raid)
            .unwrap();
        clock.advance(91);
        assert_eq!(engine.cancel_dispatch(order.id), Err(CoreError::CancelWindowClosed(order.id)));
    }

    #[test]
    fn test_snapshot_restores_the_same_world() {
        let (engine, clock) = engine();
        let a = engine.add_village(AccountId::new(1), Coord::new(0, 0), true).unwrap();
        engine.add_village(AccountId::new(2), Coord::new(4, 4), false).unwrap();
        engine.upgrade_field(a, 7).unwrap();
        clock.advance(100);
        let snapshot = engine.snapshot();

        let restored = Engine::restore(Ruleset::default(), clock.clone(), snapshot.clone()).unwrap();
        assert_eq!(restored.snapshot(), snapshot);
        let b = restored.add_village(AccountId::new(3), Coord::new(-4, 4), false).unwrap();
        assert_eq!(b, VillageId::new(3));
    }

    #[test]
    fn test_fresh_world_has_no_violations() {
        let (engine, _) = engine();
        engine.add_village(AccountId::new(1), Coord::new(0, 0), true).unwrap();
        assert!(engine.check_invariants().is_empty());
    }

    #[test]
    fn test_event_log_keeps_starvation_visible() {
        let (engine, clock) = engine();
        let v = engine.add_village(AccountId::new(1), Coord::new(0, 0), true).unwrap();
        station(&engine, v, &troops(&[("equites_imperatoris", 50)]));
        let rx = engine.subscribe();
        clock.set(Timestamp::from_hours(100));
        engine.tick();

        let events: Vec<Event> = rx.try_iter().collect();
        assert!(events.iter().any(|e| matches!(e.kind, EventKind::Starvation { .. })));
        let mut view = VillageView::new(v);
        view.apply_all(&events);
        assert!(view.starving);
        assert_eq!(view.resources.crop, 0);
    }

    #[test]
    fn test_trade_cargo_is_bounded_by_merchants() {
        let (engine, clock) = engine();
        let a = engine.add_village(AccountId::new(1), Coord::new(0, 0), true).unwrap();
        engine.add_village(AccountId::new(2), Coord::new(16, 0), true).unwrap();
        let load = Resources::splat(150);

        assert_eq!(
            engine.dispatch(a, Coord::new(16, 0), Troops::new(), load, Purpose::Trade),
            Err(CoreError::CargoTooLarge { cargo: 600, capacity: 500 })
        );
        assert_eq!(engine.village(a).unwrap().ledger().snapshot().lumber, 750);

        // a level 2 marketplace employs two merchants
        for building in [Some("marketplace"), None] {
            let order = engine.upgrade_building(a, 20, building).unwrap();
            clock.set(order.ends_at);
            engine.tick();
        }
        assert!(engine
            .dispatch(a, Coord::new(16, 0), Troops::new(), load, Purpose::Trade)
            .is_ok());
    }

    #[test]
    fn test_attack_on_a_village_taken_mid_flight_bounces_home() {
        let (engine, clock) = engine();
        let alice = AccountId::new(1);
        let a = engine.add_village(alice, Coord::new(0, 0), true).unwrap();
        let target = engine.add_village(AccountId::new(2), Coord::new(3, 4), false).unwrap();
        station(&engine, a, &troops(&[("senator", 4), ("legionnaire", 10)]));
        for _ in 0..4 {
            engine
                .dispatch(a, Coord::new(3, 4), troops(&[("senator", 1)]), Resources::ZERO, Purpose::Attack)
                .unwrap();
        }
        clock.set(Timestamp::from_secs(1800));
        let late = engine
            .dispatch(a, Coord::new(3, 4), troops(&[("legionnaire", 10)]), Resources::ZERO, Purpose::Attack)
            .unwrap();
        assert_eq!(late.arrives_at, Timestamp::from_secs(4200));

        let rx = engine.subscribe();
        clock.set(Timestamp::from_hours(2));
        engine.tick();

        assert_eq!(engine.village(target).unwrap().owner(), alice);
        let events: Vec<Event> = rx.try_iter().collect();
        assert!(events.iter().any(|e| e.village == a
            && matches!(
                &e.kind,
                EventKind::DispatchArrived { order, outcome: ArrivalOutcome::Bounced { .. }, .. }
                    if *order == late.id
            )));
        assert_eq!(engine.village(a).unwrap().garrison().get("legionnaire"), Some(&10));
        assert!(engine.orders_in_transit().is_empty());
    }

    #[test]
    fn test_settlers_found_a_village_and_the_escort_returns() {
        let (engine, clock) = engine();
        let a = engine.add_village(AccountId::new(1), Coord::new(0, 0), true).unwrap();
        let party = troops(&[("settler", 3), ("legionnaire", 2)]);
        station(&engine, a, &party);
        let order = engine
            .dispatch(a, Coord::new(10, 0), party, Resources::ZERO, Purpose::FoundVillage)
            .unwrap();
        assert_eq!(order.arrives_at, Timestamp::from_hours(2));

        clock.set(order.arrives_at);
        assert_eq!(engine.tick().arrivals, 1);
        let founded = engine.village_at(Coord::new(10, 0)).unwrap();
        assert_eq!(founded, VillageId::new(2));
        let village = engine.village(founded).unwrap();
        assert_eq!(village.owner(), AccountId::new(1));
        assert!(!village.is_capital());

        let escort = engine.orders_in_transit();
        assert_eq!(escort.len(), 1);
        assert_eq!(escort[0].purpose, Purpose::Return);
        assert_eq!(escort[0].troops, troops(&[("legionnaire", 2)]));
        assert_eq!(escort[0].arrives_at, Timestamp::from_secs(7200 + 6000));

        clock.set(escort[0].arrives_at);
        engine.tick();
        let home = engine.village(a).unwrap();
        assert_eq!(home.garrison().get("legionnaire"), Some(&2));
        assert_eq!(home.garrison().get("settler"), None);
    }

    #[test]
    fn test_blocked_conquest_is_published() {
        let (engine, clock) = engine();
        let a = engine.add_village(AccountId::new(1), Coord::new(0, 0), true).unwrap();
        let capital = engine.add_village(AccountId::new(2), Coord::new(3, 4), true).unwrap();
        station(&engine, a, &troops(&[("senator", 1)]));
        let rx = engine.subscribe();
        engine
            .dispatch(a, Coord::new(3, 4), troops(&[("senator", 1)]), Resources::ZERO, Purpose::Attack)
            .unwrap();
        clock.set(Timestamp::from_hours(1));
        engine.tick();

        let events: Vec<Event> = rx.try_iter().collect();
        assert!(events.iter().any(|e| e.village == capital
            && e.kind == EventKind::ConquestBlocked { attacker: AccountId::new(1) }));
        assert!(!events.iter().any(|e| matches!(e.kind, EventKind::LoyaltyChanged { .. })));
        let mut view = VillageView::new(capital);
        view.apply_all(&events);
        assert_eq!(view.conquests_blocked, 1);
    }
}
