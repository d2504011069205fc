//! The village aggregate.
//!
//! A [`Village`] owns its ledger, build queue, loyalty and garrison. All
//! mutation goes through `&mut Village`, so whoever holds the village lock
//! holds the single writer for that village. Mutating methods assume the
//! village has already been caught up to the current instant with
//! [`Village::advance_to`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::config::{BuildingRole, CelebrationKind, Ruleset};
use crate::error::{CoreError, CoreResult};
use crate::game::loyalty::{Celebration, ConquestOutcome, LoyaltyTracker};
use crate::game::queue::{PendingUpgrade, Progress, ProgressionQueue, SlotIndex, TrainingOrder};
use crate::game::{Coord, ProductionRates, ResourceKind, ResourceLedger, Resources};

/// Unit composition: unit type to quantity.
pub type Troops = BTreeMap<String, u32>;

/// Village identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VillageId(u32);

impl VillageId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// The raw id.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for VillageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Player account identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(u32);

impl AccountId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Something that happened inside a village while it caught up.
#[derive(Debug, Clone, PartialEq)]
pub enum VillageChange {
    /// An upgrade finished.
    SlotCompleted {
        /// When it finished.
        at: Timestamp,
        /// Slot index.
        slot: SlotIndex,
        /// Building or field type on the slot.
        building: String,
        /// New level.
        level: u32,
    },
    /// Units joined the garrison.
    UnitsTrained {
        /// When the last of them finished.
        at: Timestamp,
        /// Unit type.
        unit: String,
        /// How many.
        count: u32,
    },
    /// A celebration ended and its loyalty bonus applied.
    CelebrationCompleted {
        /// When it ended.
        at: Timestamp,
        /// Small or large.
        kind: CelebrationKind,
        /// Loyalty after the bonus.
        loyalty: f64,
    },
    /// Crop ran out during the interval ending at `at`.
    Starvation {
        /// End of the starving interval.
        at: Timestamp,
        /// Crop the village could not pay.
        deficit: f64,
    },
}

/// One village and everything it owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Village {
    id: VillageId,
    owner: AccountId,
    coord: Coord,
    is_capital: bool,
    ledger: ResourceLedger,
    queue: ProgressionQueue,
    loyalty: LoyaltyTracker,
    garrison: Troops,
    population: u32,
    event_seq: u64,
}

impl Village {
    /// A freshly founded village with the ruleset's starting layout and stock.
    #[must_use]
    pub fn found(
        id: VillageId,
        owner: AccountId,
        coord: Coord,
        is_capital: bool,
        rules: &Ruleset,
        now: Timestamp,
    ) -> Self {
        let ledger = ResourceLedger::new(rules.storage.base, rules.storage.base, now);
        let mut village = Self {
            id,
            owner,
            coord,
            is_capital,
            ledger,
            queue: ProgressionQueue::new(rules),
            loyalty: LoyaltyTracker::default(),
            garrison: Troops::new(),
            population: 0,
            event_seq: 0,
        };
        village.recompute_economy(rules);
        village.ledger.credit(&rules.starting_stock);
        village
    }

    /// Village id.
    #[must_use]
    pub const fn id(&self) -> VillageId {
        self.id
    }

    /// Owning account.
    #[must_use]
    pub const fn owner(&self) -> AccountId {
        self.owner
    }

    /// Map position.
    #[must_use]
    pub const fn coord(&self) -> Coord {
        self.coord
    }

    /// Whether this is its owner's capital.
    #[must_use]
    pub const fn is_capital(&self) -> bool {
        self.is_capital
    }

    /// Resource ledger.
    #[must_use]
    pub const fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    /// Mutable resource ledger, for trade and plunder.
    pub const fn ledger_mut(&mut self) -> &mut ResourceLedger {
        &mut self.ledger
    }

    /// Construction and training queue.
    #[must_use]
    pub const fn queue(&self) -> &ProgressionQueue {
        &self.queue
    }

    /// Loyalty tracker.
    #[must_use]
    pub const fn loyalty(&self) -> &LoyaltyTracker {
        &self.loyalty
    }

    /// Troops stationed at home.
    #[must_use]
    pub const fn garrison(&self) -> &Troops {
        &self.garrison
    }

    /// Inhabitants derived from building levels.
    #[must_use]
    pub const fn population(&self) -> u32 {
        self.population
    }

    /// Sequence number of the last event published for this village.
    #[must_use]
    pub const fn event_seq(&self) -> u64 {
        self.event_seq
    }

    /// Claim the next event sequence number.
    pub const fn next_seq(&mut self) -> u64 {
        self.event_seq += 1;
        self.event_seq
    }

    /// Combined construction speed: world speed plus the main building bonus.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn construction_speed(&self, rules: &Ruleset) -> f64 {
        let main_level = self.queue.fold_buildings(rules, 0, |acc, kind, level| {
            if kind.role == BuildingRole::MainBuilding {
                acc.max(level)
            } else {
                acc
            }
        });
        rules.world_speed * (1.0 + rules.main_building_bonus * f64::from(main_level))
    }

    /// Earliest internal transition still ahead of the village.
    #[must_use]
    pub fn next_transition(&self) -> Option<Timestamp> {
        match (self.queue.next_transition(), self.loyalty.next_transition()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Catch up to `now`, applying every internal transition in timestamp
    /// order. The ledger is advanced to each transition instant before the
    /// transition is applied, so rate changes take effect exactly when the
    /// building finishes, however late this is called.
    pub fn advance_to(&mut self, now: Timestamp, rules: &Ruleset) -> Vec<VillageChange> {
        let mut changes = Vec::new();
        loop {
            let due = self.next_transition().filter(|at| *at <= now);
            let step = due.unwrap_or(now);
            self.advance_ledger(step, rules, &mut changes);
            let Some(at) = due else {
                break;
            };

            for progress in self.queue.complete_until(at) {
                match progress {
                    Progress::SlotCompleted { slot, building, level } => {
                        changes.push(VillageChange::SlotCompleted {
                            at,
                            slot,
                            building,
                            level,
                        });
                    }
                    Progress::UnitsTrained { unit, count, .. } => {
                        *self.garrison.entry(unit.clone()).or_default() += count;
                        changes.push(VillageChange::UnitsTrained { at, unit, count });
                    }
                }
            }
            if let Some(done) = self.loyalty.complete_until(at) {
                changes.push(VillageChange::CelebrationCompleted {
                    at,
                    kind: done.kind,
                    loyalty: self.loyalty.loyalty(),
                });
            }
            self.recompute_economy(rules);
        }
        changes
    }

    fn advance_ledger(&mut self, to: Timestamp, rules: &Ruleset, changes: &mut Vec<VillageChange>) {
        let elapsed = to.secs_since(self.ledger.last_calculated());
        if elapsed == 0 {
            return;
        }
        if self.loyalty.loyalty() > 0.0 {
            self.loyalty.recover(elapsed, rules.conquest.recovery_per_hour);
        }
        if let Some(starvation) = self.ledger.advance(to) {
            tracing::warn!(village = %self.id, deficit = starvation.deficit, "crop ran out");
            changes.push(VillageChange::Starvation {
                at: to,
                deficit: starvation.deficit,
            });
        }
    }

    /// Recompute population, storage capacity and hourly rates from the
    /// current building levels and garrison.
    #[allow(clippy::cast_precision_loss)]
    pub fn recompute_economy(&mut self, rules: &Ruleset) {
        #[derive(Default)]
        struct Totals {
            output: [u64; 4],
            population: u32,
            warehouse: u64,
            granary: u64,
        }

        let totals = self.queue.fold_buildings(rules, Totals::default(), |mut t, kind, level| {
            match kind.role {
                BuildingRole::Field(resource) => {
                    t.output[resource.index()] += rules.field_output(level);
                }
                BuildingRole::Warehouse => t.warehouse += rules.storage.capacity_at(level),
                BuildingRole::Granary => t.granary += rules.storage.capacity_at(level),
                BuildingRole::MainBuilding | BuildingRole::Other => {}
            }
            t.population = t.population.saturating_add(kind.population.saturating_mul(level));
            t
        });

        let upkeep: u64 = self
            .garrison
            .iter()
            .filter_map(|(name, count)| rules.unit(name).map(|u| u64::from(u.upkeep) * u64::from(*count)))
            .sum();

        self.population = totals.population;
        self.ledger.set_capacity(
            totals.warehouse.max(rules.storage.base),
            totals.granary.max(rules.storage.base),
        );
        let produce = |kind: ResourceKind| totals.output[kind.index()] as f64 * rules.world_speed;
        let consumption = f64::from(totals.population) + upkeep as f64;
        self.ledger.set_rates(ProductionRates::new(
            produce(ResourceKind::Lumber),
            produce(ResourceKind::Clay),
            produce(ResourceKind::Iron),
            produce(ResourceKind::Crop) - consumption,
        ));
    }

    /// Admit an upgrade of a resource field (`field`) or a building slot.
    ///
    /// # Errors
    ///
    /// See [`ProgressionQueue::admit_upgrade`].
    pub fn upgrade(
        &mut self,
        slot: SlotIndex,
        field: bool,
        building: Option<&str>,
        rules: &Ruleset,
        now: Timestamp,
    ) -> CoreResult<PendingUpgrade> {
        let speed = self.construction_speed(rules);
        self.queue
            .admit_upgrade(self.id, slot, field, building, rules, &mut self.ledger, now, speed)
    }

    /// Admit a training order.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownUnit`] plus everything from
    /// [`ProgressionQueue::admit_training`].
    pub fn train(&mut self, unit: &str, quantity: u32, rules: &Ruleset, now: Timestamp) -> CoreResult<TrainingOrder> {
        let kind = rules
            .unit(unit)
            .ok_or_else(|| CoreError::UnknownUnit(unit.to_string()))?;
        self.queue
            .admit_training(self.id, kind, quantity, &mut self.ledger, now, rules.world_speed)
    }

    /// Cancel the upgrade on `slot`, refunding the configured fraction.
    ///
    /// # Errors
    ///
    /// See [`ProgressionQueue::cancel`].
    pub fn cancel_construction(&mut self, slot: SlotIndex, rules: &Ruleset) -> CoreResult<Resources> {
        self.queue.cancel(self.id, slot, rules.cancel_refund, &mut self.ledger)
    }

    /// Start a celebration.
    ///
    /// # Errors
    ///
    /// See [`LoyaltyTracker::start_celebration`].
    pub fn start_celebration(
        &mut self,
        kind: CelebrationKind,
        rules: &Ruleset,
        now: Timestamp,
    ) -> CoreResult<Celebration> {
        self.loyalty
            .start_celebration(self.id, kind, rules, &mut self.ledger, now)
    }

    /// Remove `troops` from the garrison, all or nothing.
    ///
    /// # Errors
    ///
    /// [`CoreError::EmptyOrder`], [`CoreError::UnknownUnit`] or
    /// [`CoreError::InsufficientTroops`].
    pub fn take_troops(&mut self, troops: &Troops, rules: &Ruleset) -> CoreResult<()> {
        if troops.values().all(|n| *n == 0) {
            return Err(CoreError::EmptyOrder);
        }
        for (unit, requested) in troops {
            if rules.unit(unit).is_none() {
                return Err(CoreError::UnknownUnit(unit.clone()));
            }
            let available = self.garrison.get(unit).copied().unwrap_or(0);
            if available < *requested {
                return Err(CoreError::InsufficientTroops {
                    unit: unit.clone(),
                    requested: *requested,
                    available,
                });
            }
        }
        for (unit, requested) in troops {
            if let Some(count) = self.garrison.get_mut(unit) {
                *count -= requested;
            }
        }
        self.garrison.retain(|_, n| *n > 0);
        self.recompute_economy(rules);
        Ok(())
    }

    /// Station `troops` in the village.
    pub fn add_troops(&mut self, troops: &Troops, rules: &Ruleset) {
        for (unit, count) in troops.iter().filter(|(_, n)| **n > 0) {
            *self.garrison.entry(unit.clone()).or_default() += count;
        }
        self.recompute_economy(rules);
    }

    /// Replace the garrison after a battle.
    pub fn set_garrison(&mut self, troops: Troops, rules: &Ruleset) {
        self.garrison = troops;
        self.garrison.retain(|_, n| *n > 0);
        self.recompute_economy(rules);
    }

    /// Apply a successful conquest attack by `attacker`.
    ///
    /// On [`ConquestOutcome::Transferred`] the village already belongs to
    /// `attacker` when this returns.
    ///
    /// # Errors
    ///
    /// [`CoreError::CapitalImmune`]; loyalty is untouched in that case.
    pub fn conquer(&mut self, attacker: AccountId, strength: f64, rules: &Ruleset) -> CoreResult<ConquestOutcome> {
        let outcome = self
            .loyalty
            .apply_conquest_attempt(self.id, self.is_capital, strength, &rules.conquest)?;
        if matches!(outcome, ConquestOutcome::Transferred { .. }) {
            self.owner = attacker;
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SECONDS_PER_HOUR;

    fn village(rules: &Ruleset) -> Village {
        Village::found(
            VillageId::new(1),
            AccountId::new(1),
            Coord::new(0, 0),
            false,
            rules,
            Timestamp::ZERO,
        )
    }

    #[test]
    fn test_found_village_economy() {
        let rules = Ruleset::default();
        let v = village(&rules);
        // main building level 1 houses two people
        assert_eq!(v.population(), 2);
        assert_eq!(v.ledger().snapshot(), Resources::splat(750));
        assert_eq!(v.ledger().capacity(ResourceKind::Lumber), 800);
        let rates = v.ledger().rates();
        assert!((rates.lumber - 8.0).abs() < 1e-9);
        assert!((rates.crop - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_completion_changes_rates_at_the_right_instant() {
        let rules = Ruleset::default();
        let mut v = village(&rules);
        let order = v.upgrade(1, true, None, &rules, Timestamp::ZERO).unwrap();
        let before = v.ledger().stored(ResourceKind::Lumber);

        // catch up long after completion in a single call
        let later = order.ends_at.plus_secs(SECONDS_PER_HOUR);
        let changes = v.advance_to(later, &rules);
        assert!(matches!(changes[0], VillageChange::SlotCompleted { slot: 1, level: 1, .. }));

        #[allow(clippy::cast_precision_loss)]
        let expected = before + 8.0 * order.ends_at.as_secs() as f64 / 3600.0 + 11.0;
        assert!((v.ledger().stored(ResourceKind::Lumber) - expected).abs() < 1e-6);
        assert_eq!(v.queue().slot(1).map(|s| s.level), Some(1));
    }

    #[test]
    fn test_advance_is_idempotent() {
        let rules = Ruleset::default();
        let mut v = village(&rules);
        let t = Timestamp::from_hours(2);
        v.advance_to(t, &rules);
        let once = v.clone();
        assert!(v.advance_to(t, &rules).is_empty());
        assert_eq!(v, once);
    }

    #[test]
    fn test_trained_units_eat_crop() {
        let rules = Ruleset::default();
        let mut v = village(&rules);
        let mut troops = Troops::new();
        troops.insert("equites_imperatoris".into(), 5);
        v.add_troops(&troops, &rules);
        assert!((v.ledger().rates().crop - (10.0 - 15.0)).abs() < 1e-9);

        let changes = v.advance_to(Timestamp::from_hours(1000), &rules);
        assert!(changes.iter().any(|c| matches!(c, VillageChange::Starvation { .. })));
        assert!(v.ledger().stored(ResourceKind::Crop).abs() < f64::EPSILON);
    }

    #[test]
    fn test_take_troops_is_all_or_nothing() {
        let rules = Ruleset::default();
        let mut v = village(&rules);
        let mut home = Troops::new();
        home.insert("legionnaire".into(), 10);
        v.add_troops(&home, &rules);

        let mut ask = Troops::new();
        ask.insert("legionnaire".into(), 4);
        ask.insert("imperian".into(), 1);
        let err = v.take_troops(&ask, &rules).unwrap_err();
        assert!(matches!(err, CoreError::InsufficientTroops { available: 0, .. }));
        assert_eq!(v.garrison().get("legionnaire"), Some(&10));

        ask.remove("imperian");
        v.take_troops(&ask, &rules).unwrap();
        assert_eq!(v.garrison().get("legionnaire"), Some(&6));
    }

    #[test]
    fn test_main_building_speeds_up_construction() {
        let rules = Ruleset::default();
        let v = village(&rules);
        assert!((v.construction_speed(&rules) - 1.05).abs() < 1e-9);
    }

    #[test]
    fn test_conquest_changes_owner_once() {
        let rules = Ruleset::default();
        let mut v = village(&rules);
        let attacker = AccountId::new(9);
        for _ in 0..3 {
            v.conquer(attacker, 25.0, &rules).unwrap();
            assert_eq!(v.owner(), AccountId::new(1));
        }
        let outcome = v.conquer(attacker, 25.0, &rules).unwrap();
        assert!(matches!(outcome, ConquestOutcome::Transferred { .. }));
        assert_eq!(v.owner(), attacker);
    }
}
