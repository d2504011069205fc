//! Progression queue: construction slots and unit training.
//!
//! Every village owns one queue. A slot is either idle or pending a single
//! upgrade; training is a separate order that shares the same village-wide
//! build lock. At most `depth` orders (pending upgrades plus training) may be
//! active at once; with the default depth of one this is the single build
//! queue per village. Costs are debited on admission, never on completion.

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::config::{BuildingRules, Ruleset, UnitRules};
use crate::error::{CoreError, CoreResult};
use crate::game::{CostQuote, ResourceLedger, Resources, VillageId};

/// Index of a slot within a village, starting at 1.
pub type SlotIndex = u8;

/// An upgrade in progress on one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingUpgrade {
    /// Level the slot reaches on completion.
    pub target_level: u32,
    /// Admission instant.
    pub started_at: Timestamp,
    /// Completion instant.
    pub ends_at: Timestamp,
    /// Resources debited on admission (the basis for cancellation refunds).
    pub paid: Resources,
}

/// Observable state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// No order on the slot.
    Idle,
    /// An upgrade is running.
    Pending {
        /// Level reached on completion.
        target_level: u32,
        /// Admission instant.
        started_at: Timestamp,
        /// Completion instant.
        ends_at: Timestamp,
    },
}

/// One building or field position in a village.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstructionSlot {
    /// Slot index (1-based).
    pub index: SlotIndex,
    /// Building or field type; `None` for an empty building slot.
    pub building: Option<String>,
    /// Current level.
    pub level: u32,
    /// Upgrade in progress, if any.
    pub pending: Option<PendingUpgrade>,
}

impl ConstructionSlot {
    /// State-machine view of the slot.
    #[must_use]
    pub fn state(&self) -> SlotState {
        match &self.pending {
            None => SlotState::Idle,
            Some(p) => SlotState::Pending {
                target_level: p.target_level,
                started_at: p.started_at,
                ends_at: p.ends_at,
            },
        }
    }
}

/// Units being trained one after another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingOrder {
    /// Unit type.
    pub unit: String,
    /// Units ordered.
    pub quantity: u32,
    /// Units already finished and handed to the garrison.
    pub trained: u32,
    /// Seconds per unit after speed modifiers.
    pub per_unit_secs: u64,
    /// Admission instant.
    pub started_at: Timestamp,
    /// Resources debited on admission.
    pub paid: Resources,
}

impl TrainingOrder {
    /// Instant the `n`-th unit (1-based) finishes.
    #[must_use]
    pub fn unit_done_at(&self, n: u32) -> Timestamp {
        self.started_at
            .plus_secs(self.per_unit_secs.saturating_mul(u64::from(n)))
    }

    /// Instant the whole order finishes.
    #[must_use]
    pub fn ends_at(&self) -> Timestamp {
        self.unit_done_at(self.quantity)
    }

    /// Instant the next unfinished unit completes, if any remain.
    #[must_use]
    pub fn next_at(&self) -> Option<Timestamp> {
        (self.trained < self.quantity).then(|| self.unit_done_at(self.trained + 1))
    }
}

/// A state change produced when the queue catches up to an instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// A slot finished its upgrade and folded back to idle.
    SlotCompleted {
        /// Slot index.
        slot: SlotIndex,
        /// Building or field type now on the slot.
        building: String,
        /// New level.
        level: u32,
    },
    /// Units left the training ground.
    UnitsTrained {
        /// Unit type.
        unit: String,
        /// Units finished in this step.
        count: u32,
        /// Whether the training order is now complete.
        finished: bool,
    },
}

/// The build queue of one village.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressionQueue {
    slots: Vec<ConstructionSlot>,
    training: Option<TrainingOrder>,
    depth: usize,
    field_slots: SlotIndex,
}

impl ProgressionQueue {
    /// A queue with the slot layout of a freshly founded village.
    #[must_use]
    pub fn new(rules: &Ruleset) -> Self {
        let mut slots: Vec<ConstructionSlot> = (1..=rules.total_slots())
            .map(|index| ConstructionSlot {
                index,
                building: None,
                level: 0,
                pending: None,
            })
            .collect();
        for (slot, field) in slots.iter_mut().zip(&rules.field_layout) {
            slot.building = Some(field.clone());
        }
        for start in &rules.starting_buildings {
            if let Some(slot) = slots.iter_mut().find(|s| s.index == start.slot) {
                slot.building = Some(start.building.clone());
                slot.level = start.level;
            }
        }
        Self {
            slots,
            training: None,
            depth: rules.queue_depth.max(1),
            field_slots: rules.field_slots(),
        }
    }

    /// All slots in index order.
    #[must_use]
    pub fn slots(&self) -> &[ConstructionSlot] {
        &self.slots
    }

    /// One slot by index.
    #[must_use]
    pub fn slot(&self, index: SlotIndex) -> Option<&ConstructionSlot> {
        self.slots.iter().find(|s| s.index == index)
    }

    /// The running training order, if any.
    #[must_use]
    pub const fn training(&self) -> Option<&TrainingOrder> {
        self.training.as_ref()
    }

    /// Number of orders currently holding the build lock.
    #[must_use]
    pub fn active_orders(&self) -> usize {
        self.slots.iter().filter(|s| s.pending.is_some()).count() + usize::from(self.training.is_some())
    }

    /// Whether a new order would be rejected with [`CoreError::QueueOccupied`].
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.active_orders() >= self.depth
    }

    /// Highest level of any slot holding `building` (0 if absent).
    #[must_use]
    pub fn level_of(&self, building: &str) -> u32 {
        self.slots
            .iter()
            .filter(|s| s.building.as_deref() == Some(building))
            .map(|s| s.level)
            .max()
            .unwrap_or(0)
    }

    /// Earliest instant at which something in the queue completes.
    #[must_use]
    pub fn next_transition(&self) -> Option<Timestamp> {
        let slots = self
            .slots
            .iter()
            .filter_map(|s| s.pending.as_ref().map(|p| p.ends_at));
        let training = self.training.as_ref().and_then(TrainingOrder::next_at);
        slots.chain(training).min()
    }

    /// Admit an upgrade of `slot` and debit its cost.
    ///
    /// `field` selects which kind of slot the caller targets; `building`
    /// names the type to construct when the slot is empty (it may repeat the
    /// existing type). `speed` is the combined construction speed modifier.
    ///
    /// # Errors
    ///
    /// Checks run in this order, and the first failure is returned:
    /// unknown slot, slot or village already busy ([`CoreError::QueueOccupied`]),
    /// wrong slot kind or type, level beyond the maximum, insufficient
    /// resources. Nothing is mutated on failure.
    #[allow(clippy::too_many_arguments)]
    pub fn admit_upgrade(
        &mut self,
        village: VillageId,
        slot: SlotIndex,
        field: bool,
        building: Option<&str>,
        rules: &Ruleset,
        ledger: &mut ResourceLedger,
        now: Timestamp,
        speed: f64,
    ) -> CoreResult<PendingUpgrade> {
        let current = self
            .slot(slot)
            .ok_or(CoreError::UnknownSlot { village, slot })?;
        if current.pending.is_some() || self.is_locked() {
            return Err(CoreError::QueueOccupied(village));
        }

        let is_field_slot = slot <= rules.field_slots();
        if field != is_field_slot {
            let reason = if field {
                "not a resource field"
            } else {
                "resource fields are upgraded as fields"
            };
            return Err(CoreError::SlotMismatch { slot, reason });
        }

        let kind = resolve_kind(current, building, rules, slot)?;
        let target_level = current.level + 1;
        if target_level > kind.max_level {
            return Err(CoreError::InvalidLevel {
                requested: target_level,
                max: kind.max_level,
            });
        }

        let quote = quote_upgrade(kind, target_level, rules, speed);
        ledger.debit(&quote.resources)?;

        let order = PendingUpgrade {
            target_level,
            started_at: now,
            ends_at: now.plus_secs(quote.build_secs),
            paid: quote.resources,
        };
        let name = kind.name.clone();
        if let Some(target) = self.slots.iter_mut().find(|s| s.index == slot) {
            target.building = Some(name);
            target.pending = Some(order);
        }
        Ok(order)
    }

    /// Admit a training order for `quantity` units and debit its cost.
    ///
    /// # Errors
    ///
    /// [`CoreError::QueueOccupied`] when the build lock is held,
    /// [`CoreError::EmptyOrder`] for zero units,
    /// [`CoreError::MissingBuilding`] when the prerequisite is absent,
    /// [`CoreError::InsufficientResources`] when the ledger is short.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn admit_training(
        &mut self,
        village: VillageId,
        unit: &UnitRules,
        quantity: u32,
        ledger: &mut ResourceLedger,
        now: Timestamp,
        speed: f64,
    ) -> CoreResult<TrainingOrder> {
        if self.is_locked() {
            return Err(CoreError::QueueOccupied(village));
        }
        if quantity == 0 {
            return Err(CoreError::EmptyOrder);
        }
        if let Some(required) = &unit.requires {
            if self.level_of(required) == 0 {
                return Err(CoreError::MissingBuilding(required.clone()));
            }
        }

        let cost = unit.cost.times(u64::from(quantity));
        ledger.debit(&cost)?;

        let speed = if speed > 0.0 { speed } else { 1.0 };
        let per_unit_secs = ((unit.train_secs as f64 / speed).ceil() as u64).max(1);
        let order = TrainingOrder {
            unit: unit.name.clone(),
            quantity,
            trained: 0,
            per_unit_secs,
            started_at: now,
            paid: cost,
        };
        self.training = Some(order.clone());
        Ok(order)
    }

    /// Apply every completion due at or before `now`, in chronological order.
    pub fn complete_until(&mut self, now: Timestamp) -> Vec<Progress> {
        let mut due: Vec<(Timestamp, SlotIndex)> = self
            .slots
            .iter()
            .filter_map(|s| s.pending.as_ref().map(|p| (p.ends_at, s.index)))
            .filter(|(ends_at, _)| *ends_at <= now)
            .collect();
        due.sort_unstable();

        let mut progress = Vec::new();
        for (_, index) in due {
            if let Some(slot) = self.slots.iter_mut().find(|s| s.index == index) {
                if let Some(order) = slot.pending.take() {
                    slot.level = order.target_level;
                    progress.push(Progress::SlotCompleted {
                        slot: index,
                        building: slot.building.clone().unwrap_or_default(),
                        level: slot.level,
                    });
                }
            }
        }

        if let Some(order) = &mut self.training {
            let mut count = 0;
            while order.next_at().is_some_and(|at| at <= now) {
                order.trained += 1;
                count += 1;
            }
            if count > 0 {
                let finished = order.trained >= order.quantity;
                progress.push(Progress::UnitsTrained {
                    unit: order.unit.clone(),
                    count,
                    finished,
                });
                if finished {
                    self.training = None;
                }
            }
        }
        progress
    }

    /// Cancel the pending upgrade on `slot`, refunding `refund` of its cost
    /// into `ledger` and releasing the build lock in the same step.
    ///
    /// A building slot that was being constructed for the first time goes
    /// back to empty; fields keep their type.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownSlot`] or [`CoreError::NothingPending`].
    pub fn cancel(
        &mut self,
        village: VillageId,
        slot: SlotIndex,
        refund: f64,
        ledger: &mut ResourceLedger,
    ) -> CoreResult<Resources> {
        let field_slots = self.field_slots;
        let target = self
            .slots
            .iter_mut()
            .find(|s| s.index == slot)
            .ok_or(CoreError::UnknownSlot { village, slot })?;
        let order = target
            .pending
            .take()
            .ok_or(CoreError::NothingPending(village))?;
        if target.level == 0 && target.index > field_slots {
            target.building = None;
        }
        let refunded = order.paid.scaled(refund);
        ledger.credit(&refunded);
        Ok(refunded)
    }

    /// Sum of `f(rules, level)` over every occupied slot.
    pub fn fold_buildings<'r, T>(
        &self,
        rules: &'r Ruleset,
        init: T,
        mut f: impl FnMut(T, &'r BuildingRules, u32) -> T,
    ) -> T {
        self.slots
            .iter()
            .filter_map(|s| {
                s.building
                    .as_deref()
                    .and_then(|name| rules.building(name))
                    .map(|kind| (kind, s.level))
            })
            .fold(init, |acc, (kind, level)| f(acc, kind, level))
    }
}

fn resolve_kind<'r>(
    slot: &ConstructionSlot,
    requested: Option<&str>,
    rules: &'r Ruleset,
    index: SlotIndex,
) -> CoreResult<&'r BuildingRules> {
    let name = match (slot.building.as_deref(), requested) {
        (Some(existing), Some(asked)) if existing != asked => {
            return Err(CoreError::SlotMismatch {
                slot: index,
                reason: "slot already holds a different building",
            });
        }
        (Some(existing), _) => existing,
        (None, Some(asked)) => asked,
        (None, None) => {
            return Err(CoreError::SlotMismatch {
                slot: index,
                reason: "empty slot needs a building type",
            });
        }
    };
    let kind = rules
        .building(name)
        .ok_or_else(|| CoreError::UnknownBuilding(name.to_string()))?;
    if slot.building.is_none() && kind.is_field() {
        return Err(CoreError::SlotMismatch {
            slot: index,
            reason: "fields cannot be built on building slots",
        });
    }
    Ok(kind)
}

/// Cost and time for taking `kind` to `target_level` at the given speed.
#[must_use]
pub fn quote_upgrade(kind: &BuildingRules, target_level: u32, rules: &Ruleset, speed: f64) -> CostQuote {
    rules
        .cost_model()
        .quote(&kind.base_cost, kind.base_secs, target_level, speed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const V: VillageId = VillageId::new(1);

    fn rich_ledger() -> ResourceLedger {
        ResourceLedger::new(1_000_000, 1_000_000, Timestamp::ZERO).with_stock(Resources::splat(500_000))
    }

    #[test]
    fn test_new_queue_layout() {
        let rules = Ruleset::default();
        let queue = ProgressionQueue::new(&rules);
        assert_eq!(queue.slots().len(), 40);
        assert_eq!(queue.slot(1).and_then(|s| s.building.as_deref()), Some("woodcutter"));
        assert_eq!(queue.level_of("main_building"), 1);
        assert!(queue.slot(20).is_some_and(|s| s.building.is_none()));
    }

    #[test]
    fn test_upgrade_debits_and_schedules() {
        let rules = Ruleset::default();
        let mut queue = ProgressionQueue::new(&rules);
        let mut ledger = rich_ledger();
        let order = queue
            .admit_upgrade(V, 1, true, None, &rules, &mut ledger, Timestamp::ZERO, 1.0)
            .unwrap();
        assert_eq!(order.target_level, 1);
        assert_eq!(order.ends_at, Timestamp::from_secs(260));
        assert_eq!(order.paid, Resources::new(40, 100, 50, 60));
        let left = Resources::from_fn(|kind| 500_000 - order.paid.get(kind));
        assert_eq!(ledger.snapshot(), left);
        assert!(queue.is_locked());
    }

    #[test]
    fn test_second_order_is_queue_occupied_even_when_broke() {
        let rules = Ruleset::default();
        let mut queue = ProgressionQueue::new(&rules);
        let mut ledger = rich_ledger();
        queue
            .admit_upgrade(V, 1, true, None, &rules, &mut ledger, Timestamp::ZERO, 1.0)
            .unwrap();

        let mut empty = ResourceLedger::new(800, 800, Timestamp::ZERO);
        let err = queue
            .admit_upgrade(V, 2, true, None, &rules, &mut empty, Timestamp::ZERO, 1.0)
            .unwrap_err();
        assert_eq!(err, CoreError::QueueOccupied(V));
    }

    #[test]
    fn test_completion_folds_back_to_idle() {
        let rules = Ruleset::default();
        let mut queue = ProgressionQueue::new(&rules);
        let mut ledger = rich_ledger();
        let order = queue
            .admit_upgrade(V, 20, false, Some("warehouse"), &rules, &mut ledger, Timestamp::ZERO, 1.0)
            .unwrap();

        assert!(queue.complete_until(Timestamp::from_secs(order.ends_at.as_secs() - 1)).is_empty());
        let progress = queue.complete_until(order.ends_at);
        assert_eq!(
            progress,
            vec![Progress::SlotCompleted {
                slot: 20,
                building: "warehouse".into(),
                level: 1
            }]
        );
        assert_eq!(queue.slot(20).map(ConstructionSlot::state), Some(SlotState::Idle));
        assert!(!queue.is_locked());
        assert!(queue.complete_until(Timestamp::from_hours(100)).is_empty());
    }

    #[test]
    fn test_max_level_is_enforced() {
        let mut rules = Ruleset::default();
        rules.buildings.iter_mut().for_each(|b| b.max_level = 1);
        rules.field_production.truncate(2);
        let mut queue = ProgressionQueue::new(&rules);
        let mut ledger = rich_ledger();
        let order = queue
            .admit_upgrade(V, 3, true, None, &rules, &mut ledger, Timestamp::ZERO, 1.0)
            .unwrap();
        queue.complete_until(order.ends_at);
        let err = queue
            .admit_upgrade(V, 3, true, None, &rules, &mut ledger, order.ends_at, 1.0)
            .unwrap_err();
        assert_eq!(err, CoreError::InvalidLevel { requested: 2, max: 1 });
    }

    #[test]
    fn test_slot_kind_mismatches() {
        let rules = Ruleset::default();
        let mut queue = ProgressionQueue::new(&rules);
        let mut ledger = rich_ledger();
        let t = Timestamp::ZERO;

        let as_building = queue.admit_upgrade(V, 1, false, None, &rules, &mut ledger, t, 1.0);
        assert!(matches!(as_building, Err(CoreError::SlotMismatch { slot: 1, .. })));

        let as_field = queue.admit_upgrade(V, 19, true, None, &rules, &mut ledger, t, 1.0);
        assert!(matches!(as_field, Err(CoreError::SlotMismatch { slot: 19, .. })));

        let unnamed = queue.admit_upgrade(V, 25, false, None, &rules, &mut ledger, t, 1.0);
        assert!(matches!(unnamed, Err(CoreError::SlotMismatch { slot: 25, .. })));

        let field_on_building = queue.admit_upgrade(V, 25, false, Some("cropland"), &rules, &mut ledger, t, 1.0);
        assert!(matches!(field_on_building, Err(CoreError::SlotMismatch { slot: 25, .. })));

        let unknown = queue.admit_upgrade(V, 25, false, Some("pyramid"), &rules, &mut ledger, t, 1.0);
        assert_eq!(unknown, Err(CoreError::UnknownBuilding("pyramid".into())));

        let missing = queue.admit_upgrade(V, 99, true, None, &rules, &mut ledger, t, 1.0);
        assert_eq!(missing, Err(CoreError::UnknownSlot { village: V, slot: 99 }));
        assert_eq!(ledger.snapshot(), Resources::splat(500_000));
    }

    #[test]
    fn test_cancel_refunds_and_releases_lock() {
        let rules = Ruleset::default();
        let mut queue = ProgressionQueue::new(&rules);
        let mut ledger = rich_ledger();
        let order = queue
            .admit_upgrade(V, 22, false, Some("barracks"), &rules, &mut ledger, Timestamp::ZERO, 1.0)
            .unwrap();
        let refunded = queue.cancel(V, 22, 0.5, &mut ledger).unwrap();
        assert_eq!(refunded, order.paid.scaled(0.5));
        assert!(!queue.is_locked());
        assert!(queue.slot(22).is_some_and(|s| s.building.is_none()));
        assert_eq!(queue.cancel(V, 22, 0.5, &mut ledger), Err(CoreError::NothingPending(V)));
    }

    #[test]
    fn test_training_progresses_unit_by_unit() {
        let rules = Ruleset::default();
        let mut queue = ProgressionQueue::new(&rules);
        let mut ledger = rich_ledger();
        let unit = rules.unit("legionnaire").unwrap();

        let err = queue
            .admit_training(V, unit, 3, &mut ledger, Timestamp::ZERO, 1.0)
            .unwrap_err();
        assert_eq!(err, CoreError::MissingBuilding("barracks".into()));

        let b = queue
            .admit_upgrade(V, 30, false, Some("barracks"), &rules, &mut ledger, Timestamp::ZERO, 1.0)
            .unwrap();
        queue.complete_until(b.ends_at);

        let order = queue
            .admit_training(V, unit, 3, &mut ledger, b.ends_at, 2.0)
            .unwrap();
        assert_eq!(order.per_unit_secs, 800);
        assert_eq!(order.paid, unit.cost.times(3));

        let first = queue.complete_until(b.ends_at.plus_secs(1700));
        assert_eq!(
            first,
            vec![Progress::UnitsTrained {
                unit: "legionnaire".into(),
                count: 2,
                finished: false
            }]
        );
        let rest = queue.complete_until(b.ends_at.plus_secs(2400));
        assert_eq!(
            rest,
            vec![Progress::UnitsTrained {
                unit: "legionnaire".into(),
                count: 1,
                finished: true
            }]
        );
        assert!(queue.training().is_none());
    }

    #[test]
    fn test_deeper_queue_admits_two_orders() {
        let rules = Ruleset {
            queue_depth: 2,
            ..Ruleset::default()
        };
        let mut queue = ProgressionQueue::new(&rules);
        let mut ledger = rich_ledger();
        let t = Timestamp::ZERO;
        queue.admit_upgrade(V, 1, true, None, &rules, &mut ledger, t, 1.0).unwrap();
        queue.admit_upgrade(V, 5, true, None, &rules, &mut ledger, t, 1.0).unwrap();
        assert_eq!(
            queue.admit_upgrade(V, 9, true, None, &rules, &mut ledger, t, 1.0),
            Err(CoreError::QueueOccupied(V))
        );
        assert_eq!(
            queue.admit_upgrade(V, 1, true, None, &rules, &mut ledger, t, 1.0),
            Err(CoreError::QueueOccupied(V))
        );
    }
}
