//! Outbound state-delta events.
//!
//! Every event carries the village it concerns and a per-village sequence
//! number assigned while the village lock is held, so events for one village
//! are published in the order their transitions committed. Consumers apply
//! them with a pure reducer such as [`VillageView`], which ignores duplicates
//! and stale deliveries by sequence number.

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::config::CelebrationKind;
use crate::game::{AccountId, Resources, SlotIndex, Troops, VillageId};
use crate::travel::{OrderId, Purpose};

/// What happened when a dispatch order reached its destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ArrivalOutcome {
    /// An attack or raid was fought.
    Battle {
        /// Whether the attacker won.
        attacker_won: bool,
        /// Resources carried off.
        plunder: Resources,
    },
    /// Troops joined the garrison.
    Reinforced {
        /// Units that arrived.
        troops: Troops,
    },
    /// Merchants unloaded cargo.
    Delivered {
        /// Resources credited.
        cargo: Resources,
        /// Resources lost to full storage.
        overflow: Resources,
    },
    /// Settlers founded a village.
    Founded {
        /// The new village.
        founded: VillageId,
    },
    /// Troops came home.
    Returned {
        /// Units back in the garrison.
        troops: Troops,
        /// Resources unloaded.
        cargo: Resources,
    },
    /// The order could not be carried out and was sent home.
    Bounced {
        /// Why.
        reason: String,
    },
}

/// Event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum EventKind {
    /// Stock after a debit, credit or catch-up.
    ResourcesUpdated {
        /// Whole-unit stock.
        resources: Resources,
    },
    /// A construction slot finished.
    SlotCompleted {
        /// Slot index.
        slot: SlotIndex,
        /// Building or field type.
        building: String,
        /// New level.
        level: u32,
    },
    /// Units finished training.
    UnitsTrained {
        /// Unit type.
        unit: String,
        /// How many.
        count: u32,
    },
    /// A dispatch order arrived.
    DispatchArrived {
        /// Order id.
        order: OrderId,
        /// Order purpose.
        purpose: Purpose,
        /// Result.
        #[serde(flatten)]
        outcome: ArrivalOutcome,
    },
    /// Loyalty changed after a conquest attack.
    LoyaltyChanged {
        /// New loyalty.
        loyalty: f64,
    },
    /// A successful attack could not take the village because it is a
    /// capital. Loyalty is unchanged.
    ConquestBlocked {
        /// Account that led the attack.
        attacker: AccountId,
    },
    /// Loyalty hit zero and the village changed hands.
    OwnershipChanged {
        /// Previous owner.
        from: AccountId,
        /// New owner.
        to: AccountId,
    },
    /// Crop ran out.
    Starvation {
        /// Crop that could not be paid.
        deficit: f64,
    },
    /// A celebration finished.
    CelebrationCompleted {
        /// Small or large.
        kind: CelebrationKind,
        /// Loyalty after the bonus.
        loyalty: f64,
    },
}

/// A state delta for one village.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Village the event concerns.
    pub village: VillageId,
    /// Per-village sequence number, starting at 1.
    pub seq: u64,
    /// Simulation instant of the transition.
    pub at: Timestamp,
    /// Payload.
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Fan-out of events to any number of channel subscribers.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<Event>>>,
}

impl EventBus {
    /// A bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> Receiver<Event> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber; dropped receivers are pruned.
    pub fn publish(&self, event: &Event) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Client-side model of one village, rebuilt purely from events.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VillageView {
    /// Village being tracked.
    pub village: Option<VillageId>,
    /// Highest sequence number applied.
    pub last_seq: u64,
    /// Last known stock.
    pub resources: Resources,
    /// Slot index to (type, level).
    pub slots: BTreeMap<SlotIndex, (String, u32)>,
    /// Units trained so far, by type.
    pub trained: BTreeMap<String, u32>,
    /// Last known loyalty.
    pub loyalty: Option<f64>,
    /// Last known owner, if it ever changed.
    pub owner: Option<AccountId>,
    /// Whether crop ran out and has not been reported above zero since.
    pub starving: bool,
    /// Conquest attempts turned away by capital immunity.
    pub conquests_blocked: u32,
    /// Arrival reports in order.
    pub arrivals: Vec<(OrderId, ArrivalOutcome)>,
}

impl VillageView {
    /// An empty view of `village`.
    #[must_use]
    pub fn new(village: VillageId) -> Self {
        Self {
            village: Some(village),
            ..Self::default()
        }
    }

    /// Apply one event. Returns `false` when the event is for another village
    /// or its sequence number has already been seen.
    pub fn apply(&mut self, event: &Event) -> bool {
        if self.village.is_some_and(|v| v != event.village) || event.seq <= self.last_seq {
            return false;
        }
        self.village = Some(event.village);
        self.last_seq = event.seq;
        match &event.kind {
            EventKind::ResourcesUpdated { resources } => {
                self.resources = *resources;
                // an empty granary after a starvation report is still starving
                if resources.crop > 0 {
                    self.starving = false;
                }
            }
            EventKind::SlotCompleted { slot, building, level } => {
                self.slots.insert(*slot, (building.clone(), *level));
            }
            EventKind::UnitsTrained { unit, count } => {
                *self.trained.entry(unit.clone()).or_default() += count;
            }
            EventKind::DispatchArrived { order, outcome, .. } => {
                self.arrivals.push((*order, outcome.clone()));
            }
            EventKind::LoyaltyChanged { loyalty } | EventKind::CelebrationCompleted { loyalty, .. } => {
                self.loyalty = Some(*loyalty);
            }
            EventKind::ConquestBlocked { .. } => self.conquests_blocked += 1,
            EventKind::OwnershipChanged { to, .. } => self.owner = Some(*to),
            EventKind::Starvation { .. } => self.starving = true,
        }
        true
    }

    /// Apply a batch, returning how many events took effect.
    pub fn apply_all<'a>(&mut self, events: impl IntoIterator<Item = &'a Event>) -> usize {
        events.into_iter().filter(|e| self.apply(e)).count()
    }
}
