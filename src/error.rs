//! Error types for the progression core.

use std::io;

use thiserror::Error;

use crate::game::{Resources, SlotIndex, VillageId};
use crate::travel::OrderId;

/// Rejection reasons for intents and resolution requests.
///
/// Every variant is recoverable and reported synchronously to the caller at
/// admission time; none of them leaves the engine in a partially applied
/// state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// The ledger cannot pay the full cost.
    #[error("insufficient resources: need {required}, have {available}")]
    InsufficientResources {
        /// What the order costs.
        required: Resources,
        /// What the ledger held at admission.
        available: Resources,
    },
    /// The village build queue is full.
    #[error("construction already in progress in village {0}")]
    QueueOccupied(VillageId),
    /// The requested level is beyond the maximum or not the next level.
    #[error("invalid level {requested} (max {max})")]
    InvalidLevel {
        /// Level that was asked for.
        requested: u32,
        /// Highest level allowed for the type.
        max: u32,
    },
    /// The dispatch destination is missing, out of range or contradicts the
    /// order's purpose.
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    /// The order has already been resolved or cancelled.
    #[error("order {0} was already resolved")]
    AlreadyResolved(OrderId),
    /// Capitals cannot change hands.
    #[error("village {0} is a capital and cannot be conquered")]
    CapitalImmune(VillageId),
    /// No village with this id exists.
    #[error("unknown village {0}")]
    UnknownVillage(VillageId),
    /// The village has no slot with this index.
    #[error("village {village} has no slot {slot}")]
    UnknownSlot {
        /// Village that was addressed.
        village: VillageId,
        /// Slot index that does not exist.
        slot: SlotIndex,
    },
    /// The slot cannot host what was asked of it.
    #[error("slot {slot} cannot take this order: {reason}")]
    SlotMismatch {
        /// Slot index that was addressed.
        slot: SlotIndex,
        /// Why the slot rejected the order.
        reason: &'static str,
    },
    /// The building type is not part of the ruleset.
    #[error("unknown building type {0:?}")]
    UnknownBuilding(String),
    /// The unit type is not part of the ruleset.
    #[error("unknown unit type {0:?}")]
    UnknownUnit(String),
    /// A prerequisite building is missing.
    #[error("requires a {0} in the village")]
    MissingBuilding(String),
    /// The garrison does not hold enough units.
    #[error("insufficient troops: {requested} {unit} requested, {available} available")]
    InsufficientTroops {
        /// Unit type requested.
        unit: String,
        /// Quantity requested.
        requested: u32,
        /// Quantity at home.
        available: u32,
    },
    /// Trade cargo beyond what the village's merchants can carry.
    #[error("cargo of {cargo} exceeds merchant capacity {capacity}")]
    CargoTooLarge {
        /// Total resources in the order.
        cargo: u64,
        /// Most the merchants can carry.
        capacity: u64,
    },
    /// An order with nothing in it.
    #[error("order contains no units or cargo")]
    EmptyOrder,
    /// There is no pending order to cancel.
    #[error("nothing pending in village {0}")]
    NothingPending(VillageId),
    /// A celebration is already running in the village.
    #[error("a celebration is already running in village {0}")]
    CelebrationInProgress(VillageId),
    /// The order has been travelling too long to be called back.
    #[error("order {0} can no longer be cancelled")]
    CancelWindowClosed(OrderId),
}

/// Errors raised while loading or validating a ruleset.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The ruleset file could not be read.
    #[error("failed to read ruleset: {0}")]
    Io(#[from] io::Error),
    /// The ruleset is not valid JSON for [`crate::config::Ruleset`].
    #[error("failed to parse ruleset: {0}")]
    Json(#[from] serde_json::Error),
    /// The ruleset parsed but is internally inconsistent.
    #[error("invalid ruleset: {0}")]
    Invalid(String),
}

/// Result alias for admission operations.
pub type CoreResult<T> = Result<T, CoreError>;
