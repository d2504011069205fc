//! Per-village game model.
//!
//! - Resources and the time-driven ledger
//! - Geometric cost growth
//! - The build queue (construction and training)
//! - Loyalty and celebrations
//! - The village aggregate that ties them together

mod cost;
pub mod invariants;
mod ledger;
pub mod loyalty;
mod map;
pub mod queue;
mod resources;
mod village;

pub use cost::{affordable, CostModel, CostQuote};
pub use invariants::{check_village, InvariantViolation};
pub use ledger::{ProductionRates, ResourceLedger, Starvation};
pub use loyalty::{Celebration, ConquestOutcome, LoyaltyTracker, MAX_LOYALTY};
pub use map::Coord;
pub use queue::{
    ConstructionSlot, PendingUpgrade, Progress, ProgressionQueue, SlotIndex, SlotState, TrainingOrder,
};
pub use resources::{ResourceKind, Resources};
pub use village::{AccountId, Troops, Village, VillageChange, VillageId};
