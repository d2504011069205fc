// Allow unwrap and unreadable literals in tests (test code is not production)
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::unreadable_literal))]
//! Hamlet: the village progression and event-scheduling core of a
//! browser strategy game.
//!
//! Villages accrue resources continuously, upgrade buildings through a
//! time-gated queue, train units, and send troops or merchants across a
//! grid map. Nothing runs on a per-village timer: every village stores its
//! last-calculated instant and catches up lazily, while a single
//! time-ordered heap resolves cross-village arrivals.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  Engine (intents, tick, per-village locks)  │
//! ├──────────────────────┬──────────────────────┤
//! │  Village             │  TravelScheduler     │
//! │  ledger / queue /    │  (min-heap of        │
//! │  loyalty             │   dispatch orders)   │
//! ├──────────────────────┴──────────────────────┤
//! │  EventBus -> VillageView reducers           │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Every time-dependent computation takes an explicit "now" from a
//! [`Clock`], so a [`ManualClock`] makes the whole engine deterministic.

pub mod clock;
pub mod combat;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod game;
pub mod replay;
pub mod snapshot;
pub mod travel;

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::{CelebrationKind, Ruleset};
pub use engine::{Engine, TickReport};
pub use error::{ConfigError, CoreError, CoreResult};
pub use events::{ArrivalOutcome, Event, EventBus, EventKind, VillageView};

// Re-export key game types at crate root for convenience
pub use game::{
    AccountId, Coord, CostModel, ProgressionQueue, ResourceKind, ResourceLedger, Resources, Troops, Village,
    VillageId,
};
pub use snapshot::WorldSnapshot;
pub use travel::{DispatchOrder, OrderId, Purpose, TravelScheduler};
