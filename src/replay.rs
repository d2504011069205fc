//! Scripted scenarios and deterministic replay.
//!
//! The engine is deterministic once "now" is supplied by a [`ManualClock`],
//! so a scenario needs only:
//! - the ruleset,
//! - the initial villages,
//! - a list of timestamped intents.
//!
//! Running the same scenario twice yields the same [`Recording`]: the same
//! per-step outcomes, the same event log and the same final world.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::{Clock, ManualClock, Timestamp};
use crate::config::{CelebrationKind, Ruleset};
use crate::engine::Engine;
use crate::error::{ConfigError, CoreError, CoreResult};
use crate::events::Event;
use crate::game::{AccountId, Coord, Resources, SlotIndex, Troops, VillageId};
use crate::snapshot::WorldSnapshot;
use crate::travel::{OrderId, Purpose};

/// Errors that can occur while loading or running scenarios.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// I/O error.
    #[error("scenario I/O failed: {0}")]
    Io(#[from] io::Error),
    /// The scenario or recording is not valid JSON.
    #[error("malformed scenario: {0}")]
    Json(#[from] serde_json::Error),
    /// The embedded ruleset is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A village could not be set up.
    #[error("scenario setup failed: {0}")]
    Setup(#[from] CoreError),
}

/// A village present when the scenario starts. Ids are assigned from 1 in
/// list order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VillageSeed {
    /// Owning account.
    pub owner: AccountId,
    /// Map position.
    pub coord: Coord,
    /// Whether it is a capital.
    #[serde(default)]
    pub capital: bool,
    /// Troops stationed at the start.
    #[serde(default)]
    pub garrison: Troops,
    /// Resources granted on top of the starting stock.
    #[serde(default)]
    pub bonus: Resources,
}

/// An intent as issued by a player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "intent")]
pub enum Intent {
    /// Upgrade a resource field.
    UpgradeField {
        /// Village.
        village: VillageId,
        /// Field slot.
        slot: SlotIndex,
    },
    /// Upgrade or construct a building.
    UpgradeBuilding {
        /// Village.
        village: VillageId,
        /// Building slot.
        slot: SlotIndex,
        /// Type to construct on an empty slot.
        #[serde(default)]
        building: Option<String>,
    },
    /// Train units.
    TrainUnits {
        /// Village.
        village: VillageId,
        /// Unit type.
        unit: String,
        /// How many.
        quantity: u32,
    },
    /// Send troops or merchants.
    Dispatch {
        /// Sending village.
        village: VillageId,
        /// Destination.
        target: Coord,
        /// Units to send.
        #[serde(default)]
        troops: Troops,
        /// Trade cargo.
        #[serde(default)]
        cargo: Resources,
        /// What to do there.
        purpose: Purpose,
    },
    /// Hold a celebration.
    StartCelebration {
        /// Village.
        village: VillageId,
        /// Small or large.
        kind: CelebrationKind,
    },
    /// Cancel a pending upgrade.
    CancelConstruction {
        /// Village.
        village: VillageId,
        /// Slot.
        slot: SlotIndex,
    },
    /// Recall an order in flight.
    CancelDispatch {
        /// Order to recall.
        order: OrderId,
    },
}

impl Intent {
    /// Issue this intent against `engine`.
    ///
    /// Returns a short description of what was admitted and, when the
    /// order has one, the instant it completes.
    ///
    /// # Errors
    ///
    /// Whatever the engine rejects the intent with.
    pub fn apply<C: Clock>(&self, engine: &Engine<C>) -> CoreResult<(String, Option<Timestamp>)> {
        match self {
            Self::UpgradeField { village, slot } => {
                let order = engine.upgrade_field(*village, *slot)?;
                Ok((format!("field {slot} to level {}", order.target_level), Some(order.ends_at)))
            }
            Self::UpgradeBuilding {
                village,
                slot,
                building,
            } => {
                let order = engine.upgrade_building(*village, *slot, building.as_deref())?;
                Ok((format!("slot {slot} to level {}", order.target_level), Some(order.ends_at)))
            }
            Self::TrainUnits { village, unit, quantity } => {
                let order = engine.train_units(*village, unit, *quantity)?;
                Ok((format!("{quantity} {unit}"), Some(order.ends_at())))
            }
            Self::Dispatch {
                village,
                target,
                troops,
                cargo,
                purpose,
            } => {
                let order = engine.dispatch(*village, *target, troops.clone(), *cargo, *purpose)?;
                Ok((format!("order {} ({purpose}) to {target}", order.id), Some(order.arrives_at)))
            }
            Self::StartCelebration { village, kind } => {
                let celebration = engine.start_celebration(*village, *kind)?;
                Ok((format!("{kind:?} celebration"), Some(celebration.ends_at)))
            }
            Self::CancelConstruction { village, slot } => {
                let refund = engine.cancel_construction(*village, *slot)?;
                Ok((format!("refunded {refund}"), None))
            }
            Self::CancelDispatch { order } => {
                let home = engine.cancel_dispatch(*order)?;
                Ok((format!("order {order} recalled as {}", home.id), Some(home.arrives_at)))
            }
        }
    }
}

/// One scripted intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// When the intent is issued.
    pub at: Timestamp,
    /// The intent.
    #[serde(flatten)]
    pub intent: Intent,
}

/// A complete, self-contained scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Balance data; the built-in ruleset when omitted.
    #[serde(default)]
    pub ruleset: Ruleset,
    /// Clock instant at which the villages are founded.
    #[serde(default)]
    pub start: Timestamp,
    /// Initial villages.
    pub villages: Vec<VillageSeed>,
    /// Scripted intents; they are issued in timestamp order.
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Instant to run to after the last step; defaults to the last step.
    #[serde(default)]
    pub until: Option<Timestamp>,
}

impl Scenario {
    /// Parse a scenario from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self, ReplayError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a scenario file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ReplayError> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    /// Instant the run ends at.
    #[must_use]
    pub fn end(&self) -> Timestamp {
        let last = self.steps.iter().map(|s| s.at).max().unwrap_or(self.start);
        self.until.map_or(last, |until| until.max(last)).max(self.start)
    }

    /// Run the scenario on a fresh engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the ruleset is invalid or a village cannot be
    /// placed. Rejected intents are recorded, not raised.
    pub fn run(&self) -> Result<Recording, ReplayError> {
        let clock = ManualClock::new(self.start);
        let engine = Engine::new(self.ruleset.clone(), clock.clone())?;
        let events = engine.subscribe();

        for seed in &self.villages {
            let id = engine.add_village(seed.owner, seed.coord, seed.capital)?;
            engine.provision(id, &seed.garrison, &seed.bonus)?;
        }

        let mut steps = self.steps.clone();
        steps.sort_by_key(|s| s.at);
        let mut outcomes = Vec::with_capacity(steps.len());
        for step in steps {
            clock.set(step.at);
            engine.tick();
            let result = match step.intent.apply(&engine) {
                Ok((detail, completes_at)) => StepResult::Accepted { detail, completes_at },
                Err(err) => StepResult::Rejected {
                    reason: err.to_string(),
                },
            };
            outcomes.push(StepOutcome {
                at: step.at,
                intent: step.intent,
                result,
            });
        }

        clock.set(self.end());
        let final_state = engine.snapshot();
        let violations = engine.check_invariants().iter().map(ToString::to_string).collect();

        let mut log: Vec<Event> = events.try_iter().collect();
        log.sort_by_key(|e| (e.at, e.village, e.seq));
        tracing::info!(
            steps = outcomes.len(),
            events = log.len(),
            villages = final_state.villages.len(),
            "scenario finished"
        );

        Ok(Recording {
            steps: outcomes,
            events: log,
            final_state,
            violations,
        })
    }
}

/// Whether a scripted intent was admitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum StepResult {
    /// Admitted.
    Accepted {
        /// What was admitted.
        detail: String,
        /// Completion or arrival instant.
        completes_at: Option<Timestamp>,
    },
    /// Rejected.
    Rejected {
        /// Rejection reason.
        reason: String,
    },
}

/// Result of one scripted step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    /// When the intent was issued.
    pub at: Timestamp,
    /// The intent.
    pub intent: Intent,
    /// Admission result.
    pub result: StepResult,
}

/// Everything a scenario run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    /// Per-step admission results in issue order.
    pub steps: Vec<StepOutcome>,
    /// Every event, ordered by instant, village and sequence number.
    pub events: Vec<Event>,
    /// World at the end of the run.
    pub final_state: WorldSnapshot,
    /// Invariant violations found at the end (empty unless there is a bug).
    pub violations: Vec<String>,
}

impl Recording {
    /// Write the recording as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), ReplayError> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Read a recording written by [`Recording::save`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ReplayError> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }
}
