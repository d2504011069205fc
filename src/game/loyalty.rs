//! Village loyalty: celebrations raise it, conquest attacks lower it.

use serde::{Deserialize, Serialize};

use crate::clock::{SECONDS_PER_HOUR, Timestamp};
use crate::config::{CelebrationKind, ConquestRules, Ruleset};
use crate::error::{CoreError, CoreResult};
use crate::game::{ResourceLedger, VillageId};

/// Upper loyalty bound.
pub const MAX_LOYALTY: f64 = 100.0;

/// A celebration in progress.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Celebration {
    /// Small or large.
    pub kind: CelebrationKind,
    /// Admission instant.
    pub started_at: Timestamp,
    /// Instant the loyalty bonus applies.
    pub ends_at: Timestamp,
    /// Loyalty added on completion.
    pub loyalty: f64,
}

/// Result of a successful conquest attack.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ConquestOutcome {
    /// Loyalty dropped but stayed above zero.
    Reduced {
        /// Loyalty after the hit.
        loyalty: f64,
    },
    /// Loyalty reached zero: ownership transfers and loyalty resets.
    Transferred {
        /// Loyalty after the reset.
        loyalty: f64,
    },
}

/// Loyalty of one village plus its celebration slot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoyaltyTracker {
    loyalty: f64,
    celebration: Option<Celebration>,
}

impl Default for LoyaltyTracker {
    fn default() -> Self {
        Self::new(MAX_LOYALTY)
    }
}

impl LoyaltyTracker {
    /// A tracker at the given loyalty, clamped to `[0, 100]`.
    #[must_use]
    pub fn new(loyalty: f64) -> Self {
        Self {
            loyalty: loyalty.clamp(0.0, MAX_LOYALTY),
            celebration: None,
        }
    }

    /// Current loyalty.
    #[must_use]
    pub const fn loyalty(&self) -> f64 {
        self.loyalty
    }

    /// The running celebration, if any.
    #[must_use]
    pub const fn celebration(&self) -> Option<&Celebration> {
        self.celebration.as_ref()
    }

    /// Instant the running celebration completes.
    #[must_use]
    pub fn next_transition(&self) -> Option<Timestamp> {
        self.celebration.map(|c| c.ends_at)
    }

    /// Regain loyalty for `elapsed_secs` of peace, capped at 100.
    #[allow(clippy::cast_precision_loss)]
    pub fn recover(&mut self, elapsed_secs: u64, per_hour: f64) {
        if elapsed_secs == 0 || per_hour <= 0.0 {
            return;
        }
        let gained = per_hour * elapsed_secs as f64 / SECONDS_PER_HOUR as f64;
        self.loyalty = (self.loyalty + gained).min(MAX_LOYALTY);
    }

    /// Start a celebration and debit its cost.
    ///
    /// # Errors
    ///
    /// [`CoreError::CelebrationInProgress`] while another celebration runs,
    /// [`CoreError::InsufficientResources`] when the ledger is short.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn start_celebration(
        &mut self,
        village: VillageId,
        kind: CelebrationKind,
        rules: &Ruleset,
        ledger: &mut ResourceLedger,
        now: Timestamp,
    ) -> CoreResult<Celebration> {
        if self.celebration.is_some() {
            return Err(CoreError::CelebrationInProgress(village));
        }
        let spec = rules.celebration(kind);
        ledger.debit(&spec.cost)?;
        let duration = ((spec.duration_secs as f64 / rules.world_speed).ceil() as u64).max(1);
        let celebration = Celebration {
            kind,
            started_at: now,
            ends_at: now.plus_secs(duration),
            loyalty: spec.loyalty,
        };
        self.celebration = Some(celebration);
        Ok(celebration)
    }

    /// Finish the celebration if it ended at or before `now`.
    ///
    /// Returns the finished celebration; its bonus has been applied.
    pub fn complete_until(&mut self, now: Timestamp) -> Option<Celebration> {
        let done = self.celebration.filter(|c| c.ends_at <= now)?;
        self.celebration = None;
        self.loyalty = (self.loyalty + done.loyalty).min(MAX_LOYALTY);
        Some(done)
    }

    /// Apply one successful conquest attack of the given strength.
    ///
    /// The loss is `strength` clamped into the configured range. Capitals are
    /// rejected before any loyalty is touched. At zero the tracker resets to
    /// the post-conquest loyalty and reports [`ConquestOutcome::Transferred`];
    /// moving the village to its new owner is the caller's job and must
    /// happen in the same critical section.
    ///
    /// # Errors
    ///
    /// [`CoreError::CapitalImmune`] for capital villages.
    pub fn apply_conquest_attempt(
        &mut self,
        village: VillageId,
        is_capital: bool,
        strength: f64,
        rules: &ConquestRules,
    ) -> CoreResult<ConquestOutcome> {
        if is_capital {
            return Err(CoreError::CapitalImmune(village));
        }
        let loss = strength.clamp(rules.min_loss, rules.max_loss);
        let remaining = (self.loyalty - loss).max(0.0);
        if remaining <= 0.0 {
            self.loyalty = rules.post_conquest_loyalty.clamp(0.0, MAX_LOYALTY);
            Ok(ConquestOutcome::Transferred {
                loyalty: self.loyalty,
            })
        } else {
            self.loyalty = remaining;
            Ok(ConquestOutcome::Reduced { loyalty: remaining })
        }
    }
}
