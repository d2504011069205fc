//! Geometric cost and build-time growth.
//!
//! The price of moving a slot to `target` is the base cost scaled by
//! `growth^(target - 1)`, floored per resource. The same multiplier scales
//! build time. Level 1 costs exactly the base.

use serde::{Deserialize, Serialize};

use crate::game::Resources;

/// Absorbs representation error in `base * growth^n` before flooring,
/// so that e.g. `100 * 1.28` yields 128 rather than 127.
const FLOOR_EPSILON: f64 = 1e-9;

/// Resources and time needed to reach one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostQuote {
    /// The level this quote buys.
    pub level: u32,
    /// Resources debited on admission.
    pub resources: Resources,
    /// Build time in seconds, already divided by the speed modifier.
    pub build_secs: u64,
}

/// Pure cost model parameterized by the per-level growth ratio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    growth: f64,
}

impl CostModel {
    /// A model with the given per-level ratio (must be greater than one).
    #[must_use]
    pub const fn new(growth: f64) -> Self {
        Self { growth }
    }

    /// The per-level ratio.
    #[must_use]
    pub const fn growth(&self) -> f64 {
        self.growth
    }

    /// `growth^(level - 1)`; levels 0 and 1 both map to 1.0.
    #[must_use]
    pub fn multiplier(&self, level: u32) -> f64 {
        let exponent = i32::try_from(level.saturating_sub(1)).unwrap_or(i32::MAX);
        self.growth.powi(exponent)
    }

    /// Cost of upgrading to `target`.
    ///
    /// Each component is `floor(base * multiplier(target))`. Non-zero
    /// components are additionally kept strictly increasing from one level to
    /// the next, so small bases whose floored product would stall still grow
    /// by at least one unit per level.
    #[must_use]
    pub fn cost(&self, base: &Resources, target: u32) -> Resources {
        Resources::from_fn(|kind| {
            let base_amount = base.get(kind);
            if base_amount == 0 {
                return 0;
            }
            let mut previous = 0u64;
            for level in 1..=target.max(1) {
                let scaled = self.scale(base_amount, level);
                previous = if level == 1 {
                    scaled
                } else {
                    scaled.max(previous.saturating_add(1))
                };
            }
            previous
        })
    }

    /// Build time for `target` in seconds: `ceil(base * multiplier / speed)`,
    /// at least one second.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn build_secs(&self, base_secs: u64, target: u32, speed: f64) -> u64 {
        let speed = if speed > 0.0 { speed } else { 1.0 };
        let raw = base_secs as f64 * self.multiplier(target) / speed;
        ((raw - FLOOR_EPSILON).ceil() as u64).max(1)
    }

    /// Cost and build time for `target` together.
    #[must_use]
    pub fn quote(&self, base: &Resources, base_secs: u64, target: u32, speed: f64) -> CostQuote {
        CostQuote {
            level: target,
            resources: self.cost(base, target),
            build_secs: self.build_secs(base_secs, target, speed),
        }
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn scale(&self, base: u64, level: u32) -> u64 {
        (base as f64 * self.multiplier(level) + FLOOR_EPSILON).floor() as u64
    }
}

impl Default for CostModel {
    fn default() -> Self {
        Self::new(1.28)
    }
}

/// Whether `current` pays for `cost` in full (pointwise `>=`).
#[must_use]
pub fn affordable(current: &Resources, cost: &Resources) -> bool {
    current.covers(cost)
}
