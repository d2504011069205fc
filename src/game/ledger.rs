//! Resource ledger: turns elapsed time into stored resources.
//!
//! Each resource accrues linearly at its hourly rate and is clamped into
//! `[0, capacity]` whenever the ledger is advanced. Excess production is
//! discarded, never banked. Crop may have a negative net rate (upkeep beyond
//! farming); when stored crop would drop below zero it is floored at zero and
//! the advance reports a [`Starvation`] with the unmet amount.

use serde::{Deserialize, Serialize};

use crate::clock::{SECONDS_PER_HOUR, Timestamp};
use crate::error::CoreError;
use crate::game::{affordable, ResourceKind, Resources};

/// Net hourly production per resource. Crop may be negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductionRates {
    /// Lumber per hour.
    pub lumber: f64,
    /// Clay per hour.
    pub clay: f64,
    /// Iron per hour.
    pub iron: f64,
    /// Net crop per hour (farming minus upkeep).
    pub crop: f64,
}

impl ProductionRates {
    /// Create rates from the four components.
    #[must_use]
    pub const fn new(lumber: f64, clay: f64, iron: f64, crop: f64) -> Self {
        Self {
            lumber,
            clay,
            iron,
            crop,
        }
    }

    /// Rate for one resource.
    #[must_use]
    pub const fn get(&self, kind: ResourceKind) -> f64 {
        match kind {
            ResourceKind::Lumber => self.lumber,
            ResourceKind::Clay => self.clay,
            ResourceKind::Iron => self.iron,
            ResourceKind::Crop => self.crop,
        }
    }
}

/// Crop shortfall observed during an advance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Starvation {
    /// Crop that upkeep demanded but the granary could not supply.
    pub deficit: f64,
}

/// Stored resources of one village plus the data needed to advance them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceLedger {
    stored: [f64; 4],
    rates: ProductionRates,
    warehouse: u64,
    granary: u64,
    last_calculated: Timestamp,
}

impl ResourceLedger {
    /// An empty ledger with the given capacities, last calculated at `at`.
    #[must_use]
    pub const fn new(warehouse: u64, granary: u64, at: Timestamp) -> Self {
        Self {
            stored: [0.0; 4],
            rates: ProductionRates::new(0.0, 0.0, 0.0, 0.0),
            warehouse,
            granary,
            last_calculated: at,
        }
    }

    /// Replace the stored amounts, clamped to capacity.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn with_stock(mut self, stock: Resources) -> Self {
        for (kind, amount) in stock.iter() {
            self.stored[kind.index()] = (amount as f64).min(self.capacity_f64(kind));
        }
        self
    }

    /// Replace the production rates.
    #[must_use]
    pub const fn with_rates(mut self, rates: ProductionRates) -> Self {
        self.rates = rates;
        self
    }

    /// Instant up to which production has been accounted.
    #[must_use]
    pub const fn last_calculated(&self) -> Timestamp {
        self.last_calculated
    }

    /// Current hourly rates.
    #[must_use]
    pub const fn rates(&self) -> ProductionRates {
        self.rates
    }

    /// Exact (fractional) stored amount of one resource.
    #[must_use]
    pub const fn stored(&self, kind: ResourceKind) -> f64 {
        self.stored[kind.index()]
    }

    /// Storage bound for one resource.
    #[must_use]
    pub const fn capacity(&self, kind: ResourceKind) -> u64 {
        if kind.uses_granary() {
            self.granary
        } else {
            self.warehouse
        }
    }

    #[allow(clippy::cast_precision_loss)]
    const fn capacity_f64(&self, kind: ResourceKind) -> f64 {
        self.capacity(kind) as f64
    }

    /// Whole units currently stored, rounded down.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn snapshot(&self) -> Resources {
        Resources::from_fn(|kind| self.stored[kind.index()].max(0.0).floor() as u64)
    }

    /// Accrue production from `last_calculated` up to `now`.
    ///
    /// Computes `clamp(stored + rate * elapsed / hour, 0, capacity)` for each
    /// resource and moves `last_calculated` to `now`. Advancing to an instant
    /// at or before `last_calculated` changes nothing, so repeated calls with
    /// the same `now` are idempotent.
    #[allow(clippy::cast_precision_loss)]
    pub fn advance(&mut self, now: Timestamp) -> Option<Starvation> {
        let elapsed = now.secs_since(self.last_calculated);
        if elapsed == 0 {
            return None;
        }
        let hours = elapsed as f64 / SECONDS_PER_HOUR as f64;

        let mut starvation = None;
        for kind in ResourceKind::ALL {
            let idx = kind.index();
            let next = self.stored[idx] + self.rates.get(kind) * hours;
            if next < 0.0 && kind == ResourceKind::Crop {
                starvation = Some(Starvation { deficit: -next });
            }
            self.stored[idx] = next.clamp(0.0, self.capacity_f64(kind));
        }
        self.last_calculated = now;
        starvation
    }

    /// Replace the hourly rates. Callers advance the ledger first so that
    /// elapsed time is accounted at the old rates.
    pub fn set_rates(&mut self, rates: ProductionRates) {
        self.rates = rates;
    }

    /// Replace the capacities, discarding anything above the new bounds.
    pub fn set_capacity(&mut self, warehouse: u64, granary: u64) {
        self.warehouse = warehouse;
        self.granary = granary;
        for kind in ResourceKind::ALL {
            let cap = self.capacity_f64(kind);
            let slot = &mut self.stored[kind.index()];
            *slot = slot.min(cap);
        }
    }

    /// Remove `cost` atomically.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InsufficientResources`] without touching the stock
    /// if any component is short. There are no partial payments.
    #[allow(clippy::cast_precision_loss)]
    pub fn debit(&mut self, cost: &Resources) -> Result<(), CoreError> {
        let available = self.snapshot();
        if !affordable(&available, cost) {
            return Err(CoreError::InsufficientResources {
                required: *cost,
                available,
            });
        }
        for (kind, amount) in cost.iter() {
            let slot = &mut self.stored[kind.index()];
            *slot = (*slot - amount as f64).max(0.0);
        }
        Ok(())
    }

    /// Remove as much of `wanted` as is available and return what was taken.
    #[allow(clippy::cast_precision_loss)]
    pub fn debit_up_to(&mut self, wanted: &Resources) -> Resources {
        let taken = self.snapshot().min(wanted);
        for (kind, amount) in taken.iter() {
            let slot = &mut self.stored[kind.index()];
            *slot = (*slot - amount as f64).max(0.0);
        }
        taken
    }

    /// Add `amount`, clamped to capacity. Returns the part that was discarded.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn credit(&mut self, amount: &Resources) -> Resources {
        let mut overflow = Resources::ZERO;
        for (kind, value) in amount.iter() {
            let cap = self.capacity_f64(kind);
            let slot = &mut self.stored[kind.index()];
            let next = *slot + value as f64;
            if next > cap {
                overflow.set(kind, (next - cap).floor() as u64);
            }
            *slot = next.min(cap);
        }
        overflow
    }
}

/// Kani proofs for the clamping arithmetic.
///
/// Run with: `cargo kani`
#[cfg(kani)]
mod kani_proofs {
    use super::*;

    /// Stored amounts stay within capacity for any rate and elapsed time.
    #[kani::proof]
    fn prove_advance_stays_in_bounds() {
        let rate: i32 = kani::any();
        let elapsed: u32 = kani::any();
        let cap: u32 = kani::any();

        let mut ledger = ResourceLedger::new(u64::from(cap), u64::from(cap), Timestamp::ZERO)
            .with_rates(ProductionRates::new(0.0, 0.0, 0.0, f64::from(rate)));
        ledger.advance(Timestamp::from_secs(u64::from(elapsed)));

        let crop = ledger.stored(ResourceKind::Crop);
        assert!(crop >= 0.0);
        assert!(crop <= f64::from(cap));
    }
}
