//! Resource kinds and whole-unit resource amounts.

use std::fmt;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// One of the four village resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Stored in the warehouse.
    Lumber,
    /// Stored in the warehouse.
    Clay,
    /// Stored in the warehouse.
    Iron,
    /// Stored in the granary; its net rate may be negative.
    Crop,
}

impl ResourceKind {
    /// All kinds, in ledger order.
    pub const ALL: [Self; 4] = [Self::Lumber, Self::Clay, Self::Iron, Self::Crop];

    /// Position of this kind in per-resource arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Lumber => 0,
            Self::Clay => 1,
            Self::Iron => 2,
            Self::Crop => 3,
        }
    }

    /// Whether the granary (rather than the warehouse) bounds this resource.
    #[must_use]
    pub const fn uses_granary(self) -> bool {
        matches!(self, Self::Crop)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Lumber => "lumber",
            Self::Clay => "clay",
            Self::Iron => "iron",
            Self::Crop => "crop",
        };
        f.write_str(name)
    }
}

/// A whole-unit amount of each resource: a cost, a payload, or a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Resources {
    /// Lumber amount.
    pub lumber: u64,
    /// Clay amount.
    pub clay: u64,
    /// Iron amount.
    pub iron: u64,
    /// Crop amount.
    pub crop: u64,
}

impl Resources {
    /// No resources at all.
    pub const ZERO: Self = Self::new(0, 0, 0, 0);

    /// Create an amount from its four components.
    #[must_use]
    pub const fn new(lumber: u64, clay: u64, iron: u64, crop: u64) -> Self {
        Self {
            lumber,
            clay,
            iron,
            crop,
        }
    }

    /// The same amount of every resource.
    #[must_use]
    pub const fn splat(amount: u64) -> Self {
        Self::new(amount, amount, amount, amount)
    }

    /// Amount of a single resource.
    #[must_use]
    pub const fn get(&self, kind: ResourceKind) -> u64 {
        match kind {
            ResourceKind::Lumber => self.lumber,
            ResourceKind::Clay => self.clay,
            ResourceKind::Iron => self.iron,
            ResourceKind::Crop => self.crop,
        }
    }

    /// Overwrite the amount of a single resource.
    pub fn set(&mut self, kind: ResourceKind, amount: u64) {
        match kind {
            ResourceKind::Lumber => self.lumber = amount,
            ResourceKind::Clay => self.clay = amount,
            ResourceKind::Iron => self.iron = amount,
            ResourceKind::Crop => self.crop = amount,
        }
    }

    /// Build an amount by evaluating `f` for every kind.
    #[must_use]
    pub fn from_fn(mut f: impl FnMut(ResourceKind) -> u64) -> Self {
        Self::new(
            f(ResourceKind::Lumber),
            f(ResourceKind::Clay),
            f(ResourceKind::Iron),
            f(ResourceKind::Crop),
        )
    }

    /// Iterate `(kind, amount)` pairs in ledger order.
    pub fn iter(&self) -> impl Iterator<Item = (ResourceKind, u64)> + '_ {
        ResourceKind::ALL.into_iter().map(|kind| (kind, self.get(kind)))
    }

    /// Sum of all four components.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.lumber
            .saturating_add(self.clay)
            .saturating_add(self.iron)
            .saturating_add(self.crop)
    }

    /// Whether every component is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Pointwise `self >= other`: whether `self` pays for `other` in full.
    #[must_use]
    pub fn covers(&self, other: &Self) -> bool {
        self.iter().all(|(kind, amount)| amount >= other.get(kind))
    }

    /// Componentwise multiplication by an integer count, saturating.
    #[must_use]
    pub fn times(&self, count: u64) -> Self {
        Self::from_fn(|kind| self.get(kind).saturating_mul(count))
    }

    /// Componentwise `floor(amount * fraction)` for a non-negative fraction.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn scaled(&self, fraction: f64) -> Self {
        let fraction = fraction.max(0.0);
        Self::from_fn(|kind| (self.get(kind) as f64 * fraction).floor() as u64)
    }

    /// Componentwise minimum.
    #[must_use]
    pub fn min(&self, other: &Self) -> Self {
        Self::from_fn(|kind| self.get(kind).min(other.get(kind)))
    }
}

impl Add for Resources {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::from_fn(|kind| self.get(kind).saturating_add(rhs.get(kind)))
    }
}

impl AddAssign for Resources {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lumber {} / clay {} / iron {} / crop {}",
            self.lumber, self.clay, self.iron, self.crop
        )
    }
}
