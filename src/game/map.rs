//! Map coordinates and the canonical grid distance.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A coordinate on the shared world grid. The origin is the map centre.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coord {
    /// X coordinate (column).
    pub x: i32,
    /// Y coordinate (row).
    pub y: i32,
}

impl Coord {
    /// Create a new coordinate.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Grid distance to `other`: `max(|dx|, |dy|)`.
    ///
    /// This is the only metric used for travel. Attacks, reinforcements,
    /// trade and settlement all measure distance with it.
    #[must_use]
    pub const fn distance(self, other: Self) -> u32 {
        let dx = self.x.abs_diff(other.x);
        let dy = self.y.abs_diff(other.y);
        if dx > dy { dx } else { dy }
    }

    /// Whether the coordinate lies inside a square map of the given radius.
    #[must_use]
    pub const fn within(self, radius: i32) -> bool {
        self.x.unsigned_abs() <= radius.unsigned_abs() && self.y.unsigned_abs() <= radius.unsigned_abs()
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}|{})", self.x, self.y)
    }
}
