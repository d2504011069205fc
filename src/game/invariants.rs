//! Sanity checks that detect bugs.
//!
//! None of these can trigger through the public intents of a correctly
//! implemented engine. They exist for tests, fuzzing and the `run` command's
//! end-of-scenario audit.

use std::fmt;

use crate::config::Ruleset;
use crate::game::{ResourceKind, Village, MAX_LOYALTY};
use crate::travel::DispatchOrder;

/// Invariant violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    /// Description of the violated invariant.
    pub message: String,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invariant violation: {}", self.message)
    }
}

impl std::error::Error for InvariantViolation {}

/// Check one village.
///
/// Returns every violation found, or an empty list.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn check_village(village: &Village, rules: &Ruleset) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    let mut push = |message: String| violations.push(InvariantViolation { message });
    let id = village.id();

    for kind in ResourceKind::ALL {
        let stored = village.ledger().stored(kind);
        let cap = village.ledger().capacity(kind) as f64;
        if !(0.0..=cap).contains(&stored) {
            push(format!("village {id} holds {stored} {kind}, outside 0..={cap}"));
        }
    }

    let loyalty = village.loyalty().loyalty();
    if !(0.0..=MAX_LOYALTY).contains(&loyalty) {
        push(format!("village {id} loyalty {loyalty} outside 0..=100"));
    }

    let active = village.queue().active_orders();
    if active > rules.queue_depth.max(1) {
        push(format!(
            "village {id} has {active} active orders, queue depth is {}",
            rules.queue_depth
        ));
    }

    for slot in village.queue().slots() {
        if let Some(pending) = &slot.pending {
            if pending.ends_at < pending.started_at {
                push(format!("village {id} slot {} ends before it starts", slot.index));
            }
            if pending.target_level != slot.level + 1 {
                push(format!(
                    "village {id} slot {} pending level {} is not level {} + 1",
                    slot.index, pending.target_level, slot.level
                ));
            }
        }
        let max = slot
            .building
            .as_deref()
            .and_then(|name| rules.building(name))
            .map_or(0, |b| b.max_level);
        if slot.level > max {
            push(format!("village {id} slot {} level {} above max {max}", slot.index, slot.level));
        }
    }

    violations
}

/// Check outstanding dispatch orders.
#[must_use]
pub fn check_orders<'a>(orders: impl IntoIterator<Item = &'a DispatchOrder>) -> Vec<InvariantViolation> {
    orders
        .into_iter()
        .filter_map(|order| {
            if order.arrives_at < order.departed_at {
                Some(format!("order {} arrives before it departs", order.id))
            } else if order.resolved {
                Some(format!("order {} is resolved but still scheduled", order.id))
            } else {
                None
            }
        })
        .map(|message| InvariantViolation { message })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Timestamp;
    use crate::game::{AccountId, Coord, VillageId};

    #[test]
    fn test_fresh_village_is_clean() {
        let rules = Ruleset::default();
        let village = Village::found(
            VillageId::new(1),
            AccountId::new(1),
            Coord::new(3, 3),
            true,
            &rules,
            Timestamp::ZERO,
        );
        assert!(check_village(&village, &rules).is_empty());
    }

    #[test]
    fn test_shallower_ruleset_flags_queue_depth() {
        let deep = Ruleset {
            queue_depth: 2,
            ..Ruleset::default()
        };
        let mut village = Village::found(
            VillageId::new(1),
            AccountId::new(1),
            Coord::new(3, 3),
            false,
            &deep,
            Timestamp::ZERO,
        );
        village.ledger_mut().set_capacity(100_000, 100_000);
        village.ledger_mut().credit(&crate::game::Resources::splat(10_000));
        village.upgrade(1, true, None, &deep, Timestamp::ZERO).unwrap();
        village.upgrade(2, true, None, &deep, Timestamp::ZERO).unwrap();

        let violations = check_village(&village, &Ruleset::default());
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("2 active orders"));
    }
}
