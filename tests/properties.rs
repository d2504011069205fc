//! Property-based tests for the progression core.
//!
//! These tests verify properties of the ledger, the cost model, travel and
//! the event reducer.
//! Run with: cargo test --release properties

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use proptest::prelude::*;

use hamlet::game::ProductionRates;
use hamlet::travel::{duration, slowest_speed};
use hamlet::{
    CostModel, Event, EventKind, ResourceKind, ResourceLedger, Resources, Ruleset, Timestamp, Troops,
    VillageId, VillageView,
};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2000))]

    /// Stored amounts stay within [0, capacity] and advancing twice to the
    /// same instant changes nothing.
    #[test]
    fn prop_ledger_bounded_and_idempotent(
        warehouse in 1u64..100_000,
        granary in 1u64..100_000,
        stock in 0u64..100_000,
        lumber in -5_000.0f64..5_000.0,
        crop in -5_000.0f64..5_000.0,
        secs in 0u64..1_000_000,
    ) {
        let mut ledger = ResourceLedger::new(warehouse, granary, Timestamp::ZERO)
            .with_stock(Resources::splat(stock))
            .with_rates(ProductionRates::new(lumber, 0.0, 0.0, crop));
        let now = Timestamp::from_secs(secs);
        ledger.advance(now);

        for kind in ResourceKind::ALL {
            let stored = ledger.stored(kind);
            prop_assert!(stored >= 0.0);
            prop_assert!(stored <= ledger.capacity(kind) as f64);
        }

        let before = ledger;
        ledger.advance(now);
        prop_assert_eq!(ledger, before);
    }

    /// Advancing in two hops never ends above advancing in one.
    #[test]
    fn prop_ledger_split_advance_bounded(
        rate in 0.0f64..10_000.0,
        first in 0u64..100_000,
        second in 0u64..100_000,
    ) {
        let start = ResourceLedger::new(5_000, 5_000, Timestamp::ZERO)
            .with_stock(Resources::ZERO)
            .with_rates(ProductionRates::new(rate, rate, rate, rate));
        let end = Timestamp::from_secs(first + second);

        let mut once = start.clone();
        once.advance(end);
        let mut twice = start;
        twice.advance(Timestamp::from_secs(first));
        twice.advance(end);

        for kind in ResourceKind::ALL {
            prop_assert!(twice.stored(kind) <= once.stored(kind) + 1e-6);
        }
    }

    /// Every non-zero cost component strictly increases with the level.
    #[test]
    fn prop_cost_monotone(
        lumber in 1u64..10_000,
        crop in 0u64..10_000,
        level in 1u32..30,
    ) {
        let model = CostModel::new(1.28);
        let base = Resources::new(lumber, 0, 0, crop);
        let here = model.cost(&base, level);
        let next = model.cost(&base, level + 1);
        prop_assert!(next.get(ResourceKind::Lumber) > here.get(ResourceKind::Lumber));
        if crop > 0 {
            prop_assert!(next.get(ResourceKind::Crop) > here.get(ResourceKind::Crop));
        }
        prop_assert_eq!(next.get(ResourceKind::Clay), 0);
    }

    /// Build time never shrinks as the level rises.
    #[test]
    fn prop_build_time_monotone(base_secs in 1u64..100_000, level in 1u32..30, speed in 0.5f64..10.0) {
        let model = CostModel::new(1.28);
        prop_assert!(model.build_secs(base_secs, level + 1, speed) >= model.build_secs(base_secs, level, speed));
    }

    /// A mixed force moves exactly as fast as its slowest member.
    #[test]
    fn prop_slowest_unit_sets_the_pace(
        legionnaires in 1u32..1_000,
        imperians in 0u32..1_000,
        equites in 0u32..1_000,
        fields in 0u32..400,
    ) {
        let rules = Ruleset::default();
        let mut force = Troops::new();
        force.insert("legionnaire".to_string(), legionnaires);
        force.insert("imperian".to_string(), imperians);
        force.insert("equites_imperatoris".to_string(), equites);

        let speed = slowest_speed(&force, &rules).unwrap();
        let legionnaire = rules.unit("legionnaire").unwrap().speed;
        prop_assert!((speed - legionnaire).abs() < f64::EPSILON);
        prop_assert_eq!(
            duration(fields, speed, rules.secs_per_field, rules.world_speed),
            duration(fields, legionnaire, rules.secs_per_field, rules.world_speed)
        );
    }

    /// Longer trips never arrive sooner.
    #[test]
    fn prop_duration_monotone(fields in 0u32..1_000, speed in 0.5f64..50.0) {
        prop_assert!(duration(fields + 1, speed, 3_600, 1.0) >= duration(fields, speed, 3_600, 1.0));
    }

    /// Replaying any prefix of a log, in any delivery order, never rolls the
    /// view back, and replaying the full log twice is a no-op.
    #[test]
    fn prop_view_replay_is_idempotent(
        amounts in prop::collection::vec(0u64..10_000, 1..40),
        shuffle in prop::collection::vec(any::<prop::sample::Index>(), 0..40),
    ) {
        let village = VillageId::new(9);
        let log: Vec<Event> = amounts
            .iter()
            .zip(1u64..)
            .map(|(amount, seq)| Event {
                village,
                seq,
                at: Timestamp::from_secs(seq),
                kind: EventKind::ResourcesUpdated { resources: Resources::splat(*amount) },
            })
            .collect();

        let mut view = VillageView::new(village);
        for index in &shuffle {
            let event = index.get(&log);
            let before = view.last_seq;
            view.apply(event);
            prop_assert!(view.last_seq >= before);
        }
        view.apply_all(&log);
        let settled = view.clone();
        prop_assert_eq!(view.apply_all(&log), 0);
        prop_assert_eq!(view, settled);
    }
}
