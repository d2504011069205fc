//! Benchmarks for world ticks and the travel heap.
//!
//! A tick catches up every village and resolves due arrivals - the hot path
//! of a running world.

#![allow(missing_docs)]

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use hamlet::game::ProductionRates;
use hamlet::{
    AccountId, Coord, Engine, ManualClock, Purpose, ResourceLedger, Resources, Ruleset, Timestamp,
    TravelScheduler, Troops,
};

/// A square of villages, half of them sending raids to a neighbour.
fn populated_world(side: i32) -> (Engine<ManualClock>, ManualClock) {
    let clock = ManualClock::new(Timestamp::ZERO);
    let Ok(engine) = Engine::new(Ruleset::default(), clock.clone()) else {
        panic!("default ruleset is valid");
    };
    let mut raiders = Troops::new();
    raiders.insert("imperian".to_string(), 10);

    for x in 0..side {
        for y in 0..side {
            let owner = AccountId::new(u32::try_from(x * side + y + 1).unwrap_or(u32::MAX));
            let Ok(id) = engine.add_village(owner, Coord::new(x * 3, y * 3), x == 0) else {
                continue;
            };
            let _ = engine.upgrade_field(id, 1);
            if (x + y) % 2 == 0 && x + 1 < side {
                let _ = engine.provision(id, &raiders, &Resources::ZERO);
                let _ = engine.dispatch(id, Coord::new((x + 1) * 3, y * 3), raiders.clone(), Resources::ZERO, Purpose::Raid);
            }
        }
    }
    (engine, clock)
}

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");
    for side in [4, 16, 32] {
        group.bench_with_input(BenchmarkId::from_parameter(side * side), &side, |b, &side| {
            b.iter_batched(
                || populated_world(side),
                |(engine, clock)| {
                    for hour in 1..=12 {
                        clock.set(Timestamp::from_hours(hour));
                        black_box(engine.tick());
                    }
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_ledger_advance(c: &mut Criterion) {
    let ledger = ResourceLedger::new(80_000, 80_000, Timestamp::ZERO)
        .with_rates(ProductionRates::new(1_200.0, 1_100.0, 900.0, -40.0));

    c.bench_function("ledger_advance_1000_steps", |b| {
        b.iter(|| {
            let mut ledger = ledger;
            for step in 1..=1_000u64 {
                black_box(ledger.advance(Timestamp::from_secs(step * 37)));
            }
            black_box(ledger)
        });
    });
}

fn bench_scheduler(c: &mut Criterion) {
    let rules = Ruleset::default();
    let mut troops = Troops::new();
    troops.insert("legionnaire".to_string(), 5);

    c.bench_function("schedule_and_drain_10k", |b| {
        b.iter(|| {
            let mut scheduler = TravelScheduler::new();
            for i in 0..10_000i32 {
                let draft = hamlet::travel::OrderDraft {
                    origin: hamlet::VillageId::new(1),
                    owner: AccountId::new(1),
                    from: Coord::new(0, 0),
                    target: Coord::new(i % 150, i / 150),
                    troops: troops.clone(),
                    cargo: Resources::ZERO,
                    purpose: Purpose::Reinforce,
                };
                scheduler.schedule(draft, 6.0, Timestamp::ZERO, &rules);
            }
            black_box(scheduler.drain_due(Timestamp::from_hours(1_000)))
        });
    });
}

criterion_group!(benches, bench_tick, bench_ledger_advance, bench_scheduler);
criterion_main!(benches);
