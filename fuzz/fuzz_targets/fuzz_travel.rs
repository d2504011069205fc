#![no_main]

use std::collections::BTreeSet;

use arbitrary::Arbitrary;
use hamlet::travel::{OrderDraft, TravelScheduler};
use hamlet::{AccountId, Coord, OrderId, Purpose, Resources, Ruleset, Timestamp, Troops, VillageId};
use libfuzzer_sys::fuzz_target;

/// One operation against the scheduler.
#[derive(Arbitrary, Debug)]
enum Op {
    Schedule { x: i8, y: i8, speed: u8, reinforce: bool },
    Wait(u16),
    Cancel(u8),
    Drain,
}

fuzz_target!(|ops: Vec<Op>| {
    let rules = Ruleset::default();
    let mut scheduler = TravelScheduler::new();
    let mut now = Timestamp::ZERO;
    let mut issued: Vec<OrderId> = Vec::new();
    let mut resolved = BTreeSet::new();
    let mut troops = Troops::new();
    troops.insert("legionnaire".to_string(), 1);

    for op in ops.into_iter().take(512) {
        match op {
            Op::Schedule { x, y, speed, reinforce } => {
                let draft = OrderDraft {
                    origin: VillageId::new(1),
                    owner: AccountId::new(1),
                    from: Coord::new(0, 0),
                    target: Coord::new(x.into(), y.into()),
                    troops: troops.clone(),
                    cargo: Resources::ZERO,
                    purpose: if reinforce { Purpose::Reinforce } else { Purpose::Raid },
                };
                let order = scheduler.schedule(draft, f64::from(speed.max(1)), now, &rules);
                assert!(order.arrives_at >= now);
                issued.push(order.id);
            }
            Op::Wait(secs) => now = now.plus_secs(secs.into()),
            Op::Cancel(pick) => {
                if let Some(id) = issued.get(usize::from(pick) % issued.len().max(1)) {
                    if scheduler.cancel(*id, now, rules.dispatch_cancel_window_secs).is_ok() {
                        assert!(resolved.insert(*id), "cancelled an order twice");
                    }
                }
            }
            Op::Drain => {
                for order in scheduler.drain_due(now) {
                    assert!(order.arrives_at <= now, "resolved early");
                    assert!(resolved.insert(order.id), "resolved twice");
                }
            }
        }
        assert!(scheduler.len() + resolved.len() == issued.len());
    }
});
