#![no_main]

use arbitrary::Arbitrary;
use hamlet::game::ProductionRates;
use hamlet::{ResourceKind, ResourceLedger, Resources, Timestamp};
use libfuzzer_sys::fuzz_target;

/// One operation against the ledger.
#[derive(Arbitrary, Debug)]
enum Op {
    Advance(u32),
    Debit([u16; 4]),
    DebitUpTo([u16; 4]),
    Credit([u16; 4]),
    Rates([i16; 4]),
    Capacity(u32, u32),
}

/// Structured input for ledger fuzzing.
#[derive(Arbitrary, Debug)]
struct LedgerInput {
    warehouse: u32,
    granary: u32,
    stock: [u16; 4],
    ops: Vec<Op>,
}

fn amounts(raw: [u16; 4]) -> Resources {
    Resources::new(raw[0].into(), raw[1].into(), raw[2].into(), raw[3].into())
}

fn check(ledger: &ResourceLedger) {
    for kind in ResourceKind::ALL {
        let stored = ledger.stored(kind);
        assert!(stored.is_finite());
        assert!(stored >= 0.0, "{kind:?} went negative: {stored}");
        assert!(stored <= ledger.capacity(kind) as f64, "{kind:?} above capacity");
    }
}

fuzz_target!(|input: LedgerInput| {
    let mut now = Timestamp::ZERO;
    let mut ledger = ResourceLedger::new(input.warehouse.into(), input.granary.into(), now)
        .with_stock(amounts(input.stock));
    check(&ledger);

    for op in input.ops.into_iter().take(256) {
        match op {
            Op::Advance(secs) => {
                now = now.plus_secs(secs.into());
                ledger.advance(now);
                let again = ledger;
                ledger.advance(now);
                assert_eq!(ledger, again, "advance is not idempotent");
            }
            Op::Debit(raw) => {
                let before = ledger;
                if ledger.debit(&amounts(raw)).is_err() {
                    assert_eq!(ledger, before, "failed debit changed the ledger");
                }
            }
            Op::DebitUpTo(raw) => {
                let wanted = amounts(raw);
                let taken = ledger.debit_up_to(&wanted);
                assert!(wanted.covers(&taken));
            }
            Op::Credit(raw) => {
                let given = amounts(raw);
                let overflow = ledger.credit(&given);
                assert!(given.covers(&overflow));
            }
            Op::Rates(raw) => {
                ledger.advance(now);
                ledger.set_rates(ProductionRates::new(
                    raw[0].into(),
                    raw[1].into(),
                    raw[2].into(),
                    raw[3].into(),
                ));
            }
            Op::Capacity(warehouse, granary) => {
                ledger.set_capacity(warehouse.into(), granary.into());
            }
        }
        check(&ledger);
    }
});
