//! Output formatting utilities for CLI.

use hamlet::replay::{Recording, StepResult};
use hamlet::{ArrivalOutcome, Event, EventKind, Resources};
use serde::Serialize;

/// JSON-serializable run summary.
#[derive(Debug, Serialize)]
pub(super) struct JsonRunSummary<'a> {
    /// Instant the run ended at.
    pub(super) ended_at: u64,
    /// Intents admitted.
    pub(super) accepted: usize,
    /// Intents rejected.
    pub(super) rejected: usize,
    /// Events published.
    pub(super) events: &'a [Event],
    /// Invariant violations.
    pub(super) violations: &'a [String],
}

impl<'a> JsonRunSummary<'a> {
    /// Create from a recording.
    pub(super) fn from_recording(recording: &'a Recording) -> Self {
        let (accepted, rejected) = tally(recording);
        Self {
            ended_at: recording.final_state.taken_at.as_secs(),
            accepted,
            rejected,
            events: &recording.events,
            violations: &recording.violations,
        }
    }
}

/// Count accepted and rejected steps.
pub(super) fn tally(recording: &Recording) -> (usize, usize) {
    recording
        .steps
        .iter()
        .fold((0, 0), |(ok, rejected), step| match step.result {
            StepResult::Accepted { .. } => (ok + 1, rejected),
            StepResult::Rejected { .. } => (ok, rejected + 1),
        })
}

fn resources(r: &Resources) -> String {
    r.iter().map(|(kind, n)| format!("{kind}={n}")).collect::<Vec<_>>().join(" ")
}

/// One event as a single line of text.
pub(super) fn format_event(event: &Event) -> String {
    let body = match &event.kind {
        EventKind::ResourcesUpdated { resources: r } => format!("resources {}", resources(r)),
        EventKind::SlotCompleted { slot, building, level } => {
            format!("slot {slot} {building} reached level {level}")
        }
        EventKind::UnitsTrained { unit, count } => format!("trained {count} {unit}"),
        EventKind::DispatchArrived { order, purpose, outcome } => {
            let detail = match outcome {
                ArrivalOutcome::Battle { attacker_won, plunder } => {
                    let verdict = if *attacker_won { "attacker won" } else { "defender held" };
                    format!("{verdict}, plunder {}", resources(plunder))
                }
                ArrivalOutcome::Reinforced { troops } => format!("reinforced with {troops:?}"),
                ArrivalOutcome::Delivered { cargo, overflow } => {
                    format!("delivered {} (lost {})", resources(cargo), resources(overflow))
                }
                ArrivalOutcome::Founded { founded } => format!("founded village {founded}"),
                ArrivalOutcome::Returned { troops, cargo } => {
                    format!("returned {troops:?} carrying {}", resources(cargo))
                }
                ArrivalOutcome::Bounced { reason } => format!("bounced: {reason}"),
            };
            format!("order {order} ({purpose}) arrived: {detail}")
        }
        EventKind::LoyaltyChanged { loyalty } => format!("loyalty now {loyalty:.1}"),
        EventKind::ConquestBlocked { attacker } => format!("capital held against {attacker}"),
        EventKind::OwnershipChanged { from, to } => format!("conquered: {from} -> {to}"),
        EventKind::Starvation { deficit } => format!("starvation, {deficit:.1} crop short"),
        EventKind::CelebrationCompleted { kind, loyalty } => {
            format!("{kind:?} celebration over, loyalty {loyalty:.1}")
        }
    };
    format!("[{:>8}] village {} #{}: {body}", event.at.as_secs(), event.village, event.seq)
}

/// Format a recording as human-readable text.
pub(super) fn format_text(recording: &Recording, quiet: bool) -> String {
    let mut output = String::new();

    if !quiet {
        output.push_str("Steps:\n");
        for step in &recording.steps {
            let line = match &step.result {
                StepResult::Accepted { detail, completes_at } => match completes_at {
                    Some(at) => format!("  [{:>8}] ok: {detail} (done at {at})\n", step.at.as_secs()),
                    None => format!("  [{:>8}] ok: {detail}\n", step.at.as_secs()),
                },
                StepResult::Rejected { reason } => {
                    format!("  [{:>8}] rejected: {reason}\n", step.at.as_secs())
                }
            };
            output.push_str(&line);
        }
        output.push_str("\nEvents:\n");
        for event in &recording.events {
            output.push_str("  ");
            output.push_str(&format_event(event));
            output.push('\n');
        }
        output.push('\n');
    }

    let (accepted, rejected) = tally(recording);
    output.push_str(&format!(
        "Ran to {}: {accepted} accepted, {rejected} rejected, {} events\n",
        recording.final_state.taken_at,
        recording.events.len()
    ));
    for village in &recording.final_state.villages {
        output.push_str(&format!(
            "  village {} at {} owned by {}: loyalty {:.1}, {}\n",
            village.id(),
            village.coord(),
            village.owner(),
            village.loyalty().loyalty(),
            resources(&village.ledger().snapshot()),
        ));
    }
    if !recording.final_state.orders.is_empty() {
        output.push_str(&format!(
            "  {} orders still in transit\n",
            recording.final_state.orders.len()
        ));
    }
    for violation in &recording.violations {
        output.push_str(&format!("  {violation}\n"));
    }

    output
}
