//! Quote command implementation.

use super::CliError;
use hamlet::game::queue::quote_upgrade;
use hamlet::{Resources, Ruleset};
use std::path::Path;

/// Execute the quote command.
///
/// # Errors
///
/// Returns an error if the ruleset cannot be loaded or `kind` names neither
/// a building nor a unit.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn execute(
    kind: &str,
    ruleset: Option<&Path>,
    main_building: u32,
    levels: Option<u32>,
) -> Result<(), CliError> {
    let rules = match ruleset {
        Some(path) => Ruleset::load(path)?,
        None => Ruleset::default(),
    };

    if let Some(building) = rules.building(kind) {
        let speed = rules.world_speed * (1.0 + rules.main_building_bonus * f64::from(main_building));
        let top = levels.map_or(building.max_level, |l| l.min(building.max_level));
        println!("{kind} (speed x{speed:.2}):");
        println!("  {:>5}  {:>8} {:>8} {:>8} {:>8}  {:>10}", "level", "lumber", "clay", "iron", "crop", "secs");
        for level in 1..=top {
            let quote = quote_upgrade(building, level, &rules, speed);
            println!("  {:>5}  {}  {:>10}", quote.level, row(&quote.resources), quote.build_secs);
        }
        return Ok(());
    }

    if let Some(unit) = rules.unit(kind) {
        let per_unit = (unit.train_secs as f64 / rules.world_speed).ceil();
        println!("{kind}:");
        println!("  cost:     {}", row(&unit.cost));
        println!("  training: {per_unit}s per unit");
        println!("  speed:    {} fields/h", unit.speed);
        println!("  attack:   {}  defense: {}  carry: {}", unit.attack, unit.defense, unit.carry);
        println!("  upkeep:   {} crop/h", unit.upkeep);
        if let Some(required) = &unit.requires {
            println!("  requires: {required}");
        }
        return Ok(());
    }

    Err(CliError::new(format!("No building or unit named {kind:?}")))
}

fn row(r: &Resources) -> String {
    r.iter().map(|(_, n)| format!("{n:>8}")).collect::<Vec<_>>().join(" ")
}
