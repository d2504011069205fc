//! Ruleset validation command implementation.

use super::CliError;
use hamlet::config::BuildingRole;
use hamlet::Ruleset;
use std::path::Path;

/// Execute the validate command.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed or fails validation.
pub(crate) fn execute(ruleset: &Path) -> Result<(), CliError> {
    println!("Validating: {}", ruleset.display());
    println!();

    let rules = match Ruleset::load(ruleset) {
        Ok(rules) => {
            print_check("parse and validate", true);
            rules
        }
        Err(e) => {
            print_check("parse and validate", false);
            return Err(CliError::new(format!("Invalid ruleset: {e}")));
        }
    };

    let fields = rules.buildings.iter().filter(|b| b.is_field()).count();
    let storage = rules
        .buildings
        .iter()
        .filter(|b| matches!(b.role, BuildingRole::Warehouse | BuildingRole::Granary))
        .count();
    print_check("storage buildings present", storage > 0);

    println!();
    println!("Summary:");
    println!("  World speed:    {}", rules.world_speed);
    println!("  Cost growth:    {}", rules.cost_growth);
    println!("  Queue depth:    {}", rules.queue_depth);
    println!("  Field types:    {fields}");
    println!("  Buildings:      {}", rules.buildings.len() - fields);
    println!("  Units:          {}", rules.units.len());
    println!("  Slots:          {}", rules.total_slots());

    println!();
    println!("Validation successful!");

    Ok(())
}

fn print_check(name: &str, ok: bool) {
    let status = if ok { "OK" } else { "FAILED" };
    let symbol = if ok { "✓" } else { "✗" };
    println!("  {symbol} {name}: {status}");
}
