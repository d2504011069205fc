//! Run command implementation.

use super::output::{format_text, JsonRunSummary};
use super::{CliError, OutputFormat};
use hamlet::replay::Scenario;
use std::path::Path;

/// Execute the run command.
///
/// # Errors
///
/// Returns an error if the scenario cannot be loaded or set up, or if an
/// output file cannot be written.
pub(crate) fn execute(
    scenario: &Path,
    format: OutputFormat,
    save: Option<&Path>,
    snapshot: Option<&Path>,
    quiet: bool,
) -> Result<(), CliError> {
    let loaded = Scenario::load(scenario)
        .map_err(|e| CliError::new(format!("Failed to load {}: {e}", scenario.display())))?;

    tracing::info!(
        scenario = %scenario.display(),
        villages = loaded.villages.len(),
        steps = loaded.steps.len(),
        "running scenario"
    );
    let recording = loaded.run()?;

    match format {
        OutputFormat::Text => print!("{}", format_text(&recording, quiet)),
        OutputFormat::Json => {
            let summary = JsonRunSummary::from_recording(&recording);
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    if let Some(path) = save {
        recording.save(path)?;
        if !quiet && format == OutputFormat::Text {
            println!("Recording saved to {}", path.display());
        }
    }

    if let Some(path) = snapshot {
        recording.final_state.save(path)?;
        if !quiet && format == OutputFormat::Text {
            println!("Snapshot saved to {}", path.display());
        }
    }

    if recording.violations.is_empty() {
        Ok(())
    } else {
        Err(CliError::new(format!(
            "{} invariant violations",
            recording.violations.len()
        )))
    }
}
