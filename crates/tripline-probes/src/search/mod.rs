//! Filesystem searches. The hidden-exe and immutable-file searches are
//! resumable; the shared-memory search is small enough to run whole.

pub mod dev_shm;
pub mod hidden_exe;
pub mod immutable_files;

use tripline_core::engine::Findings;
use tripline_core::error::{EngineError, Result};
use tripline_core::settings::SearchSettings;
use tripline_core::step::{derive_units, effective_locations, ScanUnit, StepMode};
use tripline_core::whitelist::Whitelist;

/// Units and mode for this invocation, re-derived from the configuration.
pub(crate) fn plan(probe: &str, settings: &SearchSettings) -> Result<(Vec<ScanUnit>, StepMode)> {
    let mode = StepMode::from_flag(settings.search_in_steps);
    let locations = effective_locations(&settings.search_locations);
    let units = derive_units(&locations, mode)
        .map_err(|e| EngineError::collection(probe, anyhow::Error::new(e)))?;
    Ok((units, mode))
}

/// Resolve the configured whitelist. Entries that do not resolve are
/// reported as non-fatal errors and otherwise ignored.
pub(crate) fn whitelist(settings: &SearchSettings, findings: &mut Findings) -> Whitelist {
    let (whitelist, skipped) =
        Whitelist::resolve(&settings.directory_whitelist, &settings.file_whitelist);
    for err in skipped {
        findings.error(err.to_string());
    }
    whitelist
}
