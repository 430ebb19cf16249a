//! Hidden (dot-named) ELF executables.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use tripline_core::engine::{Findings, Probe};
use tripline_core::error::Result;
use tripline_core::settings::SearchSettings;
use tripline_core::state::StateKind;
use tripline_core::step::{ScanUnit, StepCursor};

use super::{plan, whitelist};

pub const NAME: &str = "search_hidden_exe";

const ELF_MAGIC: &[u8; 4] = b"\x7fELF";

pub struct HiddenExeProbe {
    settings: SearchSettings,
}

impl HiddenExeProbe {
    pub fn new(settings: SearchSettings) -> Self {
        Self { settings }
    }
}

fn is_elf(path: &Path) -> bool {
    let mut magic = [0u8; 4];
    match File::open(path).and_then(|mut f| f.read_exact(&mut magic)) {
        Ok(()) => &magic == ELF_MAGIC,
        Err(_) => false,
    }
}

/// Regular dot-files under `unit` (direct children only unless recursive)
/// that start with the ELF magic. Unreadable entries are skipped.
pub fn hidden_elf_files(unit: &ScanUnit) -> Vec<PathBuf> {
    WalkDir::new(&unit.location)
        .min_depth(1)
        .max_depth(unit.max_depth())
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("skipping during hidden exe search: {e}");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with('.'))
        .map(|entry| entry.into_path())
        .filter(|path| is_elf(path))
        .collect()
}

impl Probe for HiddenExeProbe {
    type State = StepCursor;

    fn name(&self) -> &'static str {
        NAME
    }

    fn activated(&self) -> bool {
        self.settings.activated
    }

    fn state_kind(&self) -> StateKind {
        StateKind::Step
    }

    fn inspect(&self, prior: &StepCursor, findings: &mut Findings) -> Result<StepCursor> {
        let (units, mode) = plan(NAME, &self.settings)?;
        let whitelist = whitelist(&self.settings, findings);

        prior.advance(&units, mode, |unit| {
            let hidden = whitelist.filter(hidden_elf_files(unit));
            if !hidden.is_empty() {
                let files: Vec<String> = hidden
                    .iter()
                    .map(|p| format!("File: {}", p.display()))
                    .collect();
                findings.push(format!("Hidden ELF file(s) found:\n\n{}", files.join("\n")));
            }
            Ok(())
        })
    }
}
