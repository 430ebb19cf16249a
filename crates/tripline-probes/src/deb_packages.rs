//! Package file verification through `debsums -c`.

use anyhow::bail;
use std::ffi::OsString;
use std::path::PathBuf;

use tripline_core::engine::{Findings, Probe};
use tripline_core::error::{EngineError, Result};
use tripline_core::settings::DebPackagesSettings;
use tripline_core::step::Empty;
use tripline_core::whitelist::Whitelist;

use crate::command::{CommandRunner, SystemCommand};

pub const NAME: &str = "verify_deb_packages";

pub struct DebPackagesProbe<R = SystemCommand> {
    settings: DebPackagesSettings,
    runner: R,
}

impl DebPackagesProbe<SystemCommand> {
    pub fn new(settings: DebPackagesSettings) -> Self {
        Self::with_runner(settings, SystemCommand)
    }
}

impl<R: CommandRunner> DebPackagesProbe<R> {
    pub fn with_runner(settings: DebPackagesSettings, runner: R) -> Self {
        Self { settings, runner }
    }

    fn changed_files(&self) -> anyhow::Result<Vec<PathBuf>> {
        let output = self.runner.run(&self.settings.debsums, &[OsString::from("-c")])?;
        // 0: nothing changed, 2: changed files listed on stdout.
        match output.code {
            Some(0) | Some(2) => {}
            _ if !output.stdout.trim().is_empty() => {}
            code => bail!(
                "{} exited with {:?}: {}",
                self.settings.debsums.display(),
                code,
                output.stderr.trim()
            ),
        }
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(PathBuf::from)
            .collect())
    }
}

impl<R: CommandRunner> Probe for DebPackagesProbe<R> {
    type State = Empty;

    fn name(&self) -> &'static str {
        NAME
    }

    fn activated(&self) -> bool {
        self.settings.activated
    }

    fn stateful(&self) -> bool {
        false
    }

    fn inspect(&self, _prior: &Empty, findings: &mut Findings) -> Result<Empty> {
        let (whitelist, skipped) = Whitelist::resolve(&[], &self.settings.file_whitelist);
        for err in skipped {
            findings.error(err.to_string());
        }

        let changed = self
            .changed_files()
            .map_err(|e| EngineError::collection(NAME, e))?;
        let changed = whitelist.filter(changed);
        if !changed.is_empty() {
            let lines: Vec<String> = changed
                .iter()
                .map(|p| format!("File: {}", p.display()))
                .collect();
            findings.push(format!(
                "Changed deb package files found.\n\n{}",
                lines.join("\n")
            ));
        }
        Ok(Empty {})
    }
}
