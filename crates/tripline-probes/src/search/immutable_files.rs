//! Files carrying the immutable attribute, as reported by `lsattr`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tripline_core::engine::{Findings, Probe};
use tripline_core::error::{EngineError, Result};
use tripline_core::settings::ImmutableSettings;
use tripline_core::state::StateKind;
use tripline_core::step::{ScanUnit, StepCursor};
use tripline_core::whitelist::Located;

use super::{plan, whitelist};
use crate::command::{CommandRunner, SystemCommand};

pub const NAME: &str = "search_immutable_files";

/// Attribute letters `lsattr` may print.
const ATTRIBUTE_CHARS: &str = "aAcCdDeEFhiIjmNPsStTuVxXZ-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImmutableFile {
    pub path: PathBuf,
    pub attributes: String,
}

impl Located for ImmutableFile {
    fn location(&self) -> &Path {
        &self.path
    }
}

pub enum LsattrLine {
    Immutable(ImmutableFile),
    Other,
    Unparseable(String),
}

/// Classify one output line. Only lines whose attribute column has `i` in
/// the fifth position count; directory headers and blank lines are `Other`.
pub fn parse_lsattr_line(line: &str) -> LsattrLine {
    let line = line.trim_end();
    let flagged = line.len() > 4
        && line.chars().take(4).all(|c| ATTRIBUTE_CHARS.contains(c))
        && line.chars().nth(4) == Some('i');
    if !flagged {
        return LsattrLine::Other;
    }
    match line.split_once(' ') {
        Some((attributes, path)) if !path.is_empty() => LsattrLine::Immutable(ImmutableFile {
            path: PathBuf::from(path),
            attributes: attributes.to_string(),
        }),
        _ => LsattrLine::Unparseable(line.to_string()),
    }
}

pub struct ImmutableFilesProbe<R = SystemCommand> {
    settings: ImmutableSettings,
    runner: R,
}

impl ImmutableFilesProbe<SystemCommand> {
    pub fn new(settings: ImmutableSettings) -> Self {
        Self::with_runner(settings, SystemCommand)
    }
}

impl<R: CommandRunner> ImmutableFilesProbe<R> {
    pub fn with_runner(settings: ImmutableSettings, runner: R) -> Self {
        Self { settings, runner }
    }

    fn list(&self, unit: &ScanUnit, findings: &mut Findings) -> anyhow::Result<Vec<ImmutableFile>> {
        let mut args: Vec<OsString> = Vec::new();
        if unit.recursive {
            args.push("-R".into());
        }
        args.push("-a".into());
        args.push(unit.location.clone().into_os_string());

        // lsattr exits non-zero on any unreadable entry; the rest of its
        // output is still valid, so only the listing is evaluated.
        let output = self.runner.run(&self.settings.lsattr, &args)?;
        let mut files = Vec::new();
        for line in output.stdout.lines() {
            match parse_lsattr_line(line) {
                LsattrLine::Immutable(file) => files.push(file),
                LsattrLine::Other => {}
                LsattrLine::Unparseable(line) => {
                    findings.error(format!("Unable to process line '{line}'"))
                }
            }
        }
        Ok(files)
    }
}

impl<R: CommandRunner> Probe for ImmutableFilesProbe<R> {
    type State = StepCursor;

    fn name(&self) -> &'static str {
        NAME
    }

    fn activated(&self) -> bool {
        self.settings.search.activated
    }

    fn state_kind(&self) -> StateKind {
        StateKind::Step
    }

    fn inspect(&self, prior: &StepCursor, findings: &mut Findings) -> Result<StepCursor> {
        let (units, mode) = plan(NAME, &self.settings.search)?;
        let whitelist = whitelist(&self.settings.search, findings);

        prior.advance(&units, mode, |unit| {
            let files = self
                .list(unit, findings)
                .map_err(|e| EngineError::collection(NAME, e))?;
            let files = whitelist.filter(files);
            if !files.is_empty() {
                let lines: Vec<String> = files
                    .iter()
                    .map(|f| format!("File: {}; Attributes: {}", f.path.display(), f.attributes))
                    .collect();
                findings.push(format!("Immutable files found.\n\n{}", lines.join("\n")));
            }
            Ok(())
        })
    }
}
