//! `/etc/passwd` entries, keyed by user name.

use tripline_core::diff::{diff, Change};
use tripline_core::engine::{Findings, Probe};
use tripline_core::error::{EngineError, Result};
use tripline_core::settings::PasswdSettings;
use tripline_core::snapshot::Snapshot;

use crate::users::passwd_lines;

pub const NAME: &str = "monitor_passwd";

pub struct PasswdProbe {
    settings: PasswdSettings,
}

impl PasswdProbe {
    pub fn new(settings: PasswdSettings) -> Self {
        Self { settings }
    }

    fn collect(&self) -> anyhow::Result<Snapshot<String>> {
        let lines = passwd_lines(&self.settings.passwd_file)?;
        Ok(lines
            .into_iter()
            .map(|line| {
                let user = line.split(':').next().unwrap_or_default().to_string();
                (user, line)
            })
            .collect())
    }
}

impl Probe for PasswdProbe {
    type State = Snapshot<String>;

    fn name(&self) -> &'static str {
        NAME
    }

    fn activated(&self) -> bool {
        self.settings.activated
    }

    fn inspect(&self, prior: &Self::State, findings: &mut Findings) -> Result<Self::State> {
        let current = self
            .collect()
            .map_err(|e| EngineError::collection(NAME, e))?;

        for change in diff(prior, &current) {
            findings.push(match change {
                Change::Removed { key, .. } => format!("User '{key}' was deleted."),
                Change::Modified { key, old, new } => format!(
                    "Passwd entry for user '{key}' was modified.\n\nOld entry: {old}\nNew entry: {new}"
                ),
                Change::Added { key, value } => {
                    format!("User '{key}' was added.\n\nEntry: {value}")
                }
            });
        }
        Ok(current)
    }
}
