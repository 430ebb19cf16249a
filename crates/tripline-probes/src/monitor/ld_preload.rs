//! `/etc/ld.so.preload` entries.

use anyhow::Context;
use std::fs;
use std::io::ErrorKind;

use tripline_core::diff::{diff, Change};
use tripline_core::engine::{Findings, Probe};
use tripline_core::error::{EngineError, Result};
use tripline_core::settings::LdPreloadSettings;
use tripline_core::snapshot::KeySet;

pub const NAME: &str = "monitor_ld_preload";

pub struct LdPreloadProbe {
    settings: LdPreloadSettings,
}

impl LdPreloadProbe {
    pub fn new(settings: LdPreloadSettings) -> Self {
        Self { settings }
    }

    fn collect(&self) -> anyhow::Result<KeySet> {
        let path = &self.settings.preload_file;
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            // Most systems have no preload file at all.
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(KeySet::default()),
            Err(e) => return Err(e).with_context(|| format!("cannot read {}", path.display())),
        };
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect())
    }
}

impl Probe for LdPreloadProbe {
    type State = KeySet;

    fn name(&self) -> &'static str {
        NAME
    }

    fn activated(&self) -> bool {
        self.settings.activated
    }

    fn inspect(&self, prior: &KeySet, findings: &mut Findings) -> Result<KeySet> {
        let current = self
            .collect()
            .map_err(|e| EngineError::collection(NAME, e))?;
        for change in diff(prior, &current) {
            match change {
                Change::Removed { key, .. } => {
                    findings.push(format!("LD_PRELOAD entry '{key}' was deleted."))
                }
                Change::Added { key, .. } => {
                    findings.push(format!("LD_PRELOAD entry '{key}' was added."))
                }
                Change::Modified { .. } => {}
            }
        }
        Ok(current)
    }
}
