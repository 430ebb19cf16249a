//! Systemd unit files that can execute commands.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use tripline_core::diff::{diff, Change};
use tripline_core::engine::{Findings, Probe};
use tripline_core::error::{EngineError, Result};
use tripline_core::settings::SystemdUnitsSettings;
use tripline_core::snapshot::Snapshot;

pub const NAME: &str = "monitor_systemd_units";

const EXEC_KEYS: [&str; 6] = [
    "ExecStart",
    "ExecStartPre",
    "ExecStartPost",
    "ExecReload",
    "ExecStop",
    "ExecStopPost",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitsState {
    #[serde(default)]
    pub units: Snapshot<String>,
}

pub struct SystemdUnitsProbe {
    settings: SystemdUnitsSettings,
}

/// A unit is tracked when it has both sections and at least one line that,
/// after leading whitespace, starts with an `Exec*` key.
pub fn executes_commands(content: &str) -> bool {
    content.contains("[Unit]")
        && content.contains("[Service]")
        && content.lines().any(|line| {
            let line = line.trim_start();
            EXEC_KEYS.iter().any(|key| line.starts_with(key))
        })
}

/// Line-based diff in unified style (without hunk headers).
pub fn line_diff(old: &str, new: &str) -> String {
    let a: Vec<&str> = old.split('\n').collect();
    let b: Vec<&str> = new.split('\n').collect();

    // Longest common subsequence table, filled from the end.
    let mut lcs = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for i in (0..a.len()).rev() {
        for j in (0..b.len()).rev() {
            lcs[i][j] = if a[i] == b[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut out = String::from("--- Old\n+++ New\n");
    let (mut i, mut j) = (0, 0);
    while i < a.len() || j < b.len() {
        if i < a.len() && j < b.len() && a[i] == b[j] {
            out.push_str(&format!(" {}\n", a[i]));
            i += 1;
            j += 1;
        } else if i < a.len() && (j == b.len() || lcs[i + 1][j] >= lcs[i][j + 1]) {
            out.push_str(&format!("-{}\n", a[i]));
            i += 1;
        } else {
            out.push_str(&format!("+{}\n", b[j]));
            j += 1;
        }
    }
    out
}

impl SystemdUnitsProbe {
    pub fn new(settings: SystemdUnitsSettings) -> Self {
        Self { settings }
    }

    fn collect(&self) -> anyhow::Result<Snapshot<String>> {
        let mut units = Vec::new();
        for dir in &self.settings.unit_dirs {
            if !dir.is_dir() {
                continue;
            }
            for entry in WalkDir::new(dir) {
                let entry = entry.with_context(|| format!("cannot walk {}", dir.display()))?;
                if entry.file_type().is_dir() {
                    continue;
                }
                let path = entry.path();
                // Dangling symlinks are common in unit directories.
                if !path.is_file() {
                    continue;
                }
                let content = read_unit(path)?;
                if executes_commands(&content) {
                    units.push((path.display().to_string(), content));
                }
            }
        }
        Ok(units.into_iter().collect())
    }
}

fn read_unit(path: &Path) -> anyhow::Result<String> {
    let bytes = fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

impl Probe for SystemdUnitsProbe {
    type State = UnitsState;

    fn name(&self) -> &'static str {
        NAME
    }

    fn activated(&self) -> bool {
        self.settings.activated
    }

    fn inspect(&self, prior: &UnitsState, findings: &mut Findings) -> Result<UnitsState> {
        let units = self
            .collect()
            .map_err(|e| EngineError::collection(NAME, e))?;

        for change in diff(&prior.units, &units) {
            findings.push(match change {
                Change::Removed { key, .. } => format!("Systemd unit file '{key}' was deleted."),
                Change::Modified { key, old, new } => format!(
                    "Systemd unit file '{key}' was modified:\n\nDiff:\n{}\n\nNew file:\n{new}",
                    line_diff(&old, &new)
                ),
                Change::Added { key, value } => {
                    format!("Systemd unit file '{key}' was added:\n\n{value}")
                }
            });
        }
        Ok(UnitsState { units })
    }
}
