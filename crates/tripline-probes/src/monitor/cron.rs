//! Crontab entries and cron script contents.
//!
//! Two snapshots are kept side by side: the entries of every crontab file
//! (system crontab, `cron.d` drop-ins, per-user crontabs) and a SHA-256 of
//! every script in the periodic `cron.*` directories. Crontab entries that
//! run as a user missing from passwd are reported on every run.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

use tripline_core::diff::{diff, diff_nested, Change};
use tripline_core::engine::{Findings, Probe};
use tripline_core::error::{EngineError, Result};
use tripline_core::settings::CronSettings;
use tripline_core::snapshot::{KeySet, Snapshot};

use crate::users::system_users;

pub const NAME: &str = "monitor_cron";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CronState {
    #[serde(default)]
    pub crontab: Snapshot<KeySet>,
    #[serde(default)]
    pub cronscripts: Snapshot<String>,
}

pub struct CronProbe {
    settings: CronSettings,
}

/// Regular files directly inside `dir`, sorted. A missing directory has none.
fn files_in(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e).with_context(|| format!("cannot list {}", dir.display())),
    };
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn parse_crontab(path: &Path) -> anyhow::Result<KeySet> {
    let text =
        fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect())
}

fn sha256_file(path: &Path) -> anyhow::Result<String> {
    let mut file =
        fs::File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn schedule_field(field: &str, extra: &[char]) -> bool {
    !field.is_empty()
        && field
            .chars()
            .all(|c| c.is_ascii_digit() || "*?-,/".contains(c) || extra.contains(&c))
}

/// The user column of a system-crontab entry
/// (`min hour dom month dow user command`), if the entry has one.
pub fn crontab_user(entry: &str) -> Option<&str> {
    let fields: Vec<&str> = entry.split_whitespace().collect();
    if fields.len() < 7 {
        return None;
    }
    let schedule_ok = schedule_field(fields[0], &[])
        && schedule_field(fields[1], &[])
        && schedule_field(fields[2], &['L', 'W'])
        && schedule_field(fields[3], &[])
        && schedule_field(fields[4], &['L', '#']);
    let user = fields[5];
    let user_ok = user
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-');
    (schedule_ok && user_ok).then_some(user)
}

impl CronProbe {
    pub fn new(settings: CronSettings) -> Self {
        Self { settings }
    }

    fn collect_crontabs(&self) -> anyhow::Result<Snapshot<KeySet>> {
        let mut files = Vec::new();
        if self.settings.crontab_file.is_file() {
            files.push(self.settings.crontab_file.clone());
        }
        files.extend(files_in(&self.settings.cron_d_dir)?);
        files.extend(files_in(&self.settings.user_crontab_dir)?);

        files
            .into_iter()
            .map(|path| {
                let entries = parse_crontab(&path)?;
                Ok::<_, anyhow::Error>((path.display().to_string(), entries))
            })
            .collect()
    }

    fn collect_scripts(&self) -> anyhow::Result<Snapshot<String>> {
        let mut scripts = Vec::new();
        for dir in &self.settings.cron_script_dirs {
            for path in files_in(dir)? {
                let hash = sha256_file(&path)?;
                scripts.push((path.display().to_string(), hash));
            }
        }
        Ok(scripts.into_iter().collect())
    }

    /// Users that crontabs run commands as: per-user crontab names plus the
    /// user column of the system crontab and `cron.d` entries.
    fn crontab_users(&self, crontabs: &Snapshot<KeySet>) -> anyhow::Result<BTreeSet<String>> {
        let mut users: BTreeSet<String> = files_in(&self.settings.user_crontab_dir)?
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect();

        for (file, entries) in crontabs.iter() {
            let path = Path::new(file);
            let has_user_column =
                path == self.settings.crontab_file || path.starts_with(&self.settings.cron_d_dir);
            if !has_user_column {
                continue;
            }
            users.extend(entries.iter().filter_map(crontab_user).map(str::to_string));
        }
        Ok(users)
    }

    fn missing_users(&self, crontabs: &Snapshot<KeySet>) -> anyhow::Result<Vec<String>> {
        let known: BTreeSet<String> = system_users(&self.settings.passwd_file)?
            .into_iter()
            .map(|u| u.name)
            .collect();
        Ok(self
            .crontab_users(crontabs)?
            .into_iter()
            .filter(|u| !known.contains(u))
            .collect())
    }
}

impl Probe for CronProbe {
    type State = CronState;

    fn name(&self) -> &'static str {
        NAME
    }

    fn activated(&self) -> bool {
        self.settings.activated
    }

    fn inspect(&self, prior: &CronState, findings: &mut Findings) -> Result<CronState> {
        let crontab = self
            .collect_crontabs()
            .map_err(|e| EngineError::collection(NAME, e))?;

        let changes = diff_nested(&prior.crontab, &crontab, |entries| entries);
        for (file, _) in changes.collections.removed() {
            findings.push(format!("Crontab file '{file}' was deleted."));
        }
        for (file, entries) in &changes.members {
            for change in entries.iter() {
                match change {
                    Change::Removed { key, .. } => findings.push(format!(
                        "Entry in crontab file '{file}' was deleted.\n\nDeleted entry: {key}"
                    )),
                    Change::Added { key, .. } => findings.push(format!(
                        "Entry in crontab file '{file}' was added.\n\nAdded entry: {key}"
                    )),
                    Change::Modified { .. } => {}
                }
            }
        }
        for (file, entries) in changes.collections.added() {
            let mut message = format!("Crontab file '{file}' was added.\n\n");
            for entry in entries.iter() {
                message.push_str(&format!("Entry: {entry}\n"));
            }
            findings.push(message);
        }

        let missing = self
            .missing_users(&crontab)
            .map_err(|e| EngineError::collection(NAME, e))?;
        for user in missing {
            findings.push(format!(
                "Crontab entry or entries are run as user '{user}' but no such system user exists."
            ));
        }

        let cronscripts = self
            .collect_scripts()
            .map_err(|e| EngineError::collection(NAME, e))?;
        for change in diff(&prior.cronscripts, &cronscripts) {
            findings.push(match change {
                Change::Removed { key, .. } => format!("Cron script file '{key}' was deleted."),
                Change::Modified { key, .. } => format!("Cron script file '{key}' was modified."),
                Change::Added { key, .. } => format!("Cron script file '{key}' was added."),
            });
        }

        Ok(CronState {
            crontab,
            cronscripts,
        })
    }
}
