//! SSH `authorized_keys` files of every system user.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use tripline_core::diff::{diff_nested, Change};
use tripline_core::engine::{Findings, Probe};
use tripline_core::error::{EngineError, Result};
use tripline_core::settings::SshKeysSettings;
use tripline_core::snapshot::{KeySet, Snapshot};

use crate::users::system_users;

pub const NAME: &str = "monitor_ssh_authorized_keys";

/// sshd still honours the deprecated second file, so both are watched.
const KEY_FILES: [&str; 2] = ["authorized_keys", "authorized_keys2"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyFile {
    pub user: String,
    pub location: String,
    pub entries: KeySet,
}

pub struct SshKeysProbe {
    settings: SshKeysSettings,
}

impl SshKeysProbe {
    pub fn new(settings: SshKeysSettings) -> Self {
        Self { settings }
    }

    /// Keyed by user name; a user's deprecated `authorized_keys2` gets its
    /// own `user/authorized_keys2` key.
    fn collect(&self) -> anyhow::Result<Snapshot<KeyFile>> {
        let mut files = Vec::new();
        for user in system_users(&self.settings.passwd_file)? {
            for file_name in KEY_FILES {
                let path = user.home.join(".ssh").join(file_name);
                if !path.is_file() {
                    continue;
                }
                let key = if file_name == KEY_FILES[0] {
                    user.name.clone()
                } else {
                    format!("{}/{file_name}", user.name)
                };
                files.push((
                    key,
                    KeyFile {
                        user: user.name.clone(),
                        location: path.display().to_string(),
                        entries: parse_keys(&path)?,
                    },
                ));
            }
        }
        Ok(files.into_iter().collect())
    }
}

fn parse_keys(path: &Path) -> anyhow::Result<KeySet> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Unable to parse file '{}'", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect())
}

#[cfg(unix)]
fn world_writable(path: &Path) -> anyhow::Result<bool> {
    use std::os::unix::fs::PermissionsExt;
    let mode = fs::metadata(path)
        .with_context(|| format!("cannot stat {}", path.display()))?
        .permissions()
        .mode();
    Ok(mode & 0o002 != 0)
}

#[cfg(not(unix))]
fn world_writable(_path: &Path) -> anyhow::Result<bool> {
    Ok(false)
}

impl Probe for SshKeysProbe {
    type State = Snapshot<KeyFile>;

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

        for (_, file) in current.iter() {
            let writable = world_writable(Path::new(&file.location))
                .map_err(|e| EngineError::collection(NAME, e))?;
            if writable {
                findings.push(format!(
                    "SSH authorized_keys file '{}' for user '{}' is world writable.",
                    file.location, file.user
                ));
            }
        }

        let changes = diff_nested(prior, &current, |file| &file.entries);

        for (_, file) in changes.collections.removed() {
            findings.push(format!(
                "SSH authorized_keys file '{}' for user '{}' was deleted.",
                file.location, file.user
            ));
        }
        for (_, file) in changes.collections.added() {
            let mut message = format!(
                "New authorized_keys file '{}' was added for user '{}'.\n\nEntries:\n",
                file.location, file.user
            );
            for entry in file.entries.iter() {
                message.push_str(entry);
                message.push('\n');
            }
            findings.push(message);
        }

        // Reported on its own, whether or not the entries changed too.
        for (key, old) in prior.iter() {
            if let Some(new) = current.get(key) {
                if old.location != new.location {
                    findings.push(format!(
                        "SSH authorized_keys location for user '{}' changed from '{}' to '{}'.",
                        new.user, old.location, new.location
                    ));
                }
            }
        }

        for (_, entries) in &changes.members {
            for change in entries.iter() {
                match change {
                    Change::Removed { key, .. } => findings.push(format!(
                        "SSH authorized_keys entry was removed.\n\nEntry: {key}"
                    )),
                    Change::Added { key, .. } => findings.push(format!(
                        "SSH authorized_keys entry was added.\n\nEntry: {key}"
                    )),
                    Change::Modified { .. } => {}
                }
            }
        }

        Ok(current)
    }
}
