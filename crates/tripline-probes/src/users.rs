//! System accounts from a passwd-format file.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemUser {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
    pub shell: String,
}

impl SystemUser {
    pub fn from_passwd_line(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() < 7 {
            bail!("malformed passwd line: {line}");
        }
        Ok(Self {
            name: fields[0].to_string(),
            uid: fields[2]
                .parse()
                .with_context(|| format!("bad uid in passwd line: {line}"))?,
            gid: fields[3]
                .parse()
                .with_context(|| format!("bad gid in passwd line: {line}"))?,
            home: PathBuf::from(fields[5]),
            shell: fields[6].to_string(),
        })
    }
}

/// Non-empty, trimmed lines of a passwd file.
pub fn passwd_lines(path: &Path) -> Result<Vec<String>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

pub fn system_users(path: &Path) -> Result<Vec<SystemUser>> {
    passwd_lines(path)?
        .iter()
        .map(|line| SystemUser::from_passwd_line(line))
        .collect()
}
