//! Probes over the live process table.
//!
//! These report what is running right now and keep no state between runs.
//! A process may exit or deny access while it is being read; such a
//! process is skipped rather than failing the whole run.

pub mod deleted_exe;
pub mod memfd_create;
pub mod non_kthreads;
pub mod ssh_leftover;

use anyhow::Context;
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::debug;

/// A `/proc`-style directory. Rooted anywhere so tests can lay out fixtures.
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl ProcFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn entry(&self, pid: u32, file: &str) -> PathBuf {
        self.root.join(pid.to_string()).join(file)
    }

    /// Numeric entries in ascending order.
    pub fn pids(&self) -> anyhow::Result<Vec<u32>> {
        let mut pids = Vec::new();
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("cannot list {}", self.root.display()))?;
        for entry in entries {
            let entry = entry?;
            if let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse().ok()) {
                pids.push(pid);
            }
        }
        pids.sort_unstable();
        Ok(pids)
    }

    /// Target of the `exe` link, e.g. `/usr/bin/sshd` or `/tmp/x (deleted)`.
    pub fn exe(&self, pid: u32) -> io::Result<String> {
        let target = fs::read_link(self.entry(pid, "exe"))?;
        Ok(target.to_string_lossy().into_owned())
    }

    /// Command line with NUL separators replaced by spaces.
    pub fn cmdline(&self, pid: u32) -> io::Result<String> {
        Ok(nul_separated(&fs::read(self.entry(pid, "cmdline"))?).join(" "))
    }

    pub fn comm(&self, pid: u32) -> io::Result<String> {
        Ok(fs::read_to_string(self.entry(pid, "comm"))?.trim_end().to_string())
    }

    pub fn environ(&self, pid: u32) -> io::Result<Vec<String>> {
        Ok(nul_separated(&fs::read(self.entry(pid, "environ"))?))
    }

    pub fn status(&self, pid: u32) -> io::Result<String> {
        fs::read_to_string(self.entry(pid, "status"))
    }

    pub fn maps(&self, pid: u32) -> io::Result<Vec<u8>> {
        fs::read(self.entry(pid, "maps"))
    }
}

fn nul_separated(raw: &[u8]) -> Vec<String> {
    raw.split(|b| *b == 0)
        .filter(|part| !part.is_empty())
        .map(|part| String::from_utf8_lossy(part).into_owned())
        .collect()
}

/// `(pid, exe target)` of every process that has an executable link.
/// Kernel threads have none and are left out.
pub(crate) fn exe_links(proc: &ProcFs) -> anyhow::Result<Vec<(u32, String)>> {
    let mut links = Vec::new();
    for pid in proc.pids()? {
        match proc.exe(pid) {
            Ok(target) => links.push((pid, target)),
            Err(e) => debug!("pid {pid}: no exe link: {e}"),
        }
    }
    Ok(links)
}

#[cfg(all(test, unix))]
pub(crate) mod fixture {
    use std::fs;
    use std::os::unix::fs::symlink;
    use std::path::{Path, PathBuf};

    /// One fake process directory under `root`.
    pub struct FakeProcess {
        dir: PathBuf,
    }

    impl FakeProcess {
        pub fn new(root: &Path, pid: u32) -> Self {
            let dir = root.join(pid.to_string());
            fs::create_dir_all(&dir).unwrap();
            Self { dir }
        }

        pub fn exe(self, target: &str) -> Self {
            symlink(target, self.dir.join("exe")).unwrap();
            self
        }

        pub fn file(self, name: &str, content: &[u8]) -> Self {
            fs::write(self.dir.join(name), content).unwrap();
            self
        }
    }
}
