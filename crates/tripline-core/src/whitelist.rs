//! Exemptions for filesystem findings.
//!
//! Directory entries match by path-component prefix of the observation's
//! containing directory, so `/usr/local` exempts `/usr/local/bin/x` but not
//! `/usr/localX/x`, and `/` exempts everything. File entries match by
//! filesystem identity (device + inode), so a hardlink or symlink to an
//! exempt file is exempt too.

use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::warn;

use crate::error::EngineError;

/// Anything that points at a location on disk.
pub trait Located {
    fn location(&self) -> &Path;
}

impl Located for PathBuf {
    fn location(&self) -> &Path {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    fn of(path: &Path) -> std::io::Result<Self> {
        use std::os::unix::fs::MetadataExt;
        let meta = fs::metadata(path)?;
        Ok(Self {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }

    #[cfg(not(unix))]
    fn of(path: &Path) -> std::io::Result<Self> {
        // No inode numbers; fall back to the canonical path hash.
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let canonical = fs::canonicalize(path)?;
        let mut hasher = DefaultHasher::new();
        canonical.hash(&mut hasher);
        Ok(Self {
            dev: 0,
            ino: hasher.finish(),
        })
    }
}

/// Lexically normalize `path` into its normal components. `.` is dropped and
/// `..` removes the previous component; the root contributes nothing.
pub fn path_components(path: &Path) -> Vec<String> {
    let mut components: Vec<String> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => components.push(part.to_string_lossy().into_owned()),
            Component::ParentDir => {
                components.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    components
}

#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    directories: Vec<Vec<String>>,
    files: Vec<FileIdentity>,
}

impl Whitelist {
    /// Build a whitelist from configured entries. File entries that do not
    /// resolve are skipped and returned alongside so the caller can report them.
    pub fn resolve(directories: &[PathBuf], files: &[PathBuf]) -> (Self, Vec<EngineError>) {
        let mut skipped = Vec::new();
        let mut identities = Vec::with_capacity(files.len());
        for file in files {
            match FileIdentity::of(file) {
                Ok(identity) => identities.push(identity),
                Err(source) => {
                    warn!("skipping whitelist entry {}: {source}", file.display());
                    skipped.push(EngineError::WhitelistResolution {
                        path: file.clone(),
                        source,
                    });
                }
            }
        }

        let whitelist = Self {
            directories: directories.iter().map(|d| path_components(d)).collect(),
            files: identities,
        };
        (whitelist, skipped)
    }

    pub fn is_empty(&self) -> bool {
        self.directories.is_empty() && self.files.is_empty()
    }

    fn directory_exempt(&self, location: &Path) -> bool {
        let mut containing = path_components(location);
        containing.pop();
        self.directories
            .iter()
            .any(|prefix| containing.starts_with(prefix))
    }

    fn file_exempt(&self, location: &Path) -> bool {
        // An observation that vanished since collection cannot be matched.
        match FileIdentity::of(location) {
            Ok(identity) => self.files.contains(&identity),
            Err(_) => false,
        }
    }

    /// Drop exempt observations, directory entries first, then file entries.
    /// Order of the remaining observations is preserved.
    pub fn filter<T: Located>(&self, observations: Vec<T>) -> Vec<T> {
        let observations = if self.directories.is_empty() {
            observations
        } else {
            observations
                .into_iter()
                .filter(|o| !self.directory_exempt(o.location()))
                .collect()
        };

        if self.files.is_empty() {
            observations
        } else {
            observations
                .into_iter()
                .filter(|o| !self.file_exempt(o.location()))
                .collect()
        }
    }
}
