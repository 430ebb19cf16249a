//! Resumable partitioned scans.
//!
//! A filesystem-wide search is split into an ordered list of [`ScanUnit`]s,
//! re-derived on every invocation from the configured roots. A persisted
//! [`StepCursor`] remembers which unit comes next, so repeated short
//! invocations eventually cover the whole tree.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanUnit {
    pub location: PathBuf,
    pub recursive: bool,
}

impl ScanUnit {
    pub fn new(location: impl Into<PathBuf>, recursive: bool) -> Self {
        Self {
            location: location.into(),
            recursive,
        }
    }

    /// Depth bound for a walk over this unit: unbounded when recursive,
    /// direct children only otherwise.
    pub fn max_depth(&self) -> usize {
        if self.recursive {
            usize::MAX
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    /// One unit per invocation.
    Stepped,
    /// Every root scanned at full depth on every invocation.
    Full,
}

impl StepMode {
    pub fn from_flag(search_in_steps: bool) -> Self {
        if search_in_steps {
            StepMode::Stepped
        } else {
            StepMode::Full
        }
    }
}

/// Search roots with the default applied: no configured roots means `/`.
pub fn effective_locations(configured: &[PathBuf]) -> Vec<PathBuf> {
    if configured.is_empty() {
        vec![PathBuf::from("/")]
    } else {
        configured.to_vec()
    }
}

/// Derive the ordered unit list. In stepped mode every root contributes
/// itself (non-recursive) followed by each immediate subdirectory
/// (recursive) in name order. In full mode every root is one recursive unit.
pub fn derive_units(locations: &[PathBuf], mode: StepMode) -> Result<Vec<ScanUnit>> {
    let mut units = Vec::new();
    for location in locations {
        match mode {
            StepMode::Full => units.push(ScanUnit::new(location, true)),
            StepMode::Stepped => {
                units.push(ScanUnit::new(location, false));
                for child in sorted_subdirectories(location)? {
                    units.push(ScanUnit::new(child, true));
                }
            }
        }
    }
    Ok(units)
}

fn sorted_subdirectories(location: &Path) -> Result<Vec<PathBuf>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(location)? {
        names.push(entry?.file_name());
    }
    names.sort();
    Ok(names
        .into_iter()
        .map(|name| location.join(name))
        .filter(|path| path.is_dir())
        .collect())
}

/// Persisted position in the unit list, stored as `{"next_step": N, ...}`
/// together with whatever cache the probe keeps between steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepCursor<C = Empty> {
    pub next_step: usize,
    #[serde(flatten)]
    pub cache: C,
}

/// Cache type for probes that keep nothing besides the cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

impl<C: Clone> StepCursor<C> {
    /// Run one invocation's worth of units and return the cursor to persist.
    ///
    /// The starting index resets to 0 in full mode or when it no longer fits
    /// the unit list. Stepped mode processes exactly one unit and advances
    /// (wrapping after the last); full mode processes every unit and ends at 0.
    /// If `process` fails, the error is returned and no new cursor exists, so
    /// the failing unit is retried on the next invocation.
    pub fn advance<F>(&self, units: &[ScanUnit], mode: StepMode, mut process: F) -> Result<Self>
    where
        F: FnMut(&ScanUnit) -> Result<()>,
    {
        let mut next = if mode == StepMode::Full || self.next_step >= units.len() {
            0
        } else {
            self.next_step
        };

        if units.is_empty() {
            return Ok(Self {
                next_step: 0,
                cache: self.cache.clone(),
            });
        }

        loop {
            let unit = &units[next];
            debug!(
                "processing scan unit {}/{}: {} (recursive={})",
                next + 1,
                units.len(),
                unit.location.display(),
                unit.recursive
            );
            process(unit)?;
            next += 1;
            if mode == StepMode::Stepped || next >= units.len() {
                break;
            }
        }

        Ok(Self {
            next_step: next % units.len(),
            cache: self.cache.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use tempfile::tempdir;

    fn three_units() -> Vec<ScanUnit> {
        vec![
            ScanUnit::new("/srv", false),
            ScanUnit::new("/srv/a", true),
            ScanUnit::new("/srv/b", true),
        ]
    }

    #[test]
    fn stepped_mode_visits_one_unit_per_run_and_wraps() {
        let units = three_units();
        let mut cursor = StepCursor::<Empty>::default();
        let mut visited = Vec::new();
        for _ in 0..4 {
            let mut seen = Vec::new();
            cursor = cursor
                .advance(&units, StepMode::Stepped, |u| {
                    seen.push(u.location.clone());
                    Ok(())
                })
                .unwrap();
            assert_eq!(seen.len(), 1);
            visited.push(seen.remove(0));
        }
        assert_eq!(
            visited,
            vec![
                PathBuf::from("/srv"),
                PathBuf::from("/srv/a"),
                PathBuf::from("/srv/b"),
                PathBuf::from("/srv"),
            ]
        );
    }

    #[test]
    fn full_mode_visits_everything_and_stays_at_zero() {
        let units = three_units();
        let cursor = StepCursor::<Empty>::default();
        let mut count = 0;
        let after = cursor
            .advance(&units, StepMode::Full, |_| {
                count += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(after.next_step, 0);
    }

    #[test]
    fn out_of_range_cursor_restarts() {
        let units = three_units();
        let cursor = StepCursor {
            next_step: 5,
            cache: Empty {},
        };
        let mut first = None;
        let after = cursor
            .advance(&units, StepMode::Stepped, |u| {
                first = Some(u.location.clone());
                Ok(())
            })
            .unwrap();
        assert_eq!(first, Some(PathBuf::from("/srv")));
        assert_eq!(after.next_step, 1);
    }

    #[test]
    fn failing_unit_produces_no_cursor() {
        let units = three_units();
        let cursor = StepCursor {
            next_step: 1,
            cache: Empty {},
        };
        let result = cursor.advance(&units, StepMode::Stepped, |_| {
            Err(EngineError::Collection {
                probe: "test".into(),
                message: "boom".into(),
            })
        });
        assert!(result.is_err());
        assert_eq!(cursor.next_step, 1);
    }

    #[test]
    fn derives_sorted_subdirectory_units() {
        let dir = tempdir().unwrap();
        for name in ["zeta", "alpha", "mid"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        fs::write(dir.path().join("plain-file"), b"x").unwrap();

        let root = dir.path().to_path_buf();
        let units = derive_units(&[root.clone()], StepMode::Stepped).unwrap();
        assert_eq!(
            units,
            vec![
                ScanUnit::new(&root, false),
                ScanUnit::new(root.join("alpha"), true),
                ScanUnit::new(root.join("mid"), true),
                ScanUnit::new(root.join("zeta"), true),
            ]
        );

        let full = derive_units(&[root.clone()], StepMode::Full).unwrap();
        assert_eq!(full, vec![ScanUnit::new(&root, true)]);
    }

    #[test]
    fn cursor_state_layout_is_flat() {
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        struct Cache {
            seen: Vec<String>,
        }
        let cursor = StepCursor {
            next_step: 2,
            cache: Cache {
                seen: vec!["x".into()],
            },
        };
        let value = serde_json::to_value(&cursor).unwrap();
        assert_eq!(value, serde_json::json!({"next_step": 2, "seen": ["x"]}));

        let plain: StepCursor = serde_json::from_str(r#"{"next_step": 4}"#).unwrap();
        assert_eq!(plain.next_step, 4);
    }

    #[test]
    fn empty_configuration_defaults_to_root() {
        assert_eq!(effective_locations(&[]), vec![PathBuf::from("/")]);
        let configured = vec![PathBuf::from("/opt")];
        assert_eq!(effective_locations(&configured), configured);
    }
}
