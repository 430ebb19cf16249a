//! Loaded kernel modules from `/proc/modules`.

use anyhow::Context;
use std::fs;

use tripline_core::diff::diff;
use tripline_core::engine::{Findings, Probe};
use tripline_core::error::{EngineError, Result};
use tripline_core::settings::ModulesSettings;
use tripline_core::snapshot::KeySet;

pub const NAME: &str = "monitor_modules";

pub struct ModulesProbe {
    settings: ModulesSettings,
}

impl ModulesProbe {
    pub fn new(settings: ModulesSettings) -> Self {
        Self { settings }
    }

    fn collect(&self) -> anyhow::Result<KeySet> {
        let path = &self.settings.modules_file;
        let text =
            fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
        Ok(text
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .filter(|name| !self.settings.whitelist.iter().any(|w| w == name))
            .collect())
    }
}

fn listing(header: &str, entries: &[&str]) -> String {
    let mut message = format!("{header}\n\nEntries:\n");
    for entry in entries {
        message.push_str(entry);
        message.push('\n');
    }
    message
}

impl Probe for ModulesProbe {
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
        let changes = diff(prior, &current);

        let loaded: Vec<&str> = changes.added().map(|(k, _)| k).collect();
        if !loaded.is_empty() {
            findings.push(listing("New modules loaded.", &loaded));
        }
        let unloaded: Vec<&str> = changes.removed().map(|(k, _)| k).collect();
        if !unloaded.is_empty() {
            findings.push(listing("Running modules unloaded.", &unloaded));
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    const PROC_MODULES: &str = "\
ext4 737280 1 - Live 0x0000000000000000
loop 32768 0 - Live 0x0000000000000000
vboxdrv 491520 0 - Live 0x0000000000000000 (OE)
";

    fn probe_for(path: PathBuf, whitelist: &[&str]) -> ModulesProbe {
        ModulesProbe::new(ModulesSettings {
            activated: true,
            modules_file: path,
            whitelist: whitelist.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[test]
    fn whitelisted_modules_are_never_tracked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("modules");
        fs::write(&path, PROC_MODULES).unwrap();
        let state = probe_for(path, &["vboxdrv"])
            .inspect(&KeySet::default(), &mut Findings::new())
            .unwrap();
        assert_eq!(state.iter().collect::<Vec<_>>(), vec!["ext4", "loop"]);
    }

    #[test]
    fn one_finding_per_direction() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("modules");
        fs::write(&path, PROC_MODULES).unwrap();
        let probe = probe_for(path.clone(), &[]);
        let baseline = probe.inspect(&KeySet::default(), &mut Findings::new()).unwrap();

        fs::write(&path, "ext4 1 1 - Live 0x0\ndiamorphine 1 0 - Live 0x0\nreptile 1 0 - Live 0x0\n")
            .unwrap();
        let mut findings = Findings::new();
        probe.inspect(&baseline, &mut findings).unwrap();

        assert_eq!(findings.len(), 2);
        assert_eq!(
            findings.messages()[0],
            "New modules loaded.\n\nEntries:\ndiamorphine\nreptile\n"
        );
        assert_eq!(
            findings.messages()[1],
            "Running modules unloaded.\n\nEntries:\nloop\nvboxdrv\n"
        );
    }
}
