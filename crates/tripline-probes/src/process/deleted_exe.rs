//! Running programs whose binary was deleted from disk.

use tripline_core::engine::{Findings, Probe};
use tripline_core::error::{EngineError, Result};
use tripline_core::settings::ProcessSettings;
use tripline_core::step::Empty;

use super::{exe_links, ProcFs};

pub const NAME: &str = "search_deleted_exe";

pub(crate) const DELETED_SUFFIX: &str = " (deleted)";
pub(crate) const MEMFD_PREFIX: &str = "/memfd:";

pub struct DeletedExeProbe {
    settings: ProcessSettings,
}

impl DeletedExeProbe {
    pub fn new(settings: ProcessSettings) -> Self {
        Self { settings }
    }
}

impl Probe for DeletedExeProbe {
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
        let links = exe_links(&ProcFs::new(&self.settings.proc_dir))
            .map_err(|e| EngineError::collection(NAME, e))?;

        // memfd executables are reported by their own probe.
        let lines: Vec<String> = links
            .into_iter()
            .filter(|(_, exe)| exe.ends_with(DELETED_SUFFIX) && !exe.starts_with(MEMFD_PREFIX))
            .map(|(pid, exe)| format!("Pid: {pid}; Exe: {exe}"))
            .collect();
        if !lines.is_empty() {
            findings.push(format!(
                "Deleted executable file(s) found:\n\n{}",
                lines.join("\n")
            ));
        }
        Ok(Empty {})
    }
}
