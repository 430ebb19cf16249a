//! Programs executing from anonymous `memfd_create` files, a common way
//! to run a payload that never touches the disk.

use tripline_core::engine::{Findings, Probe};
use tripline_core::error::{EngineError, Result};
use tripline_core::settings::ProcessSettings;
use tripline_core::step::Empty;

use super::deleted_exe::{DELETED_SUFFIX, MEMFD_PREFIX};
use super::{exe_links, ProcFs};

pub const NAME: &str = "search_memfd_create";

pub struct MemfdCreateProbe {
    settings: ProcessSettings,
}

impl MemfdCreateProbe {
    pub fn new(settings: ProcessSettings) -> Self {
        Self { settings }
    }
}

impl Probe for MemfdCreateProbe {
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

        for (pid, exe) in links {
            if exe.starts_with(MEMFD_PREFIX) && exe.ends_with(DELETED_SUFFIX) {
                findings.push(format!("Deleted memfd file found.\n\nPid: {pid}; Exe: {exe}"));
            }
        }
        Ok(Empty {})
    }
}
