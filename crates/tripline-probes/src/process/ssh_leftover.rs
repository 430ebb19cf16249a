//! Processes started from an SSH session that has since disconnected.
//!
//! Such a process still carries `SSH_CONNECTION`/`SSH_CLIENT` in its
//! environment but has been re-parented to init.

use tracing::debug;

use tripline_core::engine::{Findings, Probe};
use tripline_core::error::{EngineError, Result};
use tripline_core::settings::ProcessSettings;
use tripline_core::step::Empty;

use super::ProcFs;

pub const NAME: &str = "search_ssh_leftover_processes";

const SSH_VARIABLES: [&str; 2] = ["SSH_CONNECTION=", "SSH_CLIENT="];

#[derive(Debug, PartialEq, Eq)]
pub struct ProcessStatus {
    pub name: String,
    pub ppid: u32,
}

/// Pull `Name:` and `PPid:` out of a `status` file.
pub fn parse_status(status: &str) -> std::result::Result<ProcessStatus, String> {
    let mut name = None;
    let mut ppid = None;
    for line in status.lines() {
        if let Some(value) = line.strip_prefix("Name:") {
            name = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("PPid:") {
            ppid = Some(
                value
                    .trim()
                    .parse::<u32>()
                    .map_err(|e| format!("PPid not parsable: {e}"))?,
            );
        }
    }
    match (name, ppid) {
        (Some(name), Some(ppid)) => Ok(ProcessStatus { name, ppid }),
        _ => Err("Name or PPid missing".into()),
    }
}

pub struct SshLeftoverProbe {
    settings: ProcessSettings,
}

impl SshLeftoverProbe {
    pub fn new(settings: ProcessSettings) -> Self {
        Self { settings }
    }
}

impl Probe for SshLeftoverProbe {
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
        let proc = ProcFs::new(&self.settings.proc_dir);
        let pids = proc.pids().map_err(|e| EngineError::collection(NAME, e))?;

        for pid in pids {
            let from_ssh = match proc.environ(pid) {
                Ok(vars) => vars
                    .iter()
                    .any(|v| SSH_VARIABLES.iter().any(|prefix| v.starts_with(prefix))),
                Err(e) => {
                    debug!("pid {pid}: cannot read environ: {e}");
                    false
                }
            };
            if !from_ssh {
                continue;
            }

            // Terminated while searching.
            let Ok(raw) = proc.status(pid) else { continue };
            let status = match parse_status(&raw) {
                Ok(status) => status,
                Err(e) => {
                    findings.error(format!("Status of pid {pid} not usable: {e}\n\n{raw}"));
                    continue;
                }
            };
            if status.ppid != 1 {
                continue;
            }

            let exe = proc.exe(pid).unwrap_or_else(|e| format!("unknown ({e})"));
            findings.push(format!(
                "Leftover process of SSH session found.\n\nName: {}\nExe: {exe}\nPid: {pid}",
                status.name
            ));
        }
        Ok(Empty {})
    }
}
