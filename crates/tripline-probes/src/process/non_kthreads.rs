//! User processes posing as kernel threads.
//!
//! `ps` shows a process without a command line as `[comm]`, which is how
//! kernel threads look. Malware imitates this by naming itself with
//! brackets. A real kernel thread has no memory mappings, so a bracketed
//! process with a non-empty `maps` file is suspicious.

use tracing::debug;

use tripline_core::engine::{Findings, Probe};
use tripline_core::error::{EngineError, Result};
use tripline_core::settings::NonKthreadsSettings;
use tripline_core::step::Empty;

use super::ProcFs;

pub const NAME: &str = "search_non_kthreads";

pub struct NonKthreadsProbe {
    settings: NonKthreadsSettings,
}

impl NonKthreadsProbe {
    pub fn new(settings: NonKthreadsSettings) -> Self {
        Self { settings }
    }
}

/// The name `ps` would display for `pid`.
fn display_name(proc: &ProcFs, pid: u32) -> std::io::Result<String> {
    let cmdline = proc.cmdline(pid)?;
    if cmdline.is_empty() {
        Ok(format!("[{}]", proc.comm(pid)?))
    } else {
        Ok(cmdline)
    }
}

impl Probe for NonKthreadsProbe {
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
            let name = match display_name(&proc, pid) {
                Ok(name) => name,
                Err(e) => {
                    debug!("pid {pid}: {e}");
                    continue;
                }
            };
            if !name.starts_with('[') || self.settings.whitelist.contains(&name) {
                continue;
            }
            match proc.maps(pid) {
                Ok(maps) if maps.is_empty() => {}
                Ok(_) => findings.push(format!(
                    "Process with pid '{pid}' suspicious.\n\nCommand: {name}"
                )),
                Err(e) => debug!("pid {pid}: cannot read maps: {e}"),
            }
        }
        Ok(Empty {})
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::fixture::FakeProcess;
    use std::path::Path;
    use tempfile::tempdir;

    const MAPPED: &[u8] = b"55d0c0a00000-55d0c0a02000 r--p 00000000 08:01 131 /tmp/x\n";

    fn probe(root: &Path, whitelist: &[&str]) -> NonKthreadsProbe {
        NonKthreadsProbe::new(NonKthreadsSettings {
            activated: true,
            proc_dir: root.to_path_buf(),
            whitelist: whitelist.iter().map(|s| s.to_string()).collect(),
        })
    }

    fn fixture(root: &Path) {
        // Genuine kernel thread.
        FakeProcess::new(root, 2)
            .file("cmdline", b"")
            .file("comm", b"kthreadd\n")
            .file("maps", b"");
        // Ordinary daemon, brackets only inside its name.
        FakeProcess::new(root, 500)
            .file("cmdline", b"avahi-daemon: running [web01.local]\0")
            .file("maps", MAPPED);
        // Impostor.
        FakeProcess::new(root, 6666)
            .file("cmdline", b"[kworker/0:2]\0")
            .file("maps", MAPPED);
        // Container monitor, whitelisted below.
        FakeProcess::new(root, 7000)
            .file("cmdline", b"[lxc monitor]\0/var/lib/lxc\0web01\0")
            .file("maps", MAPPED);
    }

    #[test]
    fn bracketed_process_with_mappings_is_reported() {
        let dir = tempdir().unwrap();
        fixture(dir.path());

        let mut findings = Findings::new();
        probe(dir.path(), &["[lxc monitor] /var/lib/lxc web01"])
            .inspect(&Empty {}, &mut findings)
            .unwrap();
        assert_eq!(
            findings.messages(),
            &["Process with pid '6666' suspicious.\n\nCommand: [kworker/0:2]".to_string()]
        );
    }

    #[test]
    fn whitelist_must_match_the_whole_command() {
        let dir = tempdir().unwrap();
        fixture(dir.path());

        let mut findings = Findings::new();
        probe(dir.path(), &["[lxc monitor]"])
            .inspect(&Empty {}, &mut findings)
            .unwrap();
        assert_eq!(findings.len(), 2);
        assert!(findings.messages()[1].contains("pid '7000'"));
    }

    #[test]
    fn vanished_process_is_skipped() {
        let dir = tempdir().unwrap();
        FakeProcess::new(dir.path(), 31).file("cmdline", b"[fake]\0");
        let mut findings = Findings::new();
        probe(dir.path(), &[]).inspect(&Empty {}, &mut findings).unwrap();
        assert!(findings.is_empty());
    }
}
