//! `run-all`: every probe in its own child process under a deadline.
//!
//! Separate processes keep one probe's crash or hang from affecting the
//! others. A child that reports its own failure exits with
//! [`REPORTED_FAILURE`]; anything else abnormal is reported here.

use anyhow::{Context, Result};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use tripline_core::alert::AlertRouter;
use tripline_core::engine::RunMode;

use crate::registry::ProbeKind;

/// Exit code of a probe process whose error was already delivered as an alert.
pub const REPORTED_FAILURE: i32 = 1;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub enum ChildResult {
    Exited { status: ExitStatus, stdout: Vec<u8> },
    TimedOut { stdout: Vec<u8> },
}

/// Run `command` with stdout captured, killing it after `timeout`.
pub fn supervise(mut command: Command, timeout: Duration) -> Result<ChildResult> {
    let mut child = command
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .context("cannot spawn probe process")?;

    // Drain stdout concurrently so a chatty child cannot block on a full pipe.
    let reader = child.stdout.take().map(|mut out| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = out.read_to_end(&mut buf);
            buf
        })
    });
    let collect = |reader: Option<thread::JoinHandle<Vec<u8>>>| {
        reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default()
    };

    match wait_until(&mut child, Instant::now() + timeout)? {
        Some(status) => Ok(ChildResult::Exited {
            status,
            stdout: collect(reader),
        }),
        None => {
            if let Err(e) = child.kill() {
                warn!("cannot kill probe process {}: {e}", child.id());
            }
            child.wait()?;
            Ok(ChildResult::TimedOut {
                stdout: collect(reader),
            })
        }
    }
}

fn wait_until(child: &mut Child, deadline: Instant) -> Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

pub struct Orchestrator {
    program: PathBuf,
    config: Option<PathBuf>,
    timeout: Duration,
    relay_stdout: bool,
}

impl Orchestrator {
    pub fn new(program: PathBuf, config: Option<PathBuf>, timeout: Duration, relay_stdout: bool) -> Self {
        Self {
            program,
            config,
            timeout,
            relay_stdout,
        }
    }

    fn command(&self, kind: ProbeKind, mode: RunMode) -> Command {
        let mut command = Command::new(&self.program);
        command.arg("probe").arg(kind.name());
        if mode == RunMode::Baseline {
            command.arg("--init");
        }
        if let Some(config) = &self.config {
            command.arg("--config").arg(config);
        }
        command
    }

    fn relay(&self, stdout: &[u8]) {
        if !self.relay_stdout || stdout.is_empty() {
            return;
        }
        let out = std::io::stdout();
        let mut out = out.lock();
        let _ = out.write_all(stdout);
        let _ = out.flush();
    }

    /// Run one probe process. Returns whether it completed cleanly.
    pub fn run_one(&self, kind: ProbeKind, mode: RunMode, router: &AlertRouter) -> bool {
        let name = kind.name();
        info!("executing {name}");
        match supervise(self.command(kind, mode), self.timeout) {
            Ok(ChildResult::Exited { status, stdout }) => {
                self.relay(&stdout);
                match status.code() {
                    Some(0) => true,
                    Some(REPORTED_FAILURE) => {
                        debug!("{name} reported its own failure");
                        false
                    }
                    _ => {
                        router.error(name, format!("Probe '{name}' exited abnormally ({status})."));
                        false
                    }
                }
            }
            Ok(ChildResult::TimedOut { stdout }) => {
                self.relay(&stdout);
                router.error(
                    name,
                    format!(
                        "Probe '{name}' timed out after {}s and was killed.",
                        self.timeout.as_secs()
                    ),
                );
                false
            }
            Err(e) => {
                router.error(name, format!("Executing probe '{name}' raised error: {e:#}"));
                false
            }
        }
    }

    /// Run every probe in turn. Returns the number of failed probes.
    pub fn run_all(&self, mode: RunMode, router: &AlertRouter) -> usize {
        ProbeKind::ALL
            .into_iter()
            .filter(|kind| !self.run_one(*kind, mode, router))
            .count()
    }
}

/// Path of the running binary, used to re-invoke it per probe.
pub fn current_program() -> Result<PathBuf> {
    std::env::current_exe().context("cannot locate the tripline executable")
}
