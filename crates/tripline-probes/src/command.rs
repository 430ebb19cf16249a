//! External tool invocation.
//!
//! Collectors that shell out (`lsattr`, `debsums`) go through
//! [`CommandRunner`] so tests can substitute canned output.

use anyhow::{Context, Result};
use std::ffi::OsString;
use std::path::Path;
use std::process::Command;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

pub trait CommandRunner {
    /// Run `program` to completion. A non-zero exit is not an error here:
    /// several tools report their findings through the exit status.
    fn run(&self, program: &Path, args: &[OsString]) -> Result<CommandOutput>;
}

pub struct SystemCommand;

impl CommandRunner for SystemCommand {
    fn run(&self, program: &Path, args: &[OsString]) -> Result<CommandOutput> {
        debug!("exec {} {:?}", program.display(), args);
        let output = Command::new(program)
            .args(args)
            .output()
            .with_context(|| format!("cannot execute {}", program.display()))?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::cell::RefCell;

    /// Replays canned output and records every invocation.
    #[derive(Default)]
    pub struct Scripted {
        pub replies: RefCell<Vec<CommandOutput>>,
        pub calls: RefCell<Vec<Vec<String>>>,
    }

    impl Scripted {
        pub fn replying(stdouts: &[&str]) -> Self {
            let replies = stdouts
                .iter()
                .map(|s| CommandOutput {
                    code: Some(0),
                    stdout: s.to_string(),
                    stderr: String::new(),
                })
                .collect();
            Self {
                replies: RefCell::new(replies),
                calls: RefCell::default(),
            }
        }
    }

    impl CommandRunner for Scripted {
        fn run(&self, program: &Path, args: &[OsString]) -> Result<CommandOutput> {
            let mut call = vec![program.display().to_string()];
            call.extend(args.iter().map(|a| a.to_string_lossy().into_owned()));
            self.calls.borrow_mut().push(call);
            let mut replies = self.replies.borrow_mut();
            if replies.is_empty() {
                anyhow::bail!("no scripted reply left");
            }
            Ok(replies.remove(0))
        }
    }
}
