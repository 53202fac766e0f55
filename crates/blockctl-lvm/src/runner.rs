//! Subprocess execution through the privileged helper
//!
//! Every external tool is started as `<helper> <tool> <args...>`. The
//! [`CommandRunner`] trait is the seam tests replace with a scripted fake.

use crate::error::{BlockError, BlockResult};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::debug;

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.status, Some(0))
    }
}

/// Process execution backend
pub trait CommandRunner: Send + Sync {
    /// Run `argv` to completion and capture its output
    fn execute(&self, argv: &[String]) -> io::Result<CommandOutput>;

    /// Start a long-running daemon and return its pid without waiting
    fn spawn(&self, argv: &[String]) -> io::Result<u32>;

    /// Command line of a live process, empty when the pid is gone
    fn process_cmdline(&self, pid: u32) -> String;
}

/// Runs real processes with `std::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

fn split_argv(argv: &[String]) -> io::Result<(&String, &[String])> {
    argv.split_first()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty argv"))
}

impl CommandRunner for SystemRunner {
    fn execute(&self, argv: &[String]) -> io::Result<CommandOutput> {
        let (program, args) = split_argv(argv)?;
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn spawn(&self, argv: &[String]) -> io::Result<u32> {
        let (program, args) = split_argv(argv)?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        let pid = child.id();

        // Reap the daemon when it exits so a dead export reads as gone
        // instead of lingering as a zombie.
        std::thread::Builder::new()
            .name(format!("reap-{pid}"))
            .spawn(move || {
                let _ = child.wait();
            })?;
        Ok(pid)
    }

    fn process_cmdline(&self, pid: u32) -> String {
        std::fs::read(format!("/proc/{pid}/cmdline"))
            .map(|raw| {
                String::from_utf8_lossy(&raw)
                    .replace('\0', " ")
                    .trim()
                    .to_string()
            })
            .unwrap_or_default()
    }
}

/// Prefixes every command with the privileged helper binary.
#[derive(Clone)]
pub struct RootWrap {
    helper: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl RootWrap {
    pub fn new(helper: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            helper: helper.into(),
            runner,
        }
    }

    #[must_use]
    pub fn helper(&self) -> &Path {
        &self.helper
    }

    fn argv(&self, args: &[&str]) -> Vec<String> {
        std::iter::once(self.helper.to_string_lossy().into_owned())
            .chain(args.iter().map(|a| (*a).to_string()))
            .collect()
    }

    fn invoke(&self, args: &[&str]) -> BlockResult<(Vec<String>, CommandOutput)> {
        let argv = self.argv(args);
        debug!("Running {:?}", argv);
        let output = self.runner.execute(&argv)?;
        Ok((argv, output))
    }

    fn failure(argv: Vec<String>, output: CommandOutput) -> BlockError {
        BlockError::CommandFailure {
            argv,
            status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }

    /// Provisioning command: succeeds only with exit 0 and non-empty stdout.
    pub fn run(&self, args: &[&str]) -> BlockResult<String> {
        let (argv, output) = self.invoke(args)?;
        let trimmed = output.stdout.trim();
        if !output.success() || trimmed.is_empty() {
            return Err(Self::failure(argv, output));
        }
        Ok(trimmed.to_string())
    }

    /// Plain command: succeeds on exit 0, output is returned as-is.
    pub fn run_status(&self, args: &[&str]) -> BlockResult<String> {
        let (argv, output) = self.invoke(args)?;
        if !output.success() {
            return Err(Self::failure(argv, output));
        }
        Ok(output.stdout)
    }

    /// Probe command: raw stdout whatever the exit status.
    pub fn probe(&self, args: &[&str]) -> BlockResult<String> {
        let (_, output) = self.invoke(args)?;
        Ok(output.stdout)
    }

    /// Start a daemon through the helper and return its pid
    pub fn spawn(&self, args: &[&str]) -> BlockResult<u32> {
        let argv = self.argv(args);
        debug!("Spawning {:?}", argv);
        Ok(self.runner.spawn(&argv)?)
    }

    /// Liveness probe: non-empty while `pid` is running
    #[must_use]
    pub fn process_cmdline(&self, pid: u32) -> String {
        self.runner.process_cmdline(pid)
    }
}

impl std::fmt::Debug for RootWrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootWrap")
            .field("helper", &self.helper)
            .finish_non_exhaustive()
    }
}
