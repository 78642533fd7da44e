//! Invocation of the external delta-patch tool (hpatchz and compatibles).
//!
//! The tool's exit status is recorded but does not decide success; the
//! caller hashes the output instead.

use crate::error::PatchError;
use std::ffi::OsString;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// What the patch tool reported when it exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchOutcome {
    /// `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
    pub stderr_lines: usize,
}

impl PatchOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Applies a diff to a base file, producing `output`.
pub trait PatchEngine: Send + Sync {
    fn apply(&self, base: &Path, diff: &Path, output: &Path) -> Result<PatchOutcome, PatchError>;
}

pub const DEFAULT_PATCHER: &str = if cfg!(windows) { "hpatchz.exe" } else { "hpatchz" };
pub const DEFAULT_FORCE_FLAG: &str = "-f";

/// Runs `<program> [leading args..] <base> <diff> <output> <force flag>`.
#[derive(Debug, Clone)]
pub struct ExternalPatcher {
    program: PathBuf,
    leading_args: Vec<OsString>,
    force_flag: OsString,
    timeout: Option<Duration>,
    poll: Duration,
}

impl ExternalPatcher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            force_flag: DEFAULT_FORCE_FLAG.into(),
            timeout: None,
            poll: Duration::from_millis(20),
        }
    }

    /// Arguments placed before the four positional ones, e.g. a wrapper's own flags.
    pub fn leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn force_flag(mut self, flag: impl Into<OsString>) -> Self {
        self.force_flag = flag.into();
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Default for ExternalPatcher {
    fn default() -> Self {
        Self::new(DEFAULT_PATCHER)
    }
}

impl PatchEngine for ExternalPatcher {
    fn apply(&self, base: &Path, diff: &Path, output: &Path) -> Result<PatchOutcome, PatchError> {
        let mut child = Command::new(&self.program)
            .args(&self.leading_args)
            .arg(base)
            .arg(diff)
            .arg(output)
            .arg(&self.force_flag)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| PatchError::Spawn { program: self.program.clone(), source })?;

        let label = output.display().to_string();
        let stderr = child.stderr.take();
        let reader = thread::spawn(move || {
            let mut lines = 0usize;
            if let Some(err) = stderr {
                for line in BufReader::new(err).lines().map_while(Result::ok) {
                    log::warn!("[{}] patcher: {}", label, line);
                    lines += 1;
                }
            }
            lines
        });

        let status = match self.timeout {
            None => child.wait().map_err(PatchError::Wait)?,
            Some(limit) => {
                let started = Instant::now();
                loop {
                    if let Some(st) = child.try_wait().map_err(PatchError::Wait)? {
                        break st;
                    }
                    if started.elapsed() >= limit {
                        let _ = child.kill();
                        let _ = child.wait();
                        // The reader thread is left to finish on its own; a
                        // grandchild may still hold the pipe open.
                        return Err(PatchError::Timeout { secs: limit.as_secs_f64() });
                    }
                    thread::sleep(self.poll);
                }
            }
        };

        let stderr_lines = reader.join().unwrap_or(0);
        let outcome = PatchOutcome { exit_code: status.code(), stderr_lines };
        match outcome.exit_code {
            Some(0) => log::debug!("patcher exited 0 for {}", output.display()),
            Some(code) => log::warn!("patcher exited {} for {}", code, output.display()),
            None => log::warn!("patcher terminated by signal for {}", output.display()),
        }
        Ok(outcome)
    }
}
