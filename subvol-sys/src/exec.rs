// SPDX-License-Identifier: GPL-3.0-only

//! Execution of external tools with a bounded run time

use std::thread;
use std::time::{Duration, Instant};

use crate::{Result, SysError};

/// Upper bound for a single external tool invocation
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Capture stderr into the returned output instead of discarding it
    pub merge_stderr: bool,
    /// Overrides the runner's own timeout
    pub timeout: Option<Duration>,
}

impl RunOptions {
    pub fn merged() -> Self {
        Self {
            merge_stderr: true,
            timeout: None,
        }
    }
}

/// Exit code and trimmed output of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.output.lines().filter(|line| !line.trim().is_empty())
    }
}

/// Runs external programs; a non-zero exit code is reported, not an error
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str], options: RunOptions) -> Result<CommandOutput>;

    /// Run and turn a non-zero exit code into [`SysError::CommandFailed`]
    fn run_checked(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let output = self.run(program, args, RunOptions::merged())?;
        if !output.success() {
            return Err(SysError::CommandFailed {
                command: render(program, args),
                exit_code: output.exit_code,
                output: output.output,
            });
        }

        Ok(output)
    }
}

pub fn render(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// [`CommandRunner`] spawning real processes through duct
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl SystemRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str], options: RunOptions) -> Result<CommandOutput> {
        let rendered = render(program, args);
        tracing::debug!("Running {}", rendered);

        let mut expression = duct::cmd(program, args.iter().copied())
            .env("LC_ALL", "C")
            .stdout_capture()
            .unchecked();
        expression = if options.merge_stderr {
            expression.stderr_to_stdout()
        } else {
            expression.stderr_capture()
        };

        let handle = expression.start()?;
        let timeout = options.timeout.unwrap_or(self.timeout);
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(output) = handle.try_wait()? {
                return Ok(CommandOutput {
                    exit_code: output.status.code().unwrap_or(-1),
                    output: String::from_utf8_lossy(&output.stdout).trim().to_string(),
                });
            }

            if Instant::now() >= deadline {
                if let Err(e) = handle.kill() {
                    tracing::warn!("Failed to kill {} after timeout: {}", rendered, e);
                }
                return Err(SysError::Timeout {
                    command: rendered,
                    timeout,
                });
            }

            thread::sleep(POLL_INTERVAL);
        }
    }
}
