// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Error types for system-level operations
#[derive(Error, Debug)]
pub enum SysError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("{command} failed with exit code {exit_code}: {output}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        output: String,
    },

    #[error("Failed to mount {device} at {}: {source}", target.display())]
    Mount {
        device: String,
        target: PathBuf,
        source: nix::Error,
    },

    #[error("Failed to unmount {}: {source}", target.display())]
    Unmount { target: PathBuf, source: nix::Error },

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;
