//! Error types for sandbox orchestration.
//!
//! Setup failures propagate as [`SandboxError`]. Teardown never propagates:
//! failures are collected into a [`TeardownReport`] and logged.

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Result alias for orchestration operations.
pub type SandboxResult<T> = Result<T, SandboxError>;

/// Failure of a sandbox setup operation.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Rejected at session open; nothing has been created yet.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An external tool exited non-zero.
    #[error("command failed ({status}): {command}\n{stderr}")]
    CommandFailed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    /// An external tool could not be executed at all.
    #[error("failed to execute: {command}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Every host address in the session subnet has been issued.
    #[error("address pool {subnet} exhausted")]
    AddressPoolExhausted { subnet: String },

    /// `spawn` was called after the session released its bridge.
    #[error("sandbox session {token} already released")]
    Released { token: String },

    /// The caller's command could not be launched inside its namespace.
    #[error("failed to spawn {command}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Invalid session configuration or host state.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid subnet '{value}': {reason}")]
    InvalidSubnet { value: String, reason: String },

    #[error("IPv4 forwarding is disabled ({})", path.display())]
    ForwardingDisabled { path: PathBuf },

    #[error("cannot read IPv4 forwarding switch {}", path.display())]
    ForwardingUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A resource that could not be released.
#[derive(Debug)]
pub struct TeardownFailure {
    /// Human-readable resource label, e.g. `netns a1b2c3d4_router1`.
    pub resource: String,
    pub error: SandboxError,
}

impl std::fmt::Display for TeardownFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "release {}: {}", self.resource, self.error)
    }
}

/// Outcome of a best-effort release.
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    /// True if every resource was released.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub(crate) fn record(&mut self, failure: Option<TeardownFailure>) {
        if let Some(failure) = failure {
            self.failures.push(failure);
        }
    }

    pub(crate) fn extend(&mut self, other: TeardownReport) {
        self.failures.extend(other.failures);
    }
}
