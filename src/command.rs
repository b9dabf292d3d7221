//! Execution of external tool invocations.
//!
//! Every OS-level change goes through a [`CommandRunner`]. The system
//! runner executes `ip`/`iptables`/`tc` directly or through `sudo`.

use std::fmt;
use std::io;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Output, Stdio};

use tracing::debug;

use crate::error::{SandboxError, SandboxResult};

/// A program and its argument vector. Never passed through a shell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Wrap this invocation to run inside network namespace `ns`.
    pub fn within(self, ns: &str) -> Self {
        let mut args = vec!["netns".to_string(), "exec".to_string(), ns.to_string()];
        args.push(self.program);
        args.extend(self.args);
        Self {
            program: "ip".to_string(),
            args,
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// How privileged tools are reached.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Privilege {
    /// Already root: run tools directly.
    Direct,
    /// Prefix every invocation with `sudo`.
    #[default]
    Sudo,
}

impl Privilege {
    /// `Direct` for an effective UID of 0, `Sudo` otherwise.
    pub fn detect() -> Self {
        if nix::unistd::geteuid().is_root() {
            Privilege::Direct
        } else {
            Privilege::Sudo
        }
    }
}

/// Executor for external tool invocations.
pub trait CommandRunner {
    /// Run to completion, capturing output.
    fn run(&self, invocation: &Invocation) -> io::Result<Output>;

    /// Launch without waiting. The child leads its own process group.
    fn spawn(&self, invocation: &Invocation, capture_output: bool) -> io::Result<Child>;

    /// Privilege used to signal spawned processes.
    fn privilege(&self) -> Privilege;
}

/// Runs invocations on the host via `std::process::Command`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemRunner {
    privilege: Privilege,
}

impl SystemRunner {
    pub fn new(privilege: Privilege) -> Self {
        Self { privilege }
    }

    fn command(&self, invocation: &Invocation) -> Command {
        let mut cmd = match self.privilege {
            Privilege::Direct => Command::new(&invocation.program),
            Privilege::Sudo => {
                let mut cmd = Command::new("sudo");
                cmd.arg(&invocation.program);
                cmd
            }
        };
        cmd.args(&invocation.args);
        cmd
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<Output> {
        self.command(invocation).stdin(Stdio::null()).output()
    }

    fn spawn(&self, invocation: &Invocation, capture_output: bool) -> io::Result<Child> {
        let mut cmd = self.command(invocation);
        cmd.process_group(0);
        if capture_output {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        }
        cmd.spawn()
    }

    fn privilege(&self) -> Privilege {
        self.privilege
    }
}

/// Run `invocation`, failing if it cannot start or exits non-zero.
pub fn run_checked<R: CommandRunner + ?Sized>(
    runner: &R,
    invocation: &Invocation,
) -> SandboxResult<Output> {
    debug!(cmd = %invocation, "exec");

    let output = runner.run(invocation).map_err(|source| SandboxError::Io {
        command: invocation.to_string(),
        source,
    })?;

    if !output.status.success() {
        return Err(SandboxError::CommandFailed {
            command: invocation.to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}
