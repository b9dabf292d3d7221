//! Named network namespaces owned by a session.

use std::fmt;

use tracing::{debug, warn};

use crate::command::{CommandRunner, Invocation, run_checked};
use crate::error::{SandboxError, SandboxResult, TeardownFailure};
use crate::process::{SandboxCommand, SandboxProcess};
use crate::step::Step;

/// Part a namespace plays in a topology.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// NAT tier between the bridge and a process namespace.
    Router,
    /// Leaf running the caller's command behind a router.
    Process,
    /// Bridge peer running the caller's command, no NAT tier.
    Local,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Router => "router",
            Role::Process => "process",
            Role::Local => "local",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic namespace name for `(token, role, counter)`.
pub fn namespace_name(token: &str, role: Role, counter: u32) -> String {
    format!("{token}_{role}{counter}")
}

/// An isolated network stack, addressed by name.
///
/// Release is explicit via [`NamespaceHandle::release`]; the owning
/// session decides ordering.
#[derive(Debug, PartialEq, Eq)]
pub struct NamespaceHandle {
    name: String,
    role: Role,
}

impl NamespaceHandle {
    /// Create the namespace. Fails if the name is taken or privileges are missing.
    pub fn create<R: CommandRunner + ?Sized>(
        runner: &R,
        name: String,
        role: Role,
    ) -> SandboxResult<Self> {
        run_checked(runner, &Step::AddNetns { name: name.clone() }.invocation())?;
        debug!(ns = %name, %role, "created network namespace");
        Ok(Self { name, role })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Run `steps` inside the namespace in order, stopping at the first failure.
    ///
    /// Steps already applied are left in place.
    pub fn execute<R: CommandRunner + ?Sized>(&self, runner: &R, steps: &[Step]) -> SandboxResult<()> {
        for step in steps {
            run_checked(runner, &step.invocation().within(&self.name))?;
        }
        Ok(())
    }

    /// Launch `command` inside the namespace without waiting for it.
    pub fn spawn<R: CommandRunner + ?Sized>(
        &self,
        runner: &R,
        command: &SandboxCommand,
    ) -> SandboxResult<SandboxProcess> {
        let invocation = command.invocation().within(&self.name);
        debug!(cmd = %invocation, "spawn");

        let child = runner
            .spawn(&invocation, command.captures_output())
            .map_err(|source| SandboxError::Spawn {
                command: invocation.to_string(),
                source,
            })?;

        let label = format!("{} in ns:{}", command.program(), self.name);
        Ok(SandboxProcess::new(child, label, runner.privilege()))
    }

    /// Delete the namespace. Failure is logged and returned, never raised.
    pub fn release<R: CommandRunner + ?Sized>(self, runner: &R) -> Option<TeardownFailure> {
        debug!(ns = %self.name, "deleting network namespace");
        let invocation: Invocation = Step::DeleteNetns {
            name: self.name.clone(),
        }
        .invocation();

        match run_checked(runner, &invocation) {
            Ok(_) => None,
            Err(error) => {
                warn!(ns = %self.name, %error, "failed to delete network namespace");
                Some(TeardownFailure {
                    resource: format!("netns {}", self.name),
                    error,
                })
            }
        }
    }
}
