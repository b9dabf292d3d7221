//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::time::Duration;

use netsandbox::{Sandbox, SandboxCommand, SessionConfig, Spawned, TopologyKind};
use sandbox_probe::{check_sandbox_deps, check_wan_deps};

/// Check the host can run sandbox sessions (plus `extra` tools). Returns
/// `true` if the test should be skipped, printing the reason to stderr.
/// Use at the top of every test.
pub fn skip_without_deps(extra: &[&str]) -> bool {
    match check_sandbox_deps(extra) {
        Ok(()) => false,
        Err(reason) => {
            eprintln!("Skipping: {reason}");
            true
        }
    }
}

/// Like `skip_without_deps` but also requires `tc` and netem.
pub fn skip_without_wan_deps(extra: &[&str]) -> bool {
    match check_wan_deps(extra) {
        Ok(()) => false,
        Err(reason) => {
            eprintln!("Skipping: {reason}");
            true
        }
    }
}

/// Open a session on `subnet`. Every test uses its own subnet so that
/// parallel sessions never install overlapping host routes.
pub fn open(subnet: &str, topology: TopologyKind) -> Sandbox {
    let config = SessionConfig::default()
        .with_subnet(subnet)
        .with_topology(topology);
    Sandbox::open(config).expect("open sandbox session")
}

/// Spawn a long sleep to keep a topology alive while probing it.
pub fn spawn_idle(sandbox: &mut Sandbox) -> Spawned {
    sandbox
        .spawn(&SandboxCommand::new("sleep").arg("30"), None)
        .expect("spawn idle command")
}

/// Stop a spawned process and make sure it does not outlive the test.
pub fn stop(spawned: &mut Spawned) {
    let _ = spawned.process.terminate(Duration::from_secs(2));
}
