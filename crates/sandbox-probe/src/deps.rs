use std::env;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::exec::{Elevation, host};

/// Returns `true` if namespace tests can run: either the process is root,
/// or `sudo` works without a password and can list namespaces.
pub fn check_privileges() -> bool {
    check_binary("ip").is_some()
        && Elevation::current()
            .command(&["ip", "netns", "list"])
            .output()
            .is_ok_and(|o| o.status.success())
}

/// First executable named `name` on `PATH`.
pub fn check_binary(name: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    find_executable(name, env::split_paths(&path))
}

/// Root-only tools live in sbin, which is often missing from a user's `PATH`.
const SBIN: [&str; 2] = ["/usr/sbin", "/sbin"];

fn find_executable(name: &str, dirs: impl IntoIterator<Item = PathBuf>) -> Option<PathBuf> {
    dirs.into_iter()
        .chain(SBIN.iter().map(PathBuf::from))
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

/// Reason why an integration test must be skipped.
#[derive(Debug)]
pub enum SkipReason {
    NotRoot,
    MissingTool(String),
    ForwardingDisabled,
    NoNetem,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NotRoot => write!(f, "requires root / passwordless sudo"),
            SkipReason::MissingTool(t) => write!(f, "system tool '{t}' not found"),
            SkipReason::ForwardingDisabled => write!(
                f,
                "IPv4 forwarding is off (try: sudo sysctl -w net.ipv4.ip_forward=1)"
            ),
            SkipReason::NoNetem => write!(
                f,
                "sch_netem kernel module not available (try: sudo modprobe sch_netem)"
            ),
        }
    }
}

/// Check everything a sandbox session needs on the host, plus `extra` tools
/// the test itself runs inside namespaces.
pub fn check_sandbox_deps(extra: &[&str]) -> Result<(), SkipReason> {
    if !check_privileges() {
        return Err(SkipReason::NotRoot);
    }

    for tool in ["ip", "iptables", "ping", "ss"].iter().chain(extra) {
        if check_binary(tool).is_none() {
            return Err(SkipReason::MissingTool(tool.to_string()));
        }
    }

    let forwarding = std::fs::read_to_string("/proc/sys/net/ipv4/ip_forward").unwrap_or_default();
    if forwarding.trim() != "1" {
        return Err(SkipReason::ForwardingDisabled);
    }

    Ok(())
}

/// [`check_sandbox_deps`] plus `tc` and a loadable netem qdisc.
pub fn check_wan_deps(extra: &[&str]) -> Result<(), SkipReason> {
    check_sandbox_deps(extra)?;

    if check_binary("tc").is_none() {
        return Err(SkipReason::MissingTool("tc".into()));
    }

    let modprobe_ok = host(&["modprobe", "sch_netem"]).is_ok_and(|o| o.status.success());
    if !modprobe_ok {
        return Err(SkipReason::NoNetem);
    }

    Ok(())
}
