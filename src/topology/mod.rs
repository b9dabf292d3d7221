//! Topology builders run by each spawn.
//!
//! - [`nat`]: `process ⇄ router ⇄ bridge ⇄ host`, NAT at the router
//! - [`local`]: one namespace per spawn, directly on the bridge
//!
//! Builders split into a pure planning half (step lists, unit-tested) and
//! an executing half that creates namespaces and runs the plans.

pub mod local;
pub mod nat;

use std::net::Ipv4Addr;

use crate::bridge::BridgeUplink;
use crate::command::{CommandRunner, run_checked};
use crate::error::SandboxResult;
use crate::namespace::NamespaceHandle;
use crate::process::SandboxProcess;
use crate::step::Step;
use crate::wan::WanProfile;

/// Result of a successful spawn.
#[derive(Debug)]
pub struct Spawned {
    /// Handle to the caller's command; not supervised by the session.
    pub process: SandboxProcess,
    /// Address reachable from the bridge: the router's external address
    /// (NAT) or the namespace's own address (local).
    pub address: Ipv4Addr,
    /// Namespace the command runs in.
    pub namespace: String,
}

/// Session state a builder reads and the namespace list it appends to.
pub(crate) struct SpawnContext<'a, R: CommandRunner + ?Sized> {
    pub runner: &'a R,
    pub token: &'a str,
    pub bridge: &'a BridgeUplink,
    /// Set when WAN emulation is enabled for the session.
    pub wan: Option<&'a WanProfile>,
    pub namespaces: &'a mut Vec<NamespaceHandle>,
}

/// Host-side veth name: the session token followed by the spawn counter in
/// base 36, e.g. `1a2b3c4dz` for spawn 35.
///
/// An 8-character token leaves 7 characters, enough for any `u32` counter
/// within the 15-byte netdev name limit. Tokens have a fixed width, so
/// distinct counters never render the same name.
pub(crate) fn host_link_name(token: &str, counter: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut suffix = Vec::with_capacity(7);
    let mut rest = counter;
    loop {
        suffix.push(DIGITS[(rest % 36) as usize] as char);
        rest /= 36;
        if rest == 0 {
            break;
        }
    }
    let mut name = String::with_capacity(token.len() + suffix.len());
    name.push_str(token);
    name.extend(suffix.into_iter().rev());
    name
}

/// Create a veth pair whose peer lands in `netns` as `peer`, bring the host
/// end up and attach it to the bridge.
pub(crate) fn uplink_to_bridge<R: CommandRunner + ?Sized>(
    ctx: &SpawnContext<'_, R>,
    host_link: &str,
    peer: &str,
    netns: &str,
) -> SandboxResult<()> {
    let pair = Step::AddVethPair {
        name: host_link.to_string(),
        peer: peer.to_string(),
        peer_netns: Some(netns.to_string()),
    };
    run_checked(ctx.runner, &pair.invocation())?;
    run_checked(ctx.runner, &Step::link_up(host_link).invocation())?;
    ctx.bridge.attach_port(ctx.runner, host_link)
}
