//! Flat topology: one namespace per spawn, attached straight to the bridge.
//!
//! The namespace holds an address from the session pool, so bridged peers
//! and the host reach each other without NAT.

use std::net::Ipv4Addr;

use tracing::{info, warn};

use super::{SpawnContext, Spawned, host_link_name, uplink_to_bridge};
use crate::command::CommandRunner;
use crate::error::SandboxResult;
use crate::namespace::{NamespaceHandle, Role, namespace_name};
use crate::port_mapping::PortMapping;
use crate::process::SandboxCommand;
use crate::step::{Chain, Policy, Qdisc, Step};
use crate::wan::WanProfile;

/// Interface name of the bridge link inside a local namespace.
pub const LOCAL_IFACE: &str = "eth0";

/// Steps run inside a local namespace.
pub fn namespace_steps(
    (address, prefix): (Ipv4Addr, u8),
    gateway: Ipv4Addr,
    wan: Option<&WanProfile>,
) -> Vec<Step> {
    let mut steps = vec![
        Step::link_up("lo"),
        Step::link_up(LOCAL_IFACE),
        Step::address(LOCAL_IFACE, address, prefix),
        Step::AddDefaultRoute { via: gateway },
        Step::policy(Chain::Input, Policy::Accept),
        Step::policy(Chain::Output, Policy::Accept),
    ];
    if let Some(profile) = wan {
        steps.push(Step::ReplaceQdisc {
            dev: LOCAL_IFACE.to_string(),
            qdisc: Qdisc::Netem(profile.clone()),
        });
    }
    steps
}

/// Build a local namespace and launch `command` in it.
///
/// Port mappings have nothing to translate here; a non-empty one is ignored.
pub(crate) fn build<R: CommandRunner + ?Sized>(
    ctx: SpawnContext<'_, R>,
    counter: u32,
    address: (Ipv4Addr, u8),
    command: &SandboxCommand,
    port_mapping: Option<&PortMapping>,
) -> SandboxResult<Spawned> {
    if port_mapping.is_some_and(|m| !m.is_empty()) {
        warn!(counter, "port mapping ignored by the local topology");
    }

    let name = namespace_name(ctx.token, Role::Local, counter);
    let ns = NamespaceHandle::create(ctx.runner, name, Role::Local)?;
    ctx.namespaces.push(ns);
    let ns = &ctx.namespaces[ctx.namespaces.len() - 1];

    let host_link = host_link_name(ctx.token, counter);
    uplink_to_bridge(&ctx, &host_link, LOCAL_IFACE, ns.name())?;
    ns.execute(
        ctx.runner,
        &namespace_steps(address, ctx.bridge.gateway(), ctx.wan),
    )?;

    info!(ns = ns.name(), address = %address.0, "local topology ready");

    Ok(Spawned {
        process: ns.spawn(ctx.runner, command)?,
        address: address.0,
        namespace: ns.name().to_string(),
    })
}
