//! Two-tier topology: the command runs in a process namespace behind a
//! router namespace that NATs it onto the session bridge.
//!
//! ```text
//!  process ns               router ns                    host
//! ┌───────────┐          ┌─────────────┐             ┌──────────┐
//! │ to_router ├──────────┤ to_process  │             │          │
//! │ 10.0.0.2  │          │ 10.0.0.1    │   wan ──────┤ rN-token ├─ br-token
//! └───────────┘          │ MASQUERADE  │   (pool IP) └──────────┘  (gateway)
//!                        └─────────────┘
//! ```
//!
//! The internal `/24` is the same for every spawn. It never collides with
//! the session subnet as long as the subnet stays outside 10.0.0.0/24.

use std::net::{Ipv4Addr, SocketAddrV4};

use ipnetwork::Ipv4Network;
use tracing::info;

use super::{SpawnContext, Spawned, host_link_name, uplink_to_bridge};
use crate::command::CommandRunner;
use crate::error::SandboxResult;
use crate::namespace::{NamespaceHandle, Role, namespace_name};
use crate::port_mapping::{PortMapping, PortMappingRule, Protocol};
use crate::process::SandboxCommand;
use crate::step::{Chain, FilterRule, NatAddr, Policy, Qdisc, Step, Table, Target, host};
use crate::wan::WanProfile;

/// Router's WAN-facing interface, the peer of the host bridge port.
pub const WAN_IFACE: &str = "wan";
/// Router side of the internal link.
pub const ROUTER_IFACE: &str = "to_process";
/// Process side of the internal link.
pub const PROCESS_IFACE: &str = "to_router";

pub const ROUTER_INTERNAL_ADDR: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
pub const PROCESS_INTERNAL_ADDR: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
pub const INTERNAL_PREFIX: u8 = 24;

/// Whether `subnet` shares any address with the internal 10.0.0.0/24.
pub fn overlaps_internal(subnet: Ipv4Network) -> bool {
    let prefix = subnet.prefix().min(INTERNAL_PREFIX);
    let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
    u32::from(subnet.network()) & mask == u32::from(Ipv4Addr::new(10, 0, 0, 0)) & mask
}

/// Everything needed to render one NAT spawn.
#[derive(Debug, Clone)]
pub struct NatPlan {
    pub router_ns: String,
    pub process_ns: String,
    pub host_link: String,
    /// Router's external address and the session subnet prefix.
    pub address: Ipv4Addr,
    pub prefix: u8,
    pub gateway: Ipv4Addr,
    pub port_mapping: Vec<PortMappingRule>,
    pub wan: Option<WanProfile>,
}

impl NatPlan {
    pub fn new(
        token: &str,
        counter: u32,
        (address, prefix): (Ipv4Addr, u8),
        gateway: Ipv4Addr,
        port_mapping: Option<&PortMapping>,
        wan: Option<&WanProfile>,
    ) -> Self {
        Self {
            router_ns: namespace_name(token, Role::Router, counter),
            process_ns: namespace_name(token, Role::Process, counter),
            host_link: host_link_name(token, counter),
            address,
            prefix,
            gateway,
            port_mapping: port_mapping
                .map(|m| m.rules().collect())
                .unwrap_or_default(),
            wan: wan.cloned(),
        }
    }

    /// Steps run inside the router namespace.
    ///
    /// Port-mapping rules precede the masquerade/forward rules.
    pub fn router_steps(&self) -> Vec<Step> {
        let mut steps = vec![
            Step::link_up("lo"),
            Step::link_up(WAN_IFACE),
            Step::address(WAN_IFACE, self.address, self.prefix),
            Step::AddDefaultRoute { via: self.gateway },
            Step::AddVethPair {
                name: ROUTER_IFACE.to_string(),
                peer: PROCESS_IFACE.to_string(),
                peer_netns: Some(self.process_ns.clone()),
            },
            Step::address(ROUTER_IFACE, ROUTER_INTERNAL_ADDR, INTERNAL_PREFIX),
            Step::link_up(ROUTER_IFACE),
            Step::AppendRule(
                FilterRule::new(Table::Filter, Chain::Input, Target::Accept)
                    .protocol(Protocol::Icmp),
            ),
            Step::policy(Chain::Input, Policy::Drop),
        ];

        for rule in &self.port_mapping {
            steps.extend(self.port_mapping_steps(rule));
        }

        steps.extend([
            Step::AppendRule(
                FilterRule::new(Table::Nat, Chain::Postrouting, Target::Masquerade)
                    .out_iface(WAN_IFACE),
            ),
            Step::AppendRule(
                FilterRule::new(Table::Filter, Chain::Forward, Target::Accept).out_iface(WAN_IFACE),
            ),
            Step::AppendRule(
                FilterRule::new(Table::Filter, Chain::Forward, Target::Accept).in_iface(WAN_IFACE),
            ),
        ]);

        if let Some(profile) = &self.wan {
            steps.push(Step::ReplaceQdisc {
                dev: WAN_IFACE.to_string(),
                qdisc: Qdisc::Netem(profile.clone()),
            });
        }
        steps
    }

    /// Inbound DNAT plus its mirrored SNAT for one mapping.
    fn port_mapping_steps(&self, rule: &PortMappingRule) -> [Step; 2] {
        let proto = rule.protocol;
        let (to_process, to_router) = if proto.has_ports() {
            (
                NatAddr::Socket(SocketAddrV4::new(PROCESS_INTERNAL_ADDR, rule.internal_port)),
                NatAddr::Socket(SocketAddrV4::new(self.address, rule.external_port)),
            )
        } else {
            (
                NatAddr::Addr(PROCESS_INTERNAL_ADDR),
                NatAddr::Addr(self.address),
            )
        };

        let mut dnat = FilterRule::new(Table::Nat, Chain::Prerouting, Target::Dnat(to_process))
            .protocol(proto)
            .destination(host(self.address));
        let mut snat = FilterRule::new(Table::Nat, Chain::Postrouting, Target::Snat(to_router))
            .protocol(proto)
            .source(host(PROCESS_INTERNAL_ADDR));
        if proto.has_ports() {
            dnat = dnat.destination_port(rule.external_port);
            snat = snat.source_port(rule.internal_port);
        }

        [Step::AppendRule(dnat), Step::AppendRule(snat)]
    }

    /// Steps run inside the process namespace. It is a leaf: nothing is forwarded.
    pub fn process_steps(&self) -> Vec<Step> {
        let mut steps = vec![
            Step::link_up("lo"),
            Step::address(PROCESS_IFACE, PROCESS_INTERNAL_ADDR, INTERNAL_PREFIX),
            Step::link_up(PROCESS_IFACE),
            Step::AddDefaultRoute {
                via: ROUTER_INTERNAL_ADDR,
            },
            Step::policy(Chain::Input, Policy::Accept),
            Step::policy(Chain::Output, Policy::Accept),
            Step::policy(Chain::Forward, Policy::Drop),
        ];

        if self.wan.is_some() {
            steps.push(Step::ReplaceQdisc {
                dev: PROCESS_IFACE.to_string(),
                qdisc: Qdisc::Fq,
            });
        }
        steps
    }
}

/// Build a router/process pair and launch `command` in the process namespace.
///
/// Namespaces join `ctx.namespaces` as soon as they exist, so a failure
/// part-way leaves them for the session's release.
pub(crate) fn build<R: CommandRunner + ?Sized>(
    ctx: SpawnContext<'_, R>,
    counter: u32,
    address: (Ipv4Addr, u8),
    command: &SandboxCommand,
    port_mapping: Option<&PortMapping>,
) -> SandboxResult<Spawned> {
    let plan = NatPlan::new(
        ctx.token,
        counter,
        address,
        ctx.bridge.gateway(),
        port_mapping,
        ctx.wan,
    );

    let router = NamespaceHandle::create(ctx.runner, plan.router_ns.clone(), Role::Router)?;
    ctx.namespaces.push(router);
    let process = NamespaceHandle::create(ctx.runner, plan.process_ns.clone(), Role::Process)?;
    ctx.namespaces.push(process);

    let tracked = ctx.namespaces.len();
    let (router, process) = (&ctx.namespaces[tracked - 2], &ctx.namespaces[tracked - 1]);

    uplink_to_bridge(&ctx, &plan.host_link, WAN_IFACE, router.name())?;
    router.execute(ctx.runner, &plan.router_steps())?;
    process.execute(ctx.runner, &plan.process_steps())?;

    info!(
        router = router.name(),
        process = process.name(),
        address = %plan.address,
        mappings = plan.port_mapping.len(),
        wan = plan.wan.is_some(),
        "NAT topology ready"
    );

    Ok(Spawned {
        process: process.spawn(ctx.runner, command)?,
        address: plan.address,
        namespace: process.name().to_string(),
    })
}
