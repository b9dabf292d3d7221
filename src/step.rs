//! Typed topology operations and their rendering to tool invocations.
//!
//! Each [`Step`] is one call to an external tool (`ip`, `iptables`, `tc`).
//! Rendering is pure, so a topology's full command sequence can be
//! inspected without touching the host.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

use ipnetwork::Ipv4Network;

use crate::command::Invocation;
use crate::port_mapping::Protocol;
use crate::wan::WanProfile;

/// Packet-filter table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Table {
    Filter,
    Nat,
}

/// Packet-filter chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Chain {
    Input,
    Output,
    Forward,
    Prerouting,
    Postrouting,
}

impl Chain {
    pub const fn as_str(self) -> &'static str {
        match self {
            Chain::Input => "INPUT",
            Chain::Output => "OUTPUT",
            Chain::Forward => "FORWARD",
            Chain::Prerouting => "PREROUTING",
            Chain::Postrouting => "POSTROUTING",
        }
    }
}

/// Address rewrite destination; the port is omitted for port-less protocols.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NatAddr {
    Addr(Ipv4Addr),
    Socket(SocketAddrV4),
}

impl fmt::Display for NatAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NatAddr::Addr(addr) => write!(f, "{addr}"),
            NatAddr::Socket(sock) => write!(f, "{sock}"),
        }
    }
}

/// Rule verdict or rewrite.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    Accept,
    Drop,
    Masquerade,
    Dnat(NatAddr),
    Snat(NatAddr),
}

impl Target {
    fn args(&self) -> Vec<String> {
        match self {
            Target::Accept => vec!["-j".into(), "ACCEPT".into()],
            Target::Drop => vec!["-j".into(), "DROP".into()],
            Target::Masquerade => vec!["-j".into(), "MASQUERADE".into()],
            Target::Dnat(to) => vec![
                "-j".into(),
                "DNAT".into(),
                "--to-destination".into(),
                to.to_string(),
            ],
            Target::Snat(to) => vec![
                "-j".into(),
                "SNAT".into(),
                "--to-source".into(),
                to.to_string(),
            ],
        }
    }
}

/// Default verdict of a built-in chain (`iptables -P`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Policy {
    Accept,
    Drop,
}

impl Policy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Policy::Accept => "ACCEPT",
            Policy::Drop => "DROP",
        }
    }
}

/// A single packet-filter rule. Unset matches are not rendered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterRule {
    pub table: Table,
    pub chain: Chain,
    pub protocol: Option<Protocol>,
    pub source: Option<Ipv4Network>,
    pub destination: Option<Ipv4Network>,
    pub source_port: Option<u16>,
    pub destination_port: Option<u16>,
    pub in_iface: Option<String>,
    pub out_iface: Option<String>,
    pub target: Target,
}

impl FilterRule {
    pub fn new(table: Table, chain: Chain, target: Target) -> Self {
        Self {
            table,
            chain,
            protocol: None,
            source: None,
            destination: None,
            source_port: None,
            destination_port: None,
            in_iface: None,
            out_iface: None,
            target,
        }
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn source(mut self, source: Ipv4Network) -> Self {
        self.source = Some(source);
        self
    }

    pub fn destination(mut self, destination: Ipv4Network) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn source_port(mut self, port: u16) -> Self {
        self.source_port = Some(port);
        self
    }

    pub fn destination_port(mut self, port: u16) -> Self {
        self.destination_port = Some(port);
        self
    }

    pub fn in_iface(mut self, iface: &str) -> Self {
        self.in_iface = Some(iface.to_string());
        self
    }

    pub fn out_iface(mut self, iface: &str) -> Self {
        self.out_iface = Some(iface.to_string());
        self
    }

    /// `iptables` arguments with `op` as the command flag (`-A`, `-D`).
    fn args(&self, op: &str) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        if self.table == Table::Nat {
            args.extend(["-t".into(), "nat".into()]);
        }
        args.extend([op.to_string(), self.chain.as_str().to_string()]);

        if let Some(proto) = self.protocol {
            args.extend(["-p".into(), proto.as_str().into()]);
        }
        if let Some(src) = self.source {
            args.extend(["-s".into(), src.to_string()]);
        }
        if let Some(dst) = self.destination {
            args.extend(["-d".into(), dst.to_string()]);
        }
        if let Some(sport) = self.source_port {
            args.extend(["--sport".into(), sport.to_string()]);
        }
        if let Some(dport) = self.destination_port {
            args.extend(["--dport".into(), dport.to_string()]);
        }
        if let Some(iface) = &self.in_iface {
            args.extend(["-i".into(), iface.clone()]);
        }
        if let Some(iface) = &self.out_iface {
            args.extend(["-o".into(), iface.clone()]);
        }

        args.extend(self.target.args());
        args
    }
}

/// Root queuing discipline attached to an interface.
#[derive(Clone, Debug, PartialEq)]
pub enum Qdisc {
    Netem(WanProfile),
    Fq,
}

/// One operation on the external link, filter or shaping tools.
#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    AddNetns {
        name: String,
    },
    DeleteNetns {
        name: String,
    },
    AddBridge {
        name: String,
    },
    /// Create a veth pair; with `peer_netns` the peer is created directly
    /// inside that namespace, so its name never appears on the host.
    AddVethPair {
        name: String,
        peer: String,
        peer_netns: Option<String>,
    },
    DeleteLink {
        name: String,
    },
    SetLinkUp {
        dev: String,
    },
    SetMaster {
        dev: String,
        master: String,
    },
    AddAddress {
        dev: String,
        address: Ipv4Addr,
        prefix: u8,
    },
    AddDefaultRoute {
        via: Ipv4Addr,
    },
    AppendRule(FilterRule),
    DeleteRule(FilterRule),
    SetPolicy {
        chain: Chain,
        policy: Policy,
    },
    ReplaceQdisc {
        dev: String,
        qdisc: Qdisc,
    },
}

impl Step {
    pub fn link_up(dev: &str) -> Self {
        Step::SetLinkUp {
            dev: dev.to_string(),
        }
    }

    pub fn address(dev: &str, address: Ipv4Addr, prefix: u8) -> Self {
        Step::AddAddress {
            dev: dev.to_string(),
            address,
            prefix,
        }
    }

    pub fn policy(chain: Chain, policy: Policy) -> Self {
        Step::SetPolicy { chain, policy }
    }

    /// Render to the tool invocation that performs this step.
    pub fn invocation(&self) -> Invocation {
        match self {
            Step::AddNetns { name } => Invocation::new("ip", ["netns", "add", name.as_str()]),
            Step::DeleteNetns { name } => {
                Invocation::new("ip", ["netns", "delete", name.as_str()])
            }
            Step::AddBridge { name } => Invocation::new(
                "ip",
                ["link", "add", "name", name.as_str(), "type", "bridge"],
            ),
            Step::AddVethPair {
                name,
                peer,
                peer_netns,
            } => {
                let inv = Invocation::new(
                    "ip",
                    [
                        "link",
                        "add",
                        name.as_str(),
                        "type",
                        "veth",
                        "peer",
                        "name",
                        peer.as_str(),
                    ],
                );
                match peer_netns {
                    Some(ns) => inv.args(["netns", ns.as_str()]),
                    None => inv,
                }
            }
            Step::DeleteLink { name } => Invocation::new("ip", ["link", "delete", name.as_str()]),
            Step::SetLinkUp { dev } => {
                Invocation::new("ip", ["link", "set", "dev", dev.as_str(), "up"])
            }
            Step::SetMaster { dev, master } => Invocation::new(
                "ip",
                ["link", "set", "dev", dev.as_str(), "master", master.as_str()],
            ),
            Step::AddAddress {
                dev,
                address,
                prefix,
            } => {
                let cidr = format!("{address}/{prefix}");
                Invocation::new("ip", ["addr", "add", cidr.as_str(), "dev", dev.as_str()])
            }
            Step::AddDefaultRoute { via } => {
                let via = via.to_string();
                Invocation::new("ip", ["route", "add", "default", "via", via.as_str()])
            }
            Step::AppendRule(rule) => Invocation::new("iptables", rule.args("-A")),
            Step::DeleteRule(rule) => Invocation::new("iptables", rule.args("-D")),
            Step::SetPolicy { chain, policy } => {
                Invocation::new("iptables", ["-P", chain.as_str(), policy.as_str()])
            }
            Step::ReplaceQdisc { dev, qdisc } => {
                let inv = Invocation::new("tc", ["qdisc", "replace", "dev", dev.as_str(), "root"]);
                match qdisc {
                    Qdisc::Netem(profile) => inv.arg("netem").args(profile.netem_args()),
                    Qdisc::Fq => inv.arg("fq"),
                }
            }
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.invocation())
    }
}

/// A single-host network (`/32`) for address matches.
pub fn host(addr: Ipv4Addr) -> Ipv4Network {
    Ipv4Network::from(addr)
}
