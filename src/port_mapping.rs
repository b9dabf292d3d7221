//! Port forwarding requests for the NAT topology.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Transport protocol matched by a port mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
    /// Port-less; mapped traffic is redirected by address only.
    Icmp,
}

impl Protocol {
    /// Name understood by the packet filter (`-p <name>`).
    pub const fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Sctp => "sctp",
            Protocol::Icmp => "icmp",
        }
    }

    /// Whether `--dport`/`--sport` matches apply to this protocol.
    pub const fn has_ports(self) -> bool {
        !matches!(self, Protocol::Icmp)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "sctp" => Ok(Protocol::Sctp),
            "icmp" => Ok(Protocol::Icmp),
            _ => Err(format!(
                "invalid protocol '{s}': use tcp, udp, sctp, or icmp"
            )),
        }
    }
}

/// One forwarded port: router `external_port` -> process `internal_port`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortMappingRule {
    pub protocol: Protocol,
    pub external_port: u16,
    pub internal_port: u16,
}

impl FromStr for PortMappingRule {
    type Err = String;

    /// Parses `proto:external[:internal]`, e.g. `tcp:8080:80` or `udp:5000`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let parse_port = |p: &str| {
            p.parse::<u16>()
                .map_err(|e| format!("invalid port '{p}' in '{s}': {e}"))
        };

        let (protocol, external, internal) = match parts.as_slice() {
            [proto, ext] => (proto, parse_port(ext)?, parse_port(ext)?),
            [proto, ext, int] => (proto, parse_port(ext)?, parse_port(int)?),
            _ => return Err(format!("invalid mapping '{s}': use proto:external[:internal]")),
        };

        Ok(Self {
            protocol: protocol.parse()?,
            external_port: external,
            internal_port: internal,
        })
    }
}

/// Per-spawn forwarding table: protocol -> external port -> internal port.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PortMapping {
    table: BTreeMap<Protocol, BTreeMap<u16, u16>>,
}

impl PortMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the mapping for `external` on `protocol`.
    pub fn with(mut self, protocol: Protocol, external: u16, internal: u16) -> Self {
        self.insert(protocol, external, internal);
        self
    }

    pub fn insert(&mut self, protocol: Protocol, external: u16, internal: u16) {
        self.table
            .entry(protocol)
            .or_default()
            .insert(external, internal);
    }

    pub fn is_empty(&self) -> bool {
        self.table.values().all(BTreeMap::is_empty)
    }

    /// Rules ordered by protocol, then external port.
    pub fn rules(&self) -> impl Iterator<Item = PortMappingRule> + '_ {
        self.table.iter().flat_map(|(&protocol, ports)| {
            ports.iter().map(move |(&external, &internal)| PortMappingRule {
                protocol,
                external_port: external,
                internal_port: internal,
            })
        })
    }
}

impl FromIterator<PortMappingRule> for PortMapping {
    fn from_iter<I: IntoIterator<Item = PortMappingRule>>(iter: I) -> Self {
        let mut mapping = PortMapping::new();
        for rule in iter {
            mapping.insert(rule.protocol, rule.external_port, rule.internal_port);
        }
        mapping
    }
}
