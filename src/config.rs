//! Session configuration and host preconditions checked at open.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use ipnetwork::Ipv4Network;
use tracing::warn;

use crate::command::Privilege;
use crate::error::ConfigError;
use crate::topology::nat;
use crate::wan::WanProfile;

/// Default session subnet, chosen clear of the fixed 10.0.0.0/24 internal block.
pub const DEFAULT_SUBNET: &str = "10.32.0.0/16";

/// Kernel switch that must read `1` for routed topologies to work.
pub const IP_FORWARD_SYSCTL: &str = "/proc/sys/net/ipv4/ip_forward";

/// Shape of the topology each spawn builds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TopologyKind {
    /// Router namespace NATs a leaf process namespace onto the bridge.
    #[default]
    Nat,
    /// Namespaces sit directly on the bridge and share the session subnet.
    Local,
}

impl TopologyKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            TopologyKind::Nat => "nat",
            TopologyKind::Local => "local",
        }
    }
}

impl fmt::Display for TopologyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TopologyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nat" => Ok(TopologyKind::Nat),
            "local" => Ok(TopologyKind::Local),
            _ => Err(format!("invalid topology '{s}': use nat or local")),
        }
    }
}

impl clap::ValueEnum for TopologyKind {
    fn value_variants<'a>() -> &'a [Self] {
        &[TopologyKind::Nat, TopologyKind::Local]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(clap::builder::PossibleValue::new(self.as_str()))
    }
}

/// Options for opening a sandbox session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// IPv4 CIDR the gateway and every external address are drawn from.
    pub subnet: String,
    /// Apply `wan` to every spawned topology.
    pub simulate_wan: bool,
    pub topology: TopologyKind,
    pub wan: WanProfile,
    /// How the system runner executes privileged tools.
    pub privilege: Privilege,
    pub forwarding_sysctl: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            subnet: DEFAULT_SUBNET.to_string(),
            simulate_wan: false,
            topology: TopologyKind::default(),
            wan: WanProfile::default(),
            privilege: Privilege::detect(),
            forwarding_sysctl: PathBuf::from(IP_FORWARD_SYSCTL),
        }
    }
}

impl SessionConfig {
    pub fn with_subnet(mut self, subnet: impl Into<String>) -> Self {
        self.subnet = subnet.into();
        self
    }

    pub fn with_topology(mut self, topology: TopologyKind) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_wan(mut self, enabled: bool) -> Self {
        self.simulate_wan = enabled;
        self
    }

    /// Parse and normalise [`SessionConfig::subnet`].
    ///
    /// Host bits are cleared, so `10.1.2.3/16` yields `10.1.0.0/16`.
    pub fn parse_subnet(&self) -> Result<Ipv4Network, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidSubnet {
            value: self.subnet.clone(),
            reason,
        };

        let parsed: Ipv4Network = self
            .subnet
            .trim()
            .parse()
            .map_err(|e: ipnetwork::IpNetworkError| invalid(e.to_string()))?;
        let subnet = Ipv4Network::new(parsed.network(), parsed.prefix())
            .map_err(|e| invalid(e.to_string()))?;

        if subnet.prefix() > 30 {
            return Err(invalid(format!(
                "/{} leaves no room for a gateway and a spawn",
                subnet.prefix()
            )));
        }

        if self.topology == TopologyKind::Nat && nat::overlaps_internal(subnet) {
            warn!(%subnet, "session subnet overlaps the internal 10.0.0.0/24 block");
        }
        Ok(subnet)
    }

    /// WAN profile to apply, if emulation is enabled.
    pub fn wan_profile(&self) -> Option<&WanProfile> {
        self.simulate_wan.then_some(&self.wan)
    }
}

/// Fail unless the IPv4 forwarding switch at `path` is enabled.
pub fn check_ip_forwarding(path: &Path) -> Result<(), ConfigError> {
    let value = fs::read_to_string(path).map_err(|source| ConfigError::ForwardingUnreadable {
        path: path.to_path_buf(),
        source,
    })?;

    if value.trim() == "1" {
        Ok(())
    } else {
        Err(ConfigError::ForwardingDisabled {
            path: path.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn sysctl(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.subnet, DEFAULT_SUBNET);
        assert!(!config.simulate_wan);
        assert!(config.wan_profile().is_none());
        assert_eq!(config.topology, TopologyKind::Nat);
        assert_eq!(config.forwarding_sysctl, Path::new(IP_FORWARD_SYSCTL));
    }

    #[test]
    fn test_parse_subnet_normalises_host_bits() {
        let config = SessionConfig::default().with_subnet("10.1.2.3/16");
        assert_eq!(config.parse_subnet().unwrap().to_string(), "10.1.0.0/16");
    }

    #[test]
    fn test_parse_subnet_rejects_garbage() {
        for bad in ["", "10.1.0.0/33", "not-a-subnet", "fe80::/64", "10.1.0.0/31"] {
            let err = SessionConfig::default().with_subnet(bad).parse_subnet();
            assert!(
                matches!(err, Err(ConfigError::InvalidSubnet { .. })),
                "{bad} accepted"
            );
        }
    }

    #[test]
    fn test_forwarding_enabled() {
        let file = sysctl("1\n");
        assert!(check_ip_forwarding(file.path()).is_ok());
    }

    #[test]
    fn test_forwarding_disabled() {
        let file = sysctl("0\n");
        assert!(matches!(
            check_ip_forwarding(file.path()),
            Err(ConfigError::ForwardingDisabled { .. })
        ));
    }

    #[test]
    fn test_forwarding_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            check_ip_forwarding(&dir.path().join("missing")),
            Err(ConfigError::ForwardingUnreadable { .. })
        ));
    }

    #[test]
    fn test_topology_kind_parse_and_display() {
        assert_eq!("nat".parse::<TopologyKind>().unwrap(), TopologyKind::Nat);
        assert_eq!("local".parse::<TopologyKind>().unwrap(), TopologyKind::Local);
        assert!("bridge".parse::<TopologyKind>().is_err());
        assert_eq!(TopologyKind::Local.to_string(), "local");
    }

    #[test]
    fn test_wan_profile_when_enabled() {
        let config = SessionConfig::default().with_wan(true);
        assert_eq!(config.wan_profile(), Some(&WanProfile::default()));
    }
}
