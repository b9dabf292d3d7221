//! Isolated per-invocation network topologies on a single Linux host.
//!
//! A [`Sandbox`] owns a bridge and an address pool. Each
//! [`Sandbox::spawn`] builds a fresh topology out of network namespaces
//! and veth links, then launches a command inside it:
//!
//! - NAT: the command runs behind a router namespace that masquerades it
//!   onto the bridge, with optional port mappings and WAN emulation
//! - local: the command's namespace sits directly on the bridge
//!
//! Topology changes are typed [`step::Step`]s executed through a
//! [`CommandRunner`], so setup sequences can be checked without root.

pub mod allocator;
pub mod bridge;
pub mod command;
pub mod config;
pub mod error;
pub mod namespace;
pub mod port_mapping;
pub mod process;
pub mod session;
pub mod signals;
pub mod step;
pub mod topology;
pub mod wan;

pub use command::{CommandRunner, Privilege, SystemRunner};
pub use config::{SessionConfig, TopologyKind};
pub use error::{ConfigError, SandboxError, SandboxResult, TeardownReport};
pub use port_mapping::{PortMapping, PortMappingRule, Protocol};
pub use process::{SandboxCommand, SandboxProcess};
pub use session::Sandbox;
pub use topology::Spawned;
pub use wan::WanProfile;
