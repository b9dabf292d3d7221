//! Privilege checks and in-namespace probes for netsandbox integration tests.
//!
//! # Modules
//!
//! - [`deps`]: privilege, tool and kernel checks with a printable [`SkipReason`]
//! - [`exec`]: elevated host commands, namespace/link presence, listener polling
//! - [`ping`]: run `ping` inside a namespace and parse its summary

pub mod deps;
pub mod exec;
pub mod ping;

pub use deps::{SkipReason, check_privileges, check_sandbox_deps, check_wan_deps};
pub use exec::{
    Elevation, link_exists, listens_on, netns_exists, ns_exec, wait_for_tcp_listener,
};
pub use ping::{PingStats, ping_from};
