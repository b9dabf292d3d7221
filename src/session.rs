//! The sandbox session: owner of a bridge, an address pool and every
//! namespace its spawns create.

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use tracing::{debug, info, warn};

use crate::allocator::{AddressAllocator, SpawnCounter};
use crate::bridge::{BridgeUplink, base_rules, bridge_name};
use crate::command::{CommandRunner, SystemRunner};
use crate::config::{SessionConfig, TopologyKind, check_ip_forwarding};
use crate::error::{SandboxError, SandboxResult, TeardownReport};
use crate::namespace::NamespaceHandle;
use crate::port_mapping::PortMapping;
use crate::process::SandboxCommand;
use crate::topology::{SpawnContext, Spawned, local, nat};
use crate::wan::WanProfile;

/// Random per-session token embedded in every resource name.
fn session_token() -> String {
    format!("{:08x}", rand::random::<u32>())
}

/// An open sandbox session.
///
/// Dropping the session releases everything it created: namespaces in
/// reverse creation order, then the bridge rules and the bridge device.
/// Processes launched by [`Sandbox::spawn`] are not supervised.
pub struct Sandbox<R: CommandRunner = SystemRunner> {
    token: String,
    topology: TopologyKind,
    wan: Option<WanProfile>,
    allocator: AddressAllocator,
    counter: SpawnCounter,
    bridge: Option<BridgeUplink>,
    namespaces: Vec<NamespaceHandle>,
    runner: R,
}

impl Sandbox<SystemRunner> {
    /// Open a session that executes tools on the host.
    pub fn open(config: SessionConfig) -> SandboxResult<Self> {
        let runner = SystemRunner::new(config.privilege);
        Self::open_with_runner(config, runner)
    }
}

impl<R: CommandRunner> Sandbox<R> {
    /// Open a session whose OS changes go through `runner`.
    ///
    /// Configuration is validated before anything is created. The first
    /// pool address becomes the gateway on the new bridge.
    pub fn open_with_runner(config: SessionConfig, runner: R) -> SandboxResult<Self> {
        let subnet = config.parse_subnet()?;
        check_ip_forwarding(&config.forwarding_sysctl)?;

        let mut allocator = AddressAllocator::new(subnet);
        let (gateway, prefix) = allocator.next_interface_address()?;

        let token = session_token();
        let forward_subnet = (config.topology == TopologyKind::Local).then_some(subnet);
        let bridge = BridgeUplink::create(
            &runner,
            bridge_name(&token),
            gateway,
            prefix,
            base_rules(gateway, forward_subnet),
        )?;

        info!(
            %token,
            %subnet,
            %gateway,
            topology = %config.topology,
            wan = config.simulate_wan,
            "sandbox session opened"
        );

        Ok(Self {
            token,
            topology: config.topology,
            wan: config.wan_profile().cloned(),
            allocator,
            counter: SpawnCounter::default(),
            bridge: Some(bridge),
            namespaces: Vec::new(),
            runner,
        })
    }

    /// Build a fresh topology and launch `command` in its innermost namespace.
    ///
    /// On failure, namespaces created so far stay tracked and are released
    /// with the session. `port_mapping` only applies to the NAT topology.
    pub fn spawn(
        &mut self,
        command: &SandboxCommand,
        port_mapping: Option<&PortMapping>,
    ) -> SandboxResult<Spawned> {
        let Some(bridge) = self.bridge.as_ref() else {
            return Err(SandboxError::Released {
                token: self.token.clone(),
            });
        };

        let counter = self.counter.reserve();
        let address = self.allocator.next_interface_address()?;
        debug!(token = %self.token, counter, address = %address.0, "allocated spawn");

        let ctx = SpawnContext {
            runner: &self.runner,
            token: &self.token,
            bridge,
            wan: self.wan.as_ref(),
            namespaces: &mut self.namespaces,
        };
        let spawned = match self.topology {
            TopologyKind::Nat => nat::build(ctx, counter, address, command, port_mapping),
            TopologyKind::Local => local::build(ctx, counter, address, command, port_mapping),
        }
        .inspect_err(|error| warn!(token = %self.token, counter, %error, "spawn failed"))?;

        info!(
            token = %self.token,
            ns = %spawned.namespace,
            address = %spawned.address,
            pid = spawned.process.id(),
            "spawned command"
        );
        Ok(spawned)
    }

    /// Release every resource the session created. Never fails; failures
    /// are logged and returned in the report. Calling it again is a no-op.
    pub fn release(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        let Some(bridge) = self.bridge.take() else {
            return report;
        };

        while let Some(ns) = self.namespaces.pop() {
            report.record(ns.release(&self.runner));
        }
        report.extend(bridge.release(&self.runner));

        if report.is_clean() {
            info!(token = %self.token, "sandbox session released");
        } else {
            warn!(
                token = %self.token,
                failures = report.failures.len(),
                "sandbox session released with leftovers"
            );
        }
        report
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn topology(&self) -> TopologyKind {
        self.topology
    }

    pub fn subnet(&self) -> Ipv4Network {
        self.allocator.subnet()
    }

    /// `None` once the session is released.
    pub fn gateway(&self) -> Option<Ipv4Addr> {
        self.bridge.as_ref().map(BridgeUplink::gateway)
    }

    pub fn bridge_name(&self) -> String {
        bridge_name(&self.token)
    }

    /// Namespaces currently owned, in creation order.
    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.namespaces.iter().map(NamespaceHandle::name)
    }

    pub fn is_released(&self) -> bool {
        self.bridge.is_none()
    }
}

impl<R: CommandRunner> Drop for Sandbox<R> {
    fn drop(&mut self) {
        if !self.is_released() {
            let _ = self.release();
        }
    }
}

impl<R: CommandRunner> std::fmt::Debug for Sandbox<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("token", &self.token)
            .field("topology", &self.topology)
            .field("subnet", &self.allocator.subnet())
            .field("namespaces", &self.namespaces.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::command::testing::RecordingRunner;
    use crate::port_mapping::Protocol;

    struct Fixture {
        runner: RecordingRunner,
        _sysctl: tempfile::NamedTempFile,
        config: SessionConfig,
    }

    fn fixture(subnet: &str, topology: TopologyKind) -> Fixture {
        let mut sysctl = tempfile::NamedTempFile::new().unwrap();
        writeln!(sysctl, "1").unwrap();
        let config = SessionConfig {
            forwarding_sysctl: sysctl.path().to_path_buf(),
            ..SessionConfig::default()
        }
        .with_subnet(subnet)
        .with_topology(topology);

        Fixture {
            runner: RecordingRunner::new(),
            _sysctl: sysctl,
            config,
        }
    }

    impl Fixture {
        fn open(&self) -> Sandbox<RecordingRunner> {
            Sandbox::open_with_runner(self.config.clone(), self.runner.clone()).unwrap()
        }
    }

    fn spawn_true(sandbox: &mut Sandbox<RecordingRunner>) -> SandboxResult<Spawned> {
        let mut spawned = sandbox.spawn(&SandboxCommand::new("true"), None)?;
        spawned.process.wait().unwrap();
        Ok(spawned)
    }

    #[test]
    fn test_gateway_is_first_address_and_spawn_gets_second() {
        let fx = fixture("10.1.0.0/16", TopologyKind::Nat);
        let mut sandbox = fx.open();

        assert_eq!(sandbox.gateway(), Some(Ipv4Addr::new(10, 1, 0, 1)));
        assert_eq!(sandbox.token().len(), 8);
        assert_eq!(sandbox.bridge_name(), format!("br-{}", sandbox.token()));

        let spawned = spawn_true(&mut sandbox).unwrap();
        assert_eq!(spawned.address, Ipv4Addr::new(10, 1, 0, 2));
        assert_eq!(spawned.namespace, format!("{}_process1", sandbox.token()));
    }

    #[test]
    fn test_names_are_distinct_across_spawns() {
        let fx = fixture("10.1.0.0/16", TopologyKind::Nat);
        let mut sandbox = fx.open();
        let token = sandbox.token().to_string();

        let a = spawn_true(&mut sandbox).unwrap();
        let b = spawn_true(&mut sandbox).unwrap();
        assert_eq!(b.address, Ipv4Addr::new(10, 1, 0, 3));
        assert_ne!(a.namespace, b.namespace);

        let names: Vec<_> = sandbox.namespaces().map(str::to_string).collect();
        assert_eq!(
            names,
            [
                format!("{token}_router1"),
                format!("{token}_process1"),
                format!("{token}_router2"),
                format!("{token}_process2"),
            ]
        );
    }

    #[test]
    fn test_forwarding_disabled_creates_nothing() {
        let fx = fixture("10.1.0.0/16", TopologyKind::Nat);
        std::fs::write(&fx.config.forwarding_sysctl, "0\n").unwrap();

        let err = Sandbox::open_with_runner(fx.config.clone(), fx.runner.clone()).unwrap_err();
        assert!(matches!(err, SandboxError::Config(_)));
        assert!(fx.runner.lines().is_empty());
    }

    #[test]
    fn test_failed_spawn_keeps_namespaces_until_release() {
        let fx = fixture("10.1.0.0/16", TopologyKind::Nat);
        let mut sandbox = fx.open();
        let token = sandbox.token().to_string();
        fx.runner.fail_on("dev to_router up");

        assert!(spawn_true(&mut sandbox).is_err());
        assert_eq!(sandbox.namespaces().count(), 2);

        // The failed counter value is not reused
        fx.runner.clear_failures();
        let spawned = spawn_true(&mut sandbox).unwrap();
        assert_eq!(spawned.namespace, format!("{token}_process2"));

        fx.runner.clear();
        assert!(sandbox.release().is_clean());
        assert_eq!(
            fx.runner.lines(),
            [
                format!("ip netns delete {token}_process2"),
                format!("ip netns delete {token}_router2"),
                format!("ip netns delete {token}_process1"),
                format!("ip netns delete {token}_router1"),
                "iptables -D INPUT -p icmp -d 10.1.0.1/32 -j ACCEPT".to_string(),
                format!("ip link delete br-{token}"),
            ]
        );
    }

    #[test]
    fn test_release_is_idempotent_and_runs_on_drop() {
        let fx = fixture("10.1.0.0/16", TopologyKind::Nat);
        let mut sandbox = fx.open();
        spawn_true(&mut sandbox).unwrap();

        assert!(sandbox.release().is_clean());
        assert!(sandbox.is_released());
        assert_eq!(sandbox.gateway(), None);

        fx.runner.clear();
        assert!(sandbox.release().is_clean());
        drop(sandbox);
        assert!(fx.runner.lines().is_empty());

        let sandbox = fx.open();
        let bridge = sandbox.bridge_name();
        fx.runner.clear();
        drop(sandbox);
        assert_eq!(fx.runner.lines().last().unwrap(), &format!("ip link delete {bridge}"));
    }

    #[test]
    fn test_spawn_after_release_fails() {
        let fx = fixture("10.1.0.0/16", TopologyKind::Nat);
        let mut sandbox = fx.open();
        sandbox.release();
        assert!(matches!(
            spawn_true(&mut sandbox),
            Err(SandboxError::Released { .. })
        ));
    }

    #[test]
    fn test_teardown_failures_do_not_stop_release() {
        let fx = fixture("10.1.0.0/16", TopologyKind::Nat);
        let mut sandbox = fx.open();
        spawn_true(&mut sandbox).unwrap();
        fx.runner.fail_on("netns delete");

        let report = sandbox.release();
        assert_eq!(report.failures.len(), 2);
        assert!(
            fx.runner
                .lines()
                .last()
                .unwrap()
                .starts_with("ip link delete br-")
        );
    }

    #[test]
    fn test_exhaustion_touches_nothing() {
        // /30: gateway plus a single spawn
        let fx = fixture("10.9.0.0/30", TopologyKind::Nat);
        let mut sandbox = fx.open();
        spawn_true(&mut sandbox).unwrap();
        fx.runner.clear();

        let err = spawn_true(&mut sandbox).unwrap_err();
        assert!(matches!(err, SandboxError::AddressPoolExhausted { .. }));
        assert!(fx.runner.lines().is_empty());
        assert!(fx.runner.spawned().is_empty());
        assert_eq!(sandbox.namespaces().count(), 2);
    }

    #[test]
    fn test_local_session_forwards_subnet() {
        let fx = fixture("10.1.0.0/16", TopologyKind::Local);
        let mut sandbox = fx.open();
        assert!(
            fx.runner
                .lines()
                .contains(&"iptables -A FORWARD -s 10.1.0.0/16 -j ACCEPT".to_string())
        );

        let mapping = PortMapping::new().with(Protocol::Tcp, 8000, 8000);
        let mut spawned = sandbox
            .spawn(&SandboxCommand::new("true"), Some(&mapping))
            .unwrap();
        spawned.process.wait().unwrap();
        assert_eq!(spawned.address, Ipv4Addr::new(10, 1, 0, 2));
        assert_eq!(spawned.namespace, format!("{}_local1", sandbox.token()));
    }

    #[test]
    fn test_wan_emulation_reaches_router() {
        let mut fx = fixture("10.1.0.0/16", TopologyKind::Nat);
        fx.config.simulate_wan = true;
        let mut sandbox = fx.open();
        spawn_true(&mut sandbox).unwrap();

        let lines = fx.runner.lines();
        assert!(lines.iter().any(|l| l.ends_with("tc qdisc replace dev wan root netem delay 50ms 10ms loss 1%")));
        assert!(lines.iter().any(|l| l.ends_with("tc qdisc replace dev to_router root fq")));
    }
}
