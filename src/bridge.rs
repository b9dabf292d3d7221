//! The per-session bridge that every topology attaches to.

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use tracing::{debug, info, warn};

use crate::command::{CommandRunner, run_checked};
use crate::error::{SandboxResult, TeardownFailure, TeardownReport};
use crate::port_mapping::Protocol;
use crate::step::{Chain, FilterRule, Step, Table, Target, host};

/// Bridge device name for a session token (within the 15-char netdev limit).
pub fn bridge_name(token: &str) -> String {
    format!("br-{token}")
}

/// Host-side filter rules installed with the bridge.
///
/// `forward_subnet` additionally accepts forwarded traffic from the
/// session subnet, which lets bridged peers reach each other.
pub fn base_rules(gateway: Ipv4Addr, forward_subnet: Option<Ipv4Network>) -> Vec<FilterRule> {
    let mut rules = vec![
        FilterRule::new(Table::Filter, Chain::Input, Target::Accept)
            .protocol(Protocol::Icmp)
            .destination(host(gateway)),
    ];
    if let Some(subnet) = forward_subnet {
        rules.push(FilterRule::new(Table::Filter, Chain::Forward, Target::Accept).source(subnet));
    }
    rules
}

/// Virtual switch owned by one session, carrying the gateway address.
#[derive(Debug)]
pub struct BridgeUplink {
    name: String,
    gateway: Ipv4Addr,
    prefix: u8,
    rules: Vec<FilterRule>,
}

impl BridgeUplink {
    /// Create the bridge, bring it up, assign the gateway and install `rules`.
    ///
    /// On failure, whatever was already created is removed before the
    /// error is returned; the caller has nothing to clean up.
    pub fn create<R: CommandRunner + ?Sized>(
        runner: &R,
        name: String,
        gateway: Ipv4Addr,
        prefix: u8,
        rules: Vec<FilterRule>,
    ) -> SandboxResult<Self> {
        run_checked(runner, &Step::AddBridge { name: name.clone() }.invocation())?;

        let mut bridge = Self {
            name,
            gateway,
            prefix,
            rules: Vec::with_capacity(rules.len()),
        };

        if let Err(err) = bridge.configure(runner, rules) {
            warn!(bridge = %bridge.name, error = %err, "bridge setup failed, removing it");
            let _ = bridge.release(runner);
            return Err(err);
        }

        info!(bridge = %bridge.name, gateway = %gateway, "created bridge");
        Ok(bridge)
    }

    fn configure<R: CommandRunner + ?Sized>(
        &mut self,
        runner: &R,
        rules: Vec<FilterRule>,
    ) -> SandboxResult<()> {
        run_checked(runner, &Step::link_up(&self.name).invocation())?;
        run_checked(
            runner,
            &Step::address(&self.name, self.gateway, self.prefix).invocation(),
        )?;

        for rule in rules {
            run_checked(runner, &Step::AppendRule(rule.clone()).invocation())?;
            // Only rules that were actually installed are deleted on release
            self.rules.push(rule);
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn gateway(&self) -> Ipv4Addr {
        self.gateway
    }

    /// Enslave a host-side link to the bridge.
    pub fn attach_port<R: CommandRunner + ?Sized>(&self, runner: &R, link: &str) -> SandboxResult<()> {
        run_checked(
            runner,
            &Step::SetMaster {
                dev: link.to_string(),
                master: self.name.clone(),
            }
            .invocation(),
        )?;
        debug!(bridge = %self.name, link, "attached bridge port");
        Ok(())
    }

    /// Remove the base rules and the bridge device. Best-effort: every
    /// removal is attempted and failures are collected.
    pub fn release<R: CommandRunner + ?Sized>(self, runner: &R) -> TeardownReport {
        let mut report = TeardownReport::default();

        for rule in self.rules.iter().rev() {
            let step = Step::DeleteRule(rule.clone());
            report.record(attempt(runner, &step, || format!("filter rule on {}", self.name)));
        }

        let step = Step::DeleteLink {
            name: self.name.clone(),
        };
        report.record(attempt(runner, &step, || format!("bridge {}", self.name)));

        debug!(bridge = %self.name, failures = report.failures.len(), "released bridge");
        report
    }
}

fn attempt<R: CommandRunner + ?Sized>(
    runner: &R,
    step: &Step,
    resource: impl FnOnce() -> String,
) -> Option<TeardownFailure> {
    let error = run_checked(runner, &step.invocation()).err()?;
    let resource = resource();
    warn!(%resource, %error, "teardown step failed");
    Some(TeardownFailure { resource, error })
}
