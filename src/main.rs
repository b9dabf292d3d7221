use std::net::Ipv4Addr;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::Parser;
use netsandbox::signals::SignalForwarder;
use netsandbox::{
    PortMapping, PortMappingRule, Sandbox, SandboxCommand, SessionConfig, TopologyKind,
};
use serde::Serialize;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "netsandbox",
    author,
    version,
    about = "Run a command inside an isolated, NAT'd network namespace",
    override_usage = "netsandbox [OPTIONS] -- COMMAND [ARGS]..."
)]
struct Cli {
    /// Session subnet the gateway and external addresses are drawn from
    #[arg(long, default_value = netsandbox::config::DEFAULT_SUBNET)]
    subnet: String,

    /// Emulate a lossy, delayed WAN link on the sandbox uplink
    #[arg(long)]
    simulate_wan: bool,

    /// Topology to build: nat (default) or local
    #[arg(long, value_enum, default_value = "nat")]
    topology: TopologyKind,

    /// Publish a port on the router address, as proto:external[:internal]
    /// (NAT topology only)
    #[arg(short = 'p', long = "publish", value_name = "PROTO:EXT[:INT]")]
    publish: Vec<PortMappingRule>,

    /// Print the spawn result as JSON
    #[arg(long)]
    json: bool,

    /// Command to run inside the sandbox
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

#[derive(Serialize)]
struct SpawnReport<'a> {
    token: &'a str,
    topology: String,
    address: Ipv4Addr,
    namespace: &'a str,
    pid: u32,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let args = Cli::parse();

    let Some(command) = SandboxCommand::from_argv(args.command) else {
        bail!("no command given");
    };
    let mapping: PortMapping = args.publish.into_iter().collect();

    let config = SessionConfig {
        simulate_wan: args.simulate_wan,
        ..SessionConfig::default()
    }
    .with_subnet(args.subnet)
    .with_topology(args.topology);

    // Installed before any resource exists so Ctrl-C can never skip release
    let signals = SignalForwarder::install().context("failed to install signal handlers")?;

    let mut sandbox = Sandbox::open(config).context("failed to open sandbox session")?;
    if let Some(signal) = signals.take() {
        warn!(%signal, "interrupted before spawn");
        release(&mut sandbox);
        return Ok(ExitCode::from(128 + signal as u8));
    }
    let mut spawned = sandbox
        .spawn(&command, (!mapping.is_empty()).then_some(&mapping))
        .with_context(|| format!("failed to spawn {}", command.program()))?;

    let report = SpawnReport {
        token: sandbox.token(),
        topology: sandbox.topology().to_string(),
        address: spawned.address,
        namespace: &spawned.namespace,
        pid: spawned.process.id(),
    };
    if args.json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        println!("{}", report.address);
    }

    let status = signals
        .supervise(&mut spawned.process)
        .with_context(|| format!("failed to wait for {}", spawned.process.label()))?;

    release(&mut sandbox);

    // Signal deaths map to 128+N like a shell would report them
    let code = status.code().unwrap_or_else(|| {
        use std::os::unix::process::ExitStatusExt;
        128 + status.signal().unwrap_or(0)
    });
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}

fn release(sandbox: &mut Sandbox) {
    let teardown = sandbox.release();
    for failure in &teardown.failures {
        warn!(%failure, "leftover resource");
    }
}
