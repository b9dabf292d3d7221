//! Host commands used to inspect what a sandbox session created.
//!
//! Everything runs with the same elevation netsandbox itself picks: as root
//! the tools are invoked directly, otherwise through non-interactive `sudo`.

use std::process::{Command, Output};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};

/// How host tools are invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Elevation {
    Root,
    Sudo,
}

impl Elevation {
    pub fn current() -> Self {
        if nix::unistd::geteuid().is_root() {
            Elevation::Root
        } else {
            Elevation::Sudo
        }
    }

    /// Build the command for `argv`, prefixed with `sudo -n` when needed.
    pub fn command(self, argv: &[&str]) -> Command {
        let (program, rest) = match (self, argv) {
            (Elevation::Root, [program, rest @ ..]) => (*program, rest),
            _ => ("sudo", argv),
        };
        let mut cmd = Command::new(program);
        if self == Elevation::Sudo {
            cmd.arg("-n");
        }
        cmd.args(rest);
        cmd
    }
}

/// Run `argv` on the host with the current [`Elevation`].
pub fn host(argv: &[&str]) -> Result<Output> {
    Elevation::current()
        .command(argv)
        .output()
        .with_context(|| format!("run {}", argv.join(" ")))
}

/// [`host`], bailing with trimmed stderr on a non-zero exit.
pub fn host_checked(argv: &[&str]) -> Result<Output> {
    let output = host(argv)?;
    if !output.status.success() {
        bail!(
            "command failed: {}\n{}",
            argv.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(output)
}

/// Run a command inside namespace `ns`, without checking its exit status.
pub fn ns_exec(ns: &str, cmd: &str, args: &[&str]) -> Result<Output> {
    let mut argv = vec!["ip", "netns", "exec", ns, cmd];
    argv.extend_from_slice(args);
    host(&argv).with_context(|| format!("exec '{cmd}' in ns '{ns}'"))
}

/// Whether a host network device named `name` exists.
pub fn link_exists(name: &str) -> bool {
    host(&["ip", "link", "show", "dev", name]).is_ok_and(|o| o.status.success())
}

/// Whether a named network namespace exists.
pub fn netns_exists(name: &str) -> Result<bool> {
    let out = host_checked(&["ip", "netns", "list"])?;
    Ok(String::from_utf8_lossy(&out.stdout)
        .lines()
        .any(|line| line.split_whitespace().next() == Some(name)))
}

/// Whether headerless `ss -l` output lists a socket bound to `port`.
///
/// The fourth column is the local address (`0.0.0.0:80`, `[::]:80`,
/// `*:80`, `10.0.0.2%eth0:80`); only its trailing port is compared.
pub fn listens_on(ss_output: &str, port: u16) -> bool {
    ss_output.lines().any(|line| {
        line.split_whitespace()
            .nth(3)
            .and_then(|local| local.rsplit_once(':'))
            .and_then(|(_, p)| p.parse::<u16>().ok())
            == Some(port)
    })
}

/// Poll `ss` inside `ns` until a TCP listener on `port` appears.
pub fn wait_for_tcp_listener(ns: &str, port: u16, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let out = ns_exec(ns, "ss", &["-Hltn"])?;
        let stdout = String::from_utf8_lossy(&out.stdout);
        if listens_on(&stdout, port) {
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!("no TCP listener on port {port} in ns {ns} after {timeout:?}, ss -Hltn:\n{stdout}");
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(cmd: &Command) -> Vec<String> {
        std::iter::once(cmd.get_program())
            .chain(cmd.get_args())
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_elevation_command() {
        let argv_of = |e: Elevation| argv(&e.command(&["ip", "netns", "list"]));
        assert_eq!(argv_of(Elevation::Root), ["ip", "netns", "list"]);
        assert_eq!(argv_of(Elevation::Sudo), ["sudo", "-n", "ip", "netns", "list"]);
    }

    #[test]
    fn test_listens_on_tcp() {
        let ss = "\
LISTEN 0      128          0.0.0.0:8080       0.0.0.0:*
LISTEN 0      4096            [::]:22            [::]:*
LISTEN 0      5       10.0.0.2%eth0:9000       0.0.0.0:*
";
        assert!(listens_on(ss, 8080));
        assert!(listens_on(ss, 22));
        assert!(listens_on(ss, 9000));
        // Peer column and prefixes of a bound port do not count
        assert!(!listens_on(ss, 80));
        assert!(!listens_on(ss, 0));
    }

    #[test]
    fn test_listens_on_wildcard_address() {
        let ss = "UNCONN 0      0                *:5353             *:*\n";
        assert!(listens_on(ss, 5353));
        assert!(!listens_on("", 5353));
    }
}
