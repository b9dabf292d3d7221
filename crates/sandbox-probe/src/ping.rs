//! `ping` from inside a namespace, summarised.

use anyhow::{Context, Result};
use tracing::debug;

use crate::exec::ns_exec;

/// Summary lines of one `ping` run.
#[derive(Debug, Clone, PartialEq)]
pub struct PingStats {
    pub transmitted: u32,
    pub received: u32,
    /// Absent when nothing came back.
    pub avg_rtt_ms: Option<f64>,
}

impl PingStats {
    pub fn loss_percent(&self) -> f64 {
        if self.transmitted == 0 {
            return 0.0;
        }
        100.0 * f64::from(self.transmitted - self.received) / f64::from(self.transmitted)
    }

    pub fn all_received(&self) -> bool {
        self.transmitted > 0 && self.received == self.transmitted
    }

    /// Parse the summary printed by iputils or busybox `ping`.
    pub fn parse(output: &str) -> Option<Self> {
        let counts = output.lines().find(|l| l.contains("packets transmitted"))?;
        let mut fields = counts.split(',').map(str::trim);
        let transmitted = leading_number(fields.next()?)?;
        let received = leading_number(fields.next()?)?;

        // rtt min/avg/max/mdev = 0.040/0.051/0.066/0.011 ms
        let avg_rtt_ms = output
            .lines()
            .find(|l| l.contains("min/avg/max"))
            .and_then(|l| l.split(" = ").nth(1))
            .and_then(|values| values.split('/').nth(1))
            .and_then(|avg| avg.trim().parse().ok());

        Some(Self {
            transmitted,
            received,
            avg_rtt_ms,
        })
    }
}

fn leading_number(field: &str) -> Option<u32> {
    field.split_whitespace().next()?.parse().ok()
}

/// Ping `target` `count` times from inside `ns`, `interval` seconds apart.
///
/// A non-zero exit (some or all replies lost) is not an error; the
/// returned stats say how many came back.
pub fn ping_from(ns: &str, target: &str, count: u32, interval: f32) -> Result<PingStats> {
    let count = count.to_string();
    let interval = interval.to_string();
    let out = ns_exec(ns, "ping", &["-n", "-c", &count, "-i", &interval, "-W", "1", target])?;
    let stdout = String::from_utf8_lossy(&out.stdout);
    debug!(ns, target, %stdout, "ping finished");

    PingStats::parse(&stdout).with_context(|| {
        format!(
            "unparsable ping output from ns {ns}:\n{stdout}\n{}",
            String::from_utf8_lossy(&out.stderr)
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const IPUTILS: &str = "\
PING 10.1.0.1 (10.1.0.1) 56(84) bytes of data.
64 bytes from 10.1.0.1: icmp_seq=1 ttl=63 time=0.066 ms
64 bytes from 10.1.0.1: icmp_seq=2 ttl=63 time=0.040 ms

--- 10.1.0.1 ping statistics ---
3 packets transmitted, 2 received, 33.3333% packet loss, time 2003ms
rtt min/avg/max/mdev = 0.040/0.053/0.066/0.013 ms
";

    const BUSYBOX: &str = "\
PING 10.1.0.1 (10.1.0.1): 56 data bytes
64 bytes from 10.1.0.1: seq=0 ttl=64 time=0.081 ms

--- 10.1.0.1 ping statistics ---
1 packets transmitted, 1 packets received, 0% packet loss
round-trip min/avg/max = 0.081/0.081/0.081 ms
";

    #[test]
    fn test_parse_iputils() {
        let stats = PingStats::parse(IPUTILS).unwrap();
        assert_eq!(stats.transmitted, 3);
        assert_eq!(stats.received, 2);
        assert_eq!(stats.avg_rtt_ms, Some(0.053));
        assert!(!stats.all_received());
        assert!((stats.loss_percent() - 33.333).abs() < 0.01);
    }

    #[test]
    fn test_parse_busybox() {
        let stats = PingStats::parse(BUSYBOX).unwrap();
        assert!(stats.all_received());
        assert_eq!(stats.avg_rtt_ms, Some(0.081));
    }

    #[test]
    fn test_parse_total_loss() {
        let out = "--- x ping statistics ---\n\
                   5 packets transmitted, 0 received, 100% packet loss, time 4090ms\n";
        let stats = PingStats::parse(out).unwrap();
        assert_eq!(stats.received, 0);
        assert_eq!(stats.avg_rtt_ms, None);
        assert_eq!(stats.loss_percent(), 100.0);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(PingStats::parse("connect: Network is unreachable").is_none());
    }
}
