//! Local topology integration tests: namespaces as bridge peers.

mod common;

use std::net::Ipv4Addr;

use netsandbox::TopologyKind;
use sandbox_probe::{ns_exec, ping_from};

#[test]
fn test_local_peers_share_the_bridge() {
    if common::skip_without_deps(&[]) {
        return;
    }

    let mut sandbox = common::open("10.205.0.0/24", TopologyKind::Local);
    let mut a = common::spawn_idle(&mut sandbox);
    let mut b = common::spawn_idle(&mut sandbox);
    assert_eq!(a.address, Ipv4Addr::new(10, 205, 0, 2));
    assert_eq!(b.address, Ipv4Addr::new(10, 205, 0, 3));

    // The namespace holds the pool address itself
    let out = ns_exec(&a.namespace, "ip", &["-4", "addr", "show", "dev", "eth0"]).unwrap();
    assert!(String::from_utf8_lossy(&out.stdout).contains("10.205.0.2/24"));

    let peer = b.address.to_string();
    for target in ["10.205.0.1", peer.as_str()] {
        let stats = ping_from(&a.namespace, target, 2, 0.2).expect("ping");
        assert!(stats.received > 0, "{target} unreachable: {stats:?}");
    }

    common::stop(&mut a);
    common::stop(&mut b);
    assert!(sandbox.release().is_clean());
}
