//! Teardown integration tests: nothing outlives a session.

mod common;

use netsandbox::{SandboxCommand, TopologyKind};
use sandbox_probe::{link_exists, netns_exists};

#[test]
fn test_release_removes_everything() {
    if common::skip_without_deps(&[]) {
        return;
    }

    let mut sandbox = common::open("10.206.0.0/24", TopologyKind::Nat);
    let bridge = sandbox.bridge_name();
    let mut spawned = common::spawn_idle(&mut sandbox);
    let namespaces: Vec<String> = sandbox.namespaces().map(str::to_string).collect();
    assert_eq!(namespaces.len(), 2);
    assert!(link_exists(&bridge));

    common::stop(&mut spawned);
    assert!(sandbox.release().is_clean());
    assert!(sandbox.release().is_clean(), "second release must be a no-op");

    assert!(!link_exists(&bridge), "bridge {bridge} left behind");
    for ns in &namespaces {
        assert!(!netns_exists(ns).unwrap(), "namespace {ns} left behind");
    }
}

#[test]
fn test_drop_releases_after_failed_spawn() {
    if common::skip_without_deps(&[]) {
        return;
    }

    let mut sandbox = common::open("10.207.0.0/30", TopologyKind::Local);
    let bridge = sandbox.bridge_name();
    let mut first = common::spawn_idle(&mut sandbox);

    // A /30 has room for the gateway and one spawn
    assert!(
        sandbox
            .spawn(&SandboxCommand::new("true"), None)
            .is_err()
    );
    let namespaces: Vec<String> = sandbox.namespaces().map(str::to_string).collect();

    common::stop(&mut first);
    drop(sandbox);

    assert!(!link_exists(&bridge), "bridge {bridge} left behind");
    for ns in &namespaces {
        assert!(!netns_exists(ns).unwrap(), "namespace {ns} left behind");
    }
}
