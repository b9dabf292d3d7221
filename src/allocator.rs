//! Sequential address and name issuance for one session.

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;

use crate::error::{SandboxError, SandboxResult};

/// Issues host addresses of a subnet in ascending order, never repeating.
///
/// Single-writer: every issuing method takes `&mut self`.
#[derive(Debug, Clone)]
pub struct AddressAllocator {
    subnet: Ipv4Network,
    next: Option<u32>,
    last: u32,
}

impl AddressAllocator {
    pub fn new(subnet: Ipv4Network) -> Self {
        let network = u32::from(subnet.network());
        let broadcast = u32::from(subnet.broadcast());

        // /31 and /32 have no network/broadcast reservation
        let (first, last) = match subnet.prefix() {
            32 => (network, network),
            31 => (network, broadcast),
            _ => (network + 1, broadcast - 1),
        };

        Self {
            subnet,
            next: Some(first),
            last,
        }
    }

    pub fn subnet(&self) -> Ipv4Network {
        self.subnet
    }

    /// Issue the next unused host address.
    pub fn next_address(&mut self) -> SandboxResult<Ipv4Addr> {
        let current = self.next.ok_or_else(|| SandboxError::AddressPoolExhausted {
            subnet: self.subnet.to_string(),
        })?;

        self.next = (current < self.last).then(|| current + 1);
        Ok(Ipv4Addr::from(current))
    }

    /// Issue the next address together with the subnet prefix length.
    pub fn next_interface_address(&mut self) -> SandboxResult<(Ipv4Addr, u8)> {
        Ok((self.next_address()?, self.subnet.prefix()))
    }

    /// Number of host addresses not yet issued.
    pub fn remaining(&self) -> u64 {
        self.next
            .map_or(0, |next| u64::from(self.last) - u64::from(next) + 1)
    }
}

/// Monotonic spawn counter; the reserved value is embedded in resource names.
#[derive(Debug, Clone)]
pub struct SpawnCounter {
    next: u32,
}

impl Default for SpawnCounter {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl SpawnCounter {
    /// Reserve the next value. A reserved value is never handed out again,
    /// even when the spawn that reserved it fails.
    pub fn reserve(&mut self) -> u32 {
        let value = self.next;
        self.next += 1;
        value
    }

    /// The value the next `reserve` will return.
    pub fn peek(&self) -> u32 {
        self.next
    }
}
