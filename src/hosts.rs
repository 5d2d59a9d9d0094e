// Copyright (c) The fdmux Authors.
// Licensed under the MIT license.

//! The synthetic host address table.
//!
//! Name resolution never consults a real resolver: every name handed to
//! [`HostTable::resolve`] is assigned the next address from a private range
//! and remembered, so the same name always resolves to the same address and
//! an address handed back to `connect` can be mapped to the name it stands
//! for.

use alloc::string::String;
use core::fmt;

use hashbrown::HashMap;

/// An IPv4 address in host byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostAddr(pub u32);

/// The loopback address, seeded under the name `localhost`.
pub const LOOPBACK: HostAddr = HostAddr(0x7F00_0001);

/// The first address handed out for a name the table has not seen before.
/// Subsequent names get consecutive addresses.
pub const FIRST_SYNTHETIC_ADDR: HostAddr = HostAddr(0x0A00_0002);

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0.to_be_bytes();
        write!(f, "{a}.{b}.{c}.{d}")
    }
}

/// A bidirectional name/address map with synthetic address assignment.
pub struct HostTable {
    by_name: HashMap<String, HostAddr>,
    by_addr: HashMap<HostAddr, String>,
    next_synthetic: u32,
}

impl HostTable {
    /// An empty table with `localhost` pre-seeded.
    pub fn new() -> Self {
        let mut table = Self {
            by_name: HashMap::new(),
            by_addr: HashMap::new(),
            next_synthetic: FIRST_SYNTHETIC_ADDR.0,
        };
        table.add(String::from("localhost"), LOOPBACK);
        table
    }

    /// Record an explicit name/address pair.
    ///
    /// Later entries win on conflicts, in both directions.
    pub fn add(&mut self, name: String, addr: HostAddr) {
        self.by_name.insert(name.clone(), addr);
        self.by_addr.insert(addr, name);
    }

    /// The address for `name`, assigning a fresh synthetic one on first
    /// sight.
    pub fn resolve(&mut self, name: &str) -> HostAddr {
        if let Some(addr) = self.by_name.get(name) {
            return *addr;
        }
        let addr = HostAddr(self.next_synthetic);
        self.next_synthetic = self.next_synthetic.wrapping_add(1);
        self.add(String::from(name), addr);
        addr
    }

    /// The name `addr` was assigned for, if any.
    pub fn reverse(&self, addr: HostAddr) -> Option<&str> {
        self.by_addr.get(&addr).map(String::as_str)
    }
}

impl Default for HostTable {
    fn default() -> Self {
        Self::new()
    }
}
