//! IPv4 subnet descriptors and the monotonic per-subnet address allocator.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::{Result, SimError};

/// An IPv4 network given as base address plus prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subnet {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl Subnet {
    pub fn from_prefix(network: Ipv4Addr, prefix_len: u8) -> Result<Self> {
        if prefix_len > 32 {
            return Err(SimError::config(format!(
                "prefix length {prefix_len} exceeds 32"
            )));
        }
        let subnet = Subnet {
            network,
            prefix_len,
        };
        if u32::from(network) & !subnet.mask_bits() != 0 {
            return Err(SimError::config(format!(
                "{network} has host bits set for /{prefix_len}"
            )));
        }
        Ok(subnet)
    }

    /// Builds a subnet from a dotted mask such as `255.255.255.0`.
    pub fn with_mask(network: Ipv4Addr, mask: Ipv4Addr) -> Result<Self> {
        let bits = u32::from(mask);
        let prefix_len = bits.leading_ones();
        if bits.checked_shl(prefix_len).unwrap_or(0) != 0 {
            return Err(SimError::config(format!("{mask} is not a contiguous mask")));
        }
        Self::from_prefix(network, prefix_len as u8)
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn mask(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.mask_bits())
    }

    fn mask_bits(&self) -> u32 {
        u32::MAX.checked_shl(32 - self.prefix_len as u32).unwrap_or(0)
    }

    fn broadcast_bits(&self) -> u32 {
        u32::from(self.network) | !self.mask_bits()
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & self.mask_bits() == u32::from(self.network)
    }

    pub fn overlaps(&self, other: &Subnet) -> bool {
        self.contains(other.network) || other.contains(self.network)
    }

    /// Number of assignable host addresses. /31 and /32 have no reserved
    /// network or broadcast address.
    pub fn host_capacity(&self) -> u32 {
        match self.prefix_len {
            32 => 1,
            31 => 2,
            p => ((1u64 << (32 - p)) - 2) as u32,
        }
    }

    fn first_host_bits(&self) -> u32 {
        if self.prefix_len >= 31 {
            u32::from(self.network)
        } else {
            u32::from(self.network) + 1
        }
    }

    fn last_host_bits(&self) -> u32 {
        if self.prefix_len >= 31 {
            self.broadcast_bits()
        } else {
            self.broadcast_bits() - 1
        }
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

impl FromStr for Subnet {
    type Err = SimError;

    /// Accepts `10.1.1.0/24` or `10.1.1.0/255.255.255.0`.
    fn from_str(s: &str) -> Result<Self> {
        let (net, suffix) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| SimError::config(format!("subnet '{s}' is missing a prefix")))?;
        let network: Ipv4Addr = net
            .parse()
            .map_err(|e| SimError::config(format!("invalid network '{net}': {e}")))?;
        if suffix.contains('.') {
            let mask: Ipv4Addr = suffix
                .parse()
                .map_err(|e| SimError::config(format!("invalid mask '{suffix}': {e}")))?;
            Subnet::with_mask(network, mask)
        } else {
            let prefix_len: u8 = suffix
                .parse()
                .map_err(|e| SimError::config(format!("invalid prefix '{suffix}': {e}")))?;
            Subnet::from_prefix(network, prefix_len)
        }
    }
}

/// Hands out host addresses from one subnet in ascending order.
#[derive(Debug, Clone)]
pub struct AddressAllocator {
    subnet: Subnet,
    next: u64,
}

impl AddressAllocator {
    pub fn new(subnet: Subnet) -> Self {
        Self {
            next: subnet.first_host_bits() as u64,
            subnet,
        }
    }

    pub fn allocate(&mut self) -> Result<Ipv4Addr> {
        if self.next > self.subnet.last_host_bits() as u64 {
            return Err(SimError::config(format!(
                "subnet {} exhausted after {} addresses",
                self.subnet,
                self.subnet.host_capacity()
            )));
        }
        let addr = Ipv4Addr::from(self.next as u32);
        self.next += 1;
        Ok(addr)
    }

    /// Allocates `count` consecutive addresses.
    pub fn assign(&mut self, count: usize) -> Result<Vec<Ipv4Addr>> {
        (0..count).map(|_| self.allocate()).collect()
    }
}

/// The two disjoint address blocks of a run, one per link kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressPlan {
    pub wireless: Subnet,
    pub tunnel: Subnet,
}

impl AddressPlan {
    pub fn new(wireless: Subnet, tunnel: Subnet) -> Result<Self> {
        if wireless.overlaps(&tunnel) {
            return Err(SimError::config(format!(
                "wireless subnet {wireless} overlaps tunnel subnet {tunnel}"
            )));
        }
        Ok(Self { wireless, tunnel })
    }
}

impl Default for AddressPlan {
    fn default() -> Self {
        Self {
            wireless: Subnet {
                network: Ipv4Addr::new(10, 1, 1, 0),
                prefix_len: 24,
            },
            tunnel: Subnet {
                network: Ipv4Addr::new(10, 1, 2, 0),
                prefix_len: 24,
            },
        }
    }
}
