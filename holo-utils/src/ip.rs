//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

// Address Family identifier.
//
// IANA registry:
// http://www.iana.org/assignments/address-family-numbers
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    Ipv4 = 1,
    Ipv6 = 2,
}

// Container for storing separate values for IPv4 and IPv6.
#[derive(Clone, Debug, Default)]
#[derive(Deserialize, Serialize)]
pub struct AddressFamilies<T> {
    pub ipv4: T,
    pub ipv6: T,
}

// Extension methods for IpAddr.
pub trait IpAddrExt {
    // Returns the address family of this address.
    fn address_family(&self) -> AddressFamily;

    // Returns an unspecified address of the given address family.
    fn unspecified(af: AddressFamily) -> IpAddr;
}

// Extension methods for IpNetwork.
pub trait IpNetworkExt {
    // Apply mask to prefix.
    #[must_use]
    fn apply_mask(&self) -> IpNetwork;

    // Returns the address family of this network.
    fn address_family(&self) -> AddressFamily;

    // Returns true if `other` is a more specific prefix covered by this one.
    fn covers(&self, other: &IpNetwork) -> bool;
}

// Extension methods for Ipv6Network.
pub trait Ipv6NetworkExt {
    const MAX_PREFIXLEN: u8;

    // Apply mask to prefix.
    #[must_use]
    fn apply_mask(&self) -> Ipv6Network;

    // Returns true if `other` is equal to or more specific than this prefix.
    fn contains_prefix(&self, other: &Ipv6Network) -> bool;
}

// ===== impl AddressFamily =====

impl AddressFamily {
    pub fn addr_len(&self) -> usize {
        match self {
            AddressFamily::Ipv4 => 4,
            AddressFamily::Ipv6 => 16,
        }
    }
}

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressFamily::Ipv4 => write!(f, "IPv4"),
            AddressFamily::Ipv6 => write!(f, "IPv6"),
        }
    }
}

// ===== impl AddressFamilies =====

impl<T> AddressFamilies<T> {
    // Returns a reference to the value corresponding to the given address
    // family.
    pub fn get(&self, af: AddressFamily) -> &T {
        match af {
            AddressFamily::Ipv4 => &self.ipv4,
            AddressFamily::Ipv6 => &self.ipv6,
        }
    }

    // Returns a mutable reference to the value corresponding to the given
    // address family.
    pub fn get_mut(&mut self, af: AddressFamily) -> &mut T {
        match af {
            AddressFamily::Ipv4 => &mut self.ipv4,
            AddressFamily::Ipv6 => &mut self.ipv6,
        }
    }

    // Returns an iterator over immutable references to all address family
    // values.
    pub fn iter(&self) -> impl Iterator<Item = (AddressFamily, &T)> {
        [
            (AddressFamily::Ipv4, &self.ipv4),
            (AddressFamily::Ipv6, &self.ipv6),
        ]
        .into_iter()
    }
}

// ===== impl IpAddr =====

impl IpAddrExt for IpAddr {
    fn address_family(&self) -> AddressFamily {
        match self {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    fn unspecified(af: AddressFamily) -> IpAddr {
        match af {
            AddressFamily::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            AddressFamily::Ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }
}

// ===== impl IpNetwork =====

impl IpNetworkExt for IpNetwork {
    fn apply_mask(&self) -> IpNetwork {
        match self {
            IpNetwork::V4(prefix) => IpNetwork::V4(
                // The network address always fits the original length.
                Ipv4Network::new(prefix.network(), prefix.prefix())
                    .unwrap_or(*prefix),
            ),
            IpNetwork::V6(prefix) => {
                IpNetwork::V6(Ipv6NetworkExt::apply_mask(prefix))
            }
        }
    }

    fn address_family(&self) -> AddressFamily {
        match self {
            IpNetwork::V4(_) => AddressFamily::Ipv4,
            IpNetwork::V6(_) => AddressFamily::Ipv6,
        }
    }

    fn covers(&self, other: &IpNetwork) -> bool {
        self.address_family() == other.address_family()
            && self.prefix() < other.prefix()
            && self.contains(other.ip())
    }
}

// ===== impl Ipv6Network =====

impl Ipv6NetworkExt for Ipv6Network {
    const MAX_PREFIXLEN: u8 = 128;

    fn apply_mask(&self) -> Ipv6Network {
        // The network address always fits the original prefix length.
        Ipv6Network::new(self.network(), self.prefix()).unwrap_or(*self)
    }

    fn contains_prefix(&self, other: &Ipv6Network) -> bool {
        other.prefix() >= self.prefix() && self.contains(other.ip())
    }
}
