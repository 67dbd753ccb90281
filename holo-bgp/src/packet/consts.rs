//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use bitflags::bitflags;
use holo_utils::ip::AddressFamily;
use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

// Minimum prefix length of a VPN NLRI (label + route distinguisher).
pub const VPN_NLRI_MIN_PLEN: u8 = 88;
pub const LABEL_LEN: usize = 3;
pub const RD_LEN: usize = 8;

// Address Family Identifiers (AFI).
//
// IANA registry:
// https://www.iana.org/assignments/address-family-numbers/address-family-numbers.xhtml
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum Afi {
    Ipv4 = 1,
    Ipv6 = 2,
}

// Subsequent Address Family Identifiers (SAFI).
//
// IANA registry:
// https://www.iana.org/assignments/safi-namespace/safi-namespace.xhtml
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum Safi {
    Unicast = 1,
    // RFC 7432
    Evpn = 70,
    // RFC 4364, carried over SRv6 as per RFC 9252
    LabeledVpn = 128,
}

// BGP Path Attribute Flags.
bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct AttrFlags: u8 {
        const OPTIONAL = 0x80;
        const TRANSITIVE = 0x40;
        const PARTIAL = 0x20;
        const EXTENDED = 0x10;
    }
}

// BGP Path Attribute Types.
//
// IANA registry:
// https://www.iana.org/assignments/bgp-parameters/bgp-parameters.xhtml#bgp-parameters-2
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum AttrType {
    // RFC 4360
    ExtCommunities = 16,
    // RFC 8669
    PrefixSid = 40,
}

// BGP Prefix-SID TLV Types.
//
// IANA registry:
// https://www.iana.org/assignments/bgp-parameters/bgp-parameters.xhtml#bgp-prefix-sid-tlv-types
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum PrefixSidTlvType {
    // RFC 9252
    Srv6L3Service = 5,
    Srv6L2Service = 6,
}

// SRv6 Service Sub-TLV Types.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum Srv6ServiceSubTlvType {
    SidInformation = 1,
}

// SRv6 Endpoint Behaviors.
//
// IANA registry:
// https://www.iana.org/assignments/segment-routing/segment-routing.xhtml#srv6-endpoint-behaviors
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum Srv6EndpointBehavior {
    EndDt6 = 0x0012,
    EndDt4 = 0x0013,
    EndDt46 = 0x0014,
    Opaque = 0xFFFF,
}

// ===== impl Afi =====

impl From<AddressFamily> for Afi {
    fn from(af: AddressFamily) -> Afi {
        match af {
            AddressFamily::Ipv4 => Afi::Ipv4,
            AddressFamily::Ipv6 => Afi::Ipv6,
        }
    }
}

impl From<Afi> for AddressFamily {
    fn from(afi: Afi) -> AddressFamily {
        match afi {
            Afi::Ipv4 => AddressFamily::Ipv4,
            Afi::Ipv6 => AddressFamily::Ipv6,
        }
    }
}

// ===== impl Srv6EndpointBehavior =====

impl Srv6EndpointBehavior {
    // Behavior advertised for per-VRF service SIDs.
    pub fn per_vrf(af: AddressFamily) -> Srv6EndpointBehavior {
        match af {
            AddressFamily::Ipv4 => Srv6EndpointBehavior::EndDt4,
            AddressFamily::Ipv6 => Srv6EndpointBehavior::EndDt6,
        }
    }
}
