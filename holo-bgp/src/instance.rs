//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bitflags::bitflags;
use holo_utils::bgp::{ExtComm, RouteDistinguisher};
use holo_utils::ip::{AddressFamilies, AddressFamily, IpNetworkExt};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::packet::consts::Safi;
use crate::rib::{RoutingTable, TableKey};

pub type InstanceId = generational_arena::Index;

// BGP instance. The default instance also holds the SRv6-VPN tables.
#[derive(Debug)]
pub struct Instance {
    pub name: String,
    pub inst_type: InstanceType,
    // `None` while the VRF is not known to the system.
    pub vrf_id: Option<u32>,
    pub table_id: u32,
    pub asn: u32,
    pub router_id: Option<Ipv4Addr>,
    pub vpn_policy: AddressFamilies<VpnPolicy>,
    pub unicast: AddressFamilies<RoutingTable>,
    pub vpn: AddressFamilies<BTreeMap<RouteDistinguisher, RoutingTable>>,
    pub aggregates: AddressFamilies<BTreeMap<IpNetwork, Aggregate>>,
    pub nht: BTreeMap<IpAddr, Option<u32>>,
    // Number of leaked routes elsewhere that still reference this instance
    // as their origin.
    pub refcount: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceType {
    Default,
    Vrf,
    View,
}

// Per-address-family VPN leaking policy of a VRF.
#[derive(Clone, Debug, Default)]
pub struct VpnPolicy {
    pub flags: VpnPolicyFlags,
    pub rtlist_tovpn: BTreeSet<ExtComm>,
    pub rtlist_fromvpn: BTreeSet<ExtComm>,
    pub rmap_tovpn: Option<String>,
    pub rmap_fromvpn: Option<String>,
    pub rd: Option<RouteDistinguisher>,
    pub nexthop: Option<IpAddr>,
    pub tovpn_sid: Option<Ipv6Addr>,
    pub sid_auto: bool,
    pub sid_locator: Option<String>,
    // Per-VRF SID currently bound in the forwarding plane.
    pub tovpn_sid_last_sent: Option<Ipv6Addr>,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct VpnPolicyFlags: u8 {
        const EXPORT = 0x01;
        const IMPORT = 0x02;
        const VRF_TO_VRF_EXPORT = 0x04;
        const VRF_TO_VRF_IMPORT = 0x08;
    }
}

// Aggregate address, counting the more-specific routes it covers.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Aggregate {
    pub count: u32,
}

// ===== impl Instance =====

impl Instance {
    pub(crate) fn new(
        name: String,
        inst_type: InstanceType,
        vrf_id: Option<u32>,
        table_id: u32,
        asn: u32,
        router_id: Option<Ipv4Addr>,
    ) -> Instance {
        Instance {
            name,
            inst_type,
            vrf_id,
            table_id,
            asn,
            router_id,
            vpn_policy: Default::default(),
            unicast: Default::default(),
            vpn: Default::default(),
            aggregates: Default::default(),
            nht: Default::default(),
            refcount: 0,
        }
    }

    pub fn is_vrf_or_default(&self) -> bool {
        matches!(self.inst_type, InstanceType::Vrf | InstanceType::Default)
    }

    pub(crate) fn table(&self, key: &TableKey) -> Option<&RoutingTable> {
        match key.safi {
            Safi::Unicast => Some(self.unicast.get(key.af)),
            Safi::LabeledVpn => self.vpn.get(key.af).get(key.rd.as_ref()?),
            Safi::Evpn => None,
        }
    }

    // Returns the routing table for the given key, creating per-RD tables
    // on demand.
    pub(crate) fn table_mut(
        &mut self,
        key: &TableKey,
    ) -> Option<&mut RoutingTable> {
        match key.safi {
            Safi::Unicast => Some(self.unicast.get_mut(key.af)),
            Safi::LabeledVpn => {
                Some(self.vpn.get_mut(key.af).entry(key.rd?).or_default())
            }
            Safi::Evpn => None,
        }
    }

    // Returns the reachability of a tracked nexthop. Untracked nexthops are
    // assumed reachable.
    pub(crate) fn nexthop_reachable(&self, addr: &IpAddr) -> bool {
        self.nht.get(addr).is_none_or(|metric| metric.is_some())
    }

    pub(crate) fn aggregate_update(
        &mut self,
        prefix: &IpNetwork,
        af: AddressFamily,
        increment: bool,
    ) {
        for (aggr_prefix, aggregate) in self.aggregates.get_mut(af) {
            if !aggr_prefix.covers(prefix) {
                continue;
            }
            if increment {
                aggregate.count += 1;
            } else {
                aggregate.count = aggregate.count.saturating_sub(1);
            }
        }
    }
}

// ===== impl VpnPolicy =====

impl VpnPolicy {
    pub fn export(&self) -> bool {
        self.flags.contains(VpnPolicyFlags::EXPORT)
    }

    pub fn import(&self) -> bool {
        self.flags.contains(VpnPolicyFlags::IMPORT)
    }

    pub fn vrf_to_vrf_export(&self) -> bool {
        self.flags.contains(VpnPolicyFlags::VRF_TO_VRF_EXPORT)
    }

    pub fn vrf_to_vrf_import(&self) -> bool {
        self.flags.contains(VpnPolicyFlags::VRF_TO_VRF_IMPORT)
    }
}
