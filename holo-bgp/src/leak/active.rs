//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use holo_utils::ip::AddressFamily;

use crate::instance::Instance;
use crate::policy::RouteMap;

// Reason why route leaking between a VRF and the VPN is inactive.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LeakInactiveReason {
    SourceNotVrfOrDefault,
    ExportNotSet,
    RtListToVpnUndefined,
    RdUndefined,
    RouteMapToVpnUndefined,
    AutoSidNotAllocated,
    DestinationNotVrfOrDefault,
    DestinationVrfUnknown,
    ImportNotSet,
    RtListFromVpnUndefined,
    RouteMapFromVpnUndefined,
}

// ===== impl LeakInactiveReason =====

impl std::fmt::Display for LeakInactiveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeakInactiveReason::SourceNotVrfOrDefault => {
                write!(f, "source bgp instance neither vrf nor default")
            }
            LeakInactiveReason::ExportNotSet => {
                write!(f, "export not set")
            }
            LeakInactiveReason::RtListToVpnUndefined => {
                write!(f, "rtlist tovpn not defined")
            }
            LeakInactiveReason::RdUndefined => {
                write!(f, "rd not defined")
            }
            LeakInactiveReason::RouteMapToVpnUndefined => {
                write!(f, "route-map tovpn named but not defined")
            }
            LeakInactiveReason::AutoSidNotAllocated => {
                write!(f, "auto sid not allocated")
            }
            LeakInactiveReason::DestinationNotVrfOrDefault => {
                write!(f, "destination bgp instance neither vrf nor default")
            }
            LeakInactiveReason::DestinationVrfUnknown => {
                write!(f, "destination bgp instance vrf is VRF_UNKNOWN")
            }
            LeakInactiveReason::ImportNotSet => {
                write!(f, "import not set")
            }
            LeakInactiveReason::RtListFromVpnUndefined => {
                write!(f, "rtlist fromvpn not defined")
            }
            LeakInactiveReason::RouteMapFromVpnUndefined => {
                write!(f, "route-map fromvpn named but not defined")
            }
        }
    }
}

// ===== global functions =====

// Checks whether routes of the given VRF can be exported to the VPN.
pub fn to_vpn_active(
    vrf: &Instance,
    af: AddressFamily,
    route_maps: &BTreeMap<String, RouteMap>,
) -> Result<(), LeakInactiveReason> {
    let policy = vrf.vpn_policy.get(af);

    if !vrf.is_vrf_or_default() {
        return Err(LeakInactiveReason::SourceNotVrfOrDefault);
    }
    if !policy.export() && !policy.vrf_to_vrf_export() {
        return Err(LeakInactiveReason::ExportNotSet);
    }
    if policy.rtlist_tovpn.is_empty() {
        return Err(LeakInactiveReason::RtListToVpnUndefined);
    }
    if policy.rd.is_none() {
        return Err(LeakInactiveReason::RdUndefined);
    }
    if let Some(name) = &policy.rmap_tovpn
        && !route_maps.contains_key(name)
    {
        return Err(LeakInactiveReason::RouteMapToVpnUndefined);
    }
    if policy.sid_auto
        && policy.tovpn_sid.is_none_or(|sid| sid.is_unspecified())
    {
        return Err(LeakInactiveReason::AutoSidNotAllocated);
    }

    Ok(())
}

// Checks whether VPN routes can be imported into the given VRF.
pub fn from_vpn_active(
    vrf: &Instance,
    af: AddressFamily,
    route_maps: &BTreeMap<String, RouteMap>,
) -> Result<(), LeakInactiveReason> {
    let policy = vrf.vpn_policy.get(af);

    if !vrf.is_vrf_or_default() {
        return Err(LeakInactiveReason::DestinationNotVrfOrDefault);
    }
    if vrf.vrf_id.is_none() {
        return Err(LeakInactiveReason::DestinationVrfUnknown);
    }
    if !policy.import() && !policy.vrf_to_vrf_import() {
        return Err(LeakInactiveReason::ImportNotSet);
    }
    if policy.rtlist_fromvpn.is_empty() {
        return Err(LeakInactiveReason::RtListFromVpnUndefined);
    }
    if let Some(name) = &policy.rmap_fromvpn
        && !route_maps.contains_key(name)
    {
        return Err(LeakInactiveReason::RouteMapFromVpnUndefined);
    }

    Ok(())
}
