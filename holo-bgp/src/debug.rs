//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv6Addr};

use holo_utils::bgp::RouteDistinguisher;
use holo_utils::ip::AddressFamily;
use ipnetwork::IpNetwork;
use tracing::{debug, debug_span};

use crate::leak::LeakDirection;
use crate::leak::active::LeakInactiveReason;
use crate::packet::consts::AttrType;
use crate::packet::nlri::VpnNlri;

// BGP debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    InstanceCreate(&'a str),
    InstanceDelete(&'a str),
    LeakInactive(&'a str, LeakDirection, AddressFamily, LeakInactiveReason),
    LeakNotInjectable(&'a str, &'a IpNetwork),
    LeakRtMismatch(&'a str, &'a IpNetwork),
    LeakPolicyReject(&'a str, &'a str, &'a IpNetwork),
    LeakCreate(&'a str, &'a IpNetwork),
    LeakUpdate(&'a str, &'a IpNetwork),
    LeakNoChange(&'a str, &'a IpNetwork),
    LeakWithdraw(&'a str, &'a IpNetwork),
    VpnSidUpdate(&'a str, AddressFamily, Option<Ipv6Addr>),
    BestPathFound(&'a IpNetwork),
    BestPathNotFound(&'a IpNetwork),
    NhtUpdate(&'a str, &'a IpAddr, Option<u32>),
    VpnNlriRx(&'a VpnNlri, bool),
    NlriUnknownRdType(&'a RouteDistinguisher),
    AttrDiscard(AttrType),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::InstanceCreate(name) | Debug::InstanceDelete(name) => {
                debug_span!("bgp-instance", %name).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::LeakInactive(name, dir, af, reason) => {
                debug_span!("bgp-instance", %name).in_scope(|| {
                    debug_span!("vpn-leak").in_scope(|| {
                        debug!(?dir, %af, %reason, "{}", self);
                    })
                });
            }
            Debug::LeakNotInjectable(name, prefix)
            | Debug::LeakRtMismatch(name, prefix)
            | Debug::LeakCreate(name, prefix)
            | Debug::LeakUpdate(name, prefix)
            | Debug::LeakNoChange(name, prefix)
            | Debug::LeakWithdraw(name, prefix) => {
                debug_span!("bgp-instance", %name).in_scope(|| {
                    debug_span!("vpn-leak").in_scope(|| {
                        debug!(%prefix, "{}", self);
                    })
                });
            }
            Debug::LeakPolicyReject(name, route_map, prefix) => {
                debug_span!("bgp-instance", %name).in_scope(|| {
                    debug_span!("vpn-leak").in_scope(|| {
                        debug!(%route_map, %prefix, "{}", self);
                    })
                });
            }
            Debug::VpnSidUpdate(name, af, sid) => {
                debug_span!("bgp-instance", %name).in_scope(|| {
                    if let Some(sid) = sid {
                        debug!(%af, %sid, "{}", self);
                    } else {
                        debug!(%af, sid = "none", "{}", self);
                    }
                });
            }
            Debug::BestPathFound(prefix) | Debug::BestPathNotFound(prefix) => {
                // Parent span(s): bgp-instance
                debug!(%prefix, "{}", self);
            }
            Debug::NhtUpdate(name, addr, metric) => {
                debug_span!("bgp-instance", %name).in_scope(|| {
                    if let Some(metric) = metric {
                        debug!(%addr, %metric, "{}", self);
                    } else {
                        debug!(%addr, metric = "unreachable", "{}", self);
                    }
                });
            }
            Debug::VpnNlriRx(nlri, reach) => {
                debug_span!("vpn-nlri").in_scope(|| {
                    debug_span!("input").in_scope(|| {
                        let data =
                            serde_json::to_string(&nlri).unwrap_or_default();
                        debug!(%reach, %data, "{}", self);
                    })
                });
            }
            Debug::NlriUnknownRdType(rd) => {
                debug!(%rd, "{}", self);
            }
            Debug::AttrDiscard(attr_type) => {
                debug!(?attr_type, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::InstanceCreate(..) => {
                write!(f, "instance created")
            }
            Debug::InstanceDelete(..) => {
                write!(f, "instance deleted")
            }
            Debug::LeakInactive(..) => {
                write!(f, "route leaking inactive")
            }
            Debug::LeakNotInjectable(..) => {
                write!(f, "route not injectable into VPN")
            }
            Debug::LeakRtMismatch(..) => {
                write!(f, "no matching route target")
            }
            Debug::LeakPolicyReject(..) => {
                write!(f, "route rejected by route-map")
            }
            Debug::LeakCreate(..) => {
                write!(f, "leaked route created")
            }
            Debug::LeakUpdate(..) => {
                write!(f, "leaked route updated")
            }
            Debug::LeakNoChange(..) => {
                write!(f, "leaked route unchanged")
            }
            Debug::LeakWithdraw(..) => {
                write!(f, "leaked route withdrawn")
            }
            Debug::VpnSidUpdate(..) => {
                write!(f, "per-VRF SID updated")
            }
            Debug::BestPathFound(..) => {
                write!(f, "best path found")
            }
            Debug::BestPathNotFound(..) => {
                write!(f, "best path not found")
            }
            Debug::NhtUpdate(..) => {
                write!(f, "nexthop tracking update")
            }
            Debug::VpnNlriRx(..) => {
                write!(f, "VPN NLRI")
            }
            Debug::NlriUnknownRdType(..) => {
                write!(f, "unknown route distinguisher type")
            }
            Debug::AttrDiscard(..) => {
                write!(f, "malformed attribute discarded")
            }
        }
    }
}
