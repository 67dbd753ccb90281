//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv6Addr;

use holo_bgp::error::Error;
use holo_bgp::instance::{InstanceId, InstanceType, VpnPolicyFlags};
use holo_bgp::leak::LeakDirection;
use holo_bgp::master::{DFLT_INSTANCE_NAME, Master};
use holo_bgp::packet::attribute::Attrs;
use holo_bgp::rib::PathType;
use holo_routing::netlink::NetlinkDataplane;
use holo_routing::srv6::{
    Function, FunctionOwner, LocatorInfo, SidRequest, Srv6Notification,
    Srv6Store,
};
use holo_utils::UnboundedSender;
use holo_utils::ip::AddressFamily;
use holo_utils::protocol::Protocol;
use holo_utils::southbound::ForwardingError;
use holo_utils::srv6::Seg6LocalAction;
use tracing::{debug, warn};

use crate::config::{BgpVrf, Config, VpnAfi, VpnSid};

// SRv6 SID manager and BGP state, driven by the daemon configuration.
pub struct Daemon {
    srv6: Srv6Store,
    bgp: Master,
    // Per-VRF SIDs to be allocated automatically once their locator shows
    // up.
    sid_requests: Vec<AutoSidRequest>,
}

// Automatic per-VRF SID, requested on behalf of BGP.
#[derive(Debug)]
struct AutoSidRequest {
    locator: String,
    vrf_id: InstanceId,
    vrf_name: String,
    af: AddressFamily,
    table_id: u32,
    request_key: u32,
    sid: Option<Ipv6Addr>,
}

// ===== impl Daemon =====

impl Daemon {
    pub(crate) fn new(config: &Config) -> Result<Daemon, ForwardingError> {
        // The SID manager and BGP each get their own netlink sockets.
        let srv6_dp = NetlinkDataplane::new(&config.srv6.interface)?;
        let bgp_dp = NetlinkDataplane::new(&config.srv6.interface)?;

        Ok(Daemon {
            srv6: Srv6Store::new(Box::new(srv6_dp)),
            bgp: Master::new(
                config.bgp.asn,
                config.bgp.router_id,
                Box::new(bgp_dp),
            ),
            sid_requests: Default::default(),
        })
    }

    pub(crate) fn subscribe(&mut self, tx: UnboundedSender<Srv6Notification>) {
        self.srv6.subscribe(tx);
    }

    // Applies the startup configuration.
    //
    // BGP is configured first so that automatic SID requests are already
    // registered when the locators are announced.
    pub(crate) fn apply_config(&mut self, config: &Config) {
        // BGP route-maps.
        for route_map in &config.bgp.route_maps {
            if let Err(error) = self
                .bgp
                .route_map_update(&route_map.name, Some(route_map.clone()))
            {
                error.log();
            }
        }

        // BGP instances.
        for vrf in &config.bgp.vrfs {
            if let Err(error) = self.vrf_add(vrf) {
                error.log();
            }
        }

        // SRv6 encapsulation source address.
        if let Some(addr) = config.srv6.encap_source
            && let Err(error) = self.srv6.set_encap_src(addr)
        {
            error.log();
        }

        // SRv6 locators.
        for locator in &config.srv6.locators {
            if let Err(error) = self.srv6.locator_add(
                &locator.name,
                locator.prefix,
                locator.function_bits,
            ) {
                error.log();
            }
        }

        // Static SRv6 functions.
        for function in &config.srv6.static_functions {
            let request = match function.index {
                Some(index) => SidRequest::Index(index),
                None => SidRequest::Auto,
            };
            if let Err(error) = self.srv6.function_add(
                &function.locator,
                request,
                function.behavior,
                None,
            ) {
                error.log();
            }
        }

        debug!(state = %self.srv6.state(), "SRv6 configuration applied");
    }

    // Processes a notification from the SRv6 SID manager.
    pub(crate) fn process_srv6_notification(&mut self, msg: Srv6Notification) {
        match msg {
            Srv6Notification::LocatorAdd(info) => self.locator_add(&info),
            Srv6Notification::LocatorDelete(info) => {
                self.locator_delete(&info)
            }
            Srv6Notification::FunctionDelete(function) => {
                self.function_delete(&function)
            }
            Srv6Notification::FunctionAdd(_) => (),
        }
    }

    // Releases every SRv6 resource held by BGP and withdraws all installed
    // state from the kernel.
    pub(crate) fn shutdown(&mut self) {
        self.bgp.shutdown();
        self.srv6.client_disconnect(Protocol::BGP);
        self.srv6.shutdown();
    }

    fn vrf_add(&mut self, config: &BgpVrf) -> Result<(), Error> {
        let vrf_id = if config.name == DFLT_INSTANCE_NAME {
            self.bgp.vpn_instance
        } else {
            let kernel_vrf_id = config.vrf_id.or_else(|| {
                nix::net::if_::if_nametoindex(config.name.as_str()).ok()
            });
            if kernel_vrf_id.is_none() {
                warn!(name = %config.name, "failed to resolve VRF id");
            }
            self.bgp.instance_add(
                &config.name,
                InstanceType::Vrf,
                kernel_vrf_id,
                config.table_id,
            )?
        };
        let table_id = self
            .bgp
            .instances
            .get(vrf_id)
            .map(|instance| instance.table_id)
            .unwrap_or(config.table_id);

        // Aggregates first, so that they account for every route.
        for prefix in &config.aggregates {
            self.bgp.aggregate_add(vrf_id, *prefix);
        }

        for (af, afi_config) in [
            (AddressFamily::Ipv4, &config.ipv4),
            (AddressFamily::Ipv6, &config.ipv6),
        ] {
            self.vpn_policy_apply(
                vrf_id,
                &config.name,
                af,
                table_id,
                afi_config,
            )?;
        }

        for route in &config.routes {
            let protocol = match route.connected {
                true => Protocol::DIRECT,
                false => Protocol::STATIC,
            };
            let mut attrs = Attrs::default();
            attrs.base.nexthop = route.nexthop;
            self.bgp.route_add(
                vrf_id,
                route.prefix,
                PathType::Redistribute(protocol),
                attrs,
            );
        }

        Ok(())
    }

    fn vpn_policy_apply(
        &mut self,
        vrf_id: InstanceId,
        vrf_name: &str,
        af: AddressFamily,
        table_id: u32,
        config: &VpnAfi,
    ) -> Result<(), Error> {
        let sid_auto = config.sid == Some(VpnSid::Auto);
        if sid_auto {
            match &config.locator {
                Some(locator) => {
                    let request_key = self.sid_requests.len() as u32;
                    self.sid_requests.push(AutoSidRequest {
                        locator: locator.clone(),
                        vrf_id,
                        vrf_name: vrf_name.to_owned(),
                        af,
                        table_id,
                        request_key,
                        sid: None,
                    });
                }
                None => {
                    warn!(vrf = %vrf_name, %af, "auto SID without locator");
                }
            }
        }

        self.bgp.vpn_policy_update(
            vrf_id,
            af,
            &[LeakDirection::ToVpn, LeakDirection::FromVpn],
            |policy| {
                policy.flags.set(VpnPolicyFlags::EXPORT, config.export);
                policy.flags.set(VpnPolicyFlags::IMPORT, config.import);
                policy.flags.set(
                    VpnPolicyFlags::VRF_TO_VRF_EXPORT,
                    config.vrf_to_vrf_export,
                );
                policy.flags.set(
                    VpnPolicyFlags::VRF_TO_VRF_IMPORT,
                    config.vrf_to_vrf_import,
                );
                policy.rd = config.rd;
                policy.rtlist_tovpn =
                    config.rt_export.iter().copied().collect();
                policy.rtlist_fromvpn =
                    config.rt_import.iter().copied().collect();
                policy.rmap_tovpn = config.route_map_export.clone();
                policy.rmap_fromvpn = config.route_map_import.clone();
                policy.nexthop = config.nexthop;
                policy.sid_auto = sid_auto;
                policy.sid_locator = config.locator.clone();
                policy.tovpn_sid = match config.sid {
                    Some(VpnSid::Explicit(addr)) => Some(addr),
                    _ => None,
                };
            },
        )
    }

    // Allocates the pending automatic SIDs bound to a new locator.
    fn locator_add(&mut self, info: &LocatorInfo) {
        for request in self.sid_requests.iter_mut().filter(|request| {
            request.locator == info.name && request.sid.is_none()
        }) {
            let action = match request.af {
                AddressFamily::Ipv4 => {
                    Seg6LocalAction::EndDt4(request.table_id)
                }
                AddressFamily::Ipv6 => {
                    Seg6LocalAction::EndDt6(request.table_id)
                }
            };
            let owner = FunctionOwner::new(
                Protocol::BGP,
                request.vrf_name.clone(),
                request.request_key,
            );
            let sid = match self.srv6.function_add(
                &info.name,
                SidRequest::Auto,
                action,
                Some(owner),
            ) {
                Ok(prefix) => prefix.ip(),
                Err(error) => {
                    error.log();
                    continue;
                }
            };
            request.sid = Some(sid);
            if let Err(error) = self.bgp.vpn_sid_allocated(
                request.vrf_id,
                request.af,
                Some(sid),
            ) {
                error.log();
            }
        }
    }

    fn locator_delete(&mut self, info: &LocatorInfo) {
        for request in self
            .sid_requests
            .iter_mut()
            .filter(|request| request.locator == info.name)
        {
            Self::sid_release(&mut self.bgp, request);
        }
    }

    fn function_delete(&mut self, function: &Function) {
        let Some(owner) = &function.owner else {
            return;
        };
        if owner.protocol != Protocol::BGP {
            return;
        }
        for request in self.sid_requests.iter_mut().filter(|request| {
            request.request_key == owner.request_key
                && request.sid == Some(function.prefix.ip())
        }) {
            Self::sid_release(&mut self.bgp, request);
        }
    }

    fn sid_release(bgp: &mut Master, request: &mut AutoSidRequest) {
        if request.sid.take().is_none() {
            return;
        }
        if let Err(error) =
            bgp.vpn_sid_allocated(request.vrf_id, request.af, None)
        {
            error.log();
        }
    }
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("bgp", &self.bgp)
            .field("sid_requests", &self.sid_requests)
            .finish_non_exhaustive()
    }
}
