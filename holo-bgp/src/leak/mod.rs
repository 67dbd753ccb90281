//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Route leaking between VRF unicast tables and the SRv6-VPN table.
//!
//! Routes exported from a VRF are copied into the VPN table under the VRF's
//! route distinguisher, tagged with its export route targets and per-VRF
//! SID. VPN routes are imported into every VRF whose import route targets
//! intersect those of the route, except the VRF the route came from.
//!
//! A leaked path always points back to the path it was copied from. For a
//! given destination there's at most one leaked path per parent.

pub mod active;

use std::net::{IpAddr, Ipv6Addr};

use holo_utils::bgp::RouteDistinguisher;
use holo_utils::ip::{AddressFamily, IpAddrExt, IpNetworkExt};
use holo_utils::mpls::Label;
use holo_utils::protocol::Protocol;
use holo_utils::southbound::{ForwardingPlane, LocalSidMsg, RouteKeyMsg};
use holo_utils::srv6::Seg6LocalAction;
use ipnetwork::{IpNetwork, Ipv6Network};
use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};

use crate::debug::Debug;
use crate::error::Error;
use crate::instance::InstanceId;
use crate::leak::active::{from_vpn_active, to_vpn_active};
use crate::master::Master;
use crate::packet::consts::Safi;
use crate::policy::{PolicyResult, RoutePolicyInfo};
use crate::rib::{
    PathExtra, PathFlags, PathId, PathType, RouteAttrs, TableKey,
};

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum LeakDirection {
    ToVpn,
    FromVpn,
}

// Leaked path to be created or updated.
struct LeakParams {
    table: TableKey,
    prefix: IpNetwork,
    attrs: RouteAttrs,
    parent: PathId,
    bgp_orig: InstanceId,
    nexthop_orig: Option<IpAddr>,
    nh_self: bool,
    sids: SmallVec<[Ipv6Addr; 2]>,
    labels: SmallVec<[Label; 1]>,
}

// ===== global functions =====

// Exports a VRF path to the VPN table.
pub fn from_vrf_update(
    master: &mut Master,
    vrf_id: InstanceId,
    path_id: PathId,
) {
    let vpn_id = master.vpn_instance;
    let Some(path) = master.paths.get(path_id) else {
        return;
    };
    if path.is_removed() {
        return;
    }
    let prefix = path.prefix;
    let af = prefix.address_family();
    let Some(vrf) = master.instances.get(vrf_id) else {
        return;
    };
    let name = vrf.name.clone();

    if !is_route_injectable(master, path_id) {
        Debug::LeakNotInjectable(&name, &prefix).log();
        return;
    }
    if let Err(reason) = to_vpn_active(vrf, af, &master.route_maps) {
        Debug::LeakInactive(&name, LeakDirection::ToVpn, af, reason).log();
        return;
    }
    let policy = vrf.vpn_policy.get(af).clone();
    let Some(rd) = policy.rd else {
        return;
    };
    let mut attrs = path.attrs.get();

    // Apply "to VPN" route-map.
    if let Some(rmap_name) = &policy.rmap_tovpn
        && let Some(rmap) = master.route_maps.get(rmap_name)
    {
        let rpinfo = RoutePolicyInfo::new(prefix, attrs, Some(name.clone()));
        match rmap.apply(rpinfo) {
            PolicyResult::Accept(rpinfo) => attrs = rpinfo.attrs,
            PolicyResult::Reject => {
                Debug::LeakPolicyReject(&name, rmap_name, &prefix).log();
                return;
            }
        }
    }

    // Add export route targets.
    attrs
        .ext_comm
        .get_or_insert_with(Default::default)
        .0
        .extend(policy.rtlist_tovpn.iter().copied());

    // Set nexthop.
    let nh_self = if let Some(nexthop) = policy.nexthop {
        attrs.base.mp_nexthop = Some(nexthop);
        false
    } else if !policy.vrf_to_vrf_export() {
        attrs.base.mp_nexthop = attrs.base.nexthop;
        true
    } else {
        // Unnumbered IPv4 nexthop.
        if let Some(IpAddr::V4(_)) = attrs.base.nexthop
            && attrs.base.mp_nexthop.is_none()
        {
            attrs.base.mp_nexthop = attrs.base.nexthop;
        }
        true
    };

    // The SID is part of the interned attributes so that paths differing
    // only in their SID never share an attribute set.
    attrs.base.originator_id = master
        .instances
        .get(vpn_id)
        .and_then(|instance| instance.router_id);
    let sid = policy.tovpn_sid.filter(|sid| !sid.is_unspecified());
    attrs.base.srv6_sid = sid;
    let attrs = master.attr_sets.get_route_attr_sets(&attrs);

    let params = LeakParams {
        table: TableKey::vpn(vpn_id, af, rd),
        prefix,
        attrs,
        parent: path_id,
        bgp_orig: vrf_id,
        nexthop_orig: None,
        nh_self,
        sids: sid.into_iter().collect(),
        labels: smallvec![Label::implicit_null()],
    };
    if let Some(vpn_path_id) = leak_update(master, params) {
        // Make the new VPN path visible to the other VRFs.
        to_vrf_update(master, vpn_path_id);
    }
}

// Withdraws the VPN copy of a VRF path.
pub fn from_vrf_withdraw(
    master: &mut Master,
    vrf_id: InstanceId,
    path_id: PathId,
) {
    let vpn_id = master.vpn_instance;
    let Some(path) = master.paths.get(path_id) else {
        return;
    };
    let prefix = path.prefix;
    let af = prefix.address_family();

    if !is_route_injectable(master, path_id) {
        return;
    }

    for rd in vpn_rds(master, af) {
        let table = TableKey::vpn(vpn_id, af, rd);
        for vpn_path_id in leaked_paths(master, &table, &prefix, path_id) {
            if master
                .paths
                .get(vpn_path_id)
                .is_some_and(|path| path.extra.bgp_orig == Some(vrf_id))
            {
                to_vrf_withdraw(master, vpn_path_id);
                leak_withdraw(master, vpn_path_id);
            }
        }
    }
}

// Exports all paths of a VRF to the VPN table.
pub fn from_vrf_update_all(
    master: &mut Master,
    vrf_id: InstanceId,
    af: AddressFamily,
) {
    let table = TableKey::unicast(vrf_id, af);
    for path_id in table_paths(master, &table) {
        from_vrf_update(master, vrf_id, path_id);
    }
}

// Removes from the VPN table every path exported by the given VRF, along
// with the copies imported elsewhere.
pub fn from_vrf_withdraw_all(
    master: &mut Master,
    vrf_id: InstanceId,
    af: AddressFamily,
) {
    let vpn_id = master.vpn_instance;
    for rd in vpn_rds(master, af) {
        let table = TableKey::vpn(vpn_id, af, rd);
        for path_id in table_paths(master, &table) {
            if !master.paths.get(path_id).is_some_and(|path| {
                path.path_type == PathType::Imported
                    && path.extra.bgp_orig == Some(vrf_id)
            }) {
                continue;
            }
            to_vrf_withdraw(master, path_id);
            leak_withdraw(master, path_id);
        }
    }
}

// Imports a VPN path into every eligible VRF.
pub fn to_vrf_update(master: &mut Master, vpn_path_id: PathId) {
    let Some(path) = master.paths.get(vpn_path_id) else {
        return;
    };
    if path.table.safi != Safi::LabeledVpn {
        return;
    }

    // Never import a path back into the VRF it was exported from.
    let bgp_orig = path.extra.bgp_orig;
    let vrfs = master
        .instances
        .iter()
        .map(|(vrf_id, _)| vrf_id)
        .filter(|vrf_id| Some(*vrf_id) != bgp_orig)
        .collect::<Vec<_>>();
    for vrf_id in vrfs {
        to_vrf_update_one(master, vrf_id, vpn_path_id);
    }
}

// Withdraws the copies of a VPN path from all VRFs.
pub fn to_vrf_withdraw(master: &mut Master, vpn_path_id: PathId) {
    let Some(path) = master.paths.get(vpn_path_id) else {
        return;
    };
    let prefix = path.prefix;
    let af = prefix.address_family();

    let vrfs = master
        .instances
        .iter()
        .map(|(vrf_id, _)| vrf_id)
        .collect::<Vec<_>>();
    for vrf_id in vrfs {
        let table = TableKey::unicast(vrf_id, af);
        for path_id in leaked_paths(master, &table, &prefix, vpn_path_id) {
            leak_withdraw(master, path_id);
        }
    }
}

// Imports all eligible VPN paths into the given VRF.
pub fn to_vrf_update_all(
    master: &mut Master,
    vrf_id: InstanceId,
    af: AddressFamily,
) {
    let vpn_id = master.vpn_instance;
    for rd in vpn_rds(master, af) {
        let table = TableKey::vpn(vpn_id, af, rd);
        for path_id in table_paths(master, &table) {
            if master
                .paths
                .get(path_id)
                .is_some_and(|path| path.extra.bgp_orig == Some(vrf_id))
            {
                continue;
            }
            to_vrf_update_one(master, vrf_id, path_id);
        }
    }
}

// Removes from the given VRF every path imported from the VPN table.
pub fn to_vrf_withdraw_all(
    master: &mut Master,
    vrf_id: InstanceId,
    af: AddressFamily,
) {
    let table = TableKey::unicast(vrf_id, af);
    for path_id in table_paths(master, &table) {
        let Some(path) = master.paths.get(path_id) else {
            continue;
        };
        if path.path_type != PathType::Imported
            || path.extra.bgp_orig == Some(vrf_id)
        {
            continue;
        }
        let parent_in_vpn = path
            .extra
            .parent
            .and_then(|parent| master.paths.get(parent))
            .is_some_and(|parent| parent.table.safi == Safi::LabeledVpn);
        if parent_in_vpn {
            leak_withdraw(master, path_id);
        }
    }
}

// Withdraws everything currently leaked in the given direction. Must be
// called before the VPN policy of the VRF changes.
pub fn prechange(
    master: &mut Master,
    dir: LeakDirection,
    af: AddressFamily,
    vrf_id: InstanceId,
) {
    let Some(vrf) = master.instances.get(vrf_id) else {
        return;
    };
    match dir {
        LeakDirection::ToVpn => {
            if to_vpn_active(vrf, af, &master.route_maps).is_ok() {
                from_vrf_withdraw_all(master, vrf_id, af);
            }
        }
        LeakDirection::FromVpn => {
            if from_vpn_active(vrf, af, &master.route_maps).is_ok() {
                to_vrf_withdraw_all(master, vrf_id, af);
            }
        }
    }
}

// Leaks everything again under the new policy. Must be called after the
// VPN policy of the VRF changes.
//
// For the "to VPN" direction, the per-VRF SID binding is also updated when
// the SID differs from the one last sent to the forwarding plane. A failure
// there doesn't prevent the routes from being exported.
pub fn postchange(
    master: &mut Master,
    dir: LeakDirection,
    af: AddressFamily,
    vrf_id: InstanceId,
) -> Result<(), Error> {
    match dir {
        LeakDirection::ToVpn => {
            let result = vpn_sid_update(master, vrf_id, af);
            from_vrf_update_all(master, vrf_id, af);
            result
        }
        LeakDirection::FromVpn => {
            to_vrf_update_all(master, vrf_id, af);
            Ok(())
        }
    }
}

// ===== helper functions =====

// Imports a VPN path into a single VRF.
fn to_vrf_update_one(
    master: &mut Master,
    vrf_id: InstanceId,
    vpn_path_id: PathId,
) {
    let vpn_id = master.vpn_instance;
    let Some(path) = master.paths.get(vpn_path_id) else {
        return;
    };
    if path.is_removed() {
        return;
    }
    let Some(vrf) = master.instances.get(vrf_id) else {
        return;
    };
    let prefix = path.prefix;
    let af = prefix.address_family();
    let name = vrf.name.clone();

    if let Err(reason) = from_vpn_active(vrf, af, &master.route_maps) {
        Debug::LeakInactive(&name, LeakDirection::FromVpn, af, reason).log();
        return;
    }

    // Route-target filtering.
    let policy = vrf.vpn_policy.get(af);
    if !path.attrs.ext_comm.as_ref().is_some_and(|ext_comm| {
        ext_comm.value.intersects_rt(&policy.rtlist_fromvpn)
    }) {
        Debug::LeakRtMismatch(&name, &prefix).log();
        return;
    }
    let vrf_to_vrf_import = policy.vrf_to_vrf_import();
    let rmap_name = policy.rmap_fromvpn.clone();
    let bgp_orig = path.extra.bgp_orig.unwrap_or(vpn_id);
    let source_vrf = master
        .instances
        .get(bgp_orig)
        .map(|instance| instance.name.clone());
    let mut attrs = path.attrs.get();

    // Save the original nexthop and apply nexthop-self unless importing
    // from another VRF.
    let nexthop_orig = attrs.base.mp_nexthop.or(attrs.base.nexthop);
    let mut nh_self = !vrf_to_vrf_import;
    if nh_self {
        attrs.base.nexthop = Some(IpAddr::unspecified(af));
        attrs.base.mp_nexthop = None;
    }

    // Apply "from VPN" route-map.
    if let Some(rmap_name) = &rmap_name
        && let Some(rmap) = master.route_maps.get(rmap_name)
    {
        let rpinfo = RoutePolicyInfo::new(prefix, attrs, source_vrf);
        match rmap.apply(rpinfo) {
            PolicyResult::Accept(rpinfo) => {
                if rpinfo.nexthop_modified {
                    nh_self = false;
                }
                attrs = rpinfo.attrs;
            }
            PolicyResult::Reject => {
                Debug::LeakPolicyReject(&name, rmap_name, &prefix).log();
                return;
            }
        }
    }

    let sids = attrs
        .base
        .srv6_sid
        .filter(|sid| !sid.is_unspecified())
        .into_iter()
        .collect();
    let attrs = master.attr_sets.get_route_attr_sets(&attrs);

    let params = LeakParams {
        table: TableKey::unicast(vrf_id, af),
        prefix,
        attrs,
        parent: vpn_path_id,
        bgp_orig,
        nexthop_orig,
        nh_self,
        sids,
        labels: Default::default(),
    };
    leak_update(master, params);
}

// Creates or updates the leaked path of the given parent.
//
// Returns `None` when the existing leaked path already matches the new
// attributes, SIDs and labels.
fn leak_update(master: &mut Master, params: LeakParams) -> Option<PathId> {
    let LeakParams {
        table,
        prefix,
        attrs,
        parent,
        bgp_orig,
        nexthop_orig,
        nh_self,
        sids,
        labels,
    } = params;
    let name = master.instance_name(table.instance);

    let existing = leaked_paths(master, &table, &prefix, parent);
    if existing.len() > 1 {
        Error::DuplicateLeak(name.clone(), prefix).log();
    }

    let path_id = if let Some(path_id) = existing.first().copied()
        && let Some(path) = master.paths.get_mut(path_id)
    {
        if path.attrs == attrs
            && path.extra.sids == sids
            && path.extra.labels == labels
            && !path.is_removed()
        {
            master.attr_sets.release(attrs);
            Debug::LeakNoChange(&name, &prefix).log();
            return None;
        }

        let was_removed = path.is_removed();
        path.flags.remove(PathFlags::REMOVED);
        let old_attrs = std::mem::replace(&mut path.attrs, attrs);
        if path.extra.sids != sids {
            path.extra.sids = sids;
        }
        path.extra.labels = labels;
        path.extra.nexthop_orig = nexthop_orig;
        path.flags.set(PathFlags::NH_SELF, nh_self);

        if !was_removed {
            master.aggregate_decrement(&table, &prefix);
        }
        master.attr_sets.release(old_attrs);
        Debug::LeakUpdate(&name, &prefix).log();
        path_id
    } else {
        let extra = PathExtra {
            parent: Some(parent),
            bgp_orig: Some(bgp_orig),
            nexthop_orig,
            sids,
            labels,
        };
        let mut flags = PathFlags::empty();
        flags.set(PathFlags::NH_SELF, nh_self);
        let path_id = master.path_insert(
            table,
            prefix,
            PathType::Imported,
            attrs,
            extra,
            flags,
        )?;
        Debug::LeakCreate(&name, &prefix).log();
        path_id
    };

    // Nexthop tracking.
    let valid = master
        .paths
        .get(path_id)
        .is_some_and(|path| master.nexthop_valid(path));
    if let Some(path) = master.paths.get_mut(path_id) {
        path.flags.set(PathFlags::VALID, valid);
    }

    master.aggregate_increment(&table, &prefix);
    master.process_dest(&table, &prefix);

    Some(path_id)
}

// Marks a leaked path as removed and reprocesses its destination.
fn leak_withdraw(master: &mut Master, path_id: PathId) {
    let Some(path) = master.paths.get(path_id) else {
        return;
    };
    if path.is_removed() {
        return;
    }
    let table = path.table;
    let prefix = path.prefix;
    let name = master.instance_name(table.instance);

    Debug::LeakWithdraw(&name, &prefix).log();
    master.aggregate_decrement(&table, &prefix);
    master.path_delete(path_id);
    master.process_dest(&table, &prefix);
}

// Checks whether a path may be exported to the VPN. Paths that were
// themselves imported from the VPN table are never re-exported.
fn is_route_injectable(master: &Master, path_id: PathId) -> bool {
    let Some(path) = master.paths.get(path_id) else {
        return false;
    };
    let Some(parent) = path.extra.parent else {
        return true;
    };
    let root = master.path_root(parent);
    master
        .paths
        .get(root)
        .is_none_or(|root| root.table.safi != Safi::LabeledVpn)
}

// Installs or removes the per-VRF SID binding when it changed since last
// sent to the forwarding plane.
pub(crate) fn vpn_sid_update(
    master: &mut Master,
    vrf_id: InstanceId,
    af: AddressFamily,
) -> Result<(), Error> {
    let Some(vrf) = master.instances.get_mut(vrf_id) else {
        return Ok(());
    };
    let table_id = vrf.table_id;
    let policy = vrf.vpn_policy.get_mut(af);
    let sid = policy.tovpn_sid.filter(|sid| !sid.is_unspecified());
    if sid == policy.tovpn_sid_last_sent {
        return Ok(());
    }
    Debug::VpnSidUpdate(&vrf.name, af, sid).log();

    // The SID manager may have withdrawn the binding already.
    if let Some(old_sid) = policy.tovpn_sid_last_sent.take() {
        sid_binding_remove(master.fwd.as_mut(), old_sid)?;
    }
    if let Some(sid) = sid {
        let action = match af {
            AddressFamily::Ipv4 => Seg6LocalAction::EndDt4(table_id),
            AddressFamily::Ipv6 => Seg6LocalAction::EndDt6(table_id),
        };
        master.fwd.install_local_sid(&LocalSidMsg {
            protocol: Protocol::BGP,
            sid: Ipv6Network::from(sid),
            action,
        })?;
        policy.tovpn_sid_last_sent = Some(sid);
    }

    Ok(())
}

// Removes a per-VRF SID binding. A binding that is already gone counts as
// removed.
fn sid_binding_remove(
    fwd: &mut dyn ForwardingPlane,
    sid: Ipv6Addr,
) -> Result<(), Error> {
    match fwd.remove_route(&RouteKeyMsg {
        protocol: Protocol::BGP,
        prefix: IpNetwork::V6(Ipv6Network::from(sid)),
        table_id: 0,
    }) {
        Err(error) if error.is_not_found() => Ok(()),
        result => result.map_err(Error::from),
    }
}

// Returns the leaked paths of a destination that have the given parent.
fn leaked_paths(
    master: &Master,
    table: &TableKey,
    prefix: &IpNetwork,
    parent: PathId,
) -> Vec<PathId> {
    master
        .instances
        .get(table.instance)
        .and_then(|instance| instance.table(table))
        .and_then(|table| table.prefixes.get(prefix))
        .map(|dest| {
            dest.paths
                .iter()
                .copied()
                .filter(|path_id| {
                    master
                        .paths
                        .get(*path_id)
                        .is_some_and(|path| path.extra.parent == Some(parent))
                })
                .collect()
        })
        .unwrap_or_default()
}

// Returns all live paths of a table, in prefix order.
fn table_paths(master: &Master, table: &TableKey) -> Vec<PathId> {
    master
        .instances
        .get(table.instance)
        .and_then(|instance| instance.table(table))
        .map(|table| {
            table
                .prefixes
                .values()
                .flat_map(|dest| dest.paths.iter().copied())
                .filter(|path_id| {
                    master
                        .paths
                        .get(*path_id)
                        .is_some_and(|path| !path.is_removed())
                })
                .collect()
        })
        .unwrap_or_default()
}

// Returns the route distinguishers of the VPN table.
fn vpn_rds(master: &Master, af: AddressFamily) -> Vec<RouteDistinguisher> {
    master
        .instances
        .get(master.vpn_instance)
        .map(|instance| instance.vpn.get(af).keys().copied().collect())
        .unwrap_or_default()
}
