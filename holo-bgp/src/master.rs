//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::Bytes;
use generational_arena::Arena;
use holo_utils::bgp::RouteDistinguisher;
use holo_utils::ip::{AddressFamily, IpNetworkExt};
use holo_utils::mpls::Label;
use holo_utils::protocol::Protocol;
use holo_utils::southbound::{ForwardingPlane, RouteKeyMsg};
use ipnetwork::IpNetwork;
use smallvec::smallvec;

use crate::debug::Debug;
use crate::error::Error;
use crate::instance::{
    Aggregate, Instance, InstanceId, InstanceType, VpnPolicy,
};
use crate::leak::{self, LeakDirection};
use crate::packet::attribute::{Attrs, MpReach};
use crate::packet::error::DecodeError;
use crate::packet::nlri::{VpnNlri, decode_nlri_list};
use crate::policy::RouteMap;
use crate::rib::{
    AttrSetsCxt, Destination, PathExtra, PathFlags, PathId, PathInfo,
    PathType, TableKey,
};

// Name of the default instance, which also holds the SRv6-VPN tables.
pub const DFLT_INSTANCE_NAME: &str = "default";
// Kernel main routing table.
pub const DFLT_TABLE_ID: u32 = 254;

// Global BGP state.
pub struct Master {
    pub instances: Arena<Instance>,
    pub vpn_instance: InstanceId,
    pub paths: Arena<PathInfo>,
    pub attr_sets: AttrSetsCxt,
    pub route_maps: BTreeMap<String, RouteMap>,
    pub fwd: Box<dyn ForwardingPlane>,
}

// ===== impl Master =====

impl Master {
    pub fn new(
        asn: u32,
        router_id: Option<Ipv4Addr>,
        fwd: Box<dyn ForwardingPlane>,
    ) -> Master {
        let mut instances = Arena::new();
        let vpn_instance = instances.insert(Instance::new(
            DFLT_INSTANCE_NAME.to_owned(),
            InstanceType::Default,
            Some(0),
            DFLT_TABLE_ID,
            asn,
            router_id,
        ));
        Debug::InstanceCreate(DFLT_INSTANCE_NAME).log();

        Master {
            instances,
            vpn_instance,
            paths: Default::default(),
            attr_sets: Default::default(),
            route_maps: Default::default(),
            fwd,
        }
    }

    pub fn instance_add(
        &mut self,
        name: &str,
        inst_type: InstanceType,
        vrf_id: Option<u32>,
        table_id: u32,
    ) -> Result<InstanceId, Error> {
        if self.instance_lookup(name).is_some() {
            return Err(Error::InstanceExists(name.to_owned()));
        }

        let (asn, router_id) = self
            .instances
            .get(self.vpn_instance)
            .map(|instance| (instance.asn, instance.router_id))
            .unwrap_or_default();
        let instance = Instance::new(
            name.to_owned(),
            inst_type,
            vrf_id,
            table_id,
            asn,
            router_id,
        );
        Debug::InstanceCreate(name).log();

        Ok(self.instances.insert(instance))
    }

    pub fn instance_lookup(&self, name: &str) -> Option<InstanceId> {
        self.instances
            .iter()
            .find(|(_, instance)| instance.name == name)
            .map(|(instance_id, _)| instance_id)
    }

    // Deletes an instance after withdrawing all of its leaked state.
    //
    // Fails if leaked paths elsewhere still reference the instance.
    pub fn instance_delete(
        &mut self,
        instance_id: InstanceId,
    ) -> Result<(), Error> {
        let name = self.instance_name(instance_id);
        let Some(instance) = self.instances.get(instance_id) else {
            return Err(Error::InstanceNotFound(name));
        };
        // The default instance holds the VPN tables.
        if instance_id == self.vpn_instance {
            return Err(Error::InstanceInUse(name, instance.refcount));
        }

        for af in [AddressFamily::Ipv4, AddressFamily::Ipv6] {
            leak::from_vrf_withdraw_all(self, instance_id, af);
            leak::to_vrf_withdraw_all(self, instance_id, af);

            // Remove the remaining unicast paths.
            let table = TableKey::unicast(instance_id, af);
            let prefixes: Vec<IpNetwork> = self
                .instances
                .get(instance_id)
                .map(|instance| {
                    instance.unicast.get(af).prefixes.keys().copied().collect()
                })
                .unwrap_or_default();
            for prefix in prefixes {
                for path_id in self.dest_path_ids(&table, &prefix) {
                    leak::from_vrf_withdraw(self, instance_id, path_id);
                    self.aggregate_decrement(&table, &prefix);
                    self.path_delete(path_id);
                }
                self.process_dest(&table, &prefix);
            }
        }

        if let Some(instance) = self.instances.get(instance_id)
            && instance.refcount > 0
        {
            return Err(Error::InstanceInUse(name, instance.refcount));
        }

        // Withdraw the per-VRF SID bindings.
        for af in [AddressFamily::Ipv4, AddressFamily::Ipv6] {
            if let Some(instance) = self.instances.get_mut(instance_id) {
                instance.vpn_policy.get_mut(af).tovpn_sid = None;
            }
            if let Err(error) = leak::vpn_sid_update(self, instance_id, af) {
                error.log();
            }
        }

        self.instances.remove(instance_id);
        Debug::InstanceDelete(&name).log();

        Ok(())
    }

    // Withdraws every encap route and per-VRF SID binding from the
    // forwarding plane. The RIB is left in place.
    pub fn shutdown(&mut self) {
        let instance_ids =
            self.instances.iter().map(|(id, _)| id).collect::<Vec<_>>();
        for instance_id in instance_ids {
            for af in [AddressFamily::Ipv4, AddressFamily::Ipv6] {
                if let Some(instance) = self.instances.get_mut(instance_id) {
                    let table_id = instance.table_id;
                    let table = instance.unicast.get_mut(af);
                    for (prefix, dest) in table
                        .prefixes
                        .iter_mut()
                        .filter(|(_, dest)| dest.installed.is_some())
                    {
                        match self.fwd.remove_route(&RouteKeyMsg {
                            protocol: Protocol::BGP,
                            prefix: *prefix,
                            table_id,
                        }) {
                            Err(error) if !error.is_not_found() => {
                                Error::from(error).log()
                            }
                            _ => dest.installed = None,
                        }
                    }
                    instance.vpn_policy.get_mut(af).tovpn_sid = None;
                }
                if let Err(error) = leak::vpn_sid_update(self, instance_id, af)
                {
                    error.log();
                }
            }
        }
    }

    // Updates the VRF identifier of an instance. Import from the VPN
    // requires a known VRF.
    pub fn instance_vrf_id_update(
        &mut self,
        instance_id: InstanceId,
        vrf_id: Option<u32>,
    ) -> Result<(), Error> {
        let mut result = Ok(());
        for af in [AddressFamily::Ipv4, AddressFamily::Ipv6] {
            leak::prechange(self, LeakDirection::FromVpn, af, instance_id);
        }
        if let Some(instance) = self.instances.get_mut(instance_id) {
            instance.vrf_id = vrf_id;
        }
        for af in [AddressFamily::Ipv4, AddressFamily::Ipv6] {
            if let Err(error) =
                leak::postchange(self, LeakDirection::FromVpn, af, instance_id)
            {
                result = Err(error);
            }
        }
        result
    }

    // Changes the VPN policy of a VRF, withdrawing and re-leaking routes in
    // the given directions.
    pub fn vpn_policy_update<F>(
        &mut self,
        vrf_id: InstanceId,
        af: AddressFamily,
        dirs: &[LeakDirection],
        f: F,
    ) -> Result<(), Error>
    where
        F: FnOnce(&mut VpnPolicy),
    {
        if !self.instances.contains(vrf_id) {
            return Err(Error::InstanceNotFound(self.instance_name(vrf_id)));
        }

        for dir in dirs {
            leak::prechange(self, *dir, af, vrf_id);
        }
        if let Some(vrf) = self.instances.get_mut(vrf_id) {
            f(vrf.vpn_policy.get_mut(af));
        }
        let mut result = Ok(());
        for dir in dirs {
            if let Err(error) = leak::postchange(self, *dir, af, vrf_id) {
                result = Err(error);
            }
        }
        result
    }

    // Records the SID allocated for a VRF configured with an automatic
    // per-VRF SID.
    pub fn vpn_sid_allocated(
        &mut self,
        vrf_id: InstanceId,
        af: AddressFamily,
        sid: Option<Ipv6Addr>,
    ) -> Result<(), Error> {
        self.vpn_policy_update(vrf_id, af, &[LeakDirection::ToVpn], |policy| {
            policy.tovpn_sid = sid;
        })
    }

    // Adds, replaces or (with `None`) removes a route-map, re-leaking the
    // routes of every VRF that references it.
    pub fn route_map_update(
        &mut self,
        name: &str,
        route_map: Option<RouteMap>,
    ) -> Result<(), Error> {
        let mut affected = BTreeSet::new();
        for (vrf_id, vrf) in self.instances.iter() {
            for (af, policy) in vrf.vpn_policy.iter() {
                if policy.rmap_tovpn.as_deref() == Some(name) {
                    affected.insert((vrf_id, af, LeakDirection::ToVpn));
                }
                if policy.rmap_fromvpn.as_deref() == Some(name) {
                    affected.insert((vrf_id, af, LeakDirection::FromVpn));
                }
            }
        }

        for (vrf_id, af, dir) in &affected {
            leak::prechange(self, *dir, *af, *vrf_id);
        }
        match route_map {
            Some(route_map) => {
                let route_map =
                    RouteMap::new(route_map.name, route_map.entries);
                self.route_maps.insert(name.to_owned(), route_map);
            }
            None => {
                self.route_maps.remove(name);
            }
        }
        let mut result = Ok(());
        for (vrf_id, af, dir) in &affected {
            if let Err(error) = leak::postchange(self, *dir, *af, *vrf_id) {
                result = Err(error);
            }
        }
        result
    }

    // Configures an aggregate address, counting the routes already present.
    pub fn aggregate_add(&mut self, vrf_id: InstanceId, prefix: IpNetwork) {
        let table = TableKey::unicast(vrf_id, prefix.address_family());
        let Some(instance) = self.instances.get(vrf_id) else {
            return;
        };
        let count = instance
            .unicast
            .get(table.af)
            .prefixes
            .iter()
            .filter(|(dest_prefix, _)| prefix.covers(dest_prefix))
            .flat_map(|(_, dest)| dest.paths.iter())
            .filter(|path_id| {
                self.paths
                    .get(**path_id)
                    .is_some_and(|path| !path.is_removed())
            })
            .count() as u32;
        if let Some(instance) = self.instances.get_mut(vrf_id) {
            instance
                .aggregates
                .get_mut(table.af)
                .insert(prefix, Aggregate { count });
        }
    }

    pub fn aggregate_count(
        &self,
        vrf_id: InstanceId,
        prefix: &IpNetwork,
    ) -> Option<u32> {
        self.instances
            .get(vrf_id)?
            .aggregates
            .get(prefix.address_family())
            .get(prefix)
            .map(|aggregate| aggregate.count)
    }

    // Adds or replaces a local route in a VRF (or the default instance) and
    // exports it to the VPN when the VPN policy allows it.
    pub fn route_add(
        &mut self,
        vrf_id: InstanceId,
        prefix: IpNetwork,
        path_type: PathType,
        attrs: Attrs,
    ) -> Option<PathId> {
        let prefix = prefix.apply_mask();
        let table = TableKey::unicast(vrf_id, prefix.address_family());
        let path_id =
            self.local_path_update(table, prefix, path_type, &attrs, None)?;
        leak::from_vrf_update(self, vrf_id, path_id);
        Some(path_id)
    }

    pub fn route_del(
        &mut self,
        vrf_id: InstanceId,
        prefix: IpNetwork,
        path_type: PathType,
    ) {
        let prefix = prefix.apply_mask();
        let table = TableKey::unicast(vrf_id, prefix.address_family());
        let Some(path_id) = self.local_path_find(&table, &prefix, path_type)
        else {
            return;
        };
        leak::from_vrf_withdraw(self, vrf_id, path_id);
        self.aggregate_decrement(&table, &prefix);
        self.path_delete(path_id);
        self.process_dest(&table, &prefix);
    }

    // Adds or replaces a VPN route received from a peer and imports it into
    // the eligible VRFs.
    pub fn vpn_route_add(
        &mut self,
        rd: RouteDistinguisher,
        prefix: IpNetwork,
        attrs: Attrs,
        label: Label,
    ) -> Option<PathId> {
        let prefix = prefix.apply_mask();
        let table =
            TableKey::vpn(self.vpn_instance, prefix.address_family(), rd);
        let path_id = self.local_path_update(
            table,
            prefix,
            PathType::Normal,
            &attrs,
            Some(label),
        )?;
        leak::to_vrf_update(self, path_id);
        Some(path_id)
    }

    pub fn vpn_route_del(&mut self, rd: RouteDistinguisher, prefix: IpNetwork) {
        let prefix = prefix.apply_mask();
        let table =
            TableKey::vpn(self.vpn_instance, prefix.address_family(), rd);
        let Some(path_id) =
            self.local_path_find(&table, &prefix, PathType::Normal)
        else {
            return;
        };
        leak::to_vrf_withdraw(self, path_id);
        self.path_delete(path_id);
        self.process_dest(&table, &prefix);
    }

    // Processes a received block of SRv6-VPN NLRIs. Reachable NLRIs come
    // with their path attributes, unreachable ones without.
    //
    // The whole block, attributes included, is decoded before any route is
    // touched, so a malformed block leaves the tables unchanged.
    pub fn vpn_nlri_rx(
        &mut self,
        af: AddressFamily,
        addpath: bool,
        nlri: Bytes,
        reach: Option<MpReach>,
    ) -> Result<(), Error> {
        let attrs = reach.as_ref().map(MpReach::decode_attrs).transpose()?;
        let nlris =
            decode_nlri_list(nlri, af, addpath).map_err(DecodeError::Nlri)?;
        for nlri in nlris {
            Debug::VpnNlriRx(&nlri, attrs.is_some()).log();
            match &attrs {
                Some(attrs) => {
                    self.vpn_route_add(
                        nlri.rd,
                        nlri.prefix,
                        attrs.clone(),
                        nlri.label,
                    );
                }
                None => self.vpn_route_del(nlri.rd, nlri.prefix),
            }
        }
        Ok(())
    }

    // Returns the best VPN paths of the given address family along with
    // their attributes, ready to be advertised.
    pub fn vpn_nlri_tx(&self, af: AddressFamily) -> Vec<(VpnNlri, Attrs)> {
        let Some(instance) = self.instances.get(self.vpn_instance) else {
            return vec![];
        };
        instance
            .vpn
            .get(af)
            .iter()
            .flat_map(|(rd, table)| {
                table
                    .prefixes
                    .iter()
                    .map(move |(prefix, dest)| (rd, prefix, dest))
            })
            .filter_map(|(rd, prefix, dest)| {
                let path = self.paths.get(dest.best?)?;
                let label = path
                    .extra
                    .labels
                    .first()
                    .copied()
                    .unwrap_or(Label::implicit_null());
                let nlri = VpnNlri {
                    path_id: None,
                    label,
                    rd: *rd,
                    prefix: *prefix,
                };
                Some((nlri, path.attrs.get()))
            })
            .collect()
    }

    // Updates the reachability of a tracked nexthop and revalidates the
    // paths that use it.
    pub fn nht_update(
        &mut self,
        instance_id: InstanceId,
        addr: IpAddr,
        metric: Option<u32>,
    ) {
        let Some(instance) = self.instances.get_mut(instance_id) else {
            return;
        };
        Debug::NhtUpdate(&instance.name, &addr, metric).log();
        instance.nht.insert(addr, metric);

        let candidates = self
            .paths
            .iter()
            .filter(|(_, path)| {
                !path.is_removed()
                    && path.tracked_nexthop() == Some(addr)
                    && path.extra.bgp_orig.unwrap_or(path.table.instance)
                        == instance_id
            })
            .map(|(path_id, _)| path_id)
            .collect::<Vec<_>>();

        let mut dests = BTreeSet::new();
        for path_id in candidates {
            let Some(path) = self.paths.get(path_id) else {
                continue;
            };
            let valid = self.nexthop_valid(path);
            if valid == path.is_valid() {
                continue;
            }
            if let Some(path) = self.paths.get_mut(path_id) {
                path.flags.set(PathFlags::VALID, valid);
                dests.insert((path.table, path.prefix));
            }
        }
        for (table, prefix) in dests {
            self.process_dest(&table, &prefix);
        }
    }

    pub fn dest(
        &self,
        table: &TableKey,
        prefix: &IpNetwork,
    ) -> Option<&Destination> {
        self.instances
            .get(table.instance)?
            .table(table)?
            .prefixes
            .get(prefix)
    }

    // Returns the paths of a destination, in arrival order.
    pub fn dest_paths(
        &self,
        table: &TableKey,
        prefix: &IpNetwork,
    ) -> Vec<(PathId, &PathInfo)> {
        self.dest(table, prefix)
            .map(|dest| {
                dest.paths
                    .iter()
                    .filter_map(|path_id| {
                        self.paths.get(*path_id).map(|path| (*path_id, path))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn instance_name(&self, instance_id: InstanceId) -> String {
        self.instances
            .get(instance_id)
            .map(|instance| instance.name.clone())
            .unwrap_or_else(|| format!("{instance_id:?}"))
    }

    fn dest_path_ids(
        &self,
        table: &TableKey,
        prefix: &IpNetwork,
    ) -> Vec<PathId> {
        self.dest_paths(table, prefix)
            .into_iter()
            .filter(|(_, path)| !path.is_removed())
            .map(|(path_id, _)| path_id)
            .collect()
    }

    // Finds the non-leaked path of the given type.
    fn local_path_find(
        &self,
        table: &TableKey,
        prefix: &IpNetwork,
        path_type: PathType,
    ) -> Option<PathId> {
        self.dest_paths(table, prefix)
            .into_iter()
            .find(|(_, path)| {
                path.path_type == path_type
                    && path.extra.parent.is_none()
                    && !path.is_removed()
            })
            .map(|(path_id, _)| path_id)
    }

    // Creates or updates a non-leaked path and runs the decision process.
    fn local_path_update(
        &mut self,
        table: TableKey,
        prefix: IpNetwork,
        path_type: PathType,
        attrs: &Attrs,
        label: Option<Label>,
    ) -> Option<PathId> {
        let attrs = self.attr_sets.get_route_attr_sets(attrs);
        let labels = label.map(|label| smallvec![label]).unwrap_or_default();

        let path_id = match self.local_path_find(&table, &prefix, path_type) {
            Some(path_id) => {
                let path = self.paths.get_mut(path_id)?;
                let old_attrs = std::mem::replace(&mut path.attrs, attrs);
                path.extra.labels = labels;
                self.attr_sets.release(old_attrs);
                self.aggregate_decrement(&table, &prefix);
                path_id
            }
            None => {
                let extra = PathExtra {
                    labels,
                    ..Default::default()
                };
                self.path_insert(
                    table,
                    prefix,
                    path_type,
                    attrs,
                    extra,
                    PathFlags::empty(),
                )?
            }
        };

        let valid = self
            .paths
            .get(path_id)
            .is_some_and(|path| self.nexthop_valid(path));
        if let Some(path) = self.paths.get_mut(path_id) {
            path.flags.set(PathFlags::VALID, valid);
        }
        self.aggregate_increment(&table, &prefix);
        self.process_dest(&table, &prefix);

        Some(path_id)
    }
}

impl std::fmt::Debug for Master {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Master")
            .field("instances", &self.instances)
            .field("vpn_instance", &self.vpn_instance)
            .field("paths", &self.paths)
            .field("route_maps", &self.route_maps)
            .finish_non_exhaustive()
    }
}
