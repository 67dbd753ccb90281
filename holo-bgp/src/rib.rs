//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv6Addr};
use std::sync::Arc;

use bitflags::bitflags;
use holo_utils::bgp::RouteDistinguisher;
use holo_utils::ip::AddressFamily;
use holo_utils::mpls::Label;
use holo_utils::protocol::Protocol;
use holo_utils::southbound::{EncapRouteMsg, RouteKeyMsg};
use holo_utils::srv6::Seg6Mode;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::debug::Debug;
use crate::error::Error;
use crate::instance::InstanceId;
use crate::master::Master;
use crate::packet::attribute::{Attrs, BaseAttrs, ExtComms};
use crate::packet::consts::Safi;

pub type PathId = generational_arena::Index;

// Local preference assumed for paths that don't carry one.
pub const DFLT_LOCAL_PREF: u32 = 100;

// Identifies one routing table of one instance.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TableKey {
    pub instance: InstanceId,
    pub af: AddressFamily,
    pub safi: Safi,
    pub rd: Option<RouteDistinguisher>,
}

#[derive(Debug, Default)]
pub struct RoutingTable {
    pub prefixes: BTreeMap<IpNetwork, Destination>,
}

#[derive(Debug, Default)]
pub struct Destination {
    pub paths: Vec<PathId>,
    pub best: Option<PathId>,
    // Segment list currently installed in the forwarding plane.
    pub installed: Option<SmallVec<[Ipv6Addr; 2]>>,
}

#[derive(Debug)]
pub struct PathInfo {
    pub path_type: PathType,
    pub table: TableKey,
    pub prefix: IpNetwork,
    pub attrs: RouteAttrs,
    pub extra: PathExtra,
    pub flags: PathFlags,
    // Number of holders: the owning destination and any leaked copy.
    pub lock: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum PathType {
    // Learned from a peer.
    Normal,
    // Redistributed from another protocol.
    Redistribute(Protocol),
    // Leaked from another table.
    Imported,
}

#[derive(Clone, Debug, Default)]
pub struct PathExtra {
    pub parent: Option<PathId>,
    pub bgp_orig: Option<InstanceId>,
    pub nexthop_orig: Option<IpAddr>,
    pub sids: SmallVec<[Ipv6Addr; 2]>,
    pub labels: SmallVec<[Label; 1]>,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct PathFlags: u8 {
        const VALID = 0x01;
        const REMOVED = 0x02;
        const NH_SELF = 0x04;
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RouteAttrs {
    pub base: Arc<AttrSet<BaseAttrs>>,
    pub ext_comm: Option<Arc<AttrSet<ExtComms>>>,
}

#[derive(Debug, Default)]
pub struct AttrSetsCxt {
    pub base: AttrSets<BaseAttrs>,
    pub ext_comm: AttrSets<ExtComms>,
}

#[derive(Debug, Eq, PartialEq)]
pub struct AttrSets<T> {
    pub tree: BTreeMap<T, Arc<AttrSet<T>>>,
    next_index: u64,
}

#[derive(Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct AttrSet<T> {
    pub index: u64,
    pub value: T,
}

// ===== impl TableKey =====

impl TableKey {
    pub fn unicast(instance: InstanceId, af: AddressFamily) -> TableKey {
        TableKey {
            instance,
            af,
            safi: Safi::Unicast,
            rd: None,
        }
    }

    pub fn vpn(
        instance: InstanceId,
        af: AddressFamily,
        rd: RouteDistinguisher,
    ) -> TableKey {
        TableKey {
            instance,
            af,
            safi: Safi::LabeledVpn,
            rd: Some(rd),
        }
    }
}

// ===== impl PathInfo =====

impl PathInfo {
    pub fn is_valid(&self) -> bool {
        self.flags.contains(PathFlags::VALID)
    }

    pub fn is_removed(&self) -> bool {
        self.flags.contains(PathFlags::REMOVED)
    }

    // Nexthop used for reachability checks.
    pub(crate) fn tracked_nexthop(&self) -> Option<IpAddr> {
        let base = &self.attrs.base.value;
        self.extra
            .nexthop_orig
            .or(base.mp_nexthop)
            .or(base.nexthop)
    }
}

// ===== impl RouteAttrs =====

impl RouteAttrs {
    pub(crate) fn get(&self) -> Attrs {
        Attrs {
            base: self.base.value.clone(),
            ext_comm: self.ext_comm.as_ref().map(|set| set.value.clone()),
        }
    }
}

// ===== impl AttrSetsCxt =====

impl AttrSetsCxt {
    pub(crate) fn get_route_attr_sets(&mut self, attrs: &Attrs) -> RouteAttrs {
        RouteAttrs {
            base: self.base.get(&attrs.base),
            ext_comm: attrs.ext_comm.as_ref().map(|c| self.ext_comm.get(c)),
        }
    }

    // Drops a reference to interned attributes, garbage-collecting the
    // entries no longer referenced elsewhere.
    pub(crate) fn release(&mut self, attrs: RouteAttrs) {
        self.base.release(attrs.base);
        if let Some(ext_comm) = attrs.ext_comm {
            self.ext_comm.release(ext_comm);
        }
    }
}

// ===== impl AttrSets =====

impl<T> AttrSets<T>
where
    T: Clone + Eq + Ord + PartialEq + PartialOrd,
{
    fn get(&mut self, attr: &T) -> Arc<AttrSet<T>> {
        if let Some(attr_set) = self.tree.get(attr) {
            Arc::clone(attr_set)
        } else {
            self.next_index += 1;
            let attr_set = Arc::new(AttrSet {
                index: self.next_index,
                value: attr.clone(),
            });
            self.tree.insert(attr.clone(), Arc::clone(&attr_set));
            attr_set
        }
    }

    fn release(&mut self, attr_set: Arc<AttrSet<T>>) {
        // One reference is held by the tree itself.
        if Arc::strong_count(&attr_set) == 2 {
            self.tree.remove(&attr_set.value);
        }
    }
}

impl<T> Default for AttrSets<T> {
    fn default() -> AttrSets<T> {
        AttrSets {
            tree: Default::default(),
            next_index: 0,
        }
    }
}

// ===== impl Master =====

impl Master {
    // Adds a new path to the given destination.
    //
    // The destination holds the initial reference. A leaked path also holds
    // a reference on its parent and, when it originated from a different
    // instance, on that instance.
    pub(crate) fn path_insert(
        &mut self,
        table: TableKey,
        prefix: IpNetwork,
        path_type: PathType,
        attrs: RouteAttrs,
        extra: PathExtra,
        flags: PathFlags,
    ) -> Option<PathId> {
        if self
            .instances
            .get_mut(table.instance)
            .and_then(|instance| instance.table_mut(&table))
            .is_none()
        {
            self.attr_sets.release(attrs);
            return None;
        }

        if let Some(parent) =
            extra.parent.and_then(|parent| self.paths.get_mut(parent))
        {
            parent.lock += 1;
        }
        if let Some(bgp_orig) = extra.bgp_orig
            && bgp_orig != table.instance
            && let Some(instance) = self.instances.get_mut(bgp_orig)
        {
            instance.refcount += 1;
        }

        let path_id = self.paths.insert(PathInfo {
            path_type,
            table,
            prefix,
            attrs,
            extra,
            flags,
            lock: 1,
        });
        if let Some(table) = self
            .instances
            .get_mut(table.instance)
            .and_then(|instance| instance.table_mut(&table))
        {
            table
                .prefixes
                .entry(prefix)
                .or_default()
                .paths
                .push(path_id);
        }

        Some(path_id)
    }

    // Marks a path for removal. The path is unlinked from its destination
    // the next time the destination is processed.
    pub(crate) fn path_delete(&mut self, path_id: PathId) {
        if let Some(path) = self.paths.get_mut(path_id) {
            path.flags.insert(PathFlags::REMOVED);
        }
    }

    // Drops one reference to a path, freeing it (and dropping its own
    // references) once unreferenced.
    pub(crate) fn path_unlock(&mut self, path_id: PathId) {
        let mut next = Some(path_id);
        while let Some(path_id) = next.take() {
            let Some(path) = self.paths.get_mut(path_id) else {
                Error::PathNotFound(path_id).log();
                return;
            };
            path.lock = path.lock.saturating_sub(1);
            if path.lock > 0 {
                return;
            }

            let Some(path) = self.paths.remove(path_id) else {
                return;
            };
            if let Some(bgp_orig) = path.extra.bgp_orig
                && bgp_orig != path.table.instance
                && let Some(instance) = self.instances.get_mut(bgp_orig)
            {
                instance.refcount = instance.refcount.saturating_sub(1);
            }
            self.attr_sets.release(path.attrs);
            next = path.extra.parent;
        }
    }

    // Returns the path at the root of the leaking chain.
    pub(crate) fn path_root(&self, mut path_id: PathId) -> PathId {
        while let Some(parent) = self
            .paths
            .get(path_id)
            .and_then(|path| path.extra.parent)
            .filter(|parent| self.paths.contains(*parent))
        {
            path_id = parent;
        }
        path_id
    }

    // Checks nexthop reachability for a path. Paths ultimately originated
    // by redistribution or by EVPN are not subject to nexthop tracking.
    pub(crate) fn nexthop_valid(&self, path: &PathInfo) -> bool {
        if let Some(parent) = path.extra.parent {
            let root = self.path_root(parent);
            if let Some(root) = self.paths.get(root)
                && (matches!(root.path_type, PathType::Redistribute(_))
                    || root.table.safi == Safi::Evpn)
            {
                return true;
            }
        } else if matches!(path.path_type, PathType::Redistribute(_)) {
            return true;
        }

        let Some(nexthop) = path.tracked_nexthop() else {
            return true;
        };
        let instance_id = path.extra.bgp_orig.unwrap_or(path.table.instance);
        self.instances
            .get(instance_id)
            .is_none_or(|instance| instance.nexthop_reachable(&nexthop))
    }

    // Updates the aggregate counters covering the given prefix.
    pub(crate) fn aggregate_increment(
        &mut self,
        table: &TableKey,
        prefix: &IpNetwork,
    ) {
        self.aggregate_update(table, prefix, true);
    }

    pub(crate) fn aggregate_decrement(
        &mut self,
        table: &TableKey,
        prefix: &IpNetwork,
    ) {
        self.aggregate_update(table, prefix, false);
    }

    fn aggregate_update(
        &mut self,
        table: &TableKey,
        prefix: &IpNetwork,
        increment: bool,
    ) {
        if table.safi != Safi::Unicast {
            return;
        }
        if let Some(instance) = self.instances.get_mut(table.instance) {
            instance.aggregate_update(prefix, table.af, increment);
        }
    }

    // Runs the decision process for a destination.
    //
    // Paths marked for removal are unlinked, the best path is selected and
    // the forwarding plane is updated when the segment list of a unicast
    // destination changes. Failed forwarding plane updates are retried the
    // next time the destination is processed.
    pub(crate) fn process_dest(&mut self, key: &TableKey, prefix: &IpNetwork) {
        let Some(instance) = self.instances.get_mut(key.instance) else {
            return;
        };
        let table_id = instance.table_id;
        let Some(table) = instance.table_mut(key) else {
            return;
        };
        let Some(dest) = table.prefixes.get_mut(prefix) else {
            return;
        };

        // Unlink paths marked for removal.
        let mut reaped = vec![];
        dest.paths.retain(|path_id| {
            let removed = self
                .paths
                .get(*path_id)
                .is_none_or(|path| path.is_removed());
            if removed {
                reaped.push(*path_id);
            }
            !removed
        });

        // Select best path: highest local preference, first received wins
        // ties.
        let best = dest
            .paths
            .iter()
            .filter_map(|path_id| {
                self.paths.get(*path_id).map(|path| (*path_id, path))
            })
            .filter(|(_, path)| path.is_valid())
            .min_by_key(|(_, path)| {
                Reverse(
                    path.attrs.base.value.local_pref.unwrap_or(DFLT_LOCAL_PREF),
                )
            })
            .map(|(path_id, _)| path_id);
        if best != dest.best {
            match best {
                Some(_) => Debug::BestPathFound(prefix).log(),
                None => Debug::BestPathNotFound(prefix).log(),
            }
            dest.best = best;
        }

        // Update the forwarding plane.
        if key.safi == Safi::Unicast {
            let segs = best
                .and_then(|path_id| self.paths.get(path_id))
                .map(|path| path.extra.sids.clone())
                .filter(|sids| !sids.is_empty());
            if segs != dest.installed {
                let result = match &segs {
                    Some(segs) => self.fwd.install_encap_route(&EncapRouteMsg {
                        protocol: Protocol::BGP,
                        prefix: *prefix,
                        table_id,
                        segs: segs.clone(),
                        mode: Seg6Mode::Encap,
                    }),
                    None => self.fwd.remove_route(&RouteKeyMsg {
                        protocol: Protocol::BGP,
                        prefix: *prefix,
                        table_id,
                    }),
                };
                match result {
                    Ok(()) => dest.installed = segs,
                    Err(error) => Error::from(error).log(),
                }
            }
        }

        if dest.paths.is_empty() && dest.installed.is_none() {
            table.prefixes.remove(prefix);
        }

        for path_id in reaped {
            self.path_unlock(path_id);
        }
    }
}
