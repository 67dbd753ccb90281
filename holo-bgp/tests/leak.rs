//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv6Addr};

use bytes::{Bytes, BytesMut};
use const_addrs::{ip, ip4, ip6};
use holo_bgp::error::Error;
use holo_bgp::instance::{InstanceId, InstanceType, VpnPolicyFlags};
use holo_bgp::leak::LeakDirection;
use holo_bgp::leak::active::{
    LeakInactiveReason, from_vpn_active, to_vpn_active,
};
use holo_bgp::master::Master;
use holo_bgp::packet::attribute::{Attrs, ExtComms, MpReach};
use holo_bgp::packet::consts::AttrType;
use holo_bgp::packet::error::DecodeError;
use holo_bgp::packet::nlri::VpnNlri;
use holo_bgp::policy::{RouteMap, RouteMapAction, RouteMapEntry, SetAction};
use holo_bgp::rib::{PathFlags, PathInfo, PathType, TableKey};
use holo_utils::bgp::{ExtComm, RouteDistinguisher};
use holo_utils::ip::AddressFamily;
use holo_utils::mpls::Label;
use holo_utils::protocol::Protocol;
use holo_utils::southbound::{
    DataplaneOp, EncapRouteMsg, LocalSidMsg, RecordingDataplane, RouteKeyMsg,
};
use holo_utils::srv6::{Seg6LocalAction, Seg6Mode};
use ipnetwork::{IpNetwork, Ipv6Network};
use maplit::btreeset;
use nix::errno::Errno;
use smallvec::smallvec;

const RED_SID: Ipv6Addr = ip6!("fc00:0:1:0:2::");
const RED_TABLE: u32 = 10;
const BLUE_TABLE: u32 = 20;

struct Topology {
    master: Master,
    dataplane: RecordingDataplane,
    red: InstanceId,
    blue: InstanceId,
}

fn net(s: &str) -> IpNetwork {
    s.parse().unwrap()
}

fn rd(s: &str) -> RouteDistinguisher {
    s.parse().unwrap()
}

fn rt(s: &str) -> ExtComm {
    s.parse().unwrap()
}

fn static_route() -> PathType {
    PathType::Redistribute(Protocol::STATIC)
}

// Default instance plus two VRFs, "red" and "blue", with no VPN policy.
fn setup() -> Topology {
    holo_utils::test::setup();
    let dataplane = RecordingDataplane::default();
    let mut master = Master::new(
        65000,
        Some(ip4!("1.1.1.1")),
        Box::new(dataplane.clone()),
    );
    let red = master
        .instance_add("red", InstanceType::Vrf, Some(10), RED_TABLE)
        .unwrap();
    let blue = master
        .instance_add("blue", InstanceType::Vrf, Some(20), BLUE_TABLE)
        .unwrap();
    Topology {
        master,
        dataplane,
        red,
        blue,
    }
}

// Exports red's IPv4 routes with RT/RD 65000:1 and a static SID.
fn red_export(topo: &mut Topology) {
    topo.master
        .vpn_policy_update(
            topo.red,
            AddressFamily::Ipv4,
            &[LeakDirection::ToVpn],
            |policy| {
                policy.flags.insert(VpnPolicyFlags::EXPORT);
                policy.rtlist_tovpn = btreeset![rt("65000:1")];
                policy.rd = Some(rd("65000:1"));
                policy.tovpn_sid = Some(RED_SID);
            },
        )
        .unwrap();
}

// Imports into blue the IPv4 VPN routes tagged with RT 65000:1.
fn blue_import(topo: &mut Topology) {
    topo.master
        .vpn_policy_update(
            topo.blue,
            AddressFamily::Ipv4,
            &[LeakDirection::FromVpn],
            |policy| {
                policy.flags.insert(VpnPolicyFlags::IMPORT);
                policy.rtlist_fromvpn = btreeset![rt("65000:1")];
            },
        )
        .unwrap();
}

fn vpn_attrs(rts: &[&str], sid: Ipv6Addr, nexthop: IpAddr) -> Attrs {
    let mut attrs = Attrs::default();
    attrs.base.mp_nexthop = Some(nexthop);
    attrs.base.srv6_sid = Some(sid);
    attrs.ext_comm =
        Some(ExtComms(rts.iter().map(|value| rt(value)).collect()));
    attrs
}

// Wire form of the attributes built by `vpn_attrs`.
fn mp_reach(rts: &[&str], sid: Ipv6Addr, nexthop: IpAddr) -> MpReach {
    let mut buf = BytesMut::new();
    vpn_attrs(rts, sid, nexthop).encode(&mut buf, AddressFamily::Ipv4);
    MpReach::new(nexthop, buf.freeze())
}

fn vpn_table(topo: &Topology, rd_str: &str) -> TableKey {
    TableKey::vpn(topo.master.vpn_instance, AddressFamily::Ipv4, rd(rd_str))
}

fn live_paths<'a>(
    topo: &'a Topology,
    table: &TableKey,
    prefix: &IpNetwork,
) -> Vec<&'a PathInfo> {
    topo.master
        .dest_paths(table, prefix)
        .into_iter()
        .filter(|(_, path)| !path.is_removed())
        .map(|(_, path)| path)
        .collect()
}

fn encap_op(prefix: &str, table_id: u32, sid: Ipv6Addr) -> DataplaneOp {
    DataplaneOp::InstallEncap(EncapRouteMsg {
        protocol: Protocol::BGP,
        prefix: net(prefix),
        table_id,
        segs: smallvec![sid],
        mode: Seg6Mode::Encap,
    })
}

fn remove_op(prefix: &str, table_id: u32) -> DataplaneOp {
    DataplaneOp::Remove(RouteKeyMsg {
        protocol: Protocol::BGP,
        prefix: net(prefix),
        table_id,
    })
}

#[test]
fn export_to_vpn() {
    let mut topo = setup();
    red_export(&mut topo);

    let path_id = topo
        .master
        .route_add(topo.red, net("10.0.0.0/24"), static_route(), Attrs::default())
        .unwrap();

    let table = vpn_table(&topo, "65000:1");
    let prefix = net("10.0.0.0/24");
    let paths = topo.master.dest_paths(&table, &prefix);
    assert_eq!(paths.len(), 1);
    let (vpn_path_id, vpn_path) = paths[0];
    assert_eq!(vpn_path.path_type, PathType::Imported);
    assert_eq!(vpn_path.extra.parent, Some(path_id));
    assert_eq!(vpn_path.extra.bgp_orig, Some(topo.red));
    assert_eq!(vpn_path.extra.labels.as_slice(), &[Label::implicit_null()]);
    assert_eq!(vpn_path.extra.sids.as_slice(), &[RED_SID]);
    let base = &vpn_path.attrs.base.value;
    assert_eq!(base.srv6_sid, Some(RED_SID));
    assert_eq!(base.originator_id, Some(ip4!("1.1.1.1")));
    let ext_comm = &vpn_path.attrs.ext_comm.as_ref().unwrap().value;
    assert_eq!(ext_comm.0, btreeset![rt("65000:1")]);
    assert!(vpn_path.is_valid());
    assert_eq!(
        topo.master.dest(&table, &prefix).unwrap().best,
        Some(vpn_path_id)
    );

    // Only the per-VRF SID binding reaches the forwarding plane.
    assert_eq!(
        topo.dataplane.ops(),
        vec![DataplaneOp::InstallLocalSid(LocalSidMsg {
            protocol: Protocol::BGP,
            sid: Ipv6Network::from(RED_SID),
            action: Seg6LocalAction::EndDt4(RED_TABLE),
        })]
    );

    // The exported route is advertised with the implicit-null label.
    let advertised = topo.master.vpn_nlri_tx(AddressFamily::Ipv4);
    assert_eq!(advertised.len(), 1);
    let (nlri, attrs) = &advertised[0];
    assert_eq!(nlri.rd, rd("65000:1"));
    assert_eq!(nlri.prefix, prefix);
    assert_eq!(nlri.label, Label::implicit_null());
    assert_eq!(attrs.base.srv6_sid, Some(RED_SID));
}

#[test]
fn export_nexthop_override() {
    let mut topo = setup();
    red_export(&mut topo);
    let prefix = net("10.0.0.0/24");
    let mut attrs = Attrs::default();
    attrs.base.nexthop = Some(ip!("192.168.1.1"));
    topo.master
        .route_add(topo.red, prefix, static_route(), attrs)
        .unwrap();

    // Without an override the exported route carries nexthop-self.
    let table = vpn_table(&topo, "65000:1");
    let paths = topo.master.dest_paths(&table, &prefix);
    assert!(paths[0].1.flags.contains(PathFlags::NH_SELF));
    assert_eq!(
        paths[0].1.attrs.base.value.mp_nexthop,
        Some(ip!("192.168.1.1"))
    );

    // A static override replaces the nexthop and turns nexthop-self off.
    topo.master
        .vpn_policy_update(
            topo.red,
            AddressFamily::Ipv4,
            &[LeakDirection::ToVpn],
            |policy| policy.nexthop = Some(ip!("2001:db8::100")),
        )
        .unwrap();
    let paths = topo.master.dest_paths(&table, &prefix);
    assert_eq!(paths.len(), 1);
    assert!(!paths[0].1.flags.contains(PathFlags::NH_SELF));
    assert_eq!(
        paths[0].1.attrs.base.value.mp_nexthop,
        Some(ip!("2001:db8::100"))
    );
}

#[test]
fn import_from_vpn() {
    let mut topo = setup();
    red_export(&mut topo);
    blue_import(&mut topo);
    topo.dataplane.clear();

    topo.master
        .route_add(topo.red, net("10.0.0.0/24"), static_route(), Attrs::default())
        .unwrap();

    let prefix = net("10.0.0.0/24");
    let vpn_paths = topo.master.dest_paths(&vpn_table(&topo, "65000:1"), &prefix);
    let (vpn_path_id, _) = vpn_paths[0];

    let blue_table = TableKey::unicast(topo.blue, AddressFamily::Ipv4);
    let paths = live_paths(&topo, &blue_table, &prefix);
    assert_eq!(paths.len(), 1);
    assert_eq!(paths[0].path_type, PathType::Imported);
    assert_eq!(paths[0].extra.parent, Some(vpn_path_id));
    assert_eq!(paths[0].extra.bgp_orig, Some(topo.red));
    assert_eq!(paths[0].extra.sids.as_slice(), &[RED_SID]);
    assert_eq!(
        topo.dataplane.ops(),
        vec![encap_op("10.0.0.0/24", BLUE_TABLE, RED_SID)]
    );

    // Red never imports its own route back.
    let red_table = TableKey::unicast(topo.red, AddressFamily::Ipv4);
    assert_eq!(live_paths(&topo, &red_table, &prefix).len(), 1);

    // Withdrawing the source route removes both copies.
    topo.dataplane.clear();
    topo.master.route_del(topo.red, prefix, static_route());
    assert!(topo.master.dest(&blue_table, &prefix).is_none());
    assert!(
        topo.master
            .dest(&vpn_table(&topo, "65000:1"), &prefix)
            .is_none()
    );
    assert_eq!(
        topo.dataplane.ops(),
        vec![remove_op("10.0.0.0/24", BLUE_TABLE)]
    );
    assert!(topo.master.paths.is_empty());
}

#[test]
fn export_disable_withdraws_only_own_routes() {
    let mut topo = setup();
    red_export(&mut topo);
    topo.master
        .vpn_policy_update(
            topo.blue,
            AddressFamily::Ipv4,
            &[LeakDirection::ToVpn],
            |policy| {
                policy.flags.insert(VpnPolicyFlags::EXPORT);
                policy.rtlist_tovpn = btreeset![rt("65000:2")];
                policy.rd = Some(rd("65000:2"));
            },
        )
        .unwrap();
    topo.master
        .route_add(topo.red, net("10.0.0.0/24"), static_route(), Attrs::default())
        .unwrap();
    topo.master
        .route_add(topo.red, net("10.0.1.0/24"), static_route(), Attrs::default())
        .unwrap();
    topo.master
        .route_add(topo.blue, net("10.0.0.0/24"), static_route(), Attrs::default())
        .unwrap();

    topo.master
        .vpn_policy_update(
            topo.red,
            AddressFamily::Ipv4,
            &[LeakDirection::ToVpn],
            |policy| {
                policy.flags.remove(VpnPolicyFlags::EXPORT);
            },
        )
        .unwrap();

    let red_vpn = vpn_table(&topo, "65000:1");
    assert!(topo.master.dest(&red_vpn, &net("10.0.0.0/24")).is_none());
    assert!(topo.master.dest(&red_vpn, &net("10.0.1.0/24")).is_none());
    let blue_vpn = vpn_table(&topo, "65000:2");
    let paths = live_paths(&topo, &blue_vpn, &net("10.0.0.0/24"));
    assert_eq!(paths.len(), 1);
    assert_eq!(paths[0].extra.bgp_orig, Some(topo.blue));

    // The VRF routes themselves stay in place.
    let red_table = TableKey::unicast(topo.red, AddressFamily::Ipv4);
    assert_eq!(live_paths(&topo, &red_table, &net("10.0.0.0/24")).len(), 1);
    assert_eq!(live_paths(&topo, &red_table, &net("10.0.1.0/24")).len(), 1);
}

#[test]
fn export_no_change() {
    let mut topo = setup();
    red_export(&mut topo);
    blue_import(&mut topo);
    topo.master
        .route_add(topo.red, net("10.0.0.0/24"), static_route(), Attrs::default())
        .unwrap();
    let attr_sets = topo.master.attr_sets.base.tree.len();
    let npaths = topo.master.paths.len();
    topo.dataplane.clear();

    topo.master
        .route_add(topo.red, net("10.0.0.0/24"), static_route(), Attrs::default())
        .unwrap();

    assert_eq!(topo.master.paths.len(), npaths);
    assert_eq!(topo.master.attr_sets.base.tree.len(), attr_sets);
    assert!(topo.dataplane.ops().is_empty());
}

#[test]
fn export_attribute_change() {
    let mut topo = setup();
    red_export(&mut topo);
    blue_import(&mut topo);
    let prefix = net("10.0.0.0/24");
    topo.master
        .route_add(topo.red, prefix, static_route(), Attrs::default())
        .unwrap();

    let mut attrs = Attrs::default();
    attrs.base.med = Some(50);
    topo.master
        .route_add(topo.red, prefix, static_route(), attrs)
        .unwrap();

    let vpn_paths = live_paths(&topo, &vpn_table(&topo, "65000:1"), &prefix);
    assert_eq!(vpn_paths.len(), 1);
    assert_eq!(vpn_paths[0].attrs.base.value.med, Some(50));
    let blue_table = TableKey::unicast(topo.blue, AddressFamily::Ipv4);
    let blue_paths = live_paths(&topo, &blue_table, &prefix);
    assert_eq!(blue_paths.len(), 1);
    assert_eq!(blue_paths[0].attrs.base.value.med, Some(50));
}

#[test]
fn import_rt_mismatch() {
    let mut topo = setup();
    blue_import(&mut topo);

    let attrs = vpn_attrs(&["65000:7"], RED_SID, ip!("2001:db8::1"));
    topo.master
        .vpn_route_add(rd("65000:7"), net("10.0.0.0/24"), attrs, Label::new(16))
        .unwrap();

    let blue_table = TableKey::unicast(topo.blue, AddressFamily::Ipv4);
    assert!(topo.master.dest(&blue_table, &net("10.0.0.0/24")).is_none());
    assert!(topo.dataplane.ops().is_empty());
}

#[test]
fn import_one_copy_per_parent() {
    let mut topo = setup();
    blue_import(&mut topo);
    let prefix = net("10.0.0.0/24");
    let sid1 = ip6!("fc00:0:2:0:1::");
    let sid2 = ip6!("fc00:0:3:0:1::");

    let vpn1 = topo
        .master
        .vpn_route_add(
            rd("65000:11"),
            prefix,
            vpn_attrs(&["65000:1"], sid1, ip!("2001:db8::2")),
            Label::new(16),
        )
        .unwrap();
    let vpn2 = topo
        .master
        .vpn_route_add(
            rd("65000:12"),
            prefix,
            vpn_attrs(&["65000:1"], sid2, ip!("2001:db8::3")),
            Label::new(16),
        )
        .unwrap();
    // Re-announcing the same VPN route doesn't duplicate its copy.
    topo.dataplane.clear();
    topo.master
        .vpn_route_add(
            rd("65000:11"),
            prefix,
            vpn_attrs(&["65000:1"], sid1, ip!("2001:db8::2")),
            Label::new(16),
        )
        .unwrap();
    assert!(topo.dataplane.ops().is_empty());

    let blue_table = TableKey::unicast(topo.blue, AddressFamily::Ipv4);
    let paths = live_paths(&topo, &blue_table, &prefix);
    assert_eq!(paths.len(), 2);
    let parents = paths
        .iter()
        .map(|path| path.extra.parent)
        .collect::<BTreeSet<_>>();
    assert_eq!(parents, btreeset![Some(vpn1), Some(vpn2)]);

    // The nexthop of a VPN route is replaced on import.
    for path in &paths {
        assert!(path.extra.nexthop_orig.is_some());
        assert_eq!(
            path.attrs.base.value.nexthop,
            Some(ip!("0.0.0.0"))
        );
        assert_eq!(path.attrs.base.value.mp_nexthop, None);
    }

    // Withdrawing one parent leaves the other copy.
    topo.master.vpn_route_del(rd("65000:11"), prefix);
    let paths = live_paths(&topo, &blue_table, &prefix);
    assert_eq!(paths.len(), 1);
    assert_eq!(paths[0].extra.parent, Some(vpn2));
    assert_eq!(paths[0].extra.sids.as_slice(), &[sid2]);
}

#[test]
fn imported_routes_not_reexported() {
    let mut topo = setup();
    red_export(&mut topo);
    topo.master
        .vpn_policy_update(
            topo.red,
            AddressFamily::Ipv4,
            &[LeakDirection::FromVpn],
            |policy| {
                policy.flags.insert(VpnPolicyFlags::IMPORT);
                policy.rtlist_fromvpn = btreeset![rt("65000:1")];
            },
        )
        .unwrap();
    blue_import(&mut topo);
    let prefix = net("10.0.0.0/24");
    topo.master
        .route_add(topo.red, prefix, static_route(), Attrs::default())
        .unwrap();

    // Enabling export on blue walks its table, imported copy included.
    topo.master
        .vpn_policy_update(
            topo.blue,
            AddressFamily::Ipv4,
            &[LeakDirection::ToVpn],
            |policy| {
                policy.flags.insert(VpnPolicyFlags::EXPORT);
                policy.rtlist_tovpn = btreeset![rt("65000:1")];
                policy.rd = Some(rd("65000:2"));
            },
        )
        .unwrap();

    // Blue imported red's route but doesn't export the copy back.
    let blue_table = TableKey::unicast(topo.blue, AddressFamily::Ipv4);
    assert_eq!(live_paths(&topo, &blue_table, &prefix).len(), 1);
    assert!(
        topo.master
            .dest(&vpn_table(&topo, "65000:2"), &prefix)
            .is_none()
    );
    let red_table = TableKey::unicast(topo.red, AddressFamily::Ipv4);
    assert_eq!(live_paths(&topo, &red_table, &prefix).len(), 1);
}

#[test]
fn activation_reasons() {
    let mut topo = setup();
    let route_maps = topo.master.route_maps.clone();
    let af = AddressFamily::Ipv4;

    let red = topo.master.instances.get(topo.red).unwrap();
    assert_eq!(
        to_vpn_active(red, af, &route_maps),
        Err(LeakInactiveReason::ExportNotSet)
    );
    assert_eq!(
        from_vpn_active(red, af, &route_maps),
        Err(LeakInactiveReason::ImportNotSet)
    );

    let red = topo.master.instances.get_mut(topo.red).unwrap();
    let policy = red.vpn_policy.get_mut(af);
    policy.flags.insert(VpnPolicyFlags::EXPORT | VpnPolicyFlags::IMPORT);
    let red = topo.master.instances.get(topo.red).unwrap();
    assert_eq!(
        to_vpn_active(red, af, &route_maps),
        Err(LeakInactiveReason::RtListToVpnUndefined)
    );
    assert_eq!(
        from_vpn_active(red, af, &route_maps),
        Err(LeakInactiveReason::RtListFromVpnUndefined)
    );

    let red = topo.master.instances.get_mut(topo.red).unwrap();
    let policy = red.vpn_policy.get_mut(af);
    policy.rtlist_tovpn = btreeset![rt("65000:1")];
    policy.rtlist_fromvpn = btreeset![rt("65000:1")];
    policy.rmap_fromvpn = Some("missing".to_owned());
    let red = topo.master.instances.get(topo.red).unwrap();
    assert_eq!(
        to_vpn_active(red, af, &route_maps),
        Err(LeakInactiveReason::RdUndefined)
    );
    assert_eq!(
        from_vpn_active(red, af, &route_maps),
        Err(LeakInactiveReason::RouteMapFromVpnUndefined)
    );

    let red = topo.master.instances.get_mut(topo.red).unwrap();
    let policy = red.vpn_policy.get_mut(af);
    policy.rd = Some(rd("65000:1"));
    policy.sid_auto = true;
    policy.rmap_fromvpn = None;
    red.vrf_id = None;
    let red = topo.master.instances.get(topo.red).unwrap();
    assert_eq!(
        to_vpn_active(red, af, &route_maps),
        Err(LeakInactiveReason::AutoSidNotAllocated)
    );
    assert_eq!(
        from_vpn_active(red, af, &route_maps),
        Err(LeakInactiveReason::DestinationVrfUnknown)
    );

    // Views don't take part in VPN leaking.
    let view = topo
        .master
        .instance_add("view1", InstanceType::View, Some(30), 30)
        .unwrap();
    let view = topo.master.instances.get(view).unwrap();
    assert_eq!(
        to_vpn_active(view, af, &route_maps),
        Err(LeakInactiveReason::SourceNotVrfOrDefault)
    );
    assert_eq!(
        from_vpn_active(view, af, &route_maps),
        Err(LeakInactiveReason::DestinationNotVrfOrDefault)
    );
}

#[test]
fn auto_sid_allocation() {
    let mut topo = setup();
    let prefix = net("10.0.0.0/24");
    topo.master
        .vpn_policy_update(
            topo.red,
            AddressFamily::Ipv4,
            &[LeakDirection::ToVpn],
            |policy| {
                policy.flags.insert(VpnPolicyFlags::EXPORT);
                policy.rtlist_tovpn = btreeset![rt("65000:1")];
                policy.rd = Some(rd("65000:1"));
                policy.sid_auto = true;
            },
        )
        .unwrap();
    topo.master
        .route_add(topo.red, prefix, static_route(), Attrs::default())
        .unwrap();

    // Nothing is exported until the SID is allocated.
    let table = vpn_table(&topo, "65000:1");
    assert!(topo.master.dest(&table, &prefix).is_none());
    assert!(topo.dataplane.ops().is_empty());

    topo.master
        .vpn_sid_allocated(topo.red, AddressFamily::Ipv4, Some(RED_SID))
        .unwrap();
    let paths = live_paths(&topo, &table, &prefix);
    assert_eq!(paths.len(), 1);
    assert_eq!(paths[0].attrs.base.value.srv6_sid, Some(RED_SID));
    assert_eq!(topo.dataplane.ops().len(), 1);

    // Releasing the SID withdraws the export and the binding.
    topo.dataplane.clear();
    topo.master
        .vpn_sid_allocated(topo.red, AddressFamily::Ipv4, None)
        .unwrap();
    assert!(topo.master.dest(&table, &prefix).is_none());
    assert_eq!(
        topo.dataplane.ops(),
        vec![DataplaneOp::Remove(RouteKeyMsg {
            protocol: Protocol::BGP,
            prefix: IpNetwork::V6(Ipv6Network::from(RED_SID)),
            table_id: 0,
        })]
    );
}

#[test]
fn sid_binding_failure() {
    let mut topo = setup();
    topo.dataplane.set_fail(true);
    let result = topo.master.vpn_policy_update(
        topo.red,
        AddressFamily::Ipv4,
        &[LeakDirection::ToVpn],
        |policy| {
            policy.flags.insert(VpnPolicyFlags::EXPORT);
            policy.rtlist_tovpn = btreeset![rt("65000:1")];
            policy.rd = Some(rd("65000:1"));
            policy.tovpn_sid = Some(RED_SID);
        },
    );
    assert!(matches!(result, Err(Error::Forwarding(_))));

    // Routes are still exported.
    topo.dataplane.set_fail(false);
    topo.master
        .route_add(topo.red, net("10.0.0.0/24"), static_route(), Attrs::default())
        .unwrap();
    let table = vpn_table(&topo, "65000:1");
    assert_eq!(live_paths(&topo, &table, &net("10.0.0.0/24")).len(), 1);
}

#[test]
fn sid_binding_removal_failure() {
    let mut topo = setup();
    red_export(&mut topo);

    // The SID manager withdrew the binding first.
    topo.dataplane.clear();
    topo.dataplane.fail_next(Errno::ESRCH);
    topo.master
        .vpn_sid_allocated(topo.red, AddressFamily::Ipv4, None)
        .unwrap();
    assert!(topo.dataplane.ops().is_empty());

    let sid1 = ip6!("fc00:0:1:0:3::");
    topo.master
        .vpn_sid_allocated(topo.red, AddressFamily::Ipv4, Some(sid1))
        .unwrap();
    assert_eq!(
        topo.dataplane.ops(),
        vec![DataplaneOp::InstallLocalSid(LocalSidMsg {
            protocol: Protocol::BGP,
            sid: Ipv6Network::from(sid1),
            action: Seg6LocalAction::EndDt4(RED_TABLE),
        })]
    );

    // A rejected removal doesn't hold back the next binding.
    let sid2 = ip6!("fc00:0:1:0:4::");
    topo.dataplane.clear();
    topo.dataplane.fail_next(Errno::EPERM);
    let result = topo.master.vpn_sid_allocated(
        topo.red,
        AddressFamily::Ipv4,
        Some(sid2),
    );
    assert!(matches!(result, Err(Error::Forwarding(_))));
    topo.master
        .vpn_sid_allocated(topo.red, AddressFamily::Ipv4, Some(sid2))
        .unwrap();
    assert_eq!(
        topo.dataplane.ops(),
        vec![DataplaneOp::InstallLocalSid(LocalSidMsg {
            protocol: Protocol::BGP,
            sid: Ipv6Network::from(sid2),
            action: Seg6LocalAction::EndDt4(RED_TABLE),
        })]
    );
}

#[test]
fn import_route_map() {
    let mut topo = setup();
    red_export(&mut topo);
    let prefix = net("10.0.0.0/24");
    topo.master
        .route_add(topo.red, prefix, static_route(), Attrs::default())
        .unwrap();
    topo.master
        .route_map_update(
            "from-vpn",
            Some(RouteMap::new(
                "from-vpn".to_owned(),
                vec![RouteMapEntry {
                    seq: 10,
                    action: RouteMapAction::Permit,
                    matches: vec![],
                    sets: vec![SetAction::LocalPref(200)],
                }],
            )),
        )
        .unwrap();
    topo.master
        .vpn_policy_update(
            topo.blue,
            AddressFamily::Ipv4,
            &[LeakDirection::FromVpn],
            |policy| {
                policy.flags.insert(VpnPolicyFlags::IMPORT);
                policy.rtlist_fromvpn = btreeset![rt("65000:1")];
                policy.rmap_fromvpn = Some("from-vpn".to_owned());
            },
        )
        .unwrap();

    let blue_table = TableKey::unicast(topo.blue, AddressFamily::Ipv4);
    let paths = live_paths(&topo, &blue_table, &prefix);
    assert_eq!(paths.len(), 1);
    assert_eq!(paths[0].attrs.base.value.local_pref, Some(200));

    // Replacing the route-map with a deny-all one withdraws the copy.
    topo.master
        .route_map_update(
            "from-vpn",
            Some(RouteMap::new(
                "from-vpn".to_owned(),
                vec![RouteMapEntry {
                    seq: 10,
                    action: RouteMapAction::Deny,
                    matches: vec![],
                    sets: vec![],
                }],
            )),
        )
        .unwrap();
    assert!(topo.master.dest(&blue_table, &prefix).is_none());

    // Removing a referenced route-map deactivates the import.
    topo.master.route_map_update("from-vpn", None).unwrap();
    let blue = topo.master.instances.get(topo.blue).unwrap();
    assert_eq!(
        from_vpn_active(blue, AddressFamily::Ipv4, &topo.master.route_maps),
        Err(LeakInactiveReason::RouteMapFromVpnUndefined)
    );
}

#[test]
fn nexthop_tracking() {
    let mut topo = setup();
    blue_import(&mut topo);
    let prefix = net("10.0.0.0/24");
    let nexthop = ip!("2001:db8::1");
    topo.master
        .vpn_route_add(
            rd("65000:7"),
            prefix,
            vpn_attrs(&["65000:1"], RED_SID, nexthop),
            Label::new(16),
        )
        .unwrap();
    topo.dataplane.clear();

    let default = topo.master.vpn_instance;
    topo.master.nht_update(default, nexthop, None);
    let blue_table = TableKey::unicast(topo.blue, AddressFamily::Ipv4);
    let paths = live_paths(&topo, &blue_table, &prefix);
    assert_eq!(paths.len(), 1);
    assert!(!paths[0].is_valid());
    assert_eq!(topo.master.dest(&blue_table, &prefix).unwrap().best, None);
    assert_eq!(
        topo.dataplane.ops(),
        vec![remove_op("10.0.0.0/24", BLUE_TABLE)]
    );

    topo.dataplane.clear();
    topo.master.nht_update(default, nexthop, Some(10));
    let paths = live_paths(&topo, &blue_table, &prefix);
    assert!(paths[0].is_valid());
    assert_eq!(
        topo.dataplane.ops(),
        vec![encap_op("10.0.0.0/24", BLUE_TABLE, RED_SID)]
    );
}

#[test]
fn aggregate_counters() {
    let mut topo = setup();
    red_export(&mut topo);
    blue_import(&mut topo);
    let aggregate = net("10.0.0.0/8");
    topo.master
        .route_add(topo.red, net("10.0.0.0/24"), static_route(), Attrs::default())
        .unwrap();
    topo.master.aggregate_add(topo.blue, aggregate);
    assert_eq!(topo.master.aggregate_count(topo.blue, &aggregate), Some(1));

    topo.master
        .route_add(topo.red, net("10.0.1.0/24"), static_route(), Attrs::default())
        .unwrap();
    // Outside of the aggregate.
    topo.master
        .route_add(topo.red, net("192.168.0.0/24"), static_route(), Attrs::default())
        .unwrap();
    assert_eq!(topo.master.aggregate_count(topo.blue, &aggregate), Some(2));

    topo.master
        .route_del(topo.red, net("10.0.0.0/24"), static_route());
    assert_eq!(topo.master.aggregate_count(topo.blue, &aggregate), Some(1));
}

#[test]
fn vrf_id_update() {
    let mut topo = setup();
    red_export(&mut topo);
    blue_import(&mut topo);
    let prefix = net("10.0.0.0/24");
    topo.master
        .route_add(topo.red, prefix, static_route(), Attrs::default())
        .unwrap();
    let blue_table = TableKey::unicast(topo.blue, AddressFamily::Ipv4);
    assert_eq!(live_paths(&topo, &blue_table, &prefix).len(), 1);

    topo.master.instance_vrf_id_update(topo.blue, None).unwrap();
    assert!(topo.master.dest(&blue_table, &prefix).is_none());

    topo.master
        .instance_vrf_id_update(topo.blue, Some(20))
        .unwrap();
    assert_eq!(live_paths(&topo, &blue_table, &prefix).len(), 1);
}

#[test]
fn instance_delete() {
    let mut topo = setup();
    red_export(&mut topo);
    blue_import(&mut topo);
    let prefix = net("10.0.0.0/24");
    topo.master
        .route_add(topo.red, prefix, static_route(), Attrs::default())
        .unwrap();
    assert_eq!(topo.master.instances.get(topo.red).unwrap().refcount, 2);

    let default = topo.master.vpn_instance;
    assert!(matches!(
        topo.master.instance_delete(default),
        Err(Error::InstanceInUse(..))
    ));
    assert!(matches!(
        topo.master.instance_add("red", InstanceType::Vrf, Some(11), 11),
        Err(Error::InstanceExists(_))
    ));

    topo.dataplane.clear();
    topo.master.instance_delete(topo.red).unwrap();
    assert!(topo.master.instance_lookup("red").is_none());
    let ops = topo.dataplane.ops();
    assert!(ops.contains(&remove_op("10.0.0.0/24", BLUE_TABLE)));
    assert!(ops.contains(&remove_op("fc00:0:1:0:2::/128", 0)));
    let blue_table = TableKey::unicast(topo.blue, AddressFamily::Ipv4);
    assert!(topo.master.dest(&blue_table, &prefix).is_none());
    assert!(
        topo.master
            .dest(&vpn_table(&topo, "65000:1"), &prefix)
            .is_none()
    );
    assert!(topo.master.paths.is_empty());
    assert!(matches!(
        topo.master.instance_delete(topo.red),
        Err(Error::InstanceNotFound(_))
    ));
}

#[test]
fn shutdown() {
    let mut topo = setup();
    red_export(&mut topo);
    blue_import(&mut topo);
    let prefix = net("10.0.0.0/24");
    topo.master
        .route_add(topo.red, prefix, static_route(), Attrs::default())
        .unwrap();
    topo.dataplane.clear();

    topo.master.shutdown();
    let ops = topo.dataplane.ops();
    assert!(ops.contains(&remove_op("10.0.0.0/24", BLUE_TABLE)));
    assert!(ops.contains(&remove_op("fc00:0:1:0:2::/128", 0)));
    assert!(!ops.iter().any(|op| matches!(
        op,
        DataplaneOp::InstallEncap(_) | DataplaneOp::InstallLocalSid(_)
    )));

    // The RIB itself survives.
    let blue_table = TableKey::unicast(topo.blue, AddressFamily::Ipv4);
    assert_eq!(live_paths(&topo, &blue_table, &prefix).len(), 1);

    // Nothing is left to withdraw.
    topo.dataplane.clear();
    topo.master.shutdown();
    assert!(topo.dataplane.ops().is_empty());
}

#[test]
fn vpn_nlri_rx() {
    let mut topo = setup();
    blue_import(&mut topo);
    let nlri = VpnNlri {
        path_id: None,
        label: Label::new(16),
        rd: rd("65000:9"),
        prefix: net("10.9.0.0/16"),
    };
    let mut buf = BytesMut::new();
    nlri.encode(&mut buf);
    let buf = buf.freeze();

    let reach = mp_reach(&["65000:1"], RED_SID, ip!("2001:db8::9"));
    topo.master
        .vpn_nlri_rx(AddressFamily::Ipv4, false, buf.clone(), Some(reach))
        .unwrap();
    let blue_table = TableKey::unicast(topo.blue, AddressFamily::Ipv4);
    let paths = live_paths(&topo, &blue_table, &nlri.prefix);
    assert_eq!(paths.len(), 1);
    assert_eq!(paths[0].extra.sids.as_slice(), &[RED_SID]);
    assert_eq!(paths[0].extra.nexthop_orig, Some(ip!("2001:db8::9")));
    let vpn_paths =
        live_paths(&topo, &vpn_table(&topo, "65000:9"), &nlri.prefix);
    assert_eq!(vpn_paths[0].extra.labels.as_slice(), &[Label::new(16)]);
    let ext_comm = &vpn_paths[0].attrs.ext_comm.as_ref().unwrap().value;
    assert_eq!(ext_comm.0, btreeset![rt("65000:1")]);

    topo.master
        .vpn_nlri_rx(AddressFamily::Ipv4, false, buf, None)
        .unwrap();
    assert!(topo.master.dest(&blue_table, &nlri.prefix).is_none());
    assert!(topo.master.paths.is_empty());
}

#[test]
fn vpn_nlri_rx_malformed() {
    let mut topo = setup();
    blue_import(&mut topo);
    let nlri = VpnNlri {
        path_id: None,
        label: Label::new(16),
        rd: rd("65000:9"),
        prefix: net("10.9.0.0/16"),
    };
    let mut buf = BytesMut::new();
    nlri.encode(&mut buf);
    // Truncated second entry.
    buf.extend_from_slice(&[0x70, 0x00, 0x01]);

    let reach = mp_reach(&["65000:1"], RED_SID, ip!("2001:db8::9"));
    let result = topo.master.vpn_nlri_rx(
        AddressFamily::Ipv4,
        false,
        Bytes::from(buf),
        Some(reach),
    );
    assert!(matches!(result, Err(Error::NlriDecodeError(_))));
    assert!(topo.master.paths.is_empty());
    assert!(topo.dataplane.ops().is_empty());
}

#[test]
fn vpn_nlri_rx_malformed_attrs() {
    let mut topo = setup();
    blue_import(&mut topo);
    let nlri = VpnNlri {
        path_id: None,
        label: Label::new(16),
        rd: rd("65000:9"),
        prefix: net("10.9.0.0/16"),
    };
    let mut buf = BytesMut::new();
    nlri.encode(&mut buf);

    // Extended Communities attribute whose length isn't a multiple of 8.
    let reach = MpReach::new(
        ip!("2001:db8::9"),
        Bytes::from_static(&[
            0xc0, 0x10, 0x07, 0x00, 0x02, 0xfd, 0xe8, 0x00, 0x00, 0x01,
        ]),
    );
    let result = topo.master.vpn_nlri_rx(
        AddressFamily::Ipv4,
        false,
        buf.freeze(),
        Some(reach),
    );
    assert!(matches!(
        result,
        Err(Error::NlriDecodeError(DecodeError::Attribute(
            AttrType::ExtCommunities,
            _
        )))
    ));
    assert!(topo.master.paths.is_empty());
    assert!(topo.dataplane.ops().is_empty());
}
