//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv6Addr;

use holo_utils::capabilities;
use holo_utils::protocol::Protocol;
use holo_utils::southbound::{
    EncapRouteMsg, ForwardingError, ForwardingPlane, LocalSidMsg, RouteKeyMsg,
};
use holo_utils::srv6::{SRV6_MAX_SIDS, Seg6LocalAction, Seg6Mode};
use ipnetwork::IpNetwork;
use netlink_packet_core::{
    DefaultNla, Emitable, NLM_F_ACK, NLM_F_CREATE, NLM_F_REPLACE,
    NLM_F_REQUEST, NetlinkHeader, NetlinkMessage, NetlinkPayload, NlaBuffer,
    Parseable,
};
use netlink_packet_core_genl as genl_core;
use netlink_packet_generic::ctrl::nlas::GenlCtrlAttrs;
use netlink_packet_generic::ctrl::{GenlCtrl, GenlCtrlCmd};
use netlink_packet_generic::{GenlFamily, GenlHeader, GenlMessage};
use netlink_packet_route::route::{
    RouteAddress, RouteAttribute, RouteHeader, RouteLwEnCapType,
    RouteLwTunnelEncap, RouteMessage, RouteProtocol, RouteScope,
    RouteSeg6IpTunnel, RouteType,
};
use netlink_packet_route::{AddressFamily, RouteNetlinkMessage};
use netlink_sys::protocols::{NETLINK_GENERIC, NETLINK_ROUTE};
use netlink_sys::{Socket, SocketAddr};
use tracing::{debug, warn};

const RT_TABLE_COMPAT: u8 = 252;
const RT_TABLE_MAIN: u32 = 254;

// Lightweight tunnel attributes.
const SEG6_IPTUNNEL_SRH: u16 = 1;
const SEG6_LOCAL_ACTION: u16 = 1;
const SEG6_LOCAL_TABLE: u16 = 3;
const SEG6_LOCAL_NH4: u16 = 4;
const SEG6_LOCAL_NH6: u16 = 5;

// seg6_iptunnel_encap without a segment list: mode plus the fixed SRH.
const SEG6_IPTUNNEL_MIN_LEN: usize = 12;

// SEG6 generic netlink family.
const SEG6_GENL_NAME: &str = "SEG6";
const SEG6_GENL_VERSION: u8 = 1;
const SEG6_CMD_SET_TUNSRC: u8 = 3;
const SEG6_ATTR_DST: u16 = 1;

const RECV_BUFSIZE: usize = 8192;

// Forwarding plane backed by the Linux kernel.
pub struct NetlinkDataplane {
    route: NetlinkSocket,
    genl: Option<NetlinkSocket>,
    seg6_family: Option<u16>,
    // Device seg6local routes are bound to.
    ifindex: u32,
}

struct NetlinkSocket {
    socket: Socket,
    seq: u32,
}

// Reply to a netlink request.
#[derive(Debug)]
enum Reply<T> {
    Ack,
    Message(T),
}

// Payload of the SEG6 generic netlink family.
#[derive(Clone, Debug, Eq, PartialEq)]
struct Seg6Genl {
    cmd: u8,
    attrs: Vec<genl_core::DefaultNla>,
}

// ===== impl NetlinkDataplane =====

impl NetlinkDataplane {
    pub fn new(ifname: &str) -> Result<NetlinkDataplane, ForwardingError> {
        let ifindex = nix::net::if_::if_nametoindex(ifname)
            .map_err(|errno| ForwardingError::Io(errno.into()))?;
        let route = NetlinkSocket::new(NETLINK_ROUTE)?;

        Ok(NetlinkDataplane {
            route,
            genl: None,
            seg6_family: None,
            ifindex,
        })
    }

    fn route_request(
        &mut self,
        msg: RouteNetlinkMessage,
        flags: u16,
    ) -> Result<(), ForwardingError> {
        let seq = self.route.next_seq();
        let buf = route_request_encode(msg, flags, seq);
        self.route.send(&buf)?;
        loop {
            let buf = self.route.recv()?;
            if route_reply_decode(&buf, seq)?.is_some() {
                return Ok(());
            }
        }
    }

    fn genl_request<F>(
        &mut self,
        msg: GenlMessage<F>,
    ) -> Result<Reply<GenlMessage<F>>, ForwardingError>
    where
        F: GenlFamily
            + genl_core::Emitable
            + genl_core::ParseableParametrized<[u8], GenlHeader>
            + std::fmt::Debug,
    {
        if self.genl.is_none() {
            self.genl = Some(NetlinkSocket::new(NETLINK_GENERIC)?);
        }
        let Some(genl) = self.genl.as_mut() else {
            return Err(ForwardingError::InvalidReply);
        };

        let seq = genl.next_seq();
        let buf = genl_request_encode(msg, seq);
        genl.send(&buf)?;
        loop {
            let buf = genl.recv()?;
            if let Some(reply) = genl_reply_decode(&buf, seq)? {
                return Ok(reply);
            }
        }
    }

    // Resolves the SEG6 generic netlink family, caching the result.
    fn seg6_family(&mut self) -> Result<u16, ForwardingError> {
        if let Some(family) = self.seg6_family {
            return Ok(family);
        }

        let msg = GenlMessage::from_payload(GenlCtrl {
            cmd: GenlCtrlCmd::GetFamily,
            nlas: vec![GenlCtrlAttrs::FamilyName(
                Seg6Genl::family_name().to_owned(),
            )],
        });
        let family = match self.genl_request(msg) {
            Ok(Reply::Message(reply)) => reply
                .payload
                .nlas
                .iter()
                .find_map(|nla| match nla {
                    GenlCtrlAttrs::FamilyId(id) => Some(*id),
                    _ => None,
                })
                .ok_or(ForwardingError::GenlFamilyNotFound(SEG6_GENL_NAME))?,
            Ok(Reply::Ack) | Err(ForwardingError::Nack(_)) => {
                return Err(ForwardingError::GenlFamilyNotFound(
                    SEG6_GENL_NAME,
                ));
            }
            Err(error) => return Err(error),
        };
        self.seg6_family = Some(family);

        Ok(family)
    }
}

impl ForwardingPlane for NetlinkDataplane {
    fn install_encap_route(
        &mut self,
        msg: &EncapRouteMsg,
    ) -> Result<(), ForwardingError> {
        let route = encap_route_msg(msg, self.ifindex)?;
        debug!(
            prefix = %msg.prefix, segs = ?msg.segs,
            "installing encap route"
        );
        self.route_request(
            RouteNetlinkMessage::NewRoute(route),
            NLM_F_CREATE | NLM_F_REPLACE,
        )
    }

    fn install_local_sid(
        &mut self,
        msg: &LocalSidMsg,
    ) -> Result<(), ForwardingError> {
        let route = local_sid_msg(msg, self.ifindex)?;
        debug!(sid = %msg.sid, action = %msg.action, "installing local SID");
        self.route_request(
            RouteNetlinkMessage::NewRoute(route),
            NLM_F_CREATE | NLM_F_REPLACE,
        )
    }

    fn remove_route(
        &mut self,
        msg: &RouteKeyMsg,
    ) -> Result<(), ForwardingError> {
        let route = route_del_msg(msg);
        debug!(prefix = %msg.prefix, "removing route");
        self.route_request(RouteNetlinkMessage::DelRoute(route), 0)
    }

    fn update_tunsrc(&mut self, addr: Ipv6Addr) -> Result<(), ForwardingError> {
        let family = self.seg6_family()?;
        let msg = set_tunsrc_msg(family, addr);
        self.genl_request(msg).map(|_| ())
    }
}

// ===== impl NetlinkSocket =====

impl NetlinkSocket {
    fn new(protocol: isize) -> Result<NetlinkSocket, ForwardingError> {
        let socket = capabilities::raise(|| {
            let mut socket = Socket::new(protocol)?;
            socket.bind_auto()?;
            socket.connect(&SocketAddr::new(0, 0))?;
            Ok::<_, std::io::Error>(socket)
        })?;

        Ok(NetlinkSocket { socket, seq: 0 })
    }

    fn next_seq(&mut self) -> u32 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    fn send(&self, buf: &[u8]) -> Result<(), ForwardingError> {
        self.socket.send(buf, 0)?;
        Ok(())
    }

    fn recv(&self) -> Result<Vec<u8>, ForwardingError> {
        let mut buf = Vec::with_capacity(RECV_BUFSIZE);
        self.socket.recv(&mut buf, 0)?;
        Ok(buf)
    }
}

// ===== impl Seg6Genl =====

impl GenlFamily for Seg6Genl {
    fn family_name() -> &'static str {
        SEG6_GENL_NAME
    }

    fn command(&self) -> u8 {
        self.cmd
    }

    fn version(&self) -> u8 {
        SEG6_GENL_VERSION
    }
}

impl genl_core::Emitable for Seg6Genl {
    fn buffer_len(&self) -> usize {
        genl_core::Emitable::buffer_len(&self.attrs.as_slice())
    }

    fn emit(&self, buffer: &mut [u8]) {
        genl_core::Emitable::emit(&self.attrs.as_slice(), buffer)
    }
}

impl genl_core::ParseableParametrized<[u8], GenlHeader> for Seg6Genl {
    fn parse_with_param(
        buf: &[u8],
        header: GenlHeader,
    ) -> Result<Self, genl_core::DecodeError> {
        use genl_core::Parseable;

        let attrs = genl_core::NlasIterator::new(buf)
            .map(|nla| {
                nla.and_then(|nla| genl_core::DefaultNla::parse(&nla))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Seg6Genl {
            cmd: header.cmd,
            attrs,
        })
    }
}

// ===== helper functions =====

fn netlink_protocol(protocol: Protocol) -> RouteProtocol {
    match protocol {
        Protocol::STATIC => RouteProtocol::Static,
        Protocol::BGP => RouteProtocol::Bgp,
        Protocol::ISIS => RouteProtocol::Isis,
        Protocol::OSPFV3 => RouteProtocol::Ospf,
        Protocol::DIRECT => RouteProtocol::Boot,
    }
}

fn netlink_seg6_mode(
    mode: Seg6Mode,
) -> netlink_packet_route::route::Seg6Mode {
    use netlink_packet_route::route::Seg6Mode as NlSeg6Mode;

    match mode {
        Seg6Mode::Inline => NlSeg6Mode::Inline,
        Seg6Mode::Encap => NlSeg6Mode::Encap,
        Seg6Mode::L2Encap => NlSeg6Mode::Other(Seg6Mode::L2Encap as u32),
    }
}

// Common part of every route message: header, destination and table.
//
// Table IDs that don't fit in the header are carried by RTA_TABLE alone.
fn route_msg(
    protocol: Protocol,
    prefix: &IpNetwork,
    table_id: u32,
) -> RouteMessage {
    let (address_family, dst) = match prefix {
        IpNetwork::V4(prefix) => {
            (AddressFamily::Inet, RouteAddress::Inet(prefix.network()))
        }
        IpNetwork::V6(prefix) => {
            (AddressFamily::Inet6, RouteAddress::Inet6(prefix.network()))
        }
    };

    let mut route = RouteMessage::default();
    route.header = RouteHeader {
        address_family,
        destination_prefix_length: prefix.prefix(),
        table: u8::try_from(table_id).unwrap_or(RT_TABLE_COMPAT),
        protocol: netlink_protocol(protocol),
        scope: RouteScope::Universe,
        kind: RouteType::Unicast,
        ..Default::default()
    };
    route.attributes = vec![
        RouteAttribute::Destination(dst),
        RouteAttribute::Table(table_id),
    ];
    route
}

// Seg6Header can't be built outside its crate, so an empty SRH is parsed
// and then filled in.
fn seg6_iptunnel(
    mode: Seg6Mode,
    segs: &[Ipv6Addr],
) -> Result<RouteSeg6IpTunnel, ForwardingError> {
    let empty =
        DefaultNla::new(SEG6_IPTUNNEL_SRH, vec![0; SEG6_IPTUNNEL_MIN_LEN]);
    let mut buf = vec![0; empty.buffer_len()];
    empty.emit(&mut buf);

    let mut tunnel = RouteSeg6IpTunnel::parse(&NlaBuffer::new(&buf))
        .map_err(|_| ForwardingError::Encode)?;
    let RouteSeg6IpTunnel::Seg6(srh) = &mut tunnel else {
        return Err(ForwardingError::Encode);
    };
    srh.mode = netlink_seg6_mode(mode);
    srh.segments = segs.to_vec();

    Ok(tunnel)
}

fn encap_route_msg(
    msg: &EncapRouteMsg,
    ifindex: u32,
) -> Result<RouteMessage, ForwardingError> {
    if msg.segs.is_empty() || msg.segs.len() > SRV6_MAX_SIDS {
        return Err(ForwardingError::TooManySegments(msg.segs.len()));
    }

    let mut route = route_msg(msg.protocol, &msg.prefix, msg.table_id);
    let tunnel = seg6_iptunnel(msg.mode, &msg.segs)?;
    route.attributes.extend([
        RouteAttribute::Oif(ifindex),
        RouteAttribute::Encap(vec![RouteLwTunnelEncap::Seg6(tunnel)]),
        RouteAttribute::EncapType(RouteLwEnCapType::Seg6),
    ]);

    Ok(route)
}

fn local_sid_msg(
    msg: &LocalSidMsg,
    ifindex: u32,
) -> Result<RouteMessage, ForwardingError> {
    if !msg.action.is_supported() {
        return Err(ForwardingError::UnsupportedAction(
            msg.action.action_type(),
        ));
    }

    let mut route =
        route_msg(msg.protocol, &IpNetwork::V6(msg.sid), RT_TABLE_MAIN);
    route.header.scope = RouteScope::Link;

    // seg6local attributes.
    let action = msg.action.action_type() as u32;
    let mut encap = vec![DefaultNla::new(
        SEG6_LOCAL_ACTION,
        action.to_ne_bytes().to_vec(),
    )];
    match msg.action {
        Seg6LocalAction::EndX(addr) | Seg6LocalAction::EndDx6(addr) => {
            encap.push(DefaultNla::new(
                SEG6_LOCAL_NH6,
                addr.octets().to_vec(),
            ));
        }
        Seg6LocalAction::EndDx4(addr) => {
            encap.push(DefaultNla::new(
                SEG6_LOCAL_NH4,
                addr.octets().to_vec(),
            ));
        }
        Seg6LocalAction::EndT(table)
        | Seg6LocalAction::EndDt4(table)
        | Seg6LocalAction::EndDt6(table) => {
            encap.push(DefaultNla::new(
                SEG6_LOCAL_TABLE,
                table.to_ne_bytes().to_vec(),
            ));
        }
        Seg6LocalAction::End | Seg6LocalAction::Unsupported(..) => (),
    }

    route.attributes.extend([
        RouteAttribute::Oif(ifindex),
        RouteAttribute::Encap(
            encap.into_iter().map(RouteLwTunnelEncap::Other).collect(),
        ),
        RouteAttribute::EncapType(RouteLwEnCapType::Seg6Local),
    ]);

    Ok(route)
}

fn route_del_msg(msg: &RouteKeyMsg) -> RouteMessage {
    let table_id = match msg.table_id {
        0 => RT_TABLE_MAIN,
        table_id => table_id,
    };
    route_msg(msg.protocol, &msg.prefix, table_id)
}

fn set_tunsrc_msg(family: u16, addr: Ipv6Addr) -> GenlMessage<Seg6Genl> {
    let payload = Seg6Genl {
        cmd: SEG6_CMD_SET_TUNSRC,
        attrs: vec![genl_core::DefaultNla::new(
            SEG6_ATTR_DST,
            addr.octets().to_vec(),
        )],
    };
    let mut msg = GenlMessage::from_payload(payload);
    msg.set_resolved_family_id(family);
    msg
}

fn route_request_encode(
    msg: RouteNetlinkMessage,
    flags: u16,
    seq: u32,
) -> Vec<u8> {
    let mut header = NetlinkHeader::default();
    header.flags = NLM_F_REQUEST | NLM_F_ACK | flags;
    header.sequence_number = seq;
    let mut packet =
        NetlinkMessage::new(header, NetlinkPayload::InnerMessage(msg));
    packet.finalize();

    let mut buf = vec![0; packet.buffer_len()];
    packet.serialize(&mut buf);
    buf
}

fn genl_request_encode<F>(msg: GenlMessage<F>, seq: u32) -> Vec<u8>
where
    F: GenlFamily + genl_core::Emitable + std::fmt::Debug,
{
    let mut packet = genl_core::NetlinkMessage::from(msg);
    packet.header.flags = genl_core::NLM_F_REQUEST | genl_core::NLM_F_ACK;
    packet.header.sequence_number = seq;
    packet.finalize();

    let mut buf = vec![0; packet.buffer_len()];
    packet.serialize(&mut buf);
    buf
}

// Looks for the reply to `seq` in a receive buffer. Kernel errors are
// returned as NACKs.
fn route_reply_decode(
    buf: &[u8],
    seq: u32,
) -> Result<Option<Reply<RouteNetlinkMessage>>, ForwardingError> {
    let mut offset = 0;
    while offset < buf.len() {
        let msg = NetlinkMessage::<RouteNetlinkMessage>::deserialize(
            &buf[offset..],
        )
        .map_err(|_| ForwardingError::InvalidReply)?;
        let len = msg.header.length as usize;
        if len == 0 {
            return Err(ForwardingError::InvalidReply);
        }
        offset = (offset + len + 3) & !3;

        if msg.header.sequence_number != seq {
            warn!(
                msg_seq = %msg.header.sequence_number, %seq,
                "unexpected netlink reply"
            );
            continue;
        }
        match msg.payload {
            NetlinkPayload::Error(error) => {
                return match error.code {
                    Some(code) => Err(ForwardingError::Nack(-code.get())),
                    None => Ok(Some(Reply::Ack)),
                };
            }
            NetlinkPayload::InnerMessage(msg) => {
                return Ok(Some(Reply::Message(msg)));
            }
            _ => (),
        }
    }

    Ok(None)
}

fn genl_reply_decode<F>(
    buf: &[u8],
    seq: u32,
) -> Result<Option<Reply<GenlMessage<F>>>, ForwardingError>
where
    F: genl_core::ParseableParametrized<[u8], GenlHeader> + std::fmt::Debug,
{
    let mut offset = 0;
    while offset < buf.len() {
        let msg = genl_core::NetlinkMessage::<GenlMessage<F>>::deserialize(
            &buf[offset..],
        )
        .map_err(|_| ForwardingError::InvalidReply)?;
        let len = msg.header.length as usize;
        if len == 0 {
            return Err(ForwardingError::InvalidReply);
        }
        offset = (offset + len + 3) & !3;

        if msg.header.sequence_number != seq {
            warn!(
                msg_seq = %msg.header.sequence_number, %seq,
                "unexpected netlink reply"
            );
            continue;
        }
        match msg.payload {
            genl_core::NetlinkPayload::Error(error) => {
                return match error.code {
                    Some(code) => Err(ForwardingError::Nack(-code.get())),
                    None => Ok(Some(Reply::Ack)),
                };
            }
            genl_core::NetlinkPayload::InnerMessage(msg) => {
                return Ok(Some(Reply::Message(msg)));
            }
            _ => (),
        }
    }

    Ok(None)
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use std::num::NonZeroI32;
    use std::str::FromStr;

    use ipnetwork::Ipv6Network;
    use netlink_packet_core::ErrorMessage;
    use netlink_packet_route::route::RouteMessageBuffer;
    use smallvec::smallvec;

    use super::*;

    fn ip6(s: &str) -> Ipv6Addr {
        Ipv6Addr::from_str(s).unwrap()
    }

    // Emits a route message and parses it back the way the kernel would
    // see it.
    fn reparse(route: &RouteMessage) -> RouteMessage {
        let mut buf = vec![0; route.buffer_len()];
        route.emit(&mut buf);
        RouteMessage::parse(&RouteMessageBuffer::new(&buf)).unwrap()
    }

    fn encap(route: &RouteMessage) -> &Vec<RouteLwTunnelEncap> {
        route
            .attributes
            .iter()
            .find_map(|attr| match attr {
                RouteAttribute::Encap(encap) => Some(encap),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn local_sid_end_dt4() {
        let msg = LocalSidMsg {
            protocol: Protocol::BGP,
            sid: Ipv6Network::new(ip6("fc00:0:1:2::"), 64).unwrap(),
            action: Seg6LocalAction::EndDt4(10),
        };
        let route = reparse(&local_sid_msg(&msg, 2).unwrap());

        assert_eq!(route.header.address_family, AddressFamily::Inet6);
        assert_eq!(route.header.destination_prefix_length, 64);
        assert_eq!(route.header.table, 254);
        assert_eq!(route.header.protocol, RouteProtocol::Bgp);
        assert_eq!(route.header.scope, RouteScope::Link);
        assert!(route.attributes.contains(&RouteAttribute::Destination(
            RouteAddress::Inet6(ip6("fc00:0:1:2::"))
        )));
        assert!(route.attributes.contains(&RouteAttribute::Oif(2)));
        assert!(route.attributes.contains(&RouteAttribute::EncapType(
            RouteLwEnCapType::Seg6Local
        )));
        assert_eq!(
            encap(&route),
            &vec![
                RouteLwTunnelEncap::Other(DefaultNla::new(
                    SEG6_LOCAL_ACTION,
                    8u32.to_ne_bytes().to_vec()
                )),
                RouteLwTunnelEncap::Other(DefaultNla::new(
                    SEG6_LOCAL_TABLE,
                    10u32.to_ne_bytes().to_vec()
                )),
            ]
        );
    }

    #[test]
    fn local_sid_end_x() {
        let msg = LocalSidMsg {
            protocol: Protocol::STATIC,
            sid: Ipv6Network::new(ip6("fc00:0:1:3::"), 64).unwrap(),
            action: Seg6LocalAction::EndX(ip6("fe80::1")),
        };
        let route = reparse(&local_sid_msg(&msg, 2).unwrap());

        assert_eq!(route.header.protocol, RouteProtocol::Static);
        assert_eq!(
            encap(&route)[1],
            RouteLwTunnelEncap::Other(DefaultNla::new(
                SEG6_LOCAL_NH6,
                ip6("fe80::1").octets().to_vec()
            ))
        );
    }

    #[test]
    fn local_sid_unsupported_action() {
        use holo_utils::srv6::Seg6LocalActionType;

        let msg = LocalSidMsg {
            protocol: Protocol::STATIC,
            sid: Ipv6Network::new(ip6("fc00:0:1:4::"), 64).unwrap(),
            action: Seg6LocalAction::Unsupported(Seg6LocalActionType::EndBm),
        };
        assert!(matches!(
            local_sid_msg(&msg, 2),
            Err(ForwardingError::UnsupportedAction(Seg6LocalActionType::EndBm))
        ));
    }

    #[test]
    fn encap_route_large_table() {
        let msg = EncapRouteMsg {
            protocol: Protocol::BGP,
            prefix: IpNetwork::from_str("10.0.0.0/24").unwrap(),
            table_id: 1000,
            segs: smallvec![ip6("fc00:0:2:2::"), ip6("fc00:0:3::")],
            mode: Seg6Mode::Encap,
        };
        let route = reparse(&encap_route_msg(&msg, 3).unwrap());

        assert_eq!(route.header.address_family, AddressFamily::Inet);
        assert_eq!(route.header.destination_prefix_length, 24);
        assert_eq!(route.header.table, RT_TABLE_COMPAT);
        assert!(route.attributes.contains(&RouteAttribute::Table(1000)));
        assert!(route.attributes.contains(&RouteAttribute::Destination(
            RouteAddress::Inet("10.0.0.0".parse().unwrap())
        )));

        // Segment order survives the SRH encoding.
        let [RouteLwTunnelEncap::Seg6(RouteSeg6IpTunnel::Seg6(srh))] =
            encap(&route).as_slice()
        else {
            panic!("missing SRH");
        };
        assert_eq!(srh.mode, netlink_packet_route::route::Seg6Mode::Encap);
        assert_eq!(srh.segments, vec![ip6("fc00:0:2:2::"), ip6("fc00:0:3::")]);
    }

    #[test]
    fn encap_route_segment_limits() {
        let mut msg = EncapRouteMsg {
            protocol: Protocol::BGP,
            prefix: IpNetwork::from_str("10.0.0.0/24").unwrap(),
            table_id: 10,
            segs: smallvec![],
            mode: Seg6Mode::Encap,
        };
        assert!(matches!(
            encap_route_msg(&msg, 3),
            Err(ForwardingError::TooManySegments(0))
        ));
        msg.segs = (0..17).map(|_| ip6("fc00::1")).collect();
        assert!(matches!(
            encap_route_msg(&msg, 3),
            Err(ForwardingError::TooManySegments(17))
        ));
    }

    #[test]
    fn route_del_default_table() {
        let msg = RouteKeyMsg {
            protocol: Protocol::BGP,
            prefix: IpNetwork::from_str("fc00:0:1:2::/64").unwrap(),
            table_id: 0,
        };
        let route = reparse(&route_del_msg(&msg));
        assert_eq!(route.header.table, 254);
        assert!(route.attributes.contains(&RouteAttribute::Table(254)));
        assert!(!route.attributes.iter().any(|attr| matches!(
            attr,
            RouteAttribute::Encap(..) | RouteAttribute::EncapType(..)
        )));
    }

    #[test]
    fn reply_nack() {
        let mut error = ErrorMessage::default();
        error.code = NonZeroI32::new(-17);
        let mut header = NetlinkHeader::default();
        header.sequence_number = 5;
        let mut packet = NetlinkMessage::<RouteNetlinkMessage>::new(
            header,
            NetlinkPayload::Error(error),
        );
        packet.finalize();
        let mut buf = vec![0; packet.buffer_len()];
        packet.serialize(&mut buf);

        assert!(matches!(
            route_reply_decode(&buf, 5),
            Err(ForwardingError::Nack(17))
        ));
        assert!(matches!(route_reply_decode(&buf, 6), Ok(None)));
    }

    #[test]
    fn reply_ack() {
        let mut header = NetlinkHeader::default();
        header.sequence_number = 9;
        let mut packet = NetlinkMessage::<RouteNetlinkMessage>::new(
            header,
            NetlinkPayload::Error(ErrorMessage::default()),
        );
        packet.finalize();
        let mut buf = vec![0; packet.buffer_len()];
        packet.serialize(&mut buf);

        assert!(matches!(route_reply_decode(&buf, 9), Ok(Some(Reply::Ack))));
    }

    #[test]
    fn set_tunsrc() {
        let buf = genl_request_encode(set_tunsrc_msg(0x1c, ip6("fc00::1")), 4);
        let packet =
            genl_core::NetlinkMessage::<GenlMessage<Seg6Genl>>::deserialize(
                &buf,
            )
            .unwrap();

        assert_eq!(packet.header.message_type, 0x1c);
        assert_eq!(packet.header.sequence_number, 4);
        let genl_core::NetlinkPayload::InnerMessage(msg) = packet.payload
        else {
            panic!("missing payload");
        };
        assert_eq!(msg.header.cmd, SEG6_CMD_SET_TUNSRC);
        assert_eq!(msg.header.version, SEG6_GENL_VERSION);
        assert_eq!(
            msg.payload.attrs,
            vec![genl_core::DefaultNla::new(
                SEG6_ATTR_DST,
                ip6("fc00::1").octets().to_vec()
            )]
        );
    }

    #[test]
    fn genl_family_reply() {
        let mut reply = GenlMessage::from_payload(GenlCtrl {
            cmd: GenlCtrlCmd::NewFamily,
            nlas: vec![
                GenlCtrlAttrs::FamilyName(SEG6_GENL_NAME.to_owned()),
                GenlCtrlAttrs::FamilyId(0x1c),
            ],
        });
        reply.finalize();
        let mut packet = genl_core::NetlinkMessage::from(reply);
        packet.header.sequence_number = 2;
        packet.finalize();
        let mut buf = vec![0; packet.buffer_len()];
        packet.serialize(&mut buf);

        let Ok(Some(Reply::Message(reply))) =
            genl_reply_decode::<GenlCtrl>(&buf, 2)
        else {
            panic!("missing reply");
        };
        assert!(reply.payload.nlas.contains(&GenlCtrlAttrs::FamilyId(0x1c)));
    }
}
