//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use derive_new::new;
use holo_utils::bgp::{ExtComm, Origin};
use holo_utils::bytes::{BytesExt, BytesMutExt};
use holo_utils::ip::AddressFamily;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::debug::Debug;
use crate::packet::consts::{
    AttrFlags, AttrType, PrefixSidTlvType, Srv6EndpointBehavior,
    Srv6ServiceSubTlvType,
};
use crate::packet::error::{AttrError, DecodeError};

// Path attributes of a route.
#[derive(Clone, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Attrs {
    pub base: BaseAttrs,
    pub ext_comm: Option<ExtComms>,
}

// Attributes that are shared by most routes.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct BaseAttrs {
    pub origin: Origin,
    pub as_path: Vec<u32>,
    pub nexthop: Option<IpAddr>,
    pub mp_nexthop: Option<IpAddr>,
    pub med: Option<u32>,
    pub local_pref: Option<u32>,
    pub originator_id: Option<Ipv4Addr>,
    pub srv6_sid: Option<Ipv6Addr>,
}

#[derive(Clone, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct ExtComms(pub BTreeSet<ExtComm>);

// SRv6 L3 Service carried in the BGP Prefix-SID attribute (RFC 9252).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(new)]
#[derive(Deserialize, Serialize)]
pub struct PrefixSid {
    pub sid: Ipv6Addr,
    pub behavior: u16,
}

// Reachability information received along with a block of VPN NLRIs.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(new)]
pub struct MpReach {
    // Nexthop carried in the MP_REACH_NLRI attribute.
    pub nexthop: IpAddr,
    // Remaining path attributes, undecoded.
    pub attrs: Bytes,
}

// SRv6 SID Information Sub-TLV length, without sub-sub-TLVs.
const SID_INFO_SUBTLV_LEN: u16 = 21;

// ===== impl Attrs =====

impl Attrs {
    // Encodes the attributes relevant to SRv6-VPN routes: the extended
    // communities and the Prefix-SID.
    pub fn encode(&self, buf: &mut BytesMut, af: AddressFamily) {
        if let Some(ext_comm) = &self.ext_comm {
            ext_comm.encode(buf);
        }
        if let Some(sid) = self.base.srv6_sid {
            let behavior = Srv6EndpointBehavior::per_vrf(af) as u16;
            PrefixSid::new(sid, behavior).encode(buf);
        }
    }

    // Decodes a sequence of path attributes, keeping only the extended
    // communities and the Prefix-SID. Other attribute types are skipped.
    pub fn decode(buf: &mut Bytes) -> Result<Attrs, DecodeError> {
        let mut attrs = Attrs::default();

        while buf.has_remaining() {
            let flags = AttrFlags::from_bits_truncate(buf.try_get_u8()?);
            let attr_type = buf.try_get_u8()?;
            let attr_len = if flags.contains(AttrFlags::EXTENDED) {
                buf.try_get_u16()? as usize
            } else {
                buf.try_get_u8()? as usize
            };
            if attr_len > buf.remaining() {
                return Err(DecodeError::ReadOutOfBounds);
            }
            let mut buf = buf.split_to(attr_len);

            let Some(attr_type) = AttrType::from_u8(attr_type) else {
                continue;
            };
            let result = match attr_type {
                AttrType::ExtCommunities => ExtComms::decode(&mut buf)
                    .map(|ext_comm| attrs.ext_comm = Some(ext_comm)),
                AttrType::PrefixSid => PrefixSid::decode(&mut buf)
                    .map(|prefix_sid| {
                        attrs.base.srv6_sid =
                            prefix_sid.map(|prefix_sid| prefix_sid.sid)
                    }),
            };
            match result {
                Ok(()) => (),
                Err(AttrError::Discard) => {
                    Debug::AttrDiscard(attr_type).log();
                }
                Err(error) => {
                    return Err(DecodeError::Attribute(attr_type, error));
                }
            }
        }

        Ok(attrs)
    }
}

// ===== impl BaseAttrs =====

impl Default for BaseAttrs {
    fn default() -> BaseAttrs {
        BaseAttrs {
            origin: Origin::Incomplete,
            as_path: Default::default(),
            nexthop: None,
            mp_nexthop: None,
            med: None,
            local_pref: None,
            originator_id: None,
            srv6_sid: None,
        }
    }
}

// ===== impl MpReach =====

impl MpReach {
    // Decodes the received path attributes, with the MP_REACH_NLRI nexthop
    // filled in.
    pub fn decode_attrs(&self) -> Result<Attrs, DecodeError> {
        let mut attrs = Attrs::decode(&mut self.attrs.clone())?;
        attrs.base.mp_nexthop = Some(self.nexthop);
        Ok(attrs)
    }
}

// ===== impl ExtComms =====

impl ExtComms {
    pub fn encode(&self, buf: &mut BytesMut) {
        let value_len = self.0.len() * 8;
        let mut flags = AttrFlags::OPTIONAL | AttrFlags::TRANSITIVE;
        if value_len > u8::MAX as usize {
            flags.insert(AttrFlags::EXTENDED);
        }

        buf.put_u8(flags.bits());
        buf.put_u8(AttrType::ExtCommunities as u8);
        if flags.contains(AttrFlags::EXTENDED) {
            buf.put_u16(value_len as u16);
        } else {
            buf.put_u8(value_len as u8);
        }
        for ext_comm in &self.0 {
            buf.put_slice(&ext_comm.0);
        }
    }

    pub fn decode(buf: &mut Bytes) -> Result<ExtComms, AttrError> {
        if buf.remaining() % 8 != 0 {
            return Err(AttrError::Withdraw);
        }

        let mut list = BTreeSet::new();
        while buf.remaining() >= 8 {
            let mut value = [0; 8];
            buf.try_copy_to_slice(&mut value)?;
            list.insert(ExtComm(value));
        }

        Ok(ExtComms(list))
    }

    // Returns whether any Route Target of this set is also present in the
    // provided list.
    pub fn intersects_rt(&self, rtlist: &BTreeSet<ExtComm>) -> bool {
        self.0
            .iter()
            .filter(|ext_comm| ext_comm.is_route_target())
            .any(|rt| rtlist.contains(rt))
    }
}

// ===== impl PrefixSid =====

impl PrefixSid {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8((AttrFlags::OPTIONAL | AttrFlags::TRANSITIVE).bits());
        buf.put_u8(AttrType::PrefixSid as u8);
        let start_pos = buf.len();
        buf.put_u8(0);

        // SRv6 L3 Service TLV.
        buf.put_u8(PrefixSidTlvType::Srv6L3Service as u8);
        buf.put_u16(1 + 3 + SID_INFO_SUBTLV_LEN);
        buf.put_u8(0);

        // SRv6 SID Information Sub-TLV.
        buf.put_u8(Srv6ServiceSubTlvType::SidInformation as u8);
        buf.put_u16(SID_INFO_SUBTLV_LEN);
        buf.put_u8(0);
        buf.put_ipv6(&self.sid);
        buf.put_u8(0);
        buf.put_u16(self.behavior);
        buf.put_u8(0);

        // Rewrite attribute length.
        let attr_len = (buf.len() - start_pos - 1) as u8;
        buf[start_pos] = attr_len;
    }

    // Returns the first SID found in an SRv6 L3 Service TLV, if any.
    pub fn decode(buf: &mut Bytes) -> Result<Option<PrefixSid>, AttrError> {
        let mut prefix_sid = None;

        while buf.has_remaining() {
            let tlv_type = buf.try_get_u8()?;
            let tlv_len = buf.try_get_u16()? as usize;
            if tlv_len > buf.remaining() {
                return Err(AttrError::Discard);
            }
            let mut buf_tlv = buf.split_to(tlv_len);
            if PrefixSidTlvType::from_u8(tlv_type)
                != Some(PrefixSidTlvType::Srv6L3Service)
            {
                continue;
            }

            // Reserved.
            buf_tlv.try_get_u8()?;

            while buf_tlv.has_remaining() {
                let stlv_type = buf_tlv.try_get_u8()?;
                let stlv_len = buf_tlv.try_get_u16()? as usize;
                if stlv_len > buf_tlv.remaining() {
                    return Err(AttrError::Discard);
                }
                let mut buf_stlv = buf_tlv.split_to(stlv_len);
                if Srv6ServiceSubTlvType::from_u8(stlv_type)
                    != Some(Srv6ServiceSubTlvType::SidInformation)
                    || prefix_sid.is_some()
                {
                    continue;
                }
                if stlv_len < SID_INFO_SUBTLV_LEN as usize {
                    return Err(AttrError::Discard);
                }

                let _reserved = buf_stlv.try_get_u8()?;
                let sid = buf_stlv.try_get_ipv6()?;
                let _flags = buf_stlv.try_get_u8()?;
                let behavior = buf_stlv.try_get_u16()?;
                prefix_sid = Some(PrefixSid::new(sid, behavior));
            }
        }

        Ok(prefix_sid)
    }
}
