//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use holo_utils::bgp::RouteDistinguisher;
use holo_utils::bytes::{BytesExt, BytesMutExt};
use holo_utils::ip::{AddressFamily, IpNetworkExt};
use holo_utils::mpls::Label;
use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use serde::{Deserialize, Serialize};

use crate::debug::Debug;
use crate::packet::consts::{LABEL_LEN, RD_LEN, VPN_NLRI_MIN_PLEN};
use crate::packet::error::NlriError;

// Bottom-of-stack bit of the label field.
const LABEL_BOS: u32 = 0x01;

// VPN NLRI (RFC 4364 Section 4.3.4, RFC 9252 Section 6).
//
// When used to advertise SRv6 services, the label field carries the
// function part of the service SID.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct VpnNlri {
    pub path_id: Option<u32>,
    pub label: Label,
    pub rd: RouteDistinguisher,
    pub prefix: IpNetwork,
}

// ===== impl VpnNlri =====

impl VpnNlri {
    pub fn encode(&self, buf: &mut BytesMut) {
        if let Some(path_id) = self.path_id {
            buf.put_u32(path_id);
        }

        // Prefix length, label and route distinguisher.
        let plen = self.prefix.prefix();
        buf.put_u8(VPN_NLRI_MIN_PLEN + plen);
        buf.put_u24((self.label.get() << 4) | LABEL_BOS);
        buf.put_slice(self.rd.as_bytes());

        // Prefix value (only the significant octets).
        let prefix_bytes = plen.div_ceil(8) as usize;
        match self.prefix.ip() {
            std::net::IpAddr::V4(addr) => {
                buf.put_slice(&addr.octets()[0..prefix_bytes])
            }
            std::net::IpAddr::V6(addr) => {
                buf.put_slice(&addr.octets()[0..prefix_bytes])
            }
        }
    }

    pub fn decode(
        buf: &mut Bytes,
        af: AddressFamily,
        addpath: bool,
    ) -> Result<VpnNlri, NlriError> {
        // Parse Path ID.
        let path_id = if addpath {
            if buf.remaining() < 4 {
                return Err(NlriError::PacketOverflow);
            }
            Some(buf.try_get_u32()?)
        } else {
            None
        };

        // Parse and validate prefix length.
        let plen = buf.try_get_u8()?;
        if plen < VPN_NLRI_MIN_PLEN {
            return Err(NlriError::PrefixLength(plen));
        }
        let psize = (plen as usize).div_ceil(8);
        if psize > buf.remaining() {
            return Err(NlriError::PacketOverflow);
        }
        let addr_len = psize - LABEL_LEN - RD_LEN;
        if addr_len > af.addr_len() {
            return Err(NlriError::PacketLength);
        }

        // Parse label.
        let label = Label::new(buf.try_get_u24()? >> 4);

        // Parse route distinguisher. Unknown types are accepted as opaque
        // values.
        let mut rd = [0; RD_LEN];
        buf.try_copy_to_slice(&mut rd)?;
        let rd = RouteDistinguisher::new(rd);
        if rd.rd_type().is_none() {
            Debug::NlriUnknownRdType(&rd).log();
        }

        // Parse prefix.
        let prefixlen = plen - VPN_NLRI_MIN_PLEN;
        let mut addr = [0; 16];
        buf.try_copy_to_slice(&mut addr[0..addr_len])?;
        let prefix = match af {
            AddressFamily::Ipv4 => {
                let addr = Ipv4Addr::new(addr[0], addr[1], addr[2], addr[3]);
                Ipv4Network::new(addr, prefixlen)
                    .map(IpNetwork::V4)
                    .map_err(|_| NlriError::PacketLength)?
            }
            AddressFamily::Ipv6 => {
                let addr = Ipv6Addr::from(addr);
                Ipv6Network::new(addr, prefixlen)
                    .map(IpNetwork::V6)
                    .map_err(|_| NlriError::PacketLength)?
            }
        };

        Ok(VpnNlri {
            path_id,
            label,
            rd,
            prefix: prefix.apply_mask(),
        })
    }
}

// ===== global functions =====

pub fn encode_nlri_list(buf: &mut BytesMut, nlris: &[VpnNlri]) {
    for nlri in nlris {
        nlri.encode(buf);
    }
}

// Decodes a block of VPN NLRIs.
//
// Decoding is all-or-nothing: a single malformed entry invalidates the
// entire block and no partial result is returned.
pub fn decode_nlri_list(
    mut buf: Bytes,
    af: AddressFamily,
    addpath: bool,
) -> Result<Vec<VpnNlri>, NlriError> {
    let mut nlris = vec![];
    while buf.has_remaining() {
        let nlri = VpnNlri::decode(&mut buf, af, addpath)?;
        nlris.push(nlri);
    }
    Ok(nlris)
}
