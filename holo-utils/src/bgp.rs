//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! BGP definitions shared between the routing table manager and the BGP
//! instance code.

use std::net::Ipv4Addr;
use std::str::FromStr;

use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Igp = 0,
    Egp = 1,
    Incomplete = 2,
}

// Extended community, stored in wire format.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExtComm(pub [u8; 8]);

// Route Distinguisher, stored in wire format.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct RouteDistinguisher(pub [u8; 8]);

// Route Distinguisher types.
//
// IANA registry:
// https://www.iana.org/assignments/route-distinguisher-types
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum RdType {
    As2 = 0,
    Ip = 1,
    As4 = 2,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParseValueError(pub String);

// Splits an "ADMIN:VALUE" string into its components, classifying the
// administrator field.
enum AdminField {
    As2(u16),
    As4(u32),
    Ip(Ipv4Addr),
}

fn parse_admin_value(s: &str) -> Result<(AdminField, u32), ParseValueError> {
    let err = || ParseValueError(s.to_owned());
    let (admin, value) = s.trim().rsplit_once(':').ok_or_else(err)?;
    let value = value.parse::<u32>().map_err(|_| err())?;
    let admin = if admin.contains('.') {
        AdminField::Ip(admin.parse().map_err(|_| err())?)
    } else {
        let asn = admin.parse::<u32>().map_err(|_| err())?;
        match u16::try_from(asn) {
            Ok(asn) => AdminField::As2(asn),
            Err(_) => AdminField::As4(asn),
        }
    };

    // Only the AS2 format carries a 32-bit value.
    match admin {
        AdminField::As2(_) => (),
        _ if value > u16::MAX as u32 => return Err(err()),
        _ => (),
    }

    Ok((admin, value))
}

// Returns the administrator type (0: AS2, 1: IPv4, 2: AS4) and the 6-byte
// administrator/value field.
fn encode_admin_value(admin: AdminField, value: u32) -> (u8, [u8; 6]) {
    let mut bytes = [0; 6];
    let kind = match admin {
        AdminField::As2(asn) => {
            bytes[0..2].copy_from_slice(&asn.to_be_bytes());
            bytes[2..6].copy_from_slice(&value.to_be_bytes());
            0
        }
        AdminField::Ip(addr) => {
            bytes[0..4].copy_from_slice(&addr.octets());
            bytes[4..6].copy_from_slice(&(value as u16).to_be_bytes());
            1
        }
        AdminField::As4(asn) => {
            bytes[0..4].copy_from_slice(&asn.to_be_bytes());
            bytes[4..6].copy_from_slice(&(value as u16).to_be_bytes());
            2
        }
    };
    (kind, bytes)
}

fn fmt_admin_value(
    f: &mut std::fmt::Formatter<'_>,
    kind: u8,
    bytes: &[u8],
) -> std::fmt::Result {
    match kind {
        0 => {
            let asn = u16::from_be_bytes([bytes[0], bytes[1]]);
            let value =
                u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
            write!(f, "{}:{}", asn, value)
        }
        1 => {
            let addr = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
            let value = u16::from_be_bytes([bytes[4], bytes[5]]);
            write!(f, "{}:{}", addr, value)
        }
        2 => {
            let asn =
                u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            let value = u16::from_be_bytes([bytes[4], bytes[5]]);
            write!(f, "{}:{}", asn, value)
        }
        _ => {
            for byte in bytes {
                write!(f, "{:02x}", byte)?;
            }
            Ok(())
        }
    }
}

// ===== impl ExtComm =====

impl ExtComm {
    pub const SUBTYPE_ROUTE_TARGET: u8 = 0x02;

    // Returns whether this is a transitive Route Target community.
    pub fn is_route_target(&self) -> bool {
        self.0[0] <= 0x02 && self.0[1] == Self::SUBTYPE_ROUTE_TARGET
    }

    fn route_target(admin: AdminField, value: u32) -> ExtComm {
        let (kind, field) = encode_admin_value(admin, value);
        let mut bytes = [0; 8];
        bytes[0] = kind;
        bytes[1] = Self::SUBTYPE_ROUTE_TARGET;
        bytes[2..].copy_from_slice(&field);
        ExtComm(bytes)
    }

    // Creates a 2-octet AS specific Route Target.
    pub fn route_target_as2(asn: u16, value: u32) -> ExtComm {
        ExtComm::route_target(AdminField::As2(asn), value)
    }

    // Creates an IPv4 address specific Route Target.
    pub fn route_target_ip(addr: Ipv4Addr, value: u16) -> ExtComm {
        ExtComm::route_target(AdminField::Ip(addr), value as u32)
    }

    // Creates a 4-octet AS specific Route Target.
    pub fn route_target_as4(asn: u32, value: u16) -> ExtComm {
        ExtComm::route_target(AdminField::As4(asn), value as u32)
    }
}

impl std::fmt::Display for ExtComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_route_target() {
            write!(f, "rt ")?;
            fmt_admin_value(f, self.0[0], &self.0[2..])
        } else {
            fmt_admin_value(f, u8::MAX, &self.0)
        }
    }
}

// Parses a Route Target in the "ADMIN:VALUE" notation, optionally preceded
// by "rt ".
impl FromStr for ExtComm {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.strip_prefix("rt ").unwrap_or(s);
        let (admin, value) = parse_admin_value(s)?;
        Ok(ExtComm::route_target(admin, value))
    }
}

impl TryFrom<String> for ExtComm {
    type Error = ParseValueError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ExtComm> for String {
    fn from(comm: ExtComm) -> String {
        comm.to_string()
    }
}

// ===== impl RouteDistinguisher =====

impl RouteDistinguisher {
    pub fn new(bytes: [u8; 8]) -> RouteDistinguisher {
        RouteDistinguisher(bytes)
    }

    // Returns the RD type, or `None` if it's not a known one.
    pub fn rd_type(&self) -> Option<RdType> {
        use num_traits::FromPrimitive;
        let rd_type = u16::from_be_bytes([self.0[0], self.0[1]]);
        RdType::from_u16(rd_type)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl std::fmt::Display for RouteDistinguisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.rd_type() {
            Some(rd_type) => fmt_admin_value(f, rd_type as u8, &self.0[2..]),
            None => fmt_admin_value(f, u8::MAX, &self.0),
        }
    }
}

impl FromStr for RouteDistinguisher {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (admin, value) = parse_admin_value(s)?;
        let (kind, field) = encode_admin_value(admin, value);
        let mut bytes = [0; 8];
        bytes[1] = kind;
        bytes[2..].copy_from_slice(&field);
        Ok(RouteDistinguisher(bytes))
    }
}

impl TryFrom<String> for RouteDistinguisher {
    type Error = ParseValueError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<RouteDistinguisher> for String {
    fn from(rd: RouteDistinguisher) -> String {
        rd.to_string()
    }
}

// ===== impl ParseValueError =====

impl std::fmt::Display for ParseValueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid value: {}", self.0)
    }
}

impl std::error::Error for ParseValueError {}
