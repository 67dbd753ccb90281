//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use bytes::TryGetError;
use serde::{Deserialize, Serialize};

use crate::packet::consts::AttrType;

// SRv6-VPN wire data decoding errors.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum DecodeError {
    ReadOutOfBounds,
    Nlri(NlriError),
    Attribute(AttrType, AttrError),
}

// VPN NLRI errors. Any of them invalidates the whole NLRI block.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum NlriError {
    // Prefix extends past the end of the packet.
    PacketOverflow,
    // Prefix length too short to hold a label and a route distinguisher.
    PrefixLength(u8),
    // Address portion longer than the address family allows.
    PacketLength,
}

// Attribute errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum AttrError {
    Discard,
    Withdraw,
    Reset,
}

// ===== impl DecodeError =====

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::ReadOutOfBounds => {
                write!(f, "attempt to read out of bounds")
            }
            DecodeError::Nlri(error) => error.fmt(f),
            DecodeError::Attribute(attr_type, error) => {
                write!(f, "malformed {:?} attribute: {}", attr_type, error)
            }
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::Nlri(error) => Some(error),
            _ => None,
        }
    }
}

impl From<TryGetError> for DecodeError {
    fn from(_error: TryGetError) -> DecodeError {
        DecodeError::ReadOutOfBounds
    }
}

impl From<NlriError> for DecodeError {
    fn from(error: NlriError) -> DecodeError {
        DecodeError::Nlri(error)
    }
}

// ===== impl NlriError =====

impl std::fmt::Display for NlriError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VPN NLRI error: ")?;

        match self {
            NlriError::PacketOverflow => {
                write!(f, "prefix overflows the packet")
            }
            NlriError::PrefixLength(plen) => {
                write!(f, "invalid prefix length: {plen}")
            }
            NlriError::PacketLength => {
                write!(f, "invalid prefix size")
            }
        }
    }
}

impl std::error::Error for NlriError {}

impl From<TryGetError> for NlriError {
    fn from(_error: TryGetError) -> NlriError {
        NlriError::PacketOverflow
    }
}

// ===== impl AttrError =====

impl std::fmt::Display for AttrError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttrError::Discard => write!(f, "attribute discard"),
            AttrError::Withdraw => write!(f, "treat-as-withdraw"),
            AttrError::Reset => write!(f, "session reset"),
        }
    }
}

impl From<TryGetError> for AttrError {
    fn from(_error: TryGetError) -> AttrError {
        AttrError::Discard
    }
}
