//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use holo_utils::protocol::Protocol;
use holo_utils::southbound::ForwardingError;
use holo_utils::srv6::Seg6LocalActionType;
use ipnetwork::Ipv6Network;
use tracing::{error, warn};

// SRv6 errors.
#[derive(Debug)]
pub enum Error {
    // Locators
    LocatorNotFound(String),
    LocatorExists(String),
    InvalidFunctionBits(String, u8),
    // Chunks
    ChunkAlreadyOwned(String, Protocol),
    // Functions
    FunctionPrefixLenMismatch(Ipv6Network, u8),
    FunctionPrefixOutOfRange(Ipv6Network, Ipv6Network),
    FunctionIndexOutOfRange(u64, u8),
    FunctionExists(Ipv6Network),
    FunctionNotFound(Ipv6Network),
    AllocRetriesExhausted(String),
    UnsupportedAction(Seg6LocalActionType),
    // Forwarding plane
    Forwarding(ForwardingError),
}

// ===== impl Error =====

impl Error {
    pub fn log(&self) {
        match self {
            Error::LocatorNotFound(name)
            | Error::LocatorExists(name)
            | Error::AllocRetriesExhausted(name) => {
                warn!(locator = %name, "{}", self);
            }
            Error::InvalidFunctionBits(name, bits) => {
                warn!(locator = %name, %bits, "{}", self);
            }
            Error::ChunkAlreadyOwned(name, protocol) => {
                warn!(locator = %name, %protocol, "{}", self);
            }
            Error::FunctionPrefixLenMismatch(prefix, expected) => {
                warn!(%prefix, %expected, "{}", self);
            }
            Error::FunctionPrefixOutOfRange(prefix, locator) => {
                warn!(%prefix, %locator, "{}", self);
            }
            Error::FunctionIndexOutOfRange(index, bits) => {
                warn!(%index, %bits, "{}", self);
            }
            Error::FunctionExists(prefix) | Error::FunctionNotFound(prefix) => {
                warn!(%prefix, "{}", self);
            }
            Error::UnsupportedAction(action) => {
                warn!(%action, "{}", self);
            }
            Error::Forwarding(error) => {
                error!(error = %with_source(error), "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::LocatorNotFound(..) => {
                write!(f, "locator not found")
            }
            Error::LocatorExists(..) => {
                write!(f, "locator already exists")
            }
            Error::InvalidFunctionBits(..) => {
                write!(f, "invalid function bit length")
            }
            Error::ChunkAlreadyOwned(..) => {
                write!(f, "no free locator chunk")
            }
            Error::FunctionPrefixLenMismatch(..) => {
                write!(f, "function prefix length mismatch")
            }
            Error::FunctionPrefixOutOfRange(..) => {
                write!(f, "function prefix out of locator range")
            }
            Error::FunctionIndexOutOfRange(..) => {
                write!(f, "function index doesn't fit the function bits")
            }
            Error::FunctionExists(..) => {
                write!(f, "function already exists")
            }
            Error::FunctionNotFound(..) => {
                write!(f, "function not found")
            }
            Error::AllocRetriesExhausted(..) => {
                write!(f, "failed to allocate SID: retry limit reached")
            }
            Error::UnsupportedAction(..) => {
                write!(f, "unsupported endpoint behavior")
            }
            Error::Forwarding(..) => {
                write!(f, "forwarding plane update failed")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Forwarding(error) => Some(error),
            _ => None,
        }
    }
}

impl From<ForwardingError> for Error {
    fn from(error: ForwardingError) -> Error {
        match error {
            ForwardingError::UnsupportedAction(action) => {
                Error::UnsupportedAction(action)
            }
            error => Error::Forwarding(error),
        }
    }
}

// ===== global functions =====

pub(crate) fn with_source<E: std::error::Error>(error: E) -> String {
    if let Some(source) = error.source() {
        format!("{} ({})", error, with_source(source))
    } else {
        error.to_string()
    }
}
