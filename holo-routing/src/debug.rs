//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv6Addr;

use holo_utils::protocol::Protocol;
use holo_utils::srv6::Seg6LocalAction;
use ipnetwork::Ipv6Network;
use tracing::{debug, debug_span};

// SRv6 debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    LocatorAdd(&'a str, &'a Ipv6Network),
    LocatorDelete(&'a str),
    ChunkAssign(&'a str, Protocol),
    ChunkRelease(&'a str, Protocol),
    FunctionAdd(&'a str, &'a Ipv6Network, &'a Seg6LocalAction),
    FunctionDelete(&'a str, &'a Ipv6Network),
    ClientDisconnect(Protocol),
    EncapSrcUpdate(&'a Ipv6Addr),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::LocatorAdd(name, prefix) => {
                debug_span!("locator", %name).in_scope(|| {
                    debug!(%prefix, "{}", self);
                });
            }
            Debug::LocatorDelete(name) => {
                debug_span!("locator", %name).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::ChunkAssign(name, protocol)
            | Debug::ChunkRelease(name, protocol) => {
                debug_span!("locator", %name).in_scope(|| {
                    debug!(%protocol, "{}", self);
                });
            }
            Debug::FunctionAdd(name, prefix, action) => {
                debug_span!("locator", %name).in_scope(|| {
                    debug!(%prefix, %action, "{}", self);
                });
            }
            Debug::FunctionDelete(name, prefix) => {
                debug_span!("locator", %name).in_scope(|| {
                    debug!(%prefix, "{}", self);
                });
            }
            Debug::ClientDisconnect(protocol) => {
                debug!(%protocol, "{}", self);
            }
            Debug::EncapSrcUpdate(addr) => {
                debug!(%addr, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::LocatorAdd(..) => {
                write!(f, "locator added")
            }
            Debug::LocatorDelete(..) => {
                write!(f, "locator deleted")
            }
            Debug::ChunkAssign(..) => {
                write!(f, "locator chunk assigned")
            }
            Debug::ChunkRelease(..) => {
                write!(f, "locator chunk released")
            }
            Debug::FunctionAdd(..) => {
                write!(f, "SID allocated")
            }
            Debug::FunctionDelete(..) => {
                write!(f, "SID released")
            }
            Debug::ClientDisconnect(..) => {
                write!(f, "client disconnected")
            }
            Debug::EncapSrcUpdate(..) => {
                write!(f, "encapsulation source updated")
            }
        }
    }
}
