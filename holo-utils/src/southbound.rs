//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv6Addr;

use ipnetwork::{IpNetwork, Ipv6Network};
use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::protocol::Protocol;
use crate::srv6::{Seg6LocalAction, Seg6LocalActionType, Seg6Mode};

// Interface to the kernel forwarding plane.
//
// Every call is a synchronous request/reply exchange: it either succeeds
// or reports the kernel-level error. Requests targeting the same prefix are
// acknowledged in the order they were issued.
pub trait ForwardingPlane {
    // Installs (or replaces) a route that encapsulates matching traffic
    // with the given segment list.
    fn install_encap_route(
        &mut self,
        msg: &EncapRouteMsg,
    ) -> Result<(), ForwardingError>;

    // Installs (or replaces) a local SID route bound to an endpoint
    // behavior.
    fn install_local_sid(
        &mut self,
        msg: &LocalSidMsg,
    ) -> Result<(), ForwardingError>;

    // Removes a previously installed route.
    fn remove_route(&mut self, msg: &RouteKeyMsg)
    -> Result<(), ForwardingError>;

    // Updates the source address used for SRv6 encapsulation.
    fn update_tunsrc(&mut self, addr: Ipv6Addr) -> Result<(), ForwardingError>;
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct EncapRouteMsg {
    pub protocol: Protocol,
    pub prefix: IpNetwork,
    pub table_id: u32,
    pub segs: SmallVec<[Ipv6Addr; 2]>,
    pub mode: Seg6Mode,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LocalSidMsg {
    pub protocol: Protocol,
    pub sid: Ipv6Network,
    pub action: Seg6LocalAction,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RouteKeyMsg {
    pub protocol: Protocol,
    pub prefix: IpNetwork,
    pub table_id: u32,
}

// Forwarding plane errors.
#[derive(Debug)]
pub enum ForwardingError {
    UnsupportedAction(Seg6LocalActionType),
    TooManySegments(usize),
    Io(std::io::Error),
    Nack(i32),
    InvalidReply,
    Encode,
    GenlFamilyNotFound(&'static str),
}

// ===== impl LocalSidMsg =====

impl LocalSidMsg {
    pub fn key(&self) -> RouteKeyMsg {
        RouteKeyMsg {
            protocol: self.protocol,
            prefix: IpNetwork::V6(self.sid),
            table_id: 0,
        }
    }
}

// ===== impl ForwardingError =====

impl ForwardingError {
    // Whether the kernel rejected the request because the route doesn't
    // exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ForwardingError::Nack(errno) if *errno == Errno::ESRCH as i32
        )
    }
}

impl std::fmt::Display for ForwardingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForwardingError::UnsupportedAction(action) => {
                write!(f, "unsupported seg6local action: {}", action)
            }
            ForwardingError::TooManySegments(count) => {
                write!(f, "too many segments: {}", count)
            }
            ForwardingError::Io(..) => {
                write!(f, "netlink I/O error")
            }
            ForwardingError::Nack(errno) => {
                write!(f, "kernel rejected request (errno {})", errno)
            }
            ForwardingError::InvalidReply => {
                write!(f, "invalid netlink reply")
            }
            ForwardingError::Encode => {
                write!(f, "failed to build netlink message")
            }
            ForwardingError::GenlFamilyNotFound(name) => {
                write!(f, "generic netlink family not found: {}", name)
            }
        }
    }
}

impl std::error::Error for ForwardingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ForwardingError::Io(error) => Some(error),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ForwardingError {
    fn from(error: std::io::Error) -> ForwardingError {
        ForwardingError::Io(error)
    }
}

// ===== Recording forwarding plane =====

#[cfg(feature = "testing")]
pub use recording::{DataplaneOp, RecordingDataplane};

#[cfg(feature = "testing")]
mod recording {
    use std::cell::{Cell, RefCell};
    use std::net::Ipv6Addr;
    use std::rc::Rc;

    use super::*;

    #[derive(Clone, Debug, Eq, PartialEq)]
    pub enum DataplaneOp {
        InstallEncap(EncapRouteMsg),
        InstallLocalSid(LocalSidMsg),
        Remove(RouteKeyMsg),
        UpdateTunsrc(Ipv6Addr),
    }

    // Forwarding plane that records every successful operation. Clones
    // share the same log, so a test can keep one handle and give the other
    // away.
    #[derive(Clone, Debug, Default)]
    pub struct RecordingDataplane {
        ops: Rc<RefCell<Vec<DataplaneOp>>>,
        fail: Rc<Cell<bool>>,
        fail_next: Rc<Cell<Option<i32>>>,
    }

    impl RecordingDataplane {
        pub fn ops(&self) -> Vec<DataplaneOp> {
            self.ops.borrow().clone()
        }

        pub fn clear(&self) {
            self.ops.borrow_mut().clear();
        }

        // While set, every request fails with a kernel NACK.
        pub fn set_fail(&self, fail: bool) {
            self.fail.set(fail);
        }

        // Fails only the next request, with the given errno.
        pub fn fail_next(&self, errno: Errno) {
            self.fail_next.set(Some(errno as i32));
        }

        fn record(&self, op: DataplaneOp) -> Result<(), ForwardingError> {
            if let Some(errno) = self.fail_next.take() {
                return Err(ForwardingError::Nack(errno));
            }
            if self.fail.get() {
                return Err(ForwardingError::Nack(Errno::EPERM as i32));
            }
            self.ops.borrow_mut().push(op);
            Ok(())
        }
    }

    impl ForwardingPlane for RecordingDataplane {
        fn install_encap_route(
            &mut self,
            msg: &EncapRouteMsg,
        ) -> Result<(), ForwardingError> {
            if msg.segs.len() > crate::srv6::SRV6_MAX_SIDS {
                return Err(ForwardingError::TooManySegments(msg.segs.len()));
            }
            self.record(DataplaneOp::InstallEncap(msg.clone()))
        }

        fn install_local_sid(
            &mut self,
            msg: &LocalSidMsg,
        ) -> Result<(), ForwardingError> {
            if !msg.action.is_supported() {
                return Err(ForwardingError::UnsupportedAction(
                    msg.action.action_type(),
                ));
            }
            self.record(DataplaneOp::InstallLocalSid(msg.clone()))
        }

        fn remove_route(
            &mut self,
            msg: &RouteKeyMsg,
        ) -> Result<(), ForwardingError> {
            self.record(DataplaneOp::Remove(msg.clone()))
        }

        fn update_tunsrc(
            &mut self,
            addr: Ipv6Addr,
        ) -> Result<(), ForwardingError> {
            self.record(DataplaneOp::UpdateTunsrc(addr))
        }
    }
}
