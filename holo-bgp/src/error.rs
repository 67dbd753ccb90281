//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use holo_utils::southbound::ForwardingError;
use ipnetwork::IpNetwork;
use tracing::{error, warn, warn_span};

use crate::packet::error::DecodeError;
use crate::rib::PathId;

// BGP errors.
#[derive(Debug)]
pub enum Error {
    // Configuration
    InstanceExists(String),
    InstanceNotFound(String),
    InstanceInUse(String, u32),
    // Network input
    NlriDecodeError(DecodeError),
    // Forwarding plane
    Forwarding(ForwardingError),
    // Internal consistency
    PathNotFound(PathId),
    DuplicateLeak(String, IpNetwork),
}

// ===== impl Error =====

impl Error {
    pub fn log(&self) {
        match self {
            Error::InstanceExists(name)
            | Error::InstanceNotFound(name) => {
                warn_span!("bgp-instance", %name).in_scope(|| {
                    warn!("{}", self);
                });
            }
            Error::InstanceInUse(name, refcount) => {
                warn_span!("bgp-instance", %name).in_scope(|| {
                    warn!(%refcount, "{}", self);
                });
            }
            Error::NlriDecodeError(error) => {
                warn!(error = %with_source(error), "{}", self);
            }
            Error::Forwarding(error) => {
                warn!(error = %with_source(error), "{}", self);
            }
            Error::PathNotFound(path_id) => {
                error!(?path_id, "{}", self);
            }
            Error::DuplicateLeak(name, prefix) => {
                warn_span!("bgp-instance", %name).in_scope(|| {
                    error!(%prefix, "{}", self);
                });
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InstanceExists(..) => {
                write!(f, "instance already exists")
            }
            Error::InstanceNotFound(..) => {
                write!(f, "instance not found")
            }
            Error::InstanceInUse(..) => {
                write!(f, "instance still referenced by leaked routes")
            }
            Error::NlriDecodeError(..) => {
                write!(f, "failed to decode VPN update")
            }
            Error::Forwarding(..) => {
                write!(f, "failed to update forwarding plane")
            }
            Error::PathNotFound(..) => {
                write!(f, "path not found")
            }
            Error::DuplicateLeak(..) => {
                write!(f, "multiple leaked paths share the same parent")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::NlriDecodeError(error) => Some(error),
            Error::Forwarding(error) => Some(error),
            _ => None,
        }
    }
}

impl From<DecodeError> for Error {
    fn from(error: DecodeError) -> Error {
        Error::NlriDecodeError(error)
    }
}

impl From<ForwardingError> for Error {
    fn from(error: ForwardingError) -> Error {
        Error::Forwarding(error)
    }
}

// ===== helper functions =====

fn with_source<E: std::error::Error>(error: E) -> String {
    if let Some(source) = error.source() {
        format!("{} ({})", error, with_source(source))
    } else {
        error.to_string()
    }
}
