//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use serde::{Deserialize, Serialize};

// Route sources and owners of SRv6 resources.
#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    BGP,
    DIRECT,
    ISIS,
    OSPFV3,
    STATIC,
}

// ===== impl Protocol =====

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::BGP => write!(f, "bgp"),
            Protocol::DIRECT => write!(f, "direct"),
            Protocol::ISIS => write!(f, "isis"),
            Protocol::OSPFV3 => write!(f, "ospfv3"),
            Protocol::STATIC => write!(f, "static"),
        }
    }
}
