//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{Ipv4Addr, Ipv6Addr};

use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

// Maximum number of segments in a segment list.
pub const SRV6_MAX_SIDS: usize = 16;

// seg6local action codes, as understood by the Linux kernel.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum Seg6LocalActionType {
    End = 1,
    EndX = 2,
    EndT = 3,
    EndDx2 = 4,
    EndDx6 = 5,
    EndDx4 = 6,
    EndDt6 = 7,
    EndDt4 = 8,
    EndB6 = 9,
    EndB6Encap = 10,
    EndBm = 11,
    EndS = 12,
    EndAs = 13,
    EndAm = 14,
}

// SRv6 endpoint behavior bound to a local SID, along with its context.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
#[serde(tag = "action", content = "context")]
pub enum Seg6LocalAction {
    End,
    EndX(Ipv6Addr),
    EndT(u32),
    EndDx4(Ipv4Addr),
    EndDx6(Ipv6Addr),
    EndDt4(u32),
    EndDt6(u32),
    // Behaviors that can be named but not programmed.
    Unsupported(Seg6LocalActionType),
}

// SRv6 encapsulation mode.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Seg6Mode {
    Inline = 0,
    #[default]
    Encap = 1,
    L2Encap = 2,
}

// ===== impl Seg6LocalActionType =====

impl Seg6LocalActionType {
    pub fn name(&self) -> &'static str {
        match self {
            Seg6LocalActionType::End => "End",
            Seg6LocalActionType::EndX => "End.X",
            Seg6LocalActionType::EndT => "End.T",
            Seg6LocalActionType::EndDx2 => "End.DX2",
            Seg6LocalActionType::EndDx6 => "End.DX6",
            Seg6LocalActionType::EndDx4 => "End.DX4",
            Seg6LocalActionType::EndDt6 => "End.DT6",
            Seg6LocalActionType::EndDt4 => "End.DT4",
            Seg6LocalActionType::EndB6 => "End.B6",
            Seg6LocalActionType::EndB6Encap => "End.B6.Encap",
            Seg6LocalActionType::EndBm => "End.BM",
            Seg6LocalActionType::EndS => "End.S",
            Seg6LocalActionType::EndAs => "End.AS",
            Seg6LocalActionType::EndAm => "End.AM",
        }
    }
}

impl std::fmt::Display for Seg6LocalActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ===== impl Seg6LocalAction =====

impl Seg6LocalAction {
    pub fn action_type(&self) -> Seg6LocalActionType {
        match self {
            Seg6LocalAction::End => Seg6LocalActionType::End,
            Seg6LocalAction::EndX(..) => Seg6LocalActionType::EndX,
            Seg6LocalAction::EndT(..) => Seg6LocalActionType::EndT,
            Seg6LocalAction::EndDx4(..) => Seg6LocalActionType::EndDx4,
            Seg6LocalAction::EndDx6(..) => Seg6LocalActionType::EndDx6,
            Seg6LocalAction::EndDt4(..) => Seg6LocalActionType::EndDt4,
            Seg6LocalAction::EndDt6(..) => Seg6LocalActionType::EndDt6,
            Seg6LocalAction::Unsupported(action_type) => *action_type,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Seg6LocalAction::Unsupported(..))
    }

    // Renders the action context the way operators expect to read it.
    pub fn context(&self) -> String {
        match self {
            Seg6LocalAction::End | Seg6LocalAction::Unsupported(..) => {
                "USP".to_owned()
            }
            Seg6LocalAction::EndX(addr) | Seg6LocalAction::EndDx6(addr) => {
                format!("nh6 {}", addr)
            }
            Seg6LocalAction::EndDx4(addr) => format!("nh4 {}", addr),
            Seg6LocalAction::EndT(table)
            | Seg6LocalAction::EndDt4(table)
            | Seg6LocalAction::EndDt6(table) => format!("table {}", table),
        }
    }
}

impl std::fmt::Display for Seg6LocalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.action_type(), self.context())
    }
}
