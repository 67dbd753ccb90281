//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use const_addrs::{ip4, ip6};
use holo_utils::srv6::{Seg6LocalAction, Seg6LocalActionType};
use num_traits::FromPrimitive;

#[test]
fn action_types() {
    assert_eq!(
        Seg6LocalAction::EndDt4(100).action_type(),
        Seg6LocalActionType::EndDt4
    );
    assert_eq!(Seg6LocalActionType::EndDt4 as u32, 8);
    assert_eq!(Seg6LocalActionType::EndDt6 as u32, 7);
    assert_eq!(
        Seg6LocalActionType::from_u32(6),
        Some(Seg6LocalActionType::EndDx4)
    );
    assert!(
        !Seg6LocalAction::Unsupported(Seg6LocalActionType::EndB6)
            .is_supported()
    );
}

#[test]
fn action_display() {
    assert_eq!(Seg6LocalAction::End.to_string(), "End USP");
    assert_eq!(
        Seg6LocalAction::EndX(ip6!("2001:db8::1")).to_string(),
        "End.X nh6 2001:db8::1"
    );
    assert_eq!(
        Seg6LocalAction::EndDx4(ip4!("10.0.0.1")).to_string(),
        "End.DX4 nh4 10.0.0.1"
    );
    assert_eq!(Seg6LocalAction::EndDt6(10).to_string(), "End.DT6 table 10");
}
