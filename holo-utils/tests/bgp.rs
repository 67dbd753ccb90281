//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use const_addrs::ip4;
use holo_utils::bgp::{ExtComm, RdType, RouteDistinguisher};

#[test]
fn route_target_as2() {
    let rt: ExtComm = "65000:1".parse().unwrap();
    assert_eq!(rt, ExtComm::route_target_as2(65000, 1));
    assert_eq!(rt.0, [0x00, 0x02, 0xfd, 0xe8, 0x00, 0x00, 0x00, 0x01]);
    assert!(rt.is_route_target());
    assert_eq!(rt.to_string(), "rt 65000:1");
}

#[test]
fn route_target_ip() {
    let rt: ExtComm = "rt 10.0.0.1:7".parse().unwrap();
    assert_eq!(rt, ExtComm::route_target_ip(ip4!("10.0.0.1"), 7));
    assert_eq!(rt.0, [0x01, 0x02, 10, 0, 0, 1, 0x00, 0x07]);
    assert_eq!(rt.to_string(), "rt 10.0.0.1:7");
}

#[test]
fn route_target_as4() {
    let rt: ExtComm = "4200000000:10".parse().unwrap();
    assert_eq!(rt, ExtComm::route_target_as4(4200000000, 10));
    assert_eq!(rt.0[0..2], [0x02, 0x02]);
    assert_eq!(rt.to_string(), "rt 4200000000:10");
}

#[test]
fn route_target_invalid() {
    assert!("65000".parse::<ExtComm>().is_err());
    assert!("65000:x".parse::<ExtComm>().is_err());
    // 4-byte administrators only leave room for a 16-bit value.
    assert!("10.0.0.1:70000".parse::<ExtComm>().is_err());
}

#[test]
fn route_distinguisher() {
    let rd: RouteDistinguisher = "65000:1".parse().unwrap();
    assert_eq!(rd.0, [0x00, 0x00, 0xfd, 0xe8, 0x00, 0x00, 0x00, 0x01]);
    assert_eq!(rd.rd_type(), Some(RdType::As2));
    assert_eq!(rd.to_string(), "65000:1");

    let rd: RouteDistinguisher = "192.168.0.1:3".parse().unwrap();
    assert_eq!(rd.rd_type(), Some(RdType::Ip));
    assert_eq!(rd.to_string(), "192.168.0.1:3");

    let rd = RouteDistinguisher::new([0x00, 0x09, 0, 0, 0, 0, 0, 1]);
    assert_eq!(rd.rd_type(), None);
}
