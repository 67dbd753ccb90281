//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv6Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut, TryGetError};

// Extension methods for Bytes.
pub trait BytesExt {
    /// Gets an unsigned 24 bit integer (an MPLS label field) in big-endian
    /// byte order.
    fn try_get_u24(&mut self) -> Result<u32, TryGetError>;

    /// Gets an IPv6 address (a SID) in big-endian byte order.
    fn try_get_ipv6(&mut self) -> Result<Ipv6Addr, TryGetError>;
}

// Extension methods for BytesMut.
pub trait BytesMutExt {
    /// Writes an unsigned 24 bit integer in big-endian byte order.
    fn put_u24(&mut self, n: u32);

    /// Writes an IPv6 address in big-endian byte order.
    fn put_ipv6(&mut self, addr: &Ipv6Addr);
}

// ===== impl Bytes =====

impl BytesExt for Bytes {
    fn try_get_u24(&mut self) -> Result<u32, TryGetError> {
        let mut n = [0; 4];
        self.try_copy_to_slice(&mut n[1..=3])?;
        Ok(u32::from_be_bytes(n))
    }

    fn try_get_ipv6(&mut self) -> Result<Ipv6Addr, TryGetError> {
        Ok(Ipv6Addr::from(self.try_get_u128()?))
    }
}

// ===== impl BytesMut =====

impl BytesMutExt for BytesMut {
    fn put_u24(&mut self, n: u32) {
        self.put_slice(&n.to_be_bytes()[1..=3]);
    }

    fn put_ipv6(&mut self, addr: &Ipv6Addr) {
        self.put_slice(&addr.octets())
    }
}
