//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![cfg_attr(
    feature = "testing",
    allow(dead_code, unused_variables, unused_imports)
)]

pub mod debug;
pub mod error;
pub mod instance;
pub mod leak;
pub mod master;
pub mod packet;
pub mod policy;
pub mod rib;
