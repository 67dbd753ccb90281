//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod attribute;
pub mod consts;
pub mod error;
pub mod nlri;
