//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//
