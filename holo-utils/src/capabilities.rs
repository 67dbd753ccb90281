//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use capctl::caps::CapState;
use tracing::error;

/// Runs the provided closure with elevated capabilities.
///
/// If the capability state can't be read, the closure runs with whatever
/// privileges the process already holds.
pub fn raise<F, R>(cb: F) -> R
where
    F: FnOnce() -> R,
{
    let mut caps = match CapState::get_current() {
        Ok(caps) => caps,
        Err(error) => {
            error!("failed to get current capabilities: {}", error);
            return cb();
        }
    };

    // Raise capabilities.
    caps.effective = caps.permitted;
    if let Err(error) = caps.set_current() {
        error!("failed to update current capabilities: {}", error);
    }

    // Run closure.
    let ret = cb();

    // Drop capabilities.
    caps.effective.clear();
    if let Err(error) = caps.set_current() {
        error!("failed to update current capabilities: {}", error);
    }

    // Return the closure's return value.
    ret
}
