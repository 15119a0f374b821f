// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Injectable pauses inside a transfer.
//!
//! A debit discipline calls [`RaceWindow::after_check`] between reading the
//! sender and acting on that read, and [`RaceWindow::after_debit`] between the
//! debit and the credit. These model external latency (anti-fraud checks,
//! logging) and widen the window in which concurrent transfers interleave.
//!
//! - [`NoDelay`]: no pause at all.
//! - [`FixedDelay`]: wall-clock sleeps, the way a real service would stall.
//! - [`Lockstep`]: holds every caller at the check point until `parties`
//!   callers have read, forcing the worst interleaving without relying on
//!   timing.

use parking_lot::{Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub trait RaceWindow: Send + Sync {
    /// Between the read that decides and the write that acts on it.
    fn after_check(&self) {}

    /// Between debiting the sender and crediting the receiver.
    fn after_debit(&self) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

impl RaceWindow for NoDelay {}

/// Sleeps for `check` after the read and `settle` after the debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay {
    pub check: Duration,
    pub settle: Duration,
}

impl FixedDelay {
    pub const CHECK: Duration = Duration::from_millis(200);
    pub const SETTLE: Duration = Duration::from_millis(50);

    pub fn new(check: Duration, settle: Duration) -> Self {
        Self { check, settle }
    }
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self::new(Self::CHECK, Self::SETTLE)
    }
}

impl RaceWindow for FixedDelay {
    fn after_check(&self) {
        if !self.check.is_zero() {
            thread::sleep(self.check);
        }
    }

    fn after_debit(&self) {
        if !self.settle.is_zero() {
            thread::sleep(self.settle);
        }
    }
}

/// Single-use rendezvous at the check point.
///
/// The first `parties` callers block until all of them have arrived, so all
/// of them act on what they read before anyone wrote. Callers beyond
/// `parties` pass straight through. Waiting is bounded by `timeout`, so a
/// burst with fewer callers than expected degrades to no pause instead of a
/// hang.
#[derive(Debug)]
pub struct Lockstep {
    parties: usize,
    timeout: Duration,
    arrived: Mutex<usize>,
    all_arrived: Condvar,
}

impl Lockstep {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(parties: usize) -> Self {
        Self::with_timeout(parties, Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(parties: usize, timeout: Duration) -> Self {
        Self {
            parties,
            timeout,
            arrived: Mutex::new(0),
            all_arrived: Condvar::new(),
        }
    }

    /// Number of callers that reached the check point so far.
    pub fn arrived(&self) -> usize {
        *self.arrived.lock()
    }
}

impl RaceWindow for Lockstep {
    fn after_check(&self) {
        let deadline = Instant::now() + self.timeout;
        let mut arrived = self.arrived.lock();
        *arrived += 1;
        if *arrived >= self.parties {
            self.all_arrived.notify_all();
            return;
        }
        while *arrived < self.parties {
            if self.all_arrived.wait_until(&mut arrived, deadline).timed_out() {
                break;
            }
        }
    }
}
