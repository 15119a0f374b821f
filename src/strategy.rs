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

//! Debit disciplines.
//!
//! A transfer succeeds or fails on its debit. Each [`DebitStrategy`] decides
//! how the sender is debited under concurrency; crediting and recording are
//! shared by the [`TransferExecutor`](crate::TransferExecutor).
//!
//! | Strategy | Decision | Under contention |
//! |----------|----------|------------------|
//! | [`UnsafeDebit`] | Stale read, then unconditional write | Over-spends, balance goes negative |
//! | [`PessimisticDebit`] | Conditional write on the locked row | Exactly `floor(B/A)` succeed |
//! | [`OptimisticDebit`] | Versioned compare-and-swap, 3 attempts | At most `floor(B/A)` succeed, some give up |

use crate::error::LedgerError;
use crate::store::LedgerStore;
use crate::transaction::Transfer;
use crate::window::{FixedDelay, NoDelay, RaceWindow};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Unsafe,
    Pessimistic,
    Optimistic,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 3] = [
        StrategyKind::Unsafe,
        StrategyKind::Pessimistic,
        StrategyKind::Optimistic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Unsafe => "unsafe",
            StrategyKind::Pessimistic => "pessimistic",
            StrategyKind::Optimistic => "optimistic",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "unsafe" | "vulnerable" => Ok(StrategyKind::Unsafe),
            "pessimistic" | "secure" => Ok(StrategyKind::Pessimistic),
            "optimistic" => Ok(StrategyKind::Optimistic),
            other => Err(format!(
                "unknown strategy '{other}' (expected unsafe, pessimistic or optimistic)"
            )),
        }
    }
}

/// A successful debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Debit {
    /// Debit attempts made, 1 unless the strategy retries.
    pub attempts: u32,
}

/// Removes `transfer.amount` from the sender or explains why not.
///
/// Implementations only ever touch the sender. Input validation has already
/// happened by the time `debit` is called.
pub trait DebitStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// # Errors
    ///
    /// - [`LedgerError::InsufficientFunds`] - The sender cannot cover the amount.
    /// - [`LedgerError::ConflictRetryExhausted`] - Optimistic only.
    /// - [`LedgerError::AccountNotFound`] / [`LedgerError::StoreUnavailable`] - From the store.
    fn debit(&self, store: &LedgerStore, transfer: &Transfer) -> Result<Debit, LedgerError>;
}

/// Check-then-act on a stale read. Reproduces the over-spend on purpose.
///
/// 1. Read the sender balance.
/// 2. Pause (`after_check`) while holding that value.
/// 3. Compare the stale value with the amount.
/// 4. Subtract unconditionally, then pause again (`after_debit`).
pub struct UnsafeDebit {
    window: Arc<dyn RaceWindow>,
}

impl UnsafeDebit {
    pub fn new(window: Arc<dyn RaceWindow>) -> Self {
        Self { window }
    }
}

impl Default for UnsafeDebit {
    fn default() -> Self {
        Self::new(Arc::new(FixedDelay::default()))
    }
}

impl DebitStrategy for UnsafeDebit {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Unsafe
    }

    fn debit(&self, store: &LedgerStore, transfer: &Transfer) -> Result<Debit, LedgerError> {
        let sender = store.get_account(transfer.from)?;
        debug!(balance = %sender.balance, "sender balance checked");

        self.window.after_check();

        if sender.balance < transfer.amount {
            return Err(LedgerError::InsufficientFunds);
        }
        let row = store.adjust_balance_unconditional(transfer.from, -transfer.amount)?;
        debug!(stale = %sender.balance, actual = %row.balance, "sender debited");

        self.window.after_debit();
        Ok(Debit { attempts: 1 })
    }
}

/// Atomic conditional debit: `balance -= amount` only while `balance >= amount`.
///
/// The read before the debit is advisory and only logged; the conditional
/// write alone decides.
pub struct PessimisticDebit {
    window: Arc<dyn RaceWindow>,
}

impl PessimisticDebit {
    pub fn new(window: Arc<dyn RaceWindow>) -> Self {
        Self { window }
    }
}

impl Default for PessimisticDebit {
    fn default() -> Self {
        Self::new(Arc::new(NoDelay))
    }
}

impl DebitStrategy for PessimisticDebit {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Pessimistic
    }

    fn debit(&self, store: &LedgerStore, transfer: &Transfer) -> Result<Debit, LedgerError> {
        let advisory = store.get_account(transfer.from)?;
        debug!(balance = %advisory.balance, "advisory sender balance");

        self.window.after_check();

        let amount = transfer.amount;
        if !store.adjust_balance_conditional(transfer.from, -amount, |row| row.balance >= amount)? {
            return Err(LedgerError::InsufficientFunds);
        }
        Ok(Debit { attempts: 1 })
    }
}

/// Versioned compare-and-swap with a bounded retry loop.
///
/// A shortfall seen on read fails at once; a version mismatch is a conflict
/// and is retried up to [`OptimisticDebit::MAX_ATTEMPTS`] times in total.
pub struct OptimisticDebit {
    window: Arc<dyn RaceWindow>,
}

impl OptimisticDebit {
    pub const MAX_ATTEMPTS: u32 = 3;

    pub fn new(window: Arc<dyn RaceWindow>) -> Self {
        Self { window }
    }
}

impl Default for OptimisticDebit {
    fn default() -> Self {
        Self::new(Arc::new(NoDelay))
    }
}

impl DebitStrategy for OptimisticDebit {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Optimistic
    }

    fn debit(&self, store: &LedgerStore, transfer: &Transfer) -> Result<Debit, LedgerError> {
        for attempt in 1..=Self::MAX_ATTEMPTS {
            let sender = store.get_account(transfer.from)?;
            if sender.balance < transfer.amount {
                return Err(LedgerError::InsufficientFunds);
            }

            self.window.after_check();

            if store.compare_and_swap_version(
                transfer.from,
                -transfer.amount,
                sender.version,
                transfer.amount,
            )? {
                return Ok(Debit { attempts: attempt });
            }
            debug!(
                attempt,
                max_attempts = Self::MAX_ATTEMPTS,
                version = sender.version,
                "version conflict"
            );
        }
        Err(LedgerError::ConflictRetryExhausted {
            attempts: Self::MAX_ATTEMPTS,
        })
    }
}
