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

//! Thread-safe append-only transaction log.
//!
//! Entries are never mutated once written. The only way to remove them is
//! [`TransactionLog::clear`], which the store calls on a full ledger reset.

use crate::base::{AccountId, TransactionId};
use crate::error::LedgerError;
use crate::transaction::{Transaction, TransactionStatus};
use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::time::Duration;

/// Append-only log with sequential ids.
///
/// The id is assigned under the write lock, so ids and insertion order agree.
#[derive(Debug, Default)]
pub struct TransactionLog {
    entries: RwLock<Vec<Transaction>>,
}

impl TransactionLog {
    /// Creates a new empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::StoreUnavailable`] if the write lock cannot be
    /// taken within `timeout`.
    pub fn append(
        &self,
        from_account: AccountId,
        to_account: AccountId,
        amount: Decimal,
        status: TransactionStatus,
        timeout: Duration,
    ) -> Result<Transaction, LedgerError> {
        let mut entries = self
            .entries
            .try_write_for(timeout)
            .ok_or(LedgerError::StoreUnavailable)?;
        let transaction = Transaction {
            id: TransactionId(entries.len() as u64 + 1),
            from_account,
            to_account,
            amount,
            status,
            created_at: Utc::now(),
        };
        entries.push(transaction.clone());
        Ok(transaction)
    }

    /// Returns up to `limit` entries, newest first.
    pub fn recent(&self, limit: usize, timeout: Duration) -> Result<Vec<Transaction>, LedgerError> {
        let entries = self
            .entries
            .try_read_for(timeout)
            .ok_or(LedgerError::StoreUnavailable)?;
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }

    pub fn len(&self, timeout: Duration) -> Result<usize, LedgerError> {
        self.entries
            .try_read_for(timeout)
            .map(|entries| entries.len())
            .ok_or(LedgerError::StoreUnavailable)
    }

    pub fn clear(&self, timeout: Duration) -> Result<(), LedgerError> {
        self.entries
            .try_write_for(timeout)
            .ok_or(LedgerError::StoreUnavailable)?
            .clear();
        Ok(())
    }
}
