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

//! Ledger store.
//!
//! The [`LedgerStore`] exclusively owns account and transaction state for the
//! lifetime of the process. It exposes read and write primitives with explicit
//! atomicity guarantees, so that transfer disciplines can be built correctly
//! or incorrectly on top of them:
//!
//! | Primitive | Guarantee |
//! |-----------|-----------|
//! | [`get_account`](LedgerStore::get_account) | Snapshot, may be stale on return |
//! | [`adjust_balance_unconditional`](LedgerStore::adjust_balance_unconditional) | Atomic `+=`, no coupling with any earlier read |
//! | [`adjust_balance_conditional`](LedgerStore::adjust_balance_conditional) | Atomic check-and-`+=` on one row |
//! | [`compare_and_swap_version`](LedgerStore::compare_and_swap_version) | Atomic version check-and-`+=` on one row |
//!
//! # Thread Safety
//!
//! Accounts live in a [`DashMap`], each with its own row lock. No operation
//! holds more than one row lock at a time, so the store cannot deadlock on
//! itself. Every lock acquisition is bounded by the configured timeout and
//! fails with [`LedgerError::StoreUnavailable`] when exceeded.

use crate::account::{Account, AccountSnapshot, BalanceRow};
use crate::base::{AccountId, TransactionId};
use crate::error::LedgerError;
use crate::transaction::{Transaction, TransactionStatus};
use crate::transaction_log::TransactionLog;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::info;

/// One account of a ledger seed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedAccount {
    pub name: String,
    pub balance: Decimal,
}

impl SeedAccount {
    pub fn new(name: impl Into<String>, balance: Decimal) -> Self {
        Self {
            name: name.into(),
            balance,
        }
    }
}

/// The starting ledger: Alice 1000, Bob 500, Charlie 500 (total 2000).
pub fn canonical_seed() -> Vec<SeedAccount> {
    vec![
        SeedAccount::new("Alice", dec!(1000)),
        SeedAccount::new("Bob", dec!(500)),
        SeedAccount::new("Charlie", dec!(500)),
    ]
}

/// Transaction log entry joined with the account names.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TransactionView {
    pub id: TransactionId,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub from_name: String,
    pub to_name: String,
}

/// Process-lifetime storage of accounts and transactions.
pub struct LedgerStore {
    /// Accounts indexed by id.
    accounts: DashMap<AccountId, Account>,
    transactions: TransactionLog,
    /// Sum of the seed balances; also serializes resets.
    expected_total: RwLock<Decimal>,
    lock_timeout: Duration,
    online: AtomicBool,
}

impl LedgerStore {
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

    /// Creates an empty store with no accounts.
    pub fn new(lock_timeout: Duration) -> Self {
        LedgerStore {
            accounts: DashMap::new(),
            transactions: TransactionLog::new(),
            expected_total: RwLock::new(Decimal::ZERO),
            lock_timeout,
            online: AtomicBool::new(true),
        }
    }

    /// Creates a store already seeded with `seed`.
    pub fn with_seed(seed: &[SeedAccount], lock_timeout: Duration) -> Result<Self, LedgerError> {
        let store = Self::new(lock_timeout);
        store.reset_ledger(seed)?;
        Ok(store)
    }

    /// Makes every subsequent operation fail with [`LedgerError::StoreUnavailable`].
    pub fn disconnect(&self) {
        self.online.store(false, Ordering::SeqCst);
    }

    pub fn reconnect(&self) {
        self.online.store(true, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<(), LedgerError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LedgerError::StoreUnavailable)
        }
    }

    fn account(
        &self,
        id: AccountId,
    ) -> Result<dashmap::mapref::one::Ref<'_, AccountId, Account>, LedgerError> {
        self.ensure_online()?;
        self.accounts.get(&id).ok_or(LedgerError::AccountNotFound(id))
    }

    /// Snapshot read of one account. No lock is held after return.
    pub fn get_account(&self, id: AccountId) -> Result<AccountSnapshot, LedgerError> {
        self.account(id)?.snapshot(self.lock_timeout)
    }

    /// Fails with [`LedgerError::AccountNotFound`] unless `id` exists.
    pub fn ensure_account(&self, id: AccountId) -> Result<(), LedgerError> {
        self.account(id).map(|_| ())
    }

    /// All accounts ordered by id.
    pub fn list_accounts(&self) -> Result<Vec<AccountSnapshot>, LedgerError> {
        self.ensure_online()?;
        let mut accounts = self
            .accounts
            .iter()
            .map(|entry| entry.value().snapshot(self.lock_timeout))
            .collect::<Result<Vec<_>, _>>()?;
        accounts.sort_by_key(|account| account.id);
        Ok(accounts)
    }

    /// Applies `balance += delta` with no regard for what any caller read before.
    pub fn adjust_balance_unconditional(
        &self,
        id: AccountId,
        delta: Decimal,
    ) -> Result<BalanceRow, LedgerError> {
        self.account(id)?.adjust(delta, self.lock_timeout)
    }

    /// Applies `balance += delta` iff `predicate` holds for the current row,
    /// as one indivisible read-modify-write. Returns whether the write occurred.
    pub fn adjust_balance_conditional<F>(
        &self,
        id: AccountId,
        delta: Decimal,
        predicate: F,
    ) -> Result<bool, LedgerError>
    where
        F: FnOnce(BalanceRow) -> bool,
    {
        self.account(id)?.adjust_if(delta, self.lock_timeout, predicate)
    }

    /// Applies `balance += delta` and bumps the version iff the version still
    /// equals `expected_version` and the balance is at least `min_balance`.
    pub fn compare_and_swap_version(
        &self,
        id: AccountId,
        delta: Decimal,
        expected_version: u64,
        min_balance: Decimal,
    ) -> Result<bool, LedgerError> {
        self.account(id)?
            .compare_and_swap(delta, expected_version, min_balance, self.lock_timeout)
    }

    /// Appends a transaction row. Independent of any balance operation.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidRequest`] - Same account on both sides or non-positive amount.
    /// - [`LedgerError::AccountNotFound`] - Either side does not exist.
    pub fn record_transaction(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
        status: TransactionStatus,
    ) -> Result<Transaction, LedgerError> {
        if from == to {
            return Err(LedgerError::invalid("transaction cannot reference one account twice"));
        }
        if amount <= Decimal::ZERO {
            return Err(LedgerError::invalid("transaction amount must be positive"));
        }
        self.ensure_account(from)?;
        self.ensure_account(to)?;
        self.transactions
            .append(from, to, amount, status, self.lock_timeout)
    }

    /// Up to `limit` transactions, newest first, with account names.
    pub fn list_transactions(&self, limit: usize) -> Result<Vec<TransactionView>, LedgerError> {
        self.ensure_online()?;
        let entries = self.transactions.recent(limit, self.lock_timeout)?;
        // Rows whose accounts vanished are dropped, like an inner join.
        Ok(entries
            .into_iter()
            .filter_map(|transaction| {
                let from_name = self.accounts.get(&transaction.from_account)?.name().to_owned();
                let to_name = self.accounts.get(&transaction.to_account)?.name().to_owned();
                Some(TransactionView {
                    id: transaction.id,
                    amount: transaction.amount,
                    status: transaction.status,
                    created_at: transaction.created_at,
                    from_name,
                    to_name,
                })
            })
            .collect())
    }

    pub fn transaction_count(&self) -> Result<usize, LedgerError> {
        self.ensure_online()?;
        self.transactions.len(self.lock_timeout)
    }

    /// Sum of all balances.
    pub fn total_balance(&self) -> Result<Decimal, LedgerError> {
        self.ensure_online()?;
        self.accounts.iter().try_fold(Decimal::ZERO, |total, entry| {
            total
                .checked_add(entry.value().balance(self.lock_timeout)?)
                .ok_or_else(|| LedgerError::invalid("ledger total overflow"))
        })
    }

    /// Sum of the balances the ledger was last seeded with.
    pub fn expected_total(&self) -> Result<Decimal, LedgerError> {
        self.ensure_online()?;
        self.expected_total
            .try_read_for(self.lock_timeout)
            .map(|total| *total)
            .ok_or(LedgerError::StoreUnavailable)
    }

    /// Clears accounts and transactions, then re-creates the accounts of
    /// `seed` in order with ids from 1 and version 1.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidRequest`] for an empty or duplicate name,
    /// or balances whose sum overflows, before anything is cleared.
    pub fn reset_ledger(&self, seed: &[SeedAccount]) -> Result<Vec<AccountSnapshot>, LedgerError> {
        self.ensure_online()?;
        let mut names = HashSet::with_capacity(seed.len());
        for account in seed {
            if account.name.trim().is_empty() {
                return Err(LedgerError::invalid("account name must not be empty"));
            }
            if !names.insert(account.name.as_str()) {
                return Err(LedgerError::invalid(format!(
                    "duplicate account name '{}'",
                    account.name
                )));
            }
        }
        let total = seed
            .iter()
            .try_fold(Decimal::ZERO, |total, account| total.checked_add(account.balance))
            .ok_or_else(|| LedgerError::invalid("seed balances overflow"))?;

        let mut expected_total = self
            .expected_total
            .try_write_for(self.lock_timeout)
            .ok_or(LedgerError::StoreUnavailable)?;

        self.transactions.clear(self.lock_timeout)?;
        self.accounts.clear();
        for (index, account) in seed.iter().enumerate() {
            let id = AccountId(index as u32 + 1);
            self.accounts
                .insert(id, Account::new(id, account.name.clone(), account.balance));
        }
        *expected_total = total;
        drop(expected_total);
        info!(accounts = seed.len(), expected_total = %total, "ledger reset");

        self.list_accounts()
    }
}

impl Default for LedgerStore {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LOCK_TIMEOUT)
    }
}
