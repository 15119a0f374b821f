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

//! Account records.
//!
//! An account keeps its immutable identity (`id`, `name`, `created_at`) outside
//! the lock and its mutable row (`balance`, `version`) behind a
//! [`parking_lot::Mutex`]. Every mutation of the row is a single critical
//! section, so each primitive below is linearizable per account.
//!
//! No floor is enforced on the balance here: a transfer discipline that
//! debits on stale information can and will drive it negative.

use crate::base::AccountId;
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::time::Duration;

/// The mutable part of an account as seen at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceRow {
    pub balance: Decimal,
    pub version: u64,
}

#[derive(Debug)]
struct AccountData {
    balance: Decimal,
    /// Bumped on every successful balance mutation, starting at 1.
    version: u64,
}

impl AccountData {
    fn new(balance: Decimal) -> Self {
        Self {
            balance,
            version: 1,
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(self.version >= 1, "Invariant violated: version reset to zero");
    }

    fn row(&self) -> BalanceRow {
        BalanceRow {
            balance: self.balance,
            version: self.version,
        }
    }

    /// Leaves the row untouched when the new balance does not fit a `Decimal`.
    fn apply(&mut self, delta: Decimal) -> Result<(), LedgerError> {
        self.balance = self
            .balance
            .checked_add(delta)
            .ok_or_else(|| LedgerError::invalid("balance overflow"))?;
        self.version += 1;
        self.assert_invariants();
        Ok(())
    }
}

/// Ledger account owned by the store.
#[derive(Debug)]
pub(crate) struct Account {
    id: AccountId,
    name: String,
    created_at: DateTime<Utc>,
    inner: Mutex<AccountData>,
}

impl Account {
    pub(crate) fn new(id: AccountId, name: impl Into<String>, balance: Decimal) -> Self {
        Self {
            id,
            name: name.into(),
            created_at: Utc::now(),
            inner: Mutex::new(AccountData::new(balance)),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    fn lock_for(&self, timeout: Duration) -> Result<MutexGuard<'_, AccountData>, LedgerError> {
        self.inner
            .try_lock_for(timeout)
            .ok_or(LedgerError::StoreUnavailable)
    }

    pub(crate) fn snapshot(&self, timeout: Duration) -> Result<AccountSnapshot, LedgerError> {
        let row = self.lock_for(timeout)?.row();
        Ok(AccountSnapshot {
            id: self.id,
            name: self.name.clone(),
            balance: row.balance,
            version: row.version,
            created_at: self.created_at,
        })
    }

    pub(crate) fn balance(&self, timeout: Duration) -> Result<Decimal, LedgerError> {
        Ok(self.lock_for(timeout)?.balance)
    }

    /// `balance += delta`, whatever the current balance.
    pub(crate) fn adjust(&self, delta: Decimal, timeout: Duration) -> Result<BalanceRow, LedgerError> {
        let mut data = self.lock_for(timeout)?;
        data.apply(delta)?;
        Ok(data.row())
    }

    /// `balance += delta` iff `predicate` holds for the row under the same lock.
    pub(crate) fn adjust_if<F>(
        &self,
        delta: Decimal,
        timeout: Duration,
        predicate: F,
    ) -> Result<bool, LedgerError>
    where
        F: FnOnce(BalanceRow) -> bool,
    {
        let mut data = self.lock_for(timeout)?;
        if !predicate(data.row()) {
            return Ok(false);
        }
        data.apply(delta)?;
        Ok(true)
    }

    /// `balance += delta` iff the version is still `expected_version` and the
    /// current balance is at least `min_balance`.
    pub(crate) fn compare_and_swap(
        &self,
        delta: Decimal,
        expected_version: u64,
        min_balance: Decimal,
        timeout: Duration,
    ) -> Result<bool, LedgerError> {
        self.adjust_if(delta, timeout, |row| {
            row.version == expected_version && row.balance >= min_balance
        })
    }
}

/// Point-in-time copy of an account, detached from the store.
///
/// Nothing guarantees it is still current once returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub id: AccountId,
    pub name: String,
    pub balance: Decimal,
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

impl AccountSnapshot {
    const DECIMAL_PRECISION: u32 = 2;
}

impl Serialize for AccountSnapshot {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Account", 5)?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field(
            "balance",
            &self.balance.round_dp(AccountSnapshot::DECIMAL_PRECISION),
        )?;
        state.serialize_field("version", &self.version)?;
        state.serialize_field("created_at", &self.created_at)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn alice() -> Account {
        Account::new(AccountId(1), "Alice", dec!(1000))
    }

    #[test]
    fn new_account_starts_at_version_one() {
        let snapshot = alice().snapshot(TIMEOUT).unwrap();
        assert_eq!(snapshot.balance, dec!(1000));
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.name, "Alice");
    }

    #[test]
    fn adjust_bumps_version_and_allows_negative() {
        let account = alice();
        let row = account.adjust(dec!(-1500), TIMEOUT).unwrap();
        assert_eq!(row.balance, dec!(-500));
        assert_eq!(row.version, 2);
    }

    #[test]
    fn adjust_if_leaves_row_untouched_when_predicate_fails() {
        let account = alice();
        let applied = account
            .adjust_if(dec!(-2000), TIMEOUT, |row| row.balance >= dec!(2000))
            .unwrap();
        assert!(!applied);
        let snapshot = account.snapshot(TIMEOUT).unwrap();
        assert_eq!(snapshot.balance, dec!(1000));
        assert_eq!(snapshot.version, 1);
    }

    #[test]
    fn compare_and_swap_rejects_stale_version() {
        let account = alice();
        account.adjust(dec!(10), TIMEOUT).unwrap();

        let swapped = account
            .compare_and_swap(dec!(-100), 1, dec!(100), TIMEOUT)
            .unwrap();
        assert!(!swapped);

        let swapped = account
            .compare_and_swap(dec!(-100), 2, dec!(100), TIMEOUT)
            .unwrap();
        assert!(swapped);
        assert_eq!(account.balance(TIMEOUT).unwrap(), dec!(910));
    }

    #[test]
    fn compare_and_swap_respects_min_balance() {
        let account = Account::new(AccountId(2), "Bob", dec!(50));
        let swapped = account
            .compare_and_swap(dec!(-100), 1, dec!(100), TIMEOUT)
            .unwrap();
        assert!(!swapped);
        assert_eq!(account.snapshot(TIMEOUT).unwrap().version, 1);
    }

    #[test]
    fn lock_timeout_maps_to_store_unavailable() {
        let account = alice();
        let _held = account.inner.lock();
        let result = account.snapshot(Duration::from_millis(10));
        assert_eq!(result, Err(LedgerError::StoreUnavailable));
    }

    #[test]
    fn overflowing_adjust_is_refused_and_row_kept() {
        let account = Account::new(AccountId(1), "Alice", Decimal::MAX);

        let result = account.adjust(dec!(1), TIMEOUT);
        assert!(matches!(result, Err(LedgerError::InvalidRequest(_))));

        let result = account.adjust_if(Decimal::MAX, TIMEOUT, |_| true);
        assert!(matches!(result, Err(LedgerError::InvalidRequest(_))));

        let snapshot = account.snapshot(TIMEOUT).unwrap();
        assert_eq!(snapshot.balance, Decimal::MAX);
        assert_eq!(snapshot.version, 1);
    }

    // === Serialization Tests ===

    #[test]
    fn serializer_rounds_balance_to_cents() {
        let account = alice();
        account.adjust(dec!(0.456), TIMEOUT).unwrap();
        let snapshot = account.snapshot(TIMEOUT).unwrap();

        let parsed: serde_json::Value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(parsed["id"], 1);
        assert_eq!(parsed["name"], "Alice");
        assert_eq!(parsed["balance"].as_str().unwrap(), "1000.46");
        assert_eq!(parsed["version"], 2);
    }

    #[test]
    fn serializer_keeps_negative_balances() {
        let account = alice();
        account.adjust(dec!(-1100), TIMEOUT).unwrap();
        let parsed = serde_json::to_value(account.snapshot(TIMEOUT).unwrap()).unwrap();
        assert_eq!(parsed["balance"].as_str().unwrap(), "-100");
    }
}
