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

//! Transfer execution.
//!
//! The [`TransferExecutor`] moves money between two accounts of a
//! [`LedgerStore`]. Validation, crediting and recording are the same for every
//! discipline; only the debit is delegated to the configured
//! [`DebitStrategy`].
//!
//! # Transfer Steps
//!
//! 1. Shape validation (`amount > 0`, `from != to`), no store access.
//! 2. Both accounts must exist.
//! 3. Debit the sender through the strategy.
//! 4. Credit the receiver unconditionally.
//! 5. Record a `completed` transaction.
//!
//! A rejected debit (insufficient funds, retry exhaustion) is recorded as a
//! `failed` transaction. Steps 3 to 5 are not one atomic unit: if the store
//! fails after the debit, the sender has paid and the receiver has not. That
//! window is logged at `error` level and reported as the store error.

use crate::base::TransactionId;
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::store::LedgerStore;
use crate::strategy::{DebitStrategy, StrategyKind};
use crate::transaction::{TransactionStatus, Transfer};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Proof of a completed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransferReceipt {
    pub transaction_id: TransactionId,
    pub attempts: u32,
    pub strategy: StrategyKind,
}

/// Executes transfers against a shared store with one debit discipline.
///
/// Holds no ledger state of its own; every call reads and writes through the
/// store, so one executor can serve any number of threads.
pub struct TransferExecutor {
    store: Arc<LedgerStore>,
    strategy: Box<dyn DebitStrategy>,
}

impl TransferExecutor {
    pub fn new(store: Arc<LedgerStore>, strategy: Box<dyn DebitStrategy>) -> Self {
        TransferExecutor { store, strategy }
    }

    /// Executor using the strategy and delays named by `config`.
    pub fn from_config(store: Arc<LedgerStore>, config: &LedgerConfig) -> Self {
        Self::new(store, config.debit_strategy())
    }

    pub fn store(&self) -> &Arc<LedgerStore> {
        &self.store
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy.kind()
    }

    /// Moves `transfer.amount` from `transfer.from` to `transfer.to`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidRequest`] - Non-positive amount or self-transfer.
    /// - [`LedgerError::AccountNotFound`] - Either account does not exist.
    /// - [`LedgerError::InsufficientFunds`] - The debit was refused.
    /// - [`LedgerError::ConflictRetryExhausted`] - Optimistic debit lost every race.
    /// - [`LedgerError::StoreUnavailable`] - The store could not be reached.
    pub fn transfer(&self, transfer: &Transfer) -> Result<TransferReceipt, LedgerError> {
        transfer.validate()?;
        self.store.ensure_account(transfer.from)?;
        self.store.ensure_account(transfer.to)?;

        let debit = match self.strategy.debit(&self.store, transfer) {
            Ok(debit) => debit,
            Err(err) => {
                if err.is_rejection() {
                    self.record_rejection(transfer, &err);
                }
                return Err(err);
            }
        };

        if let Err(err) = self
            .store
            .adjust_balance_unconditional(transfer.to, transfer.amount)
        {
            error!(
                from = %transfer.from,
                to = %transfer.to,
                amount = %transfer.amount,
                error = %err,
                "sender debited but receiver not credited"
            );
            return Err(err);
        }

        let transaction = self
            .store
            .record_transaction(
                transfer.from,
                transfer.to,
                transfer.amount,
                TransactionStatus::Completed,
            )
            .inspect_err(|err| {
                error!(
                    from = %transfer.from,
                    to = %transfer.to,
                    amount = %transfer.amount,
                    error = %err,
                    "transfer applied but not recorded"
                );
            })?;

        info!(
            from = %transfer.from,
            to = %transfer.to,
            amount = %transfer.amount,
            attempts = debit.attempts,
            transaction = %transaction.id,
            "transfer completed"
        );

        Ok(TransferReceipt {
            transaction_id: transaction.id,
            attempts: debit.attempts,
            strategy: self.strategy.kind(),
        })
    }

    fn record_rejection(&self, transfer: &Transfer, reason: &LedgerError) {
        warn!(
            from = %transfer.from,
            to = %transfer.to,
            amount = %transfer.amount,
            reason = %reason,
            "transfer rejected"
        );
        // The rejection is the outcome the caller needs; a failure to log it is
        // reported here only.
        if let Err(err) = self.store.record_transaction(
            transfer.from,
            transfer.to,
            transfer.amount,
            TransactionStatus::Failed,
        ) {
            warn!(error = %err, "could not record rejected transfer");
        }
    }
}
