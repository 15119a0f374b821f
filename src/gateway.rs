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

//! Request-facing contract of the ledger.
//!
//! [`Gateway`] is what an HTTP layer (or the CLI) talks to: one transfer
//! endpoint bound to one strategy, a reset to the canonical seed, and
//! read-only views. Every response type is [`Serialize`] so a transport only
//! has to encode it.

use crate::account::AccountSnapshot;
use crate::base::{AccountId, TransactionId};
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::executor::TransferExecutor;
use crate::store::{LedgerStore, SeedAccount, TransactionView, canonical_seed};
use crate::strategy::StrategyKind;
use crate::transaction::Transfer;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, info_span};

/// Outcome of one transfer request. Failures are data, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferResponse {
    pub success: bool,
    pub request_id: u64,
    pub strategy: StrategyKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountsResponse {
    pub accounts: Vec<AccountSnapshot>,
    pub total_balance: Decimal,
    pub expected_total: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResetResponse {
    pub message: String,
    pub accounts: Vec<AccountSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub total_balance: Decimal,
    pub expected_total: Decimal,
    /// `total_balance != expected_total`.
    pub anomaly: bool,
    pub anomaly_amount: Decimal,
    pub account_count: usize,
    pub transaction_count: usize,
    /// Accounts currently below zero.
    pub negative_balances: usize,
    pub strategy: StrategyKind,
}

/// Entry point for inbound requests.
pub struct Gateway {
    store: Arc<LedgerStore>,
    executor: TransferExecutor,
    seed: Vec<SeedAccount>,
    /// Requests seen since the last reset.
    requests: AtomicU64,
}

impl Gateway {
    pub const DEFAULT_TRANSACTION_LIMIT: usize = 50;

    /// Wraps an executor; `seed` is what [`Gateway::reset`] restores.
    pub fn new(executor: TransferExecutor, seed: Vec<SeedAccount>) -> Self {
        Gateway {
            store: Arc::clone(executor.store()),
            executor,
            seed,
            requests: AtomicU64::new(0),
        }
    }

    /// A fresh ledger on the canonical seed, transfers per `config`.
    pub fn from_config(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let seed = canonical_seed();
        let store = Arc::new(LedgerStore::with_seed(&seed, config.lock_timeout)?);
        Ok(Self::new(TransferExecutor::from_config(store, config), seed))
    }

    pub fn executor(&self) -> &TransferExecutor {
        &self.executor
    }

    pub fn store(&self) -> &Arc<LedgerStore> {
        &self.store
    }

    pub fn transfer(&self, from: AccountId, to: AccountId, amount: Decimal) -> TransferResponse {
        let request_id = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
        let strategy = self.executor.strategy();
        let span = info_span!("transfer", request = request_id, %strategy);
        let _entered = span.enter();

        match self.executor.transfer(&Transfer::new(from, to, amount)) {
            Ok(receipt) => TransferResponse {
                success: true,
                request_id,
                strategy,
                message: Some(format!("transferred {amount} from account {from} to account {to}")),
                error: None,
                code: None,
                attempts: Some(receipt.attempts),
                transaction_id: Some(receipt.transaction_id),
            },
            Err(err) => TransferResponse {
                success: false,
                request_id,
                strategy,
                message: None,
                error: Some(err.to_string()),
                code: Some(err.code()),
                attempts: match err {
                    LedgerError::ConflictRetryExhausted { attempts } => Some(attempts),
                    _ => None,
                },
                transaction_id: None,
            },
        }
    }

    /// Restores the seed and clears the request counter.
    pub fn reset(&self) -> Result<ResetResponse, LedgerError> {
        let accounts = self.store.reset_ledger(&self.seed)?;
        self.requests.store(0, Ordering::SeqCst);
        info!(accounts = accounts.len(), "gateway reset");
        Ok(ResetResponse {
            message: "ledger reset".to_string(),
            accounts,
        })
    }

    pub fn accounts(&self) -> Result<AccountsResponse, LedgerError> {
        Ok(AccountsResponse {
            accounts: self.store.list_accounts()?,
            total_balance: self.store.total_balance()?,
            expected_total: self.store.expected_total()?,
        })
    }

    pub fn account(&self, id: AccountId) -> Result<AccountSnapshot, LedgerError> {
        self.store.get_account(id)
    }

    /// Newest transactions first; `None` means [`Gateway::DEFAULT_TRANSACTION_LIMIT`].
    pub fn transactions(&self, limit: Option<usize>) -> Result<Vec<TransactionView>, LedgerError> {
        let limit = limit
            .filter(|limit| *limit > 0)
            .unwrap_or(Self::DEFAULT_TRANSACTION_LIMIT);
        self.store.list_transactions(limit)
    }

    pub fn stats(&self) -> Result<Stats, LedgerError> {
        let accounts = self.store.list_accounts()?;
        let total_balance = self.store.total_balance()?;
        let expected_total = self.store.expected_total()?;
        let anomaly_amount = total_balance
            .checked_sub(expected_total)
            .ok_or_else(|| LedgerError::invalid("ledger total overflow"))?;
        Ok(Stats {
            total_balance,
            expected_total,
            anomaly: total_balance != expected_total,
            anomaly_amount,
            account_count: accounts.len(),
            transaction_count: self.store.transaction_count()?,
            negative_balances: accounts
                .iter()
                .filter(|account| account.balance < Decimal::ZERO)
                .count(),
            strategy: self.executor.strategy(),
        })
    }
}
