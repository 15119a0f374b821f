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

//! Error types for ledger storage and transfer execution.

use crate::base::AccountId;
use thiserror::Error;

/// Ledger and transfer errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Malformed request: non-positive amount, self-transfer, bad seed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Referenced account does not exist
    #[error("account {0} not found")]
    AccountNotFound(AccountId),

    /// Sender balance does not cover the amount
    #[error("insufficient funds")]
    InsufficientFunds,

    /// Optimistic debit kept losing the version race
    #[error("too many conflicts after {attempts} attempts, please retry")]
    ConflictRetryExhausted { attempts: u32 },

    /// Storage could not be reached within the lock timeout
    #[error("ledger store unavailable")]
    StoreUnavailable,
}

impl LedgerError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        LedgerError::InvalidRequest(reason.into())
    }

    /// Stable machine-readable code for gateway responses.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidRequest(_) => "INVALID_REQUEST",
            LedgerError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            LedgerError::InsufficientFunds => "INSUFFICIENT_FUNDS",
            LedgerError::ConflictRetryExhausted { .. } => "CONFLICT_RETRY_EXHAUSTED",
            LedgerError::StoreUnavailable => "STORE_UNAVAILABLE",
        }
    }

    /// Returns `true` for normal negative outcomes of a well-formed transfer,
    /// as opposed to bad input or a system failure.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            LedgerError::InsufficientFunds | LedgerError::ConflictRetryExhausted { .. }
        )
    }
}
