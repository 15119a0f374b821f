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


//! # BankSim
//!
//! A shared ledger of accounts that races concurrent transfers under three
//! concurrency-control disciplines and shows which of them keep the books
//! straight.
//!
//! ## Core Components
//!
//! - [`LedgerStore`]: Accounts and the transaction log, with atomic primitives
//! - [`TransferExecutor`]: Validates, debits through a [`DebitStrategy`], credits and records
//! - [`UnsafeDebit`], [`PessimisticDebit`], [`OptimisticDebit`]: The three disciplines
//! - [`ConcurrencyHarness`]: Fires a burst of simultaneous transfers and judges the result
//! - [`Gateway`]: The request contract an HTTP layer or CLI sits on
//! - [`LedgerError`]: Error types for every layer
//!
//! ## Example
//!
//! ```
//! use banksim_rs::{
//!     AccountId, ConcurrencyHarness, LedgerStore, PessimisticDebit, RacePlan, TransferExecutor,
//!     canonical_seed,
//! };
//! use rust_decimal_macros::dec;
//! use std::sync::Arc;
//!
//! let store = Arc::new(LedgerStore::with_seed(&canonical_seed(), LedgerStore::DEFAULT_LOCK_TIMEOUT).unwrap());
//! let executor = TransferExecutor::new(store, Box::new(PessimisticDebit::default()));
//!
//! // Fifteen simultaneous transfers of 100 out of Alice's 1000
//! let plan = RacePlan::new(AccountId(1), AccountId(2), 15, dec!(100));
//! let report = ConcurrencyHarness::new(&executor).run(&plan).unwrap();
//!
//! assert_eq!(report.successes, 10);
//! assert_eq!(report.final_sender.balance, dec!(0));
//! assert!(report.total_preserved());
//! ```
//!
//! ## Thread Safety
//!
//! The store keeps one lock per account row and never holds two at once.
//! Executors and the harness never lock anything themselves; whatever
//! atomicity a discipline has comes from the store primitive it uses.

pub mod account;
mod base;
mod config;
pub mod error;
mod executor;
mod gateway;
mod harness;
mod store;
mod strategy;
mod transaction;
mod transaction_log;
pub mod window;

pub use account::{AccountSnapshot, BalanceRow};
pub use base::{AccountId, TransactionId};
pub use config::LedgerConfig;
pub use error::LedgerError;
pub use executor::{TransferExecutor, TransferReceipt};
pub use gateway::{AccountsResponse, Gateway, ResetResponse, Stats, TransferResponse};
pub use harness::{
    ConcurrencyHarness, RacePlan, RaceReport, RequestOutcome, expected_safe_successes,
};
pub use store::{LedgerStore, SeedAccount, TransactionView, canonical_seed};
pub use strategy::{
    Debit, DebitStrategy, OptimisticDebit, PessimisticDebit, StrategyKind, UnsafeDebit,
};
pub use transaction::{Transaction, TransactionStatus, Transfer};
pub use transaction_log::TransactionLog;
pub use window::{FixedDelay, Lockstep, NoDelay, RaceWindow};
