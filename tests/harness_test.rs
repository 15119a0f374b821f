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


//! ConcurrencyHarness integration tests.
//!
//! Bursts that must expose the over-spend use a [`Lockstep`] window so every
//! request reads before any request writes, independent of scheduling.

use banksim_rs::{
    AccountId, ConcurrencyHarness, DebitStrategy, FixedDelay, Gateway, LedgerConfig, LedgerError,
    LedgerStore, Lockstep, OptimisticDebit, PessimisticDebit, RacePlan, RaceWindow, StrategyKind,
    TransferExecutor, UnsafeDebit, canonical_seed,
};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

fn executor(strategy: Box<dyn DebitStrategy>) -> TransferExecutor {
    let store = LedgerStore::with_seed(&canonical_seed(), Duration::from_secs(2)).unwrap();
    TransferExecutor::new(Arc::new(store), strategy)
}

fn lockstep(parties: usize) -> Arc<dyn RaceWindow> {
    Arc::new(Lockstep::new(parties))
}

fn burst(requests: usize) -> RacePlan {
    RacePlan::new(AccountId(1), AccountId(2), requests, dec!(100))
}

#[test]
fn unsafe_burst_overspends_when_every_read_is_stale() {
    let executor = executor(Box::new(UnsafeDebit::new(lockstep(15))));
    let report = ConcurrencyHarness::new(&executor).run(&burst(15)).unwrap();

    assert_eq!(report.strategy, StrategyKind::Unsafe);
    assert_eq!(report.expected_safe_successes, 10);
    assert_eq!(report.successes, 15);
    assert_eq!(report.failures, 0);
    assert_eq!(report.final_sender.balance, dec!(-500));
    assert_eq!(report.final_receiver.balance, dec!(2000));
    assert_eq!(report.total_transferred, dec!(1500));
    assert!(report.anomaly);
    // Each write is atomic on its own, so money moves but is not created.
    assert!(report.total_preserved());
}

#[test]
fn unsafe_burst_with_processing_delay_overspends() {
    let executor = executor(Box::new(UnsafeDebit::new(Arc::new(FixedDelay::default()))));
    let report = ConcurrencyHarness::new(&executor).run(&burst(15)).unwrap();

    assert!(report.successes >= 10);
    assert!(report.successes as u64 > report.expected_safe_successes);
    assert!(report.final_sender.balance < dec!(0));
    assert!(report.anomaly);
}

#[test]
fn pessimistic_burst_stops_exactly_at_the_balance() {
    let executor = executor(Box::new(PessimisticDebit::new(lockstep(15))));
    let report = ConcurrencyHarness::new(&executor).run(&burst(15)).unwrap();

    assert_eq!(report.successes, 10);
    assert_eq!(report.failures, 5);
    assert_eq!(report.final_sender.balance, dec!(0));
    assert_eq!(report.final_receiver.balance, dec!(1500));
    assert_eq!(report.total_after, dec!(2000));
    assert!(!report.anomaly);

    let refused: Vec<_> = report
        .outcomes
        .iter()
        .filter(|outcome| !outcome.success)
        .collect();
    assert!(refused.iter().all(|o| o.code == Some("INSUFFICIENT_FUNDS")));
}

#[test]
fn optimistic_burst_never_overspends() {
    let executor = executor(Box::new(OptimisticDebit::new(lockstep(15))));
    let report = ConcurrencyHarness::new(&executor).run(&burst(15)).unwrap();

    assert!(report.successes >= 1);
    assert!(report.successes <= 10);
    assert!(report.final_sender.balance >= dec!(0));
    assert_eq!(
        report.final_sender.balance,
        dec!(1000) - report.total_transferred
    );
    assert!(report.total_preserved());
    assert!(!report.anomaly);

    for outcome in &report.outcomes {
        if let Some(attempts) = outcome.attempts {
            assert!((1..=OptimisticDebit::MAX_ATTEMPTS).contains(&attempts));
        }
        if !outcome.success {
            assert!(matches!(
                outcome.code,
                Some("CONFLICT_RETRY_EXHAUSTED") | Some("INSUFFICIENT_FUNDS")
            ));
        }
    }
}

#[test]
fn outcomes_are_reported_in_request_order() {
    let executor = executor(Box::new(PessimisticDebit::default()));
    let report = ConcurrencyHarness::new(&executor).run(&burst(12)).unwrap();

    let ids: Vec<_> = report.outcomes.iter().map(|o| o.request_id).collect();
    assert_eq!(ids, (1..=12).collect::<Vec<_>>());
    assert_eq!(report.successes + report.failures, 12);
}

#[test]
fn draining_the_sender_exactly_is_flagged() {
    // All requests succeeding while moving the whole balance trips the
    // verdict even though nothing was overspent.
    let executor = executor(Box::new(PessimisticDebit::default()));
    let report = ConcurrencyHarness::new(&executor).run(&burst(10)).unwrap();

    assert_eq!(report.successes, 10);
    assert_eq!(report.final_sender.balance, dec!(0));
    assert!(report.anomaly);
}

#[test]
fn single_request_is_never_an_anomaly() {
    let executor = executor(Box::new(PessimisticDebit::default()));
    let plan = RacePlan::new(AccountId(2), AccountId(3), 1, dec!(500));
    let report = ConcurrencyHarness::new(&executor).run(&plan).unwrap();

    assert_eq!(report.successes, 1);
    assert!(!report.anomaly);
}

#[test]
fn burst_can_be_repeated_after_reset() {
    let config = LedgerConfig::default().with_strategy(StrategyKind::Pessimistic);
    let gateway = Gateway::from_config(&config).unwrap();
    let harness = ConcurrencyHarness::new(gateway.executor());

    let first = harness.run(&burst(15)).unwrap();
    gateway.reset().unwrap();
    let second = harness.run(&burst(15)).unwrap();

    assert_eq!(first.successes, second.successes);
    assert_eq!(second.initial_sender.balance, dec!(1000));
    assert_eq!(second.final_sender.balance, dec!(0));
    assert_eq!(gateway.stats().unwrap().transaction_count, 15);
}

#[test]
fn invalid_plans_are_rejected_up_front() {
    let executor = executor(Box::new(PessimisticDebit::default()));
    let harness = ConcurrencyHarness::new(&executor);

    let zero = RacePlan::new(AccountId(1), AccountId(2), 0, dec!(100));
    assert!(matches!(harness.run(&zero), Err(LedgerError::InvalidRequest(_))));

    let same = RacePlan::new(AccountId(1), AccountId(1), 5, dec!(100));
    assert!(matches!(harness.run(&same), Err(LedgerError::InvalidRequest(_))));

    let unknown = RacePlan::new(AccountId(1), AccountId(7), 5, dec!(100));
    assert_eq!(
        harness.run(&unknown).unwrap_err(),
        LedgerError::AccountNotFound(AccountId(7))
    );
    assert_eq!(executor.store().transaction_count().unwrap(), 0);
}

#[test]
fn default_plan_is_ten_transfers_of_one_hundred() {
    let plan = RacePlan::default();
    assert_eq!(plan.from, AccountId(1));
    assert_eq!(plan.to, AccountId(2));
    assert_eq!(plan.requests, 10);
    assert_eq!(plan.amount, dec!(100));
}

// A stack larger than the address space makes every spawn fail.
#[cfg(target_pointer_width = "64")]
#[test]
fn workers_that_cannot_start_are_reported_instead_of_hanging() {
    let executor = executor(Box::new(PessimisticDebit::default()));
    let report = ConcurrencyHarness::new(&executor)
        .with_start_timeout(Duration::from_millis(200))
        .with_worker_stack_size(usize::MAX / 4)
        .run(&burst(5))
        .unwrap();

    assert_eq!(report.outcomes.len(), 5);
    assert_eq!(report.successes, 0);
    assert_eq!(report.failures, 5);
    assert!(
        report
            .outcomes
            .iter()
            .all(|outcome| outcome.code == Some("WORKER_NOT_STARTED"))
    );
    assert_eq!(report.final_sender.balance, dec!(1000));
    assert!(!report.anomaly);
}
