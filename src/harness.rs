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

//! Concurrent transfer bursts.
//!
//! The [`ConcurrencyHarness`] fires `requests` identical transfers at once
//! through one executor and compares the outcome with what a correct ledger
//! could have allowed: `floor(initial sender balance / amount)` successes.

use crate::account::AccountSnapshot;
use crate::base::AccountId;
use crate::error::LedgerError;
use crate::executor::{TransferExecutor, TransferReceipt};
use crate::strategy::StrategyKind;
use crate::transaction::Transfer;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::io;
use std::time::{Duration, Instant};
use tracing::{info, info_span, warn};

/// What to fire: `requests` transfers of `amount` from `from` to `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RacePlan {
    pub from: AccountId,
    pub to: AccountId,
    pub requests: usize,
    pub amount: Decimal,
}

impl RacePlan {
    pub fn new(from: AccountId, to: AccountId, requests: usize, amount: Decimal) -> Self {
        Self {
            from,
            to,
            requests,
            amount,
        }
    }

    fn validate(&self) -> Result<(), LedgerError> {
        if self.requests == 0 {
            return Err(LedgerError::invalid("at least one request is required"));
        }
        Transfer::new(self.from, self.to, self.amount).validate()
    }
}

impl Default for RacePlan {
    /// Alice to Bob, ten requests of 100.
    fn default() -> Self {
        Self::new(AccountId(1), AccountId(2), 10, dec!(100))
    }
}

/// Result of one request of the burst.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestOutcome {
    /// 1-based position in the burst.
    pub request_id: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub latency_ms: f64,
}

impl RequestOutcome {
    fn from_result(
        request_id: usize,
        result: Result<TransferReceipt, LedgerError>,
        latency: Duration,
    ) -> Self {
        let latency_ms = latency.as_secs_f64() * 1000.0;
        match result {
            Ok(receipt) => Self {
                request_id,
                success: true,
                attempts: Some(receipt.attempts),
                code: None,
                error: None,
                latency_ms,
            },
            Err(err) => Self {
                request_id,
                success: false,
                attempts: match err {
                    LedgerError::ConflictRetryExhausted { attempts } => Some(attempts),
                    _ => None,
                },
                code: Some(err.code()),
                error: Some(err.to_string()),
                latency_ms,
            },
        }
    }

    fn panicked(request_id: usize) -> Self {
        Self {
            request_id,
            success: false,
            attempts: None,
            code: Some("WORKER_PANICKED"),
            error: Some("request worker panicked".to_string()),
            latency_ms: 0.0,
        }
    }

    fn not_started(request_id: usize, err: &io::Error) -> Self {
        Self {
            request_id,
            success: false,
            attempts: None,
            code: Some("WORKER_NOT_STARTED"),
            error: Some(format!("request worker could not be started: {err}")),
            latency_ms: 0.0,
        }
    }
}

/// One-shot release for the workers of a burst.
///
/// Workers block in [`StartGate::wait`] until the spawning thread opens the
/// gate, or until the deadline passes if it never does.
struct StartGate {
    deadline: Instant,
    open: Mutex<bool>,
    opened: Condvar,
}

impl StartGate {
    fn new(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            open: Mutex::new(false),
            opened: Condvar::new(),
        }
    }

    fn open(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }

    /// `false` when released by the deadline rather than by [`StartGate::open`].
    fn wait(&self) -> bool {
        let mut open = self.open.lock();
        while !*open {
            if self.opened.wait_until(&mut open, self.deadline).timed_out() {
                return *open;
            }
        }
        true
    }
}

/// Everything observed during one burst.
#[derive(Debug, Clone, Serialize)]
pub struct RaceReport {
    pub strategy: StrategyKind,
    pub plan: RacePlan,
    pub outcomes: Vec<RequestOutcome>,
    pub elapsed_ms: f64,
    pub successes: usize,
    pub failures: usize,
    /// Most successes a correct ledger could have allowed.
    pub expected_safe_successes: u64,
    pub total_transferred: Decimal,
    pub initial_sender: AccountSnapshot,
    pub initial_receiver: AccountSnapshot,
    pub final_sender: AccountSnapshot,
    pub final_receiver: AccountSnapshot,
    pub total_before: Decimal,
    pub total_after: Decimal,
    pub anomaly: bool,
}

impl RaceReport {
    pub fn total_preserved(&self) -> bool {
        self.total_before == self.total_after
    }
}

/// `floor(balance / amount)`, or 0 for an empty or overdrawn balance.
pub fn expected_safe_successes(balance: Decimal, amount: Decimal) -> u64 {
    if balance <= Decimal::ZERO || amount <= Decimal::ZERO {
        return 0;
    }
    balance
        .checked_div(amount)
        .and_then(|ratio| ratio.floor().to_u64())
        .unwrap_or(u64::MAX)
}

/// Drives concurrent bursts through one executor.
pub struct ConcurrencyHarness<'a> {
    executor: &'a TransferExecutor,
    start_timeout: Duration,
    worker_stack_size: Option<usize>,
}

impl<'a> ConcurrencyHarness<'a> {
    /// Longest a started worker waits for the rest of the burst to be spawned.
    pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(executor: &'a TransferExecutor) -> Self {
        Self {
            executor,
            start_timeout: Self::DEFAULT_START_TIMEOUT,
            worker_stack_size: None,
        }
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Stack size for each request worker, in bytes. The platform default
    /// is used when unset.
    pub fn with_worker_stack_size(mut self, bytes: usize) -> Self {
        self.worker_stack_size = Some(bytes);
        self
    }

    /// Fires `plan.requests` transfers on separate threads, released together,
    /// and reports on the ledger before and after.
    ///
    /// Each request fails or succeeds on its own; a failed or panicking request
    /// never stops the others from being collected. A worker the OS refuses to
    /// start is reported as a failed request, and the workers that did start
    /// are released without it.
    ///
    /// # Errors
    ///
    /// Fails only when the plan is invalid or the before/after snapshots
    /// cannot be taken.
    pub fn run(&self, plan: &RacePlan) -> Result<RaceReport, LedgerError> {
        plan.validate()?;
        let store = self.executor.store();
        let strategy = self.executor.strategy();

        let initial_sender = store.get_account(plan.from)?;
        let initial_receiver = store.get_account(plan.to)?;
        let total_before = store.total_balance()?;
        let expected_safe_successes = expected_safe_successes(initial_sender.balance, plan.amount);

        info!(
            %strategy,
            requests = plan.requests,
            amount = %plan.amount,
            sender_balance = %initial_sender.balance,
            expected_safe_successes,
            "launching concurrent transfers"
        );

        let transfer = Transfer::new(plan.from, plan.to, plan.amount);
        let start_gate = StartGate::new(self.start_timeout);
        let executor = self.executor;
        let started = Instant::now();

        let outcomes = crossbeam::thread::scope(|scope| {
            let spawned: Vec<_> = (1..=plan.requests)
                .map(|request_id| {
                    let start_gate = &start_gate;
                    let transfer = &transfer;
                    let mut builder = scope.builder().name(format!("transfer-{request_id}"));
                    if let Some(bytes) = self.worker_stack_size {
                        builder = builder.stack_size(bytes);
                    }
                    let handle = builder.spawn(move |_| {
                        let span = info_span!("request", id = request_id, %strategy);
                        let _entered = span.enter();
                        if !start_gate.wait() {
                            warn!("start gate never opened, running anyway");
                        }
                        let started = Instant::now();
                        let result = executor.transfer(transfer);
                        RequestOutcome::from_result(request_id, result, started.elapsed())
                    });
                    (request_id, handle)
                })
                .collect();
            start_gate.open();

            spawned
                .into_iter()
                .map(|(request_id, handle)| match handle {
                    Ok(handle) => handle
                        .join()
                        .unwrap_or_else(|_| RequestOutcome::panicked(request_id)),
                    Err(err) => {
                        warn!(request = request_id, error = %err, "request worker not started");
                        RequestOutcome::not_started(request_id, &err)
                    }
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_else(|_| (1..=plan.requests).map(RequestOutcome::panicked).collect());

        let elapsed = started.elapsed();

        let final_sender = store.get_account(plan.from)?;
        let final_receiver = store.get_account(plan.to)?;
        let total_after = store.total_balance()?;

        let successes = outcomes.iter().filter(|outcome| outcome.success).count();
        let failures = outcomes.len() - successes;
        let total_transferred = Decimal::from(successes) * plan.amount;

        let anomaly = successes as u64 > expected_safe_successes
            || final_sender.balance < Decimal::ZERO
            || (successes == plan.requests
                && total_transferred >= initial_sender.balance
                && plan.requests > 1);

        if anomaly {
            warn!(
                %strategy,
                successes,
                expected_safe_successes,
                final_sender_balance = %final_sender.balance,
                "more transfers went through than the sender could cover"
            );
        } else {
            info!(%strategy, successes, failures, "burst finished within bounds");
        }

        Ok(RaceReport {
            strategy,
            plan: *plan,
            outcomes,
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
            successes,
            failures,
            expected_safe_successes,
            total_transferred,
            initial_sender,
            initial_receiver,
            final_sender,
            final_receiver,
            total_before,
            total_after,
            anomaly,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_bound_is_floor_of_balance_over_amount() {
        assert_eq!(expected_safe_successes(dec!(1000), dec!(100)), 10);
        assert_eq!(expected_safe_successes(dec!(1000), dec!(300)), 3);
        assert_eq!(expected_safe_successes(dec!(99.99), dec!(100)), 0);
        assert_eq!(expected_safe_successes(dec!(-500), dec!(100)), 0);
    }

    #[test]
    fn failed_outcome_carries_code_and_attempts() {
        let outcome = RequestOutcome::from_result(
            4,
            Err(LedgerError::ConflictRetryExhausted { attempts: 3 }),
            Duration::from_millis(2),
        );
        assert!(!outcome.success);
        assert_eq!(outcome.attempts, Some(3));
        assert_eq!(outcome.code, Some("CONFLICT_RETRY_EXHAUSTED"));
        assert!(outcome.latency_ms >= 2.0);
    }

    #[test]
    fn start_gate_releases_waiters_when_opened() {
        let gate = StartGate::new(Duration::from_secs(5));
        let started = Instant::now();
        let released = std::thread::scope(|scope| {
            let waiters: Vec<_> = (0..4).map(|_| scope.spawn(|| gate.wait())).collect();
            std::thread::sleep(Duration::from_millis(20));
            gate.open();
            waiters
                .into_iter()
                .map(|waiter| waiter.join().unwrap())
                .collect::<Vec<_>>()
        });
        assert_eq!(released, vec![true; 4]);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn start_gate_gives_up_at_deadline() {
        let gate = StartGate::new(Duration::from_millis(30));
        let started = Instant::now();
        assert!(!gate.wait());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn unstarted_worker_is_a_failed_outcome() {
        let err = io::Error::from(io::ErrorKind::OutOfMemory);
        let outcome = RequestOutcome::not_started(7, &err);
        assert_eq!(outcome.request_id, 7);
        assert!(!outcome.success);
        assert_eq!(outcome.code, Some("WORKER_NOT_STARTED"));
    }

    #[test]
    fn plan_rejects_zero_requests() {
        let plan = RacePlan {
            requests: 0,
            ..RacePlan::default()
        };
        assert!(matches!(plan.validate(), Err(LedgerError::InvalidRequest(_))));
    }
}
