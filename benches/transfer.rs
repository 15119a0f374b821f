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


//! Benchmarks for the transfer disciplines.
//!
//! Run with: cargo bench
//!
//! Benchmarks include:
//! - Single-threaded transfers per strategy
//! - Parallel transfers out of one hot account per strategy
//! - Thread scaling under contention
//! - Full harness bursts
//! - Read paths (stats, transaction history)
//!
//! Every strategy runs without artificial delay, so the numbers compare the
//! cost of the concurrency control itself.

use banksim_rs::{
    AccountId, ConcurrencyHarness, DebitStrategy, Gateway, LedgerStore, NoDelay, OptimisticDebit,
    PessimisticDebit, RacePlan, SeedAccount, StrategyKind, Transfer, TransferExecutor, UnsafeDebit,
    canonical_seed,
};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rayon::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;

// =============================================================================
// Helper Functions
// =============================================================================

/// Accounts rich enough that no benchmark ever runs out of funds.
fn rich_store(accounts: u32) -> Arc<LedgerStore> {
    let seed: Vec<_> = (1..=accounts)
        .map(|i| SeedAccount::new(format!("account-{i}"), Decimal::from(1_000_000_000i64)))
        .collect();
    Arc::new(LedgerStore::with_seed(&seed, LedgerStore::DEFAULT_LOCK_TIMEOUT).unwrap())
}

fn strategy(kind: StrategyKind) -> Box<dyn DebitStrategy> {
    match kind {
        StrategyKind::Unsafe => Box::new(UnsafeDebit::new(Arc::new(NoDelay))),
        StrategyKind::Pessimistic => Box::new(PessimisticDebit::default()),
        StrategyKind::Optimistic => Box::new(OptimisticDebit::default()),
    }
}

fn executor(kind: StrategyKind, accounts: u32) -> TransferExecutor {
    TransferExecutor::new(rich_store(accounts), strategy(kind))
}

fn transfer(from: u32, to: u32) -> Transfer {
    Transfer::new(AccountId(from), AccountId(to), Decimal::new(100, 2))
}

// =============================================================================
// Single-Threaded Benchmarks
// =============================================================================

fn bench_single_transfer(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_transfer");

    for kind in StrategyKind::ALL {
        group.bench_function(kind.as_str(), |b| {
            let executor = executor(kind, 2);
            b.iter(|| executor.transfer(black_box(&transfer(1, 2))).unwrap())
        });
    }
    group.finish();
}

// =============================================================================
// Multi-Threaded Benchmarks
// =============================================================================

fn bench_parallel_hot_sender(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_hot_sender");
    let total_transfers = 10_000u32;

    for kind in StrategyKind::ALL {
        group.throughput(Throughput::Elements(total_transfers as u64));
        group.bench_function(kind.as_str(), |b| {
            b.iter(|| {
                let executor = executor(kind, 4);
                (0..total_transfers).into_par_iter().for_each(|i| {
                    // Retry exhaustion is an expected outcome under contention.
                    let _ = executor.transfer(&transfer(1, i % 3 + 2));
                });
                black_box(&executor);
            })
        });
    }
    group.finish();
}

fn bench_thread_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("thread_scaling");
    let total_transfers = 10_000u32;

    for num_threads in [1, 2, 4, 8].iter() {
        group.throughput(Throughput::Elements(total_transfers as u64));
        group.bench_with_input(
            BenchmarkId::new("optimistic", num_threads),
            num_threads,
            |b, &num_threads| {
                // Configure rayon thread pool for this benchmark
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(num_threads)
                    .build()
                    .unwrap();

                b.iter(|| {
                    let executor = executor(StrategyKind::Optimistic, 100);

                    pool.install(|| {
                        (0..total_transfers).into_par_iter().for_each(|i| {
                            // Distribute across 100 senders
                            let from = i % 100 + 1;
                            let to = from % 100 + 1;
                            let _ = executor.transfer(&transfer(from, to));
                        });
                    });

                    black_box(&executor);
                })
            },
        );
    }
    group.finish();
}

fn bench_harness_burst(c: &mut Criterion) {
    let mut group = c.benchmark_group("harness_burst");
    let plan = RacePlan::new(AccountId(1), AccountId(2), 15, Decimal::from(100));

    for kind in StrategyKind::ALL {
        group.bench_with_input(BenchmarkId::from_parameter(kind), &kind, |b, &kind| {
            let executor = TransferExecutor::new(
                Arc::new(LedgerStore::with_seed(&canonical_seed(), LedgerStore::DEFAULT_LOCK_TIMEOUT).unwrap()),
                strategy(kind),
            );
            b.iter(|| {
                executor.store().reset_ledger(&canonical_seed()).unwrap();
                black_box(ConcurrencyHarness::new(&executor).run(&plan).unwrap())
            })
        });
    }
    group.finish();
}

// =============================================================================
// Read Path Benchmarks
// =============================================================================

fn bench_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("reads");

    for history in [100usize, 10_000].iter() {
        let gateway = Gateway::new(executor(StrategyKind::Pessimistic, 3), canonical_seed());
        for i in 0..*history as u32 {
            gateway.transfer(AccountId(i % 3 + 1), AccountId((i + 1) % 3 + 1), Decimal::ONE);
        }

        group.bench_with_input(BenchmarkId::new("stats", history), &gateway, |b, gateway| {
            b.iter(|| black_box(gateway.stats().unwrap()))
        });
        group.bench_with_input(
            BenchmarkId::new("transactions_50", history),
            &gateway,
            |b, gateway| b.iter(|| black_box(gateway.transactions(None).unwrap())),
        );
    }
    group.finish();
}

// =============================================================================
// Criterion Groups
// =============================================================================

criterion_group!(single_threaded, bench_single_transfer,);

criterion_group!(multi_threaded, bench_parallel_hot_sender, bench_thread_scaling,);

criterion_group!(bursts, bench_harness_burst,);

criterion_group!(reads, bench_reads,);

criterion_main!(single_threaded, multi_threaded, bursts, reads);
