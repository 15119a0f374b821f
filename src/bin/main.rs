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


use banksim_rs::{
    AccountId, ConcurrencyHarness, Gateway, LedgerConfig, LedgerError, LedgerStore, RacePlan,
    RaceReport, StrategyKind, TransferExecutor, canonical_seed,
};
use clap::{Parser, Subcommand, ValueEnum};
use csv::Writer;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::{self, Write};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// BankSim - Race concurrent transfers against a shared ledger
///
/// Seeds Alice (1000), Bob (500) and Charlie (500), fires a burst of
/// simultaneous transfers and reports whether more went through than the
/// sender could cover.
#[derive(Parser, Debug)]
#[command(name = "banksim")]
#[command(about = "Race concurrent transfers against a shared ledger", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fire one burst under one strategy
    Race {
        /// unsafe, pessimistic or optimistic
        #[arg(long, default_value = "unsafe")]
        strategy: StrategyKind,

        #[command(flatten)]
        burst: BurstArgs,

        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Fire the same burst under every strategy, resetting the ledger in between
    Compare {
        #[command(flatten)]
        burst: BurstArgs,
    },
}

#[derive(clap::Args, Debug)]
struct BurstArgs {
    /// Number of simultaneous transfer requests
    #[arg(long, default_value_t = 15)]
    requests: usize,

    /// Amount of each transfer
    #[arg(long, default_value = "100")]
    amount: Decimal,

    /// Sender account id
    #[arg(long, default_value_t = 1)]
    from: u32,

    /// Receiver account id
    #[arg(long, default_value_t = 2)]
    to: u32,

    /// Unsafe strategy: pause between balance check and debit
    #[arg(long, default_value_t = 200)]
    check_delay_ms: u64,

    /// Unsafe strategy: pause between debit and credit
    #[arg(long, default_value_t = 50)]
    settle_delay_ms: u64,

    /// Give up on a store lock after this long
    #[arg(long, default_value_t = 2000)]
    lock_timeout_ms: u64,
}

impl BurstArgs {
    fn config(&self, strategy: StrategyKind) -> LedgerConfig {
        LedgerConfig {
            strategy,
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
            check_delay: Duration::from_millis(self.check_delay_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
        }
    }

    fn plan(&self) -> RacePlan {
        RacePlan::new(
            AccountId(self.from),
            AccountId(self.to),
            self.requests,
            self.amount,
        )
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    Text,
    Json,
    Csv,
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("writing csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("writing json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("writing output: {0}")]
    Io(#[from] io::Error),
}

fn main() {
    init_tracing();
    let args = Args::parse();

    let result = match args.command {
        Command::Race {
            strategy,
            burst,
            format,
        } => run_race(strategy, &burst, format, io::stdout().lock()),
        Command::Compare { burst } => run_compare(&burst, io::stdout().lock()),
    };

    if let Err(e) = result {
        error!(error = %e, "banksim failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Logs go to stderr so stdout carries only the report.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "banksim_rs=info,banksim=info".into()),
        )
        .with_writer(io::stderr)
        .init();
}

fn run_race<W: Write>(
    strategy: StrategyKind,
    burst: &BurstArgs,
    format: Format,
    mut out: W,
) -> Result<(), CliError> {
    let gateway = Gateway::from_config(&burst.config(strategy))?;
    let report = ConcurrencyHarness::new(gateway.executor()).run(&burst.plan())?;

    match format {
        Format::Text => write_summary(&report, &mut out)?,
        Format::Json => {
            serde_json::to_writer_pretty(&mut out, &report)?;
            writeln!(out)?;
        }
        Format::Csv => write_outcomes(&report, &mut out)?,
    }
    Ok(())
}

fn run_compare<W: Write>(burst: &BurstArgs, mut out: W) -> Result<(), CliError> {
    let seed = canonical_seed();
    let base = burst.config(StrategyKind::Unsafe);
    let store = Arc::new(LedgerStore::with_seed(&seed, base.lock_timeout)?);
    let plan = burst.plan();

    for strategy in StrategyKind::ALL {
        store.reset_ledger(&seed)?;
        let executor =
            TransferExecutor::from_config(Arc::clone(&store), &base.with_strategy(strategy));
        let report = ConcurrencyHarness::new(&executor).run(&plan)?;
        writeln!(
            out,
            "{:<12} successes {:>3}/{:<3} safe max {:>3}  sender {:>8}  total {:>8}  {}",
            strategy.as_str(),
            report.successes,
            plan.requests,
            report.expected_safe_successes,
            report.final_sender.balance,
            report.total_after,
            verdict(&report)
        )?;
    }
    Ok(())
}

fn verdict(report: &RaceReport) -> &'static str {
    if report.anomaly {
        "ANOMALY"
    } else {
        "ok"
    }
}

/// Human-readable report.
fn write_summary<W: Write>(report: &RaceReport, out: &mut W) -> io::Result<()> {
    writeln!(out, "strategy: {}", report.strategy)?;
    writeln!(
        out,
        "initial:  {} {} / {} {}",
        report.initial_sender.name,
        report.initial_sender.balance,
        report.initial_receiver.name,
        report.initial_receiver.balance
    )?;
    for outcome in &report.outcomes {
        match (&outcome.error, outcome.success) {
            (_, true) => writeln!(out, "  #{:<3} ok", outcome.request_id)?,
            (Some(error), false) => writeln!(out, "  #{:<3} failed: {}", outcome.request_id, error)?,
            (None, false) => writeln!(out, "  #{:<3} failed", outcome.request_id)?,
        }
    }
    writeln!(out, "elapsed:  {:.2} ms", report.elapsed_ms)?;
    writeln!(
        out,
        "result:   {} succeeded, {} failed, {} transferred, safe max {}",
        report.successes, report.failures, report.total_transferred, report.expected_safe_successes
    )?;
    writeln!(
        out,
        "final:    {} {} / {} {}",
        report.final_sender.name,
        report.final_sender.balance,
        report.final_receiver.name,
        report.final_receiver.balance
    )?;
    writeln!(
        out,
        "total:    {} before, {} after",
        report.total_before, report.total_after
    )?;
    writeln!(out, "verdict:  {}", verdict(report))
}

/// One CSV row per request.
///
/// # CSV Format
///
/// Columns: `request_id, success, attempts, code, error, latency_ms`
#[derive(Serialize)]
struct OutcomeRow<'a> {
    request_id: usize,
    success: bool,
    attempts: Option<u32>,
    code: Option<&'a str>,
    error: Option<&'a str>,
    latency_ms: String,
}

fn write_outcomes<W: Write>(report: &RaceReport, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    for outcome in &report.outcomes {
        wtr.serialize(OutcomeRow {
            request_id: outcome.request_id,
            success: outcome.success,
            attempts: outcome.attempts,
            code: outcome.code,
            error: outcome.error.as_deref(),
            latency_ms: format!("{:.3}", outcome.latency_ms),
        })?;
    }

    wtr.flush()?;
    Ok(())
}
