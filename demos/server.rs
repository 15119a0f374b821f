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


//! REST API server example for BankSim.
//!
//! Run with: cargo run --example server
//!
//! The transfer endpoint uses the strategy named by `BANKSIM_STRATEGY`
//! (`unsafe`, `pessimistic` or `optimistic`; default `unsafe`).
//!
//! ```bash
//! # Transfer
//! curl -X POST http://localhost:3000/api/transfer \
//!   -H "Content-Type: application/json" \
//!   -d '{"from": 1, "to": 2, "amount": "100"}'
//!
//! # Fire ten at once
//! for i in $(seq 10); do
//!   curl -s -X POST http://localhost:3000/api/transfer \
//!     -H "Content-Type: application/json" \
//!     -d '{"from": 1, "to": 2, "amount": "100"}' &
//! done; wait
//!
//! # Inspect
//! curl http://localhost:3000/api/accounts
//! curl http://localhost:3000/api/account/1
//! curl "http://localhost:3000/api/transactions?limit=10"
//! curl http://localhost:3000/api/stats
//!
//! # Back to the seed
//! curl -X POST http://localhost:3000/api/reset
//! ```

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use banksim_rs::{
    AccountId, AccountSnapshot, AccountsResponse, Gateway, LedgerConfig, LedgerError,
    ResetResponse, Stats, StrategyKind, TransactionView, TransferResponse,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

// === Request/Response DTOs ===

/// Request body for a transfer.
///
/// ```json
/// {"from": 1, "to": 2, "amount": "100.00"}
/// ```
#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub from: u32,
    pub to: u32,
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    pub limit: Option<usize>,
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: String,
}

// === Application State ===

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
}

// === Error Handling ===

pub enum AppError {
    Ledger(LedgerError),
    Worker,
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        AppError::Ledger(err)
    }
}

fn status_for(code: &str) -> StatusCode {
    match code {
        "INVALID_REQUEST" => StatusCode::BAD_REQUEST,
        "ACCOUNT_NOT_FOUND" => StatusCode::NOT_FOUND,
        "STORE_UNAVAILABLE" => StatusCode::SERVICE_UNAVAILABLE,
        // Business rejections are a normal answer.
        _ => StatusCode::OK,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, code) = match self {
            AppError::Ledger(err) => (status_for(err.code()), err.to_string(), err.code()),
            AppError::Worker => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "request worker failed".to_string(),
                "INTERNAL",
            ),
        };

        (
            status,
            Json(ErrorResponse {
                success: false,
                error,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

/// Gateway calls block (the unsafe strategy sleeps), so they run off the
/// async workers.
async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, AppError>
where
    F: FnOnce(&Gateway) -> Result<T, LedgerError> + Send + 'static,
    T: Send + 'static,
{
    let gateway = state.gateway.clone();
    tokio::task::spawn_blocking(move || f(&gateway))
        .await
        .map_err(|_| AppError::Worker)?
        .map_err(AppError::from)
}

// === Handlers ===

/// POST /api/transfer - Move money between two accounts.
async fn transfer(
    State(state): State<AppState>,
    Json(request): Json<TransferRequest>,
) -> Result<(StatusCode, Json<TransferResponse>), AppError> {
    let response = blocking(&state, move |gateway| {
        Ok(gateway.transfer(
            AccountId(request.from),
            AccountId(request.to),
            request.amount,
        ))
    })
    .await?;

    let status = response.code.map_or(StatusCode::OK, status_for);
    Ok((status, Json(response)))
}

/// POST /api/reset - Restore the seed accounts.
async fn reset(State(state): State<AppState>) -> Result<Json<ResetResponse>, AppError> {
    blocking(&state, |gateway| gateway.reset()).await.map(Json)
}

/// GET /api/accounts - List all accounts with totals.
async fn list_accounts(State(state): State<AppState>) -> Result<Json<AccountsResponse>, AppError> {
    blocking(&state, |gateway| gateway.accounts()).await.map(Json)
}

/// GET /api/account/{id} - One account.
async fn get_account(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<Json<AccountSnapshot>, AppError> {
    blocking(&state, move |gateway| gateway.account(AccountId(id)))
        .await
        .map(Json)
}

/// GET /api/transactions?limit=N - Newest transactions first.
async fn list_transactions(
    State(state): State<AppState>,
    Query(query): Query<TransactionsQuery>,
) -> Result<Json<Vec<TransactionView>>, AppError> {
    blocking(&state, move |gateway| gateway.transactions(query.limit))
        .await
        .map(Json)
}

/// GET /api/stats - Totals and the conservation verdict.
async fn stats(State(state): State<AppState>) -> Result<Json<Stats>, AppError> {
    blocking(&state, |gateway| gateway.stats()).await.map(Json)
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/transfer", post(transfer))
        .route("/api/reset", post(reset))
        .route("/api/accounts", get(list_accounts))
        .route("/api/account/{id}", get(get_account))
        .route("/api/transactions", get(list_transactions))
        .route("/api/stats", get(stats))
        .with_state(state)
}

// === Main ===

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "banksim_rs=info,server=info".into()),
        )
        .init();

    let strategy = match std::env::var("BANKSIM_STRATEGY") {
        Ok(value) => value.parse().unwrap_or_else(|e: String| {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }),
        Err(_) => StrategyKind::Unsafe,
    };
    let config = LedgerConfig::default().with_strategy(strategy);

    let gateway = Gateway::from_config(&config).unwrap();
    let state = AppState {
        gateway: Arc::new(gateway),
    };

    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:3000").await.unwrap();
    info!(%strategy, "listening on http://127.0.0.1:3000");
    println!("BankSim API server running on http://127.0.0.1:3000 ({strategy})");
    println!();
    println!("Endpoints:");
    println!("  POST /api/transfer       - Transfer between accounts");
    println!("  POST /api/reset          - Restore Alice, Bob and Charlie");
    println!("  GET  /api/accounts       - List all accounts");
    println!("  GET  /api/account/:id    - Get account by ID");
    println!("  GET  /api/transactions   - Recent transactions");
    println!("  GET  /api/stats          - Totals and anomaly check");

    axum::serve(listener, app).await.unwrap();
}
