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

//! Integration tests for the REST API server with concurrent requests.
//!
//! These tests verify that the server correctly handles concurrent purchase,
//! confirmation, and redemption requests while keeping every card's balance
//! consistent with its ledger.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use giftcard_ledger_rs::{
    CardCode, CardSpec, CardSummary, Currency, Engine, LedgerError, MerchantId, PaymentMethod,
    PaymentRequest, RedeemOutcome, RedeemRequest,
};
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;

// === DTOs (duplicated from the demo server for test isolation) ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub payment_intent_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedemptionRequest {
    pub code: String,
    pub amount: Decimal,
    pub merchant_id: u32,
}

// === Server Setup ===

#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
}

struct AppError(LedgerError);

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            LedgerError::NotFound => StatusCode::NOT_FOUND,
            LedgerError::InvalidAmount => StatusCode::BAD_REQUEST,
            LedgerError::CardNotRedeemable(_)
            | LedgerError::InsufficientBalance
            | LedgerError::PartialRedemptionNotAllowed
            | LedgerError::RefundExceedsAvailableBalance => StatusCode::UNPROCESSABLE_ENTITY,
            LedgerError::GatewayUnavailable => StatusCode::BAD_GATEWAY,
            _ => StatusCode::CONFLICT,
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

async fn create_payment(
    State(state): State<AppState>,
    Json(request): Json<PurchaseRequest>,
) -> Result<StatusCode, AppError> {
    state.engine.record_pending_payment(
        PaymentRequest {
            payment_intent_id: request.payment_intent_id,
            amount: request.amount,
            currency: Currency::new(request.currency),
            method: PaymentMethod::Card,
            customer_id: None,
            card: CardSpec {
                code: CardCode::new(request.code),
                allow_partial_redemption: true,
                expiry_date: None,
            },
        },
        Utc::now(),
    )?;
    Ok(StatusCode::CREATED)
}

async fn confirm_payment(
    State(state): State<AppState>,
    Path(intent): Path<String>,
) -> Result<StatusCode, AppError> {
    state.engine.confirm_payment(&intent, Utc::now())?;
    Ok(StatusCode::OK)
}

async fn create_redemption(
    State(state): State<AppState>,
    Json(request): Json<RedemptionRequest>,
) -> Result<(StatusCode, Json<RedeemOutcome>), AppError> {
    let outcome = state.engine.redeem(
        RedeemRequest::new(
            request.code.as_str(),
            request.amount,
            MerchantId(request.merchant_id),
        ),
        Utc::now(),
    )?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn get_card(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<CardSummary>, AppError> {
    let summary = state.engine.validate_gift_card(&code, Utc::now())?;
    Ok(Json(summary))
}

async fn list_cards(State(state): State<AppState>) -> Json<Vec<CardSummary>> {
    Json(state.engine.card_summaries(Utc::now()))
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/payments", post(create_payment))
        .route("/payments/{intent}/confirm", post(confirm_payment))
        .route("/redemptions", post(create_redemption))
        .route("/cards", get(list_cards))
        .route("/cards/{code}", get(get_card))
        .with_state(state)
}

/// Test server that binds to an ephemeral port.
struct TestServer {
    base_url: String,
    engine: Arc<Engine>,
}

impl TestServer {
    async fn new() -> Self {
        let engine = Arc::new(Engine::new());
        let state = AppState {
            engine: engine.clone(),
        };

        let app = create_router(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for server to be ready by polling with retries
        let client = Client::new();
        let health_url = format!("{}/cards", base_url);
        for _ in 0..50 {
            match client.get(&health_url).send().await {
                Ok(_) => break,
                Err(_) => tokio::time::sleep(tokio::time::Duration::from_millis(50)).await,
            }
        }

        TestServer { base_url, engine }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

// === Tests ===
// These tests are ignored in CI due to connection issues on some platforms.
// Run manually with: cargo test --test server_test -- --ignored

/// Concurrent purchases create one card each with the full balance.
#[tokio::test]
#[ignore = "requires running server, may fail in CI"]
async fn concurrent_purchases_create_distinct_cards() {
    let server = TestServer::new().await;
    let client = Client::new();

    const NUM_CARDS: usize = 100;

    let mut handles = Vec::with_capacity(NUM_CARDS);
    for i in 0..NUM_CARDS {
        let client = client.clone();
        let purchase_url = server.url("/payments");
        let confirm_url = server.url(&format!("/payments/pi_{i}/confirm"));

        handles.push(tokio::spawn(async move {
            let request = PurchaseRequest {
                payment_intent_id: format!("pi_{i}"),
                amount: dec!(100.00),
                currency: "USD".to_string(),
                code: format!("GC-{i}"),
            };
            let created = client
                .post(&purchase_url)
                .json(&request)
                .send()
                .await
                .unwrap()
                .status();
            let confirmed = client.post(&confirm_url).send().await.unwrap().status();
            created.is_success() && confirmed.is_success()
        }));
    }

    let results: Vec<_> = futures::future::join_all(handles).await;
    let successful = results.iter().filter(|r| *r.as_ref().unwrap()).count();
    assert_eq!(successful, NUM_CARDS);

    assert_eq!(server.engine.card_count(), NUM_CARDS);
    for i in 0..NUM_CARDS {
        let card = server.engine.get_card(format!("GC-{i}").as_str()).unwrap();
        assert_eq!(card.balance(), dec!(100.00));
    }
}

/// Concurrent redemptions against one card conserve its balance.
#[tokio::test]
#[ignore = "requires running server, may fail in CI"]
async fn concurrent_redemptions_conserve_balance() {
    let server = TestServer::new().await;
    let client = Client::new();

    // Issue one card worth 1000.00
    let request = PurchaseRequest {
        payment_intent_id: "pi_1".to_string(),
        amount: dec!(1000.00),
        currency: "USD".to_string(),
        code: "GC-HOT".to_string(),
    };
    client
        .post(server.url("/payments"))
        .json(&request)
        .send()
        .await
        .unwrap();
    client
        .post(server.url("/payments/pi_1/confirm"))
        .send()
        .await
        .unwrap();

    const NUM_REQUESTS: usize = 500;
    let mut handles = Vec::with_capacity(NUM_REQUESTS);
    for _ in 0..NUM_REQUESTS {
        let client = client.clone();
        let url = server.url("/redemptions");

        handles.push(tokio::spawn(async move {
            let request = RedemptionRequest {
                code: "GC-HOT".to_string(),
                amount: dec!(5.00),
                merchant_id: 1,
            };
            let response = client.post(&url).json(&request).send().await.unwrap();
            response.status() == StatusCode::CREATED
        }));
    }

    let results: Vec<_> = futures::future::join_all(handles).await;
    let successful = results.iter().filter(|r| *r.as_ref().unwrap()).count();

    // 1000.00 fits exactly 200 debits of 5.00; the rest must be rejected.
    assert_eq!(successful, 200);
    let card = server.engine.get_card("GC-HOT").unwrap();
    assert_eq!(card.balance(), Decimal::ZERO);
}

/// Concurrent confirmations of one intent issue a single card.
#[tokio::test]
#[ignore = "requires running server, may fail in CI"]
async fn concurrent_confirmations_issue_one_card() {
    let server = TestServer::new().await;
    let client = Client::new();

    let request = PurchaseRequest {
        payment_intent_id: "pi_dup".to_string(),
        amount: dec!(50.00),
        currency: "USD".to_string(),
        code: "GC-DUP".to_string(),
    };
    client
        .post(server.url("/payments"))
        .json(&request)
        .send()
        .await
        .unwrap();

    const NUM_DELIVERIES: usize = 100;
    let mut handles = Vec::with_capacity(NUM_DELIVERIES);
    for _ in 0..NUM_DELIVERIES {
        let client = client.clone();
        let url = server.url("/payments/pi_dup/confirm");

        handles.push(tokio::spawn(async move {
            client.post(&url).send().await.unwrap().status()
        }));
    }

    let results: Vec<_> = futures::future::join_all(handles).await;
    for result in &results {
        assert!(result.as_ref().unwrap().is_success());
    }

    assert_eq!(server.engine.card_count(), 1);
    assert_eq!(server.engine.ledger("GC-DUP").unwrap().len(), 1);
}

/// Validation reads stay consistent under concurrent writes.
#[tokio::test]
#[ignore = "requires running server, may fail in CI"]
async fn concurrent_reads_during_redemptions() {
    let server = TestServer::new().await;
    let client = Client::new();

    let request = PurchaseRequest {
        payment_intent_id: "pi_1".to_string(),
        amount: dec!(500.00),
        currency: "USD".to_string(),
        code: "GC-READ".to_string(),
    };
    client
        .post(server.url("/payments"))
        .json(&request)
        .send()
        .await
        .unwrap();
    client
        .post(server.url("/payments/pi_1/confirm"))
        .send()
        .await
        .unwrap();

    const NUM_WRITES: usize = 100;
    const NUM_READS: usize = 100;
    let mut handles = Vec::with_capacity(NUM_WRITES + NUM_READS);

    for _ in 0..NUM_WRITES {
        let client = client.clone();
        let url = server.url("/redemptions");
        handles.push(tokio::spawn(async move {
            let request = RedemptionRequest {
                code: "GC-READ".to_string(),
                amount: dec!(1.00),
                merchant_id: 1,
            };
            client.post(&url).json(&request).send().await.unwrap().status()
        }));
    }

    for _ in 0..NUM_READS {
        let client = client.clone();
        // Case-insensitive lookup through the API
        let url = server.url("/cards/gc-read");
        handles.push(tokio::spawn(async move {
            client.get(&url).send().await.unwrap().status()
        }));
    }

    let results: Vec<_> = futures::future::join_all(handles).await;
    for result in &results {
        assert!(result.as_ref().unwrap().is_success());
    }

    let card = server.engine.get_card("GC-READ").unwrap();
    assert_eq!(card.balance(), dec!(400.00));
}
