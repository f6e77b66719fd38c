//! Simple REST API server example for the gift-card ledger.
//!
//! Run with: `cargo run --example server`
//!
//! ## Endpoints
//!
//! - `POST /payments` - Record a pending gift card purchase
//! - `POST /payments/{intent}/confirm` - Confirm a payment (issues the card)
//! - `POST /payments/{intent}/fail` - Mark a pending payment failed
//! - `POST /payments/{intent}/refund` - Refund a completed payment
//! - `POST /redemptions` - Redeem value from a card
//! - `GET /cards` - List all cards
//! - `GET /cards/{code}` - Validate a card by its code
//! - `GET /cards/{code}/ledger` - Read a card's ledger entries
//!
//! ## Example Usage
//!
//! ```bash
//! # Purchase
//! curl -X POST http://localhost:3000/payments \
//!   -H "Content-Type: application/json" \
//!   -d '{"payment_intent_id": "pi_1", "amount": "100.00", "currency": "USD", "code": "GC-2024-001"}'
//!
//! # Confirm (webhook)
//! curl -X POST http://localhost:3000/payments/pi_1/confirm
//!
//! # Redeem
//! curl -X POST http://localhost:3000/redemptions \
//!   -H "Content-Type: application/json" \
//!   -d '{"code": "GC-2024-001", "amount": "30.00", "merchant_id": 7}'
//!
//! # Validate
//! curl http://localhost:3000/cards/gc-2024-001
//! ```

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use giftcard_ledger_rs::{
    CardCode, CardSpec, CardSummary, Currency, Engine, LedgerEntry, LedgerError, MerchantId,
    Payment, PaymentMethod, PaymentRequest, RedeemOutcome, RedeemRequest, RefundOutcome,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;

// === Request DTOs ===

/// Request body for recording a purchase.
///
/// ```json
/// {"payment_intent_id": "pi_1", "amount": "100.00", "currency": "USD", "code": "GC-2024-001"}
/// ```
#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    pub payment_intent_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub code: String,
    #[serde(default = "default_allow_partial")]
    pub allow_partial_redemption: bool,
    pub expiry_date: Option<DateTime<Utc>>,
}

fn default_allow_partial() -> bool {
    true
}

/// Request body for failing a payment.
#[derive(Debug, Deserialize)]
pub struct FailRequest {
    pub reason: String,
}

/// Request body for a refund. Omitting the amount refunds the full
/// remaining refundable total.
#[derive(Debug, Default, Deserialize)]
pub struct RefundRequest {
    pub amount: Option<Decimal>,
    pub reason: Option<String>,
}

/// Request body for redeeming value from a card.
#[derive(Debug, Deserialize)]
pub struct RedemptionRequest {
    pub code: String,
    pub amount: Decimal,
    pub merchant_id: u32,
    pub idempotency_key: Option<String>,
}

// === Application State ===

/// Shared application state containing the ledger engine.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

// === Error Handling ===

/// Wrapper for converting `LedgerError` into HTTP responses.
pub struct AppError(LedgerError);

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            LedgerError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            LedgerError::CardNotRedeemable(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "CARD_NOT_REDEEMABLE")
            }
            LedgerError::InvalidAmount => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
            LedgerError::InsufficientBalance => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_BALANCE")
            }
            LedgerError::PartialRedemptionNotAllowed => {
                (StatusCode::UNPROCESSABLE_ENTITY, "PARTIAL_REDEMPTION_NOT_ALLOWED")
            }
            LedgerError::PaymentAlreadyFailed => (StatusCode::CONFLICT, "PAYMENT_ALREADY_FAILED"),
            LedgerError::PaymentNotRefundable => (StatusCode::CONFLICT, "PAYMENT_NOT_REFUNDABLE"),
            LedgerError::RefundExceedsAvailableBalance => {
                (StatusCode::UNPROCESSABLE_ENTITY, "REFUND_EXCEEDS_AVAILABLE_BALANCE")
            }
            LedgerError::ChargebackAlreadyResolved => {
                (StatusCode::CONFLICT, "CHARGEBACK_ALREADY_RESOLVED")
            }
            LedgerError::ConcurrencyConflict => (StatusCode::CONFLICT, "CONCURRENCY_CONFLICT"),
            LedgerError::GatewayUnavailable => (StatusCode::BAD_GATEWAY, "GATEWAY_UNAVAILABLE"),
            LedgerError::DuplicatePaymentIntent => {
                (StatusCode::CONFLICT, "DUPLICATE_PAYMENT_INTENT")
            }
            LedgerError::DuplicateCode => (StatusCode::CONFLICT, "DUPLICATE_CODE"),
            LedgerError::DuplicateChargeback => (StatusCode::CONFLICT, "DUPLICATE_CHARGEBACK"),
            LedgerError::PaymentAlreadyCompleted => {
                (StatusCode::CONFLICT, "PAYMENT_ALREADY_COMPLETED")
            }
            LedgerError::PaymentNotDisputable => {
                (StatusCode::CONFLICT, "PAYMENT_NOT_DISPUTABLE")
            }
        };

        (
            status,
            Json(serde_json::json!({
                "error": self.0.to_string(),
                "code": code,
            })),
        )
            .into_response()
    }
}

// === Handlers ===

/// POST /payments - Record a pending purchase.
async fn create_payment(
    State(state): State<AppState>,
    Json(request): Json<PurchaseRequest>,
) -> Result<(StatusCode, Json<Payment>), AppError> {
    let payment = state.engine.record_pending_payment(
        PaymentRequest {
            payment_intent_id: request.payment_intent_id,
            amount: request.amount,
            currency: Currency::new(request.currency),
            method: PaymentMethod::Card,
            customer_id: None,
            card: CardSpec {
                code: CardCode::new(request.code),
                allow_partial_redemption: request.allow_partial_redemption,
                expiry_date: request.expiry_date,
            },
        },
        Utc::now(),
    )?;
    Ok((StatusCode::CREATED, Json(payment)))
}

/// POST /payments/{intent}/confirm - Confirm a payment (idempotent).
async fn confirm_payment(
    State(state): State<AppState>,
    Path(intent): Path<String>,
) -> Result<Json<Payment>, AppError> {
    let payment = state.engine.confirm_payment(&intent, Utc::now())?;
    Ok(Json(payment))
}

/// POST /payments/{intent}/fail - Mark a pending payment failed.
async fn fail_payment(
    State(state): State<AppState>,
    Path(intent): Path<String>,
    Json(request): Json<FailRequest>,
) -> Result<Json<Payment>, AppError> {
    let payment = state
        .engine
        .fail_payment(&intent, request.reason, Utc::now())?;
    Ok(Json(payment))
}

/// POST /payments/{intent}/refund - Refund a completed payment.
async fn refund_payment(
    State(state): State<AppState>,
    Path(intent): Path<String>,
    Json(request): Json<RefundRequest>,
) -> Result<Json<RefundOutcome>, AppError> {
    let payment = state.engine.get_payment(&intent).ok_or(LedgerError::NotFound)?;
    let outcome = state
        .engine
        .refund(payment.id, request.amount, request.reason, Utc::now())?;
    Ok(Json(outcome))
}

/// POST /redemptions - Redeem value from a card.
async fn create_redemption(
    State(state): State<AppState>,
    Json(request): Json<RedemptionRequest>,
) -> Result<(StatusCode, Json<RedeemOutcome>), AppError> {
    let mut redeem = RedeemRequest::new(
        request.code.as_str(),
        request.amount,
        MerchantId(request.merchant_id),
    );
    if let Some(key) = request.idempotency_key {
        redeem = redeem.idempotency_key(key);
    }
    let outcome = state.engine.redeem(redeem, Utc::now())?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// GET /cards/{code} - Validate a card by its code (case-insensitive).
async fn get_card(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<CardSummary>, AppError> {
    let summary = state.engine.validate_gift_card(&code, Utc::now())?;
    Ok(Json(summary))
}

/// GET /cards/{code}/ledger - Read a card's ledger entries.
async fn get_ledger(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<Vec<LedgerEntry>>, AppError> {
    let entries = state.engine.ledger(code.as_str())?;
    Ok(Json(entries))
}

/// GET /cards - List all cards.
async fn list_cards(State(state): State<AppState>) -> Json<Vec<CardSummary>> {
    Json(state.engine.card_summaries(Utc::now()))
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/payments", post(create_payment))
        .route("/payments/{intent}/confirm", post(confirm_payment))
        .route("/payments/{intent}/fail", post(fail_payment))
        .route("/payments/{intent}/refund", post(refund_payment))
        .route("/redemptions", post(create_redemption))
        .route("/cards", get(list_cards))
        .route("/cards/{code}", get(get_card))
        .route("/cards/{code}/ledger", get(get_ledger))
        .with_state(state)
}

// === Main ===

#[tokio::main]
async fn main() {
    let state = AppState {
        engine: Arc::new(Engine::new()),
    };

    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:3000").await.unwrap();
    println!("Gift-card ledger API server running on http://127.0.0.1:3000");
    println!();
    println!("Endpoints:");
    println!("  POST /payments                   - Record a pending purchase");
    println!("  POST /payments/:intent/confirm   - Confirm a payment");
    println!("  POST /payments/:intent/fail      - Fail a pending payment");
    println!("  POST /payments/:intent/refund    - Refund a completed payment");
    println!("  POST /redemptions                - Redeem value from a card");
    println!("  GET  /cards                      - List all cards");
    println!("  GET  /cards/:code                - Validate a card");
    println!("  GET  /cards/:code/ledger         - Read a card's ledger");

    axum::serve(listener, app).await.unwrap();
}
