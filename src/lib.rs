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

//! # Gift-Card Ledger
//!
//! This library provides the balance and transaction ledger for gift cards:
//! payment confirmation, redemption, refunds, chargeback reconciliation, and
//! breakage recognition, with an append-only ledger log per card.
//!
//! ## Core Components
//!
//! - [`Engine`]: Central processor owning the card, payment, and chargeback stores
//! - [`GiftCard`]: Mutex-guarded card row enforcing `0 <= balance <= value`
//! - [`LedgerEntry`]: Immutable balance-change record; replaying a card's log
//!   reconstructs its balance exactly
//! - [`LedgerError`]: Typed error results for every operation
//!
//! ## Example
//!
//! ```
//! use chrono::Utc;
//! use rust_decimal_macros::dec;
//! use giftcard_ledger_rs::{
//!     CardCode, CardSpec, Currency, Engine, MerchantId, PaymentMethod, PaymentRequest,
//!     RedeemRequest,
//! };
//!
//! let engine = Engine::new();
//! let now = Utc::now();
//!
//! // Purchase: pending payment, then gateway confirmation creates the card.
//! engine
//!     .record_pending_payment(
//!         PaymentRequest {
//!             payment_intent_id: "pi_1".to_string(),
//!             amount: dec!(100.00),
//!             currency: Currency::new("USD"),
//!             method: PaymentMethod::Card,
//!             customer_id: None,
//!             card: CardSpec {
//!                 code: CardCode::new("GC-2024-001"),
//!                 allow_partial_redemption: true,
//!                 expiry_date: None,
//!             },
//!         },
//!         now,
//!     )
//!     .unwrap();
//! engine.confirm_payment("pi_1", now).unwrap();
//!
//! // Redeem part of the balance at a merchant.
//! let outcome = engine
//!     .redeem(RedeemRequest::new("gc-2024-001", dec!(30.00), MerchantId(7)), now)
//!     .unwrap();
//! assert_eq!(outcome.new_balance, dec!(70.00));
//! assert!(!outcome.fully_redeemed);
//! ```
//!
//! ## Thread Safety
//!
//! Every card and payment is an independently locked row; operations on one
//! card serialize on its row lock while different cards proceed in parallel.
//! Payment confirmation is idempotent per external intent reference, so
//! duplicate webhook deliveries are safe.

pub mod base;
mod breakage;
pub mod card;
mod chargeback;
pub mod entry;
pub mod error;
mod engine;
pub mod gateway;
mod intent_log;
mod payment;
mod redemption;

pub use base::{
    CardCode, ChargebackId, Currency, CustomerId, GiftCardId, LedgerEntryId, MerchantId,
    PaymentId, RedemptionId,
};
pub use breakage::{BreakageLine, BreakageReport};
pub use card::{
    BreakageWriteOff, CardSummary, GiftCard, GiftCardStatus, RefundPolicy, apply_delta,
};
pub use chargeback::{Chargeback, ChargebackResolution, ChargebackStatus};
pub use engine::Engine;
pub use entry::{EntryKind, LedgerEntry, replay};
pub use error::{CardBlock, LedgerError};
pub use gateway::{GatewayError, NoopGateway, PaymentGateway, RefundRef};
pub use intent_log::IntentLog;
pub use payment::{
    CardSpec, Payment, PaymentMethod, PaymentRequest, PaymentStatus, RefundOutcome,
};
pub use redemption::{CardRef, RedeemOutcome, RedeemRequest, Redemption, RedemptionMethod};
