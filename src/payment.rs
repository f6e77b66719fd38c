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

//! Payment rows and their lifecycle.
//!
//! A payment is created `Pending` by the purchase flow, transitions to
//! `Completed` exactly once per external intent reference, and may move
//! toward `Refunded` / `PartiallyRefunded` through the refund path.
//! `Failed` is terminal.

use crate::base::{CustomerId, GiftCardId, PaymentId};
use crate::{CardCode, Currency};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
    PartiallyRefunded,
}

/// How the purchase was paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    Wallet,
    BankTransfer,
    Other,
}

/// Gift card parameters captured at purchase time and applied when the
/// payment is confirmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardSpec {
    pub code: CardCode,
    pub allow_partial_redemption: bool,
    pub expiry_date: Option<DateTime<Utc>>,
}

/// Parameters for recording a pending payment.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRequest {
    /// External gateway reference; unique per payment row.
    pub payment_intent_id: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub method: PaymentMethod,
    pub customer_id: Option<CustomerId>,
    pub card: CardSpec,
}

/// Payment row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    /// Set when confirmation creates the card.
    pub gift_card_id: Option<GiftCardId>,
    pub customer_id: Option<CustomerId>,
    pub amount: Decimal,
    pub currency: Currency,
    pub method: PaymentMethod,
    pub payment_intent_id: String,
    pub status: PaymentStatus,
    /// Cumulative amount refunded through the gateway.
    pub refunded_total: Decimal,
    pub card_spec: CardSpec,
    pub failure_reason: Option<String>,
    /// Reason supplied with the most recent refund, if any.
    pub last_refund_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn pending(id: PaymentId, request: PaymentRequest, now: DateTime<Utc>) -> Self {
        Self {
            id,
            gift_card_id: None,
            customer_id: request.customer_id,
            amount: request.amount,
            currency: request.currency,
            method: request.method,
            payment_intent_id: request.payment_intent_id,
            status: PaymentStatus::Pending,
            refunded_total: Decimal::ZERO,
            card_spec: request.card,
            failure_reason: None,
            last_refund_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Amount still refundable through the gateway.
    pub fn remaining_refundable(&self) -> Decimal {
        self.amount - self.refunded_total
    }

    /// Whether the payment has been confirmed (its card exists).
    pub fn is_settled(&self) -> bool {
        matches!(
            self.status,
            PaymentStatus::Completed | PaymentStatus::Refunded | PaymentStatus::PartiallyRefunded
        )
    }

    pub fn is_refundable(&self) -> bool {
        matches!(
            self.status,
            PaymentStatus::Completed | PaymentStatus::PartiallyRefunded
        )
    }

    /// Records a refunded amount and derives the resulting status.
    pub fn apply_refund(&mut self, amount: Decimal, now: DateTime<Utc>) {
        self.refunded_total += amount;
        self.status = if self.refunded_total >= self.amount {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };
        self.updated_at = now;
    }
}

/// Result of a refund call: the gateway reference, the amount actually
/// refunded, and the payment's resulting status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundOutcome {
    pub refund_ref: crate::gateway::RefundRef,
    pub amount: Decimal,
    pub payment_status: PaymentStatus,
}
