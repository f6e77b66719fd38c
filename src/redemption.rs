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

//! Redemption records and requests.

use crate::base::{CardCode, GiftCardId, MerchantId, RedemptionId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Channel through which a redemption was performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedemptionMethod {
    Online,
    InStore,
    Phone,
}

/// Card lookup key: unique code (case-insensitive) or internal id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardRef {
    Code(CardCode),
    Id(GiftCardId),
}

impl From<&str> for CardRef {
    fn from(code: &str) -> Self {
        Self::Code(CardCode::new(code))
    }
}

impl From<GiftCardId> for CardRef {
    fn from(id: GiftCardId) -> Self {
        Self::Id(id)
    }
}

/// A single debit request against a card.
#[derive(Debug, Clone, PartialEq)]
pub struct RedeemRequest {
    pub card: CardRef,
    pub amount: Decimal,
    pub merchant_id: MerchantId,
    pub method: RedemptionMethod,
    pub location: Option<String>,
    pub notes: Option<String>,
    /// Optional client-supplied key. When present, a retried request with the
    /// same key replays the original outcome instead of debiting again.
    pub idempotency_key: Option<String>,
}

impl RedeemRequest {
    pub fn new(card: impl Into<CardRef>, amount: Decimal, merchant_id: MerchantId) -> Self {
        Self {
            card: card.into(),
            amount,
            merchant_id,
            method: RedemptionMethod::Online,
            location: None,
            notes: None,
            idempotency_key: None,
        }
    }

    pub fn method(mut self, method: RedemptionMethod) -> Self {
        self.method = method;
        self
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Immutable record of one successful debit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Redemption {
    pub id: RedemptionId,
    pub gift_card_id: GiftCardId,
    pub merchant_id: MerchantId,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub method: RedemptionMethod,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// What a successful redeem call returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedeemOutcome {
    pub redemption: Redemption,
    pub new_balance: Decimal,
    pub fully_redeemed: bool,
}

impl RedeemOutcome {
    pub fn from_redemption(redemption: Redemption) -> Self {
        let new_balance = redemption.balance_after;
        Self {
            redemption,
            new_balance,
            fully_redeemed: new_balance == Decimal::ZERO,
        }
    }
}
