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

//! Append-only ledger entries.
//!
//! Every balance-affecting event produces exactly one [`LedgerEntry`].
//! Entries are never updated or deleted; replaying a card's log from zero
//! with [`replay`] reconstructs the current balance exactly.

use crate::base::{ChargebackId, GiftCardId, LedgerEntryId, MerchantId, PaymentId, RedemptionId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Balance-affecting event kind, tagged with the reference that produced it.
///
/// The amount on the entry is always a positive magnitude; the sign is
/// implied by the kind (+Purchase, -Redemption, +Refund, -Chargeback,
/// -Breakage).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EntryKind {
    /// Initial credit from a confirmed payment.
    Purchase { payment_id: PaymentId },
    /// Debit from a merchant redemption.
    Redemption {
        redemption_id: RedemptionId,
        merchant_id: MerchantId,
    },
    /// Re-credit from a payment refund.
    Refund { payment_id: PaymentId },
    /// Write-off from a lost chargeback.
    Chargeback { chargeback_id: ChargebackId },
    /// Write-off of expired value past the grace period.
    Breakage,
}

impl EntryKind {
    /// Sign applied to the entry amount when replaying the log.
    pub fn sign(&self) -> i64 {
        match self {
            Self::Purchase { .. } | Self::Refund { .. } => 1,
            Self::Redemption { .. } | Self::Chargeback { .. } | Self::Breakage => -1,
        }
    }

    /// Whether this kind credits the balance.
    pub fn is_credit(&self) -> bool {
        self.sign() > 0
    }
}

/// Immutable record of a single balance change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub gift_card_id: GiftCardId,
    #[serde(flatten)]
    pub kind: EntryKind,
    /// Positive magnitude; sign implied by `kind`.
    pub amount: Decimal,
    /// Balance snapshot taken immediately before commit.
    pub balance_before: Decimal,
    /// Balance snapshot taken immediately after commit.
    pub balance_after: Decimal,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Amount with the kind's sign applied.
    pub fn signed_amount(&self) -> Decimal {
        if self.kind.sign() >= 0 {
            self.amount
        } else {
            -self.amount
        }
    }
}

/// Replays a card's entries from zero, returning the reconstructed balance.
pub fn replay<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Decimal {
    entries
        .into_iter()
        .map(LedgerEntry::signed_amount)
        .sum()
}
