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

//! Chargeback dispute lifecycle.
//!
//! State machine: `Pending` -> `Won` | `Lost` | `Withdrawn` (terminal,
//! one-way). Only a loss touches the card balance; the dispute fee is a
//! merchant-side figure recorded on the chargeback row, never a gift-card
//! balance event.

use crate::base::{ChargebackId, PaymentId};
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargebackStatus {
    Pending,
    Won,
    Lost,
    Withdrawn,
}

impl ChargebackStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Terminal outcome requested by the dispute notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargebackResolution {
    Won,
    Lost,
    Withdrawn,
}

impl From<ChargebackResolution> for ChargebackStatus {
    fn from(resolution: ChargebackResolution) -> Self {
        match resolution {
            ChargebackResolution::Won => Self::Won,
            ChargebackResolution::Lost => Self::Lost,
            ChargebackResolution::Withdrawn => Self::Withdrawn,
        }
    }
}

/// Dispute row against a payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chargeback {
    pub id: ChargebackId,
    pub payment_id: PaymentId,
    /// Disputed amount claimed by the cardholder's bank.
    pub amount: Decimal,
    /// Merchant-side dispute fee; not a gift-card balance event.
    pub fee: Decimal,
    pub status: ChargebackStatus,
    /// External gateway reference for the dispute.
    pub external_id: String,
    pub dispute_id: Option<String>,
    /// Value actually deducted from the card on loss (capped at the balance
    /// remaining at resolution time).
    pub written_off: Decimal,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Chargeback {
    pub fn open(
        id: ChargebackId,
        payment_id: PaymentId,
        amount: Decimal,
        fee: Decimal,
        external_id: String,
        dispute_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            payment_id,
            amount,
            fee,
            status: ChargebackStatus::Pending,
            external_id,
            dispute_id,
            written_off: Decimal::ZERO,
            created_at: now,
            resolved_at: None,
        }
    }

    /// Moves to a terminal state; rejected once already terminal.
    pub fn resolve(
        &mut self,
        resolution: ChargebackResolution,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        if self.status.is_terminal() {
            return Err(LedgerError::ChargebackAlreadyResolved);
        }
        self.status = resolution.into();
        self.resolved_at = Some(now);
        Ok(())
    }
}
