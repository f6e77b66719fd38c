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

//! Error types for ledger operations.
//!
//! Every failure is returned as a typed result to the caller; the core never
//! logs and never formats user-facing messages beyond these display strings.

use thiserror::Error;

/// Why a card refuses redemption.
///
/// Carried inside [`LedgerError::CardNotRedeemable`] so callers can report
/// the exact state that blocked the debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardBlock {
    /// Expiry date has passed and the remaining value is not yet written off.
    Expired,
    /// Card was soft-cancelled.
    Cancelled,
    /// Balance already reached zero.
    FullyRedeemed,
}

impl std::fmt::Display for CardBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Expired => write!(f, "expired"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::FullyRedeemed => write!(f, "fully redeemed"),
        }
    }
}

/// Ledger operation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Referenced card, payment, redemption, or chargeback does not exist
    #[error("not found")]
    NotFound,

    /// Card cannot be redeemed in its current state
    #[error("card not redeemable ({0})")]
    CardNotRedeemable(CardBlock),

    /// Amount is zero or negative
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Debit would exceed the remaining balance
    #[error("insufficient balance")]
    InsufficientBalance,

    /// Card requires full redemption in a single debit
    #[error("partial redemption not allowed")]
    PartialRedemptionNotAllowed,

    /// Payment already transitioned to failed (terminal)
    #[error("payment already failed")]
    PaymentAlreadyFailed,

    /// Payment is not in a refundable state
    #[error("payment not refundable")]
    PaymentNotRefundable,

    /// Refund would push the balance above the re-creditable headroom
    #[error("refund exceeds available balance")]
    RefundExceedsAvailableBalance,

    /// Chargeback already reached a terminal state
    #[error("chargeback already resolved")]
    ChargebackAlreadyResolved,

    /// Row lock could not be acquired within the bounded wait
    #[error("concurrency conflict (row lock wait exhausted)")]
    ConcurrencyConflict,

    /// External payment gateway call failed; no local state was mutated
    #[error("payment gateway unavailable")]
    GatewayUnavailable,

    /// A payment with this external intent reference already exists
    #[error("duplicate payment intent")]
    DuplicatePaymentIntent,

    /// A card with this code already exists
    #[error("duplicate card code")]
    DuplicateCode,

    /// A chargeback with this external reference already exists
    #[error("duplicate chargeback")]
    DuplicateChargeback,

    /// Payment already confirmed; it can no longer be failed
    #[error("payment already completed")]
    PaymentAlreadyCompleted,

    /// Payment has not settled; only completed payments can be disputed
    #[error("payment not disputable")]
    PaymentNotDisputable,
}
