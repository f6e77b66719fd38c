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

//! Gift card state and the balance invariant guard.
//!
//! A [`GiftCard`] is the only shared mutable row in the subsystem. All
//! balance changes go through [`apply_delta`], the pure guard enforcing
//! `0 <= balance` and `balance + written_off <= value`, and every committed
//! change appends one ledger entry inside the same lock, so the balance and
//! its log can never drift apart.
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use rust_decimal_macros::dec;
//! use giftcard_ledger_rs::{CardCode, Currency, GiftCard, GiftCardId, GiftCardStatus, PaymentId};
//!
//! let card = GiftCard::issue(
//!     GiftCardId(1),
//!     CardCode::new("GC-1"),
//!     dec!(50.00),
//!     Currency::new("USD"),
//!     true,
//!     None,
//!     PaymentId(1),
//!     Utc::now(),
//! )
//! .unwrap();
//! assert_eq!(card.balance(), dec!(50.00));
//! assert_eq!(card.status(Utc::now()), GiftCardStatus::Active);
//! ```

use crate::base::{CardCode, ChargebackId, Currency, GiftCardId, LedgerEntryId, PaymentId};
use crate::entry::{EntryKind, LedgerEntry};
use crate::error::{CardBlock, LedgerError};
use crate::gateway::{GatewayError, RefundRef};
use crate::redemption::{Redemption, RedemptionMethod};
use crate::{MerchantId, RedemptionId};
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, MutexGuard};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Bounded wait for the card row lock before surfacing a conflict.
const ROW_LOCK_WAIT: std::time::Duration = std::time::Duration::from_millis(500);

/// Derived card status; never independently settable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GiftCardStatus {
    Active,
    Redeemed,
    Expired,
    Cancelled,
}

/// How a refund that exceeds the re-creditable headroom is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefundPolicy {
    /// Fail with [`LedgerError::RefundExceedsAvailableBalance`].
    #[default]
    Strict,
    /// Cap the refund at the headroom and flag it as partial.
    CapToHeadroom,
}

/// Pure balance invariant guard.
///
/// Computes the new balance for applying `amount` with `kind` to a card with
/// the given `value`, `balance`, and permanently written-off total. Never
/// mutates state; callers apply the result inside the row lock.
///
/// # Errors
///
/// - [`LedgerError::InvalidAmount`] - amount is zero or negative, or a credit
///   would exceed the face value.
/// - [`LedgerError::InsufficientBalance`] - a debit exceeds the balance.
/// - [`LedgerError::RefundExceedsAvailableBalance`] - a refund credit would
///   exceed `value - written_off - balance`.
pub fn apply_delta(
    value: Decimal,
    written_off: Decimal,
    balance: Decimal,
    kind: &EntryKind,
    amount: Decimal,
) -> Result<Decimal, LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount);
    }
    match kind {
        EntryKind::Redemption { .. } | EntryKind::Chargeback { .. } | EntryKind::Breakage => {
            if amount > balance {
                return Err(LedgerError::InsufficientBalance);
            }
            Ok(balance - amount)
        }
        EntryKind::Refund { .. } => {
            if balance + amount > value - written_off {
                return Err(LedgerError::RefundExceedsAvailableBalance);
            }
            Ok(balance + amount)
        }
        EntryKind::Purchase { .. } => {
            if balance + amount > value {
                return Err(LedgerError::InvalidAmount);
            }
            Ok(balance + amount)
        }
    }
}

#[derive(Debug)]
struct CardData {
    id: GiftCardId,
    code: CardCode,
    value: Decimal,
    balance: Decimal,
    currency: Currency,
    allow_partial_redemption: bool,
    expiry_date: Option<DateTime<Utc>>,
    cancelled: bool,
    /// Cumulative chargeback + breakage magnitude; refunds cannot re-credit
    /// into written-off value.
    written_off: Decimal,
    /// Append-only log, kept inside the row lock so balance and log commit
    /// atomically.
    entries: Vec<LedgerEntry>,
    created_at: DateTime<Utc>,
}

impl CardData {
    fn assert_invariants(&self) {
        debug_assert!(
            self.balance >= Decimal::ZERO,
            "Invariant violated: balance went negative: {}",
            self.balance
        );
        debug_assert!(
            self.balance + self.written_off <= self.value,
            "Invariant violated: balance {} + written off {} exceeds value {}",
            self.balance,
            self.written_off,
            self.value
        );
    }

    fn status(&self, now: DateTime<Utc>) -> GiftCardStatus {
        if self.cancelled {
            GiftCardStatus::Cancelled
        } else if self.balance == Decimal::ZERO {
            GiftCardStatus::Redeemed
        } else if self.is_expired(now) {
            GiftCardStatus::Expired
        } else {
            GiftCardStatus::Active
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_date.is_some_and(|expiry| now > expiry)
    }

    /// Applies the guard and appends the matching ledger entry.
    fn commit(
        &mut self,
        kind: EntryKind,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<&LedgerEntry, LedgerError> {
        let before = self.balance;
        let after = apply_delta(self.value, self.written_off, before, &kind, amount)?;
        if matches!(kind, EntryKind::Chargeback { .. } | EntryKind::Breakage) {
            self.written_off += amount;
        }
        self.balance = after;
        self.entries.push(LedgerEntry {
            id: LedgerEntryId(self.entries.len() as u64 + 1),
            gift_card_id: self.id,
            kind,
            amount,
            balance_before: before,
            balance_after: after,
            created_at: now,
        });
        self.assert_invariants();
        Ok(self.entries.last().unwrap())
    }
}

/// Validation snapshot returned to callers, rounded to currency precision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardSummary {
    pub valid: bool,
    pub code: CardCode,
    pub balance: Decimal,
    pub value: Decimal,
    pub currency: Currency,
    pub status: GiftCardStatus,
    pub expiry_date: Option<DateTime<Utc>>,
    pub allow_partial_redemption: bool,
}

/// Result of recognizing breakage on a single card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakageWriteOff {
    pub gift_card_id: GiftCardId,
    pub code: CardCode,
    pub amount: Decimal,
    pub currency: Currency,
    pub recognized_at: DateTime<Utc>,
}

/// Gift card row with its append-only ledger log.
#[derive(Debug)]
pub struct GiftCard {
    inner: Mutex<CardData>,
}

impl GiftCard {
    /// Display precision for snapshots (two decimal places, currency minor units).
    pub const DECIMAL_PRECISION: u32 = 2;

    /// Creates a card from a confirmed purchase: `balance = value`, one
    /// PURCHASE entry with `balance_before = 0`.
    ///
    /// Only the payment confirmation path constructs cards.
    #[allow(clippy::too_many_arguments)]
    pub fn issue(
        id: GiftCardId,
        code: CardCode,
        value: Decimal,
        currency: Currency,
        allow_partial_redemption: bool,
        expiry_date: Option<DateTime<Utc>>,
        payment_id: PaymentId,
        now: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        let mut data = CardData {
            id,
            code,
            value,
            balance: Decimal::ZERO,
            currency,
            allow_partial_redemption,
            expiry_date,
            cancelled: false,
            written_off: Decimal::ZERO,
            entries: Vec::new(),
            created_at: now,
        };
        data.commit(EntryKind::Purchase { payment_id }, value, now)?;
        Ok(Self {
            inner: Mutex::new(data),
        })
    }

    /// Acquires the row lock with a bounded wait.
    fn lock(&self) -> Result<MutexGuard<'_, CardData>, LedgerError> {
        self.inner
            .try_lock_for(ROW_LOCK_WAIT)
            .ok_or(LedgerError::ConcurrencyConflict)
    }

    pub fn id(&self) -> GiftCardId {
        self.inner.lock().id
    }

    pub fn code(&self) -> CardCode {
        self.inner.lock().code.clone()
    }

    pub fn balance(&self) -> Decimal {
        self.inner.lock().balance
    }

    pub fn value(&self) -> Decimal {
        self.inner.lock().value
    }

    pub fn currency(&self) -> Currency {
        self.inner.lock().currency.clone()
    }

    pub fn status(&self, now: DateTime<Utc>) -> GiftCardStatus {
        self.inner.lock().status(now)
    }

    /// Cumulative value permanently written off by chargebacks and breakage.
    pub fn written_off(&self) -> Decimal {
        self.inner.lock().written_off
    }

    /// Clones the card's ledger log for audit reads.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.inner.lock().entries.clone()
    }

    /// Snapshot for validation responses and reports.
    pub fn summary(&self, now: DateTime<Utc>) -> CardSummary {
        let data = self.inner.lock();
        let status = data.status(now);
        CardSummary {
            valid: status == GiftCardStatus::Active,
            code: data.code.clone(),
            balance: data.balance.round_dp(Self::DECIMAL_PRECISION),
            value: data.value.round_dp(Self::DECIMAL_PRECISION),
            currency: data.currency.clone(),
            status,
            expiry_date: data.expiry_date,
            allow_partial_redemption: data.allow_partial_redemption,
        }
    }

    /// Debits the balance for a merchant redemption.
    ///
    /// Runs entirely under the row lock: redeemability check, guard, balance
    /// write, ledger entry, and redemption record commit together. When two
    /// redemptions race, the second observes the committed balance of the
    /// first.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::CardNotRedeemable`] - cancelled, fully redeemed, or expired.
    /// - [`LedgerError::InvalidAmount`] - amount is zero or negative.
    /// - [`LedgerError::InsufficientBalance`] - amount exceeds the balance.
    /// - [`LedgerError::PartialRedemptionNotAllowed`] - card requires redeeming
    ///   the exact balance in one debit.
    /// - [`LedgerError::ConcurrencyConflict`] - row lock wait exhausted.
    #[allow(clippy::too_many_arguments)]
    pub fn redeem(
        &self,
        redemption_id: RedemptionId,
        amount: Decimal,
        merchant_id: MerchantId,
        method: RedemptionMethod,
        location: Option<String>,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Redemption, LedgerError> {
        let mut data = self.lock()?;

        match data.status(now) {
            GiftCardStatus::Active => {}
            GiftCardStatus::Cancelled => {
                return Err(LedgerError::CardNotRedeemable(CardBlock::Cancelled));
            }
            GiftCardStatus::Redeemed => {
                return Err(LedgerError::CardNotRedeemable(CardBlock::FullyRedeemed));
            }
            GiftCardStatus::Expired => {
                return Err(LedgerError::CardNotRedeemable(CardBlock::Expired));
            }
        }

        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        if amount > data.balance {
            return Err(LedgerError::InsufficientBalance);
        }
        if !data.allow_partial_redemption && amount != data.balance {
            return Err(LedgerError::PartialRedemptionNotAllowed);
        }

        let entry = data.commit(
            EntryKind::Redemption {
                redemption_id,
                merchant_id,
            },
            amount,
            now,
        )?;
        let (balance_before, balance_after) = (entry.balance_before, entry.balance_after);

        Ok(Redemption {
            id: redemption_id,
            gift_card_id: data.id,
            merchant_id,
            amount,
            balance_before,
            balance_after,
            method,
            location,
            notes,
            created_at: now,
        })
    }

    /// Re-credits refunded value, invoking the gateway while the row is locked.
    ///
    /// The requested amount is validated against the headroom
    /// (`value - written_off - balance`) per the policy, the external refund
    /// is issued through `gateway_call`, and only then is the balance
    /// mutated. A gateway failure leaves the card untouched.
    ///
    /// Returns the gateway reference, the amount actually credited, and the
    /// new balance.
    pub fn refund(
        &self,
        payment_id: PaymentId,
        requested: Decimal,
        policy: RefundPolicy,
        now: DateTime<Utc>,
        gateway_call: impl FnOnce(Decimal) -> Result<RefundRef, GatewayError>,
    ) -> Result<(RefundRef, Decimal, Decimal), LedgerError> {
        let mut data = self.lock()?;

        if requested <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        let headroom = data.value - data.written_off - data.balance;
        let credited = match policy {
            RefundPolicy::Strict if requested > headroom => {
                return Err(LedgerError::RefundExceedsAvailableBalance);
            }
            RefundPolicy::Strict => requested,
            RefundPolicy::CapToHeadroom => requested.min(headroom),
        };
        if credited <= Decimal::ZERO {
            return Err(LedgerError::RefundExceedsAvailableBalance);
        }

        // External call before any local mutation; the held lock keeps the
        // headroom stable until commit.
        let refund_ref = gateway_call(credited).map_err(|_| LedgerError::GatewayUnavailable)?;

        let entry = data.commit(EntryKind::Refund { payment_id }, credited, now)?;
        Ok((refund_ref, credited, entry.balance_after))
    }

    /// Writes off value for a lost chargeback, capped at the remaining balance.
    ///
    /// Returns the amount actually written off; zero means the balance was
    /// already empty and no entry was appended.
    pub fn charge_back(
        &self,
        chargeback_id: ChargebackId,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Decimal, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        let mut data = self.lock()?;
        let write_off = amount.min(data.balance);
        if write_off > Decimal::ZERO {
            data.commit(EntryKind::Chargeback { chargeback_id }, write_off, now)?;
        }
        Ok(write_off)
    }

    /// Recognizes breakage if the card is past expiry plus the grace period.
    ///
    /// Idempotent per card: a prior BREAKAGE entry means the liability was
    /// already released, and `None` is returned. Cancelled cards and cards
    /// with no expiry are never eligible.
    pub fn recognize_breakage(
        &self,
        grace: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<BreakageWriteOff>, LedgerError> {
        let mut data = self.lock()?;
        if !breakage_eligible(&data, grace, now) {
            return Ok(None);
        }
        let amount = data.balance;
        data.commit(EntryKind::Breakage, amount, now)?;
        Ok(Some(BreakageWriteOff {
            gift_card_id: data.id,
            code: data.code.clone(),
            amount,
            currency: data.currency.clone(),
            recognized_at: now,
        }))
    }

    /// Unredeemed value that would be recognized as breakage right now.
    pub fn breakage_liability(&self, grace: Duration, now: DateTime<Utc>) -> Option<Decimal> {
        let data = self.inner.lock();
        breakage_eligible(&data, grace, now).then_some(data.balance)
    }

    /// Soft-cancels the card; ledger entries referencing it remain intact.
    pub fn cancel(&self) -> Result<(), LedgerError> {
        self.lock()?.cancelled = true;
        Ok(())
    }
}

fn breakage_eligible(data: &CardData, grace: Duration, now: DateTime<Utc>) -> bool {
    if data.cancelled || data.balance == Decimal::ZERO {
        return false;
    }
    let Some(expiry) = data.expiry_date else {
        return false;
    };
    if now <= expiry + grace {
        return false;
    }
    // One BREAKAGE entry per card, ever.
    !data
        .entries
        .iter()
        .any(|e| matches!(e.kind, EntryKind::Breakage))
}
