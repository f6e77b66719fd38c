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

//! Gift-card ledger engine.
//!
//! The [`Engine`] owns the card, payment, redemption, and chargeback stores
//! and exposes the value-changing operations: payment confirmation,
//! redemption, refund, chargeback resolution, and breakage recognition.
//!
//! # Serialization model
//!
//! Each gift card and payment is a mutex-guarded row inside a [`DashMap`].
//! All balance-affecting operations on one card serialize on its row lock;
//! operations on different cards proceed fully in parallel. The ledger log
//! lives inside the card row, so a balance write and its entry commit
//! atomically. Row locks use a bounded wait and surface
//! [`LedgerError::ConcurrencyConflict`] on exhaustion.
//!
//! # Idempotency
//!
//! Payment confirmation is keyed on the external `payment_intent_id` and is
//! safe to retry or duplicate-deliver. Redemption debits anew on every call
//! unless the caller supplies an idempotency key on the request.

use crate::base::{ChargebackId, GiftCardId, PaymentId, RedemptionId};
use crate::breakage::{BreakageLine, BreakageReport};
use crate::card::{BreakageWriteOff, CardSummary, GiftCard, RefundPolicy};
use crate::chargeback::{Chargeback, ChargebackResolution};
use crate::entry::LedgerEntry;
use crate::error::LedgerError;
use crate::gateway::{NoopGateway, PaymentGateway};
use crate::intent_log::IntentLog;
use crate::payment::{Payment, PaymentRequest, PaymentStatus, RefundOutcome};
use crate::redemption::{CardRef, RedeemOutcome, RedeemRequest, Redemption};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Bounded wait for payment and chargeback row locks.
const ROW_LOCK_WAIT: std::time::Duration = std::time::Duration::from_millis(500);

/// Gift-card ledger engine.
///
/// # Invariants
///
/// - Cards are created only by payment confirmation, exactly once per
///   external payment intent.
/// - Every balance change appends exactly one ledger entry under the card's
///   row lock; replaying a card's log reconstructs its balance.
/// - `0 <= balance` and `balance + written_off <= value` for every card at
///   all times.
/// - Chargebacks resolve one way; a resolved dispute never changes again.
pub struct Engine {
    /// Card rows indexed by id; the only shared mutable resource.
    cards: DashMap<GiftCardId, Arc<GiftCard>>,
    /// Case-insensitive code lookup (codes are stored normalized).
    codes_to_cards: DashMap<String, GiftCardId>,
    payments: DashMap<PaymentId, Arc<Mutex<Payment>>>,
    /// Payment intent registry: confirmation idempotency and uniqueness.
    payment_intents: IntentLog<PaymentId>,
    /// Card codes reserved at purchase time.
    reserved_codes: IntentLog<PaymentId>,
    redemptions: DashMap<RedemptionId, Redemption>,
    /// Client-supplied redemption idempotency keys.
    redemption_keys: IntentLog<RedemptionId>,
    chargebacks: DashMap<ChargebackId, Arc<Mutex<Chargeback>>>,
    /// External chargeback references, for duplicate dispute notifications.
    chargeback_refs: IntentLog<ChargebackId>,
    gateway: Box<dyn PaymentGateway>,
    refund_policy: RefundPolicy,
    next_card_id: AtomicU64,
    next_payment_id: AtomicU64,
    next_redemption_id: AtomicU64,
    next_chargeback_id: AtomicU64,
}

impl Engine {
    /// Creates an engine with the no-op gateway and the strict refund policy.
    pub fn new() -> Self {
        Self::with_gateway(Box::new(NoopGateway))
    }

    /// Creates an engine issuing refunds through the given gateway.
    pub fn with_gateway(gateway: Box<dyn PaymentGateway>) -> Self {
        Self {
            cards: DashMap::new(),
            codes_to_cards: DashMap::new(),
            payments: DashMap::new(),
            payment_intents: IntentLog::new(),
            reserved_codes: IntentLog::new(),
            redemptions: DashMap::new(),
            redemption_keys: IntentLog::new(),
            chargebacks: DashMap::new(),
            chargeback_refs: IntentLog::new(),
            gateway,
            refund_policy: RefundPolicy::Strict,
            next_card_id: AtomicU64::new(1),
            next_payment_id: AtomicU64::new(1),
            next_redemption_id: AtomicU64::new(1),
            next_chargeback_id: AtomicU64::new(1),
        }
    }

    /// Sets how refunds exceeding the re-creditable headroom are handled.
    pub fn with_refund_policy(mut self, policy: RefundPolicy) -> Self {
        self.refund_policy = policy;
        self
    }

    // === Lookup ===

    fn card_by_ref(&self, card: &CardRef) -> Result<Arc<GiftCard>, LedgerError> {
        let id = match card {
            CardRef::Id(id) => *id,
            CardRef::Code(code) => self
                .codes_to_cards
                .get(code.as_str())
                .map(|entry| *entry.value())
                .ok_or(LedgerError::NotFound)?,
        };
        self.cards
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LedgerError::NotFound)
    }

    fn payment_by_id(&self, id: PaymentId) -> Result<Arc<Mutex<Payment>>, LedgerError> {
        self.payments
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LedgerError::NotFound)
    }

    fn lock_row<'a, T>(&self, row: &'a Mutex<T>) -> Result<MutexGuard<'a, T>, LedgerError> {
        row.try_lock_for(ROW_LOCK_WAIT)
            .ok_or(LedgerError::ConcurrencyConflict)
    }

    // === Validation ===

    /// Snapshot of a card for validation responses.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - no card matches the code.
    pub fn validate_gift_card(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<CardSummary, LedgerError> {
        let card = self.card_by_ref(&CardRef::from(code))?;
        Ok(card.summary(now))
    }

    // === Redemption ===

    /// Debits a card for a merchant redemption.
    ///
    /// The debit, its ledger entry, and the redemption record commit under
    /// the card's row lock. When two redemptions race for the same card,
    /// exactly one observes the pre-image balance; the loser fails against
    /// the committed balance (or succeeds partially where allowed). No
    /// amount is ever lost or double-counted.
    ///
    /// With an idempotency key on the request, a retried call replays the
    /// original outcome without a second debit.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - unknown card code or id.
    /// - [`LedgerError::CardNotRedeemable`] - expired, cancelled, or fully redeemed.
    /// - [`LedgerError::InvalidAmount`] - amount is zero or negative.
    /// - [`LedgerError::InsufficientBalance`] - amount exceeds the balance.
    /// - [`LedgerError::PartialRedemptionNotAllowed`] - card requires an exact-balance debit.
    /// - [`LedgerError::ConcurrencyConflict`] - row lock wait exhausted, or an
    ///   idempotent replay raced the original call before it committed.
    pub fn redeem(
        &self,
        request: RedeemRequest,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome, LedgerError> {
        let redemption_id = RedemptionId(self.next_redemption_id.fetch_add(1, Ordering::Relaxed));

        // Register the idempotency key before touching the balance so two
        // retries racing each other cannot both debit.
        if let Some(key) = &request.idempotency_key {
            if let Err(original) = self.redemption_keys.register(key, redemption_id) {
                return self
                    .redemptions
                    .get(&original)
                    .map(|r| RedeemOutcome::from_redemption(r.clone()))
                    .ok_or(LedgerError::ConcurrencyConflict);
            }
        }

        let result = self
            .card_by_ref(&request.card)
            .and_then(|card| {
                card.redeem(
                    redemption_id,
                    request.amount,
                    request.merchant_id,
                    request.method,
                    request.location.clone(),
                    request.notes.clone(),
                    now,
                )
            });

        match result {
            Ok(redemption) => {
                self.redemptions.insert(redemption_id, redemption.clone());
                Ok(RedeemOutcome::from_redemption(redemption))
            }
            Err(err) => {
                // The key only pins successful debits; a failed attempt may
                // be retried.
                if let Some(key) = &request.idempotency_key {
                    self.redemption_keys.withdraw(key);
                }
                Err(err)
            }
        }
    }

    // === Payment lifecycle ===

    /// Records a payment in `Pending`, reserving its intent reference and
    /// card code.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] - amount is zero or negative.
    /// - [`LedgerError::DuplicatePaymentIntent`] - intent reference already registered.
    /// - [`LedgerError::DuplicateCode`] - card code already reserved.
    pub fn record_pending_payment(
        &self,
        request: PaymentRequest,
        now: DateTime<Utc>,
    ) -> Result<Payment, LedgerError> {
        if request.amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }

        let payment_id = PaymentId(self.next_payment_id.fetch_add(1, Ordering::Relaxed));
        self.payment_intents
            .register(&request.payment_intent_id, payment_id)
            .map_err(|_| LedgerError::DuplicatePaymentIntent)?;
        if self
            .reserved_codes
            .register(request.card.code.as_str(), payment_id)
            .is_err()
        {
            self.payment_intents.withdraw(&request.payment_intent_id);
            return Err(LedgerError::DuplicateCode);
        }

        let payment = Payment::pending(payment_id, request, now);
        self.payments
            .insert(payment_id, Arc::new(Mutex::new(payment.clone())));
        Ok(payment)
    }

    /// Confirms a payment, creating its gift card exactly once.
    ///
    /// Keyed on the external intent reference: confirming an
    /// already-completed payment returns the stored row unchanged and
    /// appends nothing, which makes retried webhook deliveries safe.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - unknown intent reference.
    /// - [`LedgerError::PaymentAlreadyFailed`] - payment already failed (terminal).
    /// - [`LedgerError::ConcurrencyConflict`] - row lock wait exhausted.
    pub fn confirm_payment(
        &self,
        payment_intent_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Payment, LedgerError> {
        let payment_id = self
            .payment_intents
            .get(payment_intent_id)
            .ok_or(LedgerError::NotFound)?;
        let row = self.payment_by_id(payment_id)?;
        let mut payment = self.lock_row(&row)?;

        match payment.status {
            PaymentStatus::Completed
            | PaymentStatus::Refunded
            | PaymentStatus::PartiallyRefunded => return Ok(payment.clone()),
            PaymentStatus::Failed => return Err(LedgerError::PaymentAlreadyFailed),
            PaymentStatus::Pending => {}
        }

        let card_id = GiftCardId(self.next_card_id.fetch_add(1, Ordering::Relaxed));
        let card = GiftCard::issue(
            card_id,
            payment.card_spec.code.clone(),
            payment.amount,
            payment.currency.clone(),
            payment.card_spec.allow_partial_redemption,
            payment.card_spec.expiry_date,
            payment.id,
            now,
        )?;
        self.codes_to_cards
            .insert(payment.card_spec.code.as_str().to_string(), card_id);
        self.cards.insert(card_id, Arc::new(card));

        payment.gift_card_id = Some(card_id);
        payment.status = PaymentStatus::Completed;
        payment.updated_at = now;
        Ok(payment.clone())
    }

    /// Marks a pending payment failed. Terminal; no ledger entry, no card.
    ///
    /// Failing an already-failed payment is a no-op returning the stored row.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - unknown intent reference.
    /// - [`LedgerError::PaymentAlreadyCompleted`] - payment was already confirmed.
    /// - [`LedgerError::ConcurrencyConflict`] - row lock wait exhausted.
    pub fn fail_payment(
        &self,
        payment_intent_id: &str,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Payment, LedgerError> {
        let payment_id = self
            .payment_intents
            .get(payment_intent_id)
            .ok_or(LedgerError::NotFound)?;
        let row = self.payment_by_id(payment_id)?;
        let mut payment = self.lock_row(&row)?;

        match payment.status {
            PaymentStatus::Failed => Ok(payment.clone()),
            PaymentStatus::Pending => {
                payment.status = PaymentStatus::Failed;
                payment.failure_reason = Some(reason.into());
                payment.updated_at = now;
                Ok(payment.clone())
            }
            _ => Err(LedgerError::PaymentAlreadyCompleted),
        }
    }

    // === Refunds ===

    /// Refunds a completed payment, re-crediting the card.
    ///
    /// The amount defaults to the full remaining refundable total. The
    /// payment row stays locked across the gateway call, so concurrent
    /// refunds of one payment serialize; the card row is locked from
    /// validation through commit, so the re-creditable headroom cannot shift
    /// underneath the gateway call. A gateway failure leaves both rows
    /// untouched.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - unknown payment.
    /// - [`LedgerError::PaymentNotRefundable`] - payment not completed or already fully refunded.
    /// - [`LedgerError::InvalidAmount`] - explicit amount is zero or negative.
    /// - [`LedgerError::RefundExceedsAvailableBalance`] - amount exceeds the
    ///   payment's remaining refundable total, or (under the strict policy)
    ///   the card's re-creditable headroom.
    /// - [`LedgerError::GatewayUnavailable`] - gateway call failed; nothing mutated.
    /// - [`LedgerError::ConcurrencyConflict`] - row lock wait exhausted.
    pub fn refund(
        &self,
        payment_id: PaymentId,
        amount: Option<Decimal>,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<RefundOutcome, LedgerError> {
        let row = self.payment_by_id(payment_id)?;
        let mut payment = self.lock_row(&row)?;

        if !payment.is_refundable() {
            return Err(LedgerError::PaymentNotRefundable);
        }
        let requested = amount.unwrap_or_else(|| payment.remaining_refundable());
        if requested <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        if requested > payment.remaining_refundable() {
            return Err(LedgerError::RefundExceedsAvailableBalance);
        }

        let card_id = payment.gift_card_id.ok_or(LedgerError::NotFound)?;
        let card = self.card_by_ref(&CardRef::Id(card_id))?;

        let intent = payment.payment_intent_id.clone();
        let (refund_ref, credited, _new_balance) = card.refund(
            payment.id,
            requested,
            self.refund_policy,
            now,
            |credited| self.gateway.refund(&intent, credited),
        )?;

        payment.apply_refund(credited, now);
        if reason.is_some() {
            payment.last_refund_reason = reason;
        }
        Ok(RefundOutcome {
            refund_ref,
            amount: credited,
            payment_status: payment.status,
        })
    }

    // === Chargebacks ===

    /// Opens a dispute against a payment. No balance effect until resolution.
    ///
    /// Only settled payments can be disputed; a pending or failed payment has
    /// no card for a loss to write off against.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - unknown payment.
    /// - [`LedgerError::InvalidAmount`] - disputed amount is zero or negative.
    /// - [`LedgerError::PaymentNotDisputable`] - payment is pending or failed.
    /// - [`LedgerError::DuplicateChargeback`] - external reference already registered.
    /// - [`LedgerError::ConcurrencyConflict`] - row lock wait exhausted.
    pub fn open_chargeback(
        &self,
        payment_id: PaymentId,
        external_id: impl Into<String>,
        amount: Decimal,
        fee: Decimal,
        dispute_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Chargeback, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        {
            let payment_row = self.payment_by_id(payment_id)?;
            let payment = self.lock_row(&payment_row)?;
            if !payment.is_settled() {
                return Err(LedgerError::PaymentNotDisputable);
            }
        }

        let external_id = external_id.into();
        let chargeback_id = ChargebackId(self.next_chargeback_id.fetch_add(1, Ordering::Relaxed));
        self.chargeback_refs
            .register(&external_id, chargeback_id)
            .map_err(|_| LedgerError::DuplicateChargeback)?;

        let chargeback = Chargeback::open(
            chargeback_id,
            payment_id,
            amount,
            fee,
            external_id,
            dispute_id,
            now,
        );
        self.chargebacks
            .insert(chargeback_id, Arc::new(Mutex::new(chargeback.clone())));
        Ok(chargeback)
    }

    /// Resolves a dispute: `Won` and `Withdrawn` leave the ledger alone;
    /// `Lost` writes off up to the card's remaining balance via a CHARGEBACK
    /// entry. The fee stays a merchant-side figure on the chargeback row.
    ///
    /// The write-off commits before the status flips to terminal, so a failed
    /// write-off leaves the dispute pending and the resolution retryable.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - unknown chargeback.
    /// - [`LedgerError::ChargebackAlreadyResolved`] - dispute already terminal.
    /// - [`LedgerError::ConcurrencyConflict`] - row lock wait exhausted;
    ///   the dispute stays pending.
    pub fn resolve_chargeback(
        &self,
        chargeback_id: ChargebackId,
        resolution: ChargebackResolution,
        now: DateTime<Utc>,
    ) -> Result<Chargeback, LedgerError> {
        let row = self
            .chargebacks
            .get(&chargeback_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LedgerError::NotFound)?;
        let mut chargeback = self.lock_row(&row)?;
        if chargeback.status.is_terminal() {
            return Err(LedgerError::ChargebackAlreadyResolved);
        }

        if resolution == ChargebackResolution::Lost {
            let card_id = {
                let payment_row = self.payment_by_id(chargeback.payment_id)?;
                let payment = self.lock_row(&payment_row)?;
                payment.gift_card_id.ok_or(LedgerError::NotFound)?
            };
            let card = self.card_by_ref(&CardRef::Id(card_id))?;
            chargeback.written_off = card.charge_back(chargeback.id, chargeback.amount, now)?;
        }
        chargeback.resolve(resolution, now)?;

        Ok(chargeback.clone())
    }

    // === Cancellation ===

    /// Soft-cancels a card; its ledger history stays intact and the row is
    /// never deleted.
    pub fn cancel_card(&self, card: impl Into<CardRef>) -> Result<(), LedgerError> {
        self.card_by_ref(&card.into())?.cancel()
    }

    // === Breakage ===

    /// Read-only liability report: unredeemed value on cards expired longer
    /// than `grace_days` ago. Mutates nothing.
    pub fn breakage_report(&self, grace_days: i64, now: DateTime<Utc>) -> BreakageReport {
        let grace = Duration::days(grace_days);
        let lines = self
            .cards
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .breakage_liability(grace, now)
                    .map(|unredeemed| BreakageLine {
                        gift_card_id: *entry.key(),
                        unredeemed,
                    })
            })
            .collect();
        BreakageReport::new(now, grace_days, lines)
    }

    /// Idempotent batch: writes one BREAKAGE entry per eligible card,
    /// zeroing its balance. Cards already written off are skipped, so
    /// re-running the job recognizes nothing twice.
    pub fn recognize_breakage(
        &self,
        grace_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<BreakageWriteOff>, LedgerError> {
        let grace = Duration::days(grace_days);
        let mut write_offs = Vec::new();
        for entry in self.cards.iter() {
            if let Some(write_off) = entry.value().recognize_breakage(grace, now)? {
                write_offs.push(write_off);
            }
        }
        write_offs.sort_by_key(|w| w.gift_card_id);
        Ok(write_offs)
    }

    // === Audit reads ===

    /// Clones a card's append-only ledger log.
    pub fn ledger(&self, card: impl Into<CardRef>) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self.card_by_ref(&card.into())?.entries())
    }

    /// Retrieves a card row by code or id.
    pub fn get_card(&self, card: impl Into<CardRef>) -> Option<Arc<GiftCard>> {
        self.card_by_ref(&card.into()).ok()
    }

    /// Retrieves a payment snapshot by its external intent reference.
    pub fn get_payment(&self, payment_intent_id: &str) -> Option<Payment> {
        let payment_id = self.payment_intents.get(payment_intent_id)?;
        let row = self.payments.get(&payment_id)?;
        let payment = row.value().lock().clone();
        Some(payment)
    }

    /// Retrieves a redemption record.
    pub fn get_redemption(&self, id: RedemptionId) -> Option<Redemption> {
        self.redemptions.get(&id).map(|entry| entry.value().clone())
    }

    /// Snapshots every card for reporting, sorted by card id.
    pub fn card_summaries(&self, now: DateTime<Utc>) -> Vec<CardSummary> {
        let mut cards: Vec<_> = self
            .cards
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        cards.sort_by_key(|(id, _)| *id);
        cards.into_iter().map(|(_, card)| card.summary(now)).collect()
    }

    /// Number of cards issued.
    pub fn card_count(&self) -> usize {
        self.cards.len()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
