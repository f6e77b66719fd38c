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

//! Concurrency tests using parking_lot's built-in deadlock detector.
//!
//! These tests verify that the row-lock patterns used by the engine do not
//! lead to deadlocks, and that racing balance operations serialize correctly:
//! no amount is ever lost or double-counted.

use chrono::Utc;
use giftcard_ledger_rs::{
    CardCode, CardSpec, Currency, Engine, LedgerError, MerchantId, PaymentMethod, PaymentRequest,
    RedeemRequest,
};
use parking_lot::deadlock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

// === Deadlock Detection Infrastructure ===

/// Starts a background thread that checks for deadlocks.
/// Returns a handle to stop the detector.
fn start_deadlock_detector() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();

    thread::spawn(move || {
        while running_clone.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
            let deadlocks = deadlock::check_deadlock();
            if !deadlocks.is_empty() {
                eprintln!("\n=== DEADLOCK DETECTED ===");
                for (i, threads) in deadlocks.iter().enumerate() {
                    eprintln!("\nDeadlock #{}", i + 1);
                    for t in threads {
                        eprintln!("Thread ID: {:?}", t.thread_id());
                        eprintln!("Backtrace:\n{:#?}", t.backtrace());
                    }
                }
                panic!("Deadlock detected! See output above for details.");
            }
        }
    });

    running
}

/// Stops the deadlock detector.
fn stop_deadlock_detector(running: Arc<AtomicBool>) {
    running.store(false, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(150)); // Let detector thread exit
}

// === Helpers ===

fn purchase(engine: &Engine, intent: &str, code: &str, amount: Decimal) {
    engine
        .record_pending_payment(
            PaymentRequest {
                payment_intent_id: intent.to_string(),
                amount,
                currency: Currency::new("USD"),
                method: PaymentMethod::Card,
                customer_id: None,
                card: CardSpec {
                    code: CardCode::new(code),
                    allow_partial_redemption: true,
                    expiry_date: None,
                },
            },
            Utc::now(),
        )
        .unwrap();
    engine.confirm_payment(intent, Utc::now()).unwrap();
}

// === Tests ===

/// Two redemptions racing for a balance that only covers one.
///
/// A card holding 100.00 sees N concurrent 60.00 debits: exactly one must
/// win, the rest must fail against the committed balance.
#[test]
fn racing_redemptions_admit_exactly_one_winner() {
    let detector = start_deadlock_detector();
    let engine = Arc::new(Engine::new());
    purchase(&engine, "pi_1", "GC-RACE", dec!(100.00));

    const NUM_THREADS: usize = 16;
    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            let engine = engine.clone();
            thread::spawn(move || {
                engine
                    .redeem(
                        RedeemRequest::new("GC-RACE", dec!(60.00), MerchantId(1)),
                        Utc::now(),
                    )
                    .is_ok()
            })
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|h| h.join().expect("Thread panicked"))
        .filter(|won| *won)
        .count();

    stop_deadlock_detector(detector);

    assert_eq!(winners, 1, "Exactly one 60.00 debit fits a 100.00 balance");
    let card = engine.get_card("GC-RACE").unwrap();
    assert_eq!(card.balance(), dec!(40.00));
    assert_eq!(card.entries().len(), 2); // purchase + the single redemption
}

/// Concurrent confirmations of the same payment intent create one card.
#[test]
fn racing_confirmations_create_one_card() {
    let detector = start_deadlock_detector();
    let engine = Arc::new(Engine::new());
    engine
        .record_pending_payment(
            PaymentRequest {
                payment_intent_id: "pi_dup".to_string(),
                amount: dec!(50.00),
                currency: Currency::new("USD"),
                method: PaymentMethod::Card,
                customer_id: None,
                card: CardSpec {
                    code: CardCode::new("GC-DUP"),
                    allow_partial_redemption: true,
                    expiry_date: None,
                },
            },
            Utc::now(),
        )
        .unwrap();

    const NUM_THREADS: usize = 16;
    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            let engine = engine.clone();
            thread::spawn(move || engine.confirm_payment("pi_dup", Utc::now()))
        })
        .collect();

    for handle in handles {
        // Every delivery succeeds; confirmation is idempotent.
        handle.join().expect("Thread panicked").unwrap();
    }

    stop_deadlock_detector(detector);

    assert_eq!(engine.card_count(), 1);
    assert_eq!(engine.ledger("GC-DUP").unwrap().len(), 1);
    assert_eq!(engine.get_card("GC-DUP").unwrap().balance(), dec!(50.00));
}

/// Concurrent retries sharing one idempotency key debit once.
#[test]
fn racing_idempotency_key_retries_debit_once() {
    let detector = start_deadlock_detector();
    let engine = Arc::new(Engine::new());
    purchase(&engine, "pi_1", "GC-KEY", dec!(100.00));

    const NUM_THREADS: usize = 16;
    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            let engine = engine.clone();
            thread::spawn(move || {
                engine.redeem(
                    RedeemRequest::new("GC-KEY", dec!(10.00), MerchantId(1))
                        .idempotency_key("rk_shared"),
                    Utc::now(),
                )
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("Thread panicked"))
        .collect();

    stop_deadlock_detector(detector);

    // Losers either replay the stored outcome or observe the original still
    // in flight; none of them debit a second time.
    for result in &results {
        match result {
            Ok(outcome) => assert_eq!(outcome.new_balance, dec!(90.00)),
            Err(err) => assert_eq!(*err, LedgerError::ConcurrencyConflict),
        }
    }
    assert_eq!(engine.get_card("GC-KEY").unwrap().balance(), dec!(90.00));
}

/// High contention on a single card with mixed reads and writes.
#[test]
fn no_deadlock_high_contention_single_card() {
    let detector = start_deadlock_detector();
    let engine = Arc::new(Engine::new());
    purchase(&engine, "pi_1", "GC-HOT", dec!(10000.00));

    const NUM_THREADS: usize = 50;
    const OPS_PER_THREAD: usize = 100;

    let mut handles = Vec::with_capacity(NUM_THREADS);
    for _ in 0..NUM_THREADS {
        let engine = engine.clone();
        handles.push(thread::spawn(move || {
            for i in 0..OPS_PER_THREAD {
                if i % 3 == 0 {
                    let _ = engine.redeem(
                        RedeemRequest::new("GC-HOT", dec!(1.00), MerchantId(1)),
                        Utc::now(),
                    );
                } else {
                    // Read operations
                    let _ = engine.validate_gift_card("GC-HOT", Utc::now());
                    if let Some(card) = engine.get_card("GC-HOT") {
                        let _ = card.balance();
                        let _ = card.written_off();
                    }
                }
            }
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    // Every successful 1.00 debit is accounted for.
    let card = engine.get_card("GC-HOT").unwrap();
    let debits = Decimal::from(card.entries().len() as u64 - 1);
    assert_eq!(card.balance(), dec!(10000.00) - debits);
    println!(
        "High contention test passed: {} threads × {} ops",
        NUM_THREADS, OPS_PER_THREAD
    );
}

/// Operations across many cards proceed in parallel without deadlock.
#[test]
fn no_deadlock_cross_card_operations() {
    let detector = start_deadlock_detector();
    let engine = Arc::new(Engine::new());

    const NUM_CARDS: usize = 10;
    const NUM_THREADS: usize = 20;
    const OPS_PER_THREAD: usize = 50;

    for i in 0..NUM_CARDS {
        purchase(&engine, &format!("pi_{i}"), &format!("GC-{i}"), dec!(1000.00));
    }

    let mut handles = Vec::with_capacity(NUM_THREADS);
    for thread_id in 0..NUM_THREADS {
        let engine = engine.clone();
        handles.push(thread::spawn(move || {
            for i in 0..OPS_PER_THREAD {
                let code = format!("GC-{}", (thread_id + i) % NUM_CARDS);
                let _ = engine.redeem(
                    RedeemRequest::new(code.as_str(), dec!(0.50), MerchantId(1)),
                    Utc::now(),
                );

                // Also read a different card
                let other = format!("GC-{}", (thread_id + i + 1) % NUM_CARDS);
                let _ = engine.validate_gift_card(&other, Utc::now());
            }
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    // Replay holds for every card afterwards.
    for i in 0..NUM_CARDS {
        let card = engine.get_card(format!("GC-{i}").as_str()).unwrap();
        assert_eq!(
            giftcard_ledger_rs::replay(&card.entries()),
            card.balance()
        );
    }
    println!("Cross-card test passed: {} cards, {} threads", NUM_CARDS, NUM_THREADS);
}

/// Refund and redemption racing for the same card stay consistent.
#[test]
fn no_deadlock_refund_vs_redemption() {
    let detector = start_deadlock_detector();
    let engine = Arc::new(Engine::new());
    purchase(&engine, "pi_1", "GC-MIX", dec!(1000.00));
    let payment = engine.get_payment("pi_1").unwrap();

    const NUM_THREADS: usize = 20;
    let mut handles = Vec::with_capacity(NUM_THREADS);

    for thread_id in 0..NUM_THREADS {
        let engine = engine.clone();
        let payment_id = payment.id;
        handles.push(thread::spawn(move || {
            for _ in 0..20 {
                if thread_id % 2 == 0 {
                    let _ = engine.redeem(
                        RedeemRequest::new("GC-MIX", dec!(2.00), MerchantId(1)),
                        Utc::now(),
                    );
                } else {
                    let _ = engine.refund(payment_id, Some(dec!(1.00)), None, Utc::now());
                }
            }
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    let card = engine.get_card("GC-MIX").unwrap();
    assert!(card.balance() >= Decimal::ZERO);
    assert!(card.balance() <= dec!(1000.00));
    assert_eq!(giftcard_ledger_rs::replay(&card.entries()), card.balance());
}

/// Concurrent breakage jobs write off each card at most once.
#[test]
fn no_deadlock_concurrent_breakage_jobs() {
    let detector = start_deadlock_detector();
    let engine = Arc::new(Engine::new());
    let now = Utc::now();

    const NUM_CARDS: usize = 20;
    for i in 0..NUM_CARDS {
        engine
            .record_pending_payment(
                PaymentRequest {
                    payment_intent_id: format!("pi_{i}"),
                    amount: dec!(50.00),
                    currency: Currency::new("USD"),
                    method: PaymentMethod::Card,
                    customer_id: None,
                    card: CardSpec {
                        code: CardCode::new(format!("GC-{i}")),
                        allow_partial_redemption: true,
                        expiry_date: Some(now - chrono::Duration::days(100)),
                    },
                },
                now - chrono::Duration::days(400),
            )
            .unwrap();
        engine
            .confirm_payment(&format!("pi_{i}"), now - chrono::Duration::days(400))
            .unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let engine = engine.clone();
        handles.push(thread::spawn(move || {
            let _ = engine.recognize_breakage(90, Utc::now());
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    // Each card holds exactly one BREAKAGE entry and a zero balance.
    for i in 0..NUM_CARDS {
        let card = engine.get_card(format!("GC-{i}").as_str()).unwrap();
        assert_eq!(card.balance(), Decimal::ZERO);
        assert_eq!(card.entries().len(), 2);
        assert_eq!(card.written_off(), dec!(50.00));
    }
    println!("Breakage race test passed: {} cards", NUM_CARDS);
}
