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

use chrono::Utc;
use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use giftcard_ledger_rs::{
    CardCode, CardSpec, ChargebackResolution, Currency, Engine, MerchantId, PaymentMethod,
    PaymentRequest, RedeemRequest,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;

/// Gift-Card Ledger - Process gift card event CSV files
///
/// Reads gift card events from a CSV file and outputs card states to stdout.
/// Supports purchases, redemptions, refunds, chargebacks, and cancellations.
#[derive(Parser, Debug)]
#[command(name = "giftcard-ledger-rs")]
#[command(about = "A gift-card ledger that processes event CSVs", long_about = None)]
struct Args {
    /// Path to CSV file with gift card events
    ///
    /// Expected format: type,card,amount,currency,reference,merchant
    /// Example: cargo run -- events.csv > cards.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,
}

fn main() {
    let args = Args::parse();

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let engine = match process_events(BufReader::new(file)) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error processing events: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = write_cards(&engine, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `type, card, amount, currency, reference, merchant`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(rename = "type")]
    event_type: String,
    card: Option<String>,
    #[serde(deserialize_with = "csv::invalid_option")]
    amount: Option<Decimal>,
    currency: Option<String>,
    reference: Option<String>,
    #[serde(deserialize_with = "csv::invalid_option")]
    merchant: Option<u32>,
}

/// A single gift card event parsed from one CSV row.
#[derive(Debug)]
enum Event {
    /// Record a pending payment and confirm it, issuing the card.
    Purchase {
        code: String,
        amount: Decimal,
        currency: String,
        intent: String,
    },
    /// Debit the card at a merchant.
    Redeem {
        code: String,
        amount: Decimal,
        merchant: u32,
    },
    /// Refund the payment identified by its intent reference.
    Refund {
        intent: String,
        amount: Option<Decimal>,
    },
    /// Mark a pending payment failed.
    Fail { intent: String },
    /// Open and lose a dispute against the payment.
    Chargeback { intent: String, amount: Decimal },
    /// Soft-cancel the card.
    Cancel { code: String },
}

impl CsvRecord {
    /// Converts the CSV record to an event.
    ///
    /// Returns `None` for unknown event types or missing required fields.
    fn into_event(self) -> Option<Event> {
        match self.event_type.to_lowercase().as_str() {
            "purchase" => Some(Event::Purchase {
                code: self.card?,
                amount: self.amount?,
                currency: self.currency.filter(|c| !c.is_empty())?,
                intent: self.reference?,
            }),
            "redeem" => Some(Event::Redeem {
                code: self.card?,
                amount: self.amount?,
                merchant: self.merchant?,
            }),
            "refund" => Some(Event::Refund {
                intent: self.reference?,
                amount: self.amount,
            }),
            "fail" => Some(Event::Fail {
                intent: self.reference?,
            }),
            "chargeback" => Some(Event::Chargeback {
                intent: self.reference?,
                amount: self.amount?,
            }),
            "cancel" => Some(Event::Cancel { code: self.card? }),
            _ => None,
        }
    }
}

fn apply_event(engine: &Engine, event: Event) -> Result<(), giftcard_ledger_rs::LedgerError> {
    let now = Utc::now();
    match event {
        Event::Purchase {
            code,
            amount,
            currency,
            intent,
        } => {
            engine.record_pending_payment(
                PaymentRequest {
                    payment_intent_id: intent.clone(),
                    amount,
                    currency: Currency::new(currency),
                    method: PaymentMethod::Card,
                    customer_id: None,
                    card: CardSpec {
                        code: CardCode::new(code),
                        allow_partial_redemption: true,
                        expiry_date: None,
                    },
                },
                now,
            )?;
            engine.confirm_payment(&intent, now)?;
        }
        Event::Redeem {
            code,
            amount,
            merchant,
        } => {
            engine.redeem(
                RedeemRequest::new(code.as_str(), amount, MerchantId(merchant)),
                now,
            )?;
        }
        Event::Refund { intent, amount } => {
            let payment = engine
                .get_payment(&intent)
                .ok_or(giftcard_ledger_rs::LedgerError::NotFound)?;
            engine.refund(payment.id, amount, None, now)?;
        }
        Event::Fail { intent } => {
            engine.fail_payment(&intent, "reported by gateway", now)?;
        }
        Event::Chargeback { intent, amount } => {
            let payment = engine
                .get_payment(&intent)
                .ok_or(giftcard_ledger_rs::LedgerError::NotFound)?;
            let chargeback = engine.open_chargeback(
                payment.id,
                format!("cb-{intent}"),
                amount,
                Decimal::ZERO,
                None,
                now,
            )?;
            engine.resolve_chargeback(chargeback.id, ChargebackResolution::Lost, now)?;
        }
        Event::Cancel { code } => {
            engine.cancel_card(code.as_str())?;
        }
    }
    Ok(())
}

/// Process gift card events from a CSV reader.
///
/// This function uses streaming parsing to handle arbitrarily large CSV files
/// without loading the entire file into memory. Malformed rows and invalid
/// events are silently skipped.
///
/// # CSV Format
///
/// Expected columns: `type, card, amount, currency, reference, merchant`
/// - `type`: Event type (purchase, redeem, refund, fail, chargeback, cancel)
/// - `card`: Gift card code (purchase, redeem, cancel)
/// - `amount`: Decimal amount (optional for refund; full remaining amount)
/// - `currency`: ISO currency code (purchase only)
/// - `reference`: Payment intent reference (purchase, refund, fail, chargeback)
/// - `merchant`: Merchant ID (redeem only)
///
/// # Example
///
/// ```csv
/// type,card,amount,currency,reference,merchant
/// purchase,GC-1,100.00,USD,pi_1,
/// redeem,GC-1,25.00,,,7
/// refund,,10.00,,pi_1,
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
/// Individual event errors are logged in debug mode but don't stop processing.
pub fn process_events<R: Read>(reader: R) -> Result<Engine, csv::Error> {
    let engine = Engine::new();

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for result in rdr.deserialize::<CsvRecord>() {
        match result {
            Ok(record) => {
                let Some(event) = record.into_event() else {
                    #[cfg(debug_assertions)]
                    eprintln!("Skipping invalid event record");
                    continue;
                };

                // Process event, ignoring errors (silent failure)
                if let Err(_e) = apply_event(&engine, event) {
                    #[cfg(debug_assertions)]
                    eprintln!("Skipping event: {}", _e);
                }
            }
            Err(e) => {
                // Skip malformed rows
                #[cfg(debug_assertions)]
                eprintln!("Skipping malformed row: {}", e);
                continue;
            }
        }
    }

    Ok(engine)
}

/// Write card states to a CSV writer.
///
/// Outputs all cards in CSV format with 2 decimal precision, sorted by
/// card id (issue order).
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_cards<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    for summary in engine.card_summaries(Utc::now()) {
        wtr.serialize(&summary)?;
    }

    wtr.flush()?;
    Ok(())
}
