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

//! Breakage liability reporting.
//!
//! Breakage is unredeemed value on cards that expired longer than the grace
//! period ago. The report is a pure read; actually releasing the liability
//! (one BREAKAGE entry per card, ever) goes through
//! [`Engine::recognize_breakage`](crate::Engine::recognize_breakage).

use crate::base::GiftCardId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One card's share of the breakage liability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakageLine {
    pub gift_card_id: GiftCardId,
    pub unredeemed: Decimal,
}

/// Read-only liability report for a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakageReport {
    pub as_of: DateTime<Utc>,
    pub grace_days: i64,
    pub lines: Vec<BreakageLine>,
    /// Sum of all unredeemed value past the grace period.
    pub total: Decimal,
}

impl BreakageReport {
    pub fn new(as_of: DateTime<Utc>, grace_days: i64, mut lines: Vec<BreakageLine>) -> Self {
        // Stable output order for reporting.
        lines.sort_by_key(|line| line.gift_card_id);
        let total = lines.iter().map(|line| line.unredeemed).sum();
        Self {
            as_of,
            grace_days,
            lines,
            total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn report_totals_and_sorts_lines() {
        let report = BreakageReport::new(
            Utc::now(),
            90,
            vec![
                BreakageLine {
                    gift_card_id: GiftCardId(3),
                    unredeemed: dec!(5.00),
                },
                BreakageLine {
                    gift_card_id: GiftCardId(1),
                    unredeemed: dec!(20.00),
                },
            ],
        );
        assert_eq!(report.total, dec!(25.00));
        assert_eq!(report.lines[0].gift_card_id, GiftCardId(1));
    }

    #[test]
    fn empty_report_is_zero() {
        let report = BreakageReport::new(Utc::now(), 90, Vec::new());
        assert_eq!(report.total, Decimal::ZERO);
        assert!(report.lines.is_empty());
    }
}
