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

//! External payment gateway seam.
//!
//! The core never speaks a gateway wire protocol. Refunds go through the
//! [`PaymentGateway`] trait; implementations own timeouts and retries, and
//! any error maps to `GatewayUnavailable` with no local mutation.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reference returned by the gateway for an issued refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefundRef(String);

impl RefundRef {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RefundRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Gateway call failures. All of them leave the ledger untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway call timed out")]
    Timeout,

    #[error("gateway unreachable")]
    Unreachable,

    #[error("gateway declined: {0}")]
    Declined(String),
}

/// Issues monetary refunds against the original payment intent.
pub trait PaymentGateway: Send + Sync {
    /// Refunds `amount` against the payment identified by `payment_intent_id`.
    ///
    /// Must be bounded by an explicit timeout in the implementation; the
    /// ledger blocks the affected rows for the duration of this call.
    fn refund(&self, payment_intent_id: &str, amount: Decimal) -> Result<RefundRef, GatewayError>;
}

/// Gateway that acknowledges every refund without an external call.
///
/// Used by the CLI batch processor and the demo server, where the monetary
/// leg is settled elsewhere.
#[derive(Debug, Default)]
pub struct NoopGateway;

impl PaymentGateway for NoopGateway {
    fn refund(&self, payment_intent_id: &str, _amount: Decimal) -> Result<RefundRef, GatewayError> {
        Ok(RefundRef::new(format!("noop-{payment_intent_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn noop_gateway_echoes_intent() {
        let gateway = NoopGateway;
        let refund = gateway.refund("pi_123", dec!(10.00)).unwrap();
        assert_eq!(refund.as_str(), "noop-pi_123");
    }
}
