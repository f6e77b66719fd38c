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

//! Thread-safe idempotency-key log.
//!
//! Maps external reference strings (payment intent ids, redemption
//! idempotency keys, chargeback references) to internal ids with atomic
//! check-and-insert, while preserving first-seen order for audit.

use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// A concurrent key registry with duplicate detection.
///
/// Combines a [`DashMap`] for O(1) duplicate checking with a [`SegQueue`]
/// preserving insertion order. All operations are safe for concurrent
/// access.
#[derive(Debug)]
pub struct IntentLog<T> {
    /// Keys mapped to the internal id they first resolved to.
    entries: DashMap<String, T>,

    /// Keys in first-seen order.
    order: SegQueue<String>,
}

impl<T: Copy> IntentLog<T> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            order: SegQueue::new(),
        }
    }

    /// Registers a key atomically.
    ///
    /// Returns `Err` with the previously registered value if the key was
    /// already present; the caller decides whether that is a replay or a
    /// conflict.
    pub fn register(&self, key: &str, value: T) -> Result<(), T> {
        // Entry API for atomic check-and-insert to prevent races between
        // concurrent registrations of the same key.
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(existing) => Err(*existing.get()),
            Entry::Vacant(slot) => {
                slot.insert(value);
                self.order.push(key.to_string());
                Ok(())
            }
        }
    }

    /// Looks up a previously registered key.
    pub fn get(&self, key: &str) -> Option<T> {
        self.entries.get(key).map(|entry| *entry.value())
    }

    /// Withdraws a registration whose guarded operation failed, freeing the
    /// key for a retry.
    pub fn withdraw(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: Copy> Default for IntentLog<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn register_rejects_duplicates_with_original_value() {
        let log = IntentLog::new();
        log.register("pi_1", 1u64).unwrap();
        assert_eq!(log.register("pi_1", 2u64), Err(1));
        assert_eq!(log.get("pi_1"), Some(1));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn concurrent_registration_admits_exactly_one() {
        let log = Arc::new(IntentLog::new());
        let handles: Vec<_> = (0..16u64)
            .map(|i| {
                let log = Arc::clone(&log);
                thread::spawn(move || log.register("pi_race", i).is_ok())
            })
            .collect();

        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(successes, 1);
        assert_eq!(log.len(), 1);
    }
}
