// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Booking Escrow Contributors
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

//! Wallet balances.
//!
//! A wallet holds an available balance and a pending (escrow) balance,
//! both integers. Every check-then-mutate runs as a single conditional
//! mutation under the wallet's own mutex, so concurrent callers can
//! never both pass a stale balance check. Wallets are only ever mutated
//! through the [`Ledger`](crate::ledger::Ledger).

use crate::base::{EntryId, UserId};
use crate::error::EngineError;
use parking_lot::{Mutex, MutexGuard};
use serde::ser::{Serialize, SerializeStruct, Serializer};

#[derive(Debug)]
pub(crate) struct WalletData {
    pub(crate) user_id: UserId,
    pub(crate) available: i64,
    pub(crate) pending: i64,
    /// One-open-withdrawal rule: the entry id of the unresolved
    /// withdrawal request, if any.
    pub(crate) open_withdrawal: Option<EntryId>,
}

impl WalletData {
    fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            available: 0,
            pending: 0,
            open_withdrawal: None,
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.available >= 0,
            "Invariant violated: available balance went negative: {}",
            self.available
        );
        debug_assert!(
            self.pending >= 0,
            "Invariant violated: pending balance went negative: {}",
            self.pending
        );
    }

    /// Increases available balance.
    pub(crate) fn credit(&mut self, amount: i64) -> Result<(), EngineError> {
        if amount <= 0 {
            return Err(EngineError::invalid("amount must be positive"));
        }
        self.available += amount;
        self.assert_invariants();
        Ok(())
    }

    /// Moves funds from available to pending, only if available covers
    /// the amount at the moment of the update.
    pub(crate) fn lock(&mut self, amount: i64) -> Result<(), EngineError> {
        if amount <= 0 {
            return Err(EngineError::invalid("amount must be positive"));
        }
        if self.available < amount {
            return Err(EngineError::InsufficientFunds);
        }
        self.available -= amount;
        self.pending += amount;
        self.assert_invariants();
        Ok(())
    }

    /// Removes funds from pending (escrow leaving this wallet).
    pub(crate) fn take_pending(&mut self, amount: i64) -> Result<(), EngineError> {
        if amount <= 0 {
            return Err(EngineError::invalid("amount must be positive"));
        }
        if self.pending < amount {
            return Err(EngineError::InsufficientPendingFunds);
        }
        self.pending -= amount;
        self.assert_invariants();
        Ok(())
    }

    /// Moves funds from pending back to available.
    pub(crate) fn unlock(&mut self, amount: i64) -> Result<(), EngineError> {
        if amount <= 0 {
            return Err(EngineError::invalid("amount must be positive"));
        }
        if self.pending < amount {
            return Err(EngineError::InsufficientPendingFunds);
        }
        self.pending -= amount;
        self.available += amount;
        self.assert_invariants();
        Ok(())
    }

    /// Opens a withdrawal: locks the amount and records the request
    /// entry, rejecting if another withdrawal is still unresolved.
    pub(crate) fn open_withdrawal(
        &mut self,
        amount: i64,
        entry: EntryId,
    ) -> Result<(), EngineError> {
        if self.open_withdrawal.is_some() {
            return Err(EngineError::WithdrawalAlreadyOpen);
        }
        self.lock(amount)?;
        self.open_withdrawal = Some(entry);
        Ok(())
    }

    /// Resolves the open withdrawal. `refund` returns the amount to
    /// available; otherwise the pending amount is burned (paid out).
    pub(crate) fn close_withdrawal(
        &mut self,
        entry: EntryId,
        amount: i64,
        refund: bool,
    ) -> Result<(), EngineError> {
        if self.open_withdrawal != Some(entry) {
            return Err(EngineError::invalid("withdrawal is not open"));
        }
        if refund {
            self.unlock(amount)?;
        } else {
            self.take_pending(amount)?;
        }
        self.open_withdrawal = None;
        Ok(())
    }
}

/// A user wallet.
#[derive(Debug)]
pub struct Wallet {
    inner: Mutex<WalletData>,
}

impl Wallet {
    pub(crate) fn new(user_id: UserId) -> Self {
        Self {
            inner: Mutex::new(WalletData::new(user_id)),
        }
    }

    pub fn available(&self) -> i64 {
        self.inner.lock().available
    }

    pub fn pending(&self) -> i64 {
        self.inner.lock().pending
    }

    /// Returns `available + pending`.
    pub fn total(&self) -> i64 {
        let data = self.inner.lock();
        data.available + data.pending
    }

    pub fn has_open_withdrawal(&self) -> bool {
        self.inner.lock().open_withdrawal.is_some()
    }

    pub(crate) fn data(&self) -> MutexGuard<'_, WalletData> {
        self.inner.lock()
    }
}

impl Serialize for Wallet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.lock();
        let mut state = serializer.serialize_struct("Wallet", 4)?;
        state.serialize_field("user", &data.user_id)?;
        state.serialize_field("available", &data.available)?;
        state.serialize_field("pending", &data.pending)?;
        state.serialize_field("total", &(data.available + data.pending))?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // === WalletData internal tests ===
    // These exercise the conditional mutations directly.

    #[test]
    fn lock_moves_available_to_pending() {
        let mut data = WalletData::new(UserId(1));
        data.credit(100).unwrap();
        data.lock(30).unwrap();
        assert_eq!(data.available, 70);
        assert_eq!(data.pending, 30);
    }

    #[test]
    fn lock_insufficient_returns_error() {
        let mut data = WalletData::new(UserId(1));
        data.credit(50).unwrap();
        let result = data.lock(100);
        assert_eq!(result, Err(EngineError::InsufficientFunds));
        assert_eq!(data.available, 50);
        assert_eq!(data.pending, 0);
    }

    #[test]
    fn take_pending_requires_coverage() {
        let mut data = WalletData::new(UserId(1));
        data.credit(100).unwrap();
        data.lock(30).unwrap();
        let result = data.take_pending(50);
        assert_eq!(result, Err(EngineError::InsufficientPendingFunds));
        data.take_pending(30).unwrap();
        assert_eq!(data.pending, 0);
        assert_eq!(data.available, 70);
    }

    #[test]
    fn unlock_restores_available() {
        let mut data = WalletData::new(UserId(1));
        data.credit(100).unwrap();
        data.lock(40).unwrap();
        data.unlock(40).unwrap();
        assert_eq!(data.available, 100);
        assert_eq!(data.pending, 0);
    }

    #[test]
    fn zero_and_negative_amounts_rejected() {
        let mut data = WalletData::new(UserId(1));
        assert!(data.credit(0).is_err());
        assert!(data.credit(-5).is_err());
        assert!(data.lock(0).is_err());
    }

    #[test]
    fn second_open_withdrawal_rejected() {
        let mut data = WalletData::new(UserId(1));
        data.credit(1000).unwrap();
        data.open_withdrawal(500, EntryId(1)).unwrap();

        let result = data.open_withdrawal(100, EntryId(2));
        assert_eq!(result, Err(EngineError::WithdrawalAlreadyOpen));
        assert_eq!(data.available, 500);
        assert_eq!(data.pending, 500);
    }

    #[test]
    fn withdrawal_refund_restores_balance() {
        let mut data = WalletData::new(UserId(1));
        data.credit(1000).unwrap();
        data.open_withdrawal(500, EntryId(1)).unwrap();
        data.close_withdrawal(EntryId(1), 500, true).unwrap();
        assert_eq!(data.available, 1000);
        assert_eq!(data.pending, 0);
        assert!(data.open_withdrawal.is_none());
    }

    #[test]
    fn withdrawal_payout_burns_pending() {
        let mut data = WalletData::new(UserId(1));
        data.credit(1000).unwrap();
        data.open_withdrawal(500, EntryId(1)).unwrap();
        data.close_withdrawal(EntryId(1), 500, false).unwrap();
        assert_eq!(data.available, 500);
        assert_eq!(data.pending, 0);
    }

    #[test]
    fn close_requires_matching_entry() {
        let mut data = WalletData::new(UserId(1));
        data.credit(1000).unwrap();
        data.open_withdrawal(500, EntryId(1)).unwrap();
        assert!(data.close_withdrawal(EntryId(9), 500, true).is_err());
        assert!(data.open_withdrawal.is_some());
    }

    // === Serialization ===

    #[test]
    fn serializes_integer_balances() {
        let wallet = Wallet::new(UserId(42));
        wallet.data().credit(150).unwrap();
        wallet.data().lock(50).unwrap();

        let json = serde_json::to_string(&wallet).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["user"], 42);
        assert_eq!(parsed["available"], 100);
        assert_eq!(parsed["pending"], 50);
        assert_eq!(parsed["total"], 150);
    }
}
