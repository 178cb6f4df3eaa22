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

//! Escrow ledger.
//!
//! Every money movement in the system goes through [`Ledger`]: deposits,
//! escrow locks, releases with commission split, cancellation settlements
//! and the withdrawal lifecycle. Each movement appends immutable entries
//! to an append-only log, and each mutating operation is guarded by a
//! caller-supplied idempotency key. Replaying a key is not an error: the
//! original receipt is returned and no balance moves twice.
//!
//! Operations that touch two wallets always lock them in ascending user
//! id order, so ledger calls can never deadlock against each other.

use crate::base::{BookingId, EntryId, UserId};
use crate::clock::Clock;
use crate::collab::ReadableIds;
use crate::error::EngineError;
use crate::money::split_earnings;
use crate::wallet::Wallet;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// What a ledger entry records. The signed `amount` on the entry plus
/// the kind fully determine the balance effect, so [`Ledger::audit`]
/// can rebuild every wallet from the log alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// External funds in. Available increases.
    Deposit,
    /// Escrow lock. Available decreases, pending increases.
    Lock,
    /// Escrow leaving or arriving at session settlement. Negative
    /// amounts drain the payer's pending; positive amounts credit the
    /// teacher's available.
    Release,
    /// Cancellation refund back to the payer's available balance.
    Refund,
    /// Partial-refund compensation credited to the teacher.
    Compensation,
    /// Withdrawal request. Available decreases, pending increases.
    Withdrawal,
    /// Withdrawal paid out. Pending decreases.
    WithdrawalCompleted,
    /// Withdrawal rejected. Pending decreases, available increases.
    WithdrawalRefunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Approved,
    Rejected,
}

/// One immutable row in the money log.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub kind: EntryKind,
    pub status: EntryStatus,
    pub user: UserId,
    /// Signed. See [`EntryKind`] for the per-kind balance effect.
    pub amount: i64,
    pub booking: Option<BookingId>,
    /// Human-readable reference code, assigned to withdrawals.
    pub reference: Option<String>,
    /// Destination snapshot, set on withdrawal request rows only.
    pub destination: Option<PayoutDestination>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    /// The (available, pending) delta this entry applies.
    fn effect(&self) -> (i64, i64) {
        match self.kind {
            EntryKind::Deposit => (self.amount, 0),
            EntryKind::Lock => (-self.amount, self.amount),
            EntryKind::Release => {
                if self.amount < 0 {
                    (0, self.amount)
                } else {
                    (self.amount, 0)
                }
            }
            EntryKind::Refund => (self.amount, 0),
            EntryKind::Compensation => (self.amount, 0),
            EntryKind::Withdrawal => (-self.amount, self.amount),
            EntryKind::WithdrawalCompleted => (0, -self.amount),
            EntryKind::WithdrawalRefunded => (self.amount, -self.amount),
        }
    }
}

/// Where a withdrawal pays out to. Snapshotted onto the request entry
/// so later edits to the wallet owner's saved details never change an
/// in-flight payout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayoutDestination {
    /// Payment rail, e.g. "bank" or "upi".
    pub method: String,
    /// Account identifier on that rail.
    pub account: String,
}

impl PayoutDestination {
    fn validate(&self) -> Result<(), EngineError> {
        if self.method.trim().is_empty() || self.account.trim().is_empty() {
            return Err(EngineError::invalid("payout destination required"));
        }
        Ok(())
    }
}

/// Outcome of an off-platform payout attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayoutOutcome {
    Paid { payout_ref: String },
    Rejected { note: String },
}

/// Result of a keyed ledger operation. `replayed` is true when the
/// idempotency key had already been used and the stored entries are
/// being returned instead of new ones.
#[derive(Debug, Clone)]
pub struct Receipt {
    pub replayed: bool,
    pub entries: Vec<Arc<LedgerEntry>>,
}

impl Receipt {
    fn fresh(entries: Vec<Arc<LedgerEntry>>) -> Self {
        Self {
            replayed: false,
            entries,
        }
    }
}

/// A wallet/log discrepancy found by [`Ledger::audit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Discrepancy {
    pub user: UserId,
    pub expected_available: i64,
    pub actual_available: i64,
    pub expected_pending: i64,
    pub actual_pending: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub wallets_checked: usize,
    pub entries_replayed: usize,
    pub discrepancies: Vec<Discrepancy>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

/// Idempotency slot. A key is claimed with an in-flight marker before
/// the operation runs, then committed with the produced entry ids.
enum KeySlot {
    InFlight,
    Done(Vec<EntryId>),
}

pub struct Ledger {
    wallets: DashMap<UserId, Arc<Wallet>>,
    entries: DashMap<EntryId, Arc<LedgerEntry>>,
    keys: DashMap<String, KeySlot>,
    next_entry: AtomicU64,
    ids: Arc<dyn ReadableIds>,
    clock: Arc<dyn Clock>,
}

impl Ledger {
    pub fn new(ids: Arc<dyn ReadableIds>, clock: Arc<dyn Clock>) -> Self {
        Self {
            wallets: DashMap::new(),
            entries: DashMap::new(),
            keys: DashMap::new(),
            next_entry: AtomicU64::new(1),
            ids,
            clock,
        }
    }

    /// Wallets are created lazily on first touch. The `Arc` is cloned
    /// out so no map shard lock is held while the wallet mutex is.
    pub fn wallet(&self, user: UserId) -> Arc<Wallet> {
        Arc::clone(
            self.wallets
                .entry(user)
                .or_insert_with(|| Arc::new(Wallet::new(user)))
                .value(),
        )
    }

    pub fn entry(&self, id: EntryId) -> Option<Arc<LedgerEntry>> {
        self.entries.get(&id).map(|e| Arc::clone(e.value()))
    }

    /// All entries for a user, oldest first.
    pub fn history(&self, user: UserId) -> Vec<Arc<LedgerEntry>> {
        let mut rows: Vec<_> = self
            .entries
            .iter()
            .filter(|e| e.user == user)
            .map(|e| Arc::clone(e.value()))
            .collect();
        rows.sort_by_key(|e| e.id.0);
        rows
    }

    /// Claims an idempotency key. Returns the stored receipt when the
    /// key was already committed, and `Conflict` when another call with
    /// the same key is still running.
    fn claim_key(&self, key: &str) -> Result<Option<Receipt>, EngineError> {
        match self.keys.entry(key.to_owned()) {
            Entry::Vacant(slot) => {
                slot.insert(KeySlot::InFlight);
                Ok(None)
            }
            Entry::Occupied(slot) => match slot.get() {
                KeySlot::InFlight => Err(EngineError::Conflict("operation already in flight")),
                KeySlot::Done(ids) => Ok(Some(Receipt {
                    replayed: true,
                    entries: ids.iter().filter_map(|id| self.entry(*id)).collect(),
                })),
            },
        }
    }

    fn commit_key(&self, key: &str, entries: &[Arc<LedgerEntry>]) {
        self.keys.insert(
            key.to_owned(),
            KeySlot::Done(entries.iter().map(|e| e.id).collect()),
        );
    }

    /// Releases a claimed key after a failed operation so the caller
    /// may retry with the same key.
    fn release_key(&self, key: &str) {
        self.keys.remove(key);
    }

    fn record(
        &self,
        kind: EntryKind,
        status: EntryStatus,
        user: UserId,
        amount: i64,
        booking: Option<BookingId>,
        reference: Option<String>,
        note: Option<String>,
    ) -> Arc<LedgerEntry> {
        let id = EntryId(self.next_entry.fetch_add(1, Ordering::Relaxed));
        let now = self.clock.now();
        let resolved_at = match status {
            EntryStatus::Pending => None,
            _ => Some(now),
        };
        let entry = Arc::new(LedgerEntry {
            id,
            kind,
            status,
            user,
            amount,
            booking,
            reference,
            destination: None,
            note,
            created_at: now,
            resolved_at,
        });
        self.entries.insert(id, Arc::clone(&entry));
        entry
    }

    /// Runs `op` under the idempotency key, committing the key on
    /// success and releasing it on failure.
    fn keyed<F>(&self, key: &str, op: F) -> Result<Receipt, EngineError>
    where
        F: FnOnce() -> Result<Vec<Arc<LedgerEntry>>, EngineError>,
    {
        if let Some(receipt) = self.claim_key(key)? {
            return Ok(receipt);
        }
        match op() {
            Ok(entries) => {
                self.commit_key(key, &entries);
                Ok(Receipt::fresh(entries))
            }
            Err(err) => {
                self.release_key(key);
                Err(err)
            }
        }
    }

    // === Operations ===

    /// Credits external funds to a wallet.
    pub fn deposit(
        &self,
        user: UserId,
        amount: i64,
        key: &str,
        note: Option<String>,
    ) -> Result<Receipt, EngineError> {
        self.keyed(key, || {
            self.wallet(user).data().credit(amount)?;
            Ok(vec![self.record(
                EntryKind::Deposit,
                EntryStatus::Approved,
                user,
                amount,
                None,
                None,
                note,
            )])
        })
    }

    /// Locks session funds in escrow: available to pending on the
    /// payer's wallet.
    pub fn lock_escrow(
        &self,
        payer: UserId,
        amount: i64,
        booking: BookingId,
        key: &str,
    ) -> Result<Receipt, EngineError> {
        self.keyed(key, || {
            self.wallet(payer).data().lock(amount)?;
            Ok(vec![self.record(
                EntryKind::Lock,
                EntryStatus::Approved,
                payer,
                amount,
                Some(booking),
                None,
                None,
            )])
        })
    }

    /// Releases escrowed funds at session settlement: the full amount
    /// leaves the payer's pending balance, the teacher receives their
    /// share and the remainder is platform revenue (recorded on the
    /// entry note, never held in a wallet).
    pub fn release(
        &self,
        payer: UserId,
        teacher: UserId,
        total: i64,
        commission_rate: Decimal,
        booking: BookingId,
        key: &str,
    ) -> Result<Receipt, EngineError> {
        self.keyed(key, || {
            if total <= 0 {
                return Err(EngineError::invalid("amount must be positive"));
            }
            let (teacher_share, platform_share) = split_earnings(total, commission_rate);
            self.with_pair(payer, teacher, |payer_data, teacher_data| {
                payer_data.take_pending(total)?;
                if teacher_share > 0 {
                    teacher_data.credit(teacher_share)?;
                }
                Ok(())
            })?;
            let mut out = vec![self.record(
                EntryKind::Release,
                EntryStatus::Approved,
                payer,
                -total,
                Some(booking),
                None,
                Some(format!("platform fee {platform_share}")),
            )];
            if teacher_share > 0 {
                out.push(self.record(
                    EntryKind::Release,
                    EntryStatus::Approved,
                    teacher,
                    teacher_share,
                    Some(booking),
                    None,
                    None,
                ));
            }
            Ok(out)
        })
    }

    /// Settles a cancellation: drains the full locked amount from the
    /// payer's pending balance and splits it into a payer refund, a
    /// teacher compensation and platform revenue. The three parts must
    /// sum to the locked total exactly; zero-amount rows are skipped.
    #[allow(clippy::too_many_arguments)]
    pub fn settle_cancellation(
        &self,
        payer: UserId,
        teacher: UserId,
        total_locked: i64,
        refund: i64,
        teacher_comp: i64,
        platform_revenue: i64,
        booking: BookingId,
        key: &str,
    ) -> Result<Receipt, EngineError> {
        self.keyed(key, || {
            if total_locked <= 0 || refund < 0 || teacher_comp < 0 || platform_revenue < 0 {
                return Err(EngineError::invalid("settlement amounts out of range"));
            }
            let parts = refund
                .checked_add(teacher_comp)
                .and_then(|s| s.checked_add(platform_revenue));
            if parts != Some(total_locked) {
                return Err(EngineError::invalid(
                    "settlement parts do not sum to the locked total",
                ));
            }
            self.with_pair(payer, teacher, |payer_data, teacher_data| {
                payer_data.take_pending(total_locked)?;
                if refund > 0 {
                    payer_data.credit(refund)?;
                }
                if teacher_comp > 0 {
                    teacher_data.credit(teacher_comp)?;
                }
                Ok(())
            })?;
            let mut out = vec![self.record(
                EntryKind::Release,
                EntryStatus::Approved,
                payer,
                -total_locked,
                Some(booking),
                None,
                Some(format!("platform fee {platform_revenue}")),
            )];
            if refund > 0 {
                out.push(self.record(
                    EntryKind::Refund,
                    EntryStatus::Approved,
                    payer,
                    refund,
                    Some(booking),
                    None,
                    None,
                ));
            }
            if teacher_comp > 0 {
                out.push(self.record(
                    EntryKind::Compensation,
                    EntryStatus::Approved,
                    teacher,
                    teacher_comp,
                    Some(booking),
                    None,
                    None,
                ));
            }
            Ok(out)
        })
    }

    /// Opens a withdrawal request: locks the amount and records a
    /// pending entry carrying a human-readable reference code and an
    /// immutable snapshot of the payout destination. Only one
    /// withdrawal may be open per wallet at a time.
    pub fn request_withdrawal(
        &self,
        user: UserId,
        amount: i64,
        destination: PayoutDestination,
        key: &str,
    ) -> Result<Receipt, EngineError> {
        self.keyed(key, || {
            if amount <= 0 {
                return Err(EngineError::invalid("amount must be positive"));
            }
            destination.validate()?;
            let id = EntryId(self.next_entry.fetch_add(1, Ordering::Relaxed));
            self.wallet(user).data().open_withdrawal(amount, id)?;
            let now = self.clock.now();
            let entry = Arc::new(LedgerEntry {
                id,
                kind: EntryKind::Withdrawal,
                status: EntryStatus::Pending,
                user,
                amount,
                booking: None,
                reference: Some(self.ids.next("WD", now)),
                destination: Some(destination),
                note: None,
                created_at: now,
                resolved_at: None,
            });
            self.entries.insert(id, Arc::clone(&entry));
            Ok(vec![entry])
        })
    }

    /// Resolves an open withdrawal. `Paid` burns the pending amount and
    /// records the payout reference; `Rejected` returns the amount to
    /// the available balance.
    pub fn finalize_withdrawal(
        &self,
        withdrawal: EntryId,
        outcome: PayoutOutcome,
        key: &str,
    ) -> Result<Receipt, EngineError> {
        self.keyed(key, || {
            let request = self
                .entry(withdrawal)
                .ok_or(EngineError::NotFound("withdrawal"))?;
            if request.kind != EntryKind::Withdrawal {
                return Err(EngineError::invalid("entry is not a withdrawal"));
            }
            if request.status != EntryStatus::Pending {
                return Err(EngineError::Conflict("withdrawal already resolved"));
            }
            let (kind, status, reference, note, refund) = match outcome {
                PayoutOutcome::Paid { payout_ref } => (
                    EntryKind::WithdrawalCompleted,
                    EntryStatus::Approved,
                    Some(payout_ref),
                    None,
                    false,
                ),
                PayoutOutcome::Rejected { note } => (
                    EntryKind::WithdrawalRefunded,
                    EntryStatus::Rejected,
                    None,
                    Some(note),
                    true,
                ),
            };
            self.wallet(request.user)
                .data()
                .close_withdrawal(withdrawal, request.amount, refund)?;
            // Mark the request resolved, then append the resolution row.
            let resolved = Arc::new(LedgerEntry {
                status,
                resolved_at: Some(self.clock.now()),
                ..(*request).clone()
            });
            self.entries.insert(withdrawal, Arc::clone(&resolved));
            let row = self.record(
                kind,
                EntryStatus::Approved,
                request.user,
                request.amount,
                None,
                reference,
                note,
            );
            Ok(vec![resolved, row])
        })
    }

    /// Replays the full entry log and compares the reconstructed
    /// balances against every live wallet.
    pub fn audit(&self) -> AuditReport {
        let mut expected: std::collections::HashMap<UserId, (i64, i64)> =
            std::collections::HashMap::new();
        let mut rows: Vec<_> = self
            .entries
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        rows.sort_by_key(|e| e.id.0);
        for row in &rows {
            // Unresolved withdrawal requests still hold their amount in
            // pending, so their effect applies; the resolution row
            // reverses it.
            let (da, dp) = row.effect();
            let slot = expected.entry(row.user).or_insert((0, 0));
            slot.0 += da;
            slot.1 += dp;
        }

        let mut discrepancies = Vec::new();
        let mut wallets_checked = 0;
        for wallet in self.wallets.iter() {
            wallets_checked += 1;
            let (exp_avail, exp_pending) = expected.get(wallet.key()).copied().unwrap_or((0, 0));
            let actual_avail = wallet.available();
            let actual_pending = wallet.pending();
            if actual_avail != exp_avail || actual_pending != exp_pending {
                discrepancies.push(Discrepancy {
                    user: *wallet.key(),
                    expected_available: exp_avail,
                    actual_available: actual_avail,
                    expected_pending: exp_pending,
                    actual_pending: actual_pending,
                });
            }
        }
        discrepancies.sort_by_key(|d| d.user.0);
        AuditReport {
            wallets_checked,
            entries_replayed: rows.len(),
            discrepancies,
        }
    }

    /// Runs `op` with both wallet guards held, acquired in ascending
    /// user id order.
    fn with_pair<F>(&self, a: UserId, b: UserId, op: F) -> Result<(), EngineError>
    where
        F: FnOnce(
            &mut crate::wallet::WalletData,
            &mut crate::wallet::WalletData,
        ) -> Result<(), EngineError>,
    {
        debug_assert_ne!(a, b, "pairwise ledger op on a single wallet");
        let (first, second) = if a.0 < b.0 { (a, b) } else { (b, a) };
        let first_wallet = self.wallet(first);
        let second_wallet = self.wallet(second);
        let mut first_guard = first_wallet.data();
        let mut second_guard = second_wallet.data();
        if first == a {
            op(&mut first_guard, &mut second_guard)
        } else {
            op(&mut second_guard, &mut first_guard)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::collab::SequentialIds;
    use rust_decimal_macros::dec;

    fn ledger() -> Ledger {
        Ledger::new(
            Arc::new(SequentialIds::default()),
            Arc::new(ManualClock::default()),
        )
    }

    fn bank() -> PayoutDestination {
        PayoutDestination {
            method: "bank".into(),
            account: "DE89 3704 0044 0532 0130 00".into(),
        }
    }

    #[test]
    fn deposit_then_lock_then_release() {
        let ledger = ledger();
        let payer = UserId(1);
        let teacher = UserId(2);
        ledger.deposit(payer, 100, "d1", None).unwrap();
        ledger.lock_escrow(payer, 100, BookingId(7), "l1").unwrap();
        assert_eq!(ledger.wallet(payer).available(), 0);
        assert_eq!(ledger.wallet(payer).pending(), 100);

        ledger
            .release(payer, teacher, 100, dec!(0.18), BookingId(7), "r1")
            .unwrap();
        assert_eq!(ledger.wallet(payer).pending(), 0);
        assert_eq!(ledger.wallet(teacher).available(), 82);
        assert!(ledger.audit().is_clean());
    }

    #[test]
    fn replayed_key_moves_money_once() {
        let ledger = ledger();
        let user = UserId(1);
        let first = ledger.deposit(user, 100, "dep", None).unwrap();
        assert!(!first.replayed);

        let second = ledger.deposit(user, 100, "dep", None).unwrap();
        assert!(second.replayed);
        assert_eq!(second.entries[0].id, first.entries[0].id);
        assert_eq!(ledger.wallet(user).available(), 100);
    }

    #[test]
    fn failed_operation_releases_its_key() {
        let ledger = ledger();
        let user = UserId(1);
        let err = ledger.lock_escrow(user, 50, BookingId(1), "k").unwrap_err();
        assert_eq!(err, EngineError::InsufficientFunds);

        // Retrying with the same key after funding must succeed.
        ledger.deposit(user, 50, "d", None).unwrap();
        ledger.lock_escrow(user, 50, BookingId(1), "k").unwrap();
        assert_eq!(ledger.wallet(user).pending(), 50);
    }

    #[test]
    fn settlement_parts_must_sum_to_locked_total() {
        let ledger = ledger();
        let payer = UserId(1);
        let teacher = UserId(2);
        ledger.deposit(payer, 200, "d", None).unwrap();
        ledger.lock_escrow(payer, 200, BookingId(3), "l").unwrap();

        let err = ledger
            .settle_cancellation(payer, teacher, 200, 100, 50, 40, BookingId(3), "s-bad")
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));

        ledger
            .settle_cancellation(payer, teacher, 200, 100, 64, 36, BookingId(3), "s")
            .unwrap();
        assert_eq!(ledger.wallet(payer).available(), 100);
        assert_eq!(ledger.wallet(payer).pending(), 0);
        assert_eq!(ledger.wallet(teacher).available(), 64);
        assert!(ledger.audit().is_clean());
    }

    #[test]
    fn full_refund_settlement_skips_zero_rows() {
        let ledger = ledger();
        let payer = UserId(1);
        let teacher = UserId(2);
        ledger.deposit(payer, 80, "d", None).unwrap();
        ledger.lock_escrow(payer, 80, BookingId(3), "l").unwrap();

        let receipt = ledger
            .settle_cancellation(payer, teacher, 80, 80, 0, 0, BookingId(3), "s")
            .unwrap();
        // Release + Refund only, no compensation row.
        assert_eq!(receipt.entries.len(), 2);
        assert_eq!(receipt.entries[1].kind, EntryKind::Refund);
        assert_eq!(ledger.wallet(payer).available(), 80);
        assert_eq!(ledger.wallet(teacher).available(), 0);
    }

    #[test]
    fn withdrawal_lifecycle_paid() {
        let ledger = ledger();
        let user = UserId(5);
        ledger.deposit(user, 1000, "d", None).unwrap();
        let receipt = ledger.request_withdrawal(user, 600, bank(), "w").unwrap();
        let request = &receipt.entries[0];
        assert_eq!(request.status, EntryStatus::Pending);
        assert!(request.reference.as_deref().unwrap().starts_with("WD-"));
        assert_eq!(ledger.wallet(user).pending(), 600);

        ledger
            .finalize_withdrawal(
                request.id,
                PayoutOutcome::Paid {
                    payout_ref: "bank-123".into(),
                },
                "w-fin",
            )
            .unwrap();
        assert_eq!(ledger.wallet(user).available(), 400);
        assert_eq!(ledger.wallet(user).pending(), 0);
        assert!(!ledger.wallet(user).has_open_withdrawal());
        assert!(ledger.audit().is_clean());
    }

    #[test]
    fn withdrawal_rejection_refunds() {
        let ledger = ledger();
        let user = UserId(5);
        ledger.deposit(user, 1000, "d", None).unwrap();
        let receipt = ledger.request_withdrawal(user, 600, bank(), "w").unwrap();

        ledger
            .finalize_withdrawal(
                receipt.entries[0].id,
                PayoutOutcome::Rejected {
                    note: "bad bank details".into(),
                },
                "w-fin",
            )
            .unwrap();
        assert_eq!(ledger.wallet(user).available(), 1000);
        assert_eq!(ledger.wallet(user).pending(), 0);
        assert_eq!(
            ledger.entry(receipt.entries[0].id).unwrap().status,
            EntryStatus::Rejected
        );
        assert!(ledger.audit().is_clean());
    }

    #[test]
    fn withdrawal_snapshots_its_destination() {
        let ledger = ledger();
        let user = UserId(5);
        ledger.deposit(user, 1000, "d", None).unwrap();
        let receipt = ledger.request_withdrawal(user, 600, bank(), "w").unwrap();
        let request = &receipt.entries[0];
        assert_eq!(request.destination, Some(bank()));

        ledger
            .finalize_withdrawal(
                request.id,
                PayoutOutcome::Paid {
                    payout_ref: "bank-123".into(),
                },
                "w-fin",
            )
            .unwrap();
        // The resolved request still carries the original destination.
        let resolved = ledger.entry(request.id).unwrap();
        assert_eq!(resolved.status, EntryStatus::Approved);
        assert_eq!(resolved.destination, Some(bank()));
    }

    #[test]
    fn withdrawal_requires_a_destination() {
        let ledger = ledger();
        let user = UserId(5);
        ledger.deposit(user, 100, "d", None).unwrap();
        let empty = PayoutDestination {
            method: "bank".into(),
            account: "  ".into(),
        };
        let err = ledger
            .request_withdrawal(user, 50, empty, "w")
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));
        // The failed request neither locked funds nor burned the key.
        assert_eq!(ledger.wallet(user).available(), 100);
        ledger.request_withdrawal(user, 50, bank(), "w").unwrap();
    }

    #[test]
    fn second_withdrawal_rejected_while_one_open() {
        let ledger = ledger();
        let user = UserId(5);
        ledger.deposit(user, 1000, "d", None).unwrap();
        ledger.request_withdrawal(user, 100, bank(), "w1").unwrap();
        let err = ledger.request_withdrawal(user, 100, bank(), "w2").unwrap_err();
        assert_eq!(err, EngineError::WithdrawalAlreadyOpen);
    }

    #[test]
    fn finalize_twice_replays() {
        let ledger = ledger();
        let user = UserId(5);
        ledger.deposit(user, 1000, "d", None).unwrap();
        let receipt = ledger.request_withdrawal(user, 100, bank(), "w").unwrap();
        let outcome = PayoutOutcome::Paid {
            payout_ref: "ref".into(),
        };
        ledger
            .finalize_withdrawal(receipt.entries[0].id, outcome.clone(), "fin")
            .unwrap();
        let again = ledger
            .finalize_withdrawal(receipt.entries[0].id, outcome, "fin")
            .unwrap();
        assert!(again.replayed);
        assert_eq!(ledger.wallet(user).available(), 900);
    }

    #[test]
    fn audit_flags_tampered_wallet() {
        let ledger = ledger();
        let user = UserId(1);
        ledger.deposit(user, 100, "d", None).unwrap();
        // Mutate a wallet behind the log's back.
        ledger.wallet(user).data().credit(1).unwrap();

        let report = ledger.audit();
        assert_eq!(report.discrepancies.len(), 1);
        assert_eq!(report.discrepancies[0].expected_available, 100);
        assert_eq!(report.discrepancies[0].actual_available, 101);
    }

    #[test]
    fn history_is_ordered() {
        let ledger = ledger();
        let user = UserId(1);
        ledger.deposit(user, 10, "a", None).unwrap();
        ledger.deposit(user, 20, "b", None).unwrap();
        ledger.deposit(user, 30, "c", None).unwrap();
        let rows = ledger.history(user);
        let amounts: Vec<_> = rows.iter().map(|e| e.amount).collect();
        assert_eq!(amounts, vec![10, 20, 30]);
    }
}
