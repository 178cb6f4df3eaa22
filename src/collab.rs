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

//! Collaborator seams.
//!
//! The engine talks to its adjacent subsystems (notifications, readable
//! ids, teacher directory, availability slots, packages) through these
//! traits. The in-memory implementations here are the real ones for a
//! single-node deployment and double as test fixtures.

use crate::base::{BookingId, ChildId, PackageId, RedemptionId, Role, SubjectId, TeacherId, TierId, UserId};
use crate::booking::CancellationPolicy;
use crate::error::EngineError;
use chrono::{DateTime, Datelike, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use tracing::debug;

// === Notifications ===

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Info,
    Action,
    Alert,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub user: UserId,
    pub title: String,
    pub message: String,
    pub kind: NoticeKind,
    /// Collisions on the same key are dropped silently.
    pub dedupe_key: Option<String>,
}

/// Fire-and-forget delivery after the mutating operation has committed.
/// A failing notifier must never roll back or block booking state.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

#[derive(Default)]
pub struct InMemoryNotifier {
    sent: Mutex<Vec<Notification>>,
    seen_keys: DashMap<String, ()>,
}

impl InMemoryNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    pub fn sent_to(&self, user: UserId) -> Vec<Notification> {
        self.sent
            .lock()
            .iter()
            .filter(|n| n.user == user)
            .cloned()
            .collect()
    }
}

impl Notifier for InMemoryNotifier {
    fn notify(&self, notification: Notification) {
        if let Some(key) = &notification.dedupe_key {
            match self.seen_keys.entry(key.clone()) {
                Entry::Occupied(_) => {
                    debug!(key, "duplicate notification dropped");
                    return;
                }
                Entry::Vacant(slot) => {
                    slot.insert(());
                }
            }
        }
        self.sent.lock().push(notification);
    }
}

// === Readable ids ===

/// Human-readable reference codes, monotonically increasing per kind
/// per calendar month. Display-only, never a primary key.
pub trait ReadableIds: Send + Sync {
    fn next(&self, kind: &str, now: DateTime<Utc>) -> String;
}

#[derive(Default)]
pub struct SequentialIds {
    counters: DashMap<String, u64>,
}

impl ReadableIds for SequentialIds {
    fn next(&self, kind: &str, now: DateTime<Utc>) -> String {
        let period = format!("{:04}{:02}", now.year(), now.month());
        let mut counter = self
            .counters
            .entry(format!("{kind}-{period}"))
            .or_insert(0);
        *counter += 1;
        format!("{kind}-{period}-{:04}", *counter)
    }
}

// === Teacher directory ===

#[derive(Debug, Clone)]
pub struct TeacherProfile {
    pub user: UserId,
    /// Published hourly rate in minor units.
    pub hourly_rate: i64,
    pub subjects: Vec<SubjectId>,
    pub cancellation_policy: CancellationPolicy,
    pub on_vacation: bool,
    pub demo_enabled: bool,
}

/// Read-only user and teacher lookups.
pub trait Directory: Send + Sync {
    fn teacher(&self, teacher: TeacherId) -> Option<TeacherProfile>;
    fn role(&self, user: UserId) -> Option<Role>;
    fn owns_child(&self, parent: UserId, child: ChildId) -> bool;
    fn admins(&self) -> Vec<UserId>;
}

#[derive(Default)]
pub struct InMemoryDirectory {
    teachers: DashMap<TeacherId, TeacherProfile>,
    roles: DashMap<UserId, Role>,
    children: DashMap<UserId, Vec<ChildId>>,
}

impl InMemoryDirectory {
    pub fn add_user(&self, user: UserId, role: Role) {
        self.roles.insert(user, role);
    }

    pub fn add_teacher(&self, teacher: TeacherId, profile: TeacherProfile) {
        self.roles.insert(profile.user, Role::Teacher);
        self.teachers.insert(teacher, profile);
    }

    pub fn add_child(&self, parent: UserId, child: ChildId) {
        self.children.entry(parent).or_default().push(child);
    }

    pub fn set_vacation(&self, teacher: TeacherId, on_vacation: bool) {
        if let Some(mut profile) = self.teachers.get_mut(&teacher) {
            profile.on_vacation = on_vacation;
        }
    }
}

impl Directory for InMemoryDirectory {
    fn teacher(&self, teacher: TeacherId) -> Option<TeacherProfile> {
        self.teachers.get(&teacher).map(|p| p.clone())
    }

    fn role(&self, user: UserId) -> Option<Role> {
        self.roles.get(&user).map(|r| *r)
    }

    fn owns_child(&self, parent: UserId, child: ChildId) -> bool {
        self.children
            .get(&parent)
            .is_some_and(|kids| kids.contains(&child))
    }

    fn admins(&self) -> Vec<UserId> {
        let mut admins: Vec<_> = self
            .roles
            .iter()
            .filter(|r| *r.value() == Role::Admin)
            .map(|r| *r.key())
            .collect();
        admins.sort_by_key(|u| u.0);
        admins
    }
}

// === Availability slots ===

/// Published teacher availability, one slot per whole hour. Slot state
/// only changes through these calls so it moves together with booking
/// state.
pub trait SlotCalendar: Send + Sync {
    fn publish(&self, teacher: TeacherId, start: DateTime<Utc>);
    /// Whether every hour of `[start, end)` has a published slot.
    fn covers(&self, teacher: TeacherId, start: DateTime<Utc>, end: DateTime<Utc>) -> bool;
    /// Removes all published slots overlapping `[start, end)`, returning
    /// how many were removed.
    fn consume_overlapping(
        &self,
        teacher: TeacherId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> usize;
    fn restore_slot(&self, teacher: TeacherId, start: DateTime<Utc>);
}

#[derive(Default)]
pub struct InMemorySlots {
    slots: DashMap<TeacherId, BTreeSet<DateTime<Utc>>>,
}

impl SlotCalendar for InMemorySlots {
    fn publish(&self, teacher: TeacherId, start: DateTime<Utc>) {
        self.slots.entry(teacher).or_default().insert(start);
    }

    fn covers(&self, teacher: TeacherId, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        let Some(slots) = self.slots.get(&teacher) else {
            return false;
        };
        let mut hour = start;
        while hour < end {
            if !slots.contains(&hour) {
                return false;
            }
            hour += chrono::Duration::hours(1);
        }
        true
    }

    fn consume_overlapping(
        &self,
        teacher: TeacherId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> usize {
        let Some(mut slots) = self.slots.get_mut(&teacher) else {
            return 0;
        };
        let overlapping: Vec<_> = slots
            .iter()
            .copied()
            .filter(|slot| *slot < end && *slot + chrono::Duration::hours(1) > start)
            .collect();
        for slot in &overlapping {
            slots.remove(slot);
        }
        overlapping.len()
    }

    fn restore_slot(&self, teacher: TeacherId, start: DateTime<Utc>) {
        self.slots.entry(teacher).or_default().insert(start);
    }
}

// === Packages ===

/// Escrow-adjacent package subsystem. A package-funded booking reserves
/// one of the package's sessions at creation and either releases it at
/// confirmation or cancels the reservation. Release is keyed so the
/// engine may retry it.
pub trait Packages: Send + Sync {
    /// Whether any session is still unreleased. Live reservations are
    /// not counted here; [`Packages::reserve`] accounts for those.
    fn has_capacity(&self, package: PackageId) -> bool;
    fn reserve(&self, package: PackageId, booking: BookingId)
    -> Result<RedemptionId, EngineError>;
    fn cancel_reservation(&self, booking: BookingId);
    fn release_session(&self, booking: BookingId, key: &str) -> Result<(), EngineError>;
    /// Completes a pending package purchase for the given tier, keyed.
    fn purchase(&self, user: UserId, tier: TierId, key: &str) -> Result<PackageId, EngineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RedemptionState {
    Reserved,
    Released,
    Cancelled,
}

#[derive(Debug)]
struct PackageState {
    owner: UserId,
    sessions_total: u32,
    sessions_used: u32,
}

#[derive(Default)]
pub struct InMemoryPackages {
    packages: DashMap<PackageId, PackageState>,
    redemptions: DashMap<BookingId, (RedemptionId, PackageId, RedemptionState)>,
    keys: DashMap<String, ()>,
    purchase_keys: DashMap<String, PackageId>,
    next_package: std::sync::atomic::AtomicU64,
    next_redemption: std::sync::atomic::AtomicU64,
}

impl InMemoryPackages {
    pub fn grant(&self, owner: UserId, sessions: u32) -> PackageId {
        let id = PackageId(
            self.next_package
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
                + 1,
        );
        self.packages.insert(
            id,
            PackageState {
                owner,
                sessions_total: sessions,
                sessions_used: 0,
            },
        );
        id
    }

    pub fn sessions_remaining(&self, package: PackageId) -> Option<u32> {
        self.packages
            .get(&package)
            .map(|p| p.sessions_total - p.sessions_used)
    }
}

impl Packages for InMemoryPackages {
    fn has_capacity(&self, package: PackageId) -> bool {
        self.packages
            .get(&package)
            .is_some_and(|p| p.sessions_used < p.sessions_total)
    }

    fn reserve(
        &self,
        package: PackageId,
        booking: BookingId,
    ) -> Result<RedemptionId, EngineError> {
        let state = self
            .packages
            .get(&package)
            .ok_or(EngineError::NotFound("package"))?;
        // Live reservations hold a session each until they release or
        // cancel, so they count against capacity here.
        let reserved = self
            .redemptions
            .iter()
            .filter(|r| r.value().1 == package && r.value().2 == RedemptionState::Reserved)
            .count() as u32;
        if state.sessions_used + reserved >= state.sessions_total {
            return Err(EngineError::invalid("package has no sessions left"));
        }
        drop(state);
        let id = RedemptionId(
            self.next_redemption
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
                + 1,
        );
        self.redemptions
            .insert(booking, (id, package, RedemptionState::Reserved));
        Ok(id)
    }

    fn cancel_reservation(&self, booking: BookingId) {
        if let Some(mut slot) = self.redemptions.get_mut(&booking)
            && slot.2 == RedemptionState::Reserved
        {
            slot.2 = RedemptionState::Cancelled;
        }
    }

    fn release_session(&self, booking: BookingId, key: &str) -> Result<(), EngineError> {
        if self.keys.insert(key.to_owned(), ()).is_some() {
            return Ok(());
        }
        let mut slot = self
            .redemptions
            .get_mut(&booking)
            .ok_or(EngineError::NotFound("redemption"))?;
        if slot.2 != RedemptionState::Reserved {
            return Err(EngineError::Conflict("redemption already resolved"));
        }
        let package = slot.1;
        slot.2 = RedemptionState::Released;
        drop(slot);
        if let Some(mut state) = self.packages.get_mut(&package) {
            state.sessions_used += 1;
        }
        Ok(())
    }

    fn purchase(&self, user: UserId, _tier: TierId, key: &str) -> Result<PackageId, EngineError> {
        // Replays return the package bought the first time, so a caller
        // that failed after the purchase can retry the rest of its work.
        match self.purchase_keys.entry(key.to_owned()) {
            Entry::Occupied(slot) => Ok(*slot.get()),
            Entry::Vacant(slot) => {
                let package = self.grant(user, 1);
                slot.insert(package);
                Ok(package)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hour(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, h, 0, 0).unwrap()
    }

    #[test]
    fn dedupe_key_drops_second_notice() {
        let notifier = InMemoryNotifier::default();
        let notice = Notification {
            user: UserId(1),
            title: "t".into(),
            message: "m".into(),
            kind: NoticeKind::Info,
            dedupe_key: Some("once".into()),
        };
        notifier.notify(notice.clone());
        notifier.notify(notice);
        assert_eq!(notifier.sent().len(), 1);
    }

    #[test]
    fn readable_ids_increase_per_kind_and_period() {
        let ids = SequentialIds::default();
        let now = hour(0);
        assert_eq!(ids.next("WD", now), "WD-202603-0001");
        assert_eq!(ids.next("WD", now), "WD-202603-0002");
        assert_eq!(ids.next("BK", now), "BK-202603-0001");
    }

    #[test]
    fn slot_coverage_and_consumption() {
        let slots = InMemorySlots::default();
        let teacher = TeacherId(1);
        slots.publish(teacher, hour(10));
        slots.publish(teacher, hour(11));

        assert!(slots.covers(teacher, hour(10), hour(12)));
        assert!(!slots.covers(teacher, hour(10), hour(13)));

        assert_eq!(slots.consume_overlapping(teacher, hour(10), hour(12)), 2);
        assert!(!slots.covers(teacher, hour(10), hour(11)));

        slots.restore_slot(teacher, hour(10));
        assert!(slots.covers(teacher, hour(10), hour(11)));
    }

    #[test]
    fn package_release_is_keyed() {
        let packages = InMemoryPackages::default();
        let package = packages.grant(UserId(1), 2);
        packages.reserve(package, BookingId(9)).unwrap();

        packages.release_session(BookingId(9), "rel").unwrap();
        // Replay is a no-op, not a double count.
        packages.release_session(BookingId(9), "rel").unwrap();
        assert_eq!(packages.sessions_remaining(package), Some(1));
    }

    #[test]
    fn live_reservations_count_against_capacity() {
        let packages = InMemoryPackages::default();
        let package = packages.grant(UserId(1), 1);
        packages.reserve(package, BookingId(1)).unwrap();

        // The only session is held by the open reservation.
        assert!(packages.reserve(package, BookingId(2)).is_err());

        packages.release_session(BookingId(1), "r1").unwrap();
        assert_eq!(packages.sessions_remaining(package), Some(0));
        assert!(packages.reserve(package, BookingId(2)).is_err());
    }

    #[test]
    fn cancelled_reservation_frees_its_session() {
        let packages = InMemoryPackages::default();
        let package = packages.grant(UserId(1), 1);
        packages.reserve(package, BookingId(1)).unwrap();
        packages.cancel_reservation(BookingId(1));
        assert!(packages.reserve(package, BookingId(2)).is_ok());
    }

    #[test]
    fn purchase_replay_returns_the_same_package() {
        let packages = InMemoryPackages::default();
        let first = packages.purchase(UserId(1), TierId(3), "buy").unwrap();
        let second = packages.purchase(UserId(1), TierId(3), "buy").unwrap();
        assert_eq!(first, second);
        assert_eq!(packages.sessions_remaining(first), Some(1));
    }

    #[test]
    fn reserve_rejects_exhausted_package() {
        let packages = InMemoryPackages::default();
        let package = packages.grant(UserId(1), 1);
        packages.reserve(package, BookingId(1)).unwrap();
        packages.release_session(BookingId(1), "r1").unwrap();
        assert!(packages.reserve(package, BookingId(2)).is_err());
    }
}
