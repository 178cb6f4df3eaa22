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

//! The booking lifecycle engine.
//!
//! All lifecycle operations live on [`BookingEngine`], split across the
//! submodules by phase: creation, payment, completion, cancellation and
//! rescheduling. Every operation follows the same shape: validate the
//! caller, lock the booking record, check the status transition through
//! the guard table, move money through the ledger if needed, and only
//! then dispatch notifications.
//!
//! Lock order is fixed: per-teacher lock, then a booking mutex, then
//! wallet mutexes (inside the ledger). Nothing acquires them in any
//! other order, and no booking mutex is ever held while another booking
//! mutex is taken.

mod cancellation;
mod completion;
mod creation;
mod payment;
mod reschedule;

pub use completion::DisputeResolution;
pub use creation::CreateBooking;

use crate::base::{BookingId, RequestId, TeacherId, UserId};
use crate::booking::{Booking, Dispute, RescheduleRequest};
use crate::clock::Clock;
use crate::collab::{Directory, Notification, NoticeKind, Notifier, Packages, ReadableIds, SlotCalendar};
use crate::error::EngineError;
use crate::ledger::Ledger;
use crate::settings::SystemSettings;
use crate::status::{self, BookingStatus};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// The adjacent subsystems the engine talks to.
pub struct Collaborators {
    pub directory: Arc<dyn Directory>,
    pub slots: Arc<dyn SlotCalendar>,
    pub packages: Arc<dyn Packages>,
    pub notifier: Arc<dyn Notifier>,
    pub ids: Arc<dyn ReadableIds>,
}

pub struct BookingEngine {
    bookings: DashMap<BookingId, Arc<Mutex<Booking>>>,
    requests: DashMap<RequestId, Arc<Mutex<RescheduleRequest>>>,
    disputes: DashMap<BookingId, Dispute>,
    /// Per-teacher serialization for slot-consuming operations, the
    /// in-process stand-in for an advisory lock. Acquired fail-fast.
    teacher_locks: DashMap<TeacherId, Arc<Mutex<()>>>,
    next_booking: AtomicU64,
    next_request: AtomicU64,
    settings: RwLock<SystemSettings>,
    ledger: Arc<Ledger>,
    clock: Arc<dyn Clock>,
    collab: Collaborators,
}

impl BookingEngine {
    pub fn new(collab: Collaborators, clock: Arc<dyn Clock>) -> Self {
        let ledger = Arc::new(Ledger::new(Arc::clone(&collab.ids), Arc::clone(&clock)));
        Self {
            bookings: DashMap::new(),
            requests: DashMap::new(),
            disputes: DashMap::new(),
            teacher_locks: DashMap::new(),
            next_booking: AtomicU64::new(1),
            next_request: AtomicU64::new(1),
            settings: RwLock::new(SystemSettings::default()),
            ledger,
            clock,
            collab,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn settings(&self) -> SystemSettings {
        self.settings.read().clone()
    }

    pub fn update_settings(&self, settings: SystemSettings) {
        info!("system settings updated");
        *self.settings.write() = settings;
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    /// A point-in-time copy of the booking record.
    pub fn booking(&self, id: BookingId) -> Result<Booking, EngineError> {
        let cell = self.booking_cell(id)?;
        let snapshot = cell.lock().clone();
        Ok(snapshot)
    }

    pub fn dispute(&self, booking: BookingId) -> Option<Dispute> {
        self.disputes.get(&booking).map(|d| d.clone())
    }

    pub fn reschedule_request(&self, id: RequestId) -> Option<RescheduleRequest> {
        self.requests.get(&id).map(|r| r.lock().clone())
    }

    pub(crate) fn booking_cell(&self, id: BookingId) -> Result<Arc<Mutex<Booking>>, EngineError> {
        self.bookings
            .get(&id)
            .map(|cell| Arc::clone(cell.value()))
            .ok_or(EngineError::NotFound("booking"))
    }

    pub(crate) fn insert_booking(&self, booking: Booking) -> Arc<Mutex<Booking>> {
        let cell = Arc::new(Mutex::new(booking));
        let id = cell.lock().id;
        self.bookings.insert(id, Arc::clone(&cell));
        cell
    }

    pub(crate) fn next_booking_id(&self) -> BookingId {
        BookingId(self.next_booking.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn next_request_id(&self) -> RequestId {
        RequestId(self.next_request.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn insert_request(&self, request: RescheduleRequest) -> Arc<Mutex<RescheduleRequest>> {
        let cell = Arc::new(Mutex::new(request));
        let id = cell.lock().id;
        self.requests.insert(id, Arc::clone(&cell));
        cell
    }

    /// The per-teacher lock, created lazily. The `Arc` is cloned out so
    /// no map shard lock is held while it is taken.
    pub(crate) fn teacher_lock(&self, teacher: TeacherId) -> Arc<Mutex<()>> {
        Arc::clone(
            self.teacher_locks
                .entry(teacher)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Checks and applies a status transition on a locked booking.
    pub(crate) fn transition(
        booking: &mut Booking,
        next: BookingStatus,
    ) -> Result<(), EngineError> {
        status::validate(booking.status, next, false)?;
        booking.status = next;
        Ok(())
    }

    /// Snapshot of every booking cell, for scan-style jobs and overlap
    /// checks. Shard locks are released before any mutex is taken.
    pub(crate) fn booking_cells(&self) -> Vec<Arc<Mutex<Booking>>> {
        self.bookings
            .iter()
            .map(|cell| Arc::clone(cell.value()))
            .collect()
    }

    pub(crate) fn request_cells(&self) -> Vec<Arc<Mutex<RescheduleRequest>>> {
        self.requests
            .iter()
            .map(|cell| Arc::clone(cell.value()))
            .collect()
    }

    /// True when another live booking of this teacher overlaps the
    /// window. `skip` excludes the booking being moved.
    pub(crate) fn has_overlapping_booking(
        &self,
        teacher: TeacherId,
        start: chrono::DateTime<chrono::Utc>,
        end: chrono::DateTime<chrono::Utc>,
        skip: Option<BookingId>,
    ) -> bool {
        self.booking_cells().into_iter().any(|cell| {
            let b = cell.lock();
            b.teacher == teacher
                && Some(b.id) != skip
                && b.status.holds_slot()
                && b.start_at < end
                && b.end_at > start
        })
    }

    pub(crate) fn notify(
        &self,
        user: UserId,
        kind: NoticeKind,
        title: &str,
        message: String,
        dedupe_key: Option<String>,
    ) {
        self.collab.notifier.notify(Notification {
            user,
            title: title.to_owned(),
            message,
            kind,
            dedupe_key,
        });
    }

    pub(crate) fn notify_admins(&self, title: &str, message: String, dedupe: &str) {
        for admin in self.collab.directory.admins() {
            self.notify(
                admin,
                NoticeKind::Alert,
                title,
                message.clone(),
                Some(format!("{dedupe}-{admin}")),
            );
        }
    }
}
