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

//! Booking creation and teacher rejection.

use super::BookingEngine;
use crate::base::{BookingId, PackageId, Role, SubjectId, TeacherId, TierId, UserId};
use crate::booking::{Beneficiary, Booking};
use crate::collab::NoticeKind;
use crate::error::EngineError;
use crate::status::BookingStatus;
use chrono::{DateTime, Duration, Timelike, Utc};
use tracing::info;

/// Everything the payer submits to request a session. The price is
/// never part of it; it is computed server-side from the teacher's
/// published rate.
#[derive(Debug, Clone)]
pub struct CreateBooking {
    pub teacher: TeacherId,
    pub subject: SubjectId,
    pub beneficiary: Beneficiary,
    pub start_at: DateTime<Utc>,
    pub duration_minutes: i64,
    pub timezone: chrono_tz::Tz,
    pub note_to_teacher: Option<String>,
    pub demo: bool,
    /// Fund from an already-owned package instead of the wallet.
    pub package: Option<PackageId>,
    /// Purchase this package tier at payment time.
    pub pending_tier: Option<TierId>,
}

impl BookingEngine {
    /// Creates a booking request in `PendingTeacherApproval`, consuming
    /// the teacher's published slots for the window. Serialized per
    /// teacher: a concurrent creation for the same teacher fails fast
    /// with `Conflict` instead of double-booking.
    pub fn create(&self, payer: UserId, req: CreateBooking) -> Result<Booking, EngineError> {
        let now = self.now();
        let settings = self.settings();

        let role = self
            .collab
            .directory
            .role(payer)
            .ok_or(EngineError::NotFound("user"))?;
        match (&role, &req.beneficiary) {
            (Role::Parent, Beneficiary::Child(child)) => {
                if !self.collab.directory.owns_child(payer, *child) {
                    return Err(EngineError::Forbidden("child does not belong to this user"));
                }
            }
            (Role::Parent, Beneficiary::Payer) => {
                return Err(EngineError::invalid("a parent must book for a child"));
            }
            (Role::Student, Beneficiary::Payer) => {}
            (Role::Student, Beneficiary::Child(_)) => {
                return Err(EngineError::invalid("a student books for themselves"));
            }
            _ => return Err(EngineError::Forbidden("only parents and students book sessions")),
        }

        let profile = self
            .collab
            .directory
            .teacher(req.teacher)
            .ok_or(EngineError::NotFound("teacher"))?;
        if profile.user == payer {
            return Err(EngineError::invalid("self-booking is not allowed"));
        }
        if !profile.subjects.contains(&req.subject) {
            return Err(EngineError::NotFound("subject"));
        }
        if profile.on_vacation {
            return Err(EngineError::invalid("teacher is on vacation"));
        }
        if req.demo && !profile.demo_enabled {
            return Err(EngineError::invalid("teacher does not offer demo sessions"));
        }

        if req.start_at <= now {
            return Err(EngineError::invalid("session start must be in the future"));
        }
        // Slots are whole hours, so bookings are too.
        if req.start_at.minute() != 0 || req.start_at.second() != 0 {
            return Err(EngineError::invalid("session must start on the hour"));
        }
        if req.duration_minutes <= 0 || req.duration_minutes % 60 != 0 {
            return Err(EngineError::invalid("duration must be a whole number of hours"));
        }
        let hours = req.duration_minutes / 60;
        if hours > settings.max_session_hours {
            return Err(EngineError::invalid("session is too long"));
        }
        let end_at = req.start_at + Duration::minutes(req.duration_minutes);

        if req.package.is_some() && req.pending_tier.is_some() {
            return Err(EngineError::invalid(
                "choose either an owned package or a tier purchase",
            ));
        }

        let price = if req.demo || req.package.is_some() || req.pending_tier.is_some() {
            0
        } else {
            profile.hourly_rate * hours
        };

        // Everything below runs under the per-teacher lock so the slot
        // check and consumption are atomic with respect to competing
        // creations and reschedules.
        let lock = self.teacher_lock(req.teacher);
        let _guard = lock
            .try_lock()
            .ok_or(EngineError::Conflict("teacher is being booked, retry"))?;

        if !self.collab.slots.covers(req.teacher, req.start_at, end_at) {
            return Err(EngineError::Conflict("slot no longer available"));
        }
        if self.has_overlapping_booking(req.teacher, req.start_at, end_at, None) {
            return Err(EngineError::Conflict("slot no longer available"));
        }

        let id = self.next_booking_id();
        let redemption = match req.package {
            Some(package) => Some(self.collab.packages.reserve(package, id)?),
            None => None,
        };

        let booking = Booking {
            id,
            payer,
            teacher: req.teacher,
            teacher_user: profile.user,
            beneficiary: req.beneficiary,
            subject: req.subject,
            status: BookingStatus::PendingTeacherApproval,
            start_at: req.start_at,
            end_at,
            timezone: req.timezone,
            price,
            redemption,
            package: req.package,
            pending_tier: req.pending_tier,
            demo: req.demo,
            meeting_link: None,
            note_to_teacher: req.note_to_teacher,
            payment_deadline: None,
            confirmation_deadline: None,
            reschedule_count: 0,
            report: None,
            payer_rating: None,
            cancellation: None,
            reminders_sent: Vec::new(),
            meeting_link_warning_sent: false,
            stale_alert_sent: false,
            created_at: now,
            approved_at: None,
            paid_at: None,
            completed_at: None,
            confirmed_at: None,
        };
        self.collab
            .slots
            .consume_overlapping(req.teacher, req.start_at, end_at);
        let cell = self.insert_booking(booking);
        let snapshot = cell.lock().clone();
        drop(_guard);

        info!(booking = %snapshot.id, teacher = %snapshot.teacher, "booking requested");
        self.notify(
            profile.user,
            NoticeKind::Action,
            "New session request",
            format!("Session {} requested for {}", snapshot.id, snapshot.start_at),
            None,
        );
        Ok(snapshot)
    }

    /// Teacher declines a pending request. Idempotent when already
    /// rejected. The consumed slots are republished.
    pub fn reject(&self, teacher_user: UserId, id: BookingId) -> Result<Booking, EngineError> {
        let cell = self.booking_cell(id)?;
        let snapshot = {
            let mut booking = cell.lock();
            if booking.teacher_user != teacher_user {
                return Err(EngineError::Forbidden("not this teacher's booking"));
            }
            if booking.status == BookingStatus::RejectedByTeacher {
                return Ok(booking.clone());
            }
            Self::transition(&mut booking, BookingStatus::RejectedByTeacher)?;
            booking.clone()
        };

        self.release_held_slot(&snapshot);
        info!(booking = %snapshot.id, "booking rejected by teacher");
        self.notify(
            snapshot.payer,
            NoticeKind::Info,
            "Session request declined",
            format!("The teacher declined session {}", snapshot.id),
            None,
        );
        Ok(snapshot)
    }

    /// Republishes every hourly slot the booking consumed and drops any
    /// reserved package redemption. Used by every path that frees a
    /// held slot.
    pub(crate) fn release_held_slot(&self, booking: &Booking) {
        let mut slot = booking.start_at;
        while slot < booking.end_at {
            self.collab.slots.restore_slot(booking.teacher, slot);
            slot += Duration::hours(1);
        }
        if booking.redemption.is_some() {
            self.collab.packages.cancel_reservation(booking.id);
        }
    }
}
