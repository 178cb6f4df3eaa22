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

//! Rescheduling.
//!
//! Payers move a session directly, within their cutoff and quota;
//! admins move one unconditionally. Teachers can only propose: the
//! payer has a response window to accept or decline, after which the
//! request lazily expires. Every path moves
//! the session under the per-teacher lock and re-checks status and
//! reschedule count at execution time, so a concurrent cancel or a
//! competing move surfaces as `Conflict`.

use super::BookingEngine;
use crate::base::{BookingId, RequestId, Role, UserId};
use crate::booking::{Booking, RequestState, RescheduleRequest};
use crate::collab::NoticeKind;
use crate::error::EngineError;
use crate::status::BookingStatus;
use chrono::{DateTime, Duration, Timelike, Utc};
use tracing::info;

impl BookingEngine {
    /// Payer moves a `Scheduled` session to a new start time.
    pub fn reschedule(
        &self,
        payer: UserId,
        id: BookingId,
        new_start: DateTime<Utc>,
    ) -> Result<Booking, EngineError> {
        let now = self.now();
        let rules = self.settings().reschedule;
        let cell = self.booking_cell(id)?;

        // Snapshot first; the authoritative re-check happens under the
        // teacher lock below.
        let (teacher, expected_count) = {
            let booking = cell.lock();
            if booking.payer != payer {
                return Err(EngineError::Forbidden("not this user's booking"));
            }
            if booking.status != BookingStatus::Scheduled {
                return Err(EngineError::invalid("only scheduled sessions can be moved"));
            }
            if booking.reschedule_count >= rules.payer_max {
                return Err(EngineError::invalid("reschedule limit reached"));
            }
            if booking.start_at - now < Duration::hours(rules.payer_cutoff_hours) {
                return Err(EngineError::invalid("too close to the session to reschedule"));
            }
            (booking.teacher, booking.reschedule_count)
        };

        let lock = self.teacher_lock(teacher);
        let _guard = lock
            .try_lock()
            .ok_or(EngineError::Conflict("teacher is being booked, retry"))?;
        let snapshot = self.apply_move(&cell, new_start, expected_count, now)?;

        info!(booking = %snapshot.id, start = %snapshot.start_at, "session rescheduled by payer");
        self.notify(
            snapshot.teacher_user,
            NoticeKind::Info,
            "Session moved",
            format!("Session {} was moved to {}", snapshot.id, snapshot.start_at),
            None,
        );
        Ok(snapshot)
    }

    /// Admin moves a `Scheduled` session, bypassing the payer's cutoff
    /// and quota. The slot re-validation and the reschedule-count check
    /// still apply, so a concurrent move surfaces as `Conflict`.
    pub fn admin_reschedule(
        &self,
        admin: UserId,
        id: BookingId,
        new_start: DateTime<Utc>,
    ) -> Result<Booking, EngineError> {
        let now = self.now();
        if self.collab.directory.role(admin) != Some(Role::Admin) {
            return Err(EngineError::Forbidden("only admins override reschedules"));
        }
        let cell = self.booking_cell(id)?;

        let (teacher, expected_count) = {
            let booking = cell.lock();
            if booking.status != BookingStatus::Scheduled {
                return Err(EngineError::invalid("only scheduled sessions can be moved"));
            }
            (booking.teacher, booking.reschedule_count)
        };

        let lock = self.teacher_lock(teacher);
        let _guard = lock
            .try_lock()
            .ok_or(EngineError::Conflict("teacher is being booked, retry"))?;
        let snapshot = self.apply_move(&cell, new_start, expected_count, now)?;

        info!(booking = %snapshot.id, start = %snapshot.start_at, "session rescheduled by admin");
        for user in [snapshot.payer, snapshot.teacher_user] {
            self.notify(
                user,
                NoticeKind::Info,
                "Session moved",
                format!("Session {} was moved to {}", snapshot.id, snapshot.start_at),
                None,
            );
        }
        Ok(snapshot)
    }

    /// Teacher proposes a new time; the payer must answer within the
    /// response window.
    pub fn request_reschedule(
        &self,
        teacher_user: UserId,
        id: BookingId,
        proposed_start: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<RescheduleRequest, EngineError> {
        let now = self.now();
        let rules = self.settings().reschedule;
        let cell = self.booking_cell(id)?;

        let payer = {
            let booking = cell.lock();
            if booking.teacher_user != teacher_user {
                return Err(EngineError::Forbidden("not this teacher's booking"));
            }
            if booking.status != BookingStatus::Scheduled {
                return Err(EngineError::invalid("only scheduled sessions can be moved"));
            }
            if booking.start_at - now < Duration::hours(rules.teacher_cutoff_hours) {
                return Err(EngineError::invalid("too close to the session to reschedule"));
            }
            booking.payer
        };
        validate_start(proposed_start, now)?;

        // Quota scan runs with no booking mutex held; request mutexes
        // always come before booking mutexes in the lock order.
        let prior = self
            .requests
            .iter()
            .filter(|r| {
                let r = r.lock();
                r.booking == id && r.requested_by == teacher_user
            })
            .count();
        if prior >= rules.teacher_max as usize {
            return Err(EngineError::invalid("reschedule request limit reached"));
        }

        let request = RescheduleRequest {
            id: self.next_request_id(),
            booking: id,
            requested_by: teacher_user,
            proposed_start,
            reason,
            state: RequestState::Pending,
            created_at: now,
            expires_at: now + Duration::hours(rules.response_timeout_hours),
            resolved_at: None,
        };
        let cell = self.insert_request(request);
        let snapshot = cell.lock().clone();

        info!(request = %snapshot.id, booking = %snapshot.booking, "reschedule requested by teacher");
        self.notify(
            payer,
            NoticeKind::Action,
            "Reschedule proposed",
            format!(
                "The teacher proposes moving session {} to {}",
                snapshot.booking, snapshot.proposed_start
            ),
            None,
        );
        Ok(snapshot)
    }

    /// Payer answers a pending reschedule request. The expiry is
    /// re-checked here: an expired request is marked and rejected even
    /// if the scheduler has not swept it yet.
    pub fn respond_reschedule(
        &self,
        payer: UserId,
        request_id: RequestId,
        accept: bool,
    ) -> Result<RescheduleRequest, EngineError> {
        let now = self.now();
        let request_cell = self
            .requests
            .get(&request_id)
            .map(|r| std::sync::Arc::clone(r.value()))
            .ok_or(EngineError::NotFound("reschedule request"))?;

        // Request mutex is held across the whole response; the lock
        // order request -> teacher -> booking is never reversed.
        let mut request = request_cell.lock();
        if request.state != RequestState::Pending {
            return Err(EngineError::Conflict("request already resolved"));
        }
        if now > request.expires_at {
            request.state = RequestState::Expired;
            request.resolved_at = Some(now);
            return Err(EngineError::invalid("reschedule request expired"));
        }
        let booking_cell = self.booking_cell(request.booking)?;
        let (booking_payer, teacher, teacher_user, expected_count) = {
            let booking = booking_cell.lock();
            (
                booking.payer,
                booking.teacher,
                booking.teacher_user,
                booking.reschedule_count,
            )
        };
        if booking_payer != payer {
            return Err(EngineError::Forbidden("not this user's booking"));
        }

        if !accept {
            request.state = RequestState::Declined;
            request.resolved_at = Some(now);
            self.notify(
                teacher_user,
                NoticeKind::Info,
                "Reschedule declined",
                format!("The payer declined moving session {}", request.booking),
                None,
            );
            return Ok(request.clone());
        }

        let lock = self.teacher_lock(teacher);
        let _guard = lock
            .try_lock()
            .ok_or(EngineError::Conflict("teacher is being booked, retry"))?;
        let snapshot = self.apply_move(&booking_cell, request.proposed_start, expected_count, now)?;
        request.state = RequestState::Approved;
        request.resolved_at = Some(now);

        info!(request = %request.id, booking = %snapshot.id, "reschedule approved");
        self.notify(
            teacher_user,
            NoticeKind::Info,
            "Reschedule approved",
            format!("Session {} moved to {}", snapshot.id, snapshot.start_at),
            None,
        );
        Ok(request.clone())
    }

    /// Moves the session. Caller holds the per-teacher lock. The status
    /// and reschedule count are compared against the caller's snapshot;
    /// a mismatch means another operation won the race.
    fn apply_move(
        &self,
        cell: &std::sync::Arc<parking_lot::Mutex<Booking>>,
        new_start: DateTime<Utc>,
        expected_count: u32,
        now: DateTime<Utc>,
    ) -> Result<Booking, EngineError> {
        validate_start(new_start, now)?;
        let (id, teacher, old_start, duration) = {
            let booking = cell.lock();
            (
                booking.id,
                booking.teacher,
                booking.start_at,
                booking.end_at - booking.start_at,
            )
        };
        let new_end = new_start + duration;
        if !self.collab.slots.covers(teacher, new_start, new_end) {
            return Err(EngineError::Conflict("slot no longer available"));
        }
        if self.has_overlapping_booking(teacher, new_start, new_end, Some(id)) {
            return Err(EngineError::Conflict("slot no longer available"));
        }

        let mut booking = cell.lock();
        if booking.status != BookingStatus::Scheduled
            || booking.reschedule_count != expected_count
        {
            return Err(EngineError::Conflict("booking changed by another operation"));
        }
        self.collab.slots.consume_overlapping(teacher, new_start, new_end);
        let mut slot = old_start;
        while slot < old_start + duration {
            self.collab.slots.restore_slot(teacher, slot);
            slot += Duration::hours(1);
        }
        booking.start_at = new_start;
        booking.end_at = new_end;
        booking.reschedule_count += 1;
        Ok(booking.clone())
    }
}

fn validate_start(start: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), EngineError> {
    if start <= now {
        return Err(EngineError::invalid("session start must be in the future"));
    }
    if start.minute() != 0 || start.second() != 0 {
        return Err(EngineError::invalid("session must start on the hour"));
    }
    Ok(())
}
