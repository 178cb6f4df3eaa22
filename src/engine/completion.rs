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

//! Session completion, confirmation, disputes.
//!
//! A booking settles through exactly one path: the package redemption
//! when one is linked, the escrow ledger when real money was locked,
//! and nothing at all for free sessions. The branch lives in one place
//! ([`BookingEngine::settle_release`]) so no flow can run both.

use super::BookingEngine;
use crate::base::{BookingId, Role, UserId};
use crate::booking::{Booking, Dispute, DisputeKind, SessionReport};
use crate::collab::NoticeKind;
use crate::error::EngineError;
use crate::status::BookingStatus;
use chrono::{DateTime, Duration, Utc};
use tracing::info;

/// Admin's call on a disputed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisputeResolution {
    /// Session counts: release escrow to the teacher as usual.
    ReleaseToTeacher,
    /// Session refunded in full to the payer.
    RefundPayer,
}

impl BookingEngine {
    /// Teacher marks the session as held and files the report. Opens
    /// the payer's confirmation window.
    pub fn complete(
        &self,
        teacher_user: UserId,
        id: BookingId,
        report: Option<SessionReport>,
    ) -> Result<Booking, EngineError> {
        let now = self.now();
        let settings = self.settings();
        if let Some(report) = &report {
            report.validate()?;
        }
        let cell = self.booking_cell(id)?;

        let snapshot = {
            let mut booking = cell.lock();
            if booking.teacher_user != teacher_user {
                return Err(EngineError::Forbidden("not this teacher's booking"));
            }
            if booking.status == BookingStatus::PendingConfirmation {
                return Ok(booking.clone());
            }
            if booking.status != BookingStatus::Scheduled {
                return Err(EngineError::invalid("session is not in progress"));
            }
            if now < booking.start_at {
                return Err(EngineError::invalid("session has not started yet"));
            }
            if now > booking.end_at + Duration::hours(settings.completion_grace_hours) {
                return Err(EngineError::invalid("completion window closed"));
            }
            Self::transition(&mut booking, BookingStatus::PendingConfirmation)?;
            booking.report = report;
            booking.completed_at = Some(now);
            booking.confirmation_deadline = Some(now + settings.dispute_window());
            booking.clone()
        };

        info!(booking = %snapshot.id, "session completed by teacher");
        self.notify(
            snapshot.payer,
            NoticeKind::Action,
            "Confirm your session",
            format!(
                "Please confirm session {} or raise an issue before {}",
                snapshot.id,
                snapshot
                    .confirmation_deadline
                    .map(|d| d.to_rfc3339())
                    .unwrap_or_default()
            ),
            None,
        );
        Ok(snapshot)
    }

    /// Payer confirms the session, releasing escrow to the teacher.
    /// Idempotent once `Completed`. Rejected after the confirmation
    /// window closes, left to the auto-release job.
    pub fn confirm(
        &self,
        payer: UserId,
        id: BookingId,
        rating: Option<u8>,
    ) -> Result<Booking, EngineError> {
        let now = self.now();
        if let Some(rating) = rating
            && !(1..=5).contains(&rating)
        {
            return Err(EngineError::invalid("rating must be between 1 and 5"));
        }
        let cell = self.booking_cell(id)?;

        let snapshot = {
            let mut booking = cell.lock();
            if booking.payer != payer {
                return Err(EngineError::Forbidden("not this user's booking"));
            }
            if booking.status == BookingStatus::Completed {
                return Ok(booking.clone());
            }
            if booking.status != BookingStatus::PendingConfirmation {
                return Err(EngineError::invalid("session is not awaiting confirmation"));
            }
            // Deadline re-checked at execution time.
            if let Some(deadline) = booking.confirmation_deadline
                && now > deadline
            {
                return Err(EngineError::invalid("confirmation window closed"));
            }
            self.settle_release(&booking)?;
            Self::transition(&mut booking, BookingStatus::Completed)?;
            booking.payer_rating = rating;
            booking.confirmed_at = Some(now);
            booking.clone()
        };

        info!(booking = %snapshot.id, "session confirmed, escrow released");
        self.notify(
            snapshot.teacher_user,
            NoticeKind::Info,
            "Session confirmed",
            format!("Session {} was confirmed and your earnings released", snapshot.id),
            None,
        );
        Ok(snapshot)
    }

    /// Payer contests the session before the window closes. Freezes the
    /// escrow and alerts every admin.
    pub fn raise_dispute(
        &self,
        payer: UserId,
        id: BookingId,
        kind: DisputeKind,
        description: String,
        evidence: Vec<String>,
    ) -> Result<Booking, EngineError> {
        let now = self.now();
        let cell = self.booking_cell(id)?;

        let snapshot = {
            let mut booking = cell.lock();
            if booking.payer != payer {
                return Err(EngineError::Forbidden("only the payer may dispute"));
            }
            if !matches!(
                booking.status,
                BookingStatus::Scheduled | BookingStatus::PendingConfirmation
            ) {
                return Err(EngineError::invalid("session cannot be disputed"));
            }
            if self.disputes.contains_key(&id) {
                return Err(EngineError::Conflict("dispute already exists"));
            }
            let dispute = Dispute {
                booking: id,
                raised_by: payer,
                kind,
                description,
                evidence,
                raised_at: now,
            };
            dispute.validate()?;
            Self::transition(&mut booking, BookingStatus::Disputed)?;
            self.disputes.insert(id, dispute);
            booking.clone()
        };

        info!(booking = %snapshot.id, ?kind, "dispute raised");
        self.notify_admins(
            "Session disputed",
            format!("Session {} was disputed by the payer", snapshot.id),
            &format!("dispute-{}", snapshot.id),
        );
        self.notify(
            snapshot.teacher_user,
            NoticeKind::Alert,
            "Session disputed",
            format!("Session {} is under review", snapshot.id),
            None,
        );
        Ok(snapshot)
    }

    /// Admin closes a dispute either way.
    pub fn resolve_dispute(
        &self,
        admin: UserId,
        id: BookingId,
        resolution: DisputeResolution,
    ) -> Result<Booking, EngineError> {
        let now = self.now();
        if self.collab.directory.role(admin) != Some(Role::Admin) {
            return Err(EngineError::Forbidden("only admins resolve disputes"));
        }
        let cell = self.booking_cell(id)?;

        let snapshot = {
            let mut booking = cell.lock();
            if booking.status != BookingStatus::Disputed {
                return Err(EngineError::invalid("booking is not disputed"));
            }
            match resolution {
                DisputeResolution::ReleaseToTeacher => {
                    self.settle_release(&booking)?;
                    Self::transition(&mut booking, BookingStatus::Completed)?;
                    booking.confirmed_at = Some(now);
                }
                DisputeResolution::RefundPayer => {
                    if booking.redemption.is_none() && booking.price > 0 {
                        self.ledger().settle_cancellation(
                            booking.payer,
                            booking.teacher_user,
                            booking.price,
                            booking.price,
                            0,
                            0,
                            booking.id,
                            &format!("booking-{}-settle", booking.id),
                        )?;
                    }
                    Self::transition(&mut booking, BookingStatus::CancelledByAdmin)?;
                }
            }
            booking.clone()
        };
        if snapshot.status == BookingStatus::CancelledByAdmin {
            // Cancelling the session frees its slots and any package
            // reservation, same as an ordinary cancel.
            self.release_held_slot(&snapshot);
        }

        info!(booking = %snapshot.id, ?resolution, "dispute resolved");
        for user in [snapshot.payer, snapshot.teacher_user] {
            self.notify(
                user,
                NoticeKind::Info,
                "Dispute resolved",
                format!("Session {} dispute was resolved", snapshot.id),
                None,
            );
        }
        Ok(snapshot)
    }

    /// Releases a funded booking through its single settlement path.
    /// Called with the booking mutex held, before the transition to
    /// `Completed`.
    pub(crate) fn settle_release(&self, booking: &Booking) -> Result<(), EngineError> {
        if booking.redemption.is_some() {
            self.collab
                .packages
                .release_session(booking.id, &format!("booking-{}-release", booking.id))
        } else if booking.price > 0 {
            self.ledger()
                .release(
                    booking.payer,
                    booking.teacher_user,
                    booking.price,
                    self.settings().commission_rate,
                    booking.id,
                    &format!("booking-{}-release", booking.id),
                )
                .map(|_| ())
        } else {
            Ok(())
        }
    }

    /// Auto-release path used by the scheduler once the confirmation
    /// window has lapsed. Returns `Ok(false)` when the booking was no
    /// longer eligible by the time the mutex was taken.
    pub(crate) fn auto_release_one(
        &self,
        cell: &parking_lot::Mutex<Booking>,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let snapshot = {
            let mut booking = cell.lock();
            if booking.status != BookingStatus::PendingConfirmation {
                return Ok(false);
            }
            match booking.confirmation_deadline {
                Some(deadline) if now > deadline => {}
                _ => return Ok(false),
            }
            self.settle_release(&booking)?;
            Self::transition(&mut booking, BookingStatus::Completed)?;
            booking.confirmed_at = Some(now);
            booking.clone()
        };
        info!(booking = %snapshot.id, "escrow auto-released after confirmation window");
        self.notify(
            snapshot.teacher_user,
            NoticeKind::Info,
            "Earnings released",
            format!("Session {} auto-completed, earnings released", snapshot.id),
            Some(format!("auto-release-{}", snapshot.id)),
        );
        Ok(true)
    }
}
