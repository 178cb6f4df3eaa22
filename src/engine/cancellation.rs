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

//! Cancellation.

use super::BookingEngine;
use crate::base::{BookingId, Role, UserId};
use crate::booking::{Booking, CancellationRecord};
use crate::collab::NoticeKind;
use crate::error::EngineError;
use crate::policy::{RefundBreakdown, refund_breakdown};
use crate::status::BookingStatus;
use tracing::info;

impl BookingEngine {
    /// Preview of the refund split the caller would get right now,
    /// without changing anything.
    pub fn cancellation_estimate(
        &self,
        user: UserId,
        id: BookingId,
    ) -> Result<RefundBreakdown, EngineError> {
        let now = self.now();
        let settings = self.settings();
        let booking = self.booking(id)?;
        let role = self.caller_role(user, &booking)?;
        let locked = locked_amount(&booking);
        let policy = self
            .collab
            .directory
            .teacher(booking.teacher)
            .ok_or(EngineError::NotFound("teacher"))?
            .cancellation_policy;
        Ok(refund_breakdown(
            role,
            policy,
            locked,
            booking.created_at,
            booking.start_at,
            now,
            &settings,
        ))
    }

    /// Cancels a pre-session booking. Settlement runs only when escrow
    /// was actually locked; the slot is always republished and any
    /// package reservation dropped. Idempotent when already cancelled.
    pub fn cancel(
        &self,
        user: UserId,
        id: BookingId,
        reason: Option<String>,
    ) -> Result<Booking, EngineError> {
        let now = self.now();
        let settings = self.settings();
        let cell = self.booking_cell(id)?;

        let snapshot = {
            let mut booking = cell.lock();
            let role = self.caller_role(user, &booking)?;
            if booking.status.is_cancelled() {
                return Ok(booking.clone());
            }
            if !matches!(
                booking.status,
                BookingStatus::PendingTeacherApproval
                    | BookingStatus::WaitingForPayment
                    | BookingStatus::Scheduled
            ) {
                return Err(EngineError::invalid("booking can no longer be cancelled"));
            }

            let target = match role {
                Role::Parent | Role::Student => BookingStatus::CancelledByParent,
                Role::Teacher => BookingStatus::CancelledByTeacher,
                Role::Admin => BookingStatus::CancelledByAdmin,
            };

            let locked = locked_amount(&booking);
            let policy = self
                .collab
                .directory
                .teacher(booking.teacher)
                .ok_or(EngineError::NotFound("teacher"))?
                .cancellation_policy;
            let breakdown = refund_breakdown(
                role,
                policy,
                locked,
                booking.created_at,
                booking.start_at,
                now,
                &settings,
            );

            if locked > 0 {
                self.ledger().settle_cancellation(
                    booking.payer,
                    booking.teacher_user,
                    locked,
                    breakdown.refund,
                    breakdown.teacher_compensation,
                    breakdown.platform_revenue,
                    booking.id,
                    &format!("booking-{}-settle", booking.id),
                )?;
            }
            Self::transition(&mut booking, target)?;
            booking.cancellation = Some(CancellationRecord {
                cancelled_by: user,
                reason,
                cancelled_at: now,
                refund: breakdown.refund,
                teacher_compensation: breakdown.teacher_compensation,
                platform_revenue: breakdown.platform_revenue,
            });
            booking.clone()
        };

        self.release_held_slot(&snapshot);
        info!(booking = %snapshot.id, status = ?snapshot.status, "booking cancelled");

        // The counterparty hears about it, except on admin cancellations.
        // Idempotent replays returned early and never re-notify.
        if snapshot.status != BookingStatus::CancelledByAdmin {
            let other = if snapshot.status == BookingStatus::CancelledByTeacher {
                snapshot.payer
            } else {
                snapshot.teacher_user
            };
            self.notify(
                other,
                NoticeKind::Info,
                "Session cancelled",
                format!("Session {} was cancelled", snapshot.id),
                None,
            );
        }
        Ok(snapshot)
    }

    /// Resolves and authorizes the caller's role for this booking:
    /// payers and teachers only touch their own, admins anything.
    fn caller_role(&self, user: UserId, booking: &Booking) -> Result<Role, EngineError> {
        let role = self
            .collab
            .directory
            .role(user)
            .ok_or(EngineError::NotFound("user"))?;
        let allowed = match role {
            Role::Admin => true,
            Role::Teacher => booking.teacher_user == user,
            Role::Parent | Role::Student => booking.payer == user,
        };
        if allowed {
            Ok(role)
        } else {
            Err(EngineError::Forbidden("not this user's booking"))
        }
    }
}

/// Escrow actually held for this booking: only `Scheduled` wallet-paid
/// bookings have locked funds to settle.
fn locked_amount(booking: &Booking) -> i64 {
    if booking.status == BookingStatus::Scheduled
        && booking.redemption.is_none()
        && booking.price > 0
    {
        booking.price
    } else {
        0
    }
}
