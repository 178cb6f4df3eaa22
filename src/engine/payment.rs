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

//! Teacher approval and payment.
//!
//! Approval computes the payment deadline and, when the payer's wallet
//! already covers the price, locks the funds immediately. Otherwise the
//! booking waits in `WaitingForPayment` until `pay` or the deadline.

use super::BookingEngine;
use crate::base::{BookingId, UserId};
use crate::booking::Booking;
use crate::collab::NoticeKind;
use crate::error::EngineError;
use crate::settings::SystemSettings;
use crate::status::BookingStatus;
use chrono::{DateTime, Duration, Utc};
use tracing::info;

impl BookingEngine {
    /// Teacher accepts the request. Already-approved bookings replay as
    /// a no-op. Funds (or package capacity) are committed here when
    /// possible; otherwise a payment deadline is set.
    pub fn approve(&self, teacher_user: UserId, id: BookingId) -> Result<Booking, EngineError> {
        let now = self.now();
        let settings = self.settings();
        let cell = self.booking_cell(id)?;

        let (snapshot, notice) = {
            let mut booking = cell.lock();
            if booking.teacher_user != teacher_user {
                return Err(EngineError::Forbidden("not this teacher's booking"));
            }
            // Idempotent replay for anything at or past approval.
            if matches!(
                booking.status,
                BookingStatus::WaitingForPayment
                    | BookingStatus::Scheduled
                    | BookingStatus::PendingConfirmation
                    | BookingStatus::Completed
            ) {
                return Ok(booking.clone());
            }
            // Anything else (disputed, terminal) fails the guard here.
            crate::status::validate(booking.status, BookingStatus::Scheduled, false)?;

            let deadline = payment_deadline(now, booking.start_at, &settings)?;
            booking.approved_at = Some(now);

            if booking.redemption.is_some() {
                // Package-funded: the reservation from creation must
                // still be coverable.
                if let Some(package) = booking.package
                    && !self.collab.packages.has_capacity(package)
                {
                    return Err(EngineError::invalid("package has no sessions left"));
                }
                Self::transition(&mut booking, BookingStatus::Scheduled)?;
                booking.paid_at = Some(now);
                (booking.clone(), "Session scheduled")
            } else if booking.price == 0 {
                Self::transition(&mut booking, BookingStatus::Scheduled)?;
                booking.paid_at = Some(now);
                (booking.clone(), "Session scheduled")
            } else if booking.pending_tier.is_none() {
                // The lock attempt is the balance check; a pre-read
                // would race with concurrent drains of the wallet.
                match self.ledger().lock_escrow(
                    booking.payer,
                    booking.price,
                    booking.id,
                    &format!("booking-{}-lock", booking.id),
                ) {
                    Ok(_) => {
                        Self::transition(&mut booking, BookingStatus::Scheduled)?;
                        booking.paid_at = Some(now);
                        (booking.clone(), "Session scheduled")
                    }
                    Err(EngineError::InsufficientFunds) => {
                        Self::transition(&mut booking, BookingStatus::WaitingForPayment)?;
                        booking.payment_deadline = Some(deadline);
                        (booking.clone(), "Payment required")
                    }
                    Err(err) => return Err(err),
                }
            } else {
                Self::transition(&mut booking, BookingStatus::WaitingForPayment)?;
                booking.payment_deadline = Some(deadline);
                (booking.clone(), "Payment required")
            }
        };

        info!(booking = %snapshot.id, status = ?snapshot.status, "booking approved");
        self.notify(
            snapshot.payer,
            NoticeKind::Action,
            notice,
            format!("Session {} was approved by the teacher", snapshot.id),
            None,
        );
        Ok(snapshot)
    }

    /// Payer settles a `WaitingForPayment` booking: locks wallet funds,
    /// or completes the pending package purchase. Idempotent once
    /// `Scheduled`. The deadline is re-checked here even though the
    /// scheduler owns the expiry transition.
    pub fn pay(&self, payer: UserId, id: BookingId) -> Result<Booking, EngineError> {
        let now = self.now();
        let cell = self.booking_cell(id)?;

        let snapshot = {
            let mut booking = cell.lock();
            if booking.payer != payer {
                return Err(EngineError::Forbidden("not this user's booking"));
            }
            if booking.status == BookingStatus::Scheduled {
                return Ok(booking.clone());
            }
            if booking.status != BookingStatus::WaitingForPayment {
                return Err(EngineError::invalid("booking is not awaiting payment"));
            }
            if let Some(deadline) = booking.payment_deadline
                && now > deadline
            {
                return Err(EngineError::invalid("payment window closed"));
            }

            if let Some(tier) = booking.pending_tier {
                let package = self.collab.packages.purchase(
                    payer,
                    tier,
                    &format!("booking-{}-purchase", booking.id),
                )?;
                booking.redemption =
                    Some(self.collab.packages.reserve(package, booking.id)?);
                booking.package = Some(package);
            } else {
                self.ledger().lock_escrow(
                    payer,
                    booking.price,
                    booking.id,
                    &format!("booking-{}-lock", booking.id),
                )?;
            }
            Self::transition(&mut booking, BookingStatus::Scheduled)?;
            booking.paid_at = Some(now);
            booking.clone()
        };

        info!(booking = %snapshot.id, "booking paid");
        self.notify(
            snapshot.teacher_user,
            NoticeKind::Info,
            "Session confirmed",
            format!("Session {} is paid and scheduled", snapshot.id),
            None,
        );
        Ok(snapshot)
    }

    /// Teacher attaches the meeting link to a scheduled session.
    pub fn set_meeting_link(
        &self,
        teacher_user: UserId,
        id: BookingId,
        link: String,
    ) -> Result<Booking, EngineError> {
        if link.trim().is_empty() {
            return Err(EngineError::invalid("meeting link must not be empty"));
        }
        let cell = self.booking_cell(id)?;
        let mut booking = cell.lock();
        if booking.teacher_user != teacher_user {
            return Err(EngineError::Forbidden("not this teacher's booking"));
        }
        if !matches!(
            booking.status,
            BookingStatus::Scheduled | BookingStatus::WaitingForPayment
        ) {
            return Err(EngineError::invalid("session is not upcoming"));
        }
        booking.meeting_link = Some(link);
        Ok(booking.clone())
    }
}

/// Payment deadline rule: the earlier of `now + payment window` and
/// `start − min buffer`, with a short last-chance window when the
/// session is imminent. Fails when even the last-chance window would
/// not fit before the session starts.
pub(crate) fn payment_deadline(
    now: DateTime<Utc>,
    start_at: DateTime<Utc>,
    settings: &SystemSettings,
) -> Result<DateTime<Utc>, EngineError> {
    let deadline = (now + settings.payment_window()).min(start_at - settings.min_buffer());
    if deadline > now {
        return Ok(deadline);
    }
    let last_chance = now + Duration::minutes(settings.min_payment_window_minutes);
    if last_chance < start_at {
        Ok(last_chance)
    } else {
        Err(EngineError::invalid("payment window closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, hour, minute, 0).unwrap()
    }

    #[test]
    fn deadline_is_min_of_window_and_buffer() {
        let settings = SystemSettings::default();
        // Session far out: window wins.
        let d = payment_deadline(at(0, 0), at(0, 0) + Duration::days(7), &settings).unwrap();
        assert_eq!(d, at(0, 0) + Duration::hours(24));
        // Session in 10 hours: buffer wins (start - 2h = 8h out).
        let d = payment_deadline(at(0, 0), at(10, 0), &settings).unwrap();
        assert_eq!(d, at(8, 0));
    }

    #[test]
    fn imminent_session_gets_last_chance_window() {
        let settings = SystemSettings::default();
        // Start in 1 hour: start - 2h buffer is in the past, but a
        // 15-minute window still fits.
        let d = payment_deadline(at(0, 0), at(1, 0), &settings).unwrap();
        assert_eq!(d, at(0, 15));
    }

    #[test]
    fn too_close_to_start_fails() {
        let settings = SystemSettings::default();
        let err = payment_deadline(at(0, 0), at(0, 10), &settings).unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));
    }
}
