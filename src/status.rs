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

//! Booking status state machine.
//!
//! Implemented State Machine
//!
//  PendingTeacherApproval ──approve──► Scheduled ──complete──► PendingConfirmation
//         │    │                          │  │                     │        │
//         │    └──approve (no funds)──►   │  └──dispute──►         │        └──confirm / auto-release──► Completed
//         │        WaitingForPayment ──pay┘       Disputed ◄──dispute──────┘
//         │
//         └──reject / cancel / expire──► terminal
//!
//! The transition table is the single source of truth; every
//! state-changing operation calls [`validate`] before touching anything
//! else.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Lifecycle status of a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    PendingTeacherApproval,
    WaitingForPayment,
    Scheduled,
    PendingConfirmation,
    Completed,
    Disputed,
    CancelledByParent,
    CancelledByTeacher,
    CancelledByAdmin,
    RejectedByTeacher,
    Expired,
}

impl BookingStatus {
    /// Statuses a booking may move to from `self`.
    pub fn allowed_transitions(self) -> &'static [BookingStatus] {
        use BookingStatus::*;
        match self {
            PendingTeacherApproval => &[
                WaitingForPayment,
                Scheduled,
                RejectedByTeacher,
                CancelledByParent,
                CancelledByAdmin,
                Expired,
            ],
            WaitingForPayment => &[Scheduled, CancelledByParent, CancelledByAdmin, Expired],
            Scheduled => &[
                PendingConfirmation,
                Completed,
                CancelledByParent,
                CancelledByTeacher,
                CancelledByAdmin,
                Disputed,
            ],
            PendingConfirmation => &[Completed, Disputed, CancelledByAdmin],
            Disputed => &[Completed, CancelledByAdmin],
            // Terminal states are never re-entered.
            Completed | CancelledByParent | CancelledByTeacher | CancelledByAdmin
            | RejectedByTeacher | Expired => &[],
        }
    }

    /// A terminal booking never changes status again.
    pub fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// True for any of the cancelled statuses, regardless of who cancelled.
    pub fn is_cancelled(self) -> bool {
        matches!(
            self,
            BookingStatus::CancelledByParent
                | BookingStatus::CancelledByTeacher
                | BookingStatus::CancelledByAdmin
        )
    }

    /// Statuses that hold a teacher time-slot and block conflicting bookings.
    pub fn holds_slot(self) -> bool {
        matches!(
            self,
            BookingStatus::PendingTeacherApproval
                | BookingStatus::WaitingForPayment
                | BookingStatus::Scheduled
                | BookingStatus::PendingConfirmation
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::PendingTeacherApproval => "PENDING_TEACHER_APPROVAL",
            BookingStatus::WaitingForPayment => "WAITING_FOR_PAYMENT",
            BookingStatus::Scheduled => "SCHEDULED",
            BookingStatus::PendingConfirmation => "PENDING_CONFIRMATION",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::Disputed => "DISPUTED",
            BookingStatus::CancelledByParent => "CANCELLED_BY_PARENT",
            BookingStatus::CancelledByTeacher => "CANCELLED_BY_TEACHER",
            BookingStatus::CancelledByAdmin => "CANCELLED_BY_ADMIN",
            BookingStatus::RejectedByTeacher => "REJECTED_BY_TEACHER",
            BookingStatus::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected status transition, carrying enough context for UI messaging.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid status transition {current} -> {attempted} (allowed: {})",
    .allowed.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", "))]
pub struct TransitionError {
    pub current: BookingStatus,
    pub attempted: BookingStatus,
    pub allowed: &'static [BookingStatus],
}

/// Validates a status transition against the table.
///
/// `allow_same_status` permits idempotent re-entry into the current
/// status (used when an approval re-arms a payment deadline without
/// actually moving state).
pub fn validate(
    current: BookingStatus,
    next: BookingStatus,
    allow_same_status: bool,
) -> Result<(), TransitionError> {
    if allow_same_status && current == next {
        return Ok(());
    }
    if current.allowed_transitions().contains(&next) {
        return Ok(());
    }
    Err(TransitionError {
        current,
        attempted: next,
        allowed: current.allowed_transitions(),
    })
}

#[cfg(test)]
mod tests {
    use super::BookingStatus::*;
    use super::*;

    #[test]
    fn happy_path_transitions_are_allowed() {
        assert!(validate(PendingTeacherApproval, WaitingForPayment, false).is_ok());
        assert!(validate(PendingTeacherApproval, Scheduled, false).is_ok());
        assert!(validate(WaitingForPayment, Scheduled, false).is_ok());
        assert!(validate(Scheduled, PendingConfirmation, false).is_ok());
        assert!(validate(PendingConfirmation, Completed, false).is_ok());
    }

    #[test]
    fn terminal_states_reject_everything() {
        for terminal in [
            Completed,
            CancelledByParent,
            CancelledByTeacher,
            CancelledByAdmin,
            RejectedByTeacher,
            Expired,
        ] {
            assert!(terminal.is_terminal());
            for next in [Scheduled, PendingConfirmation, Disputed, Expired] {
                assert!(validate(terminal, next, false).is_err());
            }
        }
    }

    #[test]
    fn cannot_skip_payment() {
        // WaitingForPayment never jumps straight to PendingConfirmation.
        let err = validate(WaitingForPayment, PendingConfirmation, false).unwrap_err();
        assert_eq!(err.current, WaitingForPayment);
        assert_eq!(err.attempted, PendingConfirmation);
        assert!(err.allowed.contains(&Scheduled));
    }

    #[test]
    fn same_status_requires_escape_hatch() {
        assert!(validate(WaitingForPayment, WaitingForPayment, false).is_err());
        assert!(validate(WaitingForPayment, WaitingForPayment, true).is_ok());
        // The escape hatch must not open unrelated transitions.
        assert!(validate(Completed, Scheduled, true).is_err());
    }

    #[test]
    fn dispute_paths() {
        assert!(validate(Scheduled, Disputed, false).is_ok());
        assert!(validate(PendingConfirmation, Disputed, false).is_ok());
        assert!(validate(Disputed, Completed, false).is_ok());
        assert!(validate(Disputed, CancelledByAdmin, false).is_ok());
        assert!(validate(Disputed, Scheduled, false).is_err());
    }

    #[test]
    fn error_message_names_both_states() {
        let err = validate(Completed, Scheduled, false).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("COMPLETED"));
        assert!(msg.contains("SCHEDULED"));
    }
}
