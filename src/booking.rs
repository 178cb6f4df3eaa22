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

//! Booking records and their attachments: session reports, disputes
//! and reschedule requests.

use crate::base::{
    BookingId, ChildId, PackageId, RedemptionId, RequestId, SubjectId, TeacherId, TierId, UserId,
};
use crate::error::EngineError;
use crate::status::BookingStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const MAX_TOPIC_LEN: usize = 2000;
pub const MAX_NOTES_LEN: usize = 5000;
pub const MAX_DISPUTE_DESC_LEN: usize = 5000;
pub const MAX_DISPUTE_EVIDENCE: usize = 10;

/// Who attends the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Beneficiary {
    /// The paying user attends themselves.
    Payer,
    /// A parent books for one of their children.
    Child(ChildId),
}

/// How strict the teacher's cancellation terms are. The cutoff hours
/// for each tier come from system settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationPolicy {
    Flexible,
    Moderate,
    Strict,
}

/// Teacher's post-session write-up, required to mark a session
/// completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub topic_covered: String,
    pub notes: Option<String>,
    pub homework: Option<String>,
    /// Session quality from the teacher's side, 1 to 5.
    pub rating: Option<u8>,
}

impl SessionReport {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.topic_covered.trim().is_empty() {
            return Err(EngineError::invalid("topic covered must not be empty"));
        }
        if self.topic_covered.chars().count() > MAX_TOPIC_LEN {
            return Err(EngineError::invalid("topic covered is too long"));
        }
        for field in [&self.notes, &self.homework].into_iter().flatten() {
            if field.chars().count() > MAX_NOTES_LEN {
                return Err(EngineError::invalid("report field is too long"));
            }
        }
        if let Some(rating) = self.rating
            && !(1..=5).contains(&rating)
        {
            return Err(EngineError::invalid("rating must be between 1 and 5"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeKind {
    TeacherNoShow,
    SessionTooShort,
    QualityIssue,
    TechnicalIssue,
    Other,
}

/// A payer-raised dispute, frozen until an admin resolves it.
#[derive(Debug, Clone, Serialize)]
pub struct Dispute {
    pub booking: BookingId,
    pub raised_by: UserId,
    pub kind: DisputeKind,
    pub description: String,
    pub evidence: Vec<String>,
    pub raised_at: DateTime<Utc>,
}

impl Dispute {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.description.trim().is_empty() {
            return Err(EngineError::invalid("dispute description must not be empty"));
        }
        if self.description.chars().count() > MAX_DISPUTE_DESC_LEN {
            return Err(EngineError::invalid("dispute description is too long"));
        }
        if self.evidence.len() > MAX_DISPUTE_EVIDENCE {
            return Err(EngineError::invalid("too many evidence attachments"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Pending,
    Approved,
    Declined,
    Expired,
}

/// A pending reschedule proposal on a paid booking. Expires if the
/// counterparty does not respond in time.
#[derive(Debug, Clone, Serialize)]
pub struct RescheduleRequest {
    pub id: RequestId,
    pub booking: BookingId,
    pub requested_by: UserId,
    pub proposed_start: DateTime<Utc>,
    pub reason: Option<String>,
    pub state: RequestState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Why and by whom a booking was cancelled, kept on the record for the
/// refund breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct CancellationRecord {
    pub cancelled_by: UserId,
    pub reason: Option<String>,
    pub cancelled_at: DateTime<Utc>,
    pub refund: i64,
    pub teacher_compensation: i64,
    pub platform_revenue: i64,
}

/// One tutoring session booking.
#[derive(Debug, Clone, Serialize)]
pub struct Booking {
    pub id: BookingId,
    pub payer: UserId,
    pub teacher: TeacherId,
    /// The teacher's own user account, the one that gets paid.
    pub teacher_user: UserId,
    pub beneficiary: Beneficiary,
    pub subject: SubjectId,
    pub status: BookingStatus,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub timezone: chrono_tz::Tz,
    /// Server-computed price in minor units. Zero for demo sessions and
    /// package redemptions.
    pub price: i64,
    /// Set when this booking consumes a session from a purchased
    /// package rather than the wallet.
    pub redemption: Option<RedemptionId>,
    /// The package backing `redemption`.
    pub package: Option<PackageId>,
    /// Tier reserved during creation for a package purchase completed
    /// at approval time.
    pub pending_tier: Option<TierId>,
    pub demo: bool,
    pub meeting_link: Option<String>,
    pub note_to_teacher: Option<String>,
    pub payment_deadline: Option<DateTime<Utc>>,
    pub confirmation_deadline: Option<DateTime<Utc>>,
    pub reschedule_count: u32,
    pub report: Option<SessionReport>,
    /// Payer's 1-5 rating given at confirmation.
    pub payer_rating: Option<u8>,
    pub cancellation: Option<CancellationRecord>,
    /// Reminder hour offsets already sent for the confirmation window,
    /// so each interval fires at most once.
    pub reminders_sent: Vec<i64>,
    pub meeting_link_warning_sent: bool,
    pub stale_alert_sent: bool,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl Booking {
    /// Whether the payer's money (or a package session) is committed
    /// and a settlement path must eventually run.
    pub fn is_funded(&self) -> bool {
        self.paid_at.is_some()
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end_at - self.start_at).num_minutes()
    }
}
