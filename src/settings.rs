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

//! Tunable marketplace parameters. Admin-editable at runtime; the
//! defaults here are the fallbacks when nothing was configured.

use crate::booking::CancellationPolicy;
use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RescheduleRules {
    /// Minimum hours before the session start a payer may request.
    pub payer_cutoff_hours: i64,
    /// Maximum reschedules a payer gets per booking.
    pub payer_max: u32,
    pub teacher_cutoff_hours: i64,
    pub teacher_max: u32,
    /// Hours the counterparty has to answer before the request expires.
    pub response_timeout_hours: i64,
}

impl Default for RescheduleRules {
    fn default() -> Self {
        Self {
            payer_cutoff_hours: 6,
            payer_max: 2,
            teacher_cutoff_hours: 12,
            teacher_max: 1,
            response_timeout_hours: 24,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemSettings {
    /// Fraction of a released session kept by the platform.
    pub commission_rate: Decimal,
    /// Hours a payer has to pay after teacher approval.
    pub payment_window_hours: i64,
    /// The payment deadline never lands closer to the start than this.
    pub min_buffer_hours: i64,
    /// Floor for the payment window when the session is imminent.
    pub min_payment_window_minutes: i64,
    /// Hours the payer has to confirm or dispute after completion.
    pub dispute_window_hours: i64,
    /// Unanswered creation requests expire after this many hours.
    pub stale_request_hours: i64,
    /// Full refund for payer cancellations within this long after the
    /// booking was created, regardless of policy tier.
    pub grace_after_creation_hours: i64,
    /// How long after the scheduled end a teacher may still file the
    /// session report.
    pub completion_grace_hours: i64,
    /// A session still Scheduled this long past its end gets flagged.
    pub stale_session_alert_hours: i64,
    /// Hour offsets before the confirmation deadline at which reminder
    /// notices go out.
    pub reminder_offsets_hours: Vec<i64>,
    /// Minutes-before-start window in which a missing meeting link
    /// triggers a warning to the teacher.
    pub meeting_link_warn_from_minutes: i64,
    pub meeting_link_warn_until_minutes: i64,
    pub max_session_hours: i64,
    /// Policy-tier cancellation cutoffs, in hours before start.
    pub flexible_cutoff_hours: i64,
    pub moderate_cutoff_hours: i64,
    pub strict_cutoff_hours: i64,
    pub reschedule: RescheduleRules,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            commission_rate: dec!(0.18),
            payment_window_hours: 24,
            min_buffer_hours: 2,
            min_payment_window_minutes: 15,
            dispute_window_hours: 48,
            stale_request_hours: 24,
            grace_after_creation_hours: 1,
            completion_grace_hours: 12,
            stale_session_alert_hours: 6,
            reminder_offsets_hours: vec![6, 12, 24],
            meeting_link_warn_from_minutes: 20,
            meeting_link_warn_until_minutes: 30,
            max_session_hours: 8,
            flexible_cutoff_hours: 12,
            moderate_cutoff_hours: 24,
            strict_cutoff_hours: 48,
            reschedule: RescheduleRules::default(),
        }
    }
}

impl SystemSettings {
    /// Full-refund cutoff for a payer cancellation under the given
    /// policy tier.
    pub fn cancellation_cutoff(&self, policy: CancellationPolicy) -> Duration {
        let hours = match policy {
            CancellationPolicy::Flexible => self.flexible_cutoff_hours,
            CancellationPolicy::Moderate => self.moderate_cutoff_hours,
            CancellationPolicy::Strict => self.strict_cutoff_hours,
        };
        Duration::hours(hours)
    }

    pub fn payment_window(&self) -> Duration {
        Duration::hours(self.payment_window_hours)
    }

    pub fn min_buffer(&self) -> Duration {
        Duration::hours(self.min_buffer_hours)
    }

    pub fn dispute_window(&self) -> Duration {
        Duration::hours(self.dispute_window_hours)
    }
}
