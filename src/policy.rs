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

//! Cancellation refund policy.
//!
//! Pure functions only; the engine feeds them clock readings and
//! settings. Refunds are all-or-nothing: the payer gets 100% back when
//! the teacher or an admin cancels, within the post-creation grace
//! period, or before the policy-tier cutoff. Past the cutoff the full
//! amount is retained and split between teacher compensation and
//! platform revenue by the commission rate.

use crate::base::Role;
use crate::booking::CancellationPolicy;
use crate::money::split_earnings;
use crate::settings::SystemSettings;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// How the locked amount is divided at cancellation. The three parts
/// always sum to the amount that was locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefundBreakdown {
    pub percent: u8,
    pub refund: i64,
    pub teacher_compensation: i64,
    pub platform_revenue: i64,
}

impl RefundBreakdown {
    fn full(amount: i64) -> Self {
        Self {
            percent: 100,
            refund: amount,
            teacher_compensation: 0,
            platform_revenue: 0,
        }
    }

    fn none(amount: i64, settings: &SystemSettings) -> Self {
        let (teacher_compensation, platform_revenue) =
            split_earnings(amount, settings.commission_rate);
        Self {
            percent: 0,
            refund: 0,
            teacher_compensation,
            platform_revenue,
        }
    }
}

/// Computes the refund split for a cancellation of `locked` minor
/// units. `created_at` / `start_at` are the booking's timestamps.
pub fn refund_breakdown(
    role: Role,
    policy: CancellationPolicy,
    locked: i64,
    created_at: DateTime<Utc>,
    start_at: DateTime<Utc>,
    now: DateTime<Utc>,
    settings: &SystemSettings,
) -> RefundBreakdown {
    if locked <= 0 {
        return RefundBreakdown::full(0);
    }
    // Teacher- and admin-initiated cancellations always refund in full,
    // regardless of how close the session is.
    if matches!(role, Role::Teacher | Role::Admin) {
        return RefundBreakdown::full(locked);
    }
    // Change-of-mind grace right after booking.
    if now - created_at <= Duration::hours(settings.grace_after_creation_hours) {
        return RefundBreakdown::full(locked);
    }
    if start_at - now > settings.cancellation_cutoff(policy) {
        RefundBreakdown::full(locked)
    } else {
        RefundBreakdown::none(locked, settings)
    }
}
