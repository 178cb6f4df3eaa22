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

//! Property-based tests.
//!
//! These verify money-conservation and state-machine invariants that
//! must hold for any input, not just the handful of values the example
//! tests pick.

use booking_escrow_rs::base::{BookingId, Role, UserId};
use booking_escrow_rs::booking::CancellationPolicy;
use booking_escrow_rs::clock::ManualClock;
use booking_escrow_rs::collab::SequentialIds;
use booking_escrow_rs::money::split_earnings;
use booking_escrow_rs::policy::refund_breakdown;
use booking_escrow_rs::settings::SystemSettings;
use booking_escrow_rs::status;
use booking_escrow_rs::{BookingStatus, Ledger};
use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Session prices in whole currency units.
fn arb_amount() -> impl Strategy<Value = i64> {
    1i64..=100_000
}

/// Commission rates between 0% and 100% with two decimal places.
fn arb_rate() -> impl Strategy<Value = Decimal> {
    (0i64..=100).prop_map(|pct| Decimal::new(pct, 2))
}

fn arb_policy() -> impl Strategy<Value = CancellationPolicy> {
    prop_oneof![
        Just(CancellationPolicy::Flexible),
        Just(CancellationPolicy::Moderate),
        Just(CancellationPolicy::Strict),
    ]
}

fn arb_role() -> impl Strategy<Value = Role> {
    prop_oneof![
        Just(Role::Parent),
        Just(Role::Student),
        Just(Role::Teacher),
        Just(Role::Admin),
    ]
}

fn arb_status() -> impl Strategy<Value = BookingStatus> {
    prop_oneof![
        Just(BookingStatus::PendingTeacherApproval),
        Just(BookingStatus::WaitingForPayment),
        Just(BookingStatus::Scheduled),
        Just(BookingStatus::PendingConfirmation),
        Just(BookingStatus::Completed),
        Just(BookingStatus::Disputed),
        Just(BookingStatus::CancelledByParent),
        Just(BookingStatus::CancelledByTeacher),
        Just(BookingStatus::CancelledByAdmin),
        Just(BookingStatus::RejectedByTeacher),
        Just(BookingStatus::Expired),
    ]
}

/// One step of a payer's escrow life: lock then settle one way.
#[derive(Debug, Clone)]
enum EscrowStep {
    Release { amount: i64, rate: Decimal },
    FullRefund { amount: i64 },
    Split { amount: i64, rate: Decimal },
}

fn arb_step() -> impl Strategy<Value = EscrowStep> {
    prop_oneof![
        (arb_amount(), arb_rate()).prop_map(|(amount, rate)| EscrowStep::Release { amount, rate }),
        arb_amount().prop_map(|amount| EscrowStep::FullRefund { amount }),
        (arb_amount(), arb_rate()).prop_map(|(amount, rate)| EscrowStep::Split { amount, rate }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// The commission split conserves money exactly.
    #[test]
    fn split_conserves_total(total in arb_amount(), rate in arb_rate()) {
        let (teacher, platform) = split_earnings(total, rate);
        prop_assert_eq!(teacher + platform, total);
        prop_assert!(teacher >= 0);
        prop_assert!(platform >= 0);
    }

    /// A higher commission rate never pays the teacher more.
    #[test]
    fn split_is_monotone_in_rate(total in arb_amount(), pct in 0i64..100) {
        let (lower, _) = split_earnings(total, Decimal::new(pct, 2));
        let (higher, _) = split_earnings(total, Decimal::new(pct + 1, 2));
        prop_assert!(higher <= lower);
    }

    /// Refund, compensation and platform revenue always sum to the
    /// locked amount, and the percent is all-or-nothing.
    #[test]
    fn refund_parts_sum_to_locked(
        role in arb_role(),
        policy in arb_policy(),
        locked in arb_amount(),
        hours_before_start in 0i64..200,
        hours_after_creation in 0i64..200,
    ) {
        let settings = SystemSettings::default();
        let now = Utc.with_ymd_and_hms(2026, 3, 9, 10, 0, 0).unwrap();
        let created_at = now - Duration::hours(hours_after_creation);
        let start_at = now + Duration::hours(hours_before_start);

        let breakdown = refund_breakdown(
            role, policy, locked, created_at, start_at, now, &settings,
        );
        prop_assert_eq!(
            breakdown.refund + breakdown.teacher_compensation + breakdown.platform_revenue,
            locked
        );
        prop_assert!(breakdown.percent == 0 || breakdown.percent == 100);
        prop_assert!(breakdown.refund >= 0);
        prop_assert!(breakdown.teacher_compensation >= 0);
    }

    /// Teacher- and admin-initiated cancellations always refund in full.
    #[test]
    fn staff_cancellations_always_refund(
        role in prop_oneof![Just(Role::Teacher), Just(Role::Admin)],
        policy in arb_policy(),
        locked in arb_amount(),
        hours_before_start in 0i64..200,
    ) {
        let settings = SystemSettings::default();
        let now = Utc.with_ymd_and_hms(2026, 3, 9, 10, 0, 0).unwrap();
        let breakdown = refund_breakdown(
            role,
            policy,
            locked,
            now - Duration::days(30),
            now + Duration::hours(hours_before_start),
            now,
            &settings,
        );
        prop_assert_eq!(breakdown.percent, 100);
        prop_assert_eq!(breakdown.refund, locked);
    }

    /// Any sequence of deposit/lock/settle cycles leaves the ledger
    /// auditable and every balance non-negative.
    #[test]
    fn ledger_stays_auditable(steps in prop::collection::vec(arb_step(), 1..20)) {
        let ledger = Ledger::new(
            Arc::new(SequentialIds::default()),
            Arc::new(ManualClock::default()),
        );
        let payer = UserId(1);
        let teacher = UserId(2);

        for (i, step) in steps.iter().enumerate() {
            let booking = BookingId(i as u64);
            let i = i as u64;
            match step {
                EscrowStep::Release { amount, rate } => {
                    ledger.deposit(payer, *amount, &format!("d-{i}"), None).unwrap();
                    ledger.lock_escrow(payer, *amount, booking, &format!("l-{i}")).unwrap();
                    ledger
                        .release(payer, teacher, *amount, *rate, booking, &format!("r-{i}"))
                        .unwrap();
                }
                EscrowStep::FullRefund { amount } => {
                    ledger.deposit(payer, *amount, &format!("d-{i}"), None).unwrap();
                    ledger.lock_escrow(payer, *amount, booking, &format!("l-{i}")).unwrap();
                    ledger
                        .settle_cancellation(
                            payer, teacher, *amount, *amount, 0, 0, booking, &format!("s-{i}"),
                        )
                        .unwrap();
                }
                EscrowStep::Split { amount, rate } => {
                    ledger.deposit(payer, *amount, &format!("d-{i}"), None).unwrap();
                    ledger.lock_escrow(payer, *amount, booking, &format!("l-{i}")).unwrap();
                    let (comp, fee) = split_earnings(*amount, *rate);
                    ledger
                        .settle_cancellation(
                            payer, teacher, *amount, 0, comp, fee, booking, &format!("s-{i}"),
                        )
                        .unwrap();
                }
            }
        }

        prop_assert!(ledger.audit().is_clean());
        prop_assert!(ledger.wallet(payer).available() >= 0);
        prop_assert!(ledger.wallet(payer).pending() == 0);
        prop_assert!(ledger.wallet(teacher).available() >= 0);
    }

    /// Replaying every operation of a run changes nothing.
    #[test]
    fn replays_are_free(amount in arb_amount(), rate in arb_rate()) {
        let ledger = Ledger::new(
            Arc::new(SequentialIds::default()),
            Arc::new(ManualClock::default()),
        );
        let payer = UserId(1);
        let teacher = UserId(2);
        let booking = BookingId(1);

        ledger.deposit(payer, amount, "d", None).unwrap();
        ledger.lock_escrow(payer, amount, booking, "l").unwrap();
        ledger.release(payer, teacher, amount, rate, booking, "r").unwrap();
        let teacher_after = ledger.wallet(teacher).available();

        for _ in 0..3 {
            prop_assert!(ledger.deposit(payer, amount, "d", None).unwrap().replayed);
            prop_assert!(ledger.lock_escrow(payer, amount, booking, "l").unwrap().replayed);
            prop_assert!(
                ledger.release(payer, teacher, amount, rate, booking, "r").unwrap().replayed
            );
        }
        prop_assert_eq!(ledger.wallet(teacher).available(), teacher_after);
        prop_assert_eq!(ledger.wallet(payer).pending(), 0);
    }

    /// The transition table is consistent: `validate` accepts exactly
    /// the listed successors, and terminal states have none.
    #[test]
    fn transition_table_is_consistent(from in arb_status(), to in arb_status()) {
        let allowed = from.allowed_transitions().contains(&to);
        prop_assert_eq!(status::validate(from, to, false).is_ok(), allowed);
        // Same-status replays are tolerated only when asked for.
        if from == to {
            prop_assert!(status::validate(from, to, true).is_ok());
        }
        if from.is_terminal() {
            prop_assert!(from.allowed_transitions().is_empty());
        }
    }
}
