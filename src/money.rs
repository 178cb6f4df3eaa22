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

//! Money normalization.
//!
//! All monetary amounts are canonicalized to whole currency units exactly
//! once, at the point where they are first computed (price calculation,
//! refund calculation, commission split). Downstream code treats amounts
//! as already-integer `i64` values and never re-rounds.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Canonicalizes a raw amount to a whole number of currency units using
/// round-half-up (midpoint away from zero).
///
/// Amounts outside the `i64` range saturate; session prices are nowhere
/// near that boundary.
pub fn normalize(amount: Decimal) -> i64 {
    let rounded = amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    rounded.to_i64().unwrap_or_else(|| {
        if rounded.is_sign_negative() {
            i64::MIN
        } else {
            i64::MAX
        }
    })
}

/// Splits `total` between the teacher and the platform.
///
/// The teacher share is normalized once; the platform receives the exact
/// remainder rather than an independently rounded value, so
/// `teacher_share + platform_share == total` always holds.
pub fn split_earnings(total: i64, commission_rate: Decimal) -> (i64, i64) {
    let teacher_share = normalize(Decimal::from(total) * (Decimal::ONE - commission_rate));
    let platform_share = total - teacher_share;
    (teacher_share, platform_share)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn normalize_rounds_half_up() {
        assert_eq!(normalize(dec!(10.5)), 11);
        assert_eq!(normalize(dec!(10.4)), 10);
        assert_eq!(normalize(dec!(10.49999)), 10);
        assert_eq!(normalize(dec!(0.5)), 1);
    }

    #[test]
    fn normalize_rounds_negative_half_away_from_zero() {
        assert_eq!(normalize(dec!(-10.5)), -11);
        assert_eq!(normalize(dec!(-10.4)), -10);
    }

    #[test]
    fn normalize_passes_integers_through() {
        assert_eq!(normalize(dec!(100)), 100);
        assert_eq!(normalize(dec!(0)), 0);
    }

    #[test]
    fn split_preserves_total() {
        let (teacher, platform) = split_earnings(100, dec!(0.18));
        assert_eq!(teacher, 82);
        assert_eq!(platform, 18);
        assert_eq!(teacher + platform, 100);
    }

    #[test]
    fn split_gives_platform_the_remainder() {
        // 0.18 of 95 is 17.1; the teacher share rounds to 78, platform
        // gets exactly the remainder, never an independent rounding.
        let (teacher, platform) = split_earnings(95, dec!(0.18));
        assert_eq!(teacher + platform, 95);
        assert_eq!(teacher, 78);
        assert_eq!(platform, 17);
    }

    #[test]
    fn split_with_zero_commission() {
        let (teacher, platform) = split_earnings(250, dec!(0));
        assert_eq!(teacher, 250);
        assert_eq!(platform, 0);
    }

    #[test]
    fn split_totals_hold_for_awkward_rates() {
        for total in [1i64, 7, 33, 99, 101, 12345] {
            for rate in [dec!(0.1), dec!(0.15), dec!(0.18), dec!(0.333)] {
                let (teacher, platform) = split_earnings(total, rate);
                assert_eq!(teacher + platform, total, "total={total} rate={rate}");
            }
        }
    }
}
