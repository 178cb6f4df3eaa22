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

//! Error types for booking and ledger operations.

use crate::status::TransitionError;
use thiserror::Error;

/// Booking and ledger operation errors.
///
/// Every rejected mutation carries a reason string distinct enough to
/// drive UI messaging. Idempotent replays are not errors; they return
/// the prior result through the normal `Ok` path.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Referenced entity does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Authenticated but not authorized for this entity or role.
    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    /// Malformed input, invalid transition target, or business-rule
    /// violation.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Lost a concurrency race: status changed, slot taken, or a
    /// conditional update matched zero rows. Retryable.
    #[error("conflict: {0}")]
    Conflict(&'static str),

    /// Available balance cannot cover the requested amount.
    #[error("insufficient available funds")]
    InsufficientFunds,

    /// Pending (escrow) balance cannot cover the requested amount.
    #[error("insufficient pending funds")]
    InsufficientPendingFunds,

    /// A withdrawal request is already open for this wallet.
    #[error("a withdrawal request is already pending for this wallet")]
    WithdrawalAlreadyOpen,

    /// Attempted transition not present in the status table.
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl EngineError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        EngineError::InvalidRequest(reason.into())
    }

    /// True when retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Conflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::BookingStatus;

    #[test]
    fn error_display_messages() {
        assert_eq!(
            EngineError::NotFound("booking").to_string(),
            "booking not found"
        );
        assert_eq!(
            EngineError::InsufficientFunds.to_string(),
            "insufficient available funds"
        );
        assert_eq!(
            EngineError::Conflict("slot no longer available").to_string(),
            "conflict: slot no longer available"
        );
        assert_eq!(
            EngineError::invalid("payment window closed").to_string(),
            "invalid request: payment window closed"
        );
    }

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(EngineError::Conflict("status changed by another operation").is_retryable());
        assert!(!EngineError::InsufficientFunds.is_retryable());
        assert!(!EngineError::NotFound("wallet").is_retryable());
    }

    #[test]
    fn transition_errors_convert() {
        let err = crate::status::validate(BookingStatus::Completed, BookingStatus::Scheduled, false)
            .unwrap_err();
        let engine_err: EngineError = err.into();
        assert!(matches!(engine_err, EngineError::Transition(_)));
    }

    #[test]
    fn errors_are_cloneable() {
        let error = EngineError::InsufficientPendingFunds;
        assert_eq!(error.clone(), error);
    }
}
