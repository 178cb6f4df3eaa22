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

//! A tutoring-marketplace booking core: a status state machine for the
//! session lifecycle, an escrow wallet ledger with an append-only money
//! log, and a scheduler that owns every deadline-driven transition.
//!
//! The [`engine::BookingEngine`] is the single entry point for
//! lifecycle operations; the [`ledger::Ledger`] is the single choke
//! point for balances; [`scheduler::Scheduler`] sweeps deadlines.
//! Everything is safe for concurrent use from many threads.

pub mod base;
pub mod booking;
pub mod clock;
pub mod collab;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod money;
pub mod policy;
pub mod scheduler;
pub mod settings;
pub mod status;
pub mod wallet;

pub use base::{BookingId, EntryId, Role, TeacherId, UserId};
pub use booking::{Booking, SessionReport};
pub use engine::{BookingEngine, Collaborators, CreateBooking, DisputeResolution};
pub use error::EngineError;
pub use ledger::{Ledger, PayoutDestination, PayoutOutcome, Receipt};
pub use scheduler::{Scheduler, TickReport};
pub use settings::SystemSettings;
pub use status::BookingStatus;
