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

//! Core identifier types and roles.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type! {
    /// Unique identifier for a platform user (payer, teacher, or admin).
    UserId
}

id_type! {
    /// Unique identifier for a teacher profile.
    ///
    /// Distinct from the teacher's [`UserId`]; the directory collaborator
    /// resolves one to the other.
    TeacherId
}

id_type! {
    /// Unique identifier for a subject in the catalog.
    SubjectId
}

id_type! {
    /// Unique identifier for a child beneficiary owned by a parent.
    ChildId
}

id_type! {
    /// Unique identifier for a booking.
    BookingId
}

id_type! {
    /// Unique identifier for a ledger entry. Globally unique and append-only.
    EntryId
}

id_type! {
    /// Unique identifier for a teacher-initiated reschedule request.
    RequestId
}

id_type! {
    /// Unique identifier for a purchased session package.
    PackageId
}

id_type! {
    /// Unique identifier for a package tier offered for purchase.
    TierId
}

id_type! {
    /// Unique identifier for a package redemption linked to a booking.
    RedemptionId
}

/// Role of the user performing an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Role {
    Parent,
    Student,
    Teacher,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Parent => "parent",
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
        };
        f.write_str(s)
    }
}
