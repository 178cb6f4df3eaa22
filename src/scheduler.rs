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

//! Time-driven jobs.
//!
//! The scheduler owns every deadline-crossing transition: expiring
//! stale requests and unpaid bookings, auto-releasing escrow once a
//! confirmation window lapses, reminders and staleness alerts, and a
//! full ledger audit. Each job is idempotent per run — every candidate
//! is re-checked under its own mutex, so running a pass twice changes
//! nothing the second time — and a failure on one booking never stops
//! the sweep.

use crate::booking::RequestState;
use crate::collab::NoticeKind;
use crate::engine::BookingEngine;
use crate::status::BookingStatus;
use chrono::Duration;
use crossbeam::channel::{Sender, bounded, tick};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info, warn};

/// Counts of what a single pass actually did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub requests_expired: usize,
    pub unpaid_expired: usize,
    pub released: usize,
    pub reminders_sent: usize,
    pub link_warnings: usize,
    pub stale_flagged: usize,
    pub auto_completed: usize,
    pub ledger_discrepancies: usize,
}

pub struct Scheduler {
    engine: Arc<BookingEngine>,
}

/// Stops the background loop when dropped or told to.
pub struct SchedulerHandle {
    stop: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn shutdown(mut self) {
        let _ = self.stop.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Scheduler {
    pub fn new(engine: Arc<BookingEngine>) -> Self {
        Self { engine }
    }

    /// Spawns the periodic loop on its own thread.
    pub fn spawn(self, every: std::time::Duration) -> SchedulerHandle {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let ticker = tick(every);
        let thread = std::thread::spawn(move || {
            loop {
                crossbeam::select! {
                    recv(ticker) -> _ => {
                        let report = self.run_once();
                        info!(?report, "scheduler pass finished");
                    }
                    recv(stop_rx) -> _ => break,
                }
            }
        });
        SchedulerHandle {
            stop: stop_tx,
            thread: Some(thread),
        }
    }

    /// One full pass over every job.
    pub fn run_once(&self) -> TickReport {
        TickReport {
            requests_expired: self.expire_stale_requests(),
            unpaid_expired: self.expire_unpaid(),
            released: self.auto_release(),
            reminders_sent: self.send_confirmation_reminders(),
            link_warnings: self.warn_missing_meeting_links(),
            stale_flagged: self.flag_stale_sessions(),
            auto_completed: self.auto_complete_overdue(),
            ledger_discrepancies: self.audit_ledger(),
        }
    }

    /// Unanswered creation requests and expired reschedule proposals
    /// time out. Slots held by an expired booking are republished.
    pub fn expire_stale_requests(&self) -> usize {
        let now = self.engine.now();
        let settings = self.engine.settings();
        let cutoff = now - Duration::hours(settings.stale_request_hours);
        let mut expired = 0;

        for cell in self.engine.booking_cells() {
            let snapshot = {
                let mut booking = cell.lock();
                if booking.status != BookingStatus::PendingTeacherApproval
                    || booking.created_at > cutoff
                {
                    continue;
                }
                if let Err(err) = BookingEngine::transition(&mut booking, BookingStatus::Expired) {
                    error!(booking = %booking.id, %err, "stale request expiry failed");
                    continue;
                }
                booking.clone()
            };
            self.engine.release_held_slot(&snapshot);
            self.engine.notify(
                snapshot.payer,
                NoticeKind::Info,
                "Session request expired",
                format!("The teacher did not answer session {} in time", snapshot.id),
                Some(format!("expire-{}", snapshot.id)),
            );
            expired += 1;
        }

        for cell in self.engine.request_cells() {
            let mut request = cell.lock();
            if request.state == RequestState::Pending && now > request.expires_at {
                request.state = RequestState::Expired;
                request.resolved_at = Some(now);
                expired += 1;
            }
        }
        expired
    }

    /// Bookings whose payment deadline has passed move to `Expired`.
    pub fn expire_unpaid(&self) -> usize {
        let now = self.engine.now();
        let mut expired = 0;
        for cell in self.engine.booking_cells() {
            let snapshot = {
                let mut booking = cell.lock();
                if booking.status != BookingStatus::WaitingForPayment {
                    continue;
                }
                match booking.payment_deadline {
                    Some(deadline) if now > deadline => {}
                    _ => continue,
                }
                if let Err(err) = BookingEngine::transition(&mut booking, BookingStatus::Expired) {
                    error!(booking = %booking.id, %err, "unpaid expiry failed");
                    continue;
                }
                booking.clone()
            };
            self.engine.release_held_slot(&snapshot);
            self.engine.notify(
                snapshot.payer,
                NoticeKind::Info,
                "Payment window closed",
                format!("Session {} expired unpaid", snapshot.id),
                Some(format!("expire-{}", snapshot.id)),
            );
            self.engine.notify(
                snapshot.teacher_user,
                NoticeKind::Info,
                "Session expired unpaid",
                format!("Session {} was not paid in time; the slot is free again", snapshot.id),
                Some(format!("expire-{}-teacher", snapshot.id)),
            );
            expired += 1;
        }
        expired
    }

    /// Escrow auto-releases to the teacher once the confirmation window
    /// lapses without a confirmation or dispute.
    pub fn auto_release(&self) -> usize {
        let now = self.engine.now();
        let mut released = 0;
        for cell in self.engine.booking_cells() {
            match self.engine.auto_release_one(&cell, now) {
                Ok(true) => released += 1,
                Ok(false) => {}
                Err(err) => {
                    let id = cell.lock().id;
                    error!(booking = %id, %err, "auto-release failed");
                }
            }
        }
        released
    }

    /// One reminder per configured offset before the confirmation
    /// deadline, tracked per booking so reruns never duplicate.
    pub fn send_confirmation_reminders(&self) -> usize {
        let now = self.engine.now();
        let settings = self.engine.settings();
        let mut sent = 0;
        for cell in self.engine.booking_cells() {
            let (payer, id, offset) = {
                let mut booking = cell.lock();
                if booking.status != BookingStatus::PendingConfirmation {
                    continue;
                }
                let Some(deadline) = booking.confirmation_deadline else {
                    continue;
                };
                // Most imminent offset already inside the window that
                // hasn't been sent yet.
                let due = settings
                    .reminder_offsets_hours
                    .iter()
                    .copied()
                    .filter(|offset| {
                        deadline - now <= Duration::hours(*offset)
                            && !booking.reminders_sent.contains(offset)
                    })
                    .min();
                let Some(offset) = due else { continue };
                booking.reminders_sent.push(offset);
                (booking.payer, booking.id, offset)
            };
            self.engine.notify(
                payer,
                NoticeKind::Action,
                "Confirmation reminder",
                format!("Session {id} auto-completes in under {offset} hours"),
                Some(format!("reminder-{id}-{offset}")),
            );
            sent += 1;
        }
        sent
    }

    /// Scheduled sessions starting soon with no meeting link get a
    /// single warning to the teacher.
    pub fn warn_missing_meeting_links(&self) -> usize {
        let now = self.engine.now();
        let settings = self.engine.settings();
        let mut warned = 0;
        for cell in self.engine.booking_cells() {
            let (teacher_user, id) = {
                let mut booking = cell.lock();
                if booking.status != BookingStatus::Scheduled
                    || booking.meeting_link.is_some()
                    || booking.meeting_link_warning_sent
                {
                    continue;
                }
                let until_start = booking.start_at - now;
                if until_start < Duration::minutes(settings.meeting_link_warn_from_minutes)
                    || until_start > Duration::minutes(settings.meeting_link_warn_until_minutes)
                {
                    continue;
                }
                booking.meeting_link_warning_sent = true;
                (booking.teacher_user, booking.id)
            };
            warn!(booking = %id, "session imminent with no meeting link");
            self.engine.notify(
                teacher_user,
                NoticeKind::Alert,
                "Meeting link missing",
                format!("Session {id} starts soon and has no meeting link"),
                Some(format!("link-{id}")),
            );
            warned += 1;
        }
        warned
    }

    /// Sessions long past their end with no completion get flagged to
    /// admins once.
    pub fn flag_stale_sessions(&self) -> usize {
        let now = self.engine.now();
        let settings = self.engine.settings();
        let mut flagged = 0;
        for cell in self.engine.booking_cells() {
            let id = {
                let mut booking = cell.lock();
                if booking.status != BookingStatus::Scheduled
                    || booking.stale_alert_sent
                    || now - booking.end_at < Duration::hours(settings.stale_session_alert_hours)
                {
                    continue;
                }
                booking.stale_alert_sent = true;
                booking.id
            };
            warn!(booking = %id, "scheduled session went stale");
            self.engine.notify_admins(
                "Stale session",
                format!("Session {id} ended with no completion action"),
                &format!("stale-{id}"),
            );
            flagged += 1;
        }
        flagged
    }

    /// Safety net: a session the teacher never completed moves to the
    /// confirmation phase once the completion grace period lapses, so
    /// its escrow cannot stay locked forever.
    pub fn auto_complete_overdue(&self) -> usize {
        let now = self.engine.now();
        let settings = self.engine.settings();
        let mut moved = 0;
        for cell in self.engine.booking_cells() {
            let snapshot = {
                let mut booking = cell.lock();
                if booking.status != BookingStatus::Scheduled
                    || now - booking.end_at
                        <= Duration::hours(settings.completion_grace_hours)
                {
                    continue;
                }
                if let Err(err) =
                    BookingEngine::transition(&mut booking, BookingStatus::PendingConfirmation)
                {
                    error!(booking = %booking.id, %err, "auto-complete failed");
                    continue;
                }
                booking.completed_at = Some(now);
                booking.confirmation_deadline = Some(now + settings.dispute_window());
                booking.clone()
            };
            info!(booking = %snapshot.id, "overdue session moved to confirmation");
            self.engine.notify(
                snapshot.payer,
                NoticeKind::Action,
                "Confirm your session",
                format!("Session {} ended; please confirm it was held", snapshot.id),
                Some(format!("auto-complete-{}", snapshot.id)),
            );
            moved += 1;
        }
        moved
    }

    /// Recomputes every wallet from the ledger log and alerts admins on
    /// any mismatch.
    pub fn audit_ledger(&self) -> usize {
        let report = self.engine.ledger().audit();
        for discrepancy in &report.discrepancies {
            error!(
                user = %discrepancy.user,
                expected_available = discrepancy.expected_available,
                actual_available = discrepancy.actual_available,
                "ledger audit discrepancy"
            );
            self.engine.notify_admins(
                "Ledger discrepancy",
                format!(
                    "Wallet {} does not match its ledger history",
                    discrepancy.user
                ),
                &format!("audit-{}", discrepancy.user),
            );
        }
        report.discrepancies.len()
    }
}
