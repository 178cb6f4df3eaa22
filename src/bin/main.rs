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

use booking_escrow_rs::base::{BookingId, Role, SubjectId, TeacherId, UserId};
use booking_escrow_rs::booking::{Beneficiary, CancellationPolicy};
use booking_escrow_rs::clock::ManualClock;
use booking_escrow_rs::collab::{
    InMemoryDirectory, InMemoryNotifier, InMemoryPackages, InMemorySlots, SequentialIds,
    SlotCalendar, TeacherProfile,
};
use booking_escrow_rs::{BookingEngine, Collaborators, CreateBooking, Scheduler};
use chrono::{DateTime, Duration, Utc};
use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// Booking Engine - replay a booking scenario from a CSV file
///
/// Reads lifecycle operations from a CSV file, drives them through the
/// engine against a simulated clock, and outputs final wallet states to
/// stdout.
#[derive(Parser, Debug)]
#[command(name = "booking-escrow-rs")]
#[command(about = "Replays booking lifecycle scenarios from CSV", long_about = None)]
struct Args {
    /// Path to CSV file with operations
    ///
    /// Expected format: op,at,user,booking,teacher,amount,extra
    /// Example: cargo run -- scenario.csv > wallets.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let runner = match run_scenario(BufReader::new(file)) {
        Ok(runner) => runner,
        Err(e) => {
            eprintln!("Error processing scenario: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = write_wallets(&runner, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the scenario format.
///
/// Fields: `op, at, user, booking, teacher, amount, extra`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    op: String,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    user: Option<u64>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    booking: Option<u64>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    teacher: Option<u64>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    amount: Option<i64>,
    #[serde(default)]
    extra: Option<String>,
}

/// The engine plus the fixture collaborators the scenario mutates.
pub struct ScenarioRunner {
    pub engine: Arc<BookingEngine>,
    pub scheduler: Scheduler,
    pub clock: Arc<ManualClock>,
    pub directory: Arc<InMemoryDirectory>,
    pub slots: Arc<InMemorySlots>,
    /// Users touched by the scenario, in first-seen order.
    users: parking_lot::Mutex<Vec<UserId>>,
    /// Row counter, used to key per-row ledger operations.
    rows: std::sync::atomic::AtomicU64,
}

impl ScenarioRunner {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::default());
        let directory = Arc::new(InMemoryDirectory::default());
        let slots = Arc::new(InMemorySlots::default());
        let engine = Arc::new(BookingEngine::new(
            Collaborators {
                directory: Arc::clone(&directory) as _,
                slots: Arc::clone(&slots) as _,
                packages: Arc::new(InMemoryPackages::default()),
                notifier: Arc::new(InMemoryNotifier::default()),
                ids: Arc::new(SequentialIds::default()),
            },
            Arc::clone(&clock) as _,
        ));
        Self {
            scheduler: Scheduler::new(Arc::clone(&engine)),
            engine,
            clock,
            directory,
            slots,
            users: parking_lot::Mutex::new(Vec::new()),
            rows: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn touch_user(&self, user: UserId) {
        let mut users = self.users.lock();
        if !users.contains(&user) {
            users.push(user);
        }
    }

    pub fn users(&self) -> Vec<UserId> {
        self.users.lock().clone()
    }

    /// Applies one scenario row. Unknown ops and engine rejections are
    /// reported but never stop the replay.
    fn apply(&self, record: CsvRecord) -> Result<(), String> {
        let row = self
            .rows
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if let Some(at) = record.at {
            self.clock.set(at);
        }
        let user = record.user.map(UserId);
        let booking = record.booking.map(BookingId);
        let teacher = record.teacher.map(TeacherId);

        match record.op.to_lowercase().as_str() {
            "student" => {
                let user = user.ok_or("student needs a user")?;
                self.directory.add_user(user, Role::Student);
                self.touch_user(user);
            }
            "admin" => {
                let user = user.ok_or("admin needs a user")?;
                self.directory.add_user(user, Role::Admin);
            }
            "teacher" => {
                let user = user.ok_or("teacher needs a user account")?;
                let teacher = teacher.ok_or("teacher needs a teacher id")?;
                let rate = record.amount.ok_or("teacher needs an hourly rate")?;
                let policy = match record.extra.as_deref() {
                    Some("flexible") | None => CancellationPolicy::Flexible,
                    Some("moderate") => CancellationPolicy::Moderate,
                    Some("strict") => CancellationPolicy::Strict,
                    Some(other) => return Err(format!("unknown policy '{other}'")),
                };
                self.directory.add_teacher(
                    teacher,
                    TeacherProfile {
                        user,
                        hourly_rate: rate,
                        subjects: vec![SubjectId(1)],
                        cancellation_policy: policy,
                        on_vacation: false,
                        demo_enabled: true,
                    },
                );
                self.touch_user(user);
            }
            "slot" => {
                let teacher = teacher.ok_or("slot needs a teacher")?;
                let at = record.at.ok_or("slot needs a time")?;
                self.slots.publish(teacher, at);
            }
            "deposit" => {
                let user = user.ok_or("deposit needs a user")?;
                let amount = record.amount.ok_or("deposit needs an amount")?;
                self.touch_user(user);
                self.engine
                    .ledger()
                    .deposit(user, amount, &format!("cli-row-{row}"), None)
                    .map_err(|e| e.to_string())?;
            }
            "create" => {
                let user = user.ok_or("create needs a payer")?;
                let teacher = teacher.ok_or("create needs a teacher")?;
                let start = record.at.ok_or("create needs a start time")?;
                // start column doubles as the session time; the clock
                // sits an hour earlier so the start is in the future.
                self.clock.set(start - Duration::hours(1));
                self.engine
                    .create(
                        user,
                        CreateBooking {
                            teacher,
                            subject: SubjectId(1),
                            beneficiary: Beneficiary::Payer,
                            start_at: start,
                            duration_minutes: record.amount.unwrap_or(60),
                            timezone: chrono_tz::UTC,
                            note_to_teacher: record.extra,
                            demo: false,
                            package: None,
                            pending_tier: None,
                        },
                    )
                    .map_err(|e| e.to_string())?;
            }
            "approve" => {
                let user = user.ok_or("approve needs the teacher user")?;
                let booking = booking.ok_or("approve needs a booking")?;
                self.engine.approve(user, booking).map_err(|e| e.to_string())?;
            }
            "pay" => {
                let user = user.ok_or("pay needs the payer")?;
                let booking = booking.ok_or("pay needs a booking")?;
                self.engine.pay(user, booking).map_err(|e| e.to_string())?;
            }
            "complete" => {
                let user = user.ok_or("complete needs the teacher user")?;
                let booking = booking.ok_or("complete needs a booking")?;
                self.engine
                    .complete(user, booking, None)
                    .map_err(|e| e.to_string())?;
            }
            "confirm" => {
                let user = user.ok_or("confirm needs the payer")?;
                let booking = booking.ok_or("confirm needs a booking")?;
                self.engine
                    .confirm(user, booking, None)
                    .map_err(|e| e.to_string())?;
            }
            "cancel" => {
                let user = user.ok_or("cancel needs a user")?;
                let booking = booking.ok_or("cancel needs a booking")?;
                self.engine
                    .cancel(user, booking, record.extra)
                    .map_err(|e| e.to_string())?;
            }
            "tick" => {
                self.scheduler.run_once();
            }
            other => return Err(format!("unknown op '{other}'")),
        }
        Ok(())
    }
}

impl Default for ScenarioRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Replays a scenario CSV. Malformed rows and rejected operations are
/// skipped with a note on stderr; the replay always runs to the end.
pub fn run_scenario<R: Read>(reader: R) -> Result<ScenarioRunner, csv::Error> {
    let runner = ScenarioRunner::new();

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for result in rdr.deserialize::<CsvRecord>() {
        match result {
            Ok(record) => {
                let op = record.op.clone();
                if let Err(e) = runner.apply(record) {
                    eprintln!("Skipping op '{}': {}", op, e);
                }
            }
            Err(e) => {
                eprintln!("Skipping malformed row: {}", e);
                continue;
            }
        }
    }

    Ok(runner)
}

/// Write wallet states to a CSV writer.
///
/// Columns: `user, available, pending, total`
pub fn write_wallets<W: Write>(runner: &ScenarioRunner, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for user in runner.users() {
        wtr.serialize(&*runner.engine.ledger().wallet(user))?;
    }
    wtr.flush()?;
    Ok(())
}
