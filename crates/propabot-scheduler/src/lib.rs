//! `propabot-scheduler`: the once-a-day trigger behind the daily poster.
//!
//! # Overview
//!
//! A [`engine::DailyScheduler`] owns exactly one job slot, `daily_content`,
//! which fires at a local `HH:MM` in an IANA timezone. Every firing is written
//! to a SQLite run ledger ([`ledger::RunLedger`]).
//!
//! | Situation                                   | Behaviour                          |
//! |---------------------------------------------|------------------------------------|
//! | Configured shortly after today's slot       | One catch-up run, unless the ledger already has one |
//! | Trigger wakes later than the misfire grace  | Slot skipped, next slot from "now" |
//! | Firing while the previous run is in flight  | Skipped, never queued              |
//! | Runner error or panic                       | Logged and recorded, loop continues |
//! | Reconfigured                                | Old trigger cancelled, new one installed |

pub mod clock;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod schedule;
pub mod types;

pub use clock::{Clock, SystemClock, TokioClock};
pub use engine::{DailyScheduler, JobRunner, RunError, SchedulerOptions, DAILY_CONTENT_JOB};
pub use error::{Result, SchedulerError};
pub use ledger::RunLedger;
pub use types::{FireKind, Firing, RunOutcome, RunRecord};
