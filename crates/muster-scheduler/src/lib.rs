//! `muster-scheduler` — attendance event engine with SQLite persistence.
//!
//! # Overview
//!
//! Attendance events are persisted to a SQLite `attendance_events` table.
//! The [`engine::SchedulerEngine`] waits on the soonest `next_state_change`
//! across the whole table and drives the due event through its state
//! machine, one cascade per wakeup. There is no polling interval: the wait
//! is interruptible, and every store mutation that can change the global
//! minimum deadline fires the shared wake signal.
//!
//! # Event states
//!
//! | State       | Meaning                                              |
//! |-------------|------------------------------------------------------|
//! | `Listening` | Announcement is open for sign-up                     |
//! | `Closed`    | Sign-up closed early (`close_offset` before the moment) |
//! | `Notified`  | Reminder sent (`notify_offset` before the moment)    |
//! | `Finished`  | Occurrence closed out; reopens if a schedule remains |
//! | `Disabled`  | Permanently out of scheduling (absorbing)            |
//!
//! `Closed` and `Notified` can occur in either order depending on which
//! offset is larger, or be skipped entirely when no offset is set.

pub mod db;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod recurrence;
pub mod schedule;
pub mod transition;
pub mod types;

pub use db::{AttendeeStore, EventStore};
pub use engine::{SchedulerEngine, SchedulerHandle};
pub use error::{Result, SchedulerError};
pub use gateway::{AnnouncementPort, Collaborators, GatewayError, ParticipantRegistry, RolePort};
pub use types::{AttendanceEvent, AttendanceState, NewEvent};
