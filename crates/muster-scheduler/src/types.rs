use chrono::{DateTime, Duration, Utc};

/// Lifecycle state of one attendance occurrence.
///
/// Within an occurrence the state only moves forward:
/// `Listening → {Closed, Notified} → {the other} → Finished`. `Disabled` is
/// reachable from anywhere and absorbing. `Finished → Listening` happens
/// only through the recurrence handler, which also assigns a fresh moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceState {
    /// Announcement is up and accepting sign-ups.
    Listening,
    /// Sign-up was closed ahead of the moment.
    Closed,
    /// The reminder ping has been sent.
    Notified,
    /// The occurrence is over and the announcement shows the final roster.
    Finished,
    /// Permanently removed from scheduling after an unrecoverable error.
    Disabled,
}

impl std::fmt::Display for AttendanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AttendanceState::Listening => "listening",
            AttendanceState::Closed => "closed",
            AttendanceState::Notified => "notified",
            AttendanceState::Finished => "finished",
            AttendanceState::Disabled => "disabled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for AttendanceState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "listening" => Ok(AttendanceState::Listening),
            "closed" => Ok(AttendanceState::Closed),
            "notified" => Ok(AttendanceState::Notified),
            "finished" => Ok(AttendanceState::Finished),
            "disabled" => Ok(AttendanceState::Disabled),
            other => Err(format!("unknown attendance state: {other}")),
        }
    }
}

/// A persisted attendance event. One row per scheduled occurrence; a
/// recurring event reuses the same row (and id) for every occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceEvent {
    /// AUTOINCREMENT primary key.
    pub id: i64,
    pub guild_id: u64,
    pub channel_id: u64,
    /// The announcement message this event lives on.
    pub message_id: u64,
    /// Role pinged by the reminder, if any.
    pub notify_role_id: Option<u64>,
    /// How long before `next_moment` sign-up closes.
    pub close_offset: Option<Duration>,
    /// How long before `next_moment` the reminder fires.
    pub notify_offset: Option<Duration>,
    /// Master switch for reminder behaviour.
    pub notify_attendees: bool,
    pub topic: String,
    pub description: Option<String>,
    /// Whether `schedule` is consumed to plan the next occurrence.
    pub repeating: bool,
    /// The instant this occurrence is about, in absolute time.
    pub next_moment: DateTime<Utc>,
    pub state: AttendanceState,
    /// The instant this event must next be re-evaluated. Single source of
    /// truth for scheduling priority across the whole store.
    pub next_state_change: DateTime<Utc>,
    /// Cron-like expression, resolved in `zone`.
    pub schedule: Option<String>,
    /// IANA zone id the schedule is resolved in.
    pub zone: String,
    /// Grace period after `next_moment` before a finished recurring event
    /// reopens.
    pub schedule_timeout: Option<Duration>,
    /// The reminder message of the current occurrence, if one was sent.
    pub notify_message_id: Option<u64>,
    /// Template cloned into a fresh notify role on every recurrence.
    pub notify_role_template_id: Option<u64>,
}

impl AttendanceEvent {
    /// The larger of the two offsets, or zero when neither is set. The
    /// first transition of a fresh occurrence is due at
    /// `next_moment - max_offset()`.
    pub fn max_offset(&self) -> Duration {
        std::cmp::max(
            self.close_offset.unwrap_or_else(Duration::zero),
            self.notify_offset.unwrap_or_else(Duration::zero),
        )
    }

    /// Whether finishing this event should plan a next occurrence.
    pub fn has_consumable_schedule(&self) -> bool {
        self.repeating && self.schedule.is_some()
    }
}

/// Creation payload for a new attendance event. The announcement must
/// already be published; `next_moment` must already be resolved from the
/// requested moment or schedule (see [`crate::schedule::resolve_next_moment`]).
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub guild_id: u64,
    pub channel_id: u64,
    pub message_id: u64,
    pub notify_role_id: Option<u64>,
    pub close_offset: Option<Duration>,
    pub notify_offset: Option<Duration>,
    pub notify_attendees: bool,
    pub topic: String,
    pub description: Option<String>,
    pub repeating: bool,
    pub next_moment: DateTime<Utc>,
    pub schedule: Option<String>,
    pub zone: String,
    pub schedule_timeout: Option<Duration>,
    pub notify_role_template_id: Option<u64>,
}
