use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension};

use crate::error::Result;
use crate::gateway::{GatewayError, GatewayResult, ParticipantRegistry};
use crate::types::{AttendanceEvent, AttendanceState};

/// Initialise the attendance schema in `conn`.
///
/// Creates the event and attendee tables (idempotent) and an index on
/// `next_state_change` so the soonest-due query stays cheap with many
/// events.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS attendance_events (
            id                      INTEGER PRIMARY KEY AUTOINCREMENT,
            guild_id                INTEGER NOT NULL,
            channel_id              INTEGER NOT NULL,
            message_id              INTEGER NOT NULL,
            notify_role_id          INTEGER,
            close_offset_secs       INTEGER,            -- NULL means no early close
            notify_offset_secs      INTEGER,            -- NULL means no reminder
            notify_attendees        INTEGER NOT NULL DEFAULT 1,
            topic                   TEXT    NOT NULL,
            description             TEXT,
            repeating               INTEGER NOT NULL DEFAULT 0,
            next_moment             TEXT    NOT NULL,   -- RFC 3339 UTC
            state                   TEXT    NOT NULL DEFAULT 'listening',
            next_state_change       TEXT    NOT NULL,   -- RFC 3339 UTC
            schedule                TEXT,
            zone                    TEXT    NOT NULL DEFAULT 'UTC',
            schedule_timeout_secs   INTEGER,
            notify_message_id       INTEGER,
            notify_role_template_id INTEGER
        ) STRICT;

        -- Soonest-due query: WHERE ... ORDER BY next_state_change LIMIT 1
        CREATE INDEX IF NOT EXISTS idx_attendance_next_change
            ON attendance_events (next_state_change);

        CREATE TABLE IF NOT EXISTS attendance_attendees (
            attendance_id INTEGER NOT NULL
                REFERENCES attendance_events(id) ON DELETE CASCADE,
            user_id       INTEGER NOT NULL,
            PRIMARY KEY (attendance_id, user_id)
        ) STRICT;
        ",
    )?;
    Ok(())
}

/// Column order shared by every SELECT in this module; `row_to_event`
/// depends on it.
const EVENT_COLUMNS: &str = "id, guild_id, channel_id, message_id, notify_role_id, \
     close_offset_secs, notify_offset_secs, notify_attendees, topic, description, \
     repeating, next_moment, state, next_state_change, schedule, zone, \
     schedule_timeout_secs, notify_message_id, notify_role_template_id";

/// Events still owed scheduling work: everything except disabled events and
/// finished events whose schedule cannot be consumed.
const NON_TERMINAL: &str = "state != 'disabled' \
     AND NOT (state = 'finished' AND (repeating = 0 OR schedule IS NULL))";

fn parse_ts(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Map a SELECT row (column order from [`EVENT_COLUMNS`]) to an event.
/// Centralised so every query in this module stays consistent.
fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceEvent> {
    use std::str::FromStr;

    let state = AttendanceState::from_str(&row.get::<_, String>(12)?).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(12, rusqlite::types::Type::Text, e.into())
    })?;

    Ok(AttendanceEvent {
        id: row.get(0)?,
        guild_id: row.get::<_, i64>(1)? as u64,
        channel_id: row.get::<_, i64>(2)? as u64,
        message_id: row.get::<_, i64>(3)? as u64,
        notify_role_id: row.get::<_, Option<i64>>(4)?.map(|v| v as u64),
        close_offset: row.get::<_, Option<i64>>(5)?.map(Duration::seconds),
        notify_offset: row.get::<_, Option<i64>>(6)?.map(Duration::seconds),
        notify_attendees: row.get::<_, i64>(7)? != 0,
        topic: row.get(8)?,
        description: row.get(9)?,
        repeating: row.get::<_, i64>(10)? != 0,
        next_moment: parse_ts(11, row.get(11)?)?,
        state,
        next_state_change: parse_ts(13, row.get(13)?)?,
        schedule: row.get(14)?,
        zone: row.get(15)?,
        schedule_timeout: row.get::<_, Option<i64>>(16)?.map(Duration::seconds),
        notify_message_id: row.get::<_, Option<i64>>(17)?.map(|v| v as u64),
        notify_role_template_id: row.get::<_, Option<i64>>(18)?.map(|v| v as u64),
    })
}

/// Durable table of attendance events.
///
/// Owns one `Connection`; the engine holds one store, the management
/// handle wraps another behind a mutex.
pub struct EventStore {
    conn: Connection,
}

impl EventStore {
    /// Open a store over `conn`, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        // The engine and the management handle share one database file
        // over separate connections.
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        init_db(&conn)?;
        Ok(Self { conn })
    }

    /// Insert `event` (its `id` field is ignored) and return the assigned id.
    pub fn insert(&self, event: &AttendanceEvent) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO attendance_events
             (guild_id, channel_id, message_id, notify_role_id,
              close_offset_secs, notify_offset_secs, notify_attendees,
              topic, description, repeating, next_moment, state,
              next_state_change, schedule, zone, schedule_timeout_secs,
              notify_message_id, notify_role_template_id)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18)",
            rusqlite::params![
                event.guild_id as i64,
                event.channel_id as i64,
                event.message_id as i64,
                event.notify_role_id.map(|v| v as i64),
                event.close_offset.map(|d| d.num_seconds()),
                event.notify_offset.map(|d| d.num_seconds()),
                event.notify_attendees,
                event.topic,
                event.description,
                event.repeating,
                event.next_moment.to_rfc3339(),
                event.state.to_string(),
                event.next_state_change.to_rfc3339(),
                event.schedule,
                event.zone,
                event.schedule_timeout.map(|d| d.num_seconds()),
                event.notify_message_id.map(|v| v as i64),
                event.notify_role_template_id.map(|v| v as i64),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Idempotent full overwrite by id.
    pub fn store(&self, event: &AttendanceEvent) -> Result<()> {
        self.conn.execute(
            "UPDATE attendance_events SET
               guild_id=?2, channel_id=?3, message_id=?4, notify_role_id=?5,
               close_offset_secs=?6, notify_offset_secs=?7, notify_attendees=?8,
               topic=?9, description=?10, repeating=?11, next_moment=?12,
               state=?13, next_state_change=?14, schedule=?15, zone=?16,
               schedule_timeout_secs=?17, notify_message_id=?18,
               notify_role_template_id=?19
             WHERE id=?1",
            rusqlite::params![
                event.id,
                event.guild_id as i64,
                event.channel_id as i64,
                event.message_id as i64,
                event.notify_role_id.map(|v| v as i64),
                event.close_offset.map(|d| d.num_seconds()),
                event.notify_offset.map(|d| d.num_seconds()),
                event.notify_attendees,
                event.topic,
                event.description,
                event.repeating,
                event.next_moment.to_rfc3339(),
                event.state.to_string(),
                event.next_state_change.to_rfc3339(),
                event.schedule,
                event.zone,
                event.schedule_timeout.map(|d| d.num_seconds()),
                event.notify_message_id.map(|v| v as i64),
                event.notify_role_template_id.map(|v| v as i64),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: i64) -> Result<Option<AttendanceEvent>> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM attendance_events WHERE id = ?1");
        let event = self
            .conn
            .query_row(&sql, [id], row_to_event)
            .optional()?;
        Ok(event)
    }

    /// Point lookup by the announcement message, used by the button
    /// handler and the info command's message-link form.
    pub fn get_by_message(
        &self,
        guild_id: u64,
        channel_id: u64,
        message_id: u64,
    ) -> Result<Option<AttendanceEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM attendance_events
             WHERE guild_id = ?1 AND channel_id = ?2 AND message_id = ?3"
        );
        let event = self
            .conn
            .query_row(
                &sql,
                [guild_id as i64, channel_id as i64, message_id as i64],
                row_to_event,
            )
            .optional()?;
        Ok(event)
    }

    /// All events of one guild, oldest first.
    pub fn list_by_guild(&self, guild_id: u64) -> Result<Vec<AttendanceEvent>> {
        let sql =
            format!("SELECT {EVENT_COLUMNS} FROM attendance_events WHERE guild_id = ?1 ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let events = stmt
            .query_map([guild_id as i64], row_to_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    /// Delete the event (guild-scoped so one guild cannot remove
    /// another's). Returns whether a row was removed.
    pub fn delete(&self, id: i64, guild_id: u64) -> Result<bool> {
        let n = self.conn.execute(
            "DELETE FROM attendance_events WHERE id = ?1 AND guild_id = ?2",
            [id, guild_id as i64],
        )?;
        Ok(n > 0)
    }

    /// The single event with the globally soonest `next_state_change`
    /// among non-terminal events, or `None` when nothing is left to
    /// schedule.
    pub fn soonest_due(&self) -> Result<Option<AttendanceEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM attendance_events
             WHERE {NON_TERMINAL}
             ORDER BY next_state_change ASC
             LIMIT 1"
        );
        let event = self.conn.query_row(&sql, [], row_to_event).optional()?;
        Ok(event)
    }
}

/// Sign-up roster, keyed by event id.
///
/// Shared between the Discord button handler (register/revoke) and the
/// engine (list/clear through [`ParticipantRegistry`]), hence the mutexed
/// connection.
#[derive(Clone)]
pub struct AttendeeStore {
    conn: Arc<Mutex<Connection>>,
}

impl AttendeeStore {
    pub fn new(conn: Connection) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Record a sign-up. Returns false when the user was already signed up.
    pub fn register(&self, event_id: i64, user_id: u64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "INSERT OR IGNORE INTO attendance_attendees (attendance_id, user_id) VALUES (?1, ?2)",
            [event_id, user_id as i64],
        )?;
        Ok(n > 0)
    }

    /// Withdraw a sign-up. Returns false when the user was not signed up.
    pub fn revoke(&self, event_id: i64, user_id: u64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM attendance_attendees WHERE attendance_id = ?1 AND user_id = ?2",
            [event_id, user_id as i64],
        )?;
        Ok(n > 0)
    }

    pub fn list_event(&self, event_id: i64) -> Result<Vec<u64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT user_id FROM attendance_attendees WHERE attendance_id = ?1 ORDER BY rowid",
        )?;
        let users = stmt
            .query_map([event_id], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users.into_iter().map(|v| v as u64).collect())
    }

    pub fn clear_event(&self, event_id: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM attendance_attendees WHERE attendance_id = ?1",
            [event_id],
        )?;
        Ok(n)
    }
}

#[async_trait]
impl ParticipantRegistry for AttendeeStore {
    async fn list(&self, event_id: i64) -> GatewayResult<Vec<u64>> {
        self.list_event(event_id)
            .map_err(|e| GatewayError::Transport(e.to_string()))
    }

    async fn clear(&self, event_id: i64) -> GatewayResult<()> {
        self.clear_event(event_id)
            .map(|_| ())
            .map_err(|e| GatewayError::Transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store() -> EventStore {
        EventStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn sample(guild_id: u64, change_secs: i64) -> AttendanceEvent {
        let moment = Utc.with_ymd_and_hms(2026, 6, 1, 18, 0, 0).unwrap();
        AttendanceEvent {
            id: 0,
            guild_id,
            channel_id: 200,
            message_id: 300,
            notify_role_id: Some(400),
            close_offset: Some(Duration::minutes(10)),
            notify_offset: Some(Duration::minutes(5)),
            notify_attendees: true,
            topic: "scrim".to_string(),
            description: Some("weekly scrim".to_string()),
            repeating: false,
            next_moment: moment,
            state: AttendanceState::Listening,
            next_state_change: moment + Duration::seconds(change_secs),
            schedule: None,
            zone: "UTC".to_string(),
            schedule_timeout: None,
            notify_message_id: None,
            notify_role_template_id: None,
        }
    }

    #[test]
    fn insert_then_get_round_trips() {
        let store = store();
        let mut ev = sample(1, 0);
        ev.id = store.insert(&ev).unwrap();
        assert!(ev.id > 0);

        let back = store.get(ev.id).unwrap().unwrap();
        assert_eq!(back, ev);
        assert!(store.get(ev.id + 1).unwrap().is_none());
    }

    #[test]
    fn get_by_message_finds_the_row() {
        let store = store();
        let mut ev = sample(1, 0);
        ev.id = store.insert(&ev).unwrap();

        let back = store.get_by_message(1, 200, 300).unwrap().unwrap();
        assert_eq!(back.id, ev.id);
        assert!(store.get_by_message(1, 200, 999).unwrap().is_none());
    }

    #[test]
    fn list_is_scoped_to_the_guild() {
        let store = store();
        store.insert(&sample(1, 0)).unwrap();
        store.insert(&sample(1, 10)).unwrap();
        store.insert(&sample(2, 5)).unwrap();

        assert_eq!(store.list_by_guild(1).unwrap().len(), 2);
        assert_eq!(store.list_by_guild(2).unwrap().len(), 1);
        assert!(store.list_by_guild(3).unwrap().is_empty());
    }

    #[test]
    fn delete_requires_matching_guild() {
        let store = store();
        let id = store.insert(&sample(1, 0)).unwrap();

        assert!(!store.delete(id, 2).unwrap());
        assert!(store.delete(id, 1).unwrap());
        assert!(!store.delete(id, 1).unwrap());
    }

    #[test]
    fn store_overwrites_in_place() {
        let store = store();
        let mut ev = sample(1, 0);
        ev.id = store.insert(&ev).unwrap();

        ev.state = AttendanceState::Closed;
        ev.notify_message_id = Some(777);
        ev.notify_offset = None;
        store.store(&ev).unwrap();
        store.store(&ev).unwrap(); // idempotent

        let back = store.get(ev.id).unwrap().unwrap();
        assert_eq!(back, ev);
    }

    #[test]
    fn soonest_due_returns_the_global_minimum() {
        let store = store();
        store.insert(&sample(1, 50)).unwrap();
        let first = store.insert(&sample(2, -30)).unwrap();
        store.insert(&sample(1, 10)).unwrap();

        let head = store.soonest_due().unwrap().unwrap();
        assert_eq!(head.id, first);
    }

    #[test]
    fn soonest_due_skips_terminal_events() {
        let store = store();

        let mut disabled = sample(1, -100);
        disabled.state = AttendanceState::Disabled;
        store.insert(&disabled).unwrap();

        let mut done = sample(1, -90);
        done.state = AttendanceState::Finished;
        store.insert(&done).unwrap();

        // Finished with repeating but no schedule string is terminal too.
        let mut half = sample(1, -80);
        half.state = AttendanceState::Finished;
        half.repeating = true;
        store.insert(&half).unwrap();

        assert!(store.soonest_due().unwrap().is_none());

        // A finished event with a consumable schedule still needs
        // recurrence processing.
        let mut recurring = sample(1, -70);
        recurring.state = AttendanceState::Finished;
        recurring.repeating = true;
        recurring.schedule = Some("0 0 18 * * Mon".to_string());
        let id = store.insert(&recurring).unwrap();

        assert_eq!(store.soonest_due().unwrap().unwrap().id, id);
    }

    #[test]
    fn attendee_roster_round_trip() {
        let attendees = AttendeeStore::new(Connection::open_in_memory().unwrap()).unwrap();

        assert!(attendees.register(1, 100).unwrap());
        assert!(!attendees.register(1, 100).unwrap());
        assert!(attendees.register(1, 101).unwrap());
        assert!(attendees.register(2, 100).unwrap());

        assert_eq!(attendees.list_event(1).unwrap(), vec![100, 101]);

        assert!(attendees.revoke(1, 100).unwrap());
        assert!(!attendees.revoke(1, 100).unwrap());
        assert_eq!(attendees.list_event(1).unwrap(), vec![101]);

        assert_eq!(attendees.clear_event(1).unwrap(), 1);
        assert!(attendees.list_event(1).unwrap().is_empty());
        assert_eq!(attendees.list_event(2).unwrap(), vec![100]);
    }
}
