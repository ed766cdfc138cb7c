use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use tokio::sync::{watch, Notify};
use tracing::{error, info, warn};

use muster_core::config::SchedulerConfig;

use crate::db::EventStore;
use crate::error::{Result, SchedulerError};
use crate::gateway::Collaborators;
use crate::recurrence;
use crate::schedule;
use crate::transition;
use crate::types::{AttendanceEvent, AttendanceState, NewEvent};

/// Shared handle for event management (create/remove/list) while the
/// engine loop runs.
///
/// Uses its own `Connection` so command handlers never contend with the
/// engine's queries. Every mutation fires the shared wake signal: the
/// engine's sleep target is the global minimum deadline, and a mutation
/// may have just changed it.
#[derive(Clone)]
pub struct SchedulerHandle {
    store: Arc<Mutex<EventStore>>,
    wake: Arc<Notify>,
}

impl SchedulerHandle {
    pub fn new(conn: Connection, wake: Arc<Notify>) -> Result<Self> {
        Ok(Self {
            store: Arc::new(Mutex::new(EventStore::new(conn)?)),
            wake,
        })
    }

    /// Validate and insert a new event in `Listening` state.
    ///
    /// The announcement must already be published and `next_moment`
    /// already resolved (see [`schedule::resolve_next_moment`]); this
    /// checks offsets, schedule and zone, computes the first deadline and
    /// wakes the engine.
    pub fn create(&self, new: NewEvent) -> Result<AttendanceEvent> {
        if new.close_offset.is_some_and(|d| d < Duration::zero())
            || new.notify_offset.is_some_and(|d| d < Duration::zero())
        {
            return Err(SchedulerError::Validation(
                "offsets must not be negative".to_string(),
            ));
        }
        if let Some(expr) = new.schedule.as_deref() {
            schedule::validate(expr)?;
        }
        schedule::parse_zone(&new.zone)?;

        let mut event = AttendanceEvent {
            id: 0,
            guild_id: new.guild_id,
            channel_id: new.channel_id,
            message_id: new.message_id,
            notify_role_id: new.notify_role_id,
            close_offset: new.close_offset,
            // A disabled reminder switch makes the notify path inert from
            // the start.
            notify_offset: new.notify_offset.filter(|_| new.notify_attendees),
            notify_attendees: new.notify_attendees,
            topic: new.topic,
            description: new.description,
            repeating: new.repeating,
            next_moment: new.next_moment,
            state: AttendanceState::Listening,
            next_state_change: new.next_moment,
            schedule: new.schedule,
            zone: new.zone,
            schedule_timeout: new.schedule_timeout,
            notify_message_id: None,
            notify_role_template_id: new.notify_role_template_id,
        };
        event.next_state_change = new.next_moment - event.max_offset();

        event.id = self.store.lock().unwrap().insert(&event)?;
        info!(
            event_id = event.id,
            topic = %event.topic,
            next_moment = %event.next_moment,
            "attendance event created"
        );
        self.wake.notify_one();
        Ok(event)
    }

    /// Remove an event. Returns whether anything was deleted.
    pub fn remove(&self, id: i64, guild_id: u64) -> Result<bool> {
        let removed = self.store.lock().unwrap().delete(id, guild_id)?;
        if removed {
            info!(event_id = id, "attendance event removed");
            self.wake.notify_one();
        }
        Ok(removed)
    }

    pub fn get(&self, id: i64) -> Result<Option<AttendanceEvent>> {
        self.store.lock().unwrap().get(id)
    }

    pub fn get_by_message(
        &self,
        guild_id: u64,
        channel_id: u64,
        message_id: u64,
    ) -> Result<Option<AttendanceEvent>> {
        self.store
            .lock()
            .unwrap()
            .get_by_message(guild_id, channel_id, message_id)
    }

    pub fn list(&self, guild_id: u64) -> Result<Vec<AttendanceEvent>> {
        self.store.lock().unwrap().list_by_guild(guild_id)
    }
}

struct RetryState {
    attempts: u32,
    not_before: DateTime<Utc>,
}

/// Drives every attendance event's state machine from one cooperative
/// loop: query the globally soonest deadline, wait for it (cancellably),
/// apply the due cascade, repeat. Events are never processed in parallel,
/// so no locking exists around transitions.
pub struct SchedulerEngine {
    store: EventStore,
    ports: Collaborators,
    wake: Arc<Notify>,
    config: SchedulerConfig,
    /// Per-event retry throttle for transient failures; in-memory only.
    backoff: HashMap<i64, RetryState>,
}

impl SchedulerEngine {
    pub fn new(
        conn: Connection,
        ports: Collaborators,
        wake: Arc<Notify>,
        config: SchedulerConfig,
    ) -> Result<Self> {
        Ok(Self {
            store: EventStore::new(conn)?,
            ports,
            wake,
            config,
            backoff: HashMap::new(),
        })
    }

    /// Main loop. Runs until `shutdown` broadcasts `true` (or its sender
    /// is dropped).
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("attendance engine started");
        loop {
            let head = match self.store.soonest_due() {
                Ok(head) => head,
                Err(e) => {
                    error!("soonest-due query failed: {e}");
                    tokio::select! {
                        _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {}
                        res = shutdown.changed() => {
                            if res.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                    continue;
                }
            };

            let Some(event) = head else {
                // Nothing left to schedule — suspend until a store
                // mutation signals a new minimum.
                tokio::select! {
                    _ = self.wake.notified() => {}
                    res = shutdown.changed() => {
                        if res.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
                continue;
            };

            let now = Utc::now();
            let due_at = self.effective_deadline(&event);
            if due_at > now {
                // Cancellable sleep: a wake means the minimum may have
                // moved, so re-query rather than trusting this deadline.
                let nap = (due_at - now).to_std().unwrap_or_default();
                tokio::select! {
                    _ = tokio::time::sleep(nap) => {}
                    _ = self.wake.notified() => {}
                    res = shutdown.changed() => {
                        if res.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
                continue;
            }

            self.process(event, now).await;
        }
        info!("attendance engine stopped");
    }

    fn effective_deadline(&self, event: &AttendanceEvent) -> DateTime<Utc> {
        match self.backoff.get(&event.id) {
            Some(retry) => retry.not_before.max(event.next_state_change),
            None => event.next_state_change,
        }
    }

    /// Drive one due event and absorb the outcome.
    async fn process(&mut self, event: AttendanceEvent, now: DateTime<Utc>) {
        let id = event.id;
        let pristine = event.clone();
        match self.drive(event, now).await {
            Ok(()) => {
                self.backoff.remove(&id);
            }
            Err(e) if e.is_unrecoverable() => {
                error!(event_id = id, error = %e, "unrecoverable failure, disabling event");
                let mut dead = pristine;
                dead.state = AttendanceState::Disabled;
                if let Err(e) = self.store.store(&dead) {
                    error!(event_id = id, "failed to persist disabled event: {e}");
                }
                self.backoff.remove(&id);
            }
            Err(e) => {
                // Nothing from the attempt is persisted; the event stays
                // due and is retried after a growing delay.
                let retry = self.backoff.entry(id).or_insert(RetryState {
                    attempts: 0,
                    not_before: now,
                });
                let delay = backoff_delay(&self.config, retry.attempts);
                retry.attempts += 1;
                retry.not_before = now + delay;
                warn!(
                    event_id = id,
                    attempt = retry.attempts,
                    retry_in_secs = delay.num_seconds(),
                    "transient failure while driving event: {e}"
                );
            }
        }
    }

    /// Apply every transition that has become available at `now`, perform
    /// each transition's side effects, then persist once.
    async fn drive(&mut self, mut event: AttendanceEvent, now: DateTime<Utc>) -> Result<()> {
        let mut applied = 0usize;
        while let Some(next) = transition::next_available_state(&event, now) {
            event.state = next;
            match next {
                AttendanceState::Closed => {
                    self.ports.announce.close_signup(&event).await?;
                }
                AttendanceState::Notified => {
                    match self.ports.announce.send_reminder(&event).await? {
                        Some(message_id) => event.notify_message_id = Some(message_id),
                        // Audience role is gone — the notify path degrades
                        // and the event finishes at the moment instead.
                        None => event.notify_offset = None,
                    }
                }
                AttendanceState::Finished => {
                    let roster = self.ports.attendees.list(event.id).await?;
                    self.ports.announce.finish(&event, &roster).await?;
                }
                AttendanceState::Listening | AttendanceState::Disabled => {
                    return Err(SchedulerError::InvalidState("illegal transition target"));
                }
            }
            event.next_state_change = transition::next_deadline(&event)?;
            applied += 1;
            info!(
                event_id = event.id,
                state = %event.state,
                next_change = %event.next_state_change,
                "attendance state advanced"
            );
        }

        if applied == 0 {
            if event.state == AttendanceState::Finished && event.has_consumable_schedule() {
                recurrence::reopen(&mut event, &self.ports, now).await?;
            } else {
                // A due event with nothing to apply should be impossible;
                // push its deadline forward rather than spinning on it.
                warn!(event_id = event.id, state = %event.state,
                    "due event has no available transition");
                event.next_state_change = transition::next_deadline(&event)?;
            }
        }

        self.store.store(&event)?;
        Ok(())
    }
}

fn backoff_delay(config: &SchedulerConfig, attempts: u32) -> Duration {
    let base = config.backoff_base_secs.max(1);
    let secs = base
        .saturating_mul(1u64 << attempts.min(30))
        .min(config.backoff_cap_secs.max(base));
    Duration::seconds(secs as i64)
}
