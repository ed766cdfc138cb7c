//! Reopening pass for recurring events.
//!
//! Runs when the engine finds a due `Finished` event that still has a
//! consumable schedule, i.e. at `next_moment + schedule_timeout`. The
//! event value is mutated in place; the engine persists it once the whole
//! pass succeeds.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::{Result, SchedulerError};
use crate::gateway::Collaborators;
use crate::schedule;
use crate::types::{AttendanceEvent, AttendanceState};

/// Plan the next occurrence: consult the oracle, publish a fresh
/// announcement, reset the state machine, rotate the notify role off its
/// template and clear the roster.
pub async fn reopen(
    event: &mut AttendanceEvent,
    ports: &Collaborators,
    now: DateTime<Utc>,
) -> Result<()> {
    let expr = event
        .schedule
        .clone()
        .ok_or(SchedulerError::InvalidState("reopen without a schedule"))?;
    let next = schedule::next_occurrence(&expr, &event.zone, now)?
        .ok_or(SchedulerError::ScheduleExhausted)?;

    // The announcement layout shows the new occurrence, so the moment is
    // reset before publishing.
    event.next_moment = next;
    event.state = AttendanceState::Listening;
    event.next_state_change = next - event.max_offset();
    event.message_id = ports.announce.publish(event).await?;

    // Rotate the notify role: previous attendees keep their sign-up role
    // only until the occurrence they signed up for is over.
    if let Some(template) = event.notify_role_template_id {
        if let Some(fresh) = ports.roles.clone_role(event.guild_id, template).await? {
            let previous = event.notify_role_id.replace(fresh);
            if let Some(old) = previous {
                if let Err(e) = ports.roles.delete_role(event.guild_id, old).await {
                    warn!(event_id = event.id, role_id = old, error = %e,
                        "failed to retire previous notify role");
                }
            }
            // The old reminder message would now mention a deleted role;
            // point it at the template instead.
            if let Some(msg) = event.notify_message_id.take() {
                if let Err(e) = ports
                    .roles
                    .rewrite_reminder(event.channel_id, msg, template)
                    .await
                {
                    warn!(event_id = event.id, error = %e,
                        "failed to rewrite previous reminder message");
                }
            }
        }
    }

    // Fresh occurrence starts with zero sign-ups.
    ports.attendees.clear(event.id).await?;

    info!(event_id = event.id, next_moment = %event.next_moment, "attendance event reopened");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{
        AnnouncementPort, GatewayError, GatewayResult, ParticipantRegistry, RolePort,
    };
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeAnnounce {
        published: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl AnnouncementPort for FakeAnnounce {
        async fn publish(&self, event: &AttendanceEvent) -> GatewayResult<u64> {
            self.published.lock().unwrap().push(event.id);
            Ok(9000)
        }
        async fn close_signup(&self, _event: &AttendanceEvent) -> GatewayResult<()> {
            Ok(())
        }
        async fn finish(&self, _event: &AttendanceEvent, _attendees: &[u64]) -> GatewayResult<()> {
            Ok(())
        }
        async fn send_reminder(&self, _event: &AttendanceEvent) -> GatewayResult<Option<u64>> {
            Ok(Some(1))
        }
    }

    #[derive(Default)]
    struct FakeRoles {
        cloned: AtomicBool,
        deleted: Mutex<Vec<u64>>,
        rewritten: Mutex<Vec<u64>>,
        clone_fails: bool,
    }

    #[async_trait]
    impl RolePort for FakeRoles {
        async fn clone_role(&self, _guild_id: u64, _template: u64) -> GatewayResult<Option<u64>> {
            if self.clone_fails {
                return Ok(None);
            }
            self.cloned.store(true, Ordering::SeqCst);
            Ok(Some(555))
        }
        async fn delete_role(&self, _guild_id: u64, role_id: u64) -> GatewayResult<()> {
            self.deleted.lock().unwrap().push(role_id);
            Ok(())
        }
        async fn rewrite_reminder(
            &self,
            _channel_id: u64,
            message_id: u64,
            _role_id: u64,
        ) -> GatewayResult<()> {
            self.rewritten.lock().unwrap().push(message_id);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeRegistry {
        cleared: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl ParticipantRegistry for FakeRegistry {
        async fn list(&self, _event_id: i64) -> GatewayResult<Vec<u64>> {
            Ok(Vec::new())
        }
        async fn clear(&self, event_id: i64) -> GatewayResult<()> {
            self.cleared.lock().unwrap().push(event_id);
            Ok(())
        }
    }

    fn ports(
        announce: Arc<FakeAnnounce>,
        roles: Arc<FakeRoles>,
        registry: Arc<FakeRegistry>,
    ) -> Collaborators {
        Collaborators {
            announce,
            roles,
            attendees: registry,
        }
    }

    fn finished_event() -> AttendanceEvent {
        let moment = Utc.with_ymd_and_hms(2026, 6, 1, 18, 30, 0).unwrap();
        AttendanceEvent {
            id: 7,
            guild_id: 1,
            channel_id: 2,
            message_id: 3,
            notify_role_id: Some(44),
            close_offset: Some(Duration::minutes(10)),
            notify_offset: Some(Duration::minutes(5)),
            notify_attendees: true,
            topic: "raid".to_string(),
            description: None,
            repeating: true,
            next_moment: moment,
            state: AttendanceState::Finished,
            next_state_change: moment,
            schedule: Some("30 18 * * *".to_string()),
            zone: "UTC".to_string(),
            schedule_timeout: None,
            notify_message_id: Some(66),
            notify_role_template_id: Some(88),
        }
    }

    #[tokio::test]
    async fn reopen_resets_the_occurrence() {
        let announce = Arc::new(FakeAnnounce::default());
        let roles = Arc::new(FakeRoles::default());
        let registry = Arc::new(FakeRegistry::default());
        let ports = ports(announce.clone(), roles.clone(), registry.clone());

        let mut ev = finished_event();
        let prior = ev.next_moment;
        reopen(&mut ev, &ports, prior + Duration::minutes(1))
            .await
            .unwrap();

        assert_eq!(ev.state, AttendanceState::Listening);
        assert!(ev.next_moment > prior);
        assert_eq!(ev.next_state_change, ev.next_moment - Duration::minutes(10));
        assert_eq!(ev.message_id, 9000);
        assert_eq!(*announce.published.lock().unwrap(), vec![7]);
        assert_eq!(*registry.cleared.lock().unwrap(), vec![7]);

        // Role rotation: fresh clone in, old role out, old reminder
        // rewritten and forgotten.
        assert!(roles.cloned.load(Ordering::SeqCst));
        assert_eq!(ev.notify_role_id, Some(555));
        assert_eq!(*roles.deleted.lock().unwrap(), vec![44]);
        assert_eq!(*roles.rewritten.lock().unwrap(), vec![66]);
        assert_eq!(ev.notify_message_id, None);
    }

    #[tokio::test]
    async fn missing_template_clone_keeps_previous_role() {
        let announce = Arc::new(FakeAnnounce::default());
        let roles = Arc::new(FakeRoles {
            clone_fails: true,
            ..Default::default()
        });
        let registry = Arc::new(FakeRegistry::default());
        let ports = ports(announce, roles.clone(), registry);

        let mut ev = finished_event();
        let now = ev.next_moment + Duration::minutes(1);
        reopen(&mut ev, &ports, now)
            .await
            .unwrap();

        assert_eq!(ev.notify_role_id, Some(44));
        assert_eq!(ev.notify_message_id, Some(66));
        assert!(roles.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn exhausted_schedule_is_unrecoverable() {
        let announce = Arc::new(FakeAnnounce::default());
        let roles = Arc::new(FakeRoles::default());
        let registry = Arc::new(FakeRegistry::default());
        let ports = ports(announce.clone(), roles, registry);

        let mut ev = finished_event();
        ev.schedule = Some("0 0 12 * * * 2020".to_string());
        let now = ev.next_moment + Duration::minutes(1);
        let err = reopen(&mut ev, &ports, now)
            .await
            .unwrap_err();

        assert!(err.is_unrecoverable());
        assert!(announce.published.lock().unwrap().is_empty());
    }
}
