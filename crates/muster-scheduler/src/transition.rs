//! Pure transition rules for attendance events.
//!
//! Nothing in here touches the wall clock or performs I/O: `now` is always
//! passed in, so the rules can be unit-tested at any instant. All
//! collaborator calls happen in the engine and the recurrence handler.

use chrono::{DateTime, Duration, Utc};

use crate::error::{Result, SchedulerError};
use crate::types::{AttendanceEvent, AttendanceState};

/// The state `event` should move to if `now` has reached the relevant
/// threshold, or `None` when no transition is due yet.
///
/// With both offsets set, whichever threshold (`next_moment - offset`) is
/// crossed first wins; when both are already crossed the target is the
/// state whose own offset is not the larger one. Equal offsets resolve to
/// `Closed`.
pub fn next_available_state(
    event: &AttendanceEvent,
    now: DateTime<Utc>,
) -> Option<AttendanceState> {
    let close = event.close_offset;
    let notify = event.notify_offset;

    match event.state {
        AttendanceState::Listening => match (close, notify) {
            (None, None) => (now >= event.next_moment).then_some(AttendanceState::Finished),
            (Some(c), Some(n)) => {
                if now >= event.next_moment - c {
                    Some(if n > c {
                        AttendanceState::Notified
                    } else {
                        AttendanceState::Closed
                    })
                } else if now >= event.next_moment - n {
                    Some(if c > n {
                        AttendanceState::Closed
                    } else {
                        AttendanceState::Notified
                    })
                } else {
                    None
                }
            }
            (Some(c), None) => {
                (now >= event.next_moment - c).then_some(AttendanceState::Closed)
            }
            (None, Some(n)) => {
                (now >= event.next_moment - n).then_some(AttendanceState::Notified)
            }
        },

        // The notify path is only still usable when a role exists and the
        // notify threshold lies strictly after the close threshold.
        AttendanceState::Closed => match (close, notify) {
            (Some(c), Some(n)) if event.notify_role_id.is_some() && n < c => {
                (now >= event.next_moment - n).then_some(AttendanceState::Notified)
            }
            _ => (now >= event.next_moment).then_some(AttendanceState::Finished),
        },

        AttendanceState::Notified => match (close, notify) {
            (Some(c), Some(n)) if c < n => {
                (now >= event.next_moment - c).then_some(AttendanceState::Closed)
            }
            _ => (now >= event.next_moment).then_some(AttendanceState::Finished),
        },

        AttendanceState::Finished | AttendanceState::Disabled => None,
    }
}

/// The instant at which the next transition out of the current state
/// becomes available. Used to set `next_state_change` after applying a
/// transition.
///
/// `Finished` maps to the reopen deadline (`next_moment + schedule_timeout`);
/// asking from `Disabled` is an invariant violation.
pub fn next_deadline(event: &AttendanceEvent) -> Result<DateTime<Utc>> {
    match event.state {
        AttendanceState::Disabled => Err(SchedulerError::InvalidState(
            "deadline requested for a disabled event",
        )),
        AttendanceState::Finished => {
            Ok(event.next_moment + event.schedule_timeout.unwrap_or_else(Duration::zero))
        }
        _ => {
            let upcoming = next_available_state(event, DateTime::<Utc>::MAX_UTC).ok_or(
                SchedulerError::InvalidState("non-terminal event has no reachable next state"),
            )?;
            match upcoming {
                AttendanceState::Closed => Ok(event.next_moment
                    - event.close_offset.unwrap_or_else(Duration::zero)),
                AttendanceState::Notified => Ok(event.next_moment
                    - event.notify_offset.unwrap_or_else(Duration::zero)),
                AttendanceState::Finished => Ok(event.next_moment),
                AttendanceState::Listening | AttendanceState::Disabled => Err(
                    SchedulerError::InvalidState("unexpected successor state"),
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn moment() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 20, 0, 0).unwrap()
    }

    fn event(
        state: AttendanceState,
        close: Option<i64>,
        notify: Option<i64>,
    ) -> AttendanceEvent {
        AttendanceEvent {
            id: 1,
            guild_id: 10,
            channel_id: 20,
            message_id: 30,
            notify_role_id: Some(40),
            close_offset: close.map(Duration::minutes),
            notify_offset: notify.map(Duration::minutes),
            notify_attendees: true,
            topic: "raid night".to_string(),
            description: None,
            repeating: false,
            next_moment: moment(),
            state,
            next_state_change: moment(),
            schedule: None,
            zone: "UTC".to_string(),
            schedule_timeout: None,
            notify_message_id: None,
            notify_role_template_id: None,
        }
    }

    fn mins_before(m: i64) -> DateTime<Utc> {
        moment() - Duration::minutes(m)
    }

    #[test]
    fn no_offsets_finishes_only_at_the_moment() {
        let ev = event(AttendanceState::Listening, None, None);
        assert_eq!(next_available_state(&ev, moment() - Duration::seconds(1)), None);
        assert_eq!(
            next_available_state(&ev, moment()),
            Some(AttendanceState::Finished)
        );
        assert_eq!(
            next_available_state(&ev, moment() + Duration::hours(3)),
            Some(AttendanceState::Finished)
        );
    }

    #[test]
    fn close_before_notify_scenario() {
        // close 10m before, notify 5m before: Closed comes first.
        let mut ev = event(AttendanceState::Listening, Some(10), Some(5));
        assert_eq!(next_available_state(&ev, mins_before(11)), None);
        assert_eq!(
            next_available_state(&ev, mins_before(10)),
            Some(AttendanceState::Closed)
        );

        ev.state = AttendanceState::Closed;
        assert_eq!(next_available_state(&ev, mins_before(6)), None);
        assert_eq!(
            next_available_state(&ev, mins_before(5)),
            Some(AttendanceState::Notified)
        );

        ev.state = AttendanceState::Notified;
        assert_eq!(next_available_state(&ev, mins_before(1)), None);
        assert_eq!(
            next_available_state(&ev, moment()),
            Some(AttendanceState::Finished)
        );
    }

    #[test]
    fn notify_before_close_scenario() {
        // notify 10m before, close 5m before: Notified comes first.
        let mut ev = event(AttendanceState::Listening, Some(5), Some(10));
        assert_eq!(
            next_available_state(&ev, mins_before(10)),
            Some(AttendanceState::Notified)
        );

        ev.state = AttendanceState::Notified;
        assert_eq!(
            next_available_state(&ev, mins_before(5)),
            Some(AttendanceState::Closed)
        );

        ev.state = AttendanceState::Closed;
        assert_eq!(
            next_available_state(&ev, moment()),
            Some(AttendanceState::Finished)
        );
    }

    #[test]
    fn equal_offsets_tie_favours_close_and_skips_notified() {
        let mut ev = event(AttendanceState::Listening, Some(10), Some(10));
        assert_eq!(
            next_available_state(&ev, mins_before(10)),
            Some(AttendanceState::Closed)
        );

        // From Closed the notify threshold ties, so the notify path is
        // unusable and the event goes straight to Finished at the moment.
        ev.state = AttendanceState::Closed;
        assert_eq!(next_available_state(&ev, mins_before(10)), None);
        assert_eq!(
            next_available_state(&ev, moment()),
            Some(AttendanceState::Finished)
        );
    }

    #[test]
    fn single_offset_targets_its_own_state() {
        let ev = event(AttendanceState::Listening, Some(15), None);
        assert_eq!(
            next_available_state(&ev, mins_before(15)),
            Some(AttendanceState::Closed)
        );

        let ev = event(AttendanceState::Listening, None, Some(15));
        assert_eq!(
            next_available_state(&ev, mins_before(15)),
            Some(AttendanceState::Notified)
        );
    }

    #[test]
    fn closed_without_role_skips_notify() {
        let mut ev = event(AttendanceState::Closed, Some(10), Some(5));
        ev.notify_role_id = None;
        assert_eq!(next_available_state(&ev, mins_before(5)), None);
        assert_eq!(
            next_available_state(&ev, moment()),
            Some(AttendanceState::Finished)
        );
    }

    #[test]
    fn terminal_states_never_transition() {
        let far = moment() + Duration::days(365);
        let ev = event(AttendanceState::Finished, Some(10), Some(5));
        assert_eq!(next_available_state(&ev, far), None);
        let ev = event(AttendanceState::Disabled, Some(10), Some(5));
        assert_eq!(next_available_state(&ev, far), None);
    }

    #[test]
    fn idempotent_for_a_fixed_now() {
        let ev = event(AttendanceState::Listening, Some(10), Some(5));
        let now = mins_before(10);
        assert_eq!(
            next_available_state(&ev, now),
            next_available_state(&ev, now)
        );
    }

    #[test]
    fn deadline_matches_transition_at_that_exact_instant() {
        // Whatever instant next_deadline reports, the transition must
        // actually be available at it — no off-by-one skips.
        for (close, notify) in [
            (Some(10), Some(5)),
            (Some(5), Some(10)),
            (Some(10), Some(10)),
            (Some(10), None),
            (None, Some(10)),
            (None, None),
        ] {
            let ev = event(AttendanceState::Listening, close, notify);
            let deadline = next_deadline(&ev).unwrap();
            assert!(
                next_available_state(&ev, deadline).is_some(),
                "no transition due at its own deadline for {close:?}/{notify:?}"
            );
            assert_eq!(
                next_available_state(&ev, deadline - Duration::seconds(1)),
                None,
                "transition already due before the deadline for {close:?}/{notify:?}"
            );
        }
    }

    #[test]
    fn cascade_terminates_in_finished() {
        // An event unattended long past its moment jumps through every
        // state in one pass.
        let mut ev = event(AttendanceState::Listening, Some(10), Some(5));
        let now = moment() + Duration::hours(1);
        let mut hops = Vec::new();
        while let Some(next) = next_available_state(&ev, now) {
            ev.state = next;
            ev.next_state_change = next_deadline(&ev).unwrap();
            hops.push(next);
        }
        assert_eq!(
            hops,
            vec![
                AttendanceState::Closed,
                AttendanceState::Notified,
                AttendanceState::Finished
            ]
        );
        // Cascade completeness: nothing left to apply at this instant.
        assert_eq!(next_available_state(&ev, now), None);
    }

    #[test]
    fn finished_deadline_honours_schedule_timeout() {
        let mut ev = event(AttendanceState::Finished, None, None);
        assert_eq!(next_deadline(&ev).unwrap(), moment());
        ev.schedule_timeout = Some(Duration::minutes(30));
        assert_eq!(next_deadline(&ev).unwrap(), moment() + Duration::minutes(30));
    }

    #[test]
    fn disabled_deadline_is_an_invariant_violation() {
        let ev = event(AttendanceState::Disabled, None, None);
        let err = next_deadline(&ev).unwrap_err();
        assert!(err.is_unrecoverable());
    }
}
