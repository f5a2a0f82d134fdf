use chrono::{DateTime, TimeDelta, Utc};

use crate::model::ReminderKind;

pub const ONE_DAY: TimeDelta = TimeDelta::days(1);
pub const ONE_HOUR: TimeDelta = TimeDelta::hours(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedReminder {
    pub kind: ReminderKind,
    pub fire_at: DateTime<Utc>,
}

/// Decides which reminders a task due at `due_date` gets when scheduled at `now`.
///
/// More than a day out: a day-before and an hour-before reminder. More than an hour
/// out: only the hour-before one. Otherwise a single last-chance reminder at the due
/// date itself, even if that is already in the past.
pub fn compute_reminders(due_date: DateTime<Utc>, now: DateTime<Utc>) -> Vec<PlannedReminder> {
    // Only subtracts `delta` when more than `delta` remains, so the result is never
    // earlier than `now` and cannot leave the representable range.
    let remaining = due_date - now;
    let mut planned = Vec::with_capacity(2);

    if remaining > ONE_DAY {
        planned.push(PlannedReminder {
            kind: ReminderKind::Day,
            fire_at: due_date - ONE_DAY,
        });
    }

    let hour_fire_at = if remaining > ONE_HOUR {
        due_date - ONE_HOUR
    } else {
        due_date
    };

    planned.push(PlannedReminder {
        kind: ReminderKind::Hour,
        fire_at: hour_fire_at,
    });

    planned
}
