use std::time::Duration;

use chrono::TimeDelta;
use proptest::prelude::*;
use test_strategy::proptest;

use crate::{
    model::ReminderKind,
    policy::{ONE_DAY, ONE_HOUR},
    test_utils::{PausedClock, RecordingDispatcher},
};

use super::*;

struct TestContext {
    clock: Arc<PausedClock>,
    dispatcher: Arc<RecordingDispatcher>,
    scheduler: DeadlineScheduler,
}

impl TestContext {
    fn new() -> Self {
        let clock = Arc::new(PausedClock::default());
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let scheduler = DeadlineScheduler::new(dispatcher.clone(), clock.clone());

        Self {
            clock,
            dispatcher,
            scheduler,
        }
    }

    fn due_in(&self, delta: TimeDelta) -> DateTime<Utc> {
        self.clock.now() + delta
    }

    fn task(&self, id: &str, delta: TimeDelta) -> TaskDeadline {
        TaskDeadline::new(id, self.due_in(delta), "owner@example.com", "Quarterly report")
    }

    async fn fire_time(&self, key: &str) -> Option<DateTime<Utc>> {
        self.scheduler.job(key).await.map(|job| job.fire_at)
    }
}

fn tokio_ct(future: impl Future<Output = Result<(), TestCaseError>>) -> Result<(), TestCaseError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
        .block_on(future)
}

async fn wait(delta: TimeDelta) {
    tokio::time::sleep(delta.to_std().unwrap() + Duration::from_secs(1)).await;
}

fn assert_within_a_second(actual: Duration, expected: Duration) {
    assert!(
        actual >= expected && actual < expected + Duration::from_secs(1),
        "actual = {actual:?}, expected = {expected:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn task_due_in_two_days_gets_day_and_hour_reminders() {
    let ctx = TestContext::new();
    let task = ctx.task("t1", TimeDelta::days(2));

    let scheduled = ctx.scheduler.on_task_created(&task).await.unwrap();

    assert_eq!(scheduled.len(), 2);
    assert_eq!(ctx.fire_time("t1-day").await, Some(task.due_date - ONE_DAY));
    assert_eq!(ctx.fire_time("t1-hour").await, Some(task.due_date - ONE_HOUR));
    assert_eq!(ctx.scheduler.active_timers(), 2);
}

#[tokio::test(start_paused = true)]
async fn task_due_within_a_day_gets_only_hour_reminder() {
    let ctx = TestContext::new();
    let task = ctx.task("t1", TimeDelta::hours(5));

    ctx.scheduler.on_task_created(&task).await.unwrap();

    assert_eq!(ctx.fire_time("t1-day").await, None);
    assert_eq!(ctx.fire_time("t1-hour").await, Some(task.due_date - ONE_HOUR));
}

#[tokio::test(start_paused = true)]
async fn task_due_within_an_hour_is_reminded_at_due_date() {
    let ctx = TestContext::new();
    let task = ctx.task("t1", TimeDelta::minutes(20));

    ctx.scheduler.on_task_created(&task).await.unwrap();

    assert_eq!(ctx.scheduler.jobs().await.len(), 1);
    assert_eq!(ctx.fire_time("t1-hour").await, Some(task.due_date));
}

#[tokio::test(start_paused = true)]
async fn both_reminders_are_delivered_at_their_fire_times() {
    let ctx = TestContext::new();
    let started = tokio::time::Instant::now();
    let task = ctx.task("t1", TimeDelta::days(2)).with_owner_name("Asha");

    ctx.scheduler.on_task_created(&task).await.unwrap();

    wait(TimeDelta::days(1)).await;
    assert_eq!(ctx.dispatcher.sent().len(), 1);

    wait(TimeDelta::hours(23)).await;
    let sent = ctx.dispatcher.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].to, "owner@example.com");
    assert_eq!(sent[0].subject, "Reminder: Task \"Quarterly report\" Deadline");
    assert!(sent[0].body.starts_with("Dear Asha,"));
    assert_within_a_second(sent[0].sent_at - started, Duration::from_secs(24 * 3600));
    assert_within_a_second(sent[1].sent_at - started, Duration::from_secs(47 * 3600));

    assert!(ctx.scheduler.jobs().await.is_empty());
    assert_eq!(ctx.scheduler.active_timers(), 0);
}

#[tokio::test(start_paused = true)]
async fn updating_twice_with_same_due_date_is_idempotent() {
    let ctx = TestContext::new();
    let task = ctx.task("t1", TimeDelta::days(3));

    ctx.scheduler.on_task_created(&task).await.unwrap();
    let first = ctx.scheduler.on_task_updated(&task).await.unwrap();
    let second = ctx.scheduler.on_task_updated(&task).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(ctx.scheduler.jobs().await.len(), 2);
    assert_eq!(ctx.scheduler.active_timers(), 2);

    wait(TimeDelta::days(3)).await;
    assert_eq!(ctx.dispatcher.sent().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn reschedule_to_thirty_minutes_drops_day_reminder() {
    let ctx = TestContext::new();
    ctx.scheduler
        .on_task_created(&ctx.task("t1", TimeDelta::days(2)))
        .await
        .unwrap();

    let updated = ctx.task("t1", TimeDelta::minutes(30));
    ctx.scheduler.on_task_updated(&updated).await.unwrap();

    assert_eq!(
        ctx.scheduler.jobs().await,
        vec![ScheduledReminder {
            key: "t1-hour".parse().unwrap(),
            fire_at: updated.due_date
        }]
    );

    wait(TimeDelta::days(2)).await;
    assert_eq!(ctx.dispatcher.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn deleted_task_is_never_reminded() {
    let ctx = TestContext::new();
    ctx.scheduler
        .on_task_created(&ctx.task("t1", TimeDelta::days(2)))
        .await
        .unwrap();

    let cancelled = ctx.scheduler.on_task_deleted("t1").await.unwrap();

    assert_eq!(cancelled, 2);
    assert_eq!(ctx.fire_time("t1-day").await, None);
    assert_eq!(ctx.fire_time("t1-hour").await, None);

    wait(TimeDelta::days(3)).await;
    assert!(ctx.dispatcher.sent().is_empty());
    assert_eq!(ctx.dispatcher.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn deleting_unknown_task_is_not_an_error() {
    let ctx = TestContext::new();

    assert_eq!(ctx.scheduler.on_task_deleted("nope").await, Ok(0));
}

#[tokio::test(start_paused = true)]
async fn overdue_task_is_reminded_immediately_once() {
    let ctx = TestContext::new();
    let task = ctx.task("late", TimeDelta::hours(-4));

    let scheduled = ctx.scheduler.on_task_created(&task).await.unwrap();
    assert_eq!(scheduled[0].fire_at, task.due_date);

    wait(TimeDelta::seconds(1)).await;
    assert_eq!(ctx.dispatcher.sent().len(), 1);

    wait(TimeDelta::days(1)).await;
    assert_eq!(ctx.dispatcher.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn invalid_requests_are_rejected_without_side_effects() {
    let ctx = TestContext::new();
    ctx.scheduler
        .on_task_created(&ctx.task("t1", TimeDelta::days(2)))
        .await
        .unwrap();
    let before = ctx.scheduler.jobs().await;

    let blank_id = ctx.task("   ", TimeDelta::days(1));
    assert_eq!(
        ctx.scheduler.on_task_created(&blank_id).await,
        Err(SchedulerError::EmptyTaskId)
    );

    let mut no_recipient = ctx.task("t1", TimeDelta::hours(2));
    no_recipient.recipient = String::new();
    assert_eq!(
        ctx.scheduler.on_task_created(&no_recipient).await,
        Err(SchedulerError::MissingRecipient)
    );

    assert!(matches!(
        ctx.scheduler.cancel_job("t1").await,
        Err(SchedulerError::MalformedJobKey(_))
    ));
    assert!(matches!(
        TaskDeadline::parse("t1", "next tuesday", "owner@example.com", "x"),
        Err(SchedulerError::InvalidDueDate(_))
    ));

    assert_eq!(ctx.scheduler.jobs().await, before);
}

#[tokio::test(start_paused = true)]
async fn rejected_update_still_drops_reminders_for_previous_due_date() {
    let ctx = TestContext::new();
    ctx.scheduler
        .on_task_created(&ctx.task("t1", TimeDelta::days(2)))
        .await
        .unwrap();

    let mut no_recipient = ctx.task("t1", TimeDelta::days(10));
    no_recipient.recipient = String::new();
    assert_eq!(
        ctx.scheduler.on_task_updated(&no_recipient).await,
        Err(SchedulerError::MissingRecipient)
    );

    assert_eq!(ctx.fire_time("t1-day").await, None);
    assert_eq!(ctx.fire_time("t1-hour").await, None);
    assert_eq!(ctx.scheduler.active_timers(), 0);

    wait(TimeDelta::days(11)).await;
    assert_eq!(ctx.dispatcher.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn raw_job_api_schedules_and_cancels_by_key() {
    let ctx = TestContext::new();
    let payload = ReminderPayload {
        recipient: "owner@example.com".to_owned(),
        subject: "s".to_owned(),
        body: "b".to_owned(),
    };

    ctx.scheduler
        .schedule_job("abc-day", ctx.due_in(TimeDelta::hours(1)), payload.clone())
        .await
        .unwrap();
    ctx.scheduler
        .schedule_job("abc-day", ctx.due_in(TimeDelta::hours(2)), payload.clone())
        .await
        .unwrap();

    assert_eq!(ctx.scheduler.jobs().await.len(), 1);
    assert!(matches!(
        ctx.scheduler
            .schedule_job("abc -day", ctx.due_in(TimeDelta::hours(3)), payload.clone())
            .await,
        Err(SchedulerError::MalformedJobKey(_))
    ));
    assert_eq!(ctx.fire_time("abc-day").await, Some(ctx.due_in(TimeDelta::hours(2))));
    assert_eq!(ctx.scheduler.cancel_job("abc-day").await, Ok(true));
    assert_eq!(ctx.scheduler.cancel_job("abc-day").await, Ok(false));

    wait(TimeDelta::hours(2)).await;
    assert!(ctx.dispatcher.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_delivery_consumes_the_job() {
    let clock = Arc::new(PausedClock::default());
    let dispatcher = Arc::new(RecordingDispatcher::failing());
    let scheduler = DeadlineScheduler::new(dispatcher.clone(), clock.clone());
    let task = TaskDeadline::new(
        "t1",
        clock.now() + TimeDelta::minutes(5),
        "owner@example.com",
        "x",
    );

    scheduler.on_task_created(&task).await.unwrap();
    wait(TimeDelta::days(1)).await;

    assert_eq!(dispatcher.attempts(), 1);
    assert!(scheduler.jobs().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_pending_reminders() {
    let ctx = TestContext::new();
    ctx.scheduler
        .on_task_created(&ctx.task("t1", TimeDelta::days(2)))
        .await
        .unwrap();

    ctx.scheduler.shutdown().await;

    assert!(ctx.scheduler.jobs().await.is_empty());
    assert_eq!(ctx.scheduler.active_timers(), 0);
    wait(TimeDelta::days(2)).await;
    assert_eq!(ctx.dispatcher.attempts(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_updates_leave_one_consistent_winner() {
    let clock = Arc::new(PausedClock::default());
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let scheduler = Arc::new(DeadlineScheduler::new(dispatcher, clock.clone()));
    let origin = clock.now();

    let updates = (0..32i64).map(|i| {
        let scheduler = Arc::clone(&scheduler);
        let task = TaskDeadline::new(
            "shared",
            origin + TimeDelta::days(2 + i),
            "owner@example.com",
            "x",
        );
        tokio::spawn(async move { scheduler.on_task_updated(&task).await })
    });

    for update in updates.collect::<Vec<_>>() {
        update.await.unwrap().unwrap();
    }

    let jobs = scheduler.jobs().await;
    assert_eq!(jobs.len(), 2);
    assert_eq!(scheduler.active_timers(), 2);

    let day = jobs.iter().find(|j| j.key.kind() == ReminderKind::Day).unwrap();
    let hour = jobs.iter().find(|j| j.key.kind() == ReminderKind::Hour).unwrap();
    assert_eq!(
        day.fire_at + ONE_DAY,
        hour.fire_at + ONE_HOUR,
        "Both reminders must come from the same update"
    );
}

#[proptest(async = tokio_ct)]
async fn registered_reminders_follow_remaining_time(
    #[strategy(1i64..5 * 86_400i64)] remaining_secs: i64,
) {
    let ctx = TestContext::new();
    let remaining = TimeDelta::seconds(remaining_secs);
    let task = ctx.task("p1", remaining);

    ctx.scheduler.on_task_created(&task).await.unwrap();

    let day = ctx.fire_time("p1-day").await;
    let hour = ctx.fire_time("p1-hour").await;

    if remaining > ONE_DAY {
        prop_assert_eq!(day, Some(task.due_date - ONE_DAY));
    } else {
        prop_assert_eq!(day, None);
    }

    if remaining > ONE_HOUR {
        prop_assert_eq!(hour, Some(task.due_date - ONE_HOUR));
    } else {
        prop_assert_eq!(hour, Some(task.due_date));
    }
}

#[proptest(async = tokio_ct)]
async fn deleted_reminders_never_fire(#[strategy(60i64..3 * 86_400i64)] remaining_secs: i64) {
    let ctx = TestContext::new();
    let task = ctx.task("p1", TimeDelta::seconds(remaining_secs));

    ctx.scheduler.on_task_created(&task).await.unwrap();
    ctx.scheduler.on_task_deleted("p1").await.unwrap();

    wait(TimeDelta::seconds(remaining_secs)).await;

    prop_assert_eq!(ctx.dispatcher.attempts(), 0);
    prop_assert!(ctx.scheduler.jobs().await.is_empty());
}
