use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    appsettings::AppSettings,
    clock::Clock,
    dispatch::{DispatchWorker, NotificationDispatcher},
    error::SchedulerError,
    message::MessageComposer,
    model::{JobKey, ReminderPayload, ScheduledReminder, TaskDeadline, TaskId},
    policy::compute_reminders,
    registry::{JobRegistry, TaskJob},
    timer::TimerEngine,
};

const DEFAULT_SHARDS: usize = 16;

/// Keeps the deadline reminders of every task in line with its latest due date.
///
/// The task lifecycle calls `on_task_created`, `on_task_updated` and `on_task_deleted`.
/// A rejected call returns the reason, so the caller can decide whether the end user
/// should hear about it. Only a rejected update changes anything: the task's previous
/// reminders are dropped all the same.
pub struct DeadlineScheduler {
    clock: Arc<dyn Clock>,
    composer: MessageComposer,
    registry: JobRegistry,
    dispatch_worker: DispatchWorker,
}

impl DeadlineScheduler {
    pub fn new(dispatcher: Arc<dyn NotificationDispatcher>, clock: Arc<dyn Clock>) -> Self {
        Self::with_parts(dispatcher, clock, MessageComposer::default(), DEFAULT_SHARDS)
    }

    pub fn from_settings(
        dispatcher: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        settings: &AppSettings,
    ) -> anyhow::Result<Self> {
        Ok(Self::with_parts(
            dispatcher,
            clock,
            settings.message_composer()?,
            settings.scheduler.shards,
        ))
    }

    pub fn with_parts(
        dispatcher: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        composer: MessageComposer,
        shards: usize,
    ) -> Self {
        let (dispatch_worker, fired_tx) = DispatchWorker::spawn(dispatcher);
        let timers = TimerEngine::new(Arc::clone(&clock));
        let registry = JobRegistry::new(timers, fired_tx, shards);

        Self {
            clock,
            composer,
            registry,
            dispatch_worker,
        }
    }

    pub async fn on_task_created(
        &self,
        task: &TaskDeadline,
    ) -> Result<Vec<ScheduledReminder>, SchedulerError> {
        let result = match TaskId::new(task.task_id.as_str()) {
            Ok(task_id) => {
                let jobs = self.plan(&task_id, task);
                self.registry.register_task(&task_id, jobs).await
            }
            Err(error) => Err(error),
        };

        result.inspect_err(|error| log_rejected("create", &task.task_id, error))
    }

    /// Drops both reminders of the task before planning again, so nothing keeps
    /// firing for the previous due date. That holds for a rejected update too.
    pub async fn on_task_updated(
        &self,
        task: &TaskDeadline,
    ) -> Result<Vec<ScheduledReminder>, SchedulerError> {
        let result = match TaskId::new(task.task_id.as_str()) {
            Ok(task_id) => {
                let jobs = self.plan(&task_id, task);
                self.registry.replace_task(&task_id, jobs).await
            }
            Err(error) => Err(error),
        };

        result.inspect_err(|error| log_rejected("update", &task.task_id, error))
    }

    /// Returns how many reminders were still pending.
    pub async fn on_task_deleted(&self, task_id: &str) -> Result<usize, SchedulerError> {
        let task_id =
            TaskId::new(task_id).inspect_err(|error| log_rejected("delete", task_id, error))?;

        Ok(self.registry.cancel_task(&task_id).await)
    }

    pub async fn schedule_job(
        &self,
        key: &str,
        fire_at: DateTime<Utc>,
        payload: ReminderPayload,
    ) -> Result<ScheduledReminder, SchedulerError> {
        let result = match key.parse::<JobKey>() {
            Ok(key) => self.registry.register(key, fire_at, payload).await,
            Err(error) => Err(error),
        };

        result.inspect_err(|error| log_rejected("schedule", key, error))
    }

    /// Unknown keys are not an error; the result says whether anything was cancelled.
    pub async fn cancel_job(&self, key: &str) -> Result<bool, SchedulerError> {
        let key = key
            .parse::<JobKey>()
            .inspect_err(|error| log_rejected("cancel", key, error))?;

        Ok(self.registry.cancel(&key).await)
    }

    pub async fn job(&self, key: &str) -> Option<ScheduledReminder> {
        let key = key.parse::<JobKey>().ok()?;
        self.registry.get(&key).await
    }

    pub async fn jobs(&self) -> Vec<ScheduledReminder> {
        self.registry.snapshot().await
    }

    pub fn active_timers(&self) -> usize {
        self.registry.active_timers()
    }

    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
        self.dispatch_worker.stop();
    }

    fn plan(&self, task_id: &TaskId, task: &TaskDeadline) -> Vec<TaskJob> {
        let now = self.clock.now();
        let planned = compute_reminders(task.due_date, now);

        if task.due_date <= now {
            log::warn!(
                "Task is already overdue, reminding right away. [task_id = {}, due_date = {}]",
                task_id,
                task.due_date
            );
        }

        let payload = self.composer.compose(task);
        planned
            .into_iter()
            .map(|planned| TaskJob {
                kind: planned.kind,
                fire_at: planned.fire_at,
                payload: payload.clone(),
            })
            .collect()
    }
}

fn log_rejected(operation: &str, subject: &str, error: &SchedulerError) {
    log::warn!(
        "Reminder {} request rejected. [subject = {:?}, error = {}]",
        operation,
        subject,
        error
    );
}

#[cfg(test)]
mod tests;
