use std::{
    collections::HashMap,
    hash::{DefaultHasher, Hash, Hasher},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    dispatch::{FiredJob, FiredJobSender},
    error::SchedulerError,
    model::{JobKey, ReminderKind, ReminderPayload, ScheduledReminder, TaskId},
    timer::{TimerEngine, TimerHandle},
};

struct ReminderJob {
    key: JobKey,
    payload: ReminderPayload,
    generation: u64,
    handle: TimerHandle,
}

impl ReminderJob {
    fn scheduled(&self) -> ScheduledReminder {
        ScheduledReminder {
            key: self.key.clone(),
            fire_at: self.handle.fire_at(),
        }
    }
}

type Shard = RwLock<HashMap<JobKey, ReminderJob>>;

/// One reminder of a task, not yet bound to a timer.
#[derive(Debug, Clone)]
pub struct TaskJob {
    pub kind: ReminderKind,
    pub fire_at: DateTime<Utc>,
    pub payload: ReminderPayload,
}

/// Live reminder jobs keyed by [`JobKey`], at most one per key.
///
/// Keys are sharded by task id, so both reminders of a task live behind the same lock
/// and every per-task operation is serialized against the others for that task.
pub struct JobRegistry {
    shards: Arc<[Shard]>,
    timers: TimerEngine,
    fired_tx: FiredJobSender,
    next_generation: AtomicU64,
    closed: AtomicBool,
}

impl JobRegistry {
    pub fn new(timers: TimerEngine, fired_tx: FiredJobSender, shard_count: usize) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|_| RwLock::new(HashMap::new()))
            .collect();

        Self {
            shards,
            timers,
            fired_tx,
            next_generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Installs a job under `key`, cancelling whatever was registered there before.
    pub async fn register(
        &self,
        key: JobKey,
        fire_at: DateTime<Utc>,
        payload: ReminderPayload,
    ) -> Result<ScheduledReminder, SchedulerError> {
        validate_payload(&payload)?;

        let mut jobs = shard_for(&self.shards, key.task_id()).write().await;
        self.ensure_open()?;
        Ok(self.install(&mut jobs, key, fire_at, payload))
    }

    /// Registers every job of a task, overwriting the keys it touches.
    pub async fn register_task(
        &self,
        task_id: &TaskId,
        jobs: Vec<TaskJob>,
    ) -> Result<Vec<ScheduledReminder>, SchedulerError> {
        validate_jobs(&jobs)?;

        let mut registered = shard_for(&self.shards, task_id).write().await;
        self.ensure_open()?;

        Ok(self.install_task(&mut registered, task_id, jobs))
    }

    /// Cancels every reminder of a task, then registers `jobs` in its place.
    ///
    /// The cancellation happens even when `jobs` fail validation, so a rejected edit
    /// never leaves reminders for the previous due date behind.
    pub async fn replace_task(
        &self,
        task_id: &TaskId,
        jobs: Vec<TaskJob>,
    ) -> Result<Vec<ScheduledReminder>, SchedulerError> {
        let mut registered = shard_for(&self.shards, task_id).write().await;
        self.ensure_open()?;

        let cancelled = cancel_kinds(&mut registered, task_id);
        if let Err(error) = validate_jobs(&jobs) {
            log::warn!(
                "Dropped reminders of a task whose edit was rejected. [task_id = {}, cancelled = {}, error = {}]",
                task_id,
                cancelled,
                error
            );
            return Err(error);
        }

        Ok(self.install_task(&mut registered, task_id, jobs))
    }

    /// Returns false when nothing was registered under `key`.
    pub async fn cancel(&self, key: &JobKey) -> bool {
        let mut jobs = shard_for(&self.shards, key.task_id()).write().await;
        match jobs.remove(key) {
            Some(job) => {
                job.handle.cancel();
                log::info!("Cancelled reminder. [key = {}]", key);
                true
            }
            None => false,
        }
    }

    /// Cancels both reminders of a task, returning how many were live.
    pub async fn cancel_task(&self, task_id: &TaskId) -> usize {
        let mut jobs = shard_for(&self.shards, task_id).write().await;
        cancel_kinds(&mut jobs, task_id)
    }

    pub async fn get(&self, key: &JobKey) -> Option<ScheduledReminder> {
        let jobs = shard_for(&self.shards, key.task_id()).read().await;
        jobs.get(key).map(ReminderJob::scheduled)
    }

    /// Every live job ordered by fire time. Locks one shard at a time.
    pub async fn snapshot(&self) -> Vec<ScheduledReminder> {
        let mut all = Vec::new();
        for shard in self.shards.iter() {
            let jobs = shard.read().await;
            all.extend(jobs.values().map(ReminderJob::scheduled));
        }

        all.sort_by(|a, b| a.fire_at.cmp(&b.fire_at).then_with(|| a.key.cmp(&b.key)));
        all
    }

    pub async fn len(&self) -> usize {
        let mut len = 0;
        for shard in self.shards.iter() {
            len += shard.read().await.len();
        }
        len
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn active_timers(&self) -> usize {
        self.timers.active_timers()
    }

    /// Cancels and forgets every job. Later registrations fail with `ShuttingDown`.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);

        let mut cancelled = 0;
        for shard in self.shards.iter() {
            let mut jobs = shard.write().await;
            for (_, job) in jobs.drain() {
                job.handle.cancel();
                cancelled += 1;
            }
        }

        log::info!("Job registry shut down. [cancelled = {}]", cancelled);
    }

    fn ensure_open(&self) -> Result<(), SchedulerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SchedulerError::ShuttingDown);
        }

        Ok(())
    }

    fn install_task(
        &self,
        registered: &mut HashMap<JobKey, ReminderJob>,
        task_id: &TaskId,
        jobs: Vec<TaskJob>,
    ) -> Vec<ScheduledReminder> {
        jobs.into_iter()
            .map(|job| {
                let key = JobKey::new(task_id.clone(), job.kind);
                self.install(registered, key, job.fire_at, job.payload)
            })
            .collect()
    }

    fn install(
        &self,
        jobs: &mut HashMap<JobKey, ReminderJob>,
        key: JobKey,
        fire_at: DateTime<Utc>,
        payload: ReminderPayload,
    ) -> ScheduledReminder {
        if let Some(previous) = jobs.remove(&key) {
            previous.handle.cancel();
            log::info!(
                "Replacing reminder. [key = {}, old_fire_at = {}, new_fire_at = {}]",
                key,
                previous.handle.fire_at(),
                fire_at
            );
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let handle = self.timers.schedule_at(
            fire_at,
            fire(
                Arc::clone(&self.shards),
                key.clone(),
                generation,
                self.fired_tx.clone(),
            ),
        );

        log::info!("Scheduled reminder. [key = {}, fire_at = {}]", key, fire_at);

        let job = ReminderJob {
            key: key.clone(),
            payload,
            generation,
            handle,
        };
        let scheduled = job.scheduled();
        jobs.insert(key, job);

        scheduled
    }
}

impl Drop for JobRegistry {
    fn drop(&mut self) {
        for shard in self.shards.iter() {
            if let Ok(mut jobs) = shard.try_write() {
                for (_, job) in jobs.drain() {
                    job.handle.cancel();
                }
            }
        }
    }
}

fn validate_payload(payload: &ReminderPayload) -> Result<(), SchedulerError> {
    if payload.recipient.trim().is_empty() {
        return Err(SchedulerError::MissingRecipient);
    }

    Ok(())
}

fn validate_jobs(jobs: &[TaskJob]) -> Result<(), SchedulerError> {
    jobs.iter().try_for_each(|job| validate_payload(&job.payload))
}

fn cancel_kinds(jobs: &mut HashMap<JobKey, ReminderJob>, task_id: &TaskId) -> usize {
    let mut cancelled = 0;
    for kind in ReminderKind::ALL {
        let key = JobKey::new(task_id.clone(), kind);
        if let Some(job) = jobs.remove(&key) {
            job.handle.cancel();
            log::info!("Cancelled reminder. [key = {}]", key);
            cancelled += 1;
        }
    }

    cancelled
}

fn shard_for<'a>(shards: &'a [Shard], task_id: &TaskId) -> &'a Shard {
    let mut hasher = DefaultHasher::new();
    task_id.hash(&mut hasher);
    let index = (hasher.finish() % shards.len() as u64) as usize;

    &shards[index]
}

/// Timer callback: consumes the job if it is still the one the timer was armed for.
async fn fire(shards: Arc<[Shard]>, key: JobKey, generation: u64, fired_tx: FiredJobSender) {
    let job = {
        let mut jobs = shard_for(&shards, key.task_id()).write().await;
        let is_current = jobs
            .get(&key)
            .is_some_and(|job| job.generation == generation);

        if is_current { jobs.remove(&key) } else { None }
    };

    let Some(job) = job else {
        log::debug!(
            "Timer woke up for a replaced or cancelled reminder. [key = {}]",
            key
        );
        return;
    };

    log::info!(
        "Reminder fired. [key = {}, fire_at = {}]",
        key,
        job.handle.fire_at()
    );

    let fired = FiredJob {
        key,
        payload: job.payload,
    };

    if let Err(error) = fired_tx.send(fired) {
        log::warn!(
            "Dispatch queue is closed, dropping reminder. [key = {}]",
            error.0.key
        );
    }
}
