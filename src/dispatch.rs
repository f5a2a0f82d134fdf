use std::sync::Arc;

use async_trait::async_trait;
use tokio::{
    sync::mpsc,
    task::{self, JoinHandle},
};

use crate::{
    error::DispatchError,
    model::{JobKey, ReminderPayload},
};

/// Sends the actual notification. Implemented by the mail boundary of the host service.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync + 'static {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), DispatchError>;
}

#[derive(Debug)]
pub struct FiredJob {
    pub key: JobKey,
    pub payload: ReminderPayload,
}

pub type FiredJobSender = mpsc::UnboundedSender<FiredJob>;

/// Drains fired jobs and hands each one to the dispatcher on its own task.
pub struct DispatchWorker {
    task: JoinHandle<()>,
}

impl DispatchWorker {
    pub fn spawn(dispatcher: Arc<dyn NotificationDispatcher>) -> (Self, FiredJobSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = task::spawn(Self::handle_fired_jobs(dispatcher, rx));

        (Self { task }, tx)
    }

    pub fn stop(&self) {
        self.task.abort();
    }

    async fn handle_fired_jobs(
        dispatcher: Arc<dyn NotificationDispatcher>,
        mut rx: mpsc::UnboundedReceiver<FiredJob>,
    ) {
        while let Some(job) = rx.recv().await {
            let dispatcher = Arc::clone(&dispatcher);
            task::spawn(async move {
                deliver(dispatcher.as_ref(), job).await;
            });
        }

        log::info!("Dispatch queue closed, worker shutting down");
    }
}

impl Drop for DispatchWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn deliver(dispatcher: &dyn NotificationDispatcher, job: FiredJob) {
    let FiredJob { key, payload } = job;
    match dispatcher
        .send(&payload.recipient, &payload.subject, &payload.body)
        .await
    {
        Ok(()) => log::info!(
            "Reminder delivered. [key = {}, to = {}]",
            key,
            payload.recipient
        ),
        Err(error) => log::error!(
            "Reminder delivery failed, not retrying. [key = {}, to = {}, error = {}]",
            key,
            payload.recipient,
            error
        ),
    }
}

/// Writes reminders to the log instead of sending them anywhere.
pub struct LogDispatcher {
    from: String,
}

impl LogDispatcher {
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }
}

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), DispatchError> {
        log::info!(
            "Sending email. [from = {}, to = {}, subject = {:?}]\n{}",
            self.from,
            to,
            subject,
            body
        );
        Ok(())
    }
}
