use std::{
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use tokio::time::Instant;

use crate::{clock::Clock, dispatch::NotificationDispatcher, error::DispatchError};

/// Wall clock that advances together with tokio's (possibly paused) time.
pub struct PausedClock {
    origin: DateTime<Utc>,
    started: Instant,
}

impl PausedClock {
    pub fn starting_at(origin: DateTime<Utc>) -> Self {
        Self {
            origin,
            started: Instant::now(),
        }
    }
}

impl Default for PausedClock {
    fn default() -> Self {
        let origin = Utc
            .with_ymd_and_hms(2025, 5, 31, 12, 0, 0)
            .single()
            .unwrap_or_default();
        Self::starting_at(origin)
    }
}

impl Clock for PausedClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = TimeDelta::from_std(Instant::now() - self.started).unwrap_or_default();
        self.origin + elapsed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub sent_at: Instant,
}

#[derive(Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<SentMessage>>,
    attempts: AtomicUsize,
    latency: Option<Duration>,
    fail: bool,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Acquire)
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), DispatchError> {
        self.attempts.fetch_add(1, Ordering::AcqRel);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if self.fail {
            return Err(DispatchError::Delivery {
                to: to.to_owned(),
                reason: "mailbox unavailable".to_owned(),
            });
        }

        if let Ok(mut sent) = self.sent.lock() {
            sent.push(SentMessage {
                to: to.to_owned(),
                subject: subject.to_owned(),
                body: body.to_owned(),
                sent_at: Instant::now(),
            });
        }

        Ok(())
    }
}
