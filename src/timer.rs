use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;

/// Longest single sleep before the wall clock is consulted again.
const MAX_SLEEP: Duration = Duration::from_secs(60 * 60);

struct TimerSlot {
    live: AtomicBool,
    active: Arc<AtomicUsize>,
}

impl TimerSlot {
    /// Returns true for exactly one caller: whoever fires or cancels first.
    fn release(&self) -> bool {
        if self.live.swap(false, Ordering::AcqRel) {
            self.active.fetch_sub(1, Ordering::AcqRel);
            true
        } else {
            false
        }
    }
}

pub struct TimerHandle {
    fire_at: DateTime<Utc>,
    task_handle: JoinHandle<()>,
    cancellation_token: CancellationToken,
    slot: Arc<TimerSlot>,
}

impl TimerHandle {
    pub fn fire_at(&self) -> DateTime<Utc> {
        self.fire_at
    }

    /// Neither fired nor cancelled yet.
    pub fn is_live(&self) -> bool {
        self.slot.live.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.task_handle.is_finished()
    }

    /// Prevents a future firing. Calling it on a fired or cancelled timer does nothing.
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
        self.slot.release();
    }
}

/// Runs callbacks at absolute wall-clock instants on the tokio timer.
#[derive(Clone)]
pub struct TimerEngine {
    clock: Arc<dyn Clock>,
    active: Arc<AtomicUsize>,
}

impl TimerEngine {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn active_timers(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Spawns `on_fire` to run once `fire_at` is reached. A `fire_at` in the past fires
    /// right away.
    pub fn schedule_at<F>(&self, fire_at: DateTime<Utc>, on_fire: F) -> TimerHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cancellation_token = CancellationToken::new();
        let task_cancellation_token = cancellation_token.child_token();

        self.active.fetch_add(1, Ordering::AcqRel);
        let slot = Arc::new(TimerSlot {
            live: AtomicBool::new(true),
            active: Arc::clone(&self.active),
        });

        let task_slot = Arc::clone(&slot);
        let clock = Arc::clone(&self.clock);

        let task_handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = task_cancellation_token.cancelled() => {
                    log::debug!("Timer was cancelled before firing. [fire_at = {}]", fire_at);
                },
                _ = sleep_until(clock.as_ref(), fire_at) => {
                    if task_slot.release() {
                        on_fire.await;
                    }
                }
            }
        });

        TimerHandle {
            fire_at,
            task_handle,
            cancellation_token,
            slot,
        }
    }
}

async fn sleep_until(clock: &dyn Clock, fire_at: DateTime<Utc>) {
    loop {
        let remaining = (fire_at - clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);

        if remaining.is_zero() {
            return;
        }

        tokio::time::sleep(remaining.min(MAX_SLEEP)).await;
    }
}
