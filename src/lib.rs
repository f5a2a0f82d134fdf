pub mod appsettings;
pub mod clock;
pub mod dispatch;
pub mod error;
pub mod message;
pub mod model;
pub mod policy;
pub mod registry;
pub mod scheduler;
pub mod timer;

#[cfg(any(test, feature = "test-util"))]
pub mod test_utils;

pub use clock::{Clock, SystemClock};
pub use dispatch::{LogDispatcher, NotificationDispatcher};
pub use error::{DispatchError, SchedulerError};
pub use model::{JobKey, ReminderKind, ReminderPayload, ScheduledReminder, TaskDeadline, TaskId};
pub use scheduler::DeadlineScheduler;
