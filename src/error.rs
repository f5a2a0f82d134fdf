use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Task id must not be empty")]
    EmptyTaskId,

    #[error("Malformed job key {0:?}, expected \"{{task_id}}-day\" or \"{{task_id}}-hour\"")]
    MalformedJobKey(String),

    #[error("Unparseable due date {0:?}")]
    InvalidDueDate(String),

    #[error("Reminder recipient must not be empty")]
    MissingRecipient,

    #[error("Scheduler is shutting down")]
    ShuttingDown,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Delivery to {to} failed: {reason}")]
    Delivery { to: String, reason: String },
}
