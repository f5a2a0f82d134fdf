use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::error::SchedulerError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Result<Self, SchedulerError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(SchedulerError::EmptyTaskId);
        }

        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReminderKind {
    Day,
    Hour,
}

impl ReminderKind {
    pub const ALL: [ReminderKind; 2] = [ReminderKind::Day, ReminderKind::Hour];

    pub fn suffix(&self) -> &'static str {
        match self {
            ReminderKind::Day => "day",
            ReminderKind::Hour => "hour",
        }
    }
}

impl fmt::Display for ReminderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Identifies one reminder slot of one task. Renders as `"{task_id}-{kind}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobKey {
    task_id: TaskId,
    kind: ReminderKind,
}

impl JobKey {
    pub fn new(task_id: TaskId, kind: ReminderKind) -> Self {
        Self { task_id, kind }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn kind(&self) -> ReminderKind {
        self.kind
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.task_id, self.kind)
    }
}

impl FromStr for JobKey {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || SchedulerError::MalformedJobKey(s.to_owned());
        let (task_id, suffix) = s.rsplit_once('-').ok_or_else(malformed)?;
        let kind = match suffix {
            "day" => ReminderKind::Day,
            "hour" => ReminderKind::Hour,
            _ => return Err(malformed()),
        };
        if task_id.trim() != task_id {
            return Err(malformed());
        }
        let task_id = TaskId::new(task_id).map_err(|_| malformed())?;

        Ok(Self::new(task_id, kind))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderPayload {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// What the task lifecycle hands over when a task is created or updated.
#[derive(Debug, Clone)]
pub struct TaskDeadline {
    pub task_id: String,
    pub due_date: DateTime<Utc>,
    pub recipient: String,
    pub title: String,
    pub owner_name: Option<String>,
}

impl TaskDeadline {
    pub fn new(
        task_id: impl Into<String>,
        due_date: DateTime<Utc>,
        recipient: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            due_date,
            recipient: recipient.into(),
            title: title.into(),
            owner_name: None,
        }
    }

    /// Same as [`TaskDeadline::new`] for a due date that still needs parsing.
    pub fn parse(
        task_id: impl Into<String>,
        due_date: &str,
        recipient: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<Self, SchedulerError> {
        Ok(Self::new(task_id, parse_due_date(due_date)?, recipient, title))
    }

    pub fn with_owner_name(mut self, owner_name: impl Into<String>) -> Self {
        self.owner_name = Some(owner_name.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledReminder {
    pub key: JobKey,
    pub fire_at: DateTime<Utc>,
}

/// Parses a due date the way task payloads usually carry one. Naive forms are taken as UTC.
pub fn parse_due_date(input: &str) -> Result<DateTime<Utc>, SchedulerError> {
    let input = input.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(input) {
        return Ok(parsed.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Ok(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| SchedulerError::InvalidDueDate(input.to_owned()))
}
