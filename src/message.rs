use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::model::{ReminderPayload, TaskDeadline};

pub const DEFAULT_SIGNATURE: &str = "Task Manager Team";

/// Renders the reminder email for a task.
#[derive(Debug, Clone)]
pub struct MessageComposer {
    timezone: Tz,
    signature: String,
}

impl Default for MessageComposer {
    fn default() -> Self {
        Self::new(chrono_tz::Asia::Kolkata, DEFAULT_SIGNATURE)
    }
}

impl MessageComposer {
    pub fn new(timezone: Tz, signature: impl Into<String>) -> Self {
        Self {
            timezone,
            signature: signature.into(),
        }
    }

    pub fn compose(&self, task: &TaskDeadline) -> ReminderPayload {
        let name = task
            .owner_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(task.recipient.as_str());

        let subject = format!("Reminder: Task \"{}\" Deadline", task.title);
        let body = format!(
            "Dear {name},\n\nThis is a reminder that your task \"{}\" is due on {}.\n\nBest regards,\n{}",
            task.title,
            self.format_due_date(task.due_date),
            self.signature
        );

        ReminderPayload {
            recipient: task.recipient.clone(),
            subject,
            body,
        }
    }

    /// `31/05/2025, 5:30:00 pm` style, in the composer's timezone.
    pub fn format_due_date(&self, due_date: DateTime<Utc>) -> String {
        due_date
            .with_timezone(&self.timezone)
            .format("%d/%m/%Y, %-I:%M:%S %P")
            .to_string()
    }
}
