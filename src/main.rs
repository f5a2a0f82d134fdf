use std::sync::Arc;

use deadline_reminders::{
    DeadlineScheduler, LogDispatcher, SystemClock, TaskDeadline, appsettings::AppSettings,
};
use tokio::io::{AsyncBufReadExt, BufReader};

const USAGE: &str = "commands: create|update <task_id> <due_date> <email> <title...> | delete <task_id> | jobs | quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    pretty_env_logger::init();

    let settings = AppSettings::load()?;
    log::info!("Starting deadline reminder scheduler. [settings = {:?}]", settings);

    let dispatcher = Arc::new(LogDispatcher::new(settings.mail.from.clone()));
    let scheduler =
        DeadlineScheduler::from_settings(dispatcher, Arc::new(SystemClock), &settings)?;

    println!("{USAGE}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_command(&scheduler, line.trim()).await {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    log::info!("Shutting down, pending reminders are dropped");
    scheduler.shutdown().await;

    Ok(())
}

async fn handle_command(scheduler: &DeadlineScheduler, line: &str) -> bool {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some(command @ ("create" | "update")) => {
            let (Some(task_id), Some(due_date), Some(email)) =
                (parts.next(), parts.next(), parts.next())
            else {
                println!("{USAGE}");
                return true;
            };
            let title = parts.collect::<Vec<_>>().join(" ");

            let task = match TaskDeadline::parse(task_id, due_date, email, title) {
                Ok(task) => task,
                Err(error) => {
                    println!("rejected: {error}");
                    return true;
                }
            };

            let result = if command == "create" {
                scheduler.on_task_created(&task).await
            } else {
                scheduler.on_task_updated(&task).await
            };

            match result {
                Ok(scheduled) => {
                    for reminder in scheduled {
                        println!("{} at {}", reminder.key, reminder.fire_at);
                    }
                }
                Err(error) => println!("rejected: {error}"),
            }
        }
        Some("delete") => match parts.next() {
            Some(task_id) => match scheduler.on_task_deleted(task_id).await {
                Ok(cancelled) => println!("cancelled {cancelled} reminder(s)"),
                Err(error) => println!("rejected: {error}"),
            },
            None => println!("{USAGE}"),
        },
        Some("jobs") => {
            for job in scheduler.jobs().await {
                println!("{} at {}", job.key, job.fire_at);
            }
        }
        Some("quit") => return false,
        Some(_) => println!("{USAGE}"),
        None => {}
    }

    true
}
