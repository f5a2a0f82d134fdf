use anyhow::Context;
use chrono_tz::Tz;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::message::{DEFAULT_SIGNATURE, MessageComposer};

#[derive(Deserialize, Debug, Clone)]
pub struct SchedulerSettings {
    pub timezone: String,
    pub shards: usize,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MailSettings {
    pub from: String,
    pub signature: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct AppSettings {
    pub scheduler: SchedulerSettings,
    pub mail: MailSettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            scheduler: SchedulerSettings {
                timezone: "Asia/Kolkata".to_owned(),
                shards: 16,
            },
            mail: MailSettings {
                from: "reminders@localhost".to_owned(),
                signature: DEFAULT_SIGNATURE.to_owned(),
            },
        }
    }
}

impl AppSettings {
    /// Defaults, then `appsettings` and `appsettings.local` files, then `APP__*` variables.
    pub fn load() -> anyhow::Result<Self> {
        let settings = Self::builder()
            .add_source(File::with_name("appsettings").required(false))
            .add_source(File::with_name("appsettings.local").required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()
            .and_then(Config::try_deserialize::<AppSettings>)
            .context("Could not load application settings")?;

        settings.timezone()?;
        Ok(settings)
    }

    fn builder() -> config::ConfigBuilder<config::builder::DefaultState> {
        let defaults = Self::default();
        Config::builder()
            .set_default("scheduler.timezone", defaults.scheduler.timezone)
            .and_then(|b| b.set_default("scheduler.shards", defaults.scheduler.shards as u64))
            .and_then(|b| b.set_default("mail.from", defaults.mail.from))
            .and_then(|b| b.set_default("mail.signature", defaults.mail.signature))
            .unwrap_or_else(|error: ConfigError| {
                log::warn!("Could not register setting defaults: {error}");
                Config::builder()
            })
    }

    pub fn timezone(&self) -> anyhow::Result<Tz> {
        self.scheduler
            .timezone
            .parse::<Tz>()
            .map_err(|error| anyhow::anyhow!("Unknown timezone {:?}: {error}", self.scheduler.timezone))
    }

    pub fn message_composer(&self) -> anyhow::Result<MessageComposer> {
        Ok(MessageComposer::new(
            self.timezone()?,
            self.mail.signature.clone(),
        ))
    }
}
