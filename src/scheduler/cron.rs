//! Cron-expression scheduling.
//!
//! The `cron` crate is the next-fire-time oracle; this module only turns
//! "next occurrence in the configured timezone" into a cancellable sleep.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;

use super::{Scheduler, StopSignal};
use crate::error::{RepeaterError, Result};

/// Configuration for [`CronScheduler`].
#[derive(Debug, Clone)]
pub struct CronConfig {
    /// Cron expression (the 6/7-field form the `cron` crate accepts,
    /// seconds first).
    pub expression: String,
    /// Named timezone (e.g. `Europe/Berlin`). Defaults to UTC.
    pub timezone: Option<String>,
}

/// Fires at each upcoming occurrence of a cron expression.
#[derive(Debug)]
pub struct CronScheduler {
    schedule: cron::Schedule,
    timezone: Tz,
    stop: StopSignal,
}

impl CronScheduler {
    pub fn new(config: CronConfig) -> Result<Self> {
        let schedule = cron::Schedule::from_str(&config.expression)
            .map_err(|e| RepeaterError::config("cron-expression", e.to_string()))?;
        let timezone = match &config.timezone {
            None => Tz::UTC,
            Some(name) => name
                .parse()
                .map_err(|_| RepeaterError::config("timezone", format!("unknown timezone '{name}'")))?,
        };
        Ok(CronScheduler {
            schedule,
            timezone,
            stop: StopSignal::new(),
        })
    }

    /// Wall-clock wait until the next occurrence, if the schedule has one.
    fn until_next(&self) -> Option<std::time::Duration> {
        let now = Utc::now().with_timezone(&self.timezone);
        let next = self.schedule.after(&now).next()?;
        (next - now).to_std().ok()
    }
}

#[async_trait]
impl Scheduler for CronScheduler {
    async fn next(&self) -> bool {
        if self.stop.is_stopped() {
            return false;
        }
        match self.until_next() {
            // A year-bounded expression can run out of occurrences.
            None => false,
            Some(wait) => self.stop.sleep(wait).await,
        }
    }

    fn stop(&self) {
        self.stop.stop();
    }

    fn name(&self) -> &'static str {
        "cron"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(expression: &str, timezone: Option<&str>) -> CronConfig {
        CronConfig {
            expression: expression.to_string(),
            timezone: timezone.map(String::from),
        }
    }

    #[test]
    fn test_valid_expression() {
        let scheduler = CronScheduler::new(config("0 * * * * *", None)).unwrap();
        // Every minute at second 0: the wait is always under a minute.
        let wait = scheduler.until_next().unwrap();
        assert!(wait <= std::time::Duration::from_secs(60));
    }

    #[test]
    fn test_bad_expression_is_config_error() {
        let err = CronScheduler::new(config("not a cron line", None)).unwrap_err();
        match err {
            RepeaterError::Config { field, .. } => assert_eq!(field, "cron-expression"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_named_timezone_accepted() {
        let scheduler = CronScheduler::new(config("0 0 12 * * *", Some("Europe/Berlin"))).unwrap();
        assert_eq!(scheduler.timezone, Tz::Europe__Berlin);
    }

    #[test]
    fn test_bad_timezone_is_config_error() {
        let err = CronScheduler::new(config("0 * * * * *", Some("Mars/OlympusMons"))).unwrap_err();
        match err {
            RepeaterError::Config { field, .. } => assert_eq!(field, "timezone"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stopped_scheduler_does_not_tick() {
        let scheduler = CronScheduler::new(config("0 * * * * *", None)).unwrap();
        scheduler.stop();
        assert!(!scheduler.next().await);
    }
}
