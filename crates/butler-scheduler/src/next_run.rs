use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CronExprError {
    #[error("invalid cron expression '{expr}': {source}")]
    Parse {
        expr: String,
        #[source]
        source: cron::error::Error,
    },
    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),
}

/// Validates a cron expression without computing anything — used by
/// `schedule_create`/`schedule_update` to reject bad input before it
/// reaches the database.
pub fn validate_cron_expr(expr: &str) -> Result<(), CronExprError> {
    Schedule::from_str(expr)
        .map(|_| ())
        .map_err(|source| CronExprError::Parse {
            expr: expr.to_string(),
            source,
        })
}

/// Computes the first fire time strictly after `after`, in the given IANA
/// timezone (defaulting to UTC when `timezone` is `None`).
pub fn compute_next_run_at(
    cron_expr: &str,
    timezone: Option<&str>,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, CronExprError> {
    let schedule = Schedule::from_str(cron_expr).map_err(|source| CronExprError::Parse {
        expr: cron_expr.to_string(),
        source,
    })?;

    let next = match timezone {
        None | Some("UTC") | Some("utc") => schedule.after(&after).next(),
        Some(tz_name) => {
            let tz: Tz = tz_name
                .parse()
                .map_err(|_| CronExprError::UnknownTimezone(tz_name.to_string()))?;
            let after_local = after.with_timezone(&tz);
            schedule
                .after(&after_local)
                .next()
                .map(|dt| dt.with_timezone(&Utc))
        }
    };

    Ok(next)
}
