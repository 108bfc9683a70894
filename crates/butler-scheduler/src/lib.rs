//! Cron scheduling: TOML-to-DB sync, due-row tick dispatch, and CRUD with
//! cron validation (§4.C).

pub mod crud;
pub mod next_run;
pub mod sync;
pub mod tick;

pub use crud::{schedule_create, schedule_delete, schedule_set_enabled, schedule_update_cron, SchedulerError};
pub use next_run::{compute_next_run_at, validate_cron_expr, CronExprError};
pub use sync::sync_toml_schedules;
pub use tick::{tick, DispatchRequest};
