use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A `[[butler.schedule]]` table. Exactly one of `prompt` or
/// `job_name`+`job_args` must be present — enforced by
/// [`ScheduleDecl::validate`] rather than the TOML grammar, since TOML has
/// no native "exactly one of" construct.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleDecl {
    pub name: String,
    pub cron: String,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub job_name: Option<String>,
    #[serde(default)]
    pub job_args: Option<Value>,
    #[serde(default)]
    pub timezone: Option<String>,
    /// Timezone-aware boundaries only — `DateTime<Utc>`'s RFC3339 deserializer
    /// rejects a naive timestamp string outright, which is exactly the
    /// "naive timestamps reject at the API boundary" invariant from spec §4.C.
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub until_at: Option<DateTime<Utc>>,
}

impl ScheduleDecl {
    pub fn validate(&self) -> Result<(), String> {
        let has_prompt = self.prompt.as_deref().is_some_and(|p| !p.trim().is_empty());
        let has_job = self.job_name.as_deref().is_some_and(|j| !j.trim().is_empty());
        if has_prompt == has_job {
            return Err(format!(
                "schedule '{}' must set exactly one of prompt or job_name",
                self.name
            ));
        }
        Ok(())
    }
}
