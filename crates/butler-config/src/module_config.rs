use serde::de::DeserializeOwned;
use thiserror::Error;

/// Module config is malformed in a way that keeps the module out of the
/// active set (spec §4.N: unknown fields, missing required fields, and
/// type mismatches are all non-fatal to the daemon as a whole — only to the
/// module that owns the bad table).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("module '{module}' config: {source}")]
    Invalid {
        module: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Deserialize a module's `[modules.<name>]` table into its own config type.
///
/// `deny_unknown_fields` must be set on `T` by the module author; this
/// function does not add it for them, matching the teacher's
/// `mqk-config::consumption` pattern of trusting each consumer's own
/// `#[serde(deny_unknown_fields)]` rather than re-deriving a schema here.
pub fn validate_module_config<T: DeserializeOwned>(
    module: &str,
    raw: &toml::Value,
) -> Result<T, ConfigError> {
    raw.clone()
        .try_into()
        .map_err(|source| ConfigError::Invalid {
            module: module.to_string(),
            source,
        })
}
