//! butler-config
//!
//! Loads and validates a single butler daemon's `butler.toml`: the
//! `[butler]` identity block, optional `[butler.db]` / `[butler.shutdown]`
//! overrides, zero or more `[[butler.schedule]]` declarations, and the
//! `[modules.<name>]` config tables each module validates independently.
//!
//! Layered-load-then-canonicalize-then-hash is kept from the teacher's YAML
//! loader (`load_layered_yaml`), adapted from YAML to TOML since spec §6
//! requires a TOML config file.

mod module_config;
mod schedule;
mod secrets;

pub use module_config::{validate_module_config, ConfigError};
pub use schedule::ScheduleDecl;
pub use secrets::{CredentialStore, EnvCredentialStore};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// `[butler.db]`.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct DbSection {
    pub name: Option<String>,
}

/// `[butler.shutdown]`. Default timeout matches spec §4.L.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShutdownSection {
    #[serde(default = "default_shutdown_timeout_s")]
    pub timeout_s: u64,
}

fn default_shutdown_timeout_s() -> u64 {
    30
}

impl Default for ShutdownSection {
    fn default() -> Self {
        Self {
            timeout_s: default_shutdown_timeout_s(),
        }
    }
}

/// `[butler]`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ButlerSection {
    pub name: String,
    pub port: u16,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub db: DbSection,
    #[serde(default)]
    pub shutdown: ShutdownSection,
    #[serde(default, rename = "schedule")]
    pub schedules: Vec<ScheduleDecl>,
}

/// The parsed `butler.toml`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ButlerToml {
    pub butler: ButlerSection,
    /// `[modules.<name>]` tables, kept as raw TOML values so each module can
    /// validate its own schema (spec §4.N). A module with no declared
    /// schema receives this value unchanged — the "backward compatibility"
    /// case spec §4.N calls out.
    #[serde(default)]
    pub modules: BTreeMap<String, toml::Value>,
}

impl ButlerToml {
    pub fn is_switchboard(&self) -> bool {
        self.butler.name == "switchboard"
    }

    pub fn is_messenger(&self) -> bool {
        self.butler.name == "messenger"
    }
}

/// Load and parse a single `butler.toml` file.
pub fn load_butler_toml(path: impl AsRef<Path>) -> Result<ButlerToml> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let parsed: ButlerToml =
        toml::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    Ok(parsed)
}

/// Canonical, content-addressed view of a loaded config: stable key order
/// and a sha256 hash over the canonical bytes, so two daemons (or a daemon
/// across a restart) can cheaply confirm they are running the same config.
#[derive(Debug, Clone)]
pub struct CanonicalConfig {
    pub config_json: Value,
    pub canonical_json: String,
    pub config_hash: String,
}

pub fn canonicalize(config: &ButlerToml) -> Result<CanonicalConfig> {
    let as_json = serde_json::to_value(config).context("butler.toml -> json failed")?;
    let canonical = canonicalize_json_string(&as_json);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Ok(CanonicalConfig {
        config_json: serde_json::from_str(&canonical).context("canonical json parse failed")?,
        canonical_json: canonical,
        config_hash: hash,
    })
}

fn canonicalize_json_string(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).expect("json serialization must not fail")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}
