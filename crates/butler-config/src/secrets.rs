//! Secret resolution: config tables store only env var NAMES, never values.
//! Callers resolve once at startup and pass the resolved store down;
//! `std::env::var` calls do not scatter past this module.
//!
//! Generalized from the teacher's mode-aware `ResolvedSecrets` — there is no
//! LIVE/PAPER/BACKTEST distinction here, just named credentials a module
//! declares it needs in its own config table.

use std::collections::BTreeMap;
use std::env;

/// Resolves named credentials by env var name. Error messages reference the
/// var NAME only, never a value.
pub trait CredentialStore: Send + Sync {
    fn get(&self, env_var: &str) -> Option<String>;

    fn require(&self, env_var: &str) -> Result<String, String> {
        self.get(env_var)
            .ok_or_else(|| format!("required env var '{env_var}' is not set or empty"))
    }
}

/// Resolves credentials directly from the process environment, caching the
/// lookups it has performed so repeated `require` calls for the same name
/// don't re-hit `std::env::var`.
#[derive(Default)]
pub struct EnvCredentialStore {
    cache: std::sync::Mutex<BTreeMap<String, Option<String>>>,
}

impl EnvCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for EnvCredentialStore {
    fn get(&self, env_var: &str) -> Option<String> {
        let mut cache = self.cache.lock().expect("credential cache poisoned");
        if let Some(cached) = cache.get(env_var) {
            return cached.clone();
        }
        let resolved = match env::var(env_var) {
            Ok(v) if !v.trim().is_empty() => Some(v),
            _ => None,
        };
        cache.insert(env_var.to_string(), resolved.clone());
        resolved
    }
}

impl std::fmt::Debug for EnvCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cache = self.cache.lock().expect("credential cache poisoned");
        f.debug_struct("EnvCredentialStore")
            .field(
                "resolved",
                &cache
                    .iter()
                    .map(|(k, v)| (k.clone(), v.as_ref().map(|_| "<REDACTED>")))
                    .collect::<BTreeMap<_, _>>(),
            )
            .finish()
    }
}
