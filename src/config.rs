//! Runtime configuration from `flux.toml`.
//!
//! Every field is optional in the file; missing fields take the defaults
//! below. A missing file is not an error, an unreadable or invalid one is.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{FluxError, Result};
use crate::history::MAX_HISTORY_SIZE;
use crate::providers::DEFAULT_API_BASE;
use crate::store::{LocalStore, API_KEY_KEY};

pub const DEFAULT_CONFIG_FILE: &str = "flux.toml";
pub const DEFAULT_STORE_DIR: &str = ".flux";
pub const DEFAULT_AUTOSAVE_MS: u64 = 1000;

/// Environment variable checked before the stored API key.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FluxConfig {
    pub store_dir: PathBuf,
    pub api_base: String,
    pub history_size: usize,
    pub autosave_ms: u64,
}

impl Default for FluxConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from(DEFAULT_STORE_DIR),
            api_base: DEFAULT_API_BASE.to_string(),
            history_size: MAX_HISTORY_SIZE,
            autosave_ms: DEFAULT_AUTOSAVE_MS,
        }
    }
}

impl FluxConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| FluxError::Config(e.to_string()))
    }

    /// Load `path`, or defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => {
                let config = Self::from_toml_str(&raw)
                    .map_err(|e| FluxError::Config(format!("{}: {e}", path.display())))?;
                tracing::debug!(path = %path.display(), "loaded config");
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn autosave_delay(&self) -> Duration {
        Duration::from_millis(self.autosave_ms)
    }
}

/// API key from the environment, else from the store.
pub fn resolve_api_key(store: &LocalStore) -> Result<String> {
    if let Ok(key) = std::env::var(API_KEY_ENV) {
        if !key.trim().is_empty() {
            return Ok(key.trim().to_string());
        }
    }
    store
        .read::<String>(API_KEY_KEY)?
        .filter(|k| !k.trim().is_empty())
        .ok_or(FluxError::MissingApiKey)
}
