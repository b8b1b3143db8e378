//! Model settings, persisted under [`crate::store::MODEL_SETTINGS_KEY`].

use serde::{Deserialize, Serialize};

pub const SUPPORTED_MODELS: &[&str] = &["gpt-3.5-turbo", "gpt-4"];

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_TEMP: f32 = 1.2;
pub const DEFAULT_RESPONSES: u32 = 3;

/// Upper bound on responses per generation.
pub const MAX_RESPONSES: u32 = 10;

/// Upper bound on sampling temperature.
pub const MAX_TEMP: f32 = 1.25;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// System text used when a lineage does not start at a System node, and
    /// for the root of every new tree.
    pub default_preamble: String,
    pub auto_zoom: bool,
    pub model: String,
    pub temp: f32,
    /// Responses requested per generation.
    pub n: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_preamble: default_preamble(),
            auto_zoom: true,
            model: DEFAULT_MODEL.to_string(),
            temp: DEFAULT_TEMP,
            n: DEFAULT_RESPONSES,
        }
    }
}

impl Settings {
    /// Clamp values a hand-edited settings file could get wrong.
    pub fn sanitized(mut self) -> Self {
        self.n = self.n.clamp(1, MAX_RESPONSES);
        if !self.temp.is_finite() {
            self.temp = DEFAULT_TEMP;
        }
        self.temp = self.temp.clamp(0.0, MAX_TEMP);
        if self.model.trim().is_empty() {
            self.model = DEFAULT_MODEL.to_string();
        }
        self
    }
}

pub fn default_preamble() -> String {
    format!(
        "You are ChatGPT, a large language model trained by OpenAI. Answer as concisely as possible. \
         Knowledge cutoff: 2021-09 Current date: {}",
        time::OffsetDateTime::now_utc().date()
    )
}
