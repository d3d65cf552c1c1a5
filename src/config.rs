use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    runtime::RetryPolicy,
};

/// Settings of the processing pipeline, read from an optional TOML file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// when false the upload endpoint only answers with a maintenance notice
    pub uploads_enabled: bool,
    pub max_upload_bytes: usize,
    /// chapters processed at the same time
    pub max_concurrency: usize,
    /// maximum duration of a single chapter attempt
    pub max_duration_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            uploads_enabled: true,
            max_upload_bytes: 50 * 1024 * 1024,
            max_concurrency: 4,
            max_duration_secs: 300,
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    /// Defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }
}

/// OpenAI-compatible provider settings, from the environment (and `.env`).
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: String,
    pub base_url: String,
    pub chat_model: String,
    pub image_model: String,
}

impl ProviderConfig {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let var = |name: &str| {
            dotenvy::var(name).map_err(|e| Error::Config(format!("{name}: {e}")))
        };
        Ok(Self {
            api_key: var("OPENAI_API_KEY")?,
            base_url: dotenvy::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            chat_model: dotenvy::var("AI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            image_model: dotenvy::var("IMAGE_MODEL").unwrap_or_else(|_| "dall-e-3".to_string()),
        })
    }
}
