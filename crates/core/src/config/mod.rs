use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{Result, SafiError};

pub const DEFAULT_BUCKET: &str = "safispeak_audio";

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub flow: FlowConfig,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing sections fall back to defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Connection details for the hosted backend (records, storage, auth).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub url: String,
    pub anon_key: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            anon_key: String::new(),
            bucket: default_bucket(),
        }
    }
}

impl BackendConfig {
    /// Builds the config from `SUPABASE_URL`, `SUPABASE_ANON_KEY` and the
    /// optional `SUPABASE_BUCKET`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| SafiError::Config(format!("{key} is required but not set")))
        };

        let url = required("SUPABASE_URL")?;
        let anon_key = required("SUPABASE_ANON_KEY")?;
        let bucket = lookup("SUPABASE_BUCKET")
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(default_bucket);

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            anon_key,
            bucket,
        })
    }

    /// Returns true when both the project URL and the anon key are present.
    pub fn is_complete(&self) -> bool {
        !self.url.is_empty() && !self.anon_key.is_empty()
    }
}

fn default_bucket() -> String {
    DEFAULT_BUCKET.to_string()
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Playback length assumed when a sound does not report its duration.
    pub fallback_duration_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            fallback_duration_ms: 3_000,
        }
    }
}

impl AudioConfig {
    pub fn fallback_duration(&self) -> Duration {
        Duration::from_millis(self.fallback_duration_ms)
    }
}

/// Selects the lesson flow variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// The first motivation screen offers account creation.
    pub with_auth_gate: bool,
    /// Finishing the questions leads through the second motivation screen into
    /// the flashcard deck instead of straight to completion.
    pub with_flashcards: bool,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            with_auth_gate: true,
            with_flashcards: true,
        }
    }
}
