//! Optional MusicGen (audiocraft) support
//!
//! Weights are prefetched into a launcher-owned Hugging Face cache so the
//! first generation in the UI does not stall on a multi-gigabyte download.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::deps::{self, OptionalFailureRecord};
use crate::interpreter::PythonVersion;
use crate::process::{self, CommandRunner, CommandSpec, ProcessError};
use crate::venv::VirtualEnv;

/// Tells the UI that MusicGen weights are ready
pub const MUSICGEN_ENV_VAR: &str = "LOFI_SYMPHONY_MUSICGEN";

/// Prefix of the generation defaults handed to the UI
pub const SETTINGS_ENV_PREFIX: &str = "LOFI_SYMPHONY_MUSICGEN_";

const PREFETCH_SCRIPT: &str = "import sys\n\
from audiocraft.models import MusicGen\n\
MusicGen.get_pretrained(sys.argv[1])\n\
print('ok')";

/// Packages that must have installed for the prefetch to make sense
const MUSICGEN_PACKAGES: &[&str] = &["torch", "torchaudio", "audiocraft"];

/// MusicGen errors
#[derive(Error, Debug)]
pub enum MusicGenError {
    #[error("Model prefetch failed: {0}")]
    Process(#[from] ProcessError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid MusicGen setting: {0}")]
    Invalid(String),
}

/// Generation defaults, overridable from `[musicgen]` in the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MusicGenSettings {
    pub model: String,
    pub prompt: String,
    pub duration: f64,
    pub top_k: u32,
    pub top_p: f64,
    pub temperature: f64,
    pub cfg_coef: f64,
}

impl Default for MusicGenSettings {
    fn default() -> Self {
        Self {
            model: "facebook/musicgen-small".to_string(),
            prompt: "A warm lofi beat with dusty textures".to_string(),
            duration: 12.0,
            top_k: 250,
            top_p: 0.0,
            temperature: 1.0,
            cfg_coef: 3.5,
        }
    }
}

impl MusicGenSettings {
    pub fn validate(&self) -> Result<(), MusicGenError> {
        if self.model.trim().is_empty() {
            return Err(MusicGenError::Invalid("model must not be empty".into()));
        }
        if !(self.duration > 0.0) {
            return Err(MusicGenError::Invalid(format!("duration must be positive, got {}", self.duration)));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(MusicGenError::Invalid(format!("top_p must be within 0..=1, got {}", self.top_p)));
        }
        if !(self.temperature > 0.0) {
            return Err(MusicGenError::Invalid(format!(
                "temperature must be positive, got {}",
                self.temperature
            )));
        }
        Ok(())
    }

    /// `LOFI_SYMPHONY_MUSICGEN_<FIELD>` pairs the UI reads its generation defaults from
    pub fn env_pairs(&self) -> Vec<(String, String)> {
        [
            ("MODEL", self.model.clone()),
            ("PROMPT", self.prompt.clone()),
            ("DURATION", self.duration.to_string()),
            ("TOP_K", self.top_k.to_string()),
            ("TOP_P", self.top_p.to_string()),
            ("TEMPERATURE", self.temperature.to_string()),
            ("CFG_COEF", self.cfg_coef.to_string()),
        ]
        .into_iter()
        .map(|(field, value)| (format!("{}{}", SETTINGS_ENV_PREFIX, field), value))
        .collect()
    }
}

/// Filesystem-safe form of a model id
pub fn model_slug(model: &str) -> String {
    model
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect()
}

/// Why MusicGen cannot run in this environment, if it cannot
pub fn unavailable_reason(version: PythonVersion, failures: Option<&OptionalFailureRecord>) -> Option<String> {
    if !deps::musicgen_supported(version) {
        return Some(format!("audiocraft does not support Python {} yet", version));
    }

    let failed: Vec<&str> = MUSICGEN_PACKAGES
        .iter()
        .copied()
        .filter(|p| failures.is_some_and(|record| record.contains(p)))
        .collect();
    if failed.is_empty() {
        None
    } else {
        Some(format!("{} failed to install", failed.join(", ")))
    }
}

/// Hugging Face cache owned by the launcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MusicGenCache {
    dir: PathBuf,
}

impl MusicGenCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<user root>/models`
    pub fn under(user_root: &Path) -> Self {
        Self::new(user_root.join("models"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn marker(&self, model: &str) -> PathBuf {
        self.dir.join(format!(".musicgen-{}", model_slug(model)))
    }

    pub fn is_ready(&self, model: &str) -> bool {
        self.marker(model).is_file()
    }

    /// Variables handed to the UI once weights are cached
    pub fn ui_env(&self, settings: &MusicGenSettings) -> Vec<(OsString, OsString)> {
        let mut env = vec![
            (OsString::from(MUSICGEN_ENV_VAR), OsString::from("1")),
            (OsString::from("HF_HOME"), self.dir.clone().into_os_string()),
        ];
        env.extend(
            settings
                .env_pairs()
                .into_iter()
                .map(|(key, value)| (OsString::from(key), OsString::from(value))),
        );
        env
    }
}

/// Download model weights unless the marker says they are already cached
pub async fn prefetch<R: CommandRunner>(
    runner: &R,
    venv: &VirtualEnv,
    cache: &MusicGenCache,
    model: &str,
) -> Result<(), MusicGenError> {
    if cache.is_ready(model) {
        tracing::info!("MusicGen model {} already cached.", model);
        return Ok(());
    }

    tracing::info!(
        "Downloading MusicGen model {} into {} – this can take several minutes …",
        model,
        cache.dir.display()
    );
    std::fs::create_dir_all(&cache.dir)?;

    let env = venv.activation_env().map_err(std::io::Error::other)?;
    let spec = CommandSpec::new(venv.python())
        .args(["-c", PREFETCH_SCRIPT, model])
        .envs(env)
        .env("HF_HOME", &cache.dir)
        .env("HF_HUB_DISABLE_TELEMETRY", "1");
    process::run_checked(runner, &spec).await?;

    std::fs::write(cache.marker(model), chrono::Utc::now().to_rfc3339())?;
    tracing::info!("MusicGen model {} is ready.", model);
    Ok(())
}
