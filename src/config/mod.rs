//! Launcher configuration
//!
//! Layered, later wins:
//! - built-in defaults
//! - `lofi_launcher.toml` in the project root
//! - `LOFI_SYMPHONY_*` environment variables
//! - command-line flags

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::assets::soundfont::SKIP_SOUNDFONT_ENV_VAR;
use crate::assets::AssetPaths;
use crate::cli::{Action, Cli};
use crate::interpreter::{self, InterpreterCandidate, InterpreterError, VersionRange};
use crate::launch;
use crate::musicgen::{MusicGenCache, MusicGenError, MusicGenSettings, MUSICGEN_ENV_VAR};
use crate::process::RetryPolicy;

pub const CONFIG_FILE_NAME: &str = "lofi_launcher.toml";

pub const ROOT_ENV_VAR: &str = "LOFI_SYMPHONY_ROOT";
pub const PYTHON_ENV_VAR: &str = "LOFI_SYMPHONY_PYTHON";
pub const NO_PAUSE_ENV_VAR: &str = "LOFI_SYMPHONY_NO_PAUSE";

const USER_DIR_NAME: &str = ".lofi_symphony";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Project root {0} does not exist")]
    ProjectRoot(PathBuf),

    #[error("{0}")]
    Interpreter(#[from] InterpreterError),

    #[error("{0}")]
    MusicGen(#[from] MusicGenError),
}

/// `[musicgen]` table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MusicGenSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(flatten)]
    pub settings: MusicGenSettings,
}

/// Contents of `lofi_launcher.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Interpreter probed before the built-in candidates
    pub python: Option<PathBuf>,
    /// Lowest accepted Python, `major.minor`
    pub min_python: String,
    /// First rejected Python, `major.minor`
    pub max_python: Option<String>,
    pub install_attempts: u32,
    pub retry_delay_secs: u64,
    pub skip_assets: bool,
    /// Soundfont used ahead of the bundled one; relative to the project root
    pub soundfont: Option<PathBuf>,
    pub no_pause: bool,
    /// Always forwarded to Streamlit, before command-line arguments
    pub streamlit_args: Vec<String>,
    pub musicgen: MusicGenSection,
}

impl Default for FileConfig {
    fn default() -> Self {
        let range = VersionRange::default();
        let retry = RetryPolicy::default();
        Self {
            python: None,
            min_python: format!("{}.{}", range.min.0, range.min.1),
            max_python: range.max_exclusive.map(|(major, minor)| format!("{}.{}", major, minor)),
            install_attempts: retry.attempts,
            retry_delay_secs: retry.delay.as_secs(),
            skip_assets: false,
            soundfont: None,
            no_pause: false,
            streamlit_args: Vec::new(),
            musicgen: MusicGenSection::default(),
        }
    }
}

impl FileConfig {
    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        tracing::debug!("Loaded {}", path.display());
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn version_range(&self) -> Result<VersionRange, ConfigError> {
        Ok(VersionRange {
            min: VersionRange::parse_bound(&self.min_python)?,
            max_exclusive: self
                .max_python
                .as_deref()
                .map(VersionRange::parse_bound)
                .transpose()?,
        })
    }
}

/// The parts of the host the launcher reads
#[derive(Debug, Clone, Default)]
pub struct HostEnv {
    pub vars: HashMap<String, OsString>,
    pub exe_dir: Option<PathBuf>,
    pub cwd: PathBuf,
    pub home: Option<PathBuf>,
}

impl HostEnv {
    pub fn current() -> Self {
        let vars = std::env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value)))
            .filter(|(key, _)| key.starts_with("LOFI_SYMPHONY_"))
            .collect();
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));

        Self {
            vars,
            exe_dir,
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            home: dirs::home_dir(),
        }
    }

    /// Non-empty value of a variable
    pub fn var(&self, key: &str) -> Option<&OsStr> {
        self.vars
            .get(key)
            .map(OsString::as_os_str)
            .filter(|v| !v.is_empty())
    }

    /// `1`, `true`, `yes` or `on`
    pub fn flag(&self, key: &str) -> bool {
        self.var(key)
            .and_then(OsStr::to_str)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false)
    }
}

/// Fully resolved launcher settings
#[derive(Debug, Clone)]
pub struct LauncherConfig {
    pub action: Action,
    pub project_root: PathBuf,
    /// `~/.lofi_symphony`
    pub user_root: Option<PathBuf>,
    pub candidates: Vec<InterpreterCandidate>,
    pub version_range: VersionRange,
    pub retry: RetryPolicy,
    pub reset: bool,
    pub upgrade: bool,
    pub musicgen: bool,
    pub musicgen_settings: MusicGenSettings,
    pub skip_assets: bool,
    pub skip_soundfont: bool,
    pub soundfont: Option<PathBuf>,
    pub no_pause: bool,
    pub ui_args: Vec<OsString>,
}

impl LauncherConfig {
    pub fn resolve(cli: &Cli, host: &HostEnv) -> Result<Self, ConfigError> {
        let project_root = project_root(cli, host)?;
        let file = FileConfig::load(&project_root.join(CONFIG_FILE_NAME))?;
        file.musicgen.settings.validate()?;

        let python = cli
            .python
            .clone()
            .or_else(|| host.var(PYTHON_ENV_VAR).map(PathBuf::from))
            .or_else(|| file.python.clone());
        let mut candidates: Vec<InterpreterCandidate> = python.into_iter().map(InterpreterCandidate::new).collect();
        for candidate in interpreter::default_candidates() {
            if !candidates.contains(&candidate) {
                candidates.push(candidate);
            }
        }

        let soundfont = cli
            .soundfont
            .clone()
            .or_else(|| file.soundfont.as_ref().map(|path| project_root.join(path)));

        let mut ui_args: Vec<OsString> = file.streamlit_args.iter().map(OsString::from).collect();
        ui_args.extend(cli.ui_args.iter().cloned());

        Ok(Self {
            action: cli.action(),
            user_root: host.home.as_ref().map(|home| home.join(USER_DIR_NAME)),
            candidates,
            version_range: file.version_range()?,
            retry: RetryPolicy {
                attempts: file.install_attempts.max(1),
                delay: Duration::from_secs(file.retry_delay_secs),
            },
            reset: cli.reset,
            upgrade: cli.upgrade,
            musicgen: cli.musicgen || host.flag(MUSICGEN_ENV_VAR) || file.musicgen.enabled,
            musicgen_settings: file.musicgen.settings,
            skip_assets: cli.skip_assets || file.skip_assets,
            skip_soundfont: host.var(SKIP_SOUNDFONT_ENV_VAR).is_some(),
            soundfont,
            no_pause: cli.no_pause || host.flag(NO_PAUSE_ENV_VAR) || file.no_pause,
            ui_args,
            project_root,
        })
    }

    pub fn asset_paths(&self) -> AssetPaths {
        AssetPaths::for_project(&self.project_root, self.user_root.clone()).with_soundfont(self.soundfont.clone())
    }

    pub fn musicgen_cache(&self) -> Option<MusicGenCache> {
        self.user_root.as_deref().map(MusicGenCache::under)
    }
}

/// Explicit flag, then `LOFI_SYMPHONY_ROOT`, then the nearest directory above
/// the executable holding the app, then the working directory
fn project_root(cli: &Cli, host: &HostEnv) -> Result<PathBuf, ConfigError> {
    let explicit = cli
        .project_root
        .clone()
        .or_else(|| host.var(ROOT_ENV_VAR).map(PathBuf::from));
    if let Some(root) = explicit {
        let root = if root.is_absolute() { root } else { host.cwd.join(root) };
        if !root.is_dir() {
            return Err(ConfigError::ProjectRoot(root));
        }
        return Ok(root);
    }

    let beside_exe = host
        .exe_dir
        .as_deref()
        .and_then(|dir| dir.ancestors().find(|d| launch::app_entry(d).is_file()))
        .map(Path::to_path_buf);

    Ok(beside_exe.unwrap_or_else(|| host.cwd.clone()))
}
