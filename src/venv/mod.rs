//! Managed virtual environment
//!
//! The environment lives next to the project so repeated launches reuse it.
//! A directory without a python binary is treated as a broken install and
//! rebuilt.

use std::env::JoinPathsError;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::interpreter::Interpreter;
use crate::process::{self, CommandRunner, ProcessError};

/// Default directory name, relative to the project root
pub const VENV_DIR_NAME: &str = ".lofi_venv";

const DEPS_SENTINEL: &str = ".deps_installed";
const OPTIONAL_FAILURES: &str = "optional_failures.json";

/// Virtual environment errors
#[derive(Error, Debug)]
pub enum VenvError {
    #[error("Failed to create virtual environment: {0}")]
    Process(#[from] ProcessError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Virtual environment is missing its Python binary at {0}. Please re-run with --reset.")]
    PythonMissing(PathBuf),

    #[error("Invalid PATH entry: {0}")]
    Path(#[from] JoinPathsError),
}

/// What `ensure` had to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvState {
    Reused,
    Created,
}

/// A virtual environment rooted at a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualEnv {
    root: PathBuf,
}

impl VirtualEnv {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `Scripts` on Windows, `bin` elsewhere
    pub fn bin_dir(&self) -> PathBuf {
        if cfg!(windows) {
            self.root.join("Scripts")
        } else {
            self.root.join("bin")
        }
    }

    pub fn python(&self) -> PathBuf {
        if cfg!(windows) {
            self.bin_dir().join("python.exe")
        } else {
            self.bin_dir().join("python")
        }
    }

    /// Marker written once all dependency tiers were processed
    pub fn deps_sentinel(&self) -> PathBuf {
        self.root.join(DEPS_SENTINEL)
    }

    /// JSON list of optional packages that failed to install
    pub fn optional_failures_path(&self) -> PathBuf {
        self.root.join(OPTIONAL_FAILURES)
    }

    /// True when the environment has a usable python binary
    pub fn is_usable(&self) -> bool {
        self.python().is_file()
    }

    /// Create or reuse the environment
    pub async fn ensure<R: CommandRunner>(
        &self,
        runner: &R,
        interpreter: &Interpreter,
        reset: bool,
    ) -> Result<EnvState, VenvError> {
        if reset && self.root.exists() {
            tracing::info!("Removing existing virtual environment …");
            self.remove().await?;
        }

        if self.is_usable() {
            tracing::info!("Using existing virtual environment at {}", self.root.display());
            return Ok(EnvState::Reused);
        }

        if self.root.exists() {
            tracing::warn!(
                "Virtual environment at {} is incomplete, rebuilding it",
                self.root.display()
            );
            self.remove().await?;
        }

        tracing::info!("Creating virtual environment …");
        let spec = interpreter.candidate.command().args(["-m", "venv"]).arg(&self.root);
        process::run_checked(runner, &spec).await?;

        if !self.is_usable() {
            return Err(VenvError::PythonMissing(self.python()));
        }

        Ok(EnvState::Created)
    }

    pub async fn remove(&self) -> Result<(), VenvError> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Variables that make child processes behave as if the environment were activated
    pub fn activation_env(&self) -> Result<Vec<(OsString, OsString)>, JoinPathsError> {
        let path = prefixed_path(&self.bin_dir(), std::env::var_os("PATH"))?;
        Ok(vec![
            (OsString::from("PATH"), path),
            (OsString::from("VIRTUAL_ENV"), self.root.clone().into_os_string()),
        ])
    }
}

/// Prepend `dir` to an existing PATH value
pub fn prefixed_path(dir: &Path, existing: Option<OsString>) -> Result<OsString, JoinPathsError> {
    let mut entries = vec![dir.to_path_buf()];
    if let Some(existing) = existing {
        entries.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(entries)
}
