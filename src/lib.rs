//! LofiSymphony launcher
//!
//! Native first-run bootstrapper for the LofiSymphony app. It handles:
//! - Finding a compatible Python interpreter
//! - Provisioning a cached virtual environment next to the project
//! - Installing required and optional dependency tiers
//! - Bundling FluidSynth and a General MIDI soundfont
//! - Prefetching MusicGen weights when enabled
//! - Running the Streamlit UI and relaying its exit status

pub mod assets;
pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod deps;
pub mod interpreter;
pub mod launch;
pub mod musicgen;
pub mod process;
pub mod report;
pub mod venv;

use clap::Parser;

use assets::AssetError;
use bootstrap::{Bootstrap, Outcome};
use config::{ConfigError, HostEnv, LauncherConfig, NO_PAUSE_ENV_VAR};
use deps::DepsError;
use interpreter::InterpreterError;
use launch::LaunchError;
use process::{ProcessError, SystemRunner};
use venv::VenvError;

pub(crate) const RETRY_HINT: &str = "Check your internet connection and try again, or re-run with --reset.";

/// Top-level launcher error
#[derive(Debug, thiserror::Error)]
pub enum LauncherError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Interpreter(#[from] InterpreterError),

    #[error("{0}")]
    Venv(#[from] VenvError),

    #[error("{0}")]
    Deps(#[from] DepsError),

    #[error("{0}")]
    Asset(#[from] AssetError),

    #[error("{0}")]
    Launch(#[from] LaunchError),

    #[error("No home directory found for user soundfonts")]
    NoHomeDir,

    #[error("Failed to start the async runtime: {0}")]
    Runtime(std::io::Error),
}

impl LauncherError {
    /// The child process behind this failure, if any
    pub fn process_error(&self) -> Option<&ProcessError> {
        match self {
            LauncherError::Venv(VenvError::Process(e)) => Some(e),
            LauncherError::Deps(e) => e.process_error(),
            LauncherError::Launch(LaunchError::Process(e)) => Some(e),
            _ => None,
        }
    }

    /// Exit code for the launcher process: a failed child's status, otherwise 1
    pub fn exit_code(&self) -> i32 {
        match self.process_error() {
            Some(ProcessError::Failed { code, .. }) if *code != 0 => *code,
            _ => 1,
        }
    }

    /// What the user can do about it
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            LauncherError::Interpreter(_) => None,
            LauncherError::Config(_) => {
                Some("Fix lofi_launcher.toml or remove it to use the defaults.")
            }
            LauncherError::Launch(LaunchError::EntryMissing(_)) => {
                Some("Run the launcher from the LofiSymphony folder or pass --project-root.")
            }
            LauncherError::Asset(_) => Some("Check your internet connection and try again."),
            LauncherError::NoHomeDir | LauncherError::Runtime(_) => None,
            LauncherError::Venv(_) | LauncherError::Deps(_) | LauncherError::Launch(_) => Some(RETRY_HINT),
        }
    }
}

fn execute(config: &LauncherConfig) -> Result<Outcome, LauncherError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(LauncherError::Runtime)?;
    runtime.block_on(Bootstrap::new(&SystemRunner, config).run())
}

/// Parse flags, run the pipeline and report; returns the process exit code
pub fn run() -> i32 {
    let cli = cli::Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    tracing::info!("Starting LofiSymphony launcher v{}", env!("CARGO_PKG_VERSION"));

    let host = HostEnv::current();
    let config = LauncherConfig::resolve(&cli, &host);

    let pause = match &config {
        Ok(config) => !config.no_pause,
        Err(_) => !(cli.no_pause || host.flag(NO_PAUSE_ENV_VAR)),
    };

    let result = match config {
        Ok(config) => {
            tracing::info!("Project root: {}", config.project_root.display());
            execute(&config)
        }
        Err(e) => Err(e.into()),
    };

    if let Err(e) = &result {
        tracing::error!("{}", e);
    }
    report::Terminal::stdio(pause).finish(&result)
}
