//! The provisioning pipeline
//!
//! interpreter → virtual environment → dependencies → audio assets →
//! MusicGen → UI. Each step is idempotent so a second launch only pays for
//! the UI start.

use std::path::PathBuf;

use crate::assets::{self, soundfont, AudioAssets, Downloader, SoundfontSource};
use crate::cli::Action;
use crate::config::LauncherConfig;
use crate::deps::{DependencyInstaller, InstallReport, OptionalFailureRecord, Profile, RequirementSet};
use crate::interpreter::{self, Interpreter};
use crate::launch::{self, UiLaunch};
use crate::musicgen::{self, MusicGenCache};
use crate::process::CommandRunner;
use crate::venv::{VirtualEnv, VENV_DIR_NAME};
use crate::LauncherError;

/// How a successful run ended
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Provisioning finished and `--prepare-only` was given
    Prepared,
    /// The UI ran and exited with this status
    UiExited(i32),
    AssetsReady(AudioAssets),
    SoundfontDownloaded(PathBuf),
    Catalog(&'static [SoundfontSource]),
}

pub struct Bootstrap<'a, R: CommandRunner> {
    runner: &'a R,
    config: &'a LauncherConfig,
}

impl<'a, R: CommandRunner> Bootstrap<'a, R> {
    pub fn new(runner: &'a R, config: &'a LauncherConfig) -> Self {
        Self { runner, config }
    }

    pub async fn run(&self) -> Result<Outcome, LauncherError> {
        match &self.config.action {
            Action::ListSoundfonts => Ok(Outcome::Catalog(soundfont::catalog())),
            Action::DownloadSoundfont(slug) => self.download_soundfont(slug).await,
            Action::AssetsOnly => Ok(Outcome::AssetsReady(self.prepare_assets(true).await)),
            Action::PrepareOnly | Action::Launch => self.provision().await,
        }
    }

    async fn provision(&self) -> Result<Outcome, LauncherError> {
        let config = self.config;
        let interpreter =
            interpreter::discover(self.runner, &config.candidates, config.version_range).await?;

        let venv = VirtualEnv::new(config.project_root.join(VENV_DIR_NAME));
        venv.ensure(self.runner, &interpreter, config.reset).await?;

        let profile = if config.musicgen {
            Profile::MusicGen
        } else {
            Profile::Core
        };
        let requirements = RequirementSet::for_profile(profile, interpreter.version);
        let installer = DependencyInstaller::new(self.runner, &venv, &config.project_root, config.retry);
        if let InstallReport::Installed { optional_failures } =
            installer.ensure(&requirements, config.upgrade || config.reset).await?
        {
            if !optional_failures.is_empty() {
                tracing::warn!(
                    "Some optional features are unavailable: {}",
                    optional_failures.join(", ")
                );
            }
        }

        let assets = self.prepare_assets(!config.skip_assets).await;
        let musicgen = self.prepare_musicgen(&venv, &interpreter).await;

        if config.action == Action::PrepareOnly {
            return Ok(Outcome::Prepared);
        }

        let launch = UiLaunch {
            app: launch::app_entry(&config.project_root),
            forwarded: &config.ui_args,
            assets,
            musicgen: musicgen.as_ref().map(|cache| (cache, &config.musicgen_settings)),
        };
        let spec = launch.command(&venv, |key| std::env::var_os(key))?;
        let code = launch::launch_ui(self.runner, &spec).await?;
        Ok(Outcome::UiExited(code))
    }

    /// Bundle assets when `fetch` is set, then resolve whatever exists
    async fn prepare_assets(&self, fetch: bool) -> AudioAssets {
        let paths = self.config.asset_paths();
        if !fetch {
            tracing::info!("Skipping asset downloads.");
            return AudioAssets::locate(&paths);
        }

        match Downloader::new() {
            Ok(downloader) => assets::ensure_audio_assets(&downloader, &paths, self.config.skip_soundfont).await,
            Err(e) => {
                tracing::warn!("Asset downloads unavailable: {}", e);
                AudioAssets::locate(&paths)
            }
        }
    }

    /// Prefetch MusicGen weights; `None` means the UI runs without it
    async fn prepare_musicgen(&self, venv: &VirtualEnv, interpreter: &Interpreter) -> Option<MusicGenCache> {
        if !self.config.musicgen {
            return None;
        }

        let failures = OptionalFailureRecord::load(&venv.optional_failures_path());
        if let Some(reason) = musicgen::unavailable_reason(interpreter.version, failures.as_ref()) {
            tracing::warn!("MusicGen disabled: {}", reason);
            return None;
        }

        let Some(cache) = self.config.musicgen_cache() else {
            tracing::warn!("MusicGen disabled: no home directory for the model cache");
            return None;
        };

        let model = &self.config.musicgen_settings.model;
        match musicgen::prefetch(self.runner, venv, &cache, model).await {
            Ok(()) => Some(cache),
            Err(e) => {
                tracing::warn!("MusicGen disabled: {}", e);
                None
            }
        }
    }

    async fn download_soundfont(&self, slug: &str) -> Result<Outcome, LauncherError> {
        let source = soundfont::find(slug)?;
        let dest = self
            .config
            .asset_paths()
            .user_soundfonts()
            .ok_or(LauncherError::NoHomeDir)?;
        let downloader = Downloader::new()?;
        let path = soundfont::download(&downloader, source, &dest, assets::log_progress(source.name)).await?;
        Ok(Outcome::SoundfontDownloaded(path))
    }
}
