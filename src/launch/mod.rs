//! Starting the Streamlit UI inside the provisioned environment

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::assets::fluidsynth::FLUIDSYNTH_ENV_VAR;
use crate::assets::soundfont::SOUNDFONT_ENV_VAR;
use crate::assets::AudioAssets;
use crate::musicgen::{MusicGenCache, MusicGenSettings};
use crate::process::{CommandRunner, CommandSpec, ProcessError};
use crate::venv::VirtualEnv;

/// Opt out of usage reporting in the UI and its model downloads
pub const TELEMETRY_OPT_OUTS: &[(&str, &str)] = &[
    ("STREAMLIT_BROWSER_GATHER_USAGE_STATS", "false"),
    ("HF_HUB_DISABLE_TELEMETRY", "1"),
    ("DO_NOT_TRACK", "1"),
];

/// Launch errors
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("App entry point not found at {0}. Is the project root correct?")]
    EntryMissing(PathBuf),

    #[error("{0}")]
    Process(#[from] ProcessError),

    #[error("Invalid PATH entry: {0}")]
    Path(#[from] std::env::JoinPathsError),
}

/// `<root>/src/lofi_symphony/app.py`
pub fn app_entry(project_root: &Path) -> PathBuf {
    project_root.join("src").join("lofi_symphony").join("app.py")
}

/// Everything the UI process needs
#[derive(Debug, Clone, Default)]
pub struct UiLaunch<'a> {
    pub app: PathBuf,
    pub forwarded: &'a [OsString],
    pub assets: AudioAssets,
    pub musicgen: Option<(&'a MusicGenCache, &'a MusicGenSettings)>,
}

impl UiLaunch<'_> {
    /// Build `python -m streamlit run <app> [args]` with its environment.
    /// `lookup` reads the launcher's own environment; user-set asset
    /// variables are left alone.
    pub fn command(
        &self,
        venv: &VirtualEnv,
        lookup: impl Fn(&str) -> Option<OsString>,
    ) -> Result<CommandSpec, LaunchError> {
        if !self.app.is_file() {
            return Err(LaunchError::EntryMissing(self.app.clone()));
        }

        let mut spec = CommandSpec::new(venv.python())
            .args(["-m", "streamlit", "run"])
            .arg(&self.app)
            .args(self.forwarded)
            .envs(venv.activation_env()?)
            .envs(TELEMETRY_OPT_OUTS.iter().copied());

        let resolved = [
            (SOUNDFONT_ENV_VAR, self.assets.soundfont.as_ref()),
            (FLUIDSYNTH_ENV_VAR, self.assets.fluidsynth.as_ref()),
        ];
        for (key, path) in resolved {
            let user_set = lookup(key).is_some_and(|v| !v.is_empty());
            if let (Some(path), false) = (path, user_set) {
                spec = spec.env(key, path);
            }
        }

        if let Some((cache, settings)) = self.musicgen {
            spec = spec.envs(cache.ui_env(settings));
        }

        Ok(spec)
    }
}

/// Run the UI in the foreground and hand back its exit status unchanged
pub async fn launch_ui<R: CommandRunner>(runner: &R, spec: &CommandSpec) -> Result<i32, LaunchError> {
    tracing::info!("Launching Streamlit …");
    let code = runner.run_foreground(spec).await?;
    if code == 0 {
        tracing::info!("Streamlit exited normally");
    } else {
        tracing::warn!("Streamlit exited with status {}", code);
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::{Reply, ScriptedRunner};

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("lofi_launcher_launch_{}", name));
        std::fs::remove_dir_all(&dir).ok();
        let app = app_entry(&dir);
        std::fs::create_dir_all(app.parent().unwrap()).unwrap();
        std::fs::write(&app, "import streamlit").unwrap();
        dir
    }

    fn no_env(_: &str) -> Option<OsString> {
        None
    }

    #[test]
    fn test_command_shape_and_env() {
        let dir = scratch("shape");
        let venv = VirtualEnv::new(dir.join(".lofi_venv"));
        let forwarded = vec![OsString::from("--server.headless"), OsString::from("true")];
        let launch = UiLaunch {
            app: app_entry(&dir),
            forwarded: &forwarded,
            assets: AudioAssets {
                fluidsynth: Some(PathBuf::from("/opt/fs/bin/fluidsynth")),
                soundfont: Some(PathBuf::from("/opt/sf/TimGM6mb.sf2")),
            },
            musicgen: None,
        };

        let spec = launch.command(&venv, no_env).unwrap();
        assert_eq!(spec.program, venv.python());
        assert_eq!(&spec.args[..3], &["-m", "streamlit", "run"]);
        assert_eq!(spec.args[3], app_entry(&dir).into_os_string());
        assert_eq!(&spec.args[4..], &forwarded[..]);
        assert_eq!(spec.env_value("DO_NOT_TRACK").unwrap(), "1");
        assert_eq!(spec.env_value("STREAMLIT_BROWSER_GATHER_USAGE_STATS").unwrap(), "false");
        assert_eq!(spec.env_value(SOUNDFONT_ENV_VAR).unwrap(), "/opt/sf/TimGM6mb.sf2");
        assert_eq!(spec.env_value(FLUIDSYNTH_ENV_VAR).unwrap(), "/opt/fs/bin/fluidsynth");
        assert!(spec.env_value("VIRTUAL_ENV").is_some());
        assert!(spec.env_value("LOFI_SYMPHONY_MUSICGEN").is_none());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_user_set_asset_vars_are_kept() {
        let dir = scratch("user_env");
        let venv = VirtualEnv::new(dir.join(".lofi_venv"));
        let launch = UiLaunch {
            app: app_entry(&dir),
            assets: AudioAssets {
                fluidsynth: Some(PathBuf::from("/bundled/fluidsynth")),
                soundfont: Some(PathBuf::from("/bundled/TimGM6mb.sf2")),
            },
            ..Default::default()
        };

        let spec = launch
            .command(&venv, |key| {
                (key == SOUNDFONT_ENV_VAR).then(|| OsString::from("/mine.sf2"))
            })
            .unwrap();
        assert!(spec.env_value(SOUNDFONT_ENV_VAR).is_none());
        assert_eq!(spec.env_value(FLUIDSYNTH_ENV_VAR).unwrap(), "/bundled/fluidsynth");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_musicgen_env_is_forwarded() {
        let dir = scratch("musicgen");
        let venv = VirtualEnv::new(dir.join(".lofi_venv"));
        let cache = MusicGenCache::new(dir.join("models"));
        let settings = MusicGenSettings {
            prompt: "rainy night piano".into(),
            duration: 30.0,
            ..Default::default()
        };
        let launch = UiLaunch {
            app: app_entry(&dir),
            musicgen: Some((&cache, &settings)),
            ..Default::default()
        };

        let spec = launch.command(&venv, no_env).unwrap();
        assert_eq!(spec.env_value("LOFI_SYMPHONY_MUSICGEN").unwrap(), "1");
        assert_eq!(spec.env_value("HF_HOME").unwrap(), cache.dir().as_os_str());
        assert_eq!(spec.env_value("LOFI_SYMPHONY_MUSICGEN_DURATION").unwrap(), "30");
        assert_eq!(spec.env_value("LOFI_SYMPHONY_MUSICGEN_PROMPT").unwrap(), "rainy night piano");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_entry_point() {
        let dir = std::env::temp_dir().join("lofi_launcher_launch_missing");
        let launch = UiLaunch {
            app: app_entry(&dir),
            ..Default::default()
        };
        let err = launch.command(&VirtualEnv::new(dir.join(".lofi_venv")), no_env).unwrap_err();
        assert!(matches!(err, LaunchError::EntryMissing(_)));
    }

    #[tokio::test]
    async fn test_exit_status_is_relayed() {
        for code in [0, 2, 130] {
            let runner = ScriptedRunner::new(move |_| Reply::Exit(code));
            let spec = CommandSpec::new("python").args(["-m", "streamlit"]);
            assert_eq!(launch_ui(&runner, &spec).await.unwrap(), code);
        }
    }
}
