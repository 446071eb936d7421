//! Auxiliary audio assets
//!
//! Handles:
//! - FluidSynth runtime binaries (per-platform prebuilt archives)
//! - The bundled General MIDI soundfont and the curated download catalog
//! - Lookup of both for the UI process
//!
//! Nothing in here is allowed to abort a launch: the app runs without
//! audio rendering when assets are unavailable.

pub mod archive;
pub mod download;
pub mod fluidsynth;
pub mod soundfont;

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use download::{Download, Downloader};
pub use fluidsynth::FluidsynthLocator;
pub use soundfont::{SoundfontLocator, SoundfontSource};

/// Asset errors
#[derive(Error, Debug)]
pub enum AssetError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download of {url} failed with HTTP status {status}")]
    Status { url: String, status: u16 },

    #[error("Checksum mismatch for {name}: expected {expected}, got {actual}")]
    Checksum {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Archive {0} contained no files")]
    EmptyArchive(PathBuf),

    #[error("Refusing to extract entry outside the destination: {0}")]
    UnsafePath(String),

    #[error("Missing {0}")]
    MissingEntry(String),

    #[error("Registry did not return a token for {0}")]
    Token(String),

    #[error("Unknown soundfont '{slug}'. Available: {available}")]
    UnknownSoundfont { slug: String, available: String },
}

/// Directories the asset helpers read and write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetPaths {
    /// `<root>/src/lofi_symphony/_vendor`
    pub vendor_root: PathBuf,
    /// `<root>/licenses`
    pub licenses_root: PathBuf,
    /// `~/.lofi_symphony`, when a home directory exists
    pub user_root: Option<PathBuf>,
    /// Soundfont chosen with `--soundfont` or the config file
    pub preferred_soundfont: Option<PathBuf>,
}

impl AssetPaths {
    pub fn for_project(project_root: &Path, user_root: Option<PathBuf>) -> Self {
        Self {
            vendor_root: project_root.join("src").join("lofi_symphony").join("_vendor"),
            licenses_root: project_root.join("licenses"),
            user_root,
            preferred_soundfont: None,
        }
    }

    pub fn with_soundfont(mut self, soundfont: Option<PathBuf>) -> Self {
        self.preferred_soundfont = soundfont;
        self
    }

    pub fn fluidsynth_root(&self) -> PathBuf {
        self.vendor_root.join("fluidsynth")
    }

    pub fn soundfont_root(&self) -> PathBuf {
        self.vendor_root.join("soundfonts")
    }

    pub fn user_soundfonts(&self) -> Option<PathBuf> {
        self.user_root.as_ref().map(|root| root.join("soundfonts"))
    }
}

/// What the UI gets told about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioAssets {
    pub fluidsynth: Option<PathBuf>,
    pub soundfont: Option<PathBuf>,
}

impl AudioAssets {
    /// Look up whatever is already on disk without downloading anything
    pub fn locate(paths: &AssetPaths) -> Self {
        Self {
            fluidsynth: FluidsynthLocator::from_env(&paths.fluidsynth_root()).resolve(),
            soundfont: SoundfontLocator::from_env(paths).resolve(),
        }
    }
}

/// Bundle FluidSynth and the default soundfont, then resolve both.
/// Failures are logged and leave the corresponding asset unset.
pub async fn ensure_audio_assets(
    downloader: &Downloader,
    paths: &AssetPaths,
    skip_soundfont: bool,
) -> AudioAssets {
    if let Err(e) =
        fluidsynth::ensure_bundle(downloader, &paths.fluidsynth_root(), fluidsynth::current_asset()).await
    {
        tracing::warn!("FluidSynth could not be bundled; audio rendering may be unavailable: {}", e);
    }

    if let Err(e) =
        soundfont::ensure_bundle(downloader, &paths.soundfont_root(), &paths.licenses_root, skip_soundfont).await
    {
        tracing::warn!("Default soundfont could not be bundled: {}", e);
    }

    let assets = AudioAssets::locate(paths);
    match &assets.fluidsynth {
        Some(path) => tracing::info!("FluidSynth: {}", path.display()),
        None => tracing::warn!("No FluidSynth executable found; WAV rendering will be disabled."),
    }
    match &assets.soundfont {
        Some(path) => tracing::info!("Soundfont: {}", path.display()),
        None => tracing::warn!("No soundfont found; pick one from the in-app catalog."),
    }
    assets
}

/// Progress callback that logs each quarter of a download
pub fn log_progress(label: &str) -> impl FnMut(u64, Option<u64>) + '_ {
    let mut next_quarter = 1;
    move |read, total| {
        let Some(total) = total.filter(|t| *t > 0) else {
            return;
        };
        while next_quarter <= 4 && read * 4 >= total * next_quarter {
            tracing::info!("{}: {}%", label, next_quarter * 25);
            next_quarter += 1;
        }
    }
}

/// Write a `VERSION` marker into `dir`
pub(crate) fn write_marker(dir: &Path, version: &str) -> std::io::Result<()> {
    std::fs::write(dir.join("VERSION"), version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_paths_layout() {
        let paths = AssetPaths::for_project(Path::new("/opt/lofi"), Some(PathBuf::from("/home/u/.lofi_symphony")));
        assert_eq!(
            paths.fluidsynth_root(),
            PathBuf::from("/opt/lofi/src/lofi_symphony/_vendor/fluidsynth")
        );
        assert_eq!(
            paths.soundfont_root(),
            PathBuf::from("/opt/lofi/src/lofi_symphony/_vendor/soundfonts")
        );
        assert_eq!(paths.licenses_root, PathBuf::from("/opt/lofi/licenses"));
        assert_eq!(
            paths.user_soundfonts(),
            Some(PathBuf::from("/home/u/.lofi_symphony/soundfonts"))
        );
        assert_eq!(AssetPaths::for_project(Path::new("/x"), None).user_soundfonts(), None);
    }

    #[test]
    fn test_preferred_soundfont_wins_lookup() {
        let dir = std::env::temp_dir().join("lofi_launcher_assets_preferred");
        std::fs::remove_dir_all(&dir).ok();
        let bundled = dir.join("src/lofi_symphony/_vendor/soundfonts");
        std::fs::create_dir_all(&bundled).unwrap();
        std::fs::write(bundled.join("TimGM6mb.sf2"), b"sf2").unwrap();
        let mine = dir.join("mine.sf2");
        std::fs::write(&mine, b"sf2").unwrap();

        let paths = AssetPaths::for_project(&dir, None);
        assert_eq!(SoundfontLocator::from_env(&paths).preferred, None);

        let paths = paths.with_soundfont(Some(mine.clone()));
        assert_eq!(SoundfontLocator::from_env(&paths).resolve(), Some(mine.canonicalize().unwrap()));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_log_progress_handles_unknown_total() {
        let mut progress = log_progress("test");
        progress(10, None);
        progress(10, Some(0));
        progress(50, Some(100));
        progress(100, Some(100));
    }

    #[test]
    fn test_write_marker() {
        let dir = std::env::temp_dir().join("lofi_launcher_assets_marker");
        std::fs::create_dir_all(&dir).unwrap();
        write_marker(&dir, "2.5.1").unwrap();
        assert_eq!(std::fs::read_to_string(dir.join("VERSION")).unwrap(), "2.5.1");
        std::fs::remove_dir_all(&dir).ok();
    }
}
