//! FluidSynth runtime bundling and lookup
//!
//! Prebuilt binaries are pulled per platform: the official Windows zip, and
//! Homebrew bottles from GHCR for macOS and Linux. A `VERSION` marker next
//! to the unpacked tree makes repeated launches a no-op.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::archive::{self, ArchiveFormat};
use super::download::{self, Download, Downloader};
use super::{write_marker, AssetError};
use crate::process;

pub const FLUIDSYNTH_VERSION: &str = "2.5.1";

/// Overrides every other lookup when it points at an existing file
pub const FLUIDSYNTH_ENV_VAR: &str = "LOFI_SYMPHONY_FLUIDSYNTH";

const GHCR_LAYER_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// Where a platform's archive comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetSource {
    Zip { url: &'static str },
    Ghcr { repo: &'static str, digest: &'static str },
}

/// A prebuilt FluidSynth for one (os, arch) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformAsset {
    pub source: AssetSource,
    pub sha256: &'static str,
    pub tag: &'static str,
    /// Directory inside the extracted archive that becomes the bundle root
    pub archive_subdir: Option<&'static str>,
    pub strip_components: usize,
    pub exe_subpath: &'static str,
}

impl PlatformAsset {
    fn format(&self) -> ArchiveFormat {
        match self.source {
            AssetSource::Zip { .. } => ArchiveFormat::Zip,
            AssetSource::Ghcr { .. } => ArchiveFormat::TarGz,
        }
    }
}

fn homebrew_bottle(digest: &'static str, tag: &'static str) -> PlatformAsset {
    PlatformAsset {
        source: AssetSource::Ghcr {
            repo: "homebrew/core/fluid-synth",
            digest,
        },
        sha256: digest.trim_start_matches("sha256:"),
        tag,
        archive_subdir: None,
        strip_components: 2,
        exe_subpath: "bin/fluidsynth",
    }
}

lazy_static::lazy_static! {
    static ref PLATFORM_ASSETS: HashMap<(&'static str, &'static str), PlatformAsset> = {
        let mut assets = HashMap::new();
        assets.insert(("windows", "amd64"), PlatformAsset {
            source: AssetSource::Zip {
                url: "https://github.com/FluidSynth/fluidsynth/releases/download/v2.5.1/fluidsynth-v2.5.1-win10-x64-cpp11.zip",
            },
            sha256: "ed6fab7422deb3efd1a06eba4ca00a60a9bab7704d9847123236ba4b0982c5e2",
            tag: "win-amd64",
            archive_subdir: Some("fluidsynth-v2.5.1-win10-x64-cpp11"),
            strip_components: 0,
            exe_subpath: "bin/fluidsynth.exe",
        });
        assets.insert(("darwin", "arm64"), homebrew_bottle(
            "sha256:bdb87a8be3469df871cda8a6807e035e2797cbc28a9957b3991eeae5e0575230",
            "mac-arm64",
        ));
        assets.insert(("darwin", "amd64"), homebrew_bottle(
            "sha256:711437e42b4d1c6f506e97a63ebf493e8a9a9ba81f86c5f07d2ff8bb7bd5d4fc",
            "mac-x86_64",
        ));
        assets.insert(("linux", "amd64"), homebrew_bottle(
            "sha256:6a515821bf33ce73bd71ca02a159047cb1f85391ca72b7559c98b00cccb6c2a9",
            "linux-x86_64",
        ));
        assets.insert(("linux", "arm64"), homebrew_bottle(
            "sha256:cceb10adb79d0a87a4cadc2e8279dde0cf42c1cc09a971b43e248a43b402af62",
            "linux-arm64",
        ));
        assets
    };
}

/// Canonical machine name
pub fn normalise_machine(raw: &str) -> String {
    let canonical = raw.to_lowercase();
    match canonical.as_str() {
        "x86_64" | "amd64" => "amd64".to_string(),
        "aarch64" | "arm64" => "arm64".to_string(),
        _ => canonical,
    }
}

/// Canonical OS name
pub fn normalise_system(raw: &str) -> String {
    let canonical = raw.to_lowercase();
    match canonical.as_str() {
        "macos" | "darwin" => "darwin".to_string(),
        _ => canonical,
    }
}

pub fn select_asset(system: &str, machine: &str) -> Option<&'static PlatformAsset> {
    let system = normalise_system(system);
    let machine = normalise_machine(machine);
    PLATFORM_ASSETS
        .iter()
        .find(|((s, m), _)| *s == system && *m == machine)
        .map(|(_, asset)| asset)
}

/// Asset for the platform this binary was built for
pub fn current_asset() -> Option<&'static PlatformAsset> {
    select_asset(std::env::consts::OS, std::env::consts::ARCH)
}

pub fn ghcr_token_url(repo: &str) -> String {
    let scope = format!("repository:{}:pull", repo);
    format!(
        "https://ghcr.io/token?service=ghcr.io&scope={}",
        urlencoding::encode(&scope)
    )
}

pub fn ghcr_blob_url(repo: &str, digest: &str) -> String {
    format!("https://ghcr.io/v2/{}/blobs/{}", repo, digest)
}

#[derive(Debug, Deserialize)]
struct GhcrToken {
    #[serde(default)]
    token: Option<String>,
}

fn bundle_is_current(dir: &Path, exe_subpath: &str) -> bool {
    let marker = std::fs::read_to_string(dir.join("VERSION")).ok();
    marker.as_deref().map(str::trim) == Some(FLUIDSYNTH_VERSION) && dir.join(exe_subpath).is_file()
}

/// Make sure the platform's FluidSynth is unpacked under `vendor_root`.
/// Returns the executable path, or `None` for platforms without a prebuilt asset.
pub async fn ensure_bundle(
    downloader: &Downloader,
    vendor_root: &Path,
    asset: Option<&PlatformAsset>,
) -> Result<Option<PathBuf>, AssetError> {
    let Some(asset) = asset else {
        tracing::info!("Skipping FluidSynth bundling: no prebuilt asset configured for this platform.");
        return Ok(None);
    };

    let target_dir = vendor_root.join(asset.tag);
    if bundle_is_current(&target_dir, asset.exe_subpath) {
        tracing::info!(
            "FluidSynth {} already bundled at {}.",
            FLUIDSYNTH_VERSION,
            target_dir.display()
        );
        return Ok(Some(target_dir.join(asset.exe_subpath)));
    }

    tracing::info!("Bundling FluidSynth {} for {}...", FLUIDSYNTH_VERSION, asset.tag);
    std::fs::create_dir_all(vendor_root)?;
    let archive_path = vendor_root.join(format!(".download-{}.pkg", asset.tag));
    let staging = vendor_root.join(format!(".staging-{}", asset.tag));

    let result = fetch_and_install(downloader, asset, &archive_path, &staging, &target_dir).await;
    std::fs::remove_file(&archive_path).ok();
    std::fs::remove_dir_all(&staging).ok();
    result?;

    let exe = target_dir.join(asset.exe_subpath);
    tracing::info!("FluidSynth runtime written to {}.", exe.display());
    Ok(Some(exe))
}

async fn fetch_and_install(
    downloader: &Downloader,
    asset: &PlatformAsset,
    archive_path: &Path,
    staging: &Path,
    target_dir: &Path,
) -> Result<(), AssetError> {
    match &asset.source {
        AssetSource::Zip { url } => {
            downloader
                .fetch(&Download::new(url, archive_path, asset.sha256), |_, _| {})
                .await?;
        }
        AssetSource::Ghcr { repo, digest } => {
            let token: GhcrToken = downloader.fetch_json(&ghcr_token_url(repo)).await?;
            let token = token
                .token
                .filter(|t| !t.is_empty())
                .ok_or_else(|| AssetError::Token(repo.to_string()))?;
            let blob_url = ghcr_blob_url(repo, digest);
            let download = Download::new(&blob_url, archive_path, asset.sha256)
                .header("Authorization", format!("Bearer {}", token))
                .header("Accept", GHCR_LAYER_MEDIA_TYPE);
            downloader.fetch(&download, |_, _| {}).await?;
        }
    }

    install_archive(asset, archive_path, staging, target_dir)
}

/// Unpack a verified archive and swap it into `target_dir`
fn install_archive(
    asset: &PlatformAsset,
    archive_path: &Path,
    staging: &Path,
    target_dir: &Path,
) -> Result<(), AssetError> {
    download::verify_sha256(archive_path, asset.sha256)?;

    if staging.exists() {
        std::fs::remove_dir_all(staging)?;
    }
    archive::extract(asset.format(), archive_path, staging, asset.strip_components)?;

    // Tolerate archives that drop the expected top-level directory
    let source_root = match asset.archive_subdir {
        Some(subdir) if staging.join(subdir).is_dir() => staging.join(subdir),
        _ => staging.to_path_buf(),
    };
    if !source_root.join(asset.exe_subpath).is_file() {
        return Err(AssetError::MissingEntry(format!(
            "{} in FluidSynth archive",
            asset.exe_subpath
        )));
    }

    if target_dir.exists() {
        std::fs::remove_dir_all(target_dir)?;
    }
    if let Some(parent) = target_dir.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::rename(&source_root, target_dir)?;
    write_marker(target_dir, FLUIDSYNTH_VERSION)?;
    Ok(())
}

fn exe_name() -> &'static str {
    if cfg!(windows) {
        "fluidsynth.exe"
    } else {
        "fluidsynth"
    }
}

/// Lookup order for the FluidSynth executable
#[derive(Debug, Clone, Default)]
pub struct FluidsynthLocator {
    pub env_override: Option<PathBuf>,
    pub bundled: Option<PathBuf>,
    pub search_path: Option<OsString>,
}

impl FluidsynthLocator {
    /// Locator for the running process: env override, bundle, then PATH
    pub fn from_env(vendor_root: &Path) -> Self {
        Self {
            env_override: std::env::var_os(FLUIDSYNTH_ENV_VAR).map(PathBuf::from),
            bundled: current_asset().map(|a| vendor_root.join(a.tag).join(a.exe_subpath)),
            search_path: std::env::var_os("PATH"),
        }
    }

    pub fn resolve(&self) -> Option<PathBuf> {
        let configured = [self.env_override.as_ref(), self.bundled.as_ref()];
        if let Some(found) = configured.into_iter().flatten().find(|p| p.is_file()) {
            return Some(found.clone());
        }

        self.search_path
            .as_deref()
            .and_then(|path| process::find_in_path(exe_name(), path))
    }
}
