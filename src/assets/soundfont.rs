//! General MIDI soundfonts
//!
//! - the default TimGM6mb bank bundled next to the Python package
//! - a small curated catalog users can download into `~/.lofi_symphony/soundfonts`
//! - lookup across overrides, bundled, user and system locations

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::download::{self, Download, Downloader};
use super::{write_marker, AssetError, AssetPaths};

/// Points at a soundfont that wins over everything but an explicit preference
pub const SOUNDFONT_ENV_VAR: &str = "LOFI_SYMPHONY_SOUNDFONT";

/// Any value disables bundling the default soundfont
pub const SKIP_SOUNDFONT_ENV_VAR: &str = "LOFI_SYMPHONY_SKIP_SOUNDFONT";

pub const SOUNDFONT_VERSION: &str = "TimGM6mb-1.3";

const GPL_LICENSE_BASENAME: &str = "GPL-2.0.txt";

const SOUNDFONT_SUMMARY: &str = "TimGM6mb.sf2\n\
General MIDI soundfont authored by Tim Brechbill and David Bolton.\n\
Distributed under the GNU GPL v2. Bundled copy retrieved from the MuseScore\n\
patch-set mirror at https://github.com/craffel/pretty-midi. See GPL-2.0.txt\n\
in this directory for the full license text.\n";

const SYSTEM_SOUNDFONTS: &[&str] = &[
    "/usr/share/sounds/sf2/FluidR3_GM.sf2",
    "/usr/share/soundfonts/default.sf2",
];

/// A curated, downloadable soundfont
#[derive(Debug, Clone, PartialEq)]
pub struct SoundfontSource {
    pub slug: &'static str,
    pub name: &'static str,
    pub filename: &'static str,
    pub url: &'static str,
    pub sha256: &'static str,
    pub size_mb: f64,
    pub license: &'static str,
}

impl SoundfontSource {
    pub fn size_label(&self) -> String {
        format!("{:.1} MB", self.size_mb)
    }
}

const CATALOG: &[SoundfontSource] = &[
    SoundfontSource {
        slug: "timgm6mb",
        name: "TimGM6mb",
        filename: "TimGM6mb.sf2",
        url: "https://raw.githubusercontent.com/craffel/pretty-midi/main/pretty_midi/TimGM6mb.sf2",
        sha256: "82475b91a76de15cb28a104707d3247ba932e228bada3f47bba63c6b31aaf7a1",
        size_mb: 5.7,
        license: "GPL-2.0",
    },
    SoundfontSource {
        slug: "fluidr3mono",
        name: "FluidR3Mono GM (SF3)",
        filename: "FluidR3Mono_GM.sf3",
        url: "https://github.com/musescore/MuseScore/raw/master/share/sound/FluidR3Mono_GM.sf3",
        sha256: "2aacd036d7058d40a371846ef2f5dc5f130d648ab3837fe2626591ba49a71254",
        size_mb: 22.6,
        license: "GPL-2.0",
    },
];

pub fn catalog() -> &'static [SoundfontSource] {
    CATALOG
}

/// The bank bundled with the package
pub fn default_source() -> &'static SoundfontSource {
    &CATALOG[0]
}

pub fn find(slug: &str) -> Result<&'static SoundfontSource, AssetError> {
    CATALOG
        .iter()
        .find(|s| s.slug.eq_ignore_ascii_case(slug))
        .ok_or_else(|| AssetError::UnknownSoundfont {
            slug: slug.to_string(),
            available: CATALOG.iter().map(|s| s.slug).collect::<Vec<_>>().join(", "),
        })
}

fn bundle_is_current(dir: &Path) -> bool {
    let source = default_source();
    let target = dir.join(source.filename);
    if !target.is_file() || download::verify_sha256(&target, source.sha256).is_err() {
        return false;
    }
    std::fs::read_to_string(dir.join("VERSION"))
        .map(|v| v.trim() == SOUNDFONT_VERSION)
        .unwrap_or(false)
}

fn write_metadata(dir: &Path, licenses_root: &Path) -> Result<(), AssetError> {
    std::fs::create_dir_all(dir)?;
    let summary = dir.join(format!("{}.LICENSE", default_source().filename));
    std::fs::write(summary, SOUNDFONT_SUMMARY)?;

    let gpl = licenses_root.join(GPL_LICENSE_BASENAME);
    if gpl.is_file() {
        std::fs::copy(&gpl, dir.join(GPL_LICENSE_BASENAME))?;
    }

    write_marker(dir, SOUNDFONT_VERSION)?;
    Ok(())
}

/// Cache the default soundfont in `dir`. `skip` turns this into a no-op.
pub async fn ensure_bundle(
    downloader: &Downloader,
    dir: &Path,
    licenses_root: &Path,
    skip: bool,
) -> Result<Option<PathBuf>, AssetError> {
    if skip {
        tracing::info!("Skipping soundfont bundling: {} is set.", SKIP_SOUNDFONT_ENV_VAR);
        return Ok(None);
    }

    let source = default_source();
    let target = dir.join(source.filename);

    if bundle_is_current(dir) {
        tracing::info!("Soundfont {} already cached at {}.", SOUNDFONT_VERSION, target.display());
        write_metadata(dir, licenses_root)?;
        return Ok(Some(target));
    }

    tracing::info!("Bundling default soundfont {}...", SOUNDFONT_VERSION);
    std::fs::create_dir_all(dir)?;
    downloader
        .fetch(
            &Download::new(source.url, &target, source.sha256),
            super::log_progress(source.name),
        )
        .await?;
    write_metadata(dir, licenses_root)?;

    tracing::info!("Soundfont written to {}.", target.display());
    Ok(Some(target))
}

/// Download a catalog entry into `dest_dir`, reusing a copy whose checksum matches
pub async fn download(
    downloader: &Downloader,
    source: &SoundfontSource,
    dest_dir: &Path,
    progress: impl FnMut(u64, Option<u64>),
) -> Result<PathBuf, AssetError> {
    std::fs::create_dir_all(dest_dir)?;
    let target = dest_dir.join(source.filename);

    if target.is_file() {
        if download::verify_sha256(&target, source.sha256).is_ok() {
            tracing::info!("{} is already downloaded at {}.", source.name, target.display());
            return Ok(target);
        }
        tracing::warn!("Replacing {} with a fresh copy (checksum mismatch).", target.display());
        std::fs::remove_file(&target)?;
    }

    tracing::info!("Downloading {} ({})...", source.name, source.size_label());
    downloader
        .fetch(&Download::new(source.url, &target, source.sha256), progress)
        .await?;
    Ok(target)
}

/// Files in `dir` matching `pattern`, sorted
fn scan(dir: &Path, pattern: &str) -> Vec<PathBuf> {
    let escaped = glob::Pattern::escape(&dir.to_string_lossy());
    let full = format!("{}/{}", escaped, pattern);
    let mut found: Vec<PathBuf> = match glob::glob(&full) {
        Ok(paths) => paths.filter_map(Result::ok).filter(|p| p.is_file()).collect(),
        Err(e) => {
            tracing::debug!("Bad soundfont pattern {}: {}", full, e);
            Vec::new()
        }
    };
    found.sort();
    found
}

/// Lookup order for soundfonts
#[derive(Debug, Clone, Default)]
pub struct SoundfontLocator {
    pub preferred: Option<PathBuf>,
    pub env_override: Option<PathBuf>,
    pub bundled_dir: Option<PathBuf>,
    pub user_dir: Option<PathBuf>,
    pub system_defaults: Vec<PathBuf>,
}

impl SoundfontLocator {
    pub fn from_env(paths: &AssetPaths) -> Self {
        let mut system_defaults: Vec<PathBuf> = SYSTEM_SOUNDFONTS.iter().map(PathBuf::from).collect();
        if let Ok(cwd) = std::env::current_dir() {
            system_defaults.push(cwd.join("default.sf2"));
        }

        Self {
            preferred: paths.preferred_soundfont.clone(),
            env_override: std::env::var_os(SOUNDFONT_ENV_VAR)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            bundled_dir: Some(paths.soundfont_root()),
            user_dir: paths.user_soundfonts(),
            system_defaults,
        }
    }

    /// Every existing soundfont in priority order, without duplicates
    pub fn candidates(&self) -> Vec<PathBuf> {
        let mut ordered: Vec<PathBuf> = Vec::new();
        ordered.extend(self.preferred.iter().cloned());
        ordered.extend(self.env_override.iter().cloned());
        if let Some(dir) = &self.bundled_dir {
            ordered.extend(scan(dir, "*.sf2"));
        }
        if let Some(dir) = &self.user_dir {
            ordered.extend(scan(dir, "*.sf[23]"));
        }
        ordered.extend(self.system_defaults.iter().cloned());

        let mut seen = HashSet::new();
        ordered
            .into_iter()
            .filter(|p| p.is_file())
            .map(|p| std::fs::canonicalize(&p).unwrap_or(p))
            .filter(|p| seen.insert(p.clone()))
            .collect()
    }

    pub fn resolve(&self) -> Option<PathBuf> {
        self.candidates().into_iter().next()
    }
}
