//! Zip and tar.gz extraction with leading-component stripping

use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;

use super::AssetError;

/// Archive layouts the FluidSynth releases ship in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

/// Extract `archive` into `dest`, returning the number of files written
pub fn extract(
    format: ArchiveFormat,
    archive: &Path,
    dest: &Path,
    strip_components: usize,
) -> Result<usize, AssetError> {
    std::fs::create_dir_all(dest)?;
    match format {
        ArchiveFormat::Zip => extract_zip(archive, dest, strip_components),
        ArchiveFormat::TarGz => extract_tar_gz(archive, dest, strip_components),
    }
}

/// Normalize an entry name and drop its first `strip` components.
/// `None` means the entry disappears entirely after stripping.
fn relative_entry(name: &str, strip: usize) -> Result<Option<PathBuf>, AssetError> {
    let normalized = name.replace('\\', "/");
    let mut parts = Vec::new();

    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_os_string()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(AssetError::UnsafePath(name.to_string()));
            }
        }
    }

    if parts.len() <= strip {
        return Ok(None);
    }
    Ok(Some(parts[strip..].iter().collect()))
}

pub fn extract_zip(archive: &Path, dest: &Path, strip: usize) -> Result<usize, AssetError> {
    let mut bundle = zip::ZipArchive::new(File::open(archive)?)?;
    if bundle.is_empty() {
        return Err(AssetError::EmptyArchive(archive.to_path_buf()));
    }

    let mut written = 0;
    for index in 0..bundle.len() {
        let mut entry = bundle.by_index(index)?;
        let Some(relative) = relative_entry(entry.name(), strip)? else {
            continue;
        };
        let target = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            set_mode(&target, mode)?;
        }

        written += 1;
    }

    Ok(written)
}

/// Lexically resolve a link target against its (canonical) parent directory.
/// Only leading `..` components are accepted.
fn link_stays_inside(root: &Path, parent: &Path, link: &Path) -> bool {
    let mut base = parent.to_path_buf();
    let mut descended = false;
    for component in link.components() {
        match component {
            Component::ParentDir if !descended => {
                if !base.pop() {
                    return false;
                }
            }
            Component::Normal(_) => descended = true,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    base.starts_with(root)
}

pub fn extract_tar_gz(archive: &Path, dest: &Path, strip: usize) -> Result<usize, AssetError> {
    let mut bundle = tar::Archive::new(GzDecoder::new(File::open(archive)?));
    bundle.set_preserve_permissions(true);
    let root = dest.canonicalize()?;

    let mut seen = false;
    let mut written = 0;
    for entry in bundle.entries()? {
        let mut entry = entry?;
        seen = true;

        let name = entry.path()?.to_string_lossy().into_owned();
        let Some(relative) = relative_entry(&name, strip)? else {
            continue;
        };
        let target = dest.join(relative);
        let kind = entry.header().entry_type();

        if kind.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if !kind.is_symlink() && !kind.is_file() {
            tracing::debug!("Skipping archive entry {} ({:?})", name, kind);
            continue;
        }

        let Some(parent) = target.parent() else {
            return Err(AssetError::UnsafePath(name));
        };
        std::fs::create_dir_all(parent)?;
        // Earlier links must not carry later entries outside dest
        let parent = parent.canonicalize()?;
        if !parent.starts_with(&root) {
            return Err(AssetError::UnsafePath(name));
        }

        if kind.is_symlink() {
            // Bottles link versioned dylibs next to each other
            let link = entry.link_name()?.map(|l| l.into_owned()).unwrap_or_default();
            if !link_stays_inside(&root, &parent, &link) {
                return Err(AssetError::UnsafePath(name));
            }
        }

        let Some(file_name) = target.file_name() else {
            return Err(AssetError::UnsafePath(name));
        };
        entry.unpack(parent.join(file_name))?;
        written += 1;
    }

    if !seen {
        return Err(AssetError::EmptyArchive(archive.to_path_buf()));
    }
    Ok(written)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777))
}
