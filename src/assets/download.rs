//! Checksum-verified HTTP downloads
//!
//! Bytes are streamed into a `.part` file next to the destination and hashed
//! on the way; the file is only renamed into place once the digest matches.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use super::AssetError;

/// A single file to fetch
#[derive(Debug, Clone)]
pub struct Download<'a> {
    pub url: &'a str,
    pub dest: &'a Path,
    pub sha256: &'a str,
    pub headers: Vec<(String, String)>,
}

impl<'a> Download<'a> {
    pub fn new(url: &'a str, dest: &'a Path, sha256: &'a str) -> Self {
        Self {
            url,
            dest,
            sha256,
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }
}

/// Stalled asset hosts fail the download instead of hanging the launch
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
pub const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Shared HTTP client for asset downloads
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
}

impl Downloader {
    pub fn new() -> Result<Self, AssetError> {
        Self::with_timeouts(CONNECT_TIMEOUT, READ_TIMEOUT)
    }

    pub fn with_timeouts(connect: Duration, read: Duration) -> Result<Self, AssetError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("lofi-launcher/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(connect)
            .read_timeout(read)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// GET a JSON document
    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, AssetError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AssetError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.json().await?)
    }

    /// Download, verify and move into place; `progress` gets (read, total)
    pub async fn fetch(
        &self,
        download: &Download<'_>,
        mut progress: impl FnMut(u64, Option<u64>),
    ) -> Result<(), AssetError> {
        if let Some(parent) = download.dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let part = part_path(download.dest);
        let digest = match self.stream_to(download, &part, &mut progress).await {
            Ok(digest) => digest,
            Err(e) => {
                tokio::fs::remove_file(&part).await.ok();
                return Err(e);
            }
        };

        if !digest.eq_ignore_ascii_case(download.sha256) {
            tokio::fs::remove_file(&part).await.ok();
            return Err(AssetError::Checksum {
                name: file_label(download.dest),
                expected: download.sha256.to_string(),
                actual: digest,
            });
        }

        tokio::fs::rename(&part, download.dest).await?;
        Ok(())
    }

    async fn stream_to(
        &self,
        download: &Download<'_>,
        part: &Path,
        progress: &mut impl FnMut(u64, Option<u64>),
    ) -> Result<String, AssetError> {
        let mut request = self.client.get(download.url);
        for (name, value) in &download.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let mut response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AssetError::Status {
                url: download.url.to_string(),
                status: status.as_u16(),
            });
        }

        let total = response.content_length();
        let mut file = tokio::fs::File::create(part).await?;
        let mut hasher = Sha256::new();
        let mut read = 0u64;

        while let Some(chunk) = response.chunk().await? {
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
            read += chunk.len() as u64;
            progress(read, total);
        }
        file.flush().await?;

        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// Hex sha256 of a file on disk
pub fn sha256_file(path: &Path) -> Result<String, AssetError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Check a file against an expected digest
pub fn verify_sha256(path: &Path, expected: &str) -> Result<(), AssetError> {
    let actual = sha256_file(path)?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(AssetError::Checksum {
            name: file_label(path),
            expected: expected.to_string(),
            actual,
        })
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
