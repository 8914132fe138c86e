//! Self-update from the latest published release
//!
//! The release index is a GitHub-style `releases/latest` document; the asset
//! named `bridgeup-<os>-<arch>` is downloaded and swapped in for the running
//! executable.

use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::info;

pub const DEFAULT_RELEASES_URL: &str =
    "https://api.github.com/repos/bridgeup/bridgeup/releases/latest";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Invalid release metadata: {0}")]
    InvalidRelease(String),

    #[error("Release {tag} has no asset named {asset}")]
    MissingAsset { tag: String, asset: String },

    #[error("Cannot locate the running executable: {0}")]
    CurrentExe(std::io::Error),

    #[error("Failed to replace {path}: {source}")]
    Replace {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
}

impl Release {
    pub fn asset(&self, name: &str) -> Option<&ReleaseAsset> {
        self.assets.iter().find(|asset| asset.name == name)
    }

    /// Whether this release is the one tagged `version`, ignoring a `v` prefix
    pub fn is_version(&self, version: &str) -> bool {
        self.tag_name.trim_start_matches('v') == version.trim_start_matches('v')
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    UpToDate(String),
    Updated { from: String, to: String },
}

/// Release asset for this build target
pub fn asset_name() -> String {
    format!(
        "bridgeup-{}-{}",
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

pub struct Updater {
    http: reqwest::Client,
    releases_url: String,
    current_version: String,
}

impl Updater {
    pub fn new(
        releases_url: impl Into<String>,
        current_version: impl Into<String>,
    ) -> Result<Self, UpdateError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(format!("bridgeup/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            releases_url: releases_url.into(),
            current_version: current_version.into(),
        })
    }

    pub async fn latest_release(&self) -> Result<Release, UpdateError> {
        let body = self.get(&self.releases_url).await?;
        serde_json::from_slice(&body).map_err(|e| UpdateError::InvalidRelease(e.to_string()))
    }

    /// Replace `exe` with the latest release asset unless already current
    pub async fn update(&self, exe: &Path) -> Result<UpdateOutcome, UpdateError> {
        let release = self.latest_release().await?;
        if release.is_version(&self.current_version) {
            return Ok(UpdateOutcome::UpToDate(release.tag_name));
        }

        let name = asset_name();
        let asset = release
            .asset(&name)
            .ok_or_else(|| UpdateError::MissingAsset {
                tag: release.tag_name.clone(),
                asset: name.clone(),
            })?;

        info!("Downloading {} from {}", name, asset.browser_download_url);
        let binary = self.get(&asset.browser_download_url).await?;
        replace_executable(exe, &binary)?;

        Ok(UpdateOutcome::Updated {
            from: self.current_version.clone(),
            to: release.tag_name,
        })
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>, UpdateError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Write `binary` next to `exe` and rename it into place
pub fn replace_executable(exe: &Path, binary: &[u8]) -> Result<(), UpdateError> {
    let replace_err = |source| UpdateError::Replace {
        path: exe.to_path_buf(),
        source,
    };
    let dir = match exe.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut staged = NamedTempFile::new_in(dir).map_err(replace_err)?;
    staged.write_all(binary).map_err(replace_err)?;
    staged.as_file().sync_all().map_err(replace_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(staged.path(), std::fs::Permissions::from_mode(0o755))
            .map_err(replace_err)?;
    }

    staged
        .persist(exe)
        .map_err(|persist| replace_err(persist.error))?;
    Ok(())
}

/// Update the running executable from `releases_url`
pub async fn self_update(releases_url: &str) -> Result<UpdateOutcome, UpdateError> {
    let exe = std::env::current_exe().map_err(UpdateError::CurrentExe)?;
    Updater::new(releases_url, env!("GIT_TAG"))?
        .update(&exe)
        .await
}
