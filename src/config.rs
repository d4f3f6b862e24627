// src/config.rs - recoveryctl configuration (TOML)

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::mlb::RECENT_MAC;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub endpoint: EndpointConfig,
    pub download: DownloadConfig,
    pub probe: ProbeConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub base_url: String,
    pub user_agent: String,
    pub connect_timeout_secs: u64,
    /// Applies to session and metadata queries, never to image downloads.
    pub request_timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "http://osrecovery.apple.com".into(),
            user_agent: "InternetRecovery/1.0".into(),
            connect_timeout_secs: 30,
            request_timeout_secs: 60,
        }
    }
}

impl EndpointConfig {
    fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn session_url(&self) -> String {
        format!("{}/", self.base())
    }

    pub fn recovery_image_url(&self) -> String {
        format!("{}/InstallationPayload/RecoveryImage", self.base())
    }

    pub fn diagnostics_url(&self) -> String {
        format!("{}/InstallationPayload/Diagnostics", self.base())
    }

    /// Host header value for the recovery service.
    pub fn host(&self) -> Result<String> {
        host_of(&self.base_url)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub outdir: PathBuf,
    pub require_signature: bool,
    pub qemu_img: PathBuf,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            outdir: PathBuf::from("com.apple.recovery.boot"),
            require_signature: false,
            qemu_img: PathBuf::from("qemu-img"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub reference_board: String,
    pub board_db: PathBuf,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            reference_board: RECENT_MAC.into(),
            board_db: PathBuf::from("boards.json"),
        }
    }
}

impl Config {
    pub fn from_toml(path: &Path, text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|source| Error::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml(path, &text)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }
}

pub(crate) fn host_of(url: &str) -> Result<String> {
    let parsed = reqwest::Url::parse(url).map_err(|_| Error::InvalidUrl(url.to_string()))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| Error::InvalidUrl(url.to_string()))?;
    Ok(match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}
