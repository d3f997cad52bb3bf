use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Everything a `BrowserLauncher` reads at runtime. Built once per process
/// and treated as read-only while a resolution walk is in flight; callers
/// wanting a different browser priority edit `browsers.preferred` before
/// constructing the launcher.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub launch: LaunchSection,
    pub browsers: BrowsersSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LaunchSection {
    /// Block `open` until the resolution walk has produced its boolean
    /// instead of returning right after the background task is scheduled.
    pub synchronous: bool,
}

impl Default for LaunchSection {
    fn default() -> Self {
        Self { synchronous: false }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowsersSection {
    /// Ordered preferred-browser list; the first candidate that spawns wins.
    pub preferred: Vec<BrowserCandidate>,
}

/// One entry of the preferred-browser list: a short process identifier and
/// the install subpath fragment probed under each program-files root.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BrowserCandidate {
    pub process: String,
    pub install_subpath: String,
}

impl BrowserCandidate {
    pub fn new(process: impl Into<String>, install_subpath: impl Into<String>) -> Self {
        Self {
            process: process.into(),
            install_subpath: install_subpath.into(),
        }
    }
}

impl Default for BrowsersSection {
    fn default() -> Self {
        // Firefox -> Chrome -> Brave -> Yandex -> Edge -> Opera
        Self {
            preferred: vec![
                BrowserCandidate::new("firefox", "Mozilla Firefox\\"),
                BrowserCandidate::new("chrome", "Google\\Chrome\\Application\\"),
                BrowserCandidate::new("brave", "BraveSoftware\\Brave-Browser\\Application\\"),
                BrowserCandidate::new("browser", "Yandex\\YandexBrowser\\Application\\"),
                BrowserCandidate::new("msedge", "Microsoft\\Edge\\Application\\"),
                BrowserCandidate::new("opera", "Opera\\"),
            ],
        }
    }
}

pub fn load_launcher_config<P: AsRef<Path>>(path: P) -> Result<LauncherConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
