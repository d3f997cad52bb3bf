pub mod config;
pub mod error;
pub mod launcher;

pub use config::{
    load_launcher_config, BrowserCandidate, BrowsersSection, LaunchSection, LauncherConfig,
};
pub use error::{ConfigError, Result};
pub use launcher::{
    BrowserLauncher, ConfigStore, Environment, LaunchAttempt, OpenMode, ProcessEnumerator,
    ProcessSpawner, SpawnOptions, StoreError, SystemDefaultLookup,
};
