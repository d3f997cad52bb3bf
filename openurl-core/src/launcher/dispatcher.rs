use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::LauncherConfig;

use super::platform::{
    ConfigStore, Environment, LaunchAttempt, ProcessEnumerator, ProcessSpawner, StdEnvironment,
    SystemConfigStore, SystemProcessEnumerator, SystemProcessSpawner,
};
use super::resolvers::{Resolvers, SystemDefaultLookup};

/// Application the system-default tier falls back to when the registered
/// `HTTP` handler cannot be spawned.
const GENERIC_FALLBACK_APP: &str = "iexplore.exe";

/// Strategy selector for [`BrowserLauncher::open_with_mode`]. Concrete
/// values restrict the walk to a single tier, group aliases to a priority
/// tier set, and `Unset` walks all nine tiers in fixed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Try every tier in priority order.
    Unset,
    UserDefault,
    SystemDefault,
    /// Non-interactive command interpreter. Low latency.
    CliDefault,
    /// Extended scripting shell. High latency, so tried after the cheaper
    /// interpreter.
    ShellDefault,
    /// Native open-by-association facility.
    ShellApiDefault,
    /// File-manager-mediated open.
    ExplorerDefault,
    FileProtocolHandler,
    OpenUrlHandler,
    PreferredBrowsers,
    /// Group alias: user default + system default.
    RegistryDefaults,
    /// Group alias: CLI + scripting shell + association.
    AllShellsDefaults,
    /// Group alias: file manager + both protocol handlers.
    HandlersDefaults,
}

impl OpenMode {
    /// The group alias a concrete mode belongs to. Group aliases, `Unset`,
    /// and `PreferredBrowsers` map to themselves; every other value belongs
    /// to exactly one group.
    pub fn group(self) -> OpenMode {
        match self {
            OpenMode::UserDefault | OpenMode::SystemDefault => OpenMode::RegistryDefaults,
            OpenMode::CliDefault | OpenMode::ShellDefault | OpenMode::ShellApiDefault => {
                OpenMode::AllShellsDefaults
            }
            OpenMode::ExplorerDefault
            | OpenMode::FileProtocolHandler
            | OpenMode::OpenUrlHandler => OpenMode::HandlersDefaults,
            other => other,
        }
    }

    fn selects(self, tier: OpenMode) -> bool {
        self == OpenMode::Unset || self == tier || self == tier.group()
    }
}

struct Tier {
    mode: OpenMode,
    name: &'static str,
    attempts: fn(&BrowserLauncher, &str) -> Vec<LaunchAttempt>,
}

/// The nine priority tiers, most reliable first. The walk stops at the
/// first spawn the OS accepts.
const TIERS: [Tier; 9] = [
    Tier {
        mode: OpenMode::UserDefault,
        name: "user-default",
        attempts: user_default_attempts,
    },
    Tier {
        mode: OpenMode::SystemDefault,
        name: "system-default",
        attempts: system_default_attempts,
    },
    Tier {
        mode: OpenMode::CliDefault,
        name: "cli",
        attempts: cli_attempts,
    },
    Tier {
        mode: OpenMode::ShellDefault,
        name: "scripting-shell",
        attempts: scripting_shell_attempts,
    },
    Tier {
        mode: OpenMode::ShellApiDefault,
        name: "shell-association",
        attempts: shell_association_attempts,
    },
    Tier {
        mode: OpenMode::ExplorerDefault,
        name: "file-manager",
        attempts: explorer_attempts,
    },
    Tier {
        mode: OpenMode::FileProtocolHandler,
        name: "protocol-handler-a",
        attempts: file_protocol_handler_attempts,
    },
    Tier {
        mode: OpenMode::OpenUrlHandler,
        name: "protocol-handler-b",
        attempts: open_url_handler_attempts,
    },
    Tier {
        mode: OpenMode::PreferredBrowsers,
        name: "preferred-browsers",
        attempts: preferred_browser_attempts,
    },
];

/// Opens URIs in an external browser by walking the tier chain until one
/// spawn is accepted. Construct once per process; the configuration is
/// read-only from then on. All methods need a tokio runtime.
#[derive(Clone)]
pub struct BrowserLauncher {
    config: Arc<LauncherConfig>,
    resolvers: Resolvers,
    spawner: Arc<dyn ProcessSpawner>,
}

impl fmt::Debug for BrowserLauncher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrowserLauncher")
            .field("config", &self.config)
            .finish()
    }
}

impl BrowserLauncher {
    /// Launcher wired to the host operating system.
    pub fn new(config: LauncherConfig) -> Self {
        Self::with_collaborators(
            config,
            Arc::new(SystemConfigStore),
            Arc::new(SystemProcessEnumerator),
            Arc::new(StdEnvironment),
            Arc::new(SystemProcessSpawner),
        )
    }

    /// Launcher with every host collaborator supplied by the caller.
    pub fn with_collaborators(
        config: LauncherConfig,
        store: Arc<dyn ConfigStore>,
        processes: Arc<dyn ProcessEnumerator>,
        environment: Arc<dyn Environment>,
        spawner: Arc<dyn ProcessSpawner>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            resolvers: Resolvers::new(store, processes, environment),
            spawner,
        }
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    /// Opens `url` trying every tier in priority order.
    pub async fn open(&self, url: &str) -> bool {
        self.open_with_mode(url, OpenMode::Unset).await
    }

    /// Schedules the resolution walk on a background task and returns `true`
    /// right after scheduling. With `launch.synchronous` set, the walk's own
    /// boolean is awaited and returned instead.
    ///
    /// Success means the OS accepted a spawn; nothing waits for the child
    /// beyond that, and a browser that crashes after spawning still counts.
    /// No timeout bounds an individual spawn attempt, so a hung spawn stalls
    /// the walk (and, under synchronous mode, the caller).
    pub async fn open_with_mode(&self, url: &str, mode: OpenMode) -> bool {
        let walker = self.clone();
        let target = url.to_string();
        let walk = tokio::spawn(async move { walker.walk(&target, mode).await });
        if self.config.launch.synchronous {
            walk.await.unwrap_or(false)
        } else {
            true
        }
    }

    /// Open with the preferred-browser scan only.
    pub async fn open_with_preferred_browsers(&self, url: &str) -> bool {
        self.open_with_mode(url, OpenMode::PreferredBrowsers).await
    }

    /// Open with the first URL-protocol handler only.
    pub async fn open_with_protocol_handler(&self, url: &str) -> bool {
        self.open_with_mode(url, OpenMode::FileProtocolHandler).await
    }

    /// Open with the handlers group: file manager + both protocol handlers.
    pub async fn open_with_protocol_handlers(&self, url: &str) -> bool {
        self.open_with_mode(url, OpenMode::HandlersDefaults).await
    }

    /// Open with the shells group: CLI, scripting shell, association.
    pub async fn open_with_shell(&self, url: &str) -> bool {
        self.open_with_mode(url, OpenMode::AllShellsDefaults).await
    }

    /// Open with the second URL-protocol handler only.
    pub async fn open_url(&self, url: &str) -> bool {
        self.open_with_mode(url, OpenMode::OpenUrlHandler).await
    }

    async fn walk(&self, url: &str, mode: OpenMode) -> bool {
        for tier in &TIERS {
            if !mode.selects(tier.mode) {
                continue;
            }
            for attempt in (tier.attempts)(self, url) {
                if self.spawner.spawn(&attempt).await {
                    info!(tier = tier.name, program = %attempt.program.display(), "url handed off");
                    return true;
                }
                debug!(tier = tier.name, program = %attempt.program.display(), "attempt missed");
            }
        }
        debug!(%url, "every eligible tier exhausted");
        false
    }
}

fn user_default_attempts(launcher: &BrowserLauncher, url: &str) -> Vec<LaunchAttempt> {
    launcher.resolvers.user_default(url).into_iter().collect()
}

fn system_default_attempts(launcher: &BrowserLauncher, url: &str) -> Vec<LaunchAttempt> {
    // A diagnostic travels to the spawner as a program path on purpose: the
    // spawn rejects it and the walk advances. See `SystemDefaultLookup`.
    let program = match launcher.resolvers.system_default() {
        SystemDefaultLookup::Program(path) => path,
        SystemDefaultLookup::Diagnostic(text) => PathBuf::from(text),
    };
    let mut attempts = vec![LaunchAttempt::new(program, vec![url.to_string()])];
    if let Some(fallback) = launcher.resolvers.custom_app(GENERIC_FALLBACK_APP) {
        attempts.push(LaunchAttempt::new(fallback, vec![url.to_string()]));
    }
    attempts
}

fn cli_attempts(_launcher: &BrowserLauncher, url: &str) -> Vec<LaunchAttempt> {
    vec![LaunchAttempt::hidden(
        "cmd.exe",
        vec![
            "/C".to_string(),
            "start".to_string(),
            String::new(),
            url.to_string(),
        ],
    )]
}

fn scripting_shell_attempts(_launcher: &BrowserLauncher, url: &str) -> Vec<LaunchAttempt> {
    vec![LaunchAttempt::hidden(
        "powershell.exe",
        vec!["-Command".to_string(), format!("Start-Process '{url}'")],
    )]
}

fn shell_association_attempts(_launcher: &BrowserLauncher, url: &str) -> Vec<LaunchAttempt> {
    let mut attempts = vec![
        LaunchAttempt::new(url, Vec::new()).with_association(true),
        LaunchAttempt::new(url, Vec::new()),
    ];
    #[cfg(windows)]
    attempts.push(LaunchAttempt::new(url.replace('&', "^&"), Vec::new()).with_association(true));
    #[cfg(target_os = "macos")]
    attempts.push(LaunchAttempt::new("open", vec![url.to_string()]));
    #[cfg(all(unix, not(target_os = "macos")))]
    attempts.push(LaunchAttempt::new("xdg-open", vec![url.to_string()]));
    attempts
}

fn explorer_attempts(_launcher: &BrowserLauncher, url: &str) -> Vec<LaunchAttempt> {
    vec![LaunchAttempt::new("explorer.exe", vec![url.to_string()])]
}

fn file_protocol_handler_attempts(_launcher: &BrowserLauncher, url: &str) -> Vec<LaunchAttempt> {
    vec![rundll_attempt("url.dll,FileProtocolHandler", url)]
}

fn open_url_handler_attempts(_launcher: &BrowserLauncher, url: &str) -> Vec<LaunchAttempt> {
    vec![rundll_attempt("url.dll,OpenURL", url)]
}

/// Protocol handlers go through the generic loader utility so handler
/// resolution stays with the OS.
fn rundll_attempt(entry: &str, url: &str) -> LaunchAttempt {
    LaunchAttempt::hidden(
        "cmd.exe",
        vec![
            "/C".to_string(),
            "rundll32".to_string(),
            entry.to_string(),
            url.to_string(),
        ],
    )
}

fn preferred_browser_attempts(launcher: &BrowserLauncher, url: &str) -> Vec<LaunchAttempt> {
    let mut attempts = Vec::new();
    for candidate in &launcher.config.browsers.preferred {
        if let Some(running) = launcher.resolvers.running_process(&candidate.process) {
            attempts.push(LaunchAttempt::new(running, vec![url.to_string()]));
        }
        let registered = launcher
            .resolvers
            .custom_app(&format!("{}.exe", candidate.process));
        if let Some(registered) = registered {
            attempts.push(LaunchAttempt::new(registered, vec![url.to_string()]));
        }
        for guess in launcher.resolvers.install_candidates(candidate) {
            attempts.push(LaunchAttempt::new(guess, vec![url.to_string()]));
        }
    }
    attempts
}
