use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sysinfo::{ProcessesToUpdate, System};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Fault reported by the host configuration store. Resolvers collapse this
/// to a miss; only the system-default lookup formats it into its diagnostic
/// string.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store branch {key} is unreadable: {reason}")]
    Unreadable { key: String, reason: String },
}

/// Hierarchical key/value lookup on the host configuration store.
///
/// `key` is a backslash-joined path rooted at a hive alias (`HKCU\...`,
/// `HKCR\...`, `HKLM\...`); `value` names the value to read, with the empty
/// string selecting the key's default value. An absent branch or value is
/// `Ok(None)`, never an error.
pub trait ConfigStore: Send + Sync {
    fn read(&self, key: &str, value: &str) -> Result<Option<String>, StoreError>;
}

/// Enumeration of currently running processes by executable name.
pub trait ProcessEnumerator: Send + Sync {
    /// Executable paths of every running instance named `name`; may be empty.
    fn find_by_name(&self, name: &str) -> Vec<PathBuf>;
}

/// `%NAME%`-style environment expansion.
pub trait Environment: Send + Sync {
    fn expand(&self, expression: &str) -> String;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpawnOptions {
    /// Suppress the console window on platforms that would flash one.
    pub hide_window: bool,
    /// Route the program through the native open-by-association facility
    /// instead of executing it directly.
    pub use_shell_association: bool,
}

/// One program-plus-arguments attempt produced by a resolver. Ephemeral:
/// built, handed to the spawner, discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchAttempt {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub options: SpawnOptions,
}

impl LaunchAttempt {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            options: SpawnOptions::default(),
        }
    }

    /// Attempt that runs with its console window suppressed.
    pub fn hidden(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        let mut attempt = Self::new(program, args);
        attempt.options.hide_window = true;
        attempt
    }

    pub fn with_association(mut self, enabled: bool) -> Self {
        self.options.use_shell_association = enabled;
        self
    }
}

/// Non-blocking process creation. `true` means the OS accepted the spawn;
/// nothing waits for the child to exit, load anything, or stay alive.
#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    async fn spawn(&self, attempt: &LaunchAttempt) -> bool;
}

/// Registry-backed store on Windows; reports every branch absent elsewhere.
#[derive(Debug, Default)]
pub struct SystemConfigStore;

#[cfg(windows)]
impl ConfigStore for SystemConfigStore {
    fn read(&self, key: &str, value: &str) -> Result<Option<String>, StoreError> {
        use winreg::enums::{HKEY_CLASSES_ROOT, HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE};
        use winreg::RegKey;

        let (hive, subkey) = match key.split_once('\\') {
            Some(("HKCU", rest)) => (HKEY_CURRENT_USER, rest),
            Some(("HKCR", rest)) => (HKEY_CLASSES_ROOT, rest),
            Some(("HKLM", rest)) => (HKEY_LOCAL_MACHINE, rest),
            _ => return Ok(None),
        };
        let opened = match RegKey::predef(hive).open_subkey(subkey) {
            Ok(opened) => opened,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(StoreError::Unreadable {
                    key: key.to_string(),
                    reason: err.to_string(),
                })
            }
        };
        match opened.get_value::<String, _>(value) {
            Ok(found) => Ok(Some(found)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::Unreadable {
                key: key.to_string(),
                reason: err.to_string(),
            }),
        }
    }
}

#[cfg(not(windows))]
impl ConfigStore for SystemConfigStore {
    fn read(&self, _key: &str, _value: &str) -> Result<Option<String>, StoreError> {
        Ok(None)
    }
}

#[derive(Debug, Default)]
pub struct SystemProcessEnumerator;

impl ProcessEnumerator for SystemProcessEnumerator {
    fn find_by_name(&self, name: &str) -> Vec<PathBuf> {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);
        system
            .processes_by_name(OsStr::new(name))
            .filter_map(|process| process.exe().map(Path::to_path_buf))
            .collect()
    }
}

/// Expands `%NAME%` references from the process environment. Unknown names
/// are left in place so a failed expansion surfaces later as a spawn miss
/// rather than an empty path component.
#[derive(Debug, Default)]
pub struct StdEnvironment;

impl Environment for StdEnvironment {
    fn expand(&self, expression: &str) -> String {
        let mut expanded = String::with_capacity(expression.len());
        let mut rest = expression;
        while let Some(start) = rest.find('%') {
            expanded.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let Some(end) = after.find('%') else {
                expanded.push('%');
                rest = after;
                break;
            };
            let name = &after[..end];
            match std::env::var(name) {
                Ok(value) => expanded.push_str(&value),
                Err(_) => {
                    expanded.push('%');
                    expanded.push_str(name);
                    expanded.push('%');
                }
            }
            rest = &after[end + 1..];
        }
        expanded.push_str(rest);
        expanded
    }
}

/// Spawns through `tokio::process`, detaching from the child immediately.
#[derive(Debug, Default)]
pub struct SystemProcessSpawner;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

#[async_trait]
impl ProcessSpawner for SystemProcessSpawner {
    async fn spawn(&self, attempt: &LaunchAttempt) -> bool {
        let mut command = if attempt.options.use_shell_association {
            match association_command(&attempt.program) {
                Some(command) => command,
                None => {
                    debug!(
                        program = %attempt.program.display(),
                        "shell association unavailable on this platform"
                    );
                    return false;
                }
            }
        } else {
            let mut command = Command::new(&attempt.program);
            command.args(&attempt.args);
            command
        };
        #[cfg(windows)]
        if attempt.options.hide_window {
            command.creation_flags(CREATE_NO_WINDOW);
        }
        match command.spawn() {
            Ok(_child) => true,
            Err(err) => {
                debug!(program = %attempt.program.display(), error = %err, "spawn rejected");
                false
            }
        }
    }
}

#[cfg(windows)]
fn association_command(target: &Path) -> Option<Command> {
    let mut command = Command::new("cmd.exe");
    command.args(["/C", "start", ""]).arg(target);
    Some(command)
}

#[cfg(not(windows))]
fn association_command(_target: &Path) -> Option<Command> {
    None
}
