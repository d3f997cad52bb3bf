use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::config::BrowserCandidate;

use super::platform::{ConfigStore, Environment, LaunchAttempt, ProcessEnumerator};

const URL_ASSOCIATIONS_KEY: &str =
    "HKCU\\SOFTWARE\\Microsoft\\Windows\\Shell\\Associations\\UrlAssociations";

/// Roots probed for a preferred-browser install, in order: 64-bit program
/// files, 32-bit program files, per-user local application data.
const INSTALL_ROOTS: [&str; 3] = ["%ProgramW6432%", "%ProgramFiles(x86)%", "%LocalAppData%"];

/// Outcome of the system-default lookup.
///
/// Unlike every other resolver this one never reports a miss: a failed
/// lookup yields a formatted `ERROR: ...` string that the dispatcher still
/// hands to the spawner as a program path, where the spawn fails and the
/// walk advances. The asymmetry is kept as-is; callers inspecting the
/// string must not rely on it for control flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemDefaultLookup {
    Program(PathBuf),
    Diagnostic(String),
}

/// The per-strategy lookup functions. Every resolver tolerates missing
/// store branches, permission faults, and malformed values by reporting a
/// miss; the dispatcher treats anything but a spawned process as "try the
/// next attempt".
#[derive(Clone)]
pub struct Resolvers {
    store: Arc<dyn ConfigStore>,
    processes: Arc<dyn ProcessEnumerator>,
    environment: Arc<dyn Environment>,
}

impl fmt::Debug for Resolvers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolvers").finish()
    }
}

impl Resolvers {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        processes: Arc<dyn ProcessEnumerator>,
        environment: Arc<dyn Environment>,
    ) -> Self {
        Self {
            store,
            processes,
            environment,
        }
    }

    /// Per-user URL association. For each of `http` and `https`: the chosen
    /// handler's programmatic identifier, then that identifier's registered
    /// open-command template. First scheme yielding a usable template wins.
    pub fn user_default(&self, url: &str) -> Option<LaunchAttempt> {
        for scheme in ["http", "https"] {
            let choice_key = format!("{URL_ASSOCIATIONS_KEY}\\{scheme}\\UserChoice");
            let prog_id = match self.store.read(&choice_key, "ProgID") {
                Ok(Some(value)) if !value.is_empty() => value,
                _ => continue,
            };
            let command_key = format!("HKCR\\{prog_id}\\shell\\open\\command");
            let template = match self.store.read(&command_key, "") {
                Ok(Some(value)) if !value.is_empty() => value,
                _ => continue,
            };
            if let Some(attempt) = attempt_from_template(&template, url) {
                return Some(attempt);
            }
            debug!(scheme, prog_id = %prog_id, "unusable open-command template");
        }
        None
    }

    /// System-wide handler registered for the `HTTP` protocol. See
    /// [`SystemDefaultLookup`] for the deliberate failure-reporting quirk.
    pub fn system_default(&self) -> SystemDefaultLookup {
        match self.store.read("HKCR\\HTTP\\shell\\open\\command", "") {
            Ok(Some(raw)) => SystemDefaultLookup::Program(PathBuf::from(clean_executable(&raw))),
            Ok(None) => SystemDefaultLookup::Diagnostic(
                "ERROR: system default lookup failed: association missing".to_string(),
            ),
            Err(err) => {
                SystemDefaultLookup::Diagnostic(format!("ERROR: system default lookup failed: {err}"))
            }
        }
    }

    /// Desktop registration for a named application: its declared icon path
    /// first, its declared open command second. A value without the
    /// executable extension is a miss.
    pub fn custom_app(&self, exe: &str) -> Option<PathBuf> {
        if exe.is_empty() {
            return None;
        }
        for subkey in ["DefaultIcon", "shell\\open\\command"] {
            let key = format!("HKCR\\Applications\\{exe}\\{subkey}");
            let Ok(Some(raw)) = self.store.read(&key, "") else {
                continue;
            };
            let cleaned = clean_executable(&raw);
            if cleaned.ends_with(".exe") {
                return Some(PathBuf::from(cleaned));
            }
        }
        None
    }

    /// Executable path of a currently running instance. A running browser is
    /// a strong signal it is installed and preferred. The name is tried
    /// as-is, then with an `.exe` suffix.
    pub fn running_process(&self, name: &str) -> Option<PathBuf> {
        self.processes
            .find_by_name(name)
            .into_iter()
            .next()
            .or_else(|| {
                self.processes
                    .find_by_name(&format!("{name}.exe"))
                    .into_iter()
                    .next()
            })
    }

    /// Install-root guesses for a candidate. Existence is deliberately not
    /// checked here; the spawn itself reports an absent path.
    pub fn install_candidates(&self, candidate: &BrowserCandidate) -> Vec<PathBuf> {
        INSTALL_ROOTS
            .iter()
            .map(|root| {
                let expanded = self.environment.expand(root);
                let trimmed = expanded.trim_end_matches(['\\', '/']);
                PathBuf::from(format!(
                    "{trimmed}\\{}{}.exe",
                    candidate.install_subpath, candidate.process
                ))
            })
            .collect()
    }
}

/// Splits a registered open-command template into program and argument
/// tokens, then substitutes the URL for the `%1` placeholder (bare or
/// quoted). A template without a placeholder gets the URL appended so the
/// target is never dropped.
fn attempt_from_template(template: &str, url: &str) -> Option<LaunchAttempt> {
    let (program, remainder) = split_template(template)?;
    let mut args = tokenize(remainder);
    let mut substituted = false;
    for arg in &mut args {
        if arg.contains("%1") {
            *arg = arg.replace("%1", url);
            substituted = true;
        }
    }
    if !substituted {
        args.push(url.to_string());
    }
    Some(LaunchAttempt::new(program, args))
}

/// Locates the executable extension (quoted forms first) and splits the
/// template there into program path and argument remainder.
fn split_template(template: &str) -> Option<(PathBuf, &str)> {
    let lowered = template.to_lowercase();
    let (position, length) = [".exe\"", ".exe'", ".exe"]
        .iter()
        .find_map(|marker| lowered.find(marker).map(|pos| (pos, marker.len())))?;
    // Lowercasing can shift byte offsets for non-ASCII templates; treat any
    // out-of-bounds split as a malformed value rather than a fault.
    let split = position + length;
    if split > template.len() || !template.is_char_boundary(split) {
        return None;
    }
    let (head, rest) = template.split_at(split);
    let program = head.trim_matches([' ', '"', '\'']).to_string();
    if program.is_empty() {
        return None;
    }
    Some((PathBuf::from(program), rest))
}

/// Whitespace tokenizer that keeps quoted spans intact and strips the
/// surrounding quotes from each token.
fn tokenize(raw: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for ch in raw.chars() {
        match quote {
            Some(open) if ch == open => quote = None,
            Some(_) => current.push(ch),
            None => match ch {
                '"' | '\'' => quote = Some(ch),
                c if c.is_whitespace() => {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            },
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Lowercases, strips quotes, and truncates after the last `.exe`. Values
/// without the extension come back unchanged apart from the cleanup; the
/// caller decides whether that is usable.
fn clean_executable(raw: &str) -> String {
    let cleaned = raw.replace('"', "");
    let cleaned = cleaned.trim().to_lowercase();
    match cleaned.rfind(".exe") {
        Some(position) => cleaned[..position + 4].to_string(),
        None => cleaned,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::super::platform::StoreError;
    use super::*;

    #[derive(Default)]
    struct MemoryStore {
        entries: HashMap<(String, String), String>,
        faulty: bool,
    }

    impl MemoryStore {
        fn with(entries: &[(&str, &str, &str)]) -> Self {
            Self {
                entries: entries
                    .iter()
                    .map(|(key, value, data)| {
                        ((key.to_string(), value.to_string()), data.to_string())
                    })
                    .collect(),
                faulty: false,
            }
        }
    }

    impl ConfigStore for MemoryStore {
        fn read(&self, key: &str, value: &str) -> Result<Option<String>, StoreError> {
            if self.faulty {
                return Err(StoreError::Unreadable {
                    key: key.to_string(),
                    reason: "access denied".to_string(),
                });
            }
            Ok(self
                .entries
                .get(&(key.to_string(), value.to_string()))
                .cloned())
        }
    }

    #[derive(Default)]
    struct StaticProcesses {
        by_name: HashMap<String, Vec<PathBuf>>,
    }

    impl ProcessEnumerator for StaticProcesses {
        fn find_by_name(&self, name: &str) -> Vec<PathBuf> {
            self.by_name.get(name).cloned().unwrap_or_default()
        }
    }

    struct MapEnvironment {
        vars: HashMap<String, String>,
    }

    impl MapEnvironment {
        fn with(vars: &[(&str, &str)]) -> Self {
            Self {
                vars: vars
                    .iter()
                    .map(|(name, value)| (name.to_string(), value.to_string()))
                    .collect(),
            }
        }
    }

    impl Environment for MapEnvironment {
        fn expand(&self, expression: &str) -> String {
            let name = expression.trim_matches('%');
            self.vars
                .get(name)
                .cloned()
                .unwrap_or_else(|| expression.to_string())
        }
    }

    fn resolvers(store: MemoryStore) -> Resolvers {
        Resolvers::new(
            Arc::new(store),
            Arc::new(StaticProcesses::default()),
            Arc::new(MapEnvironment::with(&[])),
        )
    }

    #[test]
    fn user_default_substitutes_quoted_placeholder() {
        let store = MemoryStore::with(&[
            (
                "HKCU\\SOFTWARE\\Microsoft\\Windows\\Shell\\Associations\\UrlAssociations\\http\\UserChoice",
                "ProgID",
                "FirefoxURL",
            ),
            (
                "HKCR\\FirefoxURL\\shell\\open\\command",
                "",
                "\"C:\\Mozilla Firefox\\firefox.exe\" -osint -url \"%1\"",
            ),
        ]);
        let attempt = resolvers(store)
            .user_default("https://example.com")
            .unwrap();
        assert_eq!(attempt.program, PathBuf::from("C:\\Mozilla Firefox\\firefox.exe"));
        assert_eq!(
            attempt.args,
            vec!["-osint", "-url", "https://example.com"]
        );
    }

    #[test]
    fn user_default_appends_url_without_placeholder() {
        let store = MemoryStore::with(&[
            (
                "HKCU\\SOFTWARE\\Microsoft\\Windows\\Shell\\Associations\\UrlAssociations\\http\\UserChoice",
                "ProgID",
                "ChromeHTML",
            ),
            (
                "HKCR\\ChromeHTML\\shell\\open\\command",
                "",
                "\"C:\\Chrome\\chrome.exe\" --single-argument",
            ),
        ]);
        let attempt = resolvers(store)
            .user_default("https://example.com")
            .unwrap();
        assert_eq!(
            attempt.args,
            vec!["--single-argument", "https://example.com"]
        );
    }

    #[test]
    fn user_default_falls_back_to_https_scheme() {
        let store = MemoryStore::with(&[
            (
                "HKCU\\SOFTWARE\\Microsoft\\Windows\\Shell\\Associations\\UrlAssociations\\https\\UserChoice",
                "ProgID",
                "BraveHTML",
            ),
            (
                "HKCR\\BraveHTML\\shell\\open\\command",
                "",
                "\"C:\\Brave\\brave.exe\" \"%1\"",
            ),
        ]);
        let attempt = resolvers(store)
            .user_default("https://example.com")
            .unwrap();
        assert_eq!(attempt.program, PathBuf::from("C:\\Brave\\brave.exe"));
        assert_eq!(attempt.args, vec!["https://example.com"]);
    }

    #[test]
    fn user_default_misses_on_empty_store() {
        assert!(resolvers(MemoryStore::default())
            .user_default("https://example.com")
            .is_none());
    }

    #[test]
    fn system_default_cleans_registered_command() {
        let store = MemoryStore::with(&[(
            "HKCR\\HTTP\\shell\\open\\command",
            "",
            "\"C:\\Edge\\msedge.exe\" -- \"%1\"",
        )]);
        assert_eq!(
            resolvers(store).system_default(),
            SystemDefaultLookup::Program(PathBuf::from("c:\\edge\\msedge.exe"))
        );
    }

    #[test]
    fn system_default_formats_diagnostic_instead_of_missing() {
        let SystemDefaultLookup::Diagnostic(text) =
            resolvers(MemoryStore::default()).system_default()
        else {
            panic!("expected diagnostic");
        };
        assert!(text.starts_with("ERROR:"));
    }

    #[test]
    fn system_default_formats_diagnostic_on_store_fault() {
        let store = MemoryStore {
            faulty: true,
            ..MemoryStore::default()
        };
        let SystemDefaultLookup::Diagnostic(text) = resolvers(store).system_default() else {
            panic!("expected diagnostic");
        };
        assert!(text.contains("access denied"));
    }

    #[test]
    fn custom_app_prefers_icon_and_trims_suffix() {
        let store = MemoryStore::with(&[
            (
                "HKCR\\Applications\\iexplore.exe\\DefaultIcon",
                "",
                "\"C:\\Internet Explorer\\iexplore.exe\",-9",
            ),
            (
                "HKCR\\Applications\\iexplore.exe\\shell\\open\\command",
                "",
                "\"C:\\elsewhere\\iexplore.exe\" %1",
            ),
        ]);
        assert_eq!(
            resolvers(store).custom_app("iexplore.exe"),
            Some(PathBuf::from("c:\\internet explorer\\iexplore.exe"))
        );
    }

    #[test]
    fn custom_app_falls_back_to_open_command() {
        let store = MemoryStore::with(&[(
            "HKCR\\Applications\\opera.exe\\shell\\open\\command",
            "",
            "\"C:\\Opera\\opera.exe\" \"%1\"",
        )]);
        assert_eq!(
            resolvers(store).custom_app("opera.exe"),
            Some(PathBuf::from("c:\\opera\\opera.exe"))
        );
    }

    #[test]
    fn custom_app_rejects_values_without_executable() {
        let store = MemoryStore::with(&[(
            "HKCR\\Applications\\photos.exe\\DefaultIcon",
            "",
            "ms-photos:icon",
        )]);
        assert!(resolvers(store).custom_app("photos.exe").is_none());
    }

    #[test]
    fn running_process_tries_exe_suffix() {
        let mut by_name = HashMap::new();
        by_name.insert(
            "firefox.exe".to_string(),
            vec![PathBuf::from("C:\\Mozilla Firefox\\firefox.exe")],
        );
        let resolvers = Resolvers::new(
            Arc::new(MemoryStore::default()),
            Arc::new(StaticProcesses { by_name }),
            Arc::new(MapEnvironment::with(&[])),
        );
        assert_eq!(
            resolvers.running_process("firefox"),
            Some(PathBuf::from("C:\\Mozilla Firefox\\firefox.exe"))
        );
        assert!(resolvers.running_process("chrome").is_none());
    }

    #[test]
    fn install_candidates_probe_all_roots_in_order() {
        let environment = MapEnvironment::with(&[
            ("ProgramW6432", "C:\\Program Files\\"),
            ("ProgramFiles(x86)", "C:\\Program Files (x86)"),
            ("LocalAppData", "C:\\Users\\me\\AppData\\Local"),
        ]);
        let resolvers = Resolvers::new(
            Arc::new(MemoryStore::default()),
            Arc::new(StaticProcesses::default()),
            Arc::new(environment),
        );
        let candidate = BrowserCandidate::new("firefox", "Mozilla Firefox\\");
        assert_eq!(
            resolvers.install_candidates(&candidate),
            vec![
                PathBuf::from("C:\\Program Files\\Mozilla Firefox\\firefox.exe"),
                PathBuf::from("C:\\Program Files (x86)\\Mozilla Firefox\\firefox.exe"),
                PathBuf::from("C:\\Users\\me\\AppData\\Local\\Mozilla Firefox\\firefox.exe"),
            ]
        );
    }

    #[test]
    fn unexpanded_roots_still_produce_a_guess() {
        let resolvers = Resolvers::new(
            Arc::new(MemoryStore::default()),
            Arc::new(StaticProcesses::default()),
            Arc::new(MapEnvironment::with(&[])),
        );
        let candidate = BrowserCandidate::new("opera", "Opera\\");
        let guesses = resolvers.install_candidates(&candidate);
        assert_eq!(guesses.len(), 3);
        assert_eq!(
            guesses[0],
            PathBuf::from("%ProgramW6432%\\Opera\\opera.exe")
        );
    }
}
