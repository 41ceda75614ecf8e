//!
//! docbridge configuration
//! -----------------------
//! Two layers:
//! - `Settings`: document server URL, shared secret, externally reachable base URL and
//!   the advertised proxy path. Environment variables win; otherwise a JSON file.
//! - `RunConfig`: how the binary runs (server or CGI), parsed from argv and env.
//!
//! Settings are handed to the components that need them as plain values; nothing
//! here is global.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_DOCUMENT_SERVER_URL: &str = "DOCUMENT_SERVER_URL";
pub const ENV_DOCUMENT_SERVER_SECRET: &str = "DOCUMENT_SERVER_SECRET";
pub const ENV_BASE_URL: &str = "BASE_URL";
pub const ENV_DOC_SERVER_PATH: &str = "DOC_SERVER_PATH";
pub const ENV_SETTINGS_FILE: &str = "DOCBRIDGE_SETTINGS_FILE";
pub const DEFAULT_SETTINGS_FILE: &str = "settings.json";

pub const DEFAULT_PORT: u16 = 10099;
pub const DEFAULT_DOC_SERVER_PATH: &str = "/doc-svr";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("configuration not found")]
    NotFound,
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("configuration i/o error: {0}")]
    Io(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub document_server_url: String,
    pub document_server_secret: String,
    pub base_url: String,
    pub doc_server_path: String,
}

impl Settings {
    /// The signing secret, or `None` when signing is disabled.
    pub fn secret(&self) -> Option<&str> {
        let s = self.document_server_secret.as_str();
        if s.is_empty() { None } else { Some(s) }
    }

    pub fn has_secret(&self) -> bool { self.secret().is_some() }

    pub fn document_server_configured(&self) -> bool { !self.document_server_url.trim().is_empty() }

    /// Browser-facing prefix for the proxied document server assets.
    pub fn advertised_doc_server_path(&self) -> &str {
        if self.doc_server_path.is_empty() { DEFAULT_DOC_SERVER_PATH } else { self.doc_server_path.as_str() }
    }
}

/// Settings from an environment lookup. `None` when none of the variables are set.
pub fn settings_from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Option<Settings> {
    let get = |k: &str| lookup(k).unwrap_or_default();
    let s = Settings {
        document_server_url: get(ENV_DOCUMENT_SERVER_URL),
        document_server_secret: get(ENV_DOCUMENT_SERVER_SECRET),
        base_url: get(ENV_BASE_URL),
        doc_server_path: get(ENV_DOC_SERVER_PATH),
    };
    if s == Settings::default() { None } else { Some(s) }
}

pub fn settings_from_env() -> Option<Settings> { settings_from_lookup(|k| std::env::var(k).ok()) }

/// File-backed settings with environment override.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into(), lock: RwLock::new(()) } }

    /// Store at `$DOCBRIDGE_SETTINGS_FILE`, or `settings.json` in the working directory.
    pub fn from_env() -> Self {
        let path = std::env::var(ENV_SETTINGS_FILE).ok().filter(|p| !p.is_empty());
        Self::new(path.unwrap_or_else(|| DEFAULT_SETTINGS_FILE.to_string()))
    }

    pub fn path(&self) -> &Path { &self.path }

    pub fn load(&self) -> Result<Settings, ConfigError> {
        match settings_from_env() {
            Some(s) => Ok(s),
            None => self.load_from_file(),
        }
    }

    pub fn load_from_file(&self) -> Result<Settings, ConfigError> {
        let _g = self.lock.read();
        let data = std::fs::read(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::NotFound,
            _ => ConfigError::Io(e.to_string()),
        })?;
        serde_json::from_slice(&data).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Write the settings file, creating parent directories. Replaces the file by rename.
    pub fn save(&self, settings: &Settings) -> Result<(), ConfigError> {
        let _g = self.lock.write();
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(|e| ConfigError::Io(e.to_string()))?;
            }
        }
        let data = serde_json::to_vec_pretty(settings).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(format!(".tmp-{}", uuid::Uuid::new_v4().simple()));
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, &data).map_err(|e| ConfigError::Io(e.to_string()))?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(ConfigError::Io(e.to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Server,
    Cgi,
}

impl std::str::FromStr for RunMode {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server" => Ok(RunMode::Server),
            "cgi" => Ok(RunMode::Cgi),
            other => Err(ConfigError::Invalid(format!("invalid mode '{other}': must be 'server' or 'cgi'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub mode: RunMode,
    pub port: u16,
    pub base_url: Option<String>,
    /// Confinement root for document paths.
    pub root: Option<PathBuf>,
    pub max_file_size: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self { mode: RunMode::Cgi, port: DEFAULT_PORT, base_url: None, root: None, max_file_size: None }
    }
}

impl RunConfig {
    /// Flags override environment. Both `--flag value` and `--flag=value` are accepted,
    /// with one or two leading dashes.
    pub fn parse<F: Fn(&str) -> Option<String>>(args: &[String], env: F) -> Result<Self, ConfigError> {
        let mut cfg = RunConfig::default();

        if let Some(m) = arg_value(args, "mode").or_else(|| non_empty(env("DOCBRIDGE_MODE"))) {
            cfg.mode = m.parse()?;
        }
        if let Some(p) = arg_value(args, "port").or_else(|| non_empty(env("DOCBRIDGE_PORT"))) {
            cfg.port = p.trim().parse().map_err(|_| ConfigError::Invalid(format!("invalid port '{p}'")))?;
        }
        cfg.base_url = arg_value(args, "base-url").and_then(|v| non_empty(Some(v)));
        cfg.root = arg_value(args, "root").or_else(|| non_empty(env("DOCBRIDGE_ROOT"))).map(PathBuf::from);
        if let Some(m) = arg_value(args, "max-file-size").or_else(|| non_empty(env("DOCBRIDGE_MAX_FILE_SIZE"))) {
            let n: u64 = m.trim().parse().map_err(|_| ConfigError::Invalid(format!("invalid max file size '{m}'")))?;
            cfg.max_file_size = if n == 0 { None } else { Some(n) };
        }
        Ok(cfg)
    }
}

fn non_empty(v: Option<String>) -> Option<String> { v.filter(|s| !s.trim().is_empty()) }

fn arg_value(args: &[String], name: &str) -> Option<String> {
    let long = format!("--{name}");
    let short = format!("-{name}");
    let mut i = 0;
    while i < args.len() {
        let a = args[i].as_str();
        if a == long || a == short {
            return args.get(i + 1).cloned();
        }
        for prefix in [&long, &short] {
            if let Some(rest) = a.strip_prefix(prefix.as_str()).and_then(|r| r.strip_prefix('=')) {
                return Some(rest.to_string());
            }
        }
        i += 1;
    }
    None
}

pub fn has_flag(args: &[String], flag: &str) -> bool { args.iter().any(|a| a == flag) }

/// Callback base URL: explicit flag, then settings/env value, then localhost on `port`.
pub fn resolve_base_url(flag: Option<&str>, env: &str, port: u16) -> String {
    if let Some(f) = flag.filter(|f| !f.is_empty()) {
        return f.to_string();
    }
    if !env.is_empty() {
        return env.to_string();
    }
    format!("http://localhost:{port}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn args(list: &[&str]) -> Vec<String> { list.iter().map(|s| s.to_string()).collect() }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn run_config_defaults() {
        let cfg = RunConfig::parse(&args(&["docbridge"]), env_of(&[])).unwrap();
        assert_eq!(cfg, RunConfig::default());
        assert_eq!(cfg.mode, RunMode::Cgi);
        assert_eq!(cfg.port, 10099);
    }

    #[test]
    fn run_config_flags_beat_env() {
        let env = env_of(&[("DOCBRIDGE_MODE", "cgi"), ("DOCBRIDGE_PORT", "9000"), ("DOCBRIDGE_ROOT", "/vol1")]);
        let cfg = RunConfig::parse(&args(&["x", "-mode", "server", "--port=8080", "--base-url", "http://nas:8080"]), env).unwrap();
        assert_eq!(cfg.mode, RunMode::Server);
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.base_url.as_deref(), Some("http://nas:8080"));
        assert_eq!(cfg.root, Some(PathBuf::from("/vol1")));
    }

    #[test]
    fn run_config_rejects_bad_values() {
        assert!(matches!(RunConfig::parse(&args(&["x", "--mode", "daemon"]), env_of(&[])), Err(ConfigError::Invalid(_))));
        assert!(matches!(RunConfig::parse(&args(&["x", "--port", "http"]), env_of(&[])), Err(ConfigError::Invalid(_))));
        let cfg = RunConfig::parse(&args(&["x"]), env_of(&[("DOCBRIDGE_MAX_FILE_SIZE", "1048576")])).unwrap();
        assert_eq!(cfg.max_file_size, Some(1_048_576));
    }

    #[test]
    fn base_url_precedence() {
        assert_eq!(resolve_base_url(Some("http://flag"), "http://env", 1), "http://flag");
        assert_eq!(resolve_base_url(Some(""), "http://env", 1), "http://env");
        assert_eq!(resolve_base_url(None, "", 10099), "http://localhost:10099");
    }

    #[test]
    fn env_settings_need_at_least_one_variable() {
        assert_eq!(settings_from_lookup(env_of(&[])), None);
        let s = settings_from_lookup(env_of(&[(ENV_DOCUMENT_SERVER_URL, "http://ds")])).unwrap();
        assert_eq!(s.document_server_url, "http://ds");
        assert!(!s.has_secret());
        assert_eq!(s.advertised_doc_server_path(), DEFAULT_DOC_SERVER_PATH);
    }

    #[test]
    fn store_save_and_load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(tmp.path().join("nested/dir/settings.json"));
        assert_eq!(store.load_from_file(), Err(ConfigError::NotFound));

        let s = Settings {
            document_server_url: "http://ds:8080".into(),
            document_server_secret: "abc".into(),
            base_url: "http://nas:10099".into(),
            doc_server_path: String::new(),
        };
        store.save(&s).unwrap();
        assert_eq!(store.load_from_file().unwrap(), s);

        let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(raw["documentServerUrl"], "http://ds:8080");
        assert_eq!(raw["baseUrl"], "http://nas:10099");
    }

    #[test]
    fn store_reports_invalid_json() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(SettingsStore::new(path).load_from_file(), Err(ConfigError::Invalid(_))));
    }
}
