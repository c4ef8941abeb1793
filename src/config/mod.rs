//! Configuration for precache.
//!
//! Loaded from `~/.precache/config.json` (missing file means defaults), then
//! overridden by `PRECACHE_*` environment variables. CLI flags are applied
//! last by the binary.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{PrecacheError, Result};

/// Cache bucket name used when none is configured.
pub const DEFAULT_CACHE_NAME: &str = "uni-bot-v1";

/// Assets seeded at install when none are configured.
pub const DEFAULT_ASSETS: &[&str] = &["./", "./index.html"];

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name of the cache bucket install seeds and fetch reads.
    pub cache_name: String,
    /// Base URL the asset list and proxied paths resolve against.
    pub origin: String,
    /// Relative asset paths, seeded in order.
    pub assets: Vec<String>,
    /// Directory holding bucket files. Defaults to `~/.precache/caches`.
    pub cache_dir: Option<PathBuf>,
    pub network: NetworkConfig,
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            origin: "http://127.0.0.1:8000/".to_string(),
            assets: DEFAULT_ASSETS.iter().map(|s| s.to_string()).collect(),
            cache_dir: None,
            network: NetworkConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

/// Outbound HTTP settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Whole-request timeout. `None` waits indefinitely.
    pub timeout_secs: Option<u64>,
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            user_agent: format!("precache/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Local proxy listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (default: 127.0.0.1).
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

impl Config {
    /// `~/.precache`, or `./.precache` when no home directory is known.
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".precache")
    }

    /// Default config file location.
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load a config file. A missing file yields defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(data) => serde_json::from_str(&data).map_err(|e| {
                PrecacheError::Config(format!("Failed to parse {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(PrecacheError::Config(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Apply `PRECACHE_*` overrides read through `lookup`.
    ///
    /// Blank values are ignored, as are numbers that do not parse.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        if let Some(name) = get("PRECACHE_CACHE_NAME") {
            self.cache_name = name;
        }
        if let Some(origin) = get("PRECACHE_ORIGIN") {
            self.origin = origin;
        }
        if let Some(assets) = get("PRECACHE_ASSETS") {
            self.assets = assets
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(dir) = get("PRECACHE_CACHE_DIR") {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(secs) = get("PRECACHE_NETWORK_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.network.timeout_secs = Some(secs);
        }
        if let Some(bind) = get("PRECACHE_SERVER_BIND") {
            self.server.bind = bind;
        }
        if let Some(port) = get("PRECACHE_SERVER_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
    }

    /// Reject configurations the worker cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.cache_name.trim().is_empty() {
            return Err(PrecacheError::Config("cache_name must not be empty".into()));
        }
        if self.assets.is_empty() {
            return Err(PrecacheError::Config("assets must list at least one path".into()));
        }
        let origin = self.origin_url()?;
        for asset in &self.assets {
            origin.join(asset).map_err(|e| {
                PrecacheError::Config(format!("asset '{}' does not resolve: {}", asset, e))
            })?;
        }
        Ok(())
    }

    /// Parsed origin. Only http and https are accepted.
    pub fn origin_url(&self) -> Result<Url> {
        let url = Url::parse(&self.origin).map_err(|e| {
            PrecacheError::Config(format!("origin '{}' is not a URL: {}", self.origin, e))
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(PrecacheError::Config(format!(
                "origin scheme '{}' is not supported (use http or https)",
                other
            ))),
        }
    }

    /// Directory holding bucket files.
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| Self::dir().join("caches"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_config_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.cache_name, "uni-bot-v1");
        assert_eq!(cfg.assets, vec!["./", "./index.html"]);
        assert_eq!(cfg.server.bind, "127.0.0.1");
        assert_eq!(cfg.server.port, 8787);
        assert!(cfg.network.timeout_secs.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_config_deserialize_partial() {
        let json = r#"{"cache_name": "site-v2", "server": {"port": 3000}}"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.cache_name, "site-v2");
        assert_eq!(cfg.server.port, 3000);
        assert_eq!(cfg.server.bind, "127.0.0.1"); // default
        assert_eq!(cfg.assets.len(), 2); // default
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let cfg = Config::load_from_path(&tmp.path().join("nope.json")).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn test_load_invalid_json_is_config_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = Config::load_from_path(&path).unwrap_err();
        assert!(matches!(err, PrecacheError::Config(_)));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PRECACHE_CACHE_NAME", "site-v3"),
            ("PRECACHE_ORIGIN", "https://example.com/app/"),
            ("PRECACHE_ASSETS", "./, ./app.js , "),
            ("PRECACHE_SERVER_PORT", "9000"),
            ("PRECACHE_NETWORK_TIMEOUT_SECS", "15"),
            ("PRECACHE_SERVER_BIND", "   "),
        ]
        .into_iter()
        .collect();
        let mut cfg = Config::default();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.cache_name, "site-v3");
        assert_eq!(cfg.origin, "https://example.com/app/");
        assert_eq!(cfg.assets, vec!["./", "./app.js"]);
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.network.timeout_secs, Some(15));
        assert_eq!(cfg.server.bind, "127.0.0.1", "blank values are ignored");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cfg = Config {
            cache_name: " ".into(),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = Config {
            assets: vec![],
            ..Config::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = Config {
            origin: "ftp://example.com/".into(),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = Config {
            origin: "not a url".into(),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_cache_dir_override() {
        let cfg = Config {
            cache_dir: Some(PathBuf::from("/tmp/precache-test")),
            ..Config::default()
        };
        assert_eq!(cfg.cache_dir(), PathBuf::from("/tmp/precache-test"));
        assert!(Config::default().cache_dir().ends_with(".precache/caches"));
    }
}
