// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Configuration loading, validation and file watching for rb-gateway.
//!
//! A [`Config`] is an immutable snapshot of the configuration file. It is
//! replaced wholesale on reload; nothing mutates a loaded snapshot in place.

mod watch;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use rbg_repos::{GitRepository, HgRepository, Repository, RepositoryInfo};

pub use watch::ConfigWatcher;

/// The configuration path used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// The special token-store path selecting the in-memory store.
pub const MEMORY_STORE_PATH: &str = ":memory:";

const DEFAULT_PORT: u16 = 8888;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while loading or watching the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Some required fields were missing from the configuration: {0}.")]
    MissingFields(String),

    #[error("Config file was removed.")]
    Removed,

    #[error("Filesystem watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Configuration watcher has shut down.")]
    WatcherClosed,
}

/// A repository entry as it appears in the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRepository {
    pub name: String,
    pub path: String,
    pub scm: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    #[serde(default)]
    port: u16,

    #[serde(default, rename = "useTLS")]
    use_tls: bool,

    #[serde(default)]
    ssl_certificate: String,

    #[serde(default)]
    ssl_key: String,

    #[serde(default)]
    htpasswd_path: String,

    #[serde(default)]
    token_store_path: String,

    #[serde(default)]
    webhook_store_path: String,

    #[serde(default)]
    repositories: Vec<RawRepository>,
}

/// An immutable snapshot of the rb-gateway configuration.
#[derive(Clone)]
pub struct Config {
    /// The port the HTTP server listens on.
    pub port: u16,

    /// Whether the server terminates TLS itself.
    pub use_tls: bool,

    /// The TLS certificate path. Only meaningful when `use_tls` is set.
    pub ssl_certificate: PathBuf,

    /// The TLS key path. Only meaningful when `use_tls` is set.
    pub ssl_key: PathBuf,

    /// The path of the htpasswd credentials file.
    pub htpasswd_path: PathBuf,

    /// The token store path, or `":memory:"` for the in-memory store.
    pub token_store_path: String,

    /// The path of the webhook subscription store.
    pub webhook_store_path: PathBuf,

    /// The raw repository entries, as configured.
    pub repository_data: Vec<RawRepository>,

    /// The repositories by name.
    pub repositories: HashMap<String, Arc<dyn Repository>>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("use_tls", &self.use_tls)
            .field("ssl_certificate", &self.ssl_certificate)
            .field("ssl_key", &self.ssl_key)
            .field("htpasswd_path", &self.htpasswd_path)
            .field("token_store_path", &self.token_store_path)
            .field("webhook_store_path", &self.webhook_store_path)
            .field("repository_data", &self.repository_data)
            .field("repositories", &self.repositories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Config {
    /// Load and validate a configuration snapshot from `path`.
    ///
    /// Relative paths in the file are resolved against the file's own
    /// directory.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Config> {
        let path = path.as_ref();
        let content = std::fs::read(path)?;
        let raw: RawConfig = serde_json::from_slice(&content)?;

        let cfg_dir = path
            .canonicalize()?
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));

        Self::validate(&cfg_dir, raw, path)
    }

    fn validate(cfg_dir: &Path, mut raw: RawConfig, path: &Path) -> ConfigResult<Config> {
        let mut missing_fields = Vec::new();

        if raw.port == 0 {
            warn!("Port missing from config, defaulting to {}.", DEFAULT_PORT);
            raw.port = DEFAULT_PORT;
        }

        if raw.repositories.is_empty() {
            missing_fields.push("repositories");
        }

        if raw.use_tls {
            if raw.ssl_certificate.is_empty() {
                missing_fields.push("ssl_certificate");
            }

            if raw.ssl_key.is_empty() {
                missing_fields.push("ssl_key");
            }
        }

        let defaults = [
            (&mut raw.token_store_path, "tokenStorePath", "tokens.dat"),
            (&mut raw.htpasswd_path, "htpasswdPath", "htpasswd"),
            (&mut raw.webhook_store_path, "webhookStorePath", "webhooks.json"),
        ];

        for (field, name, default) in defaults {
            if field.is_empty() {
                warn!("{} missing from config, defaulting to \"{}\".", name, default);
                *field = default.to_string();
            }
        }

        if !missing_fields.is_empty() {
            return Err(ConfigError::MissingFields(missing_fields.join(",")));
        }

        let token_store_path = if raw.token_store_path == MEMORY_STORE_PATH {
            raw.token_store_path.clone()
        } else {
            resolve_path(cfg_dir, &raw.token_store_path)
                .to_string_lossy()
                .into_owned()
        };

        let mut repositories: HashMap<String, Arc<dyn Repository>> = HashMap::new();

        for repo in &raw.repositories {
            let info = RepositoryInfo {
                name: repo.name.clone(),
                path: resolve_path(cfg_dir, &repo.path),
            };

            let repository: Arc<dyn Repository> = match repo.scm.as_str() {
                "git" => Arc::new(GitRepository::new(info)),
                "hg" => Arc::new(HgRepository::new(info)),
                _ => {
                    warn!(
                        "Unknown SCM '{}' while loading configuration '{}'; ignoring.",
                        repo.scm,
                        path.display()
                    );
                    continue;
                }
            };

            repositories.insert(repo.name.clone(), repository);
        }

        Ok(Config {
            port: raw.port,
            use_tls: raw.use_tls,
            ssl_certificate: resolve_path(cfg_dir, &raw.ssl_certificate),
            ssl_key: resolve_path(cfg_dir, &raw.ssl_key),
            htpasswd_path: resolve_path(cfg_dir, &raw.htpasswd_path),
            token_store_path,
            webhook_store_path: resolve_path(cfg_dir, &raw.webhook_store_path),
            repository_data: raw.repositories,
            repositories,
        })
    }

    /// Whether the configuration selects the in-memory token store.
    pub fn uses_memory_token_store(&self) -> bool {
        self.token_store_path == MEMORY_STORE_PATH
    }

    /// Return the set of repository names, for webhook validation.
    pub fn repository_set(&self) -> HashSet<String> {
        self.repositories.keys().cloned().collect()
    }
}

/// Resolve a path so that relative paths are treated as relative to the
/// configuration file's directory.
fn resolve_path(cfg_dir: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);

    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cfg_dir.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("config.json");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    fn minimal_config(dir: &TempDir) -> PathBuf {
        write_config(
            dir,
            r#"{
                "port": 8888,
                "repositories": [
                    {"name": "repo", "path": "repo", "scm": "git"}
                ]
            }"#,
        )
    }

    #[test]
    fn test_load_defaults() {
        let dir = TempDir::new().unwrap();
        let path = minimal_config(&dir);

        let cfg = Config::load(&path).unwrap();
        let cfg_dir = path.canonicalize().unwrap().parent().unwrap().to_path_buf();

        assert_eq!(cfg.port, 8888);
        assert!(!cfg.use_tls);
        assert_eq!(cfg.htpasswd_path, cfg_dir.join("htpasswd"));
        assert_eq!(cfg.webhook_store_path, cfg_dir.join("webhooks.json"));
        assert_eq!(
            cfg.token_store_path,
            cfg_dir.join("tokens.dat").to_string_lossy()
        );
        assert_eq!(cfg.repositories.len(), 1);
        assert_eq!(cfg.repositories["repo"].path(), cfg_dir.join("repo"));
    }

    #[test]
    fn test_default_port() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"{"repositories": [{"name": "repo", "path": "/repo", "scm": "git"}]}"#,
        );

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.port, 8888);
    }

    #[test]
    fn test_memory_token_store_not_resolved() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"{
                "tokenStorePath": ":memory:",
                "repositories": [{"name": "repo", "path": "/repo", "scm": "git"}]
            }"#,
        );

        let cfg = Config::load(&path).unwrap();
        assert!(cfg.uses_memory_token_store());
        assert_eq!(cfg.token_store_path, MEMORY_STORE_PATH);
    }

    #[test]
    fn test_missing_repositories() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, r#"{"port": 8888}"#);

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::MissingFields(ref fields) if fields == "repositories"));
    }

    #[test]
    fn test_tls_requires_cert_and_key() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"{
                "useTLS": true,
                "repositories": [{"name": "repo", "path": "/repo", "scm": "git"}]
            }"#,
        );

        let err = Config::load(&path).unwrap_err();
        assert!(
            matches!(err, ConfigError::MissingFields(ref fields) if fields == "ssl_certificate,ssl_key")
        );
    }

    #[test]
    fn test_unknown_scm_skipped() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"{
                "repositories": [
                    {"name": "repo", "path": "/repo", "scm": "git"},
                    {"name": "other", "path": "/other", "scm": "svn"}
                ]
            }"#,
        );

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.repositories.len(), 1);
        assert!(cfg.repositories.contains_key("repo"));
    }

    #[test]
    fn test_absolute_paths_untouched() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"{
                "htpasswdPath": "/etc/rb-gateway/htpasswd",
                "repositories": [{"name": "repo", "path": "/repo", "scm": "git"}]
            }"#,
        );

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.htpasswd_path, PathBuf::from("/etc/rb-gateway/htpasswd"));
    }

    #[test]
    fn test_repository_set() {
        let dir = TempDir::new().unwrap();
        let path = minimal_config(&dir);

        let cfg = Config::load(&path).unwrap();
        let set = cfg.repository_set();

        assert_eq!(set.len(), 1);
        assert!(set.contains("repo"));
    }
}
