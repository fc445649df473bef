//! Persisted application settings.
//!
//! Loaded once at startup, passed down explicitly, and saved only when the CLI changes it.

use crate::env;
use crate::openai_compat::DEFAULT_SERVER_URL;
use chatpipe_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_LOCAL_SEARCH_URL: &str = "http://localhost:3001/api";
pub const MAX_SERVER_HISTORY: usize = 10;

/// File types searched when the user has not chosen any. `""` admits files without an extension.
pub const DEFAULT_FILE_TYPES: &[&str] = &[
    ".txt", ".doc", ".docx", ".xls", ".xlsx", ".pdf", ".csv", ".rtf", ".odt", ".ods", ".md",
    ".json", ".xml", ".html", ".htm", "",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchConfig {
    pub search_paths: Vec<String>,
    pub file_types: Vec<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            search_paths: Vec::new(),
            file_types: DEFAULT_FILE_TYPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl SearchConfig {
    pub fn add_path(&mut self, path: &str) -> bool {
        let path = path.trim();
        if path.is_empty() || self.search_paths.iter().any(|p| p == path) {
            return false;
        }
        self.search_paths.push(path.to_string());
        true
    }

    pub fn remove_path(&mut self, path: &str) -> bool {
        let before = self.search_paths.len();
        self.search_paths.retain(|p| p != path.trim());
        self.search_paths.len() != before
    }

    pub fn add_file_type(&mut self, ext: &str) -> bool {
        let ext = normalize_ext(ext);
        if self.file_types.contains(&ext) {
            return false;
        }
        self.file_types.push(ext);
        true
    }

    pub fn remove_file_type(&mut self, ext: &str) -> bool {
        let ext = normalize_ext(ext);
        let before = self.file_types.len();
        self.file_types.retain(|e| *e != ext);
        self.file_types.len() != before
    }
}

/// `"MD"` and `"md"` both become `".md"`; blank stays blank.
pub fn normalize_ext(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.is_empty() || ext.starts_with('.') {
        ext
    } else {
        format!(".{ext}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub server_url: String,
    /// Most recent first, unique, at most `MAX_SERVER_HISTORY` entries.
    pub server_history: Vec<String>,
    pub local_search_url: String,
    pub search: SearchConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_model: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            server_history: vec![DEFAULT_SERVER_URL.to_string()],
            local_search_url: DEFAULT_LOCAL_SEARCH_URL.to_string(),
            search: SearchConfig::default(),
            last_model: None,
        }
    }
}

/// A server URL worth remembering: plain http(s) with a host part.
pub fn is_valid_server_url(url: &str) -> bool {
    let url = url.trim();
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"));
    match rest {
        Some(rest) => !rest.is_empty() && !url.ends_with(':'),
        None => false,
    }
}

impl AppConfig {
    /// `CHATPIPE_CONFIG`, else `<config dir>/chatpipe/config.json`.
    pub fn default_path() -> Result<PathBuf> {
        if let Some(p) = env("CHATPIPE_CONFIG") {
            return Ok(PathBuf::from(p));
        }
        dirs::config_dir()
            .map(|d| d.join("chatpipe").join("config.json"))
            .ok_or_else(|| Error::Config("no user config directory on this platform".to_string()))
    }

    /// Read `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file; using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(Error::Config(format!("read {}: {e}", path.display()))),
        };
        let mut cfg: Self = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("parse {}: {e}", path.display())))?;
        cfg.normalize();
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| Error::Config(format!("create {}: {e}", dir.display())))?;
        }
        let js = serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, js)
            .map_err(|e| Error::Config(format!("write {}: {e}", path.display())))
    }

    /// Apply process-level overrides (currently `CHATPIPE_SERVER_URL`). Not persisted.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(url) = env("CHATPIPE_SERVER_URL") {
            self.server_url = url;
        }
        self
    }

    fn normalize(&mut self) {
        let history = std::mem::take(&mut self.server_history);
        for url in history.into_iter().rev() {
            self.add_server_to_history(&url);
        }
        if self.server_history.is_empty() {
            self.server_history.push(DEFAULT_SERVER_URL.to_string());
        }
    }

    /// Move `url` to the front of the history. Invalid URLs are ignored.
    pub fn add_server_to_history(&mut self, url: &str) -> bool {
        let url = url.trim().trim_end_matches('/');
        if !is_valid_server_url(url) {
            return false;
        }
        self.server_history.retain(|u| u != url);
        self.server_history.insert(0, url.to_string());
        self.server_history.truncate(MAX_SERVER_HISTORY);
        true
    }

    pub fn set_server_url(&mut self, url: &str) -> Result<()> {
        let url = url.trim().trim_end_matches('/');
        if !is_valid_server_url(url) {
            return Err(Error::Config(format!("not an http(s) server url: {url:?}")));
        }
        self.server_url = url.to_string();
        self.add_server_to_history(url);
        Ok(())
    }

    pub fn reset_server(&mut self) {
        let d = Self::default();
        self.server_url = d.server_url;
        self.server_history = d.server_history;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn missing_file_loads_defaults_and_save_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut cfg = AppConfig::load(&path).unwrap();
        assert_eq!(cfg, AppConfig::default());

        cfg.set_server_url("http://10.0.0.5:1234/").unwrap();
        cfg.search.add_path("/srv/docs");
        cfg.last_model = Some("qwen".to_string());
        cfg.save(&path).unwrap();

        let back = AppConfig::load(&path).unwrap();
        assert_eq!(back.server_url, "http://10.0.0.5:1234");
        assert_eq!(back.server_history[0], "http://10.0.0.5:1234");
        assert_eq!(back.search.search_paths, vec!["/srv/docs".to_string()]);
        assert_eq!(back, cfg);
    }

    #[test]
    fn saved_json_uses_camel_case() {
        let js = serde_json::to_value(AppConfig::default()).unwrap();
        assert!(js.get("serverUrl").is_some());
        assert!(js.get("localSearchUrl").is_some());
        assert!(js["search"].get("fileTypes").is_some());
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"serverUrl":"http://box:1234"}"#).unwrap();
        let cfg = AppConfig::load(&path).unwrap();
        assert_eq!(cfg.server_url, "http://box:1234");
        assert_eq!(cfg.server_history, vec![DEFAULT_SERVER_URL.to_string()]);
        assert_eq!(cfg.search.file_types.len(), DEFAULT_FILE_TYPES.len());
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{nope").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn invalid_server_urls_are_rejected() {
        let mut cfg = AppConfig::default();
        assert!(!cfg.add_server_to_history("localhost:1234"));
        assert!(!cfg.add_server_to_history("http://"));
        assert!(!cfg.add_server_to_history("http://host:"));
        assert!(cfg.set_server_url("ftp://x").is_err());
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn reset_restores_server_defaults_only() {
        let mut cfg = AppConfig::default();
        cfg.set_server_url("http://a:1").unwrap();
        cfg.search.add_file_type("LOG");
        cfg.reset_server();
        assert_eq!(cfg.server_url, DEFAULT_SERVER_URL);
        assert_eq!(cfg.server_history, vec![DEFAULT_SERVER_URL.to_string()]);
        assert!(cfg.search.file_types.contains(&".log".to_string()));
    }

    #[test]
    fn file_type_edits_normalize_extensions() {
        let mut s = SearchConfig::default();
        assert!(!s.add_file_type("MD"));
        assert!(s.add_file_type("rs"));
        assert!(s.remove_file_type(".RS"));
        assert!(!s.remove_file_type("rs"));
        assert_eq!(normalize_ext(""), "");
    }

    proptest! {
        #[test]
        fn history_is_unique_recent_first_and_capped(hosts in proptest::collection::vec(0u8..20, 0..40)) {
            let mut cfg = AppConfig::default();
            for h in &hosts {
                cfg.add_server_to_history(&format!("http://host{h}:1234"));
            }
            prop_assert!(cfg.server_history.len() <= MAX_SERVER_HISTORY);
            let mut seen = std::collections::HashSet::new();
            for u in &cfg.server_history {
                prop_assert!(seen.insert(u.clone()));
            }
            if let Some(last) = hosts.last() {
                let expected = format!("http://host{last}:1234");
                prop_assert_eq!(&cfg.server_history[0], &expected);
            }
        }
    }
}
