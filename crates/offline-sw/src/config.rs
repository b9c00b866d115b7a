//! Worker configuration: cache name, asset manifest, refresh policy.

use crate::cache::CacheError;
use offline_common::{OfflineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Cache name used by the deployed site worker.
pub const DEFAULT_CACHE_NAME: &str = "my-site-cache-v2";

/// What the fetch handler does after answering a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPolicy {
    /// Re-fetch the intercepted request and overwrite its cache entry.
    #[default]
    Background,
    /// Never refresh; entries only change on install.
    Disabled,
    /// Refresh against a request binding that was never set. Every refresh
    /// fails and the cache is never updated; responses are unaffected.
    UnboundRequest,
}

/// Ordered list of assets to pre-cache at install.
///
/// Entries may be relative; they resolve against the worker script URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest(Vec<String>);

impl Manifest {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(entries.into_iter().map(Into::into).collect())
    }

    /// Page shell, script, stylesheet, and the worker script itself.
    pub fn site_shell() -> Self {
        Self::new(["index.html", "main.js", "main.css", "sw.js"])
    }

    pub fn entries(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Resolve every entry against `base`, keeping manifest order.
    pub fn resolve(&self, base: &Url) -> std::result::Result<Vec<Url>, CacheError> {
        self.0
            .iter()
            .map(|entry| {
                base.join(entry).map_err(|e| CacheError::InvalidUrl {
                    entry: entry.clone(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::site_shell()
    }
}

fn default_cache_name() -> String {
    DEFAULT_CACHE_NAME.to_string()
}

/// Configuration of one worker version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    /// Worker script URL; relative manifest entries resolve against it.
    pub script_url: Url,

    /// Control scope. Defaults to the script's directory.
    #[serde(default)]
    pub scope: Option<Url>,

    /// Name of the cache this worker fills and reads.
    #[serde(default = "default_cache_name")]
    pub cache_name: String,

    #[serde(default)]
    pub manifest: Manifest,

    #[serde(default)]
    pub refresh: RefreshPolicy,
}

impl WorkerConfig {
    /// Configuration of the deployed site worker for `script_url`.
    pub fn new(script_url: Url) -> Self {
        Self {
            script_url,
            scope: None,
            cache_name: default_cache_name(),
            manifest: Manifest::default(),
            refresh: RefreshPolicy::default(),
        }
    }

    pub fn with_cache_name(mut self, name: impl Into<String>) -> Self {
        self.cache_name = name.into();
        self
    }

    pub fn with_manifest(mut self, manifest: Manifest) -> Self {
        self.manifest = manifest;
        self
    }

    pub fn with_refresh(mut self, refresh: RefreshPolicy) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn with_scope(mut self, scope: Url) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| OfflineError::config_with_source("invalid worker config", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Effective scope: the configured one, or the script's directory.
    pub fn scope_url(&self) -> Url {
        match self.scope {
            Some(ref scope) => scope.clone(),
            None => self
                .script_url
                .join("./")
                .unwrap_or_else(|_| self.script_url.clone()),
        }
    }

    /// Manifest entries as absolute URLs.
    pub fn resolved_manifest(&self) -> std::result::Result<Vec<Url>, CacheError> {
        self.manifest.resolve(&self.script_url)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_name.trim().is_empty() {
            return Err(OfflineError::config("cache name must not be empty"));
        }
        if !matches!(self.script_url.scheme(), "http" | "https") {
            return Err(OfflineError::config(format!(
                "worker script must be served over http(s): {}",
                self.script_url
            )));
        }
        if let Some(ref scope) = self.scope {
            if scope.origin() != self.script_url.origin() {
                return Err(OfflineError::config(format!(
                    "scope {scope} is not same-origin with {}",
                    self.script_url
                )));
            }
        }
        self.resolved_manifest()
            .map_err(|e| OfflineError::config_with_source("invalid manifest", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script() -> Url {
        Url::parse("https://example.com/app/sw.js").unwrap()
    }

    #[test]
    fn test_defaults_match_deployed_worker() {
        let config = WorkerConfig::new(script());
        assert_eq!(config.cache_name, "my-site-cache-v2");
        assert_eq!(config.refresh, RefreshPolicy::Background);
        assert_eq!(
            config.manifest.entries(),
            ["index.html", "main.js", "main.css", "sw.js"]
        );
    }

    #[test]
    fn test_manifest_resolves_against_script() {
        let urls = WorkerConfig::new(script()).resolved_manifest().unwrap();
        assert_eq!(urls[0].as_str(), "https://example.com/app/index.html");
        assert_eq!(urls[3].as_str(), "https://example.com/app/sw.js");

        let absolute = Manifest::new(["/", "https://cdn.example.com/lib.js"]);
        let urls = absolute.resolve(&script()).unwrap();
        assert_eq!(urls[0].as_str(), "https://example.com/");
        assert_eq!(urls[1].as_str(), "https://cdn.example.com/lib.js");
    }

    #[test]
    fn test_scope_defaults_to_script_directory() {
        assert_eq!(
            WorkerConfig::new(script()).scope_url().as_str(),
            "https://example.com/app/"
        );

        let root = Url::parse("https://example.com/sw.js").unwrap();
        assert_eq!(WorkerConfig::new(root).scope_url().as_str(), "https://example.com/");
    }

    #[test]
    fn test_from_json() {
        let config = WorkerConfig::from_json(
            r#"{
                "script_url": "https://example.com/sw.js",
                "cache_name": "site-v3",
                "manifest": ["/", "index.html", "main.js"],
                "refresh": "disabled"
            }"#,
        )
        .unwrap();

        assert_eq!(config.cache_name, "site-v3");
        assert_eq!(config.manifest.len(), 3);
        assert_eq!(config.refresh, RefreshPolicy::Disabled);
        assert!(config.scope.is_none());
    }

    #[test]
    fn test_from_json_applies_defaults() {
        let config =
            WorkerConfig::from_json(r#"{ "script_url": "https://example.com/sw.js" }"#).unwrap();
        assert_eq!(config, WorkerConfig::new(Url::parse("https://example.com/sw.js").unwrap()));
    }

    #[test]
    fn test_from_json_rejects_bad_input() {
        assert!(WorkerConfig::from_json("{").is_err());
        assert!(WorkerConfig::from_json(
            r#"{ "script_url": "https://example.com/sw.js", "cache_name": "  " }"#
        )
        .is_err());
        assert!(WorkerConfig::from_json(
            r#"{ "script_url": "https://example.com/sw.js", "ttl": 60 }"#
        )
        .is_err());
        assert!(WorkerConfig::from_json(
            r#"{ "script_url": "https://example.com/sw.js", "scope": "https://other.com/" }"#
        )
        .is_err());
    }

    #[test]
    fn test_unbound_refresh_policy_name() {
        let policy: RefreshPolicy = serde_json::from_str(r#""unbound_request""#).unwrap();
        assert_eq!(policy, RefreshPolicy::UnboundRequest);
    }
}
