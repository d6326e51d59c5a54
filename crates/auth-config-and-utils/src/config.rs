//! Configuration for the session engine.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;
use url::Url;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default prefix for access token keys.
pub const DEFAULT_TOKEN_PREFIX: &str = "_token.";

/// Default prefix for refresh token keys.
pub const DEFAULT_REFRESH_TOKEN_PREFIX: &str = "_refresh_token.";

/// Default key prefix inside the cookie tier.
pub const DEFAULT_COOKIE_PREFIX: &str = "auth.";

/// Default key prefix inside the client-persisted tier.
pub const DEFAULT_LOCAL_PREFIX: &str = "auth.";

/// Default field of the user record used as its identifier.
pub const DEFAULT_USER_ID_PROPERTY: &str = "id";

/// Redirect targets and rewrite switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedirectConfig {
    /// Where to send unauthenticated users.
    pub login: Option<String>,
    /// Where to go after logout.
    pub logout: Option<String>,
    /// Where to go after login.
    pub home: Option<String>,
    /// Remember the page that triggered a login redirect and return there.
    pub rewrite_redirects: bool,
    /// Compare full paths (including query) in the loop check.
    pub full_path_redirect: bool,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            login: Some("/login".to_string()),
            logout: Some("/".to_string()),
            home: Some("/".to_string()),
            rewrite_redirects: true,
            full_path_redirect: false,
        }
    }
}

/// Main session engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Base URL prepended to relative endpoints.
    pub base_url: Option<String>,
    /// Strategy used when the persisted one is missing or unregistered.
    pub default_strategy: Option<String>,
    /// Prefix of access token keys.
    pub token_prefix: String,
    /// Prefix of refresh token keys.
    pub refresh_token_prefix: String,
    /// Key prefix inside the cookie tier.
    pub cookie_prefix: String,
    /// Key prefix inside the client-persisted tier.
    pub local_prefix: String,
    /// Redirect on every `loggedIn` transition.
    pub watch_logged_in: bool,
    /// Clear the session whenever an error reaches the error bus.
    pub reset_on_error: bool,
    /// Redirect targets.
    pub redirect: RedirectConfig,
    /// Profile sync endpoint. Sync is skipped when unset.
    pub user_update_endpoint: Option<String>,
    /// Per-user credential endpoint, `{id}` is replaced with the user id.
    pub credentials_endpoint: Option<String>,
    /// Field of the user record holding its identifier.
    pub user_id_property: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            base_url: None,
            default_strategy: None,
            token_prefix: DEFAULT_TOKEN_PREFIX.to_string(),
            refresh_token_prefix: DEFAULT_REFRESH_TOKEN_PREFIX.to_string(),
            cookie_prefix: DEFAULT_COOKIE_PREFIX.to_string(),
            local_prefix: DEFAULT_LOCAL_PREFIX.to_string(),
            watch_logged_in: true,
            reset_on_error: false,
            redirect: RedirectConfig::default(),
            user_update_endpoint: None,
            credentials_endpoint: None,
            user_id_property: DEFAULT_USER_ID_PROPERTY.to_string(),
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults,
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;

        debug!(
            path = %config_path.display(),
            default_strategy = ?config.default_strategy,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Override configuration from environment variables.
    fn load_from_env(&mut self) {
        if let Some(level) = env_value("MIKASA_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(strategy) = env_value("MIKASA_DEFAULT_STRATEGY") {
            self.default_strategy = Some(strategy);
        }
        if let Some(base_url) = env_value("MIKASA_BASE_URL") {
            self.base_url = Some(base_url);
        }
    }

    /// Reject settings that would make token keys collide or redirects loop
    /// off-site.
    pub fn validate(&self) -> CoreResult<()> {
        if self.token_prefix.is_empty() {
            return Err(CoreError::Config("token_prefix must not be empty".to_string()));
        }
        if self.token_prefix == self.refresh_token_prefix {
            return Err(CoreError::Config(
                "token_prefix and refresh_token_prefix must differ".to_string(),
            ));
        }

        let targets = [
            ("login", &self.redirect.login),
            ("logout", &self.redirect.logout),
            ("home", &self.redirect.home),
        ];
        for (name, target) in targets {
            if let Some(target) = target {
                if !target.starts_with('/') {
                    return Err(CoreError::Config(format!(
                        "redirect.{} must be an absolute path, got {:?}",
                        name, target
                    )));
                }
            }
        }

        if let Some(base_url) = &self.base_url {
            Url::parse(base_url)?;
        }

        Ok(())
    }

    /// Get the base URL as a parsed URL.
    pub fn base_url(&self) -> CoreResult<Option<Url>> {
        self.base_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(CoreError::from)
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.token_prefix, "_token.");
        assert_eq!(config.refresh_token_prefix, "_refresh_token.");
        assert!(config.watch_logged_in);
        assert!(!config.reset_on_error);
        assert_eq!(config.redirect.login.as_deref(), Some("/login"));
        assert!(config.redirect.rewrite_redirects);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_load_from_file_partial() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        let config_json = r#"{
            "default_strategy": "local",
            "redirect": { "home": "/dashboard" }
        }"#;

        std::fs::write(&config_path, config_json).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.default_strategy.as_deref(), Some("local"));
        assert_eq!(config.redirect.home.as_deref(), Some("/dashboard"));
        assert_eq!(config.redirect.login.as_deref(), Some("/login"));
        assert_eq!(config.token_prefix, DEFAULT_TOKEN_PREFIX);
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let mut config = Config::default();
        config.default_strategy = Some("oauth".to_string());
        config.user_update_endpoint = Some("/api/user/update".to_string());

        config.save(&paths).unwrap();

        let loaded = Config::load(&paths).unwrap();
        assert_eq!(loaded.user_update_endpoint.as_deref(), Some("/api/user/update"));
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config::load(&paths).unwrap();
        assert_eq!(config.user_id_property, DEFAULT_USER_ID_PROPERTY);
    }

    #[test]
    fn test_validate_rejects_shared_prefixes() {
        let mut config = Config::default();
        config.refresh_token_prefix = config.token_prefix.clone();
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_empty_token_prefix() {
        let mut config = Config::default();
        config.token_prefix = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_relative_redirect() {
        let mut config = Config::default();
        config.redirect.home = Some("https://evil.example".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_invalid_base_url() {
        let mut config = Config::default();
        config.base_url = Some("not a valid url".to_string());

        assert!(config.base_url().is_err());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_base_url_parse() {
        let mut config = Config::default();
        assert!(config.base_url().unwrap().is_none());

        config.base_url = Some("https://api.example.com".to_string());
        let url = config.base_url().unwrap().unwrap();
        assert_eq!(url.host_str(), Some("api.example.com"));
    }
}
