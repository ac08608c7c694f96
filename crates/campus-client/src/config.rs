//! Configuration for the Campus API client.
//!
//! Settings are read from an optional `campus.json` file (camelCase keys, every
//! field defaulted) and the base URL can be overridden with the
//! `CAMPUS_API_URL` environment variable.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ApiError, Result};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "campus.json";

/// Environment variable that overrides the configured base URL.
pub const BASE_URL_ENV: &str = "CAMPUS_API_URL";

/// Default API base URL (local development backend).
fn default_base_url() -> String {
    "http://localhost:5000/api".to_string()
}

/// Default timeout in seconds for a single HTTP call.
const fn default_timeout_secs() -> u64 {
    30
}

/// Default location of the persisted session.
fn default_token_file() -> String {
    ".campus/session.json".to_string()
}

fn default_login_endpoint() -> String {
    "/auth/login".to_string()
}

fn default_refresh_endpoint() -> String {
    "/auth/refresh".to_string()
}

fn default_register_endpoint() -> String {
    "/auth/register".to_string()
}

fn default_logout_endpoint() -> String {
    "/auth/logout".to_string()
}

fn default_me_endpoint() -> String {
    "/auth/me".to_string()
}

/// Main configuration for the Campus API client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Base URL every endpoint is appended to.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Timeout for a single HTTP call, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Path of the persisted session file.
    #[serde(default = "default_token_file")]
    pub token_file: String,

    /// Endpoint that exchanges credentials for tokens.
    #[serde(default = "default_login_endpoint")]
    pub login_endpoint: String,

    /// Endpoint that issues a fresh access token.
    #[serde(default = "default_refresh_endpoint")]
    pub refresh_endpoint: String,

    /// Endpoint that creates an account.
    #[serde(default = "default_register_endpoint")]
    pub register_endpoint: String,

    /// Endpoint that invalidates the session server-side.
    #[serde(default = "default_logout_endpoint")]
    pub logout_endpoint: String,

    /// Endpoint that returns the authenticated user.
    #[serde(default = "default_me_endpoint")]
    pub me_endpoint: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            token_file: default_token_file(),
            login_endpoint: default_login_endpoint(),
            refresh_endpoint: default_refresh_endpoint(),
            register_endpoint: default_register_endpoint(),
            logout_endpoint: default_logout_endpoint(),
            me_endpoint: default_me_endpoint(),
        }
    }
}

impl ClientConfig {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `campus.json` in the current directory, falling back to
    /// defaults when it is absent, then applies the environment override.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is invalid.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            ApiError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        let mut config = Self::load_from_dir(&current_dir)?;
        config.apply_env_override()?;
        Ok(config)
    }

    /// Loads configuration from `campus.json` in a specific directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is invalid.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::ConfigParse` for unreadable files or invalid JSON and
    /// `ApiError::ConfigValidation` for invalid values.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(ApiError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| ApiError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Replaces `base_url` with `CAMPUS_API_URL` when that variable is set.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::ConfigValidation` if the override is not a valid URL.
    pub fn apply_env_override(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            if !url.trim().is_empty() {
                tracing::debug!(base_url = %url, "Base URL overridden from environment");
                self.base_url = url;
                self.validate()?;
            }
        }
        Ok(())
    }

    /// Validates the configuration values.
    ///
    /// Checks that:
    /// - `base_url` parses as an absolute http(s) URL
    /// - `timeout_secs` is greater than 0
    /// - `token_file` is not empty
    /// - every endpoint starts with `/`
    ///
    /// # Errors
    ///
    /// Returns `ApiError::ConfigValidation` if any check fails.
    pub fn validate(&self) -> Result<()> {
        match Url::parse(&self.base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => {
                return Err(ApiError::config_validation(
                    format!("baseUrl has unsupported scheme '{}'", url.scheme()),
                    "Use an http:// or https:// baseUrl in your campus.json",
                ));
            }
            Err(e) => {
                return Err(ApiError::config_validation(
                    format!("baseUrl '{}' is not a valid URL: {e}", self.base_url),
                    format!("Set baseUrl in your campus.json or the {BASE_URL_ENV} variable"),
                ));
            }
        }

        if self.timeout_secs == 0 {
            return Err(ApiError::config_validation(
                "timeoutSecs must be greater than 0",
                "Set timeoutSecs to at least 1 second in your campus.json",
            ));
        }

        if self.token_file.trim().is_empty() {
            return Err(ApiError::config_validation(
                "tokenFile must not be empty",
                "Provide a session file path in your campus.json",
            ));
        }

        for (name, endpoint) in [
            ("loginEndpoint", &self.login_endpoint),
            ("refreshEndpoint", &self.refresh_endpoint),
            ("registerEndpoint", &self.register_endpoint),
            ("logoutEndpoint", &self.logout_endpoint),
            ("meEndpoint", &self.me_endpoint),
        ] {
            if !endpoint.starts_with('/') {
                return Err(ApiError::config_validation(
                    format!("{name} '{endpoint}' must start with '/'"),
                    format!("Write {name} as a path relative to baseUrl, e.g. '/auth/login'"),
                ));
            }
        }

        Ok(())
    }

    /// Returns the per-call timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Returns the session file path.
    #[must_use]
    pub fn token_path(&self) -> PathBuf {
        PathBuf::from(&self.token_file)
    }
}
