use std::{
    env, fs,
    path::{Path, PathBuf},
};

use dirs_next::config_dir;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://usosapps.uw.edu.pl/";
pub const CONFIG_PATH_ENV: &str = "TAL_CONFIG_PATH";
pub const BASE_URL_ENV: &str = "USOS_API_BASE";
pub const ACCESS_TOKEN_ENV: &str = "USOS_API_TOKEN";
pub const LANG_ENV: &str = "USOS_LANG";

/// Hostnames allowed to use plain http.
const LOCALHOST_DOMAINS: &[&str] = &["localhost", "127.0.0.1"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("Invalid config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid API base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("Cannot build HTTP client: {message}")]
    Client { message: String },
}

/// Connection settings for [`HttpTransport`](crate::HttpTransport).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub access_token: Option<String>,
    /// Response language code, `pl` or `en`.
    pub lang: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            access_token: None,
            lang: "pl".to_string(),
            timeout_secs: 30,
        }
    }
}

impl ApiConfig {
    /// Loads the config file, applies environment overrides and validates the result.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&default_config_path())?;
        config.apply_env();
        validate_base_url(&config.base_url)?;
        Ok(config)
    }

    /// Reads a JSON config file; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|error| ConfigError::Read {
            path: path.to_path_buf(),
            message: error.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: error.to_string(),
        })
    }

    pub fn apply_env(&mut self) {
        if let Some(base_url) = non_empty_var(BASE_URL_ENV) {
            self.base_url = base_url;
        }
        if let Some(token) = non_empty_var(ACCESS_TOKEN_ENV) {
            self.access_token = Some(token);
        }
        if let Some(lang) = non_empty_var(LANG_ENV) {
            self.lang = lang;
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

/// Get the default path for the API configuration file.
pub fn default_config_path() -> PathBuf {
    if let Some(path) = non_empty_var(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }

    config_dir().unwrap_or_else(|| PathBuf::from(".")).join("tal").join("config.json")
}

/// Validate that a base URL is acceptable for use by the transport.
///
/// Rules:
/// - `localhost` or `127.0.0.1`: any scheme is allowed
/// - otherwise: scheme must be HTTPS
pub fn validate_base_url(base: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidBaseUrl {
        url: base.to_string(),
        reason,
    };
    let parsed_base_url = Url::parse(base).map_err(|error| invalid(error.to_string()))?;

    let host_name = parsed_base_url
        .host_str()
        .ok_or_else(|| invalid("URL must include a host".to_string()))?;

    if LOCALHOST_DOMAINS.iter().any(|&allowed| host_name.eq_ignore_ascii_case(allowed)) {
        return Ok(parsed_base_url);
    }

    if parsed_base_url.scheme() != "https" {
        return Err(invalid(format!(
            "non-localhost hosts must use https; got '{}://'",
            parsed_base_url.scheme()
        )));
    }

    Ok(parsed_base_url)
}
