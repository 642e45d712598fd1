//! Configuration and state-file locations

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use url::Url;

/// Environment variable overriding `api_url`
pub const API_URL_ENV: &str = "CONSOLE_API_URL";

const DEFAULT_API_URL: &str = "http://localhost:8000/";

/// Tolerated difference between our clock and the token issuer's.
pub const DEFAULT_CLOCK_SKEW_SECS: u64 = 5;

/// Endpoint paths, relative to `api_url`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub token: String,
    pub social_login: String,
    pub refresh: String,
    pub magic_link: String,
    pub check_password: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            token: "auth/token".to_string(),
            social_login: "auth/social_login".to_string(),
            refresh: "auth/refresh".to_string(),
            magic_link: "auth/validate_magic_link".to_string(),
            check_password: "auth/check_password".to_string(),
        }
    }
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base URL of the console API. Always normalized to end with `/`.
    pub api_url: String,
    pub endpoints: Endpoints,
    /// A token is treated as expired this many seconds before its `exp`.
    pub clock_skew_secs: u64,
    /// Overrides the default session state file location
    pub state_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            endpoints: Endpoints::default(),
            clock_skew_secs: DEFAULT_CLOCK_SKEW_SECS,
            state_file: None,
        }
    }
}

impl Settings {
    /// Settings pointed at `api_url`, everything else default.
    pub fn with_api_url(api_url: &str) -> Self {
        Self {
            api_url: ensure_trailing_slash(api_url),
            ..Self::default()
        }
    }

    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "console-session", "console-session")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get settings file path
    fn settings_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("settings.toml"))
    }

    /// Load settings from disk, then apply the environment override.
    pub fn load() -> Result<Self> {
        let path = Self::settings_path()?;

        let mut settings = if path.exists() {
            let content = fs::read_to_string(&path).context("Failed to read settings file")?;
            Self::from_toml(&content)?
        } else {
            Self::default()
        };

        if let Ok(url) = std::env::var(API_URL_ENV) {
            tracing::debug!("{} overrides api_url", API_URL_ENV);
            settings.api_url = url;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut settings: Self = toml::from_str(content).context("Failed to parse settings file")?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&mut self) -> Result<()> {
        self.api_url = ensure_trailing_slash(&self.api_url);
        Url::parse(&self.api_url).with_context(|| format!("Invalid api_url '{}'", self.api_url))?;
        Ok(())
    }

    /// Where the persisted session lives.
    pub fn state_path(&self) -> Result<PathBuf> {
        match &self.state_file {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::config_dir()?.join("session.toml")),
        }
    }

    /// Resolve an API path against `api_url`.
    pub fn endpoint_url(&self, path: &str) -> Result<Url> {
        let base = Url::parse(&self.api_url)
            .with_context(|| format!("Invalid api_url '{}'", self.api_url))?;
        base.join(path.trim_start_matches('/'))
            .with_context(|| format!("Invalid API path '{}'", path))
    }
}

fn ensure_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_added() {
        let settings = Settings::with_api_url("https://console.example.com/api");
        assert_eq!(settings.api_url, "https://console.example.com/api/");
        assert_eq!(
            settings.endpoint_url("auth/token").unwrap().as_str(),
            "https://console.example.com/api/auth/token"
        );
    }

    #[test]
    fn test_leading_slash_stays_under_base() {
        let settings = Settings::with_api_url("https://console.example.com/api/");
        assert_eq!(
            settings.endpoint_url("/users/list").unwrap().as_str(),
            "https://console.example.com/api/users/list"
        );
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings = Settings::from_toml(
            r#"
api_url = "https://console.example.com"
clock_skew_secs = 2

[endpoints]
refresh = "session/refresh"
"#,
        )
        .unwrap();

        assert_eq!(settings.api_url, "https://console.example.com/");
        assert_eq!(settings.clock_skew_secs, 2);
        assert_eq!(settings.endpoints.refresh, "session/refresh");
        assert_eq!(settings.endpoints.token, "auth/token");
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(Settings::from_toml("api_url = \"not a url\"").is_err());
    }
}
