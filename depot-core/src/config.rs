//! Client configuration.
//!
//! Configuration is read from TOML, for example:
//!
//! ```toml
//! base_url = "https://depot.example.com/api"
//! timeout_secs = 15
//! notify_statuses = [400, 403, 404, 500]
//! ```
//!
//! Every field is optional; missing fields take the defaults of
//! [`ClientConfig::default`].

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Environment variable overriding [`ClientConfig::base_url`].
pub const ENV_BASE_URL: &str = "DEPOT_BASE_URL";

/// Environment variable overriding [`ClientConfig::timeout_secs`].
pub const ENV_TIMEOUT_SECS: &str = "DEPOT_TIMEOUT_SECS";

/// Error type for configuration problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid TOML for [`ClientConfig`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A URL could not be parsed or is not usable as an API base.
    #[error("invalid URL {value:?}: {message}")]
    InvalidUrl { value: String, message: String },

    /// A field holds a value outside its allowed range.
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },
}

/// Settings of one API client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL every request path is appended to.
    pub base_url: Url,

    /// Path of the refresh endpoint, relative to `base_url`.
    pub refresh_path: String,

    /// Path of the login endpoint, relative to `base_url`.
    pub login_path: String,

    /// Path of the logout endpoint, relative to `base_url`.
    pub logout_path: String,

    /// Default per-call timeout in seconds.
    pub timeout_secs: u64,

    /// HTTP statuses whose failures are shown to the user.
    pub notify_statuses: Vec<u16>,

    /// HTTP statuses never shown to the user. 429 is always silent.
    pub silent_statuses: Vec<u16>,

    /// Whether timeouts and connection failures are shown to the user.
    pub notify_transport_errors: bool,

    /// User-Agent header sent with every call.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            refresh_path: "/auth/refresh".to_string(),
            login_path: "/auth/login".to_string(),
            logout_path: "/auth/logout".to_string(),
            timeout_secs: 30,
            notify_statuses: vec![400, 403, 404, 409, 422, 500, 502, 503, 504],
            silent_statuses: vec![429],
            notify_transport_errors: true,
            user_agent: format!("depot/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

fn default_base_url() -> Url {
    Url::parse("http://localhost:5000/api").expect("default base URL is valid")
}

impl ClientConfig {
    /// Create a default configuration pointing at `base_url`.
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let config = Self {
            base_url: parse_base_url(base_url)?,
            ..Self::default()
        };
        Ok(config)
    }

    /// Parse a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Apply `DEPOT_BASE_URL` and `DEPOT_TIMEOUT_SECS` overrides.
    ///
    /// `lookup` is usually `|key| std::env::var(key).ok()`.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(base_url) = lookup(ENV_BASE_URL) {
            self.base_url = parse_base_url(&base_url)?;
        }
        if let Some(timeout) = lookup(ENV_TIMEOUT_SECS) {
            self.timeout_secs = timeout
                .trim()
                .parse()
                .map_err(|e| ConfigError::InvalidValue {
                    field: "timeout_secs",
                    message: format!("{:?}: {}", timeout, e),
                })?;
        }
        self.validate()
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_base_url(&self.base_url)?;

        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "timeout_secs",
                message: "must be greater than zero".to_string(),
            });
        }

        for (field, path) in [
            ("refresh_path", &self.refresh_path),
            ("login_path", &self.login_path),
            ("logout_path", &self.logout_path),
        ] {
            if endpoint_key(path).is_empty() {
                return Err(ConfigError::InvalidValue {
                    field,
                    message: "must not be empty".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Default timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Resolve an API path against the base URL.
    ///
    /// The path is appended to the base path, so `/products` under
    /// `http://host/api` becomes `http://host/api/products`. A query string
    /// embedded in `path` is preserved.
    pub fn endpoint(&self, path: &str) -> Result<Url, ConfigError> {
        if path.contains("://") {
            return Err(ConfigError::InvalidUrl {
                value: path.to_string(),
                message: "expected a path relative to the base URL".to_string(),
            });
        }

        let (path, query) = match path.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path, None),
        };

        let mut url = self.base_url.clone();
        let joined = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        url.set_path(&joined);
        url.set_query(query);
        Ok(url)
    }

    /// Whether `path` addresses the refresh endpoint.
    pub fn is_refresh_path(&self, path: &str) -> bool {
        endpoint_key(path) == endpoint_key(&self.refresh_path)
    }

    /// Whether a failure with this HTTP status may reach the notifier.
    pub fn notifies_status(&self, status: u16) -> bool {
        status != crate::classify::TOO_MANY_REQUESTS
            && !self.silent_statuses.contains(&status)
            && self.notify_statuses.contains(&status)
    }
}

/// Path with query and surrounding slashes removed.
fn endpoint_key(path: &str) -> &str {
    path.split('?').next().unwrap_or_default().trim_matches('/')
}

fn parse_base_url(value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        value: value.to_string(),
        message: e.to_string(),
    })?;
    check_base_url(&url)?;
    Ok(url)
}

fn check_base_url(url: &Url) -> Result<(), ConfigError> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl {
            value: url.to_string(),
            message: format!("unsupported scheme {:?}", url.scheme()),
        });
    }
    if url.cannot_be_a_base() || url.host().is_none() {
        return Err(ConfigError::InvalidUrl {
            value: url.to_string(),
            message: "not usable as a base URL".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = ClientConfig::default();
        config.validate().unwrap();
        assert_eq!(config.base_url.as_str(), "http://localhost:5000/api");
        assert_eq!(config.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_endpoint_appends_to_base_path() {
        let config = ClientConfig::new("https://depot.example.com/api/").unwrap();

        assert_eq!(
            config.endpoint("/products").unwrap().as_str(),
            "https://depot.example.com/api/products"
        );
        assert_eq!(
            config.endpoint("inventory/12").unwrap().as_str(),
            "https://depot.example.com/api/inventory/12"
        );
        assert_eq!(
            config.endpoint("/invoices?page=2").unwrap().as_str(),
            "https://depot.example.com/api/invoices?page=2"
        );
        assert!(config.endpoint("http://elsewhere/x").is_err());
    }

    #[test]
    fn test_is_refresh_path() {
        let config = ClientConfig::default();
        assert!(config.is_refresh_path("/auth/refresh"));
        assert!(config.is_refresh_path("auth/refresh/"));
        assert!(config.is_refresh_path("/auth/refresh?x=1"));
        assert!(!config.is_refresh_path("/auth/login"));
    }

    #[test]
    fn test_from_toml_partial() {
        let config = ClientConfig::from_toml_str(
            r#"
            base_url = "https://wms.internal/api"
            timeout_secs = 5
            silent_statuses = [404, 429]
            "#,
        )
        .unwrap();

        assert_eq!(config.base_url.as_str(), "https://wms.internal/api");
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.refresh_path, "/auth/refresh");
        assert!(!config.notifies_status(404));
        assert!(config.notifies_status(500));
    }

    #[test]
    fn test_from_toml_rejects_bad_values() {
        assert!(matches!(
            ClientConfig::from_toml_str("timeout_secs = 0"),
            Err(ConfigError::InvalidValue { field: "timeout_secs", .. })
        ));
        assert!(matches!(
            ClientConfig::from_toml_str(r#"base_url = "ftp://files.example.com""#),
            Err(ConfigError::InvalidUrl { .. })
        ));
        assert!(matches!(
            ClientConfig::from_toml_str(r#"refresh_path = "/""#),
            Err(ConfigError::InvalidValue { field: "refresh_path", .. })
        ));
        assert!(matches!(
            ClientConfig::from_toml_str("timeout_secs = \"soon\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.toml");
        std::fs::write(&path, "login_path = \"/session\"\n").unwrap();

        let config = ClientConfig::from_file(&path).unwrap();
        assert_eq!(config.login_path, "/session");

        assert!(matches!(
            ClientConfig::from_file(&dir.path().join("missing.toml")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_BASE_URL, "https://staging.example.com/api"),
            (ENV_TIMEOUT_SECS, "12"),
        ]
        .into_iter()
        .collect();

        let mut config = ClientConfig::default();
        config
            .apply_env_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.base_url.as_str(), "https://staging.example.com/api");
        assert_eq!(config.timeout_secs, 12);

        let result = config.apply_env_overrides(|key| {
            (key == ENV_TIMEOUT_SECS).then(|| "later".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_rate_limit_is_never_notified() {
        let config = ClientConfig {
            notify_statuses: vec![429, 500],
            silent_statuses: vec![],
            ..ClientConfig::default()
        };
        assert!(!config.notifies_status(429));
        assert!(config.notifies_status(500));
    }
}
