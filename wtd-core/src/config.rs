//! TOML configuration with environment overrides.
//!
//! Every field has a default except the backend URL, API key and place id,
//! which must come from the file or from `WTD_*` environment variables.
//! Unknown keys are rejected. The shortlist size is fixed at
//! [`DEFAULT_SHORTLIST_SIZE`] and cannot be configured.

use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};
use url::Url;

use crate::error::ConfigError;
use crate::types::{Coordinates, DistanceBand};

pub const DEFAULT_SHORTLIST_SIZE: usize = 8;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub backend_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub place_id: String,
    #[serde(default)]
    pub center: Option<Coordinates>,
    #[serde(default)]
    pub default_distance: DistanceBand,
    #[serde(default = "default_settings_database_url")]
    pub settings_database_url: String,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_settings_database_url() -> String {
    "sqlite://wtd-settings.db".to_string()
}

fn default_log_filter() -> String {
    "wtd=info,gh_mind=info,wtd_client=info,settings_store=info".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend_url: String::new(),
            api_key: String::new(),
            access_token: None,
            user_id: None,
            place_id: String::new(),
            center: None,
            default_distance: DistanceBand::default(),
            settings_database_url: default_settings_database_url(),
            log_filter: default_log_filter(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Reads the file if present, applies environment overrides, then validates.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
                path: path.display().to_string(),
            })?;
            info!("Loaded configuration from {}", path.display());
            Self::from_toml_str(&raw)?
        } else {
            debug!(
                "No configuration file at {}, using defaults and environment",
                path.display()
            );
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("WTD_BACKEND_URL") {
            self.backend_url = url;
        }
        if let Some(key) = lookup("WTD_API_KEY") {
            self.api_key = key;
        }
        if let Some(token) = lookup("WTD_ACCESS_TOKEN") {
            self.access_token = Some(token);
        }
        if let Some(user) = lookup("WTD_USER_ID") {
            self.user_id = Some(user);
        }
        if let Some(place) = lookup("WTD_PLACE_ID") {
            self.place_id = place;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend_url.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "backend_url".to_string(),
            });
        }
        Url::parse(&self.backend_url).map_err(|_| ConfigError::InvalidValue {
            field: "backend_url".to_string(),
            value: self.backend_url.clone(),
        })?;
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "api_key".to_string(),
            });
        }
        if self.place_id.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "place_id".to_string(),
            });
        }
        if self.access_token.is_some() != self.user_id.is_some() {
            return Err(ConfigError::ValidationFailed {
                reason: "access_token and user_id must be set together".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
backend_url = "https://example.supabase.co"
api_key = "anon-key"
place_id = "place-1"
default_distance = "medium"

[center]
latitude = 44.98
longitude = -93.27
"#;

    #[test]
    fn test_parse_with_defaults() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.default_distance, DistanceBand::Medium);
        assert_eq!(config.center, Some(Coordinates::new(44.98, -93.27)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::from_toml_str(SAMPLE).unwrap();
        let env: HashMap<&str, &str> =
            [("WTD_PLACE_ID", "place-2"), ("WTD_USER_ID", "user-9")].into();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.place_id, "place-2");
        assert_eq!(config.user_id.as_deref(), Some("user-9"));
        // user id without a token is rejected
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed { .. })
        ));
    }

    #[test]
    fn test_missing_fields() {
        let config = AppConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField { field }) if field == "backend_url"
        ));

        let mut config = AppConfig::from_toml_str(SAMPLE).unwrap();
        config.backend_url = "not a url".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_shortlist_size_is_not_configurable() {
        let raw = format!("shortlist_size = 1\n{}", SAMPLE);
        assert!(matches!(
            AppConfig::from_toml_str(&raw),
            Err(ConfigError::Parse(_))
        ));
        assert_eq!(DEFAULT_SHORTLIST_SIZE, 8);
    }
}
