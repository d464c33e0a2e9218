use crate::error::*;
use std::time::Duration;
use tracing::{error, warn};

pub trait ErrorExt {
    /// Whether the same call may succeed if repeated. Drives the client's
    /// retry loop and circuit breaker.
    fn log_error(&self) -> &Self;
    fn log_warn(&self) -> &Self;
    fn is_retryable(&self) -> bool;
    /// Server-requested wait before the next attempt.
    fn retry_after(&self) -> Option<Duration>;
    fn user_friendly_message(&self) -> String;
    fn error_code(&self) -> String;
}

impl ErrorExt for CoreError {
    fn log_error(&self) -> &Self {
        error!(code = %self.error_code(), "CoreError: {}", self);
        match self {
            CoreError::Backend(e) => {
                error!("Backend error details: {:?}", e);
            }
            CoreError::Settings(e) => {
                error!("Settings error details: {:?}", e);
            }
            CoreError::Config(e) => {
                error!("Configuration error details: {:?}", e);
            }
            _ => {}
        }
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("CoreError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        match self {
            CoreError::Backend(e) => e.is_retryable(),
            CoreError::Settings(e) => e.is_retryable(),
            CoreError::Network(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            CoreError::Backend(e) => e.retry_after(),
            _ => None,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            CoreError::Backend(e) => e.user_friendly_message(),
            CoreError::Settings(e) => e.user_friendly_message(),
            CoreError::Config(e) => e.user_friendly_message(),
            CoreError::Network(_) => {
                "Network connection error. Please check your internet connection.".to_string()
            }
            CoreError::InvalidInput { message } => message.clone(),
            CoreError::PermissionDenied { operation } => {
                format!("Permission denied for: {}", operation)
            }
            _ => "An unexpected error occurred. Please try again later.".to_string(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            CoreError::Backend(e) => e.error_code(),
            CoreError::Settings(e) => e.error_code(),
            CoreError::Config(e) => e.error_code(),
            CoreError::Serialization(_) => "SERIALIZATION".to_string(),
            CoreError::Network(_) => "NETWORK".to_string(),
            CoreError::InvalidInput { .. } => "INVALID_INPUT".to_string(),
            CoreError::PermissionDenied { .. } => "PERMISSION_DENIED".to_string(),
        }
    }
}

impl ErrorExt for BackendError {
    fn log_error(&self) -> &Self {
        error!(code = %self.error_code(), "BackendError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("BackendError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        match self {
            BackendError::RateLimitExceeded { .. } => true,
            BackendError::RequestTimeout => true,
            BackendError::ServerError { status_code } => *status_code >= 500,
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            BackendError::RateLimitExceeded { retry_after } => {
                Some(Duration::from_secs(*retry_after))
            }
            _ => None,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            BackendError::NotAuthenticated => "Please log in first.".to_string(),
            BackendError::InvalidToken => {
                "Your session has expired. Please log in again.".to_string()
            }
            BackendError::Forbidden { .. } => {
                "That place doesn't exist (or you don't have access).".to_string()
            }
            BackendError::PlaceNotFound { .. } => "Place not found.".to_string(),
            BackendError::RateLimitExceeded { retry_after } => format!(
                "Too many requests. Please wait {} seconds before trying again.",
                retry_after
            ),
            BackendError::ConstraintViolation { .. } => "That already exists.".to_string(),
            BackendError::RequestTimeout => {
                "The server took too long to answer. Please try again.".to_string()
            }
            _ => "Could not reach the server. Please try again later.".to_string(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            BackendError::NotAuthenticated => "BACKEND_NOT_AUTHENTICATED".to_string(),
            BackendError::InvalidToken => "BACKEND_INVALID_TOKEN".to_string(),
            BackendError::Forbidden { .. } => "BACKEND_FORBIDDEN".to_string(),
            BackendError::PlaceNotFound { .. } => "BACKEND_PLACE_NOT_FOUND".to_string(),
            BackendError::RateLimitExceeded { .. } => "BACKEND_RATE_LIMIT".to_string(),
            BackendError::ConstraintViolation { .. } => "BACKEND_CONSTRAINT".to_string(),
            BackendError::RequestTimeout => "BACKEND_TIMEOUT".to_string(),
            BackendError::InvalidResponse { .. } => "BACKEND_INVALID_RESPONSE".to_string(),
            BackendError::ServerError { .. } => "BACKEND_SERVER_ERROR".to_string(),
            BackendError::CircuitOpen { .. } => "BACKEND_CIRCUIT_OPEN".to_string(),
        }
    }
}

impl ErrorExt for SettingsError {
    fn log_error(&self) -> &Self {
        error!(code = %self.error_code(), "SettingsError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("SettingsError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        matches!(self, SettingsError::ConnectionFailed { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }

    fn user_friendly_message(&self) -> String {
        match self {
            SettingsError::ConnectionFailed { .. } | SettingsError::NotConnected => {
                "Local settings are unavailable. Defaults will be used.".to_string()
            }
            _ => "Could not save your settings.".to_string(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            SettingsError::ConnectionFailed { .. } => "SETTINGS_CONNECTION_FAILED".to_string(),
            SettingsError::MigrationFailed { .. } => "SETTINGS_MIGRATION_FAILED".to_string(),
            SettingsError::NotConnected => "SETTINGS_NOT_CONNECTED".to_string(),
            SettingsError::Sql(_) => "SETTINGS_SQL_ERROR".to_string(),
        }
    }
}

impl ErrorExt for ConfigError {
    fn log_error(&self) -> &Self {
        error!(code = %self.error_code(), "ConfigError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("ConfigError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }

    fn user_friendly_message(&self) -> String {
        match self {
            ConfigError::FileNotFound { path } => {
                format!("Configuration file '{}' not found.", path)
            }
            ConfigError::MissingField { field } => {
                format!("Required configuration field '{}' is missing.", field)
            }
            ConfigError::InvalidValue { field, .. } => {
                format!("Invalid value for configuration field '{}'.", field)
            }
            _ => "Configuration error occurred. Please check your settings.".to_string(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            ConfigError::FileNotFound { .. } => "CONFIG_FILE_NOT_FOUND".to_string(),
            ConfigError::MissingField { .. } => "CONFIG_MISSING_FIELD".to_string(),
            ConfigError::InvalidValue { .. } => "CONFIG_INVALID_VALUE".to_string(),
            ConfigError::ValidationFailed { .. } => "CONFIG_VALIDATION_FAILED".to_string(),
            ConfigError::Parse(_) => "CONFIG_PARSE_ERROR".to_string(),
        }
    }
}
