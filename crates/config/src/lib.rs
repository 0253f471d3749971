//! Environment-only configuration.
//!
//! There is deliberately no CLI flag surface: every deployment knob comes
//! from the process environment, loaded once at startup and held immutable
//! afterwards. Rotating credentials requires a restart.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {var}: {reason}")]
    InvalidVar { var: &'static str, reason: String },
}

/// Deployment environment. Controls bucket suffixes and skill stage
/// filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerEnvironment {
    Development,
    Production,
}

impl ServerEnvironment {
    fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw {
            "development" => Ok(Self::Development),
            "production" => Ok(Self::Production),
            other => Err(ConfigError::InvalidVar {
                var: "SERVER_ENVIRONMENT",
                reason: format!("expected development|production, got {other:?}"),
            }),
        }
    }

    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Process-wide configuration, loaded once from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub environment: ServerEnvironment,
    /// Address the gateway binds its HTTP/WS listener to.
    pub gateway_bind: String,
    /// Address the upload service binds to.
    pub upload_bind: String,
    /// Base URL the upload service uses to reach the core's `/internal/*`
    /// endpoints.
    pub core_internal_url: String,
    /// Transit vault endpoint (external capability).
    pub vault_url: String,
    /// Shared secret for `/internal/*` calls.
    pub internal_api_shared_token: String,
    /// SQLite database URL for the durable tier.
    pub database_url: String,
    /// Address of the local malware scanner TCP socket.
    pub malware_scanner_addr: String,
    /// Whether self-hosted payment is enabled; when false, credit charging
    /// is skipped entirely.
    pub payments_enabled: bool,
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = ServerEnvironment::parse(
            &var_or("SERVER_ENVIRONMENT", "development"),
        )?;

        let config = Self {
            environment,
            gateway_bind: var_or("GATEWAY_BIND", "127.0.0.1:8080"),
            upload_bind: var_or("UPLOAD_BIND", "127.0.0.1:8081"),
            core_internal_url: var_or("CORE_INTERNAL_URL", "http://127.0.0.1:8080"),
            vault_url: require("VAULT_URL")?,
            internal_api_shared_token: require("INTERNAL_API_SHARED_TOKEN")?,
            database_url: var_or("DATABASE_URL", "sqlite://veil.db?mode=rwc"),
            malware_scanner_addr: var_or("MALWARE_SCANNER_ADDR", "127.0.0.1:3310"),
            payments_enabled: var_or("PAYMENTS_ENABLED", "true") == "true",
        };

        debug!(environment = ?config.environment, "config loaded from environment");
        Ok(config)
    }

    /// Name of the chat-files bucket for the current environment.
    pub fn chatfiles_bucket(&self) -> &'static str {
        match self.environment {
            ServerEnvironment::Development => "chatfiles-development",
            ServerEnvironment::Production => "chatfiles",
        }
    }

    /// Name of the usage-archives bucket for the current environment.
    pub fn usage_archives_bucket(&self) -> &'static str {
        match self.environment {
            ServerEnvironment::Development => "usage-archives-development",
            ServerEnvironment::Production => "usage-archives",
        }
    }
}

fn require(var: &'static str) -> Result<String, ConfigError> {
    std::env::var(var).map_err(|_| ConfigError::MissingVar(var))
}

fn var_or(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn environment_parses_known_values() {
        assert_eq!(
            ServerEnvironment::parse("development").unwrap(),
            ServerEnvironment::Development
        );
        assert_eq!(
            ServerEnvironment::parse("production").unwrap(),
            ServerEnvironment::Production
        );
        assert!(ServerEnvironment::parse("staging").is_err());
    }

    #[test]
    fn bucket_suffix_follows_environment() {
        let mut config = Config {
            environment: ServerEnvironment::Development,
            gateway_bind: String::new(),
            upload_bind: String::new(),
            core_internal_url: String::new(),
            vault_url: String::new(),
            internal_api_shared_token: String::new(),
            database_url: String::new(),
            malware_scanner_addr: String::new(),
            payments_enabled: true,
        };
        assert_eq!(config.chatfiles_bucket(), "chatfiles-development");
        config.environment = ServerEnvironment::Production;
        assert_eq!(config.chatfiles_bucket(), "chatfiles");
    }
}
