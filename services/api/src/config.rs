//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development. Missing service credentials are not an
//! error: the affected features are reported as "not configured" instead.

use axum::http::HeaderValue;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::Level;

/// Marker found in values copied unchanged from the example `.env` file.
const PLACEHOLDER_MARKER: &str = "your-";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub log_level: Level,
    pub openai_api_key: Option<String>,
    pub openai_api_base: Option<String>,
    pub solve_model: String,
    pub ocr_model: String,
    pub correction_model: String,
    pub database_url: Option<String>,
    pub storage_root: PathBuf,
    pub public_base_url: String,
    /// Hosts allowed to sign in. Empty means any host.
    pub authorized_domains: Vec<String>,
    pub allowed_origin: HeaderValue,
}

/// Treats empty and placeholder values as absent.
fn configured(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.contains(PLACEHOLDER_MARKER))
}

/// Extracts the host from an origin such as `https://app.example.com:8443`.
fn origin_host(origin: &str) -> &str {
    let without_scheme = origin.split_once("://").map_or(origin, |(_, rest)| rest);
    let authority = without_scheme.split('/').next().unwrap_or_default();
    authority.split(':').next().unwrap_or_default()
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| configured(lookup(key));
        let or_default = |key: &str, default: &str| value(key).unwrap_or_else(|| default.to_string());

        // --- Server Settings ---
        let bind_address_str = or_default("BIND_ADDRESS", "0.0.0.0:3000");
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let log_level_str = or_default("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let allowed_origin_str = or_default("ALLOWED_ORIGIN", "http://localhost:3000");
        let allowed_origin = allowed_origin_str.parse::<HeaderValue>().map_err(|e| {
            ConfigError::InvalidValue("ALLOWED_ORIGIN".to_string(), e.to_string())
        })?;

        // --- Language Model Settings ---
        let openai_api_key = value("OPENAI_API_KEY");
        let openai_api_base = value("OPENAI_API_BASE");
        let solve_model = or_default("SOLVE_MODEL", "gpt-4o");
        let ocr_model = or_default("OCR_MODEL", "gpt-4o");
        let correction_model = or_default("CORRECTION_MODEL", "gpt-4o-mini");

        // --- Persistence Settings ---
        let database_url = value("DATABASE_URL");
        let storage_root = PathBuf::from(or_default("STORAGE_ROOT", "./storage"));
        let public_base_url = or_default("PUBLIC_BASE_URL", "http://localhost:3000");
        let authorized_domains = value("AUTHORIZED_DOMAINS")
            .map(|list| {
                list.split(',')
                    .map(|d| d.trim().to_ascii_lowercase())
                    .filter(|d| !d.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            bind_address,
            log_level,
            openai_api_key,
            openai_api_base,
            solve_model,
            ocr_model,
            correction_model,
            database_url,
            storage_root,
            public_base_url,
            authorized_domains,
            allowed_origin,
        })
    }

    pub fn openai_api_key(&self) -> Result<&str, ConfigError> {
        self.openai_api_key
            .as_deref()
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))
    }

    pub fn database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))
    }

    /// Names of the variables whose absence disables a feature.
    pub fn missing_variables(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.openai_api_key.is_none() {
            missing.push("OPENAI_API_KEY");
        }
        if self.database_url.is_none() {
            missing.push("DATABASE_URL");
        }
        missing
    }

    /// Whether a sign-in request from `origin` may proceed. Requests without
    /// an `Origin` header do not come from a browser page and are allowed.
    pub fn is_authorized_origin(&self, origin: Option<&str>) -> bool {
        if self.authorized_domains.is_empty() {
            return true;
        }
        let Some(origin) = origin else {
            return true;
        };
        let host = origin_host(origin).to_ascii_lowercase();
        self.authorized_domains.iter().any(|d| *d == host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config(&[]).unwrap();
        assert_eq!(config.bind_address.to_string(), "0.0.0.0:3000");
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.solve_model, "gpt-4o");
        assert_eq!(config.correction_model, "gpt-4o-mini");
        assert_eq!(config.storage_root, PathBuf::from("./storage"));
        assert_eq!(config.missing_variables(), vec!["OPENAI_API_KEY", "DATABASE_URL"]);
        assert!(config.openai_api_key().is_err());
    }

    #[test]
    fn placeholder_values_count_as_missing() {
        let config = config(&[
            ("OPENAI_API_KEY", "your-openai-key"),
            ("DATABASE_URL", "   "),
        ])
        .unwrap();
        assert!(config.openai_api_key.is_none());
        assert!(config.database_url.is_none());
    }

    #[test]
    fn real_values_are_kept() {
        let config = config(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("DATABASE_URL", "postgres://localhost/ace"),
            ("SOLVE_MODEL", "gpt-4.1"),
        ])
        .unwrap();
        assert_eq!(config.openai_api_key().unwrap(), "sk-test");
        assert_eq!(config.database_url().unwrap(), "postgres://localhost/ace");
        assert_eq!(config.solve_model, "gpt-4.1");
        assert!(config.missing_variables().is_empty());
    }

    #[test]
    fn invalid_present_value_is_an_error() {
        let err = config(&[("BIND_ADDRESS", "not an address")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref var, _) if var == "BIND_ADDRESS"));
        assert!(config(&[("RUST_LOG", "chatty")]).is_err());
    }

    #[test]
    fn authorized_domains_gate_sign_in_origins() {
        let open = config(&[]).unwrap();
        assert!(open.is_authorized_origin(Some("https://anything.example")));

        let gated = config(&[("AUTHORIZED_DOMAINS", "localhost, Ace.Example.com")]).unwrap();
        assert!(gated.is_authorized_origin(Some("http://localhost:3000")));
        assert!(gated.is_authorized_origin(Some("https://ace.example.com")));
        assert!(!gated.is_authorized_origin(Some("https://evil.example.net")));
        assert!(gated.is_authorized_origin(None));
    }
}
