//! The typed configuration surface (spec §6), loaded from TOML with built-in
//! defaults. Parsing itself is treated as ambient infrastructure — the spec
//! names config parsing as an external collaborator — but the struct shape
//! and its defaults are this crate's concern.

use crate::error::HapaxError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

fn default_port() -> u16 {
    8080
}

#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
    pub max_header_bytes: usize,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            read_timeout: Duration::from_secs(15),
            write_timeout: Duration::from_secs(15),
            max_header_bytes: 1 << 20,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// A secret-bearing string that redacts itself in `Debug` and in any
/// accidental `Display`, so a stray `tracing::info!(?config)` never leaks an
/// API key into logs.
#[derive(Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct SecretValue(pub String);

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "<empty>")
        } else {
            write!(f, "<redacted>")
        }
    }
}

impl SecretValue {
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: usize,
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    pub multiplier: f64,
    pub retryable_errors: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            retryable_errors: vec![
                "rate_limit".to_string(),
                "timeout".to_string(),
                "server_error".to_string(),
                "circuit_open".to_string(),
            ],
        }
    }
}

#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub api_key: SecretValue,
    pub max_context_tokens: u32,
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: String::new(),
            model: String::new(),
            api_key: SecretValue::default(),
            max_context_tokens: 8192,
            retry: RetryConfig::default(),
        }
    }
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &self.api_key)
            .field("max_context_tokens", &self.max_context_tokens)
            .field("retry", &self.retry)
            .finish()
    }
}

#[derive(Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    pub r#type: String,
    pub model: String,
    #[serde(default)]
    pub api_key: SecretValue,
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("type", &self.r#type)
            .field("model", &self.model)
            .field("api_key", &self.api_key)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerSurfaceConfig {
    pub max_requests: usize,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub failure_threshold: usize,
}

impl Default for CircuitBreakerSurfaceConfig {
    fn default() -> Self {
        Self {
            max_requests: 1,
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(30),
            failure_threshold: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub failure_threshold: usize,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(5),
            failure_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RouteConfig {
    pub path: String,
    pub handler: String,
    pub version: String,
    pub methods: Vec<String>,
    pub middleware: Vec<String>,
    pub headers: HashMap<String, String>,
    pub health_check: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub llm: Option<LlmConfig>,
    pub providers: HashMap<String, ProviderConfig>,
    pub provider_preference: Vec<String>,
    pub circuit_breaker: CircuitBreakerSurfaceConfig,
    pub health_check: HealthCheckConfig,
    pub routes: Vec<RouteConfig>,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("port", &self.port)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("max_header_bytes", &self.max_header_bytes)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish()
    }
}

impl Config {
    /// Loads configuration from the path named by `HAPAX_CONFIG`, falling
    /// back to built-in defaults if the variable is unset. A malformed file
    /// is a startup failure (`internal_error`, exit code 1), never a
    /// per-request one.
    pub fn load() -> Result<Self, HapaxError> {
        match std::env::var("HAPAX_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path)),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, HapaxError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            HapaxError::internal("startup", format!("reading config {}: {e}", path.display()))
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, HapaxError> {
        let config: Config = toml::from_str(raw)
            .map_err(|e| HapaxError::internal("startup", format!("parsing config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolves the `llm` vs `providers`/`provider_preference` precedence
    /// question left open by the source config surface: when `providers` is
    /// non-empty, it and `provider_preference` override the singleton `llm`
    /// block. A startup warning is logged when both are configured without
    /// `provider_preference` covering every entry in `providers`.
    fn validate(&self) -> Result<(), HapaxError> {
        if self.providers.is_empty() && self.llm.is_none() {
            return Err(HapaxError::internal("startup", "no providers configured"));
        }

        if !self.providers.is_empty() && self.llm.is_some() {
            tracing::warn!(
                "both `llm` and `providers` are configured; `providers` + `provider_preference` take precedence"
            );
        }

        for name in &self.provider_preference {
            if !self.providers.contains_key(name) {
                tracing::warn!(provider = name, "provider_preference names an unconfigured provider");
            }
        }

        Ok(())
    }

    /// Effective provider preference order: `provider_preference` if set,
    /// else `providers` in the (unspecified but stable) map iteration order
    /// with names sorted for determinism.
    pub fn effective_preference(&self) -> Vec<String> {
        if !self.provider_preference.is_empty() {
            return self.provider_preference.clone();
        }
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_server_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
    }

    #[test]
    fn secret_value_is_redacted_in_debug() {
        let secret = SecretValue("sk-super-secret".to_string());
        assert_eq!(format!("{secret:?}"), "<redacted>");
    }

    #[test]
    fn parses_duration_strings_via_humantime() {
        let toml = r#"
            [server]
            port = 9090

            [circuit_breaker]
            interval = "45s"
            timeout = "10s"
            failure_threshold = 4
            max_requests = 2

            [providers.anthropic]
            type = "anthropic"
            model = "claude"
            api_key = "sk-test"

            provider_preference = ["anthropic"]
        "#;
        let config = Config::from_toml(toml).expect("valid config");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.circuit_breaker.interval, Duration::from_secs(45));
        assert_eq!(config.providers["anthropic"].api_key.expose(), "sk-test");
    }

    #[test]
    fn rejects_config_with_no_providers() {
        let err = Config::from_toml("").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Internal);
    }

    #[test]
    fn effective_preference_falls_back_to_sorted_provider_names() {
        let mut config = Config::default();
        config.providers.insert("ollama".to_string(), ProviderConfig {
            r#type: "ollama".to_string(),
            model: "llama3".to_string(),
            api_key: SecretValue::default(),
            endpoint: None,
        });
        config.providers.insert("anthropic".to_string(), ProviderConfig {
            r#type: "anthropic".to_string(),
            model: "claude".to_string(),
            api_key: SecretValue::default(),
            endpoint: None,
        });
        assert_eq!(config.effective_preference(), vec!["anthropic", "ollama"]);
    }
}
