//! A generic HTTP-backed [`Provider`]. Concrete LLM client SDKs (Anthropic,
//! OpenAI, Ollama, ...) are an external collaborator per spec §1: this is the
//! one concrete adapter the gateway ships so it can actually run end-to-end,
//! posting the wire [`CompletionRequest`] to a configured endpoint and
//! expecting a `{"completion": string}` response back, independent of any
//! particular vendor's request/response shape.

use crate::config::ProviderConfig;
use crate::error::ProviderErrorKind;
use crate::model::{CompletionRequest, CompletionResponse};
use crate::provider::{Provider, ProviderError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

pub struct HttpProvider {
    name: String,
    client: Client,
    endpoint: String,
    api_key: String,
}

impl HttpProvider {
    pub fn new(name: impl Into<String>, config: &ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder().build().map_err(|e| ProviderError {
            kind: ProviderErrorKind::Other,
            message: format!("building HTTP client: {e}"),
        })?;
        let endpoint = config.endpoint.clone().unwrap_or_else(|| {
            format!("https://api.{}.invalid/v1/completions", config.r#type)
        });
        Ok(Self { name: name.into(), client, endpoint, api_key: config.api_key.expose().to_string() })
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(
        &self,
        request: &CompletionRequest,
        deadline: Duration,
    ) -> Result<CompletionResponse, ProviderError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(deadline)
            .json(request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, &self.name));
        }

        response.json::<CompletionResponse>().await.map_err(|e| ProviderError {
            kind: ProviderErrorKind::ServerError,
            message: format!("{}: malformed response body: {e}", self.name),
        })
    }
}

fn classify_transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError { kind: ProviderErrorKind::Timeout, message: err.to_string() }
    } else {
        ProviderError { kind: ProviderErrorKind::ServerError, message: err.to_string() }
    }
}

fn classify_status(status: StatusCode, provider: &str) -> ProviderError {
    let kind = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderErrorKind::Auth,
        StatusCode::TOO_MANY_REQUESTS => ProviderErrorKind::RateLimit,
        s if s.is_server_error() => ProviderErrorKind::ServerError,
        _ => ProviderErrorKind::Other,
    };
    ProviderError { kind, message: format!("{provider} responded {status}") }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderConfig, SecretValue};

    #[test]
    fn unauthorized_status_classifies_as_auth() {
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED, "anthropic").kind, ProviderErrorKind::Auth);
    }

    #[test]
    fn server_error_status_is_retryable_via_classification() {
        let err = classify_status(StatusCode::BAD_GATEWAY, "ollama");
        assert_eq!(err.kind, ProviderErrorKind::ServerError);
        assert!(err.kind.is_retryable());
    }

    #[test]
    fn endpoint_falls_back_to_type_derived_default() {
        let config = ProviderConfig {
            r#type: "anthropic".to_string(),
            model: "claude".to_string(),
            api_key: SecretValue::default(),
            endpoint: None,
        };
        let provider = HttpProvider::new("anthropic", &config).unwrap();
        assert!(provider.endpoint.contains("anthropic"));
    }
}
