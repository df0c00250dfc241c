//! Evaluation backend client.
//!
//! [`EvaluationClient`] is the seam between the orchestrator and the
//! analysis/generation service. [`HttpEvaluationClient`] implements it over
//! the Gemini and OpenRouter HTTP APIs, dispatching on the provider named in
//! the [`BackendConfig`] passed to every call.

pub mod gemini;
pub mod openrouter;
pub mod prompt;
pub mod schema;

use crate::models::{Artifact, EvaluationModel, EvaluationReport, MediaData, Persona};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Failure of a single backend call.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("request timed out after {0}s")]
    Timeout(u64),
    #[error("cannot connect to {0}")]
    Connect(String),
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("failed to parse response: {0}")]
    Parse(String),
    #[error("response violates the report schema: {0}")]
    Schema(String),
    #[error("backend returned no usable content: {0}")]
    EmptyResponse(String),
    #[error("unsupported request: {0}")]
    Unsupported(String),
    #[error("backend not configured: {0}")]
    NotConfigured(String),
}

impl BackendError {
    /// Whether repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Timeout(_) | BackendError::Connect(_) => true,
            BackendError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Map a transport error, naming the endpoint and timeout.
    fn from_transport(err: reqwest::Error, config: &BackendConfig) -> Self {
        if err.is_timeout() {
            BackendError::Timeout(config.timeout.as_secs())
        } else if err.is_connect() {
            BackendError::Connect(config.base_url().to_string())
        } else {
            BackendError::Http(err)
        }
    }
}

/// Backend service provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Gemini,
    #[value(name = "openrouter")]
    OpenRouter,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::Gemini => write!(f, "gemini"),
            Provider::OpenRouter => write!(f, "openrouter"),
        }
    }
}

/// Fully resolved backend settings, passed explicitly into every call.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub provider: Provider,
    pub api_key: String,
    /// Model used for the structured analysis.
    pub analysis_model: String,
    /// Model used to redraw the artifact.
    pub image_model: String,
    /// Endpoint override; `None` uses the provider's public API.
    pub base_url: Option<String>,
    /// Per-call timeout.
    pub timeout: Duration,
    /// Extra attempts after a retryable failure.
    pub retries: usize,
    pub temperature: f32,
}

impl BackendConfig {
    /// Effective endpoint root for the configured provider.
    pub fn base_url(&self) -> &str {
        match (&self.base_url, self.provider) {
            (Some(url), _) => url.trim_end_matches('/'),
            (None, Provider::Gemini) => gemini::DEFAULT_BASE_URL,
            (None, Provider::OpenRouter) => openrouter::DEFAULT_BASE_URL,
        }
    }
}

/// Typed interface to the analysis/generation backend.
#[async_trait]
pub trait EvaluationClient: Send + Sync {
    /// Produce the structured report for one persona.
    async fn analyze(
        &self,
        artifact: &Artifact,
        persona: &Persona,
        model: EvaluationModel,
        config: &BackendConfig,
    ) -> Result<EvaluationReport, BackendError>;

    /// Redraw the artifact to address the issues in `report`.
    async fn regenerate(
        &self,
        artifact: &Artifact,
        persona: &Persona,
        report: &EvaluationReport,
        config: &BackendConfig,
    ) -> Result<MediaData, BackendError>;
}

/// HTTP implementation of [`EvaluationClient`].
#[derive(Clone)]
pub struct HttpEvaluationClient {
    http: reqwest::Client,
}

impl HttpEvaluationClient {
    pub fn new() -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("uxpanel/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl EvaluationClient for HttpEvaluationClient {
    async fn analyze(
        &self,
        artifact: &Artifact,
        persona: &Persona,
        model: EvaluationModel,
        config: &BackendConfig,
    ) -> Result<EvaluationReport, BackendError> {
        ensure_configured(config)?;
        with_retries(config, "analyze", || async move {
            match config.provider {
                Provider::Gemini => {
                    gemini::analyze(&self.http, artifact, persona, model, config).await
                }
                Provider::OpenRouter => {
                    openrouter::analyze(&self.http, artifact, persona, model, config).await
                }
            }
        })
        .await
    }

    async fn regenerate(
        &self,
        artifact: &Artifact,
        persona: &Persona,
        report: &EvaluationReport,
        config: &BackendConfig,
    ) -> Result<MediaData, BackendError> {
        ensure_configured(config)?;
        with_retries(config, "regenerate", || async move {
            match config.provider {
                Provider::Gemini => {
                    gemini::regenerate(&self.http, artifact, persona, report, config).await
                }
                Provider::OpenRouter => {
                    openrouter::regenerate(&self.http, artifact, persona, report, config).await
                }
            }
        })
        .await
    }
}

fn ensure_configured(config: &BackendConfig) -> Result<(), BackendError> {
    if config.api_key.trim().is_empty() {
        return Err(BackendError::NotConfigured(format!(
            "no API key for provider {}",
            config.provider
        )));
    }
    Ok(())
}

/// Run `op`, retrying retryable failures up to `config.retries` extra times
/// with a linear backoff.
async fn with_retries<T, F, Fut>(
    config: &BackendConfig,
    operation: &str,
    op: F,
) -> Result<T, BackendError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < config.retries => {
                attempt += 1;
                let delay = retry_delay(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying backend call"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                debug!(operation, attempt, error = %e, "backend call failed");
                return Err(e);
            }
        }
    }
}

fn retry_delay(attempt: usize) -> Duration {
    Duration::from_millis(500 * attempt as u64)
}

/// Read a non-success response into an [`BackendError::Api`].
async fn api_error(response: reqwest::Response) -> BackendError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    BackendError::Api { status, body }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(retries: usize) -> BackendConfig {
        BackendConfig {
            provider: Provider::Gemini,
            api_key: "key".to_string(),
            analysis_model: "gemini-2.5-flash".to_string(),
            image_model: "gemini-3-pro-image-preview".to_string(),
            base_url: None,
            timeout: Duration::from_secs(5),
            retries,
            temperature: 0.2,
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(BackendError::Timeout(30).is_retryable());
        assert!(BackendError::Api {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(BackendError::Api {
            status: 429,
            body: String::new()
        }
        .is_retryable());
        assert!(!BackendError::Api {
            status: 401,
            body: String::new()
        }
        .is_retryable());
        assert!(!BackendError::Schema("missing overallScore".to_string()).is_retryable());
    }

    #[test]
    fn test_base_url_resolution() {
        let mut cfg = config(0);
        assert_eq!(cfg.base_url(), gemini::DEFAULT_BASE_URL);
        cfg.provider = Provider::OpenRouter;
        assert_eq!(cfg.base_url(), openrouter::DEFAULT_BASE_URL);
        cfg.base_url = Some("http://localhost:8080/".to_string());
        assert_eq!(cfg.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_missing_api_key_is_not_configured() {
        let mut cfg = config(0);
        cfg.api_key = "  ".to_string();
        assert!(matches!(
            ensure_configured(&cfg),
            Err(BackendError::NotConfigured(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retries_recovers_from_transient_failure() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let result = with_retries(&config(2), "analyze", || async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(BackendError::Timeout(5))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retries_does_not_retry_schema_errors() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let result: Result<(), _> = with_retries(&config(3), "analyze", || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(BackendError::Schema("bad".to_string()))
        })
        .await;

        assert!(matches!(result, Err(BackendError::Schema(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retries_gives_up_after_budget() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let result: Result<(), _> = with_retries(&config(2), "regenerate", || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(BackendError::Api {
                status: 500,
                body: "boom".to_string(),
            })
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
