use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-3-flash-preview";

#[derive(Debug, Error)]
pub enum GenerateError {
    /// Rate limited or overloaded; worth retrying
    #[error("generation service busy ({status}): {message}")]
    Transient { status: u16, message: String },

    #[error("generation request failed ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("network error while calling the generation service: {0}")]
    Http(#[from] reqwest::Error),

    #[error("could not decode the generation response: {0}")]
    Decode(String),

    #[error("the generation service returned an empty report")]
    EmptyResponse,

    #[error("the generation service is still unavailable after {attempts} attempts, please try again later")]
    Unavailable { attempts: u32 },

    #[error("GEMINI_API_KEY is not configured")]
    MissingApiKey,
}

impl GenerateError {
    /// Classify a non-success HTTP status
    pub fn from_status(status: u16, message: String) -> Self {
        if status == StatusCode::TOO_MANY_REQUESTS.as_u16()
            || status == StatusCode::SERVICE_UNAVAILABLE.as_u16()
        {
            GenerateError::Transient { status, message }
        } else {
            GenerateError::Api { status, message }
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, GenerateError::Transient { .. })
    }
}

/// Retry schedule for transient generation failures
///
/// After failed attempt `n` (0-based) the caller waits
/// `base_delay + increment * n` before resubmitting.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub increment: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            increment: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_add(self.increment.saturating_mul(attempt))
    }

    /// Run `op` under this policy
    ///
    /// Only `GenerateError::Transient` is retried. Any other error returns
    /// immediately. When every attempt was transient the result is
    /// `GenerateError::Unavailable`.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, GenerateError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GenerateError>>,
    {
        let attempts = self.max_attempts.max(1);

        for attempt in 0..attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    if attempt + 1 < attempts {
                        let delay = self.delay_for(attempt);
                        log::warn!(
                            "generation attempt {}/{} failed: {}; retrying in {:?}",
                            attempt + 1,
                            attempts,
                            e,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        log::warn!("generation attempt {}/{} failed: {}", attempt + 1, attempts, e);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(GenerateError::Unavailable { attempts })
    }
}

/// Something that turns a prompt into a Markdown report
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError>;
}

/// Settings for the Gemini `generateContent` endpoint
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            base_url: GEMINI_API_BASE.to_string(),
            timeout_secs: 120,
            temperature: 0.3,
            top_k: 40,
            top_p: 0.95,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationParams,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationParams {
    temperature: f32,
    top_k: u32,
    top_p: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateResponse {
    fn into_text(self) -> Option<String> {
        let text: String = self
            .candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .filter_map(|p| p.text)
            .collect();
        if text.trim().is_empty() { None } else { Some(text) }
    }
}

/// Report generator backed by the Gemini REST API
pub struct GeminiClient {
    config: GeminiConfig,
    retry: RetryPolicy,
    client: Client,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig, retry: RetryPolicy) -> Result<Self, GenerateError> {
        if config.api_key.is_empty() {
            return Err(GenerateError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            config,
            retry,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.base_url, self.config.model
        )
    }

    /// One request, no retries
    async fn try_generate(&self, prompt: &str) -> Result<String, GenerateError> {
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![RequestPart { text: prompt }],
            }],
            generation_config: GenerationParams {
                temperature: self.config.temperature,
                top_k: self.config.top_k,
                top_p: self.config.top_p,
            },
        };

        let response = self
            .client
            .post(self.endpoint())
            .query(&[("key", self.config.api_key.as_str())])
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GenerateError::from_status(status.as_u16(), message));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| GenerateError::Decode(e.to_string()))?;

        body.into_text().ok_or(GenerateError::EmptyResponse)
    }
}

#[async_trait]
impl ReportGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        self.retry.run(|| self.try_generate(prompt)).await
    }
}
