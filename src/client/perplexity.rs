//! Perplexity chat-completions client used as the lead enricher.
//!
//! Epistemic foundation:
//! - K_i: Sonar answers with web-grounded text in `choices[0].message.content`
//! - B_i: API will respond within timeout (might fail)
//! - B_i: Response will be valid JSON with non-empty content (might fail)
//! - I^B: Network availability unknowable → retry with backoff
//! - K_i: 4xx other than 429 will not succeed on retry → fail fast

use crate::client::RateLimiter;
use crate::models::{EnrichmentError, Lead, LeadgenError, PerplexityConfig, Result};
use crate::pipeline::Enricher;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Approximate price of one sonar query in USD.
pub const COST_PER_LEAD_USD: f64 = 0.005;

/// Instruction sent ahead of every lead prompt.
pub const SYSTEM_PROMPT: &str = "You are a business research assistant. \
Provide concise, factual summaries about businesses. \
Do not use markdown formatting. Keep responses to 2-3 sentences.";

/// Sources consulted per query.
const NUM_SEARCH_RESULTS: u32 = 5;

/// Upper bound on a provider-requested `retry-after` wait.
const MAX_RETRY_AFTER_SECS: f64 = 60.0;

/// Seconds to wait from a 429's `retry-after` header, 1 s when absent or unusable.
fn retry_after_secs(headers: &HeaderMap) -> f64 {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map_or(1.0, |secs| secs.min(MAX_RETRY_AFTER_SECS))
}

/// Message in a chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Chat completion request payload.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    num_search_results: u32,
}

/// Chat completion response.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// Perplexity API error response.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Build the research prompt for one lead.
///
/// Leads with a website ask for research on the site; the rest ask for an
/// inference from name and category.
pub fn build_prompt(lead: &Lead) -> String {
    let locality = lead.locality();
    match lead.website() {
        Some(website) => format!(
            "Research the business website {website} for '{}' ({}) located in {locality}. \
             Write a 2-3 sentence concise summary covering: what the business does, \
             its key services or products, and any notable highlights. \
             Keep it factual and professional.",
            lead.name, lead.category
        ),
        None => format!(
            "The business '{}' is listed under the category '{}' in {locality}. \
             It does not have a website. Based on the business name and category, \
             write a 2-3 sentence concise summary of what this business likely offers, \
             its typical services, and target customers. Keep it factual and professional.",
            lead.name, lead.category
        ),
    }
}

/// Perplexity API client.
///
/// Features:
/// - Pacing and 429 backoff through the shared [`RateLimiter`]
/// - Retry with exponential backoff on timeouts and 5xx
/// - Token tracking
pub struct PerplexityClient {
    client: reqwest::Client,
    api_key: Option<String>,
    api_key_env: String,
    base_url: String,
    model: String,
    timeout: Duration,
    max_retries: u32,
    backoff_base: Duration,
    rate_limiter: Arc<RateLimiter>,
    total_input_tokens: AtomicU64,
    total_output_tokens: AtomicU64,
}

impl PerplexityClient {
    /// Create a new client. A missing key makes every call fail with
    /// [`EnrichmentError::MissingApiKey`].
    pub fn new(
        config: &PerplexityConfig,
        api_key: Option<String>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(LeadgenError::Network)?;

        Ok(Self {
            client,
            api_key,
            api_key_env: config.api_key_env.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout,
            max_retries: config.max_retries.max(1),
            backoff_base: Duration::from_secs(2),
            rate_limiter,
            total_input_tokens: AtomicU64::new(0),
            total_output_tokens: AtomicU64::new(0),
        })
    }

    /// Override the first retry delay (doubles on each further retry).
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Get the rate limiter.
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Build headers for a request.
    fn headers(&self, api_key: &str) -> std::result::Result<HeaderMap, EnrichmentError> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|_| {
            EnrichmentError::Rejected {
                status: 0,
                message: "API key contains characters not allowed in a header".to_string(),
            }
        })?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    /// Summarize one business.
    ///
    /// B_i(API available) → Result
    /// B_i(valid response) → Result
    /// I^B(rate limits) → adaptive backoff
    pub async fn summarize(&self, lead: &Lead) -> std::result::Result<String, EnrichmentError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| EnrichmentError::MissingApiKey {
                env_var: self.api_key_env.clone(),
            })?;
        let headers = self.headers(api_key)?;

        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![Message::system(SYSTEM_PROMPT), Message::user(build_prompt(lead))],
            num_search_results: NUM_SEARCH_RESULTS,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let mut last_error: Option<EnrichmentError> = None;

        for attempt in 1..=self.max_retries {
            if let Some(previous) = &last_error {
                let wait = match previous.retry_after().filter(|secs| secs.is_finite()) {
                    Some(secs) => Duration::from_secs_f64(secs.clamp(0.0, MAX_RETRY_AFTER_SECS)),
                    None => self.backoff(attempt - 1),
                };
                debug!(
                    lead = %lead.name,
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    error = %previous,
                    "Retrying enrichment"
                );
                tokio::time::sleep(wait).await;
            }

            self.rate_limiter.wait_if_needed().await;

            let response = match self
                .client
                .post(&url)
                .headers(headers.clone())
                .json(&request)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) if e.is_timeout() => {
                    last_error = Some(EnrichmentError::Timeout(self.timeout));
                    continue;
                }
                Err(e) => {
                    last_error = Some(EnrichmentError::Network(e));
                    continue;
                }
            };

            let status = response.status().as_u16();
            self.rate_limiter.record_request(status, response.headers());

            if status == 429 {
                last_error = Some(EnrichmentError::RateLimited {
                    retry_after_secs: retry_after_secs(response.headers()),
                });
                continue;
            }

            if !response.status().is_success() {
                let error_body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ApiErrorResponse>(&error_body)
                    .map(|e| e.error.message)
                    .unwrap_or_else(|_| error_body.chars().take(200).collect());

                // Client errors will not succeed on retry
                if (400..500).contains(&status) {
                    return Err(EnrichmentError::Rejected { status, message });
                }
                last_error = Some(EnrichmentError::Api { status, message });
                continue;
            }

            let body: ChatCompletionResponse = match response.json().await {
                Ok(body) => body,
                Err(e) => {
                    last_error = Some(EnrichmentError::InvalidResponse(format!(
                        "Failed to parse response: {e}"
                    )));
                    continue;
                }
            };

            if let Some(usage) = &body.usage {
                self.total_input_tokens
                    .fetch_add(usage.prompt_tokens as u64, Ordering::Relaxed);
                self.total_output_tokens
                    .fetch_add(usage.completion_tokens as u64, Ordering::Relaxed);
            }

            let content = body
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content.trim().to_string())
                .unwrap_or_default();
            if content.is_empty() {
                last_error = Some(EnrichmentError::InvalidResponse(
                    "Empty content in response".to_string(),
                ));
                continue;
            }

            return Ok(content);
        }

        Err(EnrichmentError::MaxRetriesExceeded {
            attempts: self.max_retries,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
        })
    }

    /// Get total tokens tracked.
    pub fn total_tokens(&self) -> (u64, u64) {
        (
            self.total_input_tokens.load(Ordering::Relaxed),
            self.total_output_tokens.load(Ordering::Relaxed),
        )
    }
}

#[async_trait]
impl Enricher for PerplexityClient {
    async fn enrich(&self, lead: &Lead) -> std::result::Result<String, EnrichmentError> {
        self.summarize(lead).await
    }

    fn estimated_cost(&self, count: usize) -> Option<f64> {
        Some(count as f64 * COST_PER_LEAD_USD)
    }
}
