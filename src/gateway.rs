use crate::error::GatewayError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

/// Response-shape hint passed through to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    Text,
    JsonObject,
}

/// One text-completion request. Vendor-neutral: any provider that accepts a
/// prompt pair and returns text can sit behind the `Gateway` trait.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub response_shape: ResponseShape,
    pub timeout_s: u64,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub finish_reason: Option<String>,
}

/// The external text-generation boundary. Everything the pipeline knows
/// about the provider goes through this trait.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, GatewayError>;
}

/// Call the gateway with bounded retries and a fixed backoff delay.
///
/// Applied uniformly at every call site instead of per-stage ad hoc loops.
/// Terminal rejections are surfaced immediately.
pub async fn complete_with_retry(
    gateway: &dyn Gateway,
    request: &CompletionRequest,
    max_retries: u32,
    retry_delay: Duration,
) -> Result<Completion, GatewayError> {
    let mut last_err = GatewayError::Transient("no attempt made".to_string());
    for attempt in 0..=max_retries {
        match gateway.complete(request.clone()).await {
            Ok(completion) => return Ok(completion),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                warn!(attempt, error = %e, "gateway call failed");
                last_err = e;
                if attempt < max_retries {
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }
    }
    Err(last_err)
}

/// Strip an optional ```json / ``` fence wrapper from a model response.
pub fn unwrap_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

// ── OpenRouter implementation ──

pub struct OpenRouterGateway {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenRouterGateway {
    pub fn new(api_key: &str, model: &str, base_url: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url.to_string(),
        }
    }

    fn headers(&self) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Ok(auth) = format!("Bearer {}", self.api_key).parse() {
            headers.insert("Authorization", auth);
        }
        if let Ok(content_type) = "application/json".parse() {
            headers.insert("Content-Type", content_type);
        }
        headers
    }
}

fn map_api_error(status: reqwest::StatusCode, body: &str) -> GatewayError {
    match status.as_u16() {
        401 => GatewayError::Rejected("invalid API key".to_string()),
        402 => GatewayError::Rejected("insufficient credits".to_string()),
        429 => GatewayError::Transient("rate limited".to_string()),
        500 | 502 | 503 => {
            GatewayError::Transient(format!("provider unavailable ({})", status))
        }
        _ => GatewayError::Rejected(format!("API error ({}): {}", status, body)),
    }
}

#[async_trait]
impl Gateway for OpenRouterGateway {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, GatewayError> {
        let mut body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": request.user_prompt},
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if request.response_shape == ResponseShape::JsonObject {
            body["response_format"] = json!({"type": "json_object"});
        }

        let response = self
            .client
            .post(&self.base_url)
            .headers(self.headers())
            .timeout(Duration::from_secs(request.timeout_s))
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Transient(format!("network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .map_err(|e| GatewayError::Transient(format!("read error: {}", e)))?;
            return Err(map_api_error(status, &error_text));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::MalformedOutput(format!("invalid response body: {}", e)))?;

        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| GatewayError::MalformedOutput("empty completion".to_string()))?;

        let finish_reason = data["choices"][0]["finish_reason"].as_str().map(str::to_string);

        Ok(Completion { content, finish_reason })
    }
}

// ── Test doubles shared across the crate's test modules ──

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Returns canned responses in order, then repeats the last one.
    /// Records every request so tests can assert on prompt contents.
    pub struct ScriptedGateway {
        responses: Mutex<VecDeque<Result<String, GatewayError>>>,
        pub requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedGateway {
        pub fn new(responses: Vec<Result<String, GatewayError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn always(content: &str) -> Self {
            Self::new(vec![Ok(content.to_string())])
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().expect("requests lock").len()
        }
    }

    #[async_trait]
    impl Gateway for ScriptedGateway {
        async fn complete(&self, request: CompletionRequest) -> Result<Completion, GatewayError> {
            self.requests.lock().expect("requests lock").push(request);
            let mut responses = self.responses.lock().expect("responses lock");
            let next = if responses.len() > 1 {
                responses.pop_front().expect("non-empty script")
            } else {
                responses.front().cloned().expect("non-empty script")
            };
            next.map(|content| Completion { content, finish_reason: Some("stop".to_string()) })
        }
    }

    /// Gateway that fails every call with a transient error.
    pub struct FailingGateway;

    #[async_trait]
    impl Gateway for FailingGateway {
        async fn complete(&self, _request: CompletionRequest) -> Result<Completion, GatewayError> {
            Err(GatewayError::Transient("simulated outage".to_string()))
        }
    }

    pub fn request(prompt: &str) -> CompletionRequest {
        CompletionRequest {
            system_prompt: "system".to_string(),
            user_prompt: prompt.to_string(),
            temperature: 0.5,
            max_tokens: 100,
            response_shape: ResponseShape::Text,
            timeout_s: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{request, FailingGateway, ScriptedGateway};
    use super::*;

    #[tokio::test]
    async fn unit_retry_succeeds_after_transient_failures() {
        let gateway = ScriptedGateway::new(vec![
            Err(GatewayError::Transient("timeout".to_string())),
            Err(GatewayError::Transient("timeout".to_string())),
            Ok("recovered".to_string()),
        ]);

        let completion =
            complete_with_retry(&gateway, &request("hi"), 2, Duration::from_millis(0))
                .await
                .expect("third attempt should succeed");

        assert_eq!(completion.content, "recovered");
        assert_eq!(gateway.request_count(), 3);
    }

    #[tokio::test]
    async fn unit_retry_exhaustion_returns_last_error() {
        let gateway = FailingGateway;

        let err = complete_with_retry(&gateway, &request("hi"), 2, Duration::from_millis(0))
            .await
            .expect_err("all attempts should fail");

        assert!(matches!(err, GatewayError::Transient(_)));
    }

    #[tokio::test]
    async fn unit_terminal_rejection_is_not_retried() {
        let gateway = ScriptedGateway::new(vec![
            Err(GatewayError::Rejected("bad key".to_string())),
            Ok("never reached".to_string()),
        ]);

        let err = complete_with_retry(&gateway, &request("hi"), 3, Duration::from_millis(0))
            .await
            .expect_err("rejection should surface immediately");

        assert!(matches!(err, GatewayError::Rejected(_)));
        assert_eq!(gateway.request_count(), 1);
    }

    #[test]
    fn unit_unwrap_code_fence_handles_fenced_and_bare_payloads() {
        assert_eq!(unwrap_code_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(unwrap_code_fence("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(unwrap_code_fence("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(unwrap_code_fence("  plain text  "), "plain text");
    }

    #[test]
    fn unit_map_api_error_classifies_status_codes() {
        assert!(matches!(
            map_api_error(reqwest::StatusCode::TOO_MANY_REQUESTS, ""),
            GatewayError::Transient(_)
        ));
        assert!(matches!(
            map_api_error(reqwest::StatusCode::SERVICE_UNAVAILABLE, ""),
            GatewayError::Transient(_)
        ));
        assert!(matches!(
            map_api_error(reqwest::StatusCode::UNAUTHORIZED, ""),
            GatewayError::Rejected(_)
        ));
    }
}
