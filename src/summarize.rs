use crate::config::SimConfig;
use crate::debate::TranscriptEntry;
use crate::gateway::{unwrap_code_fence, CompletionRequest, Gateway, ResponseShape};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Summary artifacts for one completed debate.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DebateSummary {
    pub summary: String,
    pub keywords: Vec<String>,
    pub suggestion: String,
}

pub struct Summarizer<'a> {
    gateway: &'a dyn Gateway,
    config: &'a SimConfig,
}

impl<'a> Summarizer<'a> {
    pub fn new(gateway: &'a dyn Gateway, config: &'a SimConfig) -> Self {
        Self { gateway, config }
    }

    /// Single-shot, best-effort summarization over the full transcript.
    /// Any failure resolves to the fixed generic triple; no retries.
    pub async fn summarize(&self, transcript: &[TranscriptEntry]) -> DebateSummary {
        let serialized = match serde_json::to_string_pretty(transcript) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "transcript serialization failed");
                return fallback_summary();
            }
        };

        let request = CompletionRequest {
            system_prompt: "You are an assistant specializing in analyzing debates.".to_string(),
            user_prompt: format!(
                "Given the debate transcript below, provide a concise summary (100-150 words), \
                 extract 5-10 key thematic keywords, and suggest one actionable optimization \
                 for the decision-making process. Return a JSON object with keys: 'summary' \
                 (string), 'keywords' (list of strings), 'suggestion' (string).\n\
                 Transcript:\n{}",
                serialized,
            ),
            temperature: 0.7,
            max_tokens: self.config.max_tokens,
            response_shape: ResponseShape::JsonObject,
            timeout_s: self.config.timeout_s,
        };

        let completion = match self.gateway.complete(request).await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "summarization failed, using fallback");
                return fallback_summary();
            }
        };

        match serde_json::from_str::<Value>(unwrap_code_fence(&completion.content)) {
            Ok(payload) => parse_summary(&payload),
            Err(e) => {
                warn!(error = %e, "summarization returned non-JSON, using fallback");
                fallback_summary()
            }
        }
    }
}

fn parse_summary(payload: &Value) -> DebateSummary {
    let fallback = fallback_summary();
    let keywords: Vec<String> = payload
        .get("keywords")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .filter(|k: &Vec<String>| !k.is_empty())
        .unwrap_or(fallback.keywords);

    DebateSummary {
        summary: payload
            .get("summary")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(fallback.summary),
        keywords,
        suggestion: payload
            .get("suggestion")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(fallback.suggestion),
    }
}

fn fallback_summary() -> DebateSummary {
    DebateSummary {
        summary: "The debate focused on stakeholder priorities but lacked consensus.".to_string(),
        keywords: vec!["decision".to_string(), "stakeholder".to_string(), "debate".to_string()],
        suggestion: "Encourage structured facilitation to align stakeholders.".to_string(),
    }
}
