//! OpenAI HTTP backend implementation
//!
//! Chat-completions client for OpenAI-compatible endpoints. Retrying is the
//! attempt loop's concern, so each invocation is a single request; the
//! backend only classifies failures so the loop gets a stable reason text.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::LlmSettings;
use crate::error::GeneratorError;
use crate::llm::{GenerateRequest, Generated, Generator};

/// Default OpenAI API endpoint
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Maximum number of body bytes echoed into error messages
const ERROR_BODY_CAP: usize = 200;

/// OpenAI-compatible chat-completions backend.
#[derive(Debug)]
pub struct OpenAiBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
}

impl OpenAiBackend {
    /// Create a backend from configuration.
    ///
    /// The API key is read from the environment variable named in
    /// `settings.api_key_env`.
    ///
    /// # Errors
    /// Returns `GeneratorError::Misconfiguration` if the key variable is
    /// unset or the HTTP client cannot be constructed.
    pub fn from_settings(settings: &LlmSettings) -> Result<Self, GeneratorError> {
        let api_key = std::env::var(&settings.api_key_env).map_err(|_| {
            GeneratorError::Misconfiguration(format!(
                "API key not found in environment variable '{}'. \
                 Set this variable or configure a different api_key_env in [llm].",
                settings.api_key_env
            ))
        })?;

        let client = reqwest::Client::builder()
            .build()
            .map_err(|err| GeneratorError::Misconfiguration(err.to_string()))?;

        Ok(Self {
            client,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            timeout: Duration::from_secs(settings.request_timeout_secs),
        })
    }

    /// Render a request into chat messages, appending the prior failure as
    /// corrective context when present.
    fn render_messages(request: &GenerateRequest) -> Vec<ChatMessage> {
        let mut content = request.context.clone();
        if let Some(prior_error) = &request.prior_error {
            content.push_str(&format!(
                "\n\nThe previous attempt failed with:\n```\n{prior_error}\n```\n\
                 Resolve the error and produce a corrected output."
            ));
        }
        vec![ChatMessage {
            role: "user".to_string(),
            content,
        }]
    }
}

#[async_trait]
impl Generator for OpenAiBackend {
    async fn generate(&self, request: GenerateRequest) -> Result<Generated, GeneratorError> {
        debug!(
            provider = "openai",
            model = %self.model,
            request_type = %request.request_type,
            hypothesis = %request.hypothesis_id,
            timeout_secs = self.timeout.as_secs(),
            "invoking generator backend"
        );

        let body = ChatRequest {
            model: self.model.clone(),
            messages: Self::render_messages(&request),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    GeneratorError::Timeout {
                        duration: self.timeout,
                    }
                } else {
                    GeneratorError::Transport(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_error_status(status, &body));
        }

        let parsed: ChatResponse = response.json().await.map_err(|err| {
            GeneratorError::Transport(format!("failed to parse provider response: {err}"))
        })?;

        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            GeneratorError::Transport("provider response contained no choices".to_string())
        })?;

        let mut generated = Generated::new(choice.message.content, "openai", parsed.model);
        if let Some(usage) = parsed.usage {
            generated = generated.with_tokens(usage.prompt_tokens, usage.completion_tokens);
        }
        Ok(generated)
    }
}

/// Classify an error status into a `GeneratorError`.
fn map_error_status(status: StatusCode, body: &str) -> GeneratorError {
    let snippet: String = body.chars().take(ERROR_BODY_CAP).collect();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            GeneratorError::ProviderAuth(format!("status {status}: {snippet}"))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            GeneratorError::ProviderQuota(format!("status {status}: {snippet}"))
        }
        s if s.is_server_error() => {
            GeneratorError::ProviderOutage(format!("status {status}: {snippet}"))
        }
        _ => GeneratorError::Transport(format!("unexpected status {status}: {snippet}")),
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: String,
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::RequestType;

    #[test]
    fn first_attempt_has_no_error_context() {
        let request = GenerateRequest::new(RequestType::Sql, "H001", "validate the funnel");
        let messages = OpenAiBackend::render_messages(&request);
        assert_eq!(messages.len(), 1);
        assert!(!messages[0].content.contains("previous attempt"));
    }

    #[test]
    fn prior_error_is_appended_verbatim() {
        let request = GenerateRequest::new(RequestType::Sql, "H001", "validate the funnel")
            .with_prior_error(Some("missing column X".to_string()));
        let messages = OpenAiBackend::render_messages(&request);
        assert!(messages[0].content.contains("missing column X"));
        assert!(messages[0].content.contains("previous attempt failed"));
    }

    #[test]
    fn status_classes_map_to_error_kinds() {
        assert!(matches!(
            map_error_status(StatusCode::UNAUTHORIZED, "bad key"),
            GeneratorError::ProviderAuth(_)
        ));
        assert!(matches!(
            map_error_status(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            GeneratorError::ProviderQuota(_)
        ));
        assert!(matches!(
            map_error_status(StatusCode::BAD_GATEWAY, "upstream down"),
            GeneratorError::ProviderOutage(_)
        ));
        assert!(matches!(
            map_error_status(StatusCode::IM_A_TEAPOT, "?"),
            GeneratorError::Transport(_)
        ));
    }

    #[test]
    fn missing_api_key_is_a_misconfiguration() {
        let settings = LlmSettings {
            api_key_env: "HYPOVAL_TEST_KEY_THAT_DOES_NOT_EXIST".to_string(),
            ..LlmSettings::default()
        };
        let err = OpenAiBackend::from_settings(&settings).unwrap_err();
        assert!(matches!(err, GeneratorError::Misconfiguration(_)));
        assert!(err.to_string().contains("HYPOVAL_TEST_KEY_THAT_DOES_NOT_EXIST"));
    }

    #[test]
    fn response_body_decodes() {
        let body = r#"{
            "model": "gpt-4o-mini",
            "choices": [{"message": {"role": "assistant", "content": "SELECT 1"}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 8}
        }"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices.len(), 1);
        assert_eq!(parsed.usage.as_ref().map(|u| u.prompt_tokens), Some(120));
    }
}
