use std::time::{SystemTime, UNIX_EPOCH};

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs},
};
use async_trait::async_trait;

use crate::config::GenerationOptions;
use crate::error::{EvalError, EvalResult};

/// One inference call's output: the raw answer texts in choice order plus
/// the wall-clock timestamps around the call.
#[derive(Debug, Clone)]
pub struct Generation {
    pub answers: Vec<String>,
    pub timestamp_start: f64,
    pub timestamp_end: f64,
}

/// The model inference collaborator.
///
/// A singleton stateful resource: constructed once per process and reused
/// across all items and rounds. Calls are synchronous from the pipeline's
/// point of view and carry no timeout.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> EvalResult<Generation>;
}

/// Backend speaking to an OpenAI-compatible serving endpoint.
pub struct OpenAiBackend {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiBackend {
    /// Construct from the environment: `LLM_ENDPOINT` (default
    /// `http://127.0.0.1:8000/v1`), `LLM_API_KEY` (default `EMPTY`, the
    /// local-serving convention) and `LLM_MODEL_NAME` (default
    /// `/LLM/model`).
    pub fn from_env() -> Self {
        let api_key = std::env::var("LLM_API_KEY").unwrap_or_else(|_| "EMPTY".to_string());
        let api_base =
            std::env::var("LLM_ENDPOINT").unwrap_or_else(|_| "http://127.0.0.1:8000/v1".to_string());
        let model = std::env::var("LLM_MODEL_NAME").unwrap_or_else(|_| "/LLM/model".to_string());

        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(api_base);

        Self {
            client: Client::with_config(config),
            model,
        }
    }

    /// Build the completion request, mapping the options the API supports.
    /// Beam counts, repetition penalties and the other HF-only knobs have
    /// no endpoint equivalent and are ignored here.
    fn build_request(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> EvalResult<async_openai::types::CreateChatCompletionRequest> {
        let user_message = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt.to_string())
            .build()
            .map_err(|e| EvalError::inference(format!("failed to build user message: {e}")))?
            .into();

        CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([user_message])
            .temperature(options.temperature as f32)
            .top_p(options.top_p as f32)
            .n(options.num_return_sequences as u8)
            .max_tokens(options.max_length_output as u16)
            .build()
            .map_err(|e| EvalError::inference(format!("failed to build completion request: {e}")))
    }
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> EvalResult<Generation> {
        let timestamp_start = unix_now();
        let request = self.build_request(prompt, options)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| EvalError::inference(e.to_string()))?;

        let answers = response
            .choices
            .iter()
            .map(|choice| choice.message.content.clone().unwrap_or_default())
            .collect();
        let timestamp_end = unix_now();

        Ok(Generation {
            answers,
            timestamp_start,
            timestamp_end,
        })
    }
}

/// Seconds since the Unix epoch, as the audit records persist timestamps.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_carries_generation_options() {
        let backend = OpenAiBackend {
            client: Client::with_config(OpenAIConfig::new()),
            model: "test-model".to_string(),
        };
        let options = GenerationOptions {
            temperature: 0.8,
            top_p: 0.95,
            num_return_sequences: 3,
            max_length_output: 512,
            ..GenerationOptions::default()
        };

        let request = backend.build_request("prompt text", &options).unwrap();
        assert_eq!(request.model, "test-model");
        assert_eq!(request.temperature, Some(0.8));
        assert_eq!(request.top_p, Some(0.95));
        assert_eq!(request.n, Some(3));
        assert_eq!(request.max_tokens, Some(512));
        assert_eq!(request.messages.len(), 1);
    }

    #[test]
    fn test_unix_now_is_monotonic_enough() {
        let a = unix_now();
        let b = unix_now();
        assert!(b >= a);
        assert!(a > 0.0);
    }
}
