//! Ollama generation backend implementation.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use interlinear_core::{Error, GenerationBackend, GenerationOptions, Result};

/// Default Ollama endpoint.
pub const DEFAULT_OLLAMA_URL: &str = interlinear_core::defaults::OLLAMA_URL;

/// Default generation model.
pub const DEFAULT_GEN_MODEL: &str = interlinear_core::defaults::GEN_MODEL;

/// Timeout for generation requests (seconds).
pub const GEN_TIMEOUT_SECS: u64 = interlinear_core::defaults::GEN_TIMEOUT_SECS;

/// Generations slower than this are logged as slow.
const SLOW_GENERATION_MS: u64 = 30_000;

/// Ollama inference backend.
pub struct OllamaBackend {
    client: Client,
    base_url: String,
    gen_model: String,
    gen_timeout_secs: u64,
}

impl OllamaBackend {
    /// Create a new Ollama backend with default settings.
    pub fn new() -> Result<Self> {
        Self::with_config(DEFAULT_OLLAMA_URL.to_string(), DEFAULT_GEN_MODEL.to_string())
    }

    /// Create a new Ollama backend with custom configuration.
    ///
    /// The HTTP timeout comes from `INTERLINEAR_GEN_TIMEOUT_SECS`. The
    /// pipeline applies its own, usually shorter, per-call deadline on top.
    pub fn with_config(base_url: String, gen_model: String) -> Result<Self> {
        let gen_timeout = std::env::var("INTERLINEAR_GEN_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(GEN_TIMEOUT_SECS);

        let client = Client::builder()
            .timeout(Duration::from_secs(gen_timeout))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "inference",
            component = "ollama",
            model = %gen_model,
            "Initializing Ollama backend: url={}",
            base_url
        );

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            gen_model,
            gen_timeout_secs: gen_timeout,
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        let base_url =
            std::env::var("OLLAMA_BASE").unwrap_or_else(|_| DEFAULT_OLLAMA_URL.to_string());
        let gen_model =
            std::env::var("OLLAMA_GEN_MODEL").unwrap_or_else(|_| DEFAULT_GEN_MODEL.to_string());

        Self::with_config(base_url, gen_model)
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if the server is reachable.
    pub async fn health_check(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                info!("Ollama health check passed");
                Ok(true)
            }
            Ok(resp) => {
                warn!("Ollama health check failed: {}", resp.status());
                Ok(false)
            }
            Err(e) => {
                warn!("Ollama health check error: {}", e);
                Ok(false)
            }
        }
    }

    /// Map a non-success status to the job system's error taxonomy.
    fn status_error(status: StatusCode, body: &str) -> Error {
        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                Error::RateLimited(format!("Ollama returned {}: {}", status, body))
            }
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                Error::Timeout(format!("Ollama returned {}: {}", status, body))
            }
            // Ollama answers 404 for a model that is not pulled
            StatusCode::NOT_FOUND => Error::Config(format!("Ollama returned {}: {}", status, body)),
            _ => Error::Inference(format!("Ollama returned {}: {}", status, body)),
        }
    }
}

/// Chat API message for `/api/chat`.
#[derive(Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Sampling options understood by Ollama.
#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

/// Request payload for the Ollama `/api/chat` endpoint.
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ChatOptions,
}

/// Response from the Ollama `/api/chat` endpoint.
#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    /// Uses the `/api/chat` endpoint, which keeps reasoning output of thinking
    /// models out of the returned content.
    #[instrument(skip(self, system, content, options), fields(subsystem = "inference", component = "ollama", op = "generate", model = %self.gen_model, prompt_len = content.len()))]
    async fn generate(
        &self,
        system: &str,
        content: &str,
        options: &GenerationOptions,
    ) -> Result<String> {
        let start = Instant::now();

        let mut messages = Vec::new();
        if !system.is_empty() {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.to_string(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: content.to_string(),
        });

        let request = ChatRequest {
            model: self.gen_model.clone(),
            messages,
            stream: false,
            options: ChatOptions {
                temperature: options.temperature,
                num_predict: options.max_output_tokens,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .timeout(Duration::from_secs(self.gen_timeout_secs))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("Ollama request timed out: {}", e))
                } else {
                    Error::Inference(format!("Request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, &body));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Inference(format!("Failed to parse response: {}", e)))?;

        let content_out = result.message.content;
        let elapsed = start.elapsed().as_millis() as u64;
        debug!(
            response_len = content_out.len(),
            duration_ms = elapsed,
            "Generation complete"
        );
        if elapsed > SLOW_GENERATION_MS {
            warn!(
                duration_ms = elapsed,
                prompt_len = content.len(),
                slow = true,
                "Slow generation operation"
            );
        }
        Ok(content_out)
    }

    fn model_name(&self) -> &str {
        &self.gen_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_url_is_localhost() {
        assert_eq!(DEFAULT_OLLAMA_URL, "http://127.0.0.1:11434");
    }

    #[test]
    fn test_custom_config_trims_trailing_slash() {
        let backend =
            OllamaBackend::with_config("http://gpu-box:11434/".to_string(), "qwen3:8b".to_string())
                .unwrap();
        assert_eq!(backend.base_url(), "http://gpu-box:11434");
        assert_eq!(backend.model_name(), "qwen3:8b");
    }

    #[test]
    fn test_chat_request_serialization() {
        let request = ChatRequest {
            model: "gpt-oss:20b".to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: "hello".to_string(),
            }],
            stream: false,
            options: ChatOptions {
                temperature: 0.25,
                num_predict: 512,
            },
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "gpt-oss:20b");
        assert_eq!(json["stream"], false);
        assert_eq!(json["options"]["temperature"], 0.25);
        assert_eq!(json["options"]["num_predict"], 512);
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_chat_response_deserialization() {
        let json = r#"{"model":"m","message":{"role":"assistant","content":"done"},"done":true}"#;
        let response: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.message.content, "done");
    }

    #[test]
    fn test_status_error_mapping() {
        assert!(matches!(
            OllamaBackend::status_error(StatusCode::TOO_MANY_REQUESTS, ""),
            Error::RateLimited(_)
        ));
        assert!(matches!(
            OllamaBackend::status_error(StatusCode::GATEWAY_TIMEOUT, ""),
            Error::Timeout(_)
        ));
        assert!(matches!(
            OllamaBackend::status_error(StatusCode::NOT_FOUND, "model not found"),
            Error::Config(_)
        ));
        assert!(matches!(
            OllamaBackend::status_error(StatusCode::INTERNAL_SERVER_ERROR, ""),
            Error::Inference(_)
        ));
    }
}
