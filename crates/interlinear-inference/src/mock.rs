//! Mock generation backend for deterministic testing.
//!
//! Responses come from, in order: a custom responder closure, a substring
//! mapping on the request content, or a fixed default. Failures can be
//! injected for the first N calls so retry and fallback paths are
//! reproducible.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use interlinear_inference::mock::{MockFailure, MockGenerationBackend};
//!
//! let backend = MockGenerationBackend::new()
//!     .with_fixed_response("Test response")
//!     .with_failures(1, MockFailure::Timeout);
//!
//! assert!(backend.generate("", "text", &options).await.is_err());
//! assert_eq!(backend.generate("", "text", &options).await?, "Test response");
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use interlinear_core::{Error, GenerationBackend, GenerationOptions, Result};

/// Custom response function: `(system, content) -> reply`.
pub type Responder = Arc<dyn Fn(&str, &str) -> Result<String> + Send + Sync>;

/// Kind of error injected by [`MockGenerationBackend::with_failures`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Timeout,
    RateLimited,
    Inference,
}

impl MockFailure {
    fn to_error(self) -> Error {
        match self {
            MockFailure::Timeout => Error::Timeout("simulated timeout".to_string()),
            MockFailure::RateLimited => Error::RateLimited("simulated rate limit".to_string()),
            MockFailure::Inference => Error::Inference("simulated provider failure".to_string()),
        }
    }
}

#[derive(Clone)]
struct MockConfig {
    model: String,
    fixed_responses: Vec<(String, String)>,
    default_response: String,
    latency_ms: u64,
    fail_first: usize,
    failure: MockFailure,
    responder: Option<Responder>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            model: "mock-gen".to_string(),
            fixed_responses: Vec::new(),
            default_response: "Mock response".to_string(),
            latency_ms: 0,
            fail_first: 0,
            failure: MockFailure::Inference,
            responder: None,
        }
    }
}

/// A recorded generation request.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub system: String,
    pub content: String,
    pub options: GenerationOptions,
}

/// Mock generation backend for testing.
#[derive(Clone)]
pub struct MockGenerationBackend {
    config: Arc<MockConfig>,
    call_log: Arc<Mutex<Vec<MockCall>>>,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl MockGenerationBackend {
    /// Create a new mock backend with default configuration.
    pub fn new() -> Self {
        Self {
            config: Arc::new(MockConfig::default()),
            call_log: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Set the reported model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).model = model.into();
        self
    }

    /// Set a fixed response for generation requests.
    pub fn with_fixed_response(mut self, response: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).default_response = response.into();
        self
    }

    /// Reply with `output` whenever the request content contains `needle`.
    pub fn with_response_mapping(
        mut self,
        needle: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Arc::make_mut(&mut self.config)
            .fixed_responses
            .push((needle.into(), output.into()));
        self
    }

    /// Compute replies with a closure.
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&str, &str) -> Result<String> + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.config).responder = Some(Arc::new(responder));
        self
    }

    /// Set simulated latency for every call.
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        Arc::make_mut(&mut self.config).latency_ms = latency_ms;
        self
    }

    /// Fail the first `count` calls with `failure`.
    pub fn with_failures(mut self, count: usize, failure: MockFailure) -> Self {
        let config = Arc::make_mut(&mut self.config);
        config.fail_first = count;
        config.failure = failure;
        self
    }

    /// Get all logged calls for assertion.
    pub fn get_calls(&self) -> Vec<MockCall> {
        self.call_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of generate calls made so far, including failed ones.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were in flight at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn respond(&self, system: &str, content: &str) -> Result<String> {
        if let Some(responder) = &self.config.responder {
            return responder(system, content);
        }
        if let Some((_, output)) = self
            .config
            .fixed_responses
            .iter()
            .find(|(needle, _)| content.contains(needle.as_str()))
        {
            return Ok(output.clone());
        }
        Ok(self.config.default_response.clone())
    }
}

impl Default for MockGenerationBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight counter when a call ends, however it ends.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl GenerationBackend for MockGenerationBackend {
    async fn generate(
        &self,
        system: &str,
        content: &str,
        options: &GenerationOptions,
    ) -> Result<String> {
        let call_index = self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(MockCall {
                system: system.to_string(),
                content: content.to_string(),
                options: *options,
            });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if self.config.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.config.latency_ms)).await;
        }

        if call_index < self.config.fail_first {
            return Err(self.config.failure.to_error());
        }

        self.respond(system, content)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ask(backend: &MockGenerationBackend, content: &str) -> Result<String> {
        backend
            .generate("system", content, &GenerationOptions::default())
            .await
    }

    #[tokio::test]
    async fn test_mock_backend_generate() {
        let backend = MockGenerationBackend::new().with_fixed_response("Custom response");
        assert_eq!(ask(&backend, "test prompt").await.unwrap(), "Custom response");
    }

    #[tokio::test]
    async fn test_mock_backend_response_mapping() {
        let backend = MockGenerationBackend::new()
            .with_response_mapping("hello", "world")
            .with_response_mapping("foo", "bar");

        assert_eq!(ask(&backend, "say hello").await.unwrap(), "world");
        assert_eq!(ask(&backend, "foo!").await.unwrap(), "bar");
        assert_eq!(ask(&backend, "other").await.unwrap(), "Mock response");
    }

    #[tokio::test]
    async fn test_mock_backend_responder_wins() {
        let backend = MockGenerationBackend::new()
            .with_response_mapping("x", "mapped")
            .with_responder(|system, content| Ok(format!("{system}:{content}")));

        assert_eq!(ask(&backend, "x").await.unwrap(), "system:x");
    }

    #[tokio::test]
    async fn test_mock_backend_fails_first_calls() {
        let backend = MockGenerationBackend::new().with_failures(2, MockFailure::Timeout);

        assert!(matches!(ask(&backend, "a").await, Err(Error::Timeout(_))));
        assert!(matches!(ask(&backend, "b").await, Err(Error::Timeout(_))));
        assert!(ask(&backend, "c").await.is_ok());
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_backend_call_logging() {
        let backend = MockGenerationBackend::new();
        let options = GenerationOptions {
            temperature: 0.1,
            max_output_tokens: 64,
        };
        backend.generate("sys", "one", &options).await.unwrap();

        let calls = backend.get_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].system, "sys");
        assert_eq!(calls[0].content, "one");
        assert_eq!(calls[0].options, options);
    }

    #[tokio::test]
    async fn test_mock_backend_tracks_peak_concurrency() {
        let backend = MockGenerationBackend::new().with_latency_ms(20);

        let futures = (0..4).map(|i| {
            let backend = backend.clone();
            async move { ask(&backend, &i.to_string()).await }
        });
        futures::future::join_all(futures).await;

        assert_eq!(backend.peak_concurrency(), 4);
        assert_eq!(backend.in_flight.load(Ordering::SeqCst), 0);
    }
}
