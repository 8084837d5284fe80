//! # interlinear-inference
//!
//! Text generation backends for the interlinear job system.
//!
//! This crate provides:
//! - Ollama implementation of [`GenerationBackend`] over `/api/chat`
//! - A scriptable mock backend for tests (feature `mock`)
//!
//! # Feature Flags
//!
//! - `ollama` (default): Enable Ollama backend
//! - `mock`: Expose [`mock::MockGenerationBackend`] to other crates' tests
//!
//! # Example
//!
//! ```rust,no_run
//! use interlinear_inference::OllamaBackend;
//! use interlinear_core::{GenerationBackend, GenerationOptions};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = OllamaBackend::from_env().unwrap();
//!     let reply = backend
//!         .generate("Translate to English.", "Bonjour", &GenerationOptions::default())
//!         .await
//!         .unwrap();
//!     println!("{reply}");
//! }
//! ```

#[cfg(feature = "ollama")]
pub mod ollama;

// Mock generation backend for testing
#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export core types
pub use interlinear_core::*;

#[cfg(feature = "ollama")]
pub use ollama::OllamaBackend;
