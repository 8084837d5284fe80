//! # interlinear-core
//!
//! Core types, traits, and abstractions for the interlinear job system.
//!
//! This crate provides the foundational data structures (jobs, cache entries,
//! text units) and the trait seams that the store, inference, and job crates
//! implement or consume.

pub mod defaults;
pub mod error;
pub mod hashing;
pub mod models;
pub mod tokenizer;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use hashing::content_hash;
pub use models::*;
pub use tokenizer::estimate_tokens;
pub use traits::*;
pub use uuid_utils::{is_v7, new_v7};
