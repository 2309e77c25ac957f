//! PaperRoute DeepFellow - HTTP client for the remote inference service.
//!
//! The service provides every external collaborator the pipeline talks to:
//! OCR and vision extraction, a responses endpoint used for synthesis and
//! classification, and a RAG collection used as the semantic index.

mod client;
mod error;
mod types;

pub use client::DeepfellowClient;
pub use error::{DeepfellowError, DeepfellowResult};
pub use types::*;
