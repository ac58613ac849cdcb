//! Text-generation collaborator contract.

use async_trait::async_trait;
use serde::Serialize;

use crate::Result;

/// A structured prompt: instructions plus a JSON context document.
#[derive(Debug, Clone, Serialize)]
pub struct NarrativePrompt {
    pub request_id: String,
    pub system: String,
    pub context: serde_json::Value,
    pub max_tokens: u32,
}

/// External text generator (LLM). Returns raw text; callers own validation.
#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    async fn generate(&self, prompt: &NarrativePrompt) -> Result<String>;
}
