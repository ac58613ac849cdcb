//! Anthropic Messages API client used as the engine's narrative generator.

use std::time::Duration;

use async_trait::async_trait;
use common::config::LlmConfig;
use common::{body_snippet, Error, NarrativeGenerator, NarrativePrompt};
use reqwest::Client;
use serde_json::json;
use tokio::time::sleep;
use tracing::{instrument, warn};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct LlmClient {
    client: Client,
    api_key: String,
    model: String,
    max_retries: u32,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, timeout_ms: u64, max_retries: u32) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| Error::Llm(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            model,
            max_retries,
        })
    }

    /// Build from config; `None` when no API key is configured.
    pub fn from_config(cfg: &LlmConfig) -> Result<Option<Self>, Error> {
        if cfg.api_key.trim().is_empty() {
            return Ok(None);
        }
        Self::new(cfg.api_key.clone(), cfg.model.clone(), cfg.timeout_ms, cfg.max_retries).map(Some)
    }

    fn payload(&self, prompt: &NarrativePrompt) -> Result<serde_json::Value, Error> {
        Ok(json!({
            "model": self.model,
            "max_tokens": prompt.max_tokens,
            "system": prompt.system,
            "messages": [
                {
                    "role": "user",
                    "content": serde_json::to_string(&prompt.context)?
                }
            ]
        }))
    }

    async fn backoff(&self, attempt: u32) {
        sleep(Duration::from_millis(150 * u64::from(attempt))).await;
    }
}

/// First text block of a Messages API response.
pub fn extract_text_content(response_body: &serde_json::Value) -> Result<&str, Error> {
    let content_arr = response_body
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| Error::Llm("Missing or invalid 'content' field".into()))?;

    content_arr
        .iter()
        .find(|item| item["type"] == "text")
        .and_then(|item| item["text"].as_str())
        .ok_or_else(|| Error::Llm("Missing 'text' content".into()))
}

#[async_trait]
impl NarrativeGenerator for LlmClient {
    #[instrument(skip(self, prompt), fields(request_id = %prompt.request_id))]
    async fn generate(&self, prompt: &NarrativePrompt) -> Result<String, Error> {
        let payload = self.payload(prompt)?;

        let mut attempt = 0u32;
        loop {
            let send_result = self
                .client
                .post(ANTHROPIC_API_URL)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&payload)
                .send()
                .await;

            match send_result {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        if (status.as_u16() == 429 || status.is_server_error()) && attempt < self.max_retries {
                            attempt += 1;
                            warn!("LLM returned {}, retrying (attempt {})", status, attempt);
                            self.backoff(attempt).await;
                            continue;
                        }
                        return Err(Error::Llm(format!(
                            "HTTP {}: {}",
                            status.as_u16(),
                            body_snippet(&body, 300)
                        )));
                    }

                    let response_body: serde_json::Value = response
                        .json()
                        .await
                        .map_err(|e| Error::Llm(e.to_string()))?;
                    return extract_text_content(&response_body).map(str::to_string);
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        attempt += 1;
                        self.backoff(attempt).await;
                        continue;
                    }
                    if e.is_timeout() {
                        return Err(Error::Timeout("LLM request".into()));
                    }
                    return Err(Error::Llm(e.to_string()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_text_content_picks_text_block() {
        let body = json!({
            "content": [
                {"type": "tool_use", "id": "x"},
                {"type": "text", "text": "{\"recommendedArrivalTime\": \"07:45\"}"}
            ]
        });
        let text = extract_text_content(&body).expect("text block");
        assert!(text.contains("07:45"));
    }

    #[test]
    fn test_extract_text_content_rejects_missing_content() {
        assert!(extract_text_content(&json!({"error": "overloaded"})).is_err());
        assert!(extract_text_content(&json!({"content": []})).is_err());
    }

    #[test]
    fn test_from_config_without_key_is_disabled() {
        let cfg = LlmConfig::default();
        assert!(LlmClient::from_config(&cfg).expect("builds").is_none());
    }

    #[test]
    fn test_payload_carries_prompt() {
        let client = LlmClient::new("k".into(), "model-x".into(), 1000, 0).expect("client");
        let prompt = NarrativePrompt {
            request_id: "r1".into(),
            system: "be brief".into(),
            context: json!({"mountain": "stevens-pass"}),
            max_tokens: 256,
        };
        let payload = client.payload(&prompt).expect("payload");
        assert_eq!(payload["model"], "model-x");
        assert_eq!(payload["max_tokens"], 256);
        assert_eq!(payload["system"], "be brief");
        assert!(payload["messages"][0]["content"]
            .as_str()
            .expect("string content")
            .contains("stevens-pass"));
    }
}
