//! Isnad extraction backends.
//!
//! Defines the [`IsnadExtractor`] trait and its implementations:
//! - **[`HeuristicExtractor`]**: the rule-based parser in [`crate::isnad`]; no network.
//! - **[`LlmExtractor`]**: sends the chain text to a generative-AI API
//!   (Gemini `generateContent` or OpenAI `chat/completions`) in JSON mode and
//!   parses the structured breakdown it returns.
//!
//! # Retry Strategy
//!
//! The LLM backends use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::CatalogError;
use crate::isnad::{parse_isnad, IsnadAnalysis};

/// Turns raw isnad text into per-path narrator lists.
#[async_trait]
pub trait IsnadExtractor: Send + Sync {
    /// Short backend identifier reported in API responses.
    fn name(&self) -> &str;

    async fn extract(&self, text: &str) -> Result<IsnadAnalysis>;
}

/// Build the extractor selected by `[llm].provider`.
///
/// `disabled` falls back to the rule-based parser.
pub fn create_extractor(config: &LlmConfig) -> Result<Box<dyn IsnadExtractor>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(HeuristicExtractor)),
        "gemini" | "openai" => Ok(Box::new(LlmExtractor::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

// ============ Heuristic ============

pub struct HeuristicExtractor;

#[async_trait]
impl IsnadExtractor for HeuristicExtractor {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn extract(&self, text: &str) -> Result<IsnadAnalysis> {
        Ok(parse_isnad(text))
    }
}

// ============ LLM ============

const SYSTEM_PROMPT: &str = r#"You extract narrator chains (isnad) from Arabic hadith text.
Return only JSON of the form:
{"chains": [{"narrators": [{"name": "...", "verb": "..."}]}]}
Rules:
- One entry in "chains" per transmission path; a standalone "ح" starts a new path.
- A path that merges into another path must repeat the shared narrators so every path is complete.
- List narrators in the order they appear in the text (the compiler's teacher first).
- "name" is the narrator's name exactly as written, without honorifics such as "رضي الله عنه".
- "verb" is the transmission word that introduced the narrator (حدثنا, أخبرنا, عن, سمعت, ...), or null.
- Do not include the Prophet or the compiler.
- Do not include the matn."#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Gemini,
    OpenAi,
}

impl Backend {
    fn default_url(self) -> &'static str {
        match self {
            Backend::Gemini => "https://generativelanguage.googleapis.com",
            Backend::OpenAi => "https://api.openai.com",
        }
    }

    fn key_var(self) -> &'static str {
        match self {
            Backend::Gemini => "GEMINI_API_KEY",
            Backend::OpenAi => "OPENAI_API_KEY",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Backend::Gemini => "gemini",
            Backend::OpenAi => "openai",
        }
    }
}

pub struct LlmExtractor {
    backend: Backend,
    model: String,
    base_url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl LlmExtractor {
    /// Create an extractor, reading the API key from the provider's
    /// environment variable (`GEMINI_API_KEY` or `OPENAI_API_KEY`).
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let backend = backend_of(config)?;
        let api_key = std::env::var(backend.key_var())
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", backend.key_var()))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        let backend = backend_of(config)?;
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for {} provider", backend.label()))?;
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| backend.default_url().to_string())
            .trim_end_matches('/')
            .to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            backend,
            model,
            base_url,
            api_key: api_key.into(),
            max_retries: config.max_retries,
            client,
        })
    }

    fn request(&self, text: &str) -> reqwest::RequestBuilder {
        match self.backend {
            Backend::Gemini => self
                .client
                .post(format!(
                    "{}/v1beta/models/{}:generateContent",
                    self.base_url, self.model
                ))
                .header("x-goog-api-key", &self.api_key)
                .json(&serde_json::json!({
                    "systemInstruction": { "parts": [{ "text": SYSTEM_PROMPT }] },
                    "contents": [{ "role": "user", "parts": [{ "text": text }] }],
                    "generationConfig": {
                        "responseMimeType": "application/json",
                        "temperature": 0
                    }
                })),
            Backend::OpenAi => self
                .client
                .post(format!("{}/v1/chat/completions", self.base_url))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&serde_json::json!({
                    "model": self.model,
                    "temperature": 0,
                    "response_format": { "type": "json_object" },
                    "messages": [
                        { "role": "system", "content": SYSTEM_PROMPT },
                        { "role": "user", "content": text }
                    ]
                })),
        }
    }

    fn response_text(&self, json: &serde_json::Value) -> Result<String> {
        let text = match self.backend {
            Backend::Gemini => json
                .pointer("/candidates/0/content/parts/0/text")
                .and_then(|t| t.as_str()),
            Backend::OpenAi => json
                .pointer("/choices/0/message/content")
                .and_then(|t| t.as_str()),
        };
        text.map(str::to_string).ok_or_else(|| {
            CatalogError::Upstream(format!(
                "{} response has no message content",
                self.backend.label()
            ))
            .into()
        })
    }
}

fn backend_of(config: &LlmConfig) -> Result<Backend> {
    match config.provider.as_str() {
        "gemini" => Ok(Backend::Gemini),
        "openai" => Ok(Backend::OpenAi),
        other => bail!("'{}' is not an LLM provider", other),
    }
}

#[async_trait]
impl IsnadExtractor for LlmExtractor {
    fn name(&self) -> &str {
        self.backend.label()
    }

    async fn extract(&self, text: &str) -> Result<IsnadAnalysis> {
        let label = self.backend.label();
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::warn!(attempt, backend = label, "retrying isnad extraction");
                tokio::time::sleep(delay).await;
            }

            match self.request(text).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await.map_err(|e| {
                            CatalogError::Upstream(format!(
                                "{} returned a non-JSON body: {}",
                                label, e
                            ))
                        })?;
                        let content = self.response_text(&json)?;
                        return parse_analysis_json(&content);
                    }

                    // Rate limited or server error, retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(CatalogError::Upstream(format!(
                            "{} API error {}: {}",
                            label, status, body_text
                        )));
                        continue;
                    }

                    // Client error (not 429), fail now
                    let body_text = response.text().await.unwrap_or_default();
                    return Err(CatalogError::Upstream(format!(
                        "{} API error {}: {}",
                        label, status, body_text
                    ))
                    .into());
                }
                Err(e) => {
                    last_err = Some(CatalogError::Upstream(format!(
                        "{} connection error: {}",
                        label, e
                    )));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| CatalogError::Upstream(format!("{} failed after retries", label)))
            .into())
    }
}

/// Parse the model's JSON answer, tolerating Markdown code fences.
pub fn parse_analysis_json(content: &str) -> Result<IsnadAnalysis> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| CatalogError::Upstream(format!("model returned invalid JSON: {}", e)))?;

    if !value.get("chains").is_some_and(|c| c.is_array()) {
        return Err(
            CatalogError::Upstream("model response is missing a 'chains' array".to_string()).into(),
        );
    }

    let analysis: IsnadAnalysis = serde_json::from_value(value)
        .map_err(|e| CatalogError::Upstream(format!("unexpected analysis shape: {}", e)))?;

    Ok(analysis.cleaned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let a = parse_analysis_json(
            r#"{"chains":[{"narrators":[{"name":"مالك","verb":"حدثنا"},{"name":"نافع","verb":"عن"}]}]}"#,
        )
        .unwrap();
        assert_eq!(a.chains.len(), 1);
        assert_eq!(a.chains[0].narrators[1].name, "نافع");
    }

    #[test]
    fn test_parse_fenced_json() {
        let a = parse_analysis_json(
            "```json\n{\"chains\":[{\"narrators\":[{\"name\":\"سفيان\"}]}]}\n```",
        )
        .unwrap();
        assert_eq!(a.chains[0].narrators[0].name, "سفيان");
        assert!(a.chains[0].narrators[0].verb.is_none());
    }

    #[test]
    fn test_parse_drops_empty_names() {
        let a = parse_analysis_json(
            r#"{"chains":[{"narrators":[{"name":"  "}]},{"narrators":[{"name":"شعبة","verb":null}]}]}"#,
        )
        .unwrap();
        assert_eq!(a.chains.len(), 1);
        assert_eq!(a.narrator_count(), 1);
    }

    #[test]
    fn test_parse_missing_chains_is_upstream_error() {
        let err = parse_analysis_json(r#"{"narrators": []}"#).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CatalogError>(),
            Some(CatalogError::Upstream(_))
        ));
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_analysis_json("I could not find an isnad.").is_err());
    }

    #[tokio::test]
    async fn test_disabled_provider_uses_heuristic() {
        let extractor = create_extractor(&LlmConfig::default()).unwrap();
        assert_eq!(extractor.name(), "heuristic");
        let a = extractor.extract("حدثنا مالك عن نافع").await.unwrap();
        assert_eq!(a.narrator_count(), 2);
    }

    #[test]
    fn test_with_api_key_requires_model() {
        let cfg = LlmConfig {
            provider: "openai".into(),
            ..Default::default()
        };
        assert!(LlmExtractor::with_api_key(&cfg, "k").is_err());
    }
}
