//! Generation gateway: turns a composed prompt into a chatbot reply.
//!
//! | Config Value | Generator | Endpoint |
//! |-------------|-----------|----------|
//! | `"gemini"` | [`GeminiGenerator`] | `models/{model}:generateContent` |
//! | `"openai"` | [`OpenAIGenerator`] | `/v1/chat/completions` |
//! | `"ollama"` | [`OllamaGenerator`] | `/api/generate` |
//! | `"disabled"` | [`DisabledGenerator`] | always errors |
//!
//! A generator returns an error when the provider produced no usable text.
//! The query path turns that into the degraded context-only reply (see
//! [`crate::prompt::fallback_response`]).

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;

use crate::config::GenerationConfig;
use crate::http;

/// A text generation backend.
#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;
    async fn generate(&self, prompt: &str) -> Result<String>;
}

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn generate(&self, _prompt: &str) -> Result<String> {
        bail!("Generation provider is disabled")
    }
}

// ============ Gemini ============

/// Google Generative Language `generateContent`. Requires `GEMINI_API_KEY`.
pub struct GeminiGenerator {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_retries: u32,
}

impl GeminiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            api_key: http::api_key("GEMINI_API_KEY")?,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string()),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "gemini-2.5-flash".to_string()),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
        });
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );

        let json = http::send_json_ok("Gemini generation", self.max_retries, || {
            self.client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(&body)
        })
        .await?;

        parse_gemini_text(&json)
    }
}

/// First candidate's first part. No candidates or no parts is an error.
fn parse_gemini_text(json: &serde_json::Value) -> Result<String> {
    let candidate = json
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| anyhow::anyhow!("no response candidates generated"))?;

    candidate
        .pointer("/content/parts/0/text")
        .and_then(|t| t.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("no response parts generated"))
}

// ============ OpenAI ============

/// OpenAI chat completions. Requires `OPENAI_API_KEY`.
pub struct OpenAIGenerator {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_retries: u32,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            api_key: http::api_key("OPENAI_API_KEY")?,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            model,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));

        let json = http::send_json_ok("OpenAI generation", self.max_retries, || {
            self.client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
        })
        .await?;

        json.pointer("/choices/0/message/content")
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("no completion choices generated"))
    }
}

// ============ Ollama ============

pub struct OllamaGenerator {
    client: Client,
    url: String,
    model: String,
    max_retries: u32,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for Ollama provider"))?;
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            model,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });
        let url = format!("{}/api/generate", self.url.trim_end_matches('/'));

        let json = http::send_json_ok("Ollama generation", self.max_retries, || {
            self.client.post(&url).json(&body)
        })
        .await?;

        match json.get("response").and_then(|r| r.as_str()) {
            Some(text) if !text.is_empty() => Ok(text.to_string()),
            _ => bail!("Ollama returned an empty response"),
        }
    }
}

/// Create the configured [`Generator`].
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "gemini" => Ok(Arc::new(GeminiGenerator::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}
