use crate::core::config::Config;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub total_tokens: Option<u64>,
}

#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<Completion>;

    /// Model name recorded in episode metadata.
    fn model(&self) -> &str;
}

pub fn create_llm(config: &Config) -> Result<Box<dyn LlmClient>> {
    let llm = &config.llm;
    let timeout = Duration::from_secs(llm.timeout_seconds);
    match llm.provider.as_str() {
        "openai" => {
            let api_key = llm
                .api_key
                .as_deref()
                .context("OpenAI api_key missing (set llm.api_key or OPENAI_API_KEY)")?;
            Ok(Box::new(OpenAiClient::new(
                api_key,
                &llm.model,
                llm.base_url.as_deref(),
                llm.temperature,
                timeout,
            )?))
        }
        "ollama" => Ok(Box::new(OllamaClient::new(
            llm.base_url.as_deref().unwrap_or("http://localhost:11434"),
            &llm.model,
            llm.temperature,
            timeout,
        )?)),
        _ => Err(anyhow!("Unknown LLM provider: {}", llm.provider)),
    }
}

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

// --- OpenAI ---

#[derive(Debug)]
pub struct OpenAiClient {
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(
        api_key: &str,
        model: &str,
        base_url: Option<&str>,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url
                .unwrap_or("https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
            temperature,
            client: http_client(timeout)?,
        })
    }
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessageResponse,
}

#[derive(Deserialize)]
struct OpenAiMessageResponse {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    total_tokens: u64,
}

impl OpenAiResponse {
    fn into_completion(self) -> Result<Completion> {
        let total_tokens = self.usage.map(|u| u.total_tokens);
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|text| Completion { text, total_tokens })
            .ok_or_else(|| anyhow!("OpenAI response empty or missing content"))
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<Completion> {
        let url = format!("{}/chat/completions", self.base_url);

        let request_body = OpenAiRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
        };

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request_body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("OpenAI API error: {}", error_text));
        }

        let response_text = resp.text().await?;
        let result: OpenAiResponse = serde_json::from_str(&response_text).map_err(|e| {
            anyhow!("Failed to parse OpenAI response: {}. Body: {}", e, response_text)
        })?;
        result.into_completion()
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// --- Ollama ---

#[derive(Debug)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str, temperature: f32, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            temperature,
            client: http_client(timeout)?,
        })
    }
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: OllamaMessageResponse,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
}

#[derive(Deserialize)]
struct OllamaMessageResponse {
    content: String,
}

impl OllamaResponse {
    fn into_completion(self) -> Completion {
        let total_tokens = match (self.prompt_eval_count, self.eval_count) {
            (None, None) => None,
            (prompt, eval) => Some(prompt.unwrap_or(0) + eval.unwrap_or(0)),
        };
        Completion {
            text: self.message.content,
            total_tokens,
        }
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<Completion> {
        let url = format!("{}/api/chat", self.base_url);

        let request_body = OllamaRequest {
            model: &self.model,
            messages,
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };

        let resp = self.client.post(&url).json(&request_body).send().await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Ollama API error: {}", error_text));
        }

        let result: OllamaResponse = resp.json().await?;
        Ok(result.into_completion())
    }

    fn model(&self) -> &str {
        &self.model
    }
}
