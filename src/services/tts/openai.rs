use crate::services::tts::TtsClient;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{debug, warn};
use serde::Serialize;

const VOICES: [&str; 6] = ["alloy", "echo", "fable", "onyx", "nova", "shimmer"];
const FALLBACK_VOICE: &str = "alloy";

pub struct OpenAiTtsClient {
    api_key: String,
    base_url: String,
    model: String,
    voices: Vec<String>,
    client: reqwest::Client,
}

impl OpenAiTtsClient {
    pub fn new(api_key: &str, base_url: Option<&str>, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: base_url
                .unwrap_or("https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
            voices: VOICES.iter().map(|v| v.to_string()).collect(),
            client: reqwest::Client::new(),
        }
    }

    fn resolve_voice(&self, voice: &str) -> String {
        let lowered = voice.to_lowercase();
        if self.voices.contains(&lowered) {
            lowered
        } else {
            warn!("Unknown OpenAI voice '{}', using '{}'", voice, FALLBACK_VOICE);
            FALLBACK_VOICE.to_string()
        }
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'a str,
}

#[async_trait]
impl TtsClient for OpenAiTtsClient {
    fn name(&self) -> &str {
        "openai"
    }

    fn supported_voices(&self) -> &[String] {
        &self.voices
    }

    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        let voice = self.resolve_voice(voice);
        let url = format!("{}/audio/speech", self.base_url);

        let request_body = SpeechRequest {
            model: &self.model,
            voice: &voice,
            input: text,
            response_format: "mp3",
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
            return Err(anyhow!("OpenAI TTS error: {}", error_text));
        }

        let bytes = resp.bytes().await?;
        debug!("Synthesized {} bytes with voice {}", bytes.len(), voice);
        Ok(bytes.to_vec())
    }
}
