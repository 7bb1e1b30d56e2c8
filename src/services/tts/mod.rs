use crate::core::config::Config;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::info;

pub mod mock;
pub mod openai;

#[async_trait]
pub trait TtsClient: Send + Sync {
    /// Provider key used for voice mappings and episode metadata.
    fn name(&self) -> &str;
    fn supported_voices(&self) -> &[String];
    /// Returns encoded MP3 bytes for `text` spoken by `voice`.
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>>;
}

pub fn create_tts_client(config: &Config) -> Result<Box<dyn TtsClient>> {
    info!("Initializing TTS Client for provider: {}", config.tts.provider);
    match config.tts.provider.as_str() {
        "mock" => Ok(Box::new(mock::MockTtsClient::new(
            config.paths.placeholders_dir.clone(),
        )?)),
        "openai" => {
            let api_key = config
                .tts
                .api_key
                .as_deref()
                .or(config.llm.api_key.as_deref())
                .context("OpenAI API key required for OpenAI TTS")?;
            Ok(Box::new(openai::OpenAiTtsClient::new(
                api_key,
                config.tts.base_url.as_deref(),
                &config.tts.model,
            )))
        }
        _ => Err(anyhow!("Unknown TTS provider: {}", config.tts.provider)),
    }
}
