use crate::services::tts::TtsClient;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use std::path::PathBuf;

/// Copies placeholder audio (`<voice>.mp3`) instead of calling a TTS service.
pub struct MockTtsClient {
    placeholders_dir: PathBuf,
    voices: Vec<String>,
}

impl MockTtsClient {
    pub fn new(placeholders_dir: PathBuf) -> Result<Self> {
        let mut voices = Vec::new();
        if placeholders_dir.is_dir() {
            let entries = std::fs::read_dir(&placeholders_dir).with_context(|| {
                format!("Failed to read placeholders in {}", placeholders_dir.display())
            })?;
            for entry in entries {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) == Some("mp3") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        voices.push(stem.to_string());
                    }
                }
            }
        }
        voices.sort();
        Ok(Self {
            placeholders_dir,
            voices,
        })
    }
}

#[async_trait]
impl TtsClient for MockTtsClient {
    fn name(&self) -> &str {
        "mock"
    }

    fn supported_voices(&self) -> &[String] {
        &self.voices
    }

    async fn synthesize(&self, _text: &str, voice: &str) -> Result<Vec<u8>> {
        let chosen = if self.voices.iter().any(|v| v == voice) {
            voice
        } else {
            let fallback = self.voices.first().ok_or_else(|| {
                anyhow!("No placeholder files found in {}", self.placeholders_dir.display())
            })?;
            warn!("Placeholder for voice '{}' not found, using '{}'", voice, fallback);
            fallback.as_str()
        };

        let source = self.placeholders_dir.join(format!("{}.mp3", chosen));
        debug!("Mock TTS copying {}", source.display());
        tokio::fs::read(&source)
            .await
            .with_context(|| format!("Failed to read placeholder {}", source.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_uses_named_placeholder_then_falls_back() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("Karen.mp3"), b"karen")?;
        std::fs::write(dir.path().join("Art.mp3"), b"art")?;
        std::fs::write(dir.path().join("notes.txt"), b"ignored")?;

        let client = MockTtsClient::new(dir.path().to_path_buf())?;
        assert_eq!(client.supported_voices(), ["Art", "Karen"]);
        assert_eq!(client.synthesize("hi", "Karen").await?, b"karen");
        assert_eq!(client.synthesize("hi", "Nobody").await?, b"art");
        Ok(())
    }

    #[tokio::test]
    async fn test_no_placeholders_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let client = MockTtsClient::new(dir.path().join("missing"))?;
        assert!(client.supported_voices().is_empty());
        assert!(client.synthesize("hi", "Art").await.is_err());
        Ok(())
    }
}
