use crate::core::io::{path_str, Storage};
use crate::core::registry::{CharacterRegistry, VoiceMappings};
use crate::core::script::DialogLine;
use crate::core::state::Episode;
use crate::services::checkpoint::SFX_DIR;
use crate::services::exporter::audio_file_name;
use crate::services::parser::ScriptParser;
use crate::services::tts::TtsClient;
use crate::utils::text::DialogTextCleaner;
use anyhow::{Context, Result};
use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;

/// Outcome for one dialog line of the build step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineAudio {
    pub line_number: usize,
    pub path: PathBuf,
    pub success: bool,
    /// The file already existed and was kept.
    pub cached: bool,
    pub error: Option<String>,
}

#[async_trait]
pub trait AudioBuilder: Send + Sync {
    fn provider_name(&self) -> &str;

    /// Synthesizes every dialog line into `<work_dir>/assets/sfx/dialog-<n>.mp3`.
    /// Per-line failures are reported in the result, not returned as errors.
    async fn build(&self, episode: &Episode, force: bool) -> Result<Vec<LineAudio>>;
}

pub struct EpisodeBuilder {
    tts: Box<dyn TtsClient>,
    characters: CharacterRegistry,
    voice_mappings: VoiceMappings,
    storage: Arc<dyn Storage>,
    parser: ScriptParser,
    cleaner: DialogTextCleaner,
}

impl EpisodeBuilder {
    pub fn new(
        tts: Box<dyn TtsClient>,
        characters: CharacterRegistry,
        voice_mappings: VoiceMappings,
        storage: Arc<dyn Storage>,
    ) -> Result<Self> {
        Ok(Self {
            tts,
            characters,
            voice_mappings,
            storage,
            parser: ScriptParser::new(),
            cleaner: DialogTextCleaner::new()?,
        })
    }

    pub fn voice_for(&self, line: &DialogLine) -> String {
        let provider = self.tts.name();
        let provider_voices = self.voice_mappings.get(provider);
        let lookup = |key: &str| provider_voices.and_then(|voices| voices.get(key)).cloned();

        if let Some(character) = self.characters.find_by_name(&line.character) {
            if let Some(voice) = character.voice_for(provider) {
                return voice.to_string();
            }
            if let Some(voice) = lookup(&character.id) {
                return voice;
            }
        }
        if let Some(voice) = lookup(&line.character) {
            return voice;
        }
        self.tts
            .supported_voices()
            .first()
            .cloned()
            .unwrap_or_else(|| "default".to_string())
    }
}

#[async_trait]
impl AudioBuilder for EpisodeBuilder {
    fn provider_name(&self) -> &str {
        self.tts.name()
    }

    async fn build(&self, episode: &Episode, force: bool) -> Result<Vec<LineAudio>> {
        let script = episode
            .script_raw
            .as_deref()
            .context("Episode has no script to build")?;
        let work_dir = episode
            .work_dir
            .as_ref()
            .context("Episode has no work_dir set")?;
        let sfx_dir = work_dir.join(SFX_DIR);

        let doc = self.parser.parse(script);
        let lines: Vec<&DialogLine> = doc.dialog_lines().collect();
        println!("Synthesizing audio ({} lines)...", lines.len());

        let pb = ProgressBar::new(lines.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
                .progress_chars("#>-"),
        );

        let mut results = Vec::with_capacity(lines.len());
        let (mut generated, mut cached, mut failed) = (0usize, 0usize, 0usize);

        for line in lines {
            pb.inc(1);
            let path = sfx_dir.join(audio_file_name(line.line_number));
            let path_string = path_str(&path);

            if !force && self.storage.exists(&path_string).await? {
                cached += 1;
                results.push(LineAudio {
                    line_number: line.line_number,
                    path,
                    success: true,
                    cached: true,
                    error: None,
                });
                continue;
            }

            let text = self.cleaner.clean(&line.text);
            if text.is_empty() {
                warn!("Line {} is empty after cleaning, skipping", line.line_number);
                continue;
            }

            let voice = self.voice_for(line);
            debug!(
                "Synthesizing line {} ({} as {})",
                line.line_number, line.character, voice
            );

            let outcome = match self.tts.synthesize(&text, &voice).await {
                Ok(audio) => self.storage.write(&path_string, &audio).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => {
                    generated += 1;
                    results.push(LineAudio {
                        line_number: line.line_number,
                        path,
                        success: true,
                        cached: false,
                        error: None,
                    });
                }
                Err(e) => {
                    error!("Synthesis failed for line {}: {:#}", line.line_number, e);
                    failed += 1;
                    results.push(LineAudio {
                        line_number: line.line_number,
                        path,
                        success: false,
                        cached: false,
                        error: Some(format!("{:#}", e)),
                    });
                }
            }
        }

        pb.finish_with_message("Synthesis complete");
        info!(
            "Build finished: {} generated, {} cached, {} failed",
            generated, cached, failed
        );
        Ok(results)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use anyhow::anyhow;
    use std::sync::Mutex;

    /// Records every synthesis request and returns `<voice>:<text>` as audio.
    pub struct RecordingTts {
        pub voices: Vec<String>,
        pub calls: Arc<Mutex<Vec<(String, String)>>>,
        pub fail_on: Option<String>,
    }

    impl RecordingTts {
        pub fn new(voices: &[&str]) -> Self {
            Self {
                voices: voices.iter().map(|v| v.to_string()).collect(),
                calls: Arc::new(Mutex::new(Vec::new())),
                fail_on: None,
            }
        }
    }

    #[async_trait]
    impl TtsClient for RecordingTts {
        fn name(&self) -> &str {
            "mock"
        }

        fn supported_voices(&self) -> &[String] {
            &self.voices
        }

        async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
            self.calls
                .lock()
                .unwrap()
                .push((text.to_string(), voice.to_string()));
            if self.fail_on.as_deref() == Some(text) {
                return Err(anyhow!("voice server unavailable"));
            }
            Ok(format!("{}:{}", voice, text).into_bytes())
        }
    }
}
