use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.yml";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub tts: TtsConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String, // "openai" or "ollama"
    #[serde(default = "default_llm_model")]
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            api_key: None,
            base_url: None,
            temperature: default_temperature(),
            timeout_seconds: default_timeout(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TtsConfig {
    #[serde(default = "default_tts_provider")]
    pub provider: String, // "mock" or "openai"
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    #[serde(default = "default_tts_model")]
    pub model: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: default_tts_provider(),
            api_key: None,
            base_url: None,
            model: default_tts_model(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_provider")]
    pub provider: String,
    #[serde(default = "default_scenes_dir")]
    pub scenes_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: default_storage_provider(),
            scenes_dir: default_scenes_dir(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_incomplete_dir")]
    pub incomplete_dir: PathBuf,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_placeholders_dir")]
    pub placeholders_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            incomplete_dir: default_incomplete_dir(),
            data_dir: default_data_dir(),
            placeholders_dir: default_placeholders_dir(),
        }
    }
}

impl PathsConfig {
    pub fn characters_file(&self) -> PathBuf {
        self.data_dir.join("characters.yaml")
    }

    pub fn shots_file(&self) -> PathBuf {
        self.data_dir.join("shots.yaml")
    }

    pub fn voices_file(&self) -> PathBuf {
        self.data_dir.join("voices.yaml")
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Attempts per generation step, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default)]
    pub retry_delay_seconds: u64,
    #[serde(default)]
    pub unattended: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_seconds: 0,
            unattended: false,
        }
    }
}

fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o".to_string()
}
fn default_temperature() -> f32 {
    0.9
}
fn default_timeout() -> u64 {
    120
}
fn default_tts_provider() -> String {
    "mock".to_string()
}
fn default_tts_model() -> String {
    "tts-1".to_string()
}
fn default_storage_provider() -> String {
    "local".to_string()
}
fn default_scenes_dir() -> PathBuf {
    PathBuf::from("scenes")
}
fn default_incomplete_dir() -> PathBuf {
    PathBuf::from("incomplete")
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_placeholders_dir() -> PathBuf {
    PathBuf::from("placeholders")
}
fn default_max_attempts() -> usize {
    3
}

impl Config {
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// API keys may come from the environment instead of the file.
    fn apply_env_overrides(&mut self) {
        if self.llm.api_key.is_none() {
            self.llm.api_key = std::env::var("OPENAI_API_KEY").ok();
        }
        if self.tts.api_key.is_none() && self.tts.provider == "openai" {
            self.tts.api_key = self.llm.api_key.clone();
        }
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.paths.incomplete_dir)?;
        fs::create_dir_all(&self.paths.data_dir)?;
        fs::create_dir_all(&self.storage.scenes_dir)?;
        Ok(())
    }
}
