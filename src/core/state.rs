use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

pub const META_VERSION: &str = "2.0.0";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum EpisodeStatus {
    #[default]
    Created,
    Outlined,
    Scripted,
    Built,
    Completed,
    Failed,
}

impl EpisodeStatus {
    /// Maps stored status strings, including legacy names, onto the current set.
    pub fn normalize(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "created" | "pending" => Some(Self::Created),
            "outlined" | "plot_generated" => Some(Self::Outlined),
            "scripted" | "script_generated" => Some(Self::Scripted),
            "built" => Some(Self::Built),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Outlined => "outlined",
            Self::Scripted => "scripted",
            Self::Built => "built",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The step that runs next from this status, `None` once terminal.
    pub fn next_step(&self) -> Option<PipelineStep> {
        match self {
            Self::Created => Some(PipelineStep::Outline),
            Self::Outlined => Some(PipelineStep::Script),
            Self::Scripted => Some(PipelineStep::Build),
            Self::Built => Some(PipelineStep::Complete),
            Self::Completed | Self::Failed => None,
        }
    }

    pub fn can_transition_to(&self, next: EpisodeStatus) -> bool {
        if next == Self::Failed {
            return !self.is_terminal();
        }
        self.next_step().map(|step| step.target_status()) == Some(next)
    }
}

impl TryFrom<String> for EpisodeStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::normalize(&value).ok_or_else(|| format!("unknown episode status: {}", value))
    }
}

impl fmt::Display for EpisodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    Outline,
    Script,
    Build,
    Complete,
}

impl PipelineStep {
    pub const ALL: [PipelineStep; 4] = [
        PipelineStep::Outline,
        PipelineStep::Script,
        PipelineStep::Build,
        PipelineStep::Complete,
    ];

    pub fn required_status(&self) -> EpisodeStatus {
        match self {
            Self::Outline => EpisodeStatus::Created,
            Self::Script => EpisodeStatus::Outlined,
            Self::Build => EpisodeStatus::Scripted,
            Self::Complete => EpisodeStatus::Built,
        }
    }

    pub fn target_status(&self) -> EpisodeStatus {
        match self {
            Self::Outline => EpisodeStatus::Outlined,
            Self::Script => EpisodeStatus::Scripted,
            Self::Build => EpisodeStatus::Built,
            Self::Complete => EpisodeStatus::Completed,
        }
    }

    pub fn next(&self) -> Option<PipelineStep> {
        self.target_status().next_step()
    }

    /// Steps still to run for an episode at `status`, in order.
    pub fn remaining(status: EpisodeStatus) -> Vec<PipelineStep> {
        match status.next_step() {
            Some(first) => Self::ALL
                .iter()
                .copied()
                .skip_while(|step| *step != first)
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Outline => "outline",
            Self::Script => "script",
            Self::Build => "build",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contents of `meta.json`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct EpisodeMeta {
    pub id: Uuid,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub status: EpisodeStatus,
    pub topic: Option<String>,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub build_mocked: bool,
    pub model_used: Option<String>,
    pub tts_provider: Option<String>,
    #[serde(default)]
    pub generation_tokens: u64,
    #[serde(default)]
    pub scene_count: usize,
    #[serde(default)]
    pub dialog_count: usize,
    #[serde(default)]
    pub steps_completed: Vec<PipelineStep>,
    pub current_step: Option<PipelineStep>,
}

fn default_version() -> String {
    META_VERSION.to_string()
}

impl EpisodeMeta {
    pub fn new(topic: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            version: default_version(),
            status: EpisodeStatus::Created,
            topic,
            title: None,
            created_at: Utc::now(),
            updated_at: None,
            completed_at: None,
            build_mocked: false,
            model_used: None,
            tts_provider: None,
            generation_tokens: 0,
            scene_count: 0,
            dialog_count: 0,
            steps_completed: Vec::new(),
            current_step: Some(PipelineStep::Outline),
        }
    }

    /// Records a finished step and points `current_step` at its successor.
    pub fn advance(&mut self, step: PipelineStep) {
        self.status = step.target_status();
        if !self.steps_completed.contains(&step) {
            self.steps_completed.push(step);
        }
        self.current_step = step.next();
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SceneBeat {
    pub scene_num: usize,
    pub shot_id: u32,
    pub characters: Vec<String>,
    pub setup: String,
    pub beat: String,
    pub lands: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EpisodeOutline {
    pub title: String,
    pub premise: String,
    pub theme: Option<String>,
    pub scenes: Vec<SceneBeat>,
    pub callbacks: Vec<String>,
    pub ending: Option<String>,
    pub raw_text: String,
}

#[derive(Clone, Debug)]
pub struct Episode {
    pub meta: EpisodeMeta,
    pub outline: Option<EpisodeOutline>,
    pub script_raw: Option<String>,
    pub work_dir: Option<PathBuf>,
}

impl Episode {
    pub fn new(topic: Option<String>) -> Self {
        Self {
            meta: EpisodeMeta::new(topic),
            outline: None,
            script_raw: None,
            work_dir: None,
        }
    }

    pub fn id_str(&self) -> String {
        self.meta.id.to_string()
    }

    pub fn status(&self) -> EpisodeStatus {
        self.meta.status
    }

    pub fn title(&self) -> &str {
        if let Some(outline) = &self.outline {
            return &outline.title;
        }
        self.meta.title.as_deref().unwrap_or("Untitled Episode")
    }

    pub fn is_incomplete(&self) -> bool {
        !self.meta.status.is_terminal()
    }
}
