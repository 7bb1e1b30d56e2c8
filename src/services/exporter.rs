use crate::core::io::{path_str, Storage};
use crate::core::script::{DialogLine, ScriptDocument};
use crate::core::state::{Episode, EpisodeStatus};
use anyhow::Result;
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MANIFEST_VERSION: &str = "1.0";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const DIALOGS_FILE: &str = "dialogs.json";

pub fn audio_file_name(line_number: usize) -> String {
    format!("dialog-{}.mp3", line_number)
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Manifest {
    pub version: String,
    pub episode_id: String,
    pub title: String,
    pub status: EpisodeStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outline: Option<OutlineSummary>,
    #[serde(default)]
    pub scenes: Vec<ManifestScene>,
    pub total_scenes: usize,
    pub total_dialog_lines: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OutlineSummary {
    pub title: String,
    pub premise: String,
    pub beats: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ManifestScene {
    pub index: usize,
    pub shot_id: u32,
    pub character_count: usize,
    pub max_characters: usize,
    pub characters: Vec<String>,
    pub dialog: Vec<ManifestDialog>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ManifestDialog {
    pub line_number: usize,
    pub character: String,
    pub inflection: String,
    pub text: String,
    pub audio_file: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DialogList {
    pub dialogs: Vec<ManifestDialog>,
    pub count: usize,
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

fn dialog_entry(line: &DialogLine) -> ManifestDialog {
    ManifestDialog {
        line_number: line.line_number,
        character: line.character.clone(),
        inflection: line.inflection.clone(),
        text: line.text.clone(),
        audio_file: audio_file_name(line.line_number),
    }
}

/// Writes the scene manifest the Unity player loads alongside `assets/sfx`.
pub struct UnityExporter<'a> {
    storage: &'a dyn Storage,
}

impl<'a> UnityExporter<'a> {
    pub fn new(storage: &'a dyn Storage) -> Self {
        Self { storage }
    }

    pub fn manifest(episode: &Episode, doc: Option<&ScriptDocument>) -> Manifest {
        let outline = episode.outline.as_ref().map(|outline| OutlineSummary {
            title: outline.title.clone(),
            premise: outline.premise.clone(),
            beats: outline
                .scenes
                .iter()
                .map(|beat| truncate(&beat.beat, 200))
                .collect(),
        });

        let scenes = doc
            .map(|doc| {
                doc.scenes
                    .iter()
                    .enumerate()
                    .map(|(index, scene)| ManifestScene {
                        index,
                        shot_id: scene.header.shot_id,
                        character_count: scene.header.declared_count,
                        max_characters: scene.header.max_characters,
                        characters: scene.header.roster.clone(),
                        dialog: scene.dialog.iter().map(dialog_entry).collect(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Manifest {
            version: MANIFEST_VERSION.to_string(),
            episode_id: episode.id_str(),
            title: episode.title().to_string(),
            status: episode.status(),
            created_at: episode.meta.created_at,
            outline,
            scenes,
            total_scenes: doc.map_or(0, ScriptDocument::scene_count),
            total_dialog_lines: doc.map_or(0, ScriptDocument::dialog_count),
        }
    }

    pub async fn write_manifest(
        &self,
        episode: &Episode,
        doc: Option<&ScriptDocument>,
        dir: &Path,
    ) -> Result<PathBuf> {
        let manifest = Self::manifest(episode, doc);
        let path = dir.join(MANIFEST_FILE);
        self.storage
            .write(&path_str(&path), serde_json::to_string_pretty(&manifest)?.as_bytes())
            .await?;
        info!("Manifest exported to {}", path.display());
        Ok(path)
    }

    pub async fn write_dialog_list(&self, doc: &ScriptDocument, dir: &Path) -> Result<PathBuf> {
        let dialogs: Vec<ManifestDialog> = doc.dialog_lines().map(dialog_entry).collect();
        let list = DialogList {
            count: dialogs.len(),
            dialogs,
        };
        let path = dir.join(DIALOGS_FILE);
        self.storage
            .write(&path_str(&path), serde_json::to_string_pretty(&list)?.as_bytes())
            .await?;
        info!("Dialog list exported to {} ({} lines)", path.display(), list.count);
        Ok(path)
    }
}

/// Markdown preview shown by `show`.
pub fn preview_text(episode: &Episode, doc: Option<&ScriptDocument>) -> String {
    let mut lines = vec![format!("# {}", episode.title()), String::new()];
    lines.push(format!("Status: {}", episode.status()));
    if let Some(topic) = &episode.meta.topic {
        lines.push(format!("Topic: {}", topic));
    }
    lines.push(String::new());

    if let Some(outline) = &episode.outline {
        if !outline.premise.is_empty() {
            lines.push(format!("**Premise:** {}", outline.premise));
            lines.push(String::new());
        }
        for beat in &outline.scenes {
            lines.push(format!(
                "{}. [Shot {}] {} - {}",
                beat.scene_num,
                beat.shot_id,
                beat.characters.join(", "),
                beat.beat
            ));
        }
        lines.push(String::new());
    }

    if let Some(doc) = doc {
        lines.push("## Scene Breakdown".to_string());
        lines.push(format!(
            "Total Scenes: {}, Total Dialog Lines: {}",
            doc.scene_count(),
            doc.dialog_count()
        ));
        let cast: Vec<&str> = doc.all_characters().into_iter().collect();
        lines.push(format!("Cast: {}", cast.join(", ")));
        lines.push(String::new());
        for (i, scene) in doc.scenes.iter().enumerate() {
            lines.push(format!("### Scene {} (Shot {})", i + 1, scene.header.shot_id));
            lines.push(format!("*Characters: {}*", scene.header.roster.join(", ")));
            for line in scene.dialog.iter().take(3) {
                lines.push(format!(
                    "> **{}** ({}): {}",
                    line.character,
                    line.inflection,
                    truncate(&line.text, 80)
                ));
            }
            if scene.dialog.len() > 3 {
                lines.push(format!("*...and {} more lines*", scene.dialog.len() - 3));
            }
            lines.push(String::new());
        }
    }

    lines.join("\n")
}
