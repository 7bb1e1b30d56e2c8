use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A single spoken line. `line_number` is global across the document and
/// names the synthesized audio file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DialogLine {
    pub character: String,
    pub inflection: String,
    pub text: String,
    pub line_number: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SceneHeader {
    pub shot_id: u32,
    /// Count written in the header, which may drift from `roster.len()`.
    pub declared_count: usize,
    pub max_characters: usize,
    pub roster: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Scene {
    pub header: SceneHeader,
    #[serde(default)]
    pub dialog: Vec<DialogLine>,
}

impl Scene {
    pub fn new(header: SceneHeader) -> Self {
        Self {
            header,
            dialog: Vec::new(),
        }
    }

    pub fn dialog_count(&self) -> usize {
        self.dialog.len()
    }
}

/// A line the parser could not place. Never fatal.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct LineDiagnostic {
    /// 1-based physical line in the parsed text.
    pub source_line: usize,
    pub message: String,
    pub raw: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ScriptDocument {
    pub scenes: Vec<Scene>,
    pub summary: Option<String>,
    pub raw_text: String,
    #[serde(default)]
    pub diagnostics: Vec<LineDiagnostic>,
}

impl ScriptDocument {
    pub fn scene_count(&self) -> usize {
        self.scenes.len()
    }

    pub fn dialog_count(&self) -> usize {
        self.scenes.iter().map(Scene::dialog_count).sum()
    }

    pub fn dialog_lines(&self) -> impl Iterator<Item = &DialogLine> {
        self.scenes.iter().flat_map(|scene| scene.dialog.iter())
    }

    pub fn all_characters(&self) -> BTreeSet<&str> {
        self.scenes
            .iter()
            .flat_map(|scene| scene.header.roster.iter().map(String::as_str))
            .collect()
    }
}
