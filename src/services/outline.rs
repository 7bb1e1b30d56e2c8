use crate::core::state::{EpisodeOutline, SceneBeat};

const UNTITLED: &str = "Untitled Episode";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    Scenes,
    Callbacks,
}

#[derive(Default)]
struct BeatDraft {
    shot_id: u32,
    characters: Vec<String>,
    setup: String,
    beat: String,
    lands: String,
}

/// Reads the outline the outline step asks the model for:
///
/// ```text
/// title: Coffee Crisis
/// premise: ...
/// scenes:
/// 1. [Shot 16] - Art, Nia
///    - Setup: ...
///    - Beat: ...
///    - Lands: ...
/// callbacks:
/// - ...
/// ending: ...
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct OutlineParser;

impl OutlineParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, content: &str) -> EpisodeOutline {
        let mut outline = EpisodeOutline {
            title: UNTITLED.to_string(),
            premise: String::new(),
            theme: None,
            scenes: Vec::new(),
            callbacks: Vec::new(),
            ending: None,
            raw_text: content.to_string(),
        };
        let mut block: Option<Block> = None;
        let mut draft: Option<BeatDraft> = None;

        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.eq_ignore_ascii_case("=== OUTLINE ===") {
                continue;
            }

            if let Some(value) = field(line, "title:") {
                outline.title = value;
                block = None;
            } else if let Some(value) = field(line, "premise:") {
                outline.premise = value;
                block = None;
            } else if let Some(value) = field(line, "theme:") {
                outline.theme = Some(value);
                block = None;
            } else if let Some(value) = field(line, "ending:") {
                outline.ending = Some(value);
                block = None;
            } else if line.starts_with("scenes:") {
                block = Some(Block::Scenes);
            } else if line.starts_with("callbacks:") {
                block = Some(Block::Callbacks);
            } else if block == Some(Block::Scenes) {
                if is_scene_line(line) {
                    if let Some(done) = draft.take() {
                        push_beat(&mut outline.scenes, done);
                    }
                    draft = Some(BeatDraft {
                        shot_id: extract_shot_id(line).unwrap_or(1),
                        characters: extract_characters(line),
                        ..Default::default()
                    });
                } else if let Some(current) = draft.as_mut() {
                    if let Some(value) = field(line, "- Setup:") {
                        current.setup = value;
                    } else if let Some(value) = field(line, "- Beat:") {
                        current.beat = value;
                    } else if let Some(value) = field(line, "- Lands:") {
                        current.lands = value;
                    }
                }
            } else if block == Some(Block::Callbacks) {
                if let Some(item) = line.strip_prefix('-') {
                    outline.callbacks.push(item.trim().to_string());
                }
            }
        }

        if let Some(done) = draft.take() {
            push_beat(&mut outline.scenes, done);
        }
        outline
    }
}

fn field(line: &str, key: &str) -> Option<String> {
    line.strip_prefix(key).map(|value| value.trim().to_string())
}

fn push_beat(scenes: &mut Vec<SceneBeat>, draft: BeatDraft) {
    scenes.push(SceneBeat {
        scene_num: scenes.len() + 1,
        shot_id: draft.shot_id,
        characters: draft.characters,
        setup: draft.setup,
        beat: draft.beat,
        lands: draft.lands,
    });
}

// "1. [Shot 16] - Art, Nia"
fn is_scene_line(line: &str) -> bool {
    line.starts_with(|c: char| c.is_ascii_digit()) && (line.contains('.') || line.contains('['))
}

fn extract_shot_id(line: &str) -> Option<u32> {
    let start = line.find('[')?;
    let end = start + line[start..].find(']')?;
    let inner = line[start + 1..end].trim();
    let digits = if inner.len() >= 4 && inner[..4].eq_ignore_ascii_case("shot") {
        inner[4..].trim()
    } else {
        inner
    };
    digits.parse().ok()
}

fn extract_characters(line: &str) -> Vec<String> {
    match line.split_once(" - ") {
        Some((_, names)) => names
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect(),
        None => Vec::new(),
    }
}
