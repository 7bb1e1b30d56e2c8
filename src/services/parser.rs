//! Parser for the WaveLang script format.
//!
//! ```text
//! >> [12] > 3/4 - Marcus, David, Carmen
//! :: Marcus : deadpan : We are out of coffee.
//! == Marcus discovers the coffee shortage.
//! ```

use crate::core::error::StructuralParseError;
use crate::core::script::{DialogLine, LineDiagnostic, Scene, SceneHeader, ScriptDocument};
use regex::Regex;
use std::sync::OnceLock;

/// How a single trimmed line of script text is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    /// Blank lines, `#` comments and markdown fences.
    Ignored,
    Header(SceneHeader),
    Dialog {
        character: String,
        inflection: String,
        text: String,
    },
    Summary(String),
    Unrecognized,
}

/// Classifies one line. Header wins over dialog, dialog over summary.
pub fn classify(line: &str) -> LineKind {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with("```") {
        return LineKind::Ignored;
    }
    if let Some(header) = parse_header(line) {
        return LineKind::Header(header);
    }
    if let Some((character, inflection, text)) = parse_dialog(line) {
        return LineKind::Dialog {
            character,
            inflection,
            text,
        };
    }
    if let Some(summary) = parse_summary(line) {
        return LineKind::Summary(summary);
    }
    LineKind::Unrecognized
}

fn parse_number<T: std::str::FromStr>(s: &str) -> Option<T> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

// >> [shotId] > declared/max - Name1, Name2
fn parse_header(line: &str) -> Option<SceneHeader> {
    let rest = line.strip_prefix(">>")?.trim_start();
    let rest = rest.strip_prefix('[')?;
    let (shot, rest) = rest.split_once(']')?;
    let shot_id = parse_number(shot)?;

    let rest = rest.trim_start().strip_prefix('>')?.trim_start();
    let (declared, rest) = rest.split_once('/')?;
    let declared_count = parse_number(declared.trim_end())?;

    let (max, roster_text) = rest.split_once('-')?;
    let max_characters = parse_number(max.trim())?;

    let roster_text = roster_text.trim();
    if roster_text.is_empty() {
        return None;
    }
    let roster = roster_text
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();

    Some(SceneHeader {
        shot_id,
        declared_count,
        max_characters,
        roster,
    })
}

// :: Character : Inflection : Text
fn parse_dialog(line: &str) -> Option<(String, String, String)> {
    let rest = line.strip_prefix("::")?;
    let mut fields = rest.splitn(3, ':');
    let character = fields.next()?.trim();
    let inflection = fields.next()?.trim();
    let text = fields.next()?.trim();
    if character.is_empty() || inflection.is_empty() {
        return None;
    }
    Some((character.to_string(), inflection.to_string(), text.to_string()))
}

// == summary text
fn parse_summary(line: &str) -> Option<String> {
    let text = line.strip_prefix("==")?.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Outline,
    Script,
}

// A marker may be bolded or trail other text on its line.
fn marker_regex() -> &'static Regex {
    static MARKER_RE: OnceLock<Regex> = OnceLock::new();
    MARKER_RE.get_or_init(|| {
        Regex::new(r"(?i)===\s*(PLOT|OUTLINE|SCRIPT)\s*===")
            .expect("section marker regex should compile")
    })
}

fn section_marker(line: &str) -> Option<Section> {
    let caps = marker_regex().captures(line)?;
    if caps[1].eq_ignore_ascii_case("SCRIPT") {
        Some(Section::Script)
    } else {
        Some(Section::Outline)
    }
}

/// Byte offsets of the first occurrence of each marker line:
/// (section, marker start, content start).
fn find_markers(text: &str) -> Vec<(Section, usize, usize)> {
    let mut markers: Vec<(Section, usize, usize)> = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if let Some(section) = section_marker(line) {
            if !markers.iter().any(|(s, _, _)| *s == section) {
                markers.push((section, offset, offset + line.len()));
            }
        }
        offset += line.len();
    }
    markers
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptParser;

impl ScriptParser {
    pub fn new() -> Self {
        Self
    }

    /// Parses script text into scenes. Pure: the same text always yields the
    /// same document and the same line numbers.
    pub fn parse(&self, text: &str) -> ScriptDocument {
        let mut scenes: Vec<Scene> = Vec::new();
        let mut current: Option<Scene> = None;
        let mut summary = None;
        let mut diagnostics = Vec::new();
        let mut next_line_number = 1;

        for (index, raw) in text.lines().enumerate() {
            let source_line = index + 1;
            match classify(raw) {
                LineKind::Ignored => {}
                LineKind::Header(header) => {
                    if let Some(scene) = current.take() {
                        scenes.push(scene);
                    }
                    current = Some(Scene::new(header));
                }
                LineKind::Dialog {
                    character,
                    inflection,
                    text,
                } => match current.as_mut() {
                    Some(scene) => {
                        scene.dialog.push(DialogLine {
                            character,
                            inflection,
                            text,
                            line_number: next_line_number,
                        });
                        next_line_number += 1;
                    }
                    None => diagnostics.push(LineDiagnostic {
                        source_line,
                        message: "Dialog line before scene header".to_string(),
                        raw: raw.to_string(),
                    }),
                },
                LineKind::Summary(text) => summary = Some(text),
                LineKind::Unrecognized => diagnostics.push(LineDiagnostic {
                    source_line,
                    message: "Unrecognized line format".to_string(),
                    raw: raw.to_string(),
                }),
            }
        }

        if let Some(scene) = current.take() {
            scenes.push(scene);
        }

        ScriptDocument {
            scenes,
            summary,
            raw_text: text.to_string(),
            diagnostics,
        }
    }

    pub fn has_section_markers(&self, text: &str) -> bool {
        text.lines().any(|line| section_marker(line).is_some())
    }

    /// Splits a combined response into `(outline, script)`. Each section runs
    /// from its marker line to the next marker or the end of the text.
    pub fn extract_sections(&self, combined: &str) -> Result<(String, String), StructuralParseError> {
        let markers = find_markers(combined);
        let section_text = |section: Section| {
            markers
                .iter()
                .find(|(s, _, _)| *s == section)
                .map(|(_, _, content_start)| {
                    let end = markers
                        .iter()
                        .map(|(_, marker_start, _)| *marker_start)
                        .filter(|start| start >= content_start)
                        .min()
                        .unwrap_or(combined.len());
                    combined[*content_start..end].trim().to_string()
                })
        };

        let outline = section_text(Section::Outline)
            .ok_or(StructuralParseError::MissingOutlineSection)?;
        let script = section_text(Section::Script)
            .ok_or(StructuralParseError::MissingScriptSection)?;
        Ok((outline, script))
    }
}
