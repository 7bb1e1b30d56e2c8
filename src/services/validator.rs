use crate::core::registry::{CharacterRegistry, ShotRegistry};
use crate::core::script::ScriptDocument;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ValidationIssue {
    pub code: String,
    pub message: String,
    /// 0-based index into `ScriptDocument::scenes`.
    pub scene_index: Option<usize>,
    pub line_number: Option<usize>,
}

impl ValidationIssue {
    fn scene(code: &str, scene_index: usize, message: String) -> Self {
        Self {
            code: code.to_string(),
            message,
            scene_index: Some(scene_index),
            line_number: None,
        }
    }

    fn line(code: &str, scene_index: usize, line_number: usize, message: String) -> Self {
        Self {
            code: code.to_string(),
            message,
            scene_index: Some(scene_index),
            line_number: Some(line_number),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.code)?;
        if let Some(index) = self.scene_index {
            write!(f, " scene {}", index + 1)?;
        }
        if let Some(line) = self.line_number {
            write!(f, " line {}", line)?;
        }
        write!(f, ": {}", self.message)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.errors
            .iter()
            .chain(self.warnings.iter())
            .any(|issue| issue.code == code)
    }

    /// Human readable report. Lists every error and the first five warnings.
    pub fn summary(&self, doc: &ScriptDocument) -> String {
        let mut lines = vec![
            format!(
                "Validation: {}",
                if self.is_valid() { "PASSED" } else { "FAILED" }
            ),
            format!(
                "Scenes: {}, Dialog lines: {}",
                doc.scene_count(),
                doc.dialog_count()
            ),
            format!(
                "Errors: {}, Warnings: {}",
                self.error_count(),
                self.warning_count()
            ),
        ];

        if !self.errors.is_empty() {
            lines.push(String::new());
            lines.push("Errors:".to_string());
            lines.extend(self.errors.iter().map(|issue| format!("  {}", issue)));
        }

        if !self.warnings.is_empty() {
            lines.push(String::new());
            lines.push("Warnings:".to_string());
            lines.extend(self.warnings.iter().take(5).map(|issue| format!("  {}", issue)));
            if self.warnings.len() > 5 {
                lines.push(format!("  ... and {} more", self.warnings.len() - 5));
            }
        }

        lines.join("\n")
    }
}

/// Checks a parsed script against the shot and character registries.
pub struct CastValidator<'a> {
    shots: &'a ShotRegistry,
    characters: &'a CharacterRegistry,
}

impl<'a> CastValidator<'a> {
    pub fn new(shots: &'a ShotRegistry, characters: &'a CharacterRegistry) -> Self {
        Self { shots, characters }
    }

    pub fn validate(&self, doc: &ScriptDocument) -> ValidationResult {
        let mut result = ValidationResult::default();

        if doc.scenes.is_empty() {
            result.warnings.push(ValidationIssue {
                code: "EMPTY_SCRIPT".to_string(),
                message: "No scenes found in script".to_string(),
                scene_index: None,
                line_number: None,
            });
            return result;
        }

        for (index, scene) in doc.scenes.iter().enumerate() {
            let header = &scene.header;
            let Some(shot) = self.shots.get_by_id(header.shot_id) else {
                result.errors.push(ValidationIssue::scene(
                    "INVALID_SHOT",
                    index,
                    format!("Shot {} does not exist", header.shot_id),
                ));
                continue;
            };

            let listed = header.roster.len();
            if listed > shot.max_characters {
                result.errors.push(ValidationIssue::scene(
                    "TOO_MANY_CHARACTERS",
                    index,
                    format!(
                        "Shot {} allows {} character(s), scene lists {}",
                        shot.id, shot.max_characters, listed
                    ),
                ));
            }

            if header.declared_count != listed {
                result.warnings.push(ValidationIssue::scene(
                    "CHARACTER_COUNT_MISMATCH",
                    index,
                    format!(
                        "Header declares {} character(s) but lists {}",
                        header.declared_count, listed
                    ),
                ));
            }

            for name in &header.roster {
                match self.characters.find_by_name(name) {
                    None => result.warnings.push(ValidationIssue::scene(
                        "UNKNOWN_CHARACTER",
                        index,
                        format!("Character '{}' is not in the registry", name),
                    )),
                    Some(character) => {
                        if let Some(required) = shot.gender_restriction {
                            if character.gender != required {
                                result.errors.push(ValidationIssue::scene(
                                    "GENDER_RESTRICTION",
                                    index,
                                    format!(
                                        "Shot {} requires {} characters, {} is {}",
                                        shot.id,
                                        required.as_str(),
                                        character.id,
                                        character.gender.as_str()
                                    ),
                                ));
                            }
                        }
                    }
                }
            }

            for line in &scene.dialog {
                match self.characters.find_by_name(&line.character) {
                    None => result.warnings.push(ValidationIssue::line(
                        "UNKNOWN_DIALOG_CHARACTER",
                        index,
                        line.line_number,
                        format!("Speaker '{}' is not in the registry", line.character),
                    )),
                    Some(character) => {
                        let speaker = line.character.trim();
                        let in_roster = header.roster.iter().any(|name| {
                            name.eq_ignore_ascii_case(&character.id)
                                || name.eq_ignore_ascii_case(speaker)
                        });
                        if !in_roster {
                            result.warnings.push(ValidationIssue::line(
                                "DIALOG_CHARACTER_NOT_IN_SCENE",
                                index,
                                line.line_number,
                                format!("{} speaks but is not listed in the scene", character.id),
                            ));
                        }
                    }
                }

                if line.text.trim().is_empty() {
                    result.errors.push(ValidationIssue::line(
                        "EMPTY_DIALOG",
                        index,
                        line.line_number,
                        format!("Line {} has no text", line.line_number),
                    ));
                }
            }
        }

        result
    }
}

pub fn validate(
    doc: &ScriptDocument,
    shots: &ShotRegistry,
    characters: &CharacterRegistry,
) -> ValidationResult {
    CastValidator::new(shots, characters).validate(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::fixtures::{cast, shots};
    use crate::services::parser::ScriptParser;

    fn check(script: &str) -> ValidationResult {
        let doc = ScriptParser::new().parse(script);
        validate(&doc, &shots(), &cast())
    }

    #[test]
    fn test_clean_script_passes() {
        let result = check(
            ">> [12] > 2/3 - Art, Nia\n:: Art : dry : Morning.\n:: Nia : bright : Hi Art!\n",
        );
        assert!(result.is_valid());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_empty_document_warns_only() {
        let result = check("== nothing happened\n");
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].code, "EMPTY_SCRIPT");
    }

    #[test]
    fn test_capacity_violation_is_single_error() {
        let result = check(">> [12] > 4/3 - Art, Nia, Dave, Karen\n:: Art : calm : Too many of us.\n");
        assert!(!result.is_valid());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].code, "TOO_MANY_CHARACTERS");
        assert_eq!(result.errors[0].scene_index, Some(0));
    }

    #[test]
    fn test_count_mismatch_is_advisory() {
        let result = check(">> [12] > 3/3 - Art, Nia\n:: Art : calm : Where is Dave?\n");
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].code, "CHARACTER_COUNT_MISMATCH");
    }

    #[test]
    fn test_unknown_shot_skips_rest_of_scene() {
        let result = check(">> [99] > 5/2 - Nobody, Ghost\n:: Ghost : eerie : Boo.\n");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].code, "INVALID_SHOT");
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_gender_restriction_and_unknown_names() {
        let result = check(">> [20] > 2/2 - Nia, Arthur\n:: Nia : soft : Hello.\n");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].code, "GENDER_RESTRICTION");

        let result = check(">> [16] > 2/4 - Art, Zed\n:: Art : calm : Who is Zed?\n");
        assert!(result.is_valid());
        assert!(result.has_code("UNKNOWN_CHARACTER"));
    }

    #[test]
    fn test_dialog_checks() {
        let script = "\
>> [16] > 2/4 - Art, Nia
:: Arthur : calm : Resolved through a pattern.
:: Dave : loud : I am not in this scene.
:: Stranger : odd : Who am I?
:: Nia : silent :
";
        let result = check(script);
        let codes: Vec<(&str, Option<usize>)> = result
            .warnings
            .iter()
            .map(|w| (w.code.as_str(), w.line_number))
            .collect();
        assert_eq!(
            codes,
            vec![
                ("DIALOG_CHARACTER_NOT_IN_SCENE", Some(2)),
                ("UNKNOWN_DIALOG_CHARACTER", Some(3)),
            ]
        );
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].code, "EMPTY_DIALOG");
        assert_eq!(result.errors[0].line_number, Some(4));
    }

    #[test]
    fn test_roster_match_ignores_case() {
        let result = check(">> [16] > 1/4 - Arthur\n:: arthur : calm : Hi.\n");
        assert!(result.is_valid());
        assert!(!result.has_code("DIALOG_CHARACTER_NOT_IN_SCENE"));

        let result = check(">> [16] > 1/4 - KAREN\n:: karen : dry : Noted.\n");
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_validation_does_not_touch_line_numbers() {
        let doc = ScriptParser::new().parse(">> [1] > 1/2 - Art\n:: Art : a : One.\n:: Art : b : Two.\n");
        let before = doc.clone();
        let _ = validate(&doc, &shots(), &cast());
        let _ = validate(&doc, &shots(), &cast());
        assert_eq!(doc, before);
    }

    #[test]
    fn test_summary_report() {
        let doc = ScriptParser::new().parse(">> [12] > 4/3 - Art, Nia, Dave, Karen\n:: Art : calm : Hi.\n");
        let result = validate(&doc, &shots(), &cast());
        let report = result.summary(&doc);
        assert!(report.starts_with("Validation: FAILED"));
        assert!(report.contains("Scenes: 1, Dialog lines: 1"));
        assert!(report.contains("[TOO_MANY_CHARACTERS] scene 1"));
    }
}
