use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

/// A camera setup the scene header points at.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Shot {
    pub id: u32,
    #[serde(default)]
    pub description: String,
    pub max_characters: usize,
    pub gender_restriction: Option<Gender>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Character {
    pub id: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub description: String,
    pub gender: Gender,
    /// Speech patterns and personality notes for dialog writing.
    #[serde(default)]
    pub quirks: String,
    /// Case-insensitive regexes tried in order when matching free-text names.
    #[serde(default)]
    pub patterns: Vec<String>,
    /// provider -> voice id
    #[serde(default)]
    pub voice_mappings: HashMap<String, String>,
}

impl Character {
    pub fn display_name(&self) -> &str {
        if self.full_name.is_empty() {
            &self.id
        } else {
            &self.full_name
        }
    }

    pub fn voice_for(&self, provider: &str) -> Option<&str> {
        self.voice_mappings.get(provider).map(String::as_str)
    }
}

#[derive(Debug, Clone)]
struct RegisteredCharacter {
    character: Character,
    patterns: Vec<Regex>,
}

#[derive(Debug, Clone, Default)]
pub struct CharacterRegistry {
    entries: Vec<RegisteredCharacter>,
}

impl CharacterRegistry {
    pub fn new(characters: Vec<Character>) -> Result<Self> {
        let mut entries = Vec::with_capacity(characters.len());
        for character in characters {
            let patterns = character
                .patterns
                .iter()
                .map(|p| {
                    Regex::new(&format!("(?i){}", p)).with_context(|| {
                        format!("Invalid name pattern '{}' for character {}", p, character.id)
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            entries.push(RegisteredCharacter {
                character,
                patterns,
            });
        }
        Ok(Self { entries })
    }

    /// Resolves a free-text name: an exact id match anywhere in the registry
    /// wins, otherwise the first character whose patterns match, in declared order.
    pub fn find_by_name(&self, name: &str) -> Option<&Character> {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|entry| entry.character.id.to_lowercase() == needle)
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|entry| entry.patterns.iter().any(|re| re.is_match(&needle)))
            })
            .map(|entry| &entry.character)
    }

    pub fn get_by_id(&self, id: &str) -> Option<&Character> {
        self.entries
            .iter()
            .map(|entry| &entry.character)
            .find(|c| c.id.eq_ignore_ascii_case(id))
    }

    pub fn characters(&self) -> impl Iterator<Item = &Character> {
        self.entries.iter().map(|entry| &entry.character)
    }

    pub fn all_ids(&self) -> Vec<&str> {
        self.characters().map(|c| c.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShotRegistry {
    #[serde(default)]
    pub shots: Vec<Shot>,
}

impl ShotRegistry {
    pub fn new(shots: Vec<Shot>) -> Self {
        Self { shots }
    }

    pub fn get_by_id(&self, shot_id: u32) -> Option<&Shot> {
        self.shots.iter().find(|shot| shot.id == shot_id)
    }

    pub fn all_ids(&self) -> Vec<u32> {
        self.shots.iter().map(|shot| shot.id).collect()
    }
}

/// provider -> (character id or name -> voice id)
pub type VoiceMappings = HashMap<String, HashMap<String, String>>;

#[derive(Deserialize)]
struct CharacterFile {
    #[serde(default)]
    characters: Vec<Character>,
}

pub fn load_characters(path: &Path) -> Result<CharacterRegistry> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file: CharacterFile = serde_yaml_ng::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    CharacterRegistry::new(file.characters)
}

pub fn load_shots(path: &Path) -> Result<ShotRegistry> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_yaml_ng::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Missing file means no provider-level mappings.
pub fn load_voice_mappings(path: &Path) -> Result<VoiceMappings> {
    if !path.exists() {
        return Ok(VoiceMappings::new());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mappings: Option<VoiceMappings> = serde_yaml_ng::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(mappings.unwrap_or_default())
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_find_by_name_exact_id_case_insensitive() {
        let cast = cast();
        assert_eq!(cast.find_by_name("  art ").map(|c| c.id.as_str()), Some("Art"));
        assert_eq!(cast.find_by_name("KAREN").map(|c| c.id.as_str()), Some("Karen"));
    }

    #[test]
    fn test_find_by_name_uses_patterns_in_order() {
        let cast = cast();
        assert_eq!(cast.find_by_name("Arthur").map(|c| c.id.as_str()), Some("Art"));
        assert_eq!(cast.find_by_name("David").map(|c| c.id.as_str()), Some("Dave"));
        assert!(cast.find_by_name("Nobody").is_none());
        assert!(cast.find_by_name("   ").is_none());
    }

    #[test]
    fn test_exact_id_beats_earlier_pattern() {
        let cast = CharacterRegistry::new(vec![
            character("Greedy", Gender::Male, &[".*"]),
            character("Nia", Gender::Female, &[]),
        ])
        .unwrap();
        assert_eq!(cast.find_by_name("nia").map(|c| c.id.as_str()), Some("Nia"));
        assert_eq!(cast.find_by_name("anyone").map(|c| c.id.as_str()), Some("Greedy"));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let err = CharacterRegistry::new(vec![character("Bad", Gender::Male, &["(unclosed"])])
            .unwrap_err();
        assert!(err.to_string().contains("Bad"));
    }

    #[test]
    fn test_load_registries_from_yaml() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let characters = dir.path().join("characters.yaml");
        let shots = dir.path().join("shots.yaml");
        fs::write(
            &characters,
            "characters:\n  - id: Art\n    full_name: Arthur Pendleton\n    gender: male\n    patterns: ['^art']\n    voice_mappings:\n      openai: onyx\n",
        )?;
        fs::write(
            &shots,
            "shots:\n  - id: 3\n    description: Break room\n    max_characters: 2\n    gender_restriction: female\n",
        )?;

        let cast = load_characters(&characters)?;
        let art = cast.find_by_name("Artie").unwrap();
        assert_eq!(art.display_name(), "Arthur Pendleton");
        assert_eq!(art.voice_for("openai"), Some("onyx"));

        let shots = load_shots(&shots)?;
        let shot = shots.get_by_id(3).unwrap();
        assert_eq!(shot.gender_restriction, Some(Gender::Female));
        assert!(shots.get_by_id(4).is_none());

        let voices = load_voice_mappings(&dir.path().join("voices.yaml"))?;
        assert!(voices.is_empty());
        Ok(())
    }
}
