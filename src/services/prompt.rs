use crate::core::registry::{CharacterRegistry, ShotRegistry};
use crate::core::state::EpisodeOutline;
use crate::services::llm::ChatMessage;

const FORMAT_RULES: &str = "\
Script format, one statement per line:
  >> [shotId] > characterCount/maxCount - Name1, Name2
  :: Character : inflection : spoken text
  == one-line episode summary
Rules:
- Every dialog line belongs to the scene header above it.
- Only list characters the shot can hold.
- Every dialog line must have spoken text.";

const OUTLINE_FORMAT: &str = "\
title: <episode title>
premise: <one or two sentences>
theme: <optional theme>
scenes:
1. [Shot <id>] - <Name>, <Name>
   - Setup: <what is going on>
   - Beat: <the joke or turn>
   - Lands: <how the scene ends>
callbacks:
- <running gag that pays off later>
ending: <final beat>";

/// Renders the chat messages sent at the outline and script steps.
pub struct PromptBuilder<'a> {
    characters: &'a CharacterRegistry,
    shots: &'a ShotRegistry,
}

impl<'a> PromptBuilder<'a> {
    pub fn new(characters: &'a CharacterRegistry, shots: &'a ShotRegistry) -> Self {
        Self { characters, shots }
    }

    fn cast_section(&self) -> String {
        self.characters
            .characters()
            .map(|c| {
                let mut entry = format!("- {} ({}, {})", c.id, c.display_name(), c.gender.as_str());
                if !c.description.is_empty() {
                    entry.push_str(&format!(": {}", c.description));
                }
                if !c.quirks.is_empty() {
                    entry.push_str(&format!("\n  Voice: {}", c.quirks.trim()));
                }
                entry
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn shot_section(&self) -> String {
        self.shots
            .shots
            .iter()
            .map(|shot| {
                let restriction = shot
                    .gender_restriction
                    .map(|g| format!(", {} only", g.as_str()))
                    .unwrap_or_default();
                format!(
                    "- Shot {}: {} (max {} characters{})",
                    shot.id, shot.description, shot.max_characters, restriction
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn system_prompt(&self) -> String {
        format!(
            "You write short workplace comedy episodes for an animated series.\n\n\
             CHARACTERS:\n{}\n\nSHOTS:\n{}",
            self.cast_section(),
            self.shot_section()
        )
    }

    pub fn outline_messages(&self, topic: Option<&str>) -> Vec<ChatMessage> {
        let topic_line = match topic {
            Some(topic) => format!("The episode is about: {}\n\n", topic),
            None => "Pick a fresh everyday office situation.\n\n".to_string(),
        };
        vec![
            ChatMessage::system(self.system_prompt()),
            ChatMessage::user(format!(
                "{}Write an episode outline with 10-20 scenes in exactly this format:\n\n{}",
                topic_line, OUTLINE_FORMAT
            )),
        ]
    }

    pub fn script_messages(&self, outline: &EpisodeOutline) -> Vec<ChatMessage> {
        let shot_ids = self
            .shots
            .all_ids()
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        vec![
            ChatMessage::system(format!("{}\n\n{}", self.system_prompt(), FORMAT_RULES)),
            ChatMessage::user(format!(
                "Generate the full script for this existing outline. \
                 Output ONLY the script (scene headers and dialog), no outline section needed.\n\n\
                 OUTLINE:\n{}\n\n\
                 Use only these character names: {}\n\
                 Use only these shot ids: {}\n\n\
                 Cover every scene of the outline. Start directly with the first scene header (>>).",
                outline.raw_text.trim(),
                self.characters.all_ids().join(", "),
                shot_ids
            )),
        ]
    }
}
